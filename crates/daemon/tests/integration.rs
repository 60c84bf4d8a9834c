use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use odoo_backup_core::{parse_artifact_timestamp, RetentionPolicy, Token};
use odoo_backup_daemon::authorize::{obtain_token, redirect_uri};
use odoo_backup_daemon::{run_backup, AuthSettings, CallbackListener, RunPlan, RunStage, STATE_TOKEN};
use odoo_backup_drive::{ClientSecrets, OAuthClient};
use odoo_backup_export::{ExportError, ExportRequest};
use odoo_backup_storage::{CredentialStore, MemoryRemoteStore};
use serde_json::json;

struct TestServer {
    base_url: String,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start_server(app: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        base_url: format!("http://{addr}"),
        _handle: handle,
    }
}

async fn start_odoo(status: StatusCode, body: &'static [u8]) -> TestServer {
    start_server(Router::new().route(
        "/web/database/backup",
        post(move || async move { (status, body) }),
    ))
    .await
}

fn plan(base_url: &str, dir: &std::path::Path) -> RunPlan {
    RunPlan {
        export: ExportRequest {
            base_url: base_url.to_owned(),
            database: "sales_2024".to_owned(),
            master_password: "master".to_owned(),
        },
        backup_dir: dir.to_path_buf(),
        folder_name: "odoo_backup".to_owned(),
        retention: RetentionPolicy::days(5),
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn successful_run_uploads_exact_bytes_and_removes_local_copy() {
    let odoo = start_odoo(StatusCode::OK, b"PK\x03\x04 archive bytes").await;
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("backups");
    let store = MemoryRemoteStore::new();

    let report = run_backup(&reqwest::Client::new(), &store, &plan(&odoo.base_url, &dir))
        .await
        .unwrap();

    assert_eq!(report.stage, RunStage::Done);
    assert_eq!(report.size_bytes, 18);
    assert!(report.export_ms >= 0);
    let name = report.artifact.file_name().unwrap().to_str().unwrap();
    assert!(parse_artifact_timestamp("sales_2024", name).is_some());

    assert!(report.local_removed);
    assert!(!report.artifact.exists());
    assert_eq!(store.list_calls(), 1);

    let folders = store.folders();
    let folder = &folders[0];
    assert_eq!(folder.name, "odoo_backup");
    let remote = store.files_in(&folder.id);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].name, name);
    assert_eq!(store.content_of(&remote[0].id).unwrap(), b"PK\x03\x04 archive bytes");
}

#[tokio::test]
async fn export_failure_aborts_before_upload() {
    let odoo = start_odoo(StatusCode::INTERNAL_SERVER_ERROR, b"db not found").await;
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryRemoteStore::new();

    let err = run_backup(&reqwest::Client::new(), &store, &plan(&odoo.base_url, tmp.path()))
        .await
        .unwrap_err();

    match err.downcast_ref::<ExportError>() {
        Some(ExportError::Status { status, body }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "db not found");
        }
        None => panic!("expected export error, got {err:#}"),
    }
    assert!(format!("{err:#}").contains("after stage init"));
    assert!(store.folders().is_empty());
    assert_eq!(store.list_calls(), 0);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn runs_within_window_keep_each_other_and_later_run_prunes_both() {
    let odoo = start_odoo(StatusCode::OK, b"zip").await;
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryRemoteStore::new();
    let http = reqwest::Client::new();
    let plan = plan(&odoo.base_url, tmp.path());

    let first = run_backup(&http, &store, &plan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = run_backup(&http, &store, &plan).await.unwrap();
    assert_ne!(first.artifact, second.artifact);
    assert!(second.remote_sweep.deleted.is_empty());

    let folder_id = store.folders()[0].id.clone();
    assert_eq!(store.files_in(&folder_id).len(), 2);

    store.backdate_files_in(&folder_id, chrono::Duration::days(6));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = run_backup(&http, &store, &plan).await.unwrap();

    assert_eq!(third.remote_sweep.deleted.len(), 2);
    let remaining = store.files_in(&folder_id);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, third.remote_file_id);
    assert_eq!(store.folders().len(), 1);
}

#[tokio::test]
async fn local_sweep_prunes_stale_leftovers() {
    let odoo = start_odoo(StatusCode::OK, b"zip").await;
    let tmp = tempfile::tempdir().unwrap();
    let stale = tmp.path().join("sales_2024_20200101_000000.zip");
    let recent = tmp.path().join("sales_2024_20990101_000000.zip");
    std::fs::write(&stale, b"old").unwrap();
    std::fs::write(&recent, b"new").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(10 * 24 * 3600))
        .unwrap();

    let store = MemoryRemoteStore::new();
    let report = run_backup(&reqwest::Client::new(), &store, &plan(&odoo.base_url, tmp.path()))
        .await
        .unwrap();

    assert_eq!(report.local_sweep.deleted, vec!["sales_2024_20200101_000000.zip".to_owned()]);
    assert!(!stale.exists());
    assert!(recent.exists());
}

#[tokio::test]
async fn callback_delivers_code_and_shuts_down() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap(), STATE_TOKEN)
        .await
        .unwrap();
    let addr = listener.local_addr();
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/?state={STATE_TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("http://{addr}/?code=wrong-state-code&state=forged"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("http://{addr}/?code=4%2Fabc&state={STATE_TOKEN}&scope=drive.file"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("Authorization complete"));

    let code = listener.wait_for_code(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(code, "4/abc");

    let mut closed = false;
    for _ in 0..50 {
        if reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .is_err()
        {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "callback listener still accepting connections");
}

#[tokio::test]
async fn callback_wait_times_out_and_releases_port() {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap(), STATE_TOKEN)
        .await
        .unwrap();
    let addr = listener.local_addr();

    let err = listener
        .wait_for_code(Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no authorization code"));

    let mut rebound = None;
    for _ in 0..50 {
        if let Ok(l) = CallbackListener::bind(addr, STATE_TOKEN).await {
            rebound = Some(l);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rebound.is_some(), "port was not released");
}

#[tokio::test]
async fn bind_fails_when_port_is_taken() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let err = match CallbackListener::bind(addr, STATE_TOKEN).await {
        Ok(_) => panic!("bind should fail while the port is in use"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("bind OAuth callback listener"));
}

type TokenRequests = Arc<Mutex<Vec<HashMap<String, String>>>>;

async fn start_identity_provider() -> (TestServer, TokenRequests) {
    let seen: TokenRequests = Arc::default();
    let app = Router::new()
        .route(
            "/token",
            post(
                |State(seen): State<TokenRequests>, Form(params): Form<HashMap<String, String>>| async move {
                    let ok = params.get("code").map(String::as_str) == Some("granted");
                    seen.lock().unwrap().push(params);
                    if ok {
                        Ok(Json(json!({
                            "access_token": "fresh-access",
                            "refresh_token": "fresh-refresh",
                            "expires_in": 3600,
                            "token_type": "Bearer",
                        })))
                    } else {
                        Err((StatusCode::BAD_REQUEST, "invalid_grant"))
                    }
                },
            ),
        )
        .with_state(seen.clone());
    (start_server(app).await, seen)
}

fn oauth_client(idp: &TestServer, port: u16) -> OAuthClient {
    OAuthClient::new(
        reqwest::Client::new(),
        ClientSecrets {
            client_id: "client".to_owned(),
            client_secret: "secret".to_owned(),
            auth_uri: format!("{}/auth", idp.base_url),
            token_uri: format!("{}/token", idp.base_url),
        },
        redirect_uri(SocketAddr::from(([127, 0, 0, 1], port))),
    )
}

fn auth_settings(dir: &std::path::Path, port: u16) -> AuthSettings {
    AuthSettings {
        client_secrets: dir.join("client_secrets.json"),
        token_file: dir.join("credentials.json"),
        callback_addr: SocketAddr::from(([127, 0, 0, 1], port)),
        callback_timeout: Some(Duration::from_secs(10)),
    }
}

#[tokio::test]
async fn interactive_grant_stores_exchanged_token() {
    let (idp, seen) = start_identity_provider().await;
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let settings = auth_settings(tmp.path(), port);
    let store = CredentialStore::new(&settings.token_file);
    let oauth = oauth_client(&idp, port);

    let browser = tokio::spawn(async move {
        let client = reqwest::Client::new();
        for _ in 0..200 {
            let sent = client
                .get(format!("http://127.0.0.1:{port}/?code=granted&state={STATE_TOKEN}"))
                .send()
                .await;
            if let Ok(resp) = sent {
                return resp.status();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("callback listener never came up");
    });

    let token = obtain_token(&oauth, &store, &settings).await.unwrap();
    assert_eq!(browser.await.unwrap(), 200);

    assert_eq!(token.access_token, "fresh-access");
    assert_eq!(store.load(), Some(token));
    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["grant_type"], "authorization_code");
    assert_eq!(requests[0]["redirect_uri"], format!("http://127.0.0.1:{port}/"));
}

#[tokio::test]
async fn fresh_stored_token_skips_authorization() {
    let (idp, seen) = start_identity_provider().await;
    let tmp = tempfile::tempdir().unwrap();
    let settings = auth_settings(tmp.path(), free_port());
    let store = CredentialStore::new(&settings.token_file);
    let stored = Token {
        access_token: "still-good".to_owned(),
        refresh_token: Some("r".to_owned()),
        token_type: "Bearer".to_owned(),
        expiry: Some(Utc::now() + chrono::Duration::hours(1)),
    };
    store.save(&stored).unwrap();

    let token = obtain_token(&oauth_client(&idp, 0), &store, &settings).await.unwrap();
    assert_eq!(token, stored);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_exchange_is_fatal_and_stores_nothing() {
    let (idp, _seen) = start_identity_provider().await;
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let settings = auth_settings(tmp.path(), port);
    let store = CredentialStore::new(&settings.token_file);

    let browser = tokio::spawn(async move {
        let client = reqwest::Client::new();
        for _ in 0..200 {
            if client
                .get(format!("http://127.0.0.1:{port}/?code=revoked&state={STATE_TOKEN}"))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });

    let err = obtain_token(&oauth_client(&idp, port), &store, &settings)
        .await
        .unwrap_err();
    browser.await.unwrap();
    assert!(format!("{err:#}").contains("invalid_grant"));
    assert_eq!(store.load(), None);
}
