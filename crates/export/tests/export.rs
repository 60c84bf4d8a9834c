use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use odoo_backup_core::parse_artifact_timestamp;
use odoo_backup_export::{export_database, ExportError, ExportRequest};

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

struct FakeOdoo {
    base_url: String,
    seen: Seen,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start_odoo(status: StatusCode, body: Vec<u8>) -> FakeOdoo {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route(
            "/web/database/backup",
            post(
                move |State(seen): State<Seen>, Form(params): Form<HashMap<String, String>>| {
                    let body = body.clone();
                    async move {
                        seen.lock().unwrap().push(params);
                        (status, body)
                    }
                },
            ),
        )
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeOdoo {
        base_url: format!("http://{addr}"),
        seen,
        _handle: handle,
    }
}

fn request(base_url: &str) -> ExportRequest {
    ExportRequest {
        base_url: base_url.to_owned(),
        database: "sales_2024".to_owned(),
        master_password: "master-secret".to_owned(),
    }
}

#[tokio::test]
async fn successful_export_writes_exact_bytes() {
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let odoo = start_odoo(StatusCode::OK, payload.clone()).await;
    let tmp = tempfile::tempdir().unwrap();

    let artifact = export_database(&reqwest::Client::new(), &request(&odoo.base_url), tmp.path())
        .await
        .unwrap();

    assert_eq!(artifact.size_bytes, payload.len() as u64);
    assert_eq!(std::fs::read(&artifact.path).unwrap(), payload);
    let name = artifact.path.file_name().unwrap().to_str().unwrap();
    assert!(parse_artifact_timestamp("sales_2024", name).is_some(), "unexpected name {name}");

    let seen = odoo.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["master_pwd"], "master-secret");
    assert_eq!(seen[0]["name"], "sales_2024");
    assert_eq!(seen[0]["backup_format"], "zip");
}

#[tokio::test]
async fn empty_body_still_produces_file() {
    let odoo = start_odoo(StatusCode::OK, Vec::new()).await;
    let tmp = tempfile::tempdir().unwrap();

    let artifact = export_database(&reqwest::Client::new(), &request(&odoo.base_url), tmp.path())
        .await
        .unwrap();
    assert_eq!(artifact.size_bytes, 0);
    assert!(artifact.path.exists());
}

#[tokio::test]
async fn error_status_surfaces_body_and_writes_nothing() {
    let odoo = start_odoo(StatusCode::INTERNAL_SERVER_ERROR, b"db not found".to_vec()).await;
    let tmp = tempfile::tempdir().unwrap();

    let err = export_database(&reqwest::Client::new(), &request(&odoo.base_url), tmp.path())
        .await
        .unwrap_err();

    match err.downcast_ref::<ExportError>() {
        Some(ExportError::Status { status, body }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "db not found");
        }
        None => panic!("expected ExportError, got {err:#}"),
    }
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let tmp = tempfile::tempdir().unwrap();

    let err = export_database(&reqwest::Client::new(), &request(&format!("http://{addr}")), tmp.path())
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<ExportError>().is_none());
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}
