//! One-shot HTTP listener that receives the OAuth redirect.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use askama::Template;
use askama_web::WebTemplate;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

/// State shared by the callback route for a single authorization attempt.
#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    code_tx: Slot<String>,
    shutdown_tx: Slot<()>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Template, WebTemplate)]
#[template(path = "authorized.html")]
struct AuthorizedTemplate {
    app_name: &'static str,
}

#[derive(Template, WebTemplate)]
#[template(path = "callback_error.html")]
struct CallbackErrorTemplate {
    reason: String,
}

fn take<T>(slot: &Slot<T>) -> Option<oneshot::Sender<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn build_router(state: CallbackState) -> Router {
    Router::new().route("/", get(callback)).with_state(state)
}

async fn callback(State(state): State<CallbackState>, Query(params): Query<CallbackParams>) -> Response {
    if let Some(reason) = params.error {
        warn!(%reason, "authorization was not granted");
        return rejected(format!("Authorization was not granted: {reason}"));
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return rejected("The request did not carry an authorization code.".to_owned());
    };
    if params.state.as_deref() != Some(state.expected_state.as_str()) {
        warn!("callback state mismatch");
        return rejected("The request did not match the pending authorization.".to_owned());
    }

    let Some(code_tx) = take(&state.code_tx) else {
        return rejected("An authorization code was already received.".to_owned());
    };
    if code_tx.send(code).is_err() {
        warn!("authorization flow stopped waiting before the code arrived");
    }
    // Graceful shutdown lets this response finish before the listener closes.
    if let Some(shutdown) = take(&state.shutdown_tx) {
        let _ = shutdown.send(());
    }
    info!("authorization code received");
    AuthorizedTemplate {
        app_name: "odoo-backup",
    }
    .into_response()
}

fn rejected(reason: String) -> Response {
    (StatusCode::BAD_REQUEST, CallbackErrorTemplate { reason }).into_response()
}

/// Listener bound for one authorization attempt. Dropping it shuts the
/// server down, so every exit path of the flow releases the port.
pub struct CallbackListener {
    addr: SocketAddr,
    code_rx: oneshot::Receiver<String>,
    shutdown_tx: Slot<()>,
}

impl CallbackListener {
    pub async fn bind(addr: SocketAddr, expected_state: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind OAuth callback listener on {addr}"))?;
        let addr = listener.local_addr().context("callback listener address")?;

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shutdown_tx: Slot<()> = Arc::new(Mutex::new(Some(shutdown_tx)));
        let app = build_router(CallbackState {
            expected_state: expected_state.to_owned(),
            code_tx: Arc::new(Mutex::new(Some(code_tx))),
            shutdown_tx: shutdown_tx.clone(),
        });

        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                error!(error = %e, "OAuth callback listener failed");
            }
            debug!("OAuth callback listener stopped");
        });

        info!(%addr, "waiting for OAuth callback");
        Ok(Self {
            addr,
            code_rx,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the browser delivers a code. `None` waits indefinitely.
    pub async fn wait_for_code(mut self, timeout: Option<Duration>) -> Result<String> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.code_rx)
                .await
                .map_err(|_| anyhow!("no authorization code received within {}s", limit.as_secs()))?,
            None => (&mut self.code_rx).await,
        };
        received.context("callback listener stopped before an authorization code arrived")
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(shutdown) = take(&self.shutdown_tx) {
            let _ = shutdown.send(());
        }
    }
}
