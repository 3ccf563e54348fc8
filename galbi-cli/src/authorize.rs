//! Local callback listener that receives a token from the browser.
//!
//! The authorization page redirects to `http://127.0.0.1:{port}/token?token=..`.
//! The listener saves the token, answers the browser and stops once that
//! answer has been written out.

use std::collections::HashMap;
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::after_response::{run_after_response, AfterResponse};
use crate::config::Paths;

pub const TOKEN_PATH: &str = "/token";

pub const SUCCESS_PAGE: &str = "galbi is authorized. You can close this tab.";
pub const FAILURE_PAGE: &str = "Authorization failed: no token was received. Please try again.";
const SAVE_FAILED_PAGE: &str = "Authorization failed: the token could not be saved locally.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    TokenReceived,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A credential was already saved and no refresh was asked for.
    AlreadyAuthorized,
    Authorized,
}

#[derive(Clone)]
struct ListenerState {
    paths: Paths,
    phase: Arc<Mutex<Phase>>,
}

fn lock(phase: &Mutex<Phase>) -> MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(|e| e.into_inner())
}

pub async fn authorize(
    paths: Paths,
    authorize_url: &str,
    port: u16,
    force: bool,
) -> anyhow::Result<Outcome> {
    if !force && paths.stored_token()?.is_some() {
        return Ok(Outcome::AlreadyAuthorized);
    }

    // bound before the browser opens so the redirect cannot arrive early
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
    let port = listener.local_addr()?.port();

    let url = callback_url(authorize_url, port)?;
    if let Err(e) = open_browser(url.as_str()) {
        warn!(error = %e, "could not open a browser");
    }
    println!("Waiting for authorization. If no browser opened, visit {url}");

    match serve(listener, paths).await? {
        Phase::Terminated => Ok(Outcome::Authorized),
        _ => bail!("authorization interrupted before a token was received"),
    }
}

/// `authorize_url` with the callback port added to its query.
fn callback_url(authorize_url: &str, port: u16) -> anyhow::Result<Url> {
    let mut url = Url::parse(authorize_url)
        .with_context(|| format!("invalid authorize url '{authorize_url}'"))?;
    url.query_pairs_mut().append_pair("port", &port.to_string());
    Ok(url)
}

/// Serves `/token` until a token was saved and its response written, or
/// until ctrl-c. Returns the final phase.
pub async fn serve(listener: TcpListener, paths: Paths) -> anyhow::Result<Phase> {
    let phase = Arc::new(Mutex::new(Phase::Waiting));
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let done_tx = Mutex::new(Some(done_tx));

    let hook_phase = Arc::clone(&phase);
    let hooks = AfterResponse::new().register(move |path| {
        if path != TOKEN_PATH {
            return;
        }
        let mut phase = lock(&hook_phase);
        if *phase != Phase::TokenReceived {
            return;
        }
        *phase = Phase::Terminated;
        let sender = done_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    });

    let state = ListenerState {
        paths,
        phase: Arc::clone(&phase),
    };
    let app = Router::new()
        .route(TOKEN_PATH, get(receive_token))
        .layer(axum::middleware::from_fn_with_state(
            hooks,
            run_after_response,
        ))
        .with_state(state);

    info!(addr = %listener.local_addr()?, "callback listener started");
    let shutdown = async {
        tokio::select! {
            _ = done_rx => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("callback listener failed")?;

    let phase = *lock(&phase);
    info!(?phase, "callback listener stopped");
    Ok(phase)
}

async fn receive_token(
    State(state): State<ListenerState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    let Some(token) = params.get("token").filter(|t| !t.is_empty()) else {
        warn!("callback without a token");
        return (StatusCode::BAD_REQUEST, FAILURE_PAGE);
    };

    if let Err(e) = state.paths.save_token(token) {
        error!(error = %format!("{e:#}"), "failed to save token");
        return (StatusCode::INTERNAL_SERVER_ERROR, SAVE_FAILED_PAGE);
    }

    let mut phase = lock(&state.phase);
    if *phase == Phase::Waiting {
        *phase = Phase::TokenReceived;
    }
    info!("token saved");
    (StatusCode::OK, SUCCESS_PAGE)
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    match Command::new(opener).arg(url).spawn() {
        Ok(_) => Ok(()),
        Err(e) if opener == "xdg-open" => {
            Command::new("open").arg(url).spawn().map(|_| ()).map_err(|_| e)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;

    async fn start(paths: &Paths) -> (String, JoinHandle<anyhow::Result<Phase>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(serve(listener, paths.clone()));
        (base, handle)
    }

    #[tokio::test]
    async fn test_token_is_saved_then_listener_stops() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let (base, handle) = start(&paths).await;

        let response = reqwest::get(format!("{base}/token?token=abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), SUCCESS_PAGE);

        let phase = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(phase, Phase::Terminated);
        assert_eq!(paths.stored_token().unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_missing_token_keeps_listening() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        paths.save_token("previous").unwrap();
        let (base, handle) = start(&paths).await;

        let response = reqwest::get(format!("{base}/token")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(response.text().await.unwrap(), FAILURE_PAGE);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        assert_eq!(paths.stored_token().unwrap().as_deref(), Some("previous"));

        let response = reqwest::get(format!("{base}/token?token=fresh"))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), SUCCESS_PAGE);
        let phase = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(phase, Phase::Terminated);
        assert_eq!(paths.stored_token().unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_other_paths_do_not_stop_listener() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let (base, handle) = start(&paths).await;

        let response = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn test_callback_port_joins_existing_query() {
        assert_eq!(
            callback_url("https://proxy.example.com/authorize", 8123)
                .unwrap()
                .as_str(),
            "https://proxy.example.com/authorize?port=8123"
        );
        assert_eq!(
            callback_url("https://proxy.example.com/authorize?client=cli", 8123)
                .unwrap()
                .as_str(),
            "https://proxy.example.com/authorize?client=cli&port=8123"
        );
        assert!(callback_url("not a url", 8123).is_err());
    }

    #[tokio::test]
    async fn test_existing_credential_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        paths.save_token("kept").unwrap();

        let outcome = authorize(paths.clone(), "http://127.0.0.1:1/authorize", 0, false)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadyAuthorized);
        assert_eq!(paths.stored_token().unwrap().as_deref(), Some("kept"));
    }
}
