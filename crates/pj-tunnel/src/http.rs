//! Localhost endpoint for the git credential helper
//!
//! The configured helper shells out from git, POSTs the credential request
//! here, and this endpoint answers it over the tunnel. Bound to loopback
//! only; credentials never touch the pod network.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use pj_core::git::GitCredentials;

use crate::client::TunnelHandle;
use crate::error::TunnelError;
use crate::logger::JumpLogger;

/// Default port of the credentials endpoint inside the container
pub const DEFAULT_CREDENTIALS_PORT: u16 = 12049;

#[derive(Clone)]
struct AppState {
    handle: TunnelHandle,
    logger: Arc<dyn JumpLogger>,
}

/// Whether `port` can currently be bound on loopback
pub async fn port_available(port: u16) -> bool {
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .is_ok()
}

fn router(handle: TunnelHandle, logger: Arc<dyn JumpLogger>) -> Router {
    Router::new()
        .route("/git-credentials", post(fill_credentials))
        .with_state(AppState { handle, logger })
}

async fn fill_credentials(
    State(state): State<AppState>,
    Json(request): Json<GitCredentials>,
) -> Response {
    match state.handle.git_credentials(&request).await {
        Ok(filled) => Json(filled).into_response(),
        Err(err) => {
            state
                .logger
                .error(&format!("credential fill failed: {err}"));
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Serve the credentials endpoint on loopback until `cancel` fires
pub async fn run_credentials_server(
    cancel: CancellationToken,
    port: u16,
    handle: TunnelHandle,
    logger: Arc<dyn JumpLogger>,
) -> Result<(), TunnelError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::debug!(port, "credentials endpoint listening");
    axum::serve(listener, router(handle, logger))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pj_core::pipes::virtual_pipe_pair;
    use pj_protocol::LogLevel;

    use crate::client::connect;
    use crate::server::{CredentialsOverride, ServiceOptions, TunnelService};

    struct QuietLogger;

    impl JumpLogger for QuietLogger {
        fn filter(&self) -> LogLevel {
            LogLevel::Error
        }

        fn log(&self, _level: LogLevel, _message: &str) {}
    }

    #[tokio::test]
    async fn endpoint_fills_credentials_over_the_tunnel() {
        let (local, remote) = virtual_pipe_pair();
        let service = TunnelService::new(
            Arc::new(QuietLogger),
            ServiceOptions {
                credentials_override: Some(CredentialsOverride {
                    username: "robot".to_string(),
                    token: "t0k3n".to_string(),
                }),
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let server = tokio::spawn({
            let cancel = cancel.clone();
            async move { service.serve(&cancel, local).await }
        });
        let (handle, _pump) = connect(remote);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(handle, Arc::new(QuietLogger)))
                .await
                .unwrap();
        });

        let request = GitCredentials {
            protocol: "https".to_string(),
            host: "github.com".to_string(),
            ..Default::default()
        };
        let filled: GitCredentials = reqwest::Client::new()
            .post(format!("http://{addr}/git-credentials"))
            .json(&request)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(filled.username, "robot");
        assert_eq!(filled.password, "t0k3n");
        assert_eq!(filled.host, "github.com");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn port_availability_check() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_available(port).await);
        drop(listener);
        assert!(port_available(port).await);
    }
}
