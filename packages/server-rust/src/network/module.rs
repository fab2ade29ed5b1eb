//! Health endpoint server.
//!
//! `new()` builds the router state, `start()` binds the listener (so the
//! bound port is known before anything else starts), and the supervisor
//! drives `run()` until shutdown.

use std::time::Instant;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::shutdown_signalled;
use crate::config::HealthConfig;
use crate::supervisor::Supervised;

pub struct HealthServer {
    config: HealthConfig,
    state: AppState,
    listener: Option<TcpListener>,
}

impl HealthServer {
    #[must_use]
    pub fn new(config: HealthConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            listener: None,
        }
    }

    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness check
    /// - `GET /health/ready` -- readiness check
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(AppState {
                start_time: Instant::now(),
                ..self.state.clone()
            })
    }

    /// Binds the listener and returns the bound port, which differs from
    /// the configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "health endpoint bound");
        self.listener = Some(listener);
        Ok(port)
    }
}

#[async_trait]
impl Supervised for HealthServer {
    fn name(&self) -> String {
        "health".to_string()
    }

    async fn run(mut self: Box<Self>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if self.listener.is_none() {
            self.start().await?;
        }
        let router = self.build_router();
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("health listener is not bound");
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_signalled(&mut shutdown).await })
            .await?;
        info!("health endpoint stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::network::ShutdownController;

    async fn get(port: u16, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_health_until_shutdown() {
        let controller = Arc::new(ShutdownController::new());
        let state = AppState {
            shutdown: Arc::clone(&controller),
            uow: None,
            instance_id: 1,
            start_time: Instant::now(),
        };
        let mut server = HealthServer::new(
            HealthConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            state,
        );
        let port = server.start().await.unwrap();
        let handle = tokio::spawn(Box::new(server).run(controller.shutdown_receiver()));

        assert!(get(port, "/health/ready").await.starts_with("HTTP/1.1 503"));
        controller.set_ready();
        assert!(get(port, "/health/ready").await.starts_with("HTTP/1.1 200"));
        assert!(get(port, "/health/live").await.starts_with("HTTP/1.1 200"));
        assert!(get(port, "/health").await.contains("\"state\":\"ready\""));

        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
