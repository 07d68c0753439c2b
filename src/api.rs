use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::ToSocketAddrs;

use crate::service::{Health, LOAD_FAILED_MESSAGE, ReconciliationService, UNAVAILABLE_MESSAGE};
use crate::tunnel::TunnelDiscovery;

pub const LOADING_MESSAGE: &str = "Container state is still loading.";

#[derive(Debug, serde::Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { message })).into_response()
}

async fn list_containers<D>(State(service): State<ReconciliationService<D>>) -> Response
where
    D: TunnelDiscovery + Send + Sync + 'static,
{
    let snapshot = service.snapshot();
    match snapshot.health {
        Health::Healthy => (StatusCode::OK, Json(snapshot.containers)).into_response(),
        Health::Uninitialized => error_response(StatusCode::SERVICE_UNAVAILABLE, LOADING_MESSAGE),
        Health::Degraded(message) if message == UNAVAILABLE_MESSAGE => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &message)
        }
        Health::Degraded(message) => {
            log::debug!("answering container listing with error: {message}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, LOAD_FAILED_MESSAGE)
        }
    }
}

/// Read-only HTTP view over a running [`ReconciliationService`].
pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new<D>(service: ReconciliationService<D>) -> Self
    where
        D: TunnelDiscovery + Send + Sync + 'static,
    {
        let router = axum::Router::new()
            .route("/containers", get(list_containers::<D>))
            .with_state(service);
        Self { router }
    }

    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Serves the routes until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn listen(
        self,
        addr: impl ToSocketAddrs,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::debug!("API listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
