use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use lib_trackd::auth::{ReplyCode, TrackQuery};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;

use crate::trackd_logic::state::{unix_now, AppState};

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = "Tulipa 1.0";

/// Builds the router: `/_status` reports, `/_ison` answers liveness probes,
/// and every other path takes beacons.
pub fn router(state: AppState, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(track))
        .route("/_status", get(status))
        .route("/_ison", get(ison))
        .fallback(track)
        .layer(middleware::from_fn_with_state(state.clone(), count_request))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONNECTION,
            HeaderValue::from_static("close"),
        ))
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

async fn count_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.counters.record();
    next.run(request).await
}

async fn track(State(state): State<AppState>, Query(pairs): Query<Vec<(String, String)>>) -> String {
    let query = TrackQuery::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let reply = match state.authenticator.authenticate(&query, unix_now()) {
        Ok(event) => {
            state.dispatcher.route(event).await;
            ReplyCode::Ok
        }
        Err(code) => {
            tracing::debug!("rejected track request: {}", code);
            code
        }
    };
    reply.to_string()
}

async fn status(State(state): State<AppState>) -> String {
    state.status().to_string()
}

async fn ison() -> &'static str {
    "1"
}

/// Serves HTTP until `shutdown` fires.
pub async fn run(
    listener: TcpListener,
    state: AppState,
    timeout: Duration,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("HTTP listener on {}", addr);
    }
    axum::serve(listener, router(state, timeout))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("HTTP listener stopped");
    Ok(())
}
