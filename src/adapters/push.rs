use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::debug;

use crate::dispatcher::{Dispatcher, Routed};
use crate::error::RelayError;
use crate::models::decode_event;

/// Webhook entry point: one decoded update per inbound call.
pub struct PushAdapter {
    dispatcher: Dispatcher,
}

impl PushAdapter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Decode and route a payload. Only a malformed payload is an error;
    /// the caller is never held up by downstream processing.
    pub fn accept(&self, payload: &[u8]) -> Result<Routed, RelayError> {
        let event = decode_event(payload)?;
        Ok(self.dispatcher.dispatch(event))
    }
}

/// HTTP surface: `/health` always, plus the webhook route when given one.
pub fn router(webhook: Option<(&str, Arc<PushAdapter>)>) -> Router {
    let mut router = Router::new().route("/health", get(health));
    if let Some((path, adapter)) = webhook {
        router = router.merge(
            Router::new()
                .route(path, post(receive_update))
                .with_state(adapter),
        );
    }
    router
}

async fn health() -> &'static str {
    "OK"
}

async fn receive_update(State(adapter): State<Arc<PushAdapter>>, body: Bytes) -> StatusCode {
    match adapter.accept(&body) {
        Ok(routed) => {
            debug!("Webhook update {:?}", routed);
            StatusCode::OK
        }
        Err(e) => {
            debug!("Rejected webhook payload: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}
