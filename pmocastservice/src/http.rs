//! HTTP surface of the casting service.
//!
//! Three endpoints on the configured port:
//!
//! - `GET /file` — streams the currently configured local file to the
//!   renderer.
//! - `POST /live` — ingest endpoint for the screen-capture encoder; the
//!   body is a raw FLV stream.
//! - `GET /live` — egress endpoint pulled by the renderer; chunked
//!   `video/x-flv` with no Content-Length.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use pmocastrelay::{RelayError, RelaySession, egress, run_ingest};

#[derive(Clone)]
pub struct HttpState {
    pub relay: Arc<RelaySession>,
    pub file_path: Arc<Mutex<Option<PathBuf>>>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/file", get(serve_file))
        .route("/live", get(live_egress).post(live_ingest))
        .with_state(state)
}

/// `GET /file` — direct send of the configured file.
async fn serve_file(State(state): State<HttpState>) -> Response {
    let path = state.file_path.lock().unwrap().clone();
    let Some(path) = path else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            debug!("Serving {} to renderer", path.display());
            Body::from_stream(ReaderStream::new(file)).into_response()
        }
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// `POST /live` — encoder ingest.
async fn live_ingest(State(state): State<HttpState>, body: Body) -> Response {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(stream);

    match run_ingest(&state.relay, reader).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(RelayError::IngestBusy) => StatusCode::CONFLICT.into_response(),
        // Protocol errors terminated only this stream; already logged
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// `GET /live` — renderer egress.
async fn live_egress(State(state): State<HttpState>) -> Response {
    // Claim the consumer slot before committing to a streaming response so
    // a rejected consumer gets a real status code.
    match egress::try_attach(&state.relay) {
        Ok(()) => {}
        Err(RelayError::NoIngest) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(_) => return StatusCode::CONFLICT.into_response(),
    }

    // Single-chunk slack: transmission is per-tag, and a stalled renderer
    // propagates back to the handoff slot (and from there to the encoder).
    let (sink, chunks) = mpsc::channel::<Bytes>(1);
    let relay = state.relay.clone();
    tokio::spawn(async move {
        if let Err(e) = egress::run_attached(&relay, sink).await {
            warn!("Egress session ended with error: {}", e);
        }
    });

    let stream = ReceiverStream::new(chunks).map(Ok::<Bytes, std::convert::Infallible>);
    (
        [(header::CONTENT_TYPE, "video/x-flv")],
        Body::from_stream(stream),
    )
        .into_response()
}
