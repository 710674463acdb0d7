//! NDJSON response body for a running turn

use crate::runtime::TurnEvent;
use axum::body::Body;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Stream turn events as one JSON object per line.
///
/// The body owns a drop guard on `cancel`: when the client goes away and the
/// body is dropped, the turn is cancelled.
pub fn ndjson_body(rx: mpsc::Receiver<TurnEvent>, cancel: CancellationToken) -> Body {
    let guard = cancel.drop_guard();
    let stream = futures::stream::unfold(
        (rx, guard),
        |(mut rx, guard): (mpsc::Receiver<TurnEvent>, DropGuard)| async move {
            let event = rx.recv().await?;
            let line = event.to_ndjson();
            if let Err(e) = &line {
                tracing::error!(error = %e, "Failed to serialize turn event");
            }
            Some((line, (rx, guard)))
        },
    );
    Body::from_stream(stream)
}
