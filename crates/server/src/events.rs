//! Server-sent events stream for one workspace's bus channel.
//!
//! Every bus event becomes one SSE frame whose event name is the dotted
//! kind (`run.updated`, `approval.created`, ...) and whose data is the
//! serialized event. Lagged subscribers skip ahead rather than
//! disconnect; delivery was never guaranteed in the first place.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use conductor_core::errors::ApplicationError;

use crate::api::{claims_from_headers, ApiError, AppState};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "workspaceId")]
    pub workspace_id: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let workspace_id = query.workspace_id.unwrap_or_else(|| claims.workspace_id.0.clone());
    if claims.workspace_id.0 != workspace_id {
        return Err(ApplicationError::BoundaryDenied(format!(
            "caller workspace does not match event stream `{workspace_id}`"
        ))
        .into());
    }

    let receiver = state.bus.subscribe(&claims.workspace_id);
    tracing::debug!(
        event_name = "events.subscribed",
        workspace_id = %workspace_id,
        "event stream subscriber attached"
    );

    let stream = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else { continue };
                    let frame = Event::default().event(event.kind.as_str()).data(payload);
                    return Some((Ok::<_, Infallible>(frame), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        event_name = "events.lagged",
                        skipped,
                        "subscriber fell behind, skipping ahead"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")))
}
