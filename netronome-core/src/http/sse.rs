//! Serializes [`Bus`] updates as `data: <json>\n\n` for the live-update
//! route. Grounded on the
//! `flagfile-cli` SSE handler's "subscribe, stream until cancelled" shape,
//! adapted to this crate's [`crate::bus::Subscription`] rather than a raw
//! `broadcast::Receiver`.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;

use crate::bus::Bus;

/// Subscribes to `bus` and returns an SSE stream that ends (with no partial
/// event) once the subscriber cancels or falls more than the backlog bound
/// behind.
pub fn live_updates(bus: &Bus) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, _cancel) = bus.subscribe();

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let update = subscription.next().await?;
        let payload = serde_json::to_string(&update).ok()?;
        Some((Ok(Event::default().data(payload)), subscription))
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
