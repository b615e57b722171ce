//! Push transport: broker subscriptions turned into frame streams.
//!
//! Every stream yields a `connected` frame first. Broker callbacks forward
//! events into an unbounded channel, so a slow connection never blocks the
//! publisher. Dropping the stream drops its subscriptions.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use reviewq_core::{
    event_types, new_v7, BrokerEvent, Error, EventBroker, EventCallback, PushFrame,
    SubscriptionId,
};

/// Unsubscribes everything it holds when dropped.
struct SubscriptionGuard {
    broker: Arc<dyn EventBroker>,
    ids: Vec<SubscriptionId>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.broker.unsubscribe(id);
        }
        tracing::debug!(subsystem = "api", component = "push", "Push connection closed");
    }
}

fn forwarder(tx: UnboundedSender<PushFrame>) -> EventCallback {
    Arc::new(move |event: &BrokerEvent| {
        tx.send(PushFrame::Event(event.clone()))
            .map_err(|_| Error::Internal("push connection closed".into()))
    })
}

fn into_stream(
    rx: UnboundedReceiver<PushFrame>,
    guard: SubscriptionGuard,
) -> impl Stream<Item = PushFrame> + Send + 'static {
    let connected = PushFrame::Connected {
        connection_id: new_v7(),
    };
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|frame| (frame, (rx, guard)))
    });
    stream::once(async move { connected }).chain(events)
}

/// Frames for every user-addressed event type of `user_id`.
pub fn user_stream(
    broker: Arc<dyn EventBroker>,
    user_id: &str,
) -> impl Stream<Item = PushFrame> + Send + 'static {
    let (tx, rx) = unbounded_channel();
    let ids = event_types::USER_STREAM
        .iter()
        .map(|event_type| broker.subscribe(user_id, event_type, forwarder(tx.clone())))
        .collect();
    tracing::debug!(subsystem = "api", component = "push", user_id, "User push connection opened");
    into_stream(rx, SubscriptionGuard { broker, ids })
}

/// Frames for every event broadcast on `channel`.
pub fn channel_stream(
    broker: Arc<dyn EventBroker>,
    channel: &str,
) -> impl Stream<Item = PushFrame> + Send + 'static {
    let (tx, rx) = unbounded_channel();
    let ids = vec![broker.subscribe_channel(channel, forwarder(tx))];
    tracing::debug!(subsystem = "api", component = "push", channel, "Channel push connection opened");
    into_stream(rx, SubscriptionGuard { broker, ids })
}
