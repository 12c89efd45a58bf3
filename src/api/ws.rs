//! WebSocket delivery of location state.
//!
//! ```text
//! Client                      Handler                         Hub
//!   ├─ Connect ──────────────>│                               │
//!   ├─ {"topic": ...} ───────>├─ subscribe(selector) ────────>│
//!   │                         ├─ seed current states          │
//!   │                         │<── wakeup ────────────────────┤ publish
//!   │                         ├─ sleep(flush interval)        │
//!   │<─ one frame/location ───┤<── drain ─────────────────────┤
//! ```
//!
//! A client that does not send its subscribe message within the handshake
//! timeout is disconnected. A failed send or a client close removes only that
//! connection's subscription.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastHub, SubscribeRequest, Subscriber, TopicSelector};
use crate::error::CoreError;
use crate::AppState;

/// Close code for a malformed or missing subscribe message
const CLOSE_POLICY: u16 = 1008;

pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, peer: String) {
    let (mut sender, mut receiver) = socket.split();

    let handshake = state.config.broadcast.handshake_timeout();
    let selector = match tokio::time::timeout(handshake, read_subscription(&mut receiver)).await {
        Ok(Ok(selector)) => selector,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "Rejected WebSocket subscription");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "WebSocket handshake timed out");
            let _ = sender.close().await;
            return;
        }
    };

    let subscriber = state.hub.subscribe(peer, selector);
    match state.ledger.current_states(subscriber.selector()) {
        Ok(states) => {
            // Anything published since the read is newer and wins
            for location in states {
                subscriber.offer(location);
            }
        }
        Err(e) => warn!(peer = %subscriber.peer(), error = %e, "Failed to seed subscriber"),
    }
    info!(
        subscriber_id = subscriber.id(),
        peer = %subscriber.peer(),
        "WebSocket subscribed"
    );

    let hub = Arc::clone(&state.hub);
    let flush = state.config.broadcast.flush_interval();
    let mut send_task = tokio::spawn(pump(hub, Arc::clone(&subscriber), flush, sender));

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.hub.unsubscribe(&subscriber);
    info!(
        subscriber_id = subscriber.id(),
        peer = %subscriber.peer(),
        "WebSocket closed"
    );
}

/// Wait for the client's subscribe message, skipping control frames
async fn read_subscription<R>(receiver: &mut R) -> Result<TopicSelector, CoreError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let request: SubscribeRequest = serde_json::from_str(&text)
                    .map_err(|e| CoreError::Invalid(format!("bad subscribe message: {e}")))?;
                return TopicSelector::try_from(request);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Err(CoreError::Invalid(
        "connection closed before subscribing".to_string(),
    ))
}

/// Run a subscriber's delivery loop until its sink fails, then unsubscribe it.
async fn pump<S>(hub: Arc<BroadcastHub>, subscriber: Arc<Subscriber>, flush: Duration, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    if deliver(&hub, &subscriber, flush, &mut sink).await.is_err() {
        debug!(
            subscriber_id = subscriber.id(),
            peer = %subscriber.peer(),
            "WebSocket send failed"
        );
    }
    hub.unsubscribe(&subscriber);
}

/// Wait for a wakeup, let further updates coalesce for `flush`, then send one
/// text frame per buffered location.
async fn deliver<S>(
    hub: &BroadcastHub,
    subscriber: &Subscriber,
    flush: Duration,
    sink: &mut S,
) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    loop {
        subscriber.changed().await;
        tokio::time::sleep(flush).await;

        let mut states: Vec<_> = hub.drain(subscriber).into_values().collect();
        states.sort_by(|a, b| a.normalized_name.cmp(&b.normalized_name));

        for location in states {
            match serde_json::to_string(&location) {
                Ok(text) => sink.send(Message::Text(text)).await?,
                Err(e) => warn!(error = %e, "Failed to encode location state"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LocationState;
    use futures_util::stream;
    use tokio::sync::mpsc;

    fn state(name: &str, available: u32, version: u64) -> LocationState {
        LocationState {
            available,
            available_yesterday: 0,
            capacity: 10,
            capacity_yesterday: 0,
            location_id: format!("id-{name}"),
            normalized_name: name.to_string(),
            version,
            yesterday_full_at: None,
        }
    }

    /// A sink forwarding text frames into a channel
    fn channel_sink(
        tx: mpsc::UnboundedSender<String>,
    ) -> impl Sink<Message, Error = ()> + Unpin {
        Box::pin(futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            if let Message::Text(text) = msg {
                tx.send(text).map_err(|_| ())?;
            }
            Ok::<_, ()>(tx)
        }))
    }

    fn failing_sink() -> impl Sink<Message, Error = ()> + Unpin {
        Box::pin(futures_util::sink::unfold((), |_, _msg: Message| async move {
            Err::<(), ()>(())
        }))
    }

    #[tokio::test]
    async fn test_read_subscription_skips_control_frames() {
        let mut frames = stream::iter(vec![
            Ok::<_, axum::Error>(Message::Ping(vec![1])),
            Ok(Message::Text(
                r#"{"topic":"single-location","normalizedName":"zoo"}"#.to_string(),
            )),
        ]);
        assert_eq!(
            read_subscription(&mut frames).await.unwrap(),
            TopicSelector::SingleLocation("zoo".to_string())
        );
    }

    #[tokio::test]
    async fn test_read_subscription_rejects_garbage_and_close() {
        let mut garbage = stream::iter(vec![Ok::<_, axum::Error>(Message::Text("hello".to_string()))]);
        assert!(matches!(
            read_subscription(&mut garbage).await,
            Err(CoreError::Invalid(_))
        ));

        let mut closed = stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);
        assert!(read_subscription(&mut closed).await.is_err());
    }

    #[tokio::test]
    async fn test_pump_sends_coalesced_frames() {
        let hub = Arc::new(BroadcastHub::new());
        let subscriber = hub.subscribe("dash", TopicSelector::AllLocations);
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.publish(&state("zoo", 9, 1));
        hub.publish(&state("zoo", 8, 2));
        hub.publish(&state("museum", 3, 1));

        let task = tokio::spawn(pump(
            Arc::clone(&hub),
            Arc::clone(&subscriber),
            Duration::from_millis(20),
            channel_sink(tx),
        ));

        let first: LocationState = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: LocationState = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!((first.normalized_name.as_str(), first.available), ("museum", 3));
        assert_eq!((second.normalized_name.as_str(), second.available), ("zoo", 8));

        // Later updates arrive on the next wakeup
        hub.publish(&state("zoo", 7, 3));
        let third: LocationState = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(third.available, 7);

        task.abort();
    }

    #[tokio::test]
    async fn test_send_failure_unsubscribes_only_that_subscriber() {
        let hub = Arc::new(BroadcastHub::new());
        let broken = hub.subscribe("broken", TopicSelector::AllLocations);
        let healthy = hub.subscribe("healthy", TopicSelector::AllLocations);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let flush = Duration::from_millis(5);
        let broken_task = tokio::spawn(pump(Arc::clone(&hub), broken, flush, failing_sink()));
        let healthy_task = tokio::spawn(pump(Arc::clone(&hub), healthy, flush, channel_sink(tx)));

        hub.publish(&state("zoo", 1, 1));

        tokio::time::timeout(Duration::from_secs(1), broken_task)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&state("zoo", 0, 2));
        let next: LocationState = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(next.available, 0);

        healthy_task.abort();
    }
}
