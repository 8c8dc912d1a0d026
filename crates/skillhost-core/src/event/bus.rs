//! Per-run event bus with single-consumer queues.
//!
//! Each run that somebody is watching gets its own unbounded `mpsc` queue.
//! Publishing never blocks and never fails: events for runs without a
//! subscriber are dropped. A terminal event (`complete` or `error`) is the
//! last one a queue ever carries; the queue is removed as it is delivered, so
//! anything published for that run afterwards is dropped too.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::Stream;
use skillhost_types::event::RunEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Registry of live run event queues, keyed by run id.
///
/// Cloning the bus shares the registry.
#[derive(Clone, Default)]
pub struct RunEventBus {
    queues: Arc<DashMap<Uuid, mpsc::UnboundedSender<RunEvent>>>,
}

/// Receiving half of one run's queue.
#[derive(Debug)]
pub struct RunSubscription {
    run_id: Uuid,
    receiver: mpsc::UnboundedReceiver<RunEvent>,
}

impl RunSubscription {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the next event. `None` once the queue has been closed and drained.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.receiver.try_recv().ok()
    }
}

impl RunEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for `run_id`.
    ///
    /// A run has at most one queue. Subscribing again replaces the previous
    /// queue; its receiver sees the channel close once buffered events drain.
    pub fn subscribe(&self, run_id: Uuid) -> RunSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.queues.insert(run_id, tx).is_some() {
            debug!(%run_id, "replaced existing run event subscription");
        } else {
            debug!(%run_id, "subscribed to run events");
        }
        RunSubscription {
            run_id,
            receiver: rx,
        }
    }

    /// Drop the queue for `run_id`. Returns `true` if one existed.
    pub fn unsubscribe(&self, run_id: &Uuid) -> bool {
        let removed = self.queues.remove(run_id).is_some();
        if removed {
            debug!(%run_id, "unsubscribed from run events");
        }
        removed
    }

    pub fn is_subscribed(&self, run_id: &Uuid) -> bool {
        self.queues.contains_key(run_id)
    }

    /// Number of runs with an open queue.
    pub fn subscriber_count(&self) -> usize {
        self.queues.len()
    }

    /// Deliver `event` to the run's queue, if one exists.
    pub fn publish(&self, run_id: Uuid, event: RunEvent) {
        if event.is_terminal() {
            match self.queues.remove(&run_id) {
                // Dropping the sender closes the channel after this event.
                Some((_, tx)) => {
                    let _ = tx.send(event);
                }
                None => trace!(%run_id, event = event.name(), "no subscriber; event dropped"),
            }
            return;
        }

        let receiver_gone = match self.queues.get(&run_id) {
            Some(tx) => tx.send(event).is_err(),
            None => {
                trace!(%run_id, event = event.name(), "no subscriber; event dropped");
                false
            }
        };
        if receiver_gone {
            self.queues.remove_if(&run_id, |_, tx| tx.is_closed());
        }
    }

    /// Subscribe to `run_id` and return its events as a stream.
    ///
    /// See [`RunEventBus::stream_subscription`].
    pub fn stream(
        &self,
        run_id: Uuid,
        idle_timeout: Duration,
    ) -> impl Stream<Item = RunEvent> + Send + 'static {
        let subscription = self.subscribe(run_id);
        self.stream_subscription(subscription, idle_timeout)
    }

    /// Turn an existing subscription into a stream.
    ///
    /// Yields [`RunEvent::Keepalive`] whenever `idle_timeout` passes without
    /// an event. Ends right after the first terminal event, or when the queue
    /// closes. The queue is unsubscribed when the stream finishes or is
    /// dropped early, unless a newer subscription has replaced it.
    pub fn stream_subscription(
        &self,
        subscription: RunSubscription,
        idle_timeout: Duration,
    ) -> impl Stream<Item = RunEvent> + Send + 'static {
        let mut guard = SubscriptionGuard {
            queues: Arc::clone(&self.queues),
            subscription,
        };

        async_stream::stream! {
            loop {
                match tokio::time::timeout(idle_timeout, guard.subscription.recv()).await {
                    Ok(Some(event)) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => yield RunEvent::Keepalive,
                }
            }
        }
    }
}

impl std::fmt::Debug for RunEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEventBus")
            .field("subscriber_count", &self.queues.len())
            .finish()
    }
}

/// Owns a stream's subscription and removes its queue when dropped.
struct SubscriptionGuard {
    queues: Arc<DashMap<Uuid, mpsc::UnboundedSender<RunEvent>>>,
    subscription: RunSubscription,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let run_id = self.subscription.run_id;
        self.subscription.receiver.close();
        // An open sender under this id belongs to a newer subscription.
        if self
            .queues
            .remove_if(&run_id, |_, tx| tx.is_closed())
            .is_some()
        {
            debug!(%run_id, "event stream ended; unsubscribed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::Map;
    use skillhost_types::event::LogStream;
    use skillhost_types::run::RunStatus;

    fn status(status: RunStatus) -> RunEvent {
        RunEvent::Status { status }
    }

    fn log(line: &str) -> RunEvent {
        RunEvent::Log {
            stream: LogStream::Stdout,
            line: line.to_string(),
        }
    }

    fn complete() -> RunEvent {
        RunEvent::Complete {
            status: RunStatus::Success,
            outputs: Map::new(),
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let mut sub = bus.subscribe(run_id);

        bus.publish(run_id, status(RunStatus::Running));
        bus.publish(run_id, log("hello"));
        bus.publish(run_id, complete());

        assert_eq!(sub.recv().await, Some(status(RunStatus::Running)));
        assert_eq!(sub.recv().await, Some(log("hello")));
        assert_eq!(sub.recv().await, Some(complete()));
        // Terminal event closes the queue.
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn publish_without_subscriber_is_noop() {
        let bus = RunEventBus::new();
        bus.publish(Uuid::now_v7(), log("nobody listening"));
        bus.publish(Uuid::now_v7(), complete());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn events_after_terminal_are_dropped() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let mut sub = bus.subscribe(run_id);

        bus.publish(
            run_id,
            RunEvent::Error {
                error: "boom".into(),
                traceback: None,
            },
        );
        bus.publish(run_id, complete());
        bus.publish(run_id, log("late"));

        assert!(matches!(sub.recv().await, Some(RunEvent::Error { .. })));
        assert_eq!(sub.recv().await, None);
        assert!(!bus.is_subscribed(&run_id));
    }

    #[tokio::test]
    async fn runs_are_isolated() {
        let bus = RunEventBus::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let mut sub_a = bus.subscribe(a);
        let mut sub_b = bus.subscribe(b);

        bus.publish(a, log("for a"));
        bus.publish(b, log("for b"));

        assert_eq!(sub_a.try_recv(), Some(log("for a")));
        assert_eq!(sub_a.try_recv(), None);
        assert_eq!(sub_b.try_recv(), Some(log("for b")));
    }

    #[tokio::test]
    async fn resubscribe_replaces_queue() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let mut first = bus.subscribe(run_id);
        let mut second = bus.subscribe(run_id);

        bus.publish(run_id, log("to second"));

        assert_eq!(first.recv().await, None);
        assert_eq!(second.try_recv(), Some(log("to second")));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_queue() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let _sub = bus.subscribe(run_id);
        assert!(bus.is_subscribed(&run_id));
        assert!(bus.unsubscribe(&run_id));
        assert!(!bus.unsubscribe(&run_id));
    }

    #[test]
    fn dropped_receiver_is_cleaned_up_on_publish() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        drop(bus.subscribe(run_id));
        bus.publish(run_id, log("orphan"));
        assert!(!bus.is_subscribed(&run_id));
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_event() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let stream = bus.stream(run_id, Duration::from_secs(5));

        bus.publish(run_id, status(RunStatus::Running));
        bus.publish(run_id, complete());

        let events: Vec<RunEvent> = stream.collect().await;
        assert_eq!(events, vec![status(RunStatus::Running), complete()]);
        assert!(!bus.is_subscribed(&run_id));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_keepalive_when_idle() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let mut stream = Box::pin(bus.stream(run_id, Duration::from_millis(100)));

        assert_eq!(stream.next().await, Some(RunEvent::Keepalive));

        bus.publish(run_id, complete());
        assert_eq!(stream.next().await, Some(complete()));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let mut stream = Box::pin(bus.stream(run_id, Duration::from_secs(5)));

        bus.publish(run_id, log("one"));
        assert_eq!(stream.next().await, Some(log("one")));
        assert!(bus.is_subscribed(&run_id));

        drop(stream);
        assert!(!bus.is_subscribed(&run_id));
    }

    #[test]
    fn dropping_unpolled_stream_unsubscribes() {
        let bus = RunEventBus::new();
        let run_id = Uuid::now_v7();
        let stream = bus.stream(run_id, Duration::from_secs(5));
        assert!(bus.is_subscribed(&run_id));
        drop(stream);
        assert!(!bus.is_subscribed(&run_id));
    }
}
