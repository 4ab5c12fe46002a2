//! Glue between the synchronous [`RoomBroker`] and live connections.
//!
//! The broker and every connection's outbound queue sit behind one mutex, so an event's
//! state change and its fan-out land together, before anything else touches the broker.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    ConnectionId, Millis,
    broker::{Delivery, RoomBroker},
    error::BrokerError,
    now_millis,
    protocol::{ClientEvent, HealthReport, RoomStats, ServerEvent},
};

/// Longest the scheduler sleeps when nothing is queued.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Event(ServerEvent),
    Close,
}

struct HubInner {
    broker: RoomBroker,
    outlets: HashMap<ConnectionId, mpsc::UnboundedSender<Outgoing>>,
}

impl HubInner {
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Event { to, event } => {
                    // unknown or already-gone connections are skipped
                    if let Some(outlet) = self.outlets.get(&to) {
                        let _ = outlet.send(Outgoing::Event(event));
                    }
                }
                Delivery::Close(to) => {
                    if let Some(outlet) = self.outlets.remove(&to) {
                        let _ = outlet.send(Outgoing::Close);
                    }
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
    wake: Arc<Notify>,
}

impl Hub {
    pub fn new(broker: RoomBroker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                broker,
                outlets: HashMap::new(),
            })),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Registers a fresh connection and returns the queue its writer should drain.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Outgoing>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.outlets.insert(conn, tx);
        debug!(%conn, "connection opened");
        (conn, rx)
    }

    pub async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) {
        self.dispatch_at(conn, event, now_millis()).await
    }

    pub async fn dispatch_at(&self, conn: ConnectionId, event: ClientEvent, now: Millis) {
        let mut inner = self.inner.lock().await;
        let due_before = inner.broker.next_due();
        let deliveries = inner.broker.handle(conn, event, now);
        let due_after = inner.broker.next_due();
        inner.deliver(deliveries);
        drop(inner);

        if due_after != due_before {
            self.wake.notify_one();
        }
    }

    /// Tells a connection its frame could not be understood.
    pub async fn reject(&self, conn: ConnectionId, err: &BrokerError) {
        let mut inner = self.inner.lock().await;
        inner.deliver(vec![Delivery::event(conn, ServerEvent::error(err))]);
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        self.disconnect_at(conn, now_millis()).await
    }

    pub async fn disconnect_at(&self, conn: ConnectionId, now: Millis) {
        let mut inner = self.inner.lock().await;
        let deliveries = inner.broker.disconnect(conn, now);
        inner.outlets.remove(&conn);
        inner.deliver(deliveries);
        debug!(%conn, "connection closed");
    }

    pub async fn room_stats(&self, room_id: &str) -> Result<RoomStats, BrokerError> {
        self.inner.lock().await.broker.room_stats(room_id)
    }

    pub async fn health(&self) -> HealthReport {
        self.inner.lock().await.broker.health(now_millis())
    }

    pub async fn sweep(&self, now: Millis) -> usize {
        self.inner.lock().await.broker.sweep_expired(now)
    }

    pub async fn run_due(&self, now: Millis) {
        let mut inner = self.inner.lock().await;
        let deliveries = inner.broker.run_due(now);
        inner.deliver(deliveries);
    }

    /// Spawns the message TTL sweeper and the scheduled-task runner.
    pub fn spawn_maintenance(&self, sweep_interval: Duration) -> (JoinHandle<()>, JoinHandle<()>) {
        let sweeper = {
            let hub = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                // the first tick fires immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    hub.sweep(now_millis()).await;
                }
            })
        };

        let scheduler = {
            let hub = self.clone();
            tokio::spawn(async move { hub.run_scheduler().await })
        };

        info!(sweep_interval_secs = sweep_interval.as_secs(), "maintenance tasks started");
        (sweeper, scheduler)
    }

    async fn run_scheduler(&self) {
        loop {
            let next_due = self.inner.lock().await.broker.next_due();
            let wait = match next_due {
                Some(due) => Duration::from_millis(u64::try_from(due - now_millis()).unwrap_or(0)),
                None => IDLE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => self.run_due(now_millis()).await,
                // something earlier may have been queued; recompute the wait
                _ = self.wake.notified() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BrokerSettings,
        geo::Coordinates,
        protocol::{LocationPayload, NotificationKind, UserSnapshot},
    };

    const T0: Millis = 1_700_000_000_000;

    fn hub(settings: BrokerSettings) -> Hub {
        Hub::new(RoomBroker::new(settings).unwrap())
    }

    fn join(room_id: &str, user_id: &str) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: room_id.into(),
            location: Some(LocationPayload::from(Coordinates::new(37.5, 127.0))),
            user: UserSnapshot {
                id: user_id.into(),
                nickname: format!("nick-{user_id}"),
                is_blue_verified: false,
                like_count: 0,
            },
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn reject_goes_only_to_the_sender() {
        let hub = hub(BrokerSettings::default());
        let (a, mut rx_a) = hub.connect().await;
        let (_b, mut rx_b) = hub.connect().await;

        hub.reject(a, &BrokerError::Malformed("expected value".into())).await;

        let got = drain(&mut rx_a);
        assert_eq!(got.len(), 1);
        let Outgoing::Event(ServerEvent::Error { error, .. }) = &got[0] else {
            panic!("expected error, got {got:?}");
        };
        assert_eq!(error, "MALFORMED_EVENT");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn ban_closes_the_connection_after_the_grace_period() {
        let hub = hub(BrokerSettings {
            report_threshold: 1,
            location_jitter_meters: 0.0,
            ..BrokerSettings::default()
        });
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.dispatch_at(a, join("room_1_1", "alice"), T0).await;
        hub.dispatch_at(b, join("room_1_1", "bob"), T0).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let report = ClientEvent::ReportUser {
            target_user_id: "bob".into(),
            from_user_id: "alice".into(),
            reason: "spam".into(),
        };
        hub.dispatch_at(a, report, T0 + 10).await;

        let notice = drain(&mut rx_b);
        assert!(matches!(
            notice.as_slice(),
            [Outgoing::Event(ServerEvent::SystemNotification { kind: NotificationKind::Banned, .. })]
        ));

        // still inside the grace period
        hub.run_due(T0 + 1_000).await;
        assert!(drain(&mut rx_b).is_empty());

        hub.run_due(T0 + 3_010).await;
        assert_eq!(drain(&mut rx_b), vec![Outgoing::Close]);
        assert!(
            drain(&mut rx_a)
                .iter()
                .any(|m| matches!(m, Outgoing::Event(ServerEvent::UserLeft { id, .. }) if id == "bob"))
        );

        // the outlet is gone, so later traffic never reaches it
        hub.dispatch_at(a, ClientEvent::SendMessage { room_id: "room_1_1".into(), content: "hi".into() }, T0 + 4_000)
            .await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn scheduler_drops_banned_connections_on_its_own() {
        let hub = hub(BrokerSettings {
            report_threshold: 1,
            ban_disconnect_grace: Duration::from_millis(100),
            location_jitter_meters: 0.0,
            ..BrokerSettings::default()
        });
        let (sweeper, scheduler) = hub.spawn_maintenance(Duration::from_secs(3600));

        let (a, _rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.dispatch(a, join("room_1_1", "alice")).await;
        hub.dispatch(b, join("room_1_1", "bob")).await;
        let report = ClientEvent::ReportUser {
            target_user_id: "bob".into(),
            from_user_id: "alice".into(),
            reason: "spam".into(),
        };
        hub.dispatch(a, report).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(out) = rx_b.recv().await {
                if out == Outgoing::Close {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(closed, Ok(true));
        assert_eq!(hub.room_stats("room_1_1").await.unwrap().user_count, 1);

        sweeper.abort();
        scheduler.abort();
    }

    #[tokio::test]
    async fn disconnect_forgets_the_member() {
        let hub = hub(BrokerSettings { location_jitter_meters: 0.0, ..BrokerSettings::default() });
        let (a, _rx_a) = hub.connect().await;
        hub.dispatch_at(a, join("room_1_1", "alice"), T0).await;
        assert_eq!(hub.health().await.connected_users, 1);

        hub.disconnect_at(a, T0 + 1).await;
        let health = hub.health().await;
        assert_eq!(health.connected_users, 0);
        assert_eq!(health.active_rooms, 0);
        assert_eq!(hub.room_stats("room_1_1").await, Err(BrokerError::RoomNotFound("room_1_1".into())));
    }
}
