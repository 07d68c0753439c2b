//! Reconciliation service.
//!
//! Owns the single mutex-protected [`ServiceState`] that both update paths
//! converge on:
//!
//! - the poll path: [`PollScheduler`] → [`Engine::list`] → tunnel discovery →
//!   [`ServiceState::publish`], and
//! - the event path: [`EventListener`] → [`ServiceState::apply_event`].
//!
//! The lock is only ever taken inside synchronous closures, so it is never held
//! across an await point and never held while broadcasting.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::container::ContainerRecord;
use crate::engine::{self, Engine, LiveEvent};
use crate::tunnel::{NoTunnelDiscovery, TunnelDiscovery, TunnelTable};

pub mod listener;
pub mod scheduler;
pub mod state;
pub mod vocabulary;

pub use listener::EventListener;
pub use scheduler::{PollRequester, PollScheduler};
pub use state::{
    EventOutcome, Health, LOAD_FAILED_MESSAGE, ServiceState, StreamMessage, StreamMessageKind,
    UNAVAILABLE_MESSAGE,
};
pub use vocabulary::{EventAction, EventVocabulary};

/// Timing and behaviour knobs of the service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Default resync debounce, also used for zero-delay requests.
    pub poll_debounce: Duration,
    /// Resync debounce after an applied removal.
    pub remove_debounce: Duration,
    /// Wait before restarting a failed event stream.
    pub event_restart_delay: Duration,
    /// Periodic safety-net resync. `None` disables it.
    pub resync_interval: Option<Duration>,
    /// Buffered messages per subscriber before it starts lagging.
    pub broadcast_capacity: usize,
    pub vocabulary: EventVocabulary,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_debounce: Duration::from_millis(500),
            remove_debounce: Duration::from_secs(2),
            event_restart_delay: Duration::from_secs(2),
            resync_interval: Some(Duration::from_secs(30)),
            broadcast_capacity: 64,
            vocabulary: EventVocabulary::default(),
        }
    }
}

/// Deep copy of the current state, for synchronous readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub containers: Vec<ContainerRecord>,
    pub health: Health,
}

struct Inner<D> {
    engine: Engine,
    discovery: D,
    settings: Settings,
    state: Mutex<ServiceState>,
    requester: PollRequester,
    /// Taken by the first call to [`ReconciliationService::run`].
    scheduler: Mutex<Option<PollScheduler>>,
    updates: broadcast::Sender<StreamMessage>,
}

/// Cheaply cloneable handle to one service instance.
pub struct ReconciliationService<D = NoTunnelDiscovery> {
    inner: Arc<Inner<D>>,
}

impl<D> Clone for ReconciliationService<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> ReconciliationService<D>
where
    D: TunnelDiscovery + Send + Sync + 'static,
{
    pub fn new(engine: Engine, discovery: D, settings: Settings) -> Self {
        let (requester, scheduler) =
            scheduler::channel(settings.poll_debounce, settings.resync_interval);
        let (updates, _) = broadcast::channel(settings.broadcast_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                engine,
                discovery,
                settings,
                state: Mutex::new(ServiceState::default()),
                requester,
                scheduler: Mutex::new(Some(scheduler)),
                updates,
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Subscribes to future [`StreamMessage`]s. Delivery never blocks the
    /// service; a subscriber that falls behind by more than the configured
    /// capacity skips the oldest messages.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|state| Snapshot {
            containers: state.containers().to_vec(),
            health: state.health(),
        })
    }

    pub fn tunnel_states(&self) -> TunnelTable {
        self.with_state(|state| state.tunnels().clone())
    }

    /// Asks for a debounced full resync. Never blocks.
    pub fn request_poll(&self, delay: Duration) -> bool {
        self.inner.requester.request(delay)
    }

    /// Performs one full resync right away.
    pub async fn resync(&self) {
        match self.inner.engine.list().await {
            Ok(containers) => {
                log::debug!("resync listed {} containers", containers.len());
                self.publish_snapshot(containers).await;
            }
            Err(err) => {
                if err.is_unavailable() {
                    log::error!("{err}");
                } else {
                    log::warn!("{err}");
                }
                self.record_failure(&err);
            }
        }
    }

    /// Enriches and installs a freshly listed snapshot.
    pub(crate) async fn publish_snapshot(&self, containers: Vec<ContainerRecord>) {
        // discovery may be slow, so it runs without the lock
        let discovered = self.inner.discovery.discover(&containers).await;
        let message = self.with_state(|state| state.publish(containers, discovered));
        self.broadcast(message);
    }

    /// Moves the service into the degraded state for the given failure.
    pub fn record_failure(&self, err: &engine::Error) {
        let message = if err.is_unavailable() {
            UNAVAILABLE_MESSAGE
        } else {
            LOAD_FAILED_MESSAGE
        };
        let update = self.with_state(|state| state.fail(message));
        self.broadcast(update);
    }

    /// Applies one live event and schedules the follow-up resync.
    pub fn handle_event(&self, event: &LiveEvent) -> EventOutcome {
        let settings = &self.inner.settings;
        let (outcome, message) =
            self.with_state(|state| state.apply_event(event, &settings.vocabulary));
        self.broadcast(message);

        match outcome {
            EventOutcome::Untrusted | EventOutcome::Changed { removal: false } => {
                self.request_poll(settings.poll_debounce);
            }
            EventOutcome::Changed { removal: true } => {
                self.request_poll(settings.remove_debounce);
            }
            EventOutcome::Ignored | EventOutcome::Unchanged => {}
        }

        outcome
    }

    /// Runs the poll scheduler and the event listener until `shutdown` is
    /// cancelled. An initial resync is performed immediately.
    ///
    /// Only the first call does anything; a service runs at most once.
    pub async fn run(&self, shutdown: CancellationToken) {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(scheduler) = scheduler else {
            log::warn!("reconciliation service is already running");
            return;
        };

        let listener = EventListener::new(self.clone(), self.inner.settings.event_restart_delay);
        let poller = async {
            if scheduler::run_until_cancelled(&shutdown, self.resync()).await {
                scheduler.run(shutdown.clone(), move || self.resync()).await;
            }
        };

        tokio::join!(poller, listener.run(shutdown.clone()));
        log::debug!("reconciliation service stopped");
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ServiceState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn broadcast(&self, message: Option<StreamMessage>) {
        let Some(message) = message else {
            return;
        };
        // an error only means nobody is subscribed right now
        if let Ok(receivers) = self.inner.updates.send(message) {
            log::trace!("broadcast update to {receivers} subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::container::{TunnelState, TunnelStatus};

    fn settings() -> Settings {
        Settings {
            resync_interval: None,
            ..Default::default()
        }
    }

    fn record(id: &str, name: &str, status: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_owned(),
            name: name.to_owned(),
            status: status.to_owned(),
            ..Default::default()
        }
    }

    fn event(status: &str, id: &str) -> LiveEvent {
        LiveEvent {
            kind: "container".to_owned(),
            status: status.to_owned(),
            id: id.to_owned(),
            ..Default::default()
        }
    }

    struct StaticDiscovery(TunnelTable);

    impl TunnelDiscovery for StaticDiscovery {
        async fn discover(&self, _containers: &[ContainerRecord]) -> TunnelTable {
            self.0.clone()
        }
    }

    #[test]
    fn test_new_service_is_uninitialized() {
        let service = ReconciliationService::new(Engine::default(), NoTunnelDiscovery, settings());
        let snapshot = service.snapshot();
        assert!(snapshot.containers.is_empty());
        assert_eq!(snapshot.health, Health::Uninitialized);
    }

    #[tokio::test]
    async fn test_missing_engine_broadcasts_error_once() {
        let engine = Engine::new("definitely-not-an-installed-engine-binary");
        let service = ReconciliationService::new(engine, NoTunnelDiscovery, settings());
        let mut updates = service.subscribe();

        service.resync().await;
        let message = updates.try_recv().unwrap();
        assert_eq!(message, StreamMessage::error(UNAVAILABLE_MESSAGE));
        assert_eq!(
            service.snapshot().health,
            Health::Degraded(UNAVAILABLE_MESSAGE.to_owned())
        );

        service.resync().await;
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_untrusted_event_requests_resync() {
        let service = ReconciliationService::new(Engine::default(), NoTunnelDiscovery, settings());
        assert_eq!(service.handle_event(&event("start", "a1")), EventOutcome::Untrusted);
        // the single request slot is now taken
        assert!(!service.request_poll(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_die_event_after_baseline() {
        let service = ReconciliationService::new(Engine::default(), NoTunnelDiscovery, settings());
        let mut updates = service.subscribe();

        service
            .publish_snapshot(vec![record("abc123", "ws-one", "Running")])
            .await;
        assert_eq!(updates.try_recv().unwrap().data[0].status, "Running");

        let outcome = service.handle_event(&event("die", "abc123def"));
        assert_eq!(outcome, EventOutcome::Changed { removal: false });
        let message = updates.try_recv().unwrap();
        assert_eq!(message.kind, StreamMessageKind::Containers);
        assert_eq!(message.data[0].status, "Exited");
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(service.handle_event(&event("mount", "abc123")), EventOutcome::Ignored);
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_identical_resyncs_broadcast_once() {
        let service = ReconciliationService::new(Engine::default(), NoTunnelDiscovery, settings());
        let mut updates = service.subscribe();
        let snapshot = vec![record("a1", "api", "Running"), record("b2", "web", "Exited")];

        service.publish_snapshot(snapshot.clone()).await;
        service.publish_snapshot(snapshot).await;

        assert_eq!(updates.try_recv().unwrap().data.len(), 2);
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_remove_event_evicts_tunnel_state() {
        let discovery = StaticDiscovery(TunnelTable::from([(
            "abc123".to_owned(),
            TunnelState::new(TunnelStatus::Blocked, "ABCD-EFGH", ""),
        )]));
        let service = ReconciliationService::new(Engine::default(), discovery, settings());

        service
            .publish_snapshot(vec![record("abc123", "ws-one", "Running")])
            .await;
        let snapshot = service.snapshot();
        assert_eq!(snapshot.containers[0].tunnel_status, Some(TunnelStatus::Blocked));
        assert_eq!(service.tunnel_states().len(), 1);

        let outcome = service.handle_event(&event("remove", "abc123"));
        assert_eq!(outcome, EventOutcome::Changed { removal: true });
        assert!(service.snapshot().containers.is_empty());
        assert!(service.tunnel_states().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_after_failure() {
        let service = ReconciliationService::new(Engine::default(), NoTunnelDiscovery, settings());
        let mut updates = service.subscribe();

        let err = engine::Error::EngineUnavailable {
            binary: "podman".to_owned(),
        };
        service.record_failure(&err);
        assert_eq!(updates.try_recv().unwrap().kind, StreamMessageKind::Error);

        service.publish_snapshot(Vec::new()).await;
        let message = updates.try_recv().unwrap();
        assert_eq!(message.kind, StreamMessageKind::Containers);
        assert_eq!(service.snapshot().health, Health::Healthy);
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn test_run_performs_initial_resync_and_stops_on_cancel() {
        let engine = crate::engine::tests::fake_engine(
            r#"case "$1" in
ps) printf '%s' '[{"Id":"a1","Names":["api"],"Status":"Up"}]' ;;
events) sleep 30 ;;
esac"#,
        );
        let service = ReconciliationService::new(engine, NoTunnelDiscovery, settings());
        let mut updates = service.subscribe();
        let shutdown = CancellationToken::new();

        let handle = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.run(shutdown).await })
        };

        let message = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.data[0].name, "api");
        assert_eq!(service.snapshot().health, Health::Healthy);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // a second run is refused
        service.run(CancellationToken::new()).await;
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn test_run_stops_on_cancel_while_listing_hangs() {
        let engine = crate::engine::tests::fake_engine(
            r#"case "$1" in
ps) sleep 30 ;;
events) sleep 30 ;;
esac"#,
        );
        let service = ReconciliationService::new(engine, NoTunnelDiscovery, settings());
        let shutdown = CancellationToken::new();

        let handle = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.snapshot().health, Health::Uninitialized);
    }
}
