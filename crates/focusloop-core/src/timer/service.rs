//! The task that owns a [`TimerEngine`].
//!
//! All mutation goes through one command channel, so the engine always has a
//! single owner. The service arms a [`Ticker`] while the engine runs and
//! replaces it whenever the engine generation moves; ticks from a replaced
//! ticker are dropped by [`TimerEngine::tick_for`]. Finished intervals are
//! handed to the recorder task without waiting for the ledger.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use super::engine::{TimerEngine, TimerSnapshot};
use super::config::TimerConfiguration;
use super::record::SessionRecord;
use super::ticker::Ticker;
use crate::error::{CoreError, Result, ValidationError};
use crate::events::Event;
use crate::notify::NotificationDispatcher;
use crate::recorder::{AccomplishmentPrompt, ReplaySummary, SessionLedger, SessionRecorder};
use crate::storage::KeyValueStore;
use crate::visibility::{VisibilityCoordinator, VisibilityOutcome};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

enum Command {
    Start {
        label: Option<String>,
    },
    Pause,
    Reset,
    UpdateConfiguration {
        config: TimerConfiguration,
        reply: oneshot::Sender<Result<(), ValidationError>>,
    },
    Suspend {
        reply: oneshot::Sender<VisibilityOutcome>,
    },
    Resume {
        reply: oneshot::Sender<VisibilityOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<TimerSnapshot>,
    },
    ReplayPending {
        reply: oneshot::Sender<ReplaySummary>,
    },
    Shutdown,
}

enum RecorderMsg {
    Record(SessionRecord),
    Replay(oneshot::Sender<ReplaySummary>),
}

/// Cloneable handle to a running timer service.
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Event>,
}

impl TimerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn start(&self, label: Option<String>) -> Result<()> {
        self.send(Command::Start { label })
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub async fn update_configuration(&self, config: TimerConfiguration) -> Result<()> {
        self.request(|reply| Command::UpdateConfiguration { config, reply })
            .await?
            .map_err(CoreError::from)
    }

    /// Host is going to the background.
    pub async fn suspend(&self) -> Result<VisibilityOutcome> {
        self.request(|reply| Command::Suspend { reply }).await
    }

    /// Host is back in the foreground.
    pub async fn resume(&self) -> Result<VisibilityOutcome> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn snapshot(&self) -> Result<TimerSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Retry session records the ledger rejected earlier.
    pub async fn replay_pending(&self) -> Result<ReplaySummary> {
        self.request(|reply| Command::ReplayPending { reply }).await
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoreError::ServiceClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| CoreError::ServiceClosed)
    }
}

pub struct TimerService<S> {
    engine: TimerEngine,
    coordinator: VisibilityCoordinator<S>,
    dispatcher: NotificationDispatcher,
    recorder: mpsc::UnboundedSender<RecorderMsg>,
    events: broadcast::Sender<Event>,
    tick_tx: mpsc::UnboundedSender<u64>,
    tick_period: Duration,
    ticker: Option<Ticker>,
}

impl<S: KeyValueStore + 'static> TimerService<S> {
    /// Spawn the service and its recorder task on the current tokio runtime.
    pub fn spawn<L, P>(
        engine: TimerEngine,
        coordinator: VisibilityCoordinator<S>,
        recorder: SessionRecorder<L, P>,
        dispatcher: NotificationDispatcher,
        tick_period: Duration,
    ) -> TimerHandle
    where
        L: SessionLedger + 'static,
        P: AccomplishmentPrompt + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (recorder_tx, recorder_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(run_recorder(recorder, recorder_rx));

        let mut service = Self {
            engine,
            coordinator,
            dispatcher,
            recorder: recorder_tx,
            events: events.clone(),
            tick_tx,
            tick_period,
            ticker: None,
        };
        service.reconcile_ticker();
        tokio::spawn(service.run(commands_rx, tick_rx));

        TimerHandle {
            commands: commands_tx,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut ticks: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(generation) = ticks.recv() => self.on_tick(generation),
            }
        }
        self.ticker = None;
        info!("timer service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { label } => {
                if let Some(label) = label {
                    self.engine.set_activity_label(label);
                }
                if let Some(event) = self.engine.start() {
                    self.route(event);
                }
            }
            Command::Pause => {
                if let Some(event) = self.engine.pause() {
                    self.route(event);
                }
            }
            Command::Reset => {
                let event = self.engine.reset();
                self.route(event);
            }
            Command::UpdateConfiguration { config, reply } => {
                let result = self
                    .engine
                    .update_configuration(config)
                    .map(|event| self.route(event));
                let _ = reply.send(result);
            }
            Command::Suspend { reply } => {
                self.ticker = None;
                let outcome = self.coordinator.on_suspend(&self.engine);
                let _ = reply.send(outcome);
            }
            Command::Resume { reply } => {
                let outcome = self.coordinator.on_resume(&mut self.engine);
                match &outcome {
                    VisibilityOutcome::Restored(event) => self.route(event.clone()),
                    _ => self.reconcile_ticker(),
                }
                let _ = reply.send(outcome);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::ReplayPending { reply } => {
                if self.recorder.send(RecorderMsg::Replay(reply)).is_err() {
                    warn!("recorder task is gone, cannot replay");
                }
            }
            Command::Shutdown => {}
        }
    }

    fn on_tick(&mut self, generation: u64) {
        match self.engine.tick_for(generation) {
            Some(event) => self.route(event),
            None if generation == self.engine.generation() && self.engine.is_running() => {
                let _ = self.events.send(self.engine.tick_event());
            }
            None => {}
        }
    }

    fn route(&mut self, event: Event) {
        if let Some(record) = event.session_record() {
            if self.recorder.send(RecorderMsg::Record(record.clone())).is_err() {
                warn!("recorder task is gone, session record not delivered");
            }
        }
        self.dispatcher.dispatch(&event);
        self.coordinator.sync_after(&self.engine, &event);
        let _ = self.events.send(event);
        self.reconcile_ticker();
    }

    /// Keep exactly one ticker armed at the engine's current generation while
    /// running, and none otherwise.
    fn reconcile_ticker(&mut self) {
        if !self.engine.is_running() {
            self.ticker = None;
            return;
        }
        let current = self.engine.generation();
        if self.ticker.as_ref().map(Ticker::generation) != Some(current) {
            self.ticker = Some(Ticker::spawn(
                current,
                self.tick_period,
                self.tick_tx.clone(),
            ));
        }
    }
}

async fn run_recorder<L, P>(
    mut recorder: SessionRecorder<L, P>,
    mut inbox: mpsc::UnboundedReceiver<RecorderMsg>,
) where
    L: SessionLedger,
    P: AccomplishmentPrompt,
{
    while let Some(msg) = inbox.recv().await {
        match msg {
            RecorderMsg::Record(record) => {
                recorder.submit(record);
            }
            RecorderMsg::Replay(reply) => {
                let _ = reply.send(recorder.replay_pending());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LedgerError;
    use crate::recorder::{RetryQueue, SessionId};
    use crate::storage::{MemoryStore, KEY_STATE};
    use crate::timer::{IntervalKind, Phase};
    use crate::visibility::VisibilityConfig;
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast::error::RecvError;

    #[derive(Clone, Default)]
    struct VecLedger(Arc<Mutex<Vec<SessionRecord>>>);

    impl SessionLedger for VecLedger {
        fn save_session(&mut self, record: &SessionRecord) -> Result<SessionId, LedgerError> {
            let mut saved = self.0.lock().unwrap();
            saved.push(record.clone());
            Ok(SessionId(saved.len().to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct Captures(Arc<Mutex<Vec<SessionId>>>);

    impl AccomplishmentPrompt for Captures {
        fn request_accomplishment_capture(&mut self, session_id: &SessionId) {
            self.0.lock().unwrap().push(session_id.clone());
        }
    }

    struct Harness {
        handle: TimerHandle,
        clock: ManualClock,
        store: MemoryStore,
        ledger: VecLedger,
        captures: Captures,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(1_000_000);
        let engine = TimerEngine::with_clock(
            TimerConfiguration::new(1500, 300, 900, 4).unwrap(),
            Arc::new(clock.clone()),
        );
        let store = MemoryStore::new();
        let coordinator = VisibilityCoordinator::new(store.clone(), VisibilityConfig::default());
        let ledger = VecLedger::default();
        let captures = Captures::default();
        let recorder =
            SessionRecorder::new(ledger.clone(), captures.clone(), RetryQueue::in_memory());
        let handle = TimerService::spawn(
            engine,
            coordinator,
            recorder,
            NotificationDispatcher::silent(),
            Duration::from_millis(10),
        );
        Harness {
            handle,
            clock,
            store,
            ledger,
            captures,
        }
    }

    async fn wait_for(events: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn ledger_len(ledger: &VecLedger, expected: usize) -> Vec<SessionRecord> {
        for _ in 0..200 {
            let saved = ledger.0.lock().unwrap().clone();
            if saved.len() >= expected {
                return saved;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("ledger never reached {expected} records");
    }

    #[tokio::test]
    async fn ticking_completes_focus_and_records_it() {
        let h = harness();
        let mut events = h.handle.subscribe();
        h.handle.start(Some("essay".into())).unwrap();
        h.handle.snapshot().await.unwrap();
        h.clock.advance_secs(1500);

        let event = wait_for(&mut events, |e| matches!(e, Event::IntervalCompleted { .. })).await;
        let record = event.session_record().unwrap();
        assert_eq!(record.duration_secs, 1500);
        assert_eq!(record.activity_label, "essay");

        let saved = ledger_len(&h.ledger, 1).await;
        assert_eq!(saved[0].kind, IntervalKind::Focus);
        assert_eq!(h.captures.0.lock().unwrap().len(), 1);

        let snap = h.handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, Phase::Break);
        assert!(snap.running);
        assert_eq!(snap.remaining_ms, 300_000);
    }

    #[tokio::test]
    async fn resume_after_long_suspension_completes_once() {
        let h = harness();
        h.handle.start(None).unwrap();
        h.handle.snapshot().await.unwrap();
        h.clock.advance_secs(10);
        assert!(matches!(
            h.handle.suspend().await.unwrap(),
            VisibilityOutcome::Saved { .. }
        ));

        h.clock.advance_secs(2000);
        match h.handle.resume().await.unwrap() {
            VisibilityOutcome::Restored(Event::IntervalCompleted { record, .. }) => {
                assert_eq!(record.duration_secs, 1500);
                assert!(record.completed);
            }
            other => panic!("expected completion on resume, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let saved = ledger_len(&h.ledger, 1).await;
        assert_eq!(saved.len(), 1);
        let snap = h.handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, Phase::Break);
    }

    #[tokio::test]
    async fn reset_records_abandoned_interval() {
        let h = harness();
        h.handle.start(None).unwrap();
        h.handle.snapshot().await.unwrap();
        assert!(h.store.get(KEY_STATE).unwrap().is_some());

        h.clock.advance_secs(5);
        h.handle.reset().unwrap();
        let snap = h.handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, Phase::Idle);
        assert_eq!(snap.session_index, 1);

        let saved = ledger_len(&h.ledger, 1).await;
        assert_eq!(saved[0].duration_secs, 5);
        assert!(!saved[0].completed);
        assert!(h.captures.0.lock().unwrap().is_empty());
        assert!(h.store.get(KEY_STATE).unwrap().is_none());
    }

    #[tokio::test]
    async fn paused_timer_does_not_complete() {
        let h = harness();
        h.handle.start(None).unwrap();
        h.handle.pause().unwrap();
        h.handle.snapshot().await.unwrap();
        h.clock.advance_secs(2000);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = h.handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, Phase::Focus);
        assert_eq!(snap.remaining_ms, 1_500_000);
        assert!(h.ledger.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let h = harness();
        let bad = TimerConfiguration {
            focus_duration_secs: 0,
            ..TimerConfiguration::default()
        };
        assert!(matches!(
            h.handle.update_configuration(bad).await,
            Err(CoreError::Validation(_))
        ));
        h.handle.shutdown().unwrap();
    }
}
