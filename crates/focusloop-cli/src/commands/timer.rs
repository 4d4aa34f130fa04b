use std::error::Error;

use clap::Subcommand;
use focusloop_core::events::Event;
use focusloop_core::notify::{NotificationDispatcher, TerminalBell};
use focusloop_core::recorder::SessionRecorder;
use focusloop_core::storage::Database;
use focusloop_core::timer::{display_secs, Phase, TimerEngine, TimerService, DEFAULT_TICK_PERIOD};
use focusloop_core::visibility::{VisibilityCoordinator, VisibilityOutcome};
use focusloop_core::Config;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{open_retry_queue, ConsolePrompt};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the countdown
    Start {
        /// What you are working on
        #[arg(long)]
        label: Option<String>,
    },
    /// Pause the countdown
    Pause,
    /// Abandon the current interval and return to idle
    Reset,
    /// Finish the current interval now
    Skip,
    /// Print current timer state as JSON
    Status,
    /// Run the timer in the foreground until the cycle ends or Ctrl-C
    Watch {
        /// What you are working on
        #[arg(long)]
        label: Option<String>,
    },
}

/// One CLI invocation's view of the timer.
///
/// The engine is rebuilt from the stored snapshot on open and written back
/// on close, so consecutive invocations behave like one long-lived timer
/// that was suspended in between.
struct TimerSession {
    engine: TimerEngine,
    coordinator: VisibilityCoordinator<Database>,
    recorder: SessionRecorder<Database, ConsolePrompt>,
    dispatcher: NotificationDispatcher,
}

impl TimerSession {
    fn open() -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let engine = TimerEngine::new(config.timer_configuration()?);

        // Each invocation is a suspend/resume cycle, so paused timers must
        // survive it too.
        let mut visibility = config.visibility_config();
        visibility.persist_paused = true;
        let coordinator = VisibilityCoordinator::new(Database::open()?, visibility);

        let recorder = SessionRecorder::new(Database::open()?, ConsolePrompt, open_retry_queue()?);
        let dispatcher =
            NotificationDispatcher::new(Box::new(TerminalBell), config.notifications.enabled);

        let mut session = Self {
            engine,
            coordinator,
            recorder,
            dispatcher,
        };
        match session.coordinator.on_resume(&mut session.engine) {
            VisibilityOutcome::Restored(event) => session.emit(event)?,
            VisibilityOutcome::Failed(reason) => {
                warn!(%reason, "starting from a fresh timer");
            }
            outcome => debug!(?outcome, "resume"),
        }
        Ok(session)
    }

    /// Record, notify and print one engine event.
    fn emit(&mut self, event: Event) -> Result<(), Box<dyn Error>> {
        if let Some(record) = event.session_record() {
            self.recorder.submit(record.clone());
        }
        self.dispatcher.dispatch(&event);
        if !matches!(event, Event::TimerRestored { .. }) {
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), Box<dyn Error>> {
        match self.coordinator.checkpoint(&self.engine) {
            VisibilityOutcome::Conflict { found } => Err(format!(
                "timer state was changed by another focusloop process (revision {found}); run the command again"
            )
            .into()),
            VisibilityOutcome::Failed(reason) => Err(format!("could not save timer state: {reason}").into()),
            _ => Ok(()),
        }
    }
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn Error>> {
    let mut session = match action {
        TimerAction::Watch { label } => return watch(label),
        _ => TimerSession::open()?,
    };
    match action {
        TimerAction::Start { label } => {
            if let Some(label) = label {
                session.engine.set_activity_label(label);
            }
            match session.engine.start() {
                Some(event) => session.emit(event)?,
                None => {
                    let status = session.engine.status();
                    session.emit(status)?;
                }
            }
        }
        TimerAction::Pause => match session.engine.pause() {
            Some(event) => session.emit(event)?,
            None => {
                let status = session.engine.status();
                session.emit(status)?;
            }
        },
        TimerAction::Reset => {
            let event = session.engine.reset();
            session.emit(event)?;
        }
        TimerAction::Skip => match session.engine.complete_interval() {
            Some(event) => session.emit(event)?,
            None => {
                let status = session.engine.status();
                session.emit(status)?;
            }
        },
        TimerAction::Status => {
            if let Some(event) = session.engine.tick() {
                session.emit(event)?;
            }
            let status = session.engine.status();
            session.emit(status)?;
        }
        TimerAction::Watch { .. } => {}
    }
    session.close()
}

fn watch(label: Option<String>) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let TimerSession {
            engine,
            coordinator,
            recorder,
            dispatcher,
        } = TimerSession::open()?;
        let handle = TimerService::spawn(engine, coordinator, recorder, dispatcher, DEFAULT_TICK_PERIOD);
        let mut events = handle.subscribe();
        handle.start(label)?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    eprintln!();
                    break;
                }
                received = events.recv() => match received {
                    Ok(Event::Tick { phase, remaining_ms, .. }) => {
                        let secs = display_secs(remaining_ms);
                        eprint!("\r{phase:?} {:02}:{:02} ", secs / 60, secs % 60);
                    }
                    Ok(event) => {
                        eprintln!();
                        println!("{}", serde_json::to_string_pretty(&event)?);
                        if matches!(event, Event::IntervalCompleted { next_phase: Phase::Idle, .. }) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "watch output lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        let outcome = handle.suspend().await?;
        debug!(?outcome, "watch suspended");
        let summary = handle.replay_pending().await?;
        if summary.remaining > 0 {
            warn!(remaining = summary.remaining, "sessions still waiting for the ledger");
        }
        handle.shutdown()?;
        Ok::<(), Box<dyn Error>>(())
    })
}
