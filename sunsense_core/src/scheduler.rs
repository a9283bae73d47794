//! Tracking service: the orchestrator behind a single-owner actor.
//!
//! Every mutation goes through one task, so an observation arriving while
//! a tick is suspended on the network waits its turn and two ticks never
//! overlap. The sampling timer is a `select!` arm on the orchestrator's
//! next due time. Background wakes run under a hard time budget; when the
//! budget runs out the in-flight tick is dropped and whatever it buffered
//! in memory is flushed on a later cycle.

use crate::tracking::{MaintenanceReport, Orchestrator, TrackingSnapshot, TrackingState};
use crate::types::LocationObservation;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;

/// Idle wait when nothing is scheduled
const IDLE_WAIT: std::time::Duration = std::time::Duration::from_secs(3600);

/// Source of "now" for the service
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from the tokio clock, so paused-time tests advance it
#[derive(Clone, Debug)]
pub struct RuntimeClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl RuntimeClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// What a background wake managed to do
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BackgroundOutcome {
    pub completed: bool,
    pub ran_maintenance: bool,
    /// When the host should wake the service again
    pub next_wake: DateTime<Utc>,
}

enum Command {
    Observe {
        observation: LocationObservation,
        reply: oneshot::Sender<Result<TrackingState>>,
    },
    Tick {
        reply: oneshot::Sender<Result<()>>,
    },
    DailyMaintenance {
        reply: oneshot::Sender<Result<MaintenanceReport>>,
    },
    ApplySunscreen {
        reply: oneshot::Sender<Result<()>>,
    },
    SetManualOverride {
        on: bool,
        reply: oneshot::Sender<TrackingState>,
    },
    FloorChange,
    EnterBackground,
    EnterForeground,
    BackgroundWake {
        reply: oneshot::Sender<BackgroundOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<TrackingSnapshot>,
    },
}

/// Cloneable front door to a running service
#[derive(Clone)]
pub struct TrackingHandle {
    tx: mpsc::Sender<Command>,
}

impl TrackingHandle {
    pub async fn observe(&self, observation: LocationObservation) -> Result<TrackingState> {
        self.request(|reply| Command::Observe { observation, reply }).await?
    }

    pub async fn tick(&self) -> Result<()> {
        self.request(|reply| Command::Tick { reply }).await?
    }

    pub async fn daily_maintenance(&self) -> Result<MaintenanceReport> {
        self.request(|reply| Command::DailyMaintenance { reply }).await?
    }

    pub async fn apply_sunscreen(&self) -> Result<()> {
        self.request(|reply| Command::ApplySunscreen { reply }).await?
    }

    pub async fn set_manual_override(&self, on: bool) -> Result<TrackingState> {
        self.request(|reply| Command::SetManualOverride { on, reply }).await
    }

    pub async fn floor_change(&self) -> Result<()> {
        self.send(Command::FloorChange).await
    }

    pub async fn enter_background(&self) -> Result<()> {
        self.send(Command::EnterBackground).await
    }

    pub async fn enter_foreground(&self) -> Result<()> {
        self.send(Command::EnterForeground).await
    }

    pub async fn background_wake(&self) -> Result<BackgroundOutcome> {
        self.request(|reply| Command::BackgroundWake { reply }).await
    }

    pub async fn snapshot(&self) -> Result<TrackingSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| stopped())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::Other("tracking service stopped".into())
}

pub struct TrackingService {
    handle: TrackingHandle,
    cancel: CancellationToken,
    task: JoinHandle<Orchestrator>,
}

impl TrackingService {
    /// Move `orchestrator` onto its own task
    pub fn spawn(orchestrator: Orchestrator, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(orchestrator, rx, clock, cancel.clone()));

        Self {
            handle: TrackingHandle { tx },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> TrackingHandle {
        self.handle.clone()
    }

    /// Stop the loop, flush buffered state and hand the orchestrator back
    pub async fn shutdown(self) -> Result<Orchestrator> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| Error::Other(format!("tracking task failed to join: {}", e)))
    }
}

async fn run(
    mut orchestrator: Orchestrator,
    mut rx: mpsc::Receiver<Command>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> Orchestrator {
    tracing::info!("Tracking service started");

    loop {
        let now = clock.now();
        let due = orchestrator.next_tick_due(now);
        let wait = due
            .map(|at| (at - now).to_std().unwrap_or_default())
            .unwrap_or(IDLE_WAIT);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Tracking service shutting down");
                orchestrator.enter_background(clock.now()).await;
                break;
            }
            command = rx.recv() => match command {
                Some(command) => handle(&mut orchestrator, command, clock.as_ref()).await,
                None => {
                    tracing::info!("All tracking handles dropped, stopping");
                    orchestrator.enter_background(clock.now()).await;
                    break;
                }
            },
            _ = tokio::time::sleep(wait), if due.is_some() => {
                let _ = orchestrator.run_exposure_tick(clock.now()).await;
            }
        }
    }

    orchestrator
}

async fn handle(orchestrator: &mut Orchestrator, command: Command, clock: &dyn Clock) {
    let now = clock.now();
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::Observe { observation, reply } => {
            let _ = reply.send(orchestrator.handle_observation(observation).await);
        }
        Command::Tick { reply } => {
            let _ = reply.send(orchestrator.run_exposure_tick(now).await);
        }
        Command::DailyMaintenance { reply } => {
            let _ = reply.send(orchestrator.run_daily_maintenance(now).await);
        }
        Command::ApplySunscreen { reply } => {
            let _ = reply.send(orchestrator.apply_sunscreen(now).await);
        }
        Command::SetManualOverride { on, reply } => {
            let _ = reply.send(orchestrator.set_manual_override(on, now).await);
        }
        Command::FloorChange => orchestrator.note_floor_change(now),
        Command::EnterBackground => orchestrator.enter_background(now).await,
        Command::EnterForeground => orchestrator.enter_foreground(now).await,
        Command::BackgroundWake { reply } => {
            let _ = reply.send(background_wake(orchestrator, clock).await);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(orchestrator.snapshot(now));
        }
    }
}

async fn background_wake(orchestrator: &mut Orchestrator, clock: &dyn Clock) -> BackgroundOutcome {
    let background = orchestrator.config().background.clone();
    let budget = std::time::Duration::from_secs(background.wake_budget_secs);
    let started = clock.now();
    let ran_maintenance = orchestrator.maintenance_due(started);

    let work = async {
        if ran_maintenance {
            if let Err(e) = orchestrator.run_daily_maintenance(started).await {
                tracing::warn!("Background maintenance skipped: {}", e);
            }
        }
        let _ = orchestrator.run_exposure_tick(started).await;
        orchestrator.enter_background(clock.now()).await;
    };
    // A cut-off wake leaves its credit buffered in memory for the next one
    let completed = match tokio::time::timeout(budget, work).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("Background wake exceeded {}s budget", background.wake_budget_secs);
            false
        }
    };

    let now = clock.now();

    let fallback = now + chrono::Duration::seconds(background.wake_interval_secs);
    let next_wake = orchestrator
        .next_tick_due(now)
        .map_or(fallback, |due| due.min(fallback));

    tracing::debug!("Background wake done, next at {}", next_wake);
    BackgroundOutcome {
        completed,
        ran_maintenance,
        next_wake,
    }
}
