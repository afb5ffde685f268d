//! Daily scheduling clock.
//!
//! The scheduler owns a single timer armed for the next occurrence of the
//! configured hour. When it fires, or when a "start now" trigger arrives, the
//! timer is dropped, one run executes, and a new timer is armed relative to the
//! time the run finished.
//!
//! Triggers that arrive while a run is in progress are ignored. A shutdown
//! request during a run lets the run finish first.

use crate::run::BackupRunner;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Next occurrence of `hour:00:00.000` strictly in the future of `now`'s hour.
///
/// Today if `now.hour() < hour`, tomorrow otherwise.
pub fn next_fire_time(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(time);
    if now.hour() < hour {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Timer armed.
    Idle { next_fire: NaiveDateTime },
    Running,
    Stopped,
}

#[derive(Debug)]
enum Command {
    StartNow,
    Shutdown,
}

/// Cloneable remote control for a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    /// Requests an immediate run. Returns false if the scheduler is gone.
    pub fn trigger(&self) -> bool {
        self.commands.send(Command::StartNow).is_ok()
    }

    /// Requests the scheduler loop to stop.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }
}

pub struct Scheduler<R, C = LocalClock> {
    runner: R,
    clock: C,
    hour: u32,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SchedulerState>,
}

impl<R: BackupRunner, C: Clock> Scheduler<R, C> {
    /// Creates a scheduler firing every day at `hour` (0-23), plus its handle.
    pub fn new(runner: R, clock: C, hour: u32) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let next_fire = next_fire_time(clock.now(), hour);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle { next_fire });
        let scheduler = Self {
            runner,
            clock,
            hour,
            commands: rx,
            state: state_tx,
        };
        let handle = SchedulerHandle {
            commands: tx,
            state: state_rx,
        };
        (scheduler, handle)
    }

    /// Drives the schedule until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            let now = self.clock.now();
            let next_fire = next_fire_time(now, self.hour);
            self.state.send_replace(SchedulerState::Idle { next_fire });
            info!(next_fire = %next_fire, "Backup scheduled");

            let delay = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
            let timer = tokio::time::sleep(delay);
            tokio::pin!(timer);

            tokio::select! {
                _ = &mut timer => debug!("Backup timer fired"),
                command = self.commands.recv() => match command {
                    Some(Command::StartNow) => info!("Backup triggered, starting now"),
                    Some(Command::Shutdown) | None => break,
                },
            }

            if !self.run_once().await {
                break;
            }
        }
        self.state.send_replace(SchedulerState::Stopped);
        info!("Backup scheduler stopped");
    }

    /// Runs one backup. Returns false if the scheduler should stop afterwards.
    async fn run_once(&mut self) -> bool {
        self.state.send_replace(SchedulerState::Running);
        let run = self.runner.run(self.clock.now());
        tokio::pin!(run);

        let mut keep_going = true;
        let mut listening = true;
        loop {
            tokio::select! {
                _ = &mut run => break,
                command = self.commands.recv(), if listening => match command {
                    Some(Command::StartNow) => warn!("Backup already running, trigger ignored"),
                    Some(Command::Shutdown) => {
                        info!("Shutdown requested, waiting for the running backup");
                        keep_going = false;
                    }
                    None => {
                        listening = false;
                        keep_going = false;
                    }
                },
            }
        }
        keep_going
    }
}
