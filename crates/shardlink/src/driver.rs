//! Async tick loop: drives a [`SessionDispatcher`] from a
//! [`TickScheduler`] until told to stop.
//!
//! The dispatcher itself never awaits. The driver is the only async piece:
//! it sleeps until the next tick, calls `tick(now)`, and goes back to
//! sleep. Shutdown is a `tokio::sync::watch` channel so any number of
//! tasks can observe (or trigger) it.

use shardlink_session::{DiagnosticsSink, WorldObjectStore};
use shardlink_tick::{TickConfig, TickInfo, TickScheduler};
use shardlink_transport::Transport;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::SessionDispatcher;

/// Runs the session tick loop.
pub struct SessionDriver {
    scheduler: TickScheduler,
}

impl SessionDriver {
    pub fn new(config: TickConfig) -> Self {
        Self {
            scheduler: TickScheduler::new(config),
        }
    }

    /// The underlying scheduler, for tick counts and overrun stats.
    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Ticks `dispatcher` until `shutdown` is set to `true` or its sender
    /// is dropped. Returns the number of ticks run.
    pub async fn run<T, W, D>(
        &mut self,
        dispatcher: &mut SessionDispatcher<T, W, D>,
        shutdown: watch::Receiver<bool>,
    ) -> u64
    where
        T: Transport,
        W: WorldObjectStore,
        D: DiagnosticsSink,
    {
        self.run_with(dispatcher, shutdown, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_tick` after every tick. This
    /// is where an application drains events and does its own per-step
    /// work.
    pub async fn run_with<T, W, D, F>(
        &mut self,
        dispatcher: &mut SessionDispatcher<T, W, D>,
        mut shutdown: watch::Receiver<bool>,
        mut on_tick: F,
    ) -> u64
    where
        T: Transport,
        W: WorldObjectStore,
        D: DiagnosticsSink,
        F: FnMut(&mut SessionDispatcher<T, W, D>, &TickInfo),
    {
        info!(
            rate_hz = self.scheduler.tick_rate_hz(),
            session = %dispatcher.local_session(),
            "session driver started"
        );
        let mut ticks = 0u64;

        if *shutdown.borrow() {
            return ticks;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                info = self.scheduler.wait_for_tick() => {
                    dispatcher.tick(info.now);
                    on_tick(dispatcher, &info);
                    self.scheduler.record_tick_end();
                    ticks += 1;
                }
            }
        }

        debug!(ticks, overruns = self.scheduler.total_overruns(), "session driver stopped");
        ticks
    }
}

impl Default for SessionDriver {
    fn default() -> Self {
        Self::new(TickConfig::default())
    }
}
