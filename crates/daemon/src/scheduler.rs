//! Scheduling port: "fire on cadence C, invoke handler H".

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use lifeboat_core::Schedule;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error};

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TickHandler = Arc<dyn Fn() -> TickFuture + Send + Sync>;

pub trait ScheduleTrigger: Send + Sync {
    /// Starts firing `handler` on `schedule`, replacing any earlier registration.
    fn register(&self, schedule: &Schedule, handler: TickHandler) -> Result<()>;

    /// Stops future ticks. Handlers already running are left alone.
    fn unregister(&self);
}

/// Timer task on the tokio runtime. Times are evaluated in local time.
#[derive(Debug, Default)]
pub struct TokioTrigger {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl ScheduleTrigger for TokioTrigger {
    fn register(&self, schedule: &Schedule, handler: TickHandler) -> Result<()> {
        let runtime = Handle::try_current().context("scheduler needs a tokio runtime")?;
        let schedule = schedule.clone();
        let task = runtime.spawn(async move {
            loop {
                let now = Local::now();
                let Some(next) = schedule.next_after(&now) else {
                    error!(schedule = schedule.as_str(), "schedule never fires; timer stopped");
                    return;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                debug!(next = %next, "next scheduled backup");
                sleep(wait).await;
                // Detached so a slow run never delays the following tick.
                tokio::spawn(handler());
            }
        });

        let mut slot = self
            .task
            .lock()
            .map_err(|_| anyhow!("scheduler state poisoned"))?;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn unregister(&self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

impl Drop for TokioTrigger {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TickHandler {
        Arc::new(|| -> TickFuture { Box::pin(async {}) })
    }

    #[tokio::test]
    async fn register_and_unregister_toggle_the_timer() {
        let trigger = TokioTrigger::new();
        let schedule = Schedule::parse("daily").unwrap();
        assert!(!trigger.is_registered());

        trigger.register(&schedule, noop()).unwrap();
        assert!(trigger.is_registered());

        trigger.unregister();
        trigger.unregister();
        assert!(!trigger.is_registered());
    }

    #[tokio::test]
    async fn re_registering_replaces_the_previous_timer() {
        let trigger = TokioTrigger::new();
        trigger
            .register(&Schedule::parse("hourly").unwrap(), noop())
            .unwrap();
        trigger
            .register(&Schedule::parse("weekly").unwrap(), noop())
            .unwrap();
        assert!(trigger.is_registered());

        trigger.unregister();
        assert!(!trigger.is_registered());
    }

    #[test]
    fn register_outside_a_runtime_is_an_error() {
        let trigger = TokioTrigger::new();
        assert!(trigger
            .register(&Schedule::parse("hourly").unwrap(), noop())
            .is_err());
    }
}
