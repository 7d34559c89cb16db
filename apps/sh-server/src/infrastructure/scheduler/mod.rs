//! Tokio Timer Scheduler
//!
//! `TimerPort` adapter backed by Tokio tasks. Each timer is a spawned task
//! that sleeps and then feeds a `TimerFire` event into the same channel
//! that carries inbound protocol events. Canceling aborts the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::application::ports::{TimerError, TimerPort};
use crate::application::services::Event;
use crate::domain::subscription::{ActivityHandle, TimerId};

/// Timer facility that delivers fires as dispatcher events.
#[derive(Debug)]
pub struct TokioTimerScheduler {
    events: mpsc::Sender<Event>,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioTimerScheduler {
    /// Create a scheduler that delivers fires into `events`.
    #[must_use]
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self {
            events,
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers not yet fired or canceled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&self) {
        for (_, handle) in self.timers.lock().drain() {
            handle.abort();
        }
    }
}

impl TimerPort for TokioTimerScheduler {
    fn schedule(
        &self,
        activity: ActivityHandle,
        delay: Duration,
        recurring: bool,
    ) -> Result<TimerId, TimerError> {
        if self.events.is_closed() {
            return Err(TimerError::Unavailable {
                message: "event channel closed".to_string(),
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| TimerError::Unavailable {
            message: e.to_string(),
        })?;

        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let events = self.events.clone();
        let timers = Arc::clone(&self.timers);

        // Held until the abort handle is stored so a zero-delay timer
        // cannot remove itself before it is registered.
        let mut pending = self.timers.lock();

        let task = runtime.spawn(async move {
            if recurring {
                let start = tokio::time::Instant::now() + delay;
                let mut interval = tokio::time::interval_at(start, delay);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if events.send(Event::TimerFire { activity, timer: id }).await.is_err() {
                        tracing::debug!(activity = %activity, timer = %id, "Event channel closed, stopping timer");
                        timers.lock().remove(&id);
                        break;
                    }
                }
            } else {
                tokio::time::sleep(delay).await;
                timers.lock().remove(&id);
                if events.send(Event::TimerFire { activity, timer: id }).await.is_err() {
                    tracing::debug!(activity = %activity, timer = %id, "Event channel closed, dropping timer fire");
                }
            }
        });

        pending.insert(id, task.abort_handle());
        drop(pending);

        tracing::trace!(activity = %activity, timer = %id, delay_ms = delay.as_millis(), recurring, "Timer scheduled");
        Ok(id)
    }

    fn cancel(&self, timer: TimerId) {
        if let Some(handle) = self.timers.lock().remove(&timer) {
            handle.abort();
            tracing::trace!(timer = %timer, "Timer canceled");
        }
    }
}

impl Drop for TokioTimerScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
