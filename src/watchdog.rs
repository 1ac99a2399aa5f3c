//! Liveness heartbeat and cancellation.
//!
//! Blocking steps in the control loop and the stream demuxer call
//! [`Heartbeat::beat`] between reads. A [`Watchdog`] thread watches the beat
//! timestamp and fires its violation hook when the loop stops yielding for
//! longer than the configured timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

const MAX_POLL: Duration = Duration::from_millis(250);

/// Cooperative liveness and cancellation callback.
pub trait Heartbeat {
    /// Signal liveness. Returns `false` when in-flight work should be abandoned.
    fn beat(&mut self) -> bool;
}

impl<F: FnMut() -> bool> Heartbeat for F {
    fn beat(&mut self) -> bool {
        self()
    }
}

/// Heartbeat for callers without a liveness monitor. Never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHeartbeat;

impl Heartbeat for NoHeartbeat {
    fn beat(&mut self) -> bool {
        true
    }
}

/// Sleep for `total`, beating at least every `slice`.
///
/// Returns `false` as soon as the heartbeat requests cancellation.
pub fn sleep_with_heartbeat(total: Duration, slice: Duration, heartbeat: &mut dyn Heartbeat) -> bool {
    let deadline = Instant::now() + total;
    let slice = slice.max(Duration::from_millis(1));
    loop {
        if !heartbeat.beat() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(slice.min(deadline - now));
    }
}

struct Shared {
    epoch: Instant,
    last_beat_ms: AtomicU64,
    shutdown: AtomicBool,
    monitor_stop: AtomicBool,
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Cloneable beat/shutdown handle given to the control loop.
#[derive(Clone)]
pub struct WatchdogHandle {
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    /// Ask the loop to finish. In-flight fetches are cancelled at their next beat.
    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Time since the last beat.
    pub fn since_last_beat(&self) -> Duration {
        let last = self.shared.last_beat_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.shared.now_ms().saturating_sub(last))
    }
}

impl Heartbeat for WatchdogHandle {
    fn beat(&mut self) -> bool {
        let now = self.shared.now_ms();
        self.shared.last_beat_ms.store(now, Ordering::SeqCst);
        !self.is_shutdown()
    }
}

/// Liveness monitor thread.
pub struct Watchdog {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
    join: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start a monitor that calls `on_violation` once if no beat arrives within `timeout`.
    pub fn spawn<F>(timeout: Duration, on_violation: F) -> Result<Self>
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        if timeout.is_zero() {
            return Err(anyhow!("watchdog timeout must be greater than zero"));
        }
        let shared = new_shared();
        let monitor = shared.clone();
        let poll = (timeout / 4).clamp(Duration::from_millis(1), MAX_POLL);
        let join = std::thread::Builder::new()
            .name("relay-watchdog".to_string())
            .spawn(move || {
                let mut on_violation = Some(on_violation);
                while !monitor.monitor_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(poll);
                    let last = monitor.last_beat_ms.load(Ordering::SeqCst);
                    let stalled = Duration::from_millis(monitor.now_ms().saturating_sub(last));
                    if stalled > timeout {
                        log::error!(
                            "liveness violation: no heartbeat for {} ms (limit {} ms)",
                            stalled.as_millis(),
                            timeout.as_millis()
                        );
                        if let Some(hook) = on_violation.take() {
                            hook(stalled);
                        }
                        break;
                    }
                }
            })
            .context("spawn watchdog thread")?;
        Ok(Self {
            shared,
            timeout: Some(timeout),
            join: Some(join),
        })
    }

    /// A handle with shutdown support but no monitor thread.
    pub fn disabled() -> Self {
        Self {
            shared: new_shared(),
            timeout: None,
            join: None,
        }
    }

    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Stop the monitor thread and wait for it.
    pub fn stop(mut self) -> Result<()> {
        self.shared.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("watchdog thread panicked"))?;
        }
        Ok(())
    }
}

fn new_shared() -> Arc<Shared> {
    Arc::new(Shared {
        epoch: Instant::now(),
        last_beat_ms: AtomicU64::new(0),
        shutdown: AtomicBool::new(false),
        monitor_stop: AtomicBool::new(false),
    })
}
