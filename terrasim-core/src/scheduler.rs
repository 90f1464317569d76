//! The tick scheduler.
//!
//! A timer thread enqueues one token per period into a bounded queue; a
//! dedicated worker drains it serially and runs the tick body. When the
//! queue is full the token is dropped: the engine prefers staying in sync
//! with wall time over catching up on a backlog. That back-pressure is part
//! of the contract and must not be removed.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval for control-flag checks while the timer is stopped or the
/// worker queue is idle.
const IDLE_POLL: Duration = Duration::from_millis(50);

struct SchedulerShared {
    halted: AtomicBool,
    /// Timer period in nanoseconds; 0 stops the timer entirely.
    period_nanos: AtomicU64,
    shutdown: AtomicBool,
    tx: Sender<()>,
    /// Timer tokens dropped because the queue was full.
    dropped: AtomicU64,
}

/// Owns the timer and worker threads. Dropping the scheduler shuts both
/// down and joins them.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the timer and worker. `tick` runs once per drained token on the
    /// worker thread.
    pub fn start<F>(capacity: usize, tick_rate: f64, start_halted: bool, tick: F) -> Scheduler
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx): (Sender<()>, Receiver<()>) = bounded(capacity);
        let shared = Arc::new(SchedulerShared {
            halted: AtomicBool::new(start_halted),
            period_nanos: AtomicU64::new(rate_to_period(tick_rate)),
            shutdown: AtomicBool::new(false),
            tx,
            dropped: AtomicU64::new(0),
        });

        let timer = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("terrasim-timer".into())
                .spawn(move || timer_loop(&shared))
                .expect("spawn timer thread")
        };
        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("terrasim-tick".into())
                .spawn(move || worker_loop(&shared, rx, tick))
                .expect("spawn tick worker")
        };

        Scheduler {
            shared,
            timer: Mutex::new(Some(timer)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stop enqueueing timer ticks. An in-flight tick is not cancelled.
    pub fn halt(&self) {
        self.shared.halted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.halted.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    /// Replace the timer period with `1s / rate`; stops the timer for
    /// `rate <= 0`.
    pub fn set_tick_rate(&self, rate: f64) {
        self.shared
            .period_nanos
            .store(rate_to_period(rate), Ordering::SeqCst);
    }

    /// Current target rate in ticks per second (0 when stopped).
    pub fn tick_rate(&self) -> f64 {
        let period = self.shared.period_nanos.load(Ordering::SeqCst);
        if period == 0 {
            0.0
        } else {
            1e9 / period as f64
        }
    }

    /// Timer tokens lost to back-pressure so far.
    pub fn dropped_ticks(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // The worker can end up dropping the last engine handle itself (it
        // upgrades a weak reference per tick); never join our own thread.
        let current = std::thread::current().id();
        for slot in [&self.timer, &self.worker] {
            if let Some(handle) = slot.lock().take() {
                if handle.thread().id() != current {
                    let _ = handle.join();
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("halted", &self.is_halted())
            .field("tick_rate", &self.tick_rate())
            .finish()
    }
}

fn rate_to_period(rate: f64) -> u64 {
    if rate <= 0.0 {
        0
    } else {
        (1e9 / rate) as u64
    }
}

fn timer_loop(shared: &SchedulerShared) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let period = shared.period_nanos.load(Ordering::SeqCst);
        if period == 0 {
            std::thread::sleep(IDLE_POLL);
            continue;
        }
        std::thread::sleep(Duration::from_nanos(period));
        if shared.halted.load(Ordering::SeqCst) || shared.shutdown.load(Ordering::SeqCst) {
            continue;
        }
        match shared.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                shared.dropped.fetch_add(1, Ordering::SeqCst);
                log::trace!("tick queue full, dropping timer token");
            }
            Err(TrySendError::Disconnected(())) => return,
        }
    }
}

fn worker_loop<F: Fn()>(shared: &SchedulerShared, rx: Receiver<()>, tick: F) {
    loop {
        match rx.recv_timeout(IDLE_POLL) {
            Ok(()) => {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                tick();
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}
