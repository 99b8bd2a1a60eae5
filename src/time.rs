// Quotactl Time - clock source and grace timer arithmetic
//
// Grace timers are absolute deadlines in whole seconds since the Unix epoch;
// zero means "no timer running".

use core::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source used to start grace timers
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now_secs(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock under test control
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Next value of a grace timer.
///
/// A timer starts when usage goes over a non-zero soft limit, keeps its
/// deadline while usage stays over, and is cleared once usage drops back.
pub fn next_grace_timer(timer: u64, usage: u64, softlimit: u64, now: u64, grace: u64) -> u64 {
    if softlimit == 0 || usage <= softlimit {
        0
    } else if timer == 0 {
        now.saturating_add(grace)
    } else {
        timer
    }
}
