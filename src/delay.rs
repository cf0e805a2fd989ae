//! Busy-wait delay bound to a timer interrupt.
//!
//! The legacy cooperative-yield substitute for a system with no scheduler:
//! clear the flag, start the countdown, spin until the timer interrupt sets
//! the flag. The spin is an ordinary instruction loop, so pending
//! higher-priority interrupts are still serviced while waiting — this is an
//! interruptible busy-wait, not a sleep.
//!
//! Single-writer discipline: the ISR alone calls [`DelayFlag::tick`], thread
//! context alone calls [`arm`](DelayFlag::arm) and [`block`](DelayFlag::block).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct DelayFlag {
    remaining_ms: AtomicU32,
    expired: AtomicBool,
}

impl DelayFlag {
    pub const fn new() -> Self {
        Self {
            remaining_ms: AtomicU32::new(0),
            expired: AtomicBool::new(true),
        }
    }

    /// Restart the countdown. A zero delay expires immediately.
    pub fn arm(&self, ms: u32) {
        if ms == 0 {
            self.expired.store(true, Ordering::Release);
            return;
        }
        self.expired.store(false, Ordering::Release);
        self.remaining_ms.store(ms, Ordering::Release);
    }

    /// One millisecond elapsed; called from the timer interrupt.
    pub fn tick(&self) {
        let remaining = self.remaining_ms.load(Ordering::Acquire);
        if remaining == 0 {
            return;
        }
        self.remaining_ms.store(remaining - 1, Ordering::Release);
        if remaining == 1 {
            self.expired.store(true, Ordering::Release);
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Spin until the armed delay expires.
    pub fn block(&self) {
        while !self.is_expired() {
            core::hint::spin_loop();
        }
    }
}

impl Default for DelayFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_expired() {
        let flag = DelayFlag::new();
        assert!(flag.is_expired());
    }

    #[test]
    fn arming_clears_the_flag() {
        let flag = DelayFlag::new();
        flag.arm(3);
        assert!(!flag.is_expired());
    }

    #[test]
    fn expires_after_exactly_the_armed_ticks() {
        let flag = DelayFlag::new();
        flag.arm(3);
        flag.tick();
        flag.tick();
        assert!(!flag.is_expired());
        flag.tick();
        assert!(flag.is_expired());
    }

    #[test]
    fn zero_delay_expires_immediately() {
        let flag = DelayFlag::new();
        flag.arm(0);
        assert!(flag.is_expired());
        flag.block(); // must not spin
    }

    #[test]
    fn extra_ticks_are_harmless() {
        let flag = DelayFlag::new();
        flag.arm(1);
        flag.tick();
        flag.tick();
        assert!(flag.is_expired());
        flag.arm(2);
        assert!(!flag.is_expired());
        flag.tick();
        flag.tick();
        assert!(flag.is_expired());
    }
}
