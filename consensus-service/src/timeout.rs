//! Wall-clock timer for the consensus engine.
//!
//! The engine only says "fire ticket T after D". The scheduler remembers
//! the single pending ticket and when it was armed; the event loop polls it
//! and feeds expired tickets back into the engine. Arming again replaces
//! the pending ticket.

use {
    dbft_consensus::TimerTicket,
    std::time::{Duration, Instant},
};

/// Tracks the one pending consensus timeout.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    /// When the current timeout started (if any).
    started_at: Option<Instant>,
    /// Which (height, view) the timeout is for.
    ticket: Option<TimerTicket>,
    duration: Duration,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `ticket` to expire `duration` from now.
    pub fn start(&mut self, ticket: TimerTicket, duration: Duration) {
        self.started_at = Some(Instant::now());
        self.ticket = Some(ticket);
        self.duration = duration;
    }

    /// Cancel the current timeout.
    pub fn cancel(&mut self) {
        self.started_at = None;
        self.ticket = None;
    }

    /// Returns the pending ticket if its deadline has passed.
    pub fn check_expired(&self) -> Option<TimerTicket> {
        let started_at = self.started_at?;
        let ticket = self.ticket?;
        (started_at.elapsed() >= self.duration).then_some(ticket)
    }

    /// Time left before the pending ticket expires. `None` when nothing is
    /// armed, `Duration::ZERO` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        let started_at = self.started_at?;
        self.ticket?;
        Some(self.duration.saturating_sub(started_at.elapsed()))
    }

    pub fn active_ticket(&self) -> Option<TimerTicket> {
        self.ticket
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::thread::sleep};

    const TICKET: TimerTicket = TimerTicket {
        block_index: 3,
        view_number: 0,
    };

    #[test]
    fn test_no_active_timeout() {
        let scheduler = TimeoutScheduler::new();
        assert!(scheduler.check_expired().is_none());
        assert!(scheduler.remaining().is_none());
        assert!(scheduler.active_ticket().is_none());
    }

    #[test]
    fn test_start_and_cancel() {
        let mut scheduler = TimeoutScheduler::new();
        scheduler.start(TICKET, Duration::from_secs(60));
        assert_eq!(scheduler.active_ticket(), Some(TICKET));
        scheduler.cancel();
        assert!(scheduler.active_ticket().is_none());
        assert!(scheduler.check_expired().is_none());
    }

    #[test]
    fn test_zero_duration_expires_immediately() {
        let mut scheduler = TimeoutScheduler::new();
        scheduler.start(TICKET, Duration::ZERO);
        assert_eq!(scheduler.check_expired(), Some(TICKET));
        assert_eq!(scheduler.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_timeout_expires() {
        let mut scheduler = TimeoutScheduler::new();
        scheduler.start(TICKET, Duration::from_millis(10));
        assert!(scheduler.check_expired().is_none());

        sleep(Duration::from_millis(20));
        assert_eq!(scheduler.check_expired(), Some(TICKET));
    }

    #[test]
    fn test_restart_replaces_ticket() {
        let mut scheduler = TimeoutScheduler::new();
        scheduler.start(TICKET, Duration::ZERO);
        let next = TimerTicket {
            block_index: 3,
            view_number: 1,
        };
        scheduler.start(next, Duration::from_secs(60));
        assert!(scheduler.check_expired().is_none());
        assert_eq!(scheduler.active_ticket(), Some(next));
    }

    #[test]
    fn test_remaining_decreases() {
        let mut scheduler = TimeoutScheduler::new();
        scheduler.start(TICKET, Duration::from_secs(60));
        let r1 = scheduler.remaining().unwrap();
        sleep(Duration::from_millis(10));
        let r2 = scheduler.remaining().unwrap();
        assert!(r2 < r1);
    }
}
