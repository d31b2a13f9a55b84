//! Engine-side timer bookkeeping.
//!
//! The engine does not own a real timer. It decides when the next firing
//! should happen and hands `(ticket, delay)` to its host, which calls
//! back with the ticket. Re-arming with the same ticket replaces the
//! previous deadline. A firing whose ticket no longer matches the armed one
//! is stale and ignored.

use {crate::types::TimerTicket, std::time::Duration};

/// The single running consensus timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerState {
    ticket: Option<TimerTicket>,
    armed_at_ms: u64,
    delay_ms: u64,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer for `ticket` to fire `delay_ms` after `now_ms`.
    pub fn arm(&mut self, ticket: TimerTicket, now_ms: u64, delay_ms: u64) -> (TimerTicket, Duration) {
        self.ticket = Some(ticket);
        self.armed_at_ms = now_ms;
        self.delay_ms = delay_ms;
        (ticket, Duration::from_millis(delay_ms))
    }

    /// Push the running deadline back by `extra_ms`. Returns the new
    /// schedule relative to `now_ms`, or `None` when nothing is armed.
    pub fn extend(&mut self, now_ms: u64, extra_ms: u64) -> Option<(TimerTicket, Duration)> {
        let ticket = self.ticket?;
        let remaining = self.remaining_ms(now_ms).unwrap_or(0);
        Some(self.arm(ticket, now_ms, remaining.saturating_add(extra_ms)))
    }

    pub fn cancel(&mut self) {
        self.ticket = None;
    }

    /// Consume the armed ticket if `ticket` matches it.
    pub fn fire(&mut self, ticket: &TimerTicket) -> bool {
        if self.ticket.as_ref() == Some(ticket) {
            self.ticket = None;
            true
        } else {
            false
        }
    }

    pub fn armed(&self) -> Option<TimerTicket> {
        self.ticket
    }

    /// Absolute deadline in ms, if armed.
    pub fn deadline_ms(&self) -> Option<u64> {
        self.ticket
            .map(|_| self.armed_at_ms.saturating_add(self.delay_ms))
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline_ms().map(|d| d.saturating_sub(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICKET: TimerTicket = TimerTicket {
        block_index: 9,
        view_number: 1,
    };

    #[test]
    fn test_arm_and_fire() {
        let mut timer = TimerState::new();
        assert!(!timer.fire(&TICKET));

        let (ticket, delay) = timer.arm(TICKET, 1_000, 250);
        assert_eq!(ticket, TICKET);
        assert_eq!(delay, Duration::from_millis(250));
        assert_eq!(timer.deadline_ms(), Some(1_250));

        let stale = TimerTicket {
            block_index: 9,
            view_number: 0,
        };
        assert!(!timer.fire(&stale));
        assert!(timer.fire(&TICKET));
        // a ticket fires at most once
        assert!(!timer.fire(&TICKET));
    }

    #[test]
    fn test_extend_adds_to_remaining() {
        let mut timer = TimerState::new();
        timer.arm(TICKET, 1_000, 400);
        let (_, delay) = timer.extend(1_300, 50).unwrap();
        assert_eq!(delay, Duration::from_millis(150));
        assert_eq!(timer.deadline_ms(), Some(1_450));
    }

    #[test]
    fn test_extend_after_deadline_and_cancel() {
        let mut timer = TimerState::new();
        timer.arm(TICKET, 1_000, 100);
        let (_, delay) = timer.extend(5_000, 20).unwrap();
        assert_eq!(delay, Duration::from_millis(20));

        timer.cancel();
        assert!(timer.extend(5_000, 20).is_none());
        assert!(timer.armed().is_none());
    }
}
