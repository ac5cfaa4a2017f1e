/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deadline-based round timer.
//!
//! The timer never fires on its own. Its owner polls [`expired`](RoundTimer::expired) whenever it is
//! woken up, on the same thread that processes messages, so expiry and message processing can never
//! run concurrently, and a cancelled timer can never fire.

use std::time::{Duration, Instant};

use crate::types::data_types::Round;

pub struct RoundTimer {
    base: Duration,
    deadline: Option<Instant>,
}

impl RoundTimer {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            deadline: None,
        }
    }

    /// Time allowed for `round`: the base timeout multiplied by the round number.
    pub fn timeout_for_round(&self, round: Round) -> Duration {
        let multiplier = u32::try_from(round.int()).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier)
    }

    /// Arm the timer for `round`, replacing any existing deadline.
    pub fn start(&mut self, round: Round, now: Instant) {
        self.deadline = Some(
            now.checked_add(self.timeout_for_round(round))
                .unwrap_or(now + Duration::from_secs(u32::MAX as u64)),
        );
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_linearly_with_round() {
        let timer = RoundTimer::new(Duration::from_millis(500));
        assert_eq!(timer.timeout_for_round(Round::new(1)), Duration::from_millis(500));
        assert_eq!(timer.timeout_for_round(Round::new(4)), Duration::from_secs(2));
    }

    #[test]
    fn cancelled_timer_never_expires() {
        let now = Instant::now();
        let mut timer = RoundTimer::new(Duration::from_millis(10));
        timer.start(Round::FIRST, now);
        assert!(!timer.expired(now));
        assert!(timer.expired(now + Duration::from_millis(10)));

        timer.cancel();
        assert!(!timer.expired(now + Duration::from_secs(60)));
        assert_eq!(timer.deadline(), None);
    }
}
