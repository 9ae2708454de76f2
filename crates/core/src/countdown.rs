//! Remaining-time countdown derived from wall-clock instants.
//!
//! Each tick subtracts the whole seconds that actually passed since the last
//! accounted instant, so late or coalesced timer callbacks cannot make the
//! display fall behind the deadline.

use chrono::{DateTime, Duration, Utc};

use crate::model::whole_seconds;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Less than a second accounted since the last change, or already expired.
    Idle,
    Advanced { remaining: u64 },
    /// Remaining time just reached zero. Reported exactly once.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining_seconds: u64,
    last_tick: DateTime<Utc>,
    expired: bool,
}

impl Countdown {
    /// Start counting down towards `deadline` from `now`.
    #[must_use]
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: whole_seconds(now, deadline),
            last_tick: now,
            expired: false,
        }
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.expired {
            return TickOutcome::Idle;
        }
        let delta = whole_seconds(self.last_tick, now);
        let advanced = delta >= 1;
        if advanced {
            self.remaining_seconds = self.remaining_seconds.saturating_sub(delta);
            // Anchor moves by the seconds consumed; the fraction stays pending.
            self.last_tick += Duration::seconds(i64::try_from(delta).unwrap_or(i64::MAX));
        }
        if self.remaining_seconds == 0 {
            self.expired = true;
            return TickOutcome::Expired;
        }
        if advanced {
            TickOutcome::Advanced {
                remaining: self.remaining_seconds,
            }
        } else {
            TickOutcome::Idle
        }
    }

    #[must_use]
    pub fn display(&self) -> String {
        format_clock(self.remaining_seconds)
    }
}

/// Format seconds as `HH:MM:SS`.
#[must_use]
pub fn format_clock(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn jittered_ticks_track_wall_clock() {
        let t0 = fixed_now();
        let mut countdown = Countdown::until(t0 + Duration::seconds(600), t0);
        let jitter_ms = [180, 1_900, 40, 3_700, 250, 999, 12_000, 1_001, 160, 5_555];
        let mut now = t0;
        for step in jitter_ms {
            now += Duration::milliseconds(step);
            countdown.tick(now);
        }
        let elapsed = whole_seconds(t0, now);
        assert_eq!(countdown.remaining_seconds(), 600 - elapsed);
    }

    #[test]
    fn sub_second_ticks_do_not_decrement() {
        let t0 = fixed_now();
        let mut countdown = Countdown::until(t0 + Duration::seconds(10), t0);
        assert_eq!(countdown.tick(t0 + Duration::milliseconds(200)), TickOutcome::Idle);
        assert_eq!(countdown.remaining_seconds(), 10);
        assert_eq!(
            countdown.tick(t0 + Duration::milliseconds(1_100)),
            TickOutcome::Advanced { remaining: 9 }
        );
    }

    #[test]
    fn expiry_is_reported_once() {
        let t0 = fixed_now();
        let mut countdown = Countdown::until(t0 + Duration::seconds(2), t0);
        assert_eq!(countdown.tick(t0 + Duration::seconds(5)), TickOutcome::Expired);
        assert_eq!(countdown.tick(t0 + Duration::seconds(6)), TickOutcome::Idle);
        assert!(countdown.is_expired());
        assert_eq!(countdown.remaining_seconds(), 0);
    }

    #[test]
    fn past_deadline_expires_on_first_tick() {
        let t0 = fixed_now();
        let mut countdown = Countdown::until(t0 - Duration::minutes(3), t0);
        assert_eq!(countdown.remaining_seconds(), 0);
        assert_eq!(countdown.tick(t0), TickOutcome::Expired);
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_clock(3_725), "01:02:05");
        assert_eq!(format_clock(0), "00:00:00");
    }
}
