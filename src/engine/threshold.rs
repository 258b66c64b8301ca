//! Time-decaying gain threshold
//!
//! The required gain starts at `when_gain` percent and drops by `decrease_by` for every whole
//! `after` interval elapsed since the last rotation, never going below `min`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::config::types::JumpConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct GainThreshold {
    when_gain: Decimal,
    decrease_by: Decimal,
    after: Duration,
    min: Decimal,
}

impl GainThreshold {
    pub fn new(when_gain: Decimal, decrease_by: Decimal, after: Duration, min: Decimal) -> Self {
        Self {
            when_gain,
            decrease_by,
            after,
            min,
        }
    }

    pub fn from_config(config: &JumpConfig) -> Self {
        Self::new(config.when_gain, config.decrease_by, config.after(), config.min)
    }

    /// Number of whole intervals strictly contained in `elapsed`
    fn elapsed_steps(&self, elapsed: Duration) -> i64 {
        let elapsed_us = elapsed.num_microseconds().unwrap_or(i64::MAX);
        let after_us = self.after.num_microseconds().unwrap_or(i64::MAX);
        if elapsed_us <= 0 || after_us <= 0 {
            return 0;
        }
        (elapsed_us - 1) / after_us
    }

    /// Required gain as a fraction (0.01 for 1 %)
    pub fn needed_gain(&self, elapsed: Duration) -> Decimal {
        let steps = self.elapsed_steps(elapsed);
        let mut gain = self.when_gain;
        if steps > 0 {
            gain = self
                .decrease_by
                .checked_mul(Decimal::from(steps))
                .and_then(|decrease| gain.checked_sub(decrease))
                .unwrap_or(self.min);
            if gain <= self.min {
                gain = self.min;
            }
        }
        gain / Decimal::ONE_HUNDRED
    }

    /// Minimum diff a pair needs to qualify: `1 + needed_gain`
    pub fn wanted_diff(&self, last_jump: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
        Decimal::ONE + self.needed_gain(now - last_jump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn threshold(when: Decimal, decrease: Decimal, after_secs: i64, min: Decimal) -> GainThreshold {
        GainThreshold::new(when, decrease, Duration::seconds(after_secs), min)
    }

    #[test]
    fn test_one_interval_elapsed() {
        let t = threshold(dec!(1), dec!(0.5), 60, dec!(0.1));
        assert_eq!(t.needed_gain(Duration::seconds(65)), dec!(0.005));
        assert_eq!(t.needed_gain(Duration::seconds(1)), dec!(0.01));
    }

    #[test]
    fn test_partial_intervals_do_not_count() {
        let t = threshold(dec!(1), dec!(0.3), 120, dec!(0.1));
        assert_eq!(t.needed_gain(Duration::seconds(180)), dec!(0.007));

        let t = threshold(dec!(1), dec!(0.2), 120, dec!(0.1));
        assert_eq!(t.needed_gain(Duration::seconds(300)), dec!(0.006));
    }

    #[test]
    fn test_exact_multiple_is_not_fully_elapsed() {
        let t = threshold(dec!(1), dec!(0.5), 60, dec!(0.1));
        assert_eq!(t.needed_gain(Duration::seconds(60)), dec!(0.01));
        assert_eq!(t.needed_gain(Duration::milliseconds(60_001)), dec!(0.005));
    }

    #[test]
    fn test_clamps_at_floor() {
        let t = threshold(dec!(1), dec!(0.2), 120, dec!(0.1));
        assert_eq!(t.needed_gain(Duration::seconds(3600)), dec!(0.001));

        let t = threshold(dec!(1), dec!(0.2), 120, dec!(1));
        assert_eq!(t.needed_gain(Duration::seconds(3600)), dec!(0.01));
    }

    #[test]
    fn test_non_increasing_and_above_floor() {
        let t = threshold(dec!(2), dec!(0.3), 60, dec!(0.4));
        let mut previous = t.needed_gain(Duration::zero());
        for secs in (0..7200).step_by(17) {
            let gain = t.needed_gain(Duration::seconds(secs));
            assert!(gain <= previous);
            assert!(gain >= dec!(0.004));
            previous = gain;
        }
    }

    #[test]
    fn test_future_reference_uses_base_gain() {
        let t = threshold(dec!(2), dec!(0.1), 3600, dec!(0.5));
        let now = Utc::now();
        assert_eq!(t.wanted_diff(now + Duration::hours(1), now), dec!(1.02));
    }
}
