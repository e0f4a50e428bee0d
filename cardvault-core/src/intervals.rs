//! Pure interval arithmetic for the scheduler. Everything here works on
//! plain numbers so it can be tested without a collection.

use crate::{Card, Ease, SchedConfig, FACTOR_MIN};
use rand::Rng;

/// Ideal next interval in days for a review card answered with `ease`,
/// before fuzz. `days_late` credits overdue time the way the review
/// curve expects: a quarter of it on Hard, half on Good, all of it on
/// Easy.
pub fn next_review_interval(card: &Card, ease: Ease, days_late: i64, cfg: &SchedConfig) -> i32 {
    let factor = card.factor.max(FACTOR_MIN) as f32 / 1000.0;
    let ivl = card.interval.max(1) as f32;
    let late = days_late.max(0) as f32;

    let ideal = match ease {
        // Lapses are handled by `lapse_interval`.
        Ease::Again => return lapse_interval(card, cfg),
        Ease::Hard => (ivl + late / 4.0) * cfg.hard_multiplier,
        Ease::Good => (ivl + late / 2.0) * factor,
        Ease::Easy => (ivl + late) * factor * cfg.easy_bonus,
    };

    // Each grade must land at least one day beyond the previous interval,
    // two for Easy, so successive answers always make forward progress.
    let floor = card.interval + if ease == Ease::Easy { 2 } else { 1 };
    (ideal as i32).max(floor).min(cfg.max_interval)
}

/// Interval after a lapse: a configurable fraction of the previous
/// interval, never below the configured minimum.
pub fn lapse_interval(card: &Card, cfg: &SchedConfig) -> i32 {
    ((card.interval as f32 * cfg.lapse_multiplier) as i32)
        .max(cfg.min_lapse_interval)
        .min(cfg.max_interval)
}

/// Factor adjustment per grade, clamped to the permille floor.
pub fn updated_factor(factor: u32, ease: Ease) -> u32 {
    let delta: i64 = match ease {
        Ease::Again => -200,
        Ease::Hard => -150,
        Ease::Good => 0,
        Ease::Easy => 150,
    };
    (factor as i64 + delta).max(FACTOR_MIN as i64) as u32
}

/// Inclusive bounds the fuzzed interval may fall in. Short intervals get
/// no fuzz at all; longer ones a span proportional to the interval with a
/// one-day minimum, so siblings scheduled together do not clump onto the
/// same day forever.
pub fn fuzz_bounds(interval: i32, span: f32) -> (i32, i32) {
    if interval < 3 || span <= 0.0 {
        return (interval, interval);
    }
    let fuzz = ((interval as f32 * span) as i32).max(1);
    ((interval - fuzz).max(1), interval + fuzz)
}

/// Pick a fuzzed interval within `fuzz_bounds`.
pub fn fuzzed_interval(interval: i32, cfg: &SchedConfig) -> i32 {
    let (lo, hi) = fuzz_bounds(interval, cfg.fuzz_span);
    if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi).min(cfg.max_interval)
    }
}

/// Seconds until a learning card is due again for the given remaining
/// step count.
pub fn learn_step_delay_secs(steps_mins: &[u32], steps_left: u32) -> i64 {
    let idx = steps_mins
        .len()
        .saturating_sub(steps_left.max(1) as usize)
        .min(steps_mins.len().saturating_sub(1));
    steps_mins.get(idx).copied().unwrap_or(1) as i64 * 60
}

/// Leech check: true at the threshold and at every half-threshold worth
/// of further lapses, so a chronically failing card keeps resurfacing.
pub fn is_leech(lapses: u32, threshold: u32) -> bool {
    if threshold == 0 || lapses < threshold {
        return false;
    }
    (lapses - threshold) % (threshold / 2).max(1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CardType;

    fn review_card(interval: i32, factor: u32) -> Card {
        let mut c = Card::new(1, 1, 0, 0);
        c.ctype = CardType::Review;
        c.interval = interval;
        c.factor = factor;
        c
    }

    #[test]
    fn good_multiplies_by_factor() {
        let c = review_card(10, 2500);
        let cfg = SchedConfig::default();
        assert_eq!(next_review_interval(&c, Ease::Good, 0, &cfg), 25);
    }

    #[test]
    fn hard_uses_hard_multiplier() {
        let c = review_card(10, 2500);
        let cfg = SchedConfig::default();
        assert_eq!(next_review_interval(&c, Ease::Hard, 0, &cfg), 12);
    }

    #[test]
    fn easy_applies_bonus_and_two_day_floor() {
        let c = review_card(1, 1300);
        let cfg = SchedConfig::default();
        let ivl = next_review_interval(&c, Ease::Easy, 0, &cfg);
        assert!(ivl >= c.interval + 2);
    }

    #[test]
    fn overdue_time_is_credited() {
        let c = review_card(10, 2500);
        let cfg = SchedConfig::default();
        let on_time = next_review_interval(&c, Ease::Good, 0, &cfg);
        let late = next_review_interval(&c, Ease::Good, 8, &cfg);
        assert!(late > on_time);
    }

    #[test]
    fn lapse_respects_minimum() {
        let c = review_card(30, 2500);
        let cfg = SchedConfig::default();
        assert_eq!(lapse_interval(&c, &cfg), 1);
        let mut cfg2 = cfg.clone();
        cfg2.lapse_multiplier = 0.5;
        assert_eq!(lapse_interval(&c, &cfg2), 15);
    }

    #[test]
    fn factor_floor_holds() {
        assert_eq!(updated_factor(1300, Ease::Again), 1300);
        assert_eq!(updated_factor(2500, Ease::Hard), 2350);
        assert_eq!(updated_factor(2500, Ease::Easy), 2650);
    }

    #[test]
    fn fuzz_bounds_short_intervals_untouched() {
        assert_eq!(fuzz_bounds(1, 0.05), (1, 1));
        assert_eq!(fuzz_bounds(2, 0.05), (2, 2));
        let (lo, hi) = fuzz_bounds(100, 0.05);
        assert_eq!((lo, hi), (95, 105));
    }

    #[test]
    fn fuzzed_interval_stays_in_bounds() {
        let cfg = SchedConfig::default();
        for _ in 0..50 {
            let ivl = fuzzed_interval(20, &cfg);
            let (lo, hi) = fuzz_bounds(20, cfg.fuzz_span);
            assert!(ivl >= lo && ivl <= hi);
        }
    }

    #[test]
    fn leech_fires_at_threshold_and_half_steps() {
        assert!(!is_leech(7, 8));
        assert!(is_leech(8, 8));
        assert!(!is_leech(9, 8));
        assert!(is_leech(12, 8));
        assert!(!is_leech(100, 0));
    }

    #[test]
    fn learn_steps_walk_forward() {
        let steps = vec![1, 10];
        assert_eq!(learn_step_delay_secs(&steps, 2), 60);
        assert_eq!(learn_step_delay_secs(&steps, 1), 600);
    }
}
