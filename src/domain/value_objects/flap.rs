//! Flap scoring over per-check status history.
//!
//! Pure functions: history in, score out. No I/O.

/// Number of statuses retained per `(client, check)` pair.
pub const HISTORY_LENGTH: usize = 21;

/// Weighted total state change over the last [`HISTORY_LENGTH`] statuses,
/// in percent.
///
/// Transitions are weighted from 0.80 (oldest) up by 0.02 per position, so
/// the most recent of the 20 comparisons weighs 1.18. Returns 0 for any
/// history shorter than [`HISTORY_LENGTH`].
#[must_use]
pub fn total_state_change(history: &[i64]) -> u8 {
    if history.len() < HISTORY_LENGTH {
        return 0;
    }
    let window = &history[history.len() - HISTORY_LENGTH..];
    let mut change_weight = 0.80_f64;
    let mut state_changes = 0.0_f64;
    for pair in window.windows(2) {
        if pair[0] != pair[1] {
            state_changes += change_weight;
        }
        change_weight += 0.02;
    }
    // floor((sum / 20) * 100), capped at u8 range
    let score = (state_changes / 20.0 * 100.0).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let capped = score.clamp(0.0, f64::from(u8::MAX)) as u8;
    capped
}

/// Flap hysteresis: latches on when the change score reaches `high`, clears
/// only once it has fallen to `low` or below.
///
/// Without both thresholds the check never flaps.
#[must_use]
pub fn is_flapping(
    previously_flapping: bool,
    total_change: u8,
    low_threshold: Option<u8>,
    high_threshold: Option<u8>,
) -> bool {
    match (low_threshold, high_threshold) {
        (Some(low), Some(high)) => {
            if total_change >= high {
                true
            } else if previously_flapping && total_change <= low {
                false
            } else {
                previously_flapping
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_history_scores_zero() {
        let twenty: Vec<i64> = (0..20).map(|i| i % 2).collect();
        assert_eq!(total_state_change(&twenty), 0);
    }

    #[test]
    fn steady_history_scores_zero() {
        let steady = vec![0_i64; HISTORY_LENGTH];
        assert_eq!(total_state_change(&steady), 0);
    }

    #[test]
    fn perfect_alternation_scores_ninety_nine() {
        // 21 entries alternating 0/2: all 20 comparisons are transitions,
        // sum of weights 0.80..1.18 = 19.8 -> floor(19.8 / 20 * 100) = 99
        let alternating: Vec<i64> = (0..HISTORY_LENGTH as i64).map(|i| (i % 2) * 2).collect();
        assert_eq!(total_state_change(&alternating), 99);
    }

    #[test]
    fn single_recent_transition_uses_heaviest_weight() {
        // only the last comparison differs: weight 1.18 -> floor(1.18/20*100) = 5
        let mut history = vec![0_i64; HISTORY_LENGTH];
        history[HISTORY_LENGTH - 1] = 2;
        assert_eq!(total_state_change(&history), 5);
    }

    #[test]
    fn single_oldest_transition_uses_lightest_weight() {
        // only the first comparison differs: weight 0.80 -> floor(0.80/20*100) = 4
        let mut history = vec![0_i64; HISTORY_LENGTH];
        history[0] = 2;
        assert_eq!(total_state_change(&history), 4);
    }

    #[test]
    fn longer_history_scores_last_window_only() {
        let mut history = vec![9_i64; 5];
        history.extend(std::iter::repeat(0).take(HISTORY_LENGTH));
        assert_eq!(total_state_change(&history), 0);
    }

    #[test]
    fn hysteresis_latches_at_high() {
        assert!(is_flapping(false, 50, Some(5), Some(50)));
        assert!(is_flapping(false, 99, Some(5), Some(50)));
    }

    #[test]
    fn hysteresis_holds_between_thresholds() {
        assert!(is_flapping(true, 30, Some(5), Some(50)));
        assert!(!is_flapping(false, 30, Some(5), Some(50)));
    }

    #[test]
    fn hysteresis_clears_at_low() {
        assert!(!is_flapping(true, 5, Some(5), Some(50)));
        assert!(!is_flapping(true, 0, Some(5), Some(50)));
    }

    #[test]
    fn missing_thresholds_never_flap() {
        assert!(!is_flapping(true, 100, None, Some(50)));
        assert!(!is_flapping(true, 100, Some(5), None));
        assert!(!is_flapping(false, 100, None, None));
    }
}
