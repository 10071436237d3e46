//! Confidence in a generated atom and the review priority it implies

const GUARD_INJECTION_DISCOUNT: f64 = 0.95;

/// `0.6 × levels/4 + 0.2 × atomicity + 0.2 × (1 − (attempts−1)/max)`,
/// discounted when a guard had to be injected
#[must_use]
pub fn confidence(
    levels_passed: usize,
    atomicity_score: f64,
    attempts: u32,
    max_attempts: u32,
    guard_injected: bool,
) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let levels = levels_passed.min(4) as f64 / 4.0;
    let retries = f64::from(attempts.saturating_sub(1)) / f64::from(max_attempts.max(1));
    let mut value = 0.6 * levels + 0.2 * atomicity_score.clamp(0.0, 1.0) + 0.2 * (1.0 - retries).max(0.0);
    if guard_injected {
        value *= GUARD_INJECTION_DISCOUNT;
    }
    value.clamp(0.0, 1.0)
}

/// Lower confidence, higher priority (1 is most urgent)
#[must_use]
pub fn review_priority(confidence: f64) -> u8 {
    match confidence {
        c if c < 0.3 => 1,
        c if c < 0.5 => 2,
        c if c < 0.7 => 3,
        c if c < 0.85 => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_perfect_atom_is_fully_confident() {
        assert!((confidence(4, 1.0, 1, 3, false) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retries_and_injection_lower_confidence() {
        let later = confidence(4, 1.0, 3, 3, false);
        assert!((later - (0.6 + 0.2 + 0.2 * (1.0 / 3.0))).abs() < 1e-9);
        let injected = confidence(4, 1.0, 1, 3, true);
        assert!((injected - 0.95).abs() < 1e-9);
        assert!(confidence(0, 0.0, 9, 3, true) >= 0.0);
    }

    #[test]
    fn priority_bands() {
        assert_eq!(review_priority(0.1), 1);
        assert_eq!(review_priority(0.45), 2);
        assert_eq!(review_priority(0.69), 3);
        assert_eq!(review_priority(0.8), 4);
        assert_eq!(review_priority(0.99), 5);
    }
}
