//! Timing validation for user-supplied phase overrides.

use crate::{Technique, TimingMap};

/// Fallback phase length in seconds when a phase has no timing at all
pub const FALLBACK_PHASE_SECONDS: f64 = 4.0;

/// Produce the effective timing for a technique
///
/// Every phase declared in the technique's default timing gets the override
/// value when it is a finite number within `[min, max]`, otherwise the
/// default. Override keys the technique does not declare are ignored.
pub fn validate_timing(technique: &Technique, overrides: &TimingMap) -> TimingMap {
    technique
        .default_timing
        .iter()
        .map(|(phase, &default)| {
            let value = match (
                overrides.get(phase),
                technique.min_timing.get(phase),
                technique.max_timing.get(phase),
            ) {
                (Some(&value), Some(&min), Some(&max))
                    if value.is_finite() && value >= min && value <= max =>
                {
                    value
                }
                (Some(&value), _, _) => {
                    tracing::debug!(
                        "Ignoring out-of-range timing {}={} for {}",
                        phase,
                        value,
                        technique.id
                    );
                    default
                }
                _ => default,
            };
            (phase.clone(), value)
        })
        .collect()
}

/// Seconds for one phase under a validated timing map
///
/// Falls back to the inhale timing, then to [`FALLBACK_PHASE_SECONDS`].
pub fn phase_seconds(timing: &TimingMap, phase: &str) -> f64 {
    timing
        .get(phase)
        .or_else(|| timing.get("inhale"))
        .copied()
        .filter(|secs| *secs > 0.0)
        .unwrap_or(FALLBACK_PHASE_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{list_all, lookup};

    #[test]
    fn test_empty_override_returns_defaults() {
        for technique in list_all() {
            assert_eq!(
                validate_timing(technique, &TimingMap::new()),
                technique.default_timing,
                "{}",
                technique.id
            );
        }
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        for technique in list_all() {
            for phase in technique.default_timing.keys() {
                let min = technique.min_timing[phase];
                let max = technique.max_timing[phase];

                for bad in [min - 0.5, max + 0.5, f64::NAN, f64::INFINITY] {
                    let overrides = TimingMap::from([(phase.clone(), bad)]);
                    let timing = validate_timing(technique, &overrides);
                    assert_eq!(timing[phase], technique.default_timing[phase]);
                }

                for good in [min, max, (min + max) / 2.0] {
                    let overrides = TimingMap::from([(phase.clone(), good)]);
                    let timing = validate_timing(technique, &overrides);
                    assert_eq!(timing[phase], good);
                }
            }
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let box_breathing = lookup("box");
        let overrides = TimingMap::from([
            ("retention".to_string(), 90.0),
            ("inhale".to_string(), 6.0),
        ]);

        let timing = validate_timing(box_breathing, &overrides);

        assert_eq!(timing.len(), 4);
        assert!(!timing.contains_key("retention"));
        assert_eq!(timing["inhale"], 6.0);
        assert_eq!(timing["exhale"], 4.0);
    }

    #[test]
    fn test_phase_seconds_fallbacks() {
        let timing = TimingMap::from([("inhale".to_string(), 5.0)]);
        assert_eq!(phase_seconds(&timing, "inhale"), 5.0);
        assert_eq!(phase_seconds(&timing, "hold"), 5.0);
        assert_eq!(phase_seconds(&TimingMap::new(), "hold"), 4.0);
    }
}
