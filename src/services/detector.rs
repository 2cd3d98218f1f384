use crate::models::config::AnomalyConfig;
use crate::models::error::ScanError;
use crate::models::metrics::{AnomalyVerdict, TrafficSample};

/// Stateless traffic classifier. History is supplied by the caller on
/// every call, so identical inputs always produce identical verdicts.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Classify `current` against a rolling baseline over the trailing
    /// window of `history`. History must be time-ascending.
    pub fn classify(
        &self,
        history: &[TrafficSample],
        current: &TrafficSample,
    ) -> Result<AnomalyVerdict, ScanError> {
        for pair in history.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(ScanError::InvalidSample(
                    "history timestamps are not ascending".to_string(),
                ));
            }
        }

        // The ceiling is an absolute threshold and needs no baseline, so
        // it applies even when history is too short for statistics
        let ceiling_hit = current.connection_count > self.config.connection_ceiling;

        let start = history.len().saturating_sub(self.config.window_size);
        let window = &history[start..];

        if window.len() < 2 {
            return Ok(AnomalyVerdict {
                sample_timestamp: current.timestamp,
                is_anomalous: ceiling_hit,
                score: 0.0,
                reason: Some(
                    if ceiling_hit {
                        "connection-ceiling"
                    } else {
                        "insufficient-history"
                    }
                    .to_string(),
                ),
            });
        }

        let (in_mean, in_std) = mean_std(window.iter().map(|s| s.bytes_in as f64));
        let (out_mean, out_std) = mean_std(window.iter().map(|s| s.bytes_out as f64));
        let (conn_mean, conn_std) = mean_std(window.iter().map(|s| s.connection_count as f64));

        let in_dev = sigma_deviation(current.bytes_in as f64, in_mean, in_std);
        let out_dev = sigma_deviation(current.bytes_out as f64, out_mean, out_std);
        let conn_dev = sigma_deviation(current.connection_count as f64, conn_mean, conn_std);

        let threshold = self.config.sigma_threshold;

        // Reason priority: ceiling first, then outbound, then inbound
        let mut triggers = Vec::new();
        if ceiling_hit {
            triggers.push("connection-ceiling");
        }
        if out_dev > threshold {
            triggers.push("bytes_out");
        }
        if in_dev > threshold {
            triggers.push("bytes_in");
        }
        if conn_dev > threshold {
            triggers.push("connection_count");
        }

        let score = in_dev.max(out_dev).max(conn_dev);
        let is_anomalous = !triggers.is_empty();
        let reason = if triggers.is_empty() {
            None
        } else {
            Some(triggers.join(","))
        };

        Ok(AnomalyVerdict {
            sample_timestamp: current.timestamp,
            is_anomalous,
            score,
            reason,
        })
    }
}

fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Normalized distance from the baseline mean. A flat baseline (zero
/// std) yields zero for an exact match and saturates otherwise.
fn sigma_deviation(value: f64, mean: f64, std: f64) -> f64 {
    if std > 0.0 {
        (value - mean).abs() / std
    } else if (value - mean).abs() < f64::EPSILON {
        0.0
    } else {
        f64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(offset_secs: i64, bytes_in: u64, bytes_out: u64, connection_count: u64) -> TrafficSample {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        TrafficSample {
            timestamp: base + Duration::seconds(offset_secs),
            bytes_in,
            bytes_out,
            connection_count,
        }
    }

    fn flat_history(n: i64) -> Vec<TrafficSample> {
        (0..n).map(|i| sample(i, 1000, 1000, 5)).collect()
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    #[test]
    fn quiet_baseline_quiet_sample_is_normal() {
        let history = flat_history(10);
        let current = sample(10, 1000, 1000, 5);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(!verdict.is_anomalous);
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn inbound_spike_on_flat_baseline_is_anomalous() {
        let history = flat_history(10);
        let current = sample(10, 50000, 1000, 5);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(verdict.is_anomalous);
        assert!(verdict.reason.unwrap().contains("bytes_in"));
    }

    #[test]
    fn spike_against_noisy_baseline_uses_sigma_rule() {
        // Small real variance so the deviation path (not saturation) runs
        let history: Vec<TrafficSample> = (0..20)
            .map(|i| sample(i, 1000 + (i % 2) as u64 * 20, 1000, 5))
            .collect();
        let current = sample(20, 5000, 1000, 5);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(verdict.is_anomalous);
        assert!(verdict.score > 3.0);
        assert_eq!(verdict.reason.as_deref(), Some("bytes_in"));
    }

    #[test]
    fn insufficient_history_suppresses_deviation_rules() {
        // Extreme byte counts cannot trip the sigma rules without a
        // baseline; only the ceiling rule survives short history
        let history = flat_history(1);
        let current = sample(1, u64::MAX, u64::MAX, 5);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(!verdict.is_anomalous);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.reason.as_deref(), Some("insufficient-history"));
    }

    #[test]
    fn connection_ceiling_applies_without_history() {
        let current = sample(0, 1000, 1000, 100_000);

        let verdict = detector().classify(&[], &current).unwrap();
        assert!(verdict.is_anomalous);
        assert_eq!(verdict.reason.as_deref(), Some("connection-ceiling"));

        let verdict = detector()
            .classify(&flat_history(1), &current)
            .unwrap();
        assert!(verdict.is_anomalous);
        assert_eq!(verdict.reason.as_deref(), Some("connection-ceiling"));
    }

    #[test]
    fn connection_ceiling_overrides_quiet_baseline() {
        let history = flat_history(10);
        // Connection count matching the ceiling+1 but identical bytes
        let current = sample(10, 1000, 1000, 501);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(verdict.is_anomalous);
        assert!(verdict.reason.unwrap().starts_with("connection-ceiling"));
    }

    #[test]
    fn reason_lists_triggers_in_priority_order() {
        let history = flat_history(10);
        let current = sample(10, 9000, 9000, 600);

        let verdict = detector().classify(&history, &current).unwrap();
        let reason = verdict.reason.unwrap();
        let order: Vec<&str> = reason.split(',').collect();
        assert_eq!(
            &order[..3],
            &["connection-ceiling", "bytes_out", "bytes_in"]
        );
    }

    #[test]
    fn classify_is_deterministic() {
        let history = flat_history(10);
        let current = sample(10, 2000, 1500, 7);

        let d = detector();
        let first = d.classify(&history, &current).unwrap();
        let second = d.classify(&history, &current).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_non_monotonic_history() {
        let mut history = flat_history(5);
        history.swap(1, 3);
        let current = sample(5, 1000, 1000, 5);

        let err = detector().classify(&history, &current).unwrap_err();
        assert!(matches!(err, ScanError::InvalidSample(_)));
    }

    #[test]
    fn baseline_uses_only_trailing_window() {
        // Old huge values fall outside the 20-sample window and must not
        // inflate the baseline
        let mut history: Vec<TrafficSample> = (0..5)
            .map(|i| sample(i, 1_000_000, 1_000_000, 5))
            .collect();
        history.extend((5..25).map(|i| sample(i, 1000, 1000, 5)));
        let current = sample(25, 50000, 1000, 5);

        let verdict = detector().classify(&history, &current).unwrap();
        assert!(verdict.is_anomalous);
    }
}
