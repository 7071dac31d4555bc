use serde::{Deserialize, Serialize};

use super::session::Attempt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub requested: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub success_rate: f64,
}

impl Summary {
    pub fn from_attempts(requested: u32, attempts: &[Attempt]) -> Self {
        let succeeded = attempts
            .iter()
            .filter(|attempt| attempt.succeeded())
            .count() as u32;
        let failed = requested.saturating_sub(succeeded);
        let success_rate = if requested == 0 {
            0.0
        } else {
            f64::from(succeeded) / f64::from(requested) * 100.0
        };
        Self {
            requested,
            succeeded,
            failed,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Summary;
    use crate::runs::session::{Attempt, AttemptOutcome};

    fn failure(index: u32) -> Attempt {
        Attempt {
            index,
            outcome: AttemptOutcome::Failure {
                error: "out of memory".to_string(),
                failed_at: "2026-10-19T00:00:00+00:00".to_string(),
            },
        }
    }

    #[test]
    fn summary_counts_failures_and_rate() {
        let attempts = vec![failure(1), failure(2)];
        let summary = Summary::from_attempts(2, &attempts);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn zero_requested_has_zero_rate() {
        let summary = Summary::from_attempts(0, &[]);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.succeeded + summary.failed, 0);
    }
}
