use std::time::Duration;

use thiserror::Error;

use crate::router::RouterError;

/// Failure taxonomy of a harness run.
///
/// Cancellation is deliberately absent: an interrupt routes the run through
/// the same teardown-and-verify path as normal completion, and only shows up
/// here as a `DeliveryMismatch` if the counts differ at that point.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Device or signal allocation failed during setup. Fatal; the exchange
    /// loop never runs.
    #[error("failed to initialize {endpoint}: {reason}")]
    Creation {
        endpoint: &'static str,
        #[source]
        reason: RouterError,
    },

    /// The map did not become ready within the bounded polling attempts.
    #[error("map not ready after {attempts} polling attempts")]
    MapTimeout { attempts: u32 },

    /// Devices did not become ready within the opt-in readiness bound.
    #[error("devices not ready within {timeout:?}")]
    ReadinessTimeout { timeout: Duration },

    /// Terminal sent/received reconciliation failed.
    #[error("updated value {sent} times, but received {received} of them")]
    DeliveryMismatch { sent: u64, received: u64 },

    /// Routing-service fault outside the setup phase.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Maps a run outcome to the process exit code: 0 pass, 1 any failure.
pub fn exit_code<T>(outcome: &Result<T, HarnessError>) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_pass_and_fail() {
        assert_eq!(exit_code(&Ok::<_, HarnessError>(())), 0);
        assert_eq!(
            exit_code::<()>(&Err(HarnessError::DeliveryMismatch { sent: 5, received: 3 })),
            1
        );
        assert_eq!(
            exit_code::<()>(&Err(HarnessError::MapTimeout { attempts: 100 })),
            1
        );
    }

    #[test]
    fn mismatch_reports_both_counts() {
        let err = HarnessError::DeliveryMismatch { sent: 50, received: 0 };
        let msg = err.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains('0'));
    }
}
