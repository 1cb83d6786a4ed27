//! Power-limit control.
//!
//! A successful call only means the tool accepted the new limit. The change
//! shows up in `power_limit_watts` once the next sampler cycle completes;
//! nothing is read back here.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ControlError, InvocationError};
use crate::invoker::{CommandRunner, CommandSpec};

/// Supported power limits, in watts.
pub const POWER_LEVELS: [u32; 5] = [400, 450, 500, 550, 600];

// nvidia-smi exits with 4 on NVML_ERROR_NO_PERMISSION
const NO_PERMISSION_EXIT: i32 = 4;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ack {
    pub watts: u32,
    pub message: String,
}

pub struct PowerControl {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl PowerControl {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn levels(&self) -> &'static [u32] {
        &POWER_LEVELS
    }

    pub async fn set_power_limit(&self, watts: i64) -> Result<Ack, ControlError> {
        let watts = validate(watts)?;
        match self
            .runner
            .run(CommandSpec::SetPowerLimit { watts }, self.timeout)
            .await
        {
            Ok(_) => {
                info!("power limit set to {watts}W");
                Ok(Ack {
                    watts,
                    message: format!("Power limit set to {watts}W successfully"),
                })
            }
            Err(e) => {
                warn!("power limit {watts}W rejected: {e}");
                Err(classify(e))
            }
        }
    }
}

pub fn validate(watts: i64) -> Result<u32, ControlError> {
    POWER_LEVELS
        .iter()
        .copied()
        .find(|&w| i64::from(w) == watts)
        .ok_or_else(|| invalid_value(watts.to_string()))
}

/// Rejection for a requested wattage outside [`POWER_LEVELS`] or not a number.
pub fn invalid_value(value: impl Into<String>) -> ControlError {
    ControlError::InvalidValue {
        value: value.into(),
        allowed: POWER_LEVELS
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn classify(e: InvocationError) -> ControlError {
    if let InvocationError::ProcessFailed { exit_code, stderr, .. } = &e {
        let text = stderr.to_ascii_lowercase();
        let denied = *exit_code == Some(NO_PERMISSION_EXIT)
            || text.contains("insufficient permissions")
            || text.contains("permission denied")
            || text.contains("not permitted")
            || text.contains("requires root")
            || text.contains("administrator")
            || text.contains("a password is required");
        if denied {
            return ControlError::PermissionDenied {
                detail: stderr.clone(),
            };
        }
    }
    ControlError::InvocationFailed(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enumerated_levels_pass() {
        for w in POWER_LEVELS {
            assert_eq!(validate(i64::from(w)), Ok(w));
        }
        for w in [425, 399, 601, 0, -500, 5000] {
            assert!(matches!(validate(w), Err(ControlError::InvalidValue { .. })), "{w}");
        }
        let e = invalid_value("\"500\"");
        assert_eq!(e.kind(), "invalid_value");
        assert_eq!(e.to_string(), "\"500\" is not a supported power limit (allowed: 400, 450, 500, 550, 600 W)");
    }

    #[test]
    fn permission_failures_are_distinguished() {
        let denied = classify(InvocationError::ProcessFailed {
            exit_code: Some(4),
            stderr: "Changing power management limit is not supported".into(),
            stdout: String::new(),
        });
        assert_eq!(denied.kind(), "permission_denied");

        let denied_text = classify(InvocationError::ProcessFailed {
            exit_code: Some(1),
            stderr: "Insufficient Permissions for changing power limit".into(),
            stdout: String::new(),
        });
        assert_eq!(denied_text.kind(), "permission_denied");

        let generic = classify(InvocationError::ProcessFailed {
            exit_code: Some(2),
            stderr: "Invalid combination of input arguments".into(),
            stdout: String::new(),
        });
        assert_eq!(generic.kind(), "invocation_failed");

        let timeout = classify(InvocationError::Timeout { timeout_ms: 10 });
        assert_eq!(timeout.kind(), "invocation_failed");
    }
}
