//! Failure taxonomy for the uplink.
//!
//! None of these are fatal. The public operations collapse them into
//! booleans and status codes; the variants exist so the cause reaches the
//! log with enough context to tell a dead SIM from a dead tower.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("modem does not answer AT probes")]
    HardwareUnresponsive,

    #[error("SIM card not detected or unusable")]
    SimError,

    #[error("SIM card is PIN locked")]
    SimLocked,

    #[error("network registration timed out after {0:?}")]
    NetworkRegistrationTimeout(Duration),

    #[error("GPRS activation failed: {0}")]
    GprsActivationTimeout(&'static str),

    #[error("request throttled for another {remaining:?}")]
    Throttled { remaining: Duration },

    #[error("HTTP transport failure: {0}")]
    HttpTransportFailure(String),

    #[error("HTTP status {0}")]
    HttpProtocolError(u16),

    #[error("invalid JSON payload: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Failures the SIM itself causes; retrying the network will not help.
    pub fn is_sim_fault(&self) -> bool {
        matches!(self, LinkError::SimError | LinkError::SimLocked)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        LinkError::HttpTransportFailure(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_faults_are_classified() {
        assert!(LinkError::SimError.is_sim_fault());
        assert!(LinkError::SimLocked.is_sim_fault());
        assert!(!LinkError::HardwareUnresponsive.is_sim_fault());
        assert!(!LinkError::HttpProtocolError(500).is_sim_fault());
    }

    #[test]
    fn display_carries_context() {
        let err = LinkError::NetworkRegistrationTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "network registration timed out after 60s");
        assert_eq!(LinkError::HttpProtocolError(503).to_string(), "HTTP status 503");
        assert!(LinkError::transport("stalled").to_string().contains("stalled"));
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: LinkError = parse.into();
        assert!(matches!(err, LinkError::JsonParseError(_)));
    }
}
