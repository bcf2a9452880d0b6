//! Error type shared by the driver and the plugin daemon.

use thiserror::Error;

/// Result alias used across the workspace.
pub type CinderliteResult<T> = Result<T, CinderliteError>;

/// Every failure a volume operation can surface.
///
/// The plugin protocol has no structured error codes, so each variant only
/// carries a message. The variant still matters inside the driver: callers
/// branch on `NotFound` (device not attached yet, volume gone after delete).
#[derive(Debug, Error)]
pub enum CinderliteError {
    /// Bad input: volume name without the configured prefix, unparsable option.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No volume with that name, or no local device with that serial.
    #[error("not found: {0}")]
    NotFound(String),

    /// More than one local device claims the same serial.
    #[error("ambiguous state: {0}")]
    Ambiguous(String),

    /// Operation conflicts with local state (removing a mounted volume, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bounded wait for remote convergence ran out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The control plane rejected or failed a request.
    #[error("remote API error: {0}")]
    RemoteApi(String),

    /// Syscalls, formatting tool, filesystem and permission changes.
    #[error("os error: {0}")]
    Os(String),

    /// Invalid startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CinderliteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CinderliteError::NotFound(_))
    }
}

impl From<std::io::Error> for CinderliteError {
    fn from(err: std::io::Error) -> Self {
        CinderliteError::Os(err.to_string())
    }
}

impl From<serde_json::Error> for CinderliteError {
    fn from(err: serde_json::Error) -> Self {
        CinderliteError::Internal(format!("json: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_message() {
        let err = CinderliteError::Conflict("volume is still mounted".to_string());
        assert_eq!(err.to_string(), "conflict: volume is still mounted");
    }

    #[test]
    fn test_io_error_maps_to_os() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CinderliteError = io.into();
        assert!(matches!(err, CinderliteError::Os(_)));
        assert!(!err.is_not_found());
    }
}
