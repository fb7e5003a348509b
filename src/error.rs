//! Error taxonomy for the detector server
//!
//! Five categories with different recovery scopes:
//! - `Protocol`/`Permission`: recovered locally, connection stays open
//! - `Resource`/`Hardware`: the active exposure unwinds to Idle and the
//!   initiator gets an ERR frame
//! - `Connection`: fatal to the affected worker only

use thiserror::Error;

/// Server-wide error type
#[derive(Debug, Error)]
pub enum CamError {
    /// Unrecognized or ambiguous command
    #[error("{0}")]
    Protocol(String),

    /// Non-controlling caller issued a privileged command
    #[error("access denied")]
    Permission,

    /// Disk full, bad path, open failure
    #[error("{0}")]
    Resource(String),

    /// Detector adapter call failed
    #[error("{0}")]
    Hardware(String),

    /// Peer closed, POLLHUP, zero-length read
    #[error("connection lost: {0}")]
    Connection(String),
}

impl CamError {
    /// Resource error from an I/O failure with path context
    pub fn resource(what: &str, err: std::io::Error) -> Self {
        CamError::Resource(format!("{}: {}", what, err))
    }
}

impl From<std::io::Error> for CamError {
    fn from(err: std::io::Error) -> Self {
        CamError::Resource(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_message() {
        assert_eq!(CamError::Permission.to_string(), "access denied");
    }

    #[test]
    fn test_resource_context() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = CamError::resource("/data/x.img", err);
        assert!(e.to_string().starts_with("/data/x.img: "));
    }
}
