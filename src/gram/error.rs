//! Gram protocol error types.

use std::fmt;
use std::io;

use super::value::WireError;

/// Result type for Gram operations.
pub type GramResult<T> = Result<T, GramError>;

/// Gram protocol errors.
#[derive(Debug)]
pub enum GramError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// Wire serialization error
    Wire(WireError),

    /// Protocol error (invalid message format, out-of-order response, etc.)
    Protocol(String),

    /// Connection error
    Connection(String),

    /// Message too large
    MessageTooLarge { size: usize, max: usize },

    /// Connection closed
    ConnectionClosed,
}

impl fmt::Display for GramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GramError::Io(e) => write!(f, "I/O error: {}", e),
            GramError::Handshake(e) => write!(f, "Handshake error: {}", e),
            GramError::Wire(e) => write!(f, "Wire error: {}", e),
            GramError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            GramError::Connection(msg) => write!(f, "Connection error: {}", msg),
            GramError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            GramError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for GramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GramError::Io(e) => Some(e),
            GramError::Handshake(e) => Some(e),
            GramError::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GramError {
    fn from(err: io::Error) -> Self {
        GramError::Io(err)
    }
}

impl From<HandshakeError> for GramError {
    fn from(err: HandshakeError) -> Self {
        GramError::Handshake(err)
    }
}

impl From<WireError> for GramError {
    fn from(err: WireError) -> Self {
        GramError::Wire(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// No compatible protocol version found
    NoCompatibleVersion,

    /// Server answered with a version number outside the known set
    UnknownVersion(u32),

    /// Server answered with a version the client never proposed
    UnsolicitedVersion(u32),

    /// Connection closed during handshake
    ConnectionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::NoCompatibleVersion => {
                write!(f, "Server does not support any proposed Gram version")
            }
            HandshakeError::UnknownVersion(v) => {
                write!(f, "Server selected unknown version: 0x{:08X}", v)
            }
            HandshakeError::UnsolicitedVersion(v) => {
                write!(f, "Server selected a version that was not proposed: 0x{:08X}", v)
            }
            HandshakeError::ConnectionClosed => {
                write!(f, "Connection closed during handshake")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Gram 프로토콜 에러 코드 상수
///
/// 서버가 FAILURE 메타데이터로 보고하는 상태 코드입니다.
pub struct GramErrorCode;

impl GramErrorCode {
    // Client errors
    pub const AUTHENTICATION_FAILED: &'static str =
        "Nerva.ClientError.Security.AuthenticationFailed";
    pub const UNAUTHORIZED: &'static str = "Nerva.ClientError.Security.Unauthorized";
    pub const SYNTAX_ERROR: &'static str = "Nerva.ClientError.Statement.SyntaxError";
    pub const INVALID_REQUEST: &'static str = "Nerva.ClientError.Request.Invalid";
    pub const NOT_A_LEADER: &'static str = "Nerva.ClientError.Cluster.NotALeader";
    pub const FORBIDDEN_READ_ONLY: &'static str =
        "Nerva.ClientError.General.ForbiddenOnReadOnlyDatabase";
    pub const DATABASE_NOT_FOUND: &'static str =
        "Nerva.ClientError.Database.DatabaseNotFound";

    // Database errors
    pub const GENERAL_ERROR: &'static str = "Nerva.DatabaseError.General.UnknownError";

    // Transient errors (retry may succeed)
    pub const TRANSACTION_TIMEOUT: &'static str =
        "Nerva.TransientError.Transaction.TransactionTimedOut";
    pub const DEADLOCK_DETECTED: &'static str =
        "Nerva.TransientError.Transaction.DeadlockDetected";
    pub const DATABASE_UNAVAILABLE: &'static str =
        "Nerva.TransientError.General.DatabaseUnavailable";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_display() {
        let err = HandshakeError::NoCompatibleVersion;
        assert!(err.to_string().contains("any proposed"));

        let err = HandshakeError::UnknownVersion(0x0009_0000);
        assert!(err.to_string().contains("0x00090000"));
    }

    #[test]
    fn test_gram_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let gram_err: GramError = io_err.into();
        assert!(matches!(gram_err, GramError::Io(_)));
    }

    #[test]
    fn test_gram_error_from_handshake() {
        let hs_err = HandshakeError::NoCompatibleVersion;
        let gram_err: GramError = hs_err.into();
        assert!(matches!(gram_err, GramError::Handshake(_)));
    }

    #[test]
    fn test_error_codes() {
        assert!(GramErrorCode::SYNTAX_ERROR.starts_with("Nerva.ClientError"));
        assert!(GramErrorCode::DEADLOCK_DETECTED.starts_with("Nerva.TransientError"));
        assert!(GramErrorCode::GENERAL_ERROR.starts_with("Nerva.DatabaseError"));
    }
}
