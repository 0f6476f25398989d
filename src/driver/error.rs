//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::io;
use thiserror::Error;

use crate::gram::{FailureMessage, GramError};

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 신뢰할 수 없는 서버 (핸드셰이크 메타데이터 누락)
    #[error("Untrusted server: {0}")]
    UntrustedServer(String),

    /// 프로토콜 에러 (채널 폐기 대상)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 세션 에러
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 에러
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 로컬 사용 계약 위반 (닫힌 풀 사용, 이중 반환 등)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// 협상된 버전에서 지원하지 않는 기능
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 서비스 불가 (도달 가능한 주소 없음)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 토폴로지 변경으로 세션 만료
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 서버 에러
    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 신뢰할 수 없는 서버 에러 생성
    pub fn untrusted_server(msg: impl Into<String>) -> Self {
        Self::UntrustedServer(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 계약 위반 에러 생성
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// 미지원 기능 에러 생성
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 기본 분류표 기준 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        TransientCodes::default().classify(self)
    }

    /// 클라이언트(로컬) 에러 여부 - 네트워크 왕복 없이 즉시 실패한 에러
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_)
                | Self::Unsupported(_)
                | Self::Configuration(_)
                | Self::Transaction(_)
        )
    }

    /// 채널을 폐기해야 하는 치명적 에러 여부
    pub fn is_fatal_for_channel(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Connection(_) | Self::UntrustedServer(_) | Self::Io(_)
        )
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<GramError> for DriverError {
    fn from(err: GramError) -> Self {
        match err {
            GramError::Io(e) => DriverError::Connection(e.to_string()),
            GramError::Handshake(e) => DriverError::Protocol(format!("Handshake: {}", e)),
            GramError::Wire(e) => DriverError::Protocol(format!("Wire: {}", e)),
            GramError::Protocol(msg) => DriverError::Protocol(msg),
            GramError::Connection(msg) => DriverError::Connection(msg),
            GramError::MessageTooLarge { size, max } => DriverError::Protocol(format!(
                "Message too large: {} bytes (max: {})",
                size, max
            )),
            GramError::ConnectionClosed => {
                DriverError::Connection("Connection closed".to_string())
            }
        }
    }
}

impl From<FailureMessage> for DriverError {
    fn from(failure: FailureMessage) -> Self {
        if failure.is_security_error() {
            DriverError::Authentication(failure.message)
        } else {
            DriverError::Server {
                code: failure.code,
                message: failure.message,
            }
        }
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// TransientCodes - 일시적 서버 에러 코드 분류표
// ============================================================================

/// 재시도 가능한 서버 상태 코드 분류표
///
/// 코드 목록은 데이터이지 구조가 아니므로 주입 가능하게 유지합니다.
#[derive(Debug, Clone)]
pub struct TransientCodes {
    /// 접두사 일치 (예: "Nerva.TransientError")
    pub prefixes: Vec<String>,
    /// 정확히 일치하는 코드
    pub codes: Vec<String>,
}

impl TransientCodes {
    /// 코드가 일시적 에러로 분류되는지 확인
    pub fn matches(&self, code: &str) -> bool {
        self.prefixes.iter().any(|p| code.starts_with(p.as_str()))
            || self.codes.iter().any(|c| c == code)
    }

    /// 에러가 재시도 가능한지 분류
    pub fn classify(&self, error: &DriverError) -> bool {
        match error {
            DriverError::ServiceUnavailable(_) | DriverError::SessionExpired(_) => true,
            DriverError::Server { code, .. } => self.matches(code),
            _ => false,
        }
    }
}

impl Default for TransientCodes {
    fn default() -> Self {
        Self {
            prefixes: vec!["Nerva.TransientError".to_string()],
            codes: vec![
                "Nerva.ClientError.Cluster.NotALeader".to_string(),
                "Nerva.ClientError.General.ForbiddenOnReadOnlyDatabase".to_string(),
            ],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
