//! 주소/보안 해석기
//!
//! 설정된 주소를 실제 후보 주소 목록으로 바꾸고 전송 보안 설정을
//! 제공하는 협력자 경계입니다. DNS나 TLS 정책은 이 뒤에 숨습니다.

use async_trait::async_trait;

use super::driver::Address;
use super::error::DriverResult;

// ============================================================================
// TrustStrategy / SecurityConfig - 전송 보안
// ============================================================================

/// TLS 신뢰 전략
#[derive(Debug, Clone, Default)]
pub enum TrustStrategy {
    /// 시스템 인증서 사용
    #[default]
    TrustSystemCas,
    /// 모든 인증서 신뢰 (개발용)
    TrustAllCertificates,
    /// 특정 인증서만 신뢰
    TrustCustomCas { certificates: Vec<Vec<u8>> },
}

/// 전송 보안 설정
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// TLS 암호화 사용 여부
    pub encrypted: bool,
    /// 신뢰 전략
    pub trust: TrustStrategy,
}

// ============================================================================
// AddressResolver - 해석기 심
// ============================================================================

/// 주소 해석기
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// 설정 주소 하나를 후보 주소 목록으로 해석 (순서 유지)
    async fn resolve(&self, address: &Address) -> DriverResult<Vec<Address>>;

    /// 전송 보안 설정
    fn security_config(&self) -> SecurityConfig;
}

/// 입력 주소를 그대로 돌려주는 기본 해석기
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    security: SecurityConfig,
}

impl StaticResolver {
    /// 보안 설정과 함께 생성
    pub fn new(security: SecurityConfig) -> Self {
        Self { security }
    }

    /// 평문 전송 해석기
    pub fn plain() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, address: &Address) -> DriverResult<Vec<Address>> {
        Ok(vec![address.clone()])
    }

    fn security_config(&self) -> SecurityConfig {
        self.security.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_passthrough() {
        let resolver = StaticResolver::plain();
        let address = Address::new("core1", 7787);

        let resolved = resolver.resolve(&address).await.unwrap();
        assert_eq!(resolved, vec![address]);
        assert!(!resolver.security_config().encrypted);
    }

    #[tokio::test]
    async fn test_static_resolver_security() {
        let resolver = StaticResolver::new(SecurityConfig {
            encrypted: true,
            trust: TrustStrategy::TrustAllCertificates,
        });
        assert!(resolver.security_config().encrypted);
        assert!(matches!(
            resolver.security_config().trust,
            TrustStrategy::TrustAllCertificates
        ));
    }
}
