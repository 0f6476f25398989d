//! 라우팅
//!
//! 클러스터 토폴로지 발견과 역할 기반 서버 선택을 담당합니다.
//!
//! - [`table`] - 데이터베이스별 역할 목록과 만료
//! - [`registry`] - 테이블 캐시, 단일 비행 재발견, 보존 기간 관리
//! - [`driver`] - nerva:// 스킴 라우팅 드라이버

pub mod driver;
pub mod registry;
pub mod table;

pub use driver::{
    is_routing_uri, parse_routing_uri, RoutingDriver, RoutingDriverMetrics,
};
pub use registry::{
    ProcedureRediscovery, Rediscovery, RoutingTableRegistry, DEFAULT_DATABASE, ROUTING_PROCEDURE,
};
pub use table::{RoutingTable, ServerRole};
