//! 라우팅 테이블
//!
//! 데이터베이스 하나에 대한 역할별 서버 목록과 만료 시각을 관리합니다.

use std::time::{Duration, Instant};

use crate::gram::{AccessMode, RecordMessage, WireValue};

use super::super::driver::Address;
use super::super::error::{DriverError, DriverResult};

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Router,
    /// 읽기 트랜잭션 처리 (팔로워)
    Reader,
    /// 쓰기 트랜잭션 처리 (리더)
    Writer,
}

impl ServerRole {
    /// 프로시저 결과의 역할 문자열에서 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Router),
            "READ" => Some(Self::Reader),
            "WRITE" => Some(Self::Writer),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "ROUTE",
            Self::Reader => "READ",
            Self::Writer => "WRITE",
        }
    }

    /// 접근 모드가 요구하는 역할
    pub fn for_mode(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => Self::Reader,
            AccessMode::Write => Self::Writer,
        }
    }
}

/// 라우팅 테이블
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// 데이터베이스 이름
    pub database: String,
    /// 라우터 목록 (라우팅 테이블 조회용)
    pub routers: Vec<Address>,
    /// 리더 목록 (읽기 트랜잭션용)
    pub readers: Vec<Address>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    pub writers: Vec<Address>,
    /// TTL
    pub ttl: Duration,
    /// 갱신 시간
    pub refreshed_at: Instant,
}

impl RoutingTable {
    /// 빈 테이블 생성
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            ttl: Duration::ZERO,
            refreshed_at: Instant::now(),
        }
    }

    /// 시드 라우터만 아는 초기 테이블 (TTL 0: 즉시 갱신 대상)
    pub fn from_seed(database: impl Into<String>, routers: Vec<Address>) -> Self {
        Self {
            database: database.into(),
            routers,
            readers: Vec::new(),
            writers: Vec::new(),
            ttl: Duration::ZERO,
            refreshed_at: Instant::now(),
        }
    }

    /// 역할별 서버 추가 (중복 제외)
    pub fn add_server(&mut self, role: ServerRole, address: Address) {
        let list = match role {
            ServerRole::Router => &mut self.routers,
            ServerRole::Reader => &mut self.readers,
            ServerRole::Writer => &mut self.writers,
        };
        if !list.contains(&address) {
            list.push(address);
        }
    }

    /// 역할별 서버 목록
    pub fn servers_for(&self, role: ServerRole) -> &[Address] {
        match role {
            ServerRole::Router => &self.routers,
            ServerRole::Reader => &self.readers,
            ServerRole::Writer => &self.writers,
        }
    }

    /// TTL 경과 여부
    pub fn is_expired(&self) -> bool {
        self.refreshed_at.elapsed() >= self.ttl
    }

    /// 요청된 역할에 대해 오래되었는지 확인 (TTL 경과 또는 역할 소진)
    pub fn is_stale_for(&self, role: ServerRole) -> bool {
        self.is_expired() || self.servers_for(role).is_empty()
    }

    /// 실패한 서버를 읽기/쓰기 목록에서 제거
    ///
    /// 라우터 목록은 유지합니다. 죽은 라우터는 재발견 폴백에서 건너뜁니다.
    pub fn forget(&mut self, address: &Address) {
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// 라우팅 프로시저의 결과 레코드에서 테이블 디코딩
    ///
    /// 레코드 구조: `ttl` (초), `servers` (역할/주소 목록의 리스트)
    pub fn from_procedure_record(
        database: &str,
        keys: &[String],
        record: &RecordMessage,
    ) -> DriverResult<RoutingTable> {
        let field = |name: &str| -> Option<&WireValue> {
            let index = keys.iter().position(|k| k == name)?;
            record.get(index)
        };

        let ttl_seconds = field("ttl").and_then(|v| v.as_int()).ok_or_else(|| {
            DriverError::protocol("Routing procedure record is missing 'ttl'")
        })?;

        let servers = field("servers").and_then(|v| v.as_list()).ok_or_else(|| {
            DriverError::protocol("Routing procedure record is missing 'servers'")
        })?;

        let mut table = RoutingTable::new(database);
        table.ttl = Duration::from_secs(ttl_seconds.max(0) as u64);

        for server in servers {
            let entry = server.as_map().ok_or_else(|| {
                DriverError::protocol("Routing procedure server entry is not a map")
            })?;

            let role = entry
                .get("role")
                .and_then(|v| v.as_str())
                .and_then(ServerRole::parse)
                .ok_or_else(|| {
                    DriverError::protocol("Routing procedure server entry has no known role")
                })?;

            let addresses = entry
                .get("addresses")
                .and_then(|v| v.as_list())
                .unwrap_or(&[]);
            for address in addresses {
                if let Some(parsed) = address.as_str().and_then(Address::parse) {
                    table.add_server(role, parsed);
                }
            }
        }

        if table.routers.is_empty() {
            return Err(DriverError::protocol(
                "Routing procedure returned no routers",
            ));
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(host: &str) -> Address {
        Address::new(host, 7787)
    }

    fn server_entry(role: &str, addresses: &[&str]) -> WireValue {
        let mut entry = HashMap::new();
        entry.insert("role".to_string(), WireValue::from(role));
        entry.insert(
            "addresses".to_string(),
            WireValue::List(addresses.iter().map(|a| WireValue::from(*a)).collect()),
        );
        WireValue::Map(entry)
    }

    fn routing_record(ttl: i64) -> (Vec<String>, RecordMessage) {
        let keys = vec!["ttl".to_string(), "servers".to_string()];
        let record = RecordMessage::new(vec![
            WireValue::Integer(ttl),
            WireValue::List(vec![
                server_entry("ROUTE", &["router1:7787"]),
                server_entry("WRITE", &["writer1:7787"]),
                server_entry("READ", &["reader1:7787", "reader2:7787"]),
            ]),
        ]);
        (keys, record)
    }

    #[test]
    fn test_server_role_parse() {
        assert_eq!(ServerRole::parse("ROUTE"), Some(ServerRole::Router));
        assert_eq!(ServerRole::parse("route"), Some(ServerRole::Router));
        assert_eq!(ServerRole::parse("READ"), Some(ServerRole::Reader));
        assert_eq!(ServerRole::parse("WRITE"), Some(ServerRole::Writer));
        assert_eq!(ServerRole::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_role_for_mode() {
        assert_eq!(ServerRole::for_mode(AccessMode::Read), ServerRole::Reader);
        assert_eq!(ServerRole::for_mode(AccessMode::Write), ServerRole::Writer);
    }

    #[test]
    fn test_add_server_no_duplicates() {
        let mut table = RoutingTable::new("sales");
        table.add_server(ServerRole::Router, addr("core1"));
        table.add_server(ServerRole::Router, addr("core1"));
        assert_eq!(table.routers.len(), 1);
    }

    #[test]
    fn test_same_address_in_multiple_roles() {
        let mut table = RoutingTable::new("sales");
        table.add_server(ServerRole::Router, addr("core1"));
        table.add_server(ServerRole::Reader, addr("core1"));
        table.add_server(ServerRole::Writer, addr("core1"));

        assert_eq!(table.routers.len(), 1);
        assert_eq!(table.readers.len(), 1);
        assert_eq!(table.writers.len(), 1);
    }

    #[test]
    fn test_expiry() {
        let mut table = RoutingTable::new("sales");
        table.ttl = Duration::from_secs(300);
        table.refreshed_at = Instant::now();
        assert!(!table.is_expired());

        table.ttl = Duration::ZERO;
        assert!(table.is_expired());
    }

    #[test]
    fn test_stale_when_role_drained() {
        let mut table = RoutingTable::new("sales");
        table.ttl = Duration::from_secs(300);
        table.add_server(ServerRole::Router, addr("core1"));
        table.add_server(ServerRole::Reader, addr("core2"));

        assert!(!table.is_stale_for(ServerRole::Reader));
        // 라이터가 하나도 없으면 그 역할에 대해 오래된 테이블이다
        assert!(table.is_stale_for(ServerRole::Writer));
    }

    #[test]
    fn test_forget_keeps_routers() {
        let mut table = RoutingTable::new("sales");
        table.add_server(ServerRole::Router, addr("core1"));
        table.add_server(ServerRole::Reader, addr("core1"));
        table.add_server(ServerRole::Writer, addr("core1"));

        table.forget(&addr("core1"));

        assert!(table.readers.is_empty());
        assert!(table.writers.is_empty());
        assert_eq!(table.routers.len(), 1);
    }

    #[test]
    fn test_from_seed_is_immediately_stale() {
        let table = RoutingTable::from_seed("sales", vec![addr("core1")]);
        assert!(table.is_expired());
        assert_eq!(table.routers.len(), 1);
        assert!(table.readers.is_empty());
    }

    #[test]
    fn test_from_procedure_record() {
        let (keys, record) = routing_record(600);
        let table = RoutingTable::from_procedure_record("sales", &keys, &record).unwrap();

        assert_eq!(table.database, "sales");
        assert_eq!(table.ttl, Duration::from_secs(600));
        assert_eq!(table.routers, vec![addr("router1")]);
        assert_eq!(table.writers, vec![addr("writer1")]);
        assert_eq!(table.readers, vec![addr("reader1"), addr("reader2")]);
        assert!(!table.is_expired());
    }

    #[test]
    fn test_from_procedure_record_missing_ttl() {
        let keys = vec!["servers".to_string()];
        let record = RecordMessage::new(vec![WireValue::List(vec![])]);
        let err = RoutingTable::from_procedure_record("sales", &keys, &record).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn test_from_procedure_record_requires_routers() {
        let keys = vec!["ttl".to_string(), "servers".to_string()];
        let record = RecordMessage::new(vec![
            WireValue::Integer(300),
            WireValue::List(vec![server_entry("READ", &["reader1:7787"])]),
        ]);
        let err = RoutingTable::from_procedure_record("sales", &keys, &record).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
