//! Gram protocol request messages.
//!
//! Request messages are sent from the client to the server. The driver layer
//! decides which fields are legal for the negotiated protocol version; this
//! module only knows how to put them on the wire.

use std::collections::HashMap;
use std::time::Duration;

use super::tag;
use crate::gram::value::{WireStructure, WireValue};

/// Access mode for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write access (default)
    #[default]
    Write,
    /// Read-only access
    Read,
}

impl AccessMode {
    /// Convert to the wire metadata token.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

/// All Gram request messages.
#[derive(Debug, Clone)]
pub enum Request {
    /// HELLO - Initialize connection
    Hello(HelloMessage),
    /// GOODBYE - Close connection gracefully
    Goodbye,
    /// RESET - Reset connection state
    Reset,
    /// RUN - Execute a query
    Run(RunMessage),
    /// PULL - Pull results
    Pull(PullMessage),
    /// DISCARD - Discard results
    Discard(DiscardMessage),
    /// BEGIN - Start transaction
    Begin(BeginMessage),
    /// COMMIT - Commit transaction
    Commit,
    /// ROLLBACK - Rollback transaction
    Rollback,
}

impl Request {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            Request::Hello(_) => tag::HELLO,
            Request::Goodbye => tag::GOODBYE,
            Request::Reset => tag::RESET,
            Request::Run(_) => tag::RUN,
            Request::Pull(_) => tag::PULL,
            Request::Discard(_) => tag::DISCARD,
            Request::Begin(_) => tag::BEGIN,
            Request::Commit => tag::COMMIT,
            Request::Rollback => tag::ROLLBACK,
        }
    }

    /// Get the message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello(_) => "HELLO",
            Request::Goodbye => "GOODBYE",
            Request::Reset => "RESET",
            Request::Run(_) => "RUN",
            Request::Pull(_) => "PULL",
            Request::Discard(_) => "DISCARD",
            Request::Begin(_) => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
        }
    }

    /// Whether the server answers this request with a response frame.
    ///
    /// GOODBYE is fire-and-forget; everything else gets exactly one terminal
    /// SUCCESS/FAILURE/IGNORED (RUN+PULL streams RECORDs before it).
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Goodbye)
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        match self {
            Request::Hello(msg) => msg.to_structure(),
            Request::Goodbye => WireStructure::new(tag::GOODBYE, vec![]),
            Request::Reset => WireStructure::new(tag::RESET, vec![]),
            Request::Run(msg) => msg.to_structure(),
            Request::Pull(msg) => msg.to_structure(),
            Request::Discard(msg) => msg.to_structure(),
            Request::Begin(msg) => msg.to_structure(),
            Request::Commit => WireStructure::new(tag::COMMIT, vec![]),
            Request::Rollback => WireStructure::new(tag::ROLLBACK, vec![]),
        }
    }
}

/// HELLO message - Initialize connection.
#[derive(Debug, Clone)]
pub struct HelloMessage {
    /// User agent string
    pub user_agent: String,
    /// Authentication entries (scheme, principal, credentials, ...)
    pub auth: HashMap<String, WireValue>,
    /// Routing context (None on versions without routing context)
    pub routing: Option<HashMap<String, WireValue>>,
}

impl HelloMessage {
    /// Create a new HELLO message.
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            auth: HashMap::new(),
            routing: None,
        }
    }

    /// Set authentication entries.
    pub fn with_auth(mut self, auth: HashMap<String, WireValue>) -> Self {
        self.auth = auth;
        self
    }

    /// Set routing context.
    pub fn with_routing(mut self, routing: HashMap<String, WireValue>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        let mut extra: HashMap<String, WireValue> = self.auth.clone();
        extra.insert(
            "user_agent".to_string(),
            WireValue::String(self.user_agent.clone()),
        );
        if let Some(ref routing) = self.routing {
            extra.insert("routing".to_string(), WireValue::Map(routing.clone()));
        }

        WireStructure::new(tag::HELLO, vec![WireValue::Map(extra)])
    }
}

/// RUN message - Execute a query.
#[derive(Debug, Clone)]
pub struct RunMessage {
    /// Query text
    pub query: String,
    /// Query parameters
    pub parameters: HashMap<String, WireValue>,
    /// Extra metadata (db, bookmarks, mode, tx_timeout, ...)
    pub extra: HashMap<String, WireValue>,
}

impl RunMessage {
    /// Create a new RUN message.
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            parameters: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    /// Set query parameters.
    pub fn with_parameters(mut self, params: HashMap<String, WireValue>) -> Self {
        self.parameters = params;
        self
    }

    /// Set extra metadata.
    pub fn with_extra(mut self, extra: HashMap<String, WireValue>) -> Self {
        self.extra = extra;
        self
    }

    /// Set database name.
    pub fn with_database(mut self, db: &str) -> Self {
        self.extra
            .insert("db".to_string(), WireValue::String(db.to_string()));
        self
    }

    /// Set bookmarks.
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        if !bookmarks.is_empty() {
            let list: Vec<WireValue> = bookmarks.into_iter().map(WireValue::String).collect();
            self.extra
                .insert("bookmarks".to_string(), WireValue::List(list));
        }
        self
    }

    /// Set access mode metadata.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        if mode == AccessMode::Read {
            self.extra
                .insert("mode".to_string(), WireValue::String("r".to_string()));
        }
        self
    }

    /// Set impersonated user.
    pub fn with_impersonated_user(mut self, user: &str) -> Self {
        self.extra
            .insert("imp_user".to_string(), WireValue::String(user.to_string()));
        self
    }

    /// Set transaction timeout metadata.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.extra.insert(
            "tx_timeout".to_string(),
            WireValue::Integer(timeout.as_millis() as i64),
        );
        self
    }

    /// Set transaction metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, WireValue>) -> Self {
        if !metadata.is_empty() {
            self.extra
                .insert("tx_metadata".to_string(), WireValue::Map(metadata));
        }
        self
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        WireStructure::new(
            tag::RUN,
            vec![
                WireValue::String(self.query.clone()),
                WireValue::Map(self.parameters.clone()),
                WireValue::Map(self.extra.clone()),
            ],
        )
    }
}

/// PULL message - Pull query results.
#[derive(Debug, Clone)]
pub struct PullMessage {
    /// Number of records to pull (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results
    pub qid: Option<i64>,
}

impl PullMessage {
    /// Create a PULL that drains the whole stream.
    pub fn all() -> Self {
        Self { n: -1, qid: None }
    }

    /// Create a PULL with a specific batch size.
    pub fn with_n(n: i64) -> Self {
        Self { n, qid: None }
    }

    /// Set query ID.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = Some(qid);
        self
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), WireValue::Integer(self.n));
        if let Some(qid) = self.qid {
            extra.insert("qid".to_string(), WireValue::Integer(qid));
        }

        WireStructure::new(tag::PULL, vec![WireValue::Map(extra)])
    }
}

/// DISCARD message - Discard query results.
#[derive(Debug, Clone)]
pub struct DiscardMessage {
    /// Number of records to discard (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results
    pub qid: Option<i64>,
}

impl DiscardMessage {
    /// Create a DISCARD that drops the whole stream.
    pub fn all() -> Self {
        Self { n: -1, qid: None }
    }

    /// Create a DISCARD with a specific count.
    pub fn with_n(n: i64) -> Self {
        Self { n, qid: None }
    }

    /// Set query ID.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = Some(qid);
        self
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), WireValue::Integer(self.n));
        if let Some(qid) = self.qid {
            extra.insert("qid".to_string(), WireValue::Integer(qid));
        }

        WireStructure::new(tag::DISCARD, vec![WireValue::Map(extra)])
    }
}

/// BEGIN message - Start a transaction.
#[derive(Debug, Clone, Default)]
pub struct BeginMessage {
    /// Bookmarks to wait for
    pub bookmarks: Vec<String>,
    /// Transaction timeout
    pub tx_timeout: Option<Duration>,
    /// Access mode (read/write)
    pub mode: AccessMode,
    /// Database name
    pub database: Option<String>,
    /// Impersonated user
    pub imp_user: Option<String>,
    /// Transaction metadata
    pub tx_metadata: HashMap<String, WireValue>,
}

impl BeginMessage {
    /// Create a new BEGIN message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bookmarks.
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = Some(timeout);
        self
    }

    /// Set access mode.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set database.
    pub fn with_database(mut self, db: &str) -> Self {
        self.database = Some(db.to_string());
        self
    }

    /// Set impersonated user.
    pub fn with_impersonated_user(mut self, user: &str) -> Self {
        self.imp_user = Some(user.to_string());
        self
    }

    /// Set transaction metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, WireValue>) -> Self {
        self.tx_metadata = metadata;
        self
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        let mut extra = HashMap::new();

        if !self.bookmarks.is_empty() {
            let list: Vec<WireValue> = self
                .bookmarks
                .iter()
                .map(|s| WireValue::String(s.clone()))
                .collect();
            extra.insert("bookmarks".to_string(), WireValue::List(list));
        }

        if let Some(timeout) = self.tx_timeout {
            extra.insert(
                "tx_timeout".to_string(),
                WireValue::Integer(timeout.as_millis() as i64),
            );
        }

        if self.mode == AccessMode::Read {
            extra.insert("mode".to_string(), WireValue::String("r".to_string()));
        }

        if let Some(ref db) = self.database {
            extra.insert("db".to_string(), WireValue::String(db.clone()));
        }

        if let Some(ref user) = self.imp_user {
            extra.insert("imp_user".to_string(), WireValue::String(user.clone()));
        }

        if !self.tx_metadata.is_empty() {
            extra.insert(
                "tx_metadata".to_string(),
                WireValue::Map(self.tx_metadata.clone()),
            );
        }

        WireStructure::new(tag::BEGIN, vec![WireValue::Map(extra)])
    }
}
