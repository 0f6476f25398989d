//! Gram protocol response messages.
//!
//! Response messages are sent from the server to the client.

use std::collections::HashMap;

use super::tag;
use crate::gram::value::{WireError, WireStructure, WireValue};

/// All Gram response messages.
#[derive(Debug, Clone)]
pub enum Response {
    /// SUCCESS - Operation completed successfully
    Success(SuccessMessage),
    /// RECORD - Query result record
    Record(RecordMessage),
    /// FAILURE - Operation failed
    Failure(FailureMessage),
    /// IGNORED - Message was ignored (connection in a failed server state)
    Ignored,
}

impl Response {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            Response::Success(_) => tag::SUCCESS,
            Response::Record(_) => tag::RECORD,
            Response::Failure(_) => tag::FAILURE,
            Response::Ignored => tag::IGNORED,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Failure(_) => "FAILURE",
            Response::Ignored => "IGNORED",
        }
    }

    /// Check if this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// Check if this is a failure response.
    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Failure(_))
    }

    /// Check if this is a record response.
    pub fn is_record(&self) -> bool {
        matches!(self, Response::Record(_))
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        match self {
            Response::Success(msg) => msg.to_structure(),
            Response::Record(msg) => msg.to_structure(),
            Response::Failure(msg) => msg.to_structure(),
            Response::Ignored => WireStructure::new(tag::IGNORED, vec![]),
        }
    }

    /// Parse from a wire structure.
    pub fn from_structure(s: &WireStructure) -> Result<Self, WireError> {
        match s.tag {
            tag::SUCCESS => Ok(Response::Success(SuccessMessage::from_structure(s)?)),
            tag::RECORD => Ok(Response::Record(RecordMessage::from_structure(s)?)),
            tag::FAILURE => Ok(Response::Failure(FailureMessage::from_structure(s)?)),
            tag::IGNORED => Ok(Response::Ignored),
            _ => Err(WireError::InvalidStructure(format!(
                "Unknown response message tag: 0x{:02X}",
                s.tag
            ))),
        }
    }
}

/// SUCCESS message - Operation completed successfully.
#[derive(Debug, Clone, Default)]
pub struct SuccessMessage {
    /// Response metadata
    pub metadata: HashMap<String, WireValue>,
}

impl SuccessMessage {
    /// Server hint key: receive timeout in seconds.
    pub const RECV_TIMEOUT_HINT_KEY: &'static str = "connection.recv_timeout_seconds";

    /// Create a new SUCCESS message with empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a SUCCESS message with metadata.
    pub fn with_metadata(metadata: HashMap<String, WireValue>) -> Self {
        Self { metadata }
    }

    /// Add a metadata entry.
    pub fn add(&mut self, key: &str, value: WireValue) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Get a metadata entry.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.metadata.get(key)
    }

    /// Get server agent string.
    pub fn server(&self) -> Option<&str> {
        self.metadata.get("server").and_then(|v| v.as_str())
    }

    /// Get connection ID.
    pub fn connection_id(&self) -> Option<&str> {
        self.metadata.get("connection_id").and_then(|v| v.as_str())
    }

    /// Get server configuration hints from a HELLO success.
    pub fn configuration_hints(&self) -> Option<&HashMap<String, WireValue>> {
        self.metadata.get("hints").and_then(|v| v.as_map())
    }

    /// Get the receive-timeout hint in seconds, when present.
    pub fn recv_timeout_seconds(&self) -> Option<i64> {
        self.configuration_hints()?
            .get(Self::RECV_TIMEOUT_HINT_KEY)
            .and_then(|v| v.as_int())
    }

    /// Get field names from a RUN success.
    pub fn fields(&self) -> Option<Vec<String>> {
        self.metadata.get("fields").and_then(|v| {
            v.as_list().map(|list| {
                list.iter()
                    .filter_map(|item| item.as_str().map(|s| s.to_string()))
                    .collect()
            })
        })
    }

    /// Check if there are more results after this batch.
    pub fn has_more(&self) -> bool {
        self.metadata
            .get("has_more")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Get bookmark.
    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(|v| v.as_str())
    }

    /// Get database name.
    pub fn db(&self) -> Option<&str> {
        self.metadata.get("db").and_then(|v| v.as_str())
    }

    /// Get query ID.
    pub fn qid(&self) -> Option<i64> {
        self.metadata.get("qid").and_then(|v| v.as_int())
    }

    /// Create a HELLO success response.
    pub fn hello_success(server: &str, connection_id: &str) -> Self {
        let mut msg = Self::new();
        msg.add("server", WireValue::String(server.to_string()));
        msg.add(
            "connection_id",
            WireValue::String(connection_id.to_string()),
        );
        msg
    }

    /// Create a RUN success response.
    pub fn run_success(fields: Vec<String>, qid: Option<i64>) -> Self {
        let mut msg = Self::new();
        let field_list: Vec<WireValue> = fields.into_iter().map(WireValue::String).collect();
        msg.add("fields", WireValue::List(field_list));
        if let Some(id) = qid {
            msg.add("qid", WireValue::Integer(id));
        }
        msg
    }

    /// Create a PULL/DISCARD success response.
    pub fn streaming_success(has_more: bool, bookmark: Option<String>) -> Self {
        let mut msg = Self::new();
        if has_more {
            msg.add("has_more", WireValue::Boolean(true));
        }
        if let Some(bm) = bookmark {
            msg.add("bookmark", WireValue::String(bm));
        }
        msg
    }

    /// Create a COMMIT success response.
    pub fn commit_success(bookmark: String) -> Self {
        let mut msg = Self::new();
        msg.add("bookmark", WireValue::String(bookmark));
        msg
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        WireStructure::new(tag::SUCCESS, vec![WireValue::Map(self.metadata.clone())])
    }

    /// Parse from a wire structure.
    pub fn from_structure(s: &WireStructure) -> Result<Self, WireError> {
        if s.tag != tag::SUCCESS {
            return Err(WireError::InvalidStructure("Expected SUCCESS tag".to_string()));
        }

        let metadata = if !s.fields.is_empty() {
            s.fields[0].as_map().cloned().unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self { metadata })
    }
}

/// RECORD message - Query result record.
#[derive(Debug, Clone)]
pub struct RecordMessage {
    /// Field values
    pub fields: Vec<WireValue>,
}

impl RecordMessage {
    /// Create a new RECORD message.
    pub fn new(fields: Vec<WireValue>) -> Self {
        Self { fields }
    }

    /// Create an empty record.
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Get field count.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if record is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get field at index.
    pub fn get(&self, index: usize) -> Option<&WireValue> {
        self.fields.get(index)
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        WireStructure::new(tag::RECORD, vec![WireValue::List(self.fields.clone())])
    }

    /// Parse from a wire structure.
    pub fn from_structure(s: &WireStructure) -> Result<Self, WireError> {
        if s.tag != tag::RECORD {
            return Err(WireError::InvalidStructure("Expected RECORD tag".to_string()));
        }

        let fields = match s.fields.first() {
            Some(WireValue::List(list)) => list.clone(),
            Some(_) => {
                return Err(WireError::InvalidStructure(
                    "RECORD fields must be a list".to_string(),
                ))
            }
            None => Vec::new(),
        };

        Ok(Self { fields })
    }
}

/// FAILURE message - Operation failed.
#[derive(Debug, Clone)]
pub struct FailureMessage {
    /// Status code
    pub code: String,
    /// Error message
    pub message: String,
}

impl FailureMessage {
    /// Create a new FAILURE message.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Get error classification from the code (first segment after "Nerva").
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("Unknown")
    }

    /// Check if this is a client error.
    pub fn is_client_error(&self) -> bool {
        self.code.contains("ClientError")
    }

    /// Check if this is a transient error.
    pub fn is_transient(&self) -> bool {
        self.code.contains("TransientError")
    }

    /// Check if this is a database error.
    pub fn is_database_error(&self) -> bool {
        self.code.contains("DatabaseError")
    }

    /// Check if this is an authentication/security failure.
    pub fn is_security_error(&self) -> bool {
        self.code.contains("Security")
    }

    /// Convert to a wire structure.
    pub fn to_structure(&self) -> WireStructure {
        let mut metadata = HashMap::new();
        metadata.insert("code".to_string(), WireValue::String(self.code.clone()));
        metadata.insert(
            "message".to_string(),
            WireValue::String(self.message.clone()),
        );

        WireStructure::new(tag::FAILURE, vec![WireValue::Map(metadata)])
    }

    /// Parse from a wire structure.
    pub fn from_structure(s: &WireStructure) -> Result<Self, WireError> {
        if s.tag != tag::FAILURE {
            return Err(WireError::InvalidStructure("Expected FAILURE tag".to_string()));
        }

        let metadata = s
            .fields
            .first()
            .and_then(|v| v.as_map())
            .ok_or_else(|| {
                WireError::InvalidStructure("FAILURE requires metadata map".to_string())
            })?;

        let code = metadata
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WireError::InvalidStructure("FAILURE requires code".to_string()))?
            .to_string();

        let message = metadata
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WireError::InvalidStructure("FAILURE requires message".to_string()))?
            .to_string();

        Ok(Self { code, message })
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gram::error::GramErrorCode;

    #[test]
    fn test_success_message() {
        let mut msg = SuccessMessage::new();
        msg.add("server", WireValue::from("NervaDB/1.2"));
        msg.add("connection_id", WireValue::from("gram-123"));

        let structure = msg.to_structure();
        assert_eq!(structure.tag, tag::SUCCESS);

        let parsed = SuccessMessage::from_structure(&structure).unwrap();
        assert_eq!(parsed.server(), Some("NervaDB/1.2"));
        assert_eq!(parsed.connection_id(), Some("gram-123"));
    }

    #[test]
    fn test_success_hello() {
        let msg = SuccessMessage::hello_success("NervaDB/1.0", "gram-7");
        assert_eq!(msg.server(), Some("NervaDB/1.0"));
        assert_eq!(msg.connection_id(), Some("gram-7"));
        assert!(msg.configuration_hints().is_none());
        assert!(msg.recv_timeout_seconds().is_none());
    }

    #[test]
    fn test_success_recv_timeout_hint() {
        let mut hints = HashMap::new();
        hints.insert(
            SuccessMessage::RECV_TIMEOUT_HINT_KEY.to_string(),
            WireValue::Integer(15),
        );
        let mut msg = SuccessMessage::hello_success("NervaDB/1.0", "gram-7");
        msg.add("hints", WireValue::Map(hints));

        assert_eq!(msg.recv_timeout_seconds(), Some(15));
    }

    #[test]
    fn test_success_run() {
        let msg =
            SuccessMessage::run_success(vec!["name".to_string(), "age".to_string()], Some(1));
        assert_eq!(msg.fields().unwrap(), vec!["name", "age"]);
        assert_eq!(msg.qid(), Some(1));
    }

    #[test]
    fn test_success_streaming() {
        let msg = SuccessMessage::streaming_success(true, Some("bm:1234".to_string()));
        assert!(msg.has_more());
        assert_eq!(msg.bookmark(), Some("bm:1234"));
    }

    #[test]
    fn test_success_commit() {
        let msg = SuccessMessage::commit_success("bm:commit:1".to_string());
        assert_eq!(msg.bookmark(), Some("bm:commit:1"));
        assert!(!msg.has_more());
    }

    #[test]
    fn test_record_message() {
        let fields = vec![WireValue::from("Alice"), WireValue::Integer(30)];
        let msg = RecordMessage::new(fields);

        assert_eq!(msg.len(), 2);
        assert!(!msg.is_empty());

        let structure = msg.to_structure();
        assert_eq!(structure.tag, tag::RECORD);

        let parsed = RecordMessage::from_structure(&structure).unwrap();
        assert_eq!(parsed.get(0).unwrap().as_str(), Some("Alice"));
        assert_eq!(parsed.get(1).unwrap().as_int(), Some(30));
    }

    #[test]
    fn test_failure_message() {
        let msg = FailureMessage::new(GramErrorCode::SYNTAX_ERROR, "Invalid query");
        assert!(msg.is_client_error());
        assert!(!msg.is_transient());
        assert_eq!(msg.classification(), "ClientError");

        let structure = msg.to_structure();
        assert_eq!(structure.tag, tag::FAILURE);

        let parsed = FailureMessage::from_structure(&structure).unwrap();
        assert_eq!(parsed.code, msg.code);
        assert_eq!(parsed.message, msg.message);
    }

    #[test]
    fn test_failure_classifications() {
        assert!(FailureMessage::new(GramErrorCode::DEADLOCK_DETECTED, "").is_transient());
        assert!(FailureMessage::new(GramErrorCode::GENERAL_ERROR, "").is_database_error());
        assert!(FailureMessage::new(GramErrorCode::UNAUTHORIZED, "").is_security_error());
    }

    #[test]
    fn test_failure_missing_code_rejected() {
        let structure = WireStructure::new(
            tag::FAILURE,
            vec![WireValue::Map(HashMap::new())],
        );
        assert!(FailureMessage::from_structure(&structure).is_err());
    }

    #[test]
    fn test_response_round_trip() {
        let responses = vec![
            Response::Success(SuccessMessage::hello_success("NervaDB/1.0", "gram-1")),
            Response::Record(RecordMessage::new(vec![WireValue::Integer(1)])),
            Response::Failure(FailureMessage::new(GramErrorCode::GENERAL_ERROR, "boom")),
            Response::Ignored,
        ];

        for response in responses {
            let parsed = Response::from_structure(&response.to_structure()).unwrap();
            assert_eq!(parsed.tag(), response.tag());
        }
    }

    #[test]
    fn test_response_unknown_tag() {
        let structure = WireStructure::new(0x42, vec![]);
        assert!(Response::from_structure(&structure).is_err());
    }

    #[test]
    fn test_response_helpers() {
        let success = Response::Success(SuccessMessage::new());
        assert!(success.is_success());
        assert!(!success.is_failure());
        assert_eq!(success.name(), "SUCCESS");

        let ignored = Response::Ignored;
        assert!(!ignored.is_success());
        assert_eq!(ignored.name(), "IGNORED");
    }
}
