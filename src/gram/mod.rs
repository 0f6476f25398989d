//! # Gram Protocol Implementation
//!
//! Low-level client implementation of the Gram protocol used by NervaDB.
//!
//! ## Overview
//!
//! Gram is a versioned, length-framed binary protocol. This module provides:
//!
//! - **Handshake** - magic preamble and version negotiation
//! - **Wire values** - the compact tagged binary form message bodies use
//! - **Message types** - request/response envelopes
//! - **Codec** - chunked framing as a tokio_util codec
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the protocol directly.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod value;

pub use codec::{ClientMessageCodec, GramCodec};
pub use error::{GramError, GramErrorCode, GramResult, HandshakeError};
pub use handshake::{GramVersion, GRAM_MAGIC, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE};
pub use message::{
    AccessMode, BeginMessage, DiscardMessage, FailureMessage, HelloMessage, PullMessage,
    RecordMessage, Request, Response, RunMessage, SuccessMessage,
};
pub use value::{WireError, WireStructure, WireValue};
