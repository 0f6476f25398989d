//! # NervaDB Driver
//!
//! A Rust driver for the [NervaDB](https://github.com/nervadb/nervadb) clustered
//! graph database, speaking the Gram binary protocol.
//!
//! ## Features
//!
//! - **Gram Protocol 1.0 - 2.1** - versioned, length-framed binary messaging
//!   with per-channel request pipelining
//! - **Async/Await** - built on Tokio; every suspension point is an explicit
//!   future, never a blocked I/O thread
//! - **Connection Pooling** - per-address bounded pools with idle reuse,
//!   liveness probing and acquisition timeouts
//! - **Cluster Routing** - per-database routing tables with role-based server
//!   selection and on-demand rediscovery
//! - **Managed Retries** - transient failures are retried with bounded
//!   exponential backoff
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! nerva-driver = "0.3"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use nerva_driver::{AuthToken, Driver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create driver
//!     let driver = Driver::new(
//!         "gram://localhost:7787",
//!         AuthToken::basic("nerva", "password"),
//!     )?;
//!
//!     // Create session and run a query
//!     let mut session = driver.default_session()?;
//!     let result = session
//!         .run("MATCH (n:Person) RETURN n.name LIMIT 10", None)
//!         .await?;
//!
//!     for record in &result.records {
//!         println!("{:?}", record);
//!     }
//!
//!     // Clean up
//!     session.close().await?;
//!     driver.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Cluster Usage
//!
//! Use the `nerva://` scheme to connect to a cluster. Reads are routed to
//! followers, writes to the leader, and the topology is refreshed whenever
//! the cached routing table goes stale:
//!
//! ```rust,no_run
//! use nerva_driver::{AuthToken, RoutingDriver, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = RoutingDriver::new(
//!     "nerva://core1:7787,core2:7787,core3:7787",
//!     AuthToken::basic("nerva", "password"),
//! )?;
//!
//! let session = driver.session(
//!     SessionConfig::builder().with_read_access().build(),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - the high-level driver: pooling, routing, sessions,
//!   transactions and retries
//! - [`gram`] - the low-level Gram protocol: handshake, framing and message
//!   types

pub mod driver;
pub mod gram;

pub use driver::{
    Address, AuthToken, Driver, DriverConfig, DriverError, DriverResult, QueryResult,
    RoutingDriver, Session, SessionConfig, Transaction, TransactionConfig,
};
pub use gram::{AccessMode, GramVersion, WireValue};
