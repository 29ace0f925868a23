//! Remote document API boundary.
//!
//! # Data Flow
//! ```text
//! WorkItem (mutations)
//!     → mutation.rs (render batch-update request entries)
//!     → transport.rs (Transport trait, one pooled handle per call)
//!     → http.rs (reqwest POST, status → error taxonomy)
//! ```
//!
//! # Design Decisions
//! - Transports classify their own failures; the retry policy only reads kinds
//! - Connection-level faults are flagged so the pool can count them

pub mod http;
pub mod mutation;
pub mod transport;

pub use http::{HttpConnectionFactory, HttpTransport};
pub use mutation::Mutation;
pub use transport::{ConnectionFactory, Transport};
