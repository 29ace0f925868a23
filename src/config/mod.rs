//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, apply DECK_* env overrides)
//!     → validation.rs (range checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → OrchestratorContext::new builds pool, locks, breakers from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → OrchestratorContext::apply_config swaps the live settings
//!       (kill switch, execution mode, concurrency)
//! ```
//!
//! # Design Decisions
//! - Every section has defaults so an empty file is a valid config
//! - Pool size, breaker and retry settings are fixed at context construction;
//!   only the live settings follow reloads

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BackoffStrategy, CircuitBreakerConfig, ConcurrencyConfig, ExecutionMode, LockConfig,
    ObservabilityConfig, OrchestratorConfig, PoolConfig, RemoteConfig, RetryConfig,
};
pub use validation::{validate_config, ValidationError};
