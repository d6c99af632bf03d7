//! Brig Core
//!
//! Domain model for event-driven CI orchestration:
//! - JobDescriptor / JobResult: one containerized unit of work and its outcome
//! - Event: an inbound trigger with an opaque JSON payload
//! - NotificationState: per-check status reported to an external system
//! - ProjectConfig: immutable project configuration loaded from TOML
//! - SecretsProvider: credential lookup

pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod notification;
pub mod secrets;
pub mod telemetry;

pub use config::{ChatCommand, CheckSection, ProjectConfig, RouteMode};
pub use error::{
    BrigError, ExecutionError, MissingSecretError, NotifyError, Result, ValidationError,
};
pub use event::{Event, EventType, Revision};
pub use job::{ErrorInfo, JobDescriptor, JobFlags, JobResult};
pub use notification::{Conclusion, NotificationIdentity, NotificationState};
pub use secrets::{EnvSecrets, MapSecrets, SecretsProvider};
pub use telemetry::init_tracing;

/// Brig core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
