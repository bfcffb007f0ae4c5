// velux-core: Credential lifecycle and home reconciliation between velux-api and the exporter.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod retry;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{Account, ExporterConfig};
pub use error::CoreError;
pub use metrics::{MetricsState, Snapshot};
pub use model::{GLOBAL_ROOM_ID, HomeTree, Module, ModuleKey, Room};
pub use poller::ExporterContext;
pub use reconcile::{MergeReport, Reconciled, reconcile};
pub use retry::RetryPolicy;
pub use token::{CredentialStore, PersistenceError, Token, TokenManager, TokenState};
