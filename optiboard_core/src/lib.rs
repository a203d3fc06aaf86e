//! optiboard core library: the optimization-result cache, the sync engine
//! that mirrors the remote service into it, and the encrypted API-key vault
//! that authorizes those syncs.

pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod transform;
pub mod vault;

pub use config::{DashboardConfig, RemoteConfig};
pub use error::{Error, Result};
pub use models::{ListWindow, RunStatus, UserId};
pub use remote::{HttpRemoteClient, RemoteResults};
pub use store::{
    ApiKeyRecord, DashboardDb, Pagination, ResultPage, ResultQuery, ResultRecord, ResultStats,
    SortField, SortOrder, SqliteDashboardDb,
};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};
pub use telemetry::{TelemetrySink, TracingSink};
pub use vault::CredentialVault;
