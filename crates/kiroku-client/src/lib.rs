//! Kiroku client library
//!
//! Keeps one client's view of a form document in step with the audit
//! service, and drives every edit through the lock/append protocol.
//! The audit service is reached through the [`AuditApi`] trait;
//! [`MemoryAuditStore`] implements it in process.

pub mod audit_api;
pub mod config;
pub mod constants;
pub mod gate;
pub mod reload;
pub mod session;
pub mod sync;

pub use audit_api::{
    AppendResponse, AuditApi, AuditApiError, Fault, LatestItem, LockGrant, MemoryAuditStore,
    MemoryClient, StageChange, StatusClass, StatusCode,
};
pub use config::{ClientConfig, ConfigError, Identity, Timing};
pub use gate::{GateDecision, NotificationGate};
pub use reload::{ReloadError, ReloadEvent, ReloadMachine, ReloadState, RenderProbe, Restore};
pub use session::{EditSession, SessionError};
pub use sync::{SyncController, SyncError, SyncState};

use kiroku_types::{DocumentId, PrincipalId};

/// Open a session on an in-process store as a fresh principal.
pub async fn open_memory_session(
    store: &MemoryAuditStore,
    document: DocumentId,
    config: ClientConfig,
) -> Result<EditSession<MemoryClient>, SessionError> {
    let principal = PrincipalId::new();
    EditSession::open(store.client(principal), document, principal, config).await
}
