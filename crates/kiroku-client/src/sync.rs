//! Audit synchronization for a single document.
//!
//! The server's latest audit item is the only source of truth. This module
//! compares it against the client's last-edit timestamp and decides whether
//! the local view can be edited, must be reloaded, or is locked by someone
//! else. It holds no content and does no I/O, so the decision logic is unit
//! testable without a server.
//!
//! # Sync Protocol
//!
//! - fetch fails at the transport -> NetworkError, reload on reconnect
//! - lock held by another principal -> Locked (content untouched)
//! - server timestamp != local timestamp -> Stale, full reload required
//! - otherwise -> UpToDate, `DocumentState` projected for the engine

use kiroku_types::{AuditLogItem, DocumentId, DocumentState, PrincipalId};
use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::audit_api::{AppendResponse, AuditApiError, LatestItem, LockGrant, StatusClass, StatusCode};

/// Where the local view stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing fetched yet.
    Unknown,
    UpToDate,
    /// The server moved on; a full reload is required.
    Stale,
    Locked { holder: PrincipalId },
    /// Last call failed at the transport, or the service was busy.
    NetworkError,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unknown => "unknown",
            SyncState::UpToDate => "up_to_date",
            SyncState::Stale => "stale",
            SyncState::Locked { .. } => "locked",
            SyncState::NetworkError => "network_error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the local view may not be edited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("document is locked by {holder}")]
    Locked { holder: PrincipalId },

    /// The server's latest item is not the one we drafted against.
    #[error("local view at {local} is stale")]
    Stale { local: u64 },

    #[error("network failure: {0}")]
    Network(String),

    #[error("session expired")]
    SessionExpired,

    #[error("audit service busy, retry later")]
    Busy,

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("audit service error (status {0})")]
    Server(StatusCode),
}

/// Tracks one client's view of one document's audit log.
///
/// # State Machine
///
/// ```text
/// +-----------+  observe(Ok)    +-----------+
/// |  Unknown  | --------------> | UpToDate  | <-----------+
/// +-----------+                 +-----+-----+             |
///                                     | timestamp moved   | adopt()
///                                     v                   |
///                               +-----------+             |
///                               |   Stale   | ------------+
///                               +-----------+   (after reload)
///
/// any state --transport error--> NetworkError (reload on reconnect)
/// any state --busy-------------> NetworkError (retry, no reload)
/// any state --foreign lock-----> Locked { holder }
/// ```
#[derive(Debug, Clone)]
pub struct SyncController {
    principal: PrincipalId,
    state: SyncState,
    /// Timestamp of the last item this view reflects.
    local_timestamp: u64,
    /// Projection of the last fetched (or adopted) item.
    document_state: Option<DocumentState>,
    /// Set after a transport failure: the next successful fetch goes Stale.
    reload_on_reconnect: bool,
    /// Successful appends recorded by this controller.
    appends: u64,
}

impl SyncController {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            state: SyncState::Unknown,
            local_timestamp: 0,
            document_state: None,
            reload_on_reconnect: false,
            appends: 0,
        }
    }

    pub fn principal(&self) -> PrincipalId {
        self.principal
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn local_timestamp(&self) -> u64 {
        self.local_timestamp
    }

    /// Projection of the latest known item, for the engine.
    pub fn document_state(&self) -> Option<&DocumentState> {
        self.document_state.as_ref()
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_on_reconnect
    }

    pub fn appends(&self) -> u64 {
        self.appends
    }

    fn transition(&mut self, next: SyncState) {
        if self.state != next {
            info!("Sync state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Fold in the result of a fetch of the latest item.
    ///
    /// Returns the projected state when the view is editable.
    pub fn observe(
        &mut self,
        fetch: Result<&LatestItem, &AuditApiError>,
    ) -> Result<&DocumentState, SyncError> {
        let latest = match fetch {
            Ok(latest) => latest,
            Err(AuditApiError::Network(msg)) => {
                warn!("Audit fetch failed, will reload on reconnect: {}", msg);
                self.reload_on_reconnect = true;
                self.transition(SyncState::NetworkError);
                return Err(SyncError::Network(msg.clone()));
            }
            Err(AuditApiError::Busy) => return Err(self.busy()),
            Err(AuditApiError::SessionExpired) => return Err(SyncError::SessionExpired),
            Err(AuditApiError::NotFound(document)) => {
                error!("Audit fetch failed: document {} not found", document);
                return Err(SyncError::NotFound(*document));
            }
        };

        let projected = DocumentState::project(&latest.item);
        self.document_state = Some(projected);

        if let LockGrant::HeldBy(holder) = latest.lock {
            if holder != self.principal {
                self.transition(SyncState::Locked { holder });
                return Err(SyncError::Locked { holder });
            }
        }

        if latest.item.timestamp != self.local_timestamp || self.reload_on_reconnect {
            trace!(
                "Server at {}, local at {}, reload pending {}",
                latest.item.timestamp, self.local_timestamp, self.reload_on_reconnect
            );
            self.transition(SyncState::Stale);
            return Err(SyncError::Stale {
                local: self.local_timestamp,
            });
        }

        self.transition(SyncState::UpToDate);
        self.document_state.as_ref().ok_or(SyncError::Stale {
            local: self.local_timestamp,
        })
    }

    /// Map a status from a mutating call onto the sync state.
    pub fn check_status(&mut self, status: StatusCode) -> Result<(), SyncError> {
        match status.class() {
            StatusClass::Success => Ok(()),
            StatusClass::Busy => Err(self.busy()),
            StatusClass::SessionExpired => Err(SyncError::SessionExpired),
            StatusClass::Conflict => {
                self.transition(SyncState::Stale);
                Err(SyncError::Stale {
                    local: self.local_timestamp,
                })
            }
            StatusClass::NetworkFailure => {
                self.reload_on_reconnect = true;
                self.transition(SyncState::NetworkError);
                Err(SyncError::Network(format!("status {}", status)))
            }
            StatusClass::ServerError => {
                error!("Audit service returned {}", status);
                Err(SyncError::Server(status))
            }
        }
    }

    /// Busy is retryable: the view is not known to be stale, so no reload
    /// is scheduled.
    fn busy(&mut self) -> SyncError {
        warn!("Audit service busy");
        self.transition(SyncState::NetworkError);
        SyncError::Busy
    }

    /// Record the outcome of appending one locally drafted item.
    pub fn record_append<'a>(
        &mut self,
        response: &'a AppendResponse,
    ) -> Result<&'a AuditLogItem, SyncError> {
        self.check_status(response.status)?;
        let Some(item) = response.item.as_ref() else {
            error!("Append succeeded without a stamped item");
            return Err(SyncError::Server(response.status));
        };
        self.appends += 1;
        self.adopt(item);
        Ok(item)
    }

    /// Take `item` as the state this view now reflects.
    pub fn adopt(&mut self, item: &AuditLogItem) {
        self.local_timestamp = item.timestamp;
        self.document_state = Some(DocumentState::project(item));
        self.reload_on_reconnect = false;
        self.transition(SyncState::UpToDate);
    }
}
