//! The audit service seam and an in-memory implementation of it.
//!
//! The audit log lives on a server that stamps and stores items, holds the
//! per-document write lock, and keeps the latest content. Clients only see
//! it through [`AuditApi`]. [`MemoryAuditStore`] implements the same
//! contract in process for tests and the CLI: hand each simulated client
//! its own [`MemoryClient`] so lock ownership works as it would remotely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kiroku_doc::DocumentSnapshot;
use kiroku_types::{ActionType, AuditLogItem, DocumentId, PrincipalId, Stage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::LOCK_TTL;

// ============================================================================
// Wire types
// ============================================================================

/// Status returned by mutating calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);
    pub const BUSY: StatusCode = StatusCode(100);
    pub const SESSION_EXPIRED: StatusCode = StatusCode(401);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const CONFLICT: StatusCode = StatusCode(409);
    /// Transport failure; the request may or may not have landed.
    pub const NETWORK_FAILURE: StatusCode = StatusCode(-1);

    pub fn class(&self) -> StatusClass {
        match self.0 {
            0 => StatusClass::Success,
            -1 => StatusClass::NetworkFailure,
            100..=199 => StatusClass::Busy,
            401 => StatusClass::SessionExpired,
            400..=499 => StatusClass::Conflict,
            _ => StatusClass::ServerError,
        }
    }

    pub fn is_success(&self) -> bool {
        self.class() == StatusClass::Success
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Retry later.
    Busy,
    SessionExpired,
    /// Stale base or lock conflict.
    Conflict,
    NetworkFailure,
    ServerError,
}

/// Outcome of a lock request on fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockGrant {
    NotRequested,
    Acquired,
    HeldBy(PrincipalId),
}

/// The latest audit item plus what happened to the lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestItem {
    pub item: AuditLogItem,
    pub lock: LockGrant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResponse {
    pub status: StatusCode,
    /// The stamped item, on success.
    pub item: Option<AuditLogItem>,
}

impl AppendResponse {
    pub fn failed(status: StatusCode) -> Self {
        Self { status, item: None }
    }
}

/// A stage transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    pub stage: Stage,
    pub locale: String,
    pub reason: Option<String>,
    /// Client time of the request, Unix millis.
    pub time: u64,
    pub page_count: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditApiError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("session expired")]
    SessionExpired,

    #[error("audit service busy")]
    Busy,

    #[error("document {0} not found")]
    NotFound(DocumentId),
}

// ============================================================================
// AuditApi
// ============================================================================

#[async_trait]
pub trait AuditApi: Send + Sync {
    /// Latest item, optionally taking the write lock.
    async fn fetch_latest_audit_item(
        &self,
        document: DocumentId,
        acquire_lock: bool,
    ) -> Result<LatestItem, AuditApiError>;

    /// Current content, for a full reload.
    async fn fetch_document(&self, document: DocumentId) -> Result<DocumentSnapshot, AuditApiError>;

    /// Append a drafted item with the content it produced. The server
    /// rejects drafts whose base timestamp is not its latest.
    async fn append_audit_item(
        &self,
        document: DocumentId,
        item: AuditLogItem,
        content: DocumentSnapshot,
        locale: &str,
        leave_lock: bool,
    ) -> AppendResponse;

    async fn set_stage(&self, document: DocumentId, change: StageChange) -> StatusCode;

    async fn release_lock(&self, document: DocumentId) -> StatusCode;
}

// ============================================================================
// MemoryAuditStore
// ============================================================================

/// Injected failure for every call made through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Offline,
    Busy,
    Expired,
}

#[derive(Debug)]
struct Lock {
    holder: PrincipalId,
    expires: Instant,
}

#[derive(Debug)]
struct StoredDocument {
    log: Vec<AuditLogItem>,
    content: DocumentSnapshot,
    lock: Option<Lock>,
}

impl StoredDocument {
    fn latest(&self) -> Option<&AuditLogItem> {
        self.log.last()
    }

    /// Current holder, ignoring expired locks.
    fn holder(&self, now: Instant) -> Option<PrincipalId> {
        self.lock
            .as_ref()
            .filter(|l| l.expires > now)
            .map(|l| l.holder)
    }
}

#[derive(Debug)]
struct StoreInner {
    documents: HashMap<DocumentId, StoredDocument>,
    last_stamp: u64,
    lock_ttl: Duration,
    fault: Option<Fault>,
    /// Status the next append fails with, leaving every other call alone.
    append_rejection: Option<StatusCode>,
}

impl StoreInner {
    /// Strictly increasing server timestamps.
    fn stamp(&mut self) -> u64 {
        self.last_stamp = kiroku_types::now_millis().max(self.last_stamp + 1);
        self.last_stamp
    }
}

/// In-process audit server.
#[derive(Debug, Clone)]
pub struct MemoryAuditStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::with_lock_ttl(LOCK_TTL)
    }

    pub fn with_lock_ttl(lock_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                documents: HashMap::new(),
                last_stamp: 0,
                lock_ttl,
                fault: None,
                append_rejection: None,
            })),
        }
    }

    /// Register a document with its genesis item.
    pub fn register(&self, content: DocumentSnapshot, empty_cells: u32, stage: Stage) -> DocumentId {
        let mut inner = self.inner.lock();
        let mut genesis = AuditLogItem::genesis(empty_cells, stage);
        genesis.timestamp = inner.stamp();
        let id = DocumentId::new();
        inner.documents.insert(
            id,
            StoredDocument {
                log: vec![genesis],
                content,
                lock: None,
            },
        );
        info!("Registered document {} with {} empty cells", id, empty_cells);
        id
    }

    /// Register a document with a previously persisted log. Returns `None`
    /// for an empty log.
    pub fn restore(&self, content: DocumentSnapshot, log: Vec<AuditLogItem>) -> Option<DocumentId> {
        let last = log.last()?.timestamp;
        let mut inner = self.inner.lock();
        inner.last_stamp = inner.last_stamp.max(last);
        let id = DocumentId::new();
        info!("Restored document {} with {} audit items", id, log.len());
        inner.documents.insert(
            id,
            StoredDocument {
                log,
                content,
                lock: None,
            },
        );
        Some(id)
    }

    /// A handle acting as `principal`.
    pub fn client(&self, principal: PrincipalId) -> MemoryClient {
        MemoryClient {
            store: self.clone(),
            principal,
        }
    }

    pub fn set_fault(&self, fault: Option<Fault>) {
        self.inner.lock().fault = fault;
    }

    /// Fail the next append with `status`. The lock stays where it is.
    pub fn reject_next_append(&self, status: StatusCode) {
        self.inner.lock().append_rejection = Some(status);
    }

    pub fn log(&self, document: DocumentId) -> Vec<AuditLogItem> {
        self.inner
            .lock()
            .documents
            .get(&document)
            .map(|d| d.log.clone())
            .unwrap_or_default()
    }

    pub fn content(&self, document: DocumentId) -> Option<DocumentSnapshot> {
        self.inner
            .lock()
            .documents
            .get(&document)
            .map(|d| d.content.clone())
    }

    pub fn lock_holder(&self, document: DocumentId) -> Option<PrincipalId> {
        let now = Instant::now();
        self.inner
            .lock()
            .documents
            .get(&document)
            .and_then(|d| d.holder(now))
    }
}

/// One client's connection to a [`MemoryAuditStore`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    store: MemoryAuditStore,
    principal: PrincipalId,
}

impl MemoryClient {
    pub fn principal(&self) -> PrincipalId {
        self.principal
    }

    pub fn store(&self) -> &MemoryAuditStore {
        &self.store
    }

    fn fault_error(fault: Fault) -> AuditApiError {
        match fault {
            Fault::Offline => AuditApiError::Network("connection refused".into()),
            Fault::Busy => AuditApiError::Busy,
            Fault::Expired => AuditApiError::SessionExpired,
        }
    }

    fn fault_status(fault: Fault) -> StatusCode {
        match fault {
            Fault::Offline => StatusCode::NETWORK_FAILURE,
            Fault::Busy => StatusCode::BUSY,
            Fault::Expired => StatusCode::SESSION_EXPIRED,
        }
    }
}

#[async_trait]
impl AuditApi for MemoryClient {
    async fn fetch_latest_audit_item(
        &self,
        document: DocumentId,
        acquire_lock: bool,
    ) -> Result<LatestItem, AuditApiError> {
        let mut inner = self.store.inner.lock();
        if let Some(fault) = inner.fault {
            return Err(Self::fault_error(fault));
        }
        let ttl = inner.lock_ttl;
        let now = Instant::now();
        let doc = inner
            .documents
            .get_mut(&document)
            .ok_or(AuditApiError::NotFound(document))?;
        let item = doc
            .latest()
            .cloned()
            .ok_or(AuditApiError::NotFound(document))?;

        let lock = if !acquire_lock {
            LockGrant::NotRequested
        } else {
            match doc.holder(now) {
                Some(holder) if holder != self.principal => LockGrant::HeldBy(holder),
                _ => {
                    doc.lock = Some(Lock {
                        holder: self.principal,
                        expires: now + ttl,
                    });
                    LockGrant::Acquired
                }
            }
        };
        debug!("Fetched latest item for {} ({:?})", document, lock);
        Ok(LatestItem { item, lock })
    }

    async fn fetch_document(&self, document: DocumentId) -> Result<DocumentSnapshot, AuditApiError> {
        let inner = self.store.inner.lock();
        if let Some(fault) = inner.fault {
            return Err(Self::fault_error(fault));
        }
        inner
            .documents
            .get(&document)
            .map(|d| d.content.clone())
            .ok_or(AuditApiError::NotFound(document))
    }

    async fn append_audit_item(
        &self,
        document: DocumentId,
        mut item: AuditLogItem,
        content: DocumentSnapshot,
        _locale: &str,
        leave_lock: bool,
    ) -> AppendResponse {
        let mut inner = self.store.inner.lock();
        if let Some(fault) = inner.fault {
            return AppendResponse::failed(Self::fault_status(fault));
        }
        if let Some(status) = inner.append_rejection.take() {
            warn!("Append to {} rejected with {}", document, status);
            return AppendResponse::failed(status);
        }
        let ttl = inner.lock_ttl;
        let now = Instant::now();
        let stamp = match inner.documents.get(&document) {
            None => return AppendResponse::failed(StatusCode::NOT_FOUND),
            Some(doc) => {
                if let Some(holder) = doc.holder(now).filter(|h| *h != self.principal) {
                    warn!("Append to {} refused: locked by {}", document, holder);
                    return AppendResponse::failed(StatusCode::CONFLICT);
                }
                let latest = doc.latest().map_or(0, |i| i.timestamp);
                if item.base_timestamp != latest {
                    warn!(
                        "Append to {} refused: base {} is not latest {}",
                        document, item.base_timestamp, latest
                    );
                    return AppendResponse::failed(StatusCode::CONFLICT);
                }
                inner.stamp()
            }
        };
        item.timestamp = stamp;
        let Some(doc) = inner.documents.get_mut(&document) else {
            return AppendResponse::failed(StatusCode::NOT_FOUND);
        };
        doc.log.push(item.clone());
        doc.content = content;
        doc.lock = leave_lock.then(|| Lock {
            holder: self.principal,
            expires: now + ttl,
        });
        info!(
            "Appended {} to {} at {} (log length {})",
            item.action,
            document,
            stamp,
            doc.log.len()
        );
        AppendResponse {
            status: StatusCode::SUCCESS,
            item: Some(item),
        }
    }

    async fn set_stage(&self, document: DocumentId, change: StageChange) -> StatusCode {
        let mut inner = self.store.inner.lock();
        if let Some(fault) = inner.fault {
            return Self::fault_status(fault);
        }
        let now = Instant::now();
        let stamp = inner.stamp();
        let Some(doc) = inner.documents.get_mut(&document) else {
            return StatusCode::NOT_FOUND;
        };
        if doc.holder(now).is_some_and(|h| h != self.principal) {
            return StatusCode::CONFLICT;
        }
        let Some(latest) = doc.latest() else {
            return StatusCode::NOT_FOUND;
        };
        let state = kiroku_types::DocumentState::project(latest);
        let mut item = AuditLogItem::follow(&state, self.principal, ActionType::StageChange);
        item.timestamp = stamp;
        item.stage = change.stage;
        item.reason = change.reason;
        doc.log.push(item);
        doc.lock = None;
        info!("Document {} moved to stage {}", document, change.stage);
        StatusCode::SUCCESS
    }

    async fn release_lock(&self, document: DocumentId) -> StatusCode {
        let mut inner = self.store.inner.lock();
        if let Some(fault) = inner.fault {
            return Self::fault_status(fault);
        }
        let Some(doc) = inner.documents.get_mut(&document) else {
            return StatusCode::NOT_FOUND;
        };
        if doc.lock.as_ref().is_some_and(|l| l.holder == self.principal) {
            doc.lock = None;
            debug!("Released lock on {}", document);
        }
        StatusCode::SUCCESS
    }
}
