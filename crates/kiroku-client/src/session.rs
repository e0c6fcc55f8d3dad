//! Edit sessions: one client's open view of one document.
//!
//! An [`EditSession`] ties the document model and insertion engine to the
//! audit service. Every mutation goes through [`EditSession::commit`]:
//!
//! 1. refuse while a reload is running or the document is Closed
//! 2. fetch the latest item with the lock; stale views reload and refuse
//! 3. apply the engine operation locally
//! 4. draft exactly one audit item and append it with the new content
//! 5. adopt the stamped item, or roll the local change back on failure

use kiroku_doc::{
    EngineError, EntryContext, FormDocument, InsertRequest, InsertionEngine, InsertionOutcome,
};
use kiroku_types::{
    AuditLogItem, DocumentId, DocumentState, MarkerCounter, PrincipalId, Selection, SessionId,
    Stage,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::audit_api::{AuditApi, AuditApiError, StageChange, StatusCode};
use crate::config::ClientConfig;
use crate::gate::{GateDecision, NotificationGate};
use crate::reload::{ReloadError, ReloadEvent, ReloadMachine, Restore};
use crate::sync::{SyncController, SyncError, SyncState};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("document is locked by {holder}")]
    LockConflict { holder: PrincipalId },

    #[error("document changed on the server and has been reloaded")]
    StaleDocument,

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("session expired")]
    SessionExpired,

    #[error("reload did not complete after {attempts} polls")]
    ReloadTimeout { attempts: u32 },

    #[error("a reload is in progress")]
    ReloadInProgress,

    #[error("document is in stage {0} and accepts no insertions")]
    StageClosed(Stage),

    #[error("audit service busy, retry later")]
    Busy,

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error("audit service error (status {0})")]
    Server(StatusCode),

    #[error("reload state error: {0}")]
    Reload(ReloadError),
}

impl SessionError {
    /// Errors the user fixes by choosing another place or value.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(self, SessionError::Engine(e) if e.is_user_recoverable())
    }
}

impl From<SyncError> for SessionError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Locked { holder } => SessionError::LockConflict { holder },
            SyncError::Stale { .. } => SessionError::StaleDocument,
            SyncError::Network(msg) => SessionError::NetworkFailure(msg),
            SyncError::SessionExpired => SessionError::SessionExpired,
            SyncError::Busy => SessionError::Busy,
            SyncError::NotFound(document) => SessionError::NotFound(document),
            SyncError::Server(status) => SessionError::Server(status),
        }
    }
}

impl From<ReloadError> for SessionError {
    fn from(e: ReloadError) -> Self {
        match e {
            ReloadError::InProgress => SessionError::ReloadInProgress,
            ReloadError::Timeout { attempts } => SessionError::ReloadTimeout { attempts },
            other => SessionError::Reload(other),
        }
    }
}

impl From<AuditApiError> for SessionError {
    fn from(e: AuditApiError) -> Self {
        match e {
            AuditApiError::Network(msg) => SessionError::NetworkFailure(msg),
            AuditApiError::SessionExpired => SessionError::SessionExpired,
            AuditApiError::Busy => SessionError::Busy,
            AuditApiError::NotFound(id) => SessionError::NotFound(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

// ============================================================================
// EditSession
// ============================================================================

pub struct EditSession<A: AuditApi> {
    api: A,
    id: SessionId,
    document_id: DocumentId,
    config: ClientConfig,
    engine: InsertionEngine,
    doc: FormDocument,
    sync: SyncController,
    reload: ReloadMachine,
    selection_gate: NotificationGate,
    change_gate: NotificationGate,
    markers: MarkerCounter,
    selection: Option<Selection>,
    pending_selection: Option<Selection>,
}

impl<A: AuditApi> EditSession<A> {
    /// Open `document_id` as `principal`: fetch the latest item and the
    /// content, load it, and adopt the item as the local state.
    pub async fn open(
        api: A,
        document_id: DocumentId,
        principal: PrincipalId,
        config: ClientConfig,
    ) -> Result<Self> {
        // Latest first: content newer than the item only makes the view stale.
        let latest = api.fetch_latest_audit_item(document_id, false).await?;
        let snapshot = api.fetch_document(document_id).await?;
        let doc = FormDocument::load(&snapshot, &config.fonts)?;

        let engine = InsertionEngine::new(
            config.fonts.clone(),
            config.palette.clone(),
            config.boundary_policy,
        );
        let mut sync = SyncController::new(principal);
        sync.adopt(&latest.item);

        let debounce = config.timing.debounce();
        let session = Self {
            api,
            id: SessionId::new(),
            document_id,
            engine,
            doc,
            sync,
            reload: ReloadMachine::new(&config.timing),
            selection_gate: NotificationGate::new("selection", debounce),
            change_gate: NotificationGate::new("document", debounce),
            markers: MarkerCounter::resume_after(latest.item.marker_counter),
            selection: None,
            pending_selection: None,
            config,
        };
        info!(
            "Session {} opened {} at {} (stage {})",
            session.id.short(),
            document_id,
            latest.item.timestamp,
            latest.item.stage
        );
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn document(&self) -> &FormDocument {
        &self.doc
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn local_timestamp(&self) -> u64 {
        self.sync.local_timestamp()
    }

    pub fn document_state(&self) -> Option<&DocumentState> {
        self.sync.document_state()
    }

    pub fn markers(&self) -> MarkerCounter {
        self.markers
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = Some(selection);
    }

    pub fn is_reloading(&self) -> bool {
        self.reload.is_active()
    }

    pub fn reload_events(&self) -> broadcast::Receiver<ReloadEvent> {
        self.reload.subscribe()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn stage(&self) -> Stage {
        self.sync.document_state().map_or(Stage::default(), |s| s.stage)
    }

    fn ensure_insertable(&self) -> Result<()> {
        let stage = self.stage();
        if stage.allows_insertion() {
            Ok(())
        } else {
            warn!("Insertion refused in stage {}", stage);
            Err(SessionError::StageClosed(stage))
        }
    }

    /// Entry context for an entry made now.
    pub fn entry_context(&self) -> EntryContext {
        self.entry_context_at(kiroku_types::now_millis(), false)
    }

    fn entry_context_at(&self, timestamp: u64, late_entry: bool) -> EntryContext {
        let identity = &self.config.identity;
        EntryContext {
            initials: identity.initials.clone(),
            legal_name: identity.legal_name.clone(),
            timestamp,
            utc_offset_minutes: identity.utc_offset_minutes,
            late_entry,
        }
    }

    // ------------------------------------------------------------------------
    // Commit protocol
    // ------------------------------------------------------------------------

    /// Apply `request` and record it in the audit log.
    pub async fn commit(&mut self, request: InsertRequest) -> Result<InsertionOutcome> {
        let ctx = self.entry_context();
        let span = info_span!("commit", action = %request.action(), document = %self.document_id);
        self.commit_with(&request, ctx).instrument(span).await
    }

    /// Like [`commit`](Self::commit), for an entry recorded after the fact
    /// at `entry_time` (Unix millis).
    pub async fn commit_late(
        &mut self,
        request: InsertRequest,
        entry_time: u64,
    ) -> Result<InsertionOutcome> {
        let ctx = self.entry_context_at(entry_time, true);
        let span = info_span!("commit", action = %request.action(), late = true);
        self.commit_with(&request, ctx).instrument(span).await
    }

    async fn commit_with(
        &mut self,
        request: &InsertRequest,
        ctx: EntryContext,
    ) -> Result<InsertionOutcome> {
        if self.reload.is_active() {
            warn!("{} refused: reload in progress", request.action());
            return Err(SessionError::ReloadInProgress);
        }
        self.ensure_insertable()?;

        let fetched = self
            .api
            .fetch_latest_audit_item(self.document_id, true)
            .await;
        match self.sync.observe(fetched.as_ref()) {
            Ok(_) => {}
            Err(SyncError::Stale { local }) => {
                warn!("{} refused: view at {} is stale, reloading", request.action(), local);
                self.release_lock_quietly().await;
                self.reload().await?;
                return Err(SessionError::StaleDocument);
            }
            Err(e) => {
                warn!("{} refused: {}", request.action(), e);
                return Err(e.into());
            }
        }

        // The stage may have moved since the last fetch.
        if let Err(e) = self.ensure_insertable() {
            self.release_lock_quietly().await;
            return Err(e);
        }

        let Some(state) = self.sync.document_state().cloned() else {
            self.release_lock_quietly().await;
            return Err(SessionError::StaleDocument);
        };
        self.markers.observe(state.marker_counter);

        let backup = self.doc.clone();
        let outcome = match self
            .engine
            .apply(&mut self.doc, &mut self.markers, &ctx, request)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} refused by engine: {}", request.action(), e);
                self.doc = backup;
                self.release_lock_quietly().await;
                return Err(e.into());
            }
        };

        let item = self.draft(&state, &outcome, &ctx);
        let content = match self.doc.snapshot() {
            Ok(content) => content,
            Err(e) => {
                self.doc = backup;
                self.release_lock_quietly().await;
                return Err(e.into());
            }
        };

        let response = self
            .api
            .append_audit_item(
                self.document_id,
                item,
                content,
                &self.config.identity.locale,
                false,
            )
            .await;
        let failure = match self.sync.record_append(&response) {
            Ok(stamped) => {
                info!(
                    "Committed {} as item {} at {}",
                    stamped.action,
                    stamped.id.short(),
                    stamped.timestamp
                );
                None
            }
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            error!("Append of {} failed, rolling back: {}", outcome.action, e);
            self.doc = backup;
            self.release_lock_quietly().await;
            if matches!(e, SyncError::Stale { .. }) {
                self.reload().await?;
            }
            return Err(e.into());
        }

        self.selection = Some(Selection::caret(outcome.caret.clone()));
        Ok(outcome)
    }

    /// Exactly one item per accepted mutation.
    fn draft(
        &self,
        state: &DocumentState,
        outcome: &InsertionOutcome,
        ctx: &EntryContext,
    ) -> AuditLogItem {
        let mut item = AuditLogItem::follow(state, self.sync.principal(), outcome.action);
        item.inserted_text = outcome.inserted_text.clone();
        item.removed_text = outcome.removed_text.clone();
        item.marker_counter = self.markers.last();
        item.empty_cell_delta = outcome.empty_cell_delta;
        item.empty_cells = state.empty_cells.saturating_add_signed(outcome.empty_cell_delta);
        item.attachment_counter = state.attachment_counter + outcome.attachment_delta;
        item.approval_count = state.approval_count + outcome.approval_delta;
        item.timezone = ctx.timezone();
        item.reason = outcome.reason.clone();
        item
    }

    async fn release_lock_quietly(&self) {
        let status = self.api.release_lock(self.document_id).await;
        if !status.is_success() {
            debug!("Lock release on {} returned {}", self.document_id, status);
        }
    }

    // ------------------------------------------------------------------------
    // Reload
    // ------------------------------------------------------------------------

    /// Replace the content with the server's, restoring the selection.
    pub async fn reload(&mut self) -> Result<Restore> {
        let restore = self
            .selection
            .clone()
            .map_or(Restore::Nothing, Restore::Selection);
        self.reload_with(restore).await
    }

    /// Reload, then hand `restore` back once the new content has rendered.
    pub async fn reload_with(&mut self, restore: Restore) -> Result<Restore> {
        let span = info_span!("reload", document = %self.document_id);
        self.reload_inner(restore).instrument(span).await
    }

    async fn reload_inner(&mut self, restore: Restore) -> Result<Restore> {
        self.reload.begin(restore)?;
        self.pending_selection = None;

        let fetched = async {
            let latest = self.api.fetch_latest_audit_item(self.document_id, false).await?;
            let snapshot = self.api.fetch_document(self.document_id).await?;
            Ok::<_, AuditApiError>((latest, snapshot))
        }
        .await;
        let (latest, snapshot) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.reload.abort();
                return Err(e.into());
            }
        };
        let fresh = match FormDocument::load(&snapshot, self.engine.fonts()) {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("Reloaded content failed to load: {}", e);
                self.reload.abort();
                return Err(e.into());
            }
        };
        if let Err(e) = self.doc.writable().reload_from(fresh) {
            self.reload.abort();
            return Err(e.into());
        }
        self.sync.adopt(&latest.item);
        self.markers.observe(latest.item.marker_counter);

        let restored = self.reload.drive(&self.doc).await?;
        if let Restore::Selection(sel) = &restored {
            // Positions past the new content are dropped.
            let valid = self.doc.locate(sel.start()).is_ok() && self.doc.locate(sel.end()).is_ok();
            self.selection = valid.then(|| sel.clone());
        }
        info!("Reloaded {} at {}", self.document_id, latest.item.timestamp);
        Ok(restored)
    }

    /// Fetch the latest item without the lock, reloading if stale.
    pub async fn check_sync(&mut self) -> Result<SyncState> {
        let fetched = self
            .api
            .fetch_latest_audit_item(self.document_id, false)
            .instrument(info_span!("sync.check"))
            .await;
        match self.sync.observe(fetched.as_ref()) {
            Ok(_) => Ok(self.sync.state()),
            Err(SyncError::Stale { .. }) => {
                self.reload().await?;
                Ok(self.sync.state())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    pub fn notify_selection(&mut self, selection: Selection) -> GateDecision {
        let decision = self
            .selection_gate
            .notify(Instant::now(), self.reload.is_active());
        if decision == GateDecision::Pending {
            self.pending_selection = Some(selection);
        }
        decision
    }

    /// Deliver a debounced selection change, if one is due.
    pub fn poll_selection(&mut self) -> Option<Selection> {
        if !self
            .selection_gate
            .take_ready(Instant::now(), self.reload.is_active())
        {
            return None;
        }
        let selection = self.pending_selection.take();
        if let Some(sel) = &selection {
            self.selection = Some(sel.clone());
        }
        self.selection_gate.finish();
        selection
    }

    pub fn notify_document_changed(&mut self) -> GateDecision {
        self.change_gate
            .notify(Instant::now(), self.reload.is_active())
    }

    /// Handle a debounced document change by checking sync state.
    pub async fn poll_document_changed(&mut self) -> Result<Option<SyncState>> {
        if !self
            .change_gate
            .take_ready(Instant::now(), self.reload.is_active())
        {
            return Ok(None);
        }
        let result = self.check_sync().await;
        self.change_gate.finish();
        result.map(Some)
    }

    // ------------------------------------------------------------------------
    // Stage and lock
    // ------------------------------------------------------------------------

    pub async fn set_stage(&mut self, stage: Stage, reason: Option<String>) -> Result<()> {
        if self.reload.is_active() {
            return Err(SessionError::ReloadInProgress);
        }
        let change = StageChange {
            stage,
            locale: self.config.identity.locale.clone(),
            reason,
            time: kiroku_types::now_millis(),
            page_count: self.doc.page_count(),
        };
        let status = self.api.set_stage(self.document_id, change).await;
        self.sync.check_status(status)?;

        // Adopt the stage item directly when nothing else landed before it.
        let latest = self
            .api
            .fetch_latest_audit_item(self.document_id, false)
            .await?;
        if latest.item.base_timestamp == self.sync.local_timestamp()
            && latest.item.stage == stage
        {
            self.sync.adopt(&latest.item);
        } else {
            self.reload().await?;
        }
        info!("Document {} now in stage {}", self.document_id, stage);
        Ok(())
    }

    pub async fn release_lock(&mut self) -> Result<()> {
        let status = self.api.release_lock(self.document_id).await;
        self.sync.check_status(status)?;
        Ok(())
    }

    /// Leave the document, releasing any lock this session holds.
    pub async fn close(mut self) -> Result<()> {
        self.release_lock().await?;
        info!("Session {} closed", self.id.short());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_api::{Fault, MemoryAuditStore, MemoryClient};
    use kiroku_doc::DocumentSnapshot;
    use kiroku_types::{ActionType, DocumentPosition};

    const FORM: &str = r#"{"blocks":[
        {"type":"paragraph","runs":[{"text":"1. Record the weight.","font":"Calibri"}]},
        {"type":"table","rows":[{"cells":[
            {"shading":"FFFFFF","paragraphs":[{"runs":[{"text":"Weight","font":"Calibri"}]}]},
            {"shading":"FFF2CC","paragraphs":[{"runs":[]}]}
        ]}]},
        {"type":"paragraph","runs":[{"text":"2. Sign below.","font":"Calibri"}]}
    ]}"#;

    fn config(initials: &str) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.identity.initials = initials.into();
        config.identity.legal_name = format!("{initials} Person");
        config
    }

    fn caret(segs: &[u32]) -> Selection {
        Selection::caret(DocumentPosition::new(segs.to_vec()))
    }

    async fn setup() -> (MemoryAuditStore, DocumentId) {
        let store = MemoryAuditStore::new();
        let doc = store.register(DocumentSnapshot::new(FORM), 1, Stage::Execute);
        (store, doc)
    }

    async fn open_as(store: &MemoryAuditStore, doc: DocumentId, initials: &str) -> EditSession<MemoryClient> {
        let client = store.client(PrincipalId::new());
        let principal = client.principal();
        EditSession::open(client, doc, principal, config(initials))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_appends_one_item() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;

        let outcome = session
            .commit(InsertRequest::Text {
                selection: caret(&[1, 0, 1, 0, 0]),
                text: "12.5 g".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.action, ActionType::Entry);
        assert_eq!(outcome.empty_cell_delta, -1);

        let log = store.log(doc);
        assert_eq!(log.len(), 2);
        let item = &log[1];
        assert_eq!(item.action, ActionType::Entry);
        assert_eq!(item.empty_cells, 0);
        assert_eq!(item.base_timestamp, log[0].timestamp);
        assert_eq!(session.local_timestamp(), item.timestamp);
        assert_eq!(session.sync_state(), SyncState::UpToDate);
        // Lock left with the append.
        assert_eq!(store.lock_holder(doc), None);
        assert_eq!(session.selection(), Some(&Selection::caret(outcome.caret)));

        let stored = FormDocument::load(&store.content(doc).unwrap(), &Default::default()).unwrap();
        assert_eq!(&stored, session.document());
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_refusal_leaves_log_and_lock_alone() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        let err = session
            .commit(InsertRequest::Checkbox {
                selection: caret(&[0, 3]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::NoCheckbox)));
        assert!(err.is_user_recoverable());
        assert_eq!(store.log(doc).len(), 1);
        assert_eq!(store.lock_holder(doc), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_refusal_restores_document() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        let before = session.document().snapshot().unwrap();
        let err = session
            .commit(InsertRequest::Correction {
                selection: caret(&[1, 0, 1, 0, 0]),
                replacement: "13 g".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::EmptySelection)));
        assert_eq!(session.document().snapshot().unwrap(), before);
        assert!(session.document().is_read_only());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_append_rolls_back_and_retries() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        let before = session.document().clone();
        let entry = InsertRequest::Text {
            selection: caret(&[1, 0, 1, 0, 0]),
            text: "12.5 g".into(),
        };

        store.reject_next_append(StatusCode::BUSY);
        let err = session.commit(entry.clone()).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy));
        // The shading toggle and the entry are both gone.
        assert_eq!(session.document(), &before);
        assert_eq!(store.lock_holder(doc), None);
        assert_eq!(store.log(doc).len(), 1);
        assert_eq!(session.sync_state(), SyncState::NetworkError);

        let outcome = session.commit(entry).await.unwrap();
        assert_eq!(outcome.empty_cell_delta, -1);
        assert_eq!(store.log(doc).len(), 2);
        assert_eq!(session.sync_state(), SyncState::UpToDate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_append_rolls_back_and_reloads() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        let before = session.document().clone();
        let mut events = session.reload_events();

        store.reject_next_append(StatusCode::CONFLICT);
        let err = session
            .commit(InsertRequest::Text {
                selection: caret(&[1, 0, 1, 0, 0]),
                text: "12.5 g".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleDocument));
        assert_eq!(events.try_recv().unwrap(), ReloadEvent::Started);
        assert!(!session.is_reloading());
        assert_eq!(session.sync_state(), SyncState::UpToDate);
        assert_eq!(session.document(), &before);
        assert_eq!(store.lock_holder(doc), None);
        assert_eq!(store.log(doc).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_conflict() {
        let (store, doc) = setup().await;
        let mut a = open_as(&store, doc, "AA").await;
        let holder = store.client(PrincipalId::new());
        holder.fetch_latest_audit_item(doc, true).await.unwrap();

        let err = a
            .commit(InsertRequest::Inline {
                position: DocumentPosition::new(vec![2, 14]),
                text: "done".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::LockConflict { holder: h } if h == holder.principal()));
        assert_eq!(a.sync_state(), SyncState::Locked { holder: holder.principal() });
        assert_eq!(store.log(doc).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stage_refuses() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        session
            .set_stage(Stage::Closed, Some("complete".into()))
            .await
            .unwrap();
        assert_eq!(session.document_state().unwrap().stage, Stage::Closed);
        let err = session
            .commit(InsertRequest::Inline {
                position: DocumentPosition::new(vec![2, 14]),
                text: "late".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StageClosed(Stage::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_then_reload_on_reconnect() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        store.set_fault(Some(Fault::Offline));
        let err = session
            .commit(InsertRequest::Inline {
                position: DocumentPosition::new(vec![2, 14]),
                text: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NetworkFailure(_)));
        assert_eq!(session.sync_state(), SyncState::NetworkError);

        store.set_fault(None);
        let err = session
            .commit(InsertRequest::Inline {
                position: DocumentPosition::new(vec![2, 14]),
                text: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleDocument));
        assert_eq!(session.sync_state(), SyncState::UpToDate);
        assert!(!session.is_reloading());

        // The reload cleared the pending flag; the next commit lands.
        session
            .commit(InsertRequest::Inline {
                position: DocumentPosition::new(vec![2, 14]),
                text: "x".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.log(doc).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_notifications_are_debounced() {
        let (store, doc) = setup().await;
        let mut session = open_as(&store, doc, "JD").await;
        assert_eq!(session.notify_selection(caret(&[0, 1])), GateDecision::Pending);
        assert_eq!(session.notify_selection(caret(&[0, 2])), GateDecision::Pending);
        assert_eq!(session.poll_selection(), None);

        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert_eq!(session.poll_selection(), Some(caret(&[0, 2])));
        assert_eq!(session.selection(), Some(&caret(&[0, 2])));
        assert_eq!(session.poll_selection(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_change_triggers_sync_check() {
        let (store, doc) = setup().await;
        let mut a = open_as(&store, doc, "AA").await;
        let mut b = open_as(&store, doc, "BB").await;

        a.commit(InsertRequest::Text {
            selection: caret(&[1, 0, 1, 0, 0]),
            text: "12.5 g".into(),
        })
        .await
        .unwrap();

        assert_eq!(b.notify_document_changed(), GateDecision::Pending);
        assert_eq!(b.poll_document_changed().await.unwrap(), None);
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        let state = b.poll_document_changed().await.unwrap();
        assert_eq!(state, Some(SyncState::UpToDate));
        assert_eq!(b.local_timestamp(), a.local_timestamp());
        assert_eq!(b.document(), a.document());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_unknown_document() {
        let store = MemoryAuditStore::new();
        let missing = DocumentId::new();
        let result = EditSession::open(
            store.client(PrincipalId::new()),
            missing,
            PrincipalId::new(),
            config("JD"),
        )
        .await;
        assert!(matches!(result, Err(SessionError::NotFound(id)) if id == missing));
    }
}
