//! Audit log items, the projected document state, and the marker counter.
//!
//! The audit log is append-only. The client drafts an [`AuditLogItem`] for
//! every accepted mutation; the server stamps its timestamp and appends it.
//! Items are never mutated or deleted, and the most recent one is the source
//! of truth for the document: [`DocumentState`] is nothing more than a
//! projection of it, recomputed on every fetch.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{AuditItemId, PrincipalId};
use crate::stage::Stage;

/// What kind of mutation an audit item records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ActionType {
    /// Document registered with the audit store.
    Genesis,
    /// Free text entry with a trailing initials/date line.
    Entry,
    /// Inline entry (free cursor or placeholder) with a compact marker.
    #[strum(serialize = "inline_entry", serialize = "inline")]
    InlineEntry,
    Signature,
    Correction,
    Checkbox,
    Attachment,
    #[strum(serialize = "stage_change", serialize = "stage")]
    StageChange,
}

impl ActionType {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Genesis => "genesis",
            ActionType::Entry => "entry",
            ActionType::InlineEntry => "inline_entry",
            ActionType::Signature => "signature",
            ActionType::Correction => "correction",
            ActionType::Checkbox => "checkbox",
            ActionType::Attachment => "attachment",
            ActionType::StageChange => "stage_change",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verification state carried forward from item to item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VerificationFlags {
    /// The workflow requires a second-person verification signature.
    #[serde(default)]
    pub requires_verification: bool,
    /// A verification signature has been recorded.
    #[serde(default)]
    pub verified: bool,
}

/// One immutable record of a single accepted mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogItem {
    pub id: AuditItemId,
    /// Server timestamp (Unix millis). Zero in an unstamped draft.
    pub timestamp: u64,
    /// The local last-edit timestamp the client drafted this item against.
    pub base_timestamp: u64,
    pub actor: PrincipalId,
    pub action: ActionType,
    #[serde(default)]
    pub inserted_text: String,
    #[serde(default)]
    pub removed_text: String,
    /// Highest marker number allocated so far.
    pub marker_counter: u64,
    /// Cells still awaiting an entry after this mutation.
    pub empty_cells: u32,
    pub empty_cell_delta: i32,
    pub attachment_counter: u32,
    pub approval_count: u32,
    pub stage: Stage,
    #[serde(default)]
    pub verification: VerificationFlags,
    /// UTC offset of the acting client, e.g. `"+02:00"`.
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditLogItem {
    /// The first item of a freshly registered document.
    pub fn genesis(empty_cells: u32, stage: Stage) -> Self {
        Self {
            id: AuditItemId::new(),
            timestamp: 0,
            base_timestamp: 0,
            actor: PrincipalId::server(),
            action: ActionType::Genesis,
            inserted_text: String::new(),
            removed_text: String::new(),
            marker_counter: 0,
            empty_cells,
            empty_cell_delta: 0,
            attachment_counter: 0,
            approval_count: 0,
            stage,
            verification: VerificationFlags::default(),
            timezone: "+00:00".to_string(),
            reason: None,
        }
    }

    /// Draft the next item on top of `state`, carrying counters forward.
    pub fn follow(state: &DocumentState, actor: PrincipalId, action: ActionType) -> Self {
        Self {
            id: AuditItemId::new(),
            timestamp: 0,
            base_timestamp: state.timestamp,
            actor,
            action,
            inserted_text: String::new(),
            removed_text: String::new(),
            marker_counter: state.marker_counter,
            empty_cells: state.empty_cells,
            empty_cell_delta: 0,
            attachment_counter: state.attachment_counter,
            approval_count: state.approval_count,
            stage: state.stage,
            verification: state.verification,
            timezone: state.timezone.clone(),
            reason: None,
        }
    }

    /// Whether the server has stamped this item.
    pub fn is_stamped(&self) -> bool {
        self.timestamp != 0
    }
}

/// Projection of the latest audit item, as consumed by the insertion engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub timestamp: u64,
    pub last_item: AuditItemId,
    pub last_actor: PrincipalId,
    pub marker_counter: u64,
    pub empty_cells: u32,
    pub attachment_counter: u32,
    pub approval_count: u32,
    pub stage: Stage,
    pub verification: VerificationFlags,
    pub timezone: String,
}

impl DocumentState {
    pub fn project(item: &AuditLogItem) -> Self {
        Self {
            timestamp: item.timestamp,
            last_item: item.id,
            last_actor: item.actor,
            marker_counter: item.marker_counter,
            empty_cells: item.empty_cells,
            attachment_counter: item.attachment_counter,
            approval_count: item.approval_count,
            stage: item.stage,
            verification: item.verification,
            timezone: item.timezone.clone(),
        }
    }
}

/// Monotonic per-document marker allocator.
///
/// Numbers are handed out strictly increasing and never reused: an
/// allocation is not rolled back when the mutation that asked for it fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkerCounter {
    last: u64,
}

impl MarkerCounter {
    /// Resume after the highest marker already issued.
    pub fn resume_after(last: u64) -> Self {
        Self { last }
    }

    /// Allocate the next marker number.
    pub fn allocate(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Highest number issued so far.
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Fold in a server-side value. The counter never moves backwards.
    pub fn observe(&mut self, server_last: u64) {
        self.last = self.last.max(server_last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_counter_strictly_increasing() {
        let mut counter = MarkerCounter::resume_after(4);
        let issued: Vec<u64> = (0..50).map(|_| counter.allocate()).collect();
        assert_eq!(issued.first(), Some(&5));
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(counter.last(), 54);
    }

    #[test]
    fn test_marker_counter_never_moves_backwards() {
        let mut counter = MarkerCounter::resume_after(10);
        counter.observe(3);
        assert_eq!(counter.allocate(), 11);
        counter.observe(20);
        assert_eq!(counter.allocate(), 21);
    }

    #[test]
    fn test_follow_carries_counters() {
        let mut genesis = AuditLogItem::genesis(7, Stage::Execute);
        genesis.timestamp = 1_000;
        genesis.marker_counter = 3;
        genesis.approval_count = 1;
        let state = DocumentState::project(&genesis);

        let actor = PrincipalId::new();
        let next = AuditLogItem::follow(&state, actor, ActionType::Entry);
        assert_eq!(next.base_timestamp, 1_000);
        assert_eq!(next.marker_counter, 3);
        assert_eq!(next.empty_cells, 7);
        assert_eq!(next.approval_count, 1);
        assert_eq!(next.stage, Stage::Execute);
        assert_eq!(next.actor, actor);
        assert!(!next.is_stamped());
        assert_ne!(next.id, genesis.id);
    }

    #[test]
    fn test_item_serde() {
        let item = AuditLogItem::genesis(2, Stage::Draft);
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"action\":\"genesis\""));
        assert!(!json.contains("reason"));
        let back: AuditLogItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_action_type_parse() {
        assert_eq!(ActionType::from_str("inline"), Some(ActionType::InlineEntry));
        assert_eq!(ActionType::from_str("Correction"), Some(ActionType::Correction));
    }
}
