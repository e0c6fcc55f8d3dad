//! Two clients editing the same document through one audit store.

use kiroku_client::{
    AuditApi, ClientConfig, EditSession, MemoryAuditStore, MemoryClient, ReloadEvent,
    SessionError, StatusCode, SyncController, SyncError, SyncState, open_memory_session,
};
use kiroku_doc::{DocumentSnapshot, InsertRequest};
use kiroku_types::{
    ActionType, AuditLogItem, DocumentId, DocumentPosition, DocumentState, Stage,
};

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
    config.identity.legal_name = format!("{initials} Tester");
    config
}

async fn two_sessions() -> (
    MemoryAuditStore,
    DocumentId,
    EditSession<MemoryClient>,
    EditSession<MemoryClient>,
) {
    let store = MemoryAuditStore::new();
    let doc = store.register(DocumentSnapshot::new(FORM), 1, Stage::Execute);
    let a = open_memory_session(&store, doc, config("AA")).await.unwrap();
    let b = open_memory_session(&store, doc, config("BB")).await.unwrap();
    (store, doc, a, b)
}

fn inline(segs: &[u32], text: &str) -> InsertRequest {
    InsertRequest::Inline {
        position: DocumentPosition::new(segs.to_vec()),
        text: text.into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_client_reloads_before_its_edit_lands() {
    let (store, doc, mut a, mut b) = two_sessions().await;
    let t0 = a.local_timestamp();
    assert_eq!(b.local_timestamp(), t0);

    a.commit(inline(&[2, 14], "done")).await.unwrap();
    let t1 = a.local_timestamp();
    assert!(t1 > t0);

    let mut events = b.reload_events();
    let err = b.commit(inline(&[0, 21], "12.5 g")).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleDocument));

    // B went through a full reload and now sits at T1 with A's content.
    assert_eq!(events.recv().await.unwrap(), ReloadEvent::Started);
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::Rendered { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::Restored(_)
    ));
    assert_eq!(events.recv().await.unwrap(), ReloadEvent::Settled);
    assert_eq!(b.local_timestamp(), t1);
    assert_eq!(b.sync_state(), SyncState::UpToDate);
    assert_eq!(b.document(), a.document());
    assert_eq!(store.log(doc).len(), 2);

    // The retry lands on top of A's item.
    b.commit(inline(&[0, 21], "12.5 g")).await.unwrap();
    let log = store.log(doc);
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].base_timestamp, t1);
    assert_eq!(log[2].actor, b.api().principal());
}

#[tokio::test(start_paused = true)]
async fn test_server_rejects_append_drafted_against_old_state() {
    let (store, doc, mut a, _b) = two_sessions().await;
    let genesis = store.log(doc)[0].clone();
    a.commit(inline(&[2, 14], "done")).await.unwrap();

    let late = store.client(kiroku_types::PrincipalId::new());
    let mut sync = SyncController::new(late.principal());
    sync.adopt(&genesis);

    let draft = AuditLogItem::follow(&DocumentState::project(&genesis), late.principal(), ActionType::Entry);
    let response = late
        .append_audit_item(doc, draft, DocumentSnapshot::new(FORM), "en-GB", false)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert!(matches!(sync.record_append(&response), Err(SyncError::Stale { .. })));
    assert_eq!(sync.state(), SyncState::Stale);
    assert_eq!(store.log(doc).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lock_holder_blocks_other_writer() {
    let (store, doc, a, mut b) = two_sessions().await;

    // A takes the lock for editing and holds it.
    let latest = a.api().fetch_latest_audit_item(doc, true).await.unwrap();
    assert_eq!(latest.lock, kiroku_client::LockGrant::Acquired);

    let before = b.document().clone();
    let err = b.commit(inline(&[0, 21], "x")).await.unwrap_err();
    let holder = a.api().principal();
    assert!(matches!(err, SessionError::LockConflict { holder: h } if h == holder));
    assert_eq!(b.document(), &before);
    assert_eq!(store.log(doc).len(), 1);

    a.close().await.unwrap();
    assert_eq!(store.lock_holder(doc), None);
    b.commit(inline(&[0, 21], "x")).await.unwrap();
    assert_eq!(store.log(doc).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_markers_increase_across_clients() {
    let (store, doc, mut a, mut b) = two_sessions().await;

    let first = a.commit(inline(&[2, 14], "done")).await.unwrap();
    assert_eq!(first.marker, Some(1));

    // B reloads on the first attempt, then allocates after A's marker.
    assert!(b.commit(inline(&[0, 21], "x")).await.is_err());
    let second = b.commit(inline(&[0, 21], "x")).await.unwrap();
    assert_eq!(second.marker, Some(2));

    let counters: Vec<u64> = store.log(doc).iter().map(|i| i.marker_counter).collect();
    assert_eq!(counters, vec![0, 1, 2]);

    // A catches up and keeps counting from B's marker.
    assert!(a.commit(inline(&[0, 0], "y")).await.is_err());
    assert_eq!(a.markers().last(), 2);
}
