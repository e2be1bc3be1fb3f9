//! End-to-end editing flows against the in-memory server.

use block_sync::{
    Block, BlockBody, BlockId, BlockPatch, DragGeometry, DropPlan, DropZone, EditorConfig,
    EventLog, FlushOutcome, InMemoryPersistence, PageEditor, PageId, Point, SiblingSlot,
    SyncEvent, SyncStatus,
};
use block_sync::persistence::{ApiCall, CallKind};
use block_sync::tree;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

fn page_id() -> PageId {
    PageId::from("campaign")
}

fn id(s: &str) -> BlockId {
    BlockId::from(s)
}

fn block(name: &str, parent: Option<&str>, sort: u32, body: BlockBody) -> Block {
    Block {
        id: id(name),
        page_id: page_id(),
        parent_id: parent.map(BlockId::from),
        sort,
        body,
        created_at: Utc::now(),
    }
}

fn para(name: &str, parent: Option<&str>, sort: u32) -> Block {
    block(name, parent, sort, BlockBody::paragraph(format!("text of {name}")))
}

fn section(name: &str, parent: Option<&str>, sort: u32, level: Option<u8>) -> Block {
    block(name, parent, sort, BlockBody::section(name, level))
}

async fn open(blocks: Vec<Block>) -> (PageEditor<InMemoryPersistence>, Arc<InMemoryPersistence>) {
    let api = Arc::new(InMemoryPersistence::with_blocks(blocks));
    let editor = PageEditor::new(page_id(), Arc::clone(&api), &EditorConfig::default());
    editor.load().await.expect("load page");
    (editor, api)
}

fn parent_of(editor: &PageEditor<InMemoryPersistence>, name: &str) -> Option<BlockId> {
    editor.store().get(&id(name)).and_then(|b| b.parent_id)
}

fn roots(editor: &PageEditor<InMemoryPersistence>) -> Vec<BlockId> {
    editor.store().children(None).into_iter().map(|b| b.id).collect()
}

/// Local structure equals what the server stored.
fn assert_converged(editor: &PageEditor<InMemoryPersistence>, api: &InMemoryPersistence) {
    let mut local: Vec<(BlockId, Option<BlockId>, u32)> = editor
        .snapshot()
        .into_iter()
        .map(|b| (b.id, b.parent_id, b.sort))
        .collect();
    let mut remote: Vec<(BlockId, Option<BlockId>, u32)> = api
        .stored_page(&page_id())
        .into_iter()
        .map(|b| (b.id, b.parent_id, b.sort))
        .collect();
    local.sort();
    remote.sort();
    assert_eq!(local, remote);
}

#[tokio::test(start_paused = true)]
async fn indent_outdent_round_trip() {
    let (editor, api) = open(vec![para("A", None, 0), para("B", None, 1)]).await;

    assert_eq!(editor.indent(&id("B")), id("B"));
    assert_eq!(parent_of(&editor, "B"), Some(id("A")));

    assert_eq!(editor.outdent(&id("B")), id("B"));
    assert_eq!(parent_of(&editor, "B"), None);
    assert_eq!(roots(&editor), vec![id("A"), id("B")]);

    assert_eq!(editor.settle().await, SyncStatus::Saved);
    assert_eq!(api.calls_of(CallKind::Reorder).len(), 2);
    assert_converged(&editor, &api);
}

#[tokio::test(start_paused = true)]
async fn outdent_at_root_returns_same_id() {
    let (editor, api) = open(vec![para("A", None, 0)]).await;

    assert_eq!(editor.outdent(&id("A")), id("A"));
    editor.settle().await;

    assert!(api.calls_of(CallKind::Reorder).is_empty());
}

/// Tiny deterministic generator so the sequence is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[tokio::test(start_paused = true)]
async fn random_operations_keep_tree_valid() {
    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let mut blocks: Vec<Block> = names
        .iter()
        .enumerate()
        .map(|(i, name)| para(name, None, i as u32))
        .collect();
    blocks[2] = section("c", None, 2, Some(1));
    blocks[5] = section("f", None, 5, None);
    let (editor, api) = open(blocks).await;

    let mut rng = Lcg(7);
    for step in 0..300 {
        let target = id(names[rng.next(names.len())]);
        match rng.next(5) {
            0 => {
                editor.indent(&target);
            }
            1 => {
                editor.outdent(&target);
            }
            2 => {
                editor.move_up(&target);
            }
            3 => {
                editor.move_down(&target);
            }
            _ => {
                let hovered = id(names[rng.next(names.len())]);
                let geometry = DragGeometry {
                    header_left: 100.0,
                    siblings: Vec::new(),
                };
                let x = [0.0, 100.0, 200.0][rng.next(3)];
                editor.drag_to(&target, &hovered, Point { x, y: 0.0 }, &geometry);
            }
        }
        if let Err(e) = editor.store().check_invariants() {
            panic!("invariant broken at step {step}: {e}");
        }
    }

    assert_eq!(editor.store().len(), names.len());
    assert_eq!(editor.settle().await, SyncStatus::Saved);
    assert_converged(&editor, &api);
}

#[tokio::test(start_paused = true)]
async fn normalize_outline_example() {
    let (editor, api) = open(vec![
        section("l1a", None, 0, Some(1)),
        section("l2a", None, 1, Some(2)),
        section("l2b", None, 2, Some(2)),
        section("l1b", None, 3, Some(1)),
        section("l3", None, 4, Some(3)),
    ])
    .await;

    let plan = editor.normalize_outline(None);
    assert!(!plan.is_empty());

    assert_eq!(parent_of(&editor, "l1a"), None);
    assert_eq!(parent_of(&editor, "l2a"), Some(id("l1a")));
    assert_eq!(parent_of(&editor, "l2b"), Some(id("l1a")));
    assert_eq!(parent_of(&editor, "l1b"), None);
    assert_eq!(parent_of(&editor, "l3"), Some(id("l2b")));
    editor.store().check_invariants().unwrap();

    editor.settle().await;
    assert_converged(&editor, &api);
}

#[tokio::test(start_paused = true)]
async fn normalize_upgrades_headings_on_server() {
    let (editor, api) = open(vec![
        block("h", None, 0, BlockBody::heading("Act I", Some(1))),
        para("p", None, 1),
    ])
    .await;

    editor.normalize_outline(None);
    assert_eq!(editor.settle().await, SyncStatus::Saved);

    let stored = api.stored(&id("h")).unwrap();
    match stored.body {
        BlockBody::Section { props, content } => {
            assert_eq!(props.level, Some(1));
            assert_eq!(content.title, "Act I");
            assert!(!content.extra.contains_key("text"));
        }
        other => panic!("heading was not upgraded: {other:?}"),
    }
    assert_eq!(api.stored(&id("p")).unwrap().parent_id, Some(id("h")));
}

#[tokio::test(start_paused = true)]
async fn debounced_edits_merge_into_one_call() {
    let (editor, api) = open(vec![section("s", None, 0, Some(1))]).await;
    api.clear_calls();

    let first = editor
        .edit(&id("s"), BlockPatch::new().with_content("text", json!("a")))
        .unwrap();
    let second = editor
        .edit(&id("s"), BlockPatch::new().with_prop("collapsed", json!(true)))
        .unwrap();

    assert_eq!(first.await, FlushOutcome::Saved);
    assert_eq!(second.await, FlushOutcome::Saved);

    let calls = api.calls_of(CallKind::Patch);
    assert_eq!(calls.len(), 1);
    let ApiCall::Patch { patch, .. } = &calls[0] else {
        panic!("expected patch call");
    };
    assert_eq!(patch.content.as_ref().unwrap()["text"], json!("a"));
    assert_eq!(patch.props.as_ref().unwrap()["collapsed"], json!(true));
    // Field-replacing payload carries the complete objects.
    assert_eq!(patch.content.as_ref().unwrap()["title"], json!("s"));
    assert_eq!(patch.props.as_ref().unwrap()["level"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn guard_refuses_erasing_links_until_reload() {
    let (editor, api) = open(vec![block(
        "n",
        None,
        0,
        BlockBody::paragraph("See [[Spellbook]] for notes"),
    )])
    .await;
    let (log, _sub) = EventLog::record(editor.events());

    let outcome = editor.edit(&id("n"), BlockPatch::text("")).unwrap().await;

    assert_eq!(outcome, FlushOutcome::Vetoed);
    assert!(api.calls_of(CallKind::Patch).is_empty());
    assert_eq!(editor.status(), SyncStatus::Error);
    assert!(log
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::DataLossBlocked { block_id, .. } if block_id == &id("n"))));

    editor.reload().await.unwrap();
    assert_eq!(
        editor.store().get(&id("n")).unwrap().text(),
        Some("See [[Spellbook]] for notes")
    );

    let outcome = editor
        .edit(&id("n"), BlockPatch::text("See [[Spellbook]] for updated notes"))
        .unwrap()
        .await;
    assert_eq!(outcome, FlushOutcome::Saved);
    assert_eq!(editor.status(), SyncStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn drop_onto_own_descendant_is_ignored() {
    let (editor, api) = open(vec![
        section("S", None, 0, Some(1)),
        section("child", Some("S"), 0, Some(2)),
        para("leaf", Some("child"), 0),
    ])
    .await;
    let before = editor.snapshot();

    let plan = DropPlan {
        dragged: id("S"),
        chunk: vec![id("S")],
        zone: DropZone::Child,
        parent: Some(id("leaf")),
        index: 0,
    };
    assert_eq!(editor.drop_block(&plan), id("S"));

    let geometry = DragGeometry {
        header_left: 50.0,
        siblings: vec![SiblingSlot {
            id: id("child"),
            mid_y: 10.0,
        }],
    };
    assert_eq!(
        editor.drag_to(&id("S"), &id("child"), Point { x: 200.0, y: 10.0 }, &geometry),
        id("S")
    );

    editor.settle().await;
    assert_eq!(editor.snapshot(), before);
    assert!(api.calls_of(CallKind::Reorder).is_empty());
}

#[tokio::test(start_paused = true)]
async fn drag_moves_chunk_under_section() {
    let (editor, api) = open(vec![
        para("intro", None, 0),
        para("note", None, 1),
        section("Loot", None, 2, Some(1)),
    ])
    .await;

    let geometry = DragGeometry {
        header_left: 0.0,
        siblings: vec![],
    };
    editor.drag_to(&id("intro"), &id("Loot"), Point { x: 100.0, y: 0.0 }, &geometry);

    assert_eq!(roots(&editor), vec![id("Loot")]);
    assert_eq!(
        tree::child_ids(&editor.snapshot(), Some(&id("Loot"))),
        vec![id("intro"), id("note")]
    );

    editor.settle().await;
    assert_converged(&editor, &api);
}

#[tokio::test(start_paused = true)]
async fn failed_reorder_keeps_local_order() {
    let (editor, api) = open(vec![para("A", None, 0), para("B", None, 1)]).await;
    let (log, _sub) = EventLog::record(editor.events());
    api.set_failing(CallKind::Reorder, true);

    editor.move_down(&id("A"));
    editor.settle().await;

    assert_eq!(roots(&editor), vec![id("B"), id("A")]);
    assert!(log
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::ReorderFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn insert_and_delete_keep_sorts_contiguous() {
    let (editor, api) = open(vec![
        para("A", None, 0),
        para("B", None, 1),
        para("B1", Some("B"), 0),
        para("C", None, 2),
    ])
    .await;

    let created = editor
        .insert_after(Some(&id("A")), BlockBody::paragraph("fresh"))
        .await
        .unwrap();
    assert_eq!(roots(&editor), vec![id("A"), created.id.clone(), id("B"), id("C")]);
    editor.store().check_invariants().unwrap();

    assert_eq!(editor.delete_block(&id("B")), Some(created.id.clone()));
    assert!(editor.store().get(&id("B1")).is_none());
    editor.store().check_invariants().unwrap();

    editor.settle().await;
    assert_converged(&editor, &api);
    assert!(api.stored(&id("B1")).is_none());
}

#[tokio::test(start_paused = true)]
async fn unwrap_keeps_children_on_server() {
    let (editor, api) = open(vec![
        para("before", None, 0),
        section("S", None, 1, Some(1)),
        para("c1", Some("S"), 0),
        para("c2", Some("S"), 1),
    ])
    .await;

    assert_eq!(editor.unwrap_section(&id("S")), Some(id("c1")));
    assert_eq!(roots(&editor), vec![id("before"), id("c1"), id("c2")]);

    editor.settle().await;
    assert_converged(&editor, &api);
}

#[tokio::test(start_paused = true)]
async fn status_walks_through_a_save_cycle() {
    let (editor, _api) = open(vec![para("A", None, 0)]).await;
    let (log, _sub) = EventLog::record(editor.events());

    let handle = editor.edit(&id("A"), BlockPatch::text("changed")).unwrap();
    assert_eq!(editor.status(), SyncStatus::Dirty);
    handle.await;

    assert_eq!(
        log.statuses(),
        vec![SyncStatus::Dirty, SyncStatus::Saving, SyncStatus::Saved]
    );
}

#[tokio::test(start_paused = true)]
async fn save_flushes_without_waiting() {
    let (editor, api) = open(vec![para("A", None, 0)]).await;

    let _handle = editor.edit(&id("A"), BlockPatch::text("now")).unwrap();
    assert_eq!(editor.save(&id("A")).await, Some(FlushOutcome::Saved));

    assert_eq!(api.stored(&id("A")).unwrap().text(), Some("now"));
}
