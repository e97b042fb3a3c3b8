//! Version registry and state materialization through the engine facade.

mod common;

use serde_json::json;
use strata::error::EngineError;
use strata::key_value;
use strata::version::{self, CreateVersion, Inherit};
use strata::{EntityWrite, StateFilter};

use common::{checkpoint, engine, get, main_version, set};

#[test]
fn checkpoint_seals_working_changes() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "title", json!("draft"));
    set(&engine, &main.id, "title", json!("final"));

    let pending = engine
        .read(|view| version::working_elements(view, &version::get_version(view, &main.id)?))
        .unwrap();
    assert_eq!(pending.len(), 1, "a rewrite replaces the working element");

    let commit = checkpoint(&engine, &main.id);
    assert_eq!(commit.parent_commit_ids, vec![main.commit_id.clone()]);
    let after = main_version(&engine);
    assert_eq!(after.commit_id, commit.id);
    assert_ne!(after.working_commit_id, main.working_commit_id);
    assert_eq!(get(&engine, &main.id, "title"), Some(json!("final")));

    assert!(matches!(
        engine.checkpoint(&main.id),
        Err(EngineError::NothingToCommit { .. })
    ));
}

#[test]
fn child_reads_parent_until_it_writes() {
    let engine = engine();
    let main = main_version(&engine);
    let child = engine
        .create_version(CreateVersion {
            name: Some("child".to_owned()),
            inherits_from: Inherit::From(main.id.clone()),
            ..CreateVersion::default()
        })
        .unwrap();

    set(&engine, &main.id, "a", json!(1));
    set(&engine, &main.id, "b", json!(2));
    let state = engine
        .get_entity(&child.id, &key_value::entity_key("a").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(state.content["value"], json!(1));
    assert_eq!(state.inherited_from.as_ref(), Some(&main.id));

    // Copy-on-write delete: the child's tombstone hides "a" without touching
    // the parent.
    engine
        .transaction(|tx| key_value::delete(tx, &child.id, "a", false))
        .unwrap();
    assert_eq!(get(&engine, &child.id, "a"), None);
    assert_eq!(get(&engine, &main.id, "a"), Some(json!(1)));
    assert_eq!(get(&engine, &child.id, "b"), Some(json!(2)));

    set(&engine, &child.id, "b", json!(20));
    assert_eq!(get(&engine, &child.id, "b"), Some(json!(20)));
    assert_eq!(get(&engine, &main.id, "b"), Some(json!(2)));
}

#[test]
fn untracked_overrides_tracked_and_leaves_no_history() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "theme", json!("light"));
    let key = key_value::entity_key("theme").unwrap();
    engine
        .transaction(|tx| key_value::set(tx, &main.id, "theme", json!("dark"), true))
        .unwrap();

    let state = engine.get_entity(&main.id, &key).unwrap().unwrap();
    assert!(state.untracked);
    assert_eq!(state.content["value"], json!("dark"));
    assert_eq!(state.change_id, None);

    // A tracked write replaces the override.
    let change = engine
        .write_entity(
            &main.id,
            EntityWrite {
                key: key.clone(),
                content: json!({ "key": "theme", "value": "blue" }),
                schema_version: key_value::KEY_VALUE_SCHEMA_VERSION.to_owned(),
                plugin_key: key_value::SYSTEM_PLUGIN_KEY.to_owned(),
                untracked: false,
            },
        )
        .unwrap();
    assert!(change.is_some());
    let state = engine.get_entity(&main.id, &key).unwrap().unwrap();
    assert!(!state.untracked);
    assert_eq!(state.content["value"], json!("blue"));
}

#[test]
fn inherited_tracked_state_outranks_inherited_overrides() {
    let engine = engine();
    let main = main_version(&engine);
    let global = version::global_id().unwrap();
    engine
        .transaction(|tx| {
            key_value::set(tx, &global, "mode", json!("tracked"), false)?;
            key_value::set(tx, &global, "mode", json!("untracked"), true)?;
            key_value::set(tx, &global, "only-override", json!("untracked"), true)
        })
        .unwrap();

    // The owning version sees its own override first.
    assert_eq!(get(&engine, &global, "mode"), Some(json!("untracked")));
    let inherited = engine
        .get_entity(&main.id, &key_value::entity_key("mode").unwrap())
        .unwrap()
        .unwrap();
    assert!(!inherited.untracked);
    assert_eq!(inherited.content["value"], json!("tracked"));
    assert_eq!(inherited.inherited_from.as_ref(), Some(&global));
    // With nothing tracked anywhere, the inherited override shows through.
    assert_eq!(get(&engine, &main.id, "only-override"), Some(json!("untracked")));

    let listed = engine.list_entities(&main.id, &StateFilter::default()).unwrap();
    let mode = listed.iter().find(|e| e.key.entity_id == "mode").unwrap();
    assert!(!mode.untracked);

    // A tombstone in the child hides the inherited override too.
    engine
        .transaction(|tx| {
            key_value::set(tx, &main.id, "only-override", json!("mine"), false)?;
            key_value::delete(tx, &main.id, "only-override", false)
        })
        .unwrap();
    assert_eq!(get(&engine, &main.id, "only-override"), None);
}

#[test]
fn list_applies_filters_and_inheritance() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "x", json!(true));
    let all = engine.list_entities(&main.id, &StateFilter::default()).unwrap();
    assert!(all.iter().any(|e| e.key.entity_id == "x"));
    // Engine settings live in the global version and are inherited.
    assert!(
        all.iter()
            .any(|e| e.key.entity_id == key_value::STORE_ID_KEY && e.untracked)
    );
    let none = engine
        .list_entities(&main.id, &StateFilter::file("no-such-file"))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn version_registry_rules() {
    let engine = engine();
    let main = main_version(&engine);
    let global = version::global_id().unwrap();

    assert!(matches!(
        engine.create_version(CreateVersion {
            name: Some("main".to_owned()),
            ..CreateVersion::default()
        }),
        Err(EngineError::VersionExists { .. })
    ));

    let a = engine
        .create_version(CreateVersion {
            name: Some("a".to_owned()),
            inherits_from: Inherit::From(main.id.clone()),
            ..CreateVersion::default()
        })
        .unwrap();
    let cycle = engine.transaction(|tx| version::set_inheritance(tx, &main.id, Some(&a.id)));
    assert!(matches!(cycle, Err(EngineError::CyclicAncestry { .. })));

    for protected in [&global, &main.id] {
        let err = engine
            .transaction(|tx| version::delete_version(tx, protected))
            .unwrap_err();
        assert!(matches!(err, EngineError::VersionInUse { .. }), "{err}");
    }

    engine
        .transaction(|tx| version::switch_version(tx, &a.id).map(|_| ()))
        .unwrap();
    assert_eq!(engine.active_version().unwrap().id, a.id);
    engine
        .transaction(|tx| version::switch_version(tx, &main.id).map(|_| ()))
        .unwrap();

    // Deleting removes the pointer only; the commit stays reachable.
    engine
        .transaction(|tx| version::delete_version(tx, &a.id))
        .unwrap();
    assert!(matches!(
        engine.read(|view| version::get_version(view, &a.id)),
        Err(EngineError::NotFound { .. })
    ));
    assert!(
        engine
            .read(|view| strata::graph::get_commit(view, &a.commit_id))
            .is_ok()
    );
}
