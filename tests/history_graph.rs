//! Commit graph queries, transition commits and content addressing.

mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{Value, json};
use strata::changelog;
use strata::error::EngineError;
use strata::graph::{self, AncestorQuery};
use strata::snapshot;
use strata::state::{self, StateFilter};
use strata::storage::{StoreRead, Table};
use strata::version;

use common::{branch, checkpoint, engine, get, key_values, main_version, set};

fn ids(commits: &[strata::model::records::Commit]) -> BTreeSet<String> {
    commits.iter().map(|c| c.id.to_string()).collect()
}

#[test]
fn ancestors_of_a_linear_chain() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "k", json!(0));
    let c0 = checkpoint(&engine, &main.id);
    set(&engine, &main.id, "k", json!(1));
    let c1 = checkpoint(&engine, &main.id);
    set(&engine, &main.id, "k", json!(2));
    let c2 = checkpoint(&engine, &main.id);
    let root = main.commit_id;

    let (all, one, with_self) = engine
        .read(|view| {
            Ok((
                graph::ancestors_of(view, &c2.id, AncestorQuery::default())?,
                graph::ancestors_of(
                    view,
                    &c2.id,
                    AncestorQuery {
                        depth: Some(1),
                        include_self: false,
                    },
                )?,
                graph::ancestors_of(
                    view,
                    &c2.id,
                    AncestorQuery {
                        depth: None,
                        include_self: true,
                    },
                )?,
            ))
        })
        .unwrap();

    let expected: BTreeSet<String> = [&root, &c0.id, &c1.id]
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(ids(&all), expected);
    assert_eq!(ids(&one), BTreeSet::from([c1.id.to_string()]));
    let mut expected_with_self = expected;
    expected_with_self.insert(c2.id.to_string());
    assert_eq!(ids(&with_self), expected_with_self);
}

#[test]
fn lowest_common_ancestor_of_diverged_histories() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "shared", json!("base"));
    let c0 = checkpoint(&engine, &main.id);

    let side = branch(&engine, "side", &c0);
    set(&engine, &side.id, "left", json!(1));
    let tip_side = checkpoint(&engine, &side.id);
    set(&engine, &main.id, "right", json!(1));
    checkpoint(&engine, &main.id);
    set(&engine, &main.id, "right", json!(2));
    let tip_main = checkpoint(&engine, &main.id);

    let lca = engine
        .read(|view| graph::lowest_common_ancestor(view, &tip_main.id, &tip_side.id))
        .unwrap();
    assert_eq!(lca.map(|c| c.id), Some(c0.id));
}

#[test]
fn unrelated_histories_have_no_common_ancestor() {
    let engine = engine();
    let (a, b) = engine
        .transaction(|tx| {
            let cs_a = graph::create_change_set(tx, &[])?;
            let cs_b = graph::create_change_set(tx, &[])?;
            Ok((
                graph::create_commit(tx, &cs_a.id, &[])?,
                graph::create_commit(tx, &cs_b.id, &[])?,
            ))
        })
        .unwrap();
    let lca = engine
        .read(|view| graph::lowest_common_ancestor(view, &a.id, &b.id))
        .unwrap();
    assert!(lca.is_none());
    let err = engine
        .transaction(|tx| graph::create_transition_commit(tx, &a.id, &b.id))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoCommonAncestor { .. }));
}

#[test]
fn transition_commit_moves_source_state_to_target_state() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "kept", json!("same"));
    set(&engine, &main.id, "changed", json!("old"));
    set(&engine, &main.id, "removed", json!("gone soon"));
    let a = checkpoint(&engine, &main.id);

    set(&engine, &main.id, "changed", json!("new"));
    set(&engine, &main.id, "added", json!(42));
    engine
        .transaction(|tx| strata::key_value::delete(tx, &main.id, "removed", false))
        .unwrap();
    let b = checkpoint(&engine, &main.id);
    let expected = key_values(&engine, &main.id);

    let replica = branch(&engine, "replica", &a);
    assert_eq!(get(&engine, &replica.id, "changed"), Some(json!("old")));

    let transition = engine
        .transaction(|tx| graph::create_transition_commit(tx, &a.id, &b.id))
        .unwrap();
    assert_eq!(transition.parent_commit_ids, vec![a.id.clone(), b.id.clone()]);
    engine
        .transaction(|tx| version::advance(tx, &replica.id, &transition.id))
        .unwrap();
    assert_eq!(key_values(&engine, &replica.id), expected);

    let err = engine
        .transaction(|tx| graph::create_transition_commit(tx, &b.id, &b.id))
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyTransition { .. }));
}

#[test]
fn history_queries_walk_ancestry() {
    let engine = engine();
    let main = main_version(&engine);
    let key = strata::key_value::entity_key("doc").unwrap();
    set(&engine, &main.id, "doc", json!("v1"));
    let c1 = checkpoint(&engine, &main.id);
    set(&engine, &main.id, "doc", json!("v2"));
    let c2 = checkpoint(&engine, &main.id);

    let (at_c1, history, at_c2) = engine
        .read(|view| {
            Ok((
                state::state_at(view, &c1.id, &key, None)?,
                state::entity_history(view, &c2.id, &key, None)?,
                state::state_at_commit(view, &c2.id, &StateFilter::file(key.file_id.clone()), None)?,
            ))
        })
        .unwrap();
    assert_eq!(at_c1.unwrap().content["value"], json!("v1"));
    let values: Vec<Value> = history.iter().map(|h| h.content["value"].clone()).collect();
    assert_eq!(values, vec![json!("v2"), json!("v1")]);
    assert!(at_c2.iter().any(|e| e.content["value"] == json!("v2")));
}

#[test]
fn unknown_change_is_rejected() {
    let engine = engine();
    let err = engine
        .transaction(|tx| {
            graph::create_change_set(tx, &[strata::ChangeId::new("never-appended")?])
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownChange { .. }));
}

#[test]
fn history_only_grows() {
    let engine = engine();
    let main = main_version(&engine);
    let count = |table: Table| {
        engine
            .read(|view| Ok(view.scan_raw(&table.prefix())?.len()))
            .unwrap()
    };

    let mut last = (count(Table::Change), count(Table::Snapshot));
    for i in 0..5 {
        set(&engine, &main.id, "k", json!(i));
        if i % 2 == 0 {
            engine
                .transaction(|tx| strata::key_value::delete(tx, &main.id, "k", false))
                .unwrap();
        }
        checkpoint(&engine, &main.id);
        let now = (count(Table::Change), count(Table::Snapshot));
        assert!(now.0 > last.0 && now.1 >= last.1);
        last = now;
    }
    // Every change ever appended is still readable.
    let changes = engine
        .read(|view| view.scan_rows::<strata::model::records::Change>(Table::Change, ""))
        .unwrap();
    for (id, _) in changes {
        let id = strata::ChangeId::new(&id).unwrap();
        assert!(engine.read(|view| changelog::change_exists(view, &id)).unwrap());
    }
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn snapshots_are_content_addressed(content in json_value()) {
        let engine = engine();
        let (first, second, read_back) = engine
            .transaction(|tx| {
                let first = snapshot::put(tx, content.clone())?;
                let second = snapshot::put(tx, content.clone())?;
                let read_back = snapshot::get(tx, &first)?;
                Ok((first, second, read_back))
            })
            .unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, snapshot::snapshot_id(&content));
        prop_assert_eq!(read_back, content);
    }
}
