//! Blob export, reopening, integrity checks and configuration files.

mod common;

use std::fs;

use serde_json::{Value, json};
use strata::error::EngineError;
use strata::storage::blob;
use strata::{Engine, EngineConfig};
use strata_kv::MemoryKv;

use common::{checkpoint, engine, get, main_version, options, set};

#[test]
fn blob_round_trips_through_a_file() {
    let engine = engine();
    let main = main_version(&engine);
    set(&engine, &main.id, "title", json!("persisted"));
    checkpoint(&engine, &main.id);
    set(&engine, &main.id, "draft", json!(true));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.strata");
    fs::write(&path, engine.to_blob().unwrap()).unwrap();

    let reopened = Engine::open(&fs::read(&path).unwrap(), options()).unwrap();
    assert_eq!(reopened.store_id().unwrap(), engine.store_id().unwrap());
    assert_eq!(get(&reopened, &main.id, "title"), Some(json!("persisted")));
    // Uncommitted work survives too.
    assert_eq!(get(&reopened, &main.id, "draft"), Some(json!(true)));
    assert_eq!(reopened.verify().unwrap(), engine.verify().unwrap());
}

#[test]
fn tampered_blob_is_rejected() {
    let engine = engine();
    let mut envelope: Value = serde_json::from_slice(&engine.to_blob().unwrap()).unwrap();
    envelope["checksum"] = json!("0".repeat(64));
    let tampered = serde_json::to_vec(&envelope).unwrap();
    assert!(matches!(
        Engine::open(&tampered, options()),
        Err(EngineError::Corrupted { .. })
    ));

    assert!(matches!(
        Engine::open(b"definitely not a store", options()),
        Err(EngineError::Corrupted { .. })
    ));
}

#[test]
fn dangling_history_is_detected_on_open() {
    let engine = engine();
    let main = main_version(&engine);
    let pairs: Vec<_> = blob::decode(&engine.to_blob().unwrap())
        .unwrap()
        .into_iter()
        .filter(|(key, _)| *key != format!("t/commit/{}", main.commit_id).into_bytes())
        .collect();
    let kv = MemoryKv::from_pairs(pairs).unwrap();
    assert!(matches!(
        Engine::with_store(Box::new(kv), options()),
        Err(EngineError::Corrupted { .. })
    ));
}

#[test]
fn config_file_shapes_a_new_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.toml");
    fs::write(
        &path,
        r#"
[engine]
deterministic_mode = true
main_version_name = "trunk"

[history]
default_depth = 16

[sync]
max_attempts = 5
"#,
    )
    .unwrap();
    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.history.default_depth, 16);
    assert_eq!(config.sync.max_attempts, 5);

    let engine = Engine::new(options().with_config(config)).unwrap();
    assert_eq!(engine.active_version().unwrap().name, "trunk");
    assert!(engine.read(|view| strata::context::is_deterministic(view)).unwrap());

    // Missing files fall back to defaults; typos do not.
    let missing = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(missing, EngineConfig::default());
    fs::write(&path, "[engine]\ndeterministic = true\n").unwrap();
    let err: EngineError = EngineConfig::load(&path).unwrap_err().into();
    assert!(matches!(err, EngineError::Config(_)));
}
