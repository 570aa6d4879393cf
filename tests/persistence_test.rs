use hestia::persistence::{JsonFileStore, KeyValueStore, MemoryStore};
use serde_json::json;

#[test]
fn file_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = JsonFileStore::open(&path).unwrap();
    assert!(store.get("wb.energy").unwrap().is_none());
    store.set("wb.energy", json!({"monthly": {"energy_kwh": 12.5}})).unwrap();
    store.set("wb.session", json!({"charge_state": "Charging"})).unwrap();

    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(
        reopened.get("wb.energy").unwrap(),
        Some(json!({"monthly": {"energy_kwh": 12.5}}))
    );
    assert_eq!(
        reopened.get("wb.session").unwrap(),
        Some(json!({"charge_state": "Charging"}))
    );
}

#[test]
fn file_store_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");
    let store = JsonFileStore::open(&path).unwrap();
    store.set("k", json!(1)).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn failed_write_keeps_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    // Parent path is a regular file, so every write fails
    let store = JsonFileStore::open(blocker.join("state.json")).unwrap();
    assert!(store.set("k", json!(1)).is_err());
    assert!(store.get("k").unwrap().is_none());
}

#[test]
fn empty_file_opens_as_empty_store() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let store = JsonFileStore::open(tmp.path()).unwrap();
    assert!(store.get("anything").unwrap().is_none());
}

#[test]
fn memory_store_overwrites() {
    let store = MemoryStore::new();
    store.set("k", json!(1)).unwrap();
    store.set("k", json!(2)).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!(2)));
}
