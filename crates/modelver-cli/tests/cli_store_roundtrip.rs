//! Runs the `modelver` binary against a temporary store.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use modelver_core::model::{ModelTemplate, ModelTemplateVersion};
use modelver_core::store::{SqliteStore, Store};

/// Returns the path to the `modelver` binary built by Cargo.
fn modelver_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_modelver"))
}

fn modelver(store: &Path, args: &[&str]) -> Output {
    Command::new(modelver_bin())
        .arg("--store")
        .arg(store)
        .args(args)
        .output()
        .expect("failed to run modelver")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn create_and_list_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");

    let out = modelver(&db, &["-n", "ml", "template", "create", "llama", "--description", "chat"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = modelver(&db, &["-n", "ml", "version", "create", "v1", "--template", "llama"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = modelver(&db, &["-n", "ml", "--json", "template", "list"]);
    assert!(out.status.success());
    let templates: Vec<ModelTemplate> = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].spec.description, "chat");

    let out = modelver(&db, &["-n", "ml", "--json", "version", "list", "--template", "llama"]);
    let versions: Vec<ModelTemplateVersion> = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].status.version, 0);
}

#[test]
fn table_output_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");

    assert!(modelver(&db, &["template", "create", "llama"]).status.success());
    let out = modelver(&db, &["template", "get", "llama"]);
    let table = stdout(&out);
    assert!(table.contains("NAMESPACE"));
    assert!(table.contains("llama"));

    assert!(modelver(&db, &["template", "delete", "llama"]).status.success());
    let store = SqliteStore::open(&db).unwrap();
    assert!(
        store
            .get::<ModelTemplate>("default", "llama")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn missing_object_fails_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");

    let out = modelver(&db, &["version", "get", "ghost"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to get version default/ghost"), "{stderr}");
}
