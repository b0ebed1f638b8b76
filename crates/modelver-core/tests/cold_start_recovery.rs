//! Restart recovery: numbering continues from the persisted high-water mark
//! after the process (and its in-memory cache) is thrown away.

use std::sync::{Arc, Mutex};

use modelver_core::model::{ModelTemplate, ModelTemplateVersion, ObjectRef, VERSION_ASSIGNED};
use modelver_core::store::{LabelSelector, SqliteStore, Store};
use modelver_core::versioning::{
    Enqueuer, TemplateSynchronizer, VersionAssigner, VersionCache, seed_version_cache,
};

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Enqueuer for Recorder {
    fn enqueue(&self, namespace: &str, name: &str) {
        self.0.lock().unwrap().push(format!("{namespace}/{name}"));
    }
}

struct Process {
    store: Arc<SqliteStore>,
    cache: Arc<VersionCache>,
    assigner: VersionAssigner<SqliteStore>,
    sync: TemplateSynchronizer<SqliteStore>,
}

fn boot(path: &std::path::Path) -> Process {
    let store = Arc::new(SqliteStore::open(path).unwrap());
    let cache = Arc::new(VersionCache::new());
    seed_version_cache(store.as_ref(), &cache).unwrap();
    Process {
        assigner: VersionAssigner::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(Recorder::default()),
        ),
        sync: TemplateSynchronizer::new(Arc::clone(&store), Arc::clone(&cache)),
        store,
        cache,
    }
}

fn assign(p: &Process, name: &str) -> u64 {
    let v: ModelTemplateVersion = p.store.get("ml", name).unwrap();
    p.assigner
        .assign_version(name, Some(&v))
        .unwrap()
        .unwrap()
        .status
        .version
}

#[test]
fn numbering_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let p = boot(&path);
        p.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        for name in ["a", "b", "c"] {
            p.store
                .create(&ModelTemplateVersion::new("ml", name, "llama"))
                .unwrap();
            assign(&p, name);
        }
        // Created before the crash but never processed.
        p.store
            .create(&ModelTemplateVersion::new("ml", "d", "llama"))
            .unwrap();
    }

    let p = boot(&path);
    assert_eq!(p.cache.get(&ObjectRef::new("ml", "llama")), 3);
    assert_eq!(assign(&p, "d"), 4);

    let template: ModelTemplate = p.store.get("ml", "llama").unwrap();
    let synced = p
        .sync
        .sync_latest_version("ml/llama", Some(&template))
        .unwrap()
        .unwrap();
    assert_eq!(synced.status.latest_version, 4);

    let versions: Vec<ModelTemplateVersion> =
        p.store.list(Some("ml"), &LabelSelector::everything()).unwrap();
    let mut numbers: Vec<u64> = versions
        .iter()
        .filter(|v| VERSION_ASSIGNED.is_true(&v.status.conditions))
        .map(|v| v.status.version)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
}

#[test]
fn deleted_template_collects_versions_and_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let p = boot(&dir.path().join("store.db"));

    let template = p.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
    p.store
        .create(&ModelTemplateVersion::new("ml", "a", "llama"))
        .unwrap();
    assign(&p, "a");

    p.store.delete::<ModelTemplate>("ml", "llama").unwrap();
    p.sync
        .delete_latest_version("ml/llama", Some(&template))
        .unwrap();

    assert_eq!(p.cache.get(&ObjectRef::new("ml", "llama")), 0);
    let left: Vec<ModelTemplateVersion> =
        p.store.list(Some("ml"), &LabelSelector::everything()).unwrap();
    assert!(left.is_empty(), "owner reference should garbage-collect versions");
}
