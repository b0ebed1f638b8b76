//! `SQLite`-backed object store.
//!
//! Objects are stored as JSON bodies keyed by `(kind, namespace, name)`.
//! WAL mode is enabled so CLI readers do not block the daemon.

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{Change, ChangeType, LabelSelector, Store, StoreError, StoreResult};
use crate::model::{ObjectMeta, Resource, ResourceKind};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Object store backed by a single `SQLite` database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates a store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database path, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Counts stored objects of one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, kind: ResourceKind) -> StoreResult<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // A panic while holding the lock cannot leave a transaction half
    // applied: rusqlite rolls back uncommitted transactions on drop.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for SqliteStore {
    fn get<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<R> {
        let conn = self.lock();
        let body = load_body(&conn, R::KIND, namespace, name)?
            .ok_or_else(|| not_found(R::KIND, namespace, name))?;
        Ok(serde_json::from_value(body)?)
    }

    fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<R>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM objects
             WHERE kind = ?1 AND (?2 IS NULL OR namespace = ?2)
             ORDER BY creation_revision ASC",
        )?;
        let bodies = stmt
            .query_map(params![R::KIND.as_str(), namespace], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut objects = Vec::with_capacity(bodies.len());
        for body in bodies {
            let object: R = serde_json::from_str(&body)?;
            if selector.matches(&object.metadata().labels) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    fn create<R: Resource>(&self, object: &R) -> StoreResult<R> {
        let mut object = object.clone();
        let (namespace, name) = {
            let meta = object.metadata();
            (meta.namespace.clone(), meta.name.clone())
        };
        if name.is_empty() {
            return Err(StoreError::Invalid(format!(
                "{} name must not be empty",
                R::KIND
            )));
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        if load_body(&tx, R::KIND, &namespace, &name)?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: R::KIND,
                namespace,
                name,
            });
        }

        let revision = append_change(&tx, R::KIND, &namespace, &name, ChangeType::Applied, None)?;
        let meta = object.metadata_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = revision;
        meta.creation_revision = revision;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        let body = serde_json::to_value(&object)?;
        write_object(&tx, R::KIND, object.metadata(), &body)?;
        tx.commit()?;

        debug!(kind = %R::KIND, %namespace, %name, revision, "object created");
        Ok(object)
    }

    fn update<R: Resource>(&self, object: &R) -> StoreResult<R> {
        let mut object = object.clone();
        let (namespace, name, expected) = {
            let meta = object.metadata();
            (meta.namespace.clone(), meta.name.clone(), meta.resource_version)
        };

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let stored_body = load_body(&tx, R::KIND, &namespace, &name)?
            .ok_or_else(|| not_found(R::KIND, &namespace, &name))?;
        let stored = meta_of(&stored_body)?;
        if stored.resource_version != expected {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                namespace,
                name,
                expected,
                actual: stored.resource_version,
            });
        }

        // Store-owned fields survive whatever the caller sent.
        let meta = object.metadata_mut();
        meta.uid = stored.uid;
        meta.creation_revision = stored.creation_revision;
        meta.creation_timestamp = stored.creation_timestamp;
        meta.deletion_timestamp = stored.deletion_timestamp;

        if meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
            let body = serde_json::to_value(&object)?;
            let revision = remove_object(&tx, R::KIND, &namespace, &name, body)?;
            tx.commit()?;
            object.metadata_mut().resource_version = revision;
            return Ok(object);
        }

        let revision = append_change(&tx, R::KIND, &namespace, &name, ChangeType::Applied, None)?;
        object.metadata_mut().resource_version = revision;
        let body = serde_json::to_value(&object)?;
        write_object(&tx, R::KIND, object.metadata(), &body)?;
        tx.commit()?;

        debug!(kind = %R::KIND, %namespace, %name, revision, "object updated");
        Ok(object)
    }

    fn delete<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        request_delete(&tx, R::KIND, namespace, name)?;
        tx.commit()?;
        Ok(())
    }

    fn changes_since(&self, revision: u64, limit: usize) -> StoreResult<Vec<Change>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT revision, kind, namespace, name, change_type, object
             FROM changes WHERE revision > ?1
             ORDER BY revision ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![revision as i64, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(revision, kind, namespace, name, change_type, object)| {
                Ok(Change {
                    revision: revision as u64,
                    kind: ResourceKind::from_name(&kind)
                        .ok_or_else(|| StoreError::Invalid(format!("unknown kind '{kind}'")))?,
                    namespace,
                    name,
                    change_type: ChangeType::from_name(&change_type).ok_or_else(|| {
                        StoreError::Invalid(format!("unknown change type '{change_type}'"))
                    })?,
                    object: object.map(|o| serde_json::from_str(&o)).transpose()?,
                })
            })
            .collect()
    }

    fn head_revision(&self) -> StoreResult<u64> {
        let conn = self.lock();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'changes'), 0)",
            [],
            |row| row.get(0),
        )?;
        Ok(seq as u64)
    }

    fn compact_changes(&self, up_to: u64) -> StoreResult<u64> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM changes WHERE revision <= ?1",
            params![up_to as i64],
        )?;
        if removed > 0 {
            debug!(up_to, removed, "change log compacted");
        }
        Ok(removed as u64)
    }
}

fn not_found(kind: ResourceKind, namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn meta_of(body: &Value) -> StoreResult<ObjectMeta> {
    let meta = body
        .get("metadata")
        .cloned()
        .ok_or_else(|| StoreError::Invalid("object body has no metadata".to_string()))?;
    Ok(serde_json::from_value(meta)?)
}

fn set_meta(body: &mut Value, meta: &ObjectMeta) -> StoreResult<()> {
    let obj = body
        .as_object_mut()
        .ok_or_else(|| StoreError::Invalid("object body is not a JSON object".to_string()))?;
    obj.insert("metadata".to_string(), serde_json::to_value(meta)?);
    Ok(())
}

fn load_body(
    conn: &Connection,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> StoreResult<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            params![kind.as_str(), namespace, name],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b))
        .transpose()
        .map_err(StoreError::from)
}

fn append_change(
    conn: &Connection,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    change_type: ChangeType,
    object: Option<&str>,
) -> StoreResult<u64> {
    conn.execute(
        "INSERT INTO changes (kind, namespace, name, change_type, object)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind.as_str(), namespace, name, change_type.as_str(), object],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

/// Upserts the object row and rewrites its owner index entries.
fn write_object(
    conn: &Connection,
    kind: ResourceKind,
    meta: &ObjectMeta,
    body: &Value,
) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO objects
            (kind, namespace, name, uid, resource_version, creation_revision, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            kind.as_str(),
            meta.namespace,
            meta.name,
            meta.uid,
            meta.resource_version as i64,
            meta.creation_revision as i64,
            body.to_string(),
        ],
    )?;
    conn.execute(
        "DELETE FROM owner_refs WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
        params![kind.as_str(), meta.namespace, meta.name],
    )?;
    for owner in &meta.owner_references {
        conn.execute(
            "INSERT OR IGNORE INTO owner_refs (owner_uid, kind, namespace, name)
             VALUES (?1, ?2, ?3, ?4)",
            params![owner.uid, kind.as_str(), meta.namespace, meta.name],
        )?;
    }
    Ok(())
}

/// Marks the object for deletion if it has finalizers, otherwise removes it.
fn request_delete(
    conn: &Connection,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> StoreResult<()> {
    let mut body =
        load_body(conn, kind, namespace, name)?.ok_or_else(|| not_found(kind, namespace, name))?;
    let mut meta = meta_of(&body)?;

    if meta.finalizers.is_empty() {
        remove_object(conn, kind, namespace, name, body)?;
        return Ok(());
    }
    if meta.deletion_timestamp.is_some() {
        return Ok(());
    }

    meta.deletion_timestamp = Some(Utc::now());
    meta.resource_version = append_change(conn, kind, namespace, name, ChangeType::Applied, None)?;
    set_meta(&mut body, &meta)?;
    write_object(conn, kind, &meta, &body)?;
    debug!(%kind, %namespace, %name, finalizers = meta.finalizers.len(), "object marked for deletion");
    Ok(())
}

/// Removes the object, records its tombstone and cascades to dependents.
/// Returns the revision of the deletion.
fn remove_object(
    conn: &Connection,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    mut body: Value,
) -> StoreResult<u64> {
    let mut meta = meta_of(&body)?;
    if meta.deletion_timestamp.is_none() {
        meta.deletion_timestamp = Some(Utc::now());
        set_meta(&mut body, &meta)?;
    }

    conn.execute(
        "DELETE FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
        params![kind.as_str(), namespace, name],
    )?;
    conn.execute(
        "DELETE FROM owner_refs WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
        params![kind.as_str(), namespace, name],
    )?;
    let revision = append_change(
        conn,
        kind,
        namespace,
        name,
        ChangeType::Deleted,
        Some(&body.to_string()),
    )?;
    debug!(%kind, %namespace, %name, revision, "object removed");

    let dependents = {
        let mut stmt =
            conn.prepare("SELECT kind, namespace, name FROM owner_refs WHERE owner_uid = ?1")?;
        stmt.query_map(params![meta.uid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
    };
    for (dep_kind, dep_namespace, dep_name) in dependents {
        let dep_kind = ResourceKind::from_name(&dep_kind)
            .ok_or_else(|| StoreError::Invalid(format!("unknown kind '{dep_kind}'")))?;
        match request_delete(conn, dep_kind, &dep_namespace, &dep_name) {
            Ok(()) => {
                debug!(owner = %name, kind = %dep_kind, namespace = %dep_namespace, name = %dep_name, "dependent collected");
            },
            Err(e) if e.is_not_found() => {},
            Err(e) => return Err(e),
        }
    }

    Ok(revision)
}
