//! The SQLite backing file.
//!
//! Layout:
//! ```text
//! keep_metadata(key TEXT PRIMARY KEY, value TEXT)
//! keep_entities(id INTEGER PRIMARY KEY, kind TEXT)
//! keep_links(source, relationship, target, position)
//! e_<Kind>(id INTEGER PRIMARY KEY, a_<attribute> ...)   -- one per kind
//! ```
//!
//! The metadata table records the schema that last wrote the file (as JSON)
//! together with its fingerprint, so an open can tell whether to migrate
//! and what to migrate from.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keep_schema::{EntityKind, SchemaModel};
use keep_types::{EntityId, SchemaFingerprint, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use crate::codec;
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityStatus};
use crate::error::{StoreError, StoreResult};
use crate::working_set::TrackedEntity;

/// Version of the table layout above.
pub(crate) const FORMAT_VERSION: &str = "1";

const META_FORMAT: &str = "format_version";
const META_SCHEMA_NAME: &str = "schema_name";
const META_FINGERPRINT: &str = "schema_fingerprint";
const META_SCHEMA: &str = "schema_json";
const META_NEXT_ID: &str = "next_entity_id";

const BOOKKEEPING_DDL: &str = "
CREATE TABLE keep_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE keep_entities (
    id   INTEGER PRIMARY KEY,
    kind TEXT NOT NULL
);
CREATE INDEX keep_entities_kind ON keep_entities (kind);
CREATE TABLE keep_links (
    source       INTEGER NOT NULL,
    relationship TEXT NOT NULL,
    target       INTEGER NOT NULL,
    position     INTEGER NOT NULL,
    PRIMARY KEY (source, relationship, target)
);
CREATE INDEX keep_links_target ON keep_links (target);
";

/// What the backing file says about itself.
#[derive(Debug)]
pub(crate) struct Metadata {
    pub schema: SchemaModel,
    pub fingerprint: SchemaFingerprint,
    pub next_entity_id: EntityId,
}

/// An open, exclusively locked backing file.
pub(crate) struct BackingFile {
    conn: Connection,
    path: PathBuf,
}

impl BackingFile {
    /// Open (or create) the file at `path` and take the write lock.
    ///
    /// Returns the file and whether it was absent or empty beforehand.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<(Self, bool)> {
        let fresh = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock = || -> rusqlite::Result<(Connection, String)> {
            let conn = Connection::open(path)?;
            conn.busy_timeout(config.busy_timeout)?;
            conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())?;
            let mode: String =
                conn.query_row("PRAGMA locking_mode = EXCLUSIVE", [], |row| row.get(0))?;
            // In exclusive mode the lock taken here is held until the
            // connection closes.
            conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")?;
            Ok((conn, mode))
        };
        let (conn, mode) = lock().map_err(|e| classify(path, e))?;
        debug!(path = %path.display(), fresh, locking_mode = %mode, "backing file opened");

        Ok((
            Self {
                conn,
                path: path.to_path_buf(),
            },
            fresh,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Lay out a brand-new file for `model`.
    pub fn initialize(&mut self, model: &SchemaModel) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(BOOKKEEPING_DDL)?;
        for kind in model.kinds.values() {
            create_kind_table(&tx, kind, &table_name(&kind.name))?;
        }
        write_meta(&tx, META_FORMAT, FORMAT_VERSION)?;
        write_meta(&tx, META_NEXT_ID, &EntityId::FIRST.get().to_string())?;
        write_schema(&tx, model)?;
        tx.commit()?;
        debug!(path = %self.path.display(), kinds = model.kinds.len(), "backing file initialized");
        Ok(())
    }

    /// Read and check the metadata of an existing file.
    pub fn read_metadata(&self) -> StoreResult<Metadata> {
        let corrupt = |reason: String| StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        };

        let has_metadata: bool = self
            .conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'keep_metadata')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| classify(&self.path, e))?;
        if !has_metadata {
            return Err(corrupt("not a keep store (no metadata table)".into()));
        }

        let mut stmt = self.conn.prepare("SELECT key, value FROM keep_metadata")?;
        let meta: HashMap<String, String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<_, _>>()?;
        let field = |key: &str| {
            meta.get(key)
                .map(String::as_str)
                .ok_or_else(|| corrupt(format!("metadata key {key:?} is missing")))
        };

        let format = field(META_FORMAT)?;
        if format != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {format:?}")));
        }
        let fingerprint = SchemaFingerprint::from_hex(field(META_FINGERPRINT)?)
            .map_err(|e| corrupt(format!("bad schema fingerprint: {e}")))?;
        let schema: SchemaModel = serde_json::from_str(field(META_SCHEMA)?)
            .map_err(|e| corrupt(format!("recorded schema cannot be decoded: {e}")))?;
        if schema.fingerprint() != fingerprint {
            return Err(corrupt(
                "recorded schema does not match its recorded fingerprint".into(),
            ));
        }
        let next_entity_id = field(META_NEXT_ID)?
            .parse::<u64>()
            .map(EntityId::new)
            .map_err(|e| corrupt(format!("bad entity counter: {e}")))?;
        if let Some(name) = meta.get(META_SCHEMA_NAME) {
            debug!(schema = %name, fingerprint = %fingerprint.short_hex(), "recorded schema read");
        }

        Ok(Metadata {
            schema,
            fingerprint,
            next_entity_id,
        })
    }

    /// Kind of a persisted entity, if it exists.
    pub fn kind_of(&self, id: EntityId) -> StoreResult<Option<String>> {
        let Some(raw) = stored_id(id) else {
            return Ok(None);
        };
        Ok(self
            .conn
            .query_row(
                "SELECT kind FROM keep_entities WHERE id = ?1",
                [raw],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Ids of every persisted entity of `kind`, ascending.
    pub fn ids_of_kind(&self, kind: &str) -> StoreResult<Vec<EntityId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM keep_entities WHERE kind = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([kind], |row| row.get::<_, i64>(0))?
            .map(|r| r.and_then(entity_id))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// Persisted entities holding a link to `target`.
    pub fn sources_linking_to(&self, target: EntityId) -> StoreResult<Vec<EntityId>> {
        let Some(raw) = stored_id(target) else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT source FROM keep_links WHERE target = ?1 ORDER BY source",
        )?;
        let ids = stmt
            .query_map([raw], |row| row.get::<_, i64>(0))?
            .map(|r| r.and_then(entity_id))
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// Fault a persisted entity into memory.
    pub fn load_entity(&self, model: &SchemaModel, id: EntityId) -> StoreResult<Option<Entity>> {
        let Some(kind_name) = self.kind_of(id)? else {
            return Ok(None);
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        };
        let kind = model
            .kind(&kind_name)
            .ok_or_else(|| corrupt(format!("entity {id} has unknown kind {kind_name:?}")))?;

        let mut columns = vec!["id".to_string()];
        columns.extend(kind.attributes.keys().map(|a| column_name(a)));
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            columns.join(", "),
            table_name(&kind.name)
        );
        let raw: Option<Vec<SqlValue>> = self
            .conn
            .query_row(&sql, [sql_id(id)?], |row| {
                (1..columns.len()).map(|i| row.get::<_, SqlValue>(i)).collect()
            })
            .optional()?;
        let raw = raw.ok_or_else(|| corrupt(format!("entity {id} has no {kind_name} row")))?;

        let mut attributes = BTreeMap::new();
        for (attr, stored) in kind.attributes.values().zip(&raw) {
            let value = codec::from_sql(attr.ty, ValueRef::from(stored))
                .map_err(|reason| corrupt(format!("entity {id}.{}: {reason}", attr.name)))?;
            if !value.is_null() {
                attributes.insert(attr.name.clone(), value);
            }
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT relationship, target FROM keep_links WHERE source = ?1 ORDER BY relationship, position",
        )?;
        let mut relationships: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
        let rows = stmt.query_map([sql_id(id)?], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (name, target) = row?;
            relationships.entry(name).or_default().push(entity_id(target)?);
        }

        Ok(Some(Entity::new(id, kind_name, attributes, relationships)))
    }

    /// Write every pending entity in one transaction.
    ///
    /// Any failure rolls the transaction back, leaving the file as it was.
    pub fn commit<'a>(
        &mut self,
        model: &SchemaModel,
        pending: impl IntoIterator<Item = &'a TrackedEntity>,
        next_entity_id: EntityId,
    ) -> StoreResult<()> {
        let tx = self.conn.transaction().map_err(StoreError::PersistFailed)?;
        for tracked in pending {
            let entity = &tracked.entity;
            let kind = model
                .kind(entity.kind())
                .ok_or_else(|| StoreError::ValidationFailed {
                    entity: entity.id(),
                    reason: format!("unknown entity kind {:?}", entity.kind()),
                })?;
            let written = match tracked.status {
                EntityStatus::Clean => Ok(()),
                EntityStatus::Inserted => {
                    insert_row(&tx, kind, entity).and_then(|()| replace_links(&tx, entity))
                }
                EntityStatus::Updated => {
                    update_row(&tx, kind, entity).and_then(|()| replace_links(&tx, entity))
                }
                EntityStatus::Deleted => delete_row(&tx, kind, entity.id()),
            };
            written.map_err(StoreError::PersistFailed)?;
        }
        write_meta(&tx, META_NEXT_ID, &next_entity_id.get().to_string())
            .map_err(StoreError::PersistFailed)?;
        tx.commit().map_err(StoreError::PersistFailed)
    }
}

impl std::fmt::Debug for BackingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingFile")
            .field("path", &self.path)
            .finish()
    }
}

/// Sort SQLite failures at open into lock and corruption errors.
fn classify(path: &Path, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Locked {
            path: path.to_path_buf(),
        },
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
        _ => StoreError::Sqlite(err),
    }
}

pub(crate) fn table_name(kind: &str) -> String {
    format!("\"e_{kind}\"")
}

pub(crate) fn column_name(attribute: &str) -> String {
    format!("\"a_{attribute}\"")
}

/// Key of `id` in the backing file. Ids above `i64::MAX` are never stored.
fn stored_id(id: EntityId) -> Option<i64> {
    i64::try_from(id.get()).ok()
}

fn sql_id(id: EntityId) -> rusqlite::Result<i64> {
    stored_id(id).ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(format!("entity id {id} is out of range").into())
    })
}

fn entity_id(raw: i64) -> rusqlite::Result<EntityId> {
    u64::try_from(raw)
        .map(EntityId::new)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, raw))
}

pub(crate) fn create_kind_table(
    conn: &Connection,
    kind: &EntityKind,
    table: &str,
) -> rusqlite::Result<()> {
    let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
    columns.extend(
        kind.attributes
            .values()
            .map(|a| format!("{} {}", column_name(&a.name), codec::column_type(a.ty))),
    );
    conn.execute_batch(&format!("CREATE TABLE {table} ({});", columns.join(", ")))
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO keep_metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Record `model` as the schema the file is now written with.
pub(crate) fn write_schema(conn: &Connection, model: &SchemaModel) -> StoreResult<()> {
    let json = serde_json::to_string(model)?;
    write_meta(conn, META_SCHEMA_NAME, &model.name)?;
    write_meta(conn, META_FINGERPRINT, &model.fingerprint().to_hex())?;
    write_meta(conn, META_SCHEMA, &json)?;
    Ok(())
}

fn row_values(kind: &EntityKind, entity: &Entity) -> rusqlite::Result<Vec<SqlValue>> {
    kind.attributes
        .keys()
        .map(|name| {
            codec::to_sql(entity.get(name).unwrap_or(&Value::Null))
                .map_err(|reason| rusqlite::Error::ToSqlConversionFailure(reason.into()))
        })
        .collect()
}

fn insert_row(conn: &Connection, kind: &EntityKind, entity: &Entity) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO keep_entities (id, kind) VALUES (?1, ?2)",
        params![sql_id(entity.id())?, kind.name],
    )?;

    let mut columns = vec!["id".to_string()];
    columns.extend(kind.attributes.keys().map(|a| column_name(a)));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let mut values = vec![SqlValue::Integer(sql_id(entity.id())?)];
    values.extend(row_values(kind, entity)?);
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name(&kind.name),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values),
    )?;
    Ok(())
}

fn update_row(conn: &Connection, kind: &EntityKind, entity: &Entity) -> rusqlite::Result<()> {
    if kind.attributes.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = kind
        .attributes
        .keys()
        .enumerate()
        .map(|(i, a)| format!("{} = ?{}", column_name(a), i + 2))
        .collect();
    let mut values = vec![SqlValue::Integer(sql_id(entity.id())?)];
    values.extend(row_values(kind, entity)?);
    conn.execute(
        &format!(
            "UPDATE {} SET {} WHERE id = ?1",
            table_name(&kind.name),
            assignments.join(", ")
        ),
        params_from_iter(values),
    )?;
    Ok(())
}

fn delete_row(conn: &Connection, kind: &EntityKind, id: EntityId) -> rusqlite::Result<()> {
    let id = sql_id(id)?;
    conn.execute(
        "DELETE FROM keep_links WHERE source = ?1 OR target = ?1",
        [id],
    )?;
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table_name(&kind.name)),
        [id],
    )?;
    conn.execute("DELETE FROM keep_entities WHERE id = ?1", [id])?;
    Ok(())
}

fn replace_links(conn: &Connection, entity: &Entity) -> rusqlite::Result<()> {
    let source = sql_id(entity.id())?;
    conn.execute("DELETE FROM keep_links WHERE source = ?1", [source])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO keep_links (source, relationship, target, position) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (name, targets) in entity.relationships() {
        for (position, target) in targets.iter().enumerate() {
            stmt.execute(params![source, name, sql_id(*target)?, position as i64])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> SchemaModel {
        SchemaModel::parse(
            "Notes",
            "[entities.Note.attributes]\ntext = { type = \"string\" }\nstars = { type = \"integer\", optional = true }\n",
        )
        .unwrap()
    }

    fn open_fresh(dir: &tempfile::TempDir) -> BackingFile {
        let (mut file, fresh) =
            BackingFile::open(&dir.path().join("notes.sqlite"), &StoreConfig::default()).unwrap();
        assert!(fresh);
        file.initialize(&model()).unwrap();
        file
    }

    #[test]
    fn initialize_records_schema_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_fresh(&dir);
        let meta = file.read_metadata().unwrap();
        assert_eq!(meta.fingerprint, model().fingerprint());
        assert_eq!(meta.schema, model());
        assert_eq!(meta.next_entity_id, EntityId::FIRST);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("x.sqlite");
        let (_file, fresh) = BackingFile::open(&path, &StoreConfig::default()).unwrap();
        assert!(fresh);
        assert!(path.exists());
    }

    #[test]
    fn non_database_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.sqlite");
        fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = BackingFile::open(&path, &StoreConfig::default())
            .and_then(|(file, _)| file.read_metadata().map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn foreign_database_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (x INTEGER);")
            .unwrap();
        let (file, fresh) = BackingFile::open(&path, &StoreConfig::default()).unwrap();
        assert!(!fresh);
        assert!(matches!(
            file.read_metadata(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn second_handle_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _first = open_fresh(&dir);
        let err = BackingFile::open(&dir.path().join("notes.sqlite"), &StoreConfig::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }), "{err}");
    }

    #[test]
    fn commit_then_load_entity() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_fresh(&dir);
        let model = model();
        let mut attributes = BTreeMap::new();
        attributes.insert("text".to_string(), Value::from("hello"));
        let mut relationships = BTreeMap::new();
        relationships.insert("see_also".to_string(), vec![EntityId::new(9)]);
        let tracked = TrackedEntity {
            entity: Entity::new(EntityId::FIRST, "Note", attributes, relationships),
            status: EntityStatus::Inserted,
        };
        file.commit(&model, [&tracked], EntityId::new(2)).unwrap();

        let loaded = file.load_entity(&model, EntityId::FIRST).unwrap().unwrap();
        assert_eq!(loaded.get("text"), Some(&Value::from("hello")));
        assert_eq!(loaded.get("stars"), None);
        assert_eq!(loaded.related("see_also"), &[EntityId::new(9)]);
        assert_eq!(file.ids_of_kind("Note").unwrap(), vec![EntityId::FIRST]);
        assert_eq!(file.sources_linking_to(EntityId::new(9)).unwrap(), vec![EntityId::FIRST]);
        assert_eq!(file.read_metadata().unwrap().next_entity_id, EntityId::new(2));
    }

    #[test]
    fn load_missing_entity_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_fresh(&dir);
        assert!(file.load_entity(&model(), EntityId::new(77)).unwrap().is_none());
    }

    #[test]
    fn ids_beyond_storage_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_fresh(&dir);
        let huge = EntityId::new(u64::MAX);
        assert_eq!(file.kind_of(huge).unwrap(), None);
        assert!(file.load_entity(&model(), huge).unwrap().is_none());
        assert!(file.sources_linking_to(huge).unwrap().is_empty());

        let mut attributes = BTreeMap::new();
        attributes.insert("text".to_string(), Value::from("overflow"));
        let tracked = TrackedEntity {
            entity: Entity::new(huge, "Note", attributes, BTreeMap::new()),
            status: EntityStatus::Inserted,
        };
        let err = file.commit(&model(), [&tracked], EntityId::new(2)).unwrap_err();
        assert!(matches!(err, StoreError::PersistFailed(_)), "{err}");
        assert!(file.ids_of_kind("Note").unwrap().is_empty());
    }

    #[test]
    fn non_finite_double_fails_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, _) =
            BackingFile::open(&dir.path().join("m.sqlite"), &StoreConfig::default()).unwrap();
        let model = SchemaModel::parse(
            "Metrics",
            "[entities.Sample.attributes]\nreading = { type = \"double\" }\n",
        )
        .unwrap();
        file.initialize(&model).unwrap();
        let mut attributes = BTreeMap::new();
        attributes.insert("reading".to_string(), Value::Double(f64::NAN));
        let tracked = TrackedEntity {
            entity: Entity::new(EntityId::FIRST, "Sample", attributes, BTreeMap::new()),
            status: EntityStatus::Inserted,
        };
        let err = file.commit(&model, [&tracked], EntityId::new(2)).unwrap_err();
        assert!(matches!(err, StoreError::PersistFailed(_)), "{err}");
        assert!(file.ids_of_kind("Sample").unwrap().is_empty());
    }
}
