//! Database schema and migration system for the type catalog.
//!
//! Uses rusqlite with WAL mode. Migrations are append-only; never edit existing entries,
//! only add new ones. `open_db` is the single entry point: it opens the database, enables
//! WAL + foreign keys, and applies any pending migrations.
//!
//! Every step is written to be re-runnable: `IF NOT EXISTS` DDL, views dropped before they
//! are re-created, and a duplicate `ADD COLUMN` counted as already applied. That lets stores
//! written before version tracking existed be brought forward by replaying steps.

use crate::error::CatalogError;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;

/// A single schema migration. Migrations are applied in order and tracked in `schema_meta`.
struct Migration {
    version: u32,
    steps: &'static [&'static str],
}

/// Append-only migration list. Never edit existing entries; only add new ones at the end.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        steps: &[
            "CREATE TABLE IF NOT EXISTS modules (
                id              INTEGER PRIMARY KEY,
                name            TEXT    NOT NULL,
                full_name       TEXT    NOT NULL UNIQUE,
                version         TEXT    NOT NULL,
                file_path       TEXT    NOT NULL,
                platform        TEXT    NOT NULL,
                runtime_version TEXT,
                indexed_at      TEXT    NOT NULL,
                content_hash    TEXT    NOT NULL,
                type_count      INTEGER NOT NULL DEFAULT 0,
                UNIQUE (name, version)
            );

            CREATE TABLE IF NOT EXISTS namespaces (
                id        INTEGER PRIMARY KEY,
                module_id INTEGER NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
                name      TEXT    NOT NULL,
                UNIQUE (module_id, name)
            );

            CREATE TABLE IF NOT EXISTS types (
                id             INTEGER PRIMARY KEY,
                module_id      INTEGER NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
                namespace_id   INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
                name           TEXT    NOT NULL,
                full_name      TEXT    NOT NULL,
                kind           TEXT    NOT NULL,
                is_abstract    INTEGER NOT NULL DEFAULT 0,
                is_sealed      INTEGER NOT NULL DEFAULT 0,
                is_public      INTEGER NOT NULL DEFAULT 0,
                is_static      INTEGER NOT NULL DEFAULT 0,
                is_generic     INTEGER NOT NULL DEFAULT 0,
                generic_params TEXT    NOT NULL DEFAULT '',
                base_type_id   INTEGER REFERENCES types(id) ON DELETE SET NULL,
                base_type_name TEXT,
                summary        TEXT,
                UNIQUE (namespace_id, name, generic_params)
            );

            CREATE TABLE IF NOT EXISTS type_interfaces (
                type_id      INTEGER NOT NULL REFERENCES types(id) ON DELETE CASCADE,
                interface_id INTEGER NOT NULL REFERENCES types(id) ON DELETE CASCADE,
                PRIMARY KEY (type_id, interface_id)
            );

            CREATE TABLE IF NOT EXISTS members (
                id             INTEGER PRIMARY KEY,
                type_id        INTEGER NOT NULL REFERENCES types(id) ON DELETE CASCADE,
                name           TEXT    NOT NULL,
                kind           TEXT    NOT NULL,
                return_type    TEXT,
                is_static      INTEGER NOT NULL DEFAULT 0,
                is_virtual     INTEGER NOT NULL DEFAULT 0,
                is_abstract    INTEGER NOT NULL DEFAULT 0,
                is_sealed      INTEGER NOT NULL DEFAULT 0,
                is_override    INTEGER NOT NULL DEFAULT 0,
                visibility     TEXT    NOT NULL,
                is_generic     INTEGER NOT NULL DEFAULT 0,
                generic_params TEXT    NOT NULL DEFAULT '',
                summary        TEXT,
                remarks        TEXT,
                returns_doc    TEXT
            );

            CREATE TABLE IF NOT EXISTS parameters (
                id            INTEGER PRIMARY KEY,
                member_id     INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                name          TEXT,
                type_name     TEXT    NOT NULL,
                position      INTEGER NOT NULL,
                is_optional   INTEGER NOT NULL DEFAULT 0,
                default_value TEXT,
                pass_mode     TEXT    NOT NULL DEFAULT 'value',
                UNIQUE (member_id, position)
            );

            CREATE TABLE IF NOT EXISTS enum_values (
                id      INTEGER PRIMARY KEY,
                type_id INTEGER NOT NULL REFERENCES types(id) ON DELETE CASCADE,
                name    TEXT    NOT NULL,
                value   TEXT    NOT NULL,
                UNIQUE (type_id, name)
            );

            CREATE TABLE IF NOT EXISTS property_accessors (
                id                INTEGER PRIMARY KEY,
                member_id         INTEGER NOT NULL UNIQUE REFERENCES members(id) ON DELETE CASCADE,
                has_getter        INTEGER NOT NULL DEFAULT 0,
                has_setter        INTEGER NOT NULL DEFAULT 0,
                getter_visibility TEXT,
                setter_visibility TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_modules_file_path     ON modules(file_path);
            CREATE INDEX IF NOT EXISTS idx_types_module_id       ON types(module_id);
            CREATE INDEX IF NOT EXISTS idx_types_name            ON types(name);
            CREATE INDEX IF NOT EXISTS idx_types_full_name       ON types(full_name);
            CREATE INDEX IF NOT EXISTS idx_types_base_type_id    ON types(base_type_id);
            CREATE INDEX IF NOT EXISTS idx_types_base_type_name  ON types(base_type_name);
            CREATE INDEX IF NOT EXISTS idx_type_interfaces_iface ON type_interfaces(interface_id);
            CREATE INDEX IF NOT EXISTS idx_members_type_id       ON members(type_id);
            CREATE INDEX IF NOT EXISTS idx_members_name          ON members(name);",
            "CREATE VIRTUAL TABLE IF NOT EXISTS members_fts USING fts5(
                name, summary, content='members', content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS members_fts_insert AFTER INSERT ON members BEGIN
                INSERT INTO members_fts(rowid, name, summary) VALUES (new.id, new.name, new.summary);
            END;

            CREATE TRIGGER IF NOT EXISTS members_fts_delete AFTER DELETE ON members BEGIN
                INSERT INTO members_fts(members_fts, rowid, name, summary)
                VALUES ('delete', old.id, old.name, old.summary);
            END;

            CREATE TRIGGER IF NOT EXISTS members_fts_update AFTER UPDATE ON members BEGIN
                INSERT INTO members_fts(members_fts, rowid, name, summary)
                VALUES ('delete', old.id, old.name, old.summary);
                INSERT INTO members_fts(rowid, name, summary) VALUES (new.id, new.name, new.summary);
            END;",
            "DROP VIEW IF EXISTS v_types;
            CREATE VIEW v_types AS
                SELECT t.id, t.name, t.full_name, t.kind, n.name AS namespace,
                       m.name AS module, m.version AS module_version,
                       t.is_abstract, t.is_sealed, t.is_static, t.is_generic,
                       t.generic_params, t.base_type_name
                FROM types t
                JOIN namespaces n ON t.namespace_id = n.id
                JOIN modules m ON t.module_id = m.id;

            DROP VIEW IF EXISTS v_members;
            CREATE VIEW v_members AS
                SELECT mb.id, mb.name, mb.kind, mb.return_type, mb.visibility,
                       mb.is_static, mb.is_virtual, mb.is_abstract, mb.is_override,
                       t.full_name AS type_full_name, t.kind AS type_kind,
                       m.name AS module
                FROM members mb
                JOIN types t ON mb.type_id = t.id
                JOIN modules m ON t.module_id = m.id;",
        ],
    },
    Migration {
        version: 2,
        steps: &[
            "CREATE TABLE IF NOT EXISTS products (
                id         INTEGER PRIMARY KEY,
                name       TEXT    NOT NULL UNIQUE,
                created_at TEXT    NOT NULL DEFAULT (datetime('now'))
            );",
            "ALTER TABLE modules ADD COLUMN product_id INTEGER REFERENCES products(id) ON DELETE SET NULL;",
            "CREATE INDEX IF NOT EXISTS idx_modules_product ON modules(product_id);",
            "DROP VIEW IF EXISTS v_types;
            CREATE VIEW v_types AS
                SELECT t.id, t.name, t.full_name, t.kind, n.name AS namespace,
                       m.name AS module, m.version AS module_version, p.name AS product,
                       t.is_abstract, t.is_sealed, t.is_static, t.is_generic,
                       t.generic_params, t.base_type_name
                FROM types t
                JOIN namespaces n ON t.namespace_id = n.id
                JOIN modules m ON t.module_id = m.id
                LEFT JOIN products p ON m.product_id = p.id;",
        ],
    },
    Migration {
        version: 3,
        steps: &[
            "CREATE TABLE IF NOT EXISTS type_interface_names (
                type_id        INTEGER NOT NULL REFERENCES types(id) ON DELETE CASCADE,
                interface_name TEXT    NOT NULL,
                PRIMARY KEY (type_id, interface_name)
            );

            CREATE INDEX IF NOT EXISTS idx_type_interface_names_name
                ON type_interface_names(interface_name);",
            // Edges resolved before names were recorded keep their target's name.
            "INSERT OR IGNORE INTO type_interface_names (type_id, interface_name)
                SELECT e.type_id, i.full_name
                FROM type_interfaces e
                JOIN types i ON e.interface_id = i.id;",
        ],
    },
];

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 3;

/// Open (or create) the catalog database at `path`, enable WAL mode and foreign keys,
/// and apply any pending migrations. Returns the ready-to-use connection.
pub fn open_db(path: &Path) -> Result<Connection, CatalogError> {
    let conn = Connection::open(path)?;

    // WAL mode for concurrent reads + single writer without blocking.
    conn.pragma_update(None, "journal_mode", "wal")?;
    conn.pragma_update(None, "foreign_keys", "on")?;

    // Bootstrap the migration-tracking table (idempotent).
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    record_legacy_generation(&conn)?;
    apply_migrations(&conn)?;
    Ok(conn)
}

/// Highest recorded schema version, 0 for an untracked store.
pub fn schema_version(conn: &Connection) -> SqlResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_meta",
        [],
        |row| row.get(0),
    )
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> SqlResult<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> SqlResult<bool> {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Stores written before `schema_meta` existed carry no version rows. Infer the
/// generation from the tables present and record it, so only later steps replay.
fn record_legacy_generation(conn: &Connection) -> Result<(), CatalogError> {
    if schema_version(conn)? > 0 || !table_exists(conn, "modules")? {
        return Ok(());
    }
    let generation =
        if table_exists(conn, "products")? && column_exists(conn, "modules", "product_id")? {
            2
        } else {
            1
        };
    log::info!("untracked catalog store detected, recording schema generation {generation}");
    for version in 1..=generation {
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (version) VALUES (?1)",
            [version],
        )?;
    }
    Ok(())
}

/// Apply all migrations whose version hasn't been recorded yet.
fn apply_migrations(conn: &Connection) -> Result<(), CatalogError> {
    let max_applied = schema_version(conn)?;

    for m in MIGRATIONS {
        if m.version > max_applied {
            apply_migration(conn, m).map_err(|source| CatalogError::Migration {
                version: m.version,
                source,
            })?;
            log::debug!("applied catalog schema migration {}", m.version);
        }
    }
    Ok(())
}

fn apply_migration(conn: &Connection, m: &Migration) -> SqlResult<()> {
    let tx = conn.unchecked_transaction()?;
    for step in m.steps {
        run_step(&tx, step)?;
    }
    tx.execute("INSERT INTO schema_meta (version) VALUES (?1)", [m.version])?;
    tx.commit()
}

/// Execute one migration step; a column that already exists counts as applied.
fn run_step(conn: &Connection, sql: &str) -> SqlResult<()> {
    match conn.execute_batch(sql) {
        Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.contains("duplicate column name") =>
        {
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_db() -> (Connection, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let conn = open_db(&db_path).unwrap();
        (conn, dir)
    }

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn schema_snapshot(conn: &Connection) -> Vec<(String, String, Option<String>)> {
        conn.prepare("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn insert_module(conn: &Connection, name: &str) -> i64 {
        conn.execute(
            "INSERT INTO modules (name, full_name, version, file_path, platform, indexed_at, content_hash)
             VALUES (?1, ?1 || ', Version=1.0.0.0', '1.0.0.0', '/tmp/' || ?1 || '.dll', 'AnyCPU', 'now', 'abc')",
            [name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    /// A store as the first generation left it: v1 tables, no version rows.
    fn generation_one_store(path: &Path) {
        let conn = Connection::open(path).unwrap();
        for step in MIGRATIONS[0].steps {
            conn.execute_batch(step).unwrap();
        }
        insert_module(&conn, "Legacy");
    }

    /// A tracked store at `version`, built by replaying that many migrations.
    fn store_at_version(path: &Path, version: u32) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_meta (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .unwrap();
        for m in MIGRATIONS.iter().filter(|m| m.version <= version) {
            for step in m.steps {
                conn.execute_batch(step).unwrap();
            }
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", [m.version])
                .unwrap();
        }
        conn
    }

    #[test]
    fn open_db_creates_tables() {
        let (conn, _dir) = open_temp_db();
        let tables = names(&conn, "table");
        for expected in [
            "modules",
            "products",
            "namespaces",
            "types",
            "type_interfaces",
            "type_interface_names",
            "members",
            "parameters",
            "enum_values",
            "property_accessors",
            "members_fts",
            "schema_meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(names(&conn, "view"), vec!["v_members", "v_types"]);
    }

    #[test]
    fn wal_mode_enabled() {
        let (conn, _dir) = open_temp_db();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn foreign_keys_enabled() {
        let (conn, _dir) = open_temp_db();
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");

        // Open twice; the second open should not fail or re-apply.
        let conn1 = open_db(&db_path).unwrap();
        let before = schema_snapshot(&conn1);
        drop(conn1);
        let conn2 = open_db(&db_path).unwrap();

        let version_count: u32 = conn2
            .query_row("SELECT COUNT(*) FROM schema_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version_count, MIGRATIONS.len() as u32);
        assert_eq!(schema_version(&conn2).unwrap(), SCHEMA_VERSION);
        assert_eq!(schema_snapshot(&conn2), before);
    }

    #[test]
    fn generation_one_store_is_upgraded_in_place() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("legacy.db");
        generation_one_store(&db_path);

        let conn = open_db(&db_path).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(table_exists(&conn, "products").unwrap());
        assert!(column_exists(&conn, "modules", "product_id").unwrap());

        // existing rows survive with a NULL product
        let (name, product): (String, Option<i64>) = conn
            .query_row("SELECT name, product_id FROM modules", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Legacy");
        assert!(product.is_none());
    }

    #[test]
    fn upgrade_matches_fresh_schema() {
        let dir = TempDir::new().unwrap();
        let legacy_path = dir.path().join("legacy.db");
        generation_one_store(&legacy_path);
        let upgraded = open_db(&legacy_path).unwrap();
        let (fresh, _fresh_dir) = open_temp_db();

        let shape = |conn: &Connection| -> Vec<(String, String)> {
            schema_snapshot(conn)
                .into_iter()
                .filter(|(kind, _, _)| kind != "table")
                .map(|(kind, name, _)| (kind, name))
                .collect()
        };
        assert_eq!(shape(&upgraded), shape(&fresh));
        assert_eq!(
            column_exists(&upgraded, "modules", "product_id").unwrap(),
            column_exists(&fresh, "modules", "product_id").unwrap()
        );
    }

    #[test]
    fn migration_steps_replay_without_change() {
        let (conn, _dir) = open_temp_db();
        let before = schema_snapshot(&conn);

        // Replaying every step, including the ADD COLUMN, must be a no-op.
        for m in MIGRATIONS {
            for step in m.steps {
                run_step(&conn, step).unwrap();
            }
        }
        assert_eq!(schema_snapshot(&conn), before);
    }

    #[test]
    fn generation_two_store_without_versions_is_recorded() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("gen2.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            for m in MIGRATIONS {
                for step in m.steps {
                    conn.execute_batch(step).unwrap();
                }
            }
        }
        let conn = open_db(&db_path).unwrap();
        let versions: Vec<u32> = conn
            .prepare("SELECT version FROM schema_meta ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn failed_migration_is_reported_and_rolled_back() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("broken.db");
        {
            let conn = store_at_version(&db_path, 1);
            // A table squatting on a view name makes the v2 view step fail.
            conn.execute_batch("DROP VIEW v_types; CREATE TABLE v_types (id INTEGER);")
                .unwrap();
        }

        match open_db(&db_path) {
            Err(CatalogError::Migration { version, .. }) => assert_eq!(version, 2),
            other => panic!("expected a migration failure, got {other:?}"),
        }

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 1);
        assert!(!table_exists(&conn, "products").unwrap());
        assert!(!column_exists(&conn, "modules", "product_id").unwrap());
    }

    #[test]
    fn interface_names_are_backfilled_from_edges() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("gen2.db");
        {
            let conn = store_at_version(&db_path, 2);
            let module = insert_module(&conn, "Shapes");
            conn.execute(
                "INSERT INTO namespaces (module_id, name) VALUES (?1, 'Shapes')",
                [module],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO types (module_id, namespace_id, name, full_name, kind)
                 VALUES (?1, 1, 'IShape', 'Shapes.IShape', 'Interface'),
                        (?1, 1, 'Circle', 'Shapes.Circle', 'Class')",
                [module],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO type_interfaces (type_id, interface_id) VALUES (2, 1)",
                [],
            )
            .unwrap();
        }

        let conn = open_db(&db_path).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 3);
        let (type_id, name): (i64, String) = conn
            .query_row(
                "SELECT type_id, interface_name FROM type_interface_names",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(type_id, 2);
        assert_eq!(name, "Shapes.IShape");
    }

    #[test]
    fn foreign_key_cascade_deletes_subgraph() {
        let (conn, _dir) = open_temp_db();
        let module = insert_module(&conn, "Sample");
        conn.execute(
            "INSERT INTO namespaces (module_id, name) VALUES (?1, 'Sample')",
            [module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO types (module_id, namespace_id, name, full_name, kind)
             VALUES (?1, 1, 'Widget', 'Sample.Widget', 'Class')",
            [module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO members (type_id, name, kind, visibility) VALUES (1, 'GetSize', 'Method', 'public')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM modules WHERE id = ?1", [module])
            .unwrap();

        for table in ["namespaces", "types", "members", "type_interface_names"] {
            let count: u32 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "{table} not cleared");
        }
        let fts: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM members_fts WHERE members_fts MATCH 'GetSize'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(fts, 0);
    }

    #[test]
    fn member_inserts_feed_full_text_index() {
        let (conn, _dir) = open_temp_db();
        let module = insert_module(&conn, "Sample");
        conn.execute(
            "INSERT INTO namespaces (module_id, name) VALUES (?1, '')",
            [module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO types (module_id, namespace_id, name, full_name, kind)
             VALUES (?1, 1, 'Widget', 'Widget', 'Class')",
            [module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO members (type_id, name, kind, visibility) VALUES (1, 'Resize', 'Method', 'public')",
            [],
        )
        .unwrap();

        let hit: String = conn
            .query_row(
                "SELECT name FROM members_fts WHERE members_fts MATCH 'Resi*'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hit, "Resize");
    }

    #[test]
    fn base_type_link_is_nulled_on_delete() {
        let (conn, _dir) = open_temp_db();
        let base_module = insert_module(&conn, "Base");
        let derived_module = insert_module(&conn, "Derived");
        conn.execute(
            "INSERT INTO namespaces (module_id, name) VALUES (?1, 'N'), (?2, 'N')",
            [base_module, derived_module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO types (module_id, namespace_id, name, full_name, kind)
             VALUES (?1, 1, 'Shape', 'N.Shape', 'Class')",
            [base_module],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO types (module_id, namespace_id, name, full_name, kind, base_type_id, base_type_name)
             VALUES (?1, 2, 'Circle', 'N.Circle', 'Class', 1, 'N.Shape')",
            [derived_module],
        )
        .unwrap();

        conn.execute("DELETE FROM modules WHERE id = ?1", [base_module])
            .unwrap();

        let (base_id, base_name): (Option<i64>, Option<String>) = conn
            .query_row(
                "SELECT base_type_id, base_type_name FROM types WHERE name = 'Circle'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(base_id.is_none());
        assert_eq!(base_name.as_deref(), Some("N.Shape"));
    }
}
