//! The `Catalog` handle: one store, one configuration, one writer at a time.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rusqlite::Connection;

use crate::config::{CatalogConfig, typecat_home};
use crate::error::{CatalogError, Result};
use crate::index::{CatalogOptions, CatalogSummary, Query, catalog_module, open_db, remove_module};

/// An open catalog store.
///
/// Reads go through [`Catalog::query`]. Writes ([`Catalog::catalog`],
/// [`Catalog::remove`]) hold an exclusive lock on `<store>.lock` for their
/// duration, so a second process writing the same store gets
/// [`CatalogError::Busy`] instead of interleaving.
pub struct Catalog {
    conn: Connection,
    path: PathBuf,
    config: CatalogConfig,
}

impl Catalog {
    /// Open (creating and migrating as needed) the store at `path`.
    pub fn open(path: &Path, config: CatalogConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CatalogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = open_db(path)?;
        log::debug!("opened catalog {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            config,
        })
    }

    /// Open the store named by `config.toml` in the typecat home.
    pub fn open_default() -> Result<Self> {
        let home = typecat_home()?;
        let config = CatalogConfig::load_default()?;
        let path = config.database_path(&home);
        Self::open(&path, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Catalog one module file. See [`catalog_module`] for the pass rules.
    pub fn catalog(&mut self, module: &Path, options: &CatalogOptions) -> Result<CatalogSummary> {
        let _lock = WriterLock::try_acquire(&self.lock_path())?;
        catalog_module(&mut self.conn, module, options, &self.config)
    }

    /// Remove every module matching a name, identity string or path.
    pub fn remove(&mut self, name_or_path: &str) -> Result<usize> {
        let _lock = WriterLock::try_acquire(&self.lock_path())?;
        remove_module(&self.conn, name_or_path)
    }

    pub fn query(&self) -> Query<'_> {
        Query::new(&self.conn)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn status(&self) -> Result<String> {
        self.query().catalog_status(&self.path)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Exclusive advisory lock on a file, released on drop.
struct WriterLock {
    file: File,
}

impl WriterLock {
    /// Take the lock without blocking; a held lock is `Busy`.
    fn try_acquire(lock_path: &Path) -> Result<Self> {
        let io_error = |source| CatalogError::Io {
            path: lock_path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(io_error)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if is_contended(&e) => Err(CatalogError::Busy {
                path: lock_path.to_path_buf(),
            }),
            Err(e) => Err(io_error(e)),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// fs2 reports contention as a raw OS error that does not always map to WouldBlock
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PassStatus;
    use crate::test_support::sample_module;
    use serial_test::serial;
    use tempfile::TempDir;

    fn open_temp_catalog(dir: &TempDir) -> Catalog {
        let config = CatalogConfig {
            runtime_dir: Some(dir.path().join("no-runtime")),
            ..CatalogConfig::default()
        };
        Catalog::open(&dir.path().join("store/catalog.db"), config).unwrap()
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let catalog = open_temp_catalog(&dir);
        assert!(catalog.path().exists());
        assert_eq!(catalog.lock_path(), dir.path().join("store/catalog.db.lock"));
    }

    #[test]
    fn catalog_then_query() {
        let dir = TempDir::new().unwrap();
        let mut catalog = open_temp_catalog(&dir);
        let module = dir.path().join("lib/Sample.dll");
        sample_module().save(&module);

        let summary = catalog.catalog(&module, &CatalogOptions::default()).unwrap();
        assert_eq!(summary.status, PassStatus::Created);
        let again = catalog.catalog(&module, &CatalogOptions::default()).unwrap();
        assert_eq!(again.status, PassStatus::Unchanged);

        let modules = catalog.query().list_modules(None).unwrap();
        assert_eq!(modules.len(), 1);
        assert!(catalog.status().unwrap().contains("modules: 1, types: 2"));
    }

    #[test]
    fn second_writer_is_busy() {
        let dir = TempDir::new().unwrap();
        let mut catalog = open_temp_catalog(&dir);
        let module = dir.path().join("lib/Sample.dll");
        sample_module().save(&module);

        let held = WriterLock::try_acquire(&catalog.lock_path()).unwrap();
        let err = catalog
            .catalog(&module, &CatalogOptions::default())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Busy { .. }));
        assert!(catalog.query().list_modules(None).unwrap().is_empty());

        drop(held);
        catalog.catalog(&module, &CatalogOptions::default()).unwrap();
    }

    #[test]
    fn lock_is_released_after_each_write() {
        let dir = TempDir::new().unwrap();
        let mut catalog = open_temp_catalog(&dir);
        let module = dir.path().join("lib/Sample.dll");
        sample_module().save(&module);

        catalog.catalog(&module, &CatalogOptions::default()).unwrap();
        assert!(WriterLock::try_acquire(&catalog.lock_path()).is_ok());
        assert_eq!(catalog.remove("Sample").unwrap(), 1);
        assert!(matches!(
            catalog.remove("Sample"),
            Err(CatalogError::UnknownModule(_))
        ));
    }

    #[test]
    #[serial]
    fn open_default_uses_typecat_home() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "database = \"stores/main.db\"\n",
        )
        .unwrap();
        // SAFETY: serialised with the other env-mutating tests.
        unsafe { std::env::set_var("TYPECAT_HOME", dir.path()) };
        let catalog = Catalog::open_default();
        unsafe { std::env::remove_var("TYPECAT_HOME") };

        let catalog = catalog.unwrap();
        assert_eq!(catalog.path(), dir.path().join("stores/main.db"));
        assert_eq!(catalog.config().database, Some(PathBuf::from("stores/main.db")));
    }
}
