//! Catalog configuration, read from `config.toml` in the typecat home.

use crate::error::CatalogError;
use crate::metadata::LoaderOptions;
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Defaults for every config field.
pub struct ConfigDefaults;

impl ConfigDefaults {
    pub const DATABASE_FILE: &'static str = "catalog.db";
    pub const CONFIG_FILE: &'static str = "config.toml";
    pub const HOME_DIR: &'static str = ".typecat";
    pub const STRICT_DEPENDENCIES: bool = false;

    /// File-name fragments that mark a parent-directory module as a shared
    /// support library worth offering to the resolver.
    pub const SUPPORT_TOKENS: &'static [&'static str] = &[
        "core",
        "runtime",
        "common",
        "abstractions",
        "primitives",
        "netstandard",
        "mscorlib",
    ];
    pub const MODULE_EXTENSIONS: &'static [&'static str] = &["dll", "exe", "winmd"];
}

// Thin wrappers for serde's #[serde(default = "...")] requirement
fn default_support_tokens() -> Vec<String> {
    ConfigDefaults::SUPPORT_TOKENS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_module_extensions() -> Vec<String> {
    ConfigDefaults::MODULE_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_strict_dependencies() -> bool {
    ConfigDefaults::STRICT_DEPENDENCIES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog database; relative paths resolve against the typecat home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Runtime library directory. When set, discovery is skipped entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    #[serde(default = "default_support_tokens")]
    pub support_tokens: Vec<String>,
    #[serde(default = "default_module_extensions")]
    pub module_extensions: Vec<String>,
    #[serde(default = "default_strict_dependencies")]
    pub strict_dependencies: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database: None,
            runtime_dir: None,
            support_tokens: default_support_tokens(),
            module_extensions: default_module_extensions(),
            strict_dependencies: default_strict_dependencies(),
        }
    }
}

impl CatalogConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content)
            .map_err(|e| CatalogError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `config.toml` from the typecat home.
    pub fn load_default() -> Result<Self, CatalogError> {
        Self::load(&typecat_home()?.join(ConfigDefaults::CONFIG_FILE))
    }

    pub fn database_path(&self, home: &Path) -> PathBuf {
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => home.join(path),
            None => home.join(ConfigDefaults::DATABASE_FILE),
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            strict_dependencies: self.strict_dependencies,
        }
    }

    /// Whether `path` carries one of the configured module extensions.
    pub fn is_module_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.module_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

/// Typecat home directory.
///
/// Precedence:
/// 1. `TYPECAT_HOME` environment variable
/// 2. `~/.typecat` default
pub fn typecat_home() -> Result<PathBuf, CatalogError> {
    if let Ok(home) = std::env::var("TYPECAT_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = home_dir().ok_or_else(|| CatalogError::Config("home directory not found".into()))?;
    Ok(home.join(ConfigDefaults::HOME_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CatalogConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CatalogConfig::default());
        assert!(config.support_tokens.iter().any(|t| t == "netstandard"));
        assert!(!config.strict_dependencies);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "runtime_dir = \"/opt/runtime\"\nstrict_dependencies = true\n",
        )
        .unwrap();
        let config = CatalogConfig::load(&path).unwrap();
        assert_eq!(config.runtime_dir, Some(PathBuf::from("/opt/runtime")));
        assert!(config.strict_dependencies);
        assert_eq!(config.module_extensions, default_module_extensions());
        assert!(config.loader_options().strict_dependencies);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "support_tokens = 3\n").unwrap();
        assert!(matches!(
            CatalogConfig::load(&path),
            Err(CatalogError::Config(_))
        ));
    }

    #[test]
    fn database_path_resolves_against_home() {
        let home = Path::new("/home/u/.typecat");
        let mut config = CatalogConfig::default();
        assert_eq!(config.database_path(home), home.join("catalog.db"));
        config.database = Some(PathBuf::from("other.db"));
        assert_eq!(config.database_path(home), home.join("other.db"));
        config.database = Some(PathBuf::from("/var/db/typecat.db"));
        assert_eq!(
            config.database_path(home),
            PathBuf::from("/var/db/typecat.db")
        );
    }

    #[test]
    fn module_extensions_match_case_insensitively() {
        let config = CatalogConfig::default();
        assert!(config.is_module_file(Path::new("lib/Foo.DLL")));
        assert!(config.is_module_file(Path::new("Windows.winmd")));
        assert!(!config.is_module_file(Path::new("Foo.pdb")));
        assert!(!config.is_module_file(Path::new("Makefile")));
    }

    #[test]
    #[serial]
    fn home_honours_env_override() {
        // SAFETY: serialised with the other env-mutating tests.
        unsafe { std::env::set_var("TYPECAT_HOME", "/tmp/typecat-test-home") };
        assert_eq!(
            typecat_home().unwrap(),
            PathBuf::from("/tmp/typecat-test-home")
        );
        unsafe { std::env::remove_var("TYPECAT_HOME") };
    }
}
