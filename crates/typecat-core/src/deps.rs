//! Candidate dependency files for resolving a module's type references.
//!
//! The set is a best-effort guess, never a transitive closure: siblings of
//! the target, support libraries one directory up, and the host runtime's
//! library directory. Directories that are missing or unreadable contribute
//! nothing.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use crate::config::CatalogConfig;

const NETCORE_APP_DIR: &str = "shared/Microsoft.NETCore.App";

const WELL_KNOWN_DOTNET_ROOTS: &[&str] = &[
    "/usr/share/dotnet",
    "/usr/lib/dotnet",
    "/usr/local/share/dotnet",
    "C:\\Program Files\\dotnet",
];

/// Ordered, de-duplicated candidate files.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    candidates: IndexSet<PathBuf>,
}

impl DependencySet {
    pub fn for_module(target: &Path, config: &CatalogConfig) -> Self {
        let mut set = Self::default();
        let target_key = normalize(target);

        if let Some(dir) = target.parent() {
            for path in module_files(dir, config) {
                if normalize(&path) != target_key {
                    set.candidates.insert(path);
                }
            }

            if let Some(parent) = dir.parent() {
                for path in module_files(parent, config) {
                    if is_support_library(&path, &config.support_tokens) {
                        set.candidates.insert(path);
                    }
                }
            }
        }

        if let Some(runtime) = runtime_dir(config) {
            for path in module_files(&runtime, config) {
                set.candidates.insert(path);
            }
        }

        log::debug!(
            "dependency set for {}: {} candidates",
            target.display(),
            set.candidates.len()
        );
        set
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// First candidate whose file stem equals `assembly_name`, ignoring case.
    pub fn find(&self, assembly_name: &str) -> Option<&Path> {
        self.paths().find(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.eq_ignore_ascii_case(assembly_name))
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_support_library(path: &Path, tokens: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    tokens
        .iter()
        .any(|token| name.contains(&token.to_ascii_lowercase()))
}

/// Module files directly inside `dir`, sorted by path.
fn module_files(dir: &Path, config: &CatalogConfig) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("skipping {}: {err}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && config.is_module_file(path))
        .collect();
    files.sort();
    files
}

/// Host runtime library directory. An explicit `runtime_dir` wins outright,
/// even when it does not exist, so a configured catalog never picks up
/// whatever runtime happens to be installed.
fn runtime_dir(config: &CatalogConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.runtime_dir {
        return Some(dir.clone());
    }
    if let Ok(root) = env::var("DOTNET_ROOT") {
        if let Some(dir) = newest_runtime(&PathBuf::from(root)) {
            return Some(dir);
        }
    }
    for root in WELL_KNOWN_DOTNET_ROOTS {
        if let Some(dir) = newest_runtime(Path::new(root)) {
            return Some(dir);
        }
    }
    framework_dir()
}

/// Highest versioned directory under `<root>/shared/Microsoft.NETCore.App`.
fn newest_runtime(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root.join(NETCORE_APP_DIR)).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .max_by_key(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(version_key)
                .unwrap_or_default()
        })
}

/// Numeric ordering key for `8.0.11`-style names; prerelease suffixes sort
/// by their leading number.
fn version_key(name: &str) -> Vec<u64> {
    name.split(['.', '-'])
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

#[cfg(windows)]
fn framework_dir() -> Option<PathBuf> {
    let windir = env::var("WINDIR").ok()?;
    let dir = PathBuf::from(windir).join("Microsoft.NET\\Framework64\\v4.0.30319");
    dir.is_dir().then_some(dir)
}

#[cfg(not(windows))]
fn framework_dir() -> Option<PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn config_without_runtime(root: &Path) -> CatalogConfig {
        CatalogConfig {
            runtime_dir: Some(root.join("no-runtime")),
            ..CatalogConfig::default()
        }
    }

    #[test]
    fn siblings_and_support_libraries_are_candidates() {
        let root = TempDir::new().unwrap();
        let app = root.path().join("app");
        let target = app.join("App.dll");
        touch(&target);
        touch(&app.join("Helper.dll"));
        touch(&app.join("Tool.EXE"));
        touch(&app.join("notes.txt"));
        touch(&root.path().join("Shared.Core.dll"));
        touch(&root.path().join("Unrelated.dll"));

        let set = DependencySet::for_module(&target, &config_without_runtime(root.path()));
        let names: Vec<_> = set
            .paths()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Helper.dll", "Tool.EXE", "Shared.Core.dll"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn find_matches_stem_ignoring_case() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("lib/App.dll");
        touch(&target);
        touch(&root.path().join("lib/Newtonsoft.Json.dll"));

        let set = DependencySet::for_module(&target, &config_without_runtime(root.path()));
        assert!(set.find("newtonsoft.json").is_some());
        assert!(set.find("App").is_none());
        assert!(set.find("Missing").is_none());
    }

    #[test]
    fn configured_runtime_dir_is_scanned() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("lib/App.dll");
        touch(&target);
        let runtime = root.path().join("rt");
        touch(&runtime.join("System.Runtime.dll"));
        // a sibling with the same stem is found first
        touch(&root.path().join("lib/System.Runtime.dll"));

        let config = CatalogConfig {
            runtime_dir: Some(runtime),
            ..CatalogConfig::default()
        };
        let set = DependencySet::for_module(&target, &config);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.find("System.Runtime").unwrap(),
            root.path().join("lib/System.Runtime.dll")
        );
    }

    #[test]
    fn missing_directories_contribute_nothing() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("nowhere/App.dll");
        let set = DependencySet::for_module(&target, &config_without_runtime(root.path()));
        assert!(set.is_empty());
    }

    #[test]
    #[serial]
    fn dotnet_root_picks_highest_version() {
        let root = TempDir::new().unwrap();
        for version in ["6.0.2", "8.0.11", "8.0.2", "9.0.0-preview.1"] {
            fs::create_dir_all(root.path().join(NETCORE_APP_DIR).join(version)).unwrap();
        }
        // SAFETY: serialised with the other env-mutating tests.
        unsafe { env::set_var("DOTNET_ROOT", root.path()) };
        let dir = runtime_dir(&CatalogConfig::default());
        unsafe { env::remove_var("DOTNET_ROOT") };
        assert_eq!(
            dir.unwrap().file_name().unwrap().to_str().unwrap(),
            "9.0.0-preview.1"
        );
    }

    #[test]
    fn version_keys_order_numerically() {
        assert!(version_key("8.0.11") > version_key("8.0.2"));
        assert!(version_key("10.0.0") > version_key("9.0.9"));
    }
}
