//! Integration tests for CLI behavior
//!
//! These run the actual `typecat` binary against fixture modules written into
//! a temporary directory. Each test gets its own TYPECAT_HOME and catalog, and
//! the config pins `runtime_dir` to a missing directory so no installed
//! runtime is scanned.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use typecat_core::test_support::{sample_module, shapes_module};

struct TestEnv {
    home: TempDir,
}

impl TestEnv {
    /// A home with config.toml and the Sample and Shapes modules under lib/.
    fn new() -> Self {
        let home = TempDir::new().expect("failed to create temp dir");
        let config = format!(
            "runtime_dir = {:?}\n",
            home.path().join("no-runtime").display().to_string()
        );
        fs::write(home.path().join("config.toml"), config).expect("failed to write config.toml");
        sample_module().save(&home.path().join("lib/Sample.dll"));
        shapes_module().save(&home.path().join("lib/Shapes.dll"));
        Self { home }
    }

    fn module(&self, name: &str) -> PathBuf {
        self.home.path().join("lib").join(name)
    }

    fn db(&self) -> PathBuf {
        self.home.path().join("catalog.db")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_typecat"))
            .args(args)
            .env("TYPECAT_HOME", self.home.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run typecat")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "typecat {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut with_json = args.to_vec();
        with_json.push("--json");
        serde_json::from_str(&self.run_ok(&with_json)).expect("invalid JSON output")
    }

    fn catalog_all(&self) {
        let sample = path_arg(&self.module("Sample.dll"));
        let shapes = path_arg(&self.module("Shapes.dll"));
        self.run_ok(&["catalog", &sample]);
        self.run_ok(&["catalog", &shapes, "--group", "geometry"]);
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn full_names(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .expect("expected a JSON array")
        .iter()
        .map(|row| row["full_name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn integration_help_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_typecat"))
        .arg("--help")
        .output()
        .expect("failed to run typecat");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("typecat"));
    assert!(stdout.contains("Usage"));
}

#[test]
fn integration_version_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_typecat"))
        .arg("--version")
        .output()
        .expect("failed to run typecat");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("typecat"));
}

#[test]
fn integration_catalog_creates_store_in_home() {
    let env = TestEnv::new();
    let stdout = env.run_ok(&["catalog", &path_arg(&env.module("Sample.dll"))]);
    assert!(stdout.contains("Sample 1.0.0.0: created (2 types"));
    assert!(env.db().exists());
}

#[test]
fn integration_recatalog_is_unchanged_until_forced() {
    let env = TestEnv::new();
    let sample = path_arg(&env.module("Sample.dll"));
    env.run_ok(&["catalog", &sample]);

    let again = env.json(&["catalog", &sample]);
    assert_eq!(again[0]["status"], "unchanged");

    let forced = env.json(&["catalog", &sample, "--force"]);
    assert_eq!(forced[0]["status"], "replaced");
    assert_eq!(forced[0]["type_count"], 2);
}

#[test]
fn integration_missing_module_fails() {
    let env = TestEnv::new();
    let missing = path_arg(&env.module("Missing.dll"));
    let output = env.run(&["catalog", &missing]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("module not found"));
}

#[test]
fn integration_one_bad_module_does_not_stop_the_rest() {
    let env = TestEnv::new();
    let broken = env.module("Broken.dll");
    fs::write(&broken, b"MZ garbage").unwrap();
    let output = env.run(&[
        "catalog",
        &path_arg(&broken),
        &path_arg(&env.module("Sample.dll")),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load"));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Sample 1.0.0.0: created"));
}

#[test]
fn integration_types_search() {
    let env = TestEnv::new();
    env.catalog_all();

    let shapes = env.json(&["types", "shape"]);
    assert_eq!(full_names(&shapes), vec!["Shapes.IShape", "Shapes.Shape"]);

    let interfaces = env.json(&["types", "--kind", "interface"]);
    assert_eq!(full_names(&interfaces), vec!["Shapes.IShape"]);

    let text = env.run_ok(&["types", "Wid*"]);
    assert_eq!(text.trim(), "class Sample.Widget : System.Object [Sample 1.0.0.0]");
}

#[test]
fn integration_members_and_show() {
    let env = TestEnv::new();
    env.catalog_all();

    let areas = env.json(&["members", "Area", "--type", "Circle"]);
    assert_eq!(areas.as_array().unwrap().len(), 1);
    assert_eq!(areas[0]["is_override"], true);

    let show = env.run_ok(&["show", "Sample.Color"]);
    assert!(show.contains("enum Sample.Color"));
    assert!(show.contains("Red = 0"));
    assert!(show.contains("Blue = 2"));

    let square = env.json(&["show", "Square"]);
    let members = square[0]["members"].as_array().unwrap();
    assert_eq!(members[0]["name"], "Resize");
    assert_eq!(members[0]["parameters"][1]["name"], "label");

    let missing = env.run(&["show", "No.Such.Type"]);
    assert!(!missing.status.success());
}

#[test]
fn integration_relationships() {
    let env = TestEnv::new();
    env.catalog_all();

    let chain = env.run_ok(&["inherits", "Shapes.Circle"]);
    let lines: Vec<&str> = chain.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Shapes.Circle [Shapes]",
            "Shapes.Shape [Shapes]",
            "System.Object (not cataloged)"
        ]
    );

    assert_eq!(
        full_names(&env.json(&["implementors", "Shapes.IShape"])),
        vec!["Shapes.Shape"]
    );
    assert_eq!(
        full_names(&env.json(&["derived", "Shapes.Shape"])),
        vec!["Shapes.Circle", "Shapes.Extra.Square"]
    );
}

#[test]
fn integration_namespaces_and_docs() {
    let env = TestEnv::new();
    env.catalog_all();

    let namespaces = env.run_ok(&["namespaces", "--module", "Shapes"]);
    assert!(namespaces.contains("Shapes [Shapes] (3 types)"));
    assert!(namespaces.contains("Shapes.Extra [Shapes] (1 types)"));

    assert_eq!(
        full_names(&env.json(&["namespace", "Sample"])),
        vec!["Sample.Color", "Sample.Widget"]
    );

    let docs = env.json(&["docs", "Resize"]);
    assert_eq!(docs[0]["type_full_name"], "Shapes.Extra.Square");
}

#[test]
fn integration_groups_modules_and_remove() {
    let env = TestEnv::new();
    env.catalog_all();

    let groups = env.json(&["groups"]);
    assert_eq!(groups[0]["name"], "geometry");
    assert_eq!(groups[0]["module_count"], 1);

    let grouped = env.json(&["modules", "--group", "geometry"]);
    assert_eq!(grouped.as_array().unwrap().len(), 1);
    assert_eq!(grouped[0]["name"], "Shapes");

    let removed = env.run_ok(&["remove", "Shapes"]);
    assert!(removed.contains("removed 1 module(s)"));
    assert!(!env.run(&["remove", "Shapes"]).status.success());

    let status = env.run_ok(&["status"]);
    assert!(status.contains("modules: 1, types: 2"));
}

#[test]
fn integration_explicit_db_and_config() {
    let env = TestEnv::new();
    let other = env.home.path().join("elsewhere/other.db");
    let config = path_arg(&env.home.path().join("config.toml"));
    let db = path_arg(&other);
    env.run_ok(&[
        "--db",
        &db,
        "--config",
        &config,
        "catalog",
        &path_arg(&env.module("Sample.dll")),
    ]);

    assert!(other.exists());
    assert!(!env.db().exists());
    let status = env.json(&["status", "--db", &db]);
    assert!(status["status"].as_str().unwrap().contains("modules: 1"));
}

#[test]
fn integration_group_tag_on_unchanged_module() {
    let env = TestEnv::new();
    let sample = path_arg(&env.module("Sample.dll"));
    env.run_ok(&["catalog", &sample]);

    let tagged = env.json(&["catalog", &sample, "--group", "toolkit"]);
    assert_eq!(tagged[0]["status"], "unchanged");

    let grouped = env.json(&["modules", "--group", "toolkit"]);
    assert_eq!(grouped.as_array().unwrap().len(), 1);
    assert_eq!(grouped[0]["name"], "Sample");
}
