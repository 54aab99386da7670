//! Ensures all workspace crates use `version.workspace = true` and that
//! the workspace member list matches the crates on disk.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn read_toml(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    toml::from_str(&raw).unwrap_or_else(|e| panic!("parse {}: {e}", path.display()))
}

fn members() -> Vec<String> {
    let doc = read_toml(&workspace_root().join("Cargo.toml"));
    doc["workspace"]["members"]
        .as_array()
        .expect("workspace.members array")
        .iter()
        .map(|m| m.as_str().expect("member path").to_string())
        .collect()
}

#[test]
fn all_members_use_workspace_version() {
    let root = workspace_root();
    for member in members() {
        let doc = read_toml(&root.join(&member).join("Cargo.toml"));
        let inherits = doc["package"]["version"]
            .as_table()
            .and_then(|t| t.get("workspace"))
            .and_then(|v| v.as_bool())
            == Some(true);
        assert!(inherits, "{member} should use version.workspace = true");
    }
}

#[test]
fn every_crate_directory_is_a_member() {
    let root = workspace_root();
    let members = members();
    for entry in std::fs::read_dir(root.join("crates")).unwrap() {
        let entry = entry.unwrap();
        if !entry.path().join("Cargo.toml").exists() {
            continue;
        }
        let rel = format!("crates/{}", entry.file_name().to_string_lossy());
        assert!(members.contains(&rel), "{rel} is not a workspace member");
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let doc = read_toml(&workspace_root().join("Cargo.toml"));
    let ws_version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(dagci_core::VERSION, ws_version);
}
