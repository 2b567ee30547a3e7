//! Vector auto-mount: decorates a launch spec with the standard files found
//! in the vectors directory. User-supplied file keys and environment values
//! always take precedence.

use std::path::Path;

use crate::types::ClientSpec;

/// Mount point of staged files inside a client container.
pub const FILES_MOUNT: &str = "/labu-files";

pub fn apply_vector_defaults(spec: &mut ClientSpec, dir: &Path) {
    stage_named(spec, dir, "accounts.json", "LABU_ACCOUNTS_PATH");
    stage_named(spec, dir, "genesis_state.json", "LABU_GENESIS_STATE_PATH");

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };
        if name == "accounts.json" || name == "genesis_state.json" {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        spec.files.entry(name.clone()).or_insert_with(|| path.clone());
        if name == "config.json" {
            spec.environment
                .entry("LABU_CONFIG_PATH".to_string())
                .or_insert_with(|| format!("{FILES_MOUNT}/config.json"));
        }
    }
}

fn stage_named(spec: &mut ClientSpec, dir: &Path, file: &str, env_key: &str) {
    let path = dir.join(file);
    if !path.exists() {
        return;
    }
    spec.files
        .entry(file.to_string())
        .or_insert_with(|| path.clone());
    spec.environment
        .entry(env_key.to_string())
        .or_insert_with(|| format!("{FILES_MOUNT}/{file}"));
}
