//! Dependency project synthesis.
//!
//! Restoring dependencies means building a throwaway Cargo project that
//! depends on the tracepad runtime and on every crate the script declares.
//! The resulting rlibs and proc-macros are what the script is compiled
//! against.

use std::fs;
use std::path::Path;

use super::ExternalDependency;
use crate::config::HostConfig;
use crate::error::Result;
use crate::paths::BuildDirs;

/// Package name of the synthesized project.
pub const PROJECT_NAME: &str = "tracepad-restore";

const STUB_MAIN: &str = "fn main() {}\n";

/// Generate the project's Cargo.toml.
pub fn generate_cargo_toml(config: &HostConfig) -> String {
    let mut toml = String::new();

    toml.push_str("[package]\n");
    toml.push_str(&format!("name = \"{PROJECT_NAME}\"\n"));
    toml.push_str("version = \"0.1.0\"\n");
    toml.push_str(&format!("edition = \"{}\"\n", config.edition));
    toml.push_str("publish = false\n\n");

    toml.push_str("[dependencies]\n");
    toml.push_str(&runtime_dependency(config));
    toml.push('\n');
    for dep in &config.dependencies {
        if dep.crate_name() == "tracepad" {
            continue;
        }
        if let Some(entry) = dep.toml_entry(config.script_dir.as_deref()) {
            toml.push_str(&entry);
            toml.push('\n');
        }
    }

    // Keep both profiles in sync with how the script itself is compiled.
    for profile in ["dev", "release"] {
        toml.push_str(&format!("\n[profile.{profile}]\n"));
        toml.push_str(&format!("opt-level = {}\n", config.opt_level));
        toml.push_str(&format!("debug = {}\n", config.debug_info));
    }

    // Standalone workspace table (prevents being part of a parent workspace)
    toml.push_str("\n[workspace]\n");
    toml
}

fn runtime_dependency(config: &HostConfig) -> String {
    let dep = match &config.runtime_crate_path {
        Some(path) => ExternalDependency::path_dep("tracepad", path),
        None => ExternalDependency::simple("tracepad", env!("CARGO_PKG_VERSION")),
    };
    dep.toml_entry(None).unwrap_or_default()
}

/// Crate names the script can refer to: the runtime plus its declared
/// dependencies.
pub fn direct_crate_names(dependencies: &[ExternalDependency]) -> Vec<String> {
    let mut names = vec!["tracepad".to_string()];
    for dep in dependencies {
        let name = dep.crate_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Write the project, removing outputs of any previous restore.
pub fn synthesize_project(dirs: &BuildDirs, config: &HostConfig) -> Result<()> {
    fs::create_dir_all(dirs.project_dir.join("src"))?;
    write_if_changed(&dirs.manifest_path(), &generate_cargo_toml(config))?;
    write_if_changed(&dirs.project_dir.join("src").join("main.rs"), STUB_MAIN)?;

    for stale in [
        dirs.references_path(),
        dirs.analyzers_path(),
        dirs.errors_log_path(),
    ] {
        remove_if_exists(&stale)?;
    }
    Ok(())
}

/// Skip rewriting identical files so cargo's fingerprints stay fresh.
fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        return Ok(());
    }
    fs::write(path, content)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
