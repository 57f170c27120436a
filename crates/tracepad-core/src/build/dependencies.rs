//! Script dependency header.
//!
//! Scripts declare crates.io (or local) dependencies in a `cargo` fenced
//! block of inner doc comments at the top of the script:
//!
//! ```text
//! //! ```cargo
//! //! [dependencies]
//! //! itertools = "0.13"
//! //! regex = { version = "1", features = ["unicode"] }
//! //! ```
//! ```

use std::path::{Path, PathBuf};

/// External crate dependency declared by a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalDependency {
    /// Crate name
    pub name: String,

    /// Version requirement (e.g., "1.0", "^2.0")
    pub version: Option<String>,

    /// Features to enable
    pub features: Vec<String>,

    /// Path dependency (for local crates)
    pub path: Option<PathBuf>,
}

impl ExternalDependency {
    pub fn simple(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            features: Vec::new(),
            path: None,
        }
    }

    pub fn path_dep(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: None,
            features: Vec::new(),
            path: Some(path.into()),
        }
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    /// Name the crate is referred to by in Rust code.
    pub fn crate_name(&self) -> String {
        self.name.replace('-', "_")
    }

    /// `[dependencies]` line for a Cargo manifest.
    ///
    /// Relative paths are resolved against `base_dir` when given.
    pub fn toml_entry(&self, base_dir: Option<&Path>) -> Option<String> {
        let mut fields = Vec::new();
        if let Some(path) = &self.path {
            let path = match base_dir {
                Some(dir) if path.is_relative() => dir
                    .join(path)
                    .canonicalize()
                    .unwrap_or_else(|_| dir.join(path)),
                _ => path.clone(),
            };
            fields.push(format!("path = {}", toml_string(&path.display().to_string())));
        }
        if let Some(version) = &self.version {
            if self.path.is_none() && self.features.is_empty() {
                return Some(format!("{} = {}", self.name, toml_string(version)));
            }
            fields.push(format!("version = {}", toml_string(version)));
        }
        if fields.is_empty() {
            return None;
        }
        if !self.features.is_empty() {
            let features: Vec<String> = self.features.iter().map(|f| toml_string(f)).collect();
            fields.push(format!("features = [{}]", features.join(", ")));
        }
        Some(format!("{} = {{ {} }}", self.name, fields.join(", ")))
    }
}

/// Quote a TOML basic string.
fn toml_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse the `cargo` header block of a script.
pub fn parse_dependencies(source: &str) -> Vec<ExternalDependency> {
    let mut in_cargo_block = false;
    let mut in_dependencies = false;
    let mut dependencies = Vec::new();

    for line in source.lines() {
        let Some(content) = line.trim().strip_prefix("//!") else {
            continue;
        };
        let content = content.trim();

        if content == "```cargo" {
            in_cargo_block = true;
            continue;
        }
        if !in_cargo_block {
            continue;
        }
        if content == "```" {
            in_cargo_block = false;
            in_dependencies = false;
            continue;
        }
        if content.starts_with('[') {
            in_dependencies = content == "[dependencies]";
            continue;
        }
        if in_dependencies && !content.is_empty() && !content.starts_with('#') {
            dependencies.extend(parse_dependency_line(content));
        }
    }

    dependencies
}

/// Parse `name = "version"` or `name = { version = "...", ... }`.
fn parse_dependency_line(line: &str) -> Option<ExternalDependency> {
    let (name, value) = line.split_once('=')?;
    let name = name.trim().to_string();
    let value = value.trim();

    if value.starts_with('"') {
        Some(ExternalDependency::simple(name, value.trim_matches('"')))
    } else if value.starts_with('{') {
        Some(parse_table_dependency(name, value))
    } else {
        None
    }
}

fn parse_table_dependency(name: String, value: &str) -> ExternalDependency {
    let mut dep = ExternalDependency {
        name,
        version: None,
        features: Vec::new(),
        path: None,
    };

    let content = value.trim_start_matches('{').trim_end_matches('}');

    // Split on commas outside of `[...]` so feature lists stay whole.
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in content.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&content[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&content[start..]);

    for part in parts {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = val.trim();
        match key.trim() {
            "version" => dep.version = Some(val.trim_matches('"').to_string()),
            "path" => dep.path = Some(PathBuf::from(val.trim_matches('"'))),
            "features" => {
                dep.features = val
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(|f| f.trim().trim_matches('"'))
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    dep
}
