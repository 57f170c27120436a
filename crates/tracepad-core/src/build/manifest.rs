//! Restored reference manifests.
//!
//! A successful restore leaves two manifests next to the dependency project,
//! one `name=path` entry per line:
//!
//! - `references.txt`: rlibs the script links against;
//! - `analyzers.txt`: proc-macro libraries the compiler loads.
//!
//! They are produced from cargo's `compiler-artifact` messages, while error
//! diagnostics from the same stream go to `errors.log`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::diagnostics::{DiagnosticMapper, RustcDiagnostic};
use crate::error::{Error, Result};

/// A crate name and the artifact passed to rustc as `--extern name=path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternReference {
    pub name: String,
    pub path: PathBuf,
}

impl ExternReference {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The `--extern` argument value.
    pub fn extern_arg(&self) -> String {
        format!("{}={}", self.name, self.path.display())
    }
}

/// Everything a restore produced for the script compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    pub references: Vec<ExternReference>,
    pub analyzers: Vec<ExternReference>,
}

impl ReferenceSet {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.analyzers.is_empty()
    }

    /// All entries, libraries first.
    pub fn all(&self) -> impl Iterator<Item = &ExternReference> {
        self.references.iter().chain(self.analyzers.iter())
    }

    /// Read both manifests. A missing manifest counts as empty.
    pub fn load(references: &Path, analyzers: &Path) -> Result<Self> {
        Ok(Self {
            references: read_manifest(references)?,
            analyzers: read_manifest(analyzers)?,
        })
    }
}

/// Write a manifest.
pub fn write_manifest(path: &Path, entries: &[ExternReference]) -> Result<()> {
    let mut content = String::new();
    for entry in entries {
        content.push_str(&entry.extern_arg());
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

/// Read a manifest written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<Vec<ExternReference>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_once('=')
                .map(|(name, path)| ExternReference::new(name.trim(), path.trim()))
                .ok_or_else(|| {
                    Error::Build(format!("malformed entry in {}: {}", path.display(), line))
                })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum CargoMessage {
    CompilerArtifact(Artifact),
    CompilerMessage { message: RustcDiagnostic },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    target: ArtifactTarget,
    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

/// Consumes cargo's JSON message stream during a restore.
#[derive(Debug, Default)]
pub struct ArtifactCollector {
    direct: Vec<String>,
    references: Vec<ExternReference>,
    analyzers: Vec<ExternReference>,
    errors: Vec<String>,
}

impl ArtifactCollector {
    /// Only artifacts of the crates in `direct` are collected; transitive
    /// dependencies are found by rustc through `-L dependency=`.
    pub fn new(direct: Vec<String>) -> Self {
        Self {
            direct,
            ..Self::default()
        }
    }

    /// Feed one line of cargo stdout.
    pub fn observe(&mut self, line: &str) {
        let line = line.trim();
        if !line.starts_with('{') {
            return;
        }
        match serde_json::from_str::<CargoMessage>(line) {
            Ok(CargoMessage::CompilerArtifact(artifact)) => self.add_artifact(artifact),
            Ok(CargoMessage::CompilerMessage { message }) => {
                if let Some(diagnostic) = DiagnosticMapper::default().map(&message)
                    && diagnostic.is_error()
                {
                    let text = diagnostic.rendered.unwrap_or(diagnostic.message);
                    self.errors.extend(text.lines().map(str::to_string));
                }
            }
            Ok(CargoMessage::Other) => {}
            Err(e) => tracing::debug!("Ignoring cargo message: {}", e),
        }
    }

    fn add_artifact(&mut self, artifact: Artifact) {
        let name = artifact.target.name.replace('-', "_");
        if !self.direct.contains(&name) {
            return;
        }

        let is_proc_macro = artifact.target.kind.iter().any(|k| k == "proc-macro");
        let wanted = |path: &&PathBuf| {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if is_proc_macro {
                matches!(ext, "so" | "dylib" | "dll")
            } else {
                ext == "rlib"
            }
        };
        let Some(path) = artifact.filenames.iter().find(wanted) else {
            return;
        };

        let entry = ExternReference::new(name, path.clone());
        let list = if is_proc_macro {
            &mut self.analyzers
        } else {
            &mut self.references
        };
        if !list.contains(&entry) {
            list.push(entry);
        }
    }

    /// Error lines seen so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_parts(self) -> (ReferenceSet, Vec<String>) {
        (
            ReferenceSet {
                references: self.references,
                analyzers: self.analyzers,
            },
            self.errors,
        )
    }
}
