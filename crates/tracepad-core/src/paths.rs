//! Build directory management.
//!
//! Every execution host owns one build directory:
//!
//! ```text
//! <build_dir>/
//! ├── project/           # Synthesized dependency project
//! │   ├── Cargo.toml
//! │   ├── src/main.rs    # Stub so cargo has something to build
//! │   ├── target/        # Cargo output (restored rlibs and proc-macros)
//! │   ├── references.txt # name=path per restored library
//! │   ├── analyzers.txt  # name=path per restored proc-macro
//! │   └── errors.log     # Errors from the last failed restore
//! └── run/               # Harness source and compiled script binary
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure for one execution host.
#[derive(Debug, Clone)]
pub struct BuildDirs {
    /// Root of the structure.
    pub root: PathBuf,

    /// Synthesized dependency project.
    pub project_dir: PathBuf,

    /// Cargo target directory of the dependency project.
    pub target_dir: PathBuf,

    /// Harness source and compiled binary.
    pub run_dir: PathBuf,
}

impl BuildDirs {
    /// Lay out the structure under `root`, creating missing directories.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn new(root: &Path) -> Result<Self> {
        let project_dir = root.join("project");
        let target_dir = project_dir.join("target");
        let run_dir = root.join("run");

        fs::create_dir_all(project_dir.join("src"))?;
        fs::create_dir_all(&target_dir)?;
        fs::create_dir_all(&run_dir)?;

        Ok(Self {
            root: root.to_path_buf(),
            project_dir,
            target_dir,
            run_dir,
        })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir.join("Cargo.toml")
    }

    pub fn references_path(&self) -> PathBuf {
        self.project_dir.join("references.txt")
    }

    pub fn analyzers_path(&self) -> PathBuf {
        self.project_dir.join("analyzers.txt")
    }

    pub fn errors_log_path(&self) -> PathBuf {
        self.project_dir.join("errors.log")
    }

    /// Directory holding every restored dependency artifact.
    pub fn deps_dir(&self, profile: &str) -> PathBuf {
        self.target_dir.join(profile).join("deps")
    }

    pub fn harness_path(&self) -> PathBuf {
        self.run_dir.join("main.rs")
    }

    pub fn binary_path(&self) -> PathBuf {
        self.run_dir
            .join(format!("tracepad_script{}", std::env::consts::EXE_SUFFIX))
    }

    /// Remove the whole structure and recreate it empty.
    pub fn clean(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(self.project_dir.join("src"))?;
        fs::create_dir_all(&self.target_dir)?;
        fs::create_dir_all(&self.run_dir)?;
        Ok(())
    }
}
