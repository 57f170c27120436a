//! Execution host configuration.

use std::path::PathBuf;

use crate::build::ExternalDependency;

/// Configuration for an [`ExecutionHost`](crate::host::ExecutionHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root of the host's build directory (see [`BuildDirs`](crate::paths::BuildDirs)).
    pub build_dir: PathBuf,

    /// Rust edition scripts are compiled with.
    pub edition: String,

    /// Optimization level (0-3) for both restore and compile.
    pub opt_level: u8,

    /// Emit debug info.
    pub debug_info: bool,

    /// Additional rustc flags for the script compile.
    pub extra_rustc_flags: Vec<String>,

    /// Path to the tracepad runtime crate.
    /// If None, uses the crates.io published version.
    pub runtime_crate_path: Option<PathBuf>,

    /// Dependencies declared by the script header.
    pub dependencies: Vec<ExternalDependency>,

    /// Directory relative path dependencies are resolved against.
    pub script_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            build_dir: std::env::temp_dir()
                .join("tracepad")
                .join("build")
                .join(uuid::Uuid::new_v4().to_string()),
            edition: "2021".to_string(),
            opt_level: 0,
            debug_info: true,
            extra_rustc_flags: Vec::new(),
            runtime_crate_path: Self::detect_runtime_crate_path(),
            dependencies: Vec::new(),
            script_dir: None,
        }
    }
}

impl HostConfig {
    /// Detect the path to the tracepad runtime crate.
    ///
    /// During development (running from the workspace), returns the path to
    /// `crates/tracepad`. An installed binary gets None and uses crates.io.
    fn detect_runtime_crate_path() -> Option<PathBuf> {
        // e.g. /path/to/tracepad/target/debug/tracepad
        if let Ok(exe_path) = std::env::current_exe() {
            let workspace_root = exe_path
                .parent()
                .and_then(|target_dir| target_dir.parent())
                .and_then(|p| p.parent());
            if let Some(root) = workspace_root {
                let runtime_crate = root.join("crates").join("tracepad");
                if runtime_crate.join("Cargo.toml").exists() {
                    return Some(runtime_crate);
                }
            }
        }

        // Available during cargo test
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            if let Some(workspace_root) = PathBuf::from(&manifest_dir)
                .ancestors()
                .find(|p| p.join("crates").join("tracepad").join("Cargo.toml").exists())
            {
                return Some(workspace_root.join("crates").join("tracepad"));
            }
        }

        None
    }

    /// Config for optimized runs.
    pub fn release() -> Self {
        Self {
            opt_level: 3,
            debug_info: false,
            ..Default::default()
        }
    }

    /// Cargo profile directory name matching the optimization settings.
    pub fn profile_dir(&self) -> &'static str {
        if self.opt_level > 0 { "release" } else { "debug" }
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        self.build_dir = build_dir.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ExternalDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build_dirs_are_unique() {
        let a = HostConfig::default();
        let b = HostConfig::default();
        assert_ne!(a.build_dir, b.build_dir);
        assert!(a.build_dir.starts_with(std::env::temp_dir().join("tracepad")));
    }

    #[test]
    fn test_profile_dir() {
        assert_eq!(HostConfig::default().profile_dir(), "debug");
        assert_eq!(HostConfig::release().profile_dir(), "release");
    }

    #[test]
    fn test_runtime_crate_detected_in_workspace() {
        // Tests run with CARGO_MANIFEST_DIR inside this workspace.
        let path = HostConfig::default().runtime_crate_path.expect("runtime crate");
        assert!(path.join("Cargo.toml").exists());
    }
}
