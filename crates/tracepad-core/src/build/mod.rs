//! Toolchain and project gateway.
//!
//! Turns a script into a runnable program in two stages:
//!
//! 1. **Restore**: synthesize a dependency project and `cargo build` it,
//!    recording the produced libraries in the reference manifests.
//! 2. **Compile**: wrap the (instrumented) script in a `main` harness and
//!    invoke `rustc` directly against the restored [`ReferenceSet`].

mod dependencies;
mod diagnostics;
mod manifest;
mod project;
mod toolchain;

pub use dependencies::{ExternalDependency, parse_dependencies};
pub use diagnostics::{Diagnostic, DiagnosticMapper, Level, RustcDiagnostic, RustcSpan};
pub use manifest::{ArtifactCollector, ExternReference, ReferenceSet, read_manifest, write_manifest};
pub use project::{PROJECT_NAME, direct_crate_names, generate_cargo_toml, synthesize_project};
pub use toolchain::{
    ToolchainInfo, discover_toolchains, scan_toolchains_dir, select_toolchain, sort_toolchains,
};

use std::path::PathBuf;

use crate::config::HostConfig;
use crate::paths::BuildDirs;
use crate::process::ProcessSpec;

/// Lines emitted in front of the script.
const HARNESS_PREFIX: &[&str] = &[
    "#![allow(unused)]",
    "use ::tracepad::{eprint, eprintln, print, println};",
    "",
    "fn main() {",
    "    let __tracepad_runtime = ::tracepad::Runtime::init();",
    "    {",
];

const HARNESS_SUFFIX: &str = "    };\n}\n";

/// A script wrapped into a complete crate root.
#[derive(Debug, Clone)]
pub struct Harness {
    pub source: String,
    pub line_offset: usize,
    /// Bytes in front of the script.
    pub byte_offset: usize,
    pub script_lines: usize,
    script: String,
}

impl Harness {
    /// Wrap `script` in a `main` that starts the runtime before the script
    /// body and tears it down after.
    ///
    /// Byte offsets inside the script are unaffected by the transformation
    /// apart from the fixed prefix, and `//!` header lines are turned into
    /// plain comments of the same length.
    pub fn new(script: &str) -> Self {
        let mut source = String::with_capacity(script.len() + 256);
        for line in HARNESS_PREFIX {
            source.push_str(line);
            source.push('\n');
        }
        let byte_offset = source.len();
        for line in script.split_inclusive('\n') {
            match line.strip_prefix("//!") {
                Some(rest) => {
                    source.push_str("// ");
                    source.push_str(rest);
                }
                None => source.push_str(line),
            }
        }
        if !source.ends_with('\n') {
            source.push('\n');
        }
        source.push_str(HARNESS_SUFFIX);

        Self {
            source,
            line_offset: HARNESS_PREFIX.len(),
            byte_offset,
            script_lines: script.lines().count(),
            script: script.to_string(),
        }
    }

    /// Mapper turning diagnostics for this harness, written to `file`, into
    /// script locations.
    pub fn diagnostic_mapper(&self, file: impl Into<PathBuf>) -> DiagnosticMapper {
        DiagnosticMapper::new(&self.script, self.line_offset, self.byte_offset).for_file(file)
    }
}

/// `cargo build` of the dependency project.
pub fn restore_command(toolchain: &ToolchainInfo, dirs: &BuildDirs, config: &HostConfig) -> ProcessSpec {
    let mut spec = ProcessSpec::new(&toolchain.executable_path)
        .arg("build")
        .arg("--manifest-path")
        .arg(dirs.manifest_path())
        .arg("--message-format=json")
        .current_dir(&dirs.project_dir)
        .env("CARGO_TARGET_DIR", &dirs.target_dir);
    if config.profile_dir() == "release" {
        spec = spec.arg("--release");
    }
    spec
}

/// `rustc` invocation compiling the harness into the script binary.
pub fn compile_command(
    toolchain: &ToolchainInfo,
    dirs: &BuildDirs,
    config: &HostConfig,
    references: &ReferenceSet,
) -> ProcessSpec {
    let deps_dir = dirs.deps_dir(config.profile_dir());

    let mut spec = ProcessSpec::new(toolchain.rustc_path())
        .arg(dirs.harness_path())
        .arg(format!("--edition={}", config.edition))
        .arg("--crate-type=bin")
        .arg("--crate-name=tracepad_script")
        .arg("--error-format=json")
        .arg(format!("-Copt-level={}", config.opt_level))
        .arg("-L")
        .arg(format!("dependency={}", deps_dir.display()))
        .current_dir(&dirs.run_dir);
    if config.debug_info {
        spec = spec.arg("-g");
    }
    for reference in references.all() {
        spec = spec.arg("--extern").arg(reference.extern_arg());
    }
    spec.arg("-o")
        .arg(dirs.binary_path())
        .args(&config.extra_rustc_flags)
}

/// Launch of the compiled script, watched by `parent_pid`.
pub fn run_command(dirs: &BuildDirs, parent_pid: u32) -> ProcessSpec {
    ProcessSpec::new(dirs.binary_path())
        .arg("--pid")
        .arg(parent_pid.to_string())
        .current_dir(&dirs.run_dir)
}
