//! Toolchain discovery.
//!
//! Scans the rustup toolchains directory and falls back to whatever `cargo`
//! is on `PATH`. Each toolchain is identified by its cargo executable; the
//! compiler is the `rustc` next to it.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::error::{Error, Result};

/// An installed Rust toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainInfo {
    /// Toolchain name as rustup knows it (e.g. `stable-x86_64-unknown-linux-gnu`).
    pub moniker: String,
    /// Version reported by its rustc (e.g. `1.85.0` or `1.87.0-nightly`).
    pub version_label: String,
    /// Path to the toolchain's cargo.
    pub executable_path: PathBuf,
}

impl ToolchainInfo {
    /// Describe the toolchain owning `cargo`, asking its rustc for the version.
    pub fn from_cargo(cargo: &Path, moniker: impl Into<String>) -> Result<Self> {
        let rustc = sibling(cargo, "rustc");
        let version_label = query_version(&rustc)?;
        Ok(Self {
            moniker: moniker.into(),
            version_label,
            executable_path: cargo.to_path_buf(),
        })
    }

    /// Path to the toolchain's rustc.
    pub fn rustc_path(&self) -> PathBuf {
        sibling(&self.executable_path, "rustc")
    }

    /// Nightly and beta toolchains.
    pub fn is_prerelease(&self) -> bool {
        self.version_label.contains('-')
    }

    /// Numeric `(major, minor, patch)`; missing or malformed parts are 0.
    pub fn version(&self) -> (u64, u64, u64) {
        let numeric = self.version_label.split('-').next().unwrap_or_default();
        let mut parts = numeric.split('.').map(|p| p.parse().unwrap_or(0));
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }
}

/// Find installed toolchains, newest stable first.
///
/// Looks in `$RUSTUP_HOME/toolchains` (default `~/.rustup/toolchains`). When
/// nothing is found there, the `cargo` on `PATH` is used.
pub fn discover_toolchains() -> Result<Vec<ToolchainInfo>> {
    let mut found = match rustup_toolchains_dir() {
        Some(dir) => scan_toolchains_dir(&dir),
        None => Vec::new(),
    };

    if found.is_empty() {
        let cargo = which::which("cargo")
            .map_err(|_| Error::Toolchain("no rustup toolchains and cargo not in PATH".into()))?;
        found.push(ToolchainInfo::from_cargo(&cargo, "default")?);
    }

    sort_toolchains(&mut found);
    Ok(found)
}

/// Pick a toolchain by moniker, or the preferred one when `moniker` is None.
///
/// A moniker matches exactly or as a prefix (`stable` matches
/// `stable-x86_64-unknown-linux-gnu`).
pub fn select_toolchain(
    toolchains: &[ToolchainInfo],
    moniker: Option<&str>,
) -> Result<ToolchainInfo> {
    let selected = match moniker {
        None => toolchains.first(),
        Some(wanted) => toolchains
            .iter()
            .find(|t| t.moniker == wanted)
            .or_else(|| toolchains.iter().find(|t| t.moniker.starts_with(wanted))),
    };
    selected.cloned().ok_or_else(|| match moniker {
        Some(wanted) => Error::Toolchain(format!("toolchain not found: {wanted}")),
        None => Error::Toolchain("no toolchain installed".into()),
    })
}

/// Every toolchain under `dir` that has a working cargo.
pub fn scan_toolchains_dir(dir: &Path) -> Vec<ToolchainInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let cargo = entry
            .path()
            .join("bin")
            .join(format!("cargo{}", std::env::consts::EXE_SUFFIX));
        if !cargo.is_file() {
            continue;
        }
        let moniker = entry.file_name().to_string_lossy().into_owned();
        match ToolchainInfo::from_cargo(&cargo, moniker) {
            Ok(info) => found.push(info),
            Err(e) => tracing::debug!("Skipping toolchain {}: {}", entry.path().display(), e),
        }
    }
    found
}

/// Stable before prerelease, then newest version first.
pub fn sort_toolchains(toolchains: &mut [ToolchainInfo]) {
    toolchains.sort_by(|a, b| {
        a.is_prerelease()
            .cmp(&b.is_prerelease())
            .then_with(|| b.version().cmp(&a.version()))
            .then_with(|| a.moniker.cmp(&b.moniker))
    });
}

fn rustup_toolchains_dir() -> Option<PathBuf> {
    let home = std::env::var_os("RUSTUP_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".rustup")))?;
    Some(home.join("toolchains"))
}

fn sibling(executable: &Path, name: &str) -> PathBuf {
    executable.with_file_name(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}

/// Version label from `rustc --version` (`rustc 1.85.0 (4d91de4e4 2025-02-17)`).
fn query_version(rustc: &Path) -> Result<String> {
    let output = Command::new(rustc)
        .arg("--version")
        .output()
        .map_err(|e| Error::Toolchain(format!("Failed to run {}: {}", rustc.display(), e)))?;

    if !output.status.success() {
        return Err(Error::Toolchain(format!(
            "{} --version failed",
            rustc.display()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| Error::Toolchain(format!("unexpected rustc version output: {}", stdout.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(moniker: &str, version: &str) -> ToolchainInfo {
        ToolchainInfo {
            moniker: moniker.to_string(),
            version_label: version.to_string(),
            executable_path: PathBuf::from("/opt").join(moniker).join("bin/cargo"),
        }
    }

    #[test]
    fn test_sort_prefers_newest_stable() {
        let mut toolchains = vec![
            info("nightly", "1.90.0-nightly"),
            info("1.80.0", "1.80.0"),
            info("stable", "1.85.1"),
            info("beta", "1.86.0-beta.3"),
            info("1.9.0", "1.9.0"),
        ];
        sort_toolchains(&mut toolchains);
        let order: Vec<&str> = toolchains.iter().map(|t| t.moniker.as_str()).collect();
        assert_eq!(order, ["stable", "1.80.0", "1.9.0", "nightly", "beta"]);
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(info("x", "1.85.1").version(), (1, 85, 1));
        assert_eq!(info("x", "1.87.0-nightly").version(), (1, 87, 0));
        assert_eq!(info("x", "garbage").version(), (0, 0, 0));
        assert!(info("x", "1.87.0-nightly").is_prerelease());
        assert!(!info("x", "1.85.1").is_prerelease());
    }

    #[test]
    fn test_select_by_prefix() {
        let toolchains = vec![
            info("stable-x86_64-unknown-linux-gnu", "1.85.0"),
            info("nightly-x86_64-unknown-linux-gnu", "1.87.0-nightly"),
        ];
        assert_eq!(
            select_toolchain(&toolchains, Some("nightly")).unwrap().version_label,
            "1.87.0-nightly"
        );
        assert_eq!(
            select_toolchain(&toolchains, None).unwrap().moniker,
            "stable-x86_64-unknown-linux-gnu"
        );
        assert!(matches!(
            select_toolchain(&toolchains, Some("beta")),
            Err(Error::Toolchain(_))
        ));
    }

    #[test]
    fn test_rustc_is_sibling_of_cargo() {
        let toolchain = info("stable", "1.85.0");
        assert_eq!(
            toolchain.rustc_path(),
            PathBuf::from(format!("/opt/stable/bin/rustc{}", std::env::consts::EXE_SUFFIX))
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(info("stable", "1.85.0")).unwrap();
        assert_eq!(json["versionLabel"], "1.85.0");
        assert!(json["executablePath"].is_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_toolchains_dir() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let bin = temp.path().join("stable-test").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        for (name, body) in [
            ("cargo", "#!/bin/sh\nexit 0\n"),
            ("rustc", "#!/bin/sh\necho 'rustc 1.85.0 (4d91de4e4 2025-02-17)'\n"),
        ] {
            let path = bin.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        // A directory without cargo is ignored.
        std::fs::create_dir_all(temp.path().join("broken")).unwrap();

        let found = scan_toolchains_dir(temp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].moniker, "stable-test");
        assert_eq!(found[0].version_label, "1.85.0");
    }
}
