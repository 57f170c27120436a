//! Toolchains command.

use crate::colors;

pub fn execute(json: bool) -> anyhow::Result<()> {
    let toolchains = tracepad_core::discover_toolchains()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&toolchains)?);
        return Ok(());
    }

    for (i, toolchain) in toolchains.iter().enumerate() {
        let marker = if i == 0 { "*" } else { " " };
        println!(
            "{}{} {}{}{} {}{}{}",
            colors::GREEN,
            marker,
            colors::BOLD,
            toolchain.moniker,
            colors::RESET,
            colors::DIM,
            toolchain.version_label,
            colors::RESET,
        );
        println!("    {}", toolchain.executable_path.display());
    }
    Ok(())
}
