//! Instrument command: show what a script looks like once probed.

use std::path::Path;

use anyhow::Context;
use tracepad_core::build::Harness;

pub fn execute(script: &Path, harness: bool) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;
    let instrumented = tracepad_core::instrument(&source)?;

    tracing::debug!("Inserted {} probes", instrumented.probes.len());
    if harness {
        print!("{}", Harness::new(&instrumented.text).source);
    } else {
        print!("{}", instrumented.text);
    }
    Ok(())
}
