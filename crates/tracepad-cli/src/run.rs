//! Run command implementation.
//!
//! Restores the script's dependencies, compiles it and runs it, forwarding
//! its console output. With `--trace` every executed statement is reported
//! on stderr together with the variables in scope.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedReceiver;
use tracepad::{DebugEvent, StreamKind};
use tracepad_core::{
    Completion, ExecutionHost, HostConfig, HostEvent, discover_toolchains, parse_dependencies,
    select_toolchain,
};

use crate::colors;

/// Exit code reported when the run was interrupted with Ctrl+C.
const INTERRUPTED: i32 = 130;

/// Longest statement excerpt shown in a trace line.
const SNIPPET_WIDTH: usize = 48;

/// Execute a script. Returns the exit code to report.
pub async fn execute(
    script: &Path,
    toolchain: Option<&str>,
    trace: bool,
    release: bool,
) -> anyhow::Result<i32> {
    let start = Instant::now();
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;
    print_header(script);

    print_step("Selecting toolchain");
    let toolchains = discover_toolchains()?;
    let toolchain = select_toolchain(&toolchains, toolchain)?;
    print_success(Some(&format!(
        "{} {}",
        toolchain.moniker, toolchain.version_label
    )));

    let text = if trace {
        print_step("Instrumenting");
        let instrumented = tracepad_core::instrument(&source)?;
        print_success(Some(&format!("{} probes", instrumented.probes.len())));
        instrumented.text
    } else {
        source.clone()
    };

    let mut config = if release {
        HostConfig::release()
    } else {
        HostConfig::default()
    };
    config = config.with_dependencies(parse_dependencies(&source));
    config.script_dir = script
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    let build_dir = config.build_dir.clone();

    let (host, mut events) = ExecutionHost::new(toolchain, config)?;
    let mut printer = EventPrinter::new(source, trace);

    print_step("Restoring dependencies");
    let mut interrupted = drive(&host, host.restore(), &mut events, &mut printer).await;

    if !interrupted && host.references().is_some() {
        print_step("Compiling");
        interrupted = drive(&host, host.execute(text), &mut events, &mut printer).await;
    }
    host.shutdown().await;

    if let Err(e) = std::fs::remove_dir_all(&build_dir) {
        tracing::debug!("Failed to remove {}: {}", build_dir.display(), e);
    }

    let code = if interrupted {
        eprintln!("\n{}Interrupted{}", colors::YELLOW, colors::RESET);
        INTERRUPTED
    } else if let Some(code) = printer.exit {
        code.unwrap_or(1)
    } else {
        1
    };

    eprintln!("{}", "─".repeat(50));
    let status = if code == 0 { colors::GREEN } else { colors::RED };
    eprintln!(
        "{}Finished{} with exit code {} in {:.2}s",
        status,
        colors::RESET,
        code,
        start.elapsed().as_secs_f64()
    );
    Ok(code)
}

/// Print events until `operation` completes or the user presses Ctrl+C.
/// Returns true when interrupted.
async fn drive(
    host: &ExecutionHost,
    operation: Completion,
    events: &mut UnboundedReceiver<HostEvent>,
    printer: &mut EventPrinter,
) -> bool {
    tokio::pin!(operation);
    let interrupted = loop {
        tokio::select! {
            Some(event) = events.recv() => printer.handle(event),
            _ = &mut operation => break false,
            _ = tokio::signal::ctrl_c() => {
                host.terminate().await;
                break true;
            }
        }
    };

    // Everything sent before completion is already queued.
    while let Ok(event) = events.try_recv() {
        printer.handle(event);
    }
    interrupted
}

/// Renders host events to the terminal.
struct EventPrinter {
    source: String,
    trace: bool,
    failed: bool,
    exit: Option<Option<i32>>,
}

impl EventPrinter {
    fn new(source: String, trace: bool) -> Self {
        Self {
            source,
            trace,
            failed: false,
            exit: None,
        }
    }

    fn handle(&mut self, event: HostEvent) {
        match event {
            HostEvent::RestoreCompleted {
                references,
                analyzers,
            } => {
                let count = references.len() + analyzers.len();
                print_success(Some(&format!("{count} crates")));
            }
            HostEvent::RestoreMessage(line) => {
                self.fail();
                eprintln!("    {}{}{}", colors::RED, line, colors::RESET);
            }
            HostEvent::BuildMessage(diagnostic) if diagnostic.is_error() => {
                self.fail();
                // rustc's own rendering points into the generated harness.
                eprintln!("{}{}{}", colors::RED, diagnostic.summary(), colors::RESET);
                if let (Some(line), Some(column)) = (diagnostic.line, diagnostic.column) {
                    if let Some(excerpt) = excerpt(&self.source, line, column) {
                        eprintln!("{}{}{}", colors::DIM, excerpt, colors::RESET);
                    }
                }
            }
            HostEvent::BuildMessage(_) => {
                print_success(None);
                eprintln!("{}", "─".repeat(50));
            }
            HostEvent::Console { stream, text } => write_console(stream, &text),
            HostEvent::Debug(event) => {
                if self.trace {
                    self.print_trace(&event);
                }
            }
            HostEvent::Diagnostic(message) => {
                eprintln!("{}tracepad:{} {}", colors::YELLOW, colors::RESET, message);
            }
            HostEvent::ProcessExited { code } => self.exit = Some(code),
        }
    }

    fn fail(&mut self) {
        if !self.failed {
            self.failed = true;
            eprintln!("{}✗{}", colors::RED, colors::RESET);
        }
    }

    fn print_trace(&self, event: &DebugEvent) {
        let (line, column) = location(&self.source, event.span_start);
        let vars: Vec<String> = event
            .variables
            .iter()
            .map(|v| format!("{} = {}", v.name, v.value))
            .collect();
        eprintln!(
            "{}  ▸ {:>3}:{:<3} {:<width$}{} {}",
            colors::DIM,
            line,
            column,
            snippet(&self.source, event.span_start, event.span_length),
            colors::RESET,
            vars.join(", "),
            width = SNIPPET_WIDTH
        );
    }
}

fn write_console(stream: StreamKind, text: &str) {
    let result = match stream {
        StreamKind::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|()| out.flush())
        }
        StreamKind::Stderr => std::io::stderr().write_all(text.as_bytes()),
    };
    if let Err(e) = result {
        tracing::debug!("Failed to forward console output: {}", e);
    }
}

/// 1-based line and column of a byte offset.
fn location(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map_or(0, |l| l.chars().count())
        + 1;
    (line, column)
}

/// Script line `line` with a caret under `column`.
fn excerpt(source: &str, line: usize, column: usize) -> Option<String> {
    let text = source.lines().nth(line.checked_sub(1)?)?;
    let pad = " ".repeat(column.saturating_sub(1));
    Some(format!("{line:>4} | {text}\n     | {pad}^"))
}

/// First line of the spanned text, shortened to fit a trace line.
fn snippet(source: &str, start: usize, len: usize) -> String {
    let text = source
        .get(start..start + len)
        .and_then(|s| s.lines().next())
        .unwrap_or("")
        .trim();
    if text.chars().count() > SNIPPET_WIDTH {
        let cut: String = text.chars().take(SNIPPET_WIDTH - 1).collect();
        format!("{cut}…")
    } else {
        text.to_string()
    }
}

fn print_header(script: &Path) {
    let name = script
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    eprintln!(
        "\n{}tracepad{} - Running {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        name,
        colors::RESET
    );
    eprintln!("{}", "─".repeat(50));
}

fn print_step(name: &str) {
    eprint!("{}  ◆ {}{} ... ", colors::BLUE, name, colors::RESET);
    colors::flush_stderr();
}

fn print_success(extra: Option<&str>) {
    match extra {
        Some(s) => eprintln!("{}✓{} ({})", colors::GREEN, colors::RESET, s),
        None => eprintln!("{}✓{}", colors::GREEN, colors::RESET),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location() {
        let src = "let a = 1;\nlet bé = 2;\n";
        assert_eq!(location(src, 0), (1, 1));
        assert_eq!(location(src, 11), (2, 1));
        assert_eq!(location(src, src.find('=').unwrap()), (1, 7));
        assert_eq!(location(src, src.rfind('=').unwrap()), (2, 8));
    }

    #[test]
    fn test_snippet() {
        let src = "for i in 0..3 {\n    total += i;\n}\n";
        assert_eq!(snippet(src, 0, 13), "for i in 0..3");
        assert_eq!(snippet(src, 0, src.len()), "for i in 0..3 {");
        assert_eq!(snippet(src, src.len(), 0), "");

        let long = "x".repeat(100);
        assert_eq!(snippet(&long, 0, 100).chars().count(), SNIPPET_WIDTH);
    }

    #[test]
    fn test_excerpt_points_at_column() {
        let src = "let a = 1;\nlet b = c;\n";
        assert_eq!(
            excerpt(src, 2, 9).unwrap(),
            "   2 | let b = c;\n     |         ^"
        );
        assert_eq!(excerpt(src, 0, 1), None);
        assert_eq!(excerpt(src, 3, 1), None);
    }

    #[test]
    fn test_printer_records_exit_code() {
        let mut printer = EventPrinter::new(String::new(), false);
        printer.handle(HostEvent::ProcessExited { code: Some(4) });
        assert_eq!(printer.exit, Some(Some(4)));
        assert!(!printer.failed);

        printer.handle(HostEvent::RestoreMessage("error".into()));
        assert!(printer.failed);
    }
}
