//! Execution host tests against fake toolchains.
//!
//! Each fake toolchain is a directory holding `cargo` and `rustc` shell
//! scripts. All of them are written once, before any test spawns a process.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracepad::{DebugEvent, StreamKind};
use tracepad_core::{
    ExecutionHost, ExternalDependency, HostConfig, HostEvent, HostState, Level, ToolchainInfo,
};

const CARGO_OK: &str = r##"#!/bin/sh
sleep 0.3
echo '{"reason":"compiler-artifact","target":{"kind":["lib"],"name":"tracepad"},"filenames":["/fake/deps/libtracepad-1.rlib","/fake/deps/libtracepad-1.rmeta"]}'
echo '{"reason":"compiler-artifact","target":{"kind":["lib"],"name":"serde"},"filenames":["/fake/deps/libserde-2.rlib"]}'
echo '{"reason":"compiler-artifact","target":{"kind":["proc-macro"],"name":"derive-more"},"filenames":["/fake/deps/libderive_more-3.so"]}'
echo '{"reason":"build-finished","success":true}'
"##;

const CARGO_BY_MANIFEST: &str = r##"#!/bin/sh
manifest=""
while [ $# -gt 0 ]; do
    if [ "$1" = "--manifest-path" ]; then manifest="$2"; shift; fi
    shift
done
sleep 0.3
echo '{"reason":"compiler-artifact","target":{"kind":["lib"],"name":"tracepad"},"filenames":["/fake/deps/libtracepad-1.rlib"]}'
for name in alpha beta gamma; do
    if grep -q "^$name = " "$manifest"; then
        echo "{\"reason\":\"compiler-artifact\",\"target\":{\"kind\":[\"lib\"],\"name\":\"$name\"},\"filenames\":[\"/fake/deps/lib$name-1.rlib\"]}"
    fi
done
echo '{"reason":"build-finished","success":true}'
"##;

const CARGO_ERRORS: &str = r##"#!/bin/sh
echo '{"reason":"compiler-message","message":{"message":"failed to select a version","code":null,"level":"error","spans":[],"rendered":"error: failed to select a version\n  required by tracepad-restore\n"}}'
echo 'noise on stderr' >&2
exit 101
"##;

const CARGO_STDERR: &str = r##"#!/bin/sh
echo 'error: could not resolve dependencies' >&2
echo '' >&2
echo 'caused by: offline' >&2
exit 101
"##;

const RUSTC_OK: &str = r##"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then out="$2"; shift; fi
    shift
done
cat > "$out" <<'EOS'
#!/bin/sh
echo '{"Type":"tracepad.ConsoleMessage","Content":"{\"Type\":0,\"Message\":\"hello\\n\"}"}'
echo 'not a frame'
echo '{"Type":"tracepad.DebugInfo","Content":"{\"SpanStart\":0,\"SpanLength\":10,\"Variables\":[{\"Name\":\"x\",\"Value\":\"1\"}]}"}'
echo '{"Type":"tracepad.Unknown","Content":"{}"}'
echo 'boom' >&2
exit 3
EOS
chmod +x "$out"
"##;

const RUSTC_SLEEPY: &str = r##"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then out="$2"; shift; fi
    shift
done
cat > "$out" <<'EOS'
#!/bin/sh
echo '{"Type":"tracepad.ConsoleMessage","Content":"{\"Type\":0,\"Message\":\"started\\n\"}"}'
sleep 30
EOS
chmod +x "$out"
"##;

const RUSTC_ERRORS: &str = r##"#!/bin/sh
echo '{"message":"cannot find value `y` in this scope","code":{"code":"E0425","explanation":null},"level":"error","spans":[{"file_name":"main.rs","line_start":7,"column_start":9,"is_primary":true}],"rendered":"error[E0425]: cannot find value `y` in this scope\n"}' >&2
echo '{"message":"unused variable: `x`","code":null,"level":"warning","spans":[],"rendered":null}' >&2
exit 1
"##;

struct Fixtures {
    _root: tempfile::TempDir,
    ok: ToolchainInfo,
    sleepy: ToolchainInfo,
    by_manifest: ToolchainInfo,
    compile_errors: ToolchainInfo,
    restore_errors: ToolchainInfo,
    restore_stderr: ToolchainInfo,
}

fn write_script(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn toolchain(root: &Path, name: &str, cargo: &str, rustc: &str) -> ToolchainInfo {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    write_script(&dir.join("cargo"), cargo);
    write_script(&dir.join("rustc"), rustc);
    ToolchainInfo {
        moniker: name.to_string(),
        version_label: "1.85.0".to_string(),
        executable_path: dir.join("cargo"),
    }
}

fn fixtures() -> &'static Fixtures {
    static FIXTURES: OnceLock<Fixtures> = OnceLock::new();
    FIXTURES.get_or_init(|| {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path();
        Fixtures {
            ok: toolchain(path, "ok", CARGO_OK, RUSTC_OK),
            sleepy: toolchain(path, "sleepy", CARGO_OK, RUSTC_SLEEPY),
            by_manifest: toolchain(path, "by-manifest", CARGO_BY_MANIFEST, RUSTC_OK),
            compile_errors: toolchain(path, "compile-errors", CARGO_OK, RUSTC_ERRORS),
            restore_errors: toolchain(path, "restore-errors", CARGO_ERRORS, RUSTC_OK),
            restore_stderr: toolchain(path, "restore-stderr", CARGO_STDERR, RUSTC_OK),
            _root: root,
        }
    })
}

fn host(toolchain: &ToolchainInfo) -> (ExecutionHost, UnboundedReceiver<HostEvent>, tempfile::TempDir) {
    let build = tempfile::TempDir::new().unwrap();
    let config = HostConfig::default().with_build_dir(build.path().join("build"));
    let (host, rx) = ExecutionHost::new(toolchain.clone(), config).unwrap();
    (host, rx, build)
}

fn drain(rx: &mut UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn extern_path(events: &[HostEvent]) -> Vec<(String, PathBuf)> {
    events
        .iter()
        .filter_map(|e| match e {
            HostEvent::RestoreCompleted { references, .. } => Some(references),
            _ => None,
        })
        .flatten()
        .map(|r| (r.name.clone(), r.path.clone()))
        .collect()
}

#[tokio::test]
async fn test_execute_without_restore_does_nothing() {
    let (host, mut rx, _build) = host(&fixtures().ok);

    host.execute("let x = 1;\n").await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(*host.state().borrow(), HostState::Idle);
    assert!(!host.dirs().binary_path().exists());
}

#[tokio::test]
async fn test_restore_collects_direct_references() {
    let (host, mut rx, _build) = host(&fixtures().ok);
    host.set_dependencies(vec![ExternalDependency::simple("derive-more", "1")]);

    host.restore().await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let HostEvent::RestoreCompleted {
        references,
        analyzers,
    } = &events[0]
    else {
        panic!("unexpected {:?}", events[0]);
    };
    // `serde` is not a direct dependency of the script.
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].name, "tracepad");
    assert_eq!(
        references[0].path,
        PathBuf::from("/fake/deps/libtracepad-1.rlib")
    );
    assert_eq!(analyzers.len(), 1);
    assert_eq!(analyzers[0].name, "derive_more");

    assert_eq!(*host.state().borrow(), HostState::Ready);
    assert!(host.dirs().references_path().is_file());
    assert!(host.dirs().analyzers_path().is_file());
    assert!(
        fs::read_to_string(host.dirs().manifest_path())
            .unwrap()
            .contains("derive-more = \"1\"")
    );
}

#[tokio::test]
async fn test_superseded_restore_is_silent() {
    let (host, mut rx, _build) = host(&fixtures().by_manifest);

    host.set_dependencies(vec![ExternalDependency::simple("alpha", "1")]);
    let first = host.restore();
    host.set_dependencies(vec![ExternalDependency::simple("beta", "1")]);
    let second = host.restore();
    // Changes after the call belong to the next restore.
    host.set_dependencies(vec![ExternalDependency::simple("gamma", "1")]);
    second.await;
    first.await;

    let events = drain(&mut rx);
    let completed = events
        .iter()
        .filter(|e| matches!(e, HostEvent::RestoreCompleted { .. }))
        .count();
    assert_eq!(completed, 1, "{events:?}");
    let names: Vec<String> = extern_path(&events).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, ["tracepad", "beta"]);

    let references = host.references().unwrap();
    let restored: Vec<&str> = references.references.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(restored, ["tracepad", "beta"]);
    assert!(
        fs::read_to_string(host.dirs().manifest_path())
            .unwrap()
            .contains("beta = ")
    );
}

#[tokio::test]
async fn test_restore_failure_reports_error_log() {
    let (host, mut rx, _build) = host(&fixtures().restore_errors);

    host.restore().await;

    let events = drain(&mut rx);
    assert_eq!(
        events,
        [
            HostEvent::RestoreMessage("error: failed to select a version".into()),
            HostEvent::RestoreMessage("  required by tracepad-restore".into()),
        ]
    );
    assert!(host.dirs().errors_log_path().is_file());
    assert!(host.references().is_none());
    assert_eq!(*host.state().borrow(), HostState::Idle);
}

#[tokio::test]
async fn test_restore_failure_falls_back_to_stderr() {
    let (host, mut rx, _build) = host(&fixtures().restore_stderr);

    host.restore().await;

    assert_eq!(
        drain(&mut rx),
        [
            HostEvent::RestoreMessage("error: could not resolve dependencies".into()),
            HostEvent::RestoreMessage("caused by: offline".into()),
        ]
    );
    assert!(!host.dirs().errors_log_path().exists());
}

#[tokio::test]
async fn test_execute_streams_console_and_probes() {
    let (host, mut rx, _build) = host(&fixtures().ok);
    host.restore().await;
    drain(&mut rx);

    host.execute("let x = 1;\nprintln!(\"hello\");\n").await;
    let events = drain(&mut rx);

    assert!(matches!(
        &events[0],
        HostEvent::BuildMessage(d) if d.level == Level::Info
    ));
    assert!(events.contains(&HostEvent::Console {
        stream: StreamKind::Stdout,
        text: "hello\n".into(),
    }));
    assert!(events.contains(&HostEvent::Debug(DebugEvent {
        span_start: 0,
        span_length: 10,
        variables: vec![tracepad::Var::new("x", "1")],
    })));
    assert!(events.contains(&HostEvent::Console {
        stream: StreamKind::Stderr,
        text: "boom\n".into(),
    }));
    // Garbage and unknown frames are dropped.
    assert_eq!(events.len(), 5, "{events:?}");
    assert_eq!(
        events.last(),
        Some(&HostEvent::ProcessExited { code: Some(3) })
    );

    let harness = fs::read_to_string(host.dirs().harness_path()).unwrap();
    assert!(harness.contains("let x = 1;\nprintln!(\"hello\");\n"));
    assert_eq!(*host.state().borrow(), HostState::Ready);
}

#[tokio::test]
async fn test_compile_errors_stop_execution() {
    let (host, mut rx, _build) = host(&fixtures().compile_errors);
    host.restore().await;
    drain(&mut rx);

    host.execute("let x = y;\n").await;
    let events = drain(&mut rx);

    assert_eq!(events.len(), 1, "{events:?}");
    let HostEvent::BuildMessage(diagnostic) = &events[0] else {
        panic!("unexpected {:?}", events[0]);
    };
    assert!(diagnostic.is_error());
    assert_eq!(diagnostic.code.as_deref(), Some("E0425"));
    assert_eq!(diagnostic.line, Some(1));
    assert!(!host.dirs().binary_path().exists());
}

#[tokio::test]
async fn test_terminate_kills_running_script() {
    let (host, mut rx, _build) = host(&fixtures().sleepy);
    host.restore().await;
    drain(&mut rx);

    let running = host.execute("loop {}\n");
    let started = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, HostEvent::Console { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(started);
    assert_eq!(*host.state().borrow(), HostState::Executing);

    tokio::time::timeout(Duration::from_secs(5), host.terminate())
        .await
        .expect("terminate hung");
    running.await;

    // Cancellation is never reported.
    assert!(
        drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, HostEvent::ProcessExited { .. }))
    );
    assert_eq!(*host.state().borrow(), HostState::Ready);
}

#[tokio::test]
async fn test_new_execution_replaces_running_one() {
    let (host, mut rx, _build) = host(&fixtures().sleepy);
    host.restore().await;
    drain(&mut rx);

    let first = host.execute("loop {}\n");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = host.execute("loop {}\n");

    tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("first execution not terminated");

    host.shutdown().await;
    second.await;
    assert!(
        drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, HostEvent::ProcessExited { .. }))
    );
}

#[tokio::test]
async fn test_restore_during_execution_keeps_executing_state() {
    let (host, mut rx, _build) = host(&fixtures().sleepy);
    host.restore().await;
    drain(&mut rx);

    let running = host.execute("loop {}\n");
    let started = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, HostEvent::Console { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(started);

    let mut state = host.state();
    let restore = host.restore();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*state.borrow_and_update(), HostState::Executing);
    restore.await;
    assert_eq!(*state.borrow_and_update(), HostState::Executing);

    host.terminate().await;
    running.await;
    assert_eq!(*host.state().borrow(), HostState::Ready);
}
