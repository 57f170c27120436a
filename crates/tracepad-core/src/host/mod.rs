//! Execution orchestration.
//!
//! An [`ExecutionHost`] owns one build directory and sequences the two kinds
//! of work done in it:
//!
//! - **restores** build the dependency project and produce a
//!   [`ReferenceSet`]; a new restore cancels the one in flight and waits for
//!   it to wind down before touching the build directory;
//! - **executions** compile a script against the latest reference set and
//!   run it, streaming its console output and probe events back. Only one
//!   execution is active at a time.
//!
//! Results are reported as [`HostEvent`]s on the channel returned by
//! [`ExecutionHost::new`]. Failures of the script's build are events, not
//! errors; cancellation is never reported.
//!
//! Restores and executions overlap, so [`HostState`] reports the most visible
//! activity: an execution, then a restore, then the resting state.

mod events;

pub use events::{HostEvent, HostState};

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, watch};
use tracepad::{Payload, StreamKind};

use crate::build::{
    self, ArtifactCollector, Diagnostic, Harness, Level, ReferenceSet, RustcDiagnostic,
    ToolchainInfo, direct_crate_names, synthesize_project, write_manifest,
};
use crate::cancel::CancelToken;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::paths::BuildDirs;
use crate::process::{self, LineStream};

/// Recompiles allowed after taking out captures the compiler rejects.
const MAX_RELAXATIONS: usize = 16;

/// Resolves when an operation has finished, whatever its outcome.
///
/// Awaiting is optional: the operation runs on its own task either way.
pub type Completion = Shared<BoxFuture<'static, ()>>;

/// An operation in flight: its cancellation handle and completion.
#[derive(Clone)]
struct Operation {
    token: CancelToken,
    done: Completion,
}

impl Operation {
    fn spawn<F>(token: CancelToken, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let done = tokio::spawn(work)
            .map(|result| {
                if let Err(e) = result {
                    tracing::error!("Host task failed: {}", e);
                }
            })
            .boxed()
            .shared();
        Self { token, done }
    }
}

struct Inner {
    toolchain: ToolchainInfo,
    dirs: BuildDirs,
    config: Mutex<HostConfig>,
    references: Mutex<Option<ReferenceSet>>,
    restore: Mutex<Option<Operation>>,
    execution: Mutex<Option<Operation>>,
    restoring: AtomicBool,
    executing: AtomicBool,
    events: mpsc::UnboundedSender<HostEvent>,
    state: watch::Sender<HostState>,
}

/// Restores dependencies, compiles and runs scripts.
///
/// Cheap to clone; clones drive the same host.
#[derive(Clone)]
pub struct ExecutionHost {
    inner: Arc<Inner>,
}

impl ExecutionHost {
    /// Create a host building with `toolchain`.
    ///
    /// # Errors
    /// Returns an error if the build directory cannot be created.
    pub fn new(
        toolchain: ToolchainInfo,
        config: HostConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>)> {
        let dirs = BuildDirs::new(&config.build_dir)?;
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(HostState::Idle);

        tracing::debug!(
            "Execution host using {} ({}) in {}",
            toolchain.moniker,
            toolchain.version_label,
            dirs.root.display()
        );

        let inner = Inner {
            toolchain,
            dirs,
            config: Mutex::new(config),
            references: Mutex::new(None),
            restore: Mutex::new(None),
            execution: Mutex::new(None),
            restoring: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            events,
            state,
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    pub fn toolchain(&self) -> &ToolchainInfo {
        &self.inner.toolchain
    }

    pub fn dirs(&self) -> &BuildDirs {
        &self.inner.dirs
    }

    /// Current lifecycle state, updated as operations progress.
    pub fn state(&self) -> watch::Receiver<HostState> {
        self.inner.state.subscribe()
    }

    /// The reference set of the last successful restore.
    pub fn references(&self) -> Option<ReferenceSet> {
        lock(&self.inner.references).clone()
    }

    /// Replace the dependencies used by the next restore.
    pub fn set_dependencies(&self, dependencies: Vec<build::ExternalDependency>) {
        lock(&self.inner.config).dependencies = dependencies;
    }

    /// Start a restore of the current dependencies, superseding the one in
    /// flight.
    pub fn restore(&self) -> Completion {
        let config = lock(&self.inner.config).clone();
        let mut slot = lock(&self.inner.restore);
        let previous = slot.take();
        if let Some(previous) = &previous {
            tracing::debug!("Superseding in-flight restore");
            previous.token.cancel();
        }

        let token = CancelToken::new();
        let inner = Arc::clone(&self.inner);
        let work_token = token.clone();
        let operation = Operation::spawn(token, async move {
            if let Some(previous) = previous {
                previous.done.await;
            }
            inner.run_restore(&config, &work_token).await;
        });
        *slot = Some(operation.clone());
        operation.done
    }

    /// Compile and run `source`, terminating the running execution first.
    ///
    /// Waits for the latest restore. Does nothing when no restore has
    /// succeeded.
    pub fn execute(&self, source: impl Into<String>) -> Completion {
        let source = source.into();
        let restore = lock(&self.inner.restore).as_ref().map(|op| op.done.clone());

        let mut slot = lock(&self.inner.execution);
        let previous = slot.take();
        if let Some(previous) = &previous {
            previous.token.cancel();
        }

        let token = CancelToken::new();
        let inner = Arc::clone(&self.inner);
        let work_token = token.clone();
        let operation = Operation::spawn(token, async move {
            if let Some(previous) = previous {
                previous.done.await;
            }
            if let Some(restore) = restore {
                restore.await;
            }
            inner.run_execution(&source, &work_token).await;
        });
        *slot = Some(operation.clone());
        operation.done
    }

    /// Cancel the active execution and wait until its process is gone.
    pub async fn terminate(&self) {
        let active = lock(&self.inner.execution).clone();
        if let Some(operation) = active {
            if !operation.token.is_cancelled() {
                self.inner.set_state(HostState::Cancelling);
            }
            operation.token.cancel();
            operation.done.await;
            self.inner.refresh();
        }
    }

    /// Cancel everything and wait for all operations to finish.
    pub async fn shutdown(&self) {
        let restore = lock(&self.inner.restore).clone();
        let execution = lock(&self.inner.execution).clone();
        for operation in restore.iter().chain(execution.iter()) {
            operation.token.cancel();
        }
        for operation in restore.into_iter().chain(execution) {
            operation.done.await;
        }
        self.inner.refresh();
        tracing::debug!("Execution host shut down");
    }
}

impl Inner {
    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Host event dropped: receiver closed");
        }
    }

    fn set_state(&self, state: HostState) {
        self.state.send_replace(state);
    }

    /// Publish the state of the most visible activity.
    fn refresh(&self) {
        let state = if self.executing.load(Ordering::SeqCst) {
            HostState::Executing
        } else if self.restoring.load(Ordering::SeqCst) {
            HostState::Restoring
        } else if lock(&self.references).is_some() {
            HostState::Ready
        } else {
            HostState::Idle
        };
        self.set_state(state);
    }

    async fn run_restore(&self, config: &HostConfig, token: &CancelToken) {
        if token.is_cancelled() {
            return;
        }
        self.restoring.store(true, Ordering::SeqCst);
        self.refresh();

        let result = self.restore_references(config, token).await;
        self.restoring.store(false, Ordering::SeqCst);
        match result {
            Ok(Some(set)) => {
                tracing::info!(
                    "Restore completed: {} references, {} analyzers",
                    set.references.len(),
                    set.analyzers.len()
                );
                *lock(&self.references) = Some(set.clone());
                self.emit(HostEvent::RestoreCompleted {
                    references: set.references,
                    analyzers: set.analyzers,
                });
                self.refresh();
            }
            Ok(None) => {
                *lock(&self.references) = None;
                self.refresh();
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Restore cancelled");
            }
            Err(e) => {
                tracing::debug!("Restore failed: {}", e);
                *lock(&self.references) = None;
                self.emit(HostEvent::RestoreMessage(e.to_string()));
                self.refresh();
            }
        }
    }

    /// Build the dependency project. `Ok(None)` means the build failed and
    /// its errors were already reported.
    async fn restore_references(
        &self,
        config: &HostConfig,
        token: &CancelToken,
    ) -> Result<Option<ReferenceSet>> {
        let dirs = &self.dirs;

        synthesize_project(dirs, config)?;
        token.check()?;

        tracing::info!("Restoring {} dependencies", config.dependencies.len());
        let spec = build::restore_command(&self.toolchain, dirs, config);
        let mut child = process::spawn(&spec, token)?;
        let stdout = child.take_stdout();
        let stderr = child.take_stderr();

        let mut collector = ArtifactCollector::new(direct_crate_names(&config.dependencies));
        let (_, stderr_lines) = tokio::join!(
            async {
                if let Some(mut lines) = stdout {
                    while let Some(line) = lines.next_line().await {
                        collector.observe(&line);
                    }
                }
            },
            collect_lines(stderr),
        );
        let exit = child.wait().await;
        token.check()?;

        let (set, errors) = collector.into_parts();
        if !exit.success() {
            tracing::info!("Restore failed with {:?}", exit.code);
            if !errors.is_empty() {
                fs::write(dirs.errors_log_path(), errors.join("\n") + "\n")?;
            }
            let lines = match fs::read_to_string(dirs.errors_log_path()) {
                Ok(log) => log.lines().map(str::to_string).collect(),
                Err(_) => stderr_lines,
            };
            for line in lines.into_iter().filter(|l| !l.trim().is_empty()) {
                self.emit(HostEvent::RestoreMessage(line));
            }
            return Ok(None);
        }

        write_manifest(&dirs.references_path(), &set.references)?;
        write_manifest(&dirs.analyzers_path(), &set.analyzers)?;
        let set = ReferenceSet::load(&dirs.references_path(), &dirs.analyzers_path())?;
        token.check()?;
        Ok(Some(set))
    }

    async fn run_execution(&self, source: &str, token: &CancelToken) {
        let Some(references) = lock(&self.references).clone() else {
            tracing::debug!("No restored references; skipping execution");
            return;
        };
        if token.is_cancelled() {
            return;
        }
        self.executing.store(true, Ordering::SeqCst);
        self.refresh();

        let result = self.compile_and_run(source, &references, token).await;
        self.executing.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => tracing::debug!("Execution cancelled"),
            Err(e) => {
                tracing::debug!("Execution failed: {}", e);
                self.emit(HostEvent::BuildMessage(Diagnostic {
                    level: Level::Error,
                    ..Diagnostic::info(e.to_string())
                }));
            }
        }
        if !token.is_cancelled() {
            self.refresh();
        }
    }

    async fn compile_and_run(
        &self,
        source: &str,
        references: &ReferenceSet,
        token: &CancelToken,
    ) -> Result<()> {
        let config = lock(&self.config).clone();
        let dirs = &self.dirs;

        if !self.compile(source, &config, references, token).await? {
            return Ok(());
        }
        self.emit(HostEvent::BuildMessage(Diagnostic::info("Build succeeded")));

        tracing::info!("Launching script");
        let spec = build::run_command(dirs, std::process::id());
        let mut child = process::spawn(&spec, token)?;
        drop(child.take_stdin());
        let stdout = child.take_stdout();
        let stderr = child.take_stderr();
        tokio::join!(self.pump_frames(stdout), self.pump_stderr(stderr));

        let exit = child.wait().await;
        token.check()?;
        self.emit(HostEvent::ProcessExited { code: exit.code });
        Ok(())
    }

    /// Compile `source` into the script binary. `Ok(false)` means the build
    /// failed and its errors were already reported.
    ///
    /// Probe calls naming a variable the borrow checker rejects at that point
    /// (moved, mutably borrowed) lose that capture and the script is
    /// recompiled. Errors elsewhere are reported as they are.
    async fn compile(
        &self,
        source: &str,
        config: &HostConfig,
        references: &ReferenceSet,
        token: &CancelToken,
    ) -> Result<bool> {
        let dirs = &self.dirs;
        let mut source = source.to_string();
        let mut relaxations = 0;
        loop {
            let harness = Harness::new(&source);
            fs::write(dirs.harness_path(), &harness.source)?;
            token.check()?;

            tracing::info!("Compiling script");
            let spec = build::compile_command(&self.toolchain, dirs, config, references);
            let (stdout, stderr, exit) = process::spawn(&spec, token)?.output().await;
            token.check()?;

            let errors: Vec<RustcDiagnostic> = stderr
                .iter()
                .chain(stdout.iter())
                .filter_map(|line| RustcDiagnostic::parse(line))
                .filter(RustcDiagnostic::is_error)
                .collect();
            if errors.is_empty() {
                if !exit.success() {
                    return Err(Error::Build(format!(
                        "rustc exited with {:?}: {}",
                        exit.code,
                        stderr.join("\n")
                    )));
                }
                return Ok(true);
            }

            let mapper = harness.diagnostic_mapper(dirs.harness_path());
            let removals = if relaxations < MAX_RELAXATIONS {
                mapper.removals(&errors)
            } else {
                Vec::new()
            };
            if removals.is_empty() {
                for diagnostic in errors.iter().filter_map(|e| mapper.map(e)) {
                    self.emit(HostEvent::BuildMessage(diagnostic));
                }
                return Ok(false);
            }

            relaxations += 1;
            tracing::debug!(
                "Recompiling without {} rejected captures ({} of {})",
                removals.len(),
                relaxations,
                MAX_RELAXATIONS
            );
            source = mapper.probes().remove(&source, &removals);
        }
    }

    /// Decode protocol frames from the script's stdout.
    async fn pump_frames(&self, stream: Option<LineStream>) {
        let Some(mut lines) = stream else {
            return;
        };
        while let Some(line) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match tracepad::decode(&line) {
                Ok(payload) => self.dispatch(payload),
                Err(e) => tracing::debug!("Dropping undecodable line: {}", e),
            }
        }
    }

    /// Raw stderr of the script (panics, aborts) as console text.
    async fn pump_stderr(&self, stream: Option<LineStream>) {
        let Some(mut lines) = stream else {
            return;
        };
        while let Some(line) = lines.next_line().await {
            self.emit(HostEvent::Console {
                stream: StreamKind::Stderr,
                text: line + "\n",
            });
        }
    }

    fn dispatch(&self, payload: Payload) {
        let event = match payload {
            Payload::Console(message) => HostEvent::Console {
                stream: message.stream,
                text: message.message,
            },
            Payload::Debug(event) => HostEvent::Debug(event),
            Payload::Diagnostic(text) => HostEvent::Diagnostic(text),
        };
        self.emit(event);
    }
}

async fn collect_lines(stream: Option<LineStream>) -> Vec<String> {
    match stream {
        Some(lines) => lines.collect().await,
        None => Vec::new(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
