//! Child process supervision.
//!
//! Every external program (cargo, rustc, the compiled script) is started
//! through [`spawn`]. The child gets piped stdio, its own process group on
//! Unix, and a monitor task that kills the whole group as soon as the
//! operation's [`CancelToken`] fires or the [`ProcessHandle`] is dropped.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name for logs and errors.
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; None when killed by a signal or when waiting failed.
    pub code: Option<i32>,
    /// The process was killed because of cancellation.
    pub cancelled: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.cancelled
    }
}

/// Line-oriented reader over one of the child's output streams.
///
/// Yields lines without their terminator. Ends on EOF, on a read error or
/// once cancellation is requested.
pub struct LineStream {
    reader: Box<dyn tokio::io::AsyncBufRead + Send + Unpin>,
    cancel: CancelToken,
    buf: Vec<u8>,
}

impl LineStream {
    fn new<R>(reader: R, cancel: CancelToken) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            cancel,
            buf: Vec::new(),
        }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.buf.clear();
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            read = self.reader.read_until(b'\n', &mut self.buf) => read,
        };
        match read {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(e) => {
                tracing::debug!("Output stream read failed: {}", e);
                None
            }
        }
    }

    /// Read every remaining line.
    pub async fn collect(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line);
        }
        lines
    }
}

/// A running (or finished) supervised process.
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<LineStream>,
    stderr: Option<LineStream>,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill: CancelToken,
    cancel: CancelToken,
    monitor: Option<JoinHandle<()>>,
}

/// Start a process.
///
/// Must be called from within a tokio runtime.
pub fn spawn(spec: &ProcessSpec, cancel: &CancelToken) -> Result<ProcessHandle> {
    cancel.check()?;

    let name = spec.display_name();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| Error::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    tracing::debug!("Started {} (pid {:?})", name, pid);

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .map(|out| LineStream::new(out, cancel.clone()));
    let stderr = child
        .stderr
        .take()
        .map(|err| LineStream::new(err, cancel.clone()));

    let (exit_tx, exit_rx) = watch::channel(None);
    let kill = CancelToken::new();
    let monitor = tokio::spawn(monitor(
        child,
        name.clone(),
        cancel.clone(),
        kill.clone(),
        exit_tx,
    ));

    Ok(ProcessHandle {
        name,
        pid,
        stdin,
        stdout,
        stderr,
        exit: exit_rx,
        kill,
        cancel: cancel.clone(),
        monitor: Some(monitor),
    })
}

async fn monitor(
    mut child: Child,
    name: String,
    cancel: CancelToken,
    kill: CancelToken,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            tracing::debug!("Cancelling {}", name);
            kill_process_tree(&mut child);
            child.wait().await
        }
        _ = kill.cancelled() => {
            kill_process_tree(&mut child);
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit {
            code: status.code(),
            cancelled: cancel.is_cancelled() && !status.success(),
        },
        Err(e) => {
            tracing::warn!("Failed to wait for {}: {}", name, e);
            ProcessExit {
                code: None,
                cancelled: cancel.is_cancelled(),
            }
        }
    };
    tracing::debug!("{} exited with {:?}", name, exit.code);
    let _ = exit_tx.send(Some(exit));
}

/// Kill the child and everything in its process group.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: plain syscall; a negative pid addresses the process group.
        let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!("Failed to kill process group {}: {}", pid, err);
            }
        }
    }

    // Already-exited children report an error here; nothing to do about it.
    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill: {}", e);
    }
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<LineStream> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<LineStream> {
        self.stderr.take()
    }

    /// Exit observable: None while running.
    pub fn exit_status(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit.clone()
    }

    /// Kill the process without cancelling the surrounding operation.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the process to end.
    pub async fn wait(&mut self) -> ProcessExit {
        let exit = match self.exit.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        exit.unwrap_or(ProcessExit {
            code: None,
            cancelled: self.cancel.is_cancelled(),
        })
    }

    /// Drain both output streams concurrently, then wait for exit.
    pub async fn output(mut self) -> (Vec<String>, Vec<String>, ProcessExit) {
        let stdout = self.take_stdout();
        let stderr = self.take_stderr();
        drop(self.take_stdin());

        let (out, err) = tokio::join!(
            async move {
                match stdout {
                    Some(s) => s.collect().await,
                    None => Vec::new(),
                }
            },
            async move {
                match stderr {
                    Some(s) => s.collect().await,
                    None => Vec::new(),
                }
            },
        );
        let exit = self.wait().await;
        (out, err, exit)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.borrow().is_none() {
            self.kill.cancel();
        }
    }
}
