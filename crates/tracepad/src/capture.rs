//! Redirection of the process's own stdout.
//!
//! Output that bypasses the console macros (`std::io::stdout()` writes,
//! `std` macros in modules without the macro imports, dependencies) still
//! lands on file descriptor 1. While a capture is installed, fd 1 is a pipe
//! whose lines come back as console text, and protocol frames go to a
//! duplicate of the original stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long teardown waits for captured output still in the pipe.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Call `sink` with every line read from `reader`, newline included.
///
/// A last line without newline is passed as is. Invalid UTF-8 is replaced.
pub fn forward_lines<R: BufRead>(mut reader: R, mut sink: impl FnMut(String)) {
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => sink(String::from_utf8_lossy(&line).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Stdout redirected into a pipe.
#[cfg(unix)]
pub struct StdoutCapture {
    saved: std::os::fd::OwnedFd,
    reader: Option<(JoinHandle<()>, Receiver<()>)>,
}

#[cfg(unix)]
impl StdoutCapture {
    /// Point fd 1 at a new pipe. Returns the capture and a handle on the
    /// original stdout.
    pub fn install() -> io::Result<(Self, File, File)> {
        use std::os::fd::{FromRawFd, OwnedFd};

        io::stdout().flush()?;

        let saved = unsafe { libc::fcntl(libc::STDOUT_FILENO, libc::F_DUPFD_CLOEXEC, 0) };
        if saved < 0 {
            return Err(io::Error::last_os_error());
        }
        let saved = unsafe { OwnedFd::from_raw_fd(saved) };

        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        for fd in [&read, &write] {
            set_cloexec(fd)?;
        }

        // fd 1 becomes the only write end once `write` drops.
        if unsafe { libc::dup2(std::os::fd::AsRawFd::as_raw_fd(&write), libc::STDOUT_FILENO) } < 0 {
            return Err(io::Error::last_os_error());
        }
        drop(write);

        let frames = File::from(saved.try_clone()?);
        Ok((
            Self {
                saved,
                reader: None,
            },
            frames,
            File::from(read),
        ))
    }

    /// Read `pipe` on a background thread, passing each line to `sink`.
    pub fn forward(&mut self, pipe: File, sink: impl FnMut(String) + Send + 'static) {
        let (done_tx, done_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("tracepad-stdout".into())
            .spawn(move || {
                forward_lines(BufReader::new(pipe), sink);
                let _ = done_tx.send(());
            });
        if let Ok(handle) = spawned {
            self.reader = Some((handle, done_rx));
        }
    }

    /// Put the original stdout back and wait for the pipe to drain.
    ///
    /// Children that inherited the pipe can keep it open, so the wait is
    /// bounded by [`DRAIN_TIMEOUT`].
    pub fn restore(mut self) {
        use std::os::fd::AsRawFd;

        let _ = io::stdout().flush();
        if unsafe { libc::dup2(self.saved.as_raw_fd(), libc::STDOUT_FILENO) } < 0 {
            return;
        }
        if let Some((handle, done)) = self.reader.take() {
            if done.recv_timeout(DRAIN_TIMEOUT).is_ok() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(unix)]
fn set_cloexec(fd: &std::os::fd::OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Stdout is left alone where file descriptors cannot be redirected.
#[cfg(not(unix))]
pub struct StdoutCapture;

#[cfg(not(unix))]
impl StdoutCapture {
    pub fn install() -> io::Result<(Self, File, File)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stdout capture needs unix file descriptors",
        ))
    }

    pub fn forward(&mut self, _pipe: File, _sink: impl FnMut(String) + Send + 'static) {}

    pub fn restore(self) {}
}
