//! Process-wide plumbing between the console macros and stdout.

use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::capture::StdoutCapture;
use crate::console::ConsoleDumper;
use crate::parent;
use crate::protocol::{ConsoleMessage, DebugEvent, Payload, StreamKind, Var};

/// Sender of the active runtime.
///
/// The macros expand inside arbitrary script code, including nested functions
/// and methods that have no way to reach the `Runtime` value, so they find it
/// through this slot. Only one runtime can own it at a time.
static CHANNEL: Mutex<Option<Sender<Payload>>> = Mutex::new(None);

/// Owning handle for the script runtime.
///
/// Created once at the top of the generated `main`. While it is alive, every
/// probe and console write is sent to a writer thread that encodes it onto
/// stdout, and anything else written to stdout is reported as console text.
/// Dropping it restores stdout, closes the channel, waits for the writer to
/// drain and flushes.
///
/// A runtime created while another one is alive is inactive: it reports
/// nothing and leaves the first one in charge.
#[must_use = "dropping the runtime immediately stops telemetry"]
pub struct Runtime {
    active: bool,
    writer: Option<JoinHandle<()>>,
    capture: Option<StdoutCapture>,
}

impl Runtime {
    /// Initialize from the process arguments.
    pub fn init() -> Self {
        Self::with_args(std::env::args().skip(1))
    }

    /// Initialize from explicit arguments (`--pid <n>` is honored).
    pub fn with_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut channel = lock_channel();
        if channel.is_some() {
            return Self::inactive();
        }

        if let Some(pid) = parent::pid_from_args(args) {
            parent::attach(pid);
        }

        match StdoutCapture::install() {
            Ok((mut capture, frames, pipe)) => {
                let mut runtime = Self::start(&mut channel, Box::new(frames));
                if runtime.active {
                    // Lines read before `channel` unlocks wait for the sender.
                    capture.forward(pipe, forward_stdout);
                    runtime.capture = Some(capture);
                } else {
                    capture.restore();
                }
                runtime
            }
            Err(_) => Self::start(&mut channel, Box::new(io::stdout())),
        }
    }

    /// Whether this runtime owns the channel the macros report through.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Runtime writing frames to `out`, unless another one is active.
    #[cfg(test)]
    fn with_output(out: Box<dyn Write + Send>) -> Self {
        let mut channel = lock_channel();
        if channel.is_some() {
            return Self::inactive();
        }
        Self::start(&mut channel, out)
    }

    fn inactive() -> Self {
        Self {
            active: false,
            writer: None,
            capture: None,
        }
    }

    fn start(channel: &mut Option<Sender<Payload>>, out: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = mpsc::channel();
        let writer = thread::Builder::new()
            .name("tracepad-writer".into())
            .spawn(move || {
                pump(rx, ConsoleDumper::new(out));
            })
            .ok();

        // Without a writer the macros fall back to plain stdio.
        let active = writer.is_some();
        if active {
            *channel = Some(tx);
        }
        Self {
            active,
            writer,
            capture: None,
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.restore();
        }
        if !self.active {
            return;
        }
        lock_channel().take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

fn pump<W: io::Write>(rx: Receiver<Payload>, dumper: ConsoleDumper<W>) -> ConsoleDumper<W> {
    while let Ok(payload) = rx.recv() {
        if dumper.dump(&payload).is_err() {
            return dumper;
        }
        // Drain whatever is already queued before paying for a flush.
        loop {
            match rx.try_recv() {
                Ok(payload) => {
                    if dumper.dump(&payload).is_err() {
                        return dumper;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if dumper.flush().is_err() {
            return dumper;
        }
    }
    let _ = dumper.flush();
    dumper
}

fn lock_channel() -> MutexGuard<'static, Option<Sender<Payload>>> {
    CHANNEL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Send a payload to the writer. Returns it back when no runtime is active.
fn send(payload: Payload) -> Result<(), Payload> {
    match lock_channel().as_ref() {
        Some(tx) => tx.send(payload).map_err(|err| err.0),
        None => Err(payload),
    }
}

/// Stdout text that bypassed the console macros.
fn forward_stdout(text: String) {
    // Stdout is the pipe being read, so there is no fallback.
    let _ = send(Payload::Console(ConsoleMessage::new(StreamKind::Stdout, text)));
}

/// Record that execution reached a span. Used by [`probe!`](crate::probe).
#[doc(hidden)]
pub fn notify(span_start: usize, span_length: usize, variables: Vec<Var>) {
    // Telemetry without a host has nowhere to go.
    let _ = send(Payload::Debug(DebugEvent {
        span_start,
        span_length,
        variables,
    }));
}

/// Forward console text. Used by the console macros.
#[doc(hidden)]
pub fn write_console(stream: StreamKind, text: String) {
    if let Err(Payload::Console(message)) = send(Payload::Console(ConsoleMessage::new(stream, text)))
    {
        let _ = match message.stream {
            StreamKind::Stdout => io::stdout().write_all(message.message.as_bytes()),
            StreamKind::Stderr => io::stderr().write_all(message.message.as_bytes()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn test_pump_writes_all_frames_in_order() {
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            tx.send(Payload::Debug(DebugEvent {
                span_start: i,
                span_length: 1,
                variables: Vec::new(),
            }))
            .unwrap();
        }
        tx.send(Payload::Console(ConsoleMessage::new(StreamKind::Stdout, "done\n")))
            .unwrap();
        drop(tx);

        let dumper = pump(rx, ConsoleDumper::new(Vec::new()));
        let text = String::from_utf8(dumper.into_inner()).unwrap();
        let payloads: Vec<Payload> = text.lines().map(|l| protocol::decode(l).unwrap()).collect();

        assert_eq!(payloads.len(), 11);
        for (i, payload) in payloads[..10].iter().enumerate() {
            match payload {
                Payload::Debug(event) => assert_eq!(event.span_start, i),
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert_eq!(
            payloads[10],
            Payload::Console(ConsoleMessage::new(StreamKind::Stdout, "done\n"))
        );
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn spans(&self) -> Vec<usize> {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines()
                .filter_map(|l| match protocol::decode(l) {
                    Ok(Payload::Debug(event)) => Some(event.span_start),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_second_runtime_is_inactive() {
        let first_out = SharedBuffer::default();
        let second_out = SharedBuffer::default();

        let first = Runtime::with_output(Box::new(first_out.clone()));
        assert!(first.is_active());
        let second = Runtime::with_output(Box::new(second_out.clone()));
        assert!(!second.is_active());

        notify(7001, 1, Vec::new());
        drop(second);
        // The first runtime still owns the channel.
        notify(7002, 1, Vec::new());
        drop(first);

        let spans = first_out.spans();
        assert!(spans.contains(&7001), "{spans:?}");
        assert!(spans.contains(&7002), "{spans:?}");
        assert!(second_out.spans().is_empty());

        // The slot is free again once the owner is gone.
        let next = Runtime::with_output(Box::new(SharedBuffer::default()));
        assert!(next.is_active());
    }
}
