//! Ties the lifetime of a script to the host that launched it.
//!
//! The host passes its own process id as `--pid <n>`. The script exits with
//! status 1 as soon as that process is gone, so a crashed or killed host never
//! leaves orphaned scripts behind.

use std::thread;
use std::time::Duration;

/// How often the parent's liveness is checked.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Extract the parent pid from command-line arguments.
///
/// Accepts both `--pid 42` and `--pid=42`. Returns `None` when the flag is
/// missing or its value is not a number.
pub fn pid_from_args<I, S>(args: I) -> Option<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if arg == "--pid" {
            return args.next()?.as_ref().parse().ok();
        }
        if let Some(value) = arg.strip_prefix("--pid=") {
            return value.parse().ok();
        }
    }
    None
}

/// Whether a process with this id currently exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 performs the permission and existence checks without sending.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

/// Exit immediately if `pid` is gone, otherwise watch it from a background
/// thread and exit once it disappears.
pub fn attach(pid: u32) {
    if !is_alive(pid) {
        std::process::exit(1);
    }

    let spawned = thread::Builder::new()
        .name("tracepad-parent-watch".into())
        .spawn(move || {
            loop {
                thread::sleep(POLL_INTERVAL);
                if !is_alive(pid) {
                    std::process::exit(1);
                }
            }
        });
    // Without a watcher the script still runs; the host kills it on cancel.
    drop(spawned);
}
