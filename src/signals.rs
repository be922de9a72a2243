//! Signal handling: `SIGTERM`/`SIGINT` flip a process-wide stop flag for
//! the master and worker event loops to notice between iterations, and
//! `SIGPIPE` is ignored so a client disconnecting mid-write surfaces as
//! a normal `EPIPE` write error instead of killing the process.
//!
//! A plain `extern "C"` handler writes one `AtomicBool`, installed with
//! `nix::sys::signal::sigaction` — no signalfd, no dedicated signal
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SigAction, SigHandler, Signal};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_stop_signal(_: i32) {
    STOP.store(true, Ordering::SeqCst);
}

/// Installs the `SIGTERM`/`SIGINT` handler. Must run before any worker
/// is forked so children inherit the same disposition.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_stop_signal),
        nix::sys::signal::SaFlags::empty(),
        nix::sys::signal::SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGTERM, &action)?;
        sigaction(Signal::SIGINT, &action)?;
    }
    Ok(())
}

/// A socket write to a peer that already closed its read side raises
/// `SIGPIPE` by default, which terminates the process outright; ignoring
/// it lets the write just fail with `EPIPE` instead.
pub fn ignore_sigpipe() -> nix::Result<()> {
    unsafe {
        sigaction(
            Signal::SIGPIPE,
            &SigAction::new(SigHandler::SigIgn, nix::sys::signal::SaFlags::empty(), nix::sys::signal::SigSet::empty()),
        )?;
    }
    Ok(())
}

pub fn should_stop() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// Used by tests and by the master when propagating shutdown to a
/// single-process (no-fork) worker directly rather than through a real
/// signal delivery.
pub fn request_stop() {
    STOP.store(true, Ordering::SeqCst);
}
