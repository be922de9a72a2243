//! Master supervision and worker-process bootstrap.
//!
//! The master forks `workers` children, waits for any one of them to
//! exit, then sends every remaining child `SIGTERM` and reaps them. Each
//! worker ignores `SIGPIPE`, installs its own signal handlers, optionally
//! pins itself to a CPU, and opens its own `SO_REUSEPORT` listener
//! (via `socket2`) rather than sharing one fd across forked children.
//!
//! `workers <= 1` runs the single worker directly in the calling
//! process — a lone worker has nothing to supervise.

use std::io;
use std::net::SocketAddr;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use socket2::{Domain, Protocol, Socket, Type};

use crate::affinity;
use crate::config::AppConfig;
use crate::signals;
use crate::worker::Worker;

/// Binds a non-blocking listener with `SO_REUSEADDR`/`SO_REUSEPORT` set so
/// every worker process can independently `bind()` the same port and let
/// the kernel load-balance `accept()` across them.
fn bind_reuseport(port: u16) -> io::Result<mio::net::TcpListener> {
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .expect("static address template always parses");

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    mio::net::TcpListener::from_std(std_listener)
}

/// Runs a single worker process to completion: binds its own listener,
/// applies CPU pinning and signal disposition, then drives the event loop
/// until the stop flag is observed.
fn run_worker(id: usize, config: &AppConfig) -> io::Result<()> {
    signals::install()?;
    signals::ignore_sigpipe().map_err(|e| io::Error::other(e.to_string()))?;

    if config.cpu_affinity {
        affinity::pin_to_cpu(id);
    }

    let listener = bind_reuseport(config.port)?;
    let docroot = config
        .docroot()
        .map_err(|e| io::Error::new(e.kind(), format!("resolving docroot: {e}")))?;

    let mut worker = Worker::new(id, listener, docroot, config.clone())?;
    tracing::info!(worker_id = id, pid = std::process::id(), "zaver worker starting");
    worker.run()
}

/// Forks `config.resolved_workers()` worker processes and supervises them:
/// the first child to exit (for any reason) triggers a `SIGTERM` sweep of
/// the rest and an orderly shutdown. Returns the process exit code the
/// caller should use.
pub fn run(config: AppConfig) -> io::Result<i32> {
    let workers = config.resolved_workers();

    if workers <= 1 {
        run_worker(0, &config)?;
        return Ok(0);
    }

    signals::install()?;
    tracing::info!(workers, pid = std::process::id(), "zaver master starting");

    let mut pids: Vec<Pid> = Vec::with_capacity(workers);
    for id in 0..workers {
        // SAFETY: the child's first action is either to exec the worker
        // loop (which only touches this process's own, just-forked state)
        // or to exit; no locks held by other threads are touched before
        // that happens, since every Zaver process is single-threaded.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let rc = match run_worker(id, &config) {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::error!(worker_id = id, error = %e, "worker exited with error");
                        1
                    }
                };
                std::process::exit(rc);
            }
            Ok(ForkResult::Parent { child }) => pids.push(child),
            Err(e) => {
                tracing::error!(error = %e, "fork failed");
                signals::request_stop();
                break;
            }
        }
    }

    while !signals::should_stop() {
        match waitpid(None, None) {
            Ok(WaitStatus::Exited(pid, status)) => {
                tracing::error!(?pid, status, "worker exited; shutting down");
                break;
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                tracing::error!(?pid, ?signal, "worker killed; shutting down");
                break;
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => {
                tracing::error!(error = %e, "waitpid failed");
                break;
            }
        }
    }

    for pid in &pids {
        let _ = kill(*pid, Signal::SIGTERM);
    }
    for pid in &pids {
        let _ = waitpid(*pid, None);
    }

    tracing::info!("zaver master stopped");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reuseport_two_listeners_same_port() {
        let first = bind_reuseport(0).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_reuseport(port);
        assert!(second.is_ok(), "second bind to the same port should succeed with SO_REUSEPORT");
    }
}
