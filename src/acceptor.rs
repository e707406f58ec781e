//! The listening socket and the accept loop.
//!
//! `SO_REUSEADDR`, `listen(128)`, and a short `SO_RCVTIMEO` on the
//! listener so the accept loop wakes periodically to print stats and
//! observe shutdown. A full queue gets a fail-fast 503. `socket2`
//! builds the socket since `std::net` alone has no way to set
//! `SO_RCVTIMEO` before handing off to `TcpListener`.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use crate::error::StartupError;
use crate::worker::{reject_with_503, ServerContext};

const LISTEN_BACKLOG: i32 = 128;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATS_PRINT_INTERVAL: Duration = Duration::from_secs(30);

pub fn bind(port: u16) -> Result<TcpListener, StartupError> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_reuse_address(true).map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.bind(&addr.into()).map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.listen(LISTEN_BACKLOG).map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_read_timeout(Some(ACCEPT_POLL_INTERVAL)).map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    Ok(socket.into())
}

/// Runs on the main thread: accept, admit-or-503, and a 30s stats
/// heartbeat, until `shutdown` is set.
pub fn accept_loop(listener: &TcpListener, ctx: &Arc<ServerContext>, shutdown: &AtomicBool) {
    let mut last_report = std::time::Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        if last_report.elapsed() >= STATS_PRINT_INTERVAL {
            tracing::info!(report = %ctx.stats.report(), "periodic stats");
            last_report = std::time::Instant::now();
        }

        let stream = match listener.accept() {
            Ok((stream, _peer)) => stream,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "accept() failed");
                continue;
            }
        };

        if let Err(rejected) = ctx.queue.try_enqueue(stream) {
            reject_with_503(rejected, &ctx.stats, &ctx.access_log);
        }
    }

    tracing::info!(report = %ctx.stats.report(), "final stats");
}
