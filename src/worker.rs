//! Worker threads & the per-connection request lifecycle.
//!
//! A fixed thread per worker slot dequeues one accepted socket at a
//! time and runs the full read-parse-serve-log loop for its lifetime,
//! one iteration per request on a kept-alive connection, reading into
//! a fixed buffer until `\r\n\r\n` rather than allocating per read.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::access_log::AccessLog;
use crate::cache::FileCache;
use crate::http::{self, HttpRequest};
use crate::queue::ConnectionQueue;
use crate::stats::StatsAggregator;

/// Shared context every worker thread borrows; owned by `main` and
/// passed by reference. No hidden global singletons.
pub struct ServerContext {
    pub cache: FileCache,
    pub queue: ConnectionQueue,
    pub stats: StatsAggregator,
    pub access_log: AccessLog,
    pub document_root: std::path::PathBuf,
    pub timeout_seconds: u64,
}

/// Spawns `num_workers * threads_per_worker` OS threads, each looping
/// `dequeue -> handle_connection` until the queue reports shutdown.
pub fn spawn_workers(
    ctx: Arc<ServerContext>,
    num_workers: usize,
    threads_per_worker: usize,
) -> Vec<std::thread::JoinHandle<()>> {
    let total = num_workers * threads_per_worker;
    (0..total)
        .map(|id| {
            let ctx = ctx.clone();
            std::thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(&ctx))
                .expect("failed to spawn worker thread")
        })
        .collect()
}

fn worker_loop(ctx: &ServerContext) {
    loop {
        let Some(stream) = ctx.queue.dequeue() else {
            break;
        };
        // Fault isolation per connection: one panicking request must
        // not take down the whole process or its sibling connections.
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            handle_connection(stream, ctx);
        }));
        if let Err(panic_payload) = result {
            tracing::error!(?panic_payload, "worker panicked while handling a connection");
        }
    }
}

const REQUEST_BUFFER_CAP: usize = http::MAX_REQUEST_BUFFER;

/// Runs the full keep-alive loop for one accepted socket.
fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(ctx.timeout_seconds.max(1))));
    let peer_addr = stream.peer_addr().ok();

    let mut keep_alive = true;
    while keep_alive {
        let Some(raw_request) = read_request(&mut stream) else {
            break;
        };

        let start = Instant::now();
        ctx.stats.request_start();

        let outcome = serve_one_request(&mut stream, ctx, &raw_request);
        keep_alive = outcome.keep_alive;

        ctx.stats.request_end(outcome.status, outcome.bytes_sent, start.elapsed());
        ctx.access_log.log(
            peer_addr,
            &outcome.log_method,
            &outcome.log_path,
            &outcome.log_version,
            outcome.status,
            outcome.bytes_sent,
        );
    }
}

/// Reads from the socket until a blank line terminates the headers or
/// the buffer fills, mirroring `recv_http_request`'s loop.
fn read_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; REQUEST_BUFFER_CAP];
    let mut total = 0usize;

    loop {
        if total >= buf.len() - 1 {
            break;
        }
        let n = match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return None,
        };
        total += n;
        if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    if total == 0 {
        return None;
    }
    buf.truncate(total);
    Some(buf)
}

struct RequestOutcome {
    status: u16,
    bytes_sent: u64,
    keep_alive: bool,
    log_method: String,
    log_path: String,
    log_version: String,
}

fn serve_one_request(stream: &mut TcpStream, ctx: &ServerContext, raw: &[u8]) -> RequestOutcome {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");
    let Some(request_line) = lines.next() else {
        return respond_error(stream, 400, "Bad Request", false, "-", "-", "HTTP/1.1");
    };

    let Some(request): Option<HttpRequest> = http::parse_request_line(request_line) else {
        return respond_error(stream, 400, "Bad Request", false, "-", "-", "HTTP/1.1");
    };

    let headers = http::parse_headers(lines);
    let want_keep_alive = http::keep_alive(headers.connection.as_deref(), &request.version);

    if request.method != "GET" {
        return respond_error(
            stream,
            405,
            "Method Not Allowed",
            false,
            &request.method,
            &request.path,
            &request.version,
        );
    }

    let Some(full_path) = http::resolve_path(&ctx.document_root, &request.path) else {
        return respond_error(
            stream,
            400,
            "Bad Request",
            false,
            &request.method,
            &request.path,
            &request.version,
        );
    };

    serve_file(stream, ctx, &full_path, &request, headers.range.as_deref(), want_keep_alive)
}

fn serve_file(
    stream: &mut TcpStream,
    ctx: &ServerContext,
    full_path: &Path,
    request: &HttpRequest,
    range_header: Option<&str>,
    want_keep_alive: bool,
) -> RequestOutcome {
    let (body, was_hit) = match ctx.cache.get(full_path) {
        Ok(result) => result,
        Err(_) => {
            ctx.stats.cache_access(false);
            return respond_error(
                stream,
                404,
                "Not Found",
                false,
                &request.method,
                &request.path,
                &request.version,
            );
        }
    };
    ctx.stats.cache_access(was_hit);

    let file_size = body.len() as u64;

    if let Some(range_value) = range_header {
        return match http::parse_range(range_value, file_size) {
            Some(range) => {
                let slice = &body.as_bytes()[range.start as usize..=range.end as usize];
                let headers = http::build_response_headers(
                    206,
                    "Partial Content",
                    "application/octet-stream",
                    slice.len() as u64,
                    want_keep_alive,
                    Some((range.start, range.end, file_size)),
                );
                let sent = write_response(stream, &headers, slice);
                RequestOutcome {
                    status: 206,
                    bytes_sent: sent,
                    keep_alive: want_keep_alive,
                    log_method: request.method.clone(),
                    log_path: request.path.clone(),
                    log_version: request.version.clone(),
                }
            }
            None => respond_error(
                stream,
                416,
                "Range Not Satisfiable",
                false,
                &request.method,
                &request.path,
                &request.version,
            ),
        };
    }

    let headers = http::build_response_headers(
        200,
        "OK",
        "application/octet-stream",
        file_size,
        want_keep_alive,
        None,
    );
    let sent = write_response(stream, &headers, body.as_bytes());
    RequestOutcome {
        status: 200,
        bytes_sent: sent,
        keep_alive: want_keep_alive,
        log_method: request.method.clone(),
        log_path: request.path.clone(),
        log_version: request.version.clone(),
    }
}

fn respond_error(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    keep_alive: bool,
    method: &str,
    path: &str,
    version: &str,
) -> RequestOutcome {
    let body = http::error_body_html(status, reason);
    let headers = http::build_response_headers(status, reason, "text/html", body.len() as u64, keep_alive, None);
    let sent = write_response(stream, &headers, &body);
    RequestOutcome {
        status,
        bytes_sent: sent,
        keep_alive,
        log_method: method.to_string(),
        log_path: path.to_string(),
        log_version: version.to_string(),
    }
}

fn write_response(stream: &mut TcpStream, headers: &[u8], body: &[u8]) -> u64 {
    if stream.write_all(headers).is_err() {
        return 0;
    }
    match stream.write_all(body) {
        Ok(()) => body.len() as u64,
        Err(_) => 0,
    }
}

/// Drains the queue and, on rejection, writes a 503 directly to the
/// socket without ever entering the worker pool.
pub fn reject_with_503(mut stream: TcpStream, stats: &StatsAggregator, access_log: &AccessLog) {
    let body = http::error_body_html(503, "Service Unavailable");
    let headers =
        http::build_response_headers(503, "Service Unavailable", "text/html", body.len() as u64, false, None);
    let peer_addr = stream.peer_addr().ok();
    let _ = stream.write_all(&headers);
    let _ = stream.write_all(&body);
    stats.record_503(body.len() as u64);
    access_log.log(peer_addr, "-", "-", "HTTP/1.1", 503, body.len() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;

    fn test_context(document_root: std::path::PathBuf) -> Arc<ServerContext> {
        Arc::new(ServerContext {
            cache: FileCache::new(crate::cache::MAX_FILE_BYTES * 10),
            queue: ConnectionQueue::new(10),
            stats: StatsAggregator::new(),
            access_log: AccessLog::open(&document_root.join("../access.log")).unwrap(),
            document_root,
            timeout_seconds: 5,
        })
    }

    fn spawn_echo_server(ctx: Arc<ServerContext>) -> (std::net::SocketAddr, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                handle_connection(stream, &ctx);
            }
        });
        (addr, handle)
    }

    #[test]
    fn plain_get_returns_200_with_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hello world").unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"GET /index.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        handle.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("hello world"));
    }

    #[test]
    fn unknown_path_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"GET /missing.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        handle.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn path_traversal_returns_400() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /../../etc/passwd HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        handle.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn non_get_method_returns_405() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hi").unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"POST /index.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        handle.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn range_request_returns_206_with_exact_slice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.bin"), b"0123456789").unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /file.bin HTTP/1.1\r\nRange: bytes=2-4\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();
        handle.join().unwrap();

        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(text.contains("Content-Range: bytes 2-4/10\r\n"));
        assert!(text.ends_with("234"));
    }

    #[test]
    fn keep_alive_serves_two_requests_on_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"A").unwrap();
        std::fs::write(dir.path().join("b.html"), b"B").unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let (addr, handle) = spawn_echo_server(ctx);

        let mut client = TcpStream::connect(addr).unwrap();

        // One request at a time, matching read_request's per-call read
        // loop: each write is followed by reading that response in full
        // before the next request is sent.
        client.write_all(b"GET /a.html HTTP/1.1\r\n\r\n").unwrap();
        let mut first = [0u8; 256];
        let n = client.read(&mut first).unwrap();
        let first = String::from_utf8_lossy(&first[..n]).into_owned();

        client
            .write_all(b"GET /b.html HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut second = String::new();
        client.read_to_string(&mut second).unwrap();
        handle.join().unwrap();

        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "first response: {first}");
        assert!(first.ends_with('A'), "first response body should be a.html's content: {first}");
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"), "second response: {second}");
        assert!(second.ends_with('B'), "second response body should be b.html's content: {second}");
    }
}
