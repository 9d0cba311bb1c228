//! Common test utilities for http-dl integration tests: a loopback HTTP
//! fixture server with range support and failure injection.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Behavior knobs for the fixture server.
#[derive(Clone, Debug)]
pub struct FixtureOptions {
    /// Advertise `Accept-Ranges: bytes` on HEAD responses
    pub accept_ranges: bool,
    /// Status code for HEAD responses
    pub head_status: u16,
    /// Force this status (with an empty body) on every ranged GET
    pub range_status: Option<u16>,
    /// Close the connection halfway through the body for the first N GETs
    pub fail_mid_body_times: usize,
    /// Restrict mid-body failures to ranged GETs starting at this offset
    pub fail_mid_body_start: Option<u64>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            accept_ranges: true,
            head_status: 200,
            range_status: None,
            fail_mid_body_times: 0,
            fail_mid_body_start: None,
        }
    }
}

/// Handle to a running fixture server.
pub struct Fixture {
    addr: std::net::SocketAddr,
    head_requests: Arc<AtomicUsize>,
    get_requests: Arc<AtomicUsize>,
    ranged_requests: Arc<AtomicUsize>,
    range_log: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Fixture {
    /// URL serving the payload under the given file name.
    pub fn url(&self, name: &str) -> String {
        format!("http://{}/{name}", self.addr)
    }

    /// Number of HEAD requests observed.
    pub fn head_requests(&self) -> usize {
        self.head_requests.load(Ordering::SeqCst)
    }

    /// Number of GET requests observed (ranged or not).
    pub fn get_requests(&self) -> usize {
        self.get_requests.load(Ordering::SeqCst)
    }

    /// Number of GET requests that carried a Range header.
    pub fn ranged_requests(&self) -> usize {
        self.ranged_requests.load(Ordering::SeqCst)
    }

    /// Every `(start, end)` range observed, in arrival order.
    pub fn observed_ranges(&self) -> Vec<(u64, u64)> {
        self.range_log.lock().unwrap().clone()
    }
}

/// Deterministic non-repeating payload for byte-exactness assertions.
pub fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// Install a test subscriber once so `RUST_LOG=debug` surfaces crate traces.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scratch files left in a directory, if any.
pub fn part_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.contains(".part"))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Start a fixture server on an ephemeral loopback port.
pub async fn start_fixture_server(payload: Vec<u8>, options: FixtureOptions) -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fixture = Fixture {
        addr,
        head_requests: Arc::new(AtomicUsize::new(0)),
        get_requests: Arc::new(AtomicUsize::new(0)),
        ranged_requests: Arc::new(AtomicUsize::new(0)),
        range_log: Arc::new(Mutex::new(Vec::new())),
    };

    let payload = Arc::new(payload);
    let remaining_failures = Arc::new(AtomicUsize::new(options.fail_mid_body_times));
    let head_requests = fixture.head_requests.clone();
    let get_requests = fixture.get_requests.clone();
    let ranged_requests = fixture.ranged_requests.clone();
    let range_log = fixture.range_log.clone();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let payload = payload.clone();
            let options = options.clone();
            let remaining_failures = remaining_failures.clone();
            let head_requests = head_requests.clone();
            let get_requests = get_requests.clone();
            let ranged_requests = ranged_requests.clone();
            let range_log = range_log.clone();

            tokio::spawn(async move {
                handle_connection(ConnectionContext {
                    socket,
                    payload,
                    options,
                    remaining_failures,
                    head_requests,
                    get_requests,
                    ranged_requests,
                    range_log,
                })
                .await;
            });
        }
    });

    fixture
}

struct ConnectionContext {
    socket: tokio::net::TcpStream,
    payload: Arc<Vec<u8>>,
    options: FixtureOptions,
    remaining_failures: Arc<AtomicUsize>,
    head_requests: Arc<AtomicUsize>,
    get_requests: Arc<AtomicUsize>,
    ranged_requests: Arc<AtomicUsize>,
    range_log: Arc<Mutex<Vec<(u64, u64)>>>,
}

async fn handle_connection(mut ctx: ConnectionContext) {
    let Some(request) = read_request_head(&mut ctx.socket).await else {
        return;
    };
    let method = request.split_whitespace().next().unwrap_or("").to_string();
    let range = parse_range_header(&request);
    let payload = &ctx.payload;

    if method == "HEAD" {
        ctx.head_requests.fetch_add(1, Ordering::SeqCst);
        let mut headers = format!("Content-Length: {}\r\n", payload.len());
        if ctx.options.accept_ranges {
            headers.push_str("Accept-Ranges: bytes\r\n");
        }
        let response = format!(
            "HTTP/1.1 {} {}\r\n{}Connection: close\r\n\r\n",
            ctx.options.head_status,
            reason_phrase(ctx.options.head_status),
            headers
        );
        ctx.socket.write_all(response.as_bytes()).await.ok();
        return;
    }

    if method != "GET" {
        let response =
            "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        ctx.socket.write_all(response.as_bytes()).await.ok();
        return;
    }

    ctx.get_requests.fetch_add(1, Ordering::SeqCst);

    if let Some((start, end)) = range {
        ctx.ranged_requests.fetch_add(1, Ordering::SeqCst);
        ctx.range_log.lock().unwrap().push((start, end));

        if let Some(status) = ctx.options.range_status {
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status,
                reason_phrase(status)
            );
            ctx.socket.write_all(response.as_bytes()).await.ok();
            return;
        }

        let end = end.min(payload.len() as u64 - 1);
        let slice = &payload[start as usize..=end as usize];
        let headers = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            slice.len(),
            start,
            end,
            payload.len()
        );

        if should_fail(&ctx.options, &ctx.remaining_failures, Some(start)) {
            ctx.socket.write_all(headers.as_bytes()).await.ok();
            ctx.socket.write_all(&slice[..slice.len() / 2]).await.ok();
            ctx.socket.flush().await.ok();
            // Dropping the socket closes the connection mid-body
            return;
        }

        ctx.socket.write_all(headers.as_bytes()).await.ok();
        ctx.socket.write_all(slice).await.ok();
        return;
    }

    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    if should_fail(&ctx.options, &ctx.remaining_failures, None) {
        ctx.socket.write_all(headers.as_bytes()).await.ok();
        ctx.socket
            .write_all(&payload[..payload.len() / 2])
            .await
            .ok();
        ctx.socket.flush().await.ok();
        return;
    }
    ctx.socket.write_all(headers.as_bytes()).await.ok();
    ctx.socket.write_all(payload).await.ok();
}

fn should_fail(
    options: &FixtureOptions,
    remaining_failures: &AtomicUsize,
    range_start: Option<u64>,
) -> bool {
    if let Some(only_start) = options.fail_mid_body_start
        && range_start != Some(only_start)
    {
        return false;
    }
    remaining_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buf).ok()
}

fn parse_range_header(request: &str) -> Option<(u64, u64)> {
    for line in request.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        return Some((start.trim().parse().ok()?, end.trim().parse().ok()?));
    }
    None
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        403 => "Forbidden",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
