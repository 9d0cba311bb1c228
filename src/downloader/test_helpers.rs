//! Shared test helpers: a loopback HTTP fixture server speaking just enough
//! HTTP/1.1 to exercise HEAD probing, ranged GETs, and failure injection.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Behavior knobs for the fixture server.
#[derive(Clone, Debug)]
pub(crate) struct FixtureOptions {
    /// Advertise `Accept-Ranges: bytes` on HEAD responses
    pub(crate) accept_ranges: bool,
    /// Leave `Content-Length` off the HEAD response
    pub(crate) omit_content_length: bool,
    /// Status code for HEAD responses
    pub(crate) head_status: u16,
    /// Force this status (with an empty body) on every ranged GET
    pub(crate) range_status: Option<u16>,
    /// Close the connection halfway through the body for the first N GETs
    pub(crate) fail_mid_body_times: usize,
    /// Restrict mid-body failures to ranged GETs starting at this offset
    pub(crate) fail_mid_body_start: Option<u64>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            accept_ranges: true,
            omit_content_length: false,
            head_status: 200,
            range_status: None,
            fail_mid_body_times: 0,
            fail_mid_body_start: None,
        }
    }
}

/// Handle to a running fixture server.
pub(crate) struct Fixture {
    addr: std::net::SocketAddr,
    head_requests: Arc<AtomicUsize>,
    get_requests: Arc<AtomicUsize>,
    ranged_requests: Arc<AtomicUsize>,
    range_log: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Fixture {
    /// URL serving the payload under the given file name.
    pub(crate) fn url(&self, name: &str) -> String {
        format!("http://{}/{name}", self.addr)
    }

    /// Number of HEAD requests observed.
    pub(crate) fn head_requests(&self) -> usize {
        self.head_requests.load(Ordering::SeqCst)
    }

    /// Number of GET requests observed (ranged or not).
    pub(crate) fn get_requests(&self) -> usize {
        self.get_requests.load(Ordering::SeqCst)
    }

    /// Number of GET requests that carried a Range header.
    pub(crate) fn ranged_requests(&self) -> usize {
        self.ranged_requests.load(Ordering::SeqCst)
    }

    /// Every `(start, end)` range observed, in arrival order.
    pub(crate) fn observed_ranges(&self) -> Vec<(u64, u64)> {
        self.range_log.lock().unwrap().clone()
    }
}

/// Deterministic non-repeating payload for byte-exactness assertions.
pub(crate) fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// Start a fixture server on an ephemeral loopback port.
pub(crate) async fn start_fixture_server(payload: Vec<u8>, options: FixtureOptions) -> Fixture {
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
                handle_connection(
                    socket,
                    &payload,
                    &options,
                    &remaining_failures,
                    &head_requests,
                    &get_requests,
                    &ranged_requests,
                    &range_log,
                )
                .await;
            });
        }
    });

    fixture
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    payload: &[u8],
    options: &FixtureOptions,
    remaining_failures: &AtomicUsize,
    head_requests: &AtomicUsize,
    get_requests: &AtomicUsize,
    ranged_requests: &AtomicUsize,
    range_log: &Mutex<Vec<(u64, u64)>>,
) {
    let Some(request) = read_request_head(&mut socket).await else {
        return;
    };
    let method = request.split_whitespace().next().unwrap_or("").to_string();
    let range = parse_range_header(&request);

    if method == "HEAD" {
        head_requests.fetch_add(1, Ordering::SeqCst);
        let mut headers = String::new();
        if !options.omit_content_length {
            headers.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        }
        if options.accept_ranges {
            headers.push_str("Accept-Ranges: bytes\r\n");
        }
        let response = format!(
            "HTTP/1.1 {} {}\r\n{}Connection: close\r\n\r\n",
            options.head_status,
            reason_phrase(options.head_status),
            headers
        );
        socket.write_all(response.as_bytes()).await.ok();
        return;
    }

    if method != "GET" {
        let response = "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        socket.write_all(response.as_bytes()).await.ok();
        return;
    }

    get_requests.fetch_add(1, Ordering::SeqCst);

    if let Some((start, end)) = range {
        ranged_requests.fetch_add(1, Ordering::SeqCst);
        range_log.lock().unwrap().push((start, end));

        if let Some(status) = options.range_status {
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status,
                reason_phrase(status)
            );
            socket.write_all(response.as_bytes()).await.ok();
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

        if should_fail(options, remaining_failures, Some(start)) {
            socket.write_all(headers.as_bytes()).await.ok();
            socket.write_all(&slice[..slice.len() / 2]).await.ok();
            socket.flush().await.ok();
            // Dropping the socket here closes the connection mid-body
            return;
        }

        socket.write_all(headers.as_bytes()).await.ok();
        socket.write_all(slice).await.ok();
        return;
    }

    // Plain GET: full payload
    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    if should_fail(options, remaining_failures, None) {
        socket.write_all(headers.as_bytes()).await.ok();
        socket.write_all(&payload[..payload.len() / 2]).await.ok();
        socket.flush().await.ok();
        return;
    }
    socket.write_all(headers.as_bytes()).await.ok();
    socket.write_all(payload).await.ok();
}

/// Consume one failure token if this request matches the failure filter.
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

/// Read until the end of the request head; requests here never carry bodies.
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

/// Extract `(start, end)` from a `Range: bytes=a-b` header, if present.
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
