//! In-process HTTP server for download tests.
//!
//! Serves one byte blob with enough protocol control to exercise the
//! download engine: byte ranges on or off, HEAD rejection, transient
//! failures for the first N data requests, a one-shot mid-body connection
//! drop, and permanent failures. One connection per request
//! (`Connection: close`), which also matches the engine's keep-alive-off
//! client.

// Each integration test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct TestServerBuilder {
    data: Vec<u8>,
    accept_ranges: bool,
    advertise_ranges: bool,
    reject_head: bool,
    fail_first: u32,
    fail_status: u16,
    always_fail_get: bool,
    drop_mid_body_once: bool,
}

struct Inner {
    data: Vec<u8>,
    accept_ranges: bool,
    advertise_ranges: bool,
    reject_head: bool,
    fail_remaining: AtomicU32,
    fail_status: u16,
    always_fail_get: bool,
    drop_pending: AtomicBool,
    get_count: AtomicUsize,
}

pub struct TestServer {
    inner: Arc<Inner>,
    url: String,
    accept_loop: JoinHandle<()>,
}

impl TestServerBuilder {
    /// Serve byte ranges (the default). Disabling also stops advertising
    /// them.
    pub fn accept_ranges(mut self, enabled: bool) -> Self {
        self.accept_ranges = enabled;
        self
    }

    /// Keep serving byte ranges but leave `Accept-Ranges` out of the
    /// response headers, like an origin behind a header-stripping proxy.
    pub fn advertise_ranges(mut self, enabled: bool) -> Self {
        self.advertise_ranges = enabled;
        self
    }

    /// Answer HEAD requests with 405 so probes must fall back to GET.
    pub fn reject_head(mut self) -> Self {
        self.reject_head = true;
        self
    }

    /// Answer the first `n` data GETs with 503.
    pub fn fail_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Answer every data GET with the given status.
    pub fn always_fail_get(mut self, status: u16) -> Self {
        self.always_fail_get = true;
        self.fail_status = status;
        self
    }

    /// Send only half the body of the next data GET, then drop the
    /// connection.
    pub fn drop_mid_body_once(mut self) -> Self {
        self.drop_mid_body_once = true;
        self
    }

    pub async fn start(self) -> TestServer {
        let inner = Arc::new(Inner {
            data: self.data,
            accept_ranges: self.accept_ranges,
            advertise_ranges: self.accept_ranges && self.advertise_ranges,
            reject_head: self.reject_head,
            fail_remaining: AtomicU32::new(self.fail_first),
            fail_status: if self.fail_first > 0 && !self.always_fail_get {
                503
            } else {
                self.fail_status
            },
            always_fail_get: self.always_fail_get,
            drop_pending: AtomicBool::new(self.drop_mid_body_once),
            get_count: AtomicUsize::new(0),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{}/data.bin", addr);

        let accept_inner = Arc::clone(&inner);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let inner = Arc::clone(&accept_inner);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, inner).await;
                });
            }
        });

        TestServer {
            inner,
            url,
            accept_loop,
        }
    }
}

impl TestServer {
    pub fn builder(data: Vec<u8>) -> TestServerBuilder {
        TestServerBuilder {
            data,
            accept_ranges: true,
            advertise_ranges: true,
            reject_head: false,
            fail_first: 0,
            fail_status: 500,
            always_fail_get: false,
            drop_mid_body_once: false,
        }
    }

    pub async fn serve(data: Vec<u8>) -> TestServer {
        Self::builder(data).start().await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of GET requests answered so far.
    pub fn get_count(&self) -> usize {
        self.inner.get_count.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Deterministic test payload.
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7) % 251) as u8).collect()
}

async fn handle_connection(mut stream: TcpStream, inner: Arc<Inner>) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let (method, range) = parse_request(&request);
    let total = inner.data.len();

    if method == "HEAD" {
        if inner.reject_head {
            write_status(&mut stream, 405, "Method Not Allowed").await?;
            return Ok(());
        }
        let mut head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n",
            total
        );
        if inner.advertise_ranges {
            head.push_str("Accept-Ranges: bytes\r\n");
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes()).await?;
        return Ok(());
    }

    inner.get_count.fetch_add(1, Ordering::SeqCst);

    if inner.always_fail_get {
        write_status(&mut stream, inner.fail_status, "Injected Failure").await?;
        return Ok(());
    }
    let transient = inner
        .fail_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok();
    if transient {
        write_status(&mut stream, inner.fail_status, "Injected Failure").await?;
        return Ok(());
    }

    let (status_line, start, end) = match range {
        Some((start, _)) if inner.accept_ranges && start >= total as u64 => {
            write_status(&mut stream, 416, "Range Not Satisfiable").await?;
            return Ok(());
        }
        Some((start, end)) if inner.accept_ranges => {
            let end = end.unwrap_or(total as u64 - 1).min(total as u64 - 1);
            (
                format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
                    start, end, total
                ),
                start as usize,
                end as usize,
            )
        }
        // Range ignored (or absent): plain 200 with the full body.
        _ => ("HTTP/1.1 200 OK\r\n".to_string(), 0, total - 1),
    };

    let body = &inner.data[start..=end];
    let mut head = status_line;
    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    if inner.advertise_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;

    if inner.drop_pending.swap(false, Ordering::SeqCst) {
        // Send half the promised body, then hang up.
        let half = body.len() / 2;
        stream.write_all(&body[..half]).await?;
        stream.flush().await?;
        return Ok(());
    }

    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut byte = [0u8; 512];
    loop {
        let read = stream.read(&mut byte).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&byte[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

/// Extract the method and an optional `Range: bytes=a-b` / `bytes=a-`.
fn parse_request(request: &str) -> (String, Option<(u64, Option<u64>)>) {
    let method = request
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let range = request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.eq_ignore_ascii_case("range") {
            return None;
        }
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start = start.parse::<u64>().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse::<u64>().ok()?)
        };
        Some((start, end))
    });

    (method, range)
}

async fn write_status(stream: &mut TcpStream, status: u16, text: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, text
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
