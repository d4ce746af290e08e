//! MJPEG (`multipart/x-mixed-replace`) stream client
//!
//! Minimal HTTP client for the motion-JPEG endpoints that IP webcam apps
//! expose (e.g. `http://192.168.1.244:8080/video`): one GET request, then an
//! endless multipart response where every part is a JPEG frame.
//!
//! The parser is generic over `AsyncRead` so tests can drive it with a
//! canned byte stream.

use super::{Frame, FrameSource, FrameSourceFactory};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MjpegError {
    #[error("unsupported camera URL '{0}' (expected http://host[:port]/path)")]
    BadLocator(String),

    #[error("connection to {0} timed out after {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("camera returned '{0}'")]
    HttpStatus(String),

    #[error("camera stream is not multipart MJPEG (Content-Type: '{0}')")]
    NotMultipart(String),

    #[error("multipart frame is missing a Content-Length header")]
    MissingLength,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opens MJPEG streams over plain TCP.
pub struct MjpegFactory {
    connect_timeout: Duration,
}

impl MjpegFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl FrameSourceFactory for MjpegFactory {
    async fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>> {
        let (host, port, path) = parse_http_locator(locator)?;
        let addr = format!("{host}:{port}");

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MjpegError::ConnectTimeout(addr.clone(), self.connect_timeout))?
            .map_err(MjpegError::Io)?;

        let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(MjpegError::Io)?;

        let source = MjpegSource::handshake(stream).await?;
        info!("📷 Connected to MJPEG stream at {}", locator);
        Ok(Box::new(source))
    }
}

/// An established MJPEG stream.
#[derive(Debug)]
pub struct MjpegSource<R> {
    stream: BufReader<R>,
    boundary: String,
}

impl<R: AsyncRead + Unpin + Send> MjpegSource<R> {
    /// Consume the HTTP response head and locate the multipart boundary.
    pub(crate) async fn handshake(inner: R) -> Result<Self, MjpegError> {
        let mut stream = BufReader::new(inner);

        let status = match read_line(&mut stream).await? {
            Some(line) => line,
            None => return Err(MjpegError::HttpStatus("empty response".to_string())),
        };
        if !is_http_ok(&status) {
            return Err(MjpegError::HttpStatus(status));
        }

        let mut content_type = String::new();
        loop {
            let line = match read_line(&mut stream).await? {
                Some(line) => line,
                None => break,
            };
            if line.is_empty() {
                break;
            }
            if let Some(value) = header_value(&line, "content-type") {
                content_type = value;
            }
        }

        let boundary = parse_boundary(&content_type)
            .ok_or_else(|| MjpegError::NotMultipart(content_type.clone()))?;
        debug!("MJPEG handshake complete (boundary: {})", boundary);

        Ok(Self { stream, boundary })
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, MjpegError> {
        // Skip to the next boundary line (also eats the CRLF that trails the
        // previous part's body).
        loop {
            let line = match read_line(&mut self.stream).await? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line == format!("--{}--", self.boundary) {
                // Closing boundary: clean end of stream
                return Ok(None);
            }
            if line == format!("--{}", self.boundary) || line == self.boundary {
                break;
            }
        }

        // Part headers
        let mut length: Option<usize> = None;
        loop {
            let line = match read_line(&mut self.stream).await? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.is_empty() {
                break;
            }
            if let Some(value) = header_value(&line, "content-length") {
                length = value.trim().parse().ok();
            }
        }

        let len = length.ok_or(MjpegError::MissingLength)?;
        let mut body = vec![0u8; len];
        match self.stream.read_exact(&mut body).await {
            Ok(_) => {}
            // Stream dropped mid-frame: report end-of-stream, not an error
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(Some(Frame {
            data: Bytes::from(body),
            captured_at: Instant::now(),
        }))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for MjpegSource<R> {
    async fn read(&mut self) -> Result<Option<Frame>> {
        Ok(self.read_frame().await?)
    }
}

/// Split `http://host[:port]/path` into its parts. Only plain HTTP is
/// supported; IP webcam feeds are local-network HTTP.
fn parse_http_locator(locator: &str) -> Result<(String, u16, String), MjpegError> {
    let rest = locator
        .strip_prefix("http://")
        .ok_or_else(|| MjpegError::BadLocator(locator.to_string()))?;

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| MjpegError::BadLocator(locator.to_string()))?;
            (host, port)
        }
        None => (host_port, 80),
    };

    if host.is_empty() {
        return Err(MjpegError::BadLocator(locator.to_string()));
    }

    Ok((host.to_string(), port, path))
}

fn is_http_ok(status_line: &str) -> bool {
    // "HTTP/1.1 200 OK" / "HTTP/1.0 200"
    status_line
        .split_whitespace()
        .nth(1)
        .map_or(false, |code| code == "200")
}

/// Case-insensitive `Name: value` header lookup.
fn header_value(line: &str, name: &str) -> Option<String> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim().to_string())
    } else {
        None
    }
}

/// Extract the boundary token from a multipart Content-Type value.
fn parse_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let media_type = parts.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/x-mixed-replace") {
        return None;
    }
    for param in parts {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            // Some servers put the leading dashes in the parameter itself
            return Some(value.trim_start_matches("--").to_string());
        }
    }
    None
}

/// Read one CRLF-terminated line, tolerating non-UTF-8 bytes.
/// Returns `None` at end of stream.
async fn read_line<R: AsyncRead + Unpin>(
    stream: &mut BufReader<R>,
) -> Result<Option<String>, std::io::Error> {
    let mut buf = Vec::new();
    let n = stream.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
