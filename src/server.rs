use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info};

use crate::http::{reason_phrase, Body, HttpVersion, Request, Response};
use crate::router::Router;

const MAX_REQUEST_LINE: usize = 8192;
const MAX_BODY_SIZE: usize = 1024 * 1024;
const FILE_CHUNK: usize = 8192;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Bind the listen socket. This is the only fatal error in the core; it
/// propagates out of main.
pub async fn bind(address: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(format!("{address}:{port}")).await?;
    info!(address, port, "server listening");
    Ok(listener)
}

/// Accept loop. Runs until SIGINT/SIGTERM; each connection gets its own
/// task. In-flight responses may be truncated at shutdown.
pub async fn run(listener: TcpListener, router: Arc<Router>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(handle_connection(stream, Arc::clone(&router)));
                    }
                    Err(err) => {
                        error!(error = %err, "accept failed");
                        continue;
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping server");
                SHUTDOWN.store(true, Ordering::Relaxed);
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_connection(mut stream: TcpStream, router: Arc<Router>) {
    loop {
        if SHUTDOWN.load(Ordering::Relaxed) {
            break;
        }

        let request = match read_request(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => break, // connection closed
            Err(ReadError::Malformed(response)) => {
                let _ = write_response(&mut stream, response).await;
                break;
            }
            Err(ReadError::Io(_)) => break,
        };

        let keep_alive = request.keep_alive;
        let response = router.global_router(&request).await;
        if let Err(err) = write_response(&mut stream, response).await {
            debug!(error = %err, "failed to write response");
            break;
        }

        if !keep_alive {
            break;
        }
    }

    let _ = stream.shutdown().await;
}

enum ReadError {
    Io(io::Error),
    Malformed(Response),
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        ReadError::Io(err)
    }
}

/// Read one request off the socket. Ok(None) means the peer closed between
/// requests; Malformed carries the error response to send before closing.
async fn read_request(stream: &mut TcpStream) -> Result<Option<Request>, ReadError> {
    let mut reader = BufReader::new(stream);

    // Request line.
    let mut request_line = String::with_capacity(128);
    loop {
        request_line.clear();
        let n = reader.read_line(&mut request_line).await?;
        if n == 0 {
            return Ok(None);
        }
        if n > MAX_REQUEST_LINE {
            return Err(ReadError::Malformed(Response::new(413, HttpVersion::Http11)));
        }
        // Tolerate a blank line between keep-alive requests.
        if !request_line.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let (method, target, version_token) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if parts.next().is_none() => {
            (method.to_string(), target.to_string(), version)
        }
        _ => {
            return Err(ReadError::Malformed(
                Response::new(400, HttpVersion::Http11).with_text("Malformed request"),
            ))
        }
    };

    let Some(version) = HttpVersion::parse(version_token) else {
        return Err(ReadError::Malformed(
            Response::new(400, HttpVersion::Http11).with_text("Malformed request"),
        ));
    };

    let mut request = Request::new(&method, &target, version);

    // Headers, names lowercased.
    let mut line = String::with_capacity(256);
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            request
                .headers
                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    request.keep_alive = match request.header("connection") {
        Some(value) if value.eq_ignore_ascii_case("close") => false,
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
        _ => version.default_keep_alive(),
    };

    // Body, when Content-Length says there is one.
    let content_length: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > 0 {
        if content_length > MAX_BODY_SIZE {
            return Err(ReadError::Malformed(Response::new(413, version)));
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        request.body = String::from_utf8_lossy(&body).into_owned();
    }

    Ok(Some(request))
}

/// Write status line, headers and the tagged body. File bodies stream in
/// fixed-size chunks.
async fn write_response(stream: &mut TcpStream, response: Response) -> io::Result<()> {
    let mut head = String::with_capacity(256);
    head.push_str(response.version.as_str());
    head.push(' ');
    head.push_str(&response.status.to_string());
    head.push(' ');
    head.push_str(reason_phrase(response.status));
    head.push_str("\r\n");

    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    if let Some(len) = response.body.content_length() {
        head.push_str("Content-Length: ");
        head.push_str(&len.to_string());
        head.push_str("\r\n");
    }

    head.push_str("Connection: ");
    head.push_str(if response.keep_alive { "keep-alive" } else { "close" });
    head.push_str("\r\n\r\n");

    stream.write_all(head.as_bytes()).await?;

    match response.body {
        Body::Text(text) => stream.write_all(text.as_bytes()).await?,
        Body::Empty => {}
        Body::File { mut file, len } => {
            let mut remaining = len;
            let mut buffer = [0u8; FILE_CHUNK];
            while remaining > 0 {
                let want = remaining.min(FILE_CHUNK as u64) as usize;
                let n = file.read(&mut buffer[..want]).await?;
                if n == 0 {
                    break;
                }
                stream.write_all(&buffer[..n]).await?;
                remaining -= n as u64;
            }
        }
    }

    stream.flush().await
}
