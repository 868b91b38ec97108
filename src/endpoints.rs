//! Endpoint server for exposing metrics and health checks

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::metrics::metrics;

fn response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Route a raw request line to a full HTTP response
pub fn route(request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    match path {
        "/metrics" => response("200 OK", "text/plain; version=0.0.4", &metrics().render()),
        "/health" => response("200 OK", "text/plain", "ok"),
        _ => response("404 Not Found", "text/plain", "not found"),
    }
}

async fn serve(mut socket: TcpStream) {
    let mut buf = [0u8; 1024];
    match socket.read(&mut buf).await {
        Ok(n) => {
            let request = String::from_utf8_lossy(&buf[..n]);
            if let Err(e) = socket.write_all(route(&request).as_bytes()).await {
                tracing::debug!(error = %e, "Failed to write response");
            }
        }
        Err(e) => tracing::error!("Failed to read from socket: {}", e),
    }
}

/// Serve `/metrics` and `/health` until shutdown
pub async fn endpoint_server(port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Metrics endpoint listening on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    tokio::spawn(serve(socket));
                }
                Err(e) => tracing::error!("Failed to accept connection: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}
