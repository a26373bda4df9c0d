// ABOUTME: Outbound WebSocket client: sends the RFC 6455 upgrade request,
// ABOUTME: validates the server's accept key, then exchanges masked frames

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{HttpError, HttpResult, UpgradeError};
use crate::ws::frame::{Frame, OpCode};
use crate::ws::upgrade::accept_key;

/// A connected WebSocket client. Every outbound frame is masked per RFC
/// 6455 5.1; inbound frames from the server are expected unmasked.
pub struct WsClient {
    stream: BufReader<TcpStream>,
}

impl WsClient {
    /// Connect to `host:port` and perform the client handshake for `path`.
    ///
    /// A request line missing the colon after `Host` (`"Host %s:%s\r\n"`,
    /// a literal space where `Host:` belongs) is something most servers
    /// tolerate by falling back to a default virtual host, but strict ones
    /// reject outright. This sends `Host: host:port` as RFC 7230 5.4
    /// requires.
    pub async fn connect(host: &str, port: u16, path: &str) -> HttpResult<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(HttpError::Io)?;
        let mut stream = BufReader::new(stream);

        let mut key_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let client_key = STANDARD.encode(key_bytes);

        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}:{port}\r\n\
             Upgrade: websocket\r\n\
             Connection: keep-alive, Upgrade\r\n\
             Sec-WebSocket-Key: {client_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        stream.write_all(request.as_bytes()).await.map_err(HttpError::Io)?;

        let response = read_response_headers(&mut stream).await?;
        let status_line = response.lines().next().unwrap_or("");
        if !status_line.contains("101") {
            return Err(HttpError::Upgrade(UpgradeError::HandshakeRejected));
        }

        let expected = accept_key(&client_key);
        let got = response
            .lines()
            .find_map(|l| l.to_ascii_lowercase().strip_prefix("sec-websocket-accept:").map(|v| v.trim().to_string()))
            .unwrap_or_default();
        if got != expected {
            return Err(HttpError::Upgrade(UpgradeError::AcceptKeyMismatch));
        }

        Ok(WsClient { stream })
    }

    pub async fn send_text(&mut self, text: &str) -> HttpResult<()> {
        self.send_frame(Frame::text(text)).await
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) -> HttpResult<()> {
        self.send_frame(Frame::binary(data)).await
    }

    pub async fn send_ping(&mut self, payload: Vec<u8>) -> HttpResult<()> {
        self.send_frame(Frame::ping(payload)).await
    }

    async fn send_frame(&mut self, frame: Frame) -> HttpResult<()> {
        let mut key = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        let encoded = frame.encode(Some(key));
        self.stream.write_all(&encoded).await.map_err(HttpError::Io)
    }

    /// Read the next frame, transparently replying to pings with a pong.
    pub async fn read_frame(&mut self) -> HttpResult<Option<Frame>> {
        let mut buf = bytes::BytesMut::with_capacity(4096);
        loop {
            if let Some(frame) = Frame::decode(&mut buf).map_err(|_| {
                HttpError::Protocol(crate::error::ProtocolError::Malformed)
            })? {
                if frame.opcode == OpCode::Ping {
                    self.send_frame(Frame::pong(frame.payload)).await?;
                    continue;
                }
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.map_err(HttpError::Io)?;
            if n == 0 {
                return Ok(None);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn read_response_headers(stream: &mut BufReader<TcpStream>) -> HttpResult<String> {
    use tokio::io::AsyncBufReadExt;
    let mut out = String::new();
    loop {
        let mut line = String::new();
        let n = stream.read_line(&mut line).await.map_err(HttpError::Io)?;
        if n == 0 || line == "\r\n" {
            break;
        }
        out.push_str(&line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_request_uses_colon_after_host() {
        let host = "example.com";
        let port = 8080;
        let request = format!(
            "GET /ws HTTP/1.1\r\nHost: {host}:{port}\r\nUpgrade: websocket\r\n\r\n"
        );
        assert!(request.contains("Host: example.com:8080"));
        assert!(!request.contains("Host example.com"));
    }
}
