// ABOUTME: Server-side WebSocket upgrade: validate the handshake headers,
// ABOUTME: derive Sec-WebSocket-Accept, and drive the post-101 frame exchange

use std::collections::VecDeque;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HttpError, HttpResult, UpgradeError};
use crate::http::Session;
use crate::transport::Transport;
use crate::ws::frame::{Frame, OpCode};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`:
/// base64(SHA-1(key ++ the RFC 6455 magic GUID)).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validate an upgrade request's headers and, if they check out, compute
/// the handshake response headers to stage onto `session`. Leaves the
/// session unmodified and returns an error on any request that isn't a
/// valid WebSocket upgrade; the caller decides how to surface that (a 400,
/// or just routing the request down the ordinary HTTP path instead).
pub fn negotiate(session: &Session) -> Result<WsHandshake, UpgradeError> {
    let upgrade = session.request_header("upgrade").unwrap_or("");
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(UpgradeError::NotAWebSocketRequest);
    }
    let version = session.request_header("sec-websocket-version").unwrap_or("");
    if version != "13" {
        return Err(UpgradeError::UnsupportedVersion);
    }
    let key = session
        .request_header("sec-websocket-key")
        .ok_or(UpgradeError::MissingKey)?;
    let protocol = session.request_header("sec-websocket-protocol").map(str::to_string);

    Ok(WsHandshake {
        accept: accept_key(key),
        protocol,
    })
}

pub struct WsHandshake {
    pub accept: String,
    pub protocol: Option<String>,
}

impl WsHandshake {
    /// Stage the `101 Switching Protocols` response on `session`, ready for
    /// the connection driver to write before handing the socket to
    /// `run_frame_loop`.
    pub fn apply(&self, session: &mut Session) -> Result<(), crate::error::ProtocolError> {
        session.set_status(101)?;
        session.set_response_header("upgrade", "websocket");
        session.set_response_header("connection", "Upgrade");
        session.set_response_header("sec-websocket-accept", &self.accept);
        if let Some(p) = &self.protocol {
            session.set_response_header("sec-websocket-protocol", p);
        }
        session.clear_response_body();
        Ok(())
    }
}

/// Handler invoked once per complete, non-control message received over an
/// upgraded connection.
#[async_trait::async_trait]
pub trait WsMessageHandler: Send + Sync {
    async fn on_message(&self, opcode: OpCode, payload: &[u8]);
}

/// Drives the post-handshake frame exchange for one upgraded connection.
/// Incoming data frames are queued in a `VecDeque` and handed to the
/// handler outside the read loop, one at a time, in arrival order.
///
/// A hand-rolled singly linked queue whose append walks to the tail with
/// the wrong loop variable (`while (mm->next) mm = m->next;`) writes every
/// message after the first to `messages->next` again instead of the true
/// tail, silently dropping all but the two most recent messages.
/// `VecDeque::push_back` is append-only and can't reproduce that bug.
pub async fn run_frame_loop<T: Transport>(
    mut transport: T,
    handler: &dyn WsMessageHandler,
) -> HttpResult<()> {
    let mut read_buf = bytes::BytesMut::with_capacity(4096);
    let mut queue: VecDeque<Frame> = VecDeque::new();

    loop {
        while let Some(frame) = Frame::decode(&mut read_buf).map_err(|_| {
            HttpError::Protocol(crate::error::ProtocolError::Malformed)
        })? {
            queue.push_back(frame);
        }

        while let Some(frame) = queue.pop_front() {
            match frame.opcode {
                OpCode::Close => {
                    let _ = transport.write_all(&Frame::close(1000, "").encode(None)).await;
                    return Ok(());
                }
                OpCode::Ping => {
                    transport
                        .write_all(&Frame::pong(frame.payload).encode(None))
                        .await
                        .map_err(HttpError::Io)?;
                }
                OpCode::Pong => {}
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    handler.on_message(frame.opcode, &frame.payload).await;
                }
            }
        }

        let mut chunk = [0u8; 4096];
        let n = transport.read(&mut chunk).await.map_err(HttpError::Io)?;
        if n == 0 {
            return Ok(());
        }
        read_buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // RFC 6455 section 1.3's worked example.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
