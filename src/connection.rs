// ABOUTME: Drives one accepted connection end to end: reads bytes into the
// ABOUTME: session's stream, feeds the parser, dispatches to the handler, and
// ABOUTME: writes responses, looping for keep-alive and resetting in between

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{HttpError, HttpResult, ProtocolError};
use crate::http::session::SessionState;
use crate::http::{Session, TokenKind};
use crate::transport::Transport;

/// Opaque per-connection identifier handed to `Server`'s lifecycle callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[instrument(skip(transport, config), fields(conn = id.0))]
pub async fn drive<T: Transport>(id: ConnectionId, mut transport: T, config: Arc<Config>) {
    let mut session = Session::new(
        config.request_buf_size,
        config.request_buf_max_size,
        config.request_max_header_count,
        config.request_token_max_len,
    );
    session.state = SessionState::Read;

    loop {
        match run_one_request(&mut session, &mut transport, &config).await {
            Ok(keep_going) => {
                if !keep_going {
                    break;
                }
                session.reset_for_next_request();
                session.state = SessionState::Read;
            }
            Err(HttpError::Timeout) => {
                debug!("connection timed out");
                break;
            }
            Err(e) => {
                warn!(error = %e, "connection error");
                break;
            }
        }
    }
}

/// Read, parse, and respond to exactly one request. Returns `Ok(true)` if
/// the connection should be kept alive for another request.
async fn run_one_request<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    config: &Config,
) -> HttpResult<bool> {
    let timeout = Duration::from_secs(config.request_timeout_sec.max(1));

    loop {
        let tok = tokio::time::timeout(timeout, read_next_token(session, transport))
            .await
            .map_err(|_| HttpError::Timeout)??;

        session.record_token(tok);

        match tok.kind {
            TokenKind::Error => {
                session.set_status(400)?;
                session.set_response_body(b"Bad Request");
                session.mark_end_session();
                session.response_end();
                write_pending(session, transport).await?;
                return Ok(false);
            }
            TokenKind::Body | TokenKind::BodyStream => {
                config.handler.on_body(session).await;
            }
            TokenKind::ChunkBody => {
                config.handler.on_chunk(session).await;
            }
            TokenKind::ReqEnd => {
                if session.state == SessionState::Write {
                    write_pending(session, transport).await?;
                }
                return Ok(session.should_keep_alive());
            }
            _ => {}
        }

        if session.state == SessionState::Write {
            write_pending(session, transport).await?;
        }
    }
}

/// Drive the parser FSM until it yields a non-empty token, reading more
/// bytes off the transport (growing the buffer as needed) whenever the
/// parser runs out of buffered input.
async fn read_next_token<T: Transport>(
    session: &mut Session,
    transport: &mut T,
) -> HttpResult<crate::http::Token> {
    loop {
        let tok = session.fsm.next_token(&mut session.stream);
        if !tok.is_none() {
            return Ok(tok);
        }
        if !session.stream.grow_if_full() {
            return Err(HttpError::Protocol(ProtocolError::TokenTooLong));
        }
        let n = transport
            .read(session.stream.writable_mut())
            .await
            .map_err(HttpError::Io)?;
        if n == 0 {
            return Err(HttpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            )));
        }
        session.stream.commit_written(n);
    }
}

async fn write_pending<T: Transport>(session: &mut Session, transport: &mut T) -> HttpResult<()> {
    let pending = session.take_pending_write();
    if !pending.is_empty() {
        transport.write_all(&pending).await.map_err(HttpError::Io)?;
    }
    session.state = SessionState::Read;
    Ok(())
}
