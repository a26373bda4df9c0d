// ABOUTME: WebSocket support: the server-side upgrade handshake, the client
// ABOUTME: handshake for outbound connections, and the RFC 6455 frame codec

pub mod client;
pub mod frame;
pub mod upgrade;

pub use client::WsClient;
pub use frame::{Frame, OpCode};
pub use upgrade::{accept_key, negotiate, run_frame_loop, WsHandshake, WsMessageHandler};
