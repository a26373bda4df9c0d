// ABOUTME: The HTTP/1.1 parsing core: byte classifier, coupled FSMs, the
// ABOUTME: growable read buffer, response serialization, and the session driver

pub mod classifier;
pub mod fsm;
pub mod response;
pub mod session;
pub mod stream;
pub mod token;

pub use fsm::ParserFsm;
pub use response::{status_text, ResponseBuilder};
pub use session::{RequestHandler, Session, SessionState};
pub use stream::ReadStream;
pub use token::{Token, TokenKind};
