mod error;
mod framing;
mod messages;

pub use error::ProtocolError;
pub use framing::{FramedMessages, MAX_FRAME_BYTES, framed, read_message, read_message_timeout, send_message};
pub use messages::{Envelope, PROTOCOL_VERSION, SERVER_TOKEN};
