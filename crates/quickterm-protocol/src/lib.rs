//! quickterm-protocol: the JSON frames spoken between client, broker and
//! daemon over local Unix sockets.
//!
//! One frame per line. Every hop uses the same three shapes: `req`, `res`
//! and `event` (see [`frames`]). The method names live in [`methods`] and
//! their parameter payloads in [`messages`].

pub mod codec;
pub mod error;
pub mod frames;
pub mod messages;
pub mod methods;

pub use error::{ProtocolError, Result};
pub use frames::{ErrorShape, EventFrame, InboundFrame, ReqFrame, ResFrame};
