//! Message-level dissection
//!
//! [`AttDissector`] turns a stream of ATT PDUs into [`MessageReport`]s,
//! updating the capture state as it goes: discovery responses populate the
//! attribute directory, Exchange MTU updates the MTU, requests and responses
//! are paired and long reads are stitched back together.

mod engine;
mod message;

pub use engine::AttDissector;
pub use message::{AttMessage, AttributeContext, Direction, MessageReport};
