//! Buffer model
//!
//! [`ReadBuffer`] is a cursor over bytes already received; [`WriteBuffer`] is
//! the growable target of an encode. Both are leaf types used by the codecs
//! and the reactor.

mod read;
mod search;
mod write;

pub use read::ReadBuffer;
pub use search::SearchStrategy;
pub use write::WriteBuffer;
