//! Line assembly
//!
//! Turns the arbitrarily chunked text coming off a serial link into
//! printable display lines. `escape` renders control characters as
//! readable mnemonics, `frame` reassembles lines across chunk boundaries.

pub mod escape;
pub mod frame;

pub use escape::{escape, escape_char};
pub use frame::FrameBuffer;
