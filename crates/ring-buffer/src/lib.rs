//! Bounded Ring Buffer
//!
//! Fixed-capacity FIFO storage used for short per-frame history windows
//! (eye-count smoothing) and decimated session timelines.

mod buffer;

pub use buffer::RingBuffer;
