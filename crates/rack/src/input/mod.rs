//! The `rack.input` stream and the body sources behind it.
//!
//! A [`RackInput`] adapts one request body for application code. It never
//! touches the network itself: bytes come from a [`BodySource`] chosen by
//! the environment builder.
//!
//! # Sources
//!
//! - [`StreamSource`]: forward only, rewinds only before the first read
//! - [`SeekableSource`]: anything that can seek back to the body start
//! - [`BufferedSource`]: records a forward only body in memory, then in a
//!   temp file, so it can be replayed any number of times
//!
//! # Errors
//!
//! Every I/O fault, including an unsupported rewind, surfaces as
//! [`InputError`] carrying the underlying [`std::io::Error`].

mod buffered;
mod error;
mod rack_input;
mod source;

pub use buffered::BufferedSource;
pub use buffered::DEFAULT_MEMORY_THRESHOLD;
pub use error::InputError;
pub use rack_input::RackInput;
pub use rack_input::DEFAULT_READ_CHUNK_SIZE;
pub use rack_input::MAX_READ_LENGTH;
pub use source::BodySource;
pub use source::SeekableSource;
pub use source::StreamSource;

#[cfg(test)]
pub(crate) use source::MockBodySource;
