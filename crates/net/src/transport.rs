//! Transport seam
//!
//! The engines drive boxed duplex byte streams, so a caller can hand over
//! any already-established stream in place of plain TCP: a TLS session, an
//! in-memory duplex pipe for tests, a unix socket. Credential handling for
//! secured streams stays entirely outside this crate.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Duplex byte stream the engines can drive
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// An owned duplex stream of any concrete type
pub type BoxedStream = Box<dyn Duplex>;

/// Read half of a split stream
pub type StreamReader = ReadHalf<BoxedStream>;

/// Write half of a split stream
pub type StreamWriter = WriteHalf<BoxedStream>;

/// Write half shared between an engine and its peer handles; the mutex is
/// the per-peer send lock, keeping each frame write atomic.
pub type SharedWriter = Arc<Mutex<StreamWriter>>;

/// Split a stream into its read half and a shareable write half
pub fn split(stream: BoxedStream) -> (StreamReader, SharedWriter) {
    let (reader, writer) = tokio::io::split(stream);
    (reader, Arc::new(Mutex::new(writer)))
}
