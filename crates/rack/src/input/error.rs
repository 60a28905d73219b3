use std::io;
use thiserror::Error;

/// The single failure kind of [`RackInput`](super::RackInput).
///
/// Every fault raised by the underlying body source, including a rewind the
/// source cannot honor, is carried here unchanged and exposed through
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
#[error("rack input io error: {source}")]
pub struct InputError {
    #[from]
    source: io::Error,
}

impl InputError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self { source: e.into() }
    }

    pub(crate) fn closed() -> Self {
        Self::io(io::Error::new(io::ErrorKind::NotConnected, "rack input is closed"))
    }

    /// The kind of the originating io error.
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn get_ref(&self) -> &io::Error {
        &self.source
    }

    pub fn into_inner(self) -> io::Error {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn keeps_io_cause() {
        let error = InputError::io(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));

        assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(error.source().unwrap().to_string(), "peer reset");
        assert_eq!(error.to_string(), "rack input io error: peer reset");
    }

    #[test]
    fn closed_is_not_connected() {
        assert_eq!(InputError::closed().kind(), io::ErrorKind::NotConnected);
    }
}
