use tracing::error;

/// The `rack.errors` stream.
///
/// Applications report diagnostics through it; every write becomes a
/// `tracing` event under the `rack.errors` target, tagged with the request
/// it belongs to.
#[derive(Debug, Clone, Default)]
pub struct RackErrors {
    method: String,
    path: String,
}

impl RackErrors {
    pub fn new<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self { method: method.into(), path: path.into() }
    }

    pub fn puts(&self, message: &str) {
        error!(target: "rack.errors", method = %self.method, path = %self.path, "{}", message.trim_end_matches('\n'));
    }

    /// Logs `bytes` and reports them all as written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if !bytes.is_empty() {
            self.puts(&String::from_utf8_lossy(bytes));
        }
        bytes.len()
    }

    /// Writes are not buffered, so this does nothing.
    pub fn flush(&self) {}
}
