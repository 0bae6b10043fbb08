//! Store context for one invocation.

/// Per-invocation state stored in Wasmtime's Store.
///
/// Holds the debug messages emitted by the loaded code. A fresh context is
/// created for every invocation and dropped with its store.
pub struct DynrunCtx {
    capture_debug: bool,
    messages: Vec<String>,
}

impl DynrunCtx {
    pub fn new(capture_debug: bool) -> Self {
        Self {
            capture_debug,
            messages: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, message: String) {
        if self.capture_debug {
            self.messages.push(message);
        }
    }

    pub(crate) fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }
}

impl Default for DynrunCtx {
    fn default() -> Self {
        Self::new(true)
    }
}
