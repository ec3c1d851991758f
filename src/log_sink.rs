/// Sink interface through which the orchestrator reports progress. Kept as a
/// trait (rather than calling `log::info!` directly from orchestration code)
/// so tests can assert on what would have been logged without capturing
/// stdout or depending on global logger state.
pub trait LogSink {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Production sink: forwards to the `log` facade, wired to `env_logger` by
/// the binary's `main`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdLogSink;

impl LogSink for StdLogSink {
    fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

#[cfg(test)]
pub use test_support::RecordingSink;

#[cfg(test)]
mod test_support {
    use super::LogSink;
    use std::cell::RefCell;

    /// Test-only sink that records every call so orchestrator tests can
    /// assert a warning was emitted (e.g. the full-transfer fallback)
    /// without scraping log output.
    #[derive(Default)]
    pub struct RecordingSink {
        pub info: RefCell<Vec<String>>,
        pub warn: RefCell<Vec<String>>,
        pub error: RefCell<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn info(&self, msg: &str) {
            self.info.borrow_mut().push(msg.to_string());
        }

        fn warn(&self, msg: &str) {
            self.warn.borrow_mut().push(msg.to_string());
        }

        fn error(&self, msg: &str) {
            self.error.borrow_mut().push(msg.to_string());
        }
    }
}
