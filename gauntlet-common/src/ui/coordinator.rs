//! The process-wide output coordinator.
//!
//! Live command output and the progress indicator share one terminal. Every
//! line of live output goes through [`OutputCoordinator::write_line`], which
//! holds the coordinator mutex, pauses an attached running indicator (this
//! clears its line), writes the text, and resumes the indicator. The result
//! is an atomic, serialized interleave: no line is ever torn by a spinner
//! frame.
//!
//! The coordinator and the debug-mode flag are the only two process globals
//! in the harness; both are initialized on first use.

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use super::progress::Spinner;
use super::StreamKind;

/// A sink the coordinator writes into. Stdout/stderr in production,
/// capture buffers in tests.
pub trait LineSink: Send {
    fn write_line(&mut self, text: &str);
}

struct StdSink(StreamKind);

impl LineSink for StdSink {
    fn write_line(&mut self, text: &str) {
        match self.0 {
            StreamKind::Stdout => {
                let mut out = std::io::stdout();
                let _ = writeln!(out, "{text}");
                let _ = out.flush();
            }
            StreamKind::Stderr => {
                let mut out = std::io::stderr();
                let _ = writeln!(out, "{text}");
                let _ = out.flush();
            }
        }
    }
}

struct CoordinatorInner {
    indicator: Option<Arc<Spinner>>,
    stdout: Box<dyn LineSink>,
    stderr: Box<dyn LineSink>,
}

/// Serializes live output against the active progress indicator.
pub struct OutputCoordinator {
    inner: Mutex<CoordinatorInner>,
}

impl OutputCoordinator {
    fn new() -> Self {
        Self::with_sinks(
            Box::new(StdSink(StreamKind::Stdout)),
            Box::new(StdSink(StreamKind::Stderr)),
        )
    }

    /// Build a coordinator with custom sinks. Only tests need this; the
    /// process-wide instance always writes to the standard streams.
    pub fn with_sinks(stdout: Box<dyn LineSink>, stderr: Box<dyn LineSink>) -> Self {
        Self {
            inner: Mutex::new(CoordinatorInner {
                indicator: None,
                stdout,
                stderr,
            }),
        }
    }

    /// Register the indicator for the task currently drawing.
    pub fn attach_indicator(&self, indicator: Arc<Spinner>) {
        self.inner.lock().unwrap().indicator = Some(indicator);
    }

    /// Remove the active indicator reference.
    pub fn detach_indicator(&self) {
        self.inner.lock().unwrap().indicator = None;
    }

    /// Write one line to the requested stream, pausing and resuming any
    /// attached running indicator around the write.
    pub fn write_line(&self, stream: StreamKind, text: &str) {
        let mut inner = self.inner.lock().unwrap();

        let paused = match &inner.indicator {
            Some(indicator) if indicator.is_running() => {
                indicator.pause();
                Some(Arc::clone(indicator))
            }
            _ => None,
        };

        match stream {
            StreamKind::Stdout => inner.stdout.write_line(text),
            StreamKind::Stderr => inner.stderr.write_line(text),
        }

        if let Some(indicator) = paused {
            indicator.resume();
        }
    }
}

static COORDINATOR: OnceLock<OutputCoordinator> = OnceLock::new();

/// The process-wide coordinator singleton.
pub fn coordinator() -> &'static OutputCoordinator {
    COORDINATOR.get_or_init(OutputCoordinator::new)
}

static DEBUG_MODE: RwLock<bool> = RwLock::new(false);

/// Enable or disable live streaming of command output.
pub fn set_debug(enabled: bool) {
    *DEBUG_MODE.write().unwrap() = enabled;
}

/// True when command output should stream to the terminal as it arrives.
pub fn debug_enabled() -> bool {
    *DEBUG_MODE.read().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl LineSink for SharedSink {
        fn write_line(&mut self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn writes_go_to_the_requested_stream() {
        let out = SharedSink::default();
        let err = SharedSink::default();
        let coordinator =
            OutputCoordinator::with_sinks(Box::new(out.clone()), Box::new(err.clone()));

        coordinator.write_line(StreamKind::Stdout, "to stdout");
        coordinator.write_line(StreamKind::Stderr, "to stderr");

        assert_eq!(out.0.lock().unwrap().as_slice(), ["to stdout"]);
        assert_eq!(err.0.lock().unwrap().as_slice(), ["to stderr"]);
    }

    #[test]
    fn concurrent_writes_are_never_torn() {
        let out = SharedSink::default();
        let coordinator = Arc::new(OutputCoordinator::with_sinks(
            Box::new(out.clone()),
            Box::new(SharedSink::default()),
        ));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(std::thread::spawn(move || {
                for line in 0..50 {
                    coordinator.write_line(StreamKind::Stdout, &format!("w{worker}-l{line}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = out.0.lock().unwrap();
        assert_eq!(lines.len(), 8 * 50);
        for line in lines.iter() {
            // Every stored line is exactly one worker's message.
            assert!(line.starts_with('w') && line.contains("-l"));
        }
    }

    #[test]
    fn pauses_a_running_indicator_around_the_write() {
        let out = SharedSink::default();
        let coordinator =
            OutputCoordinator::with_sinks(Box::new(out.clone()), Box::new(SharedSink::default()));

        let spinner = Spinner::start("task");
        coordinator.attach_indicator(Arc::clone(&spinner));
        coordinator.write_line(StreamKind::Stdout, "interleaved");
        assert!(spinner.is_running());

        coordinator.detach_indicator();
        spinner.stop("done");
        assert_eq!(out.0.lock().unwrap().as_slice(), ["interleaved"]);
    }
}
