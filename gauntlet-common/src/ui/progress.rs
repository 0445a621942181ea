//! Thread-driven progress indicator.
//!
//! The spinner draws on the current terminal line at a fixed frequency and
//! supports pausing: the coordinator clears the line, prints whatever it
//! needs to, and resumes, which redraws. Stopping replaces the spinner char
//! with a colored outcome word and commits the line with a newline.

use std::io::{stdout, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::style::Stylize;

const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Paused,
    Stopped,
}

struct SpinnerState {
    message: String,
    phase: Phase,
    frame: usize,
}

/// An animated single-line indicator.
pub struct Spinner {
    state: Arc<Mutex<SpinnerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Spinner {
    /// Start drawing `message` followed by an animated spinner char.
    pub fn start(message: impl Into<String>) -> Arc<Self> {
        let state = Arc::new(Mutex::new(SpinnerState {
            message: message.into(),
            phase: Phase::Running,
            frame: 0,
        }));

        let thread_state = Arc::clone(&state);
        let handle = std::thread::spawn(move || loop {
            {
                let mut state = thread_state.lock().unwrap();
                match state.phase {
                    Phase::Stopped => break,
                    Phase::Running => {
                        let frame = FRAMES[state.frame % FRAMES.len()];
                        state.frame += 1;
                        draw(&format!("{} {}", state.message, frame.cyan()));
                    }
                    Phase::Paused => {}
                }
            }
            std::thread::sleep(FRAME_INTERVAL);
        });

        Arc::new(Self {
            state,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().phase == Phase::Running
    }

    /// Clear the indicator line so other output can take it over.
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Running {
            state.phase = Phase::Paused;
            clear_line();
        }
    }

    /// Redraw after a pause.
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Paused {
            state.phase = Phase::Running;
            let frame = FRAMES[state.frame % FRAMES.len()];
            draw(&format!("{} {}", state.message, frame.cyan()));
        }
    }

    /// Replace the spinner with a green outcome word and commit the line.
    pub fn stop(&self, outcome: &str) {
        self.finish(format!("{}", outcome.green()));
    }

    /// Replace the spinner with a red outcome word and commit the line.
    pub fn stop_fail(&self, outcome: &str) {
        self.finish(format!("{}", outcome.red()));
    }

    fn finish(&self, outcome: String) {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            clear_line();
            let mut out = stdout();
            let _ = writeln!(out, "\r{} {}", state.message, outcome);
            let _ = out.flush();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        // A dropped spinner must not leave a live drawing thread behind.
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
        }
    }
}

fn draw(line: &str) {
    let mut out = stdout();
    let _ = write!(out, "\r\x1b[2K{line}");
    let _ = out.flush();
}

fn clear_line() {
    let mut out = stdout();
    let _ = write!(out, "\r\x1b[2K");
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_resume_toggle_running() {
        let spinner = Spinner::start("working");
        assert!(spinner.is_running());
        spinner.pause();
        assert!(!spinner.is_running());
        spinner.resume();
        assert!(spinner.is_running());
        spinner.stop("done");
        assert!(!spinner.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let spinner = Spinner::start("working");
        spinner.stop("done");
        spinner.stop_fail("error");
        assert!(!spinner.is_running());
    }
}
