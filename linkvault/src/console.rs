//! Operator console for a running save
//!
//! A dedicated thread reads stdin lines and translates the recognized
//! commands into atomic flags; everything else goes into a line channel
//! consumed by reconnect prompts. The executor polls the flags at a
//! checkpoint before each unit of work, so cancellation is checkpointed,
//! never preemptive: an in-flight file operation always finishes first.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub struct Console {
    exit_requested: Arc<AtomicBool>,
    show_options: Arc<AtomicBool>,
    show_progress: Arc<AtomicBool>,
    show_schemes: Arc<AtomicBool>,
    lines: Option<Mutex<Receiver<String>>>,
    interactive: bool,
}

impl Console {
    /// Start the stdin reader thread. The thread lives for the rest of
    /// the process; it parks itself when stdin closes.
    pub fn spawn() -> Self {
        let exit_requested = Arc::new(AtomicBool::new(false));
        // Print the command summary at the first checkpoint.
        let show_options = Arc::new(AtomicBool::new(true));
        let show_progress = Arc::new(AtomicBool::new(false));
        let show_schemes = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel();

        {
            let exit_requested = Arc::clone(&exit_requested);
            let show_options = Arc::clone(&show_options);
            let show_progress = Arc::clone(&show_progress);
            let show_schemes = Arc::clone(&show_schemes);
            thread::spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    match line.trim() {
                        "exit" => exit_requested.store(true, Ordering::SeqCst),
                        "options" => show_options.store(true, Ordering::SeqCst),
                        "progress" => show_progress.store(true, Ordering::SeqCst),
                        "schemes" => show_schemes.store(true, Ordering::SeqCst),
                        other => {
                            if tx.send(other.to_string()).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        Self {
            exit_requested,
            show_options,
            show_progress,
            show_schemes,
            lines: Some(Mutex::new(rx)),
            interactive: true,
        }
    }

    /// A console with no reader thread: flags never fire and every
    /// disconnect becomes an immediate error. Used by non-interactive
    /// callers and tests.
    pub fn disabled() -> Self {
        Self {
            exit_requested: Arc::new(AtomicBool::new(false)),
            show_options: Arc::new(AtomicBool::new(false)),
            show_progress: Arc::new(AtomicBool::new(false)),
            show_schemes: Arc::new(AtomicBool::new(false)),
            lines: None,
            interactive: false,
        }
    }

    /// An interactive console fed from a test channel instead of stdin.
    #[cfg(test)]
    pub(crate) fn with_lines(rx: Receiver<String>) -> Self {
        Self {
            exit_requested: Arc::new(AtomicBool::new(false)),
            show_options: Arc::new(AtomicBool::new(false)),
            show_progress: Arc::new(AtomicBool::new(false)),
            show_schemes: Arc::new(AtomicBool::new(false)),
            lines: Some(Mutex::new(rx)),
            interactive: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    pub fn take_show_options(&self) -> bool {
        self.show_options.swap(false, Ordering::SeqCst)
    }

    pub fn take_show_progress(&self) -> bool {
        self.show_progress.swap(false, Ordering::SeqCst)
    }

    pub fn take_show_schemes(&self) -> bool {
        self.show_schemes.swap(false, Ordering::SeqCst)
    }

    /// Wait up to `timeout` for a free-text line (one that was not a
    /// console command). `None` on timeout or when no reader exists.
    pub fn wait_line(&self, timeout: Duration) -> Option<String> {
        let receiver = self.lines.as_ref()?;
        let receiver = receiver.lock().ok()?;
        match receiver.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Print the commands available while a save is running.
pub fn print_save_options() {
    log::info!("Console commands take effect after the current transfer:");
    log::info!("  options   show this help");
    log::info!("  progress  show the progress of the current step");
    log::info!("  schemes   show all scheme steps");
    log::info!("  exit      persist progress and stop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_console_never_fires() {
        let console = Console::disabled();
        assert!(!console.is_interactive());
        assert!(!console.exit_requested());
        assert!(!console.take_show_options());
        assert!(console.wait_line(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_flag_take_semantics() {
        let console = Console::disabled();
        console.show_progress.store(true, Ordering::SeqCst);
        assert!(console.take_show_progress());
        // Taking consumes the flag.
        assert!(!console.take_show_progress());
    }

    #[test]
    fn test_wait_line_receives_free_text() {
        let (tx, rx) = channel();
        let console = Console::with_lines(rx);
        tx.send("anything".to_string()).unwrap();
        assert_eq!(
            console.wait_line(Duration::from_millis(100)).as_deref(),
            Some("anything")
        );
        assert!(console.wait_line(Duration::from_millis(1)).is_none());
    }
}
