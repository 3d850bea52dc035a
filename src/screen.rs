//! Terminal observer that repaints the tail of the current view

use std::io::{self, Stdout, Write};

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::terminal::{self, Clear, ClearType};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use podtail_logs::{LogError, LogObserver, Termination};

/// Rows used when the terminal size is unknown (e.g. output is piped)
const FALLBACK_ROWS: u16 = 24;

pub struct ScreenObserver {
    out: Mutex<Stdout>,
    done: Notify,
}

impl ScreenObserver {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
            done: Notify::new(),
        }
    }

    /// Resolves once the session reported termination
    pub async fn terminated(&self) {
        self.done.notified().await;
    }

    fn paint(&self, f: impl FnOnce(&mut Stdout) -> io::Result<()>) {
        let mut out = self.out.lock();
        if let Err(err) = f(&mut out).and_then(|_| out.flush()) {
            warn!(%err, "failed to write to terminal");
        }
    }

    fn status(&self, msg: &str) {
        self.paint(|out| write!(out, "\x1b[7m-- {} --\x1b[0m\r\n", msg));
    }
}

impl Default for ScreenObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LogObserver for ScreenObserver {
    fn on_data_batch(&self, lines: &[Vec<u8>]) {
        // Leave the last row for status messages
        let rows = terminal::size().map(|(_, h)| h).unwrap_or(FALLBACK_ROWS);
        let rows = usize::from(rows.saturating_sub(1));
        let start = lines.len().saturating_sub(rows);

        self.paint(|out| {
            queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
            for line in &lines[start..] {
                out.write_all(line)?;
                out.write_all(b"\r\n")?;
            }
            Ok(())
        });
    }

    fn on_clear(&self) {
        self.paint(|out| queue!(out, Clear(ClearType::All), MoveTo(0, 0)));
    }

    fn on_terminated(&self, cause: &Termination) {
        self.status(&cause.to_string());
        self.done.notify_one();
    }

    fn on_paused(&self) {
        self.status("paused");
    }

    fn on_resumed(&self) {
        self.status("resumed");
    }

    fn on_failed(&self, err: &LogError) {
        self.status(&err.to_string());
    }
}
