use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use deltaflow_llm::FALLBACK_MESSAGE;
use deltaflow_stream::{DeltaSink, StreamOutcome};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// One-shot status output around a streamed answer.
#[derive(Default)]
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Print which upstream is being asked before the answer starts.
    pub fn print_header(&self, provider: &str, detail: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("deltaflow"),
            ResetColor,
            SetForegroundColor(Colors::DIM),
            Print(format!(" | {} | {}\n", provider, detail)),
            Print("Ctrl+C cancels.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print a finished, non-streamed answer.
    pub fn print_block(&self, text: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ASSISTANT_TEXT),
            Print(format!("{}\n", text)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Show a spinner while waiting for a non-streaming upstream.
    pub fn start_spinner(&self, message: &str) -> Result<SpinnerHandle> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{} ", message)),
            ResetColor,
        )?;
        stdout.flush()?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = std::thread::spawn(move || {
            let frames = ['|', '/', '-', '\\'];
            let mut i = 0;
            while running_clone.load(Ordering::SeqCst) {
                let mut stdout = io::stdout();
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("\r{} ", frames[i % frames.len()])),
                    ResetColor,
                )
                .ok();
                i += 1;
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            let mut stdout = io::stdout();
            execute!(stdout, Print("\r  \r")).ok();
        });

        Ok(SpinnerHandle {
            running,
            thread: Some(handle),
        })
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

/// Handle to a running spinner. Drop or call stop() to terminate it.
pub struct SpinnerHandle {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SpinnerHandle {
    /// Stop the spinner and wait until its line is cleared.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

impl Drop for SpinnerHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Writes each delta the moment it is reconstructed.
///
/// Text already printed is never taken back: on failure the fallback
/// notice goes underneath the partial answer.
pub struct TerminalSink<W: Write = io::Stdout> {
    out: W,
    chars: usize,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, chars: 0 }
    }

    /// Characters printed for the current request.
    pub fn chars(&self) -> usize {
        self.chars
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_colored(&mut self, color: Color, text: &str) {
        if let Err(e) = execute!(self.out, SetForegroundColor(color), Print(text), ResetColor) {
            debug!(error = %e, "terminal write failed");
        }
    }
}

impl<W: Write> DeltaSink for TerminalSink<W> {
    fn on_delta(&mut self, text: &str) {
        self.write_colored(Colors::ASSISTANT_TEXT, text);
        self.chars += text.chars().count();
    }

    fn reset(&mut self) {
        self.chars = 0;
    }

    fn on_finish(&mut self, outcome: &StreamOutcome) {
        match outcome {
            StreamOutcome::Completed => self.write_colored(Colors::DIM, "\n"),
            StreamOutcome::Failed { message } => {
                debug!(error = %message, chars = self.chars, "stream failed");
                let lead = if self.chars > 0 { "\n" } else { "" };
                self.write_colored(Colors::ERROR, &format!("{}{}\n", lead, FALLBACK_MESSAGE));
            }
            StreamOutcome::Superseded => self.write_colored(Colors::DIM, "\n[superseded]\n"),
        }
    }
}
