//! Terminal input shared by the REPL and the approval prompts.
//!
//! One thread owns the line editor and serves reads one at a time. A caller
//! that stops waiting (an approval prompt withdrawn because the run was
//! cancelled) does not lose the line being typed: it goes to the next caller.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// How long to wait for the input thread to write history on exit.
const SAVE_HISTORY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl-C while the line was being edited.
    Interrupted,
    Eof,
}

/// Blocking source of lines, driven from the input thread.
pub trait LineSource {
    fn read(&mut self, prompt: &str) -> Result<ReadOutcome>;

    fn remember(&mut self, _line: &str) {}

    fn persist_history(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

impl LineSource for DefaultEditor {
    fn read(&mut self, prompt: &str) -> Result<ReadOutcome> {
        match self.readline(prompt) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(e) => Err(anyhow!("Readline error: {}", e)),
        }
    }

    fn remember(&mut self, line: &str) {
        if let Err(e) = self.add_history_entry(line) {
            debug!("Could not add history entry: {}", e);
        }
    }

    fn persist_history(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.save_history(path)
            .map_err(|e| anyhow!("Could not save readline history: {}", e))
    }
}

enum Request {
    Read {
        prompt: String,
        reply: oneshot::Sender<Result<ReadOutcome>>,
    },
    Remember(String),
    Persist {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub struct LineReader {
    requests: mpsc::Sender<Request>,
    in_flight: Mutex<Option<oneshot::Receiver<Result<ReadOutcome>>>>,
}

impl LineReader {
    /// Start the input thread. `make` runs on that thread, so the source
    /// never crosses threads.
    pub fn spawn<S, F>(make: F) -> Result<Self>
    where
        S: LineSource + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (requests, inbox) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        // Detached: a read blocked on the terminal must not hold up shutdown
        std::thread::Builder::new()
            .name("deskpilot-input".to_string())
            .spawn(move || {
                let mut source = match make() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for request in inbox {
                    match request {
                        Request::Read { prompt, reply } => {
                            let _ = reply.send(source.read(&prompt));
                        }
                        Request::Remember(line) => source.remember(&line),
                        Request::Persist { path, reply } => {
                            let _ = reply.send(source.persist_history(&path));
                        }
                    }
                }
                debug!("Input thread stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Input thread exited during startup"))??;
        Ok(Self {
            requests,
            in_flight: Mutex::new(None),
        })
    }

    /// Read one line. If an earlier caller gave up on its read, this caller
    /// receives that read's line and `prompt` is not shown again.
    pub async fn read_line(&self, prompt: &str) -> Result<ReadOutcome> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.is_none() {
            let (reply, receiver) = oneshot::channel();
            self.send(Request::Read {
                prompt: prompt.to_string(),
                reply,
            })?;
            *in_flight = Some(receiver);
        }
        let Some(receiver) = in_flight.as_mut() else {
            return Err(anyhow!("No read in flight"));
        };
        let outcome = receiver.await;
        *in_flight = None;
        outcome.map_err(|_| anyhow!("Input thread has stopped"))?
    }

    pub fn remember(&self, line: &str) {
        if let Err(e) = self.send(Request::Remember(line.to_string())) {
            debug!("{}", e);
        }
    }

    pub async fn persist_history(&self, path: &Path) -> Result<()> {
        let (reply, receiver) = oneshot::channel();
        self.send(Request::Persist {
            path: path.to_path_buf(),
            reply,
        })?;
        match tokio::time::timeout(SAVE_HISTORY_TIMEOUT, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("Input thread has stopped")),
            Err(_) => Err(anyhow!("Input thread busy; history not saved")),
        }
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| anyhow!("Input thread has stopped"))
    }
}

pub fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("deskpilot").join("readline_history"))
}

/// Reader over the terminal, with saved history loaded.
pub fn terminal() -> Result<LineReader> {
    LineReader::spawn(|| {
        let mut editor = DefaultEditor::new().map_err(|e| anyhow!("Readline error: {}", e))?;
        if let Some(path) = history_path() {
            if let Err(e) = editor.load_history(&path) {
                debug!("No readline history loaded: {}", e);
            }
        }
        Ok(editor)
    })
}

/// Lines fed through a channel; the read blocks until one arrives.
#[cfg(test)]
pub(crate) struct ScriptedLines {
    lines: mpsc::Receiver<String>,
}

#[cfg(test)]
impl ScriptedLines {
    pub(crate) fn reader() -> (mpsc::Sender<String>, LineReader) {
        let (feed, lines) = mpsc::channel();
        let reader = LineReader::spawn(move || Ok(ScriptedLines { lines })).unwrap();
        (feed, reader)
    }
}

#[cfg(test)]
impl LineSource for ScriptedLines {
    fn read(&mut self, _prompt: &str) -> Result<ReadOutcome> {
        Ok(match self.lines.recv() {
            Ok(line) => ReadOutcome::Line(line),
            Err(_) => ReadOutcome::Eof,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let (feed, reader) = ScriptedLines::reader();
        feed.send("first".to_string()).unwrap();
        feed.send("second".to_string()).unwrap();

        assert_eq!(
            reader.read_line("> ").await.unwrap(),
            ReadOutcome::Line("first".to_string())
        );
        assert_eq!(
            reader.read_line("> ").await.unwrap(),
            ReadOutcome::Line("second".to_string())
        );
    }

    #[tokio::test]
    async fn test_abandoned_read_goes_to_next_caller() {
        let (feed, reader) = ScriptedLines::reader();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), reader.read_line("Approve? ")).await;
        assert!(abandoned.is_err());

        feed.send("open notes".to_string()).unwrap();
        assert_eq!(
            reader.read_line("deskpilot> ").await.unwrap(),
            ReadOutcome::Line("open notes".to_string())
        );
    }

    #[tokio::test]
    async fn test_closed_source_reads_eof() {
        let (feed, reader) = ScriptedLines::reader();
        drop(feed);
        assert_eq!(reader.read_line("> ").await.unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_failed_source_is_reported() {
        let result = LineReader::spawn(|| -> Result<ScriptedLines> { Err(anyhow!("no tty")) });
        let Err(e) = result else {
            panic!("spawn should fail when the source cannot be built");
        };
        assert!(e.to_string().contains("no tty"));
    }
}
