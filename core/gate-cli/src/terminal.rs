//! Line-oriented popup for the terminal.
//!
//! stdin is read on a background thread and forwarded as [`UserAction`]s, so
//! the controller loop never blocks on input. Commands:
//!
//! ```text
//! /attach <path>   queue an image for the next response
//! /record          start speech capture
//! /stop            stop speech capture and transcribe
//! /quit            stop the bridge
//! <anything else>  submit as the response
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use review_gate_core::{Notice, PopupSurface, PopupView, UserAction};

const ATTACH_USAGE: &str = "Usage: /attach <path>";

/// One line of input: an action for the controller, or a command typed
/// without its argument.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalInput {
    Action(UserAction),
    Usage(&'static str),
}

pub struct TerminalSurface {
    actions: mpsc::Receiver<TerminalInput>,
    opened: bool,
    /// Last transcription, submitted by an empty line.
    draft: Option<String>,
}

impl TerminalSurface {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "stdin read failed");
                        break;
                    }
                };
                if tx.send(parse_line(&line)).is_err() {
                    break;
                }
            }
            // EOF means nobody can answer any more.
            let _ = tx.send(TerminalInput::Action(UserAction::Quit));
        });

        Self {
            actions: rx,
            opened: false,
            draft: None,
        }
    }

    fn prompt(&self) {
        let mut out = io::stdout();
        let _ = write!(out, "> ");
        let _ = out.flush();
    }
}

pub fn parse_line(line: &str) -> TerminalInput {
    let trimmed = line.trim();
    let action = match trimmed.split_once(char::is_whitespace) {
        Some(("/attach", path)) => UserAction::Attach(PathBuf::from(path.trim())),
        _ => match trimmed {
            "/attach" => return TerminalInput::Usage(ATTACH_USAGE),
            "/record" => UserAction::StartRecording,
            "/stop" => UserAction::StopRecording,
            "/quit" => UserAction::Quit,
            _ => UserAction::Submit {
                text: line.to_string(),
            },
        },
    };
    TerminalInput::Action(action)
}

impl PopupSurface for TerminalSurface {
    fn present(&mut self, view: &PopupView) {
        let mut out = io::stdout();
        if !self.opened {
            let _ = writeln!(out, "Review Gate ready. /attach <path>, /record, /stop, /quit");
            self.opened = true;
        }
        let marker = if view.urgent { " [URGENT]" } else { "" };
        let _ = writeln!(out);
        let _ = writeln!(out, "== {}{} ({}) ==", view.title, marker, view.trigger_id);
        let _ = writeln!(out, "{}", view.message);
        if let Some(context) = &view.context {
            let _ = writeln!(out, "Context: {}", context);
        }
        if let Some(path) = &view.file_path {
            let _ = writeln!(out, "File: {}", path);
        }
        if view.completion_hint {
            let _ = writeln!(out, "(Type TASK_COMPLETE when you are done.)");
        }
        self.draft = None;
        self.prompt();
    }

    fn notify(&mut self, notice: &Notice) {
        let mut out = io::stdout();
        match notice {
            Notice::Info(message) => {
                let _ = writeln!(out, "* {}", message);
            }
            Notice::Error { message, hint } => {
                let _ = writeln!(out, "! {}", message);
                if let Some(hint) = hint {
                    let _ = writeln!(out, "  {}", hint);
                }
            }
            Notice::Transcription(text) if text.is_empty() => {
                let _ = writeln!(out, "* (empty transcription)");
            }
            Notice::Transcription(text) => {
                let _ = writeln!(out, "Heard: {}", text);
                let _ = writeln!(out, "(Press Enter to send it, or type a reply.)");
                self.draft = Some(text.clone());
            }
        }
        self.prompt();
    }

    fn next_action(&mut self) -> Option<UserAction> {
        let action = loop {
            match self.actions.try_recv().ok()? {
                TerminalInput::Action(action) => break action,
                TerminalInput::Usage(usage) => {
                    let _ = writeln!(io::stdout(), "! {}", usage);
                    self.prompt();
                }
            }
        };
        match action {
            UserAction::Submit { text } if text.trim().is_empty() => {
                let text = self.draft.take().unwrap_or(text);
                Some(UserAction::Submit { text })
            }
            UserAction::Submit { text } => {
                self.draft = None;
                Some(UserAction::Submit { text })
            }
            other => Some(other),
        }
    }
}
