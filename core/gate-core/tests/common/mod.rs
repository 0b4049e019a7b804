#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use review_gate_core::{
    GateError, Notice, PopupSurface, PopupView, Recorder, RecordingHandle, Result, UserAction,
};
use review_gate_protocol::{Trigger, TriggerEnvelope};

/// Surface driven by a queue of actions; records everything it was shown.
#[derive(Default)]
pub struct ScriptedSurface {
    pub views: Vec<PopupView>,
    pub notices: Vec<Notice>,
    pub actions: VecDeque<UserAction>,
}

impl ScriptedSurface {
    pub fn push(&mut self, action: UserAction) {
        self.actions.push_back(action);
    }

    pub fn submit(&mut self, text: &str) {
        self.push(UserAction::Submit {
            text: text.to_string(),
        });
    }

    pub fn transcriptions(&self) -> Vec<String> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                Notice::Transcription(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                Notice::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl PopupSurface for ScriptedSurface {
    fn present(&mut self, view: &PopupView) {
        self.views.push(view.clone());
    }

    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }

    fn next_action(&mut self) -> Option<UserAction> {
        self.actions.pop_front()
    }
}

/// Recorder that writes a fixed number of bytes and exits when asked.
#[derive(Clone)]
pub struct FakeRecorder {
    pub bytes: usize,
    pub outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeRecorder {
    pub fn new(bytes: usize) -> Self {
        Self {
            bytes,
            outputs: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

struct FakeHandle {
    exited: bool,
}

impl RecordingHandle for FakeHandle {
    fn terminate(&mut self) -> std::io::Result<()> {
        self.exited = true;
        Ok(())
    }

    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.exited)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.exited = true;
        Ok(())
    }

    fn early_failure(&mut self) -> Option<String> {
        None
    }
}

impl Recorder for FakeRecorder {
    fn start(&self, output: &Path) -> Result<Box<dyn RecordingHandle>> {
        std::fs::write(output, vec![0u8; self.bytes]).map_err(|e| GateError::RecorderSpawn {
            command: "fake".to_string(),
            details: e.to_string(),
        })?;
        self.outputs.lock().unwrap().push(output.to_path_buf());
        Ok(Box::new(FakeHandle { exited: false }))
    }
}

/// Writes `trigger` the way the MCP server does: wrapped in an envelope.
pub fn write_trigger(path: &Path, trigger: Trigger) {
    let envelope = TriggerEnvelope::new(trigger, None);
    std::fs::write(path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();
}

pub fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(prefix))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found
}
