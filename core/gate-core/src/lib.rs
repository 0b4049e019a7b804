//! # review-gate-core
//!
//! Bridge between an agent and a human reviewer. The agent drops trigger
//! files (or sends a socket request); the bridge shows a popup, collects text,
//! images or speech, and writes the reply where the agent is polling.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. One cooperative loop ([`Controller::tick`])
//!   drives watching, timers and speech; only the socket listener runs on its own thread.
//! - **One surface**: A single [`PopupSurface`] is reused for every trigger; the
//!   newest trigger replaces the active one.
//! - **Keep polling**: Per-file and per-path failures are logged, never fatal.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use review_gate_core::{config, CommandRecorder, Controller, StorageConfig};
//!
//! let storage = StorageConfig::resolve()?;
//! let settings = config::load_or_default(&storage.settings_file());
//! let recorder = Box::new(CommandRecorder::from_settings(&settings));
//! let mut controller = Controller::new(&storage, settings, my_surface, recorder);
//! controller.run();
//! ```

pub mod attachments;
pub mod config;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod history;
pub mod ipc;
pub mod popup;
pub mod response;
pub mod scheduler;
pub mod speech;
pub mod status;
pub mod storage;
pub mod watcher;

pub use attachments::{load_attachment, MAX_ATTACHMENT_BYTES};
pub use config::{Settings, SettingsOverrides};
pub use controller::{Controller, TickSummary};
pub use dedup::ProcessedTriggers;
pub use error::{GateError, Result};
pub use history::{MessageKind, MessageRecord, MessageStore};
pub use ipc::{IpcInbound, IpcReply};
#[cfg(unix)]
pub use ipc::{send_request, IpcServer};
pub use popup::{
    Notice, PopupSurface, PopupTemplate, PopupView, Presenter, UserAction, COMPLETION_SENTINEL,
};
pub use response::{ResponseWriter, WriteReport};
pub use scheduler::{poll_until, CancellationToken, Deadline};
pub use speech::{CommandRecorder, Recorder, RecordingHandle, SpeechCapture, SpeechEvent, SpeechPhase};
pub use status::{check_server_status, ServerStatus, StatusMonitor};
pub use storage::StorageConfig;
pub use watcher::TriggerWatcher;
