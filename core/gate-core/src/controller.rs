//! The bridge session: one watcher, one popup, one active trigger.
//!
//! [`Controller::tick`] is a single cooperative cycle. Each cycle:
//!
//! 1. polls trigger files and presents every newly seen trigger,
//! 2. drains socket triggers,
//! 3. handles pending user actions from the surface,
//! 4. advances speech capture,
//! 5. fires the idle auto-submit if its deadline passed,
//! 6. periodically re-checks MCP server liveness.
//!
//! `tick` takes the current [`Instant`] so tests can step time forward
//! instead of sleeping. [`Controller::run`] is the production loop.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use review_gate_protocol::{Attachment, ErrorInfo, ResponseEvent, ResponseRecord, Trigger};

use crate::attachments::load_attachment;
use crate::config::Settings;
use crate::dedup::ProcessedTriggers;
use crate::history::{MessageKind, MessageRecord, MessageStore};
use crate::ipc::{IpcInbound, IpcReply};
use crate::popup::{Notice, PopupSurface, PopupView, Presenter, UserAction, COMPLETION_SENTINEL};
use crate::response::ResponseWriter;
use crate::scheduler::{CancellationToken, Deadline};
use crate::speech::{Recorder, SpeechCapture, SpeechEvent, SpeechPhase};
use crate::status::{check_server_status, StatusMonitor};
use crate::storage::StorageConfig;
use crate::watcher::TriggerWatcher;

const STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// What happened during one [`Controller::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Trigger ids presented this cycle, in order.
    pub activated: Vec<String>,
    /// Responses written this cycle, as (trigger id, event).
    pub responses: Vec<(String, ResponseEvent)>,
    pub actions: usize,
}

pub struct Controller<S: PopupSurface> {
    settings: Settings,
    watcher: TriggerWatcher,
    processed: ProcessedTriggers,
    presenter: Presenter<S>,
    writer: ResponseWriter,
    speech: SpeechCapture,
    history: Option<MessageStore>,
    idle: Deadline,
    pending_attachments: Vec<Attachment>,
    ipc_inbox: Option<mpsc::Receiver<IpcInbound>>,
    ipc_replies: HashMap<String, mpsc::Sender<IpcReply>>,
    status: StatusMonitor,
    status_check: Deadline,
    exchange_dir: std::path::PathBuf,
    token: CancellationToken,
}

impl<S: PopupSurface> Controller<S> {
    pub fn new(
        storage: &StorageConfig,
        settings: Settings,
        surface: S,
        recorder: Box<dyn Recorder>,
    ) -> Self {
        let exchange_dir = storage.exchange_dir();
        Self {
            watcher: TriggerWatcher::new(exchange_dir),
            processed: ProcessedTriggers::new(),
            presenter: Presenter::new(surface),
            writer: ResponseWriter::new(exchange_dir),
            speech: SpeechCapture::new(recorder, exchange_dir, &settings),
            history: None,
            idle: Deadline::disarmed(),
            pending_attachments: Vec::new(),
            ipc_inbox: None,
            ipc_replies: HashMap::new(),
            status: StatusMonitor::new(),
            status_check: Deadline::disarmed(),
            exchange_dir: exchange_dir.to_path_buf(),
            token: CancellationToken::new(),
            settings,
        }
    }

    /// Records prompts and replies in `store`.
    pub fn with_history(mut self, store: MessageStore) -> Self {
        self.history = Some(store);
        self
    }

    /// Accepts triggers arriving over the socket as well as from files.
    pub fn with_ipc_inbox(mut self, inbox: mpsc::Receiver<IpcInbound>) -> Self {
        self.ipc_inbox = Some(inbox);
        self
    }

    /// Token that stops [`Controller::run`]. Clone it for signal handlers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn presenter(&self) -> &Presenter<S> {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut Presenter<S> {
        &mut self.presenter
    }

    pub fn active_trigger(&self) -> Option<&Trigger> {
        self.presenter.active()
    }

    pub fn speech_phase(&self) -> SpeechPhase {
        self.speech.phase()
    }

    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending_attachments
    }

    /// Time left before the idle auto-submit, if armed.
    pub fn idle_remaining(&self, now: Instant) -> Option<Duration> {
        self.idle.remaining(now)
    }

    /// Ticks until the token is cancelled, sleeping the poll interval between
    /// cycles, then releases speech resources.
    pub fn run(&mut self) {
        tracing::info!(
            exchange_dir = %self.exchange_dir.display(),
            poll_ms = self.settings.poll_interval().as_millis() as u64,
            idle_timeout_secs = self.settings.idle_timeout().as_secs(),
            "Bridge started"
        );
        while !self.token.is_cancelled() {
            self.tick(Instant::now());
            thread::sleep(self.settings.poll_interval());
        }
        self.shutdown();
    }

    /// Releases in-flight resources. Pending socket clients are told the
    /// trigger ended.
    pub fn shutdown(&mut self) {
        self.speech.cancel();
        self.idle.cancel();
        self.ipc_replies.clear();
        tracing::info!("Bridge stopped");
    }

    pub fn tick(&mut self, now: Instant) -> TickSummary {
        let mut summary = TickSummary::default();
        if self.token.is_cancelled() {
            return summary;
        }

        for trigger in self.watcher.poll(&mut self.processed) {
            self.activate(trigger, now, &mut summary);
        }

        self.drain_ipc(now, &mut summary);

        while let Some(action) = self.presenter.next_action() {
            summary.actions += 1;
            self.handle_action(action, now, &mut summary);
            if self.token.is_cancelled() {
                return summary;
            }
        }

        if let Some(event) = self.speech.poll(now) {
            self.handle_speech_event(event);
        }

        if self.idle.fire(now) && self.presenter.active().is_some() {
            tracing::info!(
                timeout_secs = self.settings.idle_timeout().as_secs(),
                "Idle timeout; sending automatic response"
            );
            let text = self.settings.auto_message.clone();
            self.respond(&text, ResponseEvent::IdleTimeout, &mut summary);
        }

        if !self.status_check.is_armed() || self.status_check.fire(now) {
            self.check_status();
            self.status_check.arm(now, STATUS_CHECK_INTERVAL);
        }

        summary
    }

    /// Presents `trigger`, replacing whatever was active.
    fn activate(&mut self, trigger: Trigger, now: Instant, summary: &mut TickSummary) {
        if let Some(previous) = self.presenter.active() {
            // A superseded socket client gets "ended without a response".
            self.ipc_replies.remove(&previous.trigger_id);
        }

        let view: PopupView = self.presenter.present(trigger.clone());
        if let Err(err) = self.writer.acknowledge(&trigger) {
            tracing::warn!(trigger_id = %trigger.trigger_id, error = %err, "Failed to write acknowledgement");
        }
        self.record_history(MessageRecord::new(
            Some(&trigger.trigger_id),
            MessageKind::System,
            &view.message,
        ));
        self.idle.arm(now, self.settings.idle_timeout());
        summary.activated.push(trigger.trigger_id);
    }

    fn drain_ipc(&mut self, now: Instant, summary: &mut TickSummary) {
        let inbound: Vec<IpcInbound> = match &self.ipc_inbox {
            Some(inbox) => inbox.try_iter().collect(),
            None => return,
        };

        for IpcInbound { trigger, reply } in inbound {
            if !self.processed.mark(&trigger.trigger_id) {
                tracing::debug!(trigger_id = %trigger.trigger_id, "Duplicate socket trigger rejected");
                let _ = reply.send(Err(ErrorInfo::new(
                    "duplicate_trigger",
                    format!("trigger {} was already handled", trigger.trigger_id),
                )));
                continue;
            }
            tracing::info!(
                trigger_id = %trigger.trigger_id,
                tool = %trigger.tool,
                "Trigger received over socket"
            );
            let trigger_id = trigger.trigger_id.clone();
            self.activate(trigger, now, summary);
            self.ipc_replies.insert(trigger_id, reply);
        }
    }

    fn handle_action(&mut self, action: UserAction, now: Instant, summary: &mut TickSummary) {
        if self.presenter.active().is_some() && !matches!(action, UserAction::Quit) {
            self.idle.arm(now, self.settings.idle_timeout());
        }

        match action {
            UserAction::Submit { text } => self.submit(text.trim(), summary),
            UserAction::Attach(path) => match load_attachment(&path) {
                Ok(attachment) => {
                    self.presenter.notify(Notice::Info(format!(
                        "Attached {} ({} bytes)",
                        attachment.file_name, attachment.size
                    )));
                    self.pending_attachments.push(attachment);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Attachment rejected");
                    self.presenter.notify(Notice::Error {
                        message: err.to_string(),
                        hint: Some("Only images up to 10 MiB can be attached.".to_string()),
                    });
                }
            },
            UserAction::StartRecording => match self.speech.start(now) {
                Ok(event) => self.handle_speech_event(event),
                Err(err) => self.presenter.notify(Notice::Error {
                    message: err.to_string(),
                    hint: None,
                }),
            },
            UserAction::StopRecording => match self.speech.stop(now) {
                Ok(event) => self.handle_speech_event(event),
                Err(err) => self.presenter.notify(Notice::Error {
                    message: err.to_string(),
                    hint: None,
                }),
            },
            UserAction::Quit => {
                tracing::info!("Quit requested");
                self.token.cancel();
            }
        }
    }

    fn submit(&mut self, text: &str, summary: &mut TickSummary) {
        if text.is_empty() && self.pending_attachments.is_empty() {
            self.presenter
                .notify(Notice::Info("Nothing to send".to_string()));
            return;
        }

        if self.presenter.active().is_none() {
            let attachments = std::mem::take(&mut self.pending_attachments);
            self.record_history(
                MessageRecord::new(None, MessageKind::Plain, text).with_attachments(attachments),
            );
            self.presenter.notify(Notice::Info(
                "No active request; message saved to history".to_string(),
            ));
            return;
        }

        if self.respond(text, ResponseEvent::McpResponse, summary) {
            let notice = if text == COMPLETION_SENTINEL {
                "Task marked complete"
            } else {
                "Response sent"
            };
            self.presenter.notify(Notice::Info(notice.to_string()));
        }
    }

    /// Writes the response for the active trigger and clears it. Returns
    /// false when no response path could be written; the trigger then stays
    /// active so the user can retry.
    fn respond(&mut self, text: &str, event: ResponseEvent, summary: &mut TickSummary) -> bool {
        let trigger_id = match self.presenter.active() {
            Some(trigger) => trigger.trigger_id.clone(),
            None => return false,
        };

        let record = ResponseRecord::new(
            &trigger_id,
            text,
            self.pending_attachments.clone(),
            event,
        );
        if let Err(err) = self.writer.write_required(&record) {
            tracing::error!(trigger_id = %trigger_id, error = %err, "Response could not be delivered");
            self.presenter.notify(Notice::Error {
                message: err.to_string(),
                hint: Some(format!(
                    "Check that {} is writable.",
                    self.exchange_dir.display()
                )),
            });
            return false;
        }

        self.presenter.take_active();
        self.idle.cancel();
        let attachments = std::mem::take(&mut self.pending_attachments);
        if let Some(reply) = self.ipc_replies.remove(&trigger_id) {
            if reply.send(Ok(record)).is_err() {
                tracing::debug!(trigger_id = %trigger_id, "Socket client went away before the response");
            }
        }
        self.record_history(
            MessageRecord::new(Some(&trigger_id), MessageKind::User, text)
                .with_attachments(attachments),
        );
        summary.responses.push((trigger_id, event));
        true
    }

    fn handle_speech_event(&mut self, event: SpeechEvent) {
        let notice = match event {
            SpeechEvent::Started { .. } => Notice::Info("Recording... stop when done".to_string()),
            SpeechEvent::Transcribing { .. } => Notice::Info("Transcribing...".to_string()),
            SpeechEvent::Transcribed { text, timed_out } => {
                if timed_out {
                    self.presenter.notify(Notice::Info(
                        "Transcription timed out; nothing was recognized".to_string(),
                    ));
                }
                Notice::Transcription(text)
            }
            SpeechEvent::NoSpeech => Notice::Error {
                message: "No speech detected".to_string(),
                hint: Some("Speak closer to the microphone or record for longer.".to_string()),
            },
            SpeechEvent::Failed { message, hint } => Notice::Error {
                message,
                hint: Some(hint),
            },
        };
        self.presenter.notify(notice);
    }

    fn check_status(&mut self) {
        let status = check_server_status(
            &self.exchange_dir,
            self.settings.status_freshness(),
            SystemTime::now(),
        );
        if let Some(active) = self.status.observe(&status) {
            if active {
                tracing::info!(log = ?status.log_path, "MCP server active");
            } else {
                tracing::warn!("MCP server inactive (no recent status log)");
            }
            let message = if active {
                "MCP server active"
            } else {
                "MCP server inactive"
            };
            self.presenter.notify(Notice::Info(message.to_string()));
        }
    }

    fn record_history(&self, message: MessageRecord) {
        if let Some(store) = &self.history {
            if let Err(err) = store.save(&message) {
                tracing::warn!(error = %err, "Failed to record message history");
            }
        }
    }
}
