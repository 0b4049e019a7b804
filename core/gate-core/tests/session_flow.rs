//! End-to-end controller scenarios against a temp exchange directory.

mod common;

use std::time::{Duration, Instant};

use common::{files_with_prefix, write_trigger, FakeRecorder, ScriptedSurface};
use review_gate_core::{
    Controller, MessageKind, MessageStore, Notice, Settings, SpeechPhase, StorageConfig,
    UserAction,
};
use review_gate_protocol::{files, ResponseEvent, ResponseRecord, ToolKind, Trigger};
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    storage: StorageConfig,
    controller: Controller<ScriptedSurface>,
}

impl Harness {
    fn new(recorder: FakeRecorder) -> Self {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path());
        storage.ensure_exchange_dir().unwrap();
        let history = MessageStore::open(&storage.history_db()).unwrap();
        let controller = Controller::new(
            &storage,
            Settings::default(),
            ScriptedSurface::default(),
            Box::new(recorder),
        )
        .with_history(history);
        Self {
            _temp: temp,
            storage,
            controller,
        }
    }

    fn exchange(&self) -> &std::path::Path {
        self.storage.exchange_dir()
    }

    fn surface(&mut self) -> &mut ScriptedSurface {
        self.controller.presenter_mut().surface_mut()
    }

    fn read_response(&self, path: &std::path::Path) -> ResponseRecord {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }
}

#[test]
fn review_then_task_complete_reaches_every_response_path() {
    let mut h = Harness::new(FakeRecorder::new(0));
    let now = Instant::now();
    let primary = files::trigger_paths(h.exchange())[0].clone();

    write_trigger(
        &primary,
        Trigger::new("t1", ToolKind::ReviewGateChat).with_message("Review?"),
    );
    let summary = h.controller.tick(now);
    assert_eq!(summary.activated, vec!["t1".to_string()]);
    assert!(!primary.exists(), "consumed trigger file is deleted");
    assert!(files::ack_path(h.exchange(), "t1").exists());

    let view = h.controller.presenter().surface().views[0].clone();
    assert_eq!(view.message, "Review?");
    assert!(view.completion_hint);

    h.surface().submit("TASK_COMPLETE");
    let summary = h.controller.tick(now);
    assert_eq!(
        summary.responses,
        vec![("t1".to_string(), ResponseEvent::McpResponse)]
    );

    for path in files::response_paths(h.exchange(), "t1") {
        let record = h.read_response(&path);
        assert_eq!(record.user_input, "TASK_COMPLETE");
        assert_eq!(record.trigger_id, "t1");
        assert_eq!(record.event_type, ResponseEvent::McpResponse);
    }
    assert!(h.controller.active_trigger().is_none());

    let history = MessageStore::open(&h.storage.history_db()).unwrap();
    let kinds: Vec<_> = history.recent(10).unwrap().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::User, MessageKind::System]);
}

#[test]
fn duplicate_trigger_id_activates_once() {
    let mut h = Harness::new(FakeRecorder::new(0));
    let now = Instant::now();
    let paths = files::trigger_paths(h.exchange());

    write_trigger(&paths[0], Trigger::new("dup", ToolKind::ReviewGateChat));
    write_trigger(&paths[1], Trigger::new("dup", ToolKind::ReviewGateChat));
    h.controller.tick(now);

    write_trigger(&paths[0], Trigger::new("dup", ToolKind::ReviewGateChat));
    h.controller.tick(now);

    assert_eq!(h.controller.presenter().activations(), 1);
    assert!(paths.iter().all(|p| !p.exists()));
}

#[test]
fn newer_trigger_replaces_active_one() {
    let mut h = Harness::new(FakeRecorder::new(0));
    let now = Instant::now();
    let primary = files::trigger_paths(h.exchange())[0].clone();

    write_trigger(&primary, Trigger::new("a", ToolKind::ReviewGateChat));
    h.controller.tick(now);
    write_trigger(&primary, Trigger::new("b", ToolKind::QuickReview));
    h.controller.tick(now);

    h.surface().submit("answer for b");
    h.controller.tick(now);

    assert!(files::response_paths(h.exchange(), "b")[0].exists());
    assert!(!files::response_paths(h.exchange(), "a")[0].exists());
    assert_eq!(h.controller.presenter().surface().views.len(), 2);
}

#[test]
fn idle_timeout_sends_automatic_response() {
    let mut h = Harness::new(FakeRecorder::new(0));
    let t0 = Instant::now();
    let primary = files::trigger_paths(h.exchange())[0].clone();

    write_trigger(&primary, Trigger::new("idle", ToolKind::ReviewGateChat));
    h.controller.tick(t0);

    let summary = h.controller.tick(t0 + Duration::from_secs(299));
    assert!(summary.responses.is_empty());

    let summary = h.controller.tick(t0 + Duration::from_secs(300));
    assert_eq!(
        summary.responses,
        vec![("idle".to_string(), ResponseEvent::IdleTimeout)]
    );
    let record = h.read_response(&files::response_paths(h.exchange(), "idle")[0]);
    assert_eq!(record.user_input, "Continue");
    assert_eq!(record.event_type, ResponseEvent::IdleTimeout);

    // Fires once.
    let summary = h.controller.tick(t0 + Duration::from_secs(900));
    assert!(summary.responses.is_empty());
}

#[test]
fn short_recording_reports_no_speech_without_request() {
    let mut h = Harness::new(FakeRecorder::new(200));
    let now = Instant::now();

    h.surface().push(UserAction::StartRecording);
    h.controller.tick(now);
    assert_eq!(h.controller.speech_phase(), SpeechPhase::Recording);

    h.surface().push(UserAction::StopRecording);
    h.controller.tick(now);

    assert_eq!(h.controller.speech_phase(), SpeechPhase::Idle);
    assert!(files_with_prefix(h.exchange(), "review_gate_speech_trigger_").is_empty());
    assert!(files_with_prefix(h.exchange(), "review_gate_audio_").is_empty());
    let errors = h.controller.presenter().surface().errors();
    assert!(errors.iter().any(|e| e.contains("No speech")));
}

#[test]
fn transcription_lands_in_the_input_box() {
    let mut h = Harness::new(FakeRecorder::new(4000));
    let now = Instant::now();

    h.surface().push(UserAction::StartRecording);
    h.surface().push(UserAction::StopRecording);
    h.controller.tick(now);
    assert_eq!(h.controller.speech_phase(), SpeechPhase::Processing);

    let requests = files_with_prefix(h.exchange(), "review_gate_speech_trigger_");
    assert_eq!(requests.len(), 1);
    let request: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&requests[0]).unwrap()).unwrap();
    let request_id = request["trigger_id"].as_str().unwrap().to_string();

    std::fs::write(
        files::speech_response_path(h.exchange(), &request_id),
        r#"{ "transcription": "ship it" }"#,
    )
    .unwrap();
    h.controller.tick(now);

    assert_eq!(h.controller.speech_phase(), SpeechPhase::Idle);
    assert_eq!(
        h.controller.presenter().surface().transcriptions(),
        vec!["ship it".to_string()]
    );
}

#[test]
fn second_start_while_recording_is_rejected() {
    let recorder = FakeRecorder::new(4000);
    let outputs = recorder.outputs.clone();
    let mut h = Harness::new(recorder);
    let now = Instant::now();

    h.surface().push(UserAction::StartRecording);
    h.surface().push(UserAction::StartRecording);
    h.controller.tick(now);

    assert_eq!(outputs.lock().unwrap().len(), 1);
    assert_eq!(h.controller.speech_phase(), SpeechPhase::Recording);
    assert!(h
        .controller
        .presenter()
        .surface()
        .errors()
        .iter()
        .any(|e| e.contains("already in progress")));
}

#[test]
fn attachment_is_sent_with_next_response() {
    let mut h = Harness::new(FakeRecorder::new(0));
    let now = Instant::now();
    let primary = files::trigger_paths(h.exchange())[0].clone();
    let image = h.exchange().join("shot.png");
    std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();

    write_trigger(&primary, Trigger::new("img", ToolKind::ReviewGateChat));
    h.surface().push(UserAction::Attach(image));
    h.surface().submit("see screenshot");
    h.controller.tick(now);

    let record = h.read_response(&files::response_paths(h.exchange(), "img")[0]);
    assert_eq!(record.attachments.len(), 1);
    assert_eq!(record.attachments[0].mime_type, "image/png");
    assert_eq!(record.attachments[0].file_name, "shot.png");
    assert!(h.controller.pending_attachments().is_empty());
}

#[test]
fn submit_without_trigger_goes_to_history_only() {
    let mut h = Harness::new(FakeRecorder::new(0));
    h.surface().submit("just a note");
    let summary = h.controller.tick(Instant::now());

    assert!(summary.responses.is_empty());
    assert!(files_with_prefix(h.exchange(), "review_gate_response").is_empty());
    let history = MessageStore::open(&h.storage.history_db()).unwrap();
    let recent = history.recent(1).unwrap();
    assert_eq!(recent[0].kind, MessageKind::Plain);
    assert_eq!(recent[0].content, "just a note");
    assert!(h
        .controller
        .presenter()
        .surface()
        .notices
        .iter()
        .any(|n| matches!(n, Notice::Info(text) if text.contains("No active request"))));
}
