//! Speech capture: record with an external program, transcribe through files.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──start──▶ Recording ──stop──▶ Processing ──result / timeout──▶ Idle
//!   ▲                 │
//!   └── spawn error, early exit, audio below threshold ─────────────────┘
//! ```
//!
//! `start` outside Idle is rejected and changes nothing. Processing writes a
//! [`SpeechRequest`] for the external transcriber and checks for its
//! [`SpeechResult`] on every [`SpeechCapture::poll`] until the timeout, which
//! degrades to an empty transcription.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use review_gate_protocol::{files, SpeechRequest, SpeechResult};

use crate::config::Settings;
use crate::error::{GateError, Result};
use crate::scheduler::Deadline;
use crate::storage::{remove_if_exists, write_json_atomic};

const STOP_GRACE: Duration = Duration::from_secs(3);
const STOP_POLL: Duration = Duration::from_millis(50);

/// Starts an external recording process writing to a given file.
pub trait Recorder {
    fn start(&self, output: &Path) -> Result<Box<dyn RecordingHandle>>;
}

/// A running recorder.
pub trait RecordingHandle: Send {
    /// Asks the process to finish writing and exit (SIGTERM on unix).
    fn terminate(&mut self) -> std::io::Result<()>;

    /// True once the process has exited.
    fn has_exited(&mut self) -> std::io::Result<bool>;

    fn kill(&mut self) -> std::io::Result<()>;

    /// Error output if the process already exited unsuccessfully on its own.
    fn early_failure(&mut self) -> Option<String>;
}

/// Spawns a command-line recorder (`sox` by default).
#[derive(Debug, Clone)]
pub struct CommandRecorder {
    program: String,
}

impl CommandRecorder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.recorder_program.clone())
    }

    /// Arguments for 16 kHz mono 16-bit capture from the default input device.
    pub fn args_for(&self, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy().into_owned();
        let program = Path::new(&self.program)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut args: Vec<String> = match program.as_str() {
            "sox" => vec!["-q", "-d", "-r", "16000", "-c", "1", "-b", "16"],
            "rec" => vec!["-q", "-r", "16000", "-c", "1", "-b", "16"],
            "arecord" => vec!["-q", "-f", "S16_LE", "-r", "16000", "-c", "1"],
            _ => vec![],
        }
        .into_iter()
        .map(str::to_string)
        .collect();
        args.push(output);
        args
    }
}

impl Recorder for CommandRecorder {
    fn start(&self, output: &Path) -> Result<Box<dyn RecordingHandle>> {
        let args = self.args_for(output);
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| GateError::RecorderSpawn {
                command: self.program.clone(),
                details: spawn_error_details(&err),
            })?;
        tracing::debug!(program = %self.program, pid = child.id(), "Recorder spawned");
        Ok(Box::new(ChildRecording { child }))
    }
}

fn spawn_error_details(err: &std::io::Error) -> String {
    match err.kind() {
        ErrorKind::NotFound => format!("command not found (ENOENT): {}", err),
        ErrorKind::PermissionDenied => format!("permission denied: {}", err),
        _ => err.to_string(),
    }
}

struct ChildRecording {
    child: Child,
}

impl RecordingHandle for ChildRecording {
    fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            // SAFETY: kill(2) with a pid we spawned and still own (not yet reaped).
            #[allow(unsafe_code)]
            let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        }
        #[cfg(not(unix))]
        {
            self.child.kill()
        }
    }

    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()?;
        self.child.wait().map(|_| ())
    }

    fn early_failure(&mut self) -> Option<String> {
        let status = self.child.try_wait().ok()??;
        if status.success() {
            return None;
        }
        let mut stderr = String::new();
        if let Some(pipe) = self.child.stderr.as_mut() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let stderr = stderr.trim();
        Some(if stderr.is_empty() {
            format!("recorder exited with {}", status)
        } else {
            stderr.to_string()
        })
    }
}

/// Picks a remediation hint by matching known substrings of the error text.
pub fn remediation_hint(details: &str) -> &'static str {
    let lower = details.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["not found", "enoent", "no such file", "cannot find"]) {
        "Install SoX (macOS: brew install sox, Debian/Ubuntu: sudo apt install sox) and make sure it is on PATH."
    } else if has(&["permission", "denied", "not allowed", "not permitted"]) {
        "Grant microphone access to your terminal or editor in the system privacy settings."
    } else if has(&["busy", "in use", "resource temporarily unavailable"]) {
        "Another application is using the microphone. Close it and try again."
    } else {
        "Check that a microphone is connected and that SoX can record (try: sox -d test.wav)."
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechPhase {
    Idle,
    Recording,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { output: PathBuf },
    /// Audio handed to the transcriber.
    Transcribing { request_id: String },
    /// Final text. Empty when the transcriber did not answer in time.
    Transcribed { text: String, timed_out: bool },
    NoSpeech,
    Failed { message: String, hint: String },
}

impl SpeechEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SpeechEvent::Transcribed { .. } | SpeechEvent::NoSpeech | SpeechEvent::Failed { .. }
        )
    }
}

struct RecordingSession {
    handle: Box<dyn RecordingHandle>,
    output: PathBuf,
    started: Instant,
}

struct PendingTranscription {
    request_id: String,
    audio: PathBuf,
    deadline: Deadline,
}

enum State {
    Idle,
    Recording(RecordingSession),
    Processing(PendingTranscription),
}

pub struct SpeechCapture {
    state: State,
    recorder: Box<dyn Recorder>,
    exchange_dir: PathBuf,
    min_audio_bytes: u64,
    speech_timeout: Duration,
    max_recording: Duration,
}

impl SpeechCapture {
    pub fn new(recorder: Box<dyn Recorder>, exchange_dir: &Path, settings: &Settings) -> Self {
        Self {
            state: State::Idle,
            recorder,
            exchange_dir: exchange_dir.to_path_buf(),
            min_audio_bytes: settings.min_audio_bytes,
            speech_timeout: settings.speech_timeout(),
            max_recording: settings.max_recording(),
        }
    }

    pub fn phase(&self) -> SpeechPhase {
        match self.state {
            State::Idle => SpeechPhase::Idle,
            State::Recording(_) => SpeechPhase::Recording,
            State::Processing(_) => SpeechPhase::Processing,
        }
    }

    /// Starts recording. Rejected (state unchanged) unless Idle.
    pub fn start(&mut self, now: Instant) -> Result<SpeechEvent> {
        if !matches!(self.state, State::Idle) {
            return Err(GateError::RecordingActive);
        }

        let output = files::audio_path(&self.exchange_dir, Utc::now().timestamp_millis());
        match self.recorder.start(&output) {
            Ok(handle) => {
                tracing::info!(output = %output.display(), "Recording started");
                self.state = State::Recording(RecordingSession {
                    handle,
                    output: output.clone(),
                    started: now,
                });
                Ok(SpeechEvent::Started { output })
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(error = %message, "Recorder failed to start");
                Ok(SpeechEvent::Failed {
                    hint: remediation_hint(&message).to_string(),
                    message,
                })
            }
        }
    }

    /// Stops recording and, if the audio looks like speech, requests a
    /// transcription.
    pub fn stop(&mut self, now: Instant) -> Result<SpeechEvent> {
        let session = match std::mem::replace(&mut self.state, State::Idle) {
            State::Recording(session) => session,
            other => {
                self.state = other;
                return Err(GateError::NotRecording);
            }
        };
        Ok(self.finish_recording(session, now))
    }

    /// Advances timers: early recorder exit, maximum recording length,
    /// transcription result or timeout.
    pub fn poll(&mut self, now: Instant) -> Option<SpeechEvent> {
        match &mut self.state {
            State::Idle => None,
            State::Recording(session) => {
                if let Some(failure) = session.handle.early_failure() {
                    let output = session.output.clone();
                    self.state = State::Idle;
                    discard(&output);
                    tracing::warn!(error = %failure, "Recorder exited early");
                    return Some(SpeechEvent::Failed {
                        hint: remediation_hint(&failure).to_string(),
                        message: failure,
                    });
                }
                if now.duration_since(session.started) >= self.max_recording {
                    tracing::info!("Maximum recording length reached; stopping");
                    return self.stop(now).ok();
                }
                None
            }
            State::Processing(pending) => {
                let response_path =
                    files::speech_response_path(&self.exchange_dir, &pending.request_id);
                if let Some(result) = read_speech_result(&response_path) {
                    let pending = self.take_pending()?;
                    discard(&response_path);
                    discard(&pending.audio);
                    return Some(match result.error {
                        Some(error) if result.transcription.trim().is_empty() => {
                            tracing::warn!(error = %error, "Transcriber reported an error");
                            SpeechEvent::Failed {
                                hint: remediation_hint(&error).to_string(),
                                message: error,
                            }
                        }
                        _ => {
                            tracing::info!(
                                request_id = %pending.request_id,
                                chars = result.transcription.len(),
                                "Transcription received"
                            );
                            SpeechEvent::Transcribed {
                                text: result.transcription.trim().to_string(),
                                timed_out: false,
                            }
                        }
                    });
                }

                if pending.deadline.is_due(now) {
                    let pending = self.take_pending()?;
                    tracing::warn!(request_id = %pending.request_id, "Transcription timed out");
                    discard(&files::speech_trigger_path(
                        &self.exchange_dir,
                        &pending.request_id,
                    ));
                    discard(&pending.audio);
                    return Some(SpeechEvent::Transcribed {
                        text: String::new(),
                        timed_out: true,
                    });
                }
                None
            }
        }
    }

    /// Abandons whatever is in flight and returns to Idle. Used on shutdown.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {}
            State::Recording(mut session) => {
                let _ = session.handle.kill();
                discard(&session.output);
            }
            State::Processing(pending) => {
                discard(&files::speech_trigger_path(
                    &self.exchange_dir,
                    &pending.request_id,
                ));
                discard(&pending.audio);
            }
        }
    }

    fn take_pending(&mut self) -> Option<PendingTranscription> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Processing(pending) => Some(pending),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn finish_recording(&mut self, mut session: RecordingSession, now: Instant) -> SpeechEvent {
        if let Some(failure) = session.handle.early_failure() {
            discard(&session.output);
            return SpeechEvent::Failed {
                hint: remediation_hint(&failure).to_string(),
                message: failure,
            };
        }

        stop_process(session.handle.as_mut());

        let size = match fs_err::metadata(&session.output) {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::warn!(error = %err, "Recording produced no audio file");
                0
            }
        };
        if size < self.min_audio_bytes {
            tracing::info!(
                bytes = size,
                threshold = self.min_audio_bytes,
                "Recording below threshold; treating as silence"
            );
            discard(&session.output);
            return SpeechEvent::NoSpeech;
        }

        let request_id = format!("speech_{}", ulid::Ulid::new().to_string().to_lowercase());
        let request = SpeechRequest::new(&request_id, &session.output.to_string_lossy());
        let request_path = files::speech_trigger_path(&self.exchange_dir, &request_id);
        if let Err(err) = write_json_atomic(&request_path, &request) {
            let message = err.to_string();
            discard(&session.output);
            return SpeechEvent::Failed {
                hint: remediation_hint(&message).to_string(),
                message,
            };
        }

        let mut deadline = Deadline::disarmed();
        deadline.arm(now, self.speech_timeout);
        tracing::info!(request_id = %request_id, bytes = size, "Transcription requested");
        self.state = State::Processing(PendingTranscription {
            request_id: request_id.clone(),
            audio: session.output,
            deadline,
        });
        SpeechEvent::Transcribing { request_id }
    }
}

fn stop_process(handle: &mut dyn RecordingHandle) {
    if let Err(err) = handle.terminate() {
        tracing::debug!(error = %err, "Recorder terminate failed");
    }
    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        match handle.has_exited() {
            Ok(true) => return,
            Ok(false) => thread::sleep(STOP_POLL),
            Err(err) => {
                tracing::debug!(error = %err, "Recorder wait failed");
                break;
            }
        }
    }
    tracing::warn!("Recorder did not exit after terminate; killing");
    let _ = handle.kill();
}

fn read_speech_result(path: &Path) -> Option<SpeechResult> {
    let bytes = match fs_err::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read speech response");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::debug!(error = %err, "Speech response not parseable yet");
            None
        }
    }
}

fn discard(path: &Path) {
    if let Err(err) = remove_if_exists(path) {
        tracing::debug!(path = %path.display(), error = %err, "Failed to remove speech file");
    }
}
