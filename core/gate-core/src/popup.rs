//! The single popup surface and what it shows.
//!
//! The presenter owns one [`PopupSurface`] for the lifetime of the bridge.
//! Each trigger reuses it: the view is replaced, the surface is never torn
//! down between triggers. Which front end draws it (terminal, editor webview,
//! a test script) is behind the trait.

use std::path::PathBuf;

use review_gate_protocol::{ToolKind, Trigger};

/// Marker the agent treats as "stop looping". Passed through untouched.
pub const COMPLETION_SENTINEL: &str = "TASK_COMPLETE";

/// Static presentation chosen by tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupTemplate {
    pub title: &'static str,
    pub default_prompt: &'static str,
    pub placeholder: &'static str,
    /// Show the "type TASK_COMPLETE when done" hint.
    pub completion_hint: bool,
}

const DEFAULT_TEMPLATE: PopupTemplate = PopupTemplate {
    title: "Review Gate",
    default_prompt: "Please provide your review or feedback:",
    placeholder: "Type your response...",
    completion_hint: true,
};

pub fn template_for(tool: &ToolKind) -> PopupTemplate {
    match tool {
        ToolKind::ReviewGateChat => DEFAULT_TEMPLATE,
        ToolKind::QuickReview => PopupTemplate {
            title: "Quick Review",
            default_prompt: "Quick review requested:",
            placeholder: "Short answer...",
            completion_hint: false,
        },
        ToolKind::FileReview => PopupTemplate {
            title: "File Review",
            default_prompt: "Please review the selected file:",
            placeholder: "Comments on the file...",
            completion_hint: false,
        },
        ToolKind::IngestText => PopupTemplate {
            title: "Provide Text",
            default_prompt: "Paste the text to hand to the agent:",
            placeholder: "Paste text here...",
            completion_hint: false,
        },
        ToolKind::ShutdownMcp => PopupTemplate {
            title: "Shutdown Request",
            default_prompt: "The agent asks to shut down the MCP server. Type CONFIRM to allow:",
            placeholder: "CONFIRM or a reason to keep running...",
            completion_hint: false,
        },
        ToolKind::Other(_) => DEFAULT_TEMPLATE,
    }
}

/// Everything the surface needs to draw one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupView {
    pub trigger_id: String,
    pub tool: ToolKind,
    pub title: String,
    pub message: String,
    pub context: Option<String>,
    pub urgent: bool,
    pub placeholder: String,
    pub completion_hint: bool,
    pub file_path: Option<String>,
}

impl PopupView {
    pub fn from_trigger(trigger: &Trigger) -> Self {
        let template = template_for(&trigger.tool);
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            trigger_id: trigger.trigger_id.clone(),
            tool: trigger.tool.clone(),
            title: non_empty(&trigger.title).unwrap_or_else(|| template.title.to_string()),
            message: non_empty(&trigger.message)
                .unwrap_or_else(|| template.default_prompt.to_string()),
            context: non_empty(&trigger.context),
            urgent: trigger.urgent,
            placeholder: template.placeholder.to_string(),
            completion_hint: template.completion_hint,
            file_path: trigger
                .extra
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

/// One logical user action on the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Submit { text: String },
    Attach(PathBuf),
    StartRecording,
    StopRecording,
    Quit,
}

/// Feedback shown to the user outside the trigger view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error { message: String, hint: Option<String> },
    /// Speech result to place in the input box.
    Transcription(String),
}

/// A front end able to draw the popup and report user actions.
pub trait PopupSurface {
    /// Shows `view`, opening the surface on first use and reusing it after.
    fn present(&mut self, view: &PopupView);

    fn notify(&mut self, notice: &Notice);

    /// Next pending action, without blocking.
    fn next_action(&mut self) -> Option<UserAction>;
}

/// Owns the surface and the active trigger.
pub struct Presenter<S: PopupSurface> {
    surface: S,
    active: Option<Trigger>,
    activations: u64,
}

impl<S: PopupSurface> Presenter<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            active: None,
            activations: 0,
        }
    }

    /// Makes `trigger` active, replacing any previous one, and draws it.
    pub fn present(&mut self, trigger: Trigger) -> PopupView {
        let view = PopupView::from_trigger(&trigger);
        if let Some(previous) = &self.active {
            tracing::info!(
                previous = %previous.trigger_id,
                next = %trigger.trigger_id,
                "Replacing active trigger"
            );
        }
        self.surface.present(&view);
        self.active = Some(trigger);
        self.activations += 1;
        view
    }

    pub fn active(&self) -> Option<&Trigger> {
        self.active.as_ref()
    }

    pub fn take_active(&mut self) -> Option<Trigger> {
        self.active.take()
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn notify(&mut self, notice: Notice) {
        self.surface.notify(&notice);
    }

    pub fn next_action(&mut self) -> Option<UserAction> {
        self.surface.next_action()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}
