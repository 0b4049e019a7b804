//! review-gate: terminal bridge between an agent and a human reviewer.
//!
//! ## Subcommands
//!
//! - `watch`: Run the bridge with a terminal popup
//! - `ask`: Post a trigger as the agent would and print the reply
//! - `status`: Report MCP server liveness and the socket
//! - `history`: Browse past prompts and replies
//! - `settings`: Show or update the settings file

mod ask;
mod logging;
mod terminal;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use review_gate_core::{
    check_server_status, config, CancellationToken, CommandRecorder, Controller, MessageStore,
    SettingsOverrides, StorageConfig,
};
use review_gate_protocol::files;

#[derive(Parser)]
#[command(name = "review-gate")]
#[command(about = "Human-in-the-loop review popup for coding agents")]
#[command(version)]
struct Cli {
    /// Directory shared with the agent (default: $REVIEW_GATE_EXCHANGE_DIR or /tmp)
    #[arg(long, global = true, value_name = "DIR")]
    exchange_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for triggers and answer them in this terminal
    Watch {
        /// Idle seconds before the automatic reply (30-600)
        #[arg(long)]
        timeout: Option<u64>,

        /// Text sent when the idle timer fires
        #[arg(long)]
        auto_message: Option<String>,

        /// Recording program (sox, rec or arecord)
        #[arg(long)]
        recorder: Option<String>,

        /// Do not listen on the socket; file triggers only
        #[arg(long)]
        no_ipc: bool,

        /// Do not record message history
        #[arg(long)]
        no_history: bool,
    },

    /// Send a trigger and wait for the reviewer's reply
    Ask {
        /// Prompt shown to the reviewer
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Tool name (review_gate_chat, quick_review, file_review, ...)
        #[arg(long, default_value = "review_gate_chat")]
        tool: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        context: Option<String>,

        /// Trigger id (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Seconds to wait for the reply (default: no limit)
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds to wait for the popup acknowledgement
        #[arg(long, default_value_t = ask::ACK_TIMEOUT.as_secs())]
        ack_timeout: u64,

        /// Use trigger files even if the socket is available
        #[arg(long)]
        files_only: bool,

        /// Print the full response record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show MCP server liveness
    Status,

    /// List stored messages
    History {
        /// Only messages from this day (YYYY-MM-DD)
        #[arg(long, conflicts_with = "search")]
        date: Option<String>,

        /// Substring to search for
        #[arg(long)]
        search: Option<String>,

        /// List the days that have messages
        #[arg(long, conflicts_with_all = ["date", "search"])]
        dates: bool,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show settings, or update them when options are given
    Settings {
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        auto_message: Option<String>,

        #[arg(long)]
        recorder: Option<String>,

        #[arg(long)]
        ipc: Option<bool>,
    },
}

fn main() {
    let cli = Cli::parse();

    let storage = match resolve_storage(cli.exchange_dir.clone()) {
        Ok(storage) => storage,
        Err(err) => {
            logging::init_stderr();
            tracing::error!(error = %err, "review-gate startup failed");
            std::process::exit(1);
        }
    };

    let _logging_guard = match cli.command {
        Commands::Watch { .. } | Commands::Ask { .. } => logging::init_file(storage.exchange_dir()),
        _ => {
            logging::init_stderr();
            None
        }
    };

    let result = match cli.command {
        Commands::Watch {
            timeout,
            auto_message,
            recorder,
            no_ipc,
            no_history,
        } => run_watch(
            &storage,
            &SettingsOverrides {
                timeout,
                auto_message,
                recorder_program: recorder,
                ipc_enabled: no_ipc.then_some(false),
            },
            !no_history,
        ),
        Commands::Ask {
            message,
            tool,
            title,
            context,
            id,
            timeout,
            ack_timeout,
            files_only,
            json,
        } => run_ask(
            storage.exchange_dir(),
            &ask::AskOptions {
                message,
                tool,
                title,
                context,
                trigger_id: id,
                timeout: timeout.map(Duration::from_secs),
                ack_timeout: Duration::from_secs(ack_timeout),
                use_socket: !files_only,
            },
            json,
        ),
        Commands::Status => run_status(&storage),
        Commands::History {
            date,
            search,
            dates,
            limit,
        } => run_history(&storage, date, search, dates, limit),
        Commands::Settings {
            timeout,
            auto_message,
            recorder,
            ipc,
        } => run_settings(
            &storage,
            &SettingsOverrides {
                timeout,
                auto_message,
                recorder_program: recorder,
                ipc_enabled: ipc,
            },
        ),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "review-gate failed");
        eprintln!("review-gate: {}", err);
        std::process::exit(1);
    }
}

fn resolve_storage(exchange_dir: Option<PathBuf>) -> Result<StorageConfig, String> {
    let storage = StorageConfig::resolve()?;
    Ok(match exchange_dir {
        Some(dir) => storage.with_exchange_dir(dir),
        None => storage,
    })
}

fn install_ctrlc(token: CancellationToken) -> Result<(), String> {
    ctrlc::set_handler(move || token.cancel())
        .map_err(|err| format!("Failed to install Ctrl-C handler: {}", err))
}

fn run_watch(
    storage: &StorageConfig,
    overrides: &SettingsOverrides,
    with_history: bool,
) -> Result<(), String> {
    storage.ensure_exchange_dir()?;
    let mut settings = config::load_or_default(&storage.settings_file());
    settings.apply(overrides);

    let recorder = Box::new(CommandRecorder::from_settings(&settings));
    let mut controller = Controller::new(
        storage,
        settings.clone(),
        terminal::TerminalSurface::spawn(),
        recorder,
    );

    if with_history {
        match MessageStore::open(&storage.history_db()) {
            Ok(store) => controller = controller.with_history(store),
            Err(err) => tracing::warn!(error = %err, "History unavailable; continuing without it"),
        }
    }

    #[cfg(unix)]
    let _ipc_server = if settings.ipc_enabled {
        match review_gate_core::IpcServer::bind(&files::socket_path(storage.exchange_dir())) {
            Ok((server, inbox)) => {
                controller = controller.with_ipc_inbox(inbox);
                Some(server)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Socket unavailable; file triggers only");
                None
            }
        }
    } else {
        None
    };

    install_ctrlc(controller.token())?;
    println!(
        "Watching {} for review requests (Ctrl-C to stop)",
        storage.exchange_dir().display()
    );
    controller.run();
    Ok(())
}

fn run_ask(exchange_dir: &Path, options: &ask::AskOptions, json: bool) -> Result<(), String> {
    let token = CancellationToken::new();
    install_ctrlc(token.clone())?;

    let record = ask::run(exchange_dir, options, &token)?;
    if json {
        let rendered = serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?;
        println!("{}", rendered);
    } else {
        println!("{}", record.user_input);
        for attachment in &record.attachments {
            println!(
                "[attachment: {} ({}, {} bytes)]",
                attachment.file_name, attachment.mime_type, attachment.size
            );
        }
    }
    Ok(())
}

fn run_status(storage: &StorageConfig) -> Result<(), String> {
    let settings = config::load_or_default(&storage.settings_file());
    let now = SystemTime::now();
    let status = check_server_status(storage.exchange_dir(), settings.status_freshness(), now);

    let state = if status.active { "active" } else { "inactive" };
    match (&status.log_path, status.age(now)) {
        (Some(path), Some(age)) => println!(
            "MCP server: {} (log {} updated {}s ago)",
            state,
            path.display(),
            age.as_secs()
        ),
        _ => println!("MCP server: {} (no status log)", state),
    }

    #[cfg(unix)]
    {
        let socket = files::socket_path(storage.exchange_dir());
        let request = review_gate_protocol::Request::new(
            review_gate_protocol::Method::GetHealth,
            None,
            None,
        );
        match review_gate_core::send_request(&socket, &request, Some(Duration::from_secs(2))) {
            Ok(response) if response.ok => {
                println!("Bridge socket: listening ({})", socket.display())
            }
            Ok(response) => println!(
                "Bridge socket: error {}",
                response.error.map(|e| e.to_string()).unwrap_or_default()
            ),
            Err(_) => println!("Bridge socket: not running"),
        }
    }
    Ok(())
}

fn run_history(
    storage: &StorageConfig,
    date: Option<String>,
    search: Option<String>,
    dates: bool,
    limit: usize,
) -> Result<(), String> {
    let store = MessageStore::open(&storage.history_db())?;

    if dates {
        for day in store.available_dates()? {
            println!("{}", day);
        }
        return Ok(());
    }

    let messages = match (date, search) {
        (Some(date), _) => store.by_date(&date, limit)?,
        (None, Some(query)) => store.search(&query, limit)?,
        (None, None) => store.recent(limit)?,
    };
    if messages.is_empty() {
        println!("No messages");
    }
    for message in messages {
        let attachments = if message.attachments.is_empty() {
            String::new()
        } else {
            format!(" [+{} attachment(s)]", message.attachments.len())
        };
        println!(
            "{} [{}] {}: {}{}",
            message.timestamp,
            message.kind.as_str(),
            message.trigger_id.as_deref().unwrap_or("-"),
            message.content,
            attachments
        );
    }
    Ok(())
}

fn run_settings(storage: &StorageConfig, overrides: &SettingsOverrides) -> Result<(), String> {
    let path = storage.settings_file();
    let mut settings = config::load(&path)?;

    let changed = overrides.timeout.is_some()
        || overrides.auto_message.is_some()
        || overrides.recorder_program.is_some()
        || overrides.ipc_enabled.is_some();
    if changed {
        settings.apply(overrides);
        config::save(&path, &settings)?;
        tracing::info!(path = %path.display(), "Settings saved");
    }

    let rendered = serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(())
}
