use std::io::{self, Write};
use std::sync::Arc;

use murmur_llm::{ChatTransport, HttpTransport, Language, TransportError};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{ChatSession, MessageStatus, SessionUpdate, StreamOutcome, Transcript};
use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::settings::SettingsStore;

const HELP: &str = "Type a message and press enter. Commands: /stop, /docs on|off, \
/lang en|ko, /status, /help, /quit";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Stop,
    Docs(bool),
    Lang(Language),
    Status,
    Help,
    Quit,
    Invalid(String),
}

/// Returns `None` for blank lines.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next();
    if parts.next().is_some() {
        return Some(Command::Invalid(line.to_string()));
    }

    let command = match (name, argument) {
        ("stop", None) => Command::Stop,
        ("docs", Some("on")) => Command::Docs(true),
        ("docs", Some("off")) => Command::Docs(false),
        ("lang", Some(code)) => match Language::parse(code) {
            Some(language) => Command::Lang(language),
            None => Command::Invalid(line.to_string()),
        },
        ("status", None) => Command::Status,
        ("help", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        _ => Command::Invalid(line.to_string()),
    };
    Some(command)
}

/// Text to print for one session update, if any.
pub fn render_update(update: &SessionUpdate, transcript: &Transcript) -> Option<String> {
    match update {
        SessionUpdate::TokenAppended { token, .. } => Some(token.clone()),
        SessionUpdate::TurnFinished {
            message_id,
            outcome,
            ..
        } => match outcome {
            StreamOutcome::Completed => Some("\n".to_string()),
            StreamOutcome::Cancelled => Some("\n[stopped]\n".to_string()),
            StreamOutcome::Failed(_) => transcript
                .get(*message_id)
                .filter(|message| message.status == MessageStatus::Errored)
                .map(|message| format!("\n{}\n", message.content)),
        },
        SessionUpdate::TurnOpened { .. }
        | SessionUpdate::ContextProvided(_)
        | SessionUpdate::Ignored => None,
    }
}

pub fn render_connection(state: &ConnectionState) -> String {
    match (state.connected, state.last_error.as_deref()) {
        (true, _) => "[online]".to_string(),
        (false, Some(error)) => format!("[offline: {error}]"),
        (false, None) => "[offline]".to_string(),
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to set up the backend transport on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: io::Error,
    },
}

enum Flow {
    Continue,
    Quit,
}

/// Terminal front end wiring settings, the session and the connection monitor.
pub struct ChatApp {
    store: SettingsStore,
    session: ChatSession,
    monitor: ConnectionMonitor,
}

impl ChatApp {
    /// Must be called inside a Tokio runtime: the connection monitor starts probing here.
    pub fn new(store: SettingsStore) -> Result<Self, AppError> {
        let settings = store.settings().clone();
        let transport: Arc<dyn ChatTransport> = Arc::new(
            HttpTransport::new(settings.transport_config()).context(TransportSnafu {
                stage: "create-http-transport",
            })?,
        );

        let monitor = ConnectionMonitor::spawn(Arc::clone(&transport), settings.probe_interval());
        let session =
            ChatSession::new(transport, monitor.handle()).with_preferences(settings.preferences());

        tracing::info!(
            endpoint = %settings.endpoint,
            config_path = ?store.config_path(),
            "chat app ready"
        );

        Ok(Self {
            store,
            session,
            monitor,
        })
    }

    pub async fn run(self) -> Result<(), AppError> {
        let Self {
            mut store,
            mut session,
            monitor,
        } = self;

        let mut connection = monitor.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut out = io::stdout();
        let mut interrupts_enabled = true;

        write_out(&mut out, &format!("{HELP}\n"))?;

        loop {
            tokio::select! {
                update = session.next_update(), if session.is_in_flight() => {
                    if let Some(text) = update
                        .and_then(|update| render_update(&update, session.transcript()))
                    {
                        write_out(&mut out, &text)?;
                    }
                }
                changed = connection.changed() => {
                    if changed.is_ok() {
                        let state = connection.borrow_and_update().clone();
                        write_out(&mut out, &format!("{}\n", render_connection(&state)))?;
                    }
                }
                interrupted = tokio::signal::ctrl_c(), if interrupts_enabled => {
                    match interrupted {
                        Ok(()) if session.cancel() => {}
                        Ok(()) => break,
                        Err(error) => {
                            tracing::warn!(error = %error, "ctrl-c handling unavailable");
                            interrupts_enabled = false;
                        }
                    }
                }
                line = lines.next_line() => {
                    let line = line.context(ReadInputSnafu {
                        stage: "read-stdin-line",
                    })?;
                    let Some(line) = line else {
                        break;
                    };
                    let Some(command) = parse_command(&line) else {
                        continue;
                    };
                    let flow = apply_command(command, &mut session, &mut store, &mut out)?;
                    if let Flow::Quit = flow {
                        break;
                    }
                }
            }
        }

        session.cancel();
        monitor.shutdown().await;
        Ok(())
    }
}

fn apply_command(
    command: Command,
    session: &mut ChatSession,
    store: &mut SettingsStore,
    out: &mut impl Write,
) -> Result<Flow, AppError> {
    match command {
        Command::Send(text) => match session.send(&text) {
            Ok(_) => write_out(out, "assistant> ")?,
            Err(rejection) => write_out(out, &format!("[not sent: {rejection}]\n"))?,
        },
        Command::Stop => {
            if !session.cancel() {
                write_out(out, "[nothing to stop]\n")?;
            }
        }
        Command::Docs(use_docs) => {
            session.set_use_docs(use_docs);
            let mut settings = store.settings().clone();
            settings.use_docs = use_docs;
            save_settings(store, settings, out)?;
        }
        Command::Lang(language) => {
            session.set_language(language);
            let mut settings = store.settings().clone();
            settings.language = language;
            save_settings(store, settings, out)?;
        }
        Command::Status => {
            let preferences = session.preferences();
            let status = format!(
                "{} docs={} lang={}\n",
                render_connection(&session.connection().state()),
                if preferences.use_docs { "on" } else { "off" },
                preferences.language.code(),
            );
            write_out(out, &status)?;
        }
        Command::Help => write_out(out, &format!("{HELP}\n"))?,
        Command::Quit => return Ok(Flow::Quit),
        Command::Invalid(line) => write_out(out, &format!("[unknown command: {line}]\n"))?,
    }
    Ok(Flow::Continue)
}

fn save_settings(
    store: &mut SettingsStore,
    settings: crate::settings::ChatSettings,
    out: &mut impl Write,
) -> Result<(), AppError> {
    match store.update(settings) {
        Ok(()) => write_out(out, "[saved]\n"),
        Err(error) => {
            tracing::warn!(error = %error, "failed to persist preferences");
            write_out(out, "[applied for this session only; could not save settings]\n")
        }
    }
}

fn write_out(out: &mut impl Write, text: &str) -> Result<(), AppError> {
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .context(WriteOutputSnafu {
            stage: "write-stdout",
        })
}
