use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use live_session::{LiveModel, LiveSender};
use live_wire::{LiveServerMessage, Part, ServerContent};
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::LiveServiceConfig;
use logging::LiveLogFormatter;

#[derive(Parser, Debug)]
#[command(name = "redb-live")]
#[command(about = "Interactive live session against a generative model")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "/etc/redb/config.yaml")]
    config: PathBuf,

    /// Project hosting the model
    #[arg(long)]
    project_id: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// "vertex" or "google"
    #[arg(long)]
    backend: Option<String>,

    /// Vertex AI location
    #[arg(long)]
    location: Option<String>,

    /// API key
    #[arg(long)]
    api_key: Option<String>,

    /// Bound on opening the connection, e.g. "30s"
    #[arg(long)]
    request_timeout: Option<humantime::Duration>,

    /// Send each line as a complete turn instead of realtime text
    #[arg(long)]
    turns: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut LiveServiceConfig) {
        if let Some(project_id) = &self.project_id {
            config.project_id = project_id.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        if let Some(location) = &self.location {
            config.location = location.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout.into();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_live={}", args.log_level).parse()?)
        .add_directive(format!("live_session={}", args.log_level).parse()?)
        .add_directive(format!("live_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .event_format(LiveLogFormatter::new("redb-live"))
        .init();

    info!("Starting reDB Live v{}", env!("CARGO_PKG_VERSION"));

    let mut service_config = LiveServiceConfig::load_from_file(&args.config)?;
    args.apply(&mut service_config);
    let session_config = service_config
        .session_config()
        .context("invalid live configuration")?;

    let mut session = LiveModel::new(session_config)
        .connect()
        .await
        .context("failed to open live session")?;
    component_info!("session", "Live session ready, type a message and press enter");

    let sender = session.sender();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    let outcome = loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => send_line(&sender, line, args.turns),
                Ok(None) => {
                    component_info!("session", "Input closed, ending session");
                    input_open = false;
                    session.close().await;
                }
                Err(e) => {
                    component_error!("session", "Failed to read input: {}", e);
                    input_open = false;
                    session.close().await;
                }
            },
            message = session.responses().next() => match message {
                Some(Ok(message)) => render(message),
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                component_info!("session", "Interrupted, closing session");
                session.close().await;
                break Ok(());
            }
        }
    };

    session.close().await;
    outcome.context("live session ended")?;
    info!("Live session finished");
    Ok(())
}

fn send_line(sender: &LiveSender, line: String, as_turn: bool) {
    if as_turn {
        sender.send_content(vec![Part::text(line)], true);
    } else {
        sender.send_text_realtime(line);
    }
}

fn render(message: LiveServerMessage) {
    match message {
        LiveServerMessage::Content(content) => render_content(&content),
        LiveServerMessage::ToolCall(call) => {
            for function in call.function_calls {
                println!("[tool call] {}({})", function.name, function.args);
            }
        }
        LiveServerMessage::ToolCallCancellation(cancellation) => {
            println!("[tool calls cancelled] {}", cancellation.ids.join(", "));
        }
        LiveServerMessage::GoingAway(go_away) => match go_away.time_left() {
            Some(left) => component_warn!(
                "session",
                "Server is going away in {}",
                humantime::format_duration(left)
            ),
            None => component_warn!("session", "Server is going away"),
        },
    }
}

fn render_content(content: &ServerContent) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{}", content.text());

    let transcript = content.output_transcript();
    if !transcript.is_empty() {
        let _ = write!(stdout, "{}", transcript);
    }
    if content.interrupted {
        let _ = writeln!(stdout, " [interrupted]");
    }
    if content.turn_complete {
        let _ = writeln!(stdout);
    }
    let _ = stdout.flush();
}
