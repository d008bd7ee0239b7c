use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use relay_api::compute_signature;
use relay_clients::{
    build_http_client, Assistant, AssistantSettings, ClientError, DeliveryOutcome,
    HttpRecordStore, OfflineAssistant, OfflineRecordStore, OpenAiChatClient, RecordStore,
    ReplyGateway,
};
use relay_core::{
    CardAction, DialogueScript, EventMode, InboundEvent, LocalConfig, OutboundMessage,
    RelayConfig, ReplyHandle,
};
use relay_dispatcher::{Collaborators, DispatchSettings, Dispatcher, EventOutcome};
use relay_observability::{init_tracing, AppMetrics};
use relay_storage::{SessionSettings, SessionStore, Store};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "relay")]
#[command(about = "Care Relay operator CLI")]
struct Cli {
    /// JSON dialogue script; the built-in script is used when omitted.
    #[arg(long, env = "RELAY_SCRIPTS_PATH")]
    scripts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Talk to the dispatcher from the terminal.
    Chat {
        #[arg(long, default_value = "local-user")]
        user: String,
    },
    /// Print the dialogue script and its trigger phrases.
    Scripts,
    /// Validate the webhook environment without starting the server.
    CheckConfig,
    /// Sign a request body the way the messaging platform does.
    Sign {
        #[arg(long, env = "RELAY_LINE_CHANNEL_SECRET")]
        secret: String,
        body: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("relay_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Chat { user } => {
            let script = load_script(cli.scripts.as_deref())?;
            run_chat(build_dispatcher(script).await?, &user).await?
        }
        Command::Scripts => {
            let script = load_script(cli.scripts.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&script)?);
            println!("\ntriggers: {}", script.trigger_phrases().join(", "));
        }
        Command::CheckConfig => {
            let config = RelayConfig::from_env().context("invalid relay configuration")?;
            println!("{config:#?}");
        }
        Command::Sign { secret, body } => {
            let raw = std::fs::read(&body)
                .with_context(|| format!("failed reading {}", body.display()))?;
            let signature =
                compute_signature(&secret, &raw).context("channel secret rejected by HMAC")?;
            println!("{signature}");
        }
    }

    Ok(())
}

fn load_script(path: Option<&Path>) -> Result<DialogueScript> {
    match path {
        Some(path) => DialogueScript::load(path)
            .with_context(|| format!("failed loading dialogue script from {}", path.display())),
        None => Ok(DialogueScript::builtin()),
    }
}

struct ConsoleGateway;

#[async_trait]
impl ReplyGateway for ConsoleGateway {
    async fn deliver(
        &self,
        _handle: ReplyHandle,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        print_message(&message);
        Ok(DeliveryOutcome::Sent)
    }

    async fn push(
        &self,
        user_id: &str,
        message: OutboundMessage,
    ) -> Result<DeliveryOutcome, ClientError> {
        println!("[push to {user_id}]");
        print_message(&message);
        Ok(DeliveryOutcome::Sent)
    }
}

fn print_message(message: &OutboundMessage) {
    match message {
        OutboundMessage::PlainText(text) => println!("\n{text}\n"),
        OutboundMessage::Card(card) => {
            println!("\n[{}]", card.title);
            if let Some(body) = card.body.as_deref() {
                println!("{body}");
            }
            for button in &card.buttons {
                match &button.action {
                    CardAction::Message(text) => println!("  ( {} ) -> says \"{text}\"", button.label),
                    CardAction::Uri(url) => println!("  ( {} ) -> {url}", button.label),
                }
            }
            println!();
        }
    }
}

async fn build_dispatcher(script: DialogueScript) -> Result<Dispatcher<Store>> {
    let config = LocalConfig::from_env().context("invalid relay configuration")?;
    let http = build_http_client(config.upstream_timeout)?;

    let assistant: Arc<dyn Assistant> = match config.openai_api_key.as_deref() {
        Some(api_key) => Arc::new(OpenAiChatClient::new(
            http.clone(),
            api_key,
            AssistantSettings {
                model: config.openai_model.clone(),
                reply_language: config.reply_language.clone(),
                max_tokens: config.max_tokens,
            },
        )),
        None => Arc::new(OfflineAssistant),
    };

    let records: Arc<dyn RecordStore> = match config.record_store_url.clone() {
        Some(endpoint) => Arc::new(HttpRecordStore::new(http, endpoint)),
        None => Arc::new(OfflineRecordStore),
    };

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    Ok(Dispatcher::new(
        Arc::new(script),
        SessionStore::new(
            Arc::new(store),
            SessionSettings {
                idle_timeout: config.session_idle,
                history_limit: config.history_limit,
                ..SessionSettings::default()
            },
        ),
        Collaborators {
            gateway: Arc::new(ConsoleGateway),
            assistant,
            records,
        },
        AppMetrics::shared(),
        DispatchSettings {
            upstream_timeout: config.upstream_timeout,
            admin_user_id: config.admin_user_id,
            log_conversations: false,
        },
    ))
}

async fn run_chat(dispatcher: Dispatcher<Store>, user: &str) -> Result<()> {
    println!(
        "Care Relay chat mode. try: {}. type 'exit' to quit.",
        dispatcher.script().trigger_phrases().join(", ")
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message.is_empty() {
            continue;
        }

        let event_id = Uuid::new_v4().to_string();
        let outcome = dispatcher
            .handle_event(InboundEvent {
                reply_handle: ReplyHandle::new(format!("console-{event_id}")),
                event_id,
                user_id: Some(user.to_string()),
                text: Some(message.to_string()),
                mode: EventMode::Active,
                redelivery: false,
            })
            .await;

        if let EventOutcome::DeliveryFailed { kind, .. } = outcome {
            eprintln!("reply failed: {}", kind.as_str());
        }
    }

    Ok(())
}
