mod cli;
mod config;
mod terminal;

use std::io::{IsTerminal, Read};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use deltaflow_core::Config;
use deltaflow_llm::prompts::fortune_prompt;
use deltaflow_llm::providers::build_client;
use deltaflow_llm::{
    run_chat, ChatRequest, CopywritingError, CopywritingGenerator, CopywritingRequest, CozeProvider,
    RelayProvider, RequestSlot, StreamingChatProvider, FALLBACK_MESSAGE,
};
use deltaflow_stream::{ClassifierConfig, StreamOutcome};

use crate::cli::{CliArgs, Command};
use crate::config::CliConfig;
use crate::terminal::{Terminal, TerminalSink};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    deltaflow_core::config::load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    let file_config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let settings = Config::from_env();

    match &args.command {
        Command::Fortune { info } => {
            let info = match info {
                Some(info) => info.clone(),
                None => read_stdin()?,
            };
            if info.trim().is_empty() {
                bail!("no birth details given: pass them as an argument or pipe them on stdin");
            }
            chat(&args, &file_config, &settings, &terminal, fortune_prompt(&info)).await
        }
        Command::Chat { query } => chat(&args, &file_config, &settings, &terminal, query.clone()).await,
        Command::Copywrite { topic, keywords } => {
            let request = CopywritingRequest {
                topic: Some(topic.clone()),
                keywords: keywords.clone(),
            };
            copywrite(&args, &file_config, &settings, &terminal, &request).await
        }
    }
}

fn read_stdin() -> Result<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("no birth details given: pass them as an argument or pipe them on stdin");
    }
    let mut info = String::new();
    stdin.read_to_string(&mut info).context("failed to read stdin")?;
    Ok(info)
}

/// Relay when one is configured, otherwise the agent API directly.
fn chat_provider(
    args: &CliArgs,
    file_config: &CliConfig,
    settings: &Config,
) -> Result<Box<dyn StreamingChatProvider>> {
    let client = build_client(&settings.http)?;

    if let Some(relay) = file_config.resolve_relay(args.relay.as_deref()) {
        return Ok(Box::new(RelayProvider::with_client(
            client,
            relay,
            file_config.resolve_relay_token(),
        )));
    }

    let api_key = file_config
        .resolve_api_key("coze", args.api_key.as_deref())
        .context("no agent API key: pass --api-key, set COZE_API_KEY, or use --relay")?;
    Ok(Box::new(CozeProvider::with_client(
        client,
        api_key,
        settings.coze.base_url.clone(),
    )))
}

async fn chat(
    args: &CliArgs,
    file_config: &CliConfig,
    settings: &Config,
    terminal: &Terminal,
    query: String,
) -> Result<ExitCode> {
    let provider = chat_provider(args, file_config, settings)?;
    let request = ChatRequest::new(query, file_config.resolve_bot_id(args.bot_id.as_deref()));
    terminal.print_header(provider.provider_name(), &request.bot_id)?;
    info!(bot_id = %request.bot_id, user_id = %request.user_id, "starting chat");

    let classifier = ClassifierConfig::from(&settings.stream);
    let slot = RequestSlot::new();
    let ticket = slot.begin();
    let mut sink = TerminalSink::stdout();

    let outcome = tokio::select! {
        outcome = run_chat(provider.as_ref(), &request, &classifier, &mut sink, &ticket) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(StreamOutcome::Completed) => Ok(ExitCode::SUCCESS),
        Some(StreamOutcome::Failed { message }) => {
            warn!(error = %message, chars = sink.chars(), "chat stream failed");
            Ok(ExitCode::FAILURE)
        }
        Some(StreamOutcome::Superseded) => Ok(ExitCode::FAILURE),
        None => {
            slot.cancel();
            terminal.print_info("\n[cancelled]")?;
            Ok(ExitCode::from(130))
        }
    }
}

async fn copywrite(
    args: &CliArgs,
    file_config: &CliConfig,
    settings: &Config,
    terminal: &Terminal,
    request: &CopywritingRequest,
) -> Result<ExitCode> {
    let mut cfg = settings.copywriting.clone();
    cfg.api_key = file_config.resolve_api_key("copywriting", args.api_key.as_deref());
    let generator = CopywritingGenerator::from_config(&cfg, &settings.http)
        .context("copywriting is not configured: pass --api-key or set COPYWRITING_API_KEY")?;

    let spinner = terminal.start_spinner("writing")?;
    let result = tokio::select! {
        result = generator.generate(request) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    spinner.stop();

    match result {
        Some(Ok(resp)) => {
            terminal.print_block(&resp.content)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Err(e @ CopywritingError::MissingTopic)) => {
            terminal.print_error(&e.to_string())?;
            Ok(ExitCode::FAILURE)
        }
        Some(Err(CopywritingError::Llm(e))) => {
            warn!(error = %e, "copywriting failed");
            terminal.print_error(FALLBACK_MESSAGE)?;
            Ok(ExitCode::FAILURE)
        }
        None => {
            terminal.print_info("[cancelled]")?;
            Ok(ExitCode::from(130))
        }
    }
}
