//! CLI entrypoint for roundtable
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use roundtable_application::{
    ConversationStore, LlmGateway, OrchestratorError, TurnEvent, TurnLogger, TurnOrchestrator,
    TurnRequest, spawn_turn_logger,
};
use roundtable_domain::{Attachment, Provider, Turn};
use roundtable_infrastructure::config::Severity;
use roundtable_infrastructure::http::{DEFAULT_CATALOG_TTL, serve};
use roundtable_infrastructure::{
    ConfigLoader, FileConfig, GatewayState, HttpGatewayClient, JsonConversationStore,
    JsonlTurnLogger, ModelCatalog, OpenRouterCatalog, ProviderGateway,
};
use roundtable_presentation::{
    AskArgs, Cli, Command, ConsoleFormatter, OutputFormat, ProgressNotifier, ProgressReporter,
    RetryArgs, SimpleProgress, spawn_progress,
};
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long `ask` lingers for the first turn's title before exiting.
const TITLE_WAIT: Duration = Duration::from_secs(20);

type Orchestrator = TurnOrchestrator<dyn LlmGateway>;

/// One orchestrator command
enum TurnCommand {
    Start(TurnRequest),
    RetryRound(usize),
    RetryStream(usize, usize),
    Continue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.show_config {
        println!("Configuration sources (lowest to highest priority):");
        for line in ConfigLoader::describe_sources(cli.config.as_deref()) {
            println!("  {}", line);
        }
        return Ok(());
    }

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref())?
    };

    let serving = matches!(cli.command, Some(Command::Serve { .. }));
    let _log_guard = init_logging(&cli, &config, serving)?;

    for issue in config.validate() {
        match issue.severity {
            Severity::Error => warn!("config error (using default): {}", issue),
            Severity::Warning => warn!("config: {}", issue),
        }
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Ask(args) => ask(args, &config, cli.gateway_url.as_deref(), cli.quiet).await,
        Command::Retry(args) => retry(args, &config, cli.gateway_url.as_deref(), cli.quiet).await,
        Command::Continue {
            conversation,
            output,
        } => {
            let orchestrator =
                open_orchestrator(&config, cli.gateway_url.as_deref(), Some(&conversation)).await?;
            let result = run_turn(&orchestrator, TurnCommand::Continue, cli.quiet).await;
            finish(&orchestrator, result, output)
        }
        Command::Serve { bind } => run_server(&config, bind).await,
        Command::Conversations => {
            let store = open_store(&config);
            let summaries = store.list().await?;
            print!("{}", ConsoleFormatter::format_conversation_list(&summaries));
            Ok(())
        }
        Command::Show { id, output } => {
            let store = open_store(&config);
            let Some(conversation) = store.load(&id).await? else {
                bail!("Conversation not found: {}", id);
            };
            println!("{}", ConsoleFormatter::format_conversation(&conversation, output));
            Ok(())
        }
    }
}

/// Install the stderr subscriber, plus a daily log file when serving with `[logging] dir`.
fn init_logging(cli: &Cli, config: &FileConfig, serving: bool) -> Result<Option<WorkerGuard>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => match cli.verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        },
    };

    let (file_layer, guard) = match config.logging.dir.as_deref().filter(|_| serving) {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "roundtable.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

fn open_store(config: &FileConfig) -> Arc<dyn ConversationStore> {
    let path = config.storage.resolved_path();
    info!("Conversation store: {}", path.display());
    Arc::new(JsonConversationStore::new(path))
}

/// Vendors in-process, or a remote gateway when a URL is given.
fn build_gateway(config: &FileConfig, gateway_url: Option<&str>) -> Arc<dyn LlmGateway> {
    match gateway_url.or(config.gateway.url.as_deref()) {
        Some(url) => {
            info!("Using remote gateway at {}", url);
            Arc::new(HttpGatewayClient::new(reqwest::Client::new(), url))
        }
        None => Arc::new(ProviderGateway::from_settings(
            config.providers.all_settings(),
        )),
    }
}

async fn open_orchestrator(
    config: &FileConfig,
    gateway_url: Option<&str>,
    conversation_id: Option<&str>,
) -> Result<Orchestrator> {
    let orchestrator = TurnOrchestrator::open(
        build_gateway(config, gateway_url),
        open_store(config),
        config.to_orchestrator_config(),
        conversation_id,
    )
    .await?;

    if let Some(path) = &config.logging.turn_events {
        match JsonlTurnLogger::new(path) {
            Some(logger) => {
                let logger: Arc<dyn TurnLogger> = Arc::new(logger);
                spawn_turn_logger(orchestrator.subscribe(), logger, false);
            }
            None => warn!("Turn event log disabled: cannot open {}", path.display()),
        }
    }

    Ok(orchestrator)
}

async fn ask(
    args: AskArgs,
    config: &FileConfig,
    gateway_url: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let mut attachments = Vec::with_capacity(args.attach.len());
    for path in &args.attach {
        attachments.push(load_attachment(path).await?);
    }

    let mut request = TurnRequest::new(args.question).with_attachments(attachments);
    if !args.model.is_empty() {
        request = request.with_models(args.model);
    }
    if let Some(mode) = args.mode {
        request = request.with_mode(mode.into());
    }
    if let Some(rounds) = args.rounds {
        request = request.with_max_rounds(rounds);
    }

    let orchestrator =
        open_orchestrator(config, gateway_url, args.conversation.as_deref()).await?;
    let expect_title = config.to_orchestrator_config().params().generate_titles
        && !orchestrator.snapshot().has_title();
    let background = orchestrator.subscribe();

    let result = run_turn(&orchestrator, TurnCommand::Start(request), quiet).await;

    if result.is_ok() && expect_title && orchestrator.snapshot().turns.len() == 1 {
        wait_for_title(background).await;
    }
    if !quiet {
        eprintln!("Conversation: {}", orchestrator.conversation_id());
    }
    finish(&orchestrator, result, args.output)
}

async fn retry(
    args: RetryArgs,
    config: &FileConfig,
    gateway_url: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let orchestrator = open_orchestrator(config, gateway_url, Some(&args.conversation)).await?;
    let command = match args.stream_index() {
        Some(stream) => TurnCommand::RetryStream(args.round_index(), stream),
        None => TurnCommand::RetryRound(args.round_index()),
    };
    let result = run_turn(&orchestrator, command, quiet).await;
    finish(&orchestrator, result, args.output)
}

/// Run one command with progress output; Ctrl-C cancels the turn.
async fn run_turn(
    orchestrator: &Orchestrator,
    command: TurnCommand,
    quiet: bool,
) -> Result<Turn, OrchestratorError> {
    let progress = (!quiet).then(|| {
        let reporter: Arc<dyn ProgressNotifier> = if std::io::stderr().is_terminal() {
            Arc::new(ProgressReporter::new())
        } else {
            Arc::new(SimpleProgress)
        };
        spawn_progress(orchestrator.subscribe(), reporter)
    });

    let run = async {
        match command {
            TurnCommand::Start(request) => orchestrator.start(request).await,
            TurnCommand::RetryRound(round) => orchestrator.retry_round(round).await,
            TurnCommand::RetryStream(round, stream) => {
                orchestrator.retry_stream(round, stream).await
            }
            TurnCommand::Continue => orchestrator.continue_from_checkpoint().await,
        }
    };
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling...");
            orchestrator.cancel();
            run.await
        }
    };

    if let Some(handle) = progress {
        handle.abort();
    }
    result
}

async fn wait_for_title(mut events: broadcast::Receiver<TurnEvent>) {
    let waited = tokio::time::timeout(TITLE_WAIT, async {
        loop {
            match events.recv().await {
                Ok(TurnEvent::TitleUpdated { .. }) | Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
                _ => continue,
            }
        }
    })
    .await;
    if waited.is_err() {
        info!("No title after {:?}; leaving conversation untitled", TITLE_WAIT);
    }
}

/// Print the turn and turn a failure into the process error.
///
/// A failed turn is still printed in full and JSON formats so partial answers are visible.
fn finish(
    orchestrator: &Orchestrator,
    result: Result<Turn, OrchestratorError>,
    output: OutputFormat,
) -> Result<()> {
    match result {
        Ok(turn) => {
            println!("{}", ConsoleFormatter::render(&turn, output));
            Ok(())
        }
        Err(e) => {
            let conversation = orchestrator.snapshot();
            if output != OutputFormat::Synthesis
                && let Some(turn) = conversation.active_turn()
            {
                println!("{}", ConsoleFormatter::render(turn, output));
            }
            match e.kind() {
                Some(kind) => bail!("{} ({})", e, kind.as_str()),
                None => Err(e.into()),
            }
        }
    }
}

async fn load_attachment(path: &Path) -> Result<Attachment> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading attachment {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = match path.extension().and_then(|e| e.to_str()) {
        Some("md") => Some("text/markdown"),
        Some("json") => Some("application/json"),
        Some("txt") | Some("log") => Some("text/plain"),
        _ => None,
    };
    Ok(Attachment {
        name,
        mime_type: mime_type.map(str::to_string),
        text,
    })
}

async fn run_server(config: &FileConfig, bind: Option<SocketAddr>) -> Result<()> {
    let addr = bind.unwrap_or_else(|| config.gateway.bind_addr().0);
    let gateway = Arc::new(ProviderGateway::from_settings(
        config.providers.all_settings(),
    ));
    let providers = gateway.provider_status();
    for (provider, configured) in &providers {
        info!("{}: {}", provider.as_str(), if *configured { "configured" } else { "no key" });
    }

    let catalog = OpenRouterCatalog::new(
        reqwest::Client::new(),
        config.providers.settings(Provider::OpenRouter),
    );
    let catalog = Arc::new(ModelCatalog::new(Arc::new(catalog), DEFAULT_CATALOG_TTL));
    let stall = config.to_orchestrator_config().params().stall_timeout;
    let state = GatewayState::new(gateway, catalog, providers, stall);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down gateway");
        }
        trigger.cancel();
    });

    serve(addr, state, shutdown).await?;
    Ok(())
}
