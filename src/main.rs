use clap::{Parser, Subcommand};
use futures::StreamExt;
use research_orchestrator::{
    agents::LlmResearchProvider,
    config::Config,
    llm::build_adapter,
    middleware::rate_limiter::ResearchRateLimiter,
    models::{AppState, ResearchOptions, ResearchRequest},
    research::{
        pipeline::ResearchPipeline, plan::QueryComplexity, settings::ResearchSettings, stream,
    },
    routes::create_router,
    search::{SearchBackend, SerpApiClient},
    session_store::SessionStore,
    utils::init_logger,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "research-orchestrator")]
#[command(version, about = "Planned, budgeted research sessions over search and LLMs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run one research session and print its events as JSON lines
    Ask {
        query: String,
        /// Skip classification and use this tier (simple, moderate, complex)
        #[arg(long)]
        complexity: Option<QueryComplexity>,
        /// Limit execution to a single round
        #[arg(long)]
        skip_round2: bool,
        /// Cost ceiling for this session
        #[arg(long)]
        max_cost: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    let _log_guard = init_logger(config.log_dir.as_deref());
    info!("Configuration loaded: {:?}", config.server);

    let settings = ResearchSettings::load()?;
    let pipeline = build_pipeline(&config, settings)?;

    let readiness = pipeline.readiness();
    if !readiness.is_ready() {
        warn!(
            missing = ?readiness.missing(),
            "Research capabilities missing; sessions will be rejected"
        );
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pipeline).await,
        Command::Ask {
            query,
            complexity,
            skip_round2,
            max_cost,
        } => {
            let options = ResearchOptions {
                force_complexity: complexity,
                skip_round2,
                max_cost,
            };
            ask(pipeline, ResearchRequest::new(query, options)).await
        }
    }
}

fn build_pipeline(config: &Config, settings: ResearchSettings) -> anyhow::Result<ResearchPipeline> {
    let llm = build_adapter(&config.llm)?;
    let search = SerpApiClient::from_config(&config.search)
        .map(|client| Arc::new(client) as Arc<dyn SearchBackend>);
    let model = config.llm.model.clone();
    let provider = LlmResearchProvider::new(llm, search, model, settings.cost.clone());

    Ok(ResearchPipeline::new(Arc::new(provider), settings, SessionStore::default()))
}

async fn serve(config: Config, pipeline: ResearchPipeline) -> anyhow::Result<()> {
    let state = AppState {
        rate_limiter: Arc::new(ResearchRateLimiter::new(config.rate_limit.per_minute)),
        config: config.clone(),
        pipeline,
    };

    let app = create_router(state);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn ask(pipeline: ResearchPipeline, request: ResearchRequest) -> anyhow::Result<()> {
    let session = pipeline.start(request).await?;

    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut events = Box::pin(stream::into_stream(session.events));
    while let Some(message) = events.next().await {
        if let stream::StreamMessage::Event(envelope) = message {
            println!("{}", serde_json::to_string(&envelope)?);
        }
    }

    session
        .handle
        .await
        .map_err(|e| anyhow::anyhow!("Research task failed: {}", e))?;
    Ok(())
}
