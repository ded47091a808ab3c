use visit_assistant::analytics::{QueryCache, QueryCascade, TemplateMatcher};
use visit_assistant::db::{init_pool, PgExecutor, PgRecordStore};
use visit_assistant::entity_resolver::EntityResolver;
use visit_assistant::llm::ProviderGateway;
use visit_assistant::observability::init_tracing;
use visit_assistant::pipeline::{ConversationState, PgCheckpointStore, Pipeline, TurnContext};
use visit_assistant::AssistantConfig;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "visit-assistant")]
#[command(about = "Conversational Q&A over patient visit records")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one conversational turn and print the reply
    Ask {
        /// The question in natural language
        question: String,

        /// Session id for multi-turn conversations (random when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Run one turn and print pipeline events as server-sent events
    Stream {
        /// The question in natural language
        question: String,

        /// Session id for multi-turn conversations (random when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Answer an analytics question through the query cascade only
    Analytics {
        /// The analytics question
        question: String,

        /// Ask the model for a short summary of the rows
        #[arg(long)]
        explain: bool,
    },
    /// List built-in query templates
    Templates,
    /// Show configured LLM providers in priority order
    Providers,
}

struct Services {
    pipeline: Arc<Pipeline>,
    context: TurnContext,
}

fn build_cascade(config: &AssistantConfig, gateway: Arc<ProviderGateway>) -> Result<Arc<QueryCascade>> {
    Ok(Arc::new(QueryCascade::new(
        gateway,
        Arc::new(QueryCache::new(config.cache_ttl)),
        TemplateMatcher::builtin()?,
        config.ai_call_cost_usd,
    )))
}

async fn build_services(config: &AssistantConfig) -> Result<Services> {
    let pool = init_pool(config.require_database_url()?, config.db_max_connections).await?;
    let checkpoints = PgCheckpointStore::new(pool.clone());
    checkpoints.ensure_schema().await?;

    let gateway = Arc::new(ProviderGateway::from_config(config));
    let cascade = build_cascade(config, gateway.clone())?;
    let pipeline = Arc::new(
        Pipeline::new(gateway, cascade, Arc::new(checkpoints))
            .with_resolver(EntityResolver::new(config.entity_candidate_limit)),
    );
    let context = TurnContext::new(
        Arc::new(PgRecordStore::new(pool.clone())),
        Arc::new(PgExecutor::new(pool)),
    );
    Ok(Services { pipeline, context })
}

fn session_or_new(session: Option<String>) -> String {
    session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AssistantConfig::from_env()?;
    init_tracing(&config.log_level);

    let args = Args::parse();

    match args.command {
        Commands::Ask { question, session } => {
            let session_id = session_or_new(session);
            let services = build_services(&config).await?;
            let state = services
                .pipeline
                .invoke(
                    ConversationState::new(question, session_id.clone()),
                    &session_id,
                    &services.context,
                )
                .await?;
            info!("Session {} intent {:?}", session_id, state.intent);
            println!("{}", state.response);
            if let Some(error) = state.error {
                eprintln!("(turn error: {})", error);
            }
        }
        Commands::Stream { question, session } => {
            let session_id = session_or_new(session);
            let services = build_services(&config).await?;
            let mut events = services.pipeline.clone().stream(
                ConversationState::new(question, session_id.clone()),
                session_id,
                services.context.clone(),
            );
            while let Some(event) = events.next().await {
                print!("{}", event.to_sse());
            }
        }
        Commands::Analytics { question, explain } => {
            let pool = init_pool(config.require_database_url()?, config.db_max_connections).await?;
            let gateway = Arc::new(ProviderGateway::from_config(&config));
            let cascade = build_cascade(&config, gateway)?;
            let outcome = cascade.resolve(&question, &PgExecutor::new(pool), explain).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Templates => {
            let matcher = TemplateMatcher::builtin()?;
            for template in matcher.templates() {
                println!("{}", template.name);
                for pattern in template.patterns() {
                    println!("    /{}/", pattern);
                }
            }
            println!("\nExample questions:");
            for question in QueryCascade::example_questions() {
                println!("  - {}", question);
            }
        }
        Commands::Providers => {
            let gateway = ProviderGateway::from_config(&config);
            for status in gateway.status() {
                println!(
                    "{}. {:<10} {}",
                    status.priority + 1,
                    status.name,
                    if status.available { "available" } else { "unavailable" }
                );
            }
        }
    }

    Ok(())
}
