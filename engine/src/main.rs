//! Maitre CLI
//!
//! One-shot entry points into the orchestration engine: chat turns, goal
//! decomposition, and campaign workflow management.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use maitre_engine::campaign::segments::SegmentSource;
use maitre_engine::campaign::{CampaignConfig, CampaignWorkflow, ChannelType};
use maitre_engine::config::Config;
use maitre_engine::db::customers::Customer;
use maitre_engine::db::Database;
use maitre_engine::dispatch::{Dispatcher, HandlerRegistry, LlmHandler};
use maitre_engine::events::ProgressBus;
use maitre_engine::llm::anthropic::AnthropicProvider;
use maitre_engine::llm::ollama::OllamaProvider;
use maitre_engine::llm::openai::OpenAIProvider;
use maitre_engine::llm::router::LLMRouter;
use maitre_engine::llm::LLMProvider;
use maitre_engine::memory::{MemoryExtractor, MemoryStore};
use maitre_engine::orchestrator::Orchestrator;
use maitre_engine::routing::{RoutingEngine, KNOWN_HANDLERS};
use maitre_engine::tasks::{unix_now, GoalPlanner, TaskExecutor, TaskQueue};
use maitre_engine::telemetry;

#[derive(Parser)]
#[command(name = "maitre", version, about = "Conversation orchestration engine for restaurants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one chat message through the orchestrator
    Chat {
        /// Session id (conversations with the same id share memory)
        #[arg(long, default_value = "default")]
        session: String,
        message: String,
    },

    /// Decompose a goal into tasks and start executing them
    Goal {
        #[arg(long, default_value = "default")]
        session: String,
        goal: String,
        /// Keep executing ready tasks until none remain
        #[arg(long)]
        drain: bool,
    },

    /// Manage marketing campaigns
    Campaign {
        #[command(subcommand)]
        command: CampaignCommands,
    },

    /// Seed demo customers so campaigns have a population to target
    SeedDemo {
        #[arg(long, default_value = "demo")]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum CampaignCommands {
    /// Create a campaign and run its workflow
    Create {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        goal: String,
        /// email, sms, or multi_channel
        #[arg(long, default_value = "email")]
        channel: String,
        /// Comma-separated target segments
        #[arg(long, value_delimiter = ',')]
        segments: Vec<String>,
        /// Pause for human approval after content generation
        #[arg(long)]
        require_approval: bool,
    },

    /// Approve a campaign waiting at the content gate
    Approve { id: String },

    /// Reject a campaign waiting at the content gate
    Reject { id: String },

    /// Continue a persisted campaign from its current step
    Resume { id: String },

    /// Print a campaign's current state
    Show { id: String },

    /// List a tenant's campaigns
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_create()?;
    telemetry::init_telemetry_with_level(&config.core.log_level);

    let db = Database::new(&config.db_path()).await?;
    let gateway = build_gateway(&config);
    let bus = Arc::new(ProgressBus::new());

    match cli.command {
        Commands::Chat { session, message } => {
            let orchestrator = build_orchestrator(&config, &db, &gateway, &bus);
            let response = orchestrator.process_message(&session, &message).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Goal { session, goal, drain } => {
            let orchestrator = build_orchestrator(&config, &db, &gateway, &bus);
            let response = orchestrator.pursue_goal(&session, &goal).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if drain {
                let summary = orchestrator.drain_goal(&session).await;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }

        Commands::Campaign { command } => {
            let workflow = build_workflow(&config, &db, &gateway, &bus);
            match command {
                CampaignCommands::Create {
                    tenant,
                    goal,
                    channel,
                    segments,
                    require_approval,
                } => {
                    let channel = ChannelType::parse(&channel)
                        .ok_or_else(|| anyhow::anyhow!("unknown channel type: {}", channel))?;
                    let state = workflow
                        .create(
                            &tenant,
                            &goal,
                            CampaignConfig {
                                channel,
                                segments,
                                requires_approval: require_approval,
                            },
                        )
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                CampaignCommands::Approve { id } => {
                    let state = workflow.approve(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                CampaignCommands::Reject { id } => {
                    let state = workflow.reject(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                CampaignCommands::Resume { id } => {
                    let state = workflow.resume(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                CampaignCommands::Show { id } => match db.campaigns().load(&id).await? {
                    Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                    None => println!("No campaign with id {}", id),
                },
                CampaignCommands::List { tenant } => {
                    for (id, step, goal) in db.campaigns().list_for_tenant(&tenant).await? {
                        println!("{}  [{}]  {}", id, step, goal);
                    }
                }
            }
        }

        Commands::SeedDemo { tenant } => {
            seed_demo_customers(&db, &tenant).await?;
            println!("Seeded demo customers for tenant {}", tenant);
        }
    }

    db.close().await?;
    Ok(())
}

/// Build the inference gateway: Ollama always; cloud providers only when
/// their API key env var is set.
fn build_gateway(config: &Config) -> Arc<LLMRouter> {
    let mut providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(OllamaProvider::new(
        config.llm.ollama.base_url.clone(),
        config.llm.ollama.model.clone(),
    ))];

    if let Ok(key) = std::env::var(&config.llm.openai.api_key_env) {
        if !key.is_empty() {
            providers.push(Box::new(OpenAIProvider::new(config.llm.openai.clone(), key)));
        }
    }
    if let Ok(key) = std::env::var(&config.llm.anthropic.api_key_env) {
        if !key.is_empty() {
            providers.push(Box::new(AnthropicProvider::new(
                config.llm.anthropic.clone(),
                key,
            )));
        }
    }

    Arc::new(LLMRouter::new(providers, Arc::new(config.llm.clone())))
}

fn build_dispatcher(config: &Config, gateway: &Arc<LLMRouter>) -> Arc<Dispatcher> {
    let mut registry = HandlerRegistry::new();
    for profile in KNOWN_HANDLERS {
        registry.register(Arc::new(LlmHandler::new(
            profile.id,
            profile.domain,
            Arc::clone(gateway),
        )));
    }
    Arc::new(Dispatcher::new(
        registry,
        Duration::from_secs(config.llm.request_timeout_secs),
    ))
}

fn build_orchestrator(
    config: &Config,
    db: &Database,
    gateway: &Arc<LLMRouter>,
    bus: &Arc<ProgressBus>,
) -> Orchestrator {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = build_dispatcher(config, gateway);
    let queue = Arc::new(TaskQueue::new());

    Orchestrator::new(
        Arc::clone(&store),
        RoutingEngine::new(Arc::clone(gateway)),
        GoalPlanner::new(Arc::clone(gateway)),
        TaskExecutor::new(Arc::clone(&store), Arc::clone(&dispatcher), Arc::clone(bus)),
        dispatcher,
        MemoryExtractor::new(Arc::clone(gateway)),
        db.conversations(),
        queue,
        config.memory.recent_n,
    )
}

fn build_workflow(
    config: &Config,
    db: &Database,
    gateway: &Arc<LLMRouter>,
    bus: &Arc<ProgressBus>,
) -> CampaignWorkflow {
    let messenger: Arc<dyn maitre_engine::messaging::Messenger> =
        match &config.messaging.webhook_url {
            Some(url) => Arc::new(maitre_engine::messaging::WebhookMessenger::new(url.clone())),
            None => Arc::new(maitre_engine::messaging::DryRunMessenger),
        };

    let segments: Arc<dyn SegmentSource> = Arc::new(db.customers());

    CampaignWorkflow::new(
        Arc::clone(gateway),
        segments,
        messenger,
        db.campaigns(),
        Arc::clone(bus),
        config.messaging.fan_out,
        Duration::from_secs(config.messaging.send_timeout_secs),
    )
}

async fn seed_demo_customers(db: &Database, tenant: &str) -> Result<()> {
    let now = unix_now();
    let day = 24 * 60 * 60;
    let customers = [
        ("Dana Kim", "dana@example.com", "+15550101", true, true, 820, 12, now - 3 * day),
        ("Sam Ortiz", "sam@example.com", "+15550102", true, false, 340, 7, now - 10 * day),
        ("Lee Chen", "lee@example.com", "+15550103", false, true, 90, 2, now - 5 * day),
        ("Ana Souza", "ana@example.com", "+15550104", true, false, 650, 4, now - 60 * day),
        ("Kai Baker", "kai@example.com", "+15550105", false, false, 15, 1, now - 200 * day),
    ];

    let repo = db.customers();
    for (i, (name, email, phone, email_opt_in, sms_opt_in, points, visits, last_visit)) in
        customers.iter().enumerate()
    {
        repo.upsert(&Customer {
            id: format!("demo-{}", i + 1),
            tenant_id: tenant.to_string(),
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            phone: Some(phone.to_string()),
            email_opt_in: *email_opt_in,
            sms_opt_in: *sms_opt_in,
            loyalty_points: *points,
            visit_count: *visits,
            last_visit_at: *last_visit,
        })
        .await?;
    }

    Ok(())
}
