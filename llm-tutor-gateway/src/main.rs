use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use llm_tutor_core::RequestContext;
use llm_tutor_gateway::{build_service, GatewayConfig, HttpProvider};
use llm_tutor_resilience::observability::{
    init_logging, init_metrics, render_metrics, LoggingAlertReceiver,
};
use llm_tutor_resilience::ObservabilityHooks;
use std::path::PathBuf;
use std::sync::Arc;

/// Ask the tutor through the resilient provider pipeline
#[derive(Debug, Parser)]
#[command(name = "llm-tutor", version, about)]
struct Cli {
    /// Configuration file; replaces config/default and config/local
    #[arg(short, long, global = true, env = "LLM_TUTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question
    Ask {
        /// The learner's question
        query: String,

        /// Learner level (e.g., beginner, intermediate)
        #[arg(short, long)]
        level: Option<String>,

        /// Case category (e.g., cardiology)
        #[arg(long)]
        case_type: Option<String>,

        /// Specific case identifier
        #[arg(long)]
        case_id: Option<String>,

        /// Concept under discussion; repeatable
        #[arg(long = "concept")]
        concepts: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GatewayConfig::load_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => GatewayConfig::load().context("Failed to load configuration")?,
    };

    init_logging(&config.log)?;
    init_metrics()?;

    match cli.command {
        Command::Ask {
            query,
            level,
            case_type,
            case_id,
            concepts,
            json,
        } => {
            let provider =
                HttpProvider::new(config.provider.clone()).context("Failed to build provider")?;
            let hooks = ObservabilityHooks::default()
                .with_alert_receiver(Arc::new(LoggingAlertReceiver));
            let service = build_service(&config, Arc::new(provider), hooks)?;

            let mut context = RequestContext::new().with_concepts(concepts);
            context.level = level;
            context.case_type = case_type;
            context.case_id = case_id;

            tracing::info!(query = %query, "Asking tutor");
            let response = service.respond(&query, &context).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.content);
                if response.degraded {
                    eprintln!("(degraded response)");
                } else if response.cached {
                    eprintln!(
                        "(cached, similarity {:.2})",
                        response.similarity.unwrap_or(1.0)
                    );
                }
            }
        }
        Command::ShowConfig => {
            let mut shown = config.clone();
            if shown.provider.api_key.is_some() {
                shown.provider.api_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    if cli.print_metrics {
        print!("{}", render_metrics()?);
    }

    Ok(())
}
