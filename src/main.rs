use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concept_templates::config::Config;
use concept_templates::terminology::HttpTerminologyClient;
use concept_templates::transform::TransformService;
use concept_templates::{api, db, logical};

#[derive(Parser)]
#[command(name = "ctt")]
#[command(about = "Template-driven bulk authoring of terminology concepts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the template server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Database file (defaults to the platform data directory)
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Parse a logical template file and print its slots
    Parse {
        /// File holding the logical template text
        file: PathBuf,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "concept_templates=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve { port, database }) => serve(port, database).await?,
        Some(Commands::Parse { file }) => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let template = logical::parse_template(&source)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            let mut slots: Vec<String> = template.slot_names().into_iter().collect();
            slots.sort();
            let summary = serde_json::json!({
                "focusConcepts": template.focus_concepts,
                "slots": slots,
                "attributeTypes": template.attribute_type_slot_map(),
                "groups": template.attribute_groups.len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => serve(3000, None).await?,
    }

    Ok(())
}

async fn serve(port: u16, database: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing::info!(
        batch_max = config.batch_max,
        workers = config.worker_pool_size,
        terminology = %config.terminology_url,
        "Starting template server on port {}",
        port
    );

    let db = match database {
        Some(path) => db::Database::open(path)?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;

    let client = Arc::new(HttpTerminologyClient::new(
        config.terminology_url.clone(),
        config.terminology_api_key.clone(),
    ));
    let transforms = TransformService::new(db.clone(), client, &config);
    let app = api::create_router(db, transforms.clone());

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Template server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Waiting for running transformations");
    transforms.shutdown().await;
    Ok(())
}
