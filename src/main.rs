mod application;
mod config;
mod domain;
mod infrastructure;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use application::capability::CapabilityClient;
use application::console;
use application::orchestrator::Orchestrator;
use application::session::Session;
use config::{AppConfig, CAPABILITY_KEY_VAR, Credentials};
use infrastructure::mcp::McpProcess;
use infrastructure::model::{AnthropicClient, DEFAULT_API_URL, ModelProvider};

#[derive(Parser, Debug)]
#[command(
    name = "lodestar",
    version,
    about = "Research console over MCP-discovered capabilities"
)]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
    #[arg(long)]
    model: Option<String>,
    /// One-shot query; the console loop runs when omitted.
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    dotenvy::dotenv().ok();
    info!("Starting lodestar research console");

    let cli = Cli::parse();
    debug!(config = ?cli.config, model = ?cli.model, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let mut app_config = AppConfig::load(config_path)?;
    if let Some(model) = cli.model.clone() {
        app_config.model = model;
    }

    let credentials = Credentials::from_env()?;

    // The capability server gets its own key through the subprocess
    // environment, same as any other configured env entry.
    let mut server_config = app_config.server.clone();
    server_config
        .env
        .entry(CAPABILITY_KEY_VAR.to_string())
        .or_insert(credentials.capability_api_key.clone());

    let provider = AnthropicClient::new(cli.api_url.clone(), credentials.reasoning_api_key);
    let orchestrator = Orchestrator::new(provider, app_config.model.clone())
        .with_max_tokens(app_config.max_tokens);

    let process = McpProcess::new(server_config);
    let client: Arc<dyn CapabilityClient> = Arc::new(process.clone());
    let mut session = Session::new(client, orchestrator);

    println!("\nInitializing research console...");

    // The server child must be torn down on every exit path, including a
    // failed initialization, or it outlives the console.
    let outcome = run_session(&mut session, &cli.query).await;
    process.shutdown().await;
    outcome?;

    info!("Console execution finished");
    Ok(())
}

async fn run_session<P: ModelProvider>(
    session: &mut Session<P>,
    query: &[String],
) -> Result<(), Box<dyn Error>> {
    session.initialize().await?;
    debug!(
        overview_len = session.capability_overview().map(str::len),
        "Capability overview stored"
    );

    if query.is_empty() {
        console::run(session).await?;
    } else {
        let query = query.join(" ");
        info!("Processing one-shot query");
        let record = session.process_query(&query).await?;
        print!("{}", console::render_record(&record));
        session.close();
    }
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
