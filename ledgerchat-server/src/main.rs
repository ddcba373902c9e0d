use clap::Parser;
use ledgerchat_core::completion::{CompletionClient, CompletionConfig};
use ledgerchat_core::store::ConversationStore;
use ledgerchat_core::LedgerchatConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use ledgerchat_server::http;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "ledgerchat.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match LedgerchatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB (bounded retry while the database comes up) and make
    // sure the schema exists
    let pool = match ledgerchat_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = ledgerchat_core::db::init_schema(&pool).await {
        eprintln!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    if args.health {
        match ledgerchat_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Ledgerchat DB health check passed");
        return Ok(());
    }

    // A missing credential fails here, before the server accepts requests
    let completions = match CompletionClient::new(CompletionConfig::new(None, &config.llm)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create completion client: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = http::HttpState {
        store: ConversationStore::new(pool),
        completions,
        config,
    };

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
