//! fieldbot - Entry Point
//!
//! Runs the Telegram bot until Ctrl-C.

use fieldbot::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("fieldbot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: fieldbot");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN          Bot token (required)");
        println!("  TELEGRAM_API_URL            Bot API server (default: https://api.telegram.org)");
        println!("  TELEGRAM_LOCAL_DATA_DIR     Local Bot API data dir, enables file copy");
        println!("  FIELDBOT_DATA_DIR           Per-user storage root");
        println!("  FIELDBOT_DB_PATH            SQLite database path");
        println!("  FIELDBOT_ADMINS             Comma-separated admin user IDs");
        println!("  FIELDBOT_LOG_JSON=1         Log as JSON");
        println!("  RUST_LOG                    trace|debug|info|warn|error");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("FIELDBOT_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("fieldbot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Data directory: {}", config.data_dir.display());
    fieldbot::telegram::run_telegram_bot(config).await?;

    info!("Shutdown complete");
    Ok(())
}
