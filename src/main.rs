use clap::Parser;
use m365_mgmt::config::{AppConfig, AuthMode};
use m365_mgmt::services::logger::{LogLevel, Logger};

#[derive(Debug, Parser)]
#[command(name = "m365-mgmt", version, about = "Tenant management tools over MCP stdio")]
struct Cli {
    /// `app` (service principal or ambient identity) or `user` (device code sign-in).
    #[arg(long, env = "AUTH_MODE")]
    auth_mode: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logger = Logger::new("m365-mgmt");
    match cli.log_level.parse::<LogLevel>() {
        Ok(level) => logger.set_level(level),
        Err(err) => {
            eprintln!("m365-mgmt: {}", err);
            std::process::exit(2);
        }
    }

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("m365-mgmt: {}", err);
            std::process::exit(2);
        }
    };
    if let Some(raw) = cli.auth_mode.as_deref() {
        match raw.parse::<AuthMode>() {
            Ok(mode) => config.auth.mode = mode,
            Err(err) => {
                eprintln!("m365-mgmt: {}", err);
                std::process::exit(2);
            }
        }
    }

    if let Err(err) = m365_mgmt::mcp::server::run_stdio(config, logger).await {
        eprintln!("m365-mgmt: {}", err);
        std::process::exit(1);
    }
}
