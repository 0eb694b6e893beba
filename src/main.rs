use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use verigate::clock::{Clock, SystemClock};
use verigate::config::VerigateConfig;
use verigate::ratelimit::CompositeRateLimiter;
use verigate::token::{generate_secret, TokenCodec};

/// Operator tool for verification tokens and abuse rate limits.
#[derive(Debug, Parser)]
#[command(name = "verigate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "VERIGATE_CONFIG")]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mint a verification token for an identity
    Mint {
        identity: String,
        /// Override the configured link lifetime
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Verify a token and print the identity it proves
    Verify { token: String },
    /// Ask the rate limiter whether an address may send to an identity
    Check {
        #[arg(long)]
        address: String,
        #[arg(long)]
        identity: String,
        /// Number of consecutive requests to simulate
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Show the current cooldown for an address/identity pair without counting a hit
    Cooldown {
        #[arg(long)]
        address: String,
        #[arg(long)]
        identity: String,
    },
    /// Generate a random signing secret
    GenSecret,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::GenSecret => {
            println!("{}", generate_secret());
        }
        Command::Mint { identity, ttl_secs } => {
            let config = VerigateConfig::load(config_path)?;
            let codec = TokenCodec::new(&config.token.secret)?;
            let ttl = ttl_secs.map(Duration::from_secs).unwrap_or_else(|| config.link_ttl());
            let expires_at = clock.now() + chrono::Duration::from_std(ttl)?;
            let token = codec.mint(&identity, expires_at)?;
            info!(expires_at = %expires_at, "Minted token");
            println!("{token}");
        }
        Command::Verify { token } => {
            let config = VerigateConfig::load(config_path)?;
            let codec = TokenCodec::new(&config.token.secret)?;
            let output = match codec.verify(&token, clock.now()) {
                Ok(identity) => json!({ "valid": true, "identity": identity }),
                Err(e) => json!({ "valid": false, "reason": e.reason() }),
            };
            println!("{output}");
        }
        Command::Check {
            address,
            identity,
            repeat,
        } => {
            let config = VerigateConfig::load(config_path)?;
            let limiter = CompositeRateLimiter::from_config(&config, clock).await?;
            for attempt in 1..=repeat {
                let decision = limiter.allow(&address, &identity).await;
                let mut output = serde_json::to_value(decision)?;
                output["attempt"] = json!(attempt);
                println!("{output}");
            }
        }
        Command::Cooldown { address, identity } => {
            let config = VerigateConfig::load(config_path)?;
            let limiter = CompositeRateLimiter::from_config(&config, clock).await?;
            let cooldown = limiter.cooldown(&address, &identity).await;
            println!("{}", json!({ "retry_after_secs": cooldown.as_secs() }));
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
