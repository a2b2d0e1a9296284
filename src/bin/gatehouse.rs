//! Gatehouse CLI
//!
//! Mint development tokens, run offline decisions and check configuration files

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use gatehouse::transport::{CAPABILITY_HEADER, CONSENT_COOKIE};
use gatehouse::{
    CapabilityGrant, Decision, GateConfig, GateRequest, GateSelection, Gateway, RuleEntry,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(about = "Consent and capability gate tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode an unsigned capability token (development only)
    Mint {
        /// Capabilities to grant (comma-separated)
        #[arg(short = 'c', long, value_delimiter = ',', required = true)]
        capabilities: Vec<String>,

        /// Lifetime in seconds; omit for a token that never expires
        #[arg(short = 't', long)]
        ttl: Option<i64>,

        /// Issuer recorded in the grant
        #[arg(short = 'i', long)]
        issuer: Option<String>,
    },

    /// Decide a single request offline and print the outcome as JSON
    Decide {
        /// HTTP method
        #[arg(short = 'm', long, default_value = "GET")]
        method: String,

        /// Request target, path with optional query
        target: String,

        /// Capability token
        #[arg(short = 't', long)]
        token: Option<String>,

        /// Raw user-consent cookie value
        #[arg(long)]
        consent: Option<String>,

        /// Gate to run (consent, capability, both); overrides the configured mode
        #[arg(long)]
        mode: Option<String>,

        /// Configuration file (built-in defaults if omitted)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },

    /// Load and validate a configuration file, then print the resolved rule tables
    CheckConfig {
        /// Configuration file
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Mint {
            capabilities,
            ttl,
            issuer,
        } => mint(capabilities, ttl, issuer),
        Command::Decide {
            method,
            target,
            token,
            consent,
            mode,
            config,
        } => decide(method, &target, token, consent, mode, config),
        Command::CheckConfig { path } => check_config(path),
    }
}

fn mint(capabilities: Vec<String>, ttl: Option<i64>, issuer: Option<String>) -> anyhow::Result<()> {
    let mut grant = CapabilityGrant::new(capabilities, Utc::now().timestamp());
    if let Some(ttl) = ttl {
        grant = grant.expires_in(ttl);
    }
    if let Some(issuer) = issuer {
        grant = grant.with_issuer(issuer);
    }

    println!("{}", grant.encode()?);
    Ok(())
}

fn decide(
    method: String,
    target: &str,
    token: Option<String>,
    consent: Option<String>,
    mode: Option<String>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load_or_default(config)?;
    if let Some(mode) = mode {
        config.mode = parse_selection(&mode)?;
    }
    let gateway = Gateway::from_config(&config)?;

    let mut request = GateRequest::from_target(method, target);
    if let Some(token) = token {
        request = request.with_header(CAPABILITY_HEADER, token);
    }
    if let Some(consent) = consent {
        request = request.with_header("Cookie", format!("{}={}", CONSENT_COOKIE, consent));
    }

    let outcome = match gateway.evaluate(&request) {
        Decision::Deny(denial) => json!({
            "allowed": false,
            "status": denial.status,
            "reason": denial.reason,
            "headers": denial.headers,
            "body": denial.body,
        }),
        Decision::Forward(metadata) => json!({
            "allowed": true,
            "request_headers": metadata.request_headers,
            "response_headers": metadata.response_headers,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = GateConfig::load(&path)
        .with_context(|| format!("configuration {:?} is invalid", path))?;
    info!("Configuration {:?} is valid", path);

    let consent: Vec<RuleEntry> = config.consent_table()?.entries().cloned().collect();
    let capability: Vec<RuleEntry> = config.capability_table()?.entries().cloned().collect();

    let resolved = json!({
        "mode": config.mode,
        "consent": consent,
        "capability": capability,
        "cache_capacity": config.cache.capacity,
        "trusted_issuers": config.capability.trusted_issuers,
    });
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<GateConfig> {
    match path {
        Some(path) => GateConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {:?}", path)),
        None => Ok(GateConfig::default()),
    }
}

fn parse_selection(s: &str) -> anyhow::Result<GateSelection> {
    match s.to_lowercase().as_str() {
        "consent" => Ok(GateSelection::Consent),
        "capability" => Ok(GateSelection::Capability),
        "both" => Ok(GateSelection::Both),
        _ => anyhow::bail!(
            "Invalid mode '{}'. Valid options: consent, capability, both",
            s
        ),
    }
}
