//! # NDR Configuration Validator
//!
//! Loads and validates the engine configuration and the carrier rule tables
//! for an environment, so a bad deploy fails here instead of at bootstrap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ndr_core::config::{ConfigManager, NdrConfig};
use ndr_core::normalizer::RuleRegistry;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ndr-config-validator")]
#[command(about = "Validate NDR engine configuration and carrier rule tables")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory (default: NDR_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration and rule tables (default)
    All,
    /// Print the merged configuration with secrets masked
    Show,
    /// Validate and summarize the carrier rule tables only
    Rules,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command.as_ref().unwrap_or(&Commands::All) {
        Commands::All => validate_all(&cli),
        Commands::Show => show_config(&cli),
        Commands::Rules => validate_rules(&cli),
    };

    if let Err(e) = result {
        eprintln!("❌ Validation failed: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    let registry = manager
        .load_rule_registry()
        .context("loading carrier rule tables")?;

    match cli.format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "environment": manager.environment(),
                "config_directory": manager.config_directory().display().to_string(),
                "valid": true,
                "rule_tables": registry.table_count(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            println!("🔧 Validating NDR configuration");
            println!("Environment: {}", manager.environment());
            println!("Config Directory: {}", manager.config_directory().display());
            println!();
            print_config_summary(manager.config());
            println!();
            print_rules_summary(&registry);
            println!("\n🎉 All configuration validation checks passed!");
        }
    }
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn validate_rules(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    let registry = manager
        .load_rule_registry()
        .context("loading carrier rule tables")?;

    match cli.format {
        OutputFormat::Json => {
            let carriers: Vec<&str> = registry.carrier_ids().collect();
            let summary = serde_json::json!({
                "tables": registry.table_count(),
                "carriers": carriers,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => print_rules_summary(&registry),
    }
    Ok(())
}

fn print_config_summary(config: &NdrConfig) {
    println!("📋 Engine");
    println!("   ✅ Attempt threshold: {}", config.engine.attempt_threshold);
    println!(
        "   ✅ Resolution deadline: {}h",
        config.engine.resolution_deadline_hours
    );
    println!(
        "   ✅ Reschedule window: {} days",
        config.engine.reschedule_window_days
    );
    println!("🔑 Tokens");
    println!("   ✅ Secret configured ({} bytes)", config.tokens.secret.len());
    println!("   ✅ TTL: {} days", config.tokens.ttl_days);
    println!("⚖️  Governor");
    println!(
        "   {} Sweep every {}s, default policy {}",
        if config.governor.enabled { "✅" } else { "⏸️ " },
        config.governor.sweep_interval_seconds,
        config.governor.default_policy
    );
    println!(
        "   ✅ Seller overrides: {}",
        config.governor.seller_policies.len()
    );
    println!("🗄️  Store");
    match &config.database.url {
        Some(_) => println!("   ✅ PostgreSQL ({} connections)", config.database.max_connections),
        None => println!("   ℹ️  In-memory store (no database.url)"),
    }
    println!("🌐 Web");
    if config.web.enabled {
        println!("   ✅ Listening on {}", config.web.bind_address);
    } else {
        println!("   ⏸️  Disabled");
    }
}

fn print_rules_summary(registry: &RuleRegistry) {
    println!("📚 Carrier rule tables: {}", registry.table_count());
    let mut carriers: Vec<&str> = std::iter::once("default").chain(registry.carrier_ids()).collect();
    carriers[1..].sort_unstable();
    for carrier in carriers {
        let rules = registry.rules_for(carrier);
        println!(
            "   • {carrier}: {} status rules, {} keyword rules, {} delivered codes",
            rules.status_rules.len(),
            rules.keyword_rules.len(),
            rules.delivered_codes.len()
        );
    }
}
