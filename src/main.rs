//! # Alert Harness CLI (`alh`)
//!
//! ## Usage
//!
//! ```bash
//! alh --config ./config/alh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `alh init` | Create the SQLite database and run schema migrations |
//! | `alh update` | Run one ingestion cycle now |
//! | `alh alerts` | Show the latest batch, with filters |
//! | `alh status` | Ingestion and notification overview |
//! | `alh config <action>` | Manage notification configs |
//! | `alh rule <action>` | Manage alert rules |
//! | `alh serve` | Start the HTTP API and the scheduler |

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use alert_harness::config::{self, Config};
use alert_harness::logging;
use alert_harness::migrate;
use alert_harness::monitor;
use alert_harness::pipeline::Pipeline;
use alert_harness::query::{self, AlertFilters};
use alert_harness::server;
use alert_harness::subscriptions::{self, ConfigInput, NewRule, RuleUpdate};

/// Alert Harness CLI: weather-alert ingestion, diffing and notification.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/alh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "alh",
    about = "Alert Harness: periodic weather-alert ingestion with subscriber notifications",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/alh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Fetch the feed and run one full cycle.
    Update {
        /// Print the cycle report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show alerts from the latest successful batch.
    Alerts {
        /// Disaster-type name (e.g. `暴雨`).
        #[arg(long = "type")]
        alert_type: Option<String>,

        /// Severity-level name (e.g. `红色`).
        #[arg(long)]
        level: Option<String>,

        /// Region-code prefix.
        #[arg(long)]
        region: Option<String>,

        /// `provincial` or `city`.
        #[arg(long)]
        scope: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show ingestion and notification overview.
    Status,

    /// Manage notification configs.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage alert rules.
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Start the HTTP API server.
    Serve {
        /// Do not start the periodic scheduler.
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List all configs, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Create a config.
    Add(ConfigArgs),
    /// Replace a config.
    Update {
        id: i64,
        #[command(flatten)]
        fields: ConfigArgs,
    },
    /// Delete a config and its rules.
    Remove { id: i64 },
}

#[derive(Args)]
struct ConfigArgs {
    /// Push-channel key.
    #[arg(long)]
    send_key: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    smtp_host: Option<String>,
    #[arg(long)]
    smtp_port: Option<u16>,
    /// Use STARTTLS instead of implicit TLS.
    #[arg(long)]
    smtp_starttls: bool,
    #[arg(long)]
    smtp_user: Option<String>,
    #[arg(long)]
    smtp_password: Option<String>,
    /// Comma-joined region codes (legacy filter).
    #[arg(long)]
    region_codes: Option<String>,
    /// Comma-joined disaster-type names (legacy filter).
    #[arg(long)]
    level_types: Option<String>,
    /// Comma-joined severity-level names (legacy filter).
    #[arg(long)]
    alert_levels: Option<String>,
    #[arg(long)]
    disabled: bool,
}

impl From<ConfigArgs> for ConfigInput {
    fn from(args: ConfigArgs) -> Self {
        ConfigInput {
            send_key: args.send_key,
            email: args.email,
            smtp_host: args.smtp_host,
            smtp_port: args.smtp_port,
            smtp_secure: Some(!args.smtp_starttls),
            smtp_user: args.smtp_user,
            smtp_password: args.smtp_password,
            region_codes: args.region_codes,
            level_types: args.level_types,
            alert_levels: args.alert_levels,
            enabled: Some(!args.disabled),
        }
    }
}

#[derive(Subcommand)]
enum RuleAction {
    /// List rules in evaluation order.
    List {
        #[arg(long)]
        config_id: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Create a rule.
    Add {
        #[arg(long)]
        config_id: i64,
        /// `regional_level`, `regional` or `level`.
        #[arg(long = "type")]
        rule_type: String,
        #[command(flatten)]
        fields: RuleArgs,
        #[arg(long)]
        disabled: bool,
    },
    /// Update a rule; only the given fields change.
    Update {
        id: i64,
        #[arg(long = "type")]
        rule_type: Option<String>,
        #[command(flatten)]
        fields: RuleArgs,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Delete a rule.
    Remove { id: i64 },
}

#[derive(Args)]
struct RuleArgs {
    #[arg(long)]
    target_level: Option<String>,
    /// Disaster-type name.
    #[arg(long)]
    alert_type: Option<String>,
    #[arg(long)]
    region_code: Option<String>,
    /// `provincial` or `city`.
    #[arg(long)]
    region_level: Option<String>,
    /// JSON object, e.g. `{"targetLevels":["红色","橙色"]}`.
    #[arg(long)]
    conditions: Option<String>,
    #[arg(long)]
    order: Option<i64>,
}

impl RuleArgs {
    fn conditions(&self) -> anyhow::Result<Option<serde_json::Value>> {
        self.conditions
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("--conditions is not valid JSON"))
            .transpose()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Update { json } => run_update(&cfg, json).await?,
        Commands::Alerts {
            alert_type,
            level,
            region,
            scope,
            json,
        } => {
            let filters = AlertFilters {
                alert_type,
                level,
                region,
                level_type: scope,
            };
            query::run_alerts(&cfg, &filters, json).await?;
        }
        Commands::Status => monitor::run_status(&cfg).await?,
        Commands::Config { action } => run_config(&cfg, action).await?,
        Commands::Rule { action } => run_rule(&cfg, action).await?,
        Commands::Serve { no_scheduler } => server::run_server(&cfg, !no_scheduler).await?,
    }

    Ok(())
}

async fn run_update(cfg: &Config, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;
    let result = pipeline.trigger().await;
    pipeline.pool().close().await;
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("update {}", report.batch_id);
        println!("  inserted: {}", report.inserted_count);
        println!("  total records: {}", report.total_records);
        println!("  pruned: {}", report.deleted_count);
        println!("  new: {}", report.new_count);
        println!("  notified configs: {}", report.notified_configs);
        println!("ok");
    }
    Ok(())
}

async fn run_config(cfg: &Config, action: ConfigAction) -> anyhow::Result<()> {
    let pool = alert_harness::db::connect(cfg).await?;

    let result: anyhow::Result<()> = async {
        match action {
            ConfigAction::List { json } => {
                let configs = subscriptions::list_configs(&pool).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&configs)?);
                    return Ok(());
                }
                println!(
                    "{:<5} {:<8} {:<5} {:<28} {:<16} {}",
                    "ID", "ENABLED", "PUSH", "EMAIL", "REGIONS", "LEVELS"
                );
                for c in &configs {
                    println!(
                        "{:<5} {:<8} {:<5} {:<28} {:<16} {}",
                        c.id,
                        c.enabled,
                        if c.has_push() { "yes" } else { "no" },
                        c.email,
                        c.region_codes,
                        c.alert_levels
                    );
                }
            }
            ConfigAction::Add(args) => {
                let created = subscriptions::create_config(&pool, &args.into()).await?;
                println!("created config {}", created.id);
            }
            ConfigAction::Update { id, fields } => {
                subscriptions::update_config(&pool, id, &fields.into()).await?;
                println!("updated config {}", id);
            }
            ConfigAction::Remove { id } => {
                subscriptions::delete_config(&pool, id).await?;
                println!("removed config {}", id);
            }
        }
        Ok(())
    }
    .await;

    pool.close().await;
    result
}

async fn run_rule(cfg: &Config, action: RuleAction) -> anyhow::Result<()> {
    let pool = alert_harness::db::connect(cfg).await?;

    let result: anyhow::Result<()> = async {
        match action {
            RuleAction::List { config_id, json } => {
                let rules = subscriptions::list_rules(&pool, config_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rules)?);
                    return Ok(());
                }
                println!(
                    "{:<5} {:<7} {:<15} {:<8} {:<6} {}",
                    "ID", "CONFIG", "TYPE", "ENABLED", "ORDER", "CONDITIONS"
                );
                for r in &rules {
                    println!(
                        "{:<5} {:<7} {:<15} {:<8} {:<6} {}",
                        r.id,
                        r.config_id,
                        r.rule_type,
                        r.enabled,
                        r.sort_order,
                        r.conditions.as_deref().unwrap_or("-")
                    );
                }
            }
            RuleAction::Add {
                config_id,
                rule_type,
                fields,
                disabled,
            } => {
                let input = NewRule {
                    config_id,
                    rule_type,
                    conditions: fields.conditions()?,
                    target_level: fields.target_level,
                    alert_type: fields.alert_type,
                    region_code: fields.region_code,
                    region_level: fields.region_level,
                    enabled: Some(!disabled),
                    sort_order: fields.order,
                };
                let created = subscriptions::create_rule(&pool, &input).await?;
                println!("created rule {}", created.id);
            }
            RuleAction::Update {
                id,
                rule_type,
                fields,
                enabled,
            } => {
                let update = RuleUpdate {
                    rule_type,
                    conditions: fields.conditions()?,
                    target_level: fields.target_level,
                    alert_type: fields.alert_type,
                    region_code: fields.region_code,
                    region_level: fields.region_level,
                    enabled,
                    sort_order: fields.order,
                };
                subscriptions::update_rule(&pool, id, &update).await?;
                println!("updated rule {}", id);
            }
            RuleAction::Remove { id } => {
                subscriptions::delete_rule(&pool, id).await?;
                println!("removed rule {}", id);
            }
        }
        Ok(())
    }
    .await;

    pool.close().await;
    result
}
