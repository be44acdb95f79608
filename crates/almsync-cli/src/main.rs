//! almsync CLI
//!
//! - `almsync run <config> create`: create tables from the ALM schema, then load
//! - `almsync run <config> update`: reload (snapshot tables) or reconcile
//!   (versioned tables)
//! - `almsync ddl <config>`: print the DDL `create` would run

use almsync_etl::loader::{self, plan_all, Action};
use almsync_etl::{Config, RunContext, RunReport, RunSettings};
use almsync_store::{PgWarehouse, Warehouse};
use almsync_wsapi::WsapiClient;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PROG: &str = "almsync";

#[derive(Parser)]
#[command(name = "almsync")]
#[command(
    author,
    version,
    about = "Materialize ALM work items into PostgreSQL tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the configured work-item types.
    Run {
        /// YAML config file
        config: PathBuf,
        #[arg(value_enum)]
        action: ActionArg,
    },

    /// Print the table DDL without touching the database.
    Ddl {
        /// YAML config file
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    Create,
    Update,
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Create => Action::Create,
            ActionArg::Update => Action::Update,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { config, action } => cmd_run(&config, action.into()),
        Commands::Ddl { config } => cmd_ddl(&config),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {PROG} encountered an ERROR condition.\n {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_run(path: &Path, action: Action) -> Result<()> {
    let config = load_config(path)?;
    let client = WsapiClient::new(config.wsapi_config()?).context("building ALM client")?;
    let mut warehouse = PgWarehouse::connect(&config.pg_params())?;

    let mut ctx = RunContext::new(RunSettings::from_config(&config), &client);
    let report = loader::run(&mut ctx, &mut warehouse, action);
    let closed = warehouse.close();

    print_summary(&report, action);
    closed.context("closing database connection")?;

    if !report.is_success() {
        let failed: Vec<&str> = report.failures.iter().map(|(e, _)| e.as_str()).collect();
        bail!(
            "{} of {} work item types failed: {}",
            failed.len(),
            failed.len() + report.entities.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

fn cmd_ddl(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let client = WsapiClient::new(config.wsapi_config()?).context("building ALM client")?;
    let mut ctx = RunContext::new(RunSettings::from_config(&config), &client);

    for schema in plan_all(&mut ctx)? {
        println!("-- {} ({})", schema.entity, schema.plan.layout.table);
        for statement in schema.plan.statements() {
            println!("{statement};");
        }
        println!();
    }
    Ok(())
}

fn seconds(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}

fn print_summary(report: &RunReport, action: Action) {
    for entity in &report.entities {
        let written = match &entity.reconcile {
            Some(r) => format!(
                "inserted={} revised={} unchanged={}",
                r.inserted, r.revised, r.unchanged
            ),
            None => format!("loaded={}", entity.loaded),
        };
        eprintln!(
            "{} {} → {} fetched={} skipped={} duplicates={} {} (fetch {}, stage {}, load {})",
            "ok".green().bold(),
            entity.entity,
            entity.table.bold(),
            entity.fetched,
            entity.skipped,
            entity.duplicates,
            written,
            seconds(entity.fetch_time),
            seconds(entity.stage_time),
            seconds(entity.load_time),
        );
    }
    for (entity, error) in &report.failures {
        eprintln!("{} {}: {}", "failed".red().bold(), entity, error);
    }
    eprintln!(
        "{} {} finished in {}",
        "info:".yellow().bold(),
        action,
        seconds(report.elapsed)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_and_ddl() {
        let cli = Cli::try_parse_from(["almsync", "run", "conf.yml", "update"]).unwrap();
        match cli.command {
            Commands::Run { config, action } => {
                assert_eq!(config, PathBuf::from("conf.yml"));
                assert_eq!(Action::from(action), Action::Update);
            }
            _ => panic!("expected run"),
        }

        let cli = Cli::try_parse_from(["almsync", "ddl", "conf.yml"]).unwrap();
        assert!(matches!(cli.command, Commands::Ddl { .. }));
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(Cli::try_parse_from(["almsync", "run", "conf.yml", "drop"]).is_err());
        assert!(Cli::try_parse_from(["almsync", "run", "conf.yml"]).is_err());
    }

    #[test]
    fn missing_config_is_reported_with_path() {
        let err = load_config(Path::new("/nonexistent/almsync.yml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/almsync.yml"));
    }
}
