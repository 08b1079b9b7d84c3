use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use custodian::*;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::Level;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.custodian/custodian.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the database, creating or upgrading it as needed
    Open,

    /// Show the live database and its shadow copy
    Status,

    /// Run an integrity check on the live database
    Check {
        /// Restore from the shadow copy if the check fails
        #[clap(long)]
        restore: bool,
    },

    /// Copy the live database into the shadow copy
    Backup,

    /// Replace the live database with the shadow copy
    Restore {
        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// List migration scripts and whether they have been applied
    Migrations,
}

#[derive(Serialize)]
struct OpenReport {
    database: String,
    state: LifecycleState,
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    migrations: Option<MigrationOutcome>,
}

#[derive(Serialize)]
struct ActionReport {
    action: &'static str,
    database: String,
    success: bool,
}

#[derive(Tabled)]
struct FileRow {
    role: &'static str,
    path: String,
    size: String,
    version: String,
    intact: bool,
    modified: String,
}

impl FileRow {
    fn new(role: &'static str, info: &SqliteDatabaseInfo) -> Self {
        let missing = || "-".to_string();
        Self {
            role,
            path: info.path.clone(),
            size: info.size_bytes.map(format_size).unwrap_or_else(missing),
            version: info
                .stored_version
                .map(|v| v.to_string())
                .unwrap_or_else(missing),
            intact: info.intact,
            modified: info.last_modified.clone().unwrap_or_else(missing),
        }
    }
}

#[derive(Tabled, Serialize)]
struct MigrationRow {
    version: u32,
    file: String,
    applied: bool,
}

fn build_controller(config: &CustodianConfig) -> Result<LifecycleController> {
    let assets = Arc::new(AssetDir::new(config.assets_dir.as_str()));
    let catalog = Arc::new(AssetCatalog::new(assets.clone()));
    let identity = config.identity()?;

    Ok(LifecycleController::new(identity, catalog, assets)
        .with_options(config.lifecycle_options()))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

fn print_action(json: bool, action: &'static str, database: &str, success: bool) {
    if json {
        print_json(&ActionReport {
            action,
            database: database.to_string(),
            success,
        });
    } else if success {
        println!("{} of {} succeeded", action, database);
    } else {
        eprintln!("{} of {} failed", action, database);
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn run_open(config: &CustodianConfig, json: bool) -> Result<()> {
    let mut controller = build_controller(config)?;
    controller.open()?;

    let report = OpenReport {
        database: controller.identity().name().to_string(),
        state: controller.state(),
        version: controller.identity().version(),
        migrations: controller.last_migration_outcome().cloned(),
    };
    controller.close();

    if json {
        print_json(&report);
        return Ok(());
    }

    println!("Opened {} at version {}", report.database, report.version);
    match &report.migrations {
        None | Some(MigrationOutcome::NothingToApply) => println!("No migrations applied"),
        Some(MigrationOutcome::Applied { versions }) => {
            println!("Applied migrations: {:?}", versions)
        }
        Some(MigrationOutcome::Degraded { applied, failed }) => {
            println!("Applied migrations: {:?}", applied);
            for failure in failed {
                eprintln!(
                    "Migration {} ({}) failed: {}",
                    failure.version, failure.resource_name, failure.error
                );
            }
        }
    }
    Ok(())
}

fn run_status(config: &CustodianConfig, config_path: Option<&str>, json: bool) {
    let status = get_status_info(config);
    if json {
        print_json(&status);
        return;
    }

    println!("Custodian Database Status");
    println!("=========================\n");
    let config_file = config_path
        .map(str::to_string)
        .unwrap_or_else(CustodianConfig::config_file_path);
    println!("Config file: {}", config_file);
    println!("{}\n", config.summary());
    println!(
        "{} (configured version {})\n",
        status.database_name, status.configured_version
    );
    let rows = vec![
        FileRow::new("live", &status.live),
        FileRow::new("shadow", &status.shadow),
    ];
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn run_check(config: &CustodianConfig, json: bool, restore: bool) -> Result<bool> {
    let mut controller = build_controller(config)?;
    let name = config.database_name.clone();

    let intact = controller.check_integrity();
    print_action(json, "integrity check", &name, intact);
    if intact || !restore {
        return Ok(intact);
    }

    let restored = controller.restore_from_backup();
    print_action(json, "restore", &name, restored);
    Ok(restored)
}

fn run_migrations(config: &CustodianConfig, json: bool) -> Result<()> {
    let controller = build_controller(config)?;
    let stored = get_sqlite_info(&config.sqlite_path())
        .stored_version
        .unwrap_or(0);

    let rows: Vec<MigrationRow> = controller
        .migrations()
        .into_iter()
        .map(|script| MigrationRow {
            version: script.version,
            file: script.file_name().to_string(),
            applied: script.version <= stored,
        })
        .collect();

    if json {
        print_json(&rows);
    } else if rows.is_empty() {
        println!("No migrations found under {}/migrations", config.assets_dir);
    } else {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level INFO or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match CustodianConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Open => run_open(&config, cli.json),
        Commands::Status => {
            run_status(&config, cli.config.as_deref(), cli.json);
            Ok(())
        }
        Commands::Check { restore } => match run_check(&config, cli.json, restore) {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(e) => Err(e),
        },
        Commands::Backup => build_controller(&config).map(|controller| {
            let success = controller.backup();
            print_action(cli.json, "backup", &config.database_name, success);
            if !success {
                std::process::exit(1);
            }
        }),
        Commands::Restore { yes } => {
            if !yes
                && !confirm(&format!(
                    "Replace {} with {}?",
                    config.sqlite_path(),
                    config.shadow_path()
                ))
            {
                eprintln!("Aborted");
                return;
            }
            build_controller(&config).map(|mut controller| {
                let success = controller.restore_from_backup();
                print_action(cli.json, "restore", &config.database_name, success);
                if !success {
                    std::process::exit(1);
                }
            })
        }
        Commands::Migrations => run_migrations(&config, cli.json),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
