//! sqlsession - Main entry point.
//!
//! Runs one session operation against the configured database and prints the
//! result to stdout. Logs go to stderr.

use futures_util::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlsession::config::{Command, Config, parse_order};
use sqlsession::db::PoolRegistry;
use sqlsession::error::DbResult;
use sqlsession::models::Record;
use sqlsession::session::Session;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_record(record: &Record) {
    println!("{}", JsonValue::Object(record.clone()));
}

/// Run the configured command inside a session scope. Returns whether the
/// command succeeded in the CLI sense (e.g. `exists` on a missing table does not).
async fn run(config: &Config) -> DbResult<bool> {
    let params = config.connection_params()?;
    let mut registry = PoolRegistry::new().with_options(config.pool_options()?);
    if let Some(store) = config.secret_store() {
        registry = registry.with_secret_store(store);
    }

    let mut session = Session::open(&registry, &params).await?;
    if let Some(role) = &config.role {
        session = session.with_role(role.clone());
    }

    let command = config.command.clone();
    let outcome = session
        .scope(|s| Box::pin(async move { execute_command(s, command).await }))
        .await;

    registry.close_all().await;
    outcome
}

async fn execute_command(session: &mut Session, command: Command) -> DbResult<bool> {
    match command {
        Command::Fetch {
            table,
            filter,
            order,
            stream,
        } => {
            let condition = filter.condition()?;
            let order = parse_order(&order);
            if stream {
                let mut rows = session.iter_all(table.as_str(), condition, order).await?;
                while let Some(record) = rows.try_next().await? {
                    print_record(&record);
                }
            } else {
                for record in session.fetch_all(table.as_str(), condition, order).await? {
                    print_record(&record);
                }
            }
        }
        Command::One { table, filter } => {
            let record = session.fetch_one(table.as_str(), filter.condition()?).await?;
            print_record(&record);
        }
        Command::Count { table, filter } => {
            println!("{}", session.count(table.as_str(), filter.condition()?).await?);
        }
        Command::Query { sql } => {
            for record in session.all(sql).await? {
                print_record(&record);
            }
        }
        Command::Exists { table } => {
            let exists = session.exists(&table).await?;
            println!("{}", exists);
            return Ok(exists);
        }
        Command::Now { local } => {
            let now = if local {
                session.get_local_timestamp().await?
            } else {
                session.get_current_timestamp().await?
            };
            println!("{}", now);
        }
        Command::Analyze { table } => session.analyze_table(&table).await?,
        Command::VacuumAnalyze { table } => session.vacuum_analyze_table(&table).await?,
        Command::DropTable {
            table,
            cascade,
            if_exists,
        } => {
            if if_exists {
                session.drop_table_if_exists(&table, cascade).await?;
            } else {
                session.drop_table(&table, cascade).await?;
            }
        }
        Command::AddUser { user } => session.add_user(&user).await?,
        Command::DropUser { user } => session.drop_user(&user).await?,
        Command::GrantRole { role, grantee } => session.grant_role(&role, &grantee).await?,
        Command::SetPassword { user, password } => {
            session.set_user_password(&user, &password).await?
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sqlsession");

    match run(&config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            ExitCode::from(2)
        }
    }
}
