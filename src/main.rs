use anyhow::{bail, Context};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use db_query_translator::config::Config;
use db_query_translator::models::{Command, ExecutionSettings, InMemoryCatalog, TableMetadata};
use db_query_translator::services::connection_pool::ConnectionPoolManager;
use db_query_translator::services::query_service::{ExecutionOutcome, QueryService};
use db_query_translator::services::translator::TranslationService;
use db_query_translator::storage::SqliteConnectionFactory;

const USAGE: &str = "usage: db-query-translator <request.json> [--execute] [--user <name>]

  --execute runs the command against the bundled SQLite store at NATIVE_DATABASE_URL.
  SQLite accepts the portable subset of either dialect's output; dialect-only
  constructs such as ROWNUM wrapping, TO_DATE, NVL or UPSERT INTO fail there.";

/// A command plus the metadata it refers to
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    tables: Vec<TableMetadata>,
    /// Statements run verbatim before the command when executing
    #[serde(default)]
    setup: Vec<String>,
    #[serde(default)]
    settings: Option<ExecutionSettings>,
    command: Command,
}

struct Args {
    request_path: String,
    execute: bool,
    user: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut request_path = None;
    let mut execute = false;
    let mut user = "default".to_string();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--execute" => execute = true,
            "--user" => user = args.next().context(USAGE)?,
            other if request_path.is_none() && !other.starts_with("--") => {
                request_path = Some(other.to_string())
            }
            other => bail!("unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    Ok(Args {
        request_path: request_path.context(USAGE)?,
        execute,
        user,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let dialect = config.dialect()?;
    let args = parse_args()?;

    let raw = std::fs::read_to_string(&args.request_path)
        .with_context(|| format!("failed to read {}", args.request_path))?;
    let request: Request = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse request {}", args.request_path))?;

    let catalog: InMemoryCatalog = request.tables.into_iter().collect();
    let pool = Arc::new(ConnectionPoolManager::new(Arc::new(SqliteConnectionFactory::new(
        config.native.url.clone(),
    ))));
    let service = QueryService::new(
        Arc::new(TranslationService::new()),
        pool.clone(),
        Arc::new(catalog),
        dialect,
        config.execution,
    );
    info!("Translating for {} dialect", dialect.as_str());

    if !args.execute {
        let compiled = service.compile(request.command, request.settings)?;
        let statements: Vec<_> = compiled
            .statements()
            .iter()
            .map(|s| {
                serde_json::json!({
                    "sql": s.sql,
                    "placeholders": s.placeholder_count(),
                    "parameter_rows": s.parameter_rows.len(),
                })
            })
            .collect();
        let publications: Vec<_> = compiled
            .schemas()
            .iter()
            .map(|s| s.publication_statement.clone())
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "dialect": dialect.as_str(),
                "statements": statements,
                "publications": publications,
            }))?
        );
        return Ok(());
    }

    tracing::warn!(
        "Executing {} output against the bundled SQLite store; dialect-only constructs will fail",
        dialect.as_str()
    );

    if !request.setup.is_empty() {
        let lease = pool.checkout(&args.user).await?;
        let mut statement = lease.create_statement().await?;
        for sql in &request.setup {
            statement
                .execute_update(Some(sql.as_str()))
                .await
                .with_context(|| format!("setup statement failed: {}", sql))?;
        }
        statement.close().await?;
    }

    match service.execute(&args.user, request.command, request.settings).await? {
        ExecutionOutcome::Rows(results) => {
            let columns = results.output_types().to_vec();
            let rows = results.collect().await?;
            info!("Query returned {} rows", rows.len());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "column_types": columns,
                    "rows": rows,
                }))?
            );
        }
        ExecutionOutcome::UpdateCounts(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "counts": outcome.counts,
                    "total": outcome.total(),
                    "warnings": outcome.warnings,
                }))?
            );
        }
    }

    Ok(())
}
