//! Browse a metadata catalog hosted by a detached worker process.
//!
//! Without flags the binary starts itself again with `--worker` as the
//! worker process, opens a session and prints the catalog tree. Logs go to
//! stderr because the worker's stdout is its channel.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use dpi_core::model::{Column, DataSource, DataSourceStub, Schema, Table, standard_catalog};
use dpi_session::{Controller, ControllerConfig};
use dpi_worker::{ContainerMap, ProcessLauncher, WorkerCommand, WorkerServer, sample_catalog};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dpi-browse")]
#[command(about = "Browse a metadata catalog hosted by a detached worker process")]
struct Args {
    /// Serve the in-memory catalog on stdin/stdout
    #[arg(long)]
    worker: bool,

    /// Project to open a session on
    #[arg(long, default_value = "demo")]
    project: String,

    /// Data-source container to open
    #[arg(long, default_value = "pg-main")]
    container: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    if args.worker {
        serve_worker(&args.project).await
    } else {
        browse(&args).await
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn serve_worker(project: &str) -> Result<()> {
    info!(project, pid = std::process::id(), "Worker serving in-memory catalog");
    let provider = ContainerMap::new().with("pg-main", sample_catalog());
    WorkerServer::new(Arc::new(provider))
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("worker channel failed")?;
    info!(project, "Worker exiting");
    Ok(())
}

async fn browse(args: &Args) -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let exe = exe.to_str().context("executable path is not UTF-8")?;
    let mut params = vec!["--worker", "--project", "{project}"];
    if args.debug {
        params.push("--debug");
    }
    let command = WorkerCommand::new(shlex::try_quote(exe)?).params(params);

    let controller = Controller::new(
        ProcessLauncher::new(command),
        Arc::new(standard_catalog()),
        ControllerConfig::from_env(),
    );
    let session = controller.open_session(&args.project).await?;
    controller.ping().await?;

    let data_source = controller.open_data_source(&session, &args.container).await?;
    let printed = print_tree(&data_source).await;
    controller.close_session(&session).await?;
    printed
}

async fn print_tree(data_source: &DataSourceStub) -> Result<()> {
    println!("{} ({})", data_source.name().await?, data_source.driver_name().await?);
    for schema in data_source.schemas().await? {
        println!("  {}", schema.name().await?);
        for table in schema.tables().await? {
            println!("    {} ({} rows)", table.name().await?, table.row_count().await?);
            for column in table.columns().await? {
                let nullability = if column.nullable().await? { "null" } else { "not null" };
                println!(
                    "      {} {} {nullability}",
                    column.name().await?,
                    column.data_type().await?
                );
            }
        }
    }
    Ok(())
}
