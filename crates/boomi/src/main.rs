// crates/boomi/src/main.rs
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use boomi_core::jobs::aws_billing;
use boomi_core::options::{engine_urls_from_env, resolve_options};
use boomi_core::{all_job_descriptors, find_job, run_job, JobContext, JobOptions};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod args;

use args::OptionArgs;

#[derive(Parser, Debug)]
#[command(author, version, about = "Boomi ETL jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one job and print its report as JSON
    Run(RunArgs),
    /// List the registered jobs
    Jobs,
    /// Delete AWS billing rows older than the lookback window
    Cleanup(OptionArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job code, see `boomi jobs`
    job: String,
    #[command(flatten)]
    options: OptionArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the command ran but a sink failed.
async fn dispatch(command: Command) -> Result<bool> {
    match command {
        Command::Jobs => {
            list_jobs();
            Ok(true)
        }
        Command::Run(args) => {
            let job = find_job(&args.job).ok_or_else(|| anyhow!("unknown job {:?}", args.job))?;
            let ctx = JobContext::new(load_options(args.options)?)?;
            let report = run_job(job, &ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.succeeded() {
                for sink in report.failed_sinks() {
                    warn!(sink = %sink.sink, error = ?sink.error, "sink failed");
                }
            }
            Ok(report.succeeded())
        }
        Command::Cleanup(options) => {
            let ctx = JobContext::new(load_options(options)?)?;
            let table = ctx.options.table(aws_billing::DEFAULT_TABLE);
            if ctx.options.dry_run {
                warn!(table = %table, "dry run, cleanup skipped");
                return Ok(true);
            }
            let reports = aws_billing::cleanup(&ctx, &table).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(true)
        }
    }
}

fn load_options(args: OptionArgs) -> Result<JobOptions> {
    let file = args.config_file()?;
    let now = chrono::Local::now().naive_local();
    let env_urls = engine_urls_from_env(std::env::vars());
    let options =
        resolve_options(args.into_inputs(), file, env_urls, now).context("resolving options")?;
    info!(
        environment = %options.environment,
        engines = ?options.engines,
        dry_run = options.dry_run,
        "options resolved"
    );
    Ok(options)
}

fn list_jobs() {
    let mut table = Table::new();
    table.set_header(vec!["Job", "Default table", "Description"]);
    for job in all_job_descriptors() {
        table.add_row(vec![
            job.code,
            job.default_table.unwrap_or("-"),
            job.description,
        ]);
    }
    println!("{table}");
}
