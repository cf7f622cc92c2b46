// crates/boomi/src/args.rs
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use boomi_core::options::{ConfigFile, OptionInputs};
use chrono::NaiveDateTime;
use clap::Args;

/// Options shared by every subcommand that touches a job.
#[derive(Args, Debug, Default, Clone)]
pub struct OptionArgs {
    /// TOML file with engines, endpoints and file roots.
    #[arg(long, env = "BOOMI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Engines to write to; repeat or separate with commas.
    #[arg(long = "engine", env = "BOOMI_ENGINES", value_delimiter = ',')]
    pub engines: Vec<String>,

    /// Extra engine DSN as NAME=URL.
    #[arg(long = "engine-url", value_parser = parse_engine_url)]
    pub engine_urls: Vec<(String, String)>,

    #[arg(long, env = "BOOMI_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Cache HTTP GET bodies on disk.
    #[arg(long)]
    pub use_cache: bool,

    #[arg(long, env = "BOOMI_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long)]
    pub dry_run: bool,

    /// Point every file store at the local scratch directory.
    #[arg(long)]
    pub local: bool,

    /// Reference time, `YYYY-MM-DD HH:MM:SS`.
    #[arg(long, value_parser = parse_now)]
    pub now: Option<NaiveDateTime>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// Months of billing reports to load.
    #[arg(long)]
    pub months: Option<u32>,

    #[arg(long)]
    pub table_name: Option<String>,

    #[arg(long)]
    pub input_file: Option<String>,

    #[arg(long)]
    pub no_cleanup: bool,

    #[arg(long, env = "BOOMI_AWS_ACCOUNT_ID")]
    pub aws_account_id: Option<String>,

    #[arg(long, env = "BOOMI_WD_URL")]
    pub wd_url: Option<String>,

    #[arg(long, env = "BOOMI_WD_USERNAME")]
    pub wd_username: Option<String>,

    #[arg(long, env = "WD_PASSWORD", hide_env_values = true)]
    pub wd_password: Option<String>,

    #[arg(long, env = "BOOMI_WD_TENANT")]
    pub wd_tenant: Option<String>,

    #[arg(long, env = "BOOMI_SN_URL")]
    pub sn_url: Option<String>,

    #[arg(long, env = "BOOMI_SN_USERNAME")]
    pub sn_username: Option<String>,

    #[arg(long, env = "SN_PASSWORD", hide_env_values = true)]
    pub sn_password: Option<String>,
}

impl OptionArgs {
    pub fn config_file(&self) -> Result<ConfigFile> {
        match &self.config {
            Some(path) => ConfigFile::load(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(ConfigFile::default()),
        }
    }

    pub fn into_inputs(self) -> OptionInputs {
        OptionInputs {
            engines: self.engines,
            engine_urls: self.engine_urls,
            environment: self.environment,
            use_cache: self.use_cache,
            cache_dir: self.cache_dir,
            dry_run: self.dry_run,
            local: self.local,
            now: self.now,
            limit: self.limit,
            months: self.months,
            table_name: self.table_name,
            input_file: self.input_file,
            no_cleanup: self.no_cleanup,
            aws_account_id: self.aws_account_id,
            workday_url: self.wd_url,
            workday_username: self.wd_username,
            workday_password: self.wd_password,
            workday_tenant: self.wd_tenant,
            servicenow_url: self.sn_url,
            servicenow_username: self.sn_username,
            servicenow_password: self.sn_password,
        }
    }
}

fn parse_engine_url(text: &str) -> Result<(String, String)> {
    let (name, url) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=URL, got {text:?}"))?;
    if name.trim().is_empty() || url.trim().is_empty() {
        return Err(anyhow!("expected NAME=URL, got {text:?}"));
    }
    Ok((name.trim().to_lowercase(), url.trim().to_string()))
}

fn parse_now(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .with_context(|| format!("invalid --now {text:?}"))
}
