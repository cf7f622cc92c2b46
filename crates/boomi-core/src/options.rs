// crates/boomi-core/src/options.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const DEFAULT_ENGINE: &str = "mysql";
pub const DEFAULT_ENVIRONMENT: &str = "stage";
pub const DEFAULT_MONTHS: u32 = 2;
pub const LOCAL_ROOT: &str = "/tmp/etl";

const WORKDAY_BASE_URL: &str = "https://services1.myworkday.com";
const WORKDAY_TENANT: &str = "vhr_mozilla";
const WORKDAY_USERNAME: &str = "ISU-WPR";
const SERVICENOW_BASE_URL: &str = "https://mozilla.service-now.com";
const SERVICENOW_USERNAME: &str = "mozvending";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub credentials: Credentials,
}

impl Endpoint {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Settings shared by every job of a run. Built once, then read-only.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub engines: Vec<String>,
    pub engine_urls: BTreeMap<String, String>,
    pub environment: String,
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    pub dry_run: bool,
    pub local: bool,
    pub now: NaiveDateTime,
    /// Cap on records read. Jobs that read one file per month apply it to
    /// each file.
    pub limit: Option<usize>,
    pub months: u32,
    pub table_name: Option<String>,
    pub input_file: Option<String>,
    pub cleanup: bool,
    pub aws_account_id: Option<String>,
    pub workday: Endpoint,
    pub workday_tenant: String,
    pub servicenow: Endpoint,
    pub sftp_root: PathBuf,
    pub centerstone_root: PathBuf,
    pub billing_root: PathBuf,
}

impl JobOptions {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            engines: vec![DEFAULT_ENGINE.to_string()],
            engine_urls: BTreeMap::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            use_cache: false,
            cache_dir: PathBuf::from(LOCAL_ROOT).join("cache"),
            dry_run: false,
            local: false,
            now,
            limit: None,
            months: DEFAULT_MONTHS,
            table_name: None,
            input_file: None,
            cleanup: true,
            aws_account_id: None,
            workday: Endpoint {
                base_url: WORKDAY_BASE_URL.to_string(),
                credentials: Credentials {
                    username: WORKDAY_USERNAME.to_string(),
                    password: None,
                },
            },
            workday_tenant: WORKDAY_TENANT.to_string(),
            servicenow: Endpoint {
                base_url: SERVICENOW_BASE_URL.to_string(),
                credentials: Credentials {
                    username: SERVICENOW_USERNAME.to_string(),
                    password: None,
                },
            },
            sftp_root: PathBuf::from("/mnt/sftp"),
            centerstone_root: PathBuf::from("/mnt/centerstone"),
            billing_root: PathBuf::from("/mnt/billing"),
        }
    }

    /// Points every file store at one directory.
    pub fn with_file_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        self.sftp_root = root.clone();
        self.centerstone_root = root.clone();
        self.billing_root = root;
        self
    }

    pub fn is_prod(&self) -> bool {
        self.environment == "prod"
    }

    pub fn table_suffix(&self) -> String {
        if self.is_prod() {
            String::new()
        } else {
            format!("_{}", self.environment)
        }
    }

    pub fn file_suffix(&self) -> String {
        if self.is_prod() {
            String::new()
        } else {
            format!(".{}", self.environment)
        }
    }

    /// Table name for a job: the `--table-name` override or the job default,
    /// followed by the environment suffix.
    pub fn table(&self, default: &str) -> String {
        let base = self.table_name.as_deref().unwrap_or(default);
        format!("{base}{}", self.table_suffix())
    }

    /// The `--table-name` override or the job default, with no environment
    /// suffix.
    pub fn unsuffixed_table(&self, default: &str) -> String {
        self.table_name.as_deref().unwrap_or(default).to_string()
    }

    /// A secondary table of a job; the override never applies.
    pub fn fixed_table(&self, base: &str) -> String {
        format!("{base}{}", self.table_suffix())
    }

    pub fn file(&self, base: &str) -> String {
        format!("{base}{}", self.file_suffix())
    }

    pub fn month_start(&self) -> NaiveDate {
        let today = self.now.date();
        today.with_day(1).unwrap_or(today)
    }

    /// First day of each of the `n` months before the current one, newest first.
    pub fn lookback_months(&self, n: u32) -> Vec<NaiveDate> {
        std::iter::successors(Some(self.month_start()), |month| {
            month.checked_sub_months(Months::new(1))
        })
        .skip(1)
        .take(n as usize)
        .collect()
    }

    pub fn cutoff_months(&self, n: u32) -> NaiveDate {
        self.lookback_months(n)
            .last()
            .copied()
            .unwrap_or_else(|| self.month_start())
    }

    pub fn days_back(&self, n: i64) -> NaiveDateTime {
        (self.now - Duration::days(n))
            .date()
            .and_hms_opt(0, 0, 0)
            .unwrap_or(self.now)
    }

    /// Checks that every selected engine can be resolved to a connection URL.
    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(PipelineError::Config("no engine selected".to_string()));
        }
        if self.dry_run {
            return Ok(());
        }
        for engine in &self.engines {
            if !self.engine_urls.contains_key(engine) {
                return Err(PipelineError::UnknownEngine(engine.clone()));
            }
        }
        Ok(())
    }
}

/// Values supplied on the command line or through `BOOMI_*` variables.
/// `None` means "not given" and lets the config file or the default apply.
#[derive(Debug, Clone, Default)]
pub struct OptionInputs {
    pub engines: Vec<String>,
    pub engine_urls: Vec<(String, String)>,
    pub environment: Option<String>,
    pub use_cache: bool,
    pub cache_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub local: bool,
    pub now: Option<NaiveDateTime>,
    pub limit: Option<usize>,
    pub months: Option<u32>,
    pub table_name: Option<String>,
    pub input_file: Option<String>,
    pub no_cleanup: bool,
    pub aws_account_id: Option<String>,
    pub workday_url: Option<String>,
    pub workday_username: Option<String>,
    pub workday_password: Option<String>,
    pub workday_tenant: Option<String>,
    pub servicenow_url: Option<String>,
    pub servicenow_username: Option<String>,
    pub servicenow_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub environment: Option<String>,
    pub engine: Option<Vec<String>>,
    pub engines: BTreeMap<String, String>,
    pub workday: EndpointSection,
    pub servicenow: EndpointSection,
    pub files: FilesSection,
    pub aws: AwsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    pub sftp_root: Option<PathBuf>,
    pub centerstone_root: Option<PathBuf>,
    pub billing_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsSection {
    pub account_id: Option<String>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| PipelineError::file(path.display().to_string(), err))?;
        Self::parse(&text)
    }
}

/// Merges the layers: inputs win over the config file, the file over defaults.
/// `env_urls` carries `BOOMI_ENGINE_<NAME>_URL` values, keyed by lowercased name.
pub fn resolve_options(
    inputs: OptionInputs,
    file: ConfigFile,
    env_urls: BTreeMap<String, String>,
    now: NaiveDateTime,
) -> Result<JobOptions> {
    let mut options = JobOptions::new(inputs.now.unwrap_or(now));

    let engines = if !inputs.engines.is_empty() {
        inputs.engines
    } else {
        file.engine.unwrap_or_else(|| vec![DEFAULT_ENGINE.to_string()])
    };
    options.engines = dedup_in_order(engines);

    options.engine_urls = file
        .engines
        .into_iter()
        .map(|(name, url)| (name.trim().to_lowercase(), url))
        .collect();
    options.engine_urls.extend(env_urls);
    options.engine_urls.extend(
        inputs
            .engine_urls
            .into_iter()
            .map(|(name, url)| (name.trim().to_lowercase(), url)),
    );

    if let Some(environment) = inputs.environment.or(file.environment) {
        options.environment = environment;
    }
    options.use_cache = inputs.use_cache;
    options.dry_run = inputs.dry_run;
    options.local = inputs.local;
    options.limit = inputs.limit;
    options.months = inputs.months.unwrap_or(DEFAULT_MONTHS);
    options.table_name = inputs.table_name;
    options.input_file = inputs.input_file;
    options.cleanup = !inputs.no_cleanup;
    options.aws_account_id = inputs.aws_account_id.or(file.aws.account_id);

    apply_endpoint(
        &mut options.workday,
        inputs.workday_url,
        inputs.workday_username,
        inputs.workday_password,
        file.workday.clone(),
    );
    if let Some(tenant) = inputs.workday_tenant.or(file.workday.tenant) {
        options.workday_tenant = tenant;
    }
    apply_endpoint(
        &mut options.servicenow,
        inputs.servicenow_url,
        inputs.servicenow_username,
        inputs.servicenow_password,
        file.servicenow,
    );

    if options.local {
        options = options.with_file_root(LOCAL_ROOT);
    } else {
        if let Some(root) = file.files.sftp_root {
            options.sftp_root = root;
        }
        if let Some(root) = file.files.centerstone_root {
            options.centerstone_root = root;
        }
        if let Some(root) = file.files.billing_root {
            options.billing_root = root;
        }
    }
    if let Some(dir) = inputs.cache_dir.or(file.files.cache_dir) {
        options.cache_dir = dir;
    }

    options.validate()?;
    Ok(options)
}

/// Collects `BOOMI_ENGINE_<NAME>_URL` entries from an environment listing.
pub fn engine_urls_from_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix("BOOMI_ENGINE_")?.strip_suffix("_URL")?;
            (!name.is_empty()).then(|| (name.to_lowercase(), value))
        })
        .collect()
}

fn apply_endpoint(
    endpoint: &mut Endpoint,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    section: EndpointSection,
) {
    if let Some(url) = url.or(section.url) {
        endpoint.base_url = url;
    }
    if let Some(username) = username.or(section.username) {
        endpoint.credentials.username = username;
    }
    endpoint.credentials.password = password.or(section.password);
}

fn dedup_in_order(names: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
