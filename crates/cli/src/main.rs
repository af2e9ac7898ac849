// costpull - monthly cloud-cost reconciliation
// Pulls one month of spend from the configured billing sources, reconciles
// it against the accounts file, and publishes the table as CSV or as the
// month's raw-data sheet.

mod exit_codes;
mod fetch;
mod pipeline;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use costpull_config::{AccountsFile, ConfigError, Configuration, GsheetConfig, OAuthConfig, DEFAULT_ACCOUNTS_FILE};
use costpull_io::{OutputError, ReportSink};
use costpull_recon::model::AMAZON;
use costpull_recon::{AccountDirectory, BucketTable, BulkSource, FetchError, ReconError, ReportMonth, ScopedSource};
use costpull_sheets::{AuthError, GoogleSheetsClient, SheetsError};

use exit_codes::{EXIT_CONFIG, EXIT_DATA_INTEGRITY, EXIT_OUTPUT_IO, EXIT_SUCCESS};
use fetch::{AwsCredentials, CloudabilityClient, CostExplorerClient, IbmCloudClient, OrganizationsClient};
use pipeline::{RunSettings, Sources};

/// Cost types Cost Explorer accepts; Cloudability takes the same names
/// except for its own spelling of the default.
const COST_TYPES: [&str; 7] = [
    "AmortizedCost",
    "BlendedCost",
    "NetAmortizedCost",
    "NetUnblendedCost",
    "NormalizedUsageAmount",
    "UnblendedCost",
    "UsageQuantity",
];

#[derive(Parser)]
#[command(name = "costpull")]
#[command(about = "Pull, reconcile and publish one month of cloud spend")]
#[command(version)]
#[command(after_help = "\
Examples:
  costpull --month 2024-08 --output csv
  costpull --month 2024-08 --output csv --csv august.csv --report august-report.txt
  costpull --accounts teams.yaml --costtype AmortizedCost
  costpull --awswritetags --dry-run
  RUST_LOG=costpull=debug costpull --output gsheet")]
struct Cli {
    /// Accounts file (YAML)
    #[arg(long, default_value = DEFAULT_ACCOUNTS_FILE)]
    accounts: PathBuf,

    /// Month to report on, YYYY-MM (default: last month)
    #[arg(long)]
    month: Option<String>,

    /// Cost type to pull
    #[arg(long, default_value = "UnblendedCost", value_parser = clap::builder::PossibleValuesParser::new(COST_TYPES))]
    costtype: String,

    /// Output destination
    #[arg(long, value_enum, default_value = "gsheet")]
    output: OutputKind,

    /// CSV output file (default: output-<month>.csv)
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Consistency report file (default: report-<timestamp>.txt)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Take the AWS account list from the costpuller_category tag in AWS Organizations
    #[arg(long, conflicts_with = "awswritetags")]
    taggedaccounts: bool,

    /// Write each AWS account's team from the accounts file to its costpuller_category tag, then exit
    #[arg(long)]
    awswritetags: bool,

    /// With --awswritetags, print the tags instead of writing them
    #[arg(long, requires = "awswritetags")]
    dry_run: bool,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputKind {
    Csv,
    Gsheet,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

// ============================================================================
// Run
// ============================================================================

fn run(cli: Cli) -> Result<(), CliError> {
    let today = Local::now().date_naive();
    let month = resolve_month(cli.month.as_deref(), today)?;
    tracing::info!(%month, cost_type = %cli.costtype, "costpull starting");

    let accounts = AccountsFile::load(&cli.accounts).map_err(|e| match e {
        ConfigError::Read { .. } => CliError::from_config(e).with_hint("pass --accounts <file>"),
        other => CliError::from_config(other),
    })?;
    let config = &accounts.configuration;

    if cli.awswritetags {
        return write_tags(&accounts, cli.dry_run);
    }

    // Every configuration check happens before the first network call.
    let target = PublishTarget::resolve(&cli, config, month)?;
    let sources = SourceSet::build(config, today)?;
    let file_directory = if cli.taggedaccounts {
        if config.cloudability.is_some() {
            return Err(CliError::config("--taggedaccounts only applies when AWS is queried directly")
                .with_hint("remove the cloudability section or drop --taggedaccounts"));
        }
        None
    } else {
        Some(accounts.directory().map_err(CliError::from_config)?)
    };

    let report_path = cli.report.clone().unwrap_or_else(default_report_path);
    let mut sink = ReportSink::open(&report_path).map_err(CliError::output)?;

    let mut directory = match file_directory {
        Some(directory) => directory,
        None => sources.tagged_directory()?,
    };

    // Spreadsheet credentials are settled before any cost data is pulled.
    let publish = target.connect()?;

    let settings = RunSettings {
        month,
        cost_type: cli.costtype.clone(),
        cost_center: config.cloudability.as_ref().and_then(|c| c.cost_center.clone()),
        cross_check: config.aws.as_ref().is_some_and(|a| a.cross_check),
    };

    let outcome = pipeline::run(&mut directory, &sources.as_sources(), &settings)?;

    sink.write_report(&outcome.report).map_err(CliError::output)?;
    if sink.lines_written() > 0 {
        eprintln!("{} consistency finding(s) written to {}", sink.lines_written(), sink.path().display());
    }

    match publish {
        Publish::Csv(path) => {
            costpull_io::csv::export(&outcome.table, &path).map_err(CliError::output)?;
        }
        Publish::Sheet { client, gsheet } => {
            let synced = costpull_sheets::sync_table(&client, &gsheet, &outcome.table, &month).map_err(CliError::sheets)?;
            tracing::info!(sheet = %synced.sheet_name, origin = ?synced.origin, "spreadsheet updated");
        }
    }

    tracing::info!("operation done");
    Ok(())
}

/// Tag every AWS account in the accounts file with its team, then stop.
fn write_tags(accounts: &AccountsFile, dry_run: bool) -> Result<(), CliError> {
    let directory = accounts.directory().map_err(CliError::from_config)?;
    let entries = directory.entries_for(AMAZON);
    if entries.is_empty() {
        return Err(CliError::config("the accounts file lists no aws accounts to tag"));
    }
    let aws_config = accounts.configuration.aws.clone().unwrap_or_default();
    let client = OrganizationsClient::new(AwsCredentials::resolve(&aws_config)?);
    let tagged = client.write_category_tags(&entries, dry_run).map_err(CliError::fetch)?;
    if dry_run {
        eprintln!("{tagged} account(s) would be tagged");
    } else {
        eprintln!("{tagged} account(s) tagged with {}", fetch::organizations::CATEGORY_TAG);
    }
    Ok(())
}

fn resolve_month(arg: Option<&str>, today: NaiveDate) -> Result<ReportMonth, CliError> {
    let month = match arg {
        Some(text) => ReportMonth::parse(text).map_err(CliError::recon)?,
        None => ReportMonth::previous(today),
    };
    month.ensure_started(today).map_err(CliError::recon)?;
    Ok(month)
}

fn default_report_path() -> PathBuf {
    PathBuf::from(format!("report-{}.txt", Local::now().format("%Y%m%d%H%M%S")))
}

/// Where the table goes, validated but not yet connected.
enum PublishTarget {
    Csv(PathBuf),
    Sheet { gsheet: GsheetConfig, oauth: OAuthConfig },
}

impl PublishTarget {
    fn resolve(cli: &Cli, config: &Configuration, month: ReportMonth) -> Result<Self, CliError> {
        match cli.output {
            OutputKind::Csv => Ok(Self::Csv(
                cli.csv.clone().unwrap_or_else(|| PathBuf::from(format!("output-{month}.csv"))),
            )),
            OutputKind::Gsheet => {
                let gsheet = config.gsheet.clone().ok_or(ConfigError::MissingSection("gsheet"));
                let gsheet = gsheet.map_err(CliError::from_config)?;
                let oauth = config.oauth.clone().ok_or(ConfigError::MissingSection("oauth"));
                let oauth = oauth.map_err(CliError::from_config)?;
                oauth.port().map_err(CliError::from_config)?;
                Ok(Self::Sheet { gsheet, oauth })
            }
        }
    }

    /// Authorizes against Google for sheet output; may open a browser.
    fn connect(self) -> Result<Publish, CliError> {
        match self {
            Self::Csv(path) => Ok(Publish::Csv(path)),
            Self::Sheet { gsheet, oauth } => {
                let token = costpull_sheets::authorize(&oauth).map_err(CliError::auth)?;
                Ok(Publish::Sheet { client: GoogleSheetsClient::new(&gsheet.spreadsheet_id, &token), gsheet })
            }
        }
    }
}

enum Publish {
    Csv(PathBuf),
    Sheet { client: GoogleSheetsClient, gsheet: GsheetConfig },
}

/// Owns the source clients for the lifetime of a run.
struct SourceSet {
    cloudability: Option<CloudabilityClient>,
    ibmcloud: Option<IbmCloudClient>,
    aws: Option<CostExplorerClient>,
    aws_credentials: Option<AwsCredentials>,
}

impl SourceSet {
    /// Without Cloudability, AWS is queried directly and IBM Cloud is
    /// ignored. With it, AWS is only built for the cross-check.
    fn build(config: &Configuration, today: NaiveDate) -> Result<Self, CliError> {
        let cloudability = config
            .cloudability
            .as_ref()
            .map(|c| Ok::<_, CliError>(CloudabilityClient::new(c, c.auth().map_err(CliError::from_config)?, today)))
            .transpose()?;

        let ibmcloud = match (&cloudability, &config.ibmcloud) {
            (Some(_), Some(ibm)) => Some(IbmCloudClient::new(ibm, BucketTable::seeded())),
            (None, Some(_)) => {
                tracing::warn!("ibmcloud is only pulled alongside cloudability; ignoring it");
                None
            }
            _ => None,
        };

        let aws_needed = match &cloudability {
            Some(_) => config.aws.as_ref().is_some_and(|a| a.cross_check),
            None => true,
        };
        let (aws, aws_credentials) = if aws_needed {
            let aws_config = config.aws.clone().unwrap_or_default();
            if config.aws.is_none() {
                tracing::info!("no aws section; using profile {:?}", aws_config.profile());
            }
            let credentials = AwsCredentials::resolve(&aws_config)?;
            (Some(CostExplorerClient::new(credentials.clone(), aws_config.region())), Some(credentials))
        } else {
            (None, None)
        };

        Ok(Self { cloudability, ibmcloud, aws, aws_credentials })
    }

    /// The account list from the category tags in AWS Organizations.
    fn tagged_directory(&self) -> Result<AccountDirectory, CliError> {
        let credentials = self
            .aws_credentials
            .clone()
            .ok_or_else(|| CliError::config("--taggedaccounts needs AWS credentials"))?;
        let records = OrganizationsClient::new(credentials).tagged_accounts().map_err(CliError::fetch)?;
        if records.is_empty() {
            tracing::warn!("no account carries the {} tag", fetch::organizations::CATEGORY_TAG);
        }
        AccountDirectory::load(&records).map_err(CliError::recon)
    }

    fn as_sources(&self) -> Sources<'_> {
        Sources {
            primary: self.cloudability.as_ref().map(|c| c as &dyn BulkSource),
            augment: self.ibmcloud.as_ref().map(|c| c as &dyn BulkSource),
            scoped: self.aws.as_ref().map(|c| c as &dyn ScopedSource),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self { code: EXIT_DATA_INTEGRITY, message: msg.into(), hint: None }
    }

    pub fn from_config(err: ConfigError) -> Self {
        match err {
            ConfigError::Account(e) => Self::recon(e),
            ConfigError::MissingSection(section) => {
                Self::config(err.to_string()).with_hint(format!("--output gsheet needs the {section:?} section"))
            }
            other => Self::config(other.to_string()),
        }
    }

    pub fn fetch(err: FetchError) -> Self {
        let code = exit_codes::fetch_exit_code(&err);
        let hint = match &err {
            FetchError::Auth { source_name, .. } => Some(format!("check the {source_name} credentials in the accounts file")),
            FetchError::Paginated { .. } => Some("narrow the source filters so the report fits in one page".to_string()),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    pub fn recon(err: ReconError) -> Self {
        Self { code: exit_codes::recon_exit_code(&err), message: err.to_string(), hint: None }
    }

    pub fn sheets(err: SheetsError) -> Self {
        let code = exit_codes::sheets_exit_code(&err);
        let hint = match &err {
            SheetsError::Unauthorized { .. } => Some("delete the cached token to authorize again".to_string()),
            SheetsError::AnchorNotFound { name, .. } => Some(format!("add a cell containing {name:?} to the main sheet")),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    pub fn auth(err: AuthError) -> Self {
        match err {
            AuthError::Config(e) => Self::from_config(e),
            other => Self::sheets(SheetsError::Auth(other)),
        }
    }

    pub fn output(err: OutputError) -> Self {
        Self { code: EXIT_OUTPUT_IO, message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_defaults_to_previous() {
        let month = resolve_month(None, day(2024, 1, 15)).unwrap();
        assert_eq!(month.to_string(), "2023-12");
    }

    #[test]
    fn future_month_is_config_error() {
        let err = resolve_month(Some("2024-03"), day(2024, 2, 10)).unwrap_err();
        assert_eq!(err.code, EXIT_CONFIG);
    }

    #[test]
    fn current_month_is_allowed() {
        assert!(resolve_month(Some("2024-02"), day(2024, 2, 10)).is_ok());
    }

    #[test]
    fn missing_section_carries_hint() {
        let err = CliError::from_config(ConfigError::MissingSection("gsheet"));
        assert_eq!(err.code, EXIT_CONFIG);
        assert!(err.hint.unwrap().contains("--output gsheet"));
    }

    #[test]
    fn auth_config_errors_stay_config_errors() {
        let err = CliError::auth(AuthError::Config(ConfigError::MissingSection("oauth")));
        assert_eq!(err.code, EXIT_CONFIG);
        let err = CliError::auth(AuthError::MissingCode);
        assert_eq!(err.code, exit_codes::EXIT_SHEETS_AUTH);
    }

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::try_parse_from(["costpull"]).unwrap();
        assert_eq!(cli.output, OutputKind::Gsheet);
        assert_eq!(cli.costtype, "UnblendedCost");
        assert_eq!(cli.accounts, PathBuf::from("accounts.yaml"));
    }

    #[test]
    fn cli_rejects_unknown_cost_type() {
        assert!(Cli::try_parse_from(["costpull", "--costtype", "Cheapest"]).is_err());
    }

    #[test]
    fn tag_flags_parse() {
        let cli = Cli::try_parse_from(["costpull", "--awswritetags", "--dry-run"]).unwrap();
        assert!(cli.awswritetags && cli.dry_run && !cli.taggedaccounts);

        assert!(Cli::try_parse_from(["costpull", "--dry-run"]).is_err());
        assert!(Cli::try_parse_from(["costpull", "--taggedaccounts", "--awswritetags"]).is_err());
    }

    #[test]
    fn sheet_target_needs_both_sections_without_connecting() {
        let cli = Cli::try_parse_from(["costpull"]).unwrap();
        let month = ReportMonth::parse("2024-08").unwrap();
        let config: Configuration =
            serde_yaml::from_str("gsheet:\n  spreadsheetId: s\n  sheetNameTemplate: t\n  mainSheetName: m\n").unwrap();
        let err = PublishTarget::resolve(&cli, &config, month).err().unwrap();
        assert_eq!(err.code, EXIT_CONFIG);
        assert!(err.message.contains("oauth"));

        let config: Configuration = serde_yaml::from_str(
            "gsheet:\n  spreadsheetId: s\n  sheetNameTemplate: t\n  mainSheetName: m\noauth:\n  port: nope\n",
        )
        .unwrap();
        assert!(PublishTarget::resolve(&cli, &config, month).is_err());

        let cli = Cli::try_parse_from(["costpull", "--output", "csv"]).unwrap();
        assert!(matches!(
            PublishTarget::resolve(&cli, &config, month),
            Ok(PublishTarget::Csv(path)) if path == PathBuf::from("output-2024-08.csv")
        ));
    }
}
