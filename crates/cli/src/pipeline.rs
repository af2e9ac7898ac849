//! One reconciliation run: pull every configured source into the grid,
//! check it, and materialize the sheet table.
//!
//! Two shapes, chosen by configuration:
//! - **Aggregated**: the primary bulk source (Cloudability) fills the grid
//!   with duplicates rejected, the augmenting source (IBM Cloud) adds its
//!   resource-level totals, and Cost Explorer optionally cross-checks every
//!   matched Amazon account.
//! - **Direct**: no bulk source; Cost Explorer is queried once per declared
//!   Amazon account. The augmenting source is not consulted.

use costpull_recon::model::AMAZON;
use costpull_recon::{
    check, materialize, report_missing, AccountDirectory, BulkSource, ConsistencyReport, CostGrid, IngestOptions,
    IngestPolicy, MissingAccount, ReportMonth, ScopedPull, ScopedSource, SheetTable,
};

use crate::CliError;

/// The sources configured for this run.
#[derive(Default)]
pub struct Sources<'a> {
    pub primary: Option<&'a dyn BulkSource>,
    pub augment: Option<&'a dyn BulkSource>,
    pub scoped: Option<&'a dyn ScopedSource>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub month: ReportMonth,
    pub cost_type: String,
    /// The operator's cost center, for the untracked-account warnings.
    pub cost_center: Option<String>,
    /// Cross-check aggregated Amazon totals against Cost Explorer.
    pub cross_check: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub grid: CostGrid,
    pub table: SheetTable,
    pub report: ConsistencyReport,
    pub missing: Vec<MissingAccount>,
}

pub fn run(directory: &mut AccountDirectory, sources: &Sources<'_>, settings: &RunSettings) -> Result<RunOutcome, CliError> {
    let mut grid = CostGrid::new();
    let mut report = ConsistencyReport::new();

    let missing = match sources.primary {
        Some(primary) => run_aggregated(primary, directory, sources, settings, &mut grid, &mut report)?,
        None => {
            let scoped = sources.scoped.ok_or_else(|| {
                CliError::config("no cost source configured")
                    .with_hint("add a 'cloudability' or 'aws' section to the configuration")
            })?;
            run_direct(scoped, directory, settings, &mut grid)?
        }
    };

    for entry in directory.entries().filter(|e| e.expected_value.is_some()) {
        if let Some(expected) = entry.expected_value {
            let total = grid.total(&entry.canonical_id);
            report.record(
                &entry.canonical_id,
                check::check_deviation(total, expected, entry.deviation_percent),
            );
        }
    }

    let table = materialize(&grid, directory);
    if table.data_row_count() == 0 {
        return Err(CliError::data("no cost data matched any declared account")
            .with_hint("check the account IDs and the source filters"));
    }
    tracing::info!(
        rows = table.data_row_count(),
        columns = table.width(),
        findings = report.len(),
        missing = missing.len(),
        "reconciliation complete"
    );

    Ok(RunOutcome { grid, table, report, missing })
}

fn run_aggregated(
    primary: &dyn BulkSource,
    directory: &mut AccountDirectory,
    sources: &Sources<'_>,
    settings: &RunSettings,
    grid: &mut CostGrid,
    report: &mut ConsistencyReport,
) -> Result<Vec<MissingAccount>, CliError> {
    let pull = primary
        .fetch(&settings.month, &settings.cost_type)
        .and_then(|p| p.ensure_complete(primary.name()))
        .map_err(CliError::fetch)?;
    if pull.records.is_empty() {
        return Err(CliError::data(format!("{} returned no cost data for {}", primary.name(), settings.month)));
    }

    let cost_center = settings.cost_center.as_deref();
    grid.ingest(
        &pull.records,
        directory,
        IngestOptions { source_name: primary.name(), policy: IngestPolicy::RejectDuplicates, cost_center },
    )
    .map_err(CliError::recon)?;

    augment(sources.augment, directory, settings, grid)?;

    let missing = report_missing(directory, &pull.filters);

    if settings.cross_check {
        if let Some(scoped) = sources.scoped {
            let accounts: Vec<String> = directory
                .entries_for(AMAZON)
                .into_iter()
                .filter(|e| e.matched)
                .map(|e| e.canonical_id.clone())
                .collect();
            tracing::info!(accounts = accounts.len(), source = scoped.name(), "cross-checking Amazon totals");
            for account in accounts {
                let scoped_pull = fetch_verified(scoped, &account, settings)?;
                report.record(&account, check::cross_check(grid.total(&account), scoped_pull.total));
            }
        }
    }

    Ok(missing)
}

fn run_direct(
    scoped: &dyn ScopedSource,
    directory: &mut AccountDirectory,
    settings: &RunSettings,
    grid: &mut CostGrid,
) -> Result<Vec<MissingAccount>, CliError> {
    let accounts: Vec<String> = directory.entries_for(AMAZON).into_iter().map(|e| e.canonical_id.clone()).collect();
    tracing::info!(accounts = accounts.len(), source = scoped.name(), "pulling Amazon accounts directly");

    for account in accounts {
        let pull = fetch_verified(scoped, &account, settings)?;
        grid.ingest(
            &pull.records,
            directory,
            IngestOptions {
                source_name: scoped.name(),
                policy: IngestPolicy::RejectDuplicates,
                cost_center: settings.cost_center.as_deref(),
            },
        )
        .map_err(CliError::recon)?;
    }

    Ok(report_missing(directory, &[]))
}

fn augment(
    source: Option<&dyn BulkSource>,
    directory: &mut AccountDirectory,
    settings: &RunSettings,
    grid: &mut CostGrid,
) -> Result<(), CliError> {
    let Some(source) = source else {
        return Ok(());
    };
    let pull = source
        .fetch(&settings.month, &settings.cost_type)
        .and_then(|p| p.ensure_complete(source.name()))
        .map_err(CliError::fetch)?;
    if pull.records.is_empty() {
        return Err(CliError::data(format!("{} returned no cost data for {}", source.name(), settings.month)));
    }
    grid.ingest(
        &pull.records,
        directory,
        IngestOptions {
            source_name: source.name(),
            policy: IngestPolicy::Accumulate,
            cost_center: settings.cost_center.as_deref(),
        },
    )
    .map_err(CliError::recon)?;
    Ok(())
}

fn fetch_verified(scoped: &dyn ScopedSource, account: &str, settings: &RunSettings) -> Result<ScopedPull, CliError> {
    let pull = scoped
        .fetch_scoped(account, &settings.month, &settings.cost_type)
        .map_err(CliError::fetch)?;
    pull.verify(scoped.name()).map_err(CliError::recon)?;
    Ok(pull)
}
