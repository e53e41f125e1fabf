use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use super::config::ProjectContext;
use super::output::{OutputManager, RunReport};
use super::scaffold::{generate_unit_file, write_unit_file};
use crate::engine::{Changelog, Direction, Migrator, Resolution, RunSummary, Target};
use crate::guard::Guard;
use crate::store::{self, DocumentStore};
use crate::unit::UnitSet;

/// Where the store and config come from. Flags and env win over docshift.toml.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub config: Option<PathBuf>,
    pub store_url: Option<String>,
    pub database: Option<String>,
}

impl Connection {
    pub fn context(&self) -> Result<ProjectContext> {
        match &self.config {
            Some(path) => ProjectContext::load(path),
            None => ProjectContext::find(),
        }
    }

    pub async fn open(&self, ctx: &ProjectContext) -> Result<Arc<dyn DocumentStore>> {
        let url = match &self.store_url {
            Some(url) => url.clone(),
            None => ctx
                .store_url()
                .context("No store URL: pass --store-url or set DOCSHIFT_STORE_URL")?,
        };
        let database = match &self.database {
            Some(database) => database.clone(),
            None => ctx.database()?,
        };
        store::connect(&url, &database)
            .await
            .with_context(|| format!("Failed to connect to store '{database}'"))
    }
}

fn migrator(units: UnitSet, ctx: &ProjectContext, dry_run: bool) -> Migrator {
    Migrator::new(units)
        .with_changelog(Changelog::new(ctx.config.migrations.changelog_collection.clone()))
        .with_guard(Guard::new(ctx.config.guard.test_marker.clone()))
        .with_dry_run(dry_run)
}

pub fn up_target(count: Option<usize>, to: Option<String>) -> Target {
    match (count, to) {
        (_, Some(id)) => Target::To(id),
        (Some(n), None) => Target::Count(n),
        (None, None) => Target::All,
    }
}

pub fn down_target(count: Option<usize>, to: Option<String>, all: bool) -> Target {
    match (count, to, all) {
        (_, _, true) => Target::All,
        (_, Some(id), false) => Target::To(id),
        (Some(n), None, false) => Target::Count(n),
        (None, None, false) => Target::Count(1),
    }
}

pub async fn handle_run(
    units: UnitSet,
    connection: &Connection,
    direction: Direction,
    target: Target,
    dry_run: bool,
    output: &OutputManager,
) -> Result<()> {
    let ctx = connection.context()?;
    let store = connection.open(&ctx).await?;
    output.verbose(&format!("store: {}", store.name()));
    output.verbose(&format!("changelog: {}", ctx.config.migrations.changelog_collection));

    let migrator = migrator(units, &ctx, dry_run);
    let heading = match (direction, dry_run) {
        (Direction::Up, false) => "Apply Units",
        (Direction::Up, true) => "Apply Units (dry run)",
        (Direction::Down, false) => "Revert Units",
        (Direction::Down, true) => "Revert Units (dry run)",
    };
    output.heading(heading);

    output.progress("Planning");
    let summary = migrator.run(store.as_ref(), direction, &target).await;
    output.clear_line();
    let summary = summary?;

    report_run(&summary, output)
}

fn report_run(summary: &RunSummary, output: &OutputManager) -> Result<()> {
    if summary.processed.is_empty() && summary.failed.is_none() {
        output.success(match summary.direction {
            Direction::Up => "Nothing to apply: store is up to date",
            Direction::Down => "Nothing to revert",
        });
        return Ok(());
    }

    let report = RunReport::from(summary);
    output.display(&report)?;

    for warning in &summary.warnings {
        output.warning(&warning.to_string());
    }

    if let (Some(unit_id), Some(err)) = (&summary.failed, &summary.error) {
        output.error(&err.to_string());
        if !summary.processed.is_empty() {
            output.info(&format!(
                "{} unit(s) completed before the failure and stay recorded",
                summary.processed.len()
            ));
        }
        bail!("unit {unit_id} failed");
    }

    let verb = match (summary.direction, summary.dry_run) {
        (_, true) => "would run",
        (Direction::Up, false) => "applied",
        (Direction::Down, false) => "reverted",
    };
    output.success(&format!(
        "{} unit(s) {verb} ({} document(s) affected, {}ms)",
        summary.processed.len(),
        summary.stats.documents_affected,
        summary.stats.total_time_ms
    ));
    Ok(())
}

pub async fn handle_status(
    units: UnitSet,
    connection: &Connection,
    output: &OutputManager,
) -> Result<()> {
    let ctx = connection.context()?;
    let store = connection.open(&ctx).await?;
    output.verbose(&format!("store: {}", store.name()));

    let report = migrator(units, &ctx, false).status(store.as_ref()).await?;
    output.heading("Unit Status");
    output.display(&report)?;

    for record in &report.unknown {
        output.warning(&format!("{} is applied but no longer registered", record.unit_id));
    }
    if let Some(inconsistency) = &report.inconsistency {
        output.warning(inconsistency);
        output.info("Use 'resolve' to repair the changelog before running 'up' or 'down'");
    }
    Ok(())
}

pub async fn handle_resolve(
    units: UnitSet,
    connection: &Connection,
    unit_id: &str,
    resolution: Resolution,
    output: &OutputManager,
) -> Result<()> {
    let ctx = connection.context()?;
    let store = connection.open(&ctx).await?;

    output.heading("Resolve Unit");
    output.key_value("Unit", unit_id);

    let existed = migrator(units, &ctx, false)
        .resolve(store.as_ref(), unit_id, resolution)
        .await?;

    match resolution {
        Resolution::Applied => output.success(&format!("Marked {unit_id} as applied")),
        Resolution::RolledBack if existed => {
            output.success(&format!("Marked {unit_id} as rolled back"))
        }
        Resolution::RolledBack => {
            output.warning(&format!("{unit_id} has no changelog record; nothing to roll back"))
        }
    }
    Ok(())
}

pub fn handle_create(connection: &Connection, name: &str, output: &OutputManager) -> Result<()> {
    let ctx = connection.context()?;

    output.heading("Create Unit");
    let file = generate_unit_file(name, Utc::now())?;
    let path = write_unit_file(&ctx.units_dir, &file)?;

    output.success(&format!("Created {}", path.display()));
    output.key_value("Unit id", &file.unit_id);
    output.bullet(&format!(
        "Declared as {} in {}",
        file.module_name,
        ctx.units_dir.join("mod.rs").display()
    ));
    output.info("Fill in the steps, then run 'up' to apply it");
    Ok(())
}
