use anyhow::Result;
use clap::ValueEnum;
use colored::{Color, Colorize};
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use super::theme::{ICONS, THEME};
use crate::engine::{Direction, RunStats, RunSummary, StatusReport, UnitState};
use crate::unit::DataLossWarning;

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Trait for data that can be displayed as a table
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

/// Output manager handles formatting and display
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    fn is_json(&self) -> bool {
        matches!(self.options.output_format, OutputFormat::Json)
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                let table = data.to_table(&self.options);
                println!("{table}");
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    /// Display a success message with color and icon
    pub fn success(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.applied)
            } else {
                format!(
                    "{} {}",
                    ICONS.applied.color(THEME.applied),
                    message.color(THEME.applied)
                )
            };
            println!("{output}");
        }
    }

    /// Display an error message with color and icon
    pub fn error(&self, message: &str) {
        let output = if self.options.no_color {
            format!("{} {message}", ICONS.failed)
        } else {
            format!(
                "{} {}",
                ICONS.failed.color(THEME.failed),
                message.color(THEME.failed)
            )
        };
        eprintln!("{output}");
    }

    /// Display a warning message
    pub fn warning(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.caution)
            } else {
                format!(
                    "{} {}",
                    ICONS.caution.color(THEME.caution),
                    message.color(THEME.caution)
                )
            };
            println!("{output}");
        }
    }

    /// Display verbose information (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.step)
            } else {
                format!(
                    "{} {}",
                    ICONS.step.color(THEME.muted),
                    message.color(THEME.muted)
                )
            };
            eprintln!("{output}");
        }
    }

    /// Display info message with color and icon
    pub fn info(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("{} {message}", ICONS.notice)
            } else {
                format!(
                    "{} {}",
                    ICONS.notice.color(THEME.notice),
                    message.color(THEME.notice)
                )
            };
            println!("{output}");
        }
    }

    /// Display a heading
    pub fn heading(&self, text: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("\n{text}\n{}", "=".repeat(text.len()))
            } else {
                format!("\n{}", text.color(THEME.heading).bold())
            };
            println!("{output}");
        }
    }

    /// Display a key-value pair
    pub fn key_value(&self, key: &str, value: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("{key}: {value}")
            } else {
                format!(
                    "{}: {}",
                    key.color(THEME.key).bold(),
                    value.color(THEME.value)
                )
            };
            println!("{output}");
        }
    }

    /// Display a bullet list item
    pub fn bullet(&self, text: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("  {} {text}", ICONS.bullet)
            } else {
                format!("  {} {text}", ICONS.bullet.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Display progress indicator
    pub fn progress(&self, message: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }

        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.running)
        } else {
            format!(
                "{} {}...",
                ICONS.running.color(THEME.running).bold(),
                message.color(THEME.running)
            )
        };

        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    /// Clear the current line (useful after progress indicators)
    pub fn clear_line(&self) {
        if self.options.quiet || self.is_json() {
            return;
        }

        print!("\r{}", " ".repeat(80));
        print!("\r");
        std::io::stdout().flush().ok();
    }
}

fn themed_table(options: &GlobalOptions, headers: &[&str]) -> Table {
    let mut table = Table::new();
    if options.no_color {
        table.load_preset(comfy_table::presets::ASCII_FULL);
    } else {
        table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
    }

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if options.no_color { cell } else { cell.fg(table_color(THEME.section)) }
        })
        .collect();
    table.set_header(header_cells);
    table
}

fn state_cell(state: UnitState, options: &GlobalOptions) -> Cell {
    let label = match state {
        UnitState::Applied => "applied",
        UnitState::Pending => "pending",
        UnitState::Reverted => "reverted",
    };
    let cell = Cell::new(format!("{} {label}", ICONS.state(state)));
    if options.no_color { cell } else { cell.fg(table_color(THEME.state(state))) }
}

fn table_color(color: Color) -> TableColor {
    match color {
        Color::Black => TableColor::Black,
        Color::Red => TableColor::DarkRed,
        Color::Green => TableColor::DarkGreen,
        Color::Yellow => TableColor::DarkYellow,
        Color::Blue => TableColor::DarkBlue,
        Color::Magenta => TableColor::DarkMagenta,
        Color::Cyan => TableColor::DarkCyan,
        Color::White => TableColor::Grey,
        Color::BrightBlack => TableColor::DarkGrey,
        Color::BrightRed => TableColor::Red,
        Color::BrightGreen => TableColor::Green,
        Color::BrightYellow => TableColor::Yellow,
        Color::BrightBlue => TableColor::Blue,
        Color::BrightMagenta => TableColor::Magenta,
        Color::BrightCyan => TableColor::Cyan,
        Color::BrightWhite => TableColor::White,
        Color::TrueColor { r, g, b } => TableColor::Rgb { r, g, b },
    }
}

impl TableDisplay for StatusReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(
            options,
            &["Unit", "State", "Reverts", "Applied at", "Docs", "Time"],
        );

        for unit in &self.units {
            let reversibility = if unit.destructive {
                format!("{} (guarded)", unit.reversibility)
            } else {
                unit.reversibility.to_string()
            };
            let (applied_at, docs, time) = match &unit.record {
                Some(record) => (
                    format!(
                        "{}{}",
                        record.applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        if record.resolved { " (resolved)" } else { "" }
                    ),
                    record.documents_affected.to_string(),
                    format!("{}ms", record.execution_time_ms),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string()),
            };
            table.add_row(vec![
                Cell::new(&unit.id),
                state_cell(unit.state, options),
                Cell::new(reversibility),
                Cell::new(applied_at),
                Cell::new(docs),
                Cell::new(time),
            ]);
        }

        for record in &self.unknown {
            let cell = Cell::new(format!("{} unknown", ICONS.unknown));
            table.add_row(vec![
                Cell::new(&record.unit_id),
                if options.no_color { cell } else { cell.fg(table_color(THEME.unknown)) },
                Cell::new("-"),
                Cell::new(record.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                Cell::new(record.documents_affected.to_string()),
                Cell::new(format!("{}ms", record.execution_time_ms)),
            ]);
        }

        table
    }

    fn to_compact(&self) -> String {
        format!(
            "applied={} pending={} reverted={} unknown={}",
            self.count(UnitState::Applied),
            self.count(UnitState::Pending),
            self.count(UnitState::Reverted),
            self.unknown.len()
        )
    }
}

/// Serializable view of a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub direction: Direction,
    pub dry_run: bool,
    pub processed: Vec<String>,
    pub failed: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<DataLossWarning>,
    pub stats: RunStats,
}

impl From<&RunSummary> for RunReport {
    fn from(summary: &RunSummary) -> Self {
        Self {
            direction: summary.direction,
            dry_run: summary.dry_run,
            processed: summary.processed.clone(),
            failed: summary.failed.clone(),
            error: summary.error.as_ref().map(|err| err.to_string()),
            warnings: summary.warnings.clone(),
            stats: summary.stats.clone(),
        }
    }
}

impl TableDisplay for RunReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let icon = Cell::new(ICONS.direction(self.direction));
        let icon = if options.no_color {
            icon
        } else {
            icon.fg(table_color(THEME.direction(self.direction)))
        };
        let mut table = themed_table(options, &["", "Unit", "Result"]);

        for id in &self.processed {
            let result = if self.dry_run { "planned" } else { "ok" };
            table.add_row(vec![icon.clone(), Cell::new(id), Cell::new(result)]);
        }
        if let Some(failed) = &self.failed {
            let cell = Cell::new("failed");
            table.add_row(vec![
                Cell::new(ICONS.failed),
                Cell::new(failed),
                if options.no_color { cell } else { cell.fg(table_color(THEME.failed)) },
            ]);
        }
        for warning in &self.warnings {
            let cell = Cell::new(&warning.message);
            table.add_row(vec![
                Cell::new(ICONS.caution),
                Cell::new(&warning.unit_id),
                if options.no_color { cell } else { cell.fg(table_color(THEME.caution)) },
            ]);
        }

        table
    }

    fn to_compact(&self) -> String {
        let mut line = format!(
            "{} processed={} documents={} time={}ms",
            self.direction,
            self.processed.len(),
            self.stats.documents_affected,
            self.stats.total_time_ms
        );
        if let Some(failed) = &self.failed {
            line.push_str(&format!(" failed={failed}"));
        }
        if !self.warnings.is_empty() {
            line.push_str(&format!(" warnings={}", self.warnings.len()));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ApplicationRecord, UnitStatus};

    fn status() -> StatusReport {
        StatusReport {
            units: vec![
                UnitStatus {
                    id: "20230101000000_a".to_string(),
                    description: String::new(),
                    state: UnitState::Applied,
                    reversibility: "reversible",
                    destructive: false,
                    record: Some(ApplicationRecord::applied("20230101000000_a", "")),
                },
                UnitStatus {
                    id: "20230201000000_b".to_string(),
                    description: String::new(),
                    state: UnitState::Pending,
                    reversibility: "irreversible",
                    destructive: true,
                    record: None,
                },
            ],
            unknown: Vec::new(),
            inconsistency: None,
        }
    }

    #[test]
    fn status_compact_counts_states() {
        assert_eq!(
            status().to_compact(),
            "applied=1 pending=1 reverted=0 unknown=0"
        );
    }

    #[test]
    fn status_table_lists_every_unit() {
        let options = GlobalOptions {
            no_color: true,
            ..Default::default()
        };
        let rendered = status().to_table(&options).to_string();
        assert!(rendered.contains("20230101000000_a"));
        assert!(rendered.contains("irreversible (guarded)"));
        assert!(rendered.contains("✓ applied"));
        assert!(rendered.contains("○ pending"));
    }

    #[test]
    fn state_colors_map_onto_table_colors() {
        assert_eq!(
            table_color(THEME.state(UnitState::Applied)),
            TableColor::DarkGreen
        );
        assert_eq!(
            table_color(THEME.state(UnitState::Reverted)),
            TableColor::DarkGrey
        );
    }

    #[test]
    fn run_report_compact_names_failure() {
        let report = RunReport {
            direction: Direction::Up,
            dry_run: false,
            processed: vec!["20230101000000_a".to_string()],
            failed: Some("20230201000000_b".to_string()),
            error: Some("boom".to_string()),
            warnings: Vec::new(),
            stats: RunStats::default(),
        };
        assert_eq!(
            report.to_compact(),
            "up processed=1 documents=0 time=0ms failed=20230201000000_b"
        );
    }

    #[test]
    fn quiet_display_prints_nothing() {
        let manager = OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        });
        assert!(manager.display(&status()).is_ok());
    }
}
