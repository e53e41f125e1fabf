//! Command-line front end shared by every migrations binary.
//!
//! A binary registers its units and hands them to [`run`]:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() {
//!     docshift::cli::run(docshift::unit::UnitSet::from_inventory().unwrap()).await;
//! }
//! ```

pub mod commands;
pub mod config;
pub mod examples;
pub mod output;
pub mod scaffold;
pub mod theme;

use anyhow::Result;
use clap::{
    Args, ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Color as ClapColor, RgbColor, Style},
    },
    error::ErrorKind,
};
use colored::{Color as ThemeColor, Colorize, control::ShouldColorize};
use std::fmt::Write;
use std::io::{self, Write as IoWrite};
use std::path::PathBuf;

use crate::engine::{Direction, Resolution};
use crate::unit::UnitSet;
use commands::{
    Connection, down_target, handle_create, handle_resolve, handle_run, handle_status, up_target,
};
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("DOCSHIFT_STORE_URL", "Store connection URL (redis://, rediss:// or memory://)"),
    ("DOCSHIFT_DATABASE", "Logical database name; the guard checks it for the test marker"),
    ("RUST_LOG", "Log filter for engine logging (e.g. info, docshift=debug)"),
];

#[derive(Parser)]
#[command(name = "docshift")]
#[command(version)]
#[command(
    about = "Ordered, reversible migrations for document stores",
    long_about = r#"Applies and reverts migration units against a document store:

• Units run in id order, one at a time
• Every applied unit is recorded in a changelog collection
• Destructive units only run against test stores

Commands:
  up        Apply pending units
  down      Revert applied units
  status    Show applied, pending and reverted units
  resolve   Mark a unit applied or rolled back without running it
  create    Scaffold a new unit file
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Path to docshift.toml (searched for in parent directories by default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store connection URL
    #[arg(long, global = true, env = "DOCSHIFT_STORE_URL")]
    store_url: Option<String>,

    /// Logical database name
    #[arg(long, global = true, env = "DOCSHIFT_DATABASE")]
    database: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending units in id order
    Up(UpArgs),

    /// Revert applied units, most recent first
    Down(DownArgs),

    /// Show the state of every known unit
    Status,

    /// Mark a unit as applied or rolled back without running it
    Resolve(ResolveArgs),

    /// Create a new unit file
    Create {
        /// Name for the unit (e.g., add_deal_expiry)
        name: String,
    },
}

#[derive(Args)]
struct UpArgs {
    /// Apply at most this many pending units
    #[arg(conflicts_with = "to")]
    count: Option<usize>,

    /// Apply pending units through this id, inclusive
    #[arg(long)]
    to: Option<String>,

    /// Show what would run without making changes
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DownArgs {
    /// Revert this many applied units (default 1)
    #[arg(conflicts_with_all = ["to", "all"])]
    count: Option<usize>,

    /// Revert every unit applied after this id
    #[arg(long, conflicts_with = "all")]
    to: Option<String>,

    /// Revert every applied unit
    #[arg(long)]
    all: bool,

    /// Show what would run without making changes
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ResolveArgs {
    /// Unit id to resolve
    unit_id: String,

    /// Mark the unit as applied
    #[arg(long, conflicts_with = "rolled_back", required_unless_present = "rolled_back")]
    applied: bool,

    /// Mark the unit as rolled back
    #[arg(long, conflicts_with = "applied")]
    rolled_back: bool,
}

impl Cli {
    fn parse_with_styles() -> Self {
        let command = build_cli_command();
        let matches = match command.styles(help_styles()).try_get_matches() {
            Ok(matches) => matches,
            Err(err) => exit_with_clap_error(err),
        };
        match Cli::from_arg_matches(&matches) {
            Ok(cli) => cli,
            Err(err) => exit_with_clap_error(err),
        }
    }
}

fn exit_with_clap_error(err: clap::error::Error) -> ! {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = print_blank_line_stdout();
            if let Err(print_err) = err.print()
                && print_err.kind() != io::ErrorKind::BrokenPipe
            {
                eprintln!("Failed to display help: {print_err}");
            }
            let _ = print_blank_line_stdout();
            std::process::exit(0);
        }
        ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            handle_missing_subcommand(err);
        }
        _ => {
            let exit_code = err.exit_code();
            let _ = print_blank_line_stderr();
            if let Err(print_err) = err.print()
                && print_err.kind() != io::ErrorKind::BrokenPipe
            {
                eprintln!("Failed to display error: {print_err}");
            }
            let _ = print_blank_line_stderr();
            std::process::exit(exit_code);
        }
    }
}

fn handle_missing_subcommand(error: clap::error::Error) -> ! {
    let mut command = build_cli_command();
    let command_name = command
        .get_display_name()
        .unwrap_or_else(|| command.get_name())
        .to_string();

    let _ = print_blank_line_stderr();
    eprintln!("error: '{command_name}' requires a subcommand but one was not provided");
    let _ = print_blank_line_stderr();

    command = command.styles(help_styles());

    let mut stderr = io::stderr();
    if command.write_long_help(&mut stderr).is_ok() {
        let _ = IoWrite::write_all(&mut stderr, b"\n");
        let _ = IoWrite::flush(&mut stderr);
    }

    let _ = print_blank_line_stderr();
    std::process::exit(error.exit_code());
}

fn build_cli_command() -> Command {
    let use_color = detect_color_support();
    let appendix = render_top_level_appendix(use_color);
    let mut command = Cli::command().after_long_help(appendix);
    command = command.color(if use_color { ColorChoice::Auto } else { ColorChoice::Never });
    attach_command_examples(&mut command, use_color);
    command
}

fn attach_command_examples(command: &mut Command, use_color: bool) {
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            let help_text = render_examples(example.groups, use_color);
            *subcommand = subcommand.clone().after_long_help(help_text);
        }
    }
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let theme = &THEME;
    let mut buffer = String::new();

    let heading = stylize("Examples:", theme.section, true, use_color);
    let _ = writeln!(buffer, "{heading}");

    for (index, group) in groups.iter().enumerate() {
        let title = stylize(group.title, theme.heading, true, use_color);
        let _ = writeln!(buffer, "  {title}");

        for command in group.commands {
            let arrow = stylize(ICONS.step, theme.command, false, use_color);
            let command_text = stylize(command, theme.command, false, use_color);
            let _ = writeln!(buffer, "    {arrow} {command_text}");
        }

        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }

    if !buffer.ends_with('\n') {
        buffer.push('\n');
    }

    buffer
}

fn render_top_level_appendix(use_color: bool) -> String {
    let theme = &THEME;
    let mut buffer = String::new();

    let env_heading = stylize("Environment Variables:", theme.section, true, use_color);
    let _ = writeln!(buffer, "{env_heading}");
    for (key, description) in ENVIRONMENT_VARIABLES {
        let key_text = stylize(key, theme.key, true, use_color);
        let value_text = stylize(description, theme.value, false, use_color);
        let _ = writeln!(buffer, "  {key_text}  {value_text}");
    }

    buffer.push('\n');

    let tip_heading = stylize("Tip:", theme.section, true, use_color);
    let tip_text = stylize(
        "Use '<command> --help' to view examples for each command.",
        theme.command,
        false,
        use_color,
    );
    let _ = writeln!(buffer, "{tip_heading} {tip_text}");

    buffer
}

fn print_blank_line_stdout() -> io::Result<()> {
    let mut stdout = io::stdout();
    IoWrite::write_all(&mut stdout, b"\n")?;
    IoWrite::flush(&mut stdout)
}

fn print_blank_line_stderr() -> io::Result<()> {
    let mut stderr = io::stderr();
    IoWrite::write_all(&mut stderr, b"\n")?;
    IoWrite::flush(&mut stderr)
}

fn stylize(text: &str, color: ThemeColor, bold: bool, use_color: bool) -> String {
    if use_color {
        let styled = text.color(color);
        if bold { styled.bold().to_string() } else { styled.to_string() }
    } else {
        text.to_string()
    }
}

fn detect_color_support() -> bool {
    ShouldColorize::from_env().should_colorize()
}

fn help_styles() -> Styles {
    let theme = &THEME;
    Styles::styled()
        .usage(style_from_color(theme.heading).bold())
        .header(style_from_color(theme.section).bold())
        .literal(style_from_color(theme.command))
        .placeholder(style_from_color(theme.muted))
        .valid(style_from_color(theme.applied))
        .invalid(style_from_color(theme.caution))
        .error(style_from_color(theme.failed).bold())
}

fn style_from_color(color: ThemeColor) -> Style {
    Style::new().fg_color(Some(color_to_clap_color(color)))
}

fn color_to_clap_color(color: ThemeColor) -> ClapColor {
    match color {
        ThemeColor::Black => ClapColor::Ansi(AnsiColor::Black),
        ThemeColor::Red => ClapColor::Ansi(AnsiColor::Red),
        ThemeColor::Green => ClapColor::Ansi(AnsiColor::Green),
        ThemeColor::Yellow => ClapColor::Ansi(AnsiColor::Yellow),
        ThemeColor::Blue => ClapColor::Ansi(AnsiColor::Blue),
        ThemeColor::Magenta => ClapColor::Ansi(AnsiColor::Magenta),
        ThemeColor::Cyan => ClapColor::Ansi(AnsiColor::Cyan),
        ThemeColor::White => ClapColor::Ansi(AnsiColor::White),
        ThemeColor::BrightBlack => ClapColor::Ansi(AnsiColor::BrightBlack),
        ThemeColor::BrightRed => ClapColor::Ansi(AnsiColor::BrightRed),
        ThemeColor::BrightGreen => ClapColor::Ansi(AnsiColor::BrightGreen),
        ThemeColor::BrightYellow => ClapColor::Ansi(AnsiColor::BrightYellow),
        ThemeColor::BrightBlue => ClapColor::Ansi(AnsiColor::BrightBlue),
        ThemeColor::BrightMagenta => ClapColor::Ansi(AnsiColor::BrightMagenta),
        ThemeColor::BrightCyan => ClapColor::Ansi(AnsiColor::BrightCyan),
        ThemeColor::BrightWhite => ClapColor::Ansi(AnsiColor::BrightWhite),
        ThemeColor::TrueColor { r, g, b } => ClapColor::Rgb(RgbColor(r, g, b)),
    }
}

/// Parse arguments, run the command against `units`, and exit 1 on failure.
pub async fn run(units: UnitSet) {
    let cli = Cli::parse_with_styles();
    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose);

    let _ = print_blank_line_stdout();

    match execute(cli, units).await {
        Ok(()) => {
            let _ = print_blank_line_stdout();
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            let _ = print_blank_line_stdout();
            std::process::exit(1);
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the default level to debug.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .try_init();
}

async fn execute(cli: Cli, units: UnitSet) -> Result<()> {
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    });
    let connection = Connection {
        config: cli.config,
        store_url: cli.store_url,
        database: cli.database,
    };
    output.verbose(&format!("{} unit(s) registered", units.len()));

    match cli.command {
        Commands::Up(args) => {
            let target = up_target(args.count, args.to);
            handle_run(
                units,
                &connection,
                Direction::Up,
                target,
                args.dry_run,
                &output,
            )
            .await
        }
        Commands::Down(args) => {
            let target = down_target(args.count, args.to, args.all);
            handle_run(
                units,
                &connection,
                Direction::Down,
                target,
                args.dry_run,
                &output,
            )
            .await
        }
        Commands::Status => handle_status(units, &connection, &output).await,
        Commands::Resolve(args) => {
            let resolution = if args.rolled_back {
                Resolution::RolledBack
            } else {
                Resolution::Applied
            };
            handle_resolve(units, &connection, &args.unit_id, resolution, &output).await
        }
        Commands::Create { name } => handle_create(&connection, &name, &output),
    }
}
