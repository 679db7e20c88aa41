//! Purpose: `stocktake` CLI entry point.
//! Role: Binary crate root; parses args, opens the configured store, runs commands.
//! Invariants: stdout carries only command payloads (table, JSON, CSV).
//! Invariants: Notices and errors go to stderr; JSON when stderr is not a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All inventory mutations go through `api::Inventory`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod render;
mod serve;

use stocktake::api::{
    ENV_STORE, Error, ErrorKind, Failure, FailureKind, Inventory, ItemStore, NotificationLevel,
    QuantityPolicy, SortDirection, SortField, SortSpec, StoreConfig, StoreRef, Theme, ViewModel,
    default_store_path, to_exit_code,
};
use stocktake::notice::{Notice, notice_from_notification, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let default_directive = match cli.command {
        Command::Serve(_) => "info",
        _ => "warn",
    };
    serve::init_tracing(default_directive);

    let color_mode = cli.color;
    let context = CliContext {
        store: cli.store,
        color_mode,
        theme: cli.theme.into(),
        policy: if cli.strict {
            QuantityPolicy::Strict
        } else {
            QuantityPolicy::Permissive
        },
    };

    command_dispatch::dispatch_command(cli.command, &context)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "stocktake",
    version,
    about = "Track item quantities in a shared inventory",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Items are a name and a quantity. Names are case-sensitive keys.

Mental model:
  - `add` bumps a quantity (creating the item)
  - `remove` takes one away (deleting the item at zero)
  - `list` and `export` show the filtered, sorted inventory
"#,
    after_help = r#"EXAMPLES
  $ stocktake add "widget" 3
  $ stocktake remove widget
  $ stocktake list --search wid --sort quantity --desc
  $ stocktake export -o inventory.csv

LEARN MORE
  Stores (--store or STOCKTAKE_STORE):
    <path>                 local JSON file (default: ~/.stocktake/inventory.json)
    http://host:port       a `stocktake serve` instance
    firestore              Firestore REST (FIREBASE_PROJECT_ID, FIREBASE_API_KEY)
    memory                 scratch store for this process only

  $ stocktake <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = ENV_STORE,
        help = "Store ref: file path, http(s) url, `firestore`, or `memory`",
        value_hint = ValueHint::AnyPath
    )]
    store: Option<String>,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and tables: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        long,
        global = true,
        default_value = "dark",
        value_enum,
        help = "Table color theme: dark|light"
    )]
    theme: ThemeCli,
    #[arg(
        long,
        global = true,
        help = "Reject quantities that are not whole numbers greater than zero"
    )]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ThemeCli {
    Dark,
    Light,
}

impl From<ThemeCli> for Theme {
    fn from(value: ThemeCli) -> Self {
        match value {
            ThemeCli::Dark => Theme::Dark,
            ThemeCli::Light => Theme::Light,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SortFieldCli {
    Name,
    Quantity,
}

impl From<SortFieldCli> for SortField {
    fn from(value: SortFieldCli) -> Self {
        match value {
            SortFieldCli::Name => SortField::Name,
            SortFieldCli::Quantity => SortField::Quantity,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ViewArgs {
    #[arg(long, default_value = "", help = "Case-insensitive substring filter on names")]
    search: String,
    #[arg(long, value_enum, default_value = "name", help = "Sort field: name|quantity")]
    sort: SortFieldCli,
    #[arg(long, help = "Sort descending")]
    desc: bool,
}

impl ViewArgs {
    fn sort_spec(&self) -> SortSpec {
        let direction = if self.desc {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        SortSpec::new(self.sort.into(), direction)
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Show the inventory",
        after_help = r#"EXAMPLES
  $ stocktake list
  $ stocktake list --search bolt --sort quantity --desc
  $ stocktake list --page 2 --page-size 25 --json

NOTES
  - Output is a table on a terminal, JSON otherwise (force with --json)
  - Pages are 1-based; a page past the end is empty"#
    )]
    List {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value_t = 1, help = "Page number (1-based)")]
        page: usize,
        #[arg(long = "page-size", default_value_t = 10, help = "Rows per page")]
        page_size: usize,
        #[arg(long, help = "Emit JSON even on a terminal")]
        json: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Add to an item's quantity, creating it if missing",
        after_help = r#"EXAMPLES
  $ stocktake add widget          # +1
  $ stocktake add "hex bolt" 40

NOTES
  - Without --strict, a quantity that does not start with a number counts as 1"#
    )]
    Add {
        #[arg(help = "Item name (case-sensitive)")]
        name: String,
        #[arg(allow_hyphen_values = true, help = "Amount to add (default 1)")]
        quantity: Option<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Take one away from an item; removes it at zero"
    )]
    Remove {
        #[arg(help = "Item name (case-sensitive)")]
        name: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Rename an item and set its quantity",
        after_help = r#"EXAMPLES
  $ stocktake edit widget gadget 5

NOTES
  - Renaming onto an existing item replaces that item"#
    )]
    Edit {
        #[arg(help = "Current item name")]
        name: String,
        #[arg(help = "New item name (may equal the current name)")]
        new_name: String,
        #[arg(allow_hyphen_values = true, help = "New quantity (default 1)")]
        quantity: Option<String>,
    },
    #[command(arg_required_else_help = true, about = "Delete an item outright")]
    Delete {
        #[arg(help = "Item name (case-sensitive)")]
        name: String,
    },
    #[command(
        about = "Export the filtered, sorted inventory as CSV",
        after_help = r#"EXAMPLES
  $ stocktake export > inventory.csv
  $ stocktake export --search bolt -o bolts.csv"#
    )]
    Export {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(
            short = 'o',
            long = "output",
            help = "Write to a file instead of stdout",
            value_hint = ValueHint::FilePath
        )]
        output: Option<PathBuf>,
    },
    #[command(
        about = "Serve an inventory over HTTP (loopback by default)",
        after_help = r#"EXAMPLES
  $ stocktake serve --data ./inventory.json
  $ stocktake --store http://127.0.0.1:9800 list"#
    )]
    Serve(ServeArgs),
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ stocktake completion bash > ~/.local/share/bash-completion/completions/stocktake
  $ stocktake completion zsh > ~/.zfunc/_stocktake"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(
        long,
        default_value = "127.0.0.1:9800",
        help = "Bind address",
        help_heading = "Connection"
    )]
    bind: String,
    #[arg(
        long,
        value_name = "PATH",
        help = "Back the server with this JSON file (default: in-memory)",
        value_hint = ValueHint::FilePath,
        help_heading = "Storage"
    )]
    data: Option<PathBuf>,
    #[arg(
        long,
        env = "STOCKTAKE_TOKEN",
        hide_env_values = true,
        help = "Require this bearer token on every request",
        help_heading = "Authentication"
    )]
    token: Option<String>,
    #[arg(
        long,
        help = "Allow non-loopback binds (requires --token)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
}

struct CliContext {
    store: Option<String>,
    color_mode: ColorMode,
    theme: Theme,
    policy: QuantityPolicy,
}

impl CliContext {
    fn store_ref(&self) -> Result<StoreRef, Error> {
        match self.store.as_deref() {
            Some(raw) => StoreRef::parse(raw),
            None => Ok(StoreRef::File(default_store_path())),
        }
    }

    fn open_inventory(&self) -> Result<(Inventory<Box<dyn ItemStore>>, String), Error> {
        let store_ref = self.store_ref()?;
        let label = store_ref.to_string();
        let config = StoreConfig::from_env(store_ref)?;
        let store = config.open()?;
        let state = ViewModel {
            theme: self.theme,
            ..ViewModel::default()
        };
        let inventory = Inventory::new(store)
            .with_policy(self.policy)
            .with_state(state);
        Ok((inventory, label))
    }
}

fn failure_error(failure: Failure) -> Error {
    let mut err = Error::new(failure.error_kind).with_message(failure.message.clone());
    if failure.kind == FailureKind::ParseFailed {
        err = err.with_hint("Quantities must be whole numbers greater than zero under --strict.");
    }
    match failure.cause {
        Some(cause) => err.with_source(CauseText(cause)),
        None => err,
    }
}

#[derive(Debug)]
struct CauseText(String);

impl std::fmt::Display for CauseText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for CauseText {}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check file permissions, the token, or use --store elsewhere.",
        ),
        ErrorKind::Busy => err.with_hint("Store is busy (another writer holds the lock). Retry."),
        ErrorKind::Unavailable => {
            err.with_hint("Store is unreachable. Check the url, network, or STOCKTAKE_TIMEOUT_MS.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Store file is not valid inventory JSON. Fix it or move it aside.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share the output if it persists.",
    )
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("stocktake {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "stocktake",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
    Green,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
        AnsiColor::Green => "32",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let color = if notice.kind == "failure" {
            AnsiColor::Yellow
        } else {
            AnsiColor::Green
        };
        let label = colorize_label("notice:", color_mode.use_color(is_tty), color);
        eprintln!("{label} {} (store: {})", notice.message, notice.store);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

/// Emit the notification left in the view model, plus a warning when the
/// post-write refresh failed.
fn emit_state_notices<S: ItemStore>(
    inventory: &Inventory<S>,
    store_label: &str,
    details: Map<String, Value>,
    color_mode: ColorMode,
) {
    let state = inventory.state();
    let time = notice_time_now().unwrap_or_default();
    if let Some(notification) = &state.notification {
        if notification.level == NotificationLevel::Success {
            let mut notice = notice_from_notification(notification, time.clone(), store_label);
            notice.details = details;
            emit_notice(&notice, color_mode);
        }
    }
    if let Some(failure) = &state.error {
        if failure.kind == FailureKind::FetchFailed {
            let notice = Notice {
                kind: "failure".to_string(),
                time,
                cmd: failure.operation.as_str().to_string(),
                store: store_label.to_string(),
                message: failure.message.clone(),
                details: Map::new(),
            };
            emit_notice(&notice, color_mode);
        }
    }
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Unavailable => "store unavailable".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(item) = err.item() {
        inner.insert("item".to_string(), json!(item));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(item) = err.item() {
        lines.push(format!(
            "{} {item}",
            colorize_label("item:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `stocktake --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "stocktake") else {
        return "Try `stocktake --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `stocktake --help`.".to_string();
    }
    format!("Try `stocktake {} --help`.", parts.join(" "))
}
