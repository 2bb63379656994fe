//! Command-line arguments for the `nightdesk` binary.
//!
//! Flags override the matching environment variables; `.env` is loaded
//! before parsing so both sources feed clap's `env` fallbacks.

use clap::{Args, Parser, Subcommand};
use nightdesk_core::model::resource::iso_date;
use nightdesk_core::DEFAULT_MAX_PER_CATEGORY;
use std::path::PathBuf;
use time::Date;

#[derive(Parser, Debug)]
#[command(
    name = "nightdesk",
    version,
    about = "Provision and maintain the Night Desk workspace",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Local state file mapping logical names to remote ids
    #[arg(long, global = true, value_name = "PATH", env = "NIGHTDESK_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Use the SQLite sandbox store at DB instead of Notion
    #[arg(long, global = true, value_name = "DB", env = "NIGHTDESK_SANDBOX")]
    pub sandbox: Option<PathBuf>,

    /// Page all resources are provisioned under (id or URL)
    #[arg(long, global = true, value_name = "ID", env = "PARENT_PAGE_ID")]
    pub parent_page_id: Option<String>,

    /// Directory for rolling log files
    #[arg(long, global = true, value_name = "DIR", env = "NIGHTDESK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true, value_name = "LEVEL", env = "NIGHTDESK_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or adopt every database and page, then wire relations
    Provision,
    /// Keep one instance per canonical name and quarantine the rest
    Dedupe,
    /// Cap today's resurfacing queue per category
    ReviewCap(ReviewCapArgs),
    /// Check state and store against the workspace blueprint
    Validate,
    /// Create a parent page in the sandbox store and print its id
    SandboxInit,
}

#[derive(Args, Debug)]
pub struct ReviewCapArgs {
    /// Write the deferrals instead of only listing them
    #[arg(long)]
    pub apply: bool,

    /// Items kept per category
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_PER_CATEGORY)]
    pub max_per_category: usize,

    /// Queue day to review (defaults to today, UTC)
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_day)]
    pub today: Option<Date>,
}

fn parse_day(raw: &str) -> Result<Date, String> {
    iso_date::parse(raw.trim()).map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}
