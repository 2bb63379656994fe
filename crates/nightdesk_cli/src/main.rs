//! `nightdesk` entry point.
//!
//! # Responsibility
//! - Resolve configuration, start logging and pick the store backend.
//! - Run one engine pass and print a human summary.
//!
//! # Invariants
//! - Configuration is validated before any store call.
//! - Exit code is `0` on success, `1` on fatal errors or failed checks.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Command, GlobalArgs, ReviewCapArgs, RootArgs};
use log::{error, info};
use nightdesk_core::config::{
    ENV_LOG_DIR, ENV_LOG_LEVEL, ENV_NOTION_TOKEN, ENV_PARENT_PAGE_ID, ENV_STATE_FILE,
};
use nightdesk_core::db::open_db;
use nightdesk_core::model::resource::{iso_date, Parent, ResourceDraft, ResourceId, ResourceKind};
use nightdesk_core::service::duplicate_resolver::ArchiveAction;
use nightdesk_core::service::provisioner::RelationStatus;
use nightdesk_core::service::cap_scheduler::DeferStatus;
use nightdesk_core::{
    default_log_level, init_logging, night_desk, CapScheduler, Config, ContentRepository,
    DuplicateResolver, EnsureSource, JsonFileStateStore, NotionContentRepository, Provisioner,
    SqliteContentRepository, StateStore, Validator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use time::OffsetDateTime;

const DEFAULT_LOG_DIR: &str = ".nightdesk/logs";
const SANDBOX_PARENT_TITLE: &str = "Night Desk (Sandbox)";

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = RootArgs::parse();

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RootArgs) -> Result<ExitCode> {
    let config = resolve_config(&args.global)?;
    start_logging(&config)?;
    info!(
        "event=cli_run module=cli status=start command={:?} backend={}",
        args.command,
        if args.global.sandbox.is_some() { "sandbox" } else { "notion" }
    );

    match &args.global.sandbox {
        Some(path) => {
            let conn = open_db(path)
                .with_context(|| format!("failed to open sandbox `{}`", path.display()))?;
            let repo = SqliteContentRepository::try_new(&conn)?;
            if let Command::SandboxInit = args.command {
                return sandbox_init(&repo);
            }
            execute(&repo, &args.command, &config)
        }
        None => {
            if let Command::SandboxInit = args.command {
                bail!("`sandbox-init` requires --sandbox <DB>");
            }
            let token = config.require_notion_token()?;
            let repo = NotionContentRepository::new(token);
            execute(&repo, &args.command, &config)
        }
    }
}

fn resolve_config(global: &GlobalArgs) -> Result<Config> {
    let path_text = |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string());
    let config = Config::from_lookup(|key| match key {
        ENV_NOTION_TOKEN => std::env::var(key).ok(),
        ENV_PARENT_PAGE_ID => global.parent_page_id.clone(),
        ENV_STATE_FILE => path_text(&global.state_file),
        ENV_LOG_DIR => path_text(&global.log_dir),
        ENV_LOG_LEVEL => global.log_level.clone(),
        _ => None,
    })?;
    Ok(config)
}

fn start_logging(config: &Config) -> Result<()> {
    let level = config
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    let dir = config
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    let dir = absolute(&dir)?;
    if let Err(err) = init_logging(&level, &dir) {
        eprintln!("warning: logging disabled: {err}");
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    Ok(cwd.join(path))
}

fn execute<R: ContentRepository>(repo: &R, command: &Command, config: &Config) -> Result<ExitCode> {
    let parent_id = config.require_parent_page_id()?;
    let state_store = JsonFileStateStore::new(&config.state_file);
    match command {
        Command::Provision => provision(repo, &state_store, parent_id),
        Command::Dedupe => dedupe(repo, &state_store, parent_id),
        Command::ReviewCap(cap) => review_cap(repo, &state_store, cap),
        Command::Validate => validate(repo, &state_store, parent_id),
        Command::SandboxInit => bail!("`sandbox-init` requires --sandbox <DB>"),
    }
}

fn provision<R: ContentRepository>(
    repo: &R,
    state_store: &JsonFileStateStore,
    parent_id: ResourceId,
) -> Result<ExitCode> {
    let blueprint = night_desk()?;
    let mut state = state_store.load().context("failed to load state")?;
    let mut provisioner = Provisioner::new(repo, state_store);
    let report = provisioner
        .provision(&mut state, &blueprint, parent_id)
        .context("provisioning aborted")?;

    for ensured in &report.ensured {
        println!(
            "{:<8} {:<9} {} ({})",
            ensured.source.as_str(),
            ensured.kind.as_str(),
            ensured.name,
            ensured.id
        );
    }
    for relation in &report.relations {
        let status = match &relation.status {
            RelationStatus::AlreadyDual => "dual (unchanged)".to_string(),
            RelationStatus::Bound(mode) => mode.as_str().to_string(),
            RelationStatus::Skipped => "skipped (end unresolved)".to_string(),
            RelationStatus::Failed { reason } => format!("FAILED: {reason}"),
        };
        println!(
            "relation {}.{} -> {}: {status}",
            relation.owner, relation.owner_property, relation.target
        );
    }
    for (database, reason) in &report.derived_failures {
        println!("derived properties on {database} FAILED: {reason}");
    }
    for ambiguous in &report.ambiguous {
        println!(
            "AMBIGUOUS {} {}: {} candidates; run `dedupe`",
            ambiguous.kind.as_str(),
            ambiguous.name,
            ambiguous.candidates.len()
        );
    }
    println!(
        "provision: reused={} adopted={} created={} ambiguous={}",
        report.count(EnsureSource::Reused),
        report.count(EnsureSource::Adopted),
        report.count(EnsureSource::Created),
        report.ambiguous.len()
    );

    Ok(if report.ambiguous.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn dedupe<R: ContentRepository>(
    repo: &R,
    state_store: &JsonFileStateStore,
    parent_id: ResourceId,
) -> Result<ExitCode> {
    let blueprint = night_desk()?;
    let mut state = state_store.load().context("failed to load state")?;
    let mut resolver = DuplicateResolver::new(repo);
    let report = resolver
        .resolve_all(state_store, &mut state, &blueprint.targets(), parent_id)
        .context("failed to save state")?;

    for resolution in &report.resolutions {
        let group = &resolution.group;
        println!(
            "{} {}: keep {} of {}",
            group.kind.as_str(),
            group.canonical_name,
            group.keeper.id,
            group.candidates.len()
        );
        for outcome in &resolution.outcomes {
            let action = match &outcome.action {
                ArchiveAction::Archived => "archived".to_string(),
                ArchiveAction::MovedToArchive => "moved to archive page".to_string(),
                ArchiveAction::RenamedAndMoved { new_title } => {
                    format!("renamed to `{new_title}` and moved")
                }
                ArchiveAction::Failed { reason } => format!("FAILED: {reason}"),
            };
            let children = outcome
                .child_count
                .map_or_else(|| "?".to_string(), |count| count.to_string());
            println!("  {} ({children} children): {action}", outcome.id);
        }
    }
    for (kind, name) in &report.missing {
        println!("{} {name}: no live instance", kind.as_str());
    }
    if let Some(archive) = report.archive_page {
        println!("archive page: {archive}");
    }
    println!(
        "dedupe: duplicates={} failed={}",
        report.duplicate_count(),
        report.failure_count()
    );

    Ok(if report.failure_count() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn review_cap<R: ContentRepository>(
    repo: &R,
    state_store: &JsonFileStateStore,
    args: &ReviewCapArgs,
) -> Result<ExitCode> {
    let state = state_store.load_required()?;
    let today = args
        .today
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let scheduler = CapScheduler::new(repo);
    let items = scheduler.collect_resurfacing(&state, today);
    let report = scheduler.apply_cap(items, args.max_per_category, !args.apply);

    for item in &report.kept {
        println!("keep   [{}] {}", item.category.as_str(), item.name);
    }
    for deferral in &report.deferrals {
        let day = deferral
            .new_date
            .map_or_else(|| "-".to_string(), iso_date::format);
        let status = match &deferral.status {
            DeferStatus::Planned => "would defer".to_string(),
            DeferStatus::Deferred => "deferred".to_string(),
            DeferStatus::Failed { reason } => format!("FAILED ({reason})"),
        };
        println!(
            "{status} [{}] {} -> {day}",
            deferral.item.category.as_str(),
            deferral.item.name
        );
    }
    println!(
        "review-cap {}: kept={} overflow={} deferred={} failed={}",
        if report.dry_run { "(dry run)" } else { "(applied)" },
        report.kept.len(),
        report.deferrals.len(),
        report.deferred_count(),
        report.failed_count()
    );

    Ok(if report.failed_count() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate<R: ContentRepository>(
    repo: &R,
    state_store: &JsonFileStateStore,
    parent_id: ResourceId,
) -> Result<ExitCode> {
    let blueprint = night_desk()?;
    let state = state_store.load_required()?;
    let report = Validator::new(repo).validate(&state, &blueprint, Some(parent_id));

    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    if report.is_ok() {
        println!("validate: ok ({} warnings)", report.warnings.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("validate: {} errors", report.errors.len());
        Ok(ExitCode::FAILURE)
    }
}

fn sandbox_init(repo: &SqliteContentRepository<'_>) -> Result<ExitCode> {
    let page = repo
        .create(&ResourceDraft::new(
            ResourceKind::Page,
            Parent::Workspace,
            SANDBOX_PARENT_TITLE,
        ))
        .context("failed to create sandbox parent page")?;
    println!("{}", page.id);
    eprintln!("export {ENV_PARENT_PAGE_ID}={}", page.id);
    Ok(ExitCode::SUCCESS)
}
