//! Duplicate detection and quarantine.
//!
//! # Responsibility
//! - Find every live resource carrying a canonical name under the parent.
//! - Pick one keeper deterministically and quarantine the rest.
//!
//! # Invariants
//! - `keeper ∈ candidates` and `duplicates = candidates − {keeper}`.
//! - The temporary archive page is created lazily, at most once per resolver.
//! - One failed duplicate never aborts the remaining ones.
//!
//! # See also
//! - `service::reconciler` for the create path that consumes `find_candidates`.
//! - `service::validator` for the read-only check over `find_group_candidates`.

use crate::model::resource::{Parent, Resource, ResourceDraft, ResourceId, ResourceKind, ResourcePatch};
use crate::repo::{ContentRepository, StoreError, StoreResult};
use crate::state::{StateError, StateSnapshot, StateStore};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

static DECORATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}]",
    )
    .expect("valid decoration regex")
});

const ARCHIVE_DAY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DUPLICATE_STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]-[hour]-[minute]");
const CHILD_PROBE_PAGE_SIZE: u32 = 100;

/// Canonical name with every live instance found under the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub canonical_name: String,
    pub kind: ResourceKind,
    /// Discovery order as returned by the store.
    pub candidates: Vec<Resource>,
    pub keeper: Resource,
    pub duplicates: Vec<Resource>,
}

/// What happened to one duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveAction {
    /// Page archived in place.
    Archived,
    /// Page could not be archived and was moved under the archive page.
    MovedToArchive,
    /// Database renamed with the duplicate marker and moved.
    RenamedAndMoved { new_title: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateOutcome {
    pub id: ResourceId,
    pub title: String,
    /// Children listed before quarantine; `None` when listing failed.
    pub child_count: Option<usize>,
    pub action: ArchiveAction,
}

/// Result of resolving one canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub group: DuplicateGroup,
    pub outcomes: Vec<DuplicateOutcome>,
}

/// Result of a full dedupe pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupeReport {
    pub resolutions: Vec<Resolution>,
    /// Canonical names with no live instance.
    pub missing: Vec<(ResourceKind, String)>,
    pub archive_page: Option<ResourceId>,
}

impl DedupeReport {
    pub fn duplicate_count(&self) -> usize {
        self.resolutions.iter().map(|r| r.outcomes.len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.resolutions
            .iter()
            .flat_map(|r| r.outcomes.iter())
            .filter(|outcome| matches!(outcome.action, ArchiveAction::Failed { .. }))
            .count()
    }
}

/// Returns true when `title` carries a pictographic decoration.
pub fn is_decorated(title: &str) -> bool {
    DECORATION_RE.is_match(title)
}

/// Index of the keeper among `candidates`, or `None` when empty.
///
/// Plain titles beat decorated ones. Among the remaining set, the most
/// recently edited wins; equal timestamps keep the first discovered.
pub fn choose_keeper(candidates: &[Resource]) -> Option<usize> {
    if candidates.len() <= 1 {
        return if candidates.is_empty() { None } else { Some(0) };
    }

    let plain: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, candidate)| !is_decorated(&candidate.title))
        .map(|(index, _)| index)
        .collect();
    if plain.len() == 1 {
        return Some(plain[0]);
    }

    let pool: Vec<usize> = if plain.is_empty() {
        (0..candidates.len()).collect()
    } else {
        plain
    };
    let mut best = pool[0];
    for &index in &pool[1..] {
        if candidates[index].last_edited_time > candidates[best].last_edited_time {
            best = index;
        }
    }
    Some(best)
}

/// Title with decorations, variation selectors and joiners removed, trimmed.
pub fn strip_decoration(title: &str) -> String {
    DECORATION_RE
        .replace_all(title, "")
        .chars()
        .filter(|c| !matches!(c, '\u{FE0F}' | '\u{200D}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Live resources of `kind` titled exactly `name` directly under `parent_id`.
///
/// Store search is fuzzy; substring matches, archived resources and
/// resources under other parents are dropped here.
pub fn find_candidates<R: ContentRepository + ?Sized>(
    repo: &R,
    name: &str,
    kind: ResourceKind,
    parent_id: ResourceId,
) -> StoreResult<Vec<Resource>> {
    search_under_parent(repo, name, kind, parent_id, |title| title == name)
}

/// Like [`find_candidates`], but decorated variants such as `📥 <name>` match too.
pub fn find_group_candidates<R: ContentRepository + ?Sized>(
    repo: &R,
    name: &str,
    kind: ResourceKind,
    parent_id: ResourceId,
) -> StoreResult<Vec<Resource>> {
    let canonical = strip_decoration(name);
    search_under_parent(repo, name, kind, parent_id, |title| {
        title == name || strip_decoration(title) == canonical
    })
}

fn search_under_parent<R, F>(
    repo: &R,
    name: &str,
    kind: ResourceKind,
    parent_id: ResourceId,
    title_matches: F,
) -> StoreResult<Vec<Resource>>
where
    R: ContentRepository + ?Sized,
    F: Fn(&str) -> bool,
{
    Ok(repo
        .search(name, kind)?
        .into_iter()
        .filter(|resource| {
            resource.kind == kind
                && !resource.archived
                && resource.parent.is_page(parent_id)
                && title_matches(&resource.title)
        })
        .collect())
}

/// Duplicate resolver over one content store.
pub struct DuplicateResolver<R: ContentRepository> {
    repo: R,
    now: OffsetDateTime,
    archive_page: Option<ResourceId>,
}

impl<R: ContentRepository> DuplicateResolver<R> {
    /// Creates a resolver stamping titles with the current UTC time.
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, OffsetDateTime::now_utc())
    }

    /// Creates a resolver stamping titles with `now`.
    pub fn with_clock(repo: R, now: OffsetDateTime) -> Self {
        Self {
            repo,
            now,
            archive_page: None,
        }
    }

    /// Archive page created by this resolver, if any.
    pub fn archive_page(&self) -> Option<ResourceId> {
        self.archive_page
    }

    /// Groups live instances of `canonical_name` without mutating anything.
    ///
    /// Search failures are logged and treated as zero candidates.
    pub fn plan(
        &self,
        canonical_name: &str,
        kind: ResourceKind,
        parent_id: ResourceId,
    ) -> Option<DuplicateGroup> {
        self.try_plan(canonical_name, kind, parent_id)
            .unwrap_or_else(|err| {
                log_search_failure(kind, canonical_name, &err);
                None
            })
    }

    /// Groups live instances of `canonical_name`, surfacing search failures.
    ///
    /// `Ok(None)` means the store answered and holds no live instance.
    pub fn try_plan(
        &self,
        canonical_name: &str,
        kind: ResourceKind,
        parent_id: ResourceId,
    ) -> StoreResult<Option<DuplicateGroup>> {
        let candidates = find_group_candidates(&self.repo, canonical_name, kind, parent_id)?;
        let Some(keeper_index) = choose_keeper(&candidates) else {
            return Ok(None);
        };
        let keeper = candidates[keeper_index].clone();
        let duplicates = candidates
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != keeper_index)
            .map(|(_, candidate)| candidate.clone())
            .collect();
        Ok(Some(DuplicateGroup {
            canonical_name: canonical_name.to_string(),
            kind,
            candidates,
            keeper,
            duplicates,
        }))
    }

    /// Groups instances of `canonical_name` and quarantines the duplicates.
    pub fn resolve(
        &mut self,
        canonical_name: &str,
        kind: ResourceKind,
        parent_id: ResourceId,
    ) -> Option<Resolution> {
        let group = self.plan(canonical_name, kind, parent_id)?;
        Some(self.quarantine_group(group, parent_id))
    }

    /// Resolves every target and records each keeper in `state`.
    ///
    /// A name the store confirms has no live instance is dropped from
    /// `state`; a name whose search failed keeps its recorded id.
    ///
    /// # Errors
    /// - Returns `StateError` when the final state save fails.
    pub fn resolve_all<S: StateStore + ?Sized>(
        &mut self,
        state_store: &S,
        state: &mut StateSnapshot,
        targets: &[(ResourceKind, &str)],
        parent_id: ResourceId,
    ) -> Result<DedupeReport, StateError> {
        let mut report = DedupeReport::default();
        for &(kind, name) in targets {
            match self.try_plan(name, kind, parent_id) {
                Ok(Some(group)) => {
                    let resolution = self.quarantine_group(group, parent_id);
                    state.record(kind, name, resolution.group.keeper.id);
                    report.resolutions.push(resolution);
                }
                Ok(None) => {
                    let stale = state.forget(kind, name);
                    warn!(
                        "event=dedupe_group module=duplicate_resolver status=missing kind={} name={:?} dropped={}",
                        kind.as_str(),
                        name,
                        stale.is_some()
                    );
                    report.missing.push((kind, name.to_string()));
                }
                Err(err) => {
                    log_search_failure(kind, name, &err);
                    report.missing.push((kind, name.to_string()));
                }
            }
        }

        state.last_deduped = Some(self.now);
        state_store.save(state)?;
        report.archive_page = self.archive_page;
        Ok(report)
    }

    fn quarantine_group(&mut self, group: DuplicateGroup, parent_id: ResourceId) -> Resolution {
        info!(
            "event=dedupe_group module=duplicate_resolver status=ok kind={} name={:?} candidates={} keeper={}",
            group.kind.as_str(),
            group.canonical_name,
            group.candidates.len(),
            group.keeper.id
        );
        let outcomes = group
            .duplicates
            .iter()
            .map(|duplicate| self.quarantine(duplicate, parent_id))
            .collect();
        Resolution { group, outcomes }
    }

    fn quarantine(&mut self, duplicate: &Resource, parent_id: ResourceId) -> DuplicateOutcome {
        let child_count = match self.repo.list_children(duplicate.id, CHILD_PROBE_PAGE_SIZE) {
            Ok(children) => Some(children.len()),
            Err(err) => {
                debug!(
                    "event=dedupe_children module=duplicate_resolver status=error id={} error={}",
                    duplicate.id, err
                );
                None
            }
        };

        let action = match duplicate.kind {
            ResourceKind::Page => self.quarantine_page(duplicate, parent_id),
            ResourceKind::Database => self.quarantine_database(duplicate, parent_id),
        };
        match &action {
            ArchiveAction::Failed { reason } => warn!(
                "event=dedupe_archive module=duplicate_resolver status=error kind={} id={} error={}",
                duplicate.kind.as_str(),
                duplicate.id,
                reason
            ),
            _ => info!(
                "event=dedupe_archive module=duplicate_resolver status=ok kind={} id={} action={:?}",
                duplicate.kind.as_str(),
                duplicate.id,
                action
            ),
        }

        DuplicateOutcome {
            id: duplicate.id,
            title: duplicate.title.clone(),
            child_count,
            action,
        }
    }

    fn quarantine_page(&mut self, page: &Resource, parent_id: ResourceId) -> ArchiveAction {
        let archive_err = match self.repo.archive(ResourceKind::Page, page.id) {
            Ok(()) => return ArchiveAction::Archived,
            Err(err) => err,
        };
        debug!(
            "event=dedupe_archive module=duplicate_resolver status=fallback id={} error={}",
            page.id, archive_err
        );

        let moved = self
            .ensure_archive_page(parent_id)
            .and_then(|archive_page| self.repo.move_to(ResourceKind::Page, page.id, archive_page));
        match moved {
            Ok(()) => ArchiveAction::MovedToArchive,
            Err(err) => ArchiveAction::Failed {
                reason: format!("archive failed ({archive_err}); move failed ({err})"),
            },
        }
    }

    fn quarantine_database(&mut self, database: &Resource, parent_id: ResourceId) -> ArchiveAction {
        let archive_page = match self.ensure_archive_page(parent_id) {
            Ok(archive_page) => archive_page,
            Err(err) => {
                return ArchiveAction::Failed {
                    reason: format!("archive page unavailable: {err}"),
                }
            }
        };

        let new_title = format!(
            "DUPLICATE — {} — {}",
            database.title,
            format_stamp(self.now, DUPLICATE_STAMP_FORMAT)
        );
        let renamed = self.repo.update(
            ResourceKind::Database,
            database.id,
            &ResourcePatch::rename(new_title.as_str()),
        );
        if let Err(err) = renamed {
            return ArchiveAction::Failed {
                reason: format!("rename failed: {err}"),
            };
        }
        match self
            .repo
            .move_to(ResourceKind::Database, database.id, archive_page)
        {
            Ok(()) => ArchiveAction::RenamedAndMoved { new_title },
            Err(err) => ArchiveAction::Failed {
                reason: format!("renamed to {new_title:?} but move failed: {err}"),
            },
        }
    }

    fn ensure_archive_page(&mut self, parent_id: ResourceId) -> StoreResult<ResourceId> {
        if let Some(archive_page) = self.archive_page {
            return Ok(archive_page);
        }
        let title = format!(
            "Archive — Night Desk (Temp) — {}",
            format_stamp(self.now, ARCHIVE_DAY_FORMAT)
        );
        let page = self.repo.create(&ResourceDraft::new(
            ResourceKind::Page,
            Parent::Page(parent_id),
            title.as_str(),
        ))?;
        info!(
            "event=dedupe_archive_page module=duplicate_resolver status=ok id={} title={:?}",
            page.id, title
        );
        self.archive_page = Some(page.id);
        Ok(page.id)
    }
}

fn log_search_failure(kind: ResourceKind, name: &str, err: &StoreError) {
    warn!(
        "event=dedupe_search module=duplicate_resolver status=error kind={} name={:?} error={}",
        kind.as_str(),
        name,
        err
    );
}

fn format_stamp(now: OffsetDateTime, format: &[FormatItem<'_>]) -> String {
    now.format(format).unwrap_or_else(|_| now.date().to_string())
}
