//! Daily resurfacing cap.
//!
//! # Responsibility
//! - Collect the records scheduled to resurface on a given day.
//! - Keep the freshest `max_per_category` per category and roll the rest
//!   forward one day.
//!
//! # Invariants
//! - Selection is deterministic: stable sort by last edit, newest first.
//! - Dry runs never call the store's mutation operations.
//! - One failed deferral does not stop the others.

use crate::blueprint::night_desk::{NOTES, RESURFACE_PROPERTY, TASKS};
use crate::model::resource::{
    PropertyValue, RecordFilter, ResourceKind, ResourcePatch, ResurfaceCategory, ResurfaceItem,
};
use crate::repo::ContentRepository;
use crate::state::StateSnapshot;
use log::{info, warn};
use std::collections::BTreeMap;
use time::Date;

/// Default daily cap per category.
pub const DEFAULT_MAX_PER_CATEGORY: usize = 3;

/// Result of deferring one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferStatus {
    /// Dry run: selected, not written.
    Planned,
    Deferred,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
    pub item: ResurfaceItem,
    /// Day the item is (or would be) moved to.
    pub new_date: Option<Date>,
    pub status: DeferStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapReport {
    pub dry_run: bool,
    /// Items left in today's queue, newest first per category.
    pub kept: Vec<ResurfaceItem>,
    pub deferrals: Vec<Deferral>,
}

impl CapReport {
    pub fn deferred_count(&self) -> usize {
        self.deferrals
            .iter()
            .filter(|d| d.status == DeferStatus::Deferred)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.deferrals
            .iter()
            .filter(|d| matches!(d.status, DeferStatus::Failed { .. }))
            .count()
    }
}

/// Splits `items` per category into kept and overflow.
///
/// Overflow is returned least recently edited last, matching queue order.
pub fn select_overflow(
    items: Vec<ResurfaceItem>,
    max_per_category: usize,
) -> (Vec<ResurfaceItem>, Vec<ResurfaceItem>) {
    let mut by_category: BTreeMap<ResurfaceCategory, Vec<ResurfaceItem>> = BTreeMap::new();
    for item in items {
        by_category.entry(item.category).or_default().push(item);
    }

    let mut kept = Vec::new();
    let mut overflow = Vec::new();
    for (_, mut queue) in by_category {
        queue.sort_by(|a, b| b.last_edited_time.cmp(&a.last_edited_time));
        let split = max_per_category.min(queue.len());
        overflow.extend(queue.split_off(split));
        kept.extend(queue);
    }
    (kept, overflow)
}

/// Cap scheduler over one content store.
pub struct CapScheduler<R: ContentRepository> {
    repo: R,
}

impl<R: ContentRepository> CapScheduler<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Caps each category at `max_per_category` and defers the overflow.
    pub fn apply_cap(
        &self,
        items: Vec<ResurfaceItem>,
        max_per_category: usize,
        dry_run: bool,
    ) -> CapReport {
        let (kept, overflow) = select_overflow(items, max_per_category);
        let deferrals = overflow
            .into_iter()
            .map(|item| self.defer(item, dry_run))
            .collect::<Vec<_>>();

        info!(
            "event=cap_apply module=cap_scheduler status=ok dry_run={} kept={} overflow={}",
            dry_run,
            kept.len(),
            deferrals.len()
        );
        CapReport {
            dry_run,
            kept,
            deferrals,
        }
    }

    /// Lists Tasks and Notes records resurfacing on `today`.
    ///
    /// Categories whose database is not recorded, or whose query fails, are
    /// skipped with a warning.
    pub fn collect_resurfacing(&self, state: &StateSnapshot, today: Date) -> Vec<ResurfaceItem> {
        let mut items = Vec::new();
        for (database, category) in [
            (TASKS, ResurfaceCategory::Task),
            (NOTES, ResurfaceCategory::Note),
        ] {
            let Some(database_id) = state.resource_id(ResourceKind::Database, database) else {
                warn!(
                    "event=cap_collect module=cap_scheduler status=skipped category={} reason=not_in_state",
                    category.as_str()
                );
                continue;
            };
            let filter = RecordFilter::DateEquals {
                property: RESURFACE_PROPERTY.to_string(),
                date: today,
            };
            match self.repo.query_records(database_id, &filter) {
                Ok(records) => {
                    items.extend(records.into_iter().map(|record| ResurfaceItem {
                        resurface_date: record.date_value(RESURFACE_PROPERTY).unwrap_or(today),
                        id: record.id,
                        name: record.title,
                        category,
                        last_edited_time: record.last_edited_time,
                    }));
                }
                Err(err) => warn!(
                    "event=cap_collect module=cap_scheduler status=error category={} error={}",
                    category.as_str(),
                    err
                ),
            }
        }
        items
    }

    fn defer(&self, item: ResurfaceItem, dry_run: bool) -> Deferral {
        let new_date = item.resurface_date.next_day();
        let status = match new_date {
            None => DeferStatus::Failed {
                reason: "no calendar day after resurface date".to_string(),
            },
            Some(_) if dry_run => DeferStatus::Planned,
            Some(date) => {
                let patch =
                    ResourcePatch::value(RESURFACE_PROPERTY, PropertyValue::Date(date));
                match self.repo.update(ResourceKind::Page, item.id, &patch) {
                    Ok(_) => DeferStatus::Deferred,
                    Err(err) => DeferStatus::Failed {
                        reason: err.to_string(),
                    },
                }
            }
        };
        if let DeferStatus::Failed { reason } = &status {
            warn!(
                "event=cap_defer module=cap_scheduler status=error id={} error={}",
                item.id, reason
            );
        }
        Deferral {
            item,
            new_date,
            status,
        }
    }
}
