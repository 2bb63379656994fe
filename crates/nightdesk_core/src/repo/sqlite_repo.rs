//! SQLite-backed sandbox content store.
//!
//! # Responsibility
//! - Provide an offline `ContentRepository` with the same hierarchy rules as
//!   the remote store: pages nest under pages, records under databases.
//! - Assign property ids and enforce relation/rollup references.
//! - Expose capability switches so degraded store behavior can be exercised.
//!
//! # Invariants
//! - Archived resources are never returned by `search`, `list_children` or
//!   `query_records`; `retrieve` still returns them.
//! - Every database has exactly one title property.
//! - Child listing is deterministic: `sort_order ASC, resource_id ASC`.
//! - `search` returns matches in creation order.

use crate::db::migrations::latest_version;
use crate::model::resource::{
    ChildBlock, Parent, PropertyValue, RecordFilter, Resource, ResourceDraft, ResourceId,
    ResourceKind, ResourcePatch,
};
use crate::model::schema::{PropertySchema, PropertySpec, RelationMode, SchemaError};
use crate::repo::{ContentRepository, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

const RESOURCE_SELECT_SQL: &str = "SELECT
    resource_id,
    kind,
    parent_kind,
    parent_id,
    title,
    is_archived,
    last_edited_at
FROM resources";

const MAX_PAGE_SIZE: u32 = 100;

/// Operations the sandbox is willing to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxCapabilities {
    /// Accept `RelationMode::Dual` property updates.
    pub dual_relations: bool,
    /// Accept in-place archiving of pages.
    pub page_archive: bool,
}

impl Default for SandboxCapabilities {
    fn default() -> Self {
        Self {
            dual_relations: true,
            page_archive: true,
        }
    }
}

/// SQLite sandbox store.
pub struct SqliteContentRepository<'conn> {
    conn: &'conn Connection,
    capabilities: SandboxCapabilities,
}

impl<'conn> SqliteContentRepository<'conn> {
    /// Creates the store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_sandbox_ready(conn)?;
        Ok(Self {
            conn,
            capabilities: SandboxCapabilities::default(),
        })
    }

    /// Replaces the capability switches.
    pub fn with_capabilities(mut self, capabilities: SandboxCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> SandboxCapabilities {
        self.capabilities
    }

    fn load_active(
        &self,
        conn: &Connection,
        kind: ResourceKind,
        id: ResourceId,
    ) -> StoreResult<Resource> {
        load_resource(conn, id, false)?
            .filter(|resource| resource.kind == kind)
            .ok_or(StoreError::NotFound(id))
    }

    fn ensure_parent_accepts(
        &self,
        conn: &Connection,
        kind: ResourceKind,
        parent: Parent,
    ) -> StoreResult<()> {
        match (parent, kind) {
            (Parent::Workspace, ResourceKind::Page) => Ok(()),
            (Parent::Workspace, ResourceKind::Database) => Err(StoreError::rejected(
                "validation_error",
                "databases must be created under a page",
            )),
            (Parent::Page(page_id), _) => self
                .load_active(conn, ResourceKind::Page, page_id)
                .map(|_| ())
                .map_err(|_| {
                    StoreError::rejected(
                        "object_not_found",
                        format!("parent page not found: {page_id}"),
                    )
                }),
            (Parent::Database(database_id), ResourceKind::Page) => self
                .load_active(conn, ResourceKind::Database, database_id)
                .map(|_| ())
                .map_err(|_| {
                    StoreError::rejected(
                        "object_not_found",
                        format!("parent database not found: {database_id}"),
                    )
                }),
            (Parent::Database(_), ResourceKind::Database) => Err(StoreError::rejected(
                "validation_error",
                "databases cannot be nested in databases",
            )),
        }
    }

    fn check_property(
        &self,
        conn: &Connection,
        database_id: ResourceId,
        spec: &PropertySpec,
    ) -> StoreResult<()> {
        spec.validate()?;
        let PropertySpec::Relation {
            database_id: target_id,
            mode,
        } = spec
        else {
            return Ok(());
        };

        let target = load_resource(conn, *target_id, false)?
            .filter(|resource| resource.kind == ResourceKind::Database)
            .ok_or_else(|| {
                StoreError::rejected(
                    "validation_error",
                    format!("relation target database not found: {target_id}"),
                )
            })?;

        if let RelationMode::Dual {
            synced_property_id,
            synced_property_name,
        } = mode
        {
            if !self.capabilities.dual_relations {
                return Err(StoreError::Unsupported("dual relations".to_string()));
            }
            let synced = target
                .properties
                .get(synced_property_name)
                .filter(|schema| schema.id == *synced_property_id)
                .ok_or_else(|| {
                    StoreError::rejected(
                        "validation_error",
                        format!(
                            "synced property `{synced_property_name}` ({synced_property_id}) not found on {target_id}"
                        ),
                    )
                })?;
            match &synced.spec {
                PropertySpec::Relation {
                    database_id: back, ..
                } if *back == database_id => {}
                _ => {
                    return Err(StoreError::rejected(
                        "validation_error",
                        format!(
                            "synced property `{synced_property_name}` must relate back to {database_id}"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl ContentRepository for SqliteContentRepository<'_> {
    fn create(&self, draft: &ResourceDraft) -> StoreResult<Resource> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(StoreError::rejected(
                "validation_error",
                "title must not be blank",
            ));
        }
        self.ensure_parent_accepts(self.conn, draft.kind, draft.parent)?;
        if draft.kind == ResourceKind::Database {
            validate_new_schema(title, &draft.properties)?;
        }

        let id = Uuid::new_v4();
        let now = now_ms();
        let parent_id = draft.parent.id();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let sort_order = next_sort_order(&tx, parent_id)?;
        tx.execute(
            "INSERT INTO resources (
                resource_id,
                kind,
                parent_kind,
                parent_id,
                title,
                sort_order,
                is_archived,
                created_at,
                last_edited_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7);",
            params![
                id.to_string(),
                draft.kind.as_str(),
                parent_kind(draft.parent),
                parent_id.map(|value| value.to_string()),
                title,
                sort_order,
                now,
            ],
        )?;

        match (draft.kind, draft.parent) {
            (ResourceKind::Database, _) => {
                for (name, spec) in &draft.properties {
                    self.check_property(&tx, id, spec)?;
                    upsert_property(&tx, id, name, spec)?;
                }
                check_rollup_references(&tx, id, title)?;
            }
            (ResourceKind::Page, Parent::Database(database_id)) => {
                write_values(&tx, database_id, id, &draft.values)?;
            }
            (ResourceKind::Page, _) => {}
        }

        tx.commit()?;
        self.retrieve(draft.kind, id)
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> StoreResult<Resource> {
        let current = self.load_active(self.conn, kind, id)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        if let Some(title) = &patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(StoreError::rejected(
                    "validation_error",
                    "title must not be blank",
                ));
            }
            tx.execute(
                "UPDATE resources SET title = ?2 WHERE resource_id = ?1;",
                params![id.to_string(), title],
            )?;
        }

        if !patch.properties.is_empty() {
            if kind != ResourceKind::Database {
                return Err(StoreError::rejected(
                    "validation_error",
                    "only databases carry a property schema",
                ));
            }
            for (name, spec) in &patch.properties {
                let is_current_title = current
                    .properties
                    .get(name)
                    .is_some_and(|schema| schema.spec == PropertySpec::Title);
                if *spec == PropertySpec::Title && !is_current_title {
                    return Err(StoreError::rejected(
                        "validation_error",
                        format!("database already has a title property; cannot add `{name}`"),
                    ));
                }
                self.check_property(&tx, id, spec)?;
                upsert_property(&tx, id, name, spec)?;
            }
            check_rollup_references(&tx, id, &current.title)?;
        }

        if !patch.values.is_empty() {
            let Parent::Database(database_id) = current.parent else {
                return Err(StoreError::rejected(
                    "validation_error",
                    "only database records carry property values",
                ));
            };
            write_values(&tx, database_id, id, &patch.values)?;
        }

        touch(&tx, id)?;
        tx.commit()?;
        self.retrieve(kind, id)
    }

    fn retrieve(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<Resource> {
        load_resource(self.conn, id, true)?
            .filter(|resource| resource.kind == kind)
            .ok_or(StoreError::NotFound(id))
    }

    fn search(&self, query: &str, kind: ResourceKind) -> StoreResult<Vec<Resource>> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let mut stmt = self.conn.prepare(&format!(
            "{RESOURCE_SELECT_SQL}
             WHERE kind = ?1
               AND is_archived = 0
               AND title LIKE ?2 ESCAPE '\\'
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query(params![kind.as_str(), pattern])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_resource_row(row)?);
        }
        drop(rows);
        items
            .into_iter()
            .map(|resource| hydrate(self.conn, resource))
            .collect()
    }

    fn archive(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<()> {
        match kind {
            ResourceKind::Database => Err(StoreError::Unsupported(
                "archiving databases in place".to_string(),
            )),
            ResourceKind::Page => {
                if !self.capabilities.page_archive {
                    return Err(StoreError::Unsupported("archiving pages".to_string()));
                }
                self.load_active(self.conn, kind, id)?;
                self.conn.execute(
                    "UPDATE resources
                     SET is_archived = 1,
                         last_edited_at = ?2
                     WHERE resource_id = ?1;",
                    params![id.to_string(), now_ms()],
                )?;
                Ok(())
            }
        }
    }

    fn move_to(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        new_parent: ResourceId,
    ) -> StoreResult<()> {
        self.load_active(self.conn, kind, id)?;
        self.load_active(self.conn, ResourceKind::Page, new_parent)
            .map_err(|_| {
                StoreError::rejected(
                    "validation_error",
                    format!("new parent must be an active page: {new_parent}"),
                )
            })?;
        if would_create_cycle(self.conn, id, new_parent)? {
            return Err(StoreError::rejected(
                "validation_error",
                format!("moving {id} under {new_parent} would create a cycle"),
            ));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let sort_order = next_sort_order(&tx, Some(new_parent))?;
        tx.execute(
            "UPDATE resources
             SET parent_kind = 'page',
                 parent_id = ?2,
                 sort_order = ?3,
                 last_edited_at = ?4
             WHERE resource_id = ?1;",
            params![id.to_string(), new_parent.to_string(), sort_order, now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_children(&self, id: ResourceId, page_size: u32) -> StoreResult<Vec<ChildBlock>> {
        if load_resource(self.conn, id, false)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        let mut stmt = self.conn.prepare(
            "SELECT resource_id, kind, title
             FROM resources
             WHERE parent_id = ?1
               AND is_archived = 0
             ORDER BY sort_order ASC, resource_id ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![id.to_string(), limit])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(1)?;
            let block_type = match parse_kind(&kind)? {
                ResourceKind::Database => "child_database",
                ResourceKind::Page => "child_page",
            };
            children.push(ChildBlock {
                id: row.get(0)?,
                block_type: block_type.to_string(),
                title: Some(row.get(2)?),
            });
        }
        Ok(children)
    }

    fn query_records(
        &self,
        database_id: ResourceId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Resource>> {
        self.load_active(self.conn, ResourceKind::Database, database_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{RESOURCE_SELECT_SQL}
             WHERE parent_kind = 'database'
               AND parent_id = ?1
               AND is_archived = 0
             ORDER BY last_edited_at DESC, rowid ASC;"
        ))?;
        let mut rows = stmt.query([database_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_resource_row(row)?);
        }
        drop(rows);

        let mut matched = Vec::new();
        for record in records {
            let record = hydrate(self.conn, record)?;
            let keep = match filter {
                RecordFilter::DateEquals { property, date } => {
                    record.date_value(property) == Some(*date)
                }
            };
            if keep {
                matched.push(record);
            }
        }
        Ok(matched)
    }
}

fn validate_new_schema(database: &str, properties: &[(String, PropertySpec)]) -> StoreResult<()> {
    let mut names = HashSet::new();
    let mut titles = 0;
    for (name, spec) in properties {
        if !names.insert(name.as_str()) {
            return Err(SchemaError::DuplicateProperty {
                database: database.to_string(),
                property: name.clone(),
            }
            .into());
        }
        if *spec == PropertySpec::Title {
            titles += 1;
        }
    }
    if titles != 1 {
        return Err(StoreError::rejected(
            "validation_error",
            format!("database `{database}` must declare exactly one title property"),
        ));
    }
    Ok(())
}

fn check_rollup_references(
    conn: &Connection,
    database_id: ResourceId,
    database: &str,
) -> StoreResult<()> {
    let properties = load_properties(conn, database_id)?;
    for schema in properties.values() {
        if let PropertySpec::Rollup {
            relation_property, ..
        } = &schema.spec
        {
            let is_relation = matches!(
                properties.get(relation_property).map(|p| &p.spec),
                Some(PropertySpec::Relation { .. })
            );
            if !is_relation {
                return Err(SchemaError::UnknownPropertyReference {
                    database: database.to_string(),
                    property: relation_property.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn upsert_property(
    conn: &Connection,
    database_id: ResourceId,
    name: &str,
    spec: &PropertySpec,
) -> StoreResult<()> {
    let spec_json = serde_json::to_string(spec)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode property `{name}`: {err}")))?;
    let changed = conn.execute(
        "UPDATE database_properties
         SET spec_json = ?3
         WHERE database_id = ?1
           AND name = ?2;",
        params![database_id.to_string(), name, spec_json],
    )?;
    if changed > 0 {
        return Ok(());
    }

    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1
         FROM database_properties
         WHERE database_id = ?1;",
        [database_id.to_string()],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO database_properties (database_id, property_id, name, spec_json, position)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            database_id.to_string(),
            new_property_id(),
            name,
            spec_json,
            position,
        ],
    )?;
    Ok(())
}

fn write_values(
    conn: &Connection,
    database_id: ResourceId,
    page_id: ResourceId,
    values: &BTreeMap<String, PropertyValue>,
) -> StoreResult<()> {
    if values.is_empty() {
        return Ok(());
    }
    let schema = load_properties(conn, database_id)?;
    for (name, value) in values {
        if !schema.contains_key(name) {
            return Err(StoreError::rejected(
                "validation_error",
                format!("database {database_id} has no property `{name}`"),
            ));
        }
        let value_json = serde_json::to_string(value).map_err(|err| {
            StoreError::InvalidData(format!("cannot encode value `{name}`: {err}"))
        })?;
        conn.execute(
            "INSERT INTO record_values (page_id, name, value_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(page_id, name) DO UPDATE SET value_json = excluded.value_json;",
            params![page_id.to_string(), name, value_json],
        )?;
    }
    Ok(())
}

fn touch(conn: &Connection, id: ResourceId) -> StoreResult<()> {
    conn.execute(
        "UPDATE resources SET last_edited_at = ?2 WHERE resource_id = ?1;",
        params![id.to_string(), now_ms()],
    )?;
    Ok(())
}

fn load_resource(
    conn: &Connection,
    id: ResourceId,
    include_archived: bool,
) -> StoreResult<Option<Resource>> {
    let sql = if include_archived {
        format!("{RESOURCE_SELECT_SQL} WHERE resource_id = ?1;")
    } else {
        format!("{RESOURCE_SELECT_SQL} WHERE resource_id = ?1 AND is_archived = 0;")
    };
    let base = conn
        .query_row(&sql, [id.to_string()], |row| Ok(parse_resource_row(row)))
        .optional()?
        .transpose()?;
    base.map(|resource| hydrate(conn, resource)).transpose()
}

fn hydrate(conn: &Connection, mut resource: Resource) -> StoreResult<Resource> {
    match (resource.kind, resource.parent) {
        (ResourceKind::Database, _) => {
            resource.properties = load_properties(conn, resource.id)?;
        }
        (ResourceKind::Page, Parent::Database(_)) => {
            resource.values = load_values(conn, resource.id)?;
        }
        (ResourceKind::Page, _) => {}
    }
    Ok(resource)
}

fn load_properties(
    conn: &Connection,
    database_id: ResourceId,
) -> StoreResult<BTreeMap<String, PropertySchema>> {
    let mut stmt = conn.prepare(
        "SELECT name, property_id, spec_json
         FROM database_properties
         WHERE database_id = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([database_id.to_string()])?;
    let mut properties = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let spec_json: String = row.get(2)?;
        let spec = serde_json::from_str(&spec_json).map_err(|err| {
            StoreError::InvalidData(format!("invalid spec for property `{name}`: {err}"))
        })?;
        properties.insert(
            name,
            PropertySchema {
                id: row.get(1)?,
                spec,
            },
        );
    }
    Ok(properties)
}

fn load_values(
    conn: &Connection,
    page_id: ResourceId,
) -> StoreResult<BTreeMap<String, PropertyValue>> {
    let mut stmt = conn.prepare(
        "SELECT name, value_json
         FROM record_values
         WHERE page_id = ?1;",
    )?;
    let mut rows = stmt.query([page_id.to_string()])?;
    let mut values = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let value_json: String = row.get(1)?;
        let value = serde_json::from_str(&value_json).map_err(|err| {
            StoreError::InvalidData(format!("invalid value for property `{name}`: {err}"))
        })?;
        values.insert(name, value);
    }
    Ok(values)
}

fn parse_resource_row(row: &Row<'_>) -> StoreResult<Resource> {
    let id_text: String = row.get("resource_id")?;
    let kind_text: String = row.get("kind")?;
    let parent_kind_text: String = row.get("parent_kind")?;
    let parent_id = row
        .get::<_, Option<String>>("parent_id")?
        .map(|value| parse_id(&value, "resources.parent_id"))
        .transpose()?;

    let parent = match (parent_kind_text.as_str(), parent_id) {
        ("workspace", None) => Parent::Workspace,
        ("page", Some(id)) => Parent::Page(id),
        ("database", Some(id)) => Parent::Database(id),
        (other, _) => {
            return Err(StoreError::InvalidData(format!(
                "invalid parent `{other}` in resources.parent_kind"
            )));
        }
    };

    let archived = match row.get::<_, i64>("is_archived")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_archived value `{other}` in resources.is_archived"
            )));
        }
    };

    Ok(Resource {
        id: parse_id(&id_text, "resources.resource_id")?,
        kind: parse_kind(&kind_text)?,
        title: row.get("title")?,
        parent,
        archived,
        last_edited_time: ms_to_datetime(row.get("last_edited_at")?)?,
        properties: BTreeMap::new(),
        values: BTreeMap::new(),
    })
}

fn parse_kind(value: &str) -> StoreResult<ResourceKind> {
    match value {
        "database" => Ok(ResourceKind::Database),
        "page" => Ok(ResourceKind::Page),
        other => Err(StoreError::InvalidData(format!(
            "invalid resource kind `{other}` in resources.kind"
        ))),
    }
}

fn parse_id(value: &str, column: &'static str) -> StoreResult<ResourceId> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn parent_kind(parent: Parent) -> &'static str {
    match parent {
        Parent::Workspace => "workspace",
        Parent::Page(_) => "page",
        Parent::Database(_) => "database",
    }
}

fn next_sort_order(conn: &Connection, parent_id: Option<ResourceId>) -> StoreResult<i64> {
    let next = match parent_id {
        Some(parent_id) => conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1
             FROM resources
             WHERE parent_id = ?1;",
            [parent_id.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1
             FROM resources
             WHERE parent_id IS NULL;",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(next)
}

fn would_create_cycle(
    conn: &Connection,
    id: ResourceId,
    candidate_parent: ResourceId,
) -> StoreResult<bool> {
    let mut visited = HashSet::new();
    let mut cursor = Some(candidate_parent);
    while let Some(current) = cursor {
        if current == id || !visited.insert(current) {
            return Ok(true);
        }
        cursor = load_resource(conn, current, true)?.and_then(|resource| resource.parent.id());
    }
    Ok(false)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn new_property_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn ms_to_datetime(ms: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| StoreError::InvalidData(format!("invalid timestamp `{ms}`")))
}

fn ensure_sandbox_ready(conn: &Connection) -> StoreResult<()> {
    let expected = latest_version();
    let actual: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual != expected {
        return Err(StoreError::InvalidData(format!(
            "sandbox requires schema version {expected}, got {actual}"
        )));
    }
    for table in ["resources", "database_properties", "record_values"] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::InvalidData(format!(
                "sandbox requires table `{table}`"
            )));
        }
    }
    Ok(())
}
