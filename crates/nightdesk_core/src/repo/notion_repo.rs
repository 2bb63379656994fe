//! Notion REST adapter.
//!
//! # Responsibility
//! - Map `ContentRepository` calls onto Notion API endpoints.
//! - Encode typed property specs/values into the Notion wire format and
//!   decode responses back into the model.
//!
//! # Invariants
//! - Non-2xx answers become `StoreError::Rejected` carrying Notion's `code`.
//! - Network failures become `StoreError::Transport`; no retries here.
//! - Property kinds the model does not represent are skipped on decode.

use crate::model::resource::{
    iso_date, ChildBlock, Parent, PropertyValue, RecordFilter, Resource, ResourceDraft,
    ResourceId, ResourceKind, ResourcePatch,
};
use crate::model::schema::{PropertySchema, PropertySpec, RelationMode, RollupFunction};
use crate::repo::{ContentRepository, StoreError, StoreResult};
use log::debug;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Default API root.
pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
/// API version header value the codec is written against.
pub const NOTION_VERSION: &str = "2022-06-28";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const QUERY_PAGE_SIZE: u32 = 100;
const MAX_RESULT_PAGES: usize = 20;

/// Notion-backed content store.
pub struct NotionContentRepository {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl NotionContentRepository {
    /// Creates an adapter against the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, NOTION_API_BASE)
    }

    /// Creates an adapter against a custom API root.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn get(&self, path: &str) -> StoreResult<Value> {
        let started_at = Instant::now();
        let result = self
            .agent
            .get(&self.url(path))
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
            .call();
        finish("GET", path, started_at, result)
    }

    fn post(&self, path: &str, body: &Value) -> StoreResult<Value> {
        let started_at = Instant::now();
        let result = self
            .agent
            .post(&self.url(path))
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
            .send_json(body);
        finish("POST", path, started_at, result)
    }

    fn patch(&self, path: &str, body: &Value) -> StoreResult<Value> {
        let started_at = Instant::now();
        let result = self
            .agent
            .patch(&self.url(path))
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
            .send_json(body);
        finish("PATCH", path, started_at, result)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Follows `next_cursor` until exhausted, collecting `results`.
    fn post_paginated(&self, path: &str, mut body: Value) -> StoreResult<Vec<Value>> {
        let mut results = Vec::new();
        for _ in 0..MAX_RESULT_PAGES {
            let page = self.post(path, &body)?;
            if let Some(items) = page.get("results").and_then(Value::as_array) {
                results.extend(items.iter().cloned());
            }
            let next = page
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                .then(|| page.get("next_cursor").and_then(Value::as_str))
                .flatten();
            match next {
                Some(cursor) => body["start_cursor"] = json!(cursor),
                None => return Ok(results),
            }
        }
        debug!("event=store_paginate module=notion status=truncated path={path}");
        Ok(results)
    }
}

impl ContentRepository for NotionContentRepository {
    fn create(&self, draft: &ResourceDraft) -> StoreResult<Resource> {
        let body = match draft.kind {
            ResourceKind::Database => {
                let mut properties = Map::new();
                for (name, spec) in &draft.properties {
                    spec.validate()?;
                    properties.insert(name.clone(), encode_spec(spec));
                }
                json!({
                    "parent": encode_parent(draft.parent),
                    "title": rich_text(&draft.title),
                    "properties": properties,
                })
            }
            ResourceKind::Page => {
                let mut properties = encode_values(&draft.values);
                if !has_title_value(&draft.values) {
                    properties.insert("title".to_string(), json!({ "title": rich_text(&draft.title) }));
                }
                json!({
                    "parent": encode_parent(draft.parent),
                    "properties": properties,
                })
            }
        };
        let path = match draft.kind {
            ResourceKind::Database => "/databases",
            ResourceKind::Page => "/pages",
        };
        decode_resource(&self.post(path, &body)?)
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> StoreResult<Resource> {
        let body = match kind {
            ResourceKind::Database => {
                let mut body = Map::new();
                if let Some(title) = &patch.title {
                    body.insert("title".to_string(), rich_text(title));
                }
                if !patch.properties.is_empty() {
                    let mut properties = Map::new();
                    for (name, spec) in &patch.properties {
                        spec.validate()?;
                        properties.insert(name.clone(), encode_spec(spec));
                    }
                    body.insert("properties".to_string(), Value::Object(properties));
                }
                Value::Object(body)
            }
            ResourceKind::Page => {
                let mut properties = encode_values(&patch.values);
                if let Some(title) = patch.title.as_ref().filter(|_| !has_title_value(&patch.values)) {
                    properties.insert("title".to_string(), json!({ "title": rich_text(title) }));
                }
                json!({ "properties": properties })
            }
        };
        decode_resource(&self.patch(&object_path(kind, id), &body)?)
    }

    fn retrieve(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<Resource> {
        decode_resource(&self.get(&object_path(kind, id))?)
    }

    fn search(&self, query: &str, kind: ResourceKind) -> StoreResult<Vec<Resource>> {
        let body = json!({
            "query": query,
            "filter": { "value": kind.as_str(), "property": "object" },
            "page_size": QUERY_PAGE_SIZE,
        });
        self.post_paginated("/search", body)?
            .iter()
            .filter(|item| item.get("object").and_then(Value::as_str) == Some(kind.as_str()))
            .map(decode_resource)
            .collect()
    }

    fn archive(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<()> {
        match kind {
            ResourceKind::Database => Err(StoreError::Unsupported(
                "archiving databases in place".to_string(),
            )),
            ResourceKind::Page => {
                self.patch(&object_path(kind, id), &json!({ "archived": true }))?;
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
        let body = json!({ "parent": encode_parent(Parent::Page(new_parent)) });
        self.patch(&object_path(kind, id), &body)?;
        Ok(())
    }

    fn list_children(&self, id: ResourceId, page_size: u32) -> StoreResult<Vec<ChildBlock>> {
        let page_size = page_size.clamp(1, QUERY_PAGE_SIZE);
        let body = self.get(&format!("/blocks/{id}/children?page_size={page_size}"))?;
        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(decode_child_block).collect())
            .unwrap_or_default())
    }

    fn query_records(
        &self,
        database_id: ResourceId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Resource>> {
        let filter = match filter {
            RecordFilter::DateEquals { property, date } => json!({
                "property": property,
                "date": { "equals": iso_date::format(*date) },
            }),
        };
        let body = json!({
            "filter": filter,
            "sorts": [{ "timestamp": "last_edited_time", "direction": "descending" }],
            "page_size": QUERY_PAGE_SIZE,
        });
        self.post_paginated(&format!("/databases/{database_id}/query"), body)?
            .iter()
            .map(decode_resource)
            .collect()
    }
}

fn finish(
    method: &str,
    path: &str,
    started_at: Instant,
    result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> StoreResult<Value> {
    let mut response = result.map_err(|err| {
        debug!(
            "event=store_request module=notion status=error method={} path={} duration_ms={} error={}",
            method,
            path,
            started_at.elapsed().as_millis(),
            err
        );
        StoreError::Transport(err.to_string())
    })?;
    let status = response.status().as_u16();
    debug!(
        "event=store_request module=notion status=ok method={} path={} http_status={} duration_ms={}",
        method,
        path,
        status,
        started_at.elapsed().as_millis()
    );

    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|err| StoreError::Transport(err.to_string()))?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    if (200..300).contains(&status) {
        if body.is_null() {
            return Err(StoreError::InvalidData(format!(
                "{method} {path} returned a non-JSON body"
            )));
        }
        return Ok(body);
    }

    let code = body
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(text);
    Err(StoreError::Rejected {
        status,
        code,
        message,
    })
}

fn object_path(kind: ResourceKind, id: ResourceId) -> String {
    match kind {
        ResourceKind::Database => format!("/databases/{id}"),
        ResourceKind::Page => format!("/pages/{id}"),
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn encode_parent(parent: Parent) -> Value {
    match parent {
        Parent::Workspace => json!({ "type": "workspace", "workspace": true }),
        Parent::Page(id) => json!({ "type": "page_id", "page_id": id.to_string() }),
        Parent::Database(id) => json!({ "type": "database_id", "database_id": id.to_string() }),
    }
}

fn encode_spec(spec: &PropertySpec) -> Value {
    match spec {
        PropertySpec::Select { options } => json!({
            "select": {
                "options": options.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
            }
        }),
        PropertySpec::Relation { database_id, mode } => match mode {
            RelationMode::Single => json!({
                "relation": {
                    "database_id": database_id.to_string(),
                    "type": "single_property",
                    "single_property": {},
                }
            }),
            RelationMode::Dual {
                synced_property_id,
                synced_property_name,
            } => json!({
                "relation": {
                    "database_id": database_id.to_string(),
                    "type": "dual_property",
                    "dual_property": {
                        "synced_property_id": synced_property_id,
                        "synced_property_name": synced_property_name,
                    },
                }
            }),
        },
        PropertySpec::Rollup {
            relation_property,
            rollup_property,
            function,
        } => json!({
            "rollup": {
                "relation_property_name": relation_property,
                "rollup_property_name": rollup_property,
                "function": function.as_str(),
            }
        }),
        PropertySpec::Formula { expression } => json!({
            "formula": { "expression": expression }
        }),
        other => {
            let mut object = Map::new();
            object.insert(other.type_name().to_string(), json!({}));
            Value::Object(object)
        }
    }
}

/// Records carry their title under the database's own title property name.
fn has_title_value(values: &BTreeMap<String, PropertyValue>) -> bool {
    values
        .values()
        .any(|value| matches!(value, PropertyValue::Title(_)))
}

fn encode_values(values: &BTreeMap<String, PropertyValue>) -> Map<String, Value> {
    values
        .iter()
        .map(|(name, value)| {
            let encoded = match value {
                PropertyValue::Title(text) => json!({ "title": rich_text(text) }),
                PropertyValue::RichText(text) => json!({ "rich_text": rich_text(text) }),
                PropertyValue::Number(number) => json!({ "number": number }),
                PropertyValue::Checkbox(checked) => json!({ "checkbox": checked }),
                PropertyValue::Select(option) => json!({ "select": { "name": option } }),
                PropertyValue::Url(url) => json!({ "url": url }),
                PropertyValue::Email(email) => json!({ "email": email }),
                PropertyValue::Date(date) => json!({ "date": { "start": iso_date::format(*date) } }),
                PropertyValue::Relation(ids) => json!({
                    "relation": ids.iter().map(|id| json!({ "id": id.to_string() })).collect::<Vec<_>>()
                }),
            };
            (name.clone(), encoded)
        })
        .collect()
}

fn decode_resource(value: &Value) -> StoreResult<Resource> {
    let kind = match value.get("object").and_then(Value::as_str) {
        Some("database") => ResourceKind::Database,
        Some("page") => ResourceKind::Page,
        other => {
            return Err(StoreError::InvalidData(format!(
                "unexpected object type `{}`",
                other.unwrap_or("missing")
            )));
        }
    };
    let id = decode_id(value.get("id"))?;
    let parent = decode_parent(value.get("parent"))?;
    let archived = value
        .get("archived")
        .or_else(|| value.get("in_trash"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let last_edited_time = value
        .get("last_edited_time")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidData(format!("{id} has no last_edited_time")))
        .and_then(|text| {
            OffsetDateTime::parse(text, &Rfc3339).map_err(|err| {
                StoreError::InvalidData(format!("invalid last_edited_time `{text}`: {err}"))
            })
        })?;

    let empty = Map::new();
    let raw_properties = value
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut resource = Resource {
        id,
        kind,
        title: String::new(),
        parent,
        archived,
        last_edited_time,
        properties: BTreeMap::new(),
        values: BTreeMap::new(),
    };

    match kind {
        ResourceKind::Database => {
            resource.title = plain_text(value.get("title"));
            for (name, raw) in raw_properties {
                if let Some(schema) = decode_schema(raw) {
                    resource.properties.insert(name.clone(), schema);
                } else {
                    debug!("event=store_decode module=notion status=skipped property={name}");
                }
            }
        }
        ResourceKind::Page => {
            for (name, raw) in raw_properties {
                if raw.get("type").and_then(Value::as_str) == Some("title") {
                    resource.title = plain_text(raw.get("title"));
                }
                if let Some(decoded) = decode_value(raw) {
                    resource.values.insert(name.clone(), decoded);
                }
            }
        }
    }
    Ok(resource)
}

fn decode_id(value: Option<&Value>) -> StoreResult<ResourceId> {
    let text = value
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidData("object has no id".to_string()))?;
    Uuid::parse_str(text).map_err(|_| StoreError::InvalidData(format!("invalid id `{text}`")))
}

fn decode_parent(value: Option<&Value>) -> StoreResult<Parent> {
    let Some(parent) = value else {
        return Ok(Parent::Workspace);
    };
    match parent.get("type").and_then(Value::as_str) {
        Some("page_id") => Ok(Parent::Page(decode_id(parent.get("page_id"))?)),
        Some("database_id") => Ok(Parent::Database(decode_id(parent.get("database_id"))?)),
        _ => Ok(Parent::Workspace),
    }
}

fn decode_schema(raw: &Value) -> Option<PropertySchema> {
    let id = raw.get("id")?.as_str()?.to_string();
    let type_name = raw.get("type")?.as_str()?;
    let body = raw.get(type_name);
    let spec = match type_name {
        "title" => PropertySpec::Title,
        "rich_text" => PropertySpec::RichText,
        "number" => PropertySpec::Number,
        "date" => PropertySpec::Date,
        "checkbox" => PropertySpec::Checkbox,
        "url" => PropertySpec::Url,
        "email" => PropertySpec::Email,
        "files" => PropertySpec::Files,
        "created_time" => PropertySpec::CreatedTime,
        "last_edited_time" => PropertySpec::LastEditedTime,
        "select" => PropertySpec::Select {
            options: body?
                .get("options")?
                .as_array()?
                .iter()
                .filter_map(|option| option.get("name")?.as_str().map(str::to_string))
                .collect(),
        },
        "relation" => {
            let body = body?;
            let database_id = Uuid::parse_str(body.get("database_id")?.as_str()?).ok()?;
            let mode = match body.get("type").and_then(Value::as_str) {
                Some("dual_property") => {
                    let dual = body.get("dual_property")?;
                    RelationMode::Dual {
                        synced_property_id: dual.get("synced_property_id")?.as_str()?.to_string(),
                        synced_property_name: dual
                            .get("synced_property_name")?
                            .as_str()?
                            .to_string(),
                    }
                }
                _ => RelationMode::Single,
            };
            PropertySpec::Relation { database_id, mode }
        }
        "rollup" => {
            let body = body?;
            PropertySpec::Rollup {
                relation_property: body.get("relation_property_name")?.as_str()?.to_string(),
                rollup_property: body.get("rollup_property_name")?.as_str()?.to_string(),
                function: RollupFunction::parse(body.get("function")?.as_str()?)?,
            }
        }
        "formula" => PropertySpec::Formula {
            expression: body?.get("expression")?.as_str()?.to_string(),
        },
        _ => return None,
    };
    Some(PropertySchema { id, spec })
}

fn decode_value(raw: &Value) -> Option<PropertyValue> {
    let type_name = raw.get("type")?.as_str()?;
    let body = raw.get(type_name)?;
    match type_name {
        "title" => Some(PropertyValue::Title(plain_text(Some(body)))),
        "rich_text" => Some(PropertyValue::RichText(plain_text(Some(body)))),
        "number" => body.as_f64().map(PropertyValue::Number),
        "checkbox" => body.as_bool().map(PropertyValue::Checkbox),
        "select" => body
            .get("name")?
            .as_str()
            .map(|name| PropertyValue::Select(name.to_string())),
        "url" => body.as_str().map(|url| PropertyValue::Url(url.to_string())),
        "email" => body
            .as_str()
            .map(|email| PropertyValue::Email(email.to_string())),
        "date" => {
            let start = body.get("start")?.as_str()?;
            let day = start.get(..10)?;
            iso_date::parse(day).ok().map(PropertyValue::Date)
        }
        "relation" => Some(PropertyValue::Relation(
            body.as_array()?
                .iter()
                .filter_map(|item| Uuid::parse_str(item.get("id")?.as_str()?).ok())
                .collect(),
        )),
        _ => None,
    }
}

fn decode_child_block(raw: &Value) -> Option<ChildBlock> {
    let block_type = raw.get("type")?.as_str()?.to_string();
    let title = raw
        .get(&block_type)
        .and_then(|body| body.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ChildBlock {
        id: raw.get("id")?.as_str()?.to_string(),
        block_type,
        title,
    })
}

fn plain_text(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    part.get("plain_text")
                        .or_else(|| part.get("text").and_then(|text| text.get("content")))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{decode_child_block, decode_resource, encode_spec, encode_values};
    use crate::model::resource::{Parent, PropertyValue, ResourceKind};
    use crate::model::schema::{PropertySpec, RelationMode, RollupFunction};
    use serde_json::json;
    use std::collections::BTreeMap;
    use time::macros::date;
    use uuid::Uuid;

    #[test]
    fn decodes_database_with_dual_relation() {
        let db_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let target_id = Uuid::new_v4();
        let raw = json!({
            "object": "database",
            "id": db_id.to_string(),
            "parent": { "type": "page_id", "page_id": parent_id.to_string() },
            "archived": false,
            "last_edited_time": "2024-01-05T10:20:00.000Z",
            "title": [{ "plain_text": "Night Desk — ", "type": "text" }, { "plain_text": "Tasks" }],
            "properties": {
                "Name": { "id": "title", "type": "title", "title": {} },
                "Project": {
                    "id": "a%3Ab",
                    "type": "relation",
                    "relation": {
                        "database_id": target_id.to_string(),
                        "type": "dual_property",
                        "dual_property": { "synced_property_id": "xyz", "synced_property_name": "Tasks" }
                    }
                },
                "Assignee": { "id": "p", "type": "people", "people": {} }
            }
        });

        let resource = decode_resource(&raw).unwrap();
        assert_eq!(resource.kind, ResourceKind::Database);
        assert_eq!(resource.title, "Night Desk — Tasks");
        assert_eq!(resource.parent, Parent::Page(parent_id));
        assert_eq!(resource.property_id("Project"), Some("a%3Ab"));
        assert_eq!(
            resource.properties["Project"].spec,
            PropertySpec::Relation {
                database_id: target_id,
                mode: RelationMode::Dual {
                    synced_property_id: "xyz".to_string(),
                    synced_property_name: "Tasks".to_string(),
                },
            }
        );
        assert!(!resource.properties.contains_key("Assignee"));
    }

    #[test]
    fn decodes_record_page_title_and_date() {
        let raw = json!({
            "object": "page",
            "id": Uuid::new_v4().to_string(),
            "parent": { "type": "database_id", "database_id": Uuid::new_v4().to_string() },
            "archived": false,
            "last_edited_time": "2024-01-05T10:20:00.000Z",
            "properties": {
                "Name": { "id": "title", "type": "title", "title": [{ "plain_text": "Write intro" }] },
                "Resurface On": { "id": "r", "type": "date", "date": { "start": "2024-01-06" } },
                "Due": { "id": "d", "type": "date", "date": null }
            }
        });

        let resource = decode_resource(&raw).unwrap();
        assert_eq!(resource.title, "Write intro");
        assert_eq!(resource.date_value("Resurface On"), Some(date!(2024 - 01 - 06)));
        assert_eq!(resource.date_value("Due"), None);
    }

    #[test]
    fn rejects_unknown_object_type() {
        let err = decode_resource(&json!({ "object": "block", "id": "x" })).unwrap_err();
        assert!(err.to_string().contains("unexpected object type"));
    }

    #[test]
    fn encodes_relation_modes_and_rollups() {
        let target = Uuid::new_v4();
        let single = encode_spec(&PropertySpec::relation(target));
        assert_eq!(single["relation"]["type"], "single_property");
        assert_eq!(single["relation"]["database_id"], target.to_string());

        let dual = encode_spec(&PropertySpec::dual_relation(target, "abc", "Tasks").unwrap());
        assert_eq!(dual["relation"]["dual_property"]["synced_property_id"], "abc");

        let rollup = encode_spec(
            &PropertySpec::rollup("Tasks", "Completed On", RollupFunction::PercentNotEmpty)
                .unwrap(),
        );
        assert_eq!(rollup["rollup"]["function"], "percent_not_empty");

        assert_eq!(encode_spec(&PropertySpec::Checkbox), json!({ "checkbox": {} }));
    }

    #[test]
    fn encodes_date_values_as_calendar_day() {
        let mut values = BTreeMap::new();
        values.insert(
            "Resurface On".to_string(),
            PropertyValue::Date(date!(2024 - 01 - 06)),
        );
        let encoded = encode_values(&values);
        assert_eq!(encoded["Resurface On"]["date"]["start"], "2024-01-06");
    }

    #[test]
    fn decodes_child_page_blocks() {
        let block = decode_child_block(&json!({
            "id": "b1",
            "type": "child_page",
            "child_page": { "title": "Scene" }
        }))
        .unwrap();
        assert_eq!(block.block_type, "child_page");
        assert_eq!(block.title.as_deref(), Some("Scene"));
    }
}
