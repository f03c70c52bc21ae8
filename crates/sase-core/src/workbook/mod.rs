//! Workbook template model.
//!
//! Templates are pulled from every configured SOAR server, merged into a
//! single reconciled set (see [`reconcile`]) and pushed back out so all
//! servers carry the same workbooks. A template that disappears from its
//! server is kept as a tombstone (`status = deleted`) rather than dropped,
//! so a later restore can bring it back with its previous status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

pub mod reconcile;

/// Lifecycle state of a workbook template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkbookStatus {
    Published,
    Draft,
    Deleted,
    /// Editor-only request to drop the tombstone from the stored set.
    Purge,
}

/// Which server a merged template originally came from, so pushes can
/// address it by id instead of by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRef {
    pub ph_auth_config_id: String,
    pub workbook_template_id: i64,
}

/// One workbook template in the reconciled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_note_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkbookStatus>,
    /// Status before this template was tombstoned; used to restore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_state: Option<WorkbookStatus>,
    /// Set when a name collision forced a `{name}_{n}` rename.
    #[serde(
        rename = "_original_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_name: Option<String>,
    #[serde(
        rename = "_originating_server",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub origins: Vec<OriginRef>,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub sla: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub sla_type: Value,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A phase task. SOAR attaches free-form fields beyond the documented set,
/// so unrecognized keys ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub owner: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub role: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub sla: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub suggestions: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields that do not determine whether two templates are "the same
/// workbook": server bookkeeping, ids and rename markers.
const NONDETERMINING_FIELDS: [&str; 6] = [
    "_originating_server",
    "id",
    "template",
    "phase",
    "creator",
    "_original_name",
];

const WORKBOOK_POST_FIELDS: [&str; 4] = ["name", "description", "is_default", "is_note_required"];
const PHASE_POST_FIELDS: [&str; 2] = ["name", "order"];
const TASK_POST_FIELDS: [&str; 6] = ["name", "description", "order", "owner", "role", "sla"];

impl WorkbookTemplate {
    /// A JSON projection with the nondetermining fields removed at the
    /// workbook, phase and task levels. Two templates with equal sanitized
    /// forms are treated as the same workbook during reconciliation.
    pub fn sanitized(&self) -> CoreResult<Value> {
        let mut value = serde_json::to_value(self)?;
        strip_fields(&mut value);
        if let Some(phases) = value.get_mut("phases").and_then(Value::as_array_mut) {
            for phase in phases {
                strip_fields(phase);
                if let Some(tasks) = phase.get_mut("tasks").and_then(Value::as_array_mut) {
                    for task in tasks {
                        strip_fields(task);
                    }
                }
            }
        }
        Ok(value)
    }

    /// Whether this template carries the same content as `other`, ignoring
    /// server bookkeeping.
    pub fn same_content(&self, other: &WorkbookTemplate) -> CoreResult<bool> {
        Ok(self.sanitized()? == other.sanitized()?)
    }

    /// The origin reference for a particular server, when one is recorded.
    pub fn origin_for(&self, config_id: &str) -> Option<&OriginRef> {
        self.origins
            .iter()
            .find(|o| o.ph_auth_config_id == config_id)
    }

    /// Marks the template deleted, remembering the current status so a
    /// restore can put it back. A no-op on an already-deleted template.
    pub fn tombstone(&mut self) {
        if self.status != Some(WorkbookStatus::Deleted) {
            self.prev_state = self.status;
            self.status = Some(WorkbookStatus::Deleted);
        }
    }

    /// The POST body sent to `/rest/workbook_template`: the allow-listed
    /// workbook fields, phases reduced to name and order, and tasks reduced
    /// to their documented fields merged with any suggestions. Empty task
    /// fields are dropped.
    pub fn post_body(&self) -> CoreResult<Value> {
        let value = serde_json::to_value(self)?;
        let Value::Object(source) = value else {
            return Err(CoreError::Internal("workbook did not serialize to an object".into()));
        };
        let mut body = Map::new();
        for field in WORKBOOK_POST_FIELDS {
            if let Some(v) = source.get(field) {
                body.insert(field.to_string(), v.clone());
            }
        }
        let mut phases = Vec::new();
        for phase in &self.phases {
            let phase_value = serde_json::to_value(phase)?;
            let mut out_phase = Map::new();
            for field in PHASE_POST_FIELDS {
                if let Some(v) = phase_value.get(field) {
                    out_phase.insert(field.to_string(), v.clone());
                }
            }
            let mut tasks = Vec::new();
            for task in &phase.tasks {
                let task_value = serde_json::to_value(task)?;
                let mut out_task = Map::new();
                if let Value::Object(fields) = task_value {
                    for field in TASK_POST_FIELDS {
                        if let Some(v) = fields.get(field) {
                            if is_meaningful(v) {
                                out_task.insert(field.to_string(), v.clone());
                            }
                        }
                    }
                }
                for (k, v) in &task.suggestions {
                    out_task.insert(k.clone(), v.clone());
                }
                tasks.push(Value::Object(out_task));
            }
            out_phase.insert("tasks".to_string(), Value::Array(tasks));
            phases.push(Value::Object(out_phase));
        }
        if !phases.is_empty() {
            body.insert("phases".to_string(), Value::Array(phases));
        }
        Ok(Value::Object(body))
    }
}

fn strip_fields(value: &mut Value) {
    if let Value::Object(map) = value {
        for field in NONDETERMINING_FIELDS {
            map.remove(field);
        }
    }
}

/// Empty strings, nulls, zeroes and empty collections are not worth
/// sending to the server.
fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A raw template row from a server's `/rest/workbook_template` listing,
/// before it is folded into the reconciled set.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerTemplate {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_note_required: bool,
    #[serde(default)]
    pub status: Option<WorkbookStatus>,
}

/// Splits a reconciled set into the tombstoned templates (to delete on
/// each server) and the live ones (to create or update).
pub fn split_for_push(
    workbooks: &BTreeMap<String, WorkbookTemplate>,
) -> (Vec<WorkbookTemplate>, Vec<WorkbookTemplate>) {
    let (deleted, live): (Vec<_>, Vec<_>) = workbooks
        .values()
        .cloned()
        .partition(|w| w.status == Some(WorkbookStatus::Deleted));
    (deleted, live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn template(name: &str, status: WorkbookStatus) -> WorkbookTemplate {
        WorkbookTemplate {
            name: name.to_string(),
            id: Some(7),
            description: "desc".to_string(),
            is_default: false,
            is_note_required: false,
            status: Some(status),
            prev_state: None,
            original_name: None,
            origins: vec![OriginRef {
                ph_auth_config_id: "abc".to_string(),
                workbook_template_id: 7,
            }],
            phases: Vec::new(),
        }
    }

    #[test]
    fn test_sanitized_ignores_server_bookkeeping() {
        let mut a = template("triage", WorkbookStatus::Published);
        let mut b = template("triage", WorkbookStatus::Published);
        b.id = Some(99);
        b.origins = vec![OriginRef {
            ph_auth_config_id: "other".to_string(),
            workbook_template_id: 99,
        }];
        b.original_name = Some("old triage".to_string());
        assert!(a.same_content(&b).unwrap());

        b.description = "changed".to_string();
        assert!(!a.same_content(&b).unwrap());

        // Status does count.
        b.description = "desc".to_string();
        a.status = Some(WorkbookStatus::Draft);
        assert!(!a.same_content(&b).unwrap());
    }

    #[test]
    fn test_tombstone_records_previous_status() {
        let mut wb = template("triage", WorkbookStatus::Published);
        wb.tombstone();
        assert_eq!(wb.status, Some(WorkbookStatus::Deleted));
        assert_eq!(wb.prev_state, Some(WorkbookStatus::Published));

        // Tombstoning twice must not clobber the remembered status.
        wb.tombstone();
        assert_eq!(wb.prev_state, Some(WorkbookStatus::Published));
    }

    #[test]
    fn test_post_body_allow_lists_fields() {
        let mut wb = template("triage", WorkbookStatus::Published);
        wb.phases = vec![Phase {
            name: "containment".to_string(),
            id: Some(3),
            template: Some(7),
            order: Some(1),
            sla: Value::Null,
            sla_type: Value::Null,
            tasks: vec![Task {
                name: "block ip".to_string(),
                description: Some(String::new()),
                order: Some(1),
                owner: Value::Null,
                role: json!("analyst"),
                sla: Value::Null,
                suggestions: json!({"actions": ["block ip"]})
                    .as_object()
                    .unwrap()
                    .clone(),
                extra: Map::new(),
            }],
        }];

        let body = wb.post_body().unwrap();
        assert_eq!(
            body,
            json!({
                "name": "triage",
                "description": "desc",
                "is_default": false,
                "is_note_required": false,
                "phases": [{
                    "name": "containment",
                    "order": 1,
                    "tasks": [{
                        "name": "block ip",
                        "order": 1,
                        "role": "analyst",
                        "actions": ["block ip"]
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_split_for_push() {
        let mut set = BTreeMap::new();
        set.insert(
            "a".to_string(),
            template("a", WorkbookStatus::Published),
        );
        set.insert("b".to_string(), template("b", WorkbookStatus::Deleted));
        let (deleted, live) = split_for_push(&set);
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].name, "b");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "a");
    }
}
