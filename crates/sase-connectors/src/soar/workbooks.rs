//! Workbook template traffic against one SOAR server: paged fetch of
//! templates and phases, batched create/update/delete pushes.
//!
//! The merge rules themselves live in `sase_core::workbook::reconcile`;
//! this module only moves template sets over the wire. POST and DELETE go
//! out in batches of 100 and the server answers one result object per
//! batch item.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use sase_core::workbook::reconcile::{fold_server_template, DeletePlan, PushPlan};
use sase_core::workbook::{Phase, ServerTemplate, WorkbookTemplate};

use crate::error::{ConnectorError, ConnectorResult};
use crate::soar::SoarClient;

/// POST/DELETE batch size.
const BATCH_SIZE: usize = 100;

/// The per-item DELETE answer for an id that is already gone; treated as
/// success so re-runs converge.
const ITEM_NOT_FOUND: &str = "Requested item not found";

impl SoarClient {
    /// Fetches every workbook template on this server, folded into the
    /// suffix-deduplicated per-server map the reconciler consumes.
    /// Phases are not filled in; [`fetch_phases`](Self::fetch_phases)
    /// loads them per template.
    #[instrument(skip(self, last_sync_names), fields(server = %self.server()))]
    pub async fn fetch_templates(
        &self,
        last_sync_names: &BTreeSet<String>,
    ) -> ConnectorResult<BTreeMap<String, WorkbookTemplate>> {
        let rows = self.get_paged("/rest/workbook_template", &[]).await?;
        let mut results = BTreeMap::new();
        for row in rows {
            let row: ServerTemplate = serde_json::from_value(row)?;
            fold_server_template(&mut results, row, self.config_id(), last_sync_names);
        }
        debug!(count = results.len(), "workbook templates fetched");
        Ok(results)
    }

    /// Fetches the phases of one template in display order. Task and
    /// phase timestamps are server bookkeeping and are stripped so they
    /// can't defeat content comparison.
    pub async fn fetch_phases(&self, template_id: i64) -> ConnectorResult<Vec<Phase>> {
        let extra = [
            ("_filter_template", template_id.to_string()),
            ("order", "asc".to_string()),
        ];
        let rows = self
            .get_paged("/rest/workbook_phase_template", &extra)
            .await?;
        let mut phases = Vec::with_capacity(rows.len());
        for mut row in rows {
            strip_timestamps(&mut row);
            phases.push(serde_json::from_value(row)?);
        }
        Ok(phases)
    }

    /// Fetches templates with their phases attached.
    pub async fn fetch_templates_with_phases(
        &self,
        last_sync_names: &BTreeSet<String>,
    ) -> ConnectorResult<BTreeMap<String, WorkbookTemplate>> {
        let mut templates = self.fetch_templates(last_sync_names).await?;
        for template in templates.values_mut() {
            if let Some(id) = template.id {
                template.phases = self.fetch_phases(id).await?;
            }
        }
        Ok(templates)
    }

    /// Current id-to-name map of this server's templates, fetched in one
    /// unpaged request, for resolving updates against creates.
    pub async fn template_map(&self) -> ConnectorResult<BTreeMap<i64, String>> {
        let response = self
            .get("/rest/workbook_template", &[("page_size", "0".to_string())])
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        let mut map = BTreeMap::new();
        for row in body.get("data").and_then(Value::as_array).into_iter().flatten() {
            if let (Some(id), Some(name)) = (
                row.get("id").and_then(Value::as_i64),
                row.get("name").and_then(Value::as_str),
            ) {
                map.insert(id, name.to_string());
            }
        }
        Ok(map)
    }

    /// Lands a push plan on this server. Updates whose per-item answer
    /// reports failure are retried as creates, covering templates that
    /// were deleted server-side between planning and posting. Returns the
    /// per-workbook error messages.
    #[instrument(skip(self, plan), fields(server = %self.server()))]
    pub async fn push_templates(&self, plan: PushPlan) -> ConnectorResult<Vec<String>> {
        let mut errors = Vec::new();
        let mut creates = plan.creates;

        for batch in plan.updates.chunks(BATCH_SIZE) {
            let results = self.post_template_batch(batch).await?;
            for (body, result) in batch.iter().zip(results) {
                if !result.success {
                    let name = body_name(body);
                    warn!(workbook = %name, "update refused, retrying as create");
                    let mut body = body.clone();
                    if let Value::Object(map) = &mut body {
                        map.remove("id");
                    }
                    creates.push(body);
                }
            }
        }

        info!(creates = creates.len(), "pushing new workbook templates");
        for batch in creates.chunks(BATCH_SIZE) {
            let results = self.post_template_batch(batch).await?;
            for (body, result) in batch.iter().zip(results) {
                if !result.success {
                    errors.push(format!(
                        "Workbook '{}': {}\n",
                        body_name(body),
                        result.message
                    ));
                }
            }
        }
        Ok(errors)
    }

    /// Lands a delete plan on this server in batches. Already-deleted ids
    /// answer [`ITEM_NOT_FOUND`], which counts as success. Returns the
    /// per-workbook error messages, seeded with the plan's refusals.
    #[instrument(skip(self, plan), fields(server = %self.server()))]
    pub async fn delete_templates(&self, plan: &DeletePlan) -> ConnectorResult<Vec<String>> {
        let mut errors = plan.errors.clone();
        for (batch_start, batch) in plan
            .ids
            .chunks(BATCH_SIZE)
            .enumerate()
            .map(|(i, c)| (i * BATCH_SIZE, c))
        {
            let body = serde_json::json!({ "ids": batch });
            let response = self.delete("/rest/workbook_template", &body).await?;
            let results: Vec<BatchItemResult> = response
                .json::<Vec<Value>>()
                .await
                .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?
                .into_iter()
                .map(BatchItemResult::from)
                .collect();
            for (offset, result) in results.iter().enumerate() {
                if !result.success && result.message != ITEM_NOT_FOUND {
                    let name = plan
                        .names
                        .get(batch_start + offset)
                        .cloned()
                        .unwrap_or_else(|| batch.get(offset).map(i64::to_string).unwrap_or_default());
                    errors.push(format!("Workbook '{}': {}\n", name, result.message));
                }
            }
        }
        Ok(errors)
    }

    async fn post_template_batch(&self, batch: &[Value]) -> ConnectorResult<Vec<BatchItemResult>> {
        let (status, answer) = self
            .post_raw("/rest/workbook_template", &Value::Array(batch.to_vec()))
            .await?;
        match answer {
            Value::Array(items) => Ok(items.into_iter().map(BatchItemResult::from).collect()),
            other => {
                // A whole-batch refusal answers a single object; spread it
                // over every item so each workbook reports the failure.
                let result = BatchItemResult {
                    success: status == 200,
                    message: other
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Failed")
                        .to_string(),
                };
                Ok(vec![result; batch.len()])
            }
        }
    }
}

/// One entry of a batched POST/DELETE answer.
#[derive(Debug, Clone)]
struct BatchItemResult {
    success: bool,
    message: String,
}

impl From<Value> for BatchItemResult {
    fn from(value: Value) -> Self {
        match &value {
            // DELETE answers bare strings for failed items.
            Value::String(message) => BatchItemResult {
                success: false,
                message: message.clone(),
            },
            _ => BatchItemResult {
                success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        }
    }
}

fn body_name(body: &Value) -> String {
    body.get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn strip_timestamps(row: &mut Value) {
    if let Value::Object(map) = row {
        map.remove("create_time");
        map.remove("modified_time");
        if let Some(Value::Array(tasks)) = map.get_mut("tasks") {
            for task in tasks {
                if let Value::Object(task) = task {
                    task.remove("create_time");
                    task.remove("modified_time");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soar::tests::test_client;
    use sase_core::workbook::WorkbookStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_templates_folds_rows() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/workbook_template")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "count": 2,
                    "num_pages": 1,
                    "data": [
                        {"id": 7, "name": "triage", "description": "d", "is_default": true,
                         "is_note_required": false, "status": "published"},
                        {"id": 8, "name": "gone", "status": "deleted"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let templates = test_client(&server.url(), "tok")
            .fetch_templates(&BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(templates.len(), 1);
        let triage = &templates["triage"];
        assert_eq!(triage.id, Some(7));
        assert_eq!(triage.status, Some(WorkbookStatus::Published));
        assert_eq!(triage.origins[0].ph_auth_config_id, "abc");
    }

    #[tokio::test]
    async fn test_fetch_phases_strips_timestamps() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/workbook_phase_template")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "count": 1,
                    "num_pages": 1,
                    "data": [{
                        "name": "Identify", "id": 3, "template": 7, "order": 1,
                        "sla": null, "sla_type": null,
                        "create_time": "2026-01-01T00:00:00Z",
                        "modified_time": "2026-01-02T00:00:00Z",
                        "tasks": [{
                            "name": "Scope the incident", "description": "", "order": 1,
                            "owner": null, "role": null, "sla": null,
                            "suggestions": {},
                            "create_time": "2026-01-01T00:00:00Z",
                            "modified_time": "2026-01-02T00:00:00Z"
                        }]
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let phases = test_client(&server.url(), "tok").fetch_phases(7).await.unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].tasks.len(), 1);
        assert!(!phases[0].tasks[0].extra.contains_key("create_time"));
    }

    #[tokio::test]
    async fn test_push_retries_failed_update_as_create() {
        let mut server = mockito::Server::new_async().await;
        let _post = server
            .mock("POST", "/rest/workbook_template")
            .with_status(200)
            .with_body(json!([{"success": false, "message": "gone"}]).to_string())
            .expect(2)
            .create_async()
            .await;

        // The second POST answers failure again, so the create lands in
        // the error list rather than looping.
        let plan = PushPlan {
            updates: vec![json!({"name": "triage", "id": 7})],
            creates: Vec::new(),
        };
        let errors = test_client(&server.url(), "tok")
            .push_templates(plan)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Workbook 'triage'"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_item_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _del = server
            .mock("DELETE", "/rest/workbook_template")
            .with_status(200)
            .with_body(
                json!([{"success": true}, "Requested item not found", "locked"]).to_string(),
            )
            .create_async()
            .await;

        let plan = DeletePlan {
            ids: vec![1, 2, 3],
            names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            errors: vec!["Workbook 'Default': Default workbook cannot be deleted\n".to_string()],
        };
        let errors = test_client(&server.url(), "tok")
            .delete_templates(&plan)
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("Workbook 'c': locked"));
    }
}
