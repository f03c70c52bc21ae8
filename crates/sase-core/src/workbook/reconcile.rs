//! Merge rules for building one canonical workbook set out of the
//! template sets of several SOAR servers.
//!
//! The default server's set is authoritative. Every other server's
//! templates are folded in one at a time with [`create_unique_workbook`]:
//! identical content merges, colliding names get a numeric suffix, and
//! anything already settled by a previous sync stays put. Templates that
//! vanished upstream are tombstoned rather than dropped so the history
//! survives a server outage.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::error::CoreResult;
use crate::workbook::{
    OriginRef, ServerTemplate, WorkbookStatus, WorkbookTemplate,
};

/// First `{base}_{n}` (n starting at 1) not present in `taken`.
pub fn first_free_name(base: &str, taken: &BTreeSet<String>) -> String {
    let mut count = 1;
    loop {
        let candidate = format!("{base}_{count}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        count += 1;
    }
}

/// Folds one raw listing row from a server's template fetch into that
/// server's result map. Duplicate names within the same fetch get the
/// numeric-suffix treatment immediately, before cross-server merging.
pub fn fold_server_template(
    results: &mut BTreeMap<String, WorkbookTemplate>,
    row: ServerTemplate,
    config_id: &str,
    last_sync_names: &BTreeSet<String>,
) {
    if row.status == Some(WorkbookStatus::Deleted) {
        return;
    }
    if results.contains_key(&row.name) {
        let mut taken: BTreeSet<String> = results.keys().cloned().collect();
        taken.extend(last_sync_names.iter().cloned());
        let new_name = first_free_name(&row.name, &taken);
        results.insert(
            new_name.clone(),
            WorkbookTemplate {
                name: new_name,
                id: Some(row.id),
                description: row.description,
                is_default: row.is_default,
                is_note_required: row.is_note_required,
                status: Some(WorkbookStatus::Deleted),
                prev_state: row.status,
                original_name: Some(row.name),
                origins: Vec::new(),
                phases: Vec::new(),
            },
        );
    } else {
        results.insert(
            row.name.clone(),
            WorkbookTemplate {
                name: row.name.clone(),
                id: Some(row.id),
                description: row.description,
                is_default: row.is_default,
                is_note_required: row.is_note_required,
                status: row.status,
                prev_state: None,
                original_name: None,
                origins: vec![OriginRef {
                    ph_auth_config_id: config_id.to_string(),
                    workbook_template_id: row.id,
                }],
                phases: Vec::new(),
            },
        );
    }
}

/// Reconciles one incoming template against the canonical set.
///
/// `original` is the entry already in the canonical map under the
/// incoming name (if any), `existing_names` the names currently in the
/// map, and `last_sync_names` the names persisted by the previous sync.
/// Returns the entry to store, keyed by its (possibly renamed) name, or
/// `None` when there is nothing to store.
pub fn create_unique_workbook(
    original: Option<&WorkbookTemplate>,
    incoming: Option<WorkbookTemplate>,
    existing_names: &BTreeSet<String>,
    last_sync_names: &BTreeSet<String>,
) -> CoreResult<Option<(String, WorkbookTemplate)>> {
    let incoming = match (incoming, original) {
        (Some(incoming), _) => incoming,
        (None, Some(original)) => {
            return Ok(Some((original.name.clone(), original.clone())));
        }
        (None, None) => return Ok(None),
    };

    let name = incoming.name.clone();
    let previously_renamed = incoming.original_name.clone();

    let Some(original) = original else {
        let mut entry = incoming;
        entry.is_default = false;
        if last_sync_names.contains(&name) {
            // The name was synced before but no longer has an owner in the
            // canonical map; bring it in tombstoned so the push phase
            // clears it everywhere.
            entry.prev_state = entry.status;
            entry.status = Some(WorkbookStatus::Deleted);
        }
        return Ok(Some((name, entry)));
    };

    let settled_by_last_sync = last_sync_names.contains(&name)
        || previously_renamed
            .as_ref()
            .map(|n| last_sync_names.contains(n))
            .unwrap_or(false);
    if settled_by_last_sync {
        return Ok(Some((name, original.clone())));
    }

    if original.same_content(&incoming)? {
        let mut merged = original.clone();
        merged.origins.extend(incoming.origins);
        return Ok(Some((name, merged)));
    }

    // Same name, different content: keep both, suffixing the newcomer.
    let base = previously_renamed.unwrap_or(name);
    let mut taken: BTreeSet<String> = existing_names.clone();
    taken.extend(last_sync_names.iter().cloned());
    let new_name = first_free_name(&base, &taken);
    debug!(original = %base, renamed = %new_name, "workbook name collision");

    let mut entry = incoming;
    if entry.status != Some(WorkbookStatus::Deleted) {
        entry.prev_state = entry.status;
    }
    entry.is_default = false;
    entry.name = new_name.clone();
    entry.original_name = Some(base);
    entry.status = Some(WorkbookStatus::Deleted);
    entry.origins = Vec::new();
    Ok(Some((new_name, entry)))
}

/// Carries forward last-sync entries that the live servers no longer
/// account for, as tombstones.
pub fn carry_tombstones(
    merged: &mut BTreeMap<String, WorkbookTemplate>,
    last_sync: &BTreeMap<String, WorkbookTemplate>,
) {
    for (name, stored) in last_sync {
        match merged.get(name) {
            Some(current)
                if stored.status == Some(WorkbookStatus::Deleted)
                    && matches!(current.status, Some(WorkbookStatus::Deleted) | None) =>
            {
                // Both sides agree it is gone; keep the stored tombstone,
                // which still carries prev_state.
                let mut entry = stored.clone();
                entry.is_default = false;
                entry.origins = Vec::new();
                merged.insert(name.clone(), entry);
            }
            Some(_) => {}
            None => {
                let mut entry = stored.clone();
                entry.tombstone();
                entry.is_default = false;
                entry.origins = Vec::new();
                merged.insert(name.clone(), entry);
            }
        }
    }
}

/// Incoming per-workbook state from the configuration UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorAction {
    /// Drop the entry from the persisted set entirely.
    Purge,
    /// Tombstone the entry.
    Delete,
    /// Keep (or restore) the entry with this live status.
    Keep(WorkbookStatus),
}

impl EditorAction {
    pub fn from_status(status: Option<WorkbookStatus>) -> Option<EditorAction> {
        match status {
            Some(WorkbookStatus::Purge) => Some(EditorAction::Purge),
            Some(WorkbookStatus::Deleted) => Some(EditorAction::Delete),
            Some(live) => Some(EditorAction::Keep(live)),
            None => None,
        }
    }
}

/// Applies UI edits over the merged set ahead of a push. `default_names`
/// is the name set the default server currently reports; an entry the
/// default server dropped is tombstoned unless the UI explicitly
/// restores it.
pub fn apply_editor_updates(
    merged: &mut BTreeMap<String, WorkbookTemplate>,
    last_sync: &BTreeMap<String, WorkbookTemplate>,
    edits: &BTreeMap<String, EditorAction>,
    default_names: &BTreeSet<String>,
) {
    for (name, stored) in last_sync {
        let action = edits.get(name).copied();
        let entry = merged
            .entry(name.clone())
            .or_insert_with(|| stored.clone());
        match action {
            Some(EditorAction::Purge) => {
                entry.status = Some(WorkbookStatus::Deleted);
            }
            Some(EditorAction::Delete) => {
                entry.tombstone();
            }
            _ if !default_names.contains(name) => {
                if entry.status != Some(WorkbookStatus::Deleted) {
                    entry.tombstone();
                } else if let Some(EditorAction::Keep(_)) = action {
                    entry.status = match entry.prev_state {
                        Some(WorkbookStatus::Deleted) | None => {
                            Some(WorkbookStatus::Published)
                        }
                        Some(live) => Some(live),
                    };
                    entry.prev_state = None;
                    entry.origins = Vec::new();
                }
            }
            Some(EditorAction::Keep(_)) => {
                if let Some(prev) = entry.prev_state.take() {
                    entry.status = Some(prev);
                    entry.origins = Vec::new();
                }
            }
            None => {}
        }
    }
}

/// Drops the entries the UI asked to purge. Applied to the set that gets
/// persisted, after the push data was computed.
pub fn remove_purged(
    workbooks: &mut BTreeMap<String, WorkbookTemplate>,
    edits: &BTreeMap<String, EditorAction>,
) {
    workbooks.retain(|name, _| edits.get(name) != Some(&EditorAction::Purge));
}

/// How a batch of live templates lands on one particular server.
#[derive(Debug, Default)]
pub struct PushPlan {
    /// POST bodies carrying an `id`, resolved via origin ref or name.
    pub updates: Vec<Value>,
    /// POST bodies for templates the server does not have yet.
    pub creates: Vec<Value>,
}

/// Plans the POST half of a push against one server, given that server's
/// current id-to-name template map.
pub fn plan_push(
    live: &[WorkbookTemplate],
    config_id: &str,
    server_templates: &BTreeMap<i64, String>,
) -> CoreResult<PushPlan> {
    let mut plan = PushPlan::default();
    for item in live {
        let mut body = item.post_body()?;
        let origin_id = item
            .origin_for(config_id)
            .map(|origin| origin.workbook_template_id);
        let resolved = match origin_id {
            Some(id) if item.original_name.is_none() => {
                if server_templates.get(&id).map(String::as_str) == Some(item.name.as_str()) {
                    Some(id)
                } else {
                    None
                }
            }
            _ => server_templates
                .iter()
                .find(|(_, name)| name.as_str() == item.name)
                .map(|(id, _)| *id),
        };
        match resolved {
            Some(id) => {
                if let Value::Object(map) = &mut body {
                    map.insert("id".to_string(), Value::from(id));
                }
                plan.updates.push(body);
            }
            None => plan.creates.push(body),
        }
    }
    Ok(plan)
}

/// The DELETE half of a push against one server.
#[derive(Debug, Default)]
pub struct DeletePlan {
    pub ids: Vec<i64>,
    pub names: Vec<String>,
    /// Refusals produced while planning, e.g. default-workbook deletes.
    pub errors: Vec<String>,
}

/// Plans tombstone deletion against one server. Ids come from origin
/// refs where recorded, otherwise by looking up the original (pre-rename)
/// name in the server's current template map. Default workbooks are
/// refused.
pub fn plan_deletes(
    deleted: &[WorkbookTemplate],
    config_id: &str,
    server_templates: &BTreeMap<i64, String>,
) -> DeletePlan {
    let mut plan = DeletePlan::default();
    for item in deleted {
        if item.is_default {
            plan.errors.push(format!(
                "Workbook '{}': Default workbook cannot be deleted\n",
                item.name
            ));
            continue;
        }
        if let Some(origin) = item.origin_for(config_id) {
            plan.ids.push(origin.workbook_template_id);
            plan.names.push(item.name.clone());
        } else {
            let target = item.original_name.as_deref().unwrap_or(&item.name);
            plan.ids.extend(
                server_templates
                    .iter()
                    .filter(|(_, name)| name.as_str() == target)
                    .map(|(id, _)| *id),
            );
            plan.names.push(target.to_string());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::tests::template;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_free_name_skips_taken_suffixes() {
        let taken = names(&["triage_1", "triage_2"]);
        assert_eq!(first_free_name("triage", &taken), "triage_3");
        assert_eq!(first_free_name("other", &taken), "other_1");
    }

    #[test]
    fn test_fold_skips_deleted_and_suffixes_duplicates() {
        let mut results = BTreeMap::new();
        let last_sync = names(&["triage_1"]);
        let row = |id, name: &str, status| ServerTemplate {
            id,
            name: name.to_string(),
            description: String::new(),
            is_default: false,
            is_note_required: false,
            status,
        };
        fold_server_template(
            &mut results,
            row(1, "gone", Some(WorkbookStatus::Deleted)),
            "abc",
            &last_sync,
        );
        fold_server_template(
            &mut results,
            row(2, "triage", Some(WorkbookStatus::Published)),
            "abc",
            &last_sync,
        );
        fold_server_template(
            &mut results,
            row(3, "triage", Some(WorkbookStatus::Draft)),
            "abc",
            &last_sync,
        );

        assert!(!results.contains_key("gone"));
        assert_eq!(results["triage"].origins[0].workbook_template_id, 2);
        // triage_1 is taken by the last sync, so the duplicate lands on _2.
        let dup = &results["triage_2"];
        assert_eq!(dup.status, Some(WorkbookStatus::Deleted));
        assert_eq!(dup.prev_state, Some(WorkbookStatus::Draft));
        assert_eq!(dup.original_name.as_deref(), Some("triage"));
        assert!(dup.origins.is_empty());
    }

    #[test]
    fn test_merge_keeps_original_when_incoming_missing() {
        let original = template("triage", WorkbookStatus::Published);
        let (name, merged) =
            create_unique_workbook(Some(&original), None, &names(&[]), &names(&[]))
                .unwrap()
                .unwrap();
        assert_eq!(name, "triage");
        assert_eq!(merged, original);
    }

    #[test]
    fn test_merge_inserts_new_name() {
        let mut incoming = template("triage", WorkbookStatus::Published);
        incoming.is_default = true;
        let (name, merged) =
            create_unique_workbook(None, Some(incoming), &names(&[]), &names(&[]))
                .unwrap()
                .unwrap();
        assert_eq!(name, "triage");
        assert!(!merged.is_default);
        assert_eq!(merged.status, Some(WorkbookStatus::Published));
    }

    #[test]
    fn test_merge_tombstones_orphaned_last_sync_name() {
        let incoming = template("triage", WorkbookStatus::Published);
        let (_, merged) = create_unique_workbook(
            None,
            Some(incoming),
            &names(&[]),
            &names(&["triage"]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.status, Some(WorkbookStatus::Deleted));
        assert_eq!(merged.prev_state, Some(WorkbookStatus::Published));
    }

    #[test]
    fn test_merge_settled_names_keep_original() {
        let original = template("triage", WorkbookStatus::Published);
        let mut incoming = template("triage", WorkbookStatus::Draft);
        incoming.description = "totally different".to_string();
        let (_, merged) = create_unique_workbook(
            Some(&original),
            Some(incoming),
            &names(&["triage"]),
            &names(&["triage"]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged, original);
    }

    #[test]
    fn test_merge_identical_content_appends_origins() {
        let original = template("triage", WorkbookStatus::Published);
        let mut incoming = template("triage", WorkbookStatus::Published);
        incoming.origins = vec![OriginRef {
            ph_auth_config_id: "other".to_string(),
            workbook_template_id: 42,
        }];
        let (_, merged) = create_unique_workbook(
            Some(&original),
            Some(incoming),
            &names(&["triage"]),
            &names(&[]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.origins.len(), 2);
        assert_eq!(merged.origins[1].ph_auth_config_id, "other");
    }

    #[test]
    fn test_merge_conflicting_content_renames_and_tombstones() {
        let original = template("triage", WorkbookStatus::Published);
        let mut incoming = template("triage", WorkbookStatus::Published);
        incoming.description = "different".to_string();
        let (name, merged) = create_unique_workbook(
            Some(&original),
            Some(incoming),
            &names(&["triage", "triage_1"]),
            &names(&[]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(name, "triage_2");
        assert_eq!(merged.original_name.as_deref(), Some("triage"));
        assert_eq!(merged.status, Some(WorkbookStatus::Deleted));
        assert_eq!(merged.prev_state, Some(WorkbookStatus::Published));
        assert!(merged.origins.is_empty());
    }

    #[test]
    fn test_carry_tombstones_preserves_missing_entries() {
        let mut merged = BTreeMap::new();
        merged.insert(
            "kept".to_string(),
            template("kept", WorkbookStatus::Published),
        );
        let mut last_sync = BTreeMap::new();
        last_sync.insert(
            "kept".to_string(),
            template("kept", WorkbookStatus::Published),
        );
        last_sync.insert(
            "vanished".to_string(),
            template("vanished", WorkbookStatus::Draft),
        );

        carry_tombstones(&mut merged, &last_sync);

        assert_eq!(merged["kept"].status, Some(WorkbookStatus::Published));
        let gone = &merged["vanished"];
        assert_eq!(gone.status, Some(WorkbookStatus::Deleted));
        assert_eq!(gone.prev_state, Some(WorkbookStatus::Draft));
        assert!(gone.origins.is_empty());
    }

    #[test]
    fn test_carry_tombstones_keeps_stored_tombstone() {
        let mut stored = template("gone", WorkbookStatus::Deleted);
        stored.prev_state = Some(WorkbookStatus::Published);
        let mut merged = BTreeMap::new();
        merged.insert("gone".to_string(), template("gone", WorkbookStatus::Deleted));
        let mut last_sync = BTreeMap::new();
        last_sync.insert("gone".to_string(), stored);

        carry_tombstones(&mut merged, &last_sync);
        assert_eq!(
            merged["gone"].prev_state,
            Some(WorkbookStatus::Published)
        );
    }

    #[test]
    fn test_sync_is_idempotent_for_unchanged_servers() {
        // Second pass over a set the first pass produced must not change it.
        let mut canonical = BTreeMap::new();
        canonical.insert(
            "triage".to_string(),
            template("triage", WorkbookStatus::Published),
        );
        let last_sync = canonical.clone();
        let last_sync_names: BTreeSet<String> = last_sync.keys().cloned().collect();

        let incoming = template("triage", WorkbookStatus::Published);
        let existing: BTreeSet<String> = canonical.keys().cloned().collect();
        let (name, merged) = create_unique_workbook(
            canonical.get("triage"),
            Some(incoming),
            &existing,
            &last_sync_names,
        )
        .unwrap()
        .unwrap();
        canonical.insert(name, merged);
        carry_tombstones(&mut canonical, &last_sync);

        assert_eq!(canonical, last_sync);
    }

    #[test]
    fn test_editor_purge_and_delete() {
        let mut merged = BTreeMap::new();
        merged.insert(
            "a".to_string(),
            template("a", WorkbookStatus::Published),
        );
        merged.insert(
            "b".to_string(),
            template("b", WorkbookStatus::Published),
        );
        let last_sync = merged.clone();
        let mut edits = BTreeMap::new();
        edits.insert("a".to_string(), EditorAction::Purge);
        edits.insert("b".to_string(), EditorAction::Delete);
        let default_names = names(&["a", "b"]);

        apply_editor_updates(&mut merged, &last_sync, &edits, &default_names);
        assert_eq!(merged["a"].status, Some(WorkbookStatus::Deleted));
        assert_eq!(merged["b"].status, Some(WorkbookStatus::Deleted));
        assert_eq!(merged["b"].prev_state, Some(WorkbookStatus::Published));

        remove_purged(&mut merged, &edits);
        assert!(!merged.contains_key("a"));
        assert!(merged.contains_key("b"));
    }

    #[test]
    fn test_editor_restore_of_tombstone() {
        let mut stored = template("a", WorkbookStatus::Deleted);
        stored.prev_state = Some(WorkbookStatus::Draft);
        let mut merged = BTreeMap::new();
        merged.insert("a".to_string(), stored.clone());
        let mut last_sync = BTreeMap::new();
        last_sync.insert("a".to_string(), stored);
        let mut edits = BTreeMap::new();
        edits.insert(
            "a".to_string(),
            EditorAction::Keep(WorkbookStatus::Published),
        );

        // Absent on the default server: restore falls back to prev_state.
        apply_editor_updates(&mut merged, &last_sync, &edits, &names(&[]));
        assert_eq!(merged["a"].status, Some(WorkbookStatus::Draft));
        assert_eq!(merged["a"].prev_state, None);
        assert!(merged["a"].origins.is_empty());
    }

    #[test]
    fn test_editor_tombstones_entries_dropped_by_default_server() {
        let mut merged = BTreeMap::new();
        merged.insert(
            "a".to_string(),
            template("a", WorkbookStatus::Published),
        );
        let last_sync = merged.clone();
        let edits = BTreeMap::new();

        apply_editor_updates(&mut merged, &last_sync, &edits, &names(&[]));
        assert_eq!(merged["a"].status, Some(WorkbookStatus::Deleted));
        assert_eq!(merged["a"].prev_state, Some(WorkbookStatus::Published));
    }

    #[test]
    fn test_plan_push_resolves_ids() {
        let mut by_origin = template("triage", WorkbookStatus::Published);
        by_origin.origins = vec![OriginRef {
            ph_auth_config_id: "abc".to_string(),
            workbook_template_id: 7,
        }];
        let mut by_name = template("containment", WorkbookStatus::Published);
        by_name.origins = Vec::new();
        let fresh = template("fresh", WorkbookStatus::Published);

        let mut server = BTreeMap::new();
        server.insert(7, "triage".to_string());
        server.insert(8, "containment".to_string());

        let plan = plan_push(
            &[by_origin, by_name, fresh],
            "abc",
            &server,
        )
        .unwrap();
        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.updates[0]["id"], 7);
        assert_eq!(plan.updates[1]["id"], 8);
        // "fresh" had origins for this server but no matching name upstream.
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0]["name"], "fresh");
    }

    #[test]
    fn test_plan_deletes_refuses_default_workbook() {
        let mut default_wb = template("Default", WorkbookStatus::Deleted);
        default_wb.is_default = true;
        let mut renamed = template("triage_1", WorkbookStatus::Deleted);
        renamed.origins = Vec::new();
        renamed.original_name = Some("triage".to_string());

        let mut server = BTreeMap::new();
        server.insert(3, "triage".to_string());

        let plan = plan_deletes(&[default_wb, renamed], "other", &server);
        assert_eq!(plan.ids, vec![3]);
        assert_eq!(plan.names, vec!["triage"]);
        assert_eq!(plan.errors.len(), 1);
        assert!(plan.errors[0].contains("Default workbook cannot be deleted"));
    }
}
