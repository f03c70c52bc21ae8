//! Reading and rendering lookup table contents.
//!
//! CSV lookups are served as a header row plus data rows; KV store lookups
//! are flattened into the same tabular shape so the editor treats both alike.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Largest lookup file the editor will load, in bytes.
pub const MAXIMUM_EDITABLE_SIZE: u64 = 10_485_760;

/// Reads a CSV lookup into rows, first row being the header.
///
/// Rejects files over `MAXIMUM_EDITABLE_SIZE` before reading. Rows with no
/// non-blank cell are dropped. With `header_only` just the first row is
/// returned.
pub fn read_csv_lookup(path: &Path, header_only: bool) -> CoreResult<Vec<Vec<String>>> {
    let size = fs::metadata(path)
        .map_err(|_| CoreError::NotFound(format!("lookup file not found: {}", path.display())))?
        .len();
    if size > MAXIMUM_EDITABLE_SIZE {
        return Err(CoreError::FileTooBig { size });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        if is_empty_row(&row) {
            continue;
        }
        rows.push(row);
        if header_only {
            break;
        }
    }

    Ok(rows)
}

/// True when every cell of the row is blank.
pub fn is_empty_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Renders rows as CSV bytes for saving.
///
/// Empty rows are pruned and NUL bytes stripped from the cells, mirroring
/// what `read_csv_lookup` tolerates on the way in.
pub fn rows_to_csv(rows: &[Vec<String>]) -> CoreResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    for row in rows {
        if is_empty_row(row) {
            continue;
        }
        let cleaned: Vec<String> = row.iter().map(|cell| cell.replace('\0', "")).collect();
        writer.write_record(&cleaned)?;
    }

    writer
        .into_inner()
        .map_err(|e| CoreError::Internal(format!("CSV buffer flush failed: {e}")))
}

/// Flattens one KV store document into column values.
///
/// Nested objects are walked with dotted prefixes. A field listed in
/// `blob_fields` keeps its JSON form as a single cell, which is how typed
/// JSON-within-a-field collections round-trip. Arrays and objects that are
/// not listed columns are serialized the same way.
pub fn flatten_document(
    document: &serde_json::Map<String, Value>,
    blob_fields: &[String],
) -> BTreeMap<String, String> {
    let mut output = BTreeMap::new();
    flatten_into(document, "", blob_fields, &mut output);
    output
}

fn flatten_into(
    document: &serde_json::Map<String, Value>,
    prefix: &str,
    blob_fields: &[String],
    output: &mut BTreeMap<String, String>,
) {
    for (key, value) in document {
        let qualified = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        let as_blob = blob_fields.iter().any(|f| f == &qualified);
        match value {
            Value::Object(inner) if !as_blob => {
                flatten_into(inner, &qualified, blob_fields, output);
            }
            Value::String(s) => {
                output.insert(qualified, s.clone());
            }
            Value::Null => {
                output.insert(qualified, String::new());
            }
            // Arrays, blob objects, numbers, and bools all render as a
            // single cell; the first two keep their JSON form.
            other => {
                output.insert(qualified, other.to_string());
            }
        }
    }
}

/// Builds tabular rows from KV store documents.
///
/// `fields` is the header (with `_key` first); a document missing a field
/// renders an empty cell so every row keeps the header's width.
pub fn kv_documents_to_rows(
    fields: &[String],
    documents: &[serde_json::Map<String, Value>],
) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(documents.len() + 1);
    rows.push(fields.to_vec());

    for document in documents {
        let flattened = flatten_document(document, fields);
        let row = fields
            .iter()
            .map(|field| flattened.get(field).cloned().unwrap_or_default())
            .collect();
        rows.push(row);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn doc(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_read_csv_prunes_empty_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hosts.csv");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "host,ip\nweb01,10.0.0.1\n , \nweb02,10.0.0.2\n").unwrap();

        let rows = read_csv_lookup(&path, false).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["host", "ip"]);
        assert_eq!(rows[2], vec!["web02", "10.0.0.2"]);
    }

    #[test]
    fn test_read_csv_header_only() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hosts.csv");
        fs::write(&path, "host,ip\nweb01,10.0.0.1\n").unwrap();

        let rows = read_csv_lookup(&path, true).unwrap();
        assert_eq!(rows, vec![vec!["host".to_string(), "ip".to_string()]]);
    }

    #[test]
    fn test_read_csv_size_cap() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.csv");
        let file = fs::File::create(&path).unwrap();
        file.set_len(MAXIMUM_EDITABLE_SIZE + 1).unwrap();

        let err = read_csv_lookup(&path, false).unwrap_err();
        match err {
            CoreError::FileTooBig { size } => assert_eq!(size, MAXIMUM_EDITABLE_SIZE + 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_csv_missing_file() {
        let err = read_csv_lookup(Path::new("/nonexistent/x.csv"), false).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_rows_to_csv_strips_nul_and_empty() {
        let rows = vec![
            vec!["host".to_string(), "ip".to_string()],
            vec!["".to_string(), "  ".to_string()],
            vec!["web\001".to_string(), "10.0.0.1".to_string()],
        ];

        let bytes = rows_to_csv(&rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "host,ip\nweb01,10.0.0.1\n");
    }

    #[test]
    fn test_flatten_nested_document() {
        let document = doc(json!({
            "_key": "abc",
            "host": "web01",
            "meta": { "env": "prod", "tier": 2 }
        }));

        let flat = flatten_document(&document, &[]);
        assert_eq!(flat.get("_key").unwrap(), "abc");
        assert_eq!(flat.get("meta.env").unwrap(), "prod");
        assert_eq!(flat.get("meta.tier").unwrap(), "2");
    }

    #[test]
    fn test_flatten_blob_field_keeps_json() {
        let document = doc(json!({
            "_key": "abc",
            "payload": { "a": 1 }
        }));

        let flat = flatten_document(&document, &["payload".to_string()]);
        assert_eq!(flat.get("payload").unwrap(), "{\"a\":1}");
        assert!(!flat.contains_key("payload.a"));
    }

    #[test]
    fn test_kv_rows_align_with_header() {
        let fields = vec!["_key".to_string(), "host".to_string(), "ip".to_string()];
        let documents = vec![
            doc(json!({"_key": "1", "host": "web01", "ip": "10.0.0.1"})),
            doc(json!({"_key": "2", "host": "web02"})),
        ];

        let rows = kv_documents_to_rows(&fields, &documents);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], fields);
        assert_eq!(rows[2], vec!["2", "web02", ""]);
    }
}
