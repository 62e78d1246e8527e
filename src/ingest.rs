//! Bulk spreadsheet ingestion: validate each row, check for duplicates,
//! insert the survivors, and report a per-row status plus aggregate counts.

use anyhow::Result;
use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::db::{self, RowStore, TableSpec};
use crate::excel::UploadRow;

/// Validation, uniqueness and insertion policy for one ingestion target.
/// Insert order follows `table.columns`.
pub struct EntitySchema {
    pub table: &'static TableSpec,
    pub required_fields: &'static [&'static str],
    /// Column used for duplicate lookup; schemas without one skip dedup.
    pub unique_key: Option<&'static str>,
    /// Whether a storage failure mid-upload aborts the whole request.
    /// When false, the failing row is annotated and processing continues.
    pub fatal_on_insert_error: bool,
}

pub const USER_SCHEMA: EntitySchema = EntitySchema {
    table: &db::USUARIOS,
    required_fields: db::USUARIOS.columns,
    unique_key: Some("correo"),
    fatal_on_insert_error: true,
};

pub const ROLE_SCHEMA: EntitySchema = EntitySchema {
    table: &db::ROLES,
    required_fields: db::ROLES.columns,
    unique_key: Some("nombre_rol"),
    fatal_on_insert_error: true,
};

pub const CHARGER_SCHEMA: EntitySchema = EntitySchema {
    table: &db::CARGADOR,
    required_fields: db::CARGADOR.columns,
    unique_key: None,
    fatal_on_insert_error: false,
};

pub const MAINTENANCE_SCHEMA: EntitySchema = EntitySchema {
    table: &db::MANTENIMIENTOS,
    required_fields: db::MANTENIMIENTOS.columns,
    unique_key: None,
    fatal_on_insert_error: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Uploaded,
    Duplicate,
    MissingFields,
    InsertError,
}

impl RowStatus {
    /// Wire values. The fleet frontend matches on these exact strings.
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Uploaded => "Subido",
            RowStatus::Duplicate => "Duplicado",
            RowStatus::MissingFields => "Datos faltantes",
            RowStatus::InsertError => "Error al insertar",
        }
    }
}

/// Outcome of one upload: counts plus every row, annotated, in sheet order.
/// `duplicate_count` exists only for schemas with a unique key and
/// `error_count` only for schemas that recover from per-row insert failures.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub inserted_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_count: Option<u32>,
    pub missing_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    pub data: Vec<UploadRow>,
}

/// The "truthy" presence check: absent, null, empty string, zero and false
/// all count as missing. Telemetry intake deliberately does not use this.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn annotate(row: &mut UploadRow, status: RowStatus) {
    row.insert("status".to_string(), Value::String(status.as_str().to_string()));
}

/// Runs the pipeline over `rows` in sheet order. Rows are processed strictly
/// sequentially: the duplicate lookup for a row must observe the inserts of
/// every earlier row in the same upload, so two identical rows in one sheet
/// report the second as a duplicate.
pub async fn run<S>(schema: &EntitySchema, store: &S, mut rows: Vec<UploadRow>) -> Result<IngestionSummary>
where
    S: RowStore + ?Sized,
{
    let mut inserted = 0u32;
    let mut missing = 0u32;
    let mut duplicates = schema.unique_key.map(|_| 0u32);
    let mut errored = (!schema.fatal_on_insert_error).then_some(0u32);

    for row in rows.iter_mut() {
        let complete = schema
            .required_fields
            .iter()
            .all(|field| row.get(*field).is_some_and(is_truthy));
        if !complete {
            annotate(row, RowStatus::MissingFields);
            missing += 1;
            continue;
        }

        if let Some(key) = schema.unique_key {
            let key_value = row.get(key).cloned().unwrap_or(Value::Null);
            if store.exists(schema.table, key, &key_value).await? {
                annotate(row, RowStatus::Duplicate);
                if let Some(count) = duplicates.as_mut() {
                    *count += 1;
                }
                continue;
            }
        }

        let values: Vec<Value> = schema
            .table
            .columns
            .iter()
            .map(|column| row.get(*column).cloned().unwrap_or(Value::Null))
            .collect();
        match store.insert(schema.table, schema.table.columns, &values).await {
            Ok(()) => {
                annotate(row, RowStatus::Uploaded);
                inserted += 1;
            }
            Err(err) if !schema.fatal_on_insert_error => {
                warn!("insert into {} failed for one row: {err:#}", schema.table.table);
                annotate(row, RowStatus::InsertError);
                if let Some(count) = errored.as_mut() {
                    *count += 1;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Ok(IngestionSummary {
        inserted_count: inserted,
        duplicate_count: duplicates,
        missing_count: missing,
        error_count: errored,
        data: rows,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{anyhow, bail};
    use async_trait::async_trait;
    use serde_json::{json, Map};

    use super::*;
    use crate::db::JsonRow;

    /// In-memory stand-in for the database, with optional injected insert
    /// failures.
    #[derive(Default)]
    struct MemStore {
        tables: Mutex<HashMap<String, Vec<JsonRow>>>,
        fail_inserts_from: Mutex<Option<usize>>,
        insert_attempts: Mutex<usize>,
    }

    impl MemStore {
        fn failing_from(attempt: usize) -> Self {
            let store = MemStore::default();
            *store.fail_inserts_from.lock().unwrap() = Some(attempt);
            store
        }

        fn rows(&self, table: &str) -> Vec<JsonRow> {
            self.tables
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl RowStore for MemStore {
        async fn list(&self, spec: &TableSpec) -> Result<Vec<JsonRow>> {
            Ok(self.rows(spec.table))
        }

        async fn find_by_column(
            &self,
            spec: &TableSpec,
            column: &str,
            value: &Value,
        ) -> Result<Vec<JsonRow>> {
            Ok(self
                .rows(spec.table)
                .into_iter()
                .filter(|row| row.get(column) == Some(value))
                .collect())
        }

        async fn exists(&self, spec: &TableSpec, column: &str, value: &Value) -> Result<bool> {
            Ok(!self.find_by_column(spec, column, value).await?.is_empty())
        }

        async fn insert(
            &self,
            spec: &TableSpec,
            columns: &[&str],
            values: &[Value],
        ) -> Result<()> {
            let mut attempts = self.insert_attempts.lock().unwrap();
            *attempts += 1;
            if let Some(from) = *self.fail_inserts_from.lock().unwrap() {
                if *attempts >= from {
                    bail!("injected storage failure");
                }
            }
            let row: JsonRow = columns
                .iter()
                .map(|c| c.to_string())
                .zip(values.iter().cloned())
                .collect();
            self.tables
                .lock()
                .unwrap()
                .entry(spec.table.to_string())
                .or_default()
                .push(row);
            Ok(())
        }

        async fn update_by_id(&self, _: &TableSpec, _: i64, _: &JsonRow) -> Result<u64> {
            Err(anyhow!("not used in these tests"))
        }

        async fn delete_by_id(&self, _: &TableSpec, _: i64) -> Result<u64> {
            Err(anyhow!("not used in these tests"))
        }
    }

    fn user_row(correo: &str) -> UploadRow {
        let mut row = Map::new();
        row.insert("id_rol".into(), json!(2));
        row.insert("nombre".into(), json!("Ana"));
        row.insert("apellido".into(), json!("Lopez"));
        row.insert("fn".into(), json!("1990-04-12"));
        row.insert("genero".into(), json!("F"));
        row.insert("correo".into(), json!(correo));
        row.insert("contrasena".into(), json!("secreta"));
        row.insert("activo".into(), json!(1));
        row
    }

    fn role_row(nombre: &str) -> UploadRow {
        let mut row = Map::new();
        row.insert("nombre_rol".into(), json!(nombre));
        row.insert("permisos".into(), json!("lectura,escritura"));
        row
    }

    fn charger_row(ubicacion: &str) -> UploadRow {
        let mut row = Map::new();
        row.insert("ubicacion".into(), json!(ubicacion));
        row.insert("estado".into(), json!("operativo"));
        row
    }

    fn status_of(row: &UploadRow) -> &str {
        row.get("status").and_then(Value::as_str).unwrap_or("")
    }

    #[tokio::test]
    async fn empty_upload_yields_zero_counts() {
        let store = MemStore::default();
        let summary = run(&USER_SCHEMA, &store, Vec::new()).await.unwrap();
        assert_eq!(summary.inserted_count, 0);
        assert_eq!(summary.duplicate_count, Some(0));
        assert_eq!(summary.missing_count, 0);
        assert!(summary.data.is_empty());
    }

    #[tokio::test]
    async fn complete_row_uploads_and_incomplete_row_is_flagged() {
        let store = MemStore::default();
        let mut incomplete = user_row("b@fleet.mx");
        incomplete.remove("correo");

        let summary = run(&USER_SCHEMA, &store, vec![user_row("a@fleet.mx"), incomplete])
            .await
            .unwrap();

        assert_eq!(summary.inserted_count, 1);
        assert_eq!(summary.duplicate_count, Some(0));
        assert_eq!(summary.missing_count, 1);
        assert_eq!(status_of(&summary.data[0]), "Subido");
        assert_eq!(status_of(&summary.data[1]), "Datos faltantes");
        // the flagged row never reached storage
        assert_eq!(store.rows("usuarios").len(), 1);
    }

    #[tokio::test]
    async fn zero_and_empty_string_count_as_missing() {
        let store = MemStore::default();
        let mut inactive = user_row("c@fleet.mx");
        inactive.insert("activo".into(), json!(0));
        let mut blank = user_row("d@fleet.mx");
        blank.insert("nombre".into(), json!(""));

        let summary = run(&USER_SCHEMA, &store, vec![inactive, blank]).await.unwrap();
        assert_eq!(summary.missing_count, 2);
        assert_eq!(summary.inserted_count, 0);
    }

    #[tokio::test]
    async fn duplicate_within_one_upload_is_caught() {
        let store = MemStore::default();
        let summary = run(
            &USER_SCHEMA,
            &store,
            vec![user_row("same@fleet.mx"), user_row("same@fleet.mx")],
        )
        .await
        .unwrap();

        assert_eq!(summary.inserted_count, 1);
        assert_eq!(summary.duplicate_count, Some(1));
        assert_eq!(status_of(&summary.data[0]), "Subido");
        assert_eq!(status_of(&summary.data[1]), "Duplicado");
    }

    #[tokio::test]
    async fn duplicate_across_uploads_is_caught() {
        let store = MemStore::default();
        run(&ROLE_SCHEMA, &store, vec![role_row("admin")]).await.unwrap();
        let second = run(&ROLE_SCHEMA, &store, vec![role_row("admin")]).await.unwrap();

        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.duplicate_count, Some(1));
        assert_eq!(store.rows("roles").len(), 1);
    }

    #[tokio::test]
    async fn counts_always_sum_to_row_total() {
        let store = MemStore::default();
        let mut incomplete = user_row("x@fleet.mx");
        incomplete.remove("genero");
        let rows = vec![
            user_row("a@fleet.mx"),
            user_row("a@fleet.mx"),
            incomplete,
            user_row("b@fleet.mx"),
        ];
        let total = rows.len() as u32;

        let summary = run(&USER_SCHEMA, &store, rows).await.unwrap();
        assert_eq!(
            summary.inserted_count + summary.duplicate_count.unwrap() + summary.missing_count,
            total
        );
        assert_eq!(summary.data.len(), total as usize);
    }

    #[tokio::test]
    async fn charger_insert_failure_is_recovered_per_row() {
        // second insert attempt fails
        let store = MemStore::failing_from(2);
        let summary = run(
            &CHARGER_SCHEMA,
            &store,
            vec![charger_row("patio norte"), charger_row("patio sur"), charger_row("bodega")],
        )
        .await
        .unwrap();

        assert_eq!(summary.inserted_count, 1);
        assert_eq!(summary.error_count, Some(2));
        assert_eq!(summary.duplicate_count, None);
        assert_eq!(status_of(&summary.data[0]), "Subido");
        assert_eq!(status_of(&summary.data[1]), "Error al insertar");
        assert_eq!(status_of(&summary.data[2]), "Error al insertar");
    }

    #[tokio::test]
    async fn user_insert_failure_aborts_the_request() {
        let store = MemStore::failing_from(1);
        let result = run(&USER_SCHEMA, &store, vec![user_row("a@fleet.mx")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn maintenance_schema_skips_dedup_entirely() {
        let store = MemStore::default();
        let mut row = Map::new();
        row.insert("id_cargador".into(), json!(1));
        row.insert("id_usuario".into(), json!(4));
        row.insert("fecha".into(), json!("2024-05-01"));
        row.insert("tipo".into(), json!("preventivo"));
        row.insert("descripcion".into(), json!("cambio de conector"));

        let summary = run(&MAINTENANCE_SCHEMA, &store, vec![row.clone(), row])
            .await
            .unwrap();

        // identical rows both land; this schema has no uniqueness key
        assert_eq!(summary.inserted_count, 2);
        assert_eq!(summary.duplicate_count, None);
        assert_eq!(store.rows("mantenimientos").len(), 2);
    }

    #[test]
    fn summary_serialization_omits_inapplicable_counts() {
        let keyed = IngestionSummary {
            inserted_count: 1,
            duplicate_count: Some(0),
            missing_count: 0,
            error_count: None,
            data: Vec::new(),
        };
        let value = serde_json::to_value(&keyed).unwrap();
        assert_eq!(value["insertedCount"], json!(1));
        assert_eq!(value["duplicateCount"], json!(0));
        assert!(value.get("errorCount").is_none());

        let keyless = IngestionSummary {
            inserted_count: 0,
            duplicate_count: None,
            missing_count: 0,
            error_count: Some(2),
            data: Vec::new(),
        };
        let value = serde_json::to_value(&keyless).unwrap();
        assert!(value.get("duplicateCount").is_none());
        assert_eq!(value["errorCount"], json!(2));
    }

    #[test]
    fn truthiness_matches_the_upload_policy() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!(-1.5)));
    }
}
