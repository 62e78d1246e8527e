//! Request handlers. CRUD is one parameterized set of functions over a
//! `TableSpec`; the upload handlers feed the ingestion pipeline; telemetry
//! intake is a single validated insert.

use bytes::Buf;
use futures::{pin_mut, TryStreamExt};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Rejection, Reply};

use crate::db::{self, JsonRow, PgRowStore, RowStore, TableSpec};
use crate::error::ApiError;
use crate::excel;
use crate::ingest::{self, EntitySchema};

// ---------------------------------------------------------------------------
// Generic CRUD
// ---------------------------------------------------------------------------

pub async fn list_rows(spec: &'static TableSpec, store: PgRowStore) -> Result<impl Reply, Rejection> {
    let rows = store.list(spec).await.map_err(ApiError::storage)?;
    Ok(warp::reply::json(&rows))
}

pub async fn get_row_by_id(
    spec: &'static TableSpec,
    id: i64,
    store: PgRowStore,
) -> Result<impl Reply, Rejection> {
    let rows = store
        .find_by_column(spec, spec.id_column, &json!(id))
        .await
        .map_err(ApiError::storage)?;
    match rows.into_iter().next() {
        Some(row) => Ok(warp::reply::json(&row)),
        None => Err(ApiError::NotFound("Registro no encontrado".into()).reject()),
    }
}

pub async fn create_row(
    spec: &'static TableSpec,
    store: PgRowStore,
    body: JsonRow,
) -> Result<impl Reply, Rejection> {
    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (key, value) in &body {
        // unknown keys are dropped, never interpolated
        if spec.has_column(key) {
            columns.push(key.as_str());
            values.push(value.clone());
        }
    }
    if columns.is_empty() {
        return Err(ApiError::BadRequest("Datos inválidos".into()).reject());
    }
    store
        .insert(spec, &columns, &values)
        .await
        .map_err(ApiError::storage)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": "Registro creado exitosamente" })),
        StatusCode::CREATED,
    ))
}

pub async fn update_row(
    spec: &'static TableSpec,
    id: i64,
    store: PgRowStore,
    body: JsonRow,
) -> Result<impl Reply, Rejection> {
    let changes: JsonRow = body
        .into_iter()
        .filter(|(key, _)| spec.has_column(key))
        .collect();
    if changes.is_empty() {
        return Err(ApiError::BadRequest("Datos inválidos".into()).reject());
    }
    store
        .update_by_id(spec, id, &changes)
        .await
        .map_err(ApiError::storage)?;
    Ok(warp::reply::json(&json!({ "message": "Registro actualizado exitosamente" })))
}

pub async fn delete_row(
    spec: &'static TableSpec,
    id: i64,
    store: PgRowStore,
) -> Result<impl Reply, Rejection> {
    store
        .delete_by_id(spec, id)
        .await
        .map_err(ApiError::storage)?;
    Ok(warp::reply::json(&json!({ "message": "Registro eliminado exitosamente" })))
}

pub async fn get_user_by_email(correo: String, store: PgRowStore) -> Result<impl Reply, Rejection> {
    let rows = store
        .find_by_column(&db::USUARIOS, "correo", &json!(correo))
        .await
        .map_err(ApiError::storage)?;
    match rows.into_iter().next() {
        Some(row) => Ok(warp::reply::json(&row)),
        None => Err(ApiError::NotFound("Registro no encontrado".into()).reject()),
    }
}

// ---------------------------------------------------------------------------
// Login audit log
// ---------------------------------------------------------------------------

fn login_body_error(body: &JsonRow) -> Option<&'static str> {
    let id_ok = match body.get("id_usuario") {
        Some(Value::Number(_)) => true,
        Some(Value::String(s)) => s.parse::<f64>().is_ok(),
        _ => false,
    };
    if !id_ok {
        return Some("Invalid id_usuario");
    }
    let filled = ["accion", "hora"].iter().all(|field| {
        matches!(body.get(*field), Some(Value::String(s)) if !s.is_empty())
            || matches!(body.get(*field), Some(Value::Number(_)))
    });
    if !filled {
        return Some("Accion or hora cannot be empty");
    }
    None
}

pub async fn create_login(store: PgRowStore, body: JsonRow) -> Result<impl Reply, Rejection> {
    if let Some(message) = login_body_error(&body) {
        return Err(ApiError::BadRequest(message.into()).reject());
    }
    create_row(&db::LOGIN, store, body).await
}

// ---------------------------------------------------------------------------
// Spreadsheet uploads
// ---------------------------------------------------------------------------

pub async fn upload_excel(
    schema: &'static EntitySchema,
    store: PgRowStore,
    form: FormData,
) -> Result<impl Reply, Rejection> {
    let bytes = read_file_part(form).await?;
    let rows = excel::parse_workbook(&bytes).map_err(|e| ApiError::Parse(e).reject())?;
    info!("{} filas leídas para {}", rows.len(), schema.table.table);
    let summary = ingest::run(schema, &store, rows)
        .await
        .map_err(ApiError::storage)?;
    Ok(warp::reply::json(&summary))
}

/// Collects the bytes of the multipart part named `file`; 400 when absent.
async fn read_file_part(form: FormData) -> Result<Vec<u8>, Rejection> {
    pin_mut!(form);
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Archivo inválido: {e}")).reject())?
    {
        if part.name() != "file" {
            continue;
        }
        let mut buffer = Vec::new();
        let stream = part.stream();
        pin_mut!(stream);
        while let Some(mut chunk) = stream
            .try_next()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Archivo inválido: {e}")).reject())?
        {
            while chunk.has_remaining() {
                let piece = chunk.chunk();
                buffer.extend_from_slice(piece);
                let advance = piece.len();
                chunk.advance(advance);
            }
        }
        return Ok(buffer);
    }
    Err(ApiError::BadRequest("No se subió ningún archivo.".into()).reject())
}

// ---------------------------------------------------------------------------
// Telemetry intake
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnergyReading {
    pub voltaje: Option<f64>,
    pub corriente: Option<f64>,
}

/// Presence check only: a reading of 0.0 V or 0.0 A is valid, unlike the
/// upload pipeline's truthy validation.
pub async fn save_energy(store: PgRowStore, reading: EnergyReading) -> Result<impl Reply, Rejection> {
    let (Some(voltaje), Some(corriente)) = (reading.voltaje, reading.corriente) else {
        return Err(ApiError::BadRequest("Datos incompletos".into()).reject());
    };
    store
        .insert(
            &db::ENERGIA,
            db::ENERGIA.columns,
            &[json!(voltaje), json!(corriente)],
        )
        .await
        .map_err(ApiError::storage)?;
    info!("lectura de energía registrada: {voltaje} V, {corriente} A");
    Ok(warp::reply::json(&json!({ "message": "Datos guardados correctamente" })))
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn login_body(id: Value, accion: Value, hora: Value) -> JsonRow {
        let mut body = Map::new();
        body.insert("id_usuario".into(), id);
        body.insert("accion".into(), accion);
        body.insert("hora".into(), hora);
        body
    }

    #[test]
    fn login_validation_requires_numeric_id() {
        let body = login_body(json!("abc"), json!("ingreso"), json!("08:00"));
        assert_eq!(login_body_error(&body), Some("Invalid id_usuario"));

        let body = login_body(json!(4), json!("ingreso"), json!("08:00"));
        assert_eq!(login_body_error(&body), None);

        // numeric strings pass, as they did upstream of the row store
        let body = login_body(json!("4"), json!("ingreso"), json!("08:00"));
        assert_eq!(login_body_error(&body), None);
    }

    #[test]
    fn login_validation_rejects_empty_action_or_time() {
        let body = login_body(json!(4), json!(""), json!("08:00"));
        assert_eq!(login_body_error(&body), Some("Accion or hora cannot be empty"));

        let mut body = login_body(json!(4), json!("ingreso"), json!("08:00"));
        body.remove("hora");
        assert_eq!(login_body_error(&body), Some("Accion or hora cannot be empty"));
    }

    #[test]
    fn energy_reading_zero_is_present() {
        let reading: EnergyReading =
            serde_json::from_value(json!({ "voltaje": 0, "corriente": 0 })).unwrap();
        assert_eq!(reading.voltaje, Some(0.0));
        assert_eq!(reading.corriente, Some(0.0));

        let reading: EnergyReading = serde_json::from_value(json!({ "voltaje": 12.5 })).unwrap();
        assert!(reading.corriente.is_none());
    }
}
