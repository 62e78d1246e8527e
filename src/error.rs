use std::convert::Infallible;

use serde_json::json;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::excel::ParseError;

/// Request-level failures. Row-level outcomes (missing fields, duplicates,
/// per-row insert errors) never reach this type; they are folded into the
/// ingestion summary instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Error al procesar el archivo.")]
    Parse(#[from] ParseError),
    #[error("Error al procesar la solicitud")]
    Storage(anyhow::Error),
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn reject(self) -> Rejection {
        warp::reject::custom(self)
    }

    pub fn storage(err: anyhow::Error) -> Rejection {
        ApiError::Storage(err).reject()
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Turns rejections into the `{"error": ...}` JSON bodies the API speaks.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Registro no encontrado".to_string())
    } else if let Some(api) = err.find::<ApiError>() {
        (api.status(), api.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Método no permitido".to_string())
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Archivo demasiado grande".to_string())
    } else {
        log::error!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error al procesar la solicitud".to_string(),
        )
    };

    let body = warp::reply::json(&json!({ "error": message }));
    Ok(warp::reply::with_status(body, status))
}
