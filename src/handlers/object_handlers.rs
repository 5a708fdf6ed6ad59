//! HTTP handlers for uploading and downloading encrypted files.
//! Bodies are streamed in both directions; encryption and storage are
//! delegated to `GatewayService`.

use crate::{errors::AppError, services::gateway_service::GatewayService};
use axum::{
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "file";

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::ClientInput(format!("malformed multipart body: {err}"))
}

/// `POST /upload` with a `multipart/form-data` body.
///
/// The first part named `file` is encrypted and stored under its filename.
/// Other parts are read and discarded, up to the configured form budget.
pub async fn upload_file(
    State(service): State<GatewayService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart =
        multipart.map_err(|err| AppError::ClientInput(format!("expected multipart form: {err}")))?;
    let form_limit = service.settings().form_limit;
    let mut form_bytes = 0usize;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                form_bytes = form_bytes.saturating_add(chunk.len());
                if form_bytes > form_limit {
                    return Err(AppError::ClientInput(format!(
                        "form fields exceed {form_limit} bytes"
                    )));
                }
            }
            continue;
        }

        let name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(AppError::ClientInput(
                    "`file` field has no filename".into(),
                ));
            }
        };
        let declared_len = match field.headers().get(header::CONTENT_LENGTH) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        AppError::ClientInput("invalid Content-Length on `file` part".into())
                    })?,
            ),
            None => None,
        };

        let body = field.map_err(io::Error::other);
        let info = service.store_encrypted(&name, declared_len, body).await?;
        tracing::info!(
            bucket = %info.bucket,
            name = %info.name,
            size = info.size,
            "uploaded object"
        );
        return Ok(StatusCode::CREATED);
    }

    Err(AppError::ClientInput("missing `file` field".into()))
}

/// `GET /file/{*name}`: decrypt and stream an object back.
pub async fn get_file(
    State(service): State<GatewayService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let object = service.fetch_decrypted(&name).await?;

    let mut response = Response::new(Body::from_stream(object.body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(len) = object.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}
