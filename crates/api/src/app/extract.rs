//! Request body extraction shared by the write endpoints.
//!
//! Clients send either JSON or `application/x-www-form-urlencoded` bodies;
//! both decode into the same request DTOs.

use axum::{
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    response::Response,
    Form, Json,
};
use serde::de::DeserializeOwned;

use procura_core::DomainError;

use crate::app::errors;

/// A request body decoded from JSON or from a url-encoded form, picked by
/// `Content-Type`. Anything that is not a form is read as JSON.
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn is_form(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE))
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    /// Unreadable bodies are validation errors like any other malformed input.
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let decoded = if is_form(&req) {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| value)
                .map_err(|rejection| rejection.body_text())
        } else {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| value)
                .map_err(|rejection| rejection.body_text())
        };

        decoded
            .map(Payload)
            .map_err(|message| errors::domain_error_to_response(DomainError::validation(message)))
    }
}

/// Unwrap a body taken as `Result` so handlers can check authorization before
/// reporting a malformed payload.
pub(crate) fn payload<T>(body: Result<Payload<T>, Response>) -> Result<T, Response> {
    body.map(|Payload(value)| value)
}
