use axum::extract::{Form, FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lib_qbox::ReactionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform response envelope. The transport status is always 200; `code`
/// carries the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub code: u16,
    pub message: String,
    pub data: Value,
}

impl ApiResponse {
    pub fn success(data: impl Serialize) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn fail(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl From<ReactionError> for ApiResponse {
    fn from(err: ReactionError) -> Self {
        let message = match &err {
            ReactionError::InvalidReaction(_) => "invalid reaction".to_string(),
            ReactionError::NotFound(id) => format!("question {id} not found"),
            ReactionError::Persistence(_) => "failed to save reaction".to_string(),
        };
        ApiResponse::fail(err.code(), message)
    }
}

/// The `emoji` form field of a reaction submission.
///
/// Browsers post `FormData` (multipart); scripts tend to post urlencoded
/// bodies. Both are accepted, and a missing field reads as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReactionForm {
    #[serde(default)]
    pub emoji: String,
}

impl<S> FromRequest<S> for ReactionForm
where
    S: Send + Sync,
{
    type Rejection = ApiResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(form) = Form::<ReactionForm>::from_request(req, state)
                .await
                .map_err(|e| ApiResponse::fail(400, e.body_text()))?;
            return Ok(form);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiResponse::fail(400, e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiResponse::fail(400, e.body_text()))?
        {
            if field.name() == Some("emoji") {
                let emoji = field
                    .text()
                    .await
                    .map_err(|e| ApiResponse::fail(400, e.body_text()))?;
                return Ok(ReactionForm { emoji });
            }
        }
        Ok(ReactionForm::default())
    }
}
