use crate::errors::Error;
use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use tracing::debug;

/// JSON body extractor whose rejections are reported as `400 Bad Request` with the
/// usual `{message}` body, instead of axum's plain-text 415/422 responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!("Rejected request body: {}", rejection.body_text());
                Err(Error::BadRequest {
                    message: format!("Invalid request body: {}", rejection.body_text()),
                })
            }
        }
    }
}
