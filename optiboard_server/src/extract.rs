use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use optiboard_core::UserId;
use std::future;
use std::str::FromStr;

/// Verified caller identity, supplied by the upstream identity provider as
/// an `x-user-id` header. Session mechanics live outside this service.
#[derive(Debug, Copy, Clone)]
pub struct UserIdHeader(pub UserId);

impl<S> FromRequestParts<S> for UserIdHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let res = (|| {
            let raw = parts
                .headers
                .get("x-user-id")
                .ok_or(ApiError::MissingUserId)?
                .to_str()
                .map_err(|e| ApiError::InvalidUserId(e.to_string()))?;
            let user_id =
                UserId::from_str(raw).map_err(|e| ApiError::InvalidUserId(e.to_string()))?;
            Ok(Self(user_id))
        })();
        future::ready(res)
    }
}
