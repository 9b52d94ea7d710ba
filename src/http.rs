//! HTTP routes
//!
//! Handlers only parse the request, call [`SlipService`] and shape the
//! response. Identity arrives from the upstream auth layer as trusted
//! `x-user-id` / `x-user-role` headers.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{async_trait, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::domain::aggregates::{DeleteMode, SlipAction, SlipStatus};
use crate::domain::value_objects::{CartId, Money, SlipId, UserId};
use crate::repository::{SlipFilter, SlipRepository};
use crate::service::{SlipService, SubmitSlip};
use crate::storage::{SlipStorage, SlipUpload};
use crate::SlipError;

/// Room for the multipart envelope and text fields on top of the file.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

#[derive(Debug)]
pub enum ApiError {
    Slip(SlipError),
    Unauthorized,
    Forbidden,
    Rejected(StatusCode, String),
}

impl From<SlipError> for ApiError {
    fn from(e: SlipError) -> Self { Self::Slip(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Slip(SlipError::Validation(m)) => (StatusCode::BAD_REQUEST, m),
            Self::Slip(e @ SlipError::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            Self::Slip(e @ SlipError::InvalidTransition(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Slip(e) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error, please retry".to_string())
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required".to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "admin role required".to_string()),
            Self::Rejected(status, m) => (status, m),
        };
        (status, Json(json!({ "ok": false, "message": message }))).into_response()
    }
}

/// Authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub is_admin: bool,
}

/// Caller holding the `admin` role.
#[derive(Clone, Copy, Debug)]
pub struct Admin(pub Caller);

#[async_trait]
impl<St: Send + Sync> FromRequestParts<St> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let user_id = header("x-user-id").and_then(|v| v.parse::<i64>().ok()).filter(|id| *id > 0).ok_or(ApiError::Unauthorized)?;
        let is_admin = header("x-user-role").is_some_and(|r| r.eq_ignore_ascii_case("admin"));
        Ok(Self { user_id: UserId(user_id), is_admin })
    }
}

#[async_trait]
impl<St: Send + Sync> FromRequestParts<St> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if caller.is_admin { Ok(Self(caller)) } else { Err(ApiError::Forbidden) }
    }
}

type AppState<R, S> = Arc<SlipService<R, S>>;

pub fn router<R: SlipRepository, S: SlipStorage>(service: AppState<R, S>) -> Router {
    let upload_limit = service.max_bytes().saturating_add(UPLOAD_OVERHEAD);
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-slips"})) }))
        .route("/api/payments/slip", post(submit_slip::<R, S>).layer(DefaultBodyLimit::max(upload_limit)))
        .route("/api/user/history", get(user_history::<R, S>))
        .route("/api/user/address", post(save_address::<R, S>))
        .route("/api/user/address/my", get(my_addresses::<R, S>))
        .route("/api/user/address/resolve", get(resolve_address::<R, S>))
        .route("/api/admin/metrics", get(metrics::<R, S>))
        .route("/api/admin/slips", get(list_slips::<R, S>))
        .route("/api/admin/slips/:id", patch(apply_action::<R, S>).delete(delete_slip::<R, S>))
        .route("/api/admin/slips/:id/status", put(set_status::<R, S>))
        .route("/api/admin/slips/:id/deduct", post(redrive_deduction::<R, S>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(service)
}

fn rejected(e: axum::extract::multipart::MultipartError) -> ApiError { ApiError::Rejected(e.status(), e.body_text()) }

async fn submit_slip<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, caller: Caller, mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut req = SubmitSlip::default();
    while let Some(field) = multipart.next_field().await.map_err(rejected)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "slip" | "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(rejected)?;
                req.upload = Some(SlipUpload { file_name, content_type, bytes: bytes.to_vec() });
            }
            "cart_id" | "cartId" => req.cart_id = field.text().await.map_err(rejected)?,
            "amount" => req.amount = field.text().await.map_err(rejected)?,
            "shipping_address" | "shippingAddress" => req.shipping_address = Some(field.text().await.map_err(rejected)?),
            _ => {}
        }
    }
    let receipt = s.submit_slip(caller.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "slip": receipt }))))
}

async fn user_history<R: SlipRepository, S: SlipStorage>(State(s): State<AppState<R, S>>, caller: Caller) -> Result<Json<Value>, ApiError> {
    let items = s.user_history(caller.user_id).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    #[serde(alias = "cart_id")]
    pub cart_id: Value,
    pub address: String,
}

async fn save_address<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, caller: Caller, Json(r): Json<AddressRequest>,
) -> Result<Json<Value>, ApiError> {
    let raw = match &r.cart_id { Value::Number(n) => n.to_string(), Value::String(v) => v.clone(), _ => String::new() };
    let cart_id = CartId::parse(&raw).map_err(|e| SlipError::Validation(format!("cartId: {e}")))?;
    let saved = s.save_cart_address(caller.user_id, cart_id, &r.address).await?;
    Ok(Json(json!({ "ok": true, "address": saved })))
}

async fn my_addresses<R: SlipRepository, S: SlipStorage>(State(s): State<AppState<R, S>>, caller: Caller) -> Result<Json<Value>, ApiError> {
    let items = s.my_addresses(caller.user_id).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveParams {
    #[serde(alias = "cart_id")]
    pub cart_id: Option<String>,
    pub amount: Option<String>,
    pub when: Option<String>,
}

fn present(v: &Option<String>) -> Option<&str> { v.as_deref().map(str::trim).filter(|v| !v.is_empty()) }

async fn resolve_address<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, caller: Caller, Query(p): Query<ResolveParams>,
) -> Result<Json<Value>, ApiError> {
    let invalid = |field: &str, e: &dyn std::fmt::Display| SlipError::Validation(format!("{field}: {e}"));
    let cart_id = present(&p.cart_id).map(CartId::parse).transpose().map_err(|e| invalid("cartId", &e))?;
    let amount = present(&p.amount).map(Money::parse_positive).transpose().map_err(|e| invalid("amount", &e))?;
    let when = present(&p.when)
        .map(|w| chrono::DateTime::parse_from_rfc3339(w).map(|t| t.with_timezone(&chrono::Utc)))
        .transpose()
        .map_err(|e| invalid("when", &e))?;
    let address = s.resolve_address(caller.user_id, cart_id, amount, when).await?;
    Ok(Json(json!({ "ok": true, "address": address.unwrap_or_default() })))
}

async fn metrics<R: SlipRepository, S: SlipStorage>(State(s): State<AppState<R, S>>, _admin: Admin) -> Result<Json<Value>, ApiError> {
    let metrics = s.slip_metrics().await?;
    Ok(Json(json!({ "ok": true, "metrics": metrics })))
}

#[derive(Debug, Deserialize)] pub struct ListParams { pub status: Option<String> }

async fn list_slips<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, _admin: Admin, Query(p): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let status = match p.status.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => Some(raw.parse::<SlipStatus>().map_err(SlipError::from)?),
        None => None,
    };
    let items = s.list_slips(SlipFilter { status, user_id: None }).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

#[derive(Debug, Deserialize)] pub struct StatusRequest { pub status: String }
#[derive(Debug, Deserialize)] pub struct ActionRequest { pub action: SlipAction }

async fn set_status<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, _admin: Admin, Path(id): Path<SlipId>, Json(r): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let change = s.set_slip_status(id, &r.status).await?;
    Ok(Json(json!({ "ok": true, "slip": change })))
}

async fn apply_action<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, _admin: Admin, Path(id): Path<SlipId>, Json(r): Json<ActionRequest>,
) -> Result<Json<Value>, ApiError> {
    let change = s.apply_action(id, r.action).await?;
    Ok(Json(json!({ "ok": true, "slip": change })))
}

async fn redrive_deduction<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, _admin: Admin, Path(id): Path<SlipId>,
) -> Result<Json<Value>, ApiError> {
    let outcome = s.redrive_deduction(id).await?;
    Ok(Json(json!({ "ok": true, "slip_id": id, "deduction": outcome })))
}

#[derive(Debug, Deserialize)] pub struct DeleteParams { pub mode: Option<DeleteMode> }

async fn delete_slip<R: SlipRepository, S: SlipStorage>(
    State(s): State<AppState<R, S>>, _admin: Admin, Path(id): Path<SlipId>, Query(p): Query<DeleteParams>,
) -> Result<Json<Value>, ApiError> {
    let deleted = s.delete_slip(id, p.mode).await?;
    Ok(Json(json!({ "ok": true, "slip": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn caller(headers: &[(&str, &str)]) -> Result<Caller, ApiError> {
        let mut req = Request::builder();
        for (k, v) in headers { req = req.header(*k, *v); }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_from_headers() {
        let c = caller(&[("x-user-id", "7"), ("x-user-role", "Admin")]).await.unwrap();
        assert_eq!(c, Caller { user_id: UserId(7), is_admin: true });
        assert!(!caller(&[("x-user-id", "7")]).await.unwrap().is_admin);
        assert!(matches!(caller(&[]).await, Err(ApiError::Unauthorized)));
        assert!(matches!(caller(&[("x-user-id", "-3")]).await, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn test_error_status_codes() {
        let status = |e: SlipError| ApiError::from(e).into_response().status();
        assert_eq!(status(SlipError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(SlipError::NotFound("slip 1".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(SlipError::InvalidTransition("PAID".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(SlipError::Storage(crate::storage::StorageError::Injected)), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
    }
}
