//! Record lookup and cache maintenance routes.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;

use crate::channels::web::GatewayState;
use crate::channels::web::types::{
    ErrorResponse, InvalidateRequest, InvalidateResponse, SearchQuery,
};
use crate::phone::CanonicalPhone;
use crate::records::{Lookup, Record};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// `GET /pharmacies`: the full upstream listing, uncached.
pub async fn list_pharmacies(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<Record>>, ApiError> {
    match state.cache.list().await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("Failed to list pharmacies: {}", e);
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Pharmacy service unavailable",
            ))
        }
    }
}

/// `GET /pharmacies/search?phone=`: one cached lookup.
pub async fn search_pharmacy(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Record>, ApiError> {
    let key = CanonicalPhone::parse(&query.phone)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.cache.get_or_fetch(&key).await {
        Ok(Lookup::Found(record)) => Ok(Json(record.as_ref().clone())),
        Ok(Lookup::NotFound) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No pharmacy found for {}", query.phone),
        )),
        Err(e) => {
            tracing::error!("Pharmacy search failed: {}", e);
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Pharmacy service unavailable",
            ))
        }
    }
}

/// `POST /cache/invalidate`: drop one phone's entry, or everything when
/// the body is empty or has no `phone`.
pub async fn invalidate_cache(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        InvalidateRequest::default()
    } else {
        serde_json::from_slice::<InvalidateRequest>(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid body: {}", e)))?
    };

    let removed = match request.phone {
        Some(phone) => {
            let key = CanonicalPhone::parse(&phone)
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
            usize::from(state.cache.invalidate(&key).await)
        }
        None => state.cache.invalidate_all().await,
    };

    tracing::info!("Invalidated {} cache entries", removed);
    Ok(Json(InvalidateResponse { removed }))
}
