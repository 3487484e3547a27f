use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::AddOn;
use crate::models::{ApiResponse, CatalogResponse, QuoteRequest};
use crate::pricing::{self, PricingResult};
use crate::AppState;

/// GET /api/catalog: everything the booking form renders.
pub async fn get_catalog(State(state): State<Arc<AppState>>) -> Response {
    let catalog = &state.catalog;
    Json(ApiResponse::success(CatalogResponse {
        currency: &catalog.currency,
        services: &catalog.services,
        add_ons: &catalog.add_ons,
        time_slots: &catalog.time_slots,
        deposit_policy: state.deposit_policy,
    }))
    .into_response()
}

/// POST /api/quote: live totals for a partial selection.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuoteRequest>,
) -> (StatusCode, Json<ApiResponse<PricingResult>>) {
    let Some(service) = state.catalog.service(&req.service_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Unknown service: {}", req.service_id))),
        );
    };

    let mut seen = HashSet::new();
    let mut add_ons: Vec<AddOn> = Vec::new();
    for id in &req.add_on_ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match state.catalog.add_on(id) {
            Some(add_on) => add_ons.push(add_on.clone()),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(format!("Unknown add-on: {id}"))),
                )
            }
        }
    }

    match pricing::compute_price(service, req.size, req.length, &add_ons, state.deposit_policy) {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => {
            tracing::error!("Catalog pricing error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("This service cannot be priced right now")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_catalog_lists_services_and_policy() {
        let (status, body) = send(app(state(None)), Method::GET, "/api/catalog", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        let data = &body["data"];
        assert_eq!(data["currency"], "GH₵");
        assert!(data["services"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["id"] == "knotless-braids" && s["basePrice"] == 80.0));
        assert_eq!(data["timeSlots"][0], "8:00 AM");
        assert_eq!(data["depositPolicy"], json!({"kind": "fixed", "value": 50}));
    }

    #[tokio::test]
    async fn test_quote_full_selection() {
        let (status, body) = send(
            app(state(None)),
            Method::POST,
            "/api/quote",
            Some(json!({
                "serviceId": "knotless-braids",
                "size": "medium",
                "length": "waist",
                "addOnIds": ["boho-curls", "boho-curls"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"totalPrice": 145, "duration": 5.0, "deposit": 50}));
    }

    #[tokio::test]
    async fn test_quote_base_figures_without_style() {
        let (_, body) = send(
            app(state(None)),
            Method::POST,
            "/api/quote",
            Some(json!({"serviceId": "knotless-braids"})),
        )
        .await;
        assert_eq!(body["data"]["totalPrice"], 80);
        assert_eq!(body["data"]["duration"], 5.0);
    }

    #[tokio::test]
    async fn test_quote_unknown_ids() {
        let (status, body) = send(
            app(state(None)),
            Method::POST,
            "/api/quote",
            Some(json!({"serviceId": "dreadlocks"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, _) = send(
            app(state(None)),
            Method::POST,
            "/api/quote",
            Some(json!({"serviceId": "cornrows", "addOnIds": ["glitter"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
