use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::{AddOn, Catalog, ServiceDefinition};
use crate::email::{self, BookingNotice};
use crate::mailer::classify_failure;
use crate::models::SubmitBookingResponse;
use crate::pricing::{self, DepositPolicy, PricingResult};
use crate::validation::{validate_booking, FieldErrors, ValidatedBooking};
use crate::AppState;

const ACCEPTED_MESSAGE: &str =
    "Booking request sent! We'll contact you on WhatsApp shortly to confirm and arrange your deposit.";
const NOT_CONFIGURED_MESSAGE: &str =
    "Online booking is not available right now. Please contact us directly on WhatsApp.";

/// Submitted durations may differ from the catalog by rounding noise only.
const DURATION_TOLERANCE: f64 = 0.05;

/// Check a validated booking against the catalog and swap in catalog names
/// and prices. The submitted total and duration must match what the catalog
/// computes for the same selection.
fn reprice<'c>(
    catalog: &'c Catalog,
    policy: DepositPolicy,
    booking: &mut ValidatedBooking,
) -> Result<(&'c ServiceDefinition, PricingResult), FieldErrors> {
    let mut errors = FieldErrors::new();

    let service = catalog.service(&booking.service_id);
    if service.is_none() {
        errors.insert("serviceId".into(), "Please select one of our services".into());
    }

    let mut add_ons: Vec<AddOn> = Vec::with_capacity(booking.add_ons.len());
    for (i, submitted) in booking.add_ons.iter().enumerate() {
        match catalog.add_on(&submitted.id) {
            Some(add_on) => add_ons.push(add_on.clone()),
            None => {
                errors.insert(format!("addOns.{i}.id"), "Unknown add-on".into());
            }
        }
    }

    let Some(service) = service.filter(|_| errors.is_empty()) else {
        return Err(errors);
    };

    let pricing = pricing::compute_price(
        service,
        Some(booking.size),
        Some(booking.length),
        &add_ons,
        policy,
    )
    .map_err(|e| {
        tracing::error!("Catalog pricing error: {e}");
        FieldErrors::from([(
            "serviceId".to_string(),
            "This service cannot be booked right now".to_string(),
        )])
    })?;

    if booking.total_price.round() as i64 != pricing.total_price {
        errors.insert(
            "totalPrice".into(),
            format!(
                "Total price does not match our current prices (expected {})",
                pricing.total_price
            ),
        );
    }
    if (booking.duration - pricing.duration).abs() > DURATION_TOLERANCE {
        errors.insert(
            "duration".into(),
            format!(
                "Duration does not match the selected style (expected {} hours)",
                pricing.duration
            ),
        );
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    booking.service_name = service.name.clone();
    booking.add_ons = add_ons;
    booking.total_price = pricing.total_price as f64;
    booking.duration = pricing.duration;
    Ok((service, pricing))
}

/// Validate, price, render and send one booking. Shared by the direct
/// submission endpoint and wizard sessions.
pub async fn process_submission(
    state: &AppState,
    payload: &Value,
) -> (StatusCode, SubmitBookingResponse) {
    let today = state.clock.today();
    let mut booking = match validate_booking(payload, today, state.clock.offset()) {
        Ok(booking) => booking,
        Err(errors) => {
            tracing::info!(
                fields = ?errors.keys().collect::<Vec<_>>(),
                "Booking rejected by validation"
            );
            return (StatusCode::BAD_REQUEST, SubmitBookingResponse::invalid(errors));
        }
    };

    let (service, pricing) = match reprice(&state.catalog, state.deposit_policy, &mut booking) {
        Ok(priced) => priced,
        Err(errors) => {
            tracing::info!(
                service_id = %booking.service_id,
                fields = ?errors.keys().collect::<Vec<_>>(),
                "Booking rejected by catalog check"
            );
            return (StatusCode::BAD_REQUEST, SubmitBookingResponse::invalid(errors));
        }
    };

    let contact_url = email::contact_link(&state.studio_whatsapp, Some(&service.name));

    let Some(mailer) = state.mailer.as_ref() else {
        tracing::warn!("Booking received but email delivery is not configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            SubmitBookingResponse::failed(NOT_CONFIGURED_MESSAGE).with_contact(contact_url),
        );
    };

    let booking_id = format!("{}-{}", booking.service_id, chrono::Utc::now().timestamp_millis());
    let size_label = service
        .sizes
        .get(&booking.size)
        .map(|v| v.label.as_str())
        .unwrap_or(booking.size.as_str());
    let length_label = service
        .lengths
        .get(&booking.length)
        .map(|v| v.label.as_str())
        .unwrap_or(booking.length.as_str());

    let rendered = email::render_booking_email(&BookingNotice {
        booking_id: &booking_id,
        booking: &booking,
        pricing,
        currency: &state.catalog.currency,
        size_label,
        length_label,
    });

    match mailer.send(&rendered, Some(booking.customer.email.as_str())).await {
        Ok(message_id) => {
            tracing::info!(
                booking_id = %booking_id,
                message_id = %message_id,
                total = pricing.total_price,
                "Booking email sent"
            );
            (
                StatusCode::OK,
                SubmitBookingResponse::accepted(booking_id, ACCEPTED_MESSAGE, pricing),
            )
        }
        Err(e) => {
            let failure = classify_failure(&e.to_string());
            tracing::error!(booking_id = %booking_id, kind = ?failure, "Booking email failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                SubmitBookingResponse::failed(failure.user_message())
                    .retryable()
                    .with_contact(contact_url),
            )
        }
    }
}

/// POST /api/bookings
///
/// Takes the raw body so that malformed JSON is reported in the same
/// `{success, error, errors}` shape as any other invalid booking.
pub async fn submit_booking(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<SubmitBookingResponse>) {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            let errors = FieldErrors::from([(
                "payload".to_string(),
                format!("Booking details must be valid JSON: {e}"),
            )]);
            return (StatusCode::BAD_REQUEST, Json(SubmitBookingResponse::invalid(errors)));
        }
    };

    let (status, response) = process_submission(&state, &payload).await;
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, state, tomorrow, unreachable_mailer};
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::build_router;
    use crate::rate_limit::{RateLimitConfig, RateLimiter, Tier};

    fn payload(date: &str) -> Value {
        json!({
            "serviceId": "knotless-braids",
            "serviceName": "Knotless Braids",
            "size": "medium",
            "length": "waist",
            "addOns": [
                {
                    "id": "boho-curls",
                    "name": "Boho Curls",
                    "price": 25,
                    "description": "Curly pieces"
                }
            ],
            "date": date,
            "time": "10:00 am",
            "totalPrice": 145,
            "duration": 5,
            "customerInfo": {
                "name": "Ama Mensah",
                "whatsapp": "233241234567",
                "email": "Ama@Example.com"
            }
        })
    }

    fn validated(state: &AppState, payload: &Value) -> ValidatedBooking {
        validate_booking(payload, state.clock.today(), state.clock.offset()).unwrap()
    }

    #[test]
    fn test_reprice_uses_catalog_figures() {
        let state = state(None);
        let mut body = payload(&tomorrow(&state));
        body["serviceName"] = json!("Cheap Braids");
        body["addOns"][0]["price"] = json!(1);
        let mut booking = validated(&state, &body);

        let (service, pricing) =
            reprice(&state.catalog, state.deposit_policy, &mut booking).unwrap();
        assert_eq!(service.id, "knotless-braids");
        assert_eq!(pricing.total_price, 145);
        assert_eq!(booking.service_name, "Knotless Braids");
        assert_eq!(booking.add_ons[0].price, 25.0);
    }

    #[test]
    fn test_reprice_rejects_tampered_total() {
        let state = state(None);
        let mut body = payload(&tomorrow(&state));
        body["totalPrice"] = json!(100);
        body["duration"] = json!(3);
        let mut booking = validated(&state, &body);

        let errors = reprice(&state.catalog, state.deposit_policy, &mut booking).unwrap_err();
        assert_eq!(
            errors.keys().collect::<Vec<_>>(),
            vec!["duration", "totalPrice"]
        );
    }

    #[test]
    fn test_reprice_unknown_ids() {
        let state = state(None);
        let mut body = payload(&tomorrow(&state));
        body["serviceId"] = json!("dreadlocks");
        body["addOns"][0]["id"] = json!("glitter");
        let mut booking = validated(&state, &body);

        let errors = reprice(&state.catalog, state.deposit_policy, &mut booking).unwrap_err();
        assert!(errors.contains_key("serviceId"));
        assert!(errors.contains_key("addOns.0.id"));
    }

    #[tokio::test]
    async fn test_invalid_booking_reports_every_field() {
        let state = state(Some(unreachable_mailer()));
        let mut body = payload(&tomorrow(&state));
        body["customerInfo"]["whatsapp"] = json!("12345");
        body["customerInfo"]["email"] = json!("not-an-email");
        body["totalPrice"] = json!(30);

        let (status, resp) = send(app(state), Method::POST, "/api/bookings", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["success"], false);
        let errors = resp["errors"].as_object().unwrap();
        assert!(errors.contains_key("customerInfo.whatsapp"));
        assert!(errors.contains_key("customerInfo.email"));
        assert!(errors.contains_key("totalPrice"));
        assert!(resp.get("retryable").is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_payload_error() {
        let app = app(state(None));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/bookings")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["errors"]["payload"].is_string());
    }

    #[tokio::test]
    async fn test_not_configured_without_mailer() {
        let state = state(None);
        let body = payload(&tomorrow(&state));
        let (status, resp) = send(app(state), Method::POST, "/api/bookings", Some(body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp["success"], false);
        assert_eq!(resp["error"], NOT_CONFIGURED_MESSAGE);
        assert!(resp["contactUrl"]
            .as_str()
            .unwrap()
            .starts_with("https://wa.me/233200000000?text="));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let state = state(Some(unreachable_mailer()));
        let body = payload(&tomorrow(&state));
        let (status, resp) = send(app(state), Method::POST, "/api/bookings", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(resp["success"], false);
        assert_eq!(resp["retryable"], true);
        assert_eq!(
            resp["error"],
            crate::mailer::DeliveryFailure::Network.user_message()
        );
        assert!(resp["contactUrl"].is_string());
    }

    #[tokio::test]
    async fn test_booking_tier_is_rate_limited() {
        let limiter = RateLimiter::new();
        limiter.add_tier(
            Tier::Booking,
            RateLimitConfig {
                max_requests: 1,
                window: Duration::from_secs(300),
            },
        );
        let state = state(None);
        let body = payload(&tomorrow(&state));
        let app = build_router(state, limiter);

        let (status, _) =
            send(app.clone(), Method::POST, "/api/bookings", Some(body.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, resp) = send(app, Method::POST, "/api/bookings", Some(body)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp["ok"], false);
    }
}
