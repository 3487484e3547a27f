//! Wizard session endpoints. Every client drives the same server-side
//! `BookingSession`, so step gating and pricing never diverge between them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::booking::process_submission;
use crate::email;
use crate::models::{
    ApiResponse, SessionPatch, SessionView, StepState, SubmitBookingResponse,
};
use crate::session::{BookingSession, RetryDecision, SessionError, Step};
use crate::validation::FieldErrors;
use crate::AppState;

type SessionReply = (StatusCode, Json<ApiResponse<SessionView>>);

const SESSION_NOT_FOUND: &str = "Booking session not found or expired. Please start again.";

fn view(id: Uuid, session: &BookingSession) -> SessionView {
    let current = session.current_step();
    SessionView {
        id: id.to_string(),
        current_step: current,
        steps: Step::ALL
            .iter()
            .map(|&step| StepState {
                step,
                valid: session.is_step_valid(step),
            })
            .collect(),
        selection: session.selection().clone(),
        pricing: session.pricing().ok().flatten(),
        errors: session.step_errors(current),
        failed_attempts: session.failed_attempts(),
        can_submit: session.can_submit(),
    }
}

fn not_found() -> SessionReply {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(SESSION_NOT_FOUND)))
}

fn rejected(message: &str, errors: FieldErrors, view: SessionView) -> SessionReply {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse {
            ok: false,
            data: Some(view),
            error: Some(message.to_string()),
            errors: Some(errors),
        }),
    )
}

/// POST /api/sessions
pub async fn create_session(State(state): State<Arc<AppState>>) -> SessionReply {
    let session = BookingSession::new(state.catalog.clone(), state.clock, state.deposit_policy);
    let current = view(Uuid::nil(), &session);
    let id = state.sessions.create(session);
    tracing::debug!(session_id = %id, "Booking session started");

    (
        StatusCode::CREATED,
        Json(ApiResponse::success(SessionView {
            id: id.to_string(),
            ..current
        })),
    )
}

/// GET /api/sessions/{id}
pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionReply {
    match state.sessions.with_session(id, |s| view(id, s)) {
        Some(v) => (StatusCode::OK, Json(ApiResponse::success(v))),
        None => not_found(),
    }
}

/// PATCH /api/sessions/{id}: apply whichever selections are present.
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionPatch>,
) -> SessionReply {
    let outcome = state.sessions.with_session(id, |s| {
        let mut errors = FieldErrors::new();

        if let Some(service_id) = patch.service_id.as_deref() {
            if let Err(SessionError::UnknownService(_)) = s.select_service(service_id) {
                errors.insert("serviceId".into(), "Please select one of our services".into());
            }
        }
        if let Some(size) = patch.size {
            s.select_size(size);
        }
        if let Some(length) = patch.length {
            s.select_length(length);
        }
        if let Some(add_on) = patch.toggle_add_on.as_deref() {
            if let Err(SessionError::UnknownAddOn(_)) = s.toggle_add_on(add_on) {
                errors.insert("toggleAddOn".into(), "Unknown add-on".into());
            }
        }
        if let Some(date) = patch.date {
            s.select_date(date);
        }
        if let Some(time) = patch.time.as_deref() {
            s.select_time(time);
        }
        if let Some(customer) = patch.customer {
            s.set_customer(customer);
        }

        (errors, view(id, s))
    });

    match outcome {
        None => not_found(),
        Some((errors, v)) if errors.is_empty() => {
            (StatusCode::OK, Json(ApiResponse::success(v)))
        }
        Some((errors, v)) => rejected("Some selections were not recognised", errors, v),
    }
}

/// POST /api/sessions/{id}/advance
pub async fn advance_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> SessionReply {
    let outcome = state.sessions.with_session(id, |s| {
        let result = s.advance();
        (result, view(id, s))
    });

    match outcome {
        None => not_found(),
        Some((Ok(_), v)) => (StatusCode::OK, Json(ApiResponse::success(v))),
        Some((Err(SessionError::StepIncomplete { errors, .. }), v)) => {
            rejected("Please complete this step before continuing", errors, v)
        }
        Some((Err(e), v)) => rejected(&e.to_string(), FieldErrors::new(), v),
    }
}

/// POST /api/sessions/{id}/retreat
pub async fn retreat_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> SessionReply {
    match state.sessions.with_session(id, |s| {
        s.retreat();
        view(id, s)
    }) {
        Some(v) => (StatusCode::OK, Json(ApiResponse::success(v))),
        None => not_found(),
    }
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.sessions.remove(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// POST /api/sessions/{id}/submit
///
/// Submits the session's booking. Transport failures count against the
/// session's retry budget; once it is spent the client is pointed to WhatsApp.
pub async fn submit_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<SubmitBookingResponse>) {
    let prepared = state.sessions.with_session(id, |s| {
        let service_name = s
            .selection()
            .service_id
            .as_deref()
            .and_then(|sid| state.catalog.service(sid))
            .map(|svc| svc.name.clone());

        let errors = s.step_errors(Step::Review);
        if !errors.is_empty() {
            return Err((StatusCode::BAD_REQUEST, SubmitBookingResponse::invalid(errors)));
        }
        if s.current_step() != Step::Review {
            return Err((
                StatusCode::BAD_REQUEST,
                SubmitBookingResponse::failed("Please review your booking before submitting"),
            ));
        }

        match s.begin_submission() {
            Ok(payload) => Ok(payload),
            Err(e @ SessionError::RetriesExhausted) => {
                let contact = email::contact_link(&state.studio_whatsapp, service_name.as_deref());
                let mut resp = SubmitBookingResponse::failed(e.to_string()).with_contact(contact);
                resp.retry = Some(RetryDecision::ContactDirectly);
                Err((StatusCode::CONFLICT, resp))
            }
            Err(e @ SessionError::SubmissionInProgress) => {
                Err((StatusCode::CONFLICT, SubmitBookingResponse::failed(e.to_string())))
            }
            Err(e) => Err((
                StatusCode::BAD_REQUEST,
                SubmitBookingResponse::failed(e.to_string()),
            )),
        }
    });

    let payload = match prepared {
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(SubmitBookingResponse::failed(SESSION_NOT_FOUND)),
            )
        }
        Some(Err((status, resp))) => return (status, Json(resp)),
        Some(Ok(payload)) => payload,
    };

    let (status, mut resp) = process_submission(&state, &payload).await;

    if resp.success {
        state.sessions.remove(id);
        tracing::info!(session_id = %id, "Booking session completed");
        return (status, Json(resp));
    }

    let counts = status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE;
    let decision = state
        .sessions
        .with_session(id, |s| {
            s.finish_submission();
            counts.then(|| s.record_failure())
        })
        .flatten();
    if decision == Some(RetryDecision::ContactDirectly) {
        resp.retryable = false;
    }
    if decision.is_some() {
        resp.retry = decision;
    }

    (status, Json(resp))
}
