use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::{AddOn, Length, ServiceDefinition, Size};
use crate::pricing::{DepositPolicy, PricingResult};
use crate::session::{BookingSelection, RetryDecision, Step};
use crate::validation::{CustomerInfoRequest, FieldErrors};

// ── Generic envelope ──

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            errors: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            errors: None,
        }
    }
}

// ── Catalog / quote ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse<'a> {
    pub currency: &'a str,
    pub services: &'a [ServiceDefinition],
    pub add_ons: &'a [AddOn],
    pub time_slots: &'a [String],
    pub deposit_policy: DepositPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub service_id: String,
    pub size: Option<Size>,
    pub length: Option<Length>,
    #[serde(default)]
    pub add_on_ids: Vec<String>,
}

// ── Booking submission ──

/// Answer of the submission entry point.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBookingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingResult>,
    /// Transport failures may be retried; validation failures may not.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
}

impl SubmitBookingResponse {
    pub fn accepted(
        booking_id: String,
        message: impl Into<String>,
        pricing: PricingResult,
    ) -> Self {
        Self {
            success: true,
            booking_id: Some(booking_id),
            message: Some(message.into()),
            error: None,
            errors: None,
            pricing: Some(pricing),
            retryable: false,
            retry: None,
            contact_url: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            booking_id: None,
            message: None,
            error: Some(error.into()),
            errors: None,
            pricing: None,
            retryable: false,
            retry: None,
            contact_url: None,
        }
    }

    pub fn invalid(errors: FieldErrors) -> Self {
        Self {
            errors: Some(errors),
            ..Self::failed("Please correct the highlighted fields and try again.")
        }
    }

    pub fn with_contact(mut self, url: String) -> Self {
        self.contact_url = Some(url);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

// ── Wizard sessions ──

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    pub service_id: Option<String>,
    pub size: Option<Size>,
    pub length: Option<Length>,
    pub toggle_add_on: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub customer: Option<CustomerInfoRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub step: Step,
    pub valid: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub current_step: Step,
    pub steps: Vec<StepState>,
    pub selection: BookingSelection,
    pub pricing: Option<PricingResult>,
    /// Errors blocking the current step.
    pub errors: FieldErrors,
    pub failed_attempts: u8,
    pub can_submit: bool,
}
