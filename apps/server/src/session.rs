//! Booking wizard state machine.
//!
//! One `BookingSession` drives every client (mobile, desktop, anything else):
//! it owns the selection, knows which step is current and whether each step is
//! complete, and produces the payload that `POST /api/bookings` validates.
//! Sessions live in memory only and are dropped after a successful submission,
//! an explicit reset, or `ttl` of inactivity.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::catalog::{AddOn, Catalog, Length, ServiceDefinition, Size};
use crate::config::StudioClock;
use crate::pricing::{self, DepositPolicy, PricingError, PricingResult};
use crate::validation::{
    validate_customer, AddOnRequest, BookingRequest, CustomerInfoRequest, FieldErrors,
    MIN_TOTAL_PRICE,
};

/// Failed submissions allowed to be retried before sending the customer to WhatsApp.
pub const MAX_RETRIES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Service,
    Style,
    AddOns,
    Schedule,
    Details,
    Review,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Service,
        Step::Style,
        Step::AddOns,
        Step::Schedule,
        Step::Details,
        Step::Review,
    ];

    pub fn index(self) -> usize {
        Step::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn next(self) -> Option<Step> {
        Step::ALL.get(self.index() + 1).copied()
    }

    pub fn prev(self) -> Option<Step> {
        self.index().checked_sub(1).map(|i| Step::ALL[i])
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSelection {
    pub service_id: Option<String>,
    pub size: Option<Size>,
    pub length: Option<Length>,
    pub add_ons: Vec<AddOn>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub customer: CustomerInfoRequest,
}

/// What the client should offer after a failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RetryDecision {
    TryAgain {
        #[serde(rename = "retriesLeft")]
        retries_left: u8,
    },
    ContactDirectly,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("unknown add-on {0}")]
    UnknownAddOn(String),
    #[error("step {step:?} is incomplete")]
    StepIncomplete { step: Step, errors: FieldErrors },
    #[error("no service selected")]
    NoServiceSelected,
    #[error("too many failed attempts, please contact the studio directly")]
    RetriesExhausted,
    #[error("this booking is already being submitted")]
    SubmissionInProgress,
    #[error(transparent)]
    Pricing(#[from] PricingError),
}

#[derive(Debug, Clone)]
pub struct BookingSession {
    catalog: Arc<Catalog>,
    clock: StudioClock,
    policy: DepositPolicy,
    selection: BookingSelection,
    step: Step,
    failed_attempts: u8,
    submitting: bool,
}

impl BookingSession {
    pub fn new(catalog: Arc<Catalog>, clock: StudioClock, policy: DepositPolicy) -> Self {
        Self {
            catalog,
            clock,
            policy,
            selection: BookingSelection::default(),
            step: Step::Service,
            failed_attempts: 0,
            submitting: false,
        }
    }

    pub fn current_step(&self) -> Step {
        self.step
    }

    pub fn selection(&self) -> &BookingSelection {
        &self.selection
    }

    pub fn failed_attempts(&self) -> u8 {
        self.failed_attempts
    }

    fn service(&self) -> Option<&ServiceDefinition> {
        self.selection
            .service_id
            .as_deref()
            .and_then(|id| self.catalog.service(id))
    }

    // ── Selections ──

    pub fn select_service(&mut self, id: &str) -> Result<(), SessionError> {
        if self.catalog.service(id).is_none() {
            return Err(SessionError::UnknownService(id.to_string()));
        }
        self.selection.service_id = Some(id.to_string());
        Ok(())
    }

    pub fn select_size(&mut self, size: Size) {
        self.selection.size = Some(size);
    }

    pub fn select_length(&mut self, length: Length) {
        self.selection.length = Some(length);
    }

    /// Returns whether the add-on is selected afterwards.
    pub fn toggle_add_on(&mut self, id: &str) -> Result<bool, SessionError> {
        let add_on = self
            .catalog
            .add_on(id)
            .ok_or_else(|| SessionError::UnknownAddOn(id.to_string()))?;
        pricing::toggle_add_on(&mut self.selection.add_ons, add_on);
        Ok(self.selection.add_ons.iter().any(|a| a.id == id))
    }

    pub fn select_date(&mut self, date: NaiveDate) {
        self.selection.date = Some(date);
    }

    pub fn select_time(&mut self, time: &str) {
        self.selection.time = Some(time.trim().to_string());
    }

    pub fn set_customer(&mut self, customer: CustomerInfoRequest) {
        self.selection.customer = customer;
    }

    // ── Derived state ──

    /// Current totals, or `None` until a service is chosen.
    pub fn pricing(&self) -> Result<Option<PricingResult>, SessionError> {
        let Some(service) = self.service() else {
            return Ok(None);
        };
        let result = pricing::compute_price(
            service,
            self.selection.size,
            self.selection.length,
            &self.selection.add_ons,
            self.policy,
        )?;
        Ok(Some(result))
    }

    /// Field errors blocking `step`; empty when the step is complete.
    pub fn step_errors(&self, step: Step) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let sel = &self.selection;
        match step {
            Step::Service => {
                if self.service().is_none() {
                    errors.insert("serviceId".into(), "Please select a service".into());
                }
            }
            Step::Style => {
                if sel.size.is_none() {
                    errors.insert("size".into(), "Please select a braid size".into());
                }
                if sel.length.is_none() {
                    errors.insert("length".into(), "Please select a hair length".into());
                }
            }
            Step::AddOns => {}
            Step::Schedule => {
                match sel.date {
                    None => {
                        errors.insert("date".into(), "Please select a date".into());
                    }
                    Some(date) if date < self.clock.today() => {
                        errors.insert("date".into(), "Date cannot be in the past".into());
                    }
                    Some(_) => {}
                }
                match sel.time.as_deref() {
                    None => {
                        errors.insert("time".into(), "Please select a time".into());
                    }
                    Some(time) if !self.is_catalog_slot(time) => {
                        errors.insert(
                            "time".into(),
                            "Please pick one of the available times".into(),
                        );
                    }
                    Some(_) => {}
                }
            }
            Step::Details => {
                errors.extend(validate_customer(&sel.customer));
            }
            Step::Review => {
                for earlier in &Step::ALL[..Step::Review.index()] {
                    errors.extend(self.step_errors(*earlier));
                }
                if let Ok(Some(pricing)) = self.pricing() {
                    if (pricing.total_price as f64) < MIN_TOTAL_PRICE {
                        errors.insert(
                            "totalPrice".into(),
                            format!("Total price must be at least {MIN_TOTAL_PRICE}"),
                        );
                    }
                }
            }
        }
        errors
    }

    fn is_catalog_slot(&self, time: &str) -> bool {
        self.catalog
            .time_slots
            .iter()
            .any(|s| s.eq_ignore_ascii_case(time))
    }

    pub fn is_step_valid(&self, step: Step) -> bool {
        self.step_errors(step).is_empty()
    }

    // ── Navigation ──

    /// Move forward when the current step is complete. A no-op on the last step.
    pub fn advance(&mut self) -> Result<Step, SessionError> {
        let errors = self.step_errors(self.step);
        if !errors.is_empty() {
            return Err(SessionError::StepIncomplete {
                step: self.step,
                errors,
            });
        }
        if let Some(next) = self.step.next() {
            self.step = next;
        }
        Ok(self.step)
    }

    pub fn retreat(&mut self) -> Step {
        if let Some(prev) = self.step.prev() {
            self.step = prev;
        }
        self.step
    }

    pub fn reset(&mut self) {
        self.selection = BookingSelection::default();
        self.step = Step::Service;
        self.failed_attempts = 0;
        self.submitting = false;
    }

    // ── Submission ──

    pub fn can_submit(&self) -> bool {
        self.step == Step::Review
            && self.is_step_valid(Step::Review)
            && self.failed_attempts <= MAX_RETRIES
    }

    /// Build the wire payload `POST /api/bookings` accepts.
    pub fn to_payload(&self) -> Result<serde_json::Value, SessionError> {
        if self.failed_attempts > MAX_RETRIES {
            return Err(SessionError::RetriesExhausted);
        }
        let service = self.service().ok_or(SessionError::NoServiceSelected)?;
        let pricing = self.pricing()?.ok_or(SessionError::NoServiceSelected)?;
        let sel = &self.selection;

        let request = BookingRequest {
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            size: sel.size.map(|s| s.to_string()).unwrap_or_default(),
            length: sel.length.map(|l| l.to_string()).unwrap_or_default(),
            add_ons: sel
                .add_ons
                .iter()
                .map(|a| AddOnRequest {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    price: a.price,
                    description: a.description.clone(),
                })
                .collect(),
            date: sel
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            time: sel.time.clone().unwrap_or_default(),
            total_price: pricing.total_price as f64,
            duration: pricing.duration,
            customer_info: sel.customer.clone(),
        };
        Ok(serde_json::to_value(request).unwrap_or_default())
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Claim the session for one submission and build its payload.
    /// Only one submission may be in flight per session.
    pub fn begin_submission(&mut self) -> Result<serde_json::Value, SessionError> {
        if self.submitting {
            return Err(SessionError::SubmissionInProgress);
        }
        let payload = self.to_payload()?;
        self.submitting = true;
        Ok(payload)
    }

    pub fn finish_submission(&mut self) {
        self.submitting = false;
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let retries_used = self.failed_attempts - 1;
        if retries_used < MAX_RETRIES {
            RetryDecision::TryAgain {
                retries_left: MAX_RETRIES - retries_used,
            }
        } else {
            RetryDecision::ContactDirectly
        }
    }
}

// ── In-memory store ──

/// Live wizard sessions keyed by random id, expired after `ttl` idle time.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<Uuid, (BookingSession, Instant)>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn create(&self, session: BookingSession) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, (session, Instant::now()));
        id
    }

    /// Run `f` against a live session, refreshing its idle timer.
    pub fn with_session<R>(&self, id: Uuid, f: impl FnOnce(&mut BookingSession) -> R) -> Option<R> {
        let mut entry = self.sessions.get_mut(&id)?;
        let (session, touched) = entry.value_mut();
        if touched.elapsed() > self.ttl {
            drop(entry);
            self.sessions.remove(&id);
            return None;
        }
        *touched = Instant::now();
        Some(f(session))
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drop idle sessions. Call periodically from a background task.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.sessions.retain(|_, (_, touched)| touched.elapsed() <= ttl);
    }
}
