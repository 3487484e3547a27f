//! Booking payload validation.
//!
//! The wire payload is deserialized leniently (every field defaults) and then
//! checked in a single pass so that every failing field is reported together,
//! keyed by its dotted camelCase path (`customerInfo.whatsapp`, `addOns.0.price`).

use chrono::{DateTime, FixedOffset, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::catalog::{AddOn, Length, Size};

/// Smallest total a booking may be submitted with.
pub const MIN_TOTAL_PRICE: f64 = 50.0;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z\s'\-]+$").expect("name pattern"));
/// Ghanaian mobile number in international form without the plus sign.
static WHATSAPP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^233\d{9}$").expect("whatsapp pattern"));
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(1[0-2]|0?[1-9]):[0-5][0-9]\s?(AM|PM)$").expect("time pattern")
});

/// Field path → human readable message.
pub type FieldErrors = BTreeMap<String, String>;

// ── Wire payload ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerInfoRequest {
    #[validate(
        length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"),
        custom(function = "validate_name")
    )]
    pub name: String,

    #[validate(
        length(equal = 12, message = "WhatsApp number must be 12 digits, e.g. 233241234567"),
        custom(function = "validate_whatsapp")
    )]
    pub whatsapp: String,

    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,

    #[validate(length(max = 500, message = "Special request must be at most 500 characters"))]
    pub special_request: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct AddOnRequest {
    #[validate(length(min = 1, message = "Add-on id is required"))]
    pub id: String,

    #[validate(length(min = 1, message = "Add-on name is required"))]
    pub name: String,

    #[validate(range(exclusive_min = 0.0, message = "Add-on price must be positive"))]
    pub price: f64,

    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingRequest {
    #[validate(length(min = 1, message = "Please select a service"))]
    pub service_id: String,

    #[validate(length(min = 1, message = "Service name is required"))]
    pub service_name: String,

    #[validate(custom(function = "validate_size"))]
    pub size: String,

    #[validate(custom(function = "validate_length"))]
    pub length: String,

    #[validate(nested)]
    pub add_ons: Vec<AddOnRequest>,

    /// Checked against the studio's current day outside the derive.
    pub date: String,

    #[validate(custom(function = "validate_time"))]
    pub time: String,

    #[validate(range(min = MIN_TOTAL_PRICE, message = "Total price must be at least 50"))]
    pub total_price: f64,

    #[validate(range(
        min = 0.5,
        max = 12.0,
        message = "Duration must be between 0.5 and 12 hours"
    ))]
    pub duration: f64,

    #[validate(nested)]
    pub customer_info: CustomerInfoRequest,
}

// ── Validated output ──

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: String,
    pub whatsapp: String,
    pub email: String,
    pub special_request: String,
}

/// A booking that passed every rule. Only this type reaches email rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedBooking {
    pub service_id: String,
    pub service_name: String,
    pub size: Size,
    pub length: Length,
    pub add_ons: Vec<AddOn>,
    pub date: NaiveDate,
    pub time: String,
    pub total_price: f64,
    pub duration: f64,
    pub customer: CustomerInfo,
}

// ── Field rules ──

fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_name(value: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(field_error(
            "name",
            "Name can only contain letters, spaces, hyphens and apostrophes",
        ))
    }
}

fn validate_whatsapp(value: &str) -> Result<(), ValidationError> {
    if WHATSAPP_RE.is_match(value) {
        Ok(())
    } else {
        Err(field_error(
            "whatsapp",
            "WhatsApp number must start with 233 followed by 9 digits",
        ))
    }
}

fn validate_size(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<Size>()
        .map(|_| ())
        .map_err(|_| {
            field_error(
                "size",
                "Please select a braid size (small, medium or jumbo)",
            )
        })
}

fn validate_length(value: &str) -> Result<(), ValidationError> {
    value.parse::<Length>().map(|_| ()).map_err(|_| {
        field_error(
            "length",
            "Please select a hair length (shoulder, midBack, waist or butt)",
        )
    })
}

fn validate_time(value: &str) -> Result<(), ValidationError> {
    if is_twelve_hour_time(value) {
        Ok(())
    } else {
        Err(field_error("time", "Time must look like 9:00 AM"))
    }
}

pub fn is_twelve_hour_time(value: &str) -> bool {
    TIME_RE.is_match(value)
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (read in studio local time).
pub fn parse_booking_date(raw: &str, offset: FixedOffset) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&offset).date_naive())
}

fn check_date(
    raw: &str,
    today: NaiveDate,
    offset: FixedOffset,
) -> Result<NaiveDate, &'static str> {
    if raw.trim().is_empty() {
        return Err("Please select a date");
    }
    let date = parse_booking_date(raw, offset).ok_or("Please select a valid date")?;
    if date < today {
        return Err("Date cannot be in the past");
    }
    Ok(date)
}

// ── JSON shape ──

/// JSON type a payload field must have before it is deserialized.
#[derive(Debug, Clone, Copy)]
enum Shape {
    Text,
    Number,
    List,
    Object,
}

impl Shape {
    fn matches(self, value: &Value) -> bool {
        match self {
            Shape::Text => value.is_string(),
            Shape::Number => value.is_number(),
            Shape::List => value.is_array(),
            Shape::Object => value.is_object(),
        }
    }
}

type FieldShape = (&'static str, Shape, &'static str);

const BOOKING_SHAPE: [FieldShape; 10] = [
    ("serviceId", Shape::Text, "Service id must be text"),
    ("serviceName", Shape::Text, "Service name must be text"),
    ("size", Shape::Text, "Size must be text"),
    ("length", Shape::Text, "Length must be text"),
    ("addOns", Shape::List, "Add-ons must be a list"),
    ("date", Shape::Text, "Date must be text, e.g. 2026-10-20"),
    ("time", Shape::Text, "Time must be text, e.g. 9:00 AM"),
    ("totalPrice", Shape::Number, "Total price must be a number"),
    ("duration", Shape::Number, "Duration must be a number of hours"),
    ("customerInfo", Shape::Object, "Customer details are required"),
];

const CUSTOMER_SHAPE: [FieldShape; 4] = [
    ("name", Shape::Text, "Name must be text"),
    ("whatsapp", Shape::Text, "WhatsApp number must be text, e.g. 233241234567"),
    ("email", Shape::Text, "Email must be text"),
    ("specialRequest", Shape::Text, "Special request must be text"),
];

const ADD_ON_SHAPE: [FieldShape; 4] = [
    ("id", Shape::Text, "Add-on id must be text"),
    ("name", Shape::Text, "Add-on name must be text"),
    ("price", Shape::Number, "Add-on price must be a number"),
    ("description", Shape::Text, "Add-on description must be text"),
];

/// Remove nulls and wrongly typed fields so they fall back to defaults.
/// Each wrong type is recorded under its own path.
fn strip_mismatched(
    object: &mut Map<String, Value>,
    fields: &[FieldShape],
    prefix: &str,
    errors: &mut FieldErrors,
) {
    for &(name, shape, message) in fields {
        let Some(value) = object.get(name) else {
            continue;
        };
        if value.is_null() {
            object.remove(name);
        } else if !shape.matches(value) {
            errors.insert(join_path(prefix, name), message.to_string());
            object.remove(name);
        }
    }
}

/// A copy of `payload` that always deserializes into `BookingRequest`,
/// plus the type errors found on the way.
fn conform(payload: &Map<String, Value>) -> (Value, FieldErrors) {
    let mut root = payload.clone();
    let mut errors = FieldErrors::new();
    strip_mismatched(&mut root, &BOOKING_SHAPE, "", &mut errors);

    if let Some(Value::Object(customer)) = root.get_mut("customerInfo") {
        strip_mismatched(customer, &CUSTOMER_SHAPE, "customerInfo", &mut errors);
    }
    if let Some(Value::Array(items)) = root.get_mut("addOns") {
        for (i, item) in items.iter_mut().enumerate() {
            let path = format!("addOns.{i}");
            match item {
                Value::Object(add_on) => {
                    strip_mismatched(add_on, &ADD_ON_SHAPE, &path, &mut errors)
                }
                _ => {
                    errors.insert(path, "Each add-on must be an object".into());
                    *item = Value::Object(Map::new());
                }
            }
        }
    }
    (Value::Object(root), errors)
}

/// True when `path` is `parent` or lies underneath it.
fn is_under(path: &str, parent: &str) -> bool {
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

// ── Error flattening ──

/// `total_price` → `totalPrice`.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn collect_errors(errors: &ValidationErrors, prefix: &str, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, &camel_case(&field.to_string()));
        match kind {
            ValidationErrorsKind::Field(list) => {
                // First failing rule wins for each field.
                if let Some(first) = list.first() {
                    let message = first
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", first.code));
                    out.insert(path, message);
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_errors(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_errors(inner, &format!("{path}.{index}"), out);
                }
            }
        }
    }
}

/// Flatten `validator` output into dotted field paths.
pub fn flatten_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut out = FieldErrors::new();
    collect_errors(errors, "", &mut out);
    out
}

// ── Entry point ──

impl CustomerInfoRequest {
    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.whatsapp = self.whatsapp.trim().to_string();
        self.email = self.email.trim().to_lowercase();
    }
}

impl BookingRequest {
    fn normalize(&mut self) {
        self.service_id = self.service_id.trim().to_string();
        self.time = self.time.trim().to_string();
        self.customer_info.normalize();
    }
}

/// Contact-detail rules on their own, keyed like the full payload.
pub fn validate_customer(customer: &CustomerInfoRequest) -> FieldErrors {
    let mut customer = customer.clone();
    customer.normalize();
    let mut out = FieldErrors::new();
    if let Err(e) = customer.validate() {
        collect_errors(&e, "customerInfo", &mut out);
    }
    out
}

/// Validate an untyped booking payload.
///
/// Never panics: the result is either a fully typed booking or every
/// field error found.
pub fn validate_booking(
    payload: &serde_json::Value,
    today: NaiveDate,
    offset: FixedOffset,
) -> Result<ValidatedBooking, FieldErrors> {
    let Some(object) = payload.as_object() else {
        return Err(FieldErrors::from([(
            "payload".to_string(),
            "Booking details must be a JSON object".to_string(),
        )]));
    };

    let (conformed, mut errors) = conform(object);
    let mut request: BookingRequest = serde_json::from_value(conformed).map_err(|e| {
        FieldErrors::from([(
            "payload".to_string(),
            format!("Malformed booking details: {e}"),
        )])
    })?;
    request.normalize();

    // A wrongly typed field keeps its type error; rule failures on the
    // default that replaced it are noise.
    if let Err(e) = request.validate() {
        for (path, message) in flatten_errors(&e) {
            if !errors.keys().any(|typed| is_under(&path, typed)) {
                errors.insert(path, message);
            }
        }
    }

    let date = if errors.contains_key("date") {
        None
    } else {
        match check_date(&request.date, today, offset) {
            Ok(date) => Some(date),
            Err(message) => {
                errors.insert("date".into(), message.into());
                None
            }
        }
    };

    let mut seen = HashSet::new();
    if request
        .add_ons
        .iter()
        .filter(|a| !a.id.is_empty())
        .any(|a| !seen.insert(a.id.as_str()))
    {
        errors.insert(
            "addOns".into(),
            "Each add-on can only be selected once".into(),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // All rules passed, so the enum parses and the date is present.
    let (Ok(size), Ok(length), Some(date)) = (
        request.size.parse::<Size>(),
        request.length.parse::<Length>(),
        date,
    ) else {
        return Err(FieldErrors::from([(
            "payload".to_string(),
            "Malformed booking details".to_string(),
        )]));
    };

    let customer = request.customer_info;
    Ok(ValidatedBooking {
        service_id: request.service_id,
        service_name: request.service_name,
        size,
        length,
        add_ons: request
            .add_ons
            .into_iter()
            .map(|a| AddOn {
                id: a.id,
                name: a.name,
                price: a.price,
                description: a.description,
            })
            .collect(),
        date,
        time: request.time.to_uppercase(),
        total_price: request.total_price,
        duration: request.duration,
        customer: CustomerInfo {
            name: customer.name,
            whatsapp: customer.whatsapp,
            email: customer.email,
            special_request: customer.special_request.unwrap_or_default(),
        },
    })
}
