//! Booking notification emails and WhatsApp deep links.

use chrono::NaiveDate;
use serde::Serialize;

use crate::pricing::PricingResult;
use crate::validation::ValidatedBooking;

/// Everything the owner's notification needs.
pub struct BookingNotice<'a> {
    pub booking_id: &'a str,
    pub booking: &'a ValidatedBooking,
    pub pricing: PricingResult,
    pub currency: &'a str,
    pub size_label: &'a str,
    pub length_label: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn display_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn display_hours(hours: f64) -> String {
    if hours == 1.0 {
        "1 hour".into()
    } else {
        format!("{hours} hours")
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `https://wa.me/<number>?text=<message>` with the message percent-encoded.
pub fn whatsapp_link(number: &str, message: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    // form encoding writes spaces as '+', which wa.me shows literally
    format!("https://wa.me/{}?text={}", number, encoded.replace('+', "%20"))
}

/// Message the owner sends the customer to request the deposit.
pub fn confirmation_message(notice: &BookingNotice<'_>) -> String {
    let booking = notice.booking;
    let first_name = booking
        .customer
        .name
        .split_whitespace()
        .next()
        .unwrap_or(&booking.customer.name);
    format!(
        "Hi {first_name}! Thank you for booking {service} on {date} at {time}. \
         To secure your appointment, please send a deposit of {currency}{deposit}. \
         We'll confirm as soon as it is received.",
        service = booking.service_name,
        date = display_date(booking.date),
        time = booking.time,
        currency = notice.currency,
        deposit = notice.pricing.deposit,
    )
}

/// Fallback link for customers once online submission has failed for good.
pub fn contact_link(studio_number: &str, service_name: Option<&str>) -> String {
    let message = match service_name {
        Some(service) => format!(
            "Hi! I tried to book {service} online but it didn't go through. Can you help me book?"
        ),
        None => "Hi! I'd like to book an appointment.".to_string(),
    };
    whatsapp_link(studio_number, &message)
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:4px 12px 4px 0;color:#6b5b53\">{}</td>\
         <td style=\"padding:4px 0\"><strong>{}</strong></td></tr>",
        escape_html(label),
        escape_html(value)
    )
}

pub fn render_booking_email(notice: &BookingNotice<'_>) -> RenderedEmail {
    let booking = notice.booking;
    let customer = &booking.customer;
    let currency = notice.currency;
    let confirm_url = whatsapp_link(&customer.whatsapp, &confirmation_message(notice));

    let subject = format!(
        "New booking: {} for {} on {}",
        booking.service_name,
        customer.name,
        display_date(booking.date)
    );

    let add_on_lines: Vec<(String, String)> = booking
        .add_ons
        .iter()
        .map(|a| (a.name.clone(), format!("{currency}{}", a.price)))
        .collect();

    let special_request = if customer.special_request.is_empty() {
        "None".to_string()
    } else {
        customer.special_request.clone()
    };

    // ── Plain text ──
    let mut text = format!(
        "New booking request ({id})\n\n\
         CUSTOMER\n\
         Name: {name}\n\
         WhatsApp: +{whatsapp}\n\
         Email: {email}\n\n\
         APPOINTMENT\n\
         Service: {service}\n\
         Size: {size}\n\
         Length: {length}\n\
         Date: {date}\n\
         Time: {time}\n\
         Estimated duration: {duration}\n",
        id = notice.booking_id,
        name = customer.name,
        whatsapp = customer.whatsapp,
        email = customer.email,
        service = booking.service_name,
        size = notice.size_label,
        length = notice.length_label,
        date = display_date(booking.date),
        time = booking.time,
        duration = display_hours(notice.pricing.duration),
    );
    if !add_on_lines.is_empty() {
        text.push_str("\nADD-ONS\n");
        for (name, price) in &add_on_lines {
            text.push_str(&format!("- {name}: {price}\n"));
        }
    }
    text.push_str(&format!(
        "\nTotal: {currency}{total}\n\
         Deposit due: {currency}{deposit}\n\n\
         Special request: {special_request}\n\n\
         Send the deposit request on WhatsApp:\n{confirm_url}\n",
        total = notice.pricing.total_price,
        deposit = notice.pricing.deposit,
    ));

    // ── HTML ──
    let customer_rows = [
        row("Name", &customer.name),
        row("WhatsApp", &format!("+{}", customer.whatsapp)),
        row("Email", &customer.email),
    ]
    .concat();

    let appointment_rows = [
        row("Service", &booking.service_name),
        row("Size", notice.size_label),
        row("Length", notice.length_label),
        row("Date", &display_date(booking.date)),
        row("Time", &booking.time),
        row("Estimated duration", &display_hours(notice.pricing.duration)),
    ]
    .concat();

    let add_ons_html = if add_on_lines.is_empty() {
        String::new()
    } else {
        let rows: String = add_on_lines.iter().map(|(n, p)| row(n.as_str(), p.as_str())).collect();
        format!("<h3>Add-ons</h3><table>{rows}</table>")
    };

    let html = format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family:Arial,sans-serif;color:#2d221c;max-width:600px;margin:0 auto\">\
         <h2>New booking request</h2>\
         <p style=\"color:#6b5b53\">Reference: {id}</p>\
         <h3>Customer</h3><table>{customer_rows}</table>\
         <h3>Appointment</h3><table>{appointment_rows}</table>\
         {add_ons_html}\
         <h3>Payment</h3><table>{total_row}{deposit_row}</table>\
         <h3>Special request</h3><p>{special_request}</p>\
         <p><a href=\"{confirm_url}\" style=\"display:inline-block;padding:10px 18px;\
         background:#25d366;color:#fff;text-decoration:none;border-radius:6px\">\
         Request deposit on WhatsApp</a></p>\
         </body></html>",
        title = escape_html(&subject),
        id = escape_html(notice.booking_id),
        total_row = row("Total", &format!("{currency}{}", notice.pricing.total_price)),
        deposit_row = row("Deposit due", &format!("{currency}{}", notice.pricing.deposit)),
        special_request = escape_html(&special_request),
        confirm_url = escape_html(&confirm_url),
    );

    RenderedEmail { subject, html, text }
}
