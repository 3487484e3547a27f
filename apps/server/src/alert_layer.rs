//! Tracing layer that emails ERROR-level events to the studio owner.
//!
//! - At most one alert per `MIN_INTERVAL`
//! - Identical messages suppressed for `DEDUP_WINDOW`
//! - Sending is spawned onto the Tokio runtime and never blocks logging

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::email::{escape_html, RenderedEmail};
use crate::mailer::Mailer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

pub struct AlertLayer {
    mailer: Mailer,
    throttle: Mutex<Throttle>,
}

struct Throttle {
    last_sent: Instant,
    /// (message hash, sent at)
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: Instant::now()
                .checked_sub(MIN_INTERVAL)
                .unwrap_or_else(Instant::now),
            recent: Vec::new(),
        }
    }

    /// Record and allow `hash` unless it is a recent duplicate or too soon.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.duration_since(*ts) < DEDUP_WINDOW);

        let is_dup = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = now.duration_since(self.last_sent) < MIN_INTERVAL;
        if is_dup || too_soon {
            return false;
        }
        self.last_sent = now;
        self.recent.push((hash, now));
        true
    }
}

impl AlertLayer {
    /// `mailer` must already point at the alert recipient.
    pub fn new(mailer: Mailer) -> Self {
        Self {
            mailer,
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

fn alert_email(message: &str, target: &str, location: &str, at: &str) -> RenderedEmail {
    let headline: String = message.chars().take(80).collect();
    RenderedEmail {
        subject: format!("[booking server] {headline}"),
        html: format!(
            "<h3>Server error</h3><pre>{}</pre><p>{} ({})<br>{}</p>",
            escape_html(message),
            escape_html(target),
            escape_html(location),
            at
        ),
        text: format!("Server error\n\n{message}\n\n{target} ({location})\n{at}\n"),
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };

        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(hash, Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        // Outside a runtime (e.g. during shutdown) there is nothing to send with.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let location = format!(
            "{}:{}",
            metadata.file().unwrap_or("?"),
            metadata
                .line()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".into())
        );
        let at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let email = alert_email(&message, metadata.target(), &location, &at);
        let mailer = self.mailer.clone();

        handle.spawn(async move {
            let _ = mailer.send(&email, None).await;
        });
    }
}

// ── Field visitor ──

/// Collects the `message` field plus any structured fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }

    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_allowed() {
        let mut throttle = Throttle::new();
        assert!(throttle.admit(111, Instant::now()));
    }

    #[test]
    fn test_second_alert_within_interval_suppressed() {
        let mut throttle = Throttle::new();
        let now = Instant::now();
        assert!(throttle.admit(111, now));
        assert!(!throttle.admit(222, now + Duration::from_secs(1)));
    }

    #[test]
    fn test_duplicate_suppressed_until_window_passes() {
        let mut throttle = Throttle::new();
        let now = Instant::now();
        assert!(throttle.admit(111, now));
        assert!(!throttle.admit(111, now + MIN_INTERVAL));
        assert!(throttle.admit(222, now + MIN_INTERVAL));
        assert!(throttle.admit(111, now + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn test_message_with_fields() {
        let v = MessageVisitor {
            message: "booking email failed".into(),
            fields: vec![("booking_id".into(), "cornrows-1".into())],
        };
        assert_eq!(v.message(), "booking email failed (booking_id=cornrows-1)");
    }

    #[test]
    fn test_message_fields_only() {
        let v = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(v.message(), "error=timeout");
    }

    #[test]
    fn test_alert_email_escapes_html() {
        let email = alert_email("<script>", "server", "main.rs:1", "now");
        assert!(email.html.contains("&lt;script&gt;"));
        assert_eq!(email.subject, "[booking server] <script>");
    }
}
