//! Outbound email through the Resend HTTP API.

use serde::Serialize;
use std::time::Duration;

use crate::config::EmailConfig;
use crate::email::RenderedEmail;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
    from: String,
    recipient: String,
}

#[derive(Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

impl Mailer {
    /// `None` when the API key or the owner's address is missing.
    pub fn from_config(config: &EmailConfig) -> anyhow::Result<Option<Self>> {
        let (Some(api_key), Some(recipient)) = (&config.api_key, &config.recipient) else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(SEND_TIMEOUT)
            .build()?;
        Ok(Some(Self {
            http,
            api_key: api_key.clone(),
            api_url: config.api_url.clone(),
            from: config.from.clone(),
            recipient: recipient.clone(),
        }))
    }

    /// Same transport, different recipient (used for error alerts).
    pub fn with_recipient(&self, recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            ..self.clone()
        }
    }

    /// Send to the configured recipient. Returns the provider's message id,
    /// empty when an accepted response carries none.
    pub async fn send(
        &self,
        email: &RenderedEmail,
        reply_to: Option<&str>,
    ) -> anyhow::Result<String> {
        let body = SendEmailBody {
            from: &self.from,
            to: [&self.recipient],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
            reply_to,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("email API timeout: {e}")
                } else {
                    anyhow::anyhow!("email API network error: {e}")
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                anyhow::bail!("email API rate limit exceeded: {}", text);
            }
            anyhow::bail!("email API error {}: {}", status, text);
        }

        // The email is queued once the API answers 2xx; the body is informational.
        let status = resp.status();
        let body = resp.json::<serde_json::Value>().await.ok();
        match message_id(body.as_ref()) {
            Some(id) => Ok(id),
            None => {
                tracing::warn!(%status, "Email accepted without a readable message id");
                Ok(String::new())
            }
        }
    }
}

fn message_id(body: Option<&serde_json::Value>) -> Option<String> {
    body?["id"].as_str().map(String::from)
}

// ── Failure classification ──

/// Why a delivery failed, as far as the customer needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryFailure {
    RateLimited,
    Rejected,
    Network,
    Other,
}

impl DeliveryFailure {
    pub fn user_message(self) -> &'static str {
        match self {
            DeliveryFailure::RateLimited => {
                "We're receiving a lot of bookings right now. Please wait a minute and try again."
            }
            DeliveryFailure::Rejected => {
                "We couldn't send your booking details. Please check your email address and try again."
            }
            DeliveryFailure::Network => {
                "We couldn't reach our booking service. Please check your connection and try again."
            }
            DeliveryFailure::Other => {
                "Something went wrong while sending your booking. Please try again or contact us on WhatsApp."
            }
        }
    }
}

/// Classify a transport error by its message text.
pub fn classify_failure(message: &str) -> DeliveryFailure {
    let message = message.to_lowercase();
    if message.contains("rate limit") {
        DeliveryFailure::RateLimited
    } else if message.contains("invalid") {
        DeliveryFailure::Rejected
    } else if ["network", "timeout", "timed out"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        DeliveryFailure::Network
    } else {
        DeliveryFailure::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_config(api_key: Option<&str>, recipient: Option<&str>) -> EmailConfig {
        EmailConfig {
            api_key: api_key.map(String::from),
            recipient: recipient.map(String::from),
            from: "onboarding@resend.dev".into(),
            api_url: "http://127.0.0.1:9/emails".into(),
            alert_recipient: None,
        }
    }

    #[test]
    fn test_not_configured_without_key_or_recipient() {
        assert!(Mailer::from_config(&email_config(None, Some("owner@studio.test")))
            .unwrap()
            .is_none());
        assert!(Mailer::from_config(&email_config(Some("re_123"), None))
            .unwrap()
            .is_none());
        assert!(Mailer::from_config(&email_config(Some("re_123"), Some("owner@studio.test")))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_with_recipient_keeps_transport() {
        let mailer = Mailer::from_config(&email_config(Some("re_123"), Some("owner@studio.test")))
            .unwrap()
            .unwrap();
        let alerts = mailer.with_recipient("ops@studio.test");
        assert_eq!(alerts.recipient, "ops@studio.test");
        assert_eq!(alerts.api_key, "re_123");
    }

    #[test]
    fn test_request_body_shape() {
        let body = SendEmailBody {
            from: "onboarding@resend.dev",
            to: ["owner@studio.test"],
            subject: "New booking",
            html: "<p>hi</p>",
            text: "hi",
            reply_to: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"], serde_json::json!(["owner@studio.test"]));
        assert!(json.get("reply_to").is_none());
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("email API rate limit exceeded: slow down"),
            DeliveryFailure::RateLimited
        );
        assert_eq!(
            classify_failure("email API error 422: Invalid `to` field"),
            DeliveryFailure::Rejected
        );
        assert_eq!(
            classify_failure("email API network error: connection refused"),
            DeliveryFailure::Network
        );
        assert_eq!(classify_failure("email API timeout: deadline"), DeliveryFailure::Network);
        assert_eq!(classify_failure("email API error 500: boom"), DeliveryFailure::Other);
    }

    #[test]
    fn test_message_id_is_best_effort() {
        let body = serde_json::json!({"id": "49a3999c-0ce1"});
        assert_eq!(message_id(Some(&body)).as_deref(), Some("49a3999c-0ce1"));
        assert_eq!(message_id(Some(&serde_json::json!({"queued": true}))), None);
        assert_eq!(message_id(None), None);
    }

    /// Serve `POST /emails` locally with a fixed answer.
    async fn fake_provider(status: u16, body: &'static str) -> String {
        use axum::{http::StatusCode, routing::post, Router};

        let status = StatusCode::from_u16(status).unwrap();
        let app = Router::new().route("/emails", post(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/emails")
    }

    async fn send_via(api_url: String) -> anyhow::Result<String> {
        let mut config = email_config(Some("re_123"), Some("owner@studio.test"));
        config.api_url = api_url;
        let mailer = Mailer::from_config(&config).unwrap().unwrap();
        let email = RenderedEmail {
            subject: "s".into(),
            html: "<p>h</p>".into(),
            text: "t".into(),
        };
        mailer.send(&email, None).await
    }

    #[tokio::test]
    async fn test_accepted_send_without_json_body_is_success() {
        let url = fake_provider(200, "queued").await;
        assert_eq!(send_via(url).await.unwrap(), "");

        let url = fake_provider(202, "").await;
        assert_eq!(send_via(url).await.unwrap(), "");

        let url = fake_provider(200, r#"{"id":"msg_1"}"#).await;
        assert_eq!(send_via(url).await.unwrap(), "msg_1");
    }

    #[tokio::test]
    async fn test_provider_errors_still_fail() {
        let url = fake_provider(429, "slow down").await;
        let err = send_via(url).await.unwrap_err();
        assert_eq!(classify_failure(&err.to_string()), DeliveryFailure::RateLimited);
    }

    #[tokio::test]
    async fn test_send_to_unreachable_host_is_network_failure() {
        let mailer = Mailer::from_config(&email_config(Some("re_123"), Some("owner@studio.test")))
            .unwrap()
            .unwrap();
        let email = RenderedEmail {
            subject: "s".into(),
            html: "<p>h</p>".into(),
            text: "t".into(),
        };
        let err = mailer.send(&email, None).await.unwrap_err();
        let kind = classify_failure(&err.to_string());
        assert_eq!(kind, DeliveryFailure::Network);
    }
}
