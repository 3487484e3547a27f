use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::pricing::DepositPolicy;

/// Provider sandbox sender, used until a verified domain is configured.
pub const SANDBOX_FROM_EMAIL: &str = "onboarding@resend.dev";
const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_STUDIO_WHATSAPP: &str = "233000000000";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Email API settings. Absent credentials leave submissions "not configured".
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub recipient: Option<String>,
    pub from: String,
    pub api_url: String,
    pub alert_recipient: Option<String>,
}

/// Wall clock in the studio's local time.
#[derive(Debug, Clone, Copy)]
pub struct StudioClock {
    offset: FixedOffset,
}

impl StudioClock {
    pub fn from_offset_hours(hours: i32) -> anyhow::Result<Self> {
        let offset = FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| anyhow::anyhow!("STUDIO_UTC_OFFSET_HOURS out of range: {hours}"))?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub email: EmailConfig,
    pub studio_whatsapp: String,
    pub clock: StudioClock,
    pub deposit_policy: DepositPolicy,
    pub catalog_path: Option<String>,
    pub webapp_url: Option<String>,
    pub session_ttl_secs: u64,
}

/// Read a variable, treating empty values as unset.
fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(var)
    }

    /// Build from an arbitrary lookup so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PORT") {
            Some(p) => p
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT must be a number: {e}"))?,
            None => 3000,
        };

        let offset_hours = match lookup("STUDIO_UTC_OFFSET_HOURS") {
            Some(h) => h
                .parse()
                .map_err(|e| anyhow::anyhow!("STUDIO_UTC_OFFSET_HOURS must be an integer: {e}"))?,
            None => 0,
        };

        let deposit_policy = match lookup("DEPOSIT_POLICY") {
            Some(p) => p.parse()?,
            None => DepositPolicy::default(),
        };

        let session_ttl_secs = match lookup("SESSION_TTL_SECS") {
            Some(t) => t
                .parse()
                .map_err(|e| anyhow::anyhow!("SESSION_TTL_SECS must be a number: {e}"))?,
            None => DEFAULT_SESSION_TTL_SECS,
        };

        Ok(Self {
            host,
            port,
            email: EmailConfig {
                api_key: lookup("RESEND_API_KEY"),
                recipient: lookup("BOOKING_RECIPIENT_EMAIL"),
                from: lookup("BOOKING_FROM_EMAIL").unwrap_or_else(|| SANDBOX_FROM_EMAIL.into()),
                api_url: lookup("RESEND_API_URL").unwrap_or_else(|| DEFAULT_RESEND_API_URL.into()),
                alert_recipient: lookup("ALERT_EMAIL"),
            },
            studio_whatsapp: lookup("STUDIO_WHATSAPP")
                .unwrap_or_else(|| DEFAULT_STUDIO_WHATSAPP.into()),
            clock: StudioClock::from_offset_hours(offset_hours)?,
            deposit_policy,
            catalog_path: lookup("CATALOG_PATH"),
            webapp_url: lookup("WEBAPP_URL"),
            session_ttl_secs,
        })
    }
}
