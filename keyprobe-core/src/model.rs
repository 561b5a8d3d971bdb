use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fallback used whenever the provider did not send a `message`.
pub const NO_MESSAGE: &str = "No message";

/// Unit system sent as the `units` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
            UnitSystem::Standard => "standard",
        }
    }

    /// Convert a temperature reported in this unit system to degrees Celsius.
    ///
    /// `standard` is Kelvin, `imperial` is Fahrenheit, `metric` is already Celsius.
    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            UnitSystem::Metric => value,
            UnitSystem::Imperial => (value - 32.0) * 5.0 / 9.0,
            UnitSystem::Standard => value - 273.15,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every probe of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub base_url: String,
    pub units: UnitSystem,
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            units: UnitSystem::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One weather lookup for one key and one city.
#[derive(Clone, PartialEq)]
pub struct ProbeRequest {
    pub api_key: String,
    pub city: String,
    pub base_url: String,
    pub units: UnitSystem,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn new(
        api_key: impl Into<String>,
        city: impl Into<String>,
        settings: &ProbeSettings,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            city: city.into(),
            base_url: settings.base_url.clone(),
            units: settings.units,
            timeout: settings.timeout,
        }
    }

    /// Full request URL with the key replaced by a placeholder, for display.
    pub fn redacted_url(&self) -> String {
        let params = [
            ("q", self.city.as_str()),
            ("appid", "API_KEY_HIDDEN"),
            ("units", self.units.as_str()),
        ];

        match reqwest::Url::parse_with_params(&self.base_url, &params) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}?q={}&appid=API_KEY_HIDDEN&units={}",
                self.base_url, self.city, self.units
            ),
        }
    }
}

impl fmt::Debug for ProbeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRequest")
            .field("api_key", &mask_key(&self.api_key))
            .field("city", &self.city)
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A resolved API key together with the label it was configured under.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyCredential {
    pub label: String,
    pub api_key: String,
}

impl KeyCredential {
    pub fn new(label: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            api_key: api_key.into(),
        }
    }

    pub fn masked(&self) -> String {
        mask_key(&self.api_key)
    }
}

impl fmt::Debug for KeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCredential")
            .field("label", &self.label)
            .field("api_key", &self.masked())
            .finish()
    }
}

/// Show the first 8 characters of a key and hide the rest.
pub fn mask_key(key: &str) -> String {
    const VISIBLE: usize = 8;
    const HIDDEN: usize = 24;

    let count = key.chars().count();
    if count <= VISIBLE {
        return "*".repeat(count.max(1));
    }

    let prefix: String = key.chars().take(VISIBLE).collect();
    format!("{prefix}...{}", "*".repeat(HIDDEN))
}

/// The parsed subset of a successful weather payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub temperature_celsius: f64,
    pub description: String,
    pub humidity_percent: Option<u8>,
    pub location: Option<String>,
}

/// Every way a probe can fail, as seen from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("unauthorized (HTTP 401): {}", .message.as_deref().unwrap_or(NO_MESSAGE))]
    Unauthorized { message: Option<String> },

    #[error("not found (HTTP 404): {}", .message.as_deref().unwrap_or(NO_MESSAGE))]
    NotFound { message: Option<String> },

    #[error("rate limited (HTTP 429): {}", .message.as_deref().unwrap_or(NO_MESSAGE))]
    RateLimited { message: Option<String> },

    #[error("HTTP {code}: {}", http_detail(.message, .raw_body))]
    Http {
        code: u16,
        message: Option<String>,
        raw_body: Option<String>,
    },

    #[error("request timed out after {}", timeout_text(.after_ms))]
    Timeout { after_ms: u64 },

    #[error("cannot reach API server: {message}")]
    ConnectionFailure { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("unexpected failure: {message}")]
    Unexpected { message: String },
}

fn timeout_text(after_ms: &u64) -> String {
    describe_duration(Duration::from_millis(*after_ms))
}

/// Whole minutes, whole seconds, or milliseconds, whichever is exact.
pub fn describe_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{millis} ms");
    }

    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{secs} seconds")
    }
}

fn http_detail(message: &Option<String>, raw_body: &Option<String>) -> String {
    match (message, raw_body) {
        (Some(message), _) => message.clone(),
        (None, Some(raw)) => format!("raw response: {raw}"),
        (None, None) => NO_MESSAGE.to_string(),
    }
}

impl ProbeError {
    pub fn timeout(after: Duration) -> Self {
        ProbeError::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// HTTP status code behind this failure, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeError::Unauthorized { .. } => Some(401),
            ProbeError::NotFound { .. } => Some(404),
            ProbeError::RateLimited { .. } => Some(429),
            ProbeError::Http { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Provider-supplied message, or `"No message"` for HTTP failures without one.
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            ProbeError::Unauthorized { message }
            | ProbeError::NotFound { message }
            | ProbeError::RateLimited { message }
            | ProbeError::Http { message, .. } => Some(message.as_deref().unwrap_or(NO_MESSAGE)),
            _ => None,
        }
    }
}

/// Classified result of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Active(Observation),
    Failed(ProbeError),
}

impl ProbeOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, ProbeOutcome::Active(_))
    }

    pub fn observation(&self) -> Option<&Observation> {
        match self {
            ProbeOutcome::Active(obs) => Some(obs),
            ProbeOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            ProbeOutcome::Active(_) => None,
            ProbeOutcome::Failed(err) => Some(err),
        }
    }
}
