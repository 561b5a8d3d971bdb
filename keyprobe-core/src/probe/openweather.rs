use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use tracing::debug;

use crate::model::{
    Observation, ProbeError, ProbeOutcome, ProbeRequest, UnitSystem, mask_key,
};

use super::KeyProber;

const USER_AGENT: &str = concat!("keyprobe/", env!("CARGO_PKG_VERSION"));

/// Probes the OpenWeatherMap current-weather endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherProbe {
    http: Client,
}

/// What the server sent back, next to how it was classified.
///
/// `status` and `body` are `None` when no response arrived at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub status: Option<u16>,
    pub body: Option<String>,
    pub outcome: ProbeOutcome,
}

impl Exchange {
    /// The body as JSON, if the server answered 200 with something parseable.
    pub fn parsed_body(&self) -> Option<serde_json::Value> {
        match (self.status, &self.body) {
            (Some(200), Some(body)) => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

impl OpenWeatherProbe {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(http))
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// Run one lookup and keep the raw status and body alongside the outcome.
    pub async fn exchange(&self, request: &ProbeRequest) -> Exchange {
        debug!(
            city = %request.city,
            key = %mask_key(&request.api_key),
            units = %request.units,
            "probing weather endpoint"
        );

        let exchange = match self.fetch(request).await {
            Ok((status, body)) => Exchange {
                outcome: classify_response(status, &body, request.units),
                status: Some(status),
                body: Some(body),
            },
            Err(err) => Exchange {
                status: None,
                body: None,
                outcome: ProbeOutcome::Failed(err),
            },
        };

        match &exchange.outcome {
            ProbeOutcome::Active(obs) => debug!(
                city = %request.city,
                temperature_c = obs.temperature_celsius,
                "key is active"
            ),
            ProbeOutcome::Failed(err) => debug!(city = %request.city, error = %err, "probe failed"),
        }

        exchange
    }

    async fn fetch(&self, request: &ProbeRequest) -> Result<(u16, String), ProbeError> {
        let res = self
            .http
            .get(&request.base_url)
            .query(&[
                ("q", request.city.as_str()),
                ("appid", request.api_key.as_str()),
                ("units", request.units.as_str()),
            ])
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| transport_failure(&err, request))?;

        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|err| body_failure(&err, request))?;

        Ok((status, body))
    }
}

#[async_trait]
impl KeyProber for OpenWeatherProbe {
    async fn probe(&self, request: &ProbeRequest) -> ProbeOutcome {
        self.exchange(request).await.outcome
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    // Kept loose: a float or out-of-range humidity must not sink the payload.
    humidity: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: Option<String>,
    main: OwMain,
    weather: Vec<OwWeather>,
}

/// Turn an HTTP status and body into an outcome. Pure; no I/O.
pub fn classify_response(status: u16, body: &str, units: UnitSystem) -> ProbeOutcome {
    match status {
        200 => match parse_observation(body, units) {
            Ok(obs) => ProbeOutcome::Active(obs),
            Err(err) => ProbeOutcome::Failed(err),
        },
        401 => ProbeOutcome::Failed(ProbeError::Unauthorized {
            message: provider_message(body),
        }),
        404 => ProbeOutcome::Failed(ProbeError::NotFound {
            message: provider_message(body),
        }),
        429 => ProbeOutcome::Failed(ProbeError::RateLimited {
            message: provider_message(body),
        }),
        code => {
            let err = match serde_json::from_str::<serde_json::Value>(body) {
                Ok(json) => ProbeError::Http {
                    code,
                    message: message_field(&json),
                    raw_body: None,
                },
                Err(_) => ProbeError::Http {
                    code,
                    message: None,
                    raw_body: Some(truncate_body(body)),
                },
            };
            ProbeOutcome::Failed(err)
        }
    }
}

fn parse_observation(body: &str, units: UnitSystem) -> Result<Observation, ProbeError> {
    let parsed: OwCurrentResponse =
        serde_json::from_str(body).map_err(|err| ProbeError::MalformedResponse {
            message: format!("failed to parse weather payload: {err}"),
        })?;

    let description = parsed
        .weather
        .into_iter()
        .next()
        .map(|w| w.description)
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ProbeError::MalformedResponse {
            message: "weather payload contained no condition description".to_string(),
        })?;

    Ok(Observation {
        temperature_celsius: units.to_celsius(parsed.main.temp),
        description,
        humidity_percent: parsed.main.humidity.as_ref().and_then(humidity_percent),
        location: parsed.name.filter(|n| !n.is_empty()),
    })
}

fn humidity_percent(value: &serde_json::Value) -> Option<u8> {
    value
        .as_f64()
        .filter(|pct| (0.0..=100.0).contains(pct))
        .map(|pct| pct.round() as u8)
}

fn provider_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| message_field(&json))
}

fn message_field(json: &serde_json::Value) -> Option<String> {
    json.get("message")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn transport_failure(err: &reqwest::Error, request: &ProbeRequest) -> ProbeError {
    if err.is_timeout() {
        ProbeError::timeout(request.timeout)
    } else if err.is_connect() || err.is_request() {
        ProbeError::ConnectionFailure {
            message: describe(err, &request.api_key),
        }
    } else {
        ProbeError::Unexpected {
            message: describe(err, &request.api_key),
        }
    }
}

fn body_failure(err: &reqwest::Error, request: &ProbeRequest) -> ProbeError {
    if err.is_timeout() {
        ProbeError::timeout(request.timeout)
    } else {
        ProbeError::Unexpected {
            message: format!(
                "failed to read response body: {}",
                describe(err, &request.api_key)
            ),
        }
    }
}

/// Error chain text with the key masked wherever it appears.
///
/// reqwest puts the full request URL, `appid` included, into its message.
fn describe(err: &reqwest::Error, api_key: &str) -> String {
    let mut message = error_chain(err);
    if let Some(url) = err.url() {
        message = message.replace(url.as_str(), &redact_url(url));
    }
    if !api_key.is_empty() {
        message = message.replace(api_key, &mask_key(api_key));
    }
    message
}

fn redact_url(url: &Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if name == "appid" {
                mask_key(&value)
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(&pairs);
    }
    redacted.to_string()
}

// reqwest's top-level message is terse ("error sending request"); the cause
// (DNS, refused, TLS) lives further down the source chain.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 100;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
