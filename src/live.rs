/*!
 * Live single-postcode lookup over HTTP
 *
 * Only compiled with the `live-lookup` feature. Requests are made with an
 * async reqwest client driven by a private current-thread tokio runtime, so
 * callers see a plain blocking [`LiveLookup`].
 */

use std::time::Duration;
use serde_json::Value;

use crate::{
    Result, DesertError,
    config::DesertConfig,
    geocode::{GeocodePoint, LiveLookup},
};

/// Client for a postcodes.io-style `GET {endpoint}/{postcode}` service
pub struct PostcodesIoClient {
    endpoint: String,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl PostcodesIoClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dental_deserts/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DesertError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                suggestion: Some("Check your network configuration".to_string()),
            })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DesertError::Configuration {
                message: format!("Failed to start async runtime: {}", e),
                suggestion: None,
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            runtime,
        })
    }

    pub fn from_config(config: &DesertConfig) -> Result<Self> {
        Self::new(
            &config.live_lookup_endpoint,
            Duration::from_secs(config.live_lookup_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, postcode_norm: &str) -> Result<Value> {
        let url = format!("{}/{}", self.endpoint, postcode_norm);
        let lookup_error = |message: String| DesertError::LiveLookup {
            postcode: postcode_norm.to_string(),
            message,
        };

        let response = self.client.get(&url).send().await
            .map_err(|e| lookup_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(lookup_error(format!("HTTP {}", response.status())));
        }
        response.json::<Value>().await.map_err(|e| lookup_error(e.to_string()))
    }

    /// Fetch one postcode, surfacing the failure reason
    pub fn try_lookup(&self, postcode_norm: &str) -> Result<Option<GeocodePoint>> {
        let payload = self.runtime.block_on(self.fetch(postcode_norm))?;
        Ok(point_from_payload(&payload))
    }
}

impl LiveLookup for PostcodesIoClient {
    fn lookup(&self, postcode_norm: &str) -> Option<GeocodePoint> {
        match self.try_lookup(postcode_norm) {
            Ok(point) => point,
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Point from a `{"result": {...}}` response body
///
/// The fine area comes from `result.codes.lsoa` when present, else
/// `result.lsoa`.
pub(crate) fn point_from_payload(payload: &Value) -> Option<GeocodePoint> {
    let result = payload.get("result").filter(|r| r.is_object())?;
    let lat = number(result.get("latitude")?)?;
    let lon = number(result.get("longitude")?)?;

    let area_code = result.get("codes")
        .and_then(|codes| codes.get("lsoa"))
        .and_then(Value::as_str)
        .or_else(|| result.get("lsoa").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(GeocodePoint { lat, lon, area_code })
}
