//! ==============================================================================
//! fetcher.rs - one request to the gateway's live-data feed
//! ==============================================================================
//!
//! purpose:
//!     issues a single GET against the configured gateway and flattens the
//!     json body into a `RawReading`. no retries here; the poll loop owns the
//!     cadence.
//!
//! relationships:
//!     - used by: poller.rs (through the `LiveDataSource` trait)
//!     - produces: domain.rs (RawReading)
//!     - errors: error.rs (FetchError)
//!
//! body shapes:
//!     flat objects are taken as-is:
//!
//!         {"tempf": "725", "humidity": "60", "battery_ok": "1"}
//!
//!     gateway live-data groups are flattened:
//!
//!         {"common_list": [{"id": "0x02", "val": "22.5", "unit": "C"}],
//!          "wh25": [{"intemp": "21.5", "unit": "C", "abs": "1013.2 hPa"}]}
//!
//!         -> 0x02 = 22.5, 0x02.unit = C, intemp = 21.5, intemp.unit = C,
//!            abs = 1013.2 hPa
//!
//!     the co2 group only contributes its air-quality members (CO2, PM25,
//!     PM10 and their AQI); its own temperature and humidity land under
//!     `co2.<channel>.` like any per-channel sensor.
//!
//! ==============================================================================

use crate::domain::RawReading;
use crate::error::FetchError;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;

/// groups whose object members are station-wide and keep their bare names
const FLAT_GROUPS: &[&str] = &["wh25"];

/// the co2 group mixes station air quality with its own sensor's temperature
/// and humidity; only these members are station-wide
const CO2_STATION_KEYS: &[&str] = &["PM25", "PM25_RealAQI", "PM10", "PM10_RealAQI", "CO2"];

/// anything that can produce one raw reading per call
pub trait LiveDataSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<RawReading, FetchError>> + Send;
}

/// http fetcher for the gateway
pub struct DeviceFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl DeviceFetcher {
    /// `timeout` bounds the whole round trip, connect included
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, url: url.into(), timeout })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_connect() && is_refused(&err) {
            FetchError::ConnectionRefused(self.url.clone())
        } else {
            FetchError::Other(format!("{:#}", anyhow::Error::new(err)))
        }
    }
}

impl LiveDataSource for DeviceFetcher {
    async fn fetch(&self) -> Result<RawReading, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Other(format!("bad response from device: {}", status)));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        parse_body(&body)
    }
}

/// walk the source chain looking for ECONNREFUSED
fn is_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

// ==============================================================================
// body flattening
// ==============================================================================

/// parse a feed body into a flat field map
pub fn parse_body(body: &str) -> Result<RawReading, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("body is not json: {}", e)))?;
    let Value::Object(root) = value else {
        return Err(FetchError::MalformedResponse("expected a json object".to_string()));
    };

    let mut raw = RawReading::new();
    for (key, value) in root {
        match value {
            Value::Array(items) => flatten_group(&key, &items, &mut raw),
            other => {
                if let Some(s) = scalar(&other) {
                    raw.insert(key, s);
                }
            }
        }
    }
    Ok(raw)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn flatten_group(group: &str, items: &[Value], raw: &mut RawReading) {
    for (index, item) in items.iter().enumerate() {
        let Value::Object(members) = item else { continue };

        if let Some(id) = members.get("id").and_then(scalar) {
            // {"id": "0x02", "val": "22.5", "unit": "C"}
            if let Some(val) = members.get("val").and_then(scalar) {
                raw.insert(id.clone(), val);
            }
            if let Some(unit) = members.get("unit").and_then(scalar) {
                raw.insert(format!("{}.unit", id), unit);
            }
        } else if FLAT_GROUPS.contains(&group) {
            flatten_members(members, |_| "", raw);
        } else {
            // per-channel sensors would shadow station fields, keep them apart
            let channel = members
                .get("channel")
                .and_then(scalar)
                .unwrap_or_else(|| (index + 1).to_string());
            let prefix = format!("{}.{}.", group, channel);
            if group == "co2" {
                flatten_members(
                    members,
                    |key| if CO2_STATION_KEYS.contains(&key) { "" } else { prefix.as_str() },
                    raw,
                );
            } else {
                flatten_members(members, |_| prefix.as_str(), raw);
            }
        }
    }
}

/// copy scalar members under the prefix chosen per key; a "unit" member
/// applies to bare numbers beside it
fn flatten_members<'p>(members: &Map<String, Value>, prefix_for: impl Fn(&str) -> &'p str, raw: &mut RawReading) {
    let unit = members.get("unit").and_then(scalar);
    for (key, value) in members {
        if key == "unit" {
            continue;
        }
        let Some(value) = scalar(value) else { continue };
        let prefix = prefix_for(key);
        if let Some(unit) = &unit {
            if value.trim().parse::<f64>().is_ok() {
                raw.insert(format!("{}{}.unit", prefix, key), unit.clone());
            }
        }
        raw.insert(format!("{}{}", prefix, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    /// serve `app` on an ephemeral local port, returning its base url
    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn flat_object() {
        let raw = parse_body(r#"{"tempf": "725", "humidity": 60, "battery_ok": true, "extra": null}"#).unwrap();
        assert_eq!(raw["tempf"], "725");
        assert_eq!(raw["humidity"], "60");
        assert_eq!(raw["battery_ok"], "1");
        assert!(!raw.contains_key("extra"));
    }

    #[test]
    fn live_data_groups() {
        let raw = parse_body(
            r#"{
                "common_list": [
                    {"id": "0x02", "val": "22.5", "unit": "C"},
                    {"id": "0x07", "val": "62%"}
                ],
                "rain": [{"id": "0x0E", "val": "0.0 mm/Hr"}],
                "wh25": [{"intemp": "21.5", "unit": "C", "inhumi": "45%", "abs": "1013.2 hPa"}],
                "co2": [{"CO2": "412", "PM25": "4.0"}],
                "ch_aisle": [{"channel": "2", "temp": "19.0", "unit": "C", "humidity": "50%"}]
            }"#,
        )
        .unwrap();

        assert_eq!(raw["0x02"], "22.5");
        assert_eq!(raw["0x02.unit"], "C");
        assert_eq!(raw["0x07"], "62%");
        assert!(!raw.contains_key("0x07.unit"));
        assert_eq!(raw["0x0E"], "0.0 mm/Hr");
        assert_eq!(raw["intemp"], "21.5");
        assert_eq!(raw["intemp.unit"], "C");
        assert!(!raw.contains_key("inhumi.unit"));
        assert_eq!(raw["abs"], "1013.2 hPa");
        assert_eq!(raw["CO2"], "412");
        assert_eq!(raw["ch_aisle.2.humidity"], "50%");
        assert!(!raw.contains_key("humidity"));
    }

    #[test]
    fn co2_sensor_climate_stays_out_of_station_fields() {
        let raw = parse_body(
            r#"{
                "common_list": [
                    {"id": "0x02", "val": "22.5", "unit": "C"},
                    {"id": "0x07", "val": "62%"}
                ],
                "co2": [{
                    "temperature": "24.5", "unit": "C", "humidity": "49%",
                    "PM25": "4.0", "PM25_RealAQI": "17", "PM10": "6.0", "PM10_RealAQI": "6", "CO2": "412"
                }]
            }"#,
        )
        .unwrap();

        assert!(!raw.contains_key("humidity"));
        assert!(!raw.contains_key("temperature"));
        assert_eq!(raw["co2.1.humidity"], "49%");
        assert_eq!(raw["co2.1.temperature"], "24.5");
        assert_eq!(raw["CO2"], "412");
        assert_eq!(raw["PM25_RealAQI"], "17");

        let reading = crate::convert::convert(&raw, 0).unwrap();
        assert_eq!(reading.humidity, Some(62));
        assert_eq!(reading.co2, Some(412.0));
        assert_eq!(reading.pm25aqi, Some(17.0));
    }

    #[test]
    fn malformed_bodies() {
        assert!(matches!(parse_body("tempf=725"), Err(FetchError::MalformedResponse(_))));
        assert!(matches!(parse_body("[1, 2]"), Err(FetchError::MalformedResponse(_))));
        assert!(matches!(parse_body(""), Err(FetchError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn fetches_and_flattens() {
        let app = Router::new().route(
            "/get_livedata_info",
            get(|| async { r#"{"tempf": "725", "humidity": "60"}"# }),
        );
        let base = serve(app).await;

        let fetcher = DeviceFetcher::new(format!("{}/get_livedata_info", base), Duration::from_secs(2)).unwrap();
        let raw = fetcher.fetch().await.unwrap();
        assert_eq!(raw["tempf"], "725");
        assert_eq!(raw["humidity"], "60");
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let app = Router::new().route("/", get(|| async { "<html>busy</html>" }));
        let base = serve(app).await;

        let fetcher = DeviceFetcher::new(format!("{}/", base), Duration::from_secs(2)).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(FetchError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn error_status_is_other() {
        let app = Router::new().route("/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let base = serve(app).await;

        let fetcher = DeviceFetcher::new(format!("{}/", base), Duration::from_secs(2)).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Other(_))));
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let app = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let base = serve(app).await;

        let timeout = Duration::from_millis(200);
        let fetcher = DeviceFetcher::new(format!("{}/", base), timeout).unwrap();
        assert_eq!(fetcher.fetch().await, Err(FetchError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = DeviceFetcher::new(format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(FetchError::ConnectionRefused(_))));
    }
}
