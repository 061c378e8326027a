//! ==============================================================================
//! sink.rs - forwards readings to InfluxDB
//! ==============================================================================
//!
//! purpose:
//!     writes each published reading as one InfluxDB 1.x line-protocol point.
//!     the poll loop only cares whether the write worked; detail is logged.
//!
//! relationships:
//!     - used by: poller.rs (through the `ReadingSink` trait)
//!     - reads: config.rs (InfluxConfig)
//!
//! wire format:
//!
//!     POST http://host:port/write?db=<db>&precision=s[&u=..&p=..]
//!     ecowitt temperature=72.5,humidity=60,battery_outdoor=1i 1700000000
//!
//! ==============================================================================

use crate::config::InfluxConfig;
use crate::domain::{BatteryState, WeatherReading};
use crate::error::SinkError;
use std::future::Future;
use std::time::Duration;

/// anything that accepts a reading under a measurement name
pub trait ReadingSink: Send + Sync {
    fn write(
        &self,
        field: &str,
        reading: &WeatherReading,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

pub struct InfluxSink {
    client: reqwest::Client,
    url: String,
    params: Vec<(&'static str, String)>,
    timeout: Duration,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> anyhow::Result<Self> {
        let timeout = config.write_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        let mut params = vec![("db", config.db.clone()), ("precision", "s".to_string())];
        if !config.username.is_empty() {
            params.push(("u", config.username.clone()));
            params.push(("p", config.password.clone()));
        }

        Ok(Self {
            client,
            url: format!("http://{}:{}/write", config.host, config.port),
            params,
            timeout,
        })
    }
}

impl ReadingSink for InfluxSink {
    async fn write(&self, field: &str, reading: &WeatherReading) -> Result<(), SinkError> {
        let line = line_protocol(field, reading);
        tracing::debug!("[SINK] {}", line);

        let response = self
            .client
            .post(&self.url)
            .query(&self.params)
            .body(line)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(self.timeout)
                } else {
                    SinkError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected { status: status.as_u16(), body })
    }
}

// ==============================================================================
// line protocol
// ==============================================================================

fn escape(name: &str, extra: &[char]) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == ',' || c == ' ' || extra.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// one point: measurement `field`, every known value as a field
pub fn line_protocol(field: &str, reading: &WeatherReading) -> String {
    let mut fields: Vec<String> = reading
        .numeric_fields()
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();

    for (sensor, state) in &reading.batteries {
        let flag = match state {
            BatteryState::Ok => 1,
            BatteryState::Low => 0,
            BatteryState::Unknown => continue,
        };
        fields.push(format!("battery_{}={}i", escape(sensor, &['=']), flag));
    }

    format!("{} {} {}", escape(field, &[]), fields.join(","), reading.dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Query, State},
        http::StatusCode,
        routing::post,
        Router,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(HashMap<String, String>, String)>>>;

    async fn fake_influx(status: StatusCode) -> (InfluxConfig, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/write",
                post(
                    move |State(seen): State<Seen>, Query(q): Query<HashMap<String, String>>, body: String| async move {
                        seen.lock().unwrap().push((q, body));
                        status
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = InfluxConfig {
            enable: true,
            host: addr.ip().to_string(),
            port: addr.port(),
            db: "weather".into(),
            username: "grafana".into(),
            password: "secret".into(),
            ..InfluxConfig::default()
        };
        (config, seen)
    }

    fn sample() -> WeatherReading {
        let mut reading = WeatherReading::new(1_700_000_000, 72.5);
        reading.humidity = Some(60);
        reading.batteries.insert("outdoor".into(), BatteryState::Ok);
        reading.batteries.insert("wh65".into(), BatteryState::Low);
        reading.batteries.insert("wh80".into(), BatteryState::Unknown);
        reading
    }

    #[test]
    fn formats_point() {
        assert_eq!(
            line_protocol("ecowitt", &sample()),
            "ecowitt temperature=72.5,humidity=60,battery_outdoor=1i,battery_wh65=0i 1700000000"
        );
    }

    #[test]
    fn escapes_measurement() {
        let line = line_protocol("back yard,west", &WeatherReading::new(1, 50.0));
        assert_eq!(line, "back\\ yard\\,west temperature=50 1");
    }

    #[tokio::test]
    async fn writes_to_influx() {
        let (config, seen) = fake_influx(StatusCode::NO_CONTENT).await;
        let sink = InfluxSink::new(&config).unwrap();

        sink.write("ecowitt", &sample()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (query, body) = &seen[0];
        assert_eq!(query["db"], "weather");
        assert_eq!(query["precision"], "s");
        assert_eq!(query["u"], "grafana");
        assert_eq!(query["p"], "secret");
        assert!(body.starts_with("ecowitt temperature=72.5"));
    }

    #[tokio::test]
    async fn server_error_is_transient_rejection() {
        let (config, _) = fake_influx(StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = InfluxSink::new(&config).unwrap();

        let err = sink.write("ecowitt", &sample()).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = InfluxConfig { host: "127.0.0.1".into(), port, ..InfluxConfig::default() };
        let sink = InfluxSink::new(&config).unwrap();
        let err = sink.write("ecowitt", &sample()).await.unwrap_err();
        assert!(matches!(err, SinkError::Unreachable(_)));
    }
}
