//! ==============================================================================
//! api.rs - local query api
//! ==============================================================================
//!
//! purpose:
//!     answers http requests from the snapshot store and the stats counters.
//!     handlers only ever call `SnapshotStore::read`, `Stats::snapshot` and,
//!     for `POST /stats/clear`, `Stats::reset`. they never wait on the poll
//!     loop beyond the store's brief lock.
//!
//! routes:
//!     /                      html table of the current reading
//!     /json, /all            full reading
//!     /conditions, /weather  whole snapshot incl. failure metadata
//!     /temp                  {"temperature": °F}
//!     /temperature /humidity /pressure /app_temp /dewpoint
//!     /wind /rain /precipitation /solar /uvi /indoor /aqi /battery
//!     /time                  local, unix and utc time
//!     /stats                 counters, timestamps, request counts
//!     POST /stats/clear      zero the counters
//!
//! request counting (gets / errors / per-uri) is kept here, apart from the
//! core counters, by a middleware layer.
//!
//! ==============================================================================

use crate::config::ApiConfig;
use crate::domain::{unix_now, Snapshot, WeatherReading};
use crate::snapshot::SnapshotStore;
use crate::stats::Stats;
use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

pub const BUILD: &str = env!("CARGO_PKG_VERSION");

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Debug, Default)]
struct RequestCountsInner {
    gets: u64,
    errors: u64,
    uri: BTreeMap<String, u64>,
}

/// per-request totals owned by the http layer
#[derive(Clone, Debug, Default)]
pub struct RequestCounts {
    inner: Arc<Mutex<RequestCountsInner>>,
}

impl RequestCounts {
    fn record(&self, path: &str, status: StatusCode) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.gets += 1;
        if status.is_client_error() || status.is_server_error() {
            inner.errors += 1;
        } else {
            *inner.uri.entry(path.to_string()).or_default() += 1;
        }
    }

    fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = RequestCountsInner::default();
    }

    fn snapshot(&self) -> (u64, u64, BTreeMap<String, u64>) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (inner.gets, inner.errors, inner.uri.clone())
    }
}

#[derive(Clone)]
pub struct ApiState {
    store: SnapshotStore,
    stats: Stats,
    requests: RequestCounts,
    /// shown on the html page
    source_url: Arc<str>,
}

impl ApiState {
    pub fn new(store: SnapshotStore, stats: Stats, source_url: &str) -> Self {
        Self { store, stats, requests: RequestCounts::default(), source_url: source_url.into() }
    }
}

// ==============================================================================
// web server
// ==============================================================================

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/json", get(all_handler))
        .route("/all", get(all_handler))
        .route("/conditions", get(conditions_handler))
        .route("/weather", get(conditions_handler))
        .route("/temp", get(temp_handler))
        .route("/temperature", get(temp_handler))
        .route("/humidity", get(humidity_handler))
        .route("/pressure", get(pressure_handler))
        .route("/app_temp", get(app_temp_handler))
        .route("/dewpoint", get(dewpoint_handler))
        .route("/wind", get(wind_handler))
        .route("/rain", get(rain_handler))
        .route("/precipitation", get(rain_handler))
        .route("/solar", get(solar_handler))
        .route("/uvi", get(uvi_handler))
        .route("/indoor", get(indoor_handler))
        .route("/aqi", get(aqi_handler))
        .route("/battery", get(battery_handler))
        .route("/time", get(time_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/clear", post(clear_handler))
        .fallback(unsupported_handler)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// bind and serve until `shutdown` flips to true
pub async fn serve(config: &ApiConfig, state: ApiState, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind api on {}:{}", config.bind, config.port))?;
    tracing::info!("[API] Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("[API] Server stopped");
    Ok(())
}

async fn count_requests(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::debug!("[API] {} -> {}", path, response.status());
    state.requests.record(&path, response.status());
    response
}

// ==============================================================================
// reading routes
// ==============================================================================

fn no_data(snapshot: &Snapshot) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "no weather data available",
            "last_error": snapshot.last_error,
        })),
    )
        .into_response()
}

/// render from the current reading, or 503 before the first good poll
async fn with_reading(state: &ApiState, render: impl FnOnce(&WeatherReading) -> Value) -> Response {
    let snapshot = state.store.read().await;
    match &snapshot.reading {
        Some(reading) => Json(render(reading)).into_response(),
        None => no_data(&snapshot),
    }
}

async fn all_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!(r)).await
}

async fn conditions_handler(State(state): State<ApiState>) -> Json<Snapshot> {
    Json(state.store.read().await)
}

async fn temp_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "temperature": r.temperature })).await
}

async fn humidity_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "humidity": r.humidity })).await
}

async fn pressure_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "pressure": r.pressure })).await
}

async fn app_temp_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "app_temp": r.app_temp })).await
}

async fn dewpoint_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "dewpoint": r.dewpoint })).await
}

async fn wind_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| {
        json!({
            "wind_speed": r.wind_speed,
            "wind_gust": r.wind_gust,
            "wind_deg": r.wind_deg,
        })
    })
    .await
}

async fn rain_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "rain_rate": r.rain_rate, "rain_daily": r.rain_daily })).await
}

async fn solar_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "solar": r.solar })).await
}

async fn uvi_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "uvi": r.uvi })).await
}

async fn indoor_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| {
        json!({
            "inside_temp": r.inside_temp,
            "inside_humidity": r.inside_humidity,
        })
    })
    .await
}

async fn aqi_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| {
        json!({
            "pm25": r.pm25,
            "pm25aqi": r.pm25aqi,
            "pm10": r.pm10,
            "pm10aqi": r.pm10aqi,
            "co2": r.co2,
        })
    })
    .await
}

async fn battery_handler(State(state): State<ApiState>) -> Response {
    with_reading(&state, |r| json!({ "battery_ok": r.battery_ok(), "batteries": r.batteries })).await
}

// ==============================================================================
// html page
// ==============================================================================

fn format_ts(ts: u64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

async fn index_handler(State(state): State<ApiState>) -> Html<String> {
    let snapshot = state.store.read().await;

    let mut page = String::from(
        "<html>\n<head><meta http-equiv=\"refresh\" content=\"5\" />\n\
         <style>p, td, th { font-family: Helvetica, Arial, sans-serif; font-size: 10px;}</style>\n\
         <style>h1 { font-family: Helvetica, Arial, sans-serif; font-size: 20px;}</style>\n\
         </head>\n<body>\n",
    );
    page.push_str(&format!("<h1>LocalWeather Server v{}</h1>\n\n", BUILD));

    match snapshot.reading.as_ref().map(serde_json::to_value) {
        Some(Ok(Value::Object(fields))) => {
            page.push_str("<table>\n<tr><th align=\"right\">Current</th><th align=\"right\">Value</th></tr>\n");
            for (name, value) in fields {
                let value = match value {
                    Value::Null => "--".to_string(),
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                page.push_str(&format!(
                    "<tr><td align=\"right\">{}</td><td align=\"right\">{}</td></tr>\n",
                    html_escape(&name),
                    html_escape(&value)
                ));
            }
            page.push_str("</table>\n");
        }
        _ => page.push_str("<p>Error: No weather data available</p>\n"),
    }

    page.push_str(&format!(
        "<p>Last data update: {}<br><font size=-2>From URL: {}</font></p>\n",
        snapshot.last_success.map(format_ts).unwrap_or_else(|| "never".to_string()),
        html_escape(&state.source_url)
    ));
    if let Some(error) = &snapshot.last_error {
        page.push_str(&format!("<p>Last error: {}</p>\n", html_escape(error)));
    }
    page.push_str(&format!("<p>Page refresh: {}</p>\n</body>\n</html>", format_ts(unix_now())));
    Html(page)
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ==============================================================================
// misc routes
// ==============================================================================

async fn time_handler() -> Json<Value> {
    let now = chrono::Utc::now();
    Json(json!({
        "local_time": now.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        "ts": now.timestamp_micros() as f64 / 1_000_000.0,
        "utc": now.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(rename = "LocalWeather")]
    build: &'static str,
    ts: u64,
    start: u64,
    clear: u64,
    #[serde(flatten)]
    counts: BTreeMap<&'static str, u64>,
    last_success: Option<u64>,
    last_failure: Option<u64>,
    last_error: Option<String>,
    gets: u64,
    errors: u64,
    uri: BTreeMap<String, u64>,
}

async fn stats_response(state: &ApiState) -> StatsResponse {
    let stats = state.stats.snapshot();
    let snapshot = state.store.read().await;
    let (gets, errors, uri) = state.requests.snapshot();
    StatsResponse {
        build: BUILD,
        ts: unix_now(),
        start: stats.started,
        clear: stats.cleared,
        counts: stats.counts,
        last_success: snapshot.last_success,
        last_failure: snapshot.last_failure,
        last_error: snapshot.last_error,
        gets,
        errors,
        uri,
    }
}

async fn stats_handler(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(stats_response(&state).await)
}

async fn clear_handler(State(state): State<ApiState>) -> Json<StatsResponse> {
    state.stats.reset();
    state.requests.reset();
    tracing::info!("[API] Stats cleared");
    Json(stats_response(&state).await)
}

async fn unsupported_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Error: Unsupported Request")
}
