use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// device field name -> value as transmitted
///
/// produced by the fetcher, consumed straight away by the converter.
/// never stored.
pub type RawReading = BTreeMap<String, String>;

/// sensor name used for the plain `battery_ok` flag
pub const OUTDOOR_SENSOR: &str = "outdoor";

/// battery flag of one sensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryState {
    Ok,
    Low,
    /// the sensor reports a level we don't know how to read
    Unknown,
}

/// one converted observation from the station
///
/// canonical units: °F, hPa, mph, inches, W/m². optional values are `None`
/// when the device did not send them (the unknown sentinel, `null` in json).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// unix timestamp (s) at which the poll started
    pub dt: u64,

    /// outdoor temperature in fahrenheit
    pub temperature: f64,
    /// relative humidity (0-100%)
    pub humidity: Option<u8>,
    pub dewpoint: Option<f64>,
    /// steadman apparent temperature (derived, never sent by the device)
    pub app_temp: Option<f64>,
    /// wind chill and heat index as reported by the gateway, °F
    pub windchill: Option<f64>,
    pub heatindex: Option<f64>,
    /// absolute pressure in hPa
    pub pressure: Option<f64>,

    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    /// direction the wind blows from, degrees
    pub wind_deg: Option<u16>,

    /// rain rate in inches per hour
    pub rain_rate: Option<f64>,
    /// rain since midnight in inches
    pub rain_daily: Option<f64>,

    pub uvi: Option<f64>,
    /// W/m²
    pub solar: Option<f64>,

    pub inside_temp: Option<f64>,
    pub inside_humidity: Option<u8>,

    pub pm25: Option<f64>,
    pub pm25aqi: Option<f64>,
    pub pm10: Option<f64>,
    pub pm10aqi: Option<f64>,
    pub co2: Option<f64>,

    /// per-sensor battery flags, only sensors present in the feed
    pub batteries: BTreeMap<String, BatteryState>,
}

impl WeatherReading {
    /// a reading with only the required temperature known
    pub fn new(dt: u64, temperature: f64) -> Self {
        Self {
            dt,
            temperature,
            humidity: None,
            dewpoint: None,
            app_temp: None,
            windchill: None,
            heatindex: None,
            pressure: None,
            wind_speed: None,
            wind_gust: None,
            wind_deg: None,
            rain_rate: None,
            rain_daily: None,
            uvi: None,
            solar: None,
            inside_temp: None,
            inside_humidity: None,
            pm25: None,
            pm25aqi: None,
            pm10: None,
            pm10aqi: None,
            co2: None,
            batteries: BTreeMap::new(),
        }
    }

    /// battery flag of the main outdoor sensor, `None` if never reported
    pub fn battery_ok(&self) -> Option<bool> {
        match self.batteries.get(OUTDOOR_SENSOR) {
            Some(BatteryState::Ok) => Some(true),
            Some(BatteryState::Low) => Some(false),
            Some(BatteryState::Unknown) | None => None,
        }
    }

    /// all known numeric values as (name, value) pairs, in a stable order
    pub fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        let fields = [
            ("temperature", Some(self.temperature)),
            ("humidity", self.humidity.map(f64::from)),
            ("dewpoint", self.dewpoint),
            ("app_temp", self.app_temp),
            ("windchill", self.windchill),
            ("heatindex", self.heatindex),
            ("pressure", self.pressure),
            ("wind_speed", self.wind_speed),
            ("wind_gust", self.wind_gust),
            ("wind_deg", self.wind_deg.map(f64::from)),
            ("rain_rate", self.rain_rate),
            ("rain_daily", self.rain_daily),
            ("uvi", self.uvi),
            ("solar", self.solar),
            ("inside_temp", self.inside_temp),
            ("inside_humidity", self.inside_humidity.map(f64::from)),
            ("pm25", self.pm25),
            ("pm25aqi", self.pm25aqi),
            ("pm10", self.pm10),
            ("pm10aqi", self.pm10aqi),
            ("co2", self.co2),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect()
    }
}

/// current station state shared between the poll loop and the api
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// latest good reading, `None` until the first successful poll
    pub reading: Option<WeatherReading>,
    /// unix timestamp (s) of the last successful publish
    pub last_success: Option<u64>,
    /// unix timestamp (s) of the last failed poll
    pub last_failure: Option<u64>,
    pub last_error: Option<String>,
}

/// current unix time in whole seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_ok_reads_outdoor_sensor() {
        let mut reading = WeatherReading::new(0, 70.0);
        assert_eq!(reading.battery_ok(), None);

        reading.batteries.insert(OUTDOOR_SENSOR.into(), BatteryState::Ok);
        assert_eq!(reading.battery_ok(), Some(true));

        reading.batteries.insert(OUTDOOR_SENSOR.into(), BatteryState::Low);
        assert_eq!(reading.battery_ok(), Some(false));
    }

    #[test]
    fn numeric_fields_skip_unknown_values() {
        let mut reading = WeatherReading::new(0, 70.0);
        reading.humidity = Some(40);
        let fields = reading.numeric_fields();
        assert_eq!(fields, vec![("temperature", 70.0), ("humidity", 40.0)]);
    }

    #[test]
    fn unknown_values_serialize_as_null() {
        let reading = WeatherReading::new(0, 70.0);
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json["solar"].is_null());
        assert_eq!(json["temperature"], 70.0);
    }
}
