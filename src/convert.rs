//! ==============================================================================
//! convert.rs - raw device fields to a canonical reading
//! ==============================================================================
//!
//! purpose:
//!     turns the flat key/value map produced by the fetcher into a
//!     `WeatherReading` in canonical units (°F, hPa, mph, inches, W/m²).
//!
//! relationships:
//!     - used by: poller.rs (once per successful fetch)
//!     - produces: domain.rs (WeatherReading)
//!
//! field sources:
//!     each canonical value has an ordered list of raw aliases. the first
//!     alias present in the feed wins. two families of names are understood:
//!
//!         tempf / humidity / windspeedmph ...   (customized-upload style)
//!         0x02 / 0x07 / 0x0B ...                (gateway live-data ids)
//!
//!     ids may carry their unit either as a suffix on the value
//!     ("3.6 km/h") or as a sibling "<id>.unit" entry, which wins.
//!
//! forward compatibility:
//!     keys not listed here are ignored. only the outdoor temperature is
//!     required; every other value falls back to `None` when absent.
//!
//! ==============================================================================

use crate::domain::{BatteryState, RawReading, WeatherReading, OUTDOOR_SENSOR};
use crate::error::ConversionError;

// ==============================================================================
// scale conversions
// ==============================================================================

pub const HPA_PER_INHG: f64 = 33.863_886_666_666_7;
pub const HPA_PER_MMHG: f64 = 1.333_223_684_210_5;
pub const KMH_PER_MPH: f64 = 1.609_344;
pub const MS_PER_MPH: f64 = 0.447_04;
pub const MPH_PER_KNOT: f64 = 1.150_779_448;
pub const MM_PER_INCH: f64 = 25.4;
/// gateway factor for converting illuminance to irradiance
pub const LUX_PER_WM2: f64 = 126.7;

pub fn f_to_c(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn c_to_f(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn inhg_to_hpa(inhg: f64) -> f64 {
    inhg * HPA_PER_INHG
}

pub fn hpa_to_inhg(hpa: f64) -> f64 {
    hpa / HPA_PER_INHG
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh / KMH_PER_MPH
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * KMH_PER_MPH
}

pub fn ms_to_mph(ms: f64) -> f64 {
    ms / MS_PER_MPH
}

pub fn mph_to_ms(mph: f64) -> f64 {
    mph * MS_PER_MPH
}

pub fn mm_to_in(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

pub fn in_to_mm(inches: f64) -> f64 {
    inches * MM_PER_INCH
}

/// steadman apparent temperature (BOM variant, radiation ignored)
///
/// http://www.bom.gov.au/info/thermal_stress/
pub fn apparent_temp_f(temp_f: f64, humidity: u8, wind_mph: f64) -> f64 {
    let t = f_to_c(temp_f);
    let e = f64::from(humidity) / 100.0 * 6.105 * (17.27 * t / (237.7 + t)).exp();
    let at = t + 0.33 * e - 0.70 * mph_to_ms(wind_mph) - 4.00;
    c_to_f(at)
}

// ==============================================================================
// field encodings
// ==============================================================================

#[derive(Clone, Copy, Debug)]
enum Encoding {
    /// signed integer in tenths of a degree fahrenheit ("725" = 72.5°F)
    TenthsF,
    /// decimal temperature, default unit when none is given
    Temperature(&'static str),
    Pressure(&'static str),
    Speed(&'static str),
    Rain(&'static str),
    /// 0..=100, optional "%"
    Percent,
    /// 0..=360, optional "°"
    Direction,
    /// W/m², or klux
    Solar,
    /// non-negative, any suffix is informational (ppm, µg/m³)
    Plain,
}

use Encoding::*;

const TEMPERATURE: &[(&str, Encoding)] = &[("tempf", TenthsF), ("0x02", Temperature("C"))];
const HUMIDITY: &[(&str, Encoding)] = &[("humidity", Percent), ("0x07", Percent)];
const DEWPOINT: &[(&str, Encoding)] = &[("dewpointf", Temperature("F")), ("0x03", Temperature("C"))];
const WINDCHILL: &[(&str, Encoding)] = &[("windchillf", Temperature("F")), ("0x04", Temperature("C"))];
const HEATINDEX: &[(&str, Encoding)] = &[("heatindexf", Temperature("F")), ("0x05", Temperature("C"))];
const PRESSURE: &[(&str, Encoding)] = &[("baromabsin", Pressure("inHg")), ("abs", Pressure("hPa"))];
const WIND_DIR: &[(&str, Encoding)] = &[("winddir", Direction), ("0x0A", Direction)];
const WIND_SPEED: &[(&str, Encoding)] = &[("windspeedmph", Speed("mph")), ("0x0B", Speed("km/h"))];
const WIND_GUST: &[(&str, Encoding)] = &[("windgustmph", Speed("mph")), ("0x0C", Speed("km/h"))];
const RAIN_RATE: &[(&str, Encoding)] = &[("rainratein", Rain("in")), ("0x0E", Rain("mm"))];
const RAIN_DAILY: &[(&str, Encoding)] = &[("dailyrainin", Rain("in")), ("0x10", Rain("mm"))];
const UVI: &[(&str, Encoding)] = &[("uv", Plain), ("0x17", Plain)];
const SOLAR: &[(&str, Encoding)] = &[("solarradiation", Solar), ("0x15", Solar)];
const INSIDE_TEMP: &[(&str, Encoding)] = &[("tempinf", TenthsF), ("intemp", Temperature("C"))];
const INSIDE_HUMIDITY: &[(&str, Encoding)] = &[("humidityin", Percent), ("inhumi", Percent)];
const PM25: &[(&str, Encoding)] = &[("pm25", Plain), ("PM25", Plain)];
const PM25_AQI: &[(&str, Encoding)] = &[("PM25_RealAQI", Plain)];
const PM10: &[(&str, Encoding)] = &[("pm10", Plain), ("PM10", Plain)];
const PM10_AQI: &[(&str, Encoding)] = &[("PM10_RealAQI", Plain)];
const CO2: &[(&str, Encoding)] = &[("co2", Plain), ("CO2", Plain)];

/// gateways send dashes for a disconnected sensor
fn is_placeholder(value: &str) -> bool {
    value.trim().chars().all(|c| c == '-' || c == '.')
}

/// split "1013.2 hPa" into (1013.2, "hPa")
fn split_measure(field: &str, value: &str) -> Result<(f64, String), ConversionError> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    let number: f64 = value[..end]
        .parse()
        .map_err(|_| ConversionError::new(field, format!("`{value}` is not a number")))?;
    if !number.is_finite() {
        return Err(ConversionError::new(field, "value is not finite"));
    }
    Ok((number, value[end..].trim().to_string()))
}

/// drop decoration so "°C", "mm/Hr" and "W/m²" compare cleanly
fn normalize_unit(unit: &str) -> String {
    let unit = unit.trim().trim_start_matches('°').to_ascii_lowercase();
    let unit = unit.strip_suffix("/hr").unwrap_or(&unit);
    unit.replace('²', "2")
}

impl Encoding {
    fn decode(self, field: &str, value: &str, unit: Option<&str>) -> Result<f64, ConversionError> {
        let (number, suffix) = split_measure(field, value)?;
        let unit = normalize_unit(unit.unwrap_or(&suffix));
        let bad_unit = || ConversionError::new(field, format!("unsupported unit `{unit}`"));

        let converted = match self {
            TenthsF => {
                let tenths: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ConversionError::new(field, format!("`{value}` is not an integer")))?;
                tenths as f64 / 10.0
            }
            Temperature(default) => match unit_or(&unit, default).as_str() {
                "c" | "℃" => c_to_f(number),
                "f" | "℉" => number,
                _ => return Err(bad_unit()),
            },
            Pressure(default) => match unit_or(&unit, default).as_str() {
                "hpa" | "mbar" => number,
                "inhg" => inhg_to_hpa(number),
                "mmhg" => number * HPA_PER_MMHG,
                _ => return Err(bad_unit()),
            },
            Speed(default) => match unit_or(&unit, default).as_str() {
                "mph" => number,
                "km/h" | "kmh" | "kph" => kmh_to_mph(number),
                "m/s" => ms_to_mph(number),
                "knots" | "kn" => number * MPH_PER_KNOT,
                _ => return Err(bad_unit()),
            },
            Rain(default) => match unit_or(&unit, default).as_str() {
                "in" => number,
                "mm" => mm_to_in(number),
                _ => return Err(bad_unit()),
            },
            Percent => match unit.as_str() {
                "" | "%" if (0.0..=100.0).contains(&number) => number,
                "" | "%" => return Err(ConversionError::new(field, format!("{number} is outside 0..=100"))),
                _ => return Err(bad_unit()),
            },
            Direction => match unit.as_str() {
                "" | "deg" if (0.0..=360.0).contains(&number) => number,
                "" | "deg" => return Err(ConversionError::new(field, format!("{number} is outside 0..=360"))),
                _ => return Err(bad_unit()),
            },
            Solar => match unit.as_str() {
                "" | "w/m2" => number,
                "klux" => number * 1000.0 / LUX_PER_WM2,
                "lux" => number / LUX_PER_WM2,
                _ => return Err(bad_unit()),
            },
            Plain => number,
        };

        // a huge but finite input can overflow once scaled
        if !converted.is_finite() {
            return Err(ConversionError::new(field, "value is out of range after conversion"));
        }
        if self.non_negative() && converted < 0.0 {
            return Err(ConversionError::new(field, format!("negative value {number}")));
        }
        Ok(converted)
    }

    fn non_negative(self) -> bool {
        matches!(self, Speed(_) | Rain(_) | Solar | Plain)
    }
}

fn unit_or(unit: &str, default: &str) -> String {
    if unit.is_empty() {
        normalize_unit(default)
    } else {
        unit.to_string()
    }
}

// ==============================================================================
// converter
// ==============================================================================

/// look up the first alias present in the feed and decode it
fn lookup(raw: &RawReading, sources: &[(&str, Encoding)]) -> Result<Option<f64>, ConversionError> {
    for (key, encoding) in sources {
        let Some(value) = raw.get(*key) else { continue };
        if is_placeholder(value) {
            continue;
        }
        let unit = raw.get(&format!("{key}.unit")).map(String::as_str);
        return encoding.decode(key, value, unit).map(Some);
    }
    Ok(None)
}

fn lookup_percent(raw: &RawReading, sources: &[(&str, Encoding)]) -> Result<Option<u8>, ConversionError> {
    Ok(lookup(raw, sources)?.map(|v| v.round() as u8))
}

/// flags: `battery_ok` (1 ok, 0 low) and `<sensor>batt` (0 ok, 1 low)
///
/// any other level encoding is reported as unknown rather than failing the
/// reading, since battery formats differ between sensor models.
fn batteries(raw: &RawReading) -> std::collections::BTreeMap<String, BatteryState> {
    let mut out = std::collections::BTreeMap::new();
    for (key, value) in raw {
        let (sensor, ok, low) = if key == "battery_ok" {
            (OUTDOOR_SENSOR, "1", "0")
        } else if let Some(sensor) = key.strip_suffix("batt").filter(|s| !s.is_empty()) {
            (sensor, "0", "1")
        } else {
            continue;
        };
        let state = match value.trim() {
            v if v == ok => BatteryState::Ok,
            v if v == low => BatteryState::Low,
            _ => BatteryState::Unknown,
        };
        out.insert(sensor.to_string(), state);
    }
    out
}

/// convert one raw feed into a canonical reading captured at `dt`
pub fn convert(raw: &RawReading, dt: u64) -> Result<WeatherReading, ConversionError> {
    let temperature = lookup(raw, TEMPERATURE)?.ok_or_else(|| ConversionError::missing("tempf"))?;

    let mut reading = WeatherReading::new(dt, temperature);
    reading.humidity = lookup_percent(raw, HUMIDITY)?;
    reading.dewpoint = lookup(raw, DEWPOINT)?;
    reading.windchill = lookup(raw, WINDCHILL)?;
    reading.heatindex = lookup(raw, HEATINDEX)?;
    reading.pressure = lookup(raw, PRESSURE)?;
    reading.wind_deg = lookup(raw, WIND_DIR)?.map(|v| v.round() as u16);
    reading.wind_speed = lookup(raw, WIND_SPEED)?;
    reading.wind_gust = lookup(raw, WIND_GUST)?;
    reading.rain_rate = lookup(raw, RAIN_RATE)?;
    reading.rain_daily = lookup(raw, RAIN_DAILY)?;
    reading.uvi = lookup(raw, UVI)?;
    reading.solar = lookup(raw, SOLAR)?;
    reading.inside_temp = lookup(raw, INSIDE_TEMP)?;
    reading.inside_humidity = lookup_percent(raw, INSIDE_HUMIDITY)?;
    reading.pm25 = lookup(raw, PM25)?;
    reading.pm25aqi = lookup(raw, PM25_AQI)?;
    reading.pm10 = lookup(raw, PM10)?;
    reading.pm10aqi = lookup(raw, PM10_AQI)?;
    reading.co2 = lookup(raw, CO2)?;
    reading.batteries = batteries(raw);

    if let (Some(humidity), Some(wind)) = (reading.humidity, reading.wind_speed) {
        reading.app_temp = Some(apparent_temp_f(temperature, humidity, wind));
    }

    Ok(reading)
}
