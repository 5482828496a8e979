//! OpenWeather hourly forecast, one hour ahead.

use std::time::Duration;

use irrigation_core::link::{ForecastReading, ForecastSource};
use irrigation_core::LinkError;
use serde::Deserialize;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::http;

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<HourEntry>,
}

#[derive(Debug, Deserialize)]
struct HourEntry {
    /// Probability of precipitation, 0..1.
    #[serde(default)]
    pop: f32,
    /// Absent when no rain is expected.
    rain: Option<RainVolume>,
}

#[derive(Debug, Deserialize)]
struct RainVolume {
    #[serde(rename = "1h", default)]
    one_hour: f32,
}

/// Parse an hourly forecast body into the first hour's rain volume and
/// probability (as a percentage).
pub(crate) fn parse_forecast(body: &str) -> Result<ForecastReading, LinkError> {
    let resp: ForecastResponse =
        serde_json::from_str(body).map_err(|e| LinkError::Decode(format!("forecast: {e}")))?;
    let first = resp
        .list
        .first()
        .ok_or_else(|| LinkError::Decode("forecast: empty list".into()))?;
    Ok(ForecastReading {
        rain_next_1h_mm: first.rain.as_ref().map_or(0.0, |r| r.one_hour),
        pop_next_1h: first.pop * 100.0,
    })
}

pub struct OpenWeather {
    agent: ureq::Agent,
    url: String,
}

impl OpenWeather {
    pub fn new(cfg: &WeatherConfig) -> Self {
        Self {
            agent: http::agent(Duration::from_secs(10)),
            url: forecast_url(cfg),
        }
    }
}

pub(crate) fn forecast_url(cfg: &WeatherConfig) -> String {
    format!(
        "{}/data/2.5/forecast/hourly?lat={}&lon={}&appid={}&units={}&cnt=1",
        cfg.host.trim_end_matches('/'),
        cfg.lat,
        cfg.lon,
        cfg.api_key,
        cfg.units
    )
}

impl ForecastSource for OpenWeather {
    async fn fetch(&mut self) -> Result<ForecastReading, LinkError> {
        let body = http::get_text(&self.agent, self.url.clone()).await?;
        debug!(bytes = body.len(), "forecast response");
        parse_forecast(&body)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rain_and_pop_from_first_hour() {
        let body = r#"{"cod":"200","list":[
            {"dt":1,"pop":0.64,"rain":{"1h":1.25}},
            {"dt":2,"pop":0.1}
        ]}"#;
        let f = parse_forecast(body).unwrap();
        assert_eq!(f.rain_next_1h_mm, 1.25);
        assert!((f.pop_next_1h - 64.0).abs() < 1e-3);
    }

    #[test]
    fn missing_rain_block_means_dry() {
        let f = parse_forecast(r#"{"list":[{"pop":0}]}"#).unwrap();
        assert_eq!(f.rain_next_1h_mm, 0.0);
        assert_eq!(f.pop_next_1h, 0.0);
    }

    #[test]
    fn empty_list_is_decode_error() {
        assert!(matches!(
            parse_forecast(r#"{"list":[]}"#),
            Err(LinkError::Decode(_))
        ));
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(parse_forecast("<html>"), Err(LinkError::Decode(_))));
    }

    #[test]
    fn url_carries_location_and_key() {
        let cfg = WeatherConfig {
            api_key: "k3y".into(),
            host: "https://example.org/".into(),
            ..WeatherConfig::default()
        };
        let url = forecast_url(&cfg);
        assert!(url.starts_with("https://example.org/data/2.5/forecast/hourly?lat=20.980913"));
        assert!(url.contains("&appid=k3y&units=metric&cnt=1"));
    }
}
