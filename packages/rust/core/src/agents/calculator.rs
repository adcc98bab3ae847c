//! Calendar facts and metric statistics derived from the request alone.

use async_trait::async_trait;
use augur_contract::Agent;
use augur_shared::{AgentRequest, AgentResponse, AugurError, BirthData, Result, method};
use chrono::{Datelike, Timelike, Weekday};
use serde_json::{Map, Value, json};

use super::CALCULATOR;

/// Deterministic profile calculator. Requires birth data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Meteorological season, flipped south of the equator.
fn season(month: u32, latitude: Option<f64>) -> &'static str {
    const NORTH: [&str; 4] = ["winter", "spring", "summer", "autumn"];
    let quarter = ((month % 12) / 3) as usize;
    let southern = latitude.is_some_and(|lat| lat < 0.0);
    if southern {
        NORTH[(quarter + 2) % 4]
    } else {
        NORTH[quarter]
    }
}

fn hour_bucket(hour: u32) -> &'static str {
    match hour {
        0..=5 => "night",
        6..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

/// count / mean / min / max over the numeric metrics; `None` if there are none.
fn metric_stats(metrics: &std::collections::BTreeMap<String, Value>) -> Option<Value> {
    let numeric: Vec<(&String, f64)> = metrics
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
        .collect();
    if numeric.is_empty() {
        return None;
    }

    let values = numeric.iter().map(|(_, n)| *n);
    let count = numeric.len();
    let mean = values.clone().sum::<f64>() / count as f64;
    let min = values.clone().fold(f64::INFINITY, f64::min);
    let max = values.fold(f64::NEG_INFINITY, f64::max);

    Some(json!({
        "count": count,
        "mean": mean,
        "min": min,
        "max": max,
        "names": numeric.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
    }))
}

fn profile(birth: &BirthData) -> (Map<String, Value>, Vec<String>, String) {
    let weekday = weekday_name(birth.date.weekday());
    let season = season(birth.date.month(), birth.latitude);
    let day_of_year = birth.date.ordinal();

    let mut calc = Map::new();
    calc.insert("weekday".into(), json!(weekday));
    calc.insert("dayOfYear".into(), json!(day_of_year));
    calc.insert("season".into(), json!(season));

    let mut correlations = vec![
        format!("weekday:{}", weekday.to_lowercase()),
        format!("season:{season}"),
    ];
    let mut seed = format!("Born on a {weekday} in {season} (day {day_of_year} of the year)");

    if let Some(time) = birth.parsed_time() {
        let bucket = hour_bucket(time.hour());
        calc.insert("hourBucket".into(), json!(bucket));
        correlations.push(format!("hour:{bucket}"));
        seed.push_str(&format!(", in the {bucket}"));
    }
    if let (Some(lat), Some(lon)) = (birth.latitude, birth.longitude) {
        calc.insert(
            "hemisphere".into(),
            json!(if lat < 0.0 { "southern" } else { "northern" }),
        );
        calc.insert("coordinates".into(), json!([lat, lon]));
    }
    seed.push('.');

    (calc, correlations, seed)
}

#[async_trait]
impl Agent for Calculator {
    fn name(&self) -> &str {
        CALCULATOR
    }

    fn description(&self) -> &str {
        "calendar facts from birth data plus health-metric statistics"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let context = &request.context;
        let birth = context
            .birth_data
            .as_ref()
            .ok_or_else(|| AugurError::stage(CALCULATOR, "birth data is required"))?;

        let (mut calc, mut correlations, mut seed) = profile(birth);

        if let Some(stats) = context.health_metrics.as_ref().and_then(metric_stats) {
            seed.push_str(&format!(
                " {} numeric health metrics average {:.2}.",
                stats["count"], stats["mean"].as_f64().unwrap_or_default()
            ));
            correlations.push("metrics:present".into());
            calc.insert("metrics".into(), stats);
        }

        let mut confidence: f64 = 0.6;
        if birth.parsed_time().is_some() {
            confidence += 0.2;
        }
        if birth.latitude.is_some() && birth.longitude.is_some() {
            confidence += 0.2;
        }

        Ok(AgentResponse::new(seed, method::DETERMINISTIC)
            .with_calculation(Value::Object(calc))
            .with_correlations(correlations)
            .with_confidence(confidence.min(1.0)))
    }
}
