//! Structural validation at the agent boundary.
//!
//! Both validators walk the whole payload and report every violated field,
//! never just the first one.

use augur_shared::{
    AgentContext, AgentRequest, AgentResponse, AugurError, BIRTH_TIME_FORMATS, Result, ValidationError,
    Violation,
};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

use crate::registry::AgentRegistry;

/// Collects violations under a dotted field prefix.
#[derive(Default)]
struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    fn fail(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(field, message));
    }

    fn finish(self) -> std::result::Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.violations))
        }
    }

    /// Required non-blank string.
    fn required_text(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) {
        let field = join(prefix, key);
        match obj.get(key) {
            None => self.fail(field, "is required"),
            Some(Value::String(s)) if s.trim().is_empty() => self.fail(field, "must not be empty"),
            Some(Value::String(_)) => {}
            Some(_) => self.fail(field, "must be a string"),
        }
    }

    fn typed_response(&mut self, response: &AgentResponse, prefix: &str) {
        if response.interpretation_seed.trim().is_empty() {
            self.fail(join(prefix, "interpretationSeed"), "must not be empty");
        }
        if response.method.trim().is_empty() {
            self.fail(join(prefix, "method"), "must not be empty");
        }
        if let Some(c) = response.confidence {
            self.confidence(join(prefix, "confidence"), c);
        }
    }

    fn response(&mut self, raw: &Value, prefix: &str) {
        let Some(obj) = raw.as_object() else {
            self.fail(or_root(prefix, "response"), "must be a JSON object");
            return;
        };

        self.required_text(obj, prefix, "interpretationSeed");
        self.required_text(obj, prefix, "method");

        if let Some(correlations) = obj.get("correlations") {
            let field = join(prefix, "correlations");
            match correlations.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            self.fail(format!("{field}[{i}]"), "must be a string");
                        }
                    }
                }
                None => self.fail(field, "must be an array of strings"),
            }
        }

        if let Some(confidence) = obj.get("confidence") {
            let field = join(prefix, "confidence");
            match confidence.as_f64() {
                Some(c) => self.confidence(field, c),
                None => self.fail(field, "must be a number"),
            }
        }
    }

    fn confidence(&mut self, field: String, value: f64) {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            self.fail(field, format!("must be within [0, 1], got {value}"));
        }
    }

    fn context(&mut self, raw: &Value, prefix: &str) {
        let Some(obj) = raw.as_object() else {
            self.fail(prefix, "must be a JSON object");
            return;
        };

        if let Some(birth) = obj.get("birthData") {
            self.birth_data(birth, &join(prefix, "birthData"));
        }

        if let Some(metrics) = obj.get("healthMetrics") {
            if !metrics.is_object() {
                self.fail(join(prefix, "healthMetrics"), "must be a JSON object");
            }
        }

        if let Some(themes) = obj.get("journalThemes") {
            let field = join(prefix, "journalThemes");
            match themes.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            self.fail(format!("{field}[{i}]"), "must be a string");
                        }
                    }
                }
                None => self.fail(field, "must be an array of strings"),
            }
        }

        if let Some(query) = obj.get("userQuery") {
            if !query.is_string() {
                self.fail(join(prefix, "userQuery"), "must be a string");
            }
        }

        if let Some(upstream) = obj.get("upstream") {
            let field = join(prefix, "upstream");
            match upstream.as_object() {
                Some(entries) => {
                    for (name, entry) in entries {
                        self.response(entry, &join(&field, name));
                    }
                }
                None => self.fail(field, "must be a JSON object"),
            }
        }
    }

    fn birth_data(&mut self, raw: &Value, prefix: &str) {
        let Some(obj) = raw.as_object() else {
            self.fail(prefix, "must be a JSON object");
            return;
        };

        let date_field = join(prefix, "date");
        match obj.get("date") {
            None => self.fail(date_field, "is required"),
            Some(Value::String(s)) => {
                if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                    self.fail(date_field, format!("'{s}' is not a YYYY-MM-DD date"));
                }
            }
            Some(_) => self.fail(date_field, "must be a string"),
        }

        if let Some(time) = obj.get("time") {
            let field = join(prefix, "time");
            match time.as_str() {
                Some(s) => {
                    let parses = BIRTH_TIME_FORMATS
                        .iter()
                        .any(|fmt| NaiveTime::parse_from_str(s, fmt).is_ok());
                    if !parses {
                        self.fail(field, format!("'{s}' is not an HH:MM or HH:MM:SS time"));
                    }
                }
                None => self.fail(field, "must be a string"),
            }
        }

        self.coordinate(obj, prefix, "latitude", 90.0);
        self.coordinate(obj, prefix, "longitude", 180.0);
    }

    fn coordinate(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str, bound: f64) {
        let Some(value) = obj.get(key) else {
            return;
        };
        let field = join(prefix, key);
        match value.as_f64() {
            Some(v) if (-bound..=bound).contains(&v) => {}
            Some(v) => self.fail(field, format!("must be within [-{bound}, {bound}], got {v}")),
            None => self.fail(field, "must be a number"),
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn or_root(prefix: &str, root: &str) -> String {
    if prefix.is_empty() {
        root.to_string()
    } else {
        prefix.to_string()
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &Value, root: &str) -> Result<T> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        AugurError::Validation(ValidationError::new(vec![Violation::new(
            root,
            e.to_string(),
        )]))
    })
}

/// Validate a raw request and check its framework against `registry`.
///
/// Returns [`AugurError::UnknownFramework`] when the payload is well formed
/// but names an unregistered agent; otherwise any problem is reported as a
/// [`AugurError::Validation`] listing every violated field.
pub fn validate_request(raw: &Value, registry: &AgentRegistry) -> Result<AgentRequest> {
    let Some(obj) = raw.as_object() else {
        return Err(ValidationError::new(vec![Violation::new(
            "request",
            "must be a JSON object",
        )])
        .into());
    };

    let mut checker = Checker::default();

    let mut unknown = None;
    match obj.get("framework") {
        None => checker.fail("framework", "is required"),
        Some(Value::String(s)) if s.trim().is_empty() => {
            checker.fail("framework", "must not be empty")
        }
        Some(Value::String(s)) if !registry.contains(s) => unknown = Some(s.clone()),
        Some(Value::String(_)) => {}
        Some(_) => checker.fail("framework", "must be a string"),
    }

    if let Some(context) = obj.get("context") {
        checker.context(context, "context");
    }

    match unknown {
        Some(name) if checker.violations.is_empty() => {
            return Err(AugurError::UnknownFramework { name });
        }
        Some(name) => checker.fail(
            "framework",
            format!(
                "'{name}' is not a registered framework (known: {})",
                registry.names().join(", ")
            ),
        ),
        None => {}
    }

    checker.finish()?;
    decode(raw, "request")
}

/// Validate a raw response payload.
pub fn validate_response(raw: &Value) -> Result<AgentResponse> {
    let mut checker = Checker::default();
    checker.response(raw, "");
    checker.finish()?;
    decode(raw, "response")
}

/// Apply the response rules to an already-typed value.
///
/// Agents return typed responses; this is the same chokepoint for them.
pub fn check_response(response: &AgentResponse) -> std::result::Result<(), ValidationError> {
    let mut checker = Checker::default();
    checker.typed_response(response, "");
    checker.finish()
}

/// Apply the response rules to every upstream entry of a typed context.
///
/// Violations are reported under `context.upstream.<name>`.
pub fn check_upstream(context: &AgentContext) -> std::result::Result<(), ValidationError> {
    let mut checker = Checker::default();
    for (name, response) in context.upstream_entries() {
        checker.typed_response(response, &format!("context.upstream.{name}"));
    }
    checker.finish()
}
