use serde::Serialize;
use serde_json::Value;

/// Verdict on one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub valid: bool,
    pub message: String,
}

impl Check {
    fn valid() -> Self {
        Self {
            valid: true,
            message: "ok".to_string(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Shallow sanity check. Catches obviously broken iterations; it does not
/// judge whether the goal was met.
pub fn check(result: &Value) -> Check {
    match result {
        Value::Null => Check::invalid("result is missing"),
        Value::Array(items) if items.is_empty() => Check::invalid("result is an empty list"),
        Value::Object(map) => match map.get("error") {
            Some(error) if !error.is_null() => {
                let detail = error.as_str().map_or_else(|| error.to_string(), String::from);
                Check::invalid(format!("result carries an error: {detail}"))
            }
            _ => Check::valid(),
        },
        _ => Check::valid(),
    }
}

/// Judge a run's accumulated results: there must be at least one and at
/// least one of them must pass [`check`].
pub fn check_all<'a>(results: impl IntoIterator<Item = &'a Value>) -> Check {
    let mut total = 0;
    let mut last_failure = None;
    for result in results {
        total += 1;
        let verdict = check(result);
        if verdict.valid {
            return verdict;
        }
        last_failure = Some(verdict.message);
    }
    match last_failure {
        Some(message) => Check::invalid(format!("none of {total} result(s) is valid; last: {message}")),
        None => Check::invalid("no results were produced"),
    }
}
