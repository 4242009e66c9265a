use serde_json::{Map, Value};

use super::EngineError;

/// Provider option bag (duration, aspect ratio, ...).
pub type Options = Map<String, Value>;

pub const DEFAULT_DURATION: i64 = 5;
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_RUNWAY_RATIO: &str = "1280:768";

const DURATIONS: [i64; 2] = [5, 10];
const ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "1:1"];
const RUNWAY_RATIOS: [&str; 2] = ["1280:768", "768:1280"];

/// Validation rule set shared by a family of engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRules {
    /// duration in {5, 10}, aspect_ratio in {16:9, 9:16, 1:1}
    Kling,
    /// prompt_optimizer must be a boolean
    Minimax,
    /// duration in {5, 10}
    Duration,
    /// duration in {5, 10}, ratio in {1280:768, 768:1280}
    Runway,
    /// anything goes
    Passthrough,
}

impl OptionRules {
    pub fn apply(&self, options: &Options) -> Result<Options, EngineError> {
        let mut out = options.clone();

        match self {
            OptionRules::Kling => {
                let duration = duration_or_default(&mut out);
                let ratio = string_or_default(&mut out, "aspect_ratio", DEFAULT_ASPECT_RATIO);
                check_duration(duration)?;
                if !ratio.is_some_and(|r| ASPECT_RATIOS.contains(&r.as_str())) {
                    return Err(invalid("aspect_ratio must be 16:9 or 9:16 or 1:1"));
                }
            }
            OptionRules::Minimax => {
                let value = out
                    .entry("prompt_optimizer")
                    .or_insert(Value::Bool(true));
                if value.is_null() {
                    *value = Value::Bool(true);
                }
                if !value.is_boolean() {
                    return Err(invalid("prompt_optimizer must be boolean"));
                }
            }
            OptionRules::Duration => {
                let duration = duration_or_default(&mut out);
                check_duration(duration)?;
            }
            OptionRules::Runway => {
                let duration = duration_or_default(&mut out);
                let ratio = string_or_default(&mut out, "ratio", DEFAULT_RUNWAY_RATIO);
                check_duration(duration)?;
                if !ratio.is_some_and(|r| RUNWAY_RATIOS.contains(&r.as_str())) {
                    return Err(invalid("Ratio must be 1280:768 or 768:1280"));
                }
            }
            OptionRules::Passthrough => {}
        }

        Ok(out)
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidOptions(message.to_string())
}

fn check_duration(duration: Option<i64>) -> Result<(), EngineError> {
    match duration {
        Some(d) if DURATIONS.contains(&d) => Ok(()),
        _ => Err(invalid("Duration must be 5 or 10")),
    }
}

/// Reads `duration`, inserting the default when missing or null.
/// Non-integral values yield `None` and fail the duration check.
fn duration_or_default(options: &mut Options) -> Option<i64> {
    let value = options
        .entry("duration")
        .or_insert(Value::from(DEFAULT_DURATION));
    if value.is_null() {
        *value = Value::from(DEFAULT_DURATION);
    }
    as_integer(value)
}

fn string_or_default(options: &mut Options, key: &str, default: &str) -> Option<String> {
    let value = options
        .entry(key.to_string())
        .or_insert_with(|| Value::from(default));
    if value.is_null() {
        *value = Value::from(default);
    }
    value.as_str().map(str::to_string)
}

fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Read an integer option, falling back to `default`.
pub fn int_option(options: &Options, key: &str, default: i64) -> i64 {
    options.get(key).and_then(as_integer).unwrap_or(default)
}

/// Read a string option, falling back to `default`.
pub fn str_option<'a>(options: &'a Options, key: &str, default: &'a str) -> &'a str {
    options
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
}
