//! Typed, range-checked sampling knobs.
//!
//! A [`HyperParamId`] names a parameter's semantic role independently of any
//! backend; a [`HyperParam`] wraps one id together with a string-encoded value
//! and the platform's validity rule. Each platform exposes a factory mapping
//! logical names (`"temperature"`, `"top-k"`, ...) to concrete parameters.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::errors::{SuitegenError, SuitegenResult};
use crate::models::Platform;

// ---------------------------------------------------------------------------
// HyperParamId
// ---------------------------------------------------------------------------

/// Identity of a hyperparameter. Two ids are equal iff their platform-level
/// identifier strings match; the human label plays no part.
#[derive(Clone, Copy, Debug)]
pub struct HyperParamId {
    name: &'static str,
    id: &'static str,
}

impl HyperParamId {
    pub const fn new(name: &'static str, id: &'static str) -> Self {
        Self { name, id }
    }

    /// Human label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Identifier used on the wire.
    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl PartialEq for HyperParamId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HyperParamId {}

impl Hash for HyperParamId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for HyperParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

pub mod ids {
    use super::HyperParamId;

    pub const TEMPERATURE: HyperParamId = HyperParamId::new("temperature", "temperature");
    pub const TOP_K: HyperParamId = HyperParamId::new("top-k", "top_k");
    pub const TOP_P: HyperParamId = HyperParamId::new("top-p", "top_p");
    pub const SEED: HyperParamId = HyperParamId::new("seed", "seed");
    pub const CONTEXT_WINDOW: HyperParamId = HyperParamId::new("context window", "num_ctx");
    pub const NUM_PREDICT: HyperParamId = HyperParamId::new("max predicted tokens", "num_predict");
    pub const REPEAT_PENALTY: HyperParamId = HyperParamId::new("repeat penalty", "repeat_penalty");
    pub const THINK: HyperParamId = HyperParamId::new("thinking", "think");
    pub const MAX_TOKENS: HyperParamId = HyperParamId::new("max tokens", "max_tokens");
    pub const PRESENCE_PENALTY: HyperParamId =
        HyperParamId::new("presence penalty", "presence_penalty");
    pub const FREQUENCY_PENALTY: HyperParamId =
        HyperParamId::new("frequency penalty", "frequency_penalty");
}

// ---------------------------------------------------------------------------
// Validity rules and effective values
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueRule {
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Bool,
}

/// Where the parameter travels in the request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireSlot {
    /// Inside the backend's sampling options (`options` for Ollama, the
    /// request root for OpenAI-compatible APIs).
    Options,
    /// A top-level request flag regardless of platform.
    Root,
}

/// The coerced value handed to the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectiveValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl EffectiveValue {
    pub fn to_json(&self) -> Value {
        match *self {
            EffectiveValue::Int(v) => Value::from(v),
            EffectiveValue::Float(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            EffectiveValue::Bool(v) => Value::Bool(v),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce(id: HyperParamId, rule: ValueRule, raw: &str) -> SuitegenResult<EffectiveValue> {
    let trimmed = raw.trim();
    match rule {
        ValueRule::Int { min, max } => {
            let value: i64 = trimmed.parse().map_err(|_| {
                SuitegenError::Validation(format!("{id}: '{raw}' is not an integer"))
            })?;
            if value < min || value > max {
                return Err(SuitegenError::Validation(format!(
                    "{id}: {value} is outside [{min}, {max}]"
                )));
            }
            Ok(EffectiveValue::Int(value))
        }
        ValueRule::Float { min, max } => {
            let value: f64 = trimmed.parse().map_err(|_| {
                SuitegenError::Validation(format!("{id}: '{raw}' is not a number"))
            })?;
            if !value.is_finite() || value < min || value > max {
                return Err(SuitegenError::Validation(format!(
                    "{id}: {value} is outside [{min}, {max}]"
                )));
            }
            Ok(EffectiveValue::Float(value))
        }
        ValueRule::Bool => parse_bool(trimmed).map(EffectiveValue::Bool).ok_or_else(|| {
            SuitegenError::Validation(format!("{id}: '{raw}' is not a boolean"))
        }),
    }
}

// ---------------------------------------------------------------------------
// HyperParam
// ---------------------------------------------------------------------------

/// One hyperparameter bound to a platform's validity rule.
#[derive(Clone, Debug)]
pub struct HyperParam {
    id: HyperParamId,
    rule: ValueRule,
    slot: WireSlot,
    value: String,
}

impl HyperParam {
    /// The default is stored as-is; it does not have to satisfy `rule`.
    pub fn new(id: HyperParamId, rule: ValueRule, slot: WireSlot, default: &str) -> Self {
        Self {
            id,
            rule,
            slot,
            value: default.to_string(),
        }
    }

    pub fn id(&self) -> HyperParamId {
        self.id
    }

    pub fn rule(&self) -> ValueRule {
        self.rule
    }

    pub fn slot(&self) -> WireSlot {
        self.slot
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replace the value after validating it. On failure the previous value
    /// is kept.
    pub fn set_value(&mut self, value: impl ToString) -> SuitegenResult<()> {
        let raw = value.to_string();
        coerce(self.id, self.rule, &raw)?;
        self.value = raw;
        Ok(())
    }

    pub fn to_effective_value(&self) -> SuitegenResult<EffectiveValue> {
        coerce(self.id, self.rule, &self.value)
    }
}

// ---------------------------------------------------------------------------
// Platform factories
// ---------------------------------------------------------------------------

fn normalize(logical: &str) -> String {
    logical.trim().to_ascii_lowercase().replace('_', "-")
}

fn int(min: i64, max: i64) -> ValueRule {
    ValueRule::Int { min, max }
}

fn float(min: f64, max: f64) -> ValueRule {
    ValueRule::Float { min, max }
}

fn ollama_hyperparam(logical: &str) -> Option<HyperParam> {
    use ids::*;
    let opt = WireSlot::Options;
    let param = match logical {
        "temperature" => HyperParam::new(TEMPERATURE, float(0.0, 1.0), opt, "0.8"),
        "top-k" => HyperParam::new(TOP_K, int(0, i64::MAX), opt, "40"),
        "top-p" => HyperParam::new(TOP_P, float(0.0, 1.0), opt, "0.9"),
        "seed" => HyperParam::new(SEED, int(-1, i64::MAX), opt, "-1"),
        "context-window" | "num-ctx" => {
            HyperParam::new(CONTEXT_WINDOW, int(1, i64::MAX), opt, "2048")
        }
        "num-predict" => HyperParam::new(NUM_PREDICT, int(-2, i64::MAX), opt, "-1"),
        "repeat-penalty" => HyperParam::new(REPEAT_PENALTY, float(0.0, f64::MAX), opt, "1.1"),
        "think" => HyperParam::new(THINK, ValueRule::Bool, WireSlot::Root, "false"),
        _ => return None,
    };
    Some(param)
}

fn openai_hyperparam(logical: &str) -> Option<HyperParam> {
    use ids::*;
    let opt = WireSlot::Options;
    let param = match logical {
        "temperature" => HyperParam::new(TEMPERATURE, float(0.0, 2.0), opt, "1.0"),
        "top-p" => HyperParam::new(TOP_P, float(0.0, 1.0), opt, "1.0"),
        "seed" => HyperParam::new(SEED, int(i64::MIN, i64::MAX), opt, ""),
        "max-tokens" => HyperParam::new(MAX_TOKENS, int(1, i64::MAX), opt, ""),
        "presence-penalty" => HyperParam::new(PRESENCE_PENALTY, float(-2.0, 2.0), opt, "0"),
        "frequency-penalty" => HyperParam::new(FREQUENCY_PENALTY, float(-2.0, 2.0), opt, "0"),
        _ => return None,
    };
    Some(param)
}

/// Build the concrete parameter a platform uses for `logical`.
pub fn hyperparam_for(platform: Platform, logical: &str) -> SuitegenResult<HyperParam> {
    let key = normalize(logical);
    let found = match platform {
        Platform::Ollama => ollama_hyperparam(&key),
        Platform::OpenAi => openai_hyperparam(&key),
    };
    found.ok_or_else(|| SuitegenError::UnsupportedParameter {
        name: logical.to_string(),
        platform: platform.to_string(),
    })
}
