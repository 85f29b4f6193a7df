//! Data-driven mapping from raw API records onto stable output shapes.
//!
//! A projection is an ordered table of [`FieldSpec`]s. Projecting never
//! fails: missing or oddly typed source fields fall back to the field's
//! default, and undeclared source fields are dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::constants::graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    PassThrough,
    /// RFC 3339 string to UTC with millisecond precision and a `Z` suffix.
    /// Anything unparseable is passed through untouched.
    Timestamp,
    /// Text after the last `.` of a type discriminator, e.g.
    /// `#microsoft.graph.windows10CompliancePolicy` -> `windows10CompliancePolicy`.
    TypeTag,
    /// Lowercased discriminator without the namespace prefix, cut before
    /// `marker`; `fallback` when the marker is absent.
    TypePrefix {
        marker: &'static str,
        fallback: &'static str,
    },
    /// Fixed value, used to tag the source of a composite listing.
    Constant(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub output: &'static str,
    pub source: &'static str,
    pub transform: Transform,
    pub default: Option<&'static str>,
}

impl FieldSpec {
    pub const fn field(name: &'static str) -> Self {
        Self {
            output: name,
            source: name,
            transform: Transform::PassThrough,
            default: None,
        }
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self {
            output: name,
            source: name,
            transform: Transform::Timestamp,
            default: None,
        }
    }

    pub const fn type_tag(output: &'static str) -> Self {
        Self {
            output,
            source: graph::TYPE_FIELD,
            transform: Transform::TypeTag,
            default: Some(""),
        }
    }

    pub const fn type_prefix(output: &'static str, marker: &'static str, fallback: &'static str) -> Self {
        Self {
            output,
            source: graph::TYPE_FIELD,
            transform: Transform::TypePrefix { marker, fallback },
            default: None,
        }
    }

    pub const fn constant(output: &'static str, value: &'static str) -> Self {
        Self {
            output,
            source: output,
            transform: Transform::Constant(value),
            default: None,
        }
    }

    pub const fn or(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    fn fallback(&self) -> Value {
        self.default
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null)
    }

    fn apply(&self, raw: &Value) -> Value {
        let source = raw.get(self.source).filter(|value| !value.is_null());
        match self.transform {
            Transform::Constant(value) => Value::String(value.to_string()),
            Transform::PassThrough => source.cloned().unwrap_or_else(|| self.fallback()),
            Transform::Timestamp => match source {
                Some(Value::String(text)) => Value::String(normalize_timestamp(text)),
                Some(other) => other.clone(),
                None => self.fallback(),
            },
            Transform::TypeTag => match source.and_then(Value::as_str) {
                Some(discriminator) => Value::String(type_tag(discriminator).to_string()),
                None => self.fallback(),
            },
            Transform::TypePrefix { marker, fallback } => {
                let discriminator = source.and_then(Value::as_str).unwrap_or("");
                Value::String(type_prefix(discriminator, marker, fallback))
            }
        }
    }
}

pub fn type_tag(discriminator: &str) -> &str {
    discriminator
        .rsplit_once('.')
        .map(|(_, tail)| tail)
        .unwrap_or(discriminator)
}

pub fn type_prefix(discriminator: &str, marker: &str, fallback: &str) -> String {
    let lowered = discriminator.to_lowercase();
    let marker = marker.to_lowercase();
    if !lowered.contains(&marker) {
        return fallback.to_string();
    }
    let stripped = lowered.replace(&graph::TYPE_NAMESPACE.to_lowercase(), "");
    stripped
        .split(marker.as_str())
        .next()
        .unwrap_or("")
        .to_string()
}

pub fn normalize_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => raw.to_string(),
    }
}

pub fn project(raw: &Value, spec: &[FieldSpec]) -> Value {
    let mut out = Map::with_capacity(spec.len());
    for field in spec {
        out.insert(field.output.to_string(), field.apply(raw));
    }
    Value::Object(out)
}

pub fn project_all(raw: &[Value], spec: &[FieldSpec]) -> Vec<Value> {
    raw.iter().map(|record| project(record, spec)).collect()
}
