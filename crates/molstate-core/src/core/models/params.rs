use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ParamValue>),
    Group(Params),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "boolean",
            ParamValue::Number(_) => "number",
            ParamValue::Text(_) => "text",
            ParamValue::List(_) => "list",
            ParamValue::Group(_) => "group",
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Number(f64::from(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<Params> for ParamValue {
    fn from(v: Params) -> Self {
        ParamValue::Group(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<[f64; 3]> for ParamValue {
    fn from(v: [f64; 3]) -> Self {
        ParamValue::List(v.iter().copied().map(ParamValue::Number).collect())
    }
}

impl From<(f64, f64)> for ParamValue {
    fn from((lo, hi): (f64, f64)) -> Self {
        ParamValue::List(vec![ParamValue::Number(lo), ParamValue::Number(hi)])
    }
}

fn numbers(items: &[ParamValue]) -> Option<Vec<f64>> {
    items
        .iter()
        .map(|item| match item {
            ParamValue::Number(v) => Some(*v),
            _ => None,
        })
        .collect()
}

/// The parameters of a transform node, compared by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(ParamValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ParamValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&Params> {
        match self.0.get(name) {
            Some(ParamValue::Group(v)) => Some(v),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[ParamValue]> {
        match self.0.get(name) {
            Some(ParamValue::List(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// The selected options of a multi-select parameter.
    pub fn selection(&self, name: &str) -> Option<Vec<&str>> {
        self.list(name)?
            .iter()
            .map(|item| match item {
                ParamValue::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn interval(&self, name: &str) -> Option<(f64, f64)> {
        match numbers(self.list(name)?)?.as_slice() {
            [lo, hi] => Some((*lo, *hi)),
            _ => None,
        }
    }

    pub fn vec3(&self, name: &str) -> Option<[f64; 3]> {
        match numbers(self.list(name)?)?.as_slice() {
            [x, y, z] => Some([*x, *y, *z]),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("Unknown parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("Parameter '{name}' expects a {expected} value, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Parameter '{name}' = {value} is outside the range [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Parameter '{name}' = '{value}' is not one of {options:?}")]
    InvalidOption {
        name: String,
        value: String,
        options: Vec<String>,
    },

    #[error("Parameter '{name}' expects {expected} values, got {found}")]
    WrongLength {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Parameter '{name}' = [{lo}, {hi}] is not an ordered interval")]
    InvertedInterval { name: String, lo: f64, hi: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Boolean,
    Number {
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
    Select {
        options: Vec<String>,
    },
    /// Any subset of `options`, as a list of text values.
    MultiSelect {
        options: Vec<String>,
    },
    /// A `[lo, hi]` pair of numbers with `min <= lo <= hi <= max`.
    Interval {
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Three finite numbers.
    Vec3,
    Text,
    Group(ParamSchema),
}

/// Describes one parameter: its type, default, and how a property editor
/// should present it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDefinition {
    pub kind: ParamKind,
    pub default: ParamValue,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl ParamDefinition {
    fn of(kind: ParamKind, default: ParamValue) -> Self {
        Self {
            kind,
            default,
            label: None,
            description: None,
        }
    }

    pub fn boolean(default: bool) -> Self {
        Self::of(ParamKind::Boolean, default.into())
    }

    pub fn number(default: f64) -> Self {
        Self::of(
            ParamKind::Number {
                min: None,
                max: None,
                step: None,
            },
            default.into(),
        )
    }

    pub fn range(default: f64, min: f64, max: f64, step: f64) -> Self {
        Self::of(
            ParamKind::Number {
                min: Some(min),
                max: Some(max),
                step: Some(step),
            },
            default.into(),
        )
    }

    pub fn select(default: &str, options: &[&str]) -> Self {
        Self::of(
            ParamKind::Select {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            default.into(),
        )
    }

    pub fn multi_select(default: &[&str], options: &[&str]) -> Self {
        Self::of(
            ParamKind::MultiSelect {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            default.to_vec().into(),
        )
    }

    pub fn interval(default: (f64, f64)) -> Self {
        Self::of(
            ParamKind::Interval {
                min: None,
                max: None,
            },
            default.into(),
        )
    }

    pub fn bounded_interval(default: (f64, f64), min: f64, max: f64) -> Self {
        Self::of(
            ParamKind::Interval {
                min: Some(min),
                max: Some(max),
            },
            default.into(),
        )
    }

    pub fn vec3(default: [f64; 3]) -> Self {
        Self::of(ParamKind::Vec3, default.into())
    }

    pub fn text(default: &str) -> Self {
        Self::of(ParamKind::Text, default.into())
    }

    pub fn group(schema: ParamSchema) -> Self {
        let default = schema.defaults().into();
        Self::of(ParamKind::Group(schema), default)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn normalize(&self, name: &str, value: &ParamValue) -> Result<ParamValue, ParamError> {
        let mismatch = |expected| ParamError::TypeMismatch {
            name: name.to_string(),
            expected,
            found: value.type_name(),
        };
        match (&self.kind, value) {
            (ParamKind::Boolean, ParamValue::Bool(_)) => Ok(value.clone()),
            (ParamKind::Boolean, _) => Err(mismatch("boolean")),
            (ParamKind::Number { min, max, .. }, ParamValue::Number(v)) => {
                let lo = min.unwrap_or(f64::NEG_INFINITY);
                let hi = max.unwrap_or(f64::INFINITY);
                if v.is_nan() || *v < lo || *v > hi {
                    return Err(ParamError::OutOfRange {
                        name: name.to_string(),
                        value: *v,
                        min: lo,
                        max: hi,
                    });
                }
                Ok(value.clone())
            }
            (ParamKind::Number { .. }, _) => Err(mismatch("number")),
            (ParamKind::Select { options }, ParamValue::Text(v)) => {
                if options.iter().any(|o| o == v) {
                    Ok(value.clone())
                } else {
                    Err(ParamError::InvalidOption {
                        name: name.to_string(),
                        value: v.clone(),
                        options: options.clone(),
                    })
                }
            }
            (ParamKind::Select { .. }, _) => Err(mismatch("text")),
            (ParamKind::MultiSelect { options }, ParamValue::List(items)) => {
                for item in items {
                    let ParamValue::Text(v) = item else {
                        return Err(ParamError::TypeMismatch {
                            name: name.to_string(),
                            expected: "list of text",
                            found: item.type_name(),
                        });
                    };
                    if !options.iter().any(|o| o == v) {
                        return Err(ParamError::InvalidOption {
                            name: name.to_string(),
                            value: v.clone(),
                            options: options.clone(),
                        });
                    }
                }
                Ok(value.clone())
            }
            (ParamKind::MultiSelect { .. }, _) => Err(mismatch("list of text")),
            (ParamKind::Interval { min, max }, ParamValue::List(items)) => {
                let values = numbers(items).ok_or_else(|| mismatch("list of numbers"))?;
                let &[lo, hi] = values.as_slice() else {
                    return Err(ParamError::WrongLength {
                        name: name.to_string(),
                        expected: 2,
                        found: values.len(),
                    });
                };
                let floor = min.unwrap_or(f64::NEG_INFINITY);
                let ceil = max.unwrap_or(f64::INFINITY);
                for v in [lo, hi] {
                    if v.is_nan() || v < floor || v > ceil {
                        return Err(ParamError::OutOfRange {
                            name: name.to_string(),
                            value: v,
                            min: floor,
                            max: ceil,
                        });
                    }
                }
                if lo > hi {
                    return Err(ParamError::InvertedInterval {
                        name: name.to_string(),
                        lo,
                        hi,
                    });
                }
                Ok(value.clone())
            }
            (ParamKind::Interval { .. }, _) => Err(mismatch("list of numbers")),
            (ParamKind::Vec3, ParamValue::List(items)) => {
                let values = numbers(items).ok_or_else(|| mismatch("list of numbers"))?;
                if values.len() != 3 {
                    return Err(ParamError::WrongLength {
                        name: name.to_string(),
                        expected: 3,
                        found: values.len(),
                    });
                }
                if let Some(v) = values.iter().find(|v| !v.is_finite()) {
                    return Err(ParamError::OutOfRange {
                        name: name.to_string(),
                        value: *v,
                        min: f64::MIN,
                        max: f64::MAX,
                    });
                }
                Ok(value.clone())
            }
            (ParamKind::Vec3, _) => Err(mismatch("list of numbers")),
            (ParamKind::Text, ParamValue::Text(_)) => Ok(value.clone()),
            (ParamKind::Text, _) => Err(mismatch("text")),
            (ParamKind::Group(schema), ParamValue::Group(inner)) => schema
                .normalize_at(Some(name), inner)
                .map(ParamValue::Group),
            (ParamKind::Group(_), _) => Err(mismatch("group")),
        }
    }
}

/// An ordered set of named parameter definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    entries: Vec<(String, ParamDefinition)>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, definition: ParamDefinition) -> Self {
        let name = name.into();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, definition));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamDefinition> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamDefinition)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn defaults(&self) -> Params {
        let mut params = Params::new();
        for (name, def) in &self.entries {
            params.insert(name.clone(), def.default.clone());
        }
        params
    }

    /// Validates `params` against the schema and fills in defaults for every
    /// parameter that was not given.
    pub fn normalize(&self, params: &Params) -> Result<Params, ParamError> {
        self.normalize_at(None, params)
    }

    fn normalize_at(&self, prefix: Option<&str>, params: &Params) -> Result<Params, ParamError> {
        let path = |name: &str| match prefix {
            Some(p) => format!("{}.{}", p, name),
            None => name.to_string(),
        };

        if let Some((unknown, _)) = params.iter().find(|(name, _)| self.get(name).is_none()) {
            return Err(ParamError::UnknownParameter {
                name: path(unknown),
            });
        }

        let mut normalized = Params::new();
        for (name, def) in &self.entries {
            let value = match params.get(name) {
                Some(given) => def.normalize(&path(name), given)?,
                None => def.default.clone(),
            };
            normalized.insert(name.clone(), value);
        }
        Ok(normalized)
    }
}
