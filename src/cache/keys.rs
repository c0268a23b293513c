//! Canonical resource keys and key patterns.
//!
//! A [`ResourceKey`] names one cached view: a content family, the view kind
//! and a normalized parameter set. Parameters are kept in a `BTreeMap`, so
//! the order callers supply them in never matters, and absent values are
//! dropped at construction.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Identifier of a single entity. Numeric strings normalize to integers so
/// `"7"` and `7` address the same detail view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl EntityId {
    /// Read an identifier out of a JSON value. Only integers and non-empty
    /// strings qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Int),
            Value::String(text) if !text.is_empty() => Some(Self::from(text.as_str())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(value) => Value::from(*value),
            Self::Str(value) => Value::from(value.as_str()),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Self::Int(value),
            Err(_) => Self::Str(value.to_string()),
        }
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        match canonical_int(value) {
            Some(number) => Self::Int(number),
            None => Self::Str(value.to_string()),
        }
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

/// Parse text that is exactly the decimal form of an integer. `"007"` and
/// `"+7"` stay strings.
fn canonical_int(text: &str) -> Option<i64> {
    text.parse::<i64>()
        .ok()
        .filter(|number| number.to_string() == text)
}

/// A single normalized parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ParamValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(int) => Some(Self::Int(int)),
                None => Some(Self::Str(number.to_string())),
            },
            Value::String(text) => Some(Self::from(text.as_str())),
            other => Some(Self::Str(other.to_string())),
        }
    }

    /// Compare against a field of a record, using the same normalization
    /// the key applies to its own parameters.
    pub fn matches_value(&self, value: &Value) -> bool {
        ParamValue::from_json(value).as_ref() == Some(self)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        match canonical_int(value) {
            Some(number) => Self::Int(number),
            None => Self::Str(value.to_string()),
        }
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&EntityId> for ParamValue {
    fn from(value: &EntityId) -> Self {
        match value {
            EntityId::Int(int) => Self::Int(*int),
            EntityId::Str(text) => Self::Str(text.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

/// Order-independent parameter set of a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyParams(BTreeMap<String, ParamValue>);

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Like [`KeyParams::with`], but `None` leaves the set untouched.
    pub fn with_opt<V: Into<ParamValue>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Build a parameter set from a JSON object. `null` members are dropped;
    /// anything other than an object yields the empty set.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        Self(
            object
                .iter()
                .filter_map(|(name, value)| {
                    ParamValue::from_json(value).map(|param| (name.clone(), param))
                })
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Parameters as string pairs, in canonical order, for query strings.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }

    fn is_superset_of(&self, other: &KeyParams) -> bool {
        other
            .0
            .iter()
            .all(|(name, value)| self.0.get(name) == Some(value))
    }
}

/// The kind of view a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    List,
    Featured,
    Categories,
    Detail,
}

impl ViewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Featured => "featured",
            Self::Categories => "categories",
            Self::Detail => "detail",
        }
    }

    /// Views holding a collection payload.
    pub fn is_collection(self) -> bool {
        !matches!(self, Self::Detail)
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) const ID_PARAM: &str = "id";

/// Canonical identifier of one cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    family: String,
    view: ViewKind,
    params: KeyParams,
}

impl ResourceKey {
    pub fn new(family: impl Into<String>, view: ViewKind, params: KeyParams) -> Self {
        Self {
            family: family.into(),
            view,
            params,
        }
    }

    pub fn list(family: impl Into<String>, params: KeyParams) -> Self {
        Self::new(family, ViewKind::List, params)
    }

    pub fn featured(family: impl Into<String>) -> Self {
        Self::new(family, ViewKind::Featured, KeyParams::new())
    }

    pub fn categories(family: impl Into<String>) -> Self {
        Self::new(family, ViewKind::Categories, KeyParams::new())
    }

    pub fn detail(family: impl Into<String>, id: impl Into<EntityId>) -> Self {
        let id = id.into();
        Self::new(
            family,
            ViewKind::Detail,
            KeyParams::new().with(ID_PARAM, &id),
        )
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn params(&self) -> &KeyParams {
        &self.params
    }

    /// Identifier of a detail key; `None` for collection views.
    pub fn entity_id(&self) -> Option<EntityId> {
        if self.view != ViewKind::Detail {
            return None;
        }
        match self.params.get(ID_PARAM)? {
            ParamValue::Int(value) => Some(EntityId::Int(*value)),
            ParamValue::Str(value) => Some(EntityId::Str(value.clone())),
            ParamValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.view)?;
        let mut separator = '?';
        for (name, value) in self.params.iter() {
            write!(f, "{separator}{name}={value}")?;
            separator = '&';
        }
        Ok(())
    }
}

/// Matches a set of keys: same family, optionally the same view, and
/// carrying at least the given parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    family: String,
    view: Option<ViewKind>,
    params: KeyParams,
}

impl KeyPattern {
    /// Every key of a family.
    pub fn family(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            view: None,
            params: KeyParams::new(),
        }
    }

    /// Every key of one view kind within a family.
    pub fn view(family: impl Into<String>, view: ViewKind) -> Self {
        Self {
            family: family.into(),
            view: Some(view),
            params: KeyParams::new(),
        }
    }

    /// Exactly the key given, plus any key that extends its parameters.
    pub fn key(key: &ResourceKey) -> Self {
        Self {
            family: key.family.clone(),
            view: Some(key.view),
            params: key.params.clone(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn family_name(&self) -> &str {
        &self.family
    }

    pub fn matches(&self, key: &ResourceKey) -> bool {
        self.family == key.family
            && self.view.is_none_or(|view| view == key.view)
            && key.params.is_superset_of(&self.params)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.family)?;
        match self.view {
            Some(view) => write!(f, "{view}")?,
            None => f.write_str("*")?,
        }
        let mut separator = '?';
        for (name, value) in self.params.iter() {
            write!(f, "{separator}{name}={value}")?;
            separator = '&';
        }
        Ok(())
    }
}
