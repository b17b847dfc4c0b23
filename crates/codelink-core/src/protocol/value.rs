//! Dynamic JSON value type for schema-flexible payload fields.
//!
//! Most protocol fields have a fixed type (`cursor_line` is always a `u32`),
//! but a few carry arbitrary JSON supplied by the other side – the `original`
//! object echoed back by `Echo` is the main example.  Those fields are stored
//! as a [`DynamicValue`]: a closed, recursive enum with one variant per JSON
//! shape we care about.
//!
//! # Classification order
//!
//! When a JSON value is read, it is classified by trying the variants in a
//! fixed priority order and taking the first that fits:
//!
//! ```text
//! null → bool → signed int (i64) → unsigned int (u64) → double → string → array → map
//! ```
//!
//! The order matters for numbers.  `42` fits both `i64` and `u64`; it is always
//! captured as [`DynamicValue::Int`].  Only integers above `i64::MAX` become
//! [`DynamicValue::UInt`], and only numbers with a fractional part or exponent
//! become [`DynamicValue::Double`].  This keeps decoding deterministic: the
//! same JSON text always produces the same variant.
//!
//! The `From<u64>` conversion follows the same rule, so values built in Rust
//! and values decoded from the wire compare equal.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};

/// A JSON value whose shape is only known at runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DynamicValue {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON `true` / `false`.
    Bool(bool),
    /// An integer that fits in `i64`.
    Int(i64),
    /// An integer above `i64::MAX` (up to `u64::MAX`).
    UInt(u64),
    /// A finite floating-point number.
    Double(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    Array(Vec<DynamicValue>),
    /// A string-keyed object.  Keys are kept sorted so encoding is stable.
    Map(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    /// Builds a [`DynamicValue::Map`] from `(key, value)` pairs.
    ///
    /// ```rust
    /// use codelink_core::DynamicValue;
    ///
    /// let v = DynamicValue::map([("line", DynamicValue::from(3u32)), ("ok", true.into())]);
    /// assert_eq!(v.get("line"), Some(&DynamicValue::Int(3)));
    /// ```
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, DynamicValue)>,
        K: Into<String>,
    {
        DynamicValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the variant, used in log lines and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DynamicValue::Null => "null",
            DynamicValue::Bool(_) => "bool",
            DynamicValue::Int(_) => "int",
            DynamicValue::UInt(_) => "uint",
            DynamicValue::Double(_) => "double",
            DynamicValue::String(_) => "string",
            DynamicValue::Array(_) => "array",
            DynamicValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynamicValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as `u64` if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            DynamicValue::Int(i) => u64::try_from(i).ok(),
            DynamicValue::UInt(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, DynamicValue>> {
        match self {
            DynamicValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up `key` when the value is a map.
    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        self.as_map().and_then(|m| m.get(key))
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<bool> for DynamicValue {
    fn from(v: bool) -> Self {
        DynamicValue::Bool(v)
    }
}

impl From<i64> for DynamicValue {
    fn from(v: i64) -> Self {
        DynamicValue::Int(v)
    }
}

impl From<i32> for DynamicValue {
    fn from(v: i32) -> Self {
        DynamicValue::Int(i64::from(v))
    }
}

impl From<u32> for DynamicValue {
    fn from(v: u32) -> Self {
        DynamicValue::Int(i64::from(v))
    }
}

impl From<u64> for DynamicValue {
    /// Values that fit in `i64` become [`DynamicValue::Int`], matching the
    /// decode classification order.
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => DynamicValue::Int(i),
            Err(_) => DynamicValue::UInt(v),
        }
    }
}

impl From<f64> for DynamicValue {
    fn from(v: f64) -> Self {
        DynamicValue::Double(v)
    }
}

impl From<&str> for DynamicValue {
    fn from(v: &str) -> Self {
        DynamicValue::String(v.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(v: String) -> Self {
        DynamicValue::String(v)
    }
}

impl From<Vec<DynamicValue>> for DynamicValue {
    fn from(v: Vec<DynamicValue>) -> Self {
        DynamicValue::Array(v)
    }
}

impl From<BTreeMap<String, DynamicValue>> for DynamicValue {
    fn from(v: BTreeMap<String, DynamicValue>) -> Self {
        DynamicValue::Map(v)
    }
}

impl<T: Into<DynamicValue>> From<Option<T>> for DynamicValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DynamicValue::Null, Into::into)
    }
}

// ── Serde ─────────────────────────────────────────────────────────────────────

impl Serialize for DynamicValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DynamicValue::Null => serializer.serialize_unit(),
            DynamicValue::Bool(b) => serializer.serialize_bool(*b),
            DynamicValue::Int(i) => serializer.serialize_i64(*i),
            DynamicValue::UInt(u) => serializer.serialize_u64(*u),
            DynamicValue::Double(d) => {
                // serde_json would silently write `null` for NaN / infinity,
                // which would not decode back to a Double.
                if !d.is_finite() {
                    return Err(ser::Error::custom(format!(
                        "non-finite double {d} cannot be encoded as JSON"
                    )));
                }
                serializer.serialize_f64(*d)
            }
            DynamicValue::String(s) => serializer.serialize_str(s),
            DynamicValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DynamicValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for DynamicValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DynamicValueVisitor)
    }
}

struct DynamicValueVisitor;

impl<'de> Visitor<'de> for DynamicValueVisitor {
    type Value = DynamicValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<DynamicValue, E> {
        Ok(DynamicValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<DynamicValue, E> {
        Ok(DynamicValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<DynamicValue, D::Error> {
        DynamicValue::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<DynamicValue, E> {
        Ok(DynamicValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<DynamicValue, E> {
        Ok(DynamicValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<DynamicValue, E> {
        // Signed int wins whenever the value fits.
        Ok(DynamicValue::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<DynamicValue, E> {
        Ok(DynamicValue::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<DynamicValue, E> {
        Ok(DynamicValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<DynamicValue, E> {
        Ok(DynamicValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<DynamicValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(DynamicValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<DynamicValue, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((k, v)) = access.next_entry::<String, DynamicValue>()? {
            entries.insert(k, v);
        }
        Ok(DynamicValue::Map(entries))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
