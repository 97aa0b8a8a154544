//! Source values and their canonical text rendering.
//!
//! Readers hand back loosely typed [`SourceValue`]s; every cell is rendered to
//! text exactly once, upstream of width analysis and loading, by a
//! [`Stringifier`]. The rendering rules are fixed because the inferred column
//! widths depend on them byte for byte.

use std::{fmt, sync::Arc};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use encoding_rs::{Encoding, UTF_8};
use rust_decimal::Decimal;

pub const DATE_FORMAT: &str = "%d-%b-%Y";
pub const DATETIME_FORMAT: &str = "%d-%b-%Y %I:%M:%S %p";

#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Boolean(bool),
    Date(Option<NaiveDate>),
    DateTime(Option<NaiveDateTime>),
    Time(NaiveTime),
    Bytes(Vec<u8>),
    Other(String),
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        SourceValue::Text(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        SourceValue::Text(value)
    }
}

impl From<i64> for SourceValue {
    fn from(value: i64) -> Self {
        SourceValue::Integer(value)
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        SourceValue::Float(value)
    }
}

impl From<bool> for SourceValue {
    fn from(value: bool) -> Self {
        SourceValue::Boolean(value)
    }
}

impl<T> From<Option<T>> for SourceValue
where
    T: Into<SourceValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(SourceValue::Null, Into::into)
    }
}

/// Caller-supplied replacement for the default rendering rules.
pub type ValueConverter = Arc<dyn Fn(&SourceValue) -> String + Send + Sync>;

#[derive(Clone)]
pub struct Stringifier {
    encoding: &'static Encoding,
    custom: Option<ValueConverter>,
}

impl fmt::Debug for Stringifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stringifier")
            .field("encoding", &self.encoding.name())
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for Stringifier {
    fn default() -> Self {
        Self::new(UTF_8)
    }
}

impl Stringifier {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            custom: None,
        }
    }

    /// A custom converter replaces every rule, null handling included.
    pub fn with_converter(encoding: &'static Encoding, converter: ValueConverter) -> Self {
        Self {
            encoding,
            custom: Some(converter),
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    pub fn stringify(&self, value: &SourceValue) -> String {
        match &self.custom {
            Some(convert) => convert(value),
            None => stringify(value, self.encoding),
        }
    }

    pub fn stringify_row(&self, row: &[SourceValue]) -> Vec<String> {
        row.iter().map(|value| self.stringify(value)).collect()
    }
}

pub fn stringify(value: &SourceValue, encoding: &'static Encoding) -> String {
    match value {
        SourceValue::Null => String::new(),
        SourceValue::Text(text) => text.clone(),
        SourceValue::DateTime(dt) => dt
            .map(|dt| dt.format(DATETIME_FORMAT).to_string())
            .unwrap_or_default(),
        SourceValue::Date(date) => date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default(),
        SourceValue::Integer(i) => i.to_string(),
        SourceValue::Float(f) => format_float(*f),
        SourceValue::Decimal(d) => format_decimal(d),
        SourceValue::Bytes(bytes) => {
            let (text, _) = encoding.decode_without_bom_handling(bytes);
            text.into_owned()
        }
        SourceValue::Boolean(true) => "TRUE".to_string(),
        SourceValue::Boolean(false) => "FALSE".to_string(),
        SourceValue::Time(t) => t.to_string(),
        SourceValue::Other(other) => other.clone(),
    }
}

/// Shortest round-trip positional form; integral values drop the fraction.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    // f64 Display never switches to exponent notation and already prints 3.0 as "3".
    value.to_string()
}

fn format_decimal(value: &Decimal) -> String {
    let mut rounded = value.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}
