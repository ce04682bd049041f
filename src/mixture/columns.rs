//! Statistical types and schema parsing for the mixture metamodel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metamodel::ColumnNumber;
use crate::schema::{SchemaItem, SchemaToken};
use crate::value::Value;

/// How a column's values are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatType {
    Numerical,
    Categorical,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatType::Numerical => "numerical",
            StatType::Categorical => "categorical",
        }
    }

    /// Read a cell as an observation of this type.
    pub(crate) fn datum(&self, value: &Value) -> Result<Datum> {
        match (self, value) {
            (_, Value::Null) => Ok(Datum::Missing),
            (StatType::Numerical, v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .map(Datum::Real)
                .ok_or_else(|| Error::invalid(format!("value {} is not numerical", v))),
            (StatType::Categorical, v) => v
                .as_text()
                .map(Datum::Category)
                .ok_or_else(|| Error::invalid(format!("value {} is not categorical", v))),
        }
    }
}

impl fmt::Display for StatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "numerical" => Ok(StatType::Numerical),
            "categorical" => Ok(StatType::Categorical),
            _ => Err(Error::schema(format!("unknown statistical type: {}", s))),
        }
    }
}

/// One observed cell, interpreted by its column's type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Datum {
    Missing,
    Real(f64),
    Category(String),
}

impl Datum {
    pub fn is_missing(&self) -> bool {
        matches!(self, Datum::Missing)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Datum::Missing => Value::Null,
            Datum::Real(x) => Value::Number(*x),
            Datum::Category(c) => Value::Text(c.clone()),
        }
    }
}

/// A modelled column as the mixture metamodel records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MixtureColumn {
    pub colno: ColumnNumber,
    pub stattype: StatType,
}

/// Parse a generator schema into `(column name, statistical type)` pairs.
///
/// Every item must be exactly `<column> <stattype>`.
pub(crate) fn parse_schema(schema: &[SchemaItem]) -> Result<Vec<(String, StatType)>> {
    if schema.is_empty() {
        return Err(Error::schema("generator needs at least one column"));
    }

    let mut columns: Vec<(String, StatType)> = Vec::with_capacity(schema.len());
    for item in schema {
        let (name, stattype) = match item.as_slice() {
            [SchemaToken::Atom(name), SchemaToken::Atom(stattype)] => {
                (name.clone(), stattype.parse::<StatType>()?)
            }
            [_, _, SchemaToken::Group(_), ..] | [_, SchemaToken::Group(_), ..] => {
                return Err(Error::schema(format!(
                    "unexpected parenthesized list in column: {}",
                    crate::schema::render(std::slice::from_ref(item))
                )));
            }
            _ => {
                return Err(Error::schema(format!(
                    "expected '<column> <stattype>', found: {}",
                    crate::schema::render(std::slice::from_ref(item))
                )));
            }
        };

        if columns.iter().any(|(c, _)| c.eq_ignore_ascii_case(&name)) {
            return Err(Error::schema(format!("duplicate column: {}", name)));
        }
        columns.push((name, stattype));
    }
    Ok(columns)
}
