//! User-form values and the closed set of quantity data types.
//!
//! Every quantity carries one [`DataType`]. Values travelling through the core are
//! always in *user* form (`Value`); conversion to and from the instrument's wire
//! form happens inside the quantity that owns the value.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of quantity data types understood by driver files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Double,
    Boolean,
    Combo,
    String,
    Complex,
    Vector,
    VectorComplex,
    Path,
    Button,
}

impl DataType {
    /// Name as written in driver files.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::Combo => "COMBO",
            DataType::String => "STRING",
            DataType::Complex => "COMPLEX",
            DataType::Vector => "VECTOR",
            DataType::VectorComplex => "VECTOR_COMPLEX",
            DataType::Path => "PATH",
            DataType::Button => "BUTTON",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DOUBLE" => Ok(DataType::Double),
            "BOOLEAN" => Ok(DataType::Boolean),
            "COMBO" => Ok(DataType::Combo),
            "STRING" => Ok(DataType::String),
            "COMPLEX" => Ok(DataType::Complex),
            "VECTOR" => Ok(DataType::Vector),
            "VECTOR_COMPLEX" => Ok(DataType::VectorComplex),
            "PATH" => Ok(DataType::Path),
            "BUTTON" => Ok(DataType::Button),
            other => Err(format!("unknown datatype '{}'", other)),
        }
    }
}

/// Access permitted on a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    #[default]
    Both,
    Read,
    Write,
    None,
}

impl Permission {
    pub fn can_read(&self) -> bool {
        matches!(self, Permission::Both | Permission::Read)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Permission::Both | Permission::Write)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOTH" => Ok(Permission::Both),
            "READ" => Ok(Permission::Read),
            "WRITE" => Ok(Permission::Write),
            "NONE" => Ok(Permission::None),
            other => Err(format!("unknown permission '{}'", other)),
        }
    }
}

/// A quantity value in user form.
///
/// COMBO values are carried as `Text` holding the user-facing key; STRING and PATH
/// values are `Text` as well. BUTTON quantities have no value of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    Boolean(bool),
    Text(String),
    Complex(Complex64),
    Vector(Vec<f64>),
    ComplexVector(Vec<Complex64>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(true) => f.write_str("True"),
            Value::Boolean(false) => f.write_str("False"),
            Value::Text(s) => f.write_str(s),
            Value::Complex(c) => write!(f, "{}", c),
            Value::Vector(items) => write_list(f, items),
            Value::ComplexVector(items) => write_list(f, items),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Complex64> for Value {
    fn from(v: Complex64) -> Self {
        Value::Complex(v)
    }
}

/// Fully qualified reference to a quantity: instrument name plus quantity label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantityId {
    pub instrument: String,
    pub quantity: String,
}

impl QuantityId {
    pub fn new(instrument: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            quantity: quantity.into(),
        }
    }
}

impl fmt::Display for QuantityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.instrument, self.quantity)
    }
}
