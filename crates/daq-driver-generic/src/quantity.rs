//! Quantities: typed, constraint-checked channels of an instrument.
//!
//! The conversion functions here are the single dispatcher over [`DataType`]:
//!
//! - [`coerce`] validates a caller-supplied value and returns its canonical user form
//!   (range checks, combo lookup, boolean literals). Nothing is written on failure.
//! - [`to_wire`] turns a canonical user value into the text sent to the instrument.
//! - [`from_wire`] parses an instrument reply back into user form.
//!
//! A [`Quantity`] is the runtime state kept by a session for one definition: its
//! latest user-form value, visibility flag and optional links.

use crate::config::{BoolLiterals, QuantityDef};
use daq_core::{Complex64, DaqError, DaqResult, DataType, QuantityId, Value};
use std::sync::Arc;

/// Placeholder in `set_cmd` templates.
pub const VALUE_PLACEHOLDER: &str = "<*>";

/// Validate `value` against `def` and return its canonical user form.
pub fn coerce(def: &QuantityDef, bools: &BoolLiterals, value: &Value) -> DaqResult<Value> {
    match def.data_type {
        DataType::Double => {
            let v = value.as_f64().ok_or_else(|| {
                DaqError::value(&def.label, format!("'{}' is not a number", value))
            })?;
            check_range(def, v)?;
            Ok(Value::Double(v))
        }
        DataType::Boolean => match value {
            Value::Boolean(b) => Ok(Value::Boolean(*b)),
            other => parse_bool(bools, &other.to_string())
                .map(Value::Boolean)
                .ok_or_else(|| {
                    DaqError::value(
                        &def.label,
                        format!(
                            "'{}' is not one of True, False, {}, {}",
                            other, bools.str_true, bools.str_false
                        ),
                    )
                }),
        },
        DataType::Combo => {
            let text = value.to_string();
            let text = text.trim();
            if let Some(entry) = def.combo_by_user(text) {
                return Ok(Value::Text(entry.user.clone()));
            }
            if let Some(entry) = def.combo_by_wire(text) {
                return Ok(Value::Text(entry.user.clone()));
            }
            let choices: Vec<&str> = def.combos.iter().map(|c| c.user.as_str()).collect();
            Err(DaqError::value(
                &def.label,
                format!("'{}' is not one of [{}]", text, choices.join(", ")),
            ))
        }
        DataType::String | DataType::Path => Ok(Value::Text(value.to_string())),
        DataType::Complex => match value {
            Value::Complex(c) => Ok(Value::Complex(*c)),
            Value::Double(re) => Ok(Value::Complex(Complex64::new(*re, 0.0))),
            Value::Text(text) => parse_complex(text)
                .map(Value::Complex)
                .ok_or_else(|| DaqError::value(&def.label, format!("'{}' is not a complex number", text))),
            other => Err(DaqError::value(
                &def.label,
                format!("'{}' is not a complex number", other),
            )),
        },
        DataType::Vector => {
            let items = match value {
                Value::Vector(items) => items.clone(),
                Value::Double(v) => vec![*v],
                Value::Text(text) => parse_list(text, |s| s.parse::<f64>().ok()).ok_or_else(|| {
                    DaqError::value(&def.label, format!("'{}' is not a list of numbers", text))
                })?,
                other => {
                    return Err(DaqError::value(
                        &def.label,
                        format!("'{}' is not a list of numbers", other),
                    ))
                }
            };
            for v in &items {
                check_range(def, *v)?;
            }
            Ok(Value::Vector(items))
        }
        DataType::VectorComplex => match value {
            Value::ComplexVector(items) => Ok(Value::ComplexVector(items.clone())),
            Value::Vector(items) => Ok(Value::ComplexVector(
                items.iter().map(|re| Complex64::new(*re, 0.0)).collect(),
            )),
            Value::Text(text) => parse_list(text, parse_complex)
                .map(Value::ComplexVector)
                .ok_or_else(|| {
                    DaqError::value(&def.label, format!("'{}' is not a list of complex numbers", text))
                }),
            other => Err(DaqError::value(
                &def.label,
                format!("'{}' is not a list of complex numbers", other),
            )),
        },
        DataType::Button => Err(DaqError::value(&def.label, "a BUTTON carries no value")),
    }
}

/// Wire text for a canonical user value.
pub fn to_wire(def: &QuantityDef, bools: &BoolLiterals, user: &Value) -> String {
    match (def.data_type, user) {
        (DataType::Boolean, Value::Boolean(true)) => bools.str_true.clone(),
        (DataType::Boolean, Value::Boolean(false)) => bools.str_false.clone(),
        (DataType::Combo, Value::Text(key)) => def
            .combo_by_user(key)
            .map(|c| c.wire.clone())
            .unwrap_or_else(|| key.clone()),
        (_, other) => other.to_string(),
    }
}

/// Parse an instrument reply into user form.
pub fn from_wire(def: &QuantityDef, bools: &BoolLiterals, reply: &str) -> DaqResult<Value> {
    let trimmed = reply.trim();
    let bad_reply = |what: &str| {
        DaqError::value(
            &def.label,
            format!("instrument reply '{}' is not {}", trimmed, what),
        )
    };
    match def.data_type {
        DataType::Double => trimmed
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| bad_reply("a number")),
        DataType::Boolean => parse_bool(bools, trimmed)
            .map(Value::Boolean)
            .ok_or_else(|| bad_reply("a boolean literal")),
        DataType::Combo => {
            if let Some(entry) = def.combo_by_wire(trimmed) {
                return Ok(Value::Text(entry.user.clone()));
            }
            if let Some(entry) = def.combo_by_user(trimmed) {
                return Ok(Value::Text(entry.user.clone()));
            }
            // Numeric wire codes may come back reformatted ("1" vs "+1.000").
            if let Ok(code) = trimmed.parse::<f64>() {
                if let Some(entry) = def
                    .combos
                    .iter()
                    .find(|c| c.wire.trim().parse::<f64>().ok() == Some(code))
                {
                    return Ok(Value::Text(entry.user.clone()));
                }
            }
            Err(bad_reply("a known combo entry"))
        }
        DataType::String | DataType::Path => Ok(Value::Text(reply.to_string())),
        DataType::Complex => parse_complex(trimmed)
            .map(Value::Complex)
            .ok_or_else(|| bad_reply("a complex number")),
        DataType::Vector => parse_list(trimmed, |s| s.parse::<f64>().ok())
            .map(Value::Vector)
            .ok_or_else(|| bad_reply("a list of numbers")),
        DataType::VectorComplex => parse_complex_list(trimmed)
            .map(Value::ComplexVector)
            .ok_or_else(|| bad_reply("a list of complex numbers")),
        DataType::Button => Err(bad_reply("readable (BUTTON)")),
    }
}

/// The driver default in user form, if one is defined and valid.
pub fn default_value(def: &QuantityDef, bools: &BoolLiterals) -> Option<Value> {
    let raw = def.default.as_ref()?;
    coerce(def, bools, &Value::Text(raw.clone())).ok()
}

/// Final command for `set_cmd` and a wire value.
pub fn render_set_command(template: &str, wire: &str) -> String {
    if template.contains(VALUE_PLACEHOLDER) {
        template.replacen(VALUE_PLACEHOLDER, wire, 1)
    } else {
        format!("{} {}", template, wire)
    }
}

fn check_range(def: &QuantityDef, v: f64) -> DaqResult<()> {
    if !v.is_finite() {
        return Err(DaqError::value(
            &def.label,
            format!("{} is not a finite number", v),
        ));
    }
    if v < def.low_lim {
        return Err(DaqError::value(
            &def.label,
            format!("{} is below low limit {}", v, def.low_lim),
        ));
    }
    if v > def.high_lim {
        return Err(DaqError::value(
            &def.label,
            format!("{} is above high limit {}", v, def.high_lim),
        ));
    }
    Ok(())
}

fn parse_bool(bools: &BoolLiterals, text: &str) -> Option<bool> {
    let text = text.trim();
    if text == bools.str_true || text.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if text == bools.str_false || text.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    // Instruments often echo numeric literals reformatted ("1.000" for "1").
    let number = text.parse::<f64>().ok()?;
    if bools.str_true.trim().parse::<f64>().ok() == Some(number) {
        Some(true)
    } else if bools.str_false.trim().parse::<f64>().ok() == Some(number) {
        Some(false)
    } else {
        None
    }
}

fn parse_complex(text: &str) -> Option<Complex64> {
    let text = text.trim();
    if let Some((re, im)) = text.split_once(',') {
        return Some(Complex64::new(re.trim().parse().ok()?, im.trim().parse().ok()?));
    }
    text.parse::<Complex64>().ok()
}

fn parse_list<T>(text: &str, parse: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(',').map(|item| parse(item.trim())).collect()
}

/// Complex lists come either as `a+bi` items or as interleaved `re,im` pairs.
fn parse_complex_list(text: &str) -> Option<Vec<Complex64>> {
    if let Some(items) = parse_list(text, |s| s.parse::<Complex64>().ok()) {
        let interleaved = !text.contains('i') && !text.contains('j');
        if !interleaved {
            return Some(items);
        }
    }
    let reals = parse_list(text, |s| s.parse::<f64>().ok())?;
    if reals.len() % 2 != 0 {
        return None;
    }
    Some(
        reals
            .chunks(2)
            .map(|pair| Complex64::new(pair[0], pair[1]))
            .collect(),
    )
}

/// Runtime state of one quantity inside a session.
#[derive(Debug, Clone)]
pub struct Quantity {
    def: Arc<QuantityDef>,
    latest: Option<Value>,
    visible: bool,
    /// `state_values` in user form, compared against the state quantity's value.
    state_match: Vec<Value>,
    linked_get: Option<QuantityId>,
    linked_set: Option<QuantityId>,
}

impl Quantity {
    pub(crate) fn new(def: Arc<QuantityDef>) -> Self {
        Self {
            def,
            latest: None,
            visible: true,
            state_match: Vec::new(),
            linked_get: None,
            linked_set: None,
        }
    }

    pub fn def(&self) -> &QuantityDef {
        &self.def
    }

    pub(crate) fn def_arc(&self) -> Arc<QuantityDef> {
        Arc::clone(&self.def)
    }

    pub fn label(&self) -> &str {
        &self.def.label
    }

    pub fn data_type(&self) -> DataType {
        self.def.data_type
    }

    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn linked_get(&self) -> Option<&QuantityId> {
        self.linked_get.as_ref()
    }

    pub fn linked_set(&self) -> Option<&QuantityId> {
        self.linked_set.as_ref()
    }

    pub(crate) fn store(&mut self, value: Value) {
        self.latest = Some(value);
    }

    pub(crate) fn set_links(&mut self, set: Option<QuantityId>, get: Option<QuantityId>) {
        self.linked_set = set;
        self.linked_get = get;
    }

    pub(crate) fn set_state_match(&mut self, values: Vec<Value>) {
        self.state_match = values;
    }

    /// Recompute visibility from the state quantity's current value. Returns true
    /// when the flag changed.
    pub(crate) fn update_visibility(&mut self, state_value: Option<&Value>) -> bool {
        let visible = match &self.def.state_quant {
            None => true,
            Some(_) => state_value.is_some_and(|v| self.state_match.contains(v)),
        };
        let changed = visible != self.visible;
        self.visible = visible;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComboEntry;
    use daq_core::ErrorKind;

    fn double(low: f64, high: f64) -> QuantityDef {
        let mut def = QuantityDef::new("Freq", DataType::Double);
        def.low_lim = low;
        def.high_lim = high;
        def
    }

    fn combo() -> QuantityDef {
        let mut def = QuantityDef::new("Mode", DataType::Combo);
        def.combos = vec![
            ComboEntry {
                user: "Normal".into(),
                wire: "NORM".into(),
            },
            ComboEntry {
                user: "Expert".into(),
                wire: "2".into(),
            },
        ];
        def
    }

    fn bools() -> BoolLiterals {
        BoolLiterals {
            str_true: "ON".into(),
            str_false: "OFF".into(),
        }
    }

    #[test]
    fn test_double_range_checks() {
        let def = double(0.0, 10.0);
        let b = BoolLiterals::default();
        assert_eq!(coerce(&def, &b, &Value::Double(10.0)).unwrap(), Value::Double(10.0));
        assert_eq!(coerce(&def, &b, &Value::from(" 2.5 ")).unwrap(), Value::Double(2.5));

        let err = coerce(&def, &b, &Value::Double(-1.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
        assert!(err.to_string().contains("below low limit 0"));
        assert!(coerce(&def, &b, &Value::Double(f64::NAN)).is_err());
        assert!(coerce(&def, &b, &Value::from("abc")).is_err());
    }

    #[test]
    fn test_infinite_limits_never_bind() {
        let def = double(f64::NEG_INFINITY, 5.0);
        let b = BoolLiterals::default();
        assert!(coerce(&def, &b, &Value::Double(-1e300)).is_ok());
        assert!(coerce(&def, &b, &Value::Double(5.1)).is_err());

        let def = double(0.0, f64::INFINITY);
        assert!(coerce(&def, &b, &Value::Double(f64::MAX)).is_ok());

        // Open limits still refuse non-finite values, typed or parsed.
        let def = double(f64::NEG_INFINITY, f64::INFINITY);
        for value in [
            Value::Double(f64::INFINITY),
            Value::Double(f64::NEG_INFINITY),
            Value::Double(f64::NAN),
            Value::from("inf"),
            Value::from("-Infinity"),
        ] {
            let err = coerce(&def, &b, &value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Value);
        }
    }

    #[test]
    fn test_boolean_literals() {
        let def = QuantityDef::new("Output", DataType::Boolean);
        let b = bools();
        for (input, expected) in [("True", true), ("false", false), ("ON", true), ("OFF", false)] {
            assert_eq!(
                coerce(&def, &b, &Value::from(input)).unwrap(),
                Value::Boolean(expected)
            );
        }
        assert!(coerce(&def, &b, &Value::from("maybe")).is_err());

        assert_eq!(to_wire(&def, &b, &Value::Boolean(true)), "ON");
        assert_eq!(to_wire(&def, &b, &Value::Boolean(false)), "OFF");
        assert_eq!(from_wire(&def, &b, "ON").unwrap(), Value::Boolean(true));
        assert_eq!(from_wire(&def, &b, "True").unwrap(), Value::Boolean(true));
        assert_eq!(from_wire(&def, &b, "OFF\n").unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_numeric_boolean_reply_reformatted() {
        let def = QuantityDef::new("Output", DataType::Boolean);
        let b = BoolLiterals::default();
        assert_eq!(from_wire(&def, &b, "+1.000").unwrap(), Value::Boolean(true));
        assert_eq!(from_wire(&def, &b, "0").unwrap(), Value::Boolean(false));
        assert!(from_wire(&def, &b, "2").is_err());
    }

    #[test]
    fn test_combo_round_trip() {
        let def = combo();
        let b = BoolLiterals::default();
        for entry in &def.combos {
            let user = coerce(&def, &b, &Value::from(entry.user.as_str())).unwrap();
            let wire = to_wire(&def, &b, &user);
            assert_eq!(wire, entry.wire);
            assert_eq!(from_wire(&def, &b, &wire).unwrap(), user);
        }
        // Wire values are accepted on input and stored as the user key.
        assert_eq!(
            coerce(&def, &b, &Value::from(" NORM ")).unwrap(),
            Value::from("Normal")
        );
        assert_eq!(from_wire(&def, &b, "+2.0").unwrap(), Value::from("Expert"));
        assert!(coerce(&def, &b, &Value::from("Turbo")).is_err());
    }

    #[test]
    fn test_vector_and_complex() {
        let b = BoolLiterals::default();
        let vec_def = QuantityDef::new("Trace", DataType::Vector);
        let v = from_wire(&vec_def, &b, "1, 2.5,3").unwrap();
        assert_eq!(v, Value::Vector(vec![1.0, 2.5, 3.0]));
        assert_eq!(to_wire(&vec_def, &b, &v), "1,2.5,3");

        let c_def = QuantityDef::new("Z", DataType::Complex);
        assert_eq!(
            from_wire(&c_def, &b, "1.5,-2").unwrap(),
            Value::Complex(Complex64::new(1.5, -2.0))
        );
        assert_eq!(
            coerce(&c_def, &b, &Value::from("3+4i")).unwrap(),
            Value::Complex(Complex64::new(3.0, 4.0))
        );

        let cv_def = QuantityDef::new("S", DataType::VectorComplex);
        assert_eq!(
            from_wire(&cv_def, &b, "1,2,3,4").unwrap(),
            Value::ComplexVector(vec![Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)])
        );
    }

    #[test]
    fn test_set_command_substitution() {
        assert_eq!(render_set_command("FREQ <*> HZ", "10"), "FREQ 10 HZ");
        assert_eq!(render_set_command("FREQ", "10"), "FREQ 10");
        assert_eq!(render_set_command("A <*> B <*>", "1"), "A 1 B <*>");
        assert_eq!(render_set_command("SOUR:FREQ  ", "5"), "SOUR:FREQ   5");
    }

    #[test]
    fn test_visibility_from_state_value() {
        let mut def = QuantityDef::new("Gain", DataType::Double);
        def.state_quant = Some("Mode".into());
        let mut q = Quantity::new(Arc::new(def));
        q.set_state_match(vec![Value::from("Expert")]);

        assert!(q.update_visibility(Some(&Value::from("Normal"))));
        assert!(!q.is_visible());
        assert!(q.update_visibility(Some(&Value::from("Expert"))));
        assert!(q.is_visible());
        assert!(!q.update_visibility(Some(&Value::from("Expert"))));
        q.update_visibility(None);
        assert!(!q.is_visible());
    }
}
