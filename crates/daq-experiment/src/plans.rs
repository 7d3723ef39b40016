//! Experiment plans.
//!
//! A [`Plan`] is a frozen value object: ordered levels of swept inputs, the sweep of
//! every input, ordered outputs, a settle delay and a comment. Plans are assembled
//! with a [`PlanBuilder`] (or deserialised from TOML as a [`PlanDocument`]) and
//! validated against the open instruments when built:
//!
//! - inputs and outputs are disjoint, and no quantity is listed twice;
//! - no quantity appears in more than one level;
//! - every quantity exists on an open instrument and matches its sweep's data type;
//! - all sweeps sharing a level produce the same number of points;
//! - single sweeps have one point, range sweeps at least one;
//! - the settle delay is a finite number of seconds `>= 0`.
//!
//! ```toml
//! comment = "gain vs. frequency"
//! settle_delay = 0.05
//! outputs = [{ instrument = "Meter", quantity = "Power" }]
//!
//! [[levels]]
//! restore_on_fail = true
//! inputs = [
//!   { instrument = "Source", quantity = "Frequency", start = 1e6, stop = 5e6, points = 5 },
//! ]
//! ```

use crate::sweep::{total_steps, zip_columns, SweepKind, SweepSpec, StepMode};
use daq_core::limits::{MAX_SETTLE_DELAY, MAX_TOTAL_STEPS};
use daq_core::{
    input_column, output_column, DaqError, DaqResult, DataType, QuantityId, QuantityLookup, Value,
    STEP2_COLUMN, STEP_COLUMN,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Quantities swept together. Their sweeps are zipped, not crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub quantities: Vec<QuantityId>,
    /// Put the level's quantities back to their pre-run values when one of their
    /// sets fails mid-run.
    pub restore_on_fail: bool,
}

/// A validated experiment plan.
#[derive(Debug, Clone)]
pub struct Plan {
    levels: Vec<Level>,
    sweeps: HashMap<QuantityId, SweepSpec>,
    outputs: Vec<QuantityId>,
    settle_delay: Duration,
    comment: String,
    /// Per level, the zipped value tuples in step order.
    rows: Vec<Vec<Vec<Value>>>,
    total_steps: usize,
}

impl Plan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn sweep(&self, id: &QuantityId) -> Option<&SweepSpec> {
        self.sweeps.get(id)
    }

    /// Inputs in (level, position) order.
    pub fn inputs(&self) -> impl Iterator<Item = &QuantityId> {
        self.levels.iter().flat_map(|l| l.quantities.iter())
    }

    pub fn outputs(&self) -> &[QuantityId] {
        &self.outputs
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Points of each level, slowest level first.
    pub fn level_points(&self) -> Vec<usize> {
        self.rows.iter().map(Vec::len).collect()
    }

    /// Product of the level point counts; zero for a plan without levels.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Values of `level`'s quantities at position `index` of its sweep.
    pub fn level_values(&self, level: usize, index: usize) -> Option<&[Value]> {
        self.rows.get(level)?.get(index).map(Vec::as_slice)
    }

    /// Result schema: step columns, then inputs, then outputs.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![STEP_COLUMN.to_string(), STEP2_COLUMN.to_string()];
        columns.extend(self.inputs().map(input_column));
        columns.extend(self.outputs.iter().map(output_column));
        columns
    }
}

/// Collects levels, outputs and settings, then validates them into a [`Plan`].
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    levels: Vec<Level>,
    sweeps: Vec<(QuantityId, SweepSpec)>,
    outputs: Vec<QuantityId>,
    settle_delay: f64,
    comment: String,
}

impl PlanBuilder {
    /// Append a level. Quantities keep the given order.
    pub fn level(self, inputs: Vec<(QuantityId, SweepSpec)>) -> Self {
        self.push_level(inputs, false)
    }

    /// Append a level whose quantities are restored if one of their sets fails.
    pub fn level_with_restore(self, inputs: Vec<(QuantityId, SweepSpec)>) -> Self {
        self.push_level(inputs, true)
    }

    fn push_level(mut self, inputs: Vec<(QuantityId, SweepSpec)>, restore_on_fail: bool) -> Self {
        self.levels.push(Level {
            quantities: inputs.iter().map(|(id, _)| id.clone()).collect(),
            restore_on_fail,
        });
        self.sweeps.extend(inputs);
        self
    }

    pub fn output(mut self, id: QuantityId) -> Self {
        self.outputs.push(id);
        self
    }

    pub fn outputs(mut self, ids: impl IntoIterator<Item = QuantityId>) -> Self {
        self.outputs.extend(ids);
        self
    }

    /// Delay after all inputs of a step are set, in seconds.
    pub fn settle_delay(mut self, seconds: f64) -> Self {
        self.settle_delay = seconds;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Validate against the quantities `lookup` knows and freeze the plan.
    pub fn build(self, lookup: &dyn QuantityLookup) -> DaqResult<Plan> {
        let settle_delay = validate_settle_delay(self.settle_delay)?;

        let mut inputs: HashSet<&QuantityId> = HashSet::new();
        for (index, level) in self.levels.iter().enumerate() {
            if level.quantities.is_empty() {
                return Err(DaqError::validation(
                    format!("level {}", index),
                    "a level needs at least one quantity",
                ));
            }
            for id in &level.quantities {
                if !inputs.insert(id) {
                    return Err(DaqError::validation(
                        id.to_string(),
                        "quantity is swept in more than one level",
                    ));
                }
            }
        }

        let mut outputs: HashSet<&QuantityId> = HashSet::new();
        for id in &self.outputs {
            if inputs.contains(id) {
                return Err(DaqError::validation(
                    id.to_string(),
                    "quantity is both an input and an output",
                ));
            }
            if !outputs.insert(id) {
                return Err(DaqError::validation(
                    id.to_string(),
                    "quantity is listed as an output more than once",
                ));
            }
            resolve(lookup, id)?;
        }

        let sweeps: HashMap<QuantityId, SweepSpec> = self.sweeps.into_iter().collect();
        let mut rows = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            let mut columns = Vec::with_capacity(level.quantities.len());
            let mut level_points: Option<(usize, &QuantityId)> = None;
            for id in &level.quantities {
                let subject = id.to_string();
                let datatype = resolve(lookup, id)?;
                let spec = sweeps.get(id).ok_or_else(|| {
                    DaqError::validation(subject.clone(), "input has no sweep")
                })?;
                if spec.datatype != datatype {
                    return Err(DaqError::validation(
                        subject,
                        format!(
                            "sweep is {} but the quantity is {}",
                            spec.datatype, datatype
                        ),
                    ));
                }
                let values = spec.values(&subject)?;
                match level_points {
                    None => level_points = Some((values.len(), id)),
                    Some((points, first)) if points != values.len() => {
                        return Err(DaqError::validation(
                            subject,
                            format!(
                                "sweep has {} points but {} in the same level has {}",
                                values.len(),
                                first,
                                points
                            ),
                        ));
                    }
                    Some(_) => {}
                }
                columns.push(values);
            }
            rows.push(zip_columns(&columns));
        }

        let radices: Vec<usize> = rows.iter().map(Vec::len).collect();
        let total_steps = total_steps(&radices)
            .filter(|n| *n <= MAX_TOTAL_STEPS)
            .ok_or_else(|| {
                DaqError::validation(
                    "plan",
                    format!("more than {} steps in total", MAX_TOTAL_STEPS),
                )
            })?;

        Ok(Plan {
            levels: self.levels,
            sweeps,
            outputs: self.outputs,
            settle_delay,
            comment: self.comment,
            rows,
            total_steps,
        })
    }
}

fn validate_settle_delay(seconds: f64) -> DaqResult<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(DaqError::validation(
            "settle_delay",
            format!("{} is not a number of seconds >= 0", seconds),
        ));
    }
    if seconds > MAX_SETTLE_DELAY.as_secs_f64() {
        return Err(DaqError::validation(
            "settle_delay",
            format!(
                "{} s is longer than the {} s limit",
                seconds,
                MAX_SETTLE_DELAY.as_secs()
            ),
        ));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn resolve(lookup: &dyn QuantityLookup, id: &QuantityId) -> DaqResult<DataType> {
    match lookup.data_type(id) {
        None => Err(DaqError::validation(
            id.to_string(),
            "no open instrument has this quantity",
        )),
        Some(DataType::Button) => Err(DaqError::validation(
            id.to_string(),
            "BUTTON quantities have no value to sweep or read",
        )),
        Some(datatype) => Ok(datatype),
    }
}

/// Plan file as written by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub settle_delay: f64,
    #[serde(default)]
    pub levels: Vec<LevelDocument>,
    #[serde(default)]
    pub outputs: Vec<QuantityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelDocument {
    #[serde(default)]
    pub restore_on_fail: bool,
    pub inputs: Vec<InputDocument>,
}

/// One swept input. `datatype` defaults to the quantity's own; a range needs
/// `stop` and exactly one of `points` or `step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDocument {
    pub instrument: String,
    pub quantity: String,
    #[serde(default = "default_kind")]
    pub kind: SweepKind,
    #[serde(default)]
    pub datatype: Option<DataType>,
    pub start: SweepValue,
    #[serde(default)]
    pub stop: Option<SweepValue>,
    #[serde(default)]
    pub points: Option<usize>,
    #[serde(default)]
    pub step: Option<f64>,
}

fn default_kind() -> SweepKind {
    SweepKind::Range
}

/// Sweep endpoint as it appears in a plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SweepValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl From<SweepValue> for Value {
    fn from(v: SweepValue) -> Self {
        match v {
            SweepValue::Flag(b) => Value::Boolean(b),
            SweepValue::Number(x) => Value::Double(x),
            SweepValue::Text(s) => Value::Text(s),
        }
    }
}

impl InputDocument {
    fn into_sweep(self, lookup: &dyn QuantityLookup) -> DaqResult<(QuantityId, SweepSpec)> {
        let id = QuantityId::new(self.instrument, self.quantity);
        let subject = id.to_string();
        let datatype = match self.datatype {
            Some(datatype) => datatype,
            None => resolve(lookup, &id)?,
        };
        let spec = match self.kind {
            SweepKind::Single => {
                let mut spec = SweepSpec::single(datatype, self.start);
                if let Some(points) = self.points {
                    spec.points = points;
                }
                if let Some(step) = self.step {
                    spec.step_mode = StepMode::FixedStep(step);
                }
                spec
            }
            SweepKind::Range => {
                let stop = self.stop.ok_or_else(|| {
                    DaqError::validation(subject.clone(), "a range sweep needs a stop value")
                })?;
                let mut spec = SweepSpec::range(datatype, self.start, stop, 0);
                match (self.points, self.step) {
                    (Some(points), None) => spec.points = points,
                    (None, Some(step)) => spec.step_mode = StepMode::FixedStep(step),
                    (Some(_), Some(_)) => {
                        return Err(DaqError::validation(
                            subject,
                            "give either points or step, not both",
                        ))
                    }
                    (None, None) => {
                        return Err(DaqError::validation(
                            subject,
                            "a range sweep needs points or step",
                        ))
                    }
                }
                spec
            }
        };
        Ok((id, spec))
    }
}

impl PlanDocument {
    pub fn from_toml_str(text: &str) -> DaqResult<Self> {
        toml::from_str(text)
            .map_err(|e| DaqError::validation("plan document", e.to_string()))
    }

    pub fn from_file(path: &Path) -> DaqResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| DaqError::validation(path.display().to_string(), e.to_string()))
    }

    /// Resolve defaults against `lookup` and validate into a [`Plan`].
    pub fn build(self, lookup: &dyn QuantityLookup) -> DaqResult<Plan> {
        let mut builder = Plan::builder()
            .settle_delay(self.settle_delay)
            .comment(self.comment)
            .outputs(self.outputs);
        for level in self.levels {
            let inputs = level
                .inputs
                .into_iter()
                .map(|input| input.into_sweep(lookup))
                .collect::<DaqResult<Vec<_>>>()?;
            builder = if level.restore_on_fail {
                builder.level_with_restore(inputs)
            } else {
                builder.level(inputs)
            };
        }
        builder.build(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::ErrorKind;

    struct Bench(HashMap<QuantityId, DataType>);

    impl Bench {
        fn new() -> Self {
            let mut types = HashMap::new();
            for (instrument, quantity, datatype) in [
                ("A", "Freq", DataType::Double),
                ("A", "X", DataType::Double),
                ("A", "Z", DataType::Double),
                ("A", "Mode", DataType::Combo),
                ("A", "Reset", DataType::Button),
                ("B", "Y", DataType::Double),
                ("B", "Power", DataType::Double),
            ] {
                types.insert(QuantityId::new(instrument, quantity), datatype);
            }
            Self(types)
        }
    }

    impl QuantityLookup for Bench {
        fn data_type(&self, id: &QuantityId) -> Option<DataType> {
            self.0.get(id).copied()
        }
    }

    fn id(instrument: &str, quantity: &str) -> QuantityId {
        QuantityId::new(instrument, quantity)
    }

    fn sweep(start: f64, stop: f64, points: usize) -> SweepSpec {
        SweepSpec::range(DataType::Double, start, stop, points)
    }

    fn assert_rule(result: DaqResult<Plan>, subject: &str, rule_fragment: &str) {
        match result {
            Err(DaqError::Validation { subject: s, rule }) => {
                assert_eq!(s, subject);
                assert!(rule.contains(rule_fragment), "rule was '{}'", rule);
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_columns_and_steps() {
        let plan = Plan::builder()
            .level(vec![(id("A", "X"), sweep(0.0, 1.0, 3))])
            .level(vec![(id("B", "Y"), sweep(0.0, 1.0, 2))])
            .output(id("B", "Power"))
            .build(&Bench::new())
            .unwrap();
        assert_eq!(
            plan.columns(),
            vec![
                "step",
                "step2",
                "Input - A - X",
                "Input - B - Y",
                "Output - B - Power"
            ]
        );
        assert_eq!(plan.level_points(), vec![3, 2]);
        assert_eq!(plan.total_steps(), 6);
        assert_eq!(plan.level_values(0, 2), Some(&[Value::Double(1.0)][..]));
        assert_eq!(plan.level_values(2, 0), None);
    }

    #[test]
    fn test_empty_plan_has_no_steps() {
        let plan = Plan::builder()
            .output(id("B", "Power"))
            .build(&Bench::new())
            .unwrap();
        assert_eq!(plan.total_steps(), 0);
    }

    #[test]
    fn test_input_output_overlap_rejected() {
        let result = Plan::builder()
            .level(vec![(id("A", "Freq"), sweep(1.0, 2.0, 2))])
            .output(id("A", "Freq"))
            .build(&Bench::new());
        assert_rule(result, "A - Freq", "both an input and an output");
    }

    #[test]
    fn test_quantity_in_two_levels_rejected() {
        let result = Plan::builder()
            .level(vec![(id("A", "X"), sweep(0.0, 1.0, 2))])
            .level(vec![(id("A", "X"), sweep(0.0, 1.0, 2))])
            .build(&Bench::new());
        assert_rule(result, "A - X", "more than one level");
    }

    #[test]
    fn test_unknown_quantity_rejected() {
        let result = Plan::builder()
            .level(vec![(id("C", "Temp"), sweep(0.0, 1.0, 2))])
            .build(&Bench::new());
        assert_rule(result, "C - Temp", "no open instrument");

        let result = Plan::builder()
            .output(id("A", "Reset"))
            .build(&Bench::new());
        assert_rule(result, "A - Reset", "BUTTON");
    }

    #[test]
    fn test_level_points_must_agree() {
        let result = Plan::builder()
            .level(vec![
                (id("A", "X"), sweep(0.0, 1.0, 3)),
                (id("A", "Z"), sweep(0.0, 1.0, 4)),
            ])
            .build(&Bench::new());
        assert_rule(result, "A - Z", "4 points");
    }

    #[test]
    fn test_datatype_mismatch_rejected() {
        let result = Plan::builder()
            .level(vec![(
                id("A", "Mode"),
                SweepSpec::range(DataType::Double, 0.0, 1.0, 2),
            )])
            .build(&Bench::new());
        assert_rule(result, "A - Mode", "quantity is COMBO");
    }

    #[test]
    fn test_settle_delay_rules() {
        let negative = Plan::builder().settle_delay(-0.5).build(&Bench::new());
        assert_rule(negative, "settle_delay", ">= 0");

        let nan = Plan::builder().settle_delay(f64::NAN).build(&Bench::new());
        assert!(nan.is_err());

        let plan = Plan::builder().settle_delay(0.25).build(&Bench::new()).unwrap();
        assert_eq!(plan.settle_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_empty_level_rejected() {
        let result = Plan::builder().level(vec![]).build(&Bench::new());
        assert_rule(result, "level 0", "at least one quantity");
    }

    #[test]
    fn test_plan_document_from_toml() {
        let text = r#"
            comment = "mode scan"
            settle_delay = 0.1
            outputs = [{ instrument = "B", quantity = "Power" }]

            [[levels]]
            restore_on_fail = true
            inputs = [
                { instrument = "A", quantity = "X", start = 0, stop = 1, step = 0.25 },
                { instrument = "A", quantity = "Z", start = 10.0, stop = 20.0, points = 5 },
            ]

            [[levels]]
            inputs = [
                { instrument = "A", quantity = "Mode", start = "Normal", stop = "Expert", points = 2 },
            ]
        "#;
        let plan = PlanDocument::from_toml_str(text)
            .unwrap()
            .build(&Bench::new())
            .unwrap();

        assert_eq!(plan.comment(), "mode scan");
        assert!(plan.levels()[0].restore_on_fail);
        assert!(!plan.levels()[1].restore_on_fail);
        assert_eq!(plan.level_points(), vec![5, 2]);
        assert_eq!(
            plan.sweep(&id("A", "X")).map(|s| s.step_mode),
            Some(StepMode::FixedStep(0.25))
        );
        assert_eq!(
            plan.level_values(1, 1),
            Some(&[Value::from("Expert")][..])
        );
    }

    #[test]
    fn test_plan_document_errors() {
        let missing_stop = r#"
            [[levels]]
            inputs = [{ instrument = "A", quantity = "X", start = 0.0, points = 3 }]
        "#;
        let err = PlanDocument::from_toml_str(missing_stop)
            .unwrap()
            .build(&Bench::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("stop value"));

        let both = r#"
            [[levels]]
            inputs = [{ instrument = "A", quantity = "X", start = 0.0, stop = 1.0, points = 3, step = 0.5 }]
        "#;
        assert!(PlanDocument::from_toml_str(both)
            .unwrap()
            .build(&Bench::new())
            .is_err());

        let single_with_points = r#"
            [[levels]]
            inputs = [{ instrument = "A", quantity = "X", kind = "single", start = 0.5, points = 4 }]
        "#;
        assert!(PlanDocument::from_toml_str(single_with_points)
            .unwrap()
            .build(&Bench::new())
            .is_err());

        assert!(PlanDocument::from_toml_str("levels = 3").is_err());
        assert!(PlanDocument::from_toml_str("unknown_key = 1").is_err());
    }
}
