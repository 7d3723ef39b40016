//! Driver model: the normalized record parsed from a driver description file.
//!
//! A driver file has three fixed sections and one section per quantity:
//!
//! ```text
//! [General settings]       name (required), version, manufacturer, interface
//! [Model and options]      model_str_N, model_id_N, check_model, model_cmd,
//!                          option_str_N, option_id_N, check_options, option_cmd
//! [VISA settings]          timeout, term_char, send_end_on_write, query_instr_errors,
//!                          error_bit_mask, error_cmd, init, final, str_true, str_false,
//!                          baud_rate, data_bits, stop_bits, parity
//! [<quantity label>]       datatype (required), unit, def_value, tooltip, low_lim,
//!                          high_lim, x_name, x_unit, combo_def_N, cmd_def_N, permission,
//!                          set_cmd, get_cmd, state_quant, state_value_N,
//!                          model_value_N, option_value_N, group, section
//! ```
//!
//! Parsing is all-or-nothing. Any error names the offending section; the driver is
//! then not usable at all. Unknown keys are logged and ignored.

use crate::ini::{IniDocument, IniSection, FILE_SECTION};
use crate::quantity;
use daq_core::limits::DEFAULT_TIMEOUT;
use daq_core::{
    DaqError, DaqResult, DataType, Parity, Permission, SerialSettings, StopBits, Termination,
    TransportSettings, Value,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const GENERAL_SECTION: &str = "General settings";
pub const MODEL_SECTION: &str = "Model and options";
pub const VISA_SECTION: &str = "VISA settings";

const DEFAULT_MODEL_CMD: &str = "*IDN?";

const GENERAL_KEYS: &[&str] = &[
    "name",
    "version",
    "driver_path",
    "manufacturer",
    "interface",
    "startup",
    "signal_generator",
    "signal_analyzer",
    "controller",
];

const MODEL_KEYS: &[&str] = &["check_model", "model_cmd", "check_options", "option_cmd"];
const MODEL_ENUM_KEYS: &[&str] = &["model_str", "model_id", "option_str", "option_id"];

const VISA_KEYS: &[&str] = &[
    "use_visa",
    "reset",
    "timeout",
    "term_char",
    "send_end_on_write",
    "query_instr_errors",
    "error_bit_mask",
    "error_cmd",
    "init",
    "final",
    "str_true",
    "str_false",
    "baud_rate",
    "data_bits",
    "stop_bits",
    "parity",
];

const QUANTITY_KEYS: &[&str] = &[
    "label",
    "datatype",
    "unit",
    "def_value",
    "tooltip",
    "low_lim",
    "high_lim",
    "x_name",
    "x_unit",
    "permission",
    "set_cmd",
    "get_cmd",
    "state_quant",
    "group",
    "section",
    "show_in_measurement_dlg",
];
const QUANTITY_ENUM_KEYS: &[&str] = &[
    "combo_def",
    "cmd_def",
    "state_value",
    "model_value",
    "option_value",
];

/// A model or option entry: the substring to look for and the id it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    pub id: String,
    pub matcher: String,
}

/// Model check and option detection settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelOptions {
    pub check_model: bool,
    pub model_cmd: String,
    pub models: Vec<IdentityEntry>,
    pub check_options: bool,
    pub option_cmd: String,
    pub options: Vec<IdentityEntry>,
}

/// One `combo_def_N` / `cmd_def_N` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboEntry {
    pub user: String,
    pub wire: String,
}

/// Static description of one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityDef {
    pub label: String,
    pub display_label: Option<String>,
    pub data_type: DataType,
    pub unit: String,
    pub default: Option<String>,
    pub tooltip: String,
    /// Lower bound; `f64::NEG_INFINITY` when the driver says `-INF`.
    pub low_lim: f64,
    /// Upper bound; `f64::INFINITY` when the driver says `+INF`.
    pub high_lim: f64,
    pub x_name: Option<String>,
    pub x_unit: Option<String>,
    pub combos: Vec<ComboEntry>,
    pub permission: Permission,
    pub set_cmd: String,
    pub get_cmd: String,
    pub state_quant: Option<String>,
    pub state_values: Vec<String>,
    pub model_values: Vec<String>,
    pub option_values: Vec<String>,
    pub group: Option<String>,
}

impl QuantityDef {
    /// A quantity with the given type and every optional field at its default.
    pub fn new(label: impl Into<String>, data_type: DataType) -> Self {
        Self {
            label: label.into(),
            display_label: None,
            data_type,
            unit: String::new(),
            default: None,
            tooltip: String::new(),
            low_lim: f64::NEG_INFINITY,
            high_lim: f64::INFINITY,
            x_name: None,
            x_unit: None,
            combos: Vec::new(),
            permission: Permission::Both,
            set_cmd: String::new(),
            get_cmd: String::new(),
            state_quant: None,
            state_values: Vec::new(),
            model_values: Vec::new(),
            option_values: Vec::new(),
            group: None,
        }
    }

    pub fn combo_by_user(&self, user: &str) -> Option<&ComboEntry> {
        self.combos.iter().find(|c| c.user == user)
    }

    pub fn combo_by_wire(&self, wire: &str) -> Option<&ComboEntry> {
        self.combos.iter().find(|c| c.wire == wire)
    }

    /// Neither reads nor writes touch the instrument.
    pub fn is_local(&self) -> bool {
        self.permission == Permission::None
            || (self.set_cmd.is_empty() && self.get_cmd.is_empty())
    }
}

/// Boolean wire literals of a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolLiterals {
    pub str_true: String,
    pub str_false: String,
}

impl Default for BoolLiterals {
    fn default() -> Self {
        Self {
            str_true: "1".to_string(),
            str_false: "0".to_string(),
        }
    }
}

/// Normalized, immutable driver record.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub name: String,
    pub manufacturer: String,
    pub version: Option<String>,
    pub interface: Option<String>,
    pub transport: TransportSettings,
    pub error_cmd: String,
    /// Bits of an error-query reply that signal an instrument error.
    pub error_bit_mask: u64,
    pub model: ModelOptions,
    pub init: String,
    pub final_cmd: String,
    pub bools: BoolLiterals,
    quantities: Vec<QuantityDef>,
}

impl DriverConfig {
    pub fn from_file(path: &Path) -> DaqResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> DaqResult<Self> {
        let doc = IniDocument::parse(text)?;

        let general = doc.section(GENERAL_SECTION).ok_or_else(|| {
            DaqError::parse(FILE_SECTION, format!("missing [{}] section", GENERAL_SECTION))
        })?;
        let visa = doc.section(VISA_SECTION).ok_or_else(|| {
            DaqError::parse(FILE_SECTION, format!("missing [{}] section", VISA_SECTION))
        })?;
        warn_unknown_keys(general, GENERAL_KEYS, &[]);
        warn_unknown_keys(visa, VISA_KEYS, &[]);

        let name = general
            .get_nonempty("name")
            .ok_or_else(|| DaqError::parse(&general.name, "missing required key 'name'"))?
            .to_string();

        let interface = general.get_nonempty("interface").map(str::to_string);
        let serial = interface
            .as_deref()
            .is_some_and(|i| i.eq_ignore_ascii_case("serial"));
        let transport = parse_transport(visa, serial)?;

        let model = match doc.section(MODEL_SECTION) {
            Some(section) => {
                warn_unknown_keys(section, MODEL_KEYS, MODEL_ENUM_KEYS);
                parse_model_options(section)?
            }
            None => ModelOptions {
                model_cmd: DEFAULT_MODEL_CMD.to_string(),
                ..Default::default()
            },
        };

        let bools = BoolLiterals {
            str_true: visa.get("str_true").unwrap_or("1").to_string(),
            str_false: visa.get("str_false").unwrap_or("0").to_string(),
        };
        if bools.str_true == bools.str_false {
            return Err(DaqError::parse(
                &visa.name,
                "str_true and str_false must differ",
            ));
        }

        let error_bit_mask = match visa.get_nonempty("error_bit_mask") {
            Some(raw) => parse_mask(raw)
                .ok_or_else(|| DaqError::parse(&visa.name, format!("bad error_bit_mask '{}'", raw)))?,
            None => u64::MAX,
        };

        let mut quantities = Vec::new();
        for section in doc.sections() {
            if is_fixed_section(&section.name) {
                continue;
            }
            warn_unknown_keys(section, QUANTITY_KEYS, QUANTITY_ENUM_KEYS);
            quantities.push(parse_quantity(section)?);
        }
        if quantities.is_empty() {
            return Err(DaqError::parse(FILE_SECTION, "driver defines no quantities"));
        }

        let driver = Self {
            name,
            manufacturer: general.get("manufacturer").unwrap_or_default().to_string(),
            version: general.get_nonempty("version").map(str::to_string),
            interface,
            transport,
            error_cmd: visa.get("error_cmd").unwrap_or_default().to_string(),
            error_bit_mask,
            model,
            init: visa.get("init").unwrap_or_default().to_string(),
            final_cmd: visa.get("final").unwrap_or_default().to_string(),
            bools,
            quantities,
        };
        driver.check_cross_references()?;
        debug!(
            driver = %driver.name,
            quantities = driver.quantities.len(),
            "Parsed driver"
        );
        Ok(driver)
    }

    pub fn quantities(&self) -> &[QuantityDef] {
        &self.quantities
    }

    pub fn quantity(&self, label: &str) -> Option<&QuantityDef> {
        self.quantities.iter().find(|q| q.label == label)
    }

    pub fn is_serial(&self) -> bool {
        self.transport.serial.is_some()
    }

    /// Checks that need the whole quantity set: state references and defaults.
    fn check_cross_references(&self) -> DaqResult<()> {
        for def in &self.quantities {
            if let Some(state) = &def.state_quant {
                if state == &def.label {
                    return Err(DaqError::parse(
                        &def.label,
                        "state_quant refers to the quantity itself",
                    ));
                }
                if self.quantity(state).is_none() {
                    return Err(DaqError::parse(
                        &def.label,
                        format!("state_quant '{}' is not a quantity of this driver", state),
                    ));
                }
            }
            if let Some(default) = &def.default {
                if def.data_type != DataType::Button {
                    quantity::coerce(def, &self.bools, &Value::Text(default.clone())).map_err(
                        |e| DaqError::parse(&def.label, format!("invalid def_value: {}", e)),
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn is_fixed_section(name: &str) -> bool {
    [GENERAL_SECTION, MODEL_SECTION, VISA_SECTION]
        .iter()
        .any(|fixed| fixed.eq_ignore_ascii_case(name))
}

fn warn_unknown_keys(section: &IniSection, known: &[&str], enumerated: &[&str]) {
    for entry in section.entries() {
        let is_known = known.contains(&entry.key.as_str())
            || enumerated
                .iter()
                .any(|prefix| crate::ini::enumerated_index(&entry.key, prefix).is_some());
        if !is_known {
            warn!(
                section = %section.name,
                key = %entry.key,
                line = entry.line,
                "Ignoring unknown driver key"
            );
        }
    }
}

fn parse_transport(visa: &IniSection, serial: bool) -> DaqResult<TransportSettings> {
    let timeout = match visa.get_nonempty("timeout") {
        Some(raw) => {
            let secs: f64 = raw
                .parse()
                .map_err(|_| DaqError::parse(&visa.name, format!("bad timeout '{}'", raw)))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(DaqError::parse(
                    &visa.name,
                    format!("timeout must be a positive number of seconds, got {}", raw),
                ));
            }
            Duration::from_secs_f64(secs)
        }
        None => DEFAULT_TIMEOUT,
    };

    let termination = match visa.get_nonempty("term_char") {
        Some(raw) => raw
            .parse::<Termination>()
            .map_err(|e| DaqError::parse(&visa.name, e))?,
        None => Termination::Auto,
    };

    let serial = if serial {
        let mut settings = SerialSettings::default();
        if let Some(raw) = visa.get_nonempty("baud_rate") {
            settings.baud_rate = parse_number(visa, "baud_rate", raw)?;
        }
        if let Some(raw) = visa.get_nonempty("data_bits") {
            settings.data_bits = parse_number(visa, "data_bits", raw)?;
        }
        if let Some(raw) = visa.get_nonempty("stop_bits") {
            settings.stop_bits = raw
                .parse::<StopBits>()
                .map_err(|e| DaqError::parse(&visa.name, e))?;
        }
        if let Some(raw) = visa.get_nonempty("parity") {
            settings.parity = raw
                .parse::<Parity>()
                .map_err(|e| DaqError::parse(&visa.name, e))?;
        }
        Some(settings)
    } else {
        None
    };

    Ok(TransportSettings {
        timeout,
        termination,
        send_end: parse_flag(visa, "send_end_on_write", true)?,
        query_errors: parse_flag(visa, "query_instr_errors", false)?,
        serial,
    })
}

fn parse_model_options(section: &IniSection) -> DaqResult<ModelOptions> {
    let models = paired_entries(section, "model_str", "model_id")?;
    let options = paired_entries(section, "option_str", "option_id")?;
    Ok(ModelOptions {
        check_model: parse_flag(section, "check_model", !models.is_empty())?,
        model_cmd: section
            .get_nonempty("model_cmd")
            .unwrap_or(DEFAULT_MODEL_CMD)
            .to_string(),
        models,
        check_options: parse_flag(section, "check_options", false)?,
        option_cmd: section.get("option_cmd").unwrap_or_default().to_string(),
        options,
    })
}

/// Pair `<matcher>_N` with `<id>_N`; ids default to the matcher strings.
fn paired_entries(section: &IniSection, matcher: &str, id: &str) -> DaqResult<Vec<IdentityEntry>> {
    let matchers = section.enumerated(matcher);
    let ids = section.enumerated(id);
    if !ids.is_empty() && ids.len() != matchers.len() {
        return Err(DaqError::parse(
            &section.name,
            format!(
                "{} {}_N entries but {} {}_N entries",
                ids.len(),
                id,
                matchers.len(),
                matcher
            ),
        ));
    }
    let ids = if ids.is_empty() { matchers.clone() } else { ids };
    Ok(matchers
        .into_iter()
        .zip(ids)
        .map(|(matcher, id)| IdentityEntry { id, matcher })
        .collect())
}

fn parse_quantity(section: &IniSection) -> DaqResult<QuantityDef> {
    let raw_type = section
        .get_nonempty("datatype")
        .ok_or_else(|| DaqError::parse(&section.name, "missing required key 'datatype'"))?;
    let data_type: DataType = raw_type
        .parse()
        .map_err(|e: String| DaqError::parse(&section.name, e))?;

    let permission = match section.get_nonempty("permission") {
        Some(raw) => raw
            .parse::<Permission>()
            .map_err(|e| DaqError::parse(&section.name, e))?,
        None => Permission::Both,
    };

    let low_lim = match section.get_nonempty("low_lim") {
        Some(raw) => parse_limit(section, raw)?,
        None => f64::NEG_INFINITY,
    };
    let high_lim = match section.get_nonempty("high_lim") {
        Some(raw) => parse_limit(section, raw)?,
        None => f64::INFINITY,
    };
    if low_lim > high_lim {
        return Err(DaqError::parse(
            &section.name,
            format!("low_lim {} is above high_lim {}", low_lim, high_lim),
        ));
    }

    let combo_user = section.enumerated("combo_def");
    let combo_wire = section.enumerated("cmd_def");
    if !combo_wire.is_empty() && combo_wire.len() != combo_user.len() {
        return Err(DaqError::parse(
            &section.name,
            format!(
                "{} cmd_def_N entries but {} combo_def_N entries",
                combo_wire.len(),
                combo_user.len()
            ),
        ));
    }
    if data_type == DataType::Combo && combo_user.is_empty() {
        return Err(DaqError::parse(
            &section.name,
            "COMBO quantity without combo_def_N entries",
        ));
    }
    let combo_wire = if combo_wire.is_empty() {
        combo_user.clone()
    } else {
        combo_wire
    };
    let combos = combo_user
        .into_iter()
        .zip(combo_wire)
        .map(|(user, wire)| ComboEntry { user, wire })
        .collect();

    let mut def = QuantityDef::new(section.name.clone(), data_type);
    def.display_label = section.get_nonempty("label").map(str::to_string);
    def.unit = section.get("unit").unwrap_or_default().to_string();
    def.default = section.get_nonempty("def_value").map(str::to_string);
    def.tooltip = section.get("tooltip").unwrap_or_default().to_string();
    def.low_lim = low_lim;
    def.high_lim = high_lim;
    def.x_name = section.get_nonempty("x_name").map(str::to_string);
    def.x_unit = section.get_nonempty("x_unit").map(str::to_string);
    def.combos = combos;
    def.permission = permission;
    def.set_cmd = section.get("set_cmd").unwrap_or_default().to_string();
    def.get_cmd = section.get("get_cmd").unwrap_or_default().to_string();
    def.state_quant = section.get_nonempty("state_quant").map(str::to_string);
    def.state_values = section.enumerated("state_value");
    def.model_values = section.enumerated("model_value");
    def.option_values = section.enumerated("option_value");
    def.group = section.get_nonempty("group").map(str::to_string);

    if def.state_quant.is_none() && !def.state_values.is_empty() {
        warn!(
            quantity = %def.label,
            "state_value_N given without state_quant; ignoring"
        );
        def.state_values.clear();
    }
    Ok(def)
}

/// Extended-real limit: `-INF`, `+INF` (or `INF`) become infinities.
pub fn parse_limit(section: &IniSection, raw: &str) -> DaqResult<f64> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "-INF" => Ok(f64::NEG_INFINITY),
        "+INF" | "INF" => Ok(f64::INFINITY),
        text => match text.parse::<f64>() {
            Ok(v) if !v.is_nan() => Ok(v),
            _ => Err(DaqError::parse(
                &section.name,
                format!("bad limit '{}'", raw),
            )),
        },
    }
}

fn parse_flag(section: &IniSection, key: &str, default: bool) -> DaqResult<bool> {
    match section.get_nonempty(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(DaqError::parse(
                &section.name,
                format!("{} must be True or False, got '{}'", key, raw),
            )),
        },
    }
}

fn parse_number<T: std::str::FromStr>(section: &IniSection, key: &str, raw: &str) -> DaqResult<T> {
    raw.parse()
        .map_err(|_| DaqError::parse(&section.name, format!("bad {} '{}'", key, raw)))
}

fn parse_mask(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::ErrorKind;

    const DRIVER: &str = "\
[General settings]
name: Signal Generator
manufacturer: ACME
interface: GPIB

[Model and options]
model_str_1: SG-100
model_str_2: SG-200
check_model: True
option_str_1: OPT-PM
option_id_1: Phase modulation

[VISA settings]
timeout: 2.5
term_char: LF
str_true: ON
str_false: OFF
init: *CLS
final: OUTP OFF

[Frequency]
datatype: DOUBLE
unit: Hz
def_value: 1e6
low_lim: 0
high_lim: +INF
set_cmd: FREQ
get_cmd: FREQ?

[Mode]
datatype: COMBO
combo_def_1: Normal
combo_def_2: Expert
cmd_def_1: NORM
cmd_def_2: EXP
set_cmd: MODE
get_cmd: MODE?

[Gain]
datatype: DOUBLE
state_quant: Mode
state_value_1: Expert
set_cmd: GAIN <*>
get_cmd: GAIN?
";

    #[test]
    fn test_parse_full_driver() {
        let driver = DriverConfig::parse(DRIVER).unwrap();
        assert_eq!(driver.name, "Signal Generator");
        assert_eq!(driver.manufacturer, "ACME");
        assert_eq!(driver.transport.timeout, Duration::from_millis(2500));
        assert_eq!(driver.transport.termination, Termination::Lf);
        assert!(driver.transport.send_end);
        assert!(!driver.is_serial());
        assert_eq!(driver.bools.str_true, "ON");
        assert_eq!(driver.init, "*CLS");
        assert_eq!(driver.final_cmd, "OUTP OFF");

        assert!(driver.model.check_model);
        assert_eq!(driver.model.model_cmd, "*IDN?");
        assert_eq!(driver.model.models[1].id, "SG-200");
        assert_eq!(driver.model.options[0].id, "Phase modulation");

        let labels: Vec<_> = driver.quantities().iter().map(|q| q.label.as_str()).collect();
        assert_eq!(labels, vec!["Frequency", "Mode", "Gain"]);

        let freq = driver.quantity("Frequency").unwrap();
        assert_eq!(freq.low_lim, 0.0);
        assert_eq!(freq.high_lim, f64::INFINITY);
        assert_eq!(freq.permission, Permission::Both);

        let mode = driver.quantity("Mode").unwrap();
        assert_eq!(mode.combo_by_user("Expert").unwrap().wire, "EXP");
        assert_eq!(mode.combo_by_wire("NORM").unwrap().user, "Normal");

        let gain = driver.quantity("Gain").unwrap();
        assert_eq!(gain.state_quant.as_deref(), Some("Mode"));
        assert_eq!(gain.state_values, vec!["Expert"]);
    }

    #[test]
    fn test_defaults_when_keys_absent() {
        let driver = DriverConfig::parse(
            "[General settings]\nname: Bare\n[VISA settings]\n[Level]\ndatatype: DOUBLE\n",
        )
        .unwrap();
        assert_eq!(driver.transport.timeout, DEFAULT_TIMEOUT);
        assert_eq!(driver.transport.termination, Termination::Auto);
        assert_eq!(driver.bools, BoolLiterals::default());
        assert!(!driver.model.check_model);
        let level = driver.quantity("Level").unwrap();
        assert_eq!(level.low_lim, f64::NEG_INFINITY);
        assert_eq!(level.high_lim, f64::INFINITY);
        assert!(level.is_local());
    }

    #[test]
    fn test_missing_datatype_names_section() {
        let err = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[Power]\nunit: W\n",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("[Power]"));
        assert!(err.to_string().contains("datatype"));
    }

    #[test]
    fn test_bad_term_char_rejected() {
        let err = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\nterm_char: LF+CR\n[A]\ndatatype: DOUBLE\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains(VISA_SECTION));
    }

    #[test]
    fn test_combo_rules() {
        let missing = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[M]\ndatatype: COMBO\n",
        );
        assert!(missing.is_err());

        let mismatched = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[M]\ndatatype: COMBO\n\
             combo_def_1: A\ncombo_def_2: B\ncmd_def_1: a\n",
        );
        assert!(mismatched.is_err());

        let implicit = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[M]\ndatatype: COMBO\n\
             combo_def_1: A\ncombo_def_2: B\n",
        )
        .unwrap();
        assert_eq!(implicit.quantity("M").unwrap().combos[1].wire, "B");
    }

    #[test]
    fn test_model_id_count_must_match() {
        let err = DriverConfig::parse(
            "[General settings]\nname: X\n[Model and options]\nmodel_str_1: A\nmodel_str_2: B\n\
             model_id_1: a\n[VISA settings]\n[Q]\ndatatype: DOUBLE\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains(MODEL_SECTION));
    }

    #[test]
    fn test_state_quant_must_exist() {
        let err = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[Q]\ndatatype: DOUBLE\n\
             state_quant: Missing\nstate_value_1: 1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("[Q]"));
    }

    #[test]
    fn test_serial_settings_parsed_for_serial_interface() {
        let driver = DriverConfig::parse(
            "[General settings]\nname: X\ninterface: Serial\n[VISA settings]\nbaud_rate: 115200\n\
             stop_bits: 2\nparity: Even\n[Q]\ndatatype: DOUBLE\n",
        )
        .unwrap();
        let serial = driver.transport.serial.unwrap();
        assert_eq!(serial.baud_rate, 115200);
        assert_eq!(serial.data_bits, 8);
        assert_eq!(serial.stop_bits, StopBits::Two);
        assert_eq!(serial.parity, Parity::Even);
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = DriverConfig::parse(
            "[General settings]\nname: X\n[VISA settings]\n[Q]\ndatatype: DOUBLE\n\
             low_lim: 0\nhigh_lim: 10\ndef_value: 20\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("def_value"));
    }
}
