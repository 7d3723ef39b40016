//! Lexer for sectioned key–value driver files.
//!
//! Accepted syntax:
//!
//! ```text
//! ; comment            # comment
//! [Section name]
//! key: value
//! other_key = value
//!     indented continuation line
//! ```
//!
//! Keys are case-insensitive (stored lowercased); section names and values keep
//! their case. Values are trimmed. A key is split from its value at the first `:`
//! or `=`. Duplicate sections and duplicate keys within a section are errors.

use daq_core::{DaqError, DaqResult};

/// Section name used in errors that are not tied to one section.
pub const FILE_SECTION: &str = "<file>";

#[derive(Debug, Clone, PartialEq)]
pub struct IniEntry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IniSection {
    pub name: String,
    pub line: usize,
    entries: Vec<IniEntry>,
}

impl IniSection {
    fn new(name: String, line: usize) -> Self {
        Self {
            name,
            line,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Value of `key`, or `None` when it is absent or empty.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn entries(&self) -> &[IniEntry] {
        &self.entries
    }

    /// Values of `<prefix>_N` keys in ascending N order.
    pub fn enumerated(&self, prefix: &str) -> Vec<String> {
        let mut numbered: Vec<(u32, &str)> = self
            .entries
            .iter()
            .filter_map(|e| enumerated_index(&e.key, prefix).map(|n| (n, e.value.as_str())))
            .collect();
        numbered.sort_by_key(|(n, _)| *n);
        numbered.into_iter().map(|(_, v)| v.to_string()).collect()
    }
}

/// `N` when `key` has the form `<prefix>_N` with `N >= 1`.
pub fn enumerated_index(key: &str, prefix: &str) -> Option<u32> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('_')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok().filter(|n| *n >= 1)
}

/// A parsed driver file: sections in file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn parse(text: &str) -> DaqResult<Self> {
        let mut sections: Vec<IniSection> = Vec::new();
        let mut last_key: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with(';') || trimmed.starts_with('#') {
                continue;
            }

            if trimmed.starts_with('[') {
                let name = trimmed
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        DaqError::parse(
                            FILE_SECTION,
                            format!("line {}: malformed section header '{}'", line_no, trimmed),
                        )
                    })?;
                if sections.iter().any(|s| s.name == name) {
                    return Err(DaqError::parse(
                        name,
                        format!("line {}: duplicate section", line_no),
                    ));
                }
                sections.push(IniSection::new(name.to_string(), line_no));
                last_key = None;
                continue;
            }

            let Some(section) = sections.last_mut() else {
                return Err(DaqError::parse(
                    FILE_SECTION,
                    format!("line {}: key outside of any section", line_no),
                ));
            };

            let indented = raw.starts_with(' ') || raw.starts_with('\t');
            if indented {
                if let Some(pos) = last_key {
                    let entry = &mut section.entries[pos];
                    entry.value.push('\n');
                    entry.value.push_str(trimmed);
                    continue;
                }
            }

            let split = trimmed.find([':', '=']).ok_or_else(|| {
                DaqError::parse(
                    section.name.clone(),
                    format!("line {}: expected 'key: value', got '{}'", line_no, trimmed),
                )
            })?;
            let key = trimmed[..split].trim().to_ascii_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            if key.is_empty() {
                return Err(DaqError::parse(
                    section.name.clone(),
                    format!("line {}: empty key", line_no),
                ));
            }
            if section.entries.iter().any(|e| e.key == key) {
                return Err(DaqError::parse(
                    section.name.clone(),
                    format!("line {}: duplicate key '{}'", line_no, key),
                ));
            }
            section.entries.push(IniEntry {
                key,
                value,
                line: line_no,
            });
            last_key = Some(section.entries.len() - 1);
        }

        Ok(Self { sections })
    }

    /// Section lookup, case-insensitive on the name.
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
        self.sections.iter()
    }
}
