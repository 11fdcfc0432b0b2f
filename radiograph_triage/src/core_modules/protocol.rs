// THEORY:
// The protocol layer turns a label into the treatment guideline a clinician reads.
//
// Key architectural principles:
// 1.  **Static Reference Data**: `ProtocolTable` is loaded once (embedded JSON or a
//     file supplied by the deployment), validated, and then only ever read. It is
//     shared as `Arc<ProtocolTable>` by every request.
// 2.  **Verbatim Fields**: Every string in a record is returned exactly as stored.
//     Dosing text is never reformatted, trimmed or merged.
// 3.  **Loud Misses**: A pathogen with no record is `UnknownPathogen`. There is no
//     default protocol; showing the wrong drug is worse than showing none.
// 4.  **Structured Output**: The resolver returns data. Markup is the renderer's job;
//     the `Display` impl is a plain-text convenience for logs and terminals.

use crate::core_modules::classification::{Classification, TriageLabel};
use crate::error::{ConfigError, UnknownPathogen};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Reference table compiled into the crate.
pub const EMBEDDED_TABLE: &str = include_str!("../../data/red_book_2024.json");

/// One treatment guideline, keyed by pathogen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolRecord {
    pub pathogen: String,
    /// Radiographic pattern associated with the pathogen.
    pub pattern: String,
    pub first_line: String,
    pub max_dose: String,
    pub duration: String,
    pub alternative: String,
    /// Page citation in the source handbook.
    pub page: String,
}

/// A row as it appears in the reference file. Either the decomposed therapy fields
/// or a single `Treatment` snippet must be present.
#[derive(Debug, Deserialize)]
struct ProtocolRow {
    #[serde(rename = "Pathogen")]
    pathogen: String,
    #[serde(rename = "Pattern", default)]
    pattern: String,
    #[serde(rename = "FirstLine", default)]
    first_line: Option<String>,
    #[serde(rename = "Treatment", default)]
    treatment: Option<String>,
    #[serde(rename = "MaxDose", default)]
    max_dose: String,
    #[serde(rename = "Duration", default)]
    duration: String,
    #[serde(rename = "Alternative", default)]
    alternative: String,
    #[serde(rename = "Page")]
    page: String,
}

impl ProtocolRow {
    fn into_record(self) -> Result<ProtocolRecord, ConfigError> {
        let first_line = match (self.first_line, self.treatment) {
            (Some(first_line), _) if !first_line.is_empty() => first_line,
            (_, Some(snippet)) if !snippet.is_empty() => snippet,
            _ => return Err(ConfigError::EmptyTreatment(self.pathogen)),
        };
        Ok(ProtocolRecord {
            pathogen: self.pathogen,
            pattern: self.pattern,
            first_line,
            max_dose: self.max_dose,
            duration: self.duration,
            alternative: self.alternative,
            page: self.page,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    source: String,
    protocols: Vec<ProtocolRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTable {
    source: String,
    records: BTreeMap<String, ProtocolRecord>,
}

impl ProtocolTable {
    /// Builds a table from records, rejecting duplicate pathogens.
    pub fn new(
        source: impl Into<String>,
        records: impl IntoIterator<Item = ProtocolRecord>,
    ) -> Result<Self, ConfigError> {
        let mut by_pathogen = BTreeMap::new();
        for record in records {
            if by_pathogen.contains_key(&record.pathogen) {
                return Err(ConfigError::DuplicateProtocol(record.pathogen));
            }
            by_pathogen.insert(record.pathogen.clone(), record);
        }
        Ok(Self {
            source: source.into(),
            records: by_pathogen,
        })
    }

    /// The table shipped with the crate.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json_str(EMBEDDED_TABLE, "<embedded>")
    }

    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: TableFile = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        let records = file
            .protocols
            .into_iter()
            .map(ProtocolRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(file.source, records)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: origin.clone(),
            source,
        })?;
        Self::from_json_str(&json, &origin)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pathogens(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn lookup(&self, pathogen: &str) -> Result<&ProtocolRecord, UnknownPathogen> {
        self.records
            .get(pathogen)
            .ok_or_else(|| UnknownPathogen(pathogen.to_string()))
    }
}

/// A resolved guideline together with how it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolDetails {
    pub source: String,
    pub record: ProtocolRecord,
    /// Set when the model only said "abnormal" and the presumptive pathogen was used.
    pub presumptive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolSummary {
    /// The film was classified as normal; no treatment applies.
    NoProtocol,
    Treatment(ProtocolDetails),
}

impl ProtocolSummary {
    pub fn details(&self) -> Option<&ProtocolDetails> {
        match self {
            ProtocolSummary::NoProtocol => None,
            ProtocolSummary::Treatment(details) => Some(details),
        }
    }
}

impl fmt::Display for ProtocolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = match self {
            ProtocolSummary::NoProtocol => return f.write_str("Normal study: no treatment protocol."),
            ProtocolSummary::Treatment(details) => details,
        };
        let record = &details.record;
        let qualifier = if details.presumptive { " (presumptive)" } else { "" };
        writeln!(f, "Likely pathogen: {}{qualifier}", record.pathogen)?;
        writeln!(f, "Pattern: {}", record.pattern)?;
        writeln!(f, "First line: {}", record.first_line)?;
        writeln!(f, "Maximum dose: {}", record.max_dose)?;
        writeln!(f, "Duration: {}", record.duration)?;
        writeln!(f, "Alternative: {}", record.alternative)?;
        // Page numbers get a "p." prefix; chapter or section titles are cited as is.
        if record.page.starts_with(|c: char| c.is_ascii_digit()) {
            write!(f, "Reference: {} (p. {})", details.source, record.page)
        } else {
            write!(f, "Reference: {} ({})", details.source, record.page)
        }
    }
}

/// Maps classifications onto the shared reference table.
#[derive(Debug, Clone)]
pub struct ProtocolResolver {
    table: Arc<ProtocolTable>,
    presumptive_pathogen: String,
}

impl ProtocolResolver {
    pub fn new(table: Arc<ProtocolTable>, presumptive_pathogen: impl Into<String>) -> Self {
        Self {
            table,
            presumptive_pathogen: presumptive_pathogen.into(),
        }
    }

    pub fn table(&self) -> &ProtocolTable {
        &self.table
    }

    pub fn presumptive_pathogen(&self) -> &str {
        &self.presumptive_pathogen
    }

    /// Table key a label resolves to, or `None` for a normal result.
    fn key_for(&self, label: TriageLabel) -> Option<(&str, bool)> {
        match label {
            TriageLabel::Normal => None,
            TriageLabel::PositiveUnspecified => Some((self.presumptive_pathogen.as_str(), true)),
            TriageLabel::PathogenA | TriageLabel::PathogenB => label.pathogen().map(|p| (p, false)),
        }
    }

    /// Checks at startup that every label the active classifier can emit resolves.
    pub fn check_coverage(&self, labels: &[TriageLabel]) -> Result<(), ConfigError> {
        for label in labels {
            if let Some((pathogen, _)) = self.key_for(*label) {
                self.table
                    .lookup(pathogen)
                    .map_err(|UnknownPathogen(missing)| ConfigError::MissingProtocol(missing))?;
            }
        }
        Ok(())
    }

    pub fn resolve(&self, classification: &Classification) -> Result<ProtocolSummary, UnknownPathogen> {
        let Some((pathogen, presumptive)) = self.key_for(classification.label) else {
            return Ok(ProtocolSummary::NoProtocol);
        };
        let record = self.table.lookup(pathogen)?;
        Ok(ProtocolSummary::Treatment(ProtocolDetails {
            source: self.table.source().to_string(),
            record: record.clone(),
            presumptive,
        }))
    }
}
