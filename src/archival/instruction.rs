use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of an archival run.
///
/// Instructions run strictly in configured order. Values outside the known
/// set are kept as [`Instruction::Unknown`] so that a run can execute every
/// step before the bad one and abort exactly where it appears.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Instruction {
    /// Delete rows older than the cutoff from every source table.
    Delete,
    /// Upload each table's snapshot to blob storage as CSV.
    ToAzure,
    /// Append each table's snapshot to the backup database.
    ToDb,
    /// Anything else. Aborts the run when reached.
    Unknown(String),
}

impl Instruction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "delete" => Instruction::Delete,
            "to_azure" => Instruction::ToAzure,
            "to_db" => Instruction::ToDb,
            other => Instruction::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Instruction::Delete => "delete",
            Instruction::ToAzure => "to_azure",
            Instruction::ToDb => "to_db",
            Instruction::Unknown(raw) => raw,
        }
    }

    /// Whether this step copies rows out of the source.
    pub fn is_export(&self) -> bool {
        matches!(self, Instruction::ToAzure | Instruction::ToDb)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Instruction::Unknown(_))
    }
}

impl From<String> for Instruction {
    fn from(raw: String) -> Self {
        Instruction::parse(&raw)
    }
}

impl From<Instruction> for String {
    fn from(instruction: Instruction) -> Self {
        instruction.as_str().to_string()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export steps that appear after the first `delete` in `instructions`.
///
/// Those exports will observe a source that has already been purged, so the
/// rows older than the cutoff are lost. The order is honoured as configured;
/// this only exists so callers can warn about it.
pub fn exports_after_delete(instructions: &[Instruction]) -> Vec<&Instruction> {
    match instructions.iter().position(|i| *i == Instruction::Delete) {
        Some(pos) => instructions[pos + 1..]
            .iter()
            .filter(|i| i.is_export())
            .collect(),
        None => Vec::new(),
    }
}
