use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArchivePrefix {
    Sra,
    Ddbj,
    Ena,
}

impl ArchivePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchivePrefix::Sra => "SRR",
            ArchivePrefix::Ddbj => "DRR",
            ArchivePrefix::Ena => "ERR",
        }
    }

    fn from_prefix(value: &str) -> Option<Self> {
        match value {
            "SRR" => Some(ArchivePrefix::Sra),
            "DRR" => Some(ArchivePrefix::Ddbj),
            "ERR" => Some(ArchivePrefix::Ena),
            _ => None,
        }
    }
}

impl fmt::Display for ArchivePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run accession such as `SRR11971558`.
///
/// Two accessions are the same group when prefix and numeric suffix agree, so
/// zero-padded spellings collapse onto one group. The raw token is kept for
/// naming shard files.
#[derive(Debug, Clone)]
pub struct AccessionNumber {
    raw: String,
    prefix: ArchivePrefix,
    number: u64,
}

impl AccessionNumber {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn prefix(&self) -> ArchivePrefix {
        self.prefix
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl PartialEq for AccessionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.number == other.number
    }
}

impl Eq for AccessionNumber {}

impl Hash for AccessionNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
        self.number.hash(state);
    }
}

impl Ord for AccessionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then(self.prefix.cmp(&other.prefix))
    }
}

impl PartialOrd for AccessionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AccessionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for AccessionNumber {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || EtlError::InvalidAccession(value.to_string());
        let (head, digits) = trimmed
            .is_char_boundary(3)
            .then(|| trimmed.split_at(3))
            .ok_or_else(invalid)?;
        let prefix = ArchivePrefix::from_prefix(head).ok_or_else(invalid)?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }
        let number = digits.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self {
            raw: trimmed.to_string(),
            prefix,
            number,
        })
    }
}

impl Serialize for AccessionNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    Split,
    Whole,
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMode::Split => write!(f, "split"),
            SplitMode::Whole => write!(f, "whole"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionPolicy {
    #[default]
    ByLine,
    WholeGroup,
}

impl fmt::Display for ExclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionPolicy::ByLine => write!(f, "by-line"),
            ExclusionPolicy::WholeGroup => write!(f, "whole-group"),
        }
    }
}
