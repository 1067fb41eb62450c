use std::sync::LazyLock;

use regex::Regex;

use crate::domain::AccessionNumber;
use crate::error::EtlError;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[SDE]RR\d+").expect("accession pattern compiles"));

#[derive(Debug, Clone, Copy, Default)]
pub struct LineClassifier;

impl LineClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(
        &self,
        line: &str,
        group_open: bool,
    ) -> Result<Option<AccessionNumber>, EtlError> {
        let mut matches = ACCESSION_RE.find_iter(line);
        let Some(first) = matches.next() else {
            if group_open {
                return Err(EtlError::Format(format!(
                    "no accession number on line inside a group: {}",
                    preview(line)
                )));
            }
            return Ok(None);
        };
        if matches.next().is_some() {
            return Err(EtlError::Format(format!(
                "more than one accession number on line: {}",
                preview(line)
            )));
        }
        first.as_str().parse().map(Some).map_err(|_| {
            EtlError::Format(format!("accession number out of range: {}", first.as_str()))
        })
    }
}

pub fn find_accession(text: &str) -> Option<AccessionNumber> {
    ACCESSION_RE
        .find(text)
        .and_then(|found| found.as_str().parse().ok())
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    let line = line.trim_end_matches(['\r', '\n']);
    match line.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}
