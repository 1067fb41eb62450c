use serde::{Deserialize, Serialize};

use crate::domain::SplitMode;
use crate::error::EtlError;

pub const SARS_COV2_METADATA_BUCKET: &str = "sra-pub-sars-cov2-metadata-us-east-1";

pub const BLASTN_HEADER: &str = "acc\tqacc\tstaxid\tsacc\tslen\tlength\tbitscore\tscore\tpident\tsskingdom\tevalue\tssciname\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    pub bucket: String,
    pub key: String,
    pub ext: String,
    pub node_name: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: SplitMode,
}

fn default_mode() -> SplitMode {
    SplitMode::Split
}

impl VariantConfig {
    fn builtin(
        name: &str,
        key: &str,
        ext: &str,
        node_name: &str,
        header: Option<&str>,
        mode: SplitMode,
    ) -> Self {
        Self {
            name: name.to_string(),
            bucket: SARS_COV2_METADATA_BUCKET.to_string(),
            key: key.to_string(),
            ext: ext.to_string(),
            node_name: node_name.to_string(),
            header: header.map(str::to_string),
            mode,
        }
    }
}

pub fn builtin_variants() -> Vec<VariantConfig> {
    vec![
        VariantConfig::builtin(
            "blastn",
            "blastn/blastn.tsv",
            "tsv",
            "virus_sequence_blastn",
            Some(BLASTN_HEADER),
            SplitMode::Split,
        ),
        VariantConfig::builtin(
            "peptide",
            "peptides/peptides.json",
            "json",
            "virus_sequence_peptide",
            None,
            SplitMode::Split,
        ),
        VariantConfig::builtin(
            "contig",
            "contigs/contigs.json",
            "json",
            "virus_sequence_contig",
            None,
            SplitMode::Split,
        ),
        VariantConfig::builtin(
            "hmmsearch",
            "hmmsearch_notc/hmmsearch_notc.json",
            "json",
            "virus_sequence_hmmsearch",
            None,
            SplitMode::Split,
        ),
        VariantConfig::builtin(
            "taxonomy",
            "sra_taxonomy/coronaviridae_07_31_2020_000000000000.gz",
            "gz",
            "virus_sequence_run_taxonomy",
            None,
            SplitMode::Whole,
        ),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct VariantCatalog {
    variants: Vec<VariantConfig>,
}

impl VariantCatalog {
    pub fn builtin() -> Self {
        Self {
            variants: builtin_variants(),
        }
    }

    pub fn insert(&mut self, variant: VariantConfig) {
        match self.variants.iter_mut().find(|v| v.name == variant.name) {
            Some(existing) => *existing = variant,
            None => self.variants.push(variant),
        }
    }

    pub fn get(&self, name: &str) -> Result<&VariantConfig, EtlError> {
        self.variants
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| EtlError::UnknownVariant(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantConfig> {
        self.variants.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).collect()
    }
}
