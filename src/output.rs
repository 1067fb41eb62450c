use std::io::{self, Write};

use serde::Serialize;

use crate::app::RunReport;
use crate::submit::SubmitOutcome;
use crate::variant::VariantConfig;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_reports(reports: &[RunReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    pub fn print_variants(variants: &[&VariantConfig]) -> io::Result<()> {
        Self::print_json(&variants)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_reports(reports: &[RunReport]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for report in reports {
            write_report(&mut stdout, report)?;
        }
        Ok(())
    }

    pub fn print_variants(variants: &[&VariantConfig]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for variant in variants {
            writeln!(
                stdout,
                "{:<10} {:<6} s3://{}/{} -> {} (.{})",
                variant.name, variant.mode, variant.bucket, variant.key, variant.node_name, variant.ext
            )?;
        }
        Ok(())
    }
}

pub fn write_report<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
    let status = if report.is_success() { "ok" } else { "FAILED" };
    writeln!(
        out,
        "{} [{}] {} ({} ms)",
        report.variant, report.mode, status, report.elapsed_ms
    )?;
    writeln!(out, "  node:            {}", report.node_name)?;
    writeln!(out, "  known accessions: {}", report.known_accessions)?;
    writeln!(
        out,
        "  lines:           {} read, {} skipped, {} excluded",
        report.lines_read, report.lines_skipped, report.lines_excluded
    )?;
    writeln!(
        out,
        "  shards:          {} written, {} uploaded, {} already present, {} failed",
        report.shards_written,
        report.uploaded,
        report.already_present,
        report.failed.len()
    )?;
    for shard in &report.submitted {
        if let SubmitOutcome::Uploaded { did } = &shard.outcome {
            writeln!(out, "    + {} {}", shard.file, did)?;
        }
    }
    for failed in &report.failed {
        writeln!(out, "    ! {} {}", failed.path, failed.error)?;
    }
    Ok(())
}
