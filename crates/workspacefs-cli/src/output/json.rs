//! JSON output formatter for machine-readable results.

use super::formatter::JsonOutput;
use super::formatter::OutputFormatter;
use anyhow::Result;
use serde::Serialize;
use std::io;
use std::io::Write;
use std::path::Path;
use workspacefs_core::MaterializeReport;

pub struct JsonFormatter;

#[derive(Debug, Serialize)]
struct MaterializeOutput {
    output_dir: String,
    strategy: String,
    entries_added: usize,
    directories_created: usize,
    files_copied: usize,
    files_moved: usize,
    symlinks_created: usize,
    entries_skipped: usize,
    reserved_skipped: usize,
    bytes_written: u64,
    duration_ms: u128,
}

impl MaterializeOutput {
    fn new(output_dir: &Path, report: &MaterializeReport) -> Self {
        Self {
            output_dir: output_dir.display().to_string(),
            strategy: report.strategy.to_string(),
            entries_added: report.entries_added(),
            directories_created: report.directories_created,
            files_copied: report.files_copied,
            files_moved: report.files_moved,
            symlinks_created: report.symlinks_created,
            entries_skipped: report.entries_skipped,
            reserved_skipped: report.reserved_skipped,
            bytes_written: report.bytes_written,
            duration_ms: report.duration.as_millis(),
        }
    }
}

impl JsonFormatter {
    fn output<T: Serialize>(value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        writeln!(io::stdout(), "{json}")?;
        Ok(())
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_materialize_result(
        &self,
        output_dir: &Path,
        report: &MaterializeReport,
    ) -> Result<()> {
        let output = JsonOutput::success("materialize", MaterializeOutput::new(output_dir, report));
        Self::output(&output)
    }

    fn format_error(&self, error: &anyhow::Error) {
        let output = JsonOutput::error("materialize", format!("{error:#}"));
        let _ = Self::output(&output);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use workspacefs_core::MergeAction;
    use workspacefs_core::Strategy;

    #[test]
    fn test_materialize_output_structure() {
        let mut report = MaterializeReport::new(Strategy::Extract);
        report.record(MergeAction::CreatedDirectory);
        report.record(MergeAction::Moved);

        let output = JsonOutput::success(
            "materialize",
            MaterializeOutput::new(Path::new("/srv/ws"), &report),
        );
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&output).unwrap()).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["strategy"], "extract");
        assert_eq!(json["data"]["entries_added"], 2);
        assert_eq!(json["data"]["output_dir"], "/srv/ws");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_output_structure() {
        let output = JsonOutput::error("materialize", "boom");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
        assert!(json.get("data").is_none());
    }
}
