//! Human-readable output formatter with colors and styling.

use super::formatter::OutputFormatter;
use anyhow::Result;
use console::Term;
use console::style;
use std::path::Path;
use workspacefs_core::MaterializeReport;

pub struct HumanFormatter {
    verbose: bool,
    quiet: bool,
    use_colors: bool,
    term: Term,
}

impl HumanFormatter {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            use_colors: console::colors_enabled(),
            term: Term::stdout(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.1} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.1} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.1} KB", bytes as f64 / KB as f64)
        } else {
            format!("{bytes} B")
        }
    }

    fn format_number(n: usize) -> String {
        let s = n.to_string();
        let mut result = String::new();

        for (count, c) in s.chars().rev().enumerate() {
            if count > 0 && count % 3 == 0 {
                result.push(',');
            }
            result.push(c);
        }

        result.chars().rev().collect()
    }

    fn summary_lines(report: &MaterializeReport, verbose: bool) -> Vec<String> {
        let mut lines = vec![
            format!("  Strategy:         {}", report.strategy),
            format!(
                "  Entries added:    {}",
                Self::format_number(report.entries_added())
            ),
            format!(
                "  Entries kept:     {}",
                Self::format_number(report.entries_skipped)
            ),
        ];

        if report.bytes_written > 0 {
            lines.push(format!(
                "  Bytes copied:     {}",
                Self::format_size(report.bytes_written)
            ));
        }

        if verbose {
            lines.push(format!("  Directories:      {}", report.directories_created));
            lines.push(format!("  Files copied:     {}", report.files_copied));
            lines.push(format!("  Entries moved:    {}", report.files_moved));
            lines.push(format!("  Symlinks:         {}", report.symlinks_created));
            lines.push(format!("  Reserved skipped: {}", report.reserved_skipped));
            lines.push(format!("  Duration:         {:?}", report.duration));
        }

        lines
    }
}

impl OutputFormatter for HumanFormatter {
    fn format_materialize_result(
        &self,
        output_dir: &Path,
        report: &MaterializeReport,
    ) -> Result<()> {
        if self.quiet {
            return Ok(());
        }

        let headline = if report.is_noop() {
            format!("{} already up to date", output_dir.display())
        } else {
            format!("Materialized into {}", output_dir.display())
        };

        if self.use_colors {
            self.term
                .write_line(&format!("{} {headline}", style("✓").green().bold()))?;
        } else {
            self.term.write_line(&headline)?;
        }

        for line in Self::summary_lines(report, self.verbose) {
            self.term.write_line(&line)?;
        }

        Ok(())
    }

    fn format_error(&self, error: &anyhow::Error) {
        // Always show errors, even in quiet mode
        let term = Term::stderr();
        if self.use_colors {
            let _ = term.write_line(&format!("{} {error:?}", style("ERROR:").red().bold()));
        } else {
            let _ = term.write_line(&format!("ERROR: {error:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workspacefs_core::MergeAction;
    use workspacefs_core::Strategy;

    #[test]
    fn test_format_size() {
        assert_eq!(HumanFormatter::format_size(0), "0 B");
        assert_eq!(HumanFormatter::format_size(1023), "1023 B");
        assert_eq!(HumanFormatter::format_size(1536), "1.5 KB");
        assert_eq!(HumanFormatter::format_size(2 * 1024 * 1024), "2.0 MB");
        assert_eq!(HumanFormatter::format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(HumanFormatter::format_number(0), "0");
        assert_eq!(HumanFormatter::format_number(999), "999");
        assert_eq!(HumanFormatter::format_number(1000), "1,000");
        assert_eq!(HumanFormatter::format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn test_summary_lines() {
        let mut report = MaterializeReport::new(Strategy::Mount);
        report.record(MergeAction::CopiedFile);
        report.record(MergeAction::SkippedExisting);
        report.bytes_written = 2048;

        let short = HumanFormatter::summary_lines(&report, false);
        assert!(short.iter().any(|l| l.contains("mount")));
        assert!(short.iter().any(|l| l.contains("2.0 KB")));
        assert!(!short.iter().any(|l| l.contains("Duration")));

        let long = HumanFormatter::summary_lines(&report, true);
        assert!(long.len() > short.len());
        assert!(long.iter().any(|l| l.starts_with("  Files copied:") && l.ends_with('1')));
    }
}
