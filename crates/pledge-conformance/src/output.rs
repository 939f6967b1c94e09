//! Coloured terminal output for the runner.
//!
//! Uses `termcolor` for cross-platform colored terminal output.
//! Respects `NO_COLOR` environment variable and `--color` flag.

use pledge_conformance::{CaseReport, RunSummary, Section};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled writer for case results.
pub struct StyledOutput {
    stdout: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
        }
    }

    fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    fn badge(&mut self, text: &str, background: Color) {
        let mut spec = ColorSpec::new();
        spec.set_bg(Some(background))
            .set_fg(Some(Color::White))
            .set_bold(true);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Section heading, printed when the section changes.
    pub fn section(&mut self, section: Section) {
        let _ = writeln!(self.stdout);
        self.write_styled(&section.to_string(), None, true);
        let _ = writeln!(self.stdout);
    }

    /// One line per case; failures get their message indented below.
    pub fn case(&mut self, report: &CaseReport, verbose: bool) {
        if report.passed {
            self.badge(" PASS ", Color::Green);
        } else {
            self.badge(" FAIL ", Color::Red);
        }
        let _ = write!(self.stdout, " {}", report.id);
        if verbose {
            self.write_styled(&format!("  {}", report.description), Some(Color::White), false);
            self.write_styled(&format!(" ({}us)", report.duration_us), Some(Color::White), false);
        }
        let _ = writeln!(self.stdout);
        if let Some(message) = &report.message {
            self.write_styled(&format!("       {}", message), Some(Color::Red), false);
            let _ = writeln!(self.stdout);
        }
    }

    /// Totals line.
    pub fn summary(&mut self, summary: &RunSummary) {
        let _ = writeln!(self.stdout);
        if summary.all_passed() {
            self.write_styled(&format!("{} passed", summary.passed), Some(Color::Green), true);
        } else {
            self.write_styled(
                &format!("{} passed, {} failed", summary.passed, summary.failed),
                Some(Color::Red),
                true,
            );
        }
        if summary.stopped_early {
            self.write_styled(" (stopped at first failure)", Some(Color::Yellow), false);
        }
        let _ = writeln!(self.stdout);
        let _ = self.stdout.flush();
    }
}
