//! JUnit XML report generation.
//!
//! Writes the run's final per-unit verdicts in JUnit XML, the de facto
//! interchange format for CI systems (Jenkins, GitLab CI, GitHub Actions,
//! Buildkite all ingest it).

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::Reporter;
use crate::coordinator::AggregateReport;
use crate::executor::{RunAttempt, TestUnit};
use crate::policy::RetryDecision;

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created automatically. Each unit appears once,
/// with its final verdict; a unit that recovered on retry is recorded as
/// passed, with the attempt count noted.
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    /// Creates a new JUnit reporter writing to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "reroll".to_string(),
        }
    }

    /// Sets the test suite name in the XML output.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Generate JUnit XML content from the final report.
    fn generate_xml(&self, report: &AggregateReport) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = report.verdicts.len();
        let failures = report.failed_count();
        let time = report.duration.as_secs_f64();

        // <testsuites>
        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.to_string().as_str()));
        testsuites.push_attribute(("failures", failures.to_string().as_str()));
        testsuites.push_attribute(("errors", "0"));
        testsuites.push_attribute(("time", format!("{:.3}", time).as_str()));
        writer.write_event(Event::Start(testsuites))?;

        // <testsuite>
        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.to_string().as_str()));
        testsuite.push_attribute(("failures", failures.to_string().as_str()));
        testsuite.push_attribute(("errors", "0"));
        testsuite.push_attribute(("skipped", "0"));
        testsuite.push_attribute(("time", format!("{:.3}", time).as_str()));
        if let Some(first) = report.attempts.first() {
            testsuite.push_attribute(("timestamp", first.started_at.to_rfc3339().as_str()));
        }
        writer.write_event(Event::Start(testsuite))?;

        for verdict in &report.verdicts {
            self.write_testcase(&mut writer, verdict.unit.clone(), verdict.passed, verdict.attempts, verdict.recovered)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }

    fn write_testcase<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        unit: TestUnit,
        passed: bool,
        attempts: usize,
        recovered: bool,
    ) -> anyhow::Result<()> {
        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute(("classname", unit.module.as_str()));
        testcase.push_attribute(("name", unit.short_name()));

        if passed {
            if recovered {
                // Note the recovery in a system-out so CI keeps the signal.
                writer.write_event(Event::Start(testcase))?;
                let sysout = BytesStart::new("system-out");
                writer.write_event(Event::Start(sysout))?;
                writer.write_event(Event::Text(BytesText::new(&escape_xml(&format!(
                    "recovered after {} attempts",
                    attempts
                )))))?;
                writer.write_event(Event::End(BytesEnd::new("system-out")))?;
                writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            } else {
                writer.write_event(Event::Empty(testcase))?;
            }
        } else {
            writer.write_event(Event::Start(testcase))?;

            let mut failure = BytesStart::new("failure");
            let message = format!("failed in all {} attempt(s)", attempts);
            failure.push_attribute(("message", escape_xml(&message).as_str()));
            failure.push_attribute(("type", "TestFailure"));
            writer.write_event(Event::Empty(failure))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_run_start(&self, _units: &[TestUnit], _max_forks: usize) {}

    async fn on_attempt_start(&self, _number: usize, _unit_count: usize) {}

    async fn on_attempt_complete(&self, _attempt: &RunAttempt, _decision: &RetryDecision) {}

    async fn on_run_complete(&self, report: &AggregateReport) {
        match self.generate_xml(report) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}

/// Escape special XML characters and strip invalid ones.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::UnitVerdict;
    use crate::policy::RetryStats;
    use std::time::Duration;

    fn report() -> AggregateReport {
        let verdicts = vec![
            UnitVerdict {
                unit: TestUnit::new("billing::InvoiceSuite"),
                passed: true,
                attempts: 1,
                recovered: false,
            },
            UnitVerdict {
                unit: TestUnit::new("billing::LedgerSuite"),
                passed: true,
                attempts: 2,
                recovered: true,
            },
            UnitVerdict {
                unit: TestUnit::new("auth::SessionSuite"),
                passed: false,
                attempts: 2,
                recovered: false,
            },
        ];

        AggregateReport {
            attempts: Vec::new(),
            verdicts,
            final_reason: None,
            stats: RetryStats {
                total_units: 3,
                retried_units: 2,
                recovered_units: 1,
                extra_attempts: 2,
            },
            duration: Duration::from_millis(4200),
        }
    }

    #[test]
    fn test_generated_xml_shape() {
        let reporter = JUnitReporter::new("junit.xml".into()).with_testsuite_name("suite");
        let xml = reporter.generate_xml(&report()).unwrap();

        assert!(xml.contains(r#"<testsuite name="suite" tests="3" failures="1""#));
        assert!(xml.contains(r#"classname="billing" name="InvoiceSuite""#));
        assert!(xml.contains("recovered after 2 attempts"));
        assert!(xml.contains(r#"message="failed in all 2 attempt(s)""#));
    }

    #[test]
    fn test_report_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("junit.xml");
        let reporter = JUnitReporter::new(path.clone());

        futures::executor::block_on(reporter.on_run_complete(&report()));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<?xml"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("<test>"), "&lt;test&gt;");
        assert_eq!(escape_xml("a & b"), "a &amp; b");
        assert_eq!(escape_xml("\"quoted\""), "&quot;quoted&quot;");
    }
}
