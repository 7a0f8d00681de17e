//! 运行结果.

use std::io::{self, Write};

use clap::ValueEnum;
use mr_berry::pipeline::{BatchReport, PatientReport, PatientStatus};

/// 报告输出格式.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// 人类可读文本.
    Text,

    /// JSON.
    Json,
}

/// 将单个病人的结果写进 `w` 中.
fn describe_into<W: Write>(r: &PatientReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Patient `{}`:", r.patient)?;
    match &r.status {
        PatientStatus::Done {
            voxels,
            threshold,
            positives,
        } => {
            writeln!(w, "{S4}Status: done")?;
            writeln!(w, "{S4}Voxels: {voxels}")?;
            writeln!(w, "{S4}Otsu threshold: {threshold:.6}")?;
            writeln!(w, "{S4}Recurrence voxels: {positives}")?;
        }
        PatientStatus::Skipped { reason } => {
            writeln!(w, "{S4}Status: skipped ({reason})")?;
        }
        PatientStatus::Failed { kind, message } => {
            writeln!(w, "{S4}Status: failed, {kind:?}")?;
            writeln!(w, "{S4}Reason: {message}")?;
        }
    }
    write!(w, "{S4}Elapsed: {:.3} s", r.elapsed_secs)?;
    Ok(())
}

/// 写出整个批次的文本报告.
fn describe_batch_into<W: Write>(report: &BatchReport, w: &mut W) -> io::Result<()> {
    utils::sep_to(&mut *w)?;
    for r in &report.patients {
        describe_into(r, w)?;
        writeln!(w)?;
        utils::sep_to(&mut *w)?;
    }
    writeln!(
        w,
        "{} patients: {} done, {} skipped, {} failed",
        report.total, report.done, report.skipped, report.failed
    )
}

/// 以 `format` 格式将报告打印到标准输出.
pub fn print_report(report: &BatchReport, format: OutputFormat) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Text => describe_batch_into(report, &mut out)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mr_berry::pipeline::FailureKind;

    #[test]
    fn test_text_report() {
        let report = BatchReport::new(vec![
            PatientReport {
                patient: "p1".into(),
                status: PatientStatus::Done {
                    voxels: 10,
                    threshold: 0.25,
                    positives: 4,
                },
                elapsed_secs: 1.5,
            },
            PatientReport {
                patient: "p2".into(),
                status: PatientStatus::Failed {
                    kind: FailureKind::Fatal,
                    message: "no roi".into(),
                },
                elapsed_secs: 0.1,
            },
        ]);
        let mut buf = Vec::new();
        describe_batch_into(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Patient `p1`:"));
        assert!(text.contains("    Otsu threshold: 0.250000"));
        assert!(text.contains("    Reason: no roi"));
        assert!(text.ends_with("2 patients: 1 done, 0 skipped, 1 failed\n"));
    }
}
