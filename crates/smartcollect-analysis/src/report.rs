use std::io::{self, Write};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Run,
    Skip,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub decision: Decision,
    pub test_id: String,
    pub reason: String,
}

/// Ordered record of every selection decision made during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticLog {
    records: Vec<DiagnosticRecord>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decision: Decision, test_id: impl Into<String>, reason: impl Into<String>) {
        self.records.push(DiagnosticRecord {
            decision,
            test_id: test_id.into(),
            reason: reason.into(),
        });
    }

    pub fn records(&self) -> &[DiagnosticRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes a header row and one row per record. Fields containing the
    /// delimiter, a quote or a line break are quoted, with quotes doubled.
    pub fn write_delimited<W: Write>(&self, mut writer: W, delimiter: char) -> io::Result<()> {
        write_row(&mut writer, delimiter, ["decision", "test_id", "reason"])?;
        for record in &self.records {
            write_row(
                &mut writer,
                delimiter,
                [record.decision.as_str(), &record.test_id, &record.reason],
            )?;
        }
        writer.flush()
    }
}

fn write_row<W: Write>(writer: &mut W, delimiter: char, fields: [&str; 3]) -> io::Result<()> {
    let line = fields
        .iter()
        .map(|field| quote_field(field, delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string());
    writeln!(writer, "{line}")
}

fn quote_field(field: &str, delimiter: char) -> String {
    if field.contains([delimiter, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_output_quotes_only_when_needed() {
        let mut log = DiagnosticLog::new();
        log.push(Decision::Run, "test_a.py::test_a", "new test");
        log.push(
            Decision::Skip,
            "test_b.py::test_b",
            "unchanged, \"really\"",
        );

        let mut out = Vec::new();
        log.write_delimited(&mut out, ',').expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert_eq!(
            text,
            "decision,test_id,reason\n\
             run,test_a.py::test_a,new test\n\
             skip,test_b.py::test_b,\"unchanged, \"\"really\"\"\"\n"
        );
    }

    #[test]
    fn custom_delimiters_change_quoting() {
        let mut log = DiagnosticLog::new();
        log.push(Decision::Skip, "t.py::t", "a, b");

        let mut out = Vec::new();
        log.write_delimited(&mut out, '\t').expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "decision\ttest_id\treason\nskip\tt.py::t\ta, b\n"
        );
    }
}
