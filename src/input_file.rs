//! Input-file jobs: a delimited text file with a header line, one record lookup per data line.
//! Outcomes go to a pivot file next to the checkpoint logs: each processed line is copied with
//! a marker, the record id, `OK`/`KO` and details. Lines already marked `OK` are skipped on resume.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::checkpoint::{CheckpointError, CheckpointLog, checkpoint_path};
use crate::error::SetupError;
use crate::logging::Properties;

/// Separates the copied input line from the outcome columns.
pub const PIVOT_MARKER: &str = "#PVT-TAG#";

/// Field separators when a job does not choose its own.
pub const DEFAULT_SEPARATORS: &[char] = &[',', ';'];

/// One data line of the input file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputLine {
    /// 1-based line number in the input file.
    pub number: usize,
    pub raw: String,
    /// Non-empty, trimmed fields.
    pub fields: Vec<String>,
}

impl InputLine {
    pub fn parse(number: usize, raw: &str, separators: &[char]) -> Self {
        let raw = raw.trim();
        Self {
            number,
            raw: raw.to_string(),
            fields: raw
                .split(separators)
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn properties(&self) -> Properties {
        let mut p = Properties::new();
        p.insert("Line.Number".into(), self.number.to_string());
        p.insert("Line.Fields".into(), self.fields.len().to_string());
        p
    }
}

#[derive(Clone, Debug)]
pub struct InputFile {
    pub header: String,
    pub lines: Vec<InputLine>,
}

/// Read `path`: first non-blank line is the header. Blank lines and lines already carrying the
/// pivot marker are dropped.
pub fn read_input_file(path: &Path, separators: &[char]) -> Result<InputFile> {
    let text = fs::read_to_string(path).with_context(|| format!("read input file {}", path.display()))?;
    let mut numbered = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = numbered.next() else {
        anyhow::bail!("input file {} has no header line", path.display());
    };
    let lines = numbered
        .filter(|(_, l)| !l.contains(PIVOT_MARKER))
        .map(|(n, l)| InputLine::parse(n, l, separators))
        .collect();
    Ok(InputFile {
        header: header.trim().to_string(),
        lines,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Ok,
    Ko,
}

impl fmt::Display for LineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineOutcome::Ok => "OK",
            LineOutcome::Ko => "KO",
        })
    }
}

impl FromStr for LineOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(LineOutcome::Ok),
            "KO" => Ok(LineOutcome::Ko),
            other => Err(format!("unknown line outcome {other:?}")),
        }
    }
}

/// A parsed pivot line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PivotEntry {
    pub raw: String,
    pub record_id: Option<String>,
    pub outcome: LineOutcome,
    pub details: String,
}

/// `<dir>/<type_name>_Pivot.txt`, with the same name rules as checkpoint logs.
pub fn pivot_path(dir: &Path, type_name: &str) -> Result<PathBuf, SetupError> {
    checkpoint_path(dir, type_name)?;
    checkpoint_path(dir, &format!("{}_Pivot", type_name.trim()))
}

/// Outcome log for an input-file run. Appends share the checkpoint log's locking and flushing.
pub struct PivotLog {
    log: CheckpointLog,
    separator: char,
}

impl PivotLog {
    pub fn new(path: PathBuf, separator: char, lock_timeout: Duration) -> Self {
        Self {
            log: CheckpointLog::new(path, lock_timeout),
            separator,
        }
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    pub fn exists(&self) -> bool {
        self.log.exists()
    }

    fn tag(&self) -> String {
        format!("{0}{PIVOT_MARKER}{0}", self.separator)
    }

    /// Start a fresh pivot file whose header extends the input header with the outcome columns.
    pub fn create(&self, input_header: &str) -> Result<(), CheckpointError> {
        self.log.create()?;
        let sep = self.separator;
        self.log.write(&format!(
            "{input_header}{}RecordId{sep}Outcome{sep}Details",
            self.tag()
        ))
    }

    /// Append the outcome of one line. Line breaks in `details` are flattened.
    pub fn write_outcome(
        &self,
        line: &InputLine,
        record_id: Option<&str>,
        outcome: LineOutcome,
        details: &str,
    ) -> Result<(), CheckpointError> {
        let sep = self.separator;
        let details = details.replace(['\r', '\n'], " ");
        self.log.write(&format!(
            "{}{}{}{sep}{outcome}{sep}{details}",
            line.raw,
            self.tag(),
            record_id.unwrap_or_default()
        ))
    }

    /// Every outcome line after the header. Lines that do not parse are ignored.
    pub fn read_entries(&self) -> Result<Vec<PivotEntry>, CheckpointError> {
        let tag = self.tag();
        let entries = self
            .log
            .read_all()?
            .into_iter()
            .skip(1)
            .filter_map(|line| {
                let (raw, rest) = line.split_once(&tag)?;
                let mut cols = rest.splitn(3, self.separator);
                let record_id = cols.next()?.trim();
                let outcome = cols.next()?.trim().parse().ok()?;
                Some(PivotEntry {
                    raw: raw.to_string(),
                    record_id: (!record_id.is_empty()).then(|| record_id.to_string()),
                    outcome,
                    details: cols.next().unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(entries)
    }

    /// Raw input lines already processed with success.
    pub fn completed_lines(&self) -> Result<HashSet<String>, CheckpointError> {
        Ok(self
            .read_entries()?
            .into_iter()
            .filter(|e| e.outcome == LineOutcome::Ok)
            .map(|e| e.raw)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_fields_split_on_both_separators() {
        let line = InputLine::parse(2, " ada@example.com;  ;Ada , Lovelace ", DEFAULT_SEPARATORS);
        assert_eq!(line.raw, "ada@example.com;  ;Ada , Lovelace");
        assert_eq!(line.fields, vec!["ada@example.com", "Ada", "Lovelace"]);
    }

    #[test]
    fn test_read_input_file_skips_header_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        fs::write(&path, "email;name\n\na@x.io;A\nold#PVT-TAG#line\nb@x.io;B\n").unwrap();

        let input = read_input_file(&path, DEFAULT_SEPARATORS).unwrap();
        assert_eq!(input.header, "email;name");
        let numbers: Vec<usize> = input.lines.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![3, 5]);

        fs::write(&path, "\n\n").unwrap();
        assert!(read_input_file(&path, DEFAULT_SEPARATORS).is_err());
    }

    #[test]
    fn test_pivot_log_round_trips_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let pivot = PivotLog::new(dir.path().join("Job_Pivot.txt"), ',', Duration::from_millis(100));
        pivot.create("email,name").unwrap();
        let a = InputLine::parse(2, "a@x.io,A", DEFAULT_SEPARATORS);
        let b = InputLine::parse(3, "b@x.io,B", DEFAULT_SEPARATORS);
        pivot.write_outcome(&a, Some("c-1"), LineOutcome::Ok, "Success").unwrap();
        pivot
            .write_outcome(&b, None, LineOutcome::Ko, "no contact matches,\nb@x.io")
            .unwrap();

        let text = fs::read_to_string(pivot.path()).unwrap();
        assert!(text.starts_with("email,name,#PVT-TAG#,RecordId,Outcome,Details\n"));
        let entries = pivot.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record_id.as_deref(), Some("c-1"));
        assert_eq!(entries[1].record_id, None);
        assert_eq!(entries[1].outcome, LineOutcome::Ko);
        assert_eq!(entries[1].details, "no contact matches, b@x.io");
        assert_eq!(pivot.completed_lines().unwrap(), HashSet::from(["a@x.io,A".to_string()]));
    }

    #[test]
    fn test_pivot_path_follows_checkpoint_rules() {
        let dir = Path::new("/tmp");
        assert_eq!(
            pivot_path(dir, "ImportContacts").unwrap(),
            PathBuf::from("/tmp/ImportContacts_Pivot.txt")
        );
        assert!(pivot_path(dir, "a/b").is_err());
        assert!(pivot_path(dir, "").is_err());
    }
}
