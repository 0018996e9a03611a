//! Append-only CSV export. The header is written only when the file is new
//! (absent or empty).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;

use super::capacity::CapacityRow;
use super::ScoreCard;

pub const CAPACITY_HEADER: &str =
    "model,expected,actual,context_wordcount,context_charcount,errorcount";
pub const TUNING_HEADER: &str = "modelname,queryindex,type,proba";

/// Error type for score export
#[derive(Debug, thiserror::Error)]
pub enum ScorecardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for score export
pub type ScorecardResult<T> = Result<T, ScorecardError>;

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn append_rows(path: &Path, header: &str, rows: &[Vec<String>]) -> ScorecardResult<()> {
    let is_new = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        writeln!(file, "{header}")?;
    }
    for row in rows {
        let line: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        writeln!(file, "{}", line.join(","))?;
    }
    info!(path = %path.display(), rows = rows.len(), "Appended score rows");
    Ok(())
}

/// One `modelname,queryindex,type,proba` row per record.
pub fn append_tuning(path: &Path, card: &ScoreCard) -> ScorecardResult<usize> {
    let rows: Vec<Vec<String>> = card
        .records()
        .iter()
        .map(|r| {
            vec![
                r.model.clone(),
                r.query_index.to_string(),
                if r.is_correct() { "positive" } else { "negative" }.to_string(),
                r.probability.to_string(),
            ]
        })
        .collect();
    append_rows(path, TUNING_HEADER, &rows)?;
    Ok(rows.len())
}

pub fn append_capacity(path: &Path, rows: &[CapacityRow]) -> ScorecardResult<()> {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.model.clone(),
                r.expected.clone(),
                r.actual.clone(),
                r.context_wordcount.to_string(),
                r.context_charcount.to_string(),
                r.errorcount.to_string(),
            ]
        })
        .collect();
    append_rows(path, CAPACITY_HEADER, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorecard::ScoreRecord;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuning.csv");

        let mut card = ScoreCard::new();
        card.record(ScoreRecord {
            model: "m".into(),
            query_index: 0,
            acceptable_answers: vec!["4".into()],
            actual_answer: "4".into(),
            probability: 90,
        });
        append_tuning(&path, &card).unwrap();
        append_tuning(&path, &card).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![TUNING_HEADER, "m,0,positive,90", "m,0,positive,90"]);
    }

    #[test]
    fn test_capacity_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacity.csv");
        append_capacity(
            &path,
            &[CapacityRow {
                model: "m".into(),
                expected: "4".into(),
                actual: "JSONERROR".into(),
                context_wordcount: 120,
                context_charcount: 700,
                errorcount: 1,
            }],
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            format!("{CAPACITY_HEADER}\nm,4,JSONERROR,120,700,1\n")
        );
    }
}
