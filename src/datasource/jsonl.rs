use super::{decode_record, Datasource, DatasourceError, EventStream};
use crate::transform::Family;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One JSON object per line. Blank lines are skipped; lines that fail to
/// parse surface as per-record errors without stopping the pass.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    name: String,
    family: Family,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>, family: Family) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name, family }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Datasource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Family {
        self.family
    }

    fn events(&self) -> Result<EventStream<'_>, DatasourceError> {
        let file = File::open(&self.path)
            .map_err(|e| DatasourceError::initialization(&self.name, e))?;
        debug!(path = %self.path.display(), "reading event lines");

        let records = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                match line {
                    Ok(text) if text.trim().is_empty() => None,
                    Ok(text) => Some(
                        serde_json::from_str(&text)
                            .map_err(|e| DatasourceError::Record {
                                line: line_no,
                                reason: e.to_string(),
                            })
                            .and_then(|value| decode_record(line_no, value)),
                    ),
                    Err(e) => Some(Err(DatasourceError::Record {
                        line: line_no,
                        reason: e.to_string(),
                    })),
                }
            });
        Ok(Box::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_records_and_reports_bad_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "dns_lookup", "http_host": "a.test"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "[1]").unwrap();
        writeln!(file, r#"{{"event_type": "connection"}}"#).unwrap();

        let source = JsonLinesSource::new(file.path(), Family::Generic);
        let results: Vec<_> = source.events().unwrap().collect();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().kind(), Some("dns_lookup"));
        assert!(matches!(results[1], Err(DatasourceError::Record { line: 3, .. })));
        assert!(matches!(results[2], Err(DatasourceError::Record { line: 4, .. })));
        assert_eq!(results[3].as_ref().unwrap().kind(), Some("connection"));
    }

    #[test]
    fn missing_file_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonLinesSource::new(dir.path().join("absent.jsonl"), Family::Generic);
        match source.events() {
            Err(err) => assert!(err.is_fatal()),
            Ok(_) => panic!("expected an initialization error"),
        };
    }

    #[test]
    fn each_pass_starts_over() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "connection"}}"#).unwrap();
        let source = JsonLinesSource::new(file.path(), Family::Generic);
        assert_eq!(source.events().unwrap().count(), 1);
        assert_eq!(source.events().unwrap().count(), 1);
    }
}
