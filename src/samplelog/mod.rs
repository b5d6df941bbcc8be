use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::CounterKind;

const MICROS_PER_SECOND: f64 = 1e6;
const MICROS_PER_MINUTE: f64 = 60e6;

/// Errors raised while parsing a scheduler sample log.
#[derive(Debug, thiserror::Error)]
pub enum LogParseError {
    #[error("failed to read sample log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sample log {} has no '#'-prefixed header line", path.display())]
    MissingHeader { path: PathBuf },

    #[error(
        "sample log {} line {line}: expected {expected} columns, found {found}",
        path.display()
    )]
    ColumnCount {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("sample log {} line {line}: {value:?} is not numeric", path.display())]
    BadNumber {
        path: PathBuf,
        line: usize,
        value: String,
    },
}

/// Parsed sample log: a header-name to column-index map plus a row matrix.
///
/// The first column is the snapshot timestamp, already converted from
/// microseconds to epoch seconds. Cumulative counters have been replaced
/// by per-interval deltas according to the configured counter kinds.
#[derive(Debug, Clone)]
pub struct SampleTable {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<f64>>,
    extent: Option<(f64, f64)>,
}

impl SampleTable {
    /// Column index for a header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    /// Whether the log declares the named column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Copy of the named column, windowed rows only.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Snapshot timestamps in epoch seconds, windowed rows only.
    pub fn timestamps(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row[0]).collect()
    }

    /// Windowed rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full [first, last] timestamp extent of the log, before window
    /// filtering. None for an empty log.
    pub fn extent(&self) -> Option<(f64, f64)> {
        self.extent
    }
}

/// Read and normalize a scheduler sample log.
///
/// The first line must be a `#`-prefixed, whitespace-separated header
/// naming the columns; every following non-empty line holds one numeric
/// value per column. Delta normalization runs over the full log, then
/// rows are filtered to `[xmin, xmax]` (unset bounds are unbounded).
pub fn read_sample_log(
    path: &Path,
    kinds: &HashMap<String, CounterKind>,
    xmin: Option<f64>,
    xmax: Option<f64>,
) -> Result<SampleTable, LogParseError> {
    let data = std::fs::read_to_string(path).map_err(|source| LogParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut lines = data.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, line)) if line.trim().is_empty() => continue,
            Some((_, line)) if line.starts_with('#') => break line,
            _ => {
                return Err(LogParseError::MissingHeader {
                    path: path.to_path_buf(),
                })
            }
        }
    };

    let columns: HashMap<String, usize> = header[1..]
        .split_whitespace()
        .enumerate()
        .map(|(idx, name)| (name.to_string(), idx))
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    for (lineno, line) in lines {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let mut row = Vec::with_capacity(width);
        for field in line.split_whitespace() {
            let value: f64 = field.parse().map_err(|_| LogParseError::BadNumber {
                path: path.to_path_buf(),
                line: lineno + 1,
                value: field.to_string(),
            })?;
            row.push(value);
        }

        if row.len() != width {
            return Err(LogParseError::ColumnCount {
                path: path.to_path_buf(),
                line: lineno + 1,
                expected: width,
                found: row.len(),
            });
        }

        rows.push(row);
    }

    // Timestamps arrive in microseconds.
    for row in &mut rows {
        row[0] /= MICROS_PER_SECOND;
    }

    let extent = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => Some((first[0], last[0])),
        _ => None,
    };

    normalize_cumulative(&mut rows, &columns, kinds);

    let lo = xmin.unwrap_or(f64::NEG_INFINITY);
    let hi = xmax.unwrap_or(f64::INFINITY);
    rows.retain(|row| row[0] >= lo && row[0] <= hi);

    Ok(SampleTable {
        columns,
        rows,
        extent,
    })
}

/// Replace cumulative-counter columns with per-interval deltas.
///
/// Every row becomes `max(0, cur - prev)`; the first row keeps its raw
/// value for count columns and is zeroed for time columns, which are also
/// converted from accumulated microseconds to minutes per interval.
fn normalize_cumulative(
    rows: &mut [Vec<f64>],
    columns: &HashMap<String, usize>,
    kinds: &HashMap<String, CounterKind>,
) {
    for (name, kind) in kinds {
        let Some(&idx) = columns.get(name) else {
            continue;
        };

        match kind {
            CounterKind::Gauge => {}
            CounterKind::Cumulative => {
                for i in (1..rows.len()).rev() {
                    rows[i][idx] = (rows[i][idx] - rows[i - 1][idx]).max(0.0);
                }
            }
            CounterKind::CumulativeMicros => {
                for i in (1..rows.len()).rev() {
                    rows[i][idx] = (rows[i][idx] - rows[i - 1][idx]).max(0.0) / MICROS_PER_MINUTE;
                }
                if let Some(first) = rows.first_mut() {
                    first[idx] = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::config::default_counter_kinds;

    fn write_log(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("temp file");
        f.write_all(content.as_bytes()).expect("write log");
        f
    }

    fn micros(secs: u64) -> u64 {
        secs * 1_000_000
    }

    #[test]
    fn test_header_map_and_timestamp_conversion() {
        let log = write_log(&format!(
            "# timestamp workers_busy tasks_running\n{} 4 9\n{} 5 11\n",
            micros(100),
            micros(160),
        ));

        let table =
            read_sample_log(log.path(), &default_counter_kinds(), None, None).expect("parses");

        assert_eq!(table.column_index("timestamp"), Some(0));
        assert_eq!(table.column_index("workers_busy"), Some(1));
        assert_eq!(table.column_index("tasks_running"), Some(2));
        assert_eq!(table.timestamps(), vec![100.0, 160.0]);
        assert_eq!(table.column("workers_busy"), Some(vec![4.0, 5.0]));
    }

    #[test]
    fn test_missing_header_rejected() {
        let log = write_log("100 4 9\n");
        let err = read_sample_log(log.path(), &default_counter_kinds(), None, None)
            .expect_err("no header");
        assert!(matches!(err, LogParseError::MissingHeader { .. }));
    }

    #[test]
    fn test_non_numeric_data_rejected() {
        let log = write_log("# timestamp workers_busy\n100 four\n");
        let err = read_sample_log(log.path(), &default_counter_kinds(), None, None)
            .expect_err("bad number");
        assert!(matches!(err, LogParseError::BadNumber { line: 2, .. }));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let log = write_log("# timestamp workers_busy\n100 4 9\n");
        let err = read_sample_log(log.path(), &default_counter_kinds(), None, None)
            .expect_err("column count");
        assert!(matches!(
            err,
            LogParseError::ColumnCount {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_cumulative_counter_deltas_never_negative() {
        // 3 -> 7 -> 5: the counter reset between samples, the derived
        // interval value clamps to zero instead of going negative.
        let log = write_log(&format!(
            "# timestamp total_workers_joined\n{} 3\n{} 7\n{} 5\n",
            micros(10),
            micros(20),
            micros(30),
        ));

        let table =
            read_sample_log(log.path(), &default_counter_kinds(), None, None).expect("parses");

        assert_eq!(
            table.column("total_workers_joined"),
            Some(vec![3.0, 4.0, 0.0])
        );
    }

    #[test]
    fn test_cumulative_micros_converted_to_minutes() {
        // 2 minutes of accumulated send time appear between the samples.
        let log = write_log(&format!(
            "# timestamp total_send_time\n{} {}\n{} {}\n",
            micros(10),
            micros(60),
            micros(20),
            micros(180),
        ));

        let table =
            read_sample_log(log.path(), &default_counter_kinds(), None, None).expect("parses");

        let sent = table.column("total_send_time").expect("column");
        assert_eq!(sent[0], 0.0); // first row zeroed for timing columns
        assert!((sent[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_filter_after_normalization() {
        let log = write_log(&format!(
            "# timestamp total_workers_joined\n{} 1\n{} 4\n{} 9\n",
            micros(10),
            micros(20),
            micros(30),
        ));

        let table = read_sample_log(
            log.path(),
            &default_counter_kinds(),
            Some(15.0),
            Some(25.0),
        )
        .expect("parses");

        // Only the middle row survives, but its delta was computed
        // against the unfiltered predecessor.
        assert_eq!(table.timestamps(), vec![20.0]);
        assert_eq!(table.column("total_workers_joined"), Some(vec![3.0]));
        // The extent still reflects the whole log.
        assert_eq!(table.extent(), Some((10.0, 30.0)));
    }

    #[test]
    fn test_empty_log_has_no_extent() {
        let log = write_log("# timestamp workers_busy\n");
        let table =
            read_sample_log(log.path(), &default_counter_kinds(), None, None).expect("parses");
        assert!(table.is_empty());
        assert_eq!(table.extent(), None);
    }
}
