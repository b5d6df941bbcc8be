use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

/// File name of the campaign job store inside the working directory.
pub const STORE_FILE: &str = "campaign.db";

/// Errors raised by the job-store reader.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot open job store {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("job store is missing work-unit table {table}")]
    SchemaMismatch { table: String },

    #[error("job store query failed: {source}")]
    Query {
        #[from]
        source: rusqlite::Error,
    },
}

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Submitted,
    Running,
    Successful,
    Failed,
    Aborted,
    Incomplete,
    Published,
}

impl JobStatus {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Submitted),
            1 => Some(Self::Running),
            2 => Some(Self::Successful),
            3 => Some(Self::Failed),
            4 => Some(Self::Aborted),
            5 => Some(Self::Incomplete),
            6 => Some(Self::Published),
            _ => None,
        }
    }

    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Submitted => 0,
            Self::Running => 1,
            Self::Successful => 2,
            Self::Failed => 3,
            Self::Aborted => 4,
            Self::Incomplete => 5,
            Self::Published => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Incomplete => "incomplete",
            Self::Published => "published",
        }
    }
}

/// A failed job record; only the phase prefix populated at failure is
/// meaningful.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub id: i64,
    pub host: String,
    pub dataset: i64,
    pub exit_code: i64,
    pub t_submit: f64,
    pub t_retrieved: f64,
    /// Productive seconds on the worker.
    pub goodput: f64,
    /// Total seconds on the worker across all attempts.
    pub allput: f64,
}

/// A terminal-success-class job record (successful, incomplete, or
/// published) with the full phase-timestamp vector.
#[derive(Debug, Clone)]
pub struct SuccessJob {
    pub id: i64,
    pub host: String,
    pub dataset: i64,
    pub file_block: String,
    pub status: JobStatus,
    pub exit_code: i64,
    pub submissions: i64,
    pub units: i64,
    pub units_processed: i64,
    pub events_read: i64,
    pub events_written: i64,
    pub t_submit: f64,
    pub t_stagein_start: f64,
    pub t_stagein_end: f64,
    pub t_wrapper_start: f64,
    pub t_wrapper_ready: f64,
    pub t_file_request: f64,
    pub t_file_open: f64,
    pub t_first_event: f64,
    pub t_processing_end: f64,
    pub t_report_end: f64,
    pub t_stageout_start: f64,
    pub t_stageout_end: f64,
    pub t_retrieved: f64,
    pub goodput: f64,
    pub allput: f64,
    pub cpu_seconds: f64,
    pub bytes_received: f64,
    pub bytes_sent: f64,
    pub bytes_output: f64,
}

/// One dataset summary row; the reader appends a synthesized "Total" row.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub label: String,
    pub events: i64,
    pub events_read: i64,
    pub events_written: i64,
    pub units_total: i64,
    pub units: i64,
    pub units_done: i64,
    pub completion: String,
}

/// A work unit completed inside the report window.
#[derive(Debug, Clone, Copy)]
pub struct UnitCompletion {
    pub id: i64,
    pub t_retrieved: f64,
}

/// Everything one report cycle reads from the job store.
#[derive(Debug, Clone, Default)]
pub struct CampaignSnapshot {
    pub successes: Vec<SuccessJob>,
    pub failures: Vec<FailedJob>,
    pub summaries: Vec<DatasetSummary>,
    pub labels: Vec<String>,
    pub completed_units: Vec<UnitCompletion>,
    pub total_units: i64,
    /// Work units completed strictly before the window start, seeding the
    /// remaining-work curve.
    pub units_done_before: i64,
    /// Completed (run, unit) coordinates per dataset label.
    pub processed_units: BTreeMap<String, Vec<(i64, i64)>>,
}

/// Read-only reader over the campaign job store.
///
/// A fresh connection is opened per read so a long-lived engine never
/// pins the database file.
#[derive(Debug, Clone)]
pub struct StoreReader {
    path: PathBuf,
}

impl StoreReader {
    pub fn new(workdir: &Path) -> Self {
        Self {
            path: workdir.join(STORE_FILE),
        }
    }

    /// Query all records for the window `[xmin, xmax]`.
    pub fn read(&self, xmin: f64, xmax: f64) -> Result<CampaignSnapshot, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Unavailable {
            path: self.path.clone(),
            source,
        })?;

        let failures = read_failures(&conn, xmin, xmax)?;
        let successes = read_successes(&conn, xmin, xmax)?;
        let summaries = read_summaries(&conn)?;

        let labels: Vec<String> = {
            let mut stmt = conn.prepare("select label from datasets order by id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut snapshot = CampaignSnapshot {
            successes,
            failures,
            summaries,
            labels: labels.clone(),
            ..CampaignSnapshot::default()
        };

        for label in &labels {
            read_work_units(&conn, label, xmin, xmax, &mut snapshot)?;
        }

        Ok(snapshot)
    }
}

fn read_failures(conn: &Connection, xmin: f64, xmax: f64) -> Result<Vec<FailedJob>, StoreError> {
    let mut stmt = conn.prepare(
        "select id, host, dataset, exit_code, time_submit, time_retrieved, \
                time_on_worker, time_total_on_worker \
         from jobs \
         where status = ?1 and time_retrieved >= ?2 and time_retrieved <= ?3",
    )?;

    let rows = stmt.query_map(
        params![JobStatus::Failed.as_i64(), xmin, xmax],
        |row| {
            Ok(FailedJob {
                id: row.get(0)?,
                host: row.get(1)?,
                dataset: row.get(2)?,
                exit_code: row.get(3)?,
                t_submit: row.get(4)?,
                t_retrieved: row.get(5)?,
                goodput: row.get(6)?,
                allput: row.get(7)?,
            })
        },
    )?;

    Ok(rows.collect::<Result<_, _>>()?)
}

fn read_successes(conn: &Connection, xmin: f64, xmax: f64) -> Result<Vec<SuccessJob>, StoreError> {
    let mut stmt = conn.prepare(
        "select id, host, dataset, published_file_block, status, exit_code, \
                submissions, units, units_processed, events_read, events_written, \
                time_submit, time_stagein_start, time_stagein_end, \
                time_wrapper_start, time_wrapper_ready, \
                time_file_requested, time_file_opened, time_first_event, \
                time_processing_end, time_report_end, \
                time_stageout_start, time_stageout_end, time_retrieved, \
                time_on_worker, time_total_on_worker, time_cpu, \
                bytes_received, bytes_sent, bytes_output \
         from jobs \
         where status in (?1, ?2, ?3) and time_retrieved >= ?4 and time_retrieved <= ?5",
    )?;

    let rows = stmt.query_map(
        params![
            JobStatus::Successful.as_i64(),
            JobStatus::Incomplete.as_i64(),
            JobStatus::Published.as_i64(),
            xmin,
            xmax
        ],
        |row| {
            let status: i64 = row.get(4)?;
            Ok(SuccessJob {
                id: row.get(0)?,
                host: row.get(1)?,
                dataset: row.get(2)?,
                file_block: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                status: JobStatus::from_i64(status).unwrap_or(JobStatus::Successful),
                exit_code: row.get(5)?,
                submissions: row.get(6)?,
                units: row.get(7)?,
                units_processed: row.get(8)?,
                events_read: row.get(9)?,
                events_written: row.get(10)?,
                t_submit: row.get(11)?,
                t_stagein_start: row.get(12)?,
                t_stagein_end: row.get(13)?,
                t_wrapper_start: row.get(14)?,
                t_wrapper_ready: row.get(15)?,
                t_file_request: row.get(16)?,
                t_file_open: row.get(17)?,
                t_first_event: row.get(18)?,
                t_processing_end: row.get(19)?,
                t_report_end: row.get(20)?,
                t_stageout_start: row.get(21)?,
                t_stageout_end: row.get(22)?,
                t_retrieved: row.get(23)?,
                goodput: row.get(24)?,
                allput: row.get(25)?,
                cpu_seconds: row.get(26)?,
                bytes_received: row.get(27)?,
                bytes_sent: row.get(28)?,
                bytes_output: row.get(29)?,
            })
        },
    )?;

    Ok(rows.collect::<Result<_, _>>()?)
}

fn read_summaries(conn: &Connection) -> Result<Vec<DatasetSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "select label, events, \
                (select sum(events_read) from jobs \
                 where status = 2 and dataset = datasets.id), \
                (select sum(events_written) from jobs \
                 where status = 2 and dataset = datasets.id), \
                units + units_masked, units, units_done \
         from datasets order by id",
    )?;

    let mut summaries: Vec<DatasetSummary> = stmt
        .query_map([], |row| {
            Ok(DatasetSummary {
                label: row.get(0)?,
                events: row.get(1)?,
                events_read: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                events_written: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                units_total: row.get(4)?,
                units: row.get(5)?,
                units_done: row.get(6)?,
                completion: String::new(),
            })
        })?
        .collect::<Result<_, _>>()?;

    // Synthesized campaign-wide row.
    let total = conn.query_row(
        "select sum(events), \
                (select sum(events_read) from jobs where status = 2), \
                (select sum(events_written) from jobs where status = 2), \
                sum(units + units_masked), sum(units), sum(units_done) \
         from datasets",
        [],
        |row| {
            Ok(DatasetSummary {
                label: "Total".to_string(),
                events: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                events_read: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                events_written: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                units_total: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                units: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                units_done: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                completion: String::new(),
            })
        },
    )?;
    summaries.push(total);

    for summary in &mut summaries {
        summary.completion = if summary.units > 0 {
            format!(
                "{:.1} %",
                summary.units_done as f64 * 100.0 / summary.units as f64
            )
        } else {
            "0.0 %".to_string()
        };
    }

    Ok(summaries)
}

/// Work units change size mid-campaign, so completion curves come from
/// the per-dataset unit tables rather than per-job unit counts.
fn read_work_units(
    conn: &Connection,
    label: &str,
    xmin: f64,
    xmax: f64,
    snapshot: &mut CampaignSnapshot,
) -> Result<(), StoreError> {
    let table = format!("work_units_{label}");

    let exists: Option<String> = conn
        .query_row(
            "select name from sqlite_master where type = 'table' and name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;

    if exists.is_none() {
        return Err(StoreError::SchemaMismatch { table });
    }

    snapshot.total_units +=
        conn.query_row(&format!("select count(*) from \"{table}\""), [], |row| {
            row.get::<_, i64>(0)
        })?;

    snapshot.units_done_before += conn.query_row(
        &format!(
            "select count(*) from \"{table}\" u, jobs \
             where u.job = jobs.id and u.status in (2, 5, 6) \
               and jobs.time_retrieved < ?1"
        ),
        params![xmin],
        |row| row.get::<_, i64>(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "select u.id, jobs.time_retrieved from \"{table}\" u, jobs \
         where u.job = jobs.id and u.status in (2, 5, 6) \
           and jobs.time_retrieved >= ?1 and jobs.time_retrieved <= ?2"
    ))?;
    let completed = stmt.query_map(params![xmin, xmax], |row| {
        Ok(UnitCompletion {
            id: row.get(0)?,
            t_retrieved: row.get(1)?,
        })
    })?;
    snapshot
        .completed_units
        .extend(completed.collect::<Result<Vec<_>, _>>()?);

    let mut stmt = conn.prepare(&format!(
        "select u.run, u.unit from \"{table}\" u, jobs \
         where u.job = jobs.id and u.status in (2, 5, 6)"
    ))?;
    let processed = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    snapshot
        .processed_units
        .insert(label.to_string(), processed.collect::<Result<_, _>>()?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_fixture(dir: &Path) -> Connection {
        let conn = Connection::open(dir.join(STORE_FILE)).expect("create db");
        conn.execute_batch(
            "create table datasets (
                 id integer primary key, label text, events integer,
                 units integer, units_done integer, units_masked integer
             );
             create table jobs (
                 id integer primary key, host text, dataset integer,
                 published_file_block text, status integer, exit_code integer,
                 submissions integer, units integer, units_processed integer,
                 events_read integer, events_written integer,
                 time_submit integer, time_stagein_start integer,
                 time_stagein_end integer, time_wrapper_start integer,
                 time_wrapper_ready integer, time_file_requested integer,
                 time_file_opened integer, time_first_event integer,
                 time_processing_end integer, time_report_end integer,
                 time_stageout_start integer, time_stageout_end integer,
                 time_retrieved integer, time_on_worker integer,
                 time_total_on_worker integer, time_cpu integer,
                 bytes_received integer, bytes_sent integer,
                 bytes_output integer
             );
             create table work_units_alpha (
                 id integer primary key, job integer, status integer,
                 run integer, unit integer
             );",
        )
        .expect("create schema");
        conn
    }

    fn insert_dataset(conn: &Connection, id: i64, label: &str, units: i64, done: i64) {
        conn.execute(
            "insert into datasets (id, label, events, units, units_done, units_masked)
             values (?1, ?2, 1000, ?3, ?4, 5)",
            params![id, label, units, done],
        )
        .expect("insert dataset");
    }

    fn insert_job(conn: &Connection, id: i64, status: JobStatus, exit_code: i64, retrieved: i64) {
        let base = retrieved - 100;
        conn.execute(
            "insert into jobs values (
                 ?1, 'node-7', 1, 'block-a', ?2, ?3, 1, 4, 4, 100, 90,
                 ?4, ?4, ?4, ?4, ?4, ?4, ?4, ?4, ?4, ?4, ?4, ?4,
                 ?5, 90, 95, 80, 4096, 2048, 8192
             )",
            params![id, status.as_i64(), exit_code, base, retrieved],
        )
        .expect("insert job");
    }

    fn insert_unit(conn: &Connection, id: i64, job: i64, status: i64, run: i64, unit: i64) {
        conn.execute(
            "insert into work_units_alpha values (?1, ?2, ?3, ?4, ?5)",
            params![id, job, status, run, unit],
        )
        .expect("insert unit");
    }

    #[test]
    fn test_window_selects_terminal_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_fixture(dir.path());
        insert_dataset(&conn, 1, "alpha", 10, 3);
        insert_job(&conn, 1, JobStatus::Successful, 0, 100);
        insert_job(&conn, 2, JobStatus::Failed, 139, 150);
        insert_job(&conn, 3, JobStatus::Published, 0, 220);
        insert_job(&conn, 4, JobStatus::Successful, 0, 999); // outside window
        insert_job(&conn, 5, JobStatus::Running, 0, 150); // not terminal
        drop(conn);

        let snapshot = StoreReader::new(dir.path())
            .read(0.0, 300.0)
            .expect("read");

        assert_eq!(snapshot.successes.len(), 2);
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].exit_code, 139);
        assert_eq!(snapshot.labels, vec!["alpha".to_string()]);
    }

    #[test]
    fn test_summary_includes_total_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_fixture(dir.path());
        conn.execute_batch(
            "create table work_units_beta (
                 id integer primary key, job integer, status integer,
                 run integer, unit integer
             );",
        )
        .expect("second table");
        insert_dataset(&conn, 1, "alpha", 10, 5);
        insert_dataset(&conn, 2, "beta", 20, 10);
        insert_job(&conn, 1, JobStatus::Successful, 0, 100);
        drop(conn);

        let snapshot = StoreReader::new(dir.path())
            .read(0.0, 300.0)
            .expect("read");

        assert_eq!(snapshot.summaries.len(), 3);
        let total = snapshot.summaries.last().expect("total row");
        assert_eq!(total.label, "Total");
        assert_eq!(total.units, 30);
        assert_eq!(total.units_done, 15);
        assert_eq!(total.completion, "50.0 %");
        assert_eq!(total.events_read, 100);
    }

    #[test]
    fn test_work_unit_backlog_seed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_fixture(dir.path());
        insert_dataset(&conn, 1, "alpha", 4, 3);
        insert_job(&conn, 1, JobStatus::Successful, 0, 50); // before window
        insert_job(&conn, 2, JobStatus::Successful, 0, 150); // inside window
        insert_unit(&conn, 1, 1, 2, 1, 1);
        insert_unit(&conn, 2, 2, 2, 1, 2);
        insert_unit(&conn, 3, 2, 2, 1, 3);
        insert_unit(&conn, 4, 2, 0, 1, 4); // not completed
        drop(conn);

        let snapshot = StoreReader::new(dir.path())
            .read(100.0, 300.0)
            .expect("read");

        assert_eq!(snapshot.total_units, 4);
        assert_eq!(snapshot.units_done_before, 1);
        assert_eq!(snapshot.completed_units.len(), 2);
        assert_eq!(
            snapshot.processed_units.get("alpha").map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn test_missing_work_unit_table_is_schema_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_fixture(dir.path());
        insert_dataset(&conn, 1, "gamma", 10, 0);
        drop(conn);

        let err = StoreReader::new(dir.path())
            .read(0.0, 300.0)
            .expect_err("missing table");
        assert!(matches!(
            err,
            StoreError::SchemaMismatch { table } if table == "work_units_gamma"
        ));
    }

    #[test]
    fn test_missing_store_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = StoreReader::new(dir.path())
            .read(0.0, 300.0)
            .expect_err("no db file");
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_status_round_trip() {
        for v in 0..7 {
            let status = JobStatus::from_i64(v).expect("known status");
            assert_eq!(status.as_i64(), v);
        }
        assert!(JobStatus::from_i64(42).is_none());
        assert_eq!(JobStatus::Incomplete.as_str(), "incomplete");
    }
}
