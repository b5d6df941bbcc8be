use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use tracing::info;

use crate::artifacts;
use crate::bucket::{self, BucketGrid};
use crate::config::{Config, CounterKind};
use crate::derive::{self, Category};
use crate::render::{
    ChartSpec, ChartStyle, DatasetArtifact, PageContext, PieSpec, Renderer, Series,
};
use crate::samplelog::{self, SampleTable};
use crate::store::{CampaignSnapshot, FailedJob, JobStatus, StoreReader, SuccessJob};

/// File name of the primary scheduler sample log inside the working
/// directory.
pub const SAMPLE_LOG_FILE: &str = "scheduler_stats.log";

/// Fold threshold for failed-job exit-code grouping.
const FAILURE_FOLD_THRESHOLD: f64 = 0.025;

/// Requested report window; unset bounds default to the campaign bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
}

/// Resolved bounds of one report cycle. Created fresh per cycle and
/// passed through the pipeline; nothing here is process-global.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext {
    /// The rendered window.
    pub window: (f64, f64),
    /// The full extent of the monitored campaign.
    pub campaign: (f64, f64),
}

/// Parse a report window bound: "HH:MM" (today), "YYYY-MM-DD_HH:MM", or
/// "YYYY-MM-DD", all in local time.
pub fn parse_time_bound(text: &str) -> Result<f64> {
    if let Ok(time) = NaiveTime::parse_from_str(text, "%H:%M") {
        return local_epoch(Local::now().date_naive().and_time(time));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d_%H:%M") {
        return local_epoch(dt);
    }

    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("cannot parse time bound {text:?}"))?;
    local_epoch(date.and_time(NaiveTime::MIN))
}

fn local_epoch(dt: NaiveDateTime) -> Result<f64> {
    match Local.from_local_datetime(&dt) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Ok(t.timestamp() as f64),
        LocalResult::None => bail!("time bound {dt} does not exist in the local timezone"),
    }
}

/// The telemetry aggregation and reporting engine. One instance serves
/// arbitrarily many report cycles.
pub struct ReportEngine<R> {
    cfg: Config,
    outdir: PathBuf,
    store: StoreReader,
    renderer: R,
}

impl<R: Renderer> ReportEngine<R> {
    pub fn new(cfg: Config, renderer: R) -> Self {
        let outdir = cfg.outdir();
        let store = StoreReader::new(&cfg.workdir);

        Self {
            cfg,
            outdir,
            store,
            renderer,
        }
    }

    /// The renderer this engine reports through.
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Run one end-to-end report cycle: read, aggregate, retrieve failure
    /// artifacts, render.
    pub async fn run_cycle(&self, window: TimeWindow) -> Result<ReportContext> {
        let started = std::time::Instant::now();
        let kinds = self.cfg.counter_kinds();

        // 1. Primary sample log; its extent is the campaign bounds and
        //    the default for unset window bounds.
        let log_path = self.cfg.workdir.join(SAMPLE_LOG_FILE);
        let samples = samplelog::read_sample_log(&log_path, &kinds, window.xmin, window.xmax)
            .context("reading scheduler sample log")?;

        let Some(campaign) = samples.extent() else {
            bail!("sample log {} holds no samples yet", log_path.display());
        };
        let window = (
            window.xmin.unwrap_or(campaign.0),
            window.xmax.unwrap_or(campaign.1),
        );

        // 2. Job store.
        let snapshot = self
            .store
            .read(window.0, window.1)
            .context("reading job store")?;

        let grid = BucketGrid::new(window.0, window.1, self.cfg.buckets);
        let ctx = ReportContext { window, campaign };

        info!(
            xmin = window.0,
            xmax = window.1,
            successes = snapshot.successes.len(),
            failures = snapshot.failures.len(),
            "report cycle started",
        );

        // 3. Foreman logs and the combined cross-foreman series.
        let foremen = self.foreman_section(&kinds, window)?;

        // 4. Scheduler-level series from the primary log.
        self.scheduler_section(&grid, &samples)?;

        // 5. Job-level series, pies, and phase charts.
        self.job_section(&grid, &samples, &snapshot)?;

        // 6. Failure grouping and sampled artifact retrieval.
        let failure_logs = if snapshot.failures.is_empty() {
            Vec::new()
        } else {
            self.failed_section(&grid, &snapshot.failures)?;
            artifacts::retrieve_failure_logs(
                &self.cfg.workdir,
                &self.outdir,
                &snapshot.labels,
                &snapshot.failures,
                &self.cfg.retrieval,
            )
            .await
            .context("retrieving failure artifacts")?
        };

        // 7. Per-dataset processed-unit artifacts.
        let dataset_artifacts = self.write_processed_units(&snapshot)?;

        // 8. The HTML index.
        self.renderer.page(&PageContext {
            id: self.cfg.id.clone(),
            generated_at: chrono::Utc::now().timestamp(),
            window,
            campaign,
            summary: snapshot.summaries.clone(),
            dataset_artifacts,
            failure_logs,
            foremen,
            good_jobs: !snapshot.successes.is_empty(),
            bad_jobs: !snapshot.failures.is_empty(),
        })?;

        info!(elapsed = ?started.elapsed(), "report cycle finished");

        Ok(ctx)
    }

    /// Worker-gauge series from one sample table, decimated for plotting.
    fn worker_series(&self, grid: &BucketGrid, samples: &SampleTable) -> Vec<Series> {
        let ts = samples.timestamps();
        let kept = bucket::decimate(&ts, grid.bucket_width() / 4.0);

        [
            ("busy", "workers_busy"),
            ("idle", "workers_idle"),
            ("connected", "total_workers_connected"),
        ]
        .iter()
        .filter_map(|(label, column)| {
            let values = samples.column(column)?;
            Some(Series::labeled(
                *label,
                bucket::select(&ts, &kept),
                bucket::select(&values, &kept),
            ))
        })
        .collect()
    }

    /// Turnover series: workers joined/removed per bucket.
    fn turnover_series(&self, grid: &BucketGrid, samples: &SampleTable) -> Vec<Series> {
        let ts = samples.timestamps();
        let centers = grid.centers();

        [
            ("joined", "total_workers_joined"),
            ("removed", "total_workers_removed"),
        ]
        .iter()
        .filter_map(|(label, column)| {
            let values = samples.column(column)?;
            Some(Series::labeled(
                *label,
                centers.clone(),
                grid.weighted_histogram(&ts, &values),
            ))
        })
        .collect()
    }

    fn scheduler_section(&self, grid: &BucketGrid, samples: &SampleTable) -> Result<()> {
        let ts = samples.timestamps();
        let centers = grid.centers();

        self.renderer.chart(
            &ChartSpec::new("workers", "Workers")
                .styles(vec![ChartStyle::time_lines()])
                .series(self.worker_series(grid, samples)),
        )?;

        if let Some(tasks) = samples.column("tasks_running") {
            let kept = bucket::decimate(&ts, grid.bucket_width() / 4.0);
            self.renderer.chart(
                &ChartSpec::new("tasks", "Tasks")
                    .styles(vec![ChartStyle::time_lines()])
                    .series(vec![Series::labeled(
                        "running",
                        bucket::select(&ts, &kept),
                        bucket::select(&tasks, &kept),
                    )]),
            )?;
        }

        self.renderer.chart(
            &ChartSpec::new("turnover", "Workers")
                .styles(vec![ChartStyle::time_histogram()])
                .series(self.turnover_series(grid, samples)),
        )?;

        // Six-way breakdown of where scheduler time went, as a fraction
        // of each bucket.
        let mut parts = Vec::new();
        for (label, column) in [
            ("sending", "total_send_time"),
            ("receiving", "total_receive_time"),
            ("creating", "total_create_time"),
            ("returning", "total_return_time"),
        ] {
            if let Some(values) = samples.column(column) {
                parts.push((label, grid.weighted_histogram(&ts, &values)));
            }
        }

        if let Some(idle_pct) = samples.column("idle_percentage") {
            // Idle time accumulates as elapsed-seconds times the idle
            // fraction; difference it into per-interval minutes.
            let t0 = ts.first().copied().unwrap_or_default();
            let idle_total: Vec<f64> = ts
                .iter()
                .zip(&idle_pct)
                .map(|(&t, &pct)| (t - t0) * pct)
                .collect();
            let mut idle_diff = vec![0.0; idle_total.len()];
            for i in 1..idle_total.len() {
                idle_diff[i] = (idle_total[i] - idle_total[i - 1]) / 60.0;
            }
            parts.push(("idle", grid.weighted_histogram(&ts, &idle_diff)));
        }

        let bucket_minutes = grid.bucket_width() / 60.0;
        let other: Vec<f64> = (0..grid.len())
            .map(|i| {
                let used: f64 = parts.iter().map(|(_, v)| v[i]).sum();
                (bucket_minutes - used).max(0.0)
            })
            .collect();
        parts.push(("other", other));

        let all: Vec<f64> = (0..grid.len())
            .map(|i| parts.iter().map(|(_, v)| v[i]).sum())
            .collect();

        let fraction_series = parts
            .into_iter()
            .map(|(label, values)| {
                Series::labeled(label, centers.clone(), derive::ratio(&values, &all))
            })
            .collect();

        self.renderer.chart(
            &ChartSpec::new("fraction", "Fraction")
                .styles(vec![ChartStyle::time_histogram()])
                .series(fraction_series)
                .ymax(1.0),
        )?;

        Ok(())
    }

    /// Per-foreman series plus the combined cross-foreman charts.
    /// Returns the foreman names for the dashboard index.
    fn foreman_section(
        &self,
        kinds: &std::collections::HashMap<String, CounterKind>,
        window: (f64, f64),
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut tasks = Vec::new();
        let mut idleness = Vec::new();
        let mut efficiencies = Vec::new();

        for path in &self.cfg.foreman_logs {
            let samples =
                samplelog::read_sample_log(path, kinds, Some(window.0), Some(window.1))
                    .with_context(|| format!("reading foreman log {}", path.display()))?;

            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().trim().to_string())
                .unwrap_or_else(|| path.display().to_string());

            let grid = BucketGrid::new(window.0, window.1, self.cfg.buckets);
            let ts = samples.timestamps();

            self.renderer.chart(
                &ChartSpec::new(format!("{name}-workers"), "Workers")
                    .styles(vec![ChartStyle::time_lines()])
                    .series(self.worker_series(&grid, &samples)),
            )?;

            self.renderer.chart(
                &ChartSpec::new(format!("{name}-turnover"), "Workers")
                    .styles(vec![ChartStyle::time_histogram()])
                    .series(self.turnover_series(&grid, &samples)),
            )?;

            if let (Some(good), Some(total)) = (
                samples.column("total_good_execute_time"),
                samples.column("total_execute_time"),
            ) {
                let good_sum: f64 = good.iter().sum();
                let total_sum: f64 = total.iter().sum();
                self.renderer.pie(&PieSpec::from_breakdown(
                    format!("{name}-time-pie"),
                    derive::proportions(vec![
                        ("good execute time", good_sum),
                        ("total - good execute time", total_sum - good_sum),
                    ]),
                    Some(vec!["green".to_string(), "red".to_string()]),
                ))?;
            }

            for (collection, column) in [
                (&mut tasks, "tasks_running"),
                (&mut idleness, "idle_percentage"),
                (&mut efficiencies, "efficiency"),
            ] {
                if let Some(values) = samples.column(column) {
                    collection.push(Series::labeled(name.clone(), ts.clone(), values));
                }
            }

            names.push(name);
        }

        if !names.is_empty() {
            for (stem, label, series) in [
                ("foreman-tasks", "Tasks", tasks),
                ("foreman-idle", "Idle", idleness),
                ("foreman-efficiency", "Efficiency", efficiencies),
            ] {
                self.renderer.chart(
                    &ChartSpec::new(stem, label)
                        .styles(vec![ChartStyle::time_lines()])
                        .series(series),
                )?;
            }
        }

        Ok(names)
    }

    fn job_section(
        &self,
        grid: &BucketGrid,
        samples: &SampleTable,
        snapshot: &CampaignSnapshot,
    ) -> Result<()> {
        let successes = &snapshot.successes;
        let failures = &snapshot.failures;
        let centers = grid.centers();

        if !successes.is_empty() || !failures.is_empty() {
            self.renderer.pie(&PieSpec::from_breakdown(
                "time-pie",
                derive::proportions(vec![
                    ("Eviction", lost_time(successes, failures)),
                    ("Failed", failures.iter().map(|j| j.allput).sum()),
                    (
                        "Overhead",
                        phase_sum(successes, |j| j.t_first_event - j.t_stagein_start),
                    ),
                    (
                        "Processing",
                        phase_sum(successes, |j| j.t_processing_end - j.t_first_event),
                    ),
                    (
                        "Stage-out",
                        phase_sum(successes, |j| j.t_stageout_end - j.t_processing_end),
                    ),
                ]),
                Some(pie_colors(&["crimson", "red", "dodgerblue", "green", "skyblue"])),
            ))?;

            // Job counts per bucket, split by terminal status.
            let mut series = Vec::new();
            for (status, group) in
                derive::split_by_key(successes, |j| j.status.as_i64(), None)
                    .into_iter()
                    .filter_map(|(category, group)| match category {
                        Category::Value(v) => JobStatus::from_i64(v).map(|s| (s, group)),
                        Category::Other => None,
                    })
            {
                let times: Vec<f64> = group.iter().map(|j| j.t_retrieved).collect();
                series.push(
                    Series::labeled(status.as_str(), centers.clone(), grid.histogram(&times))
                        .with_color(status_color(status)),
                );
            }
            if !failures.is_empty() {
                let times: Vec<f64> = failures.iter().map(|j| j.t_retrieved).collect();
                series.push(
                    Series::labeled("failed", centers.clone(), grid.histogram(&times))
                        .with_color("red"),
                );
            }
            self.renderer.chart(
                &ChartSpec::new("all-jobs", "Jobs")
                    .styles(vec![ChartStyle::time_histogram()])
                    .series(series),
            )?;
        }

        if successes.is_empty() {
            return Ok(());
        }

        // Remaining work units, seeded with the backlog at window start.
        let completed_times: Vec<f64> = snapshot
            .completed_units
            .iter()
            .map(|u| u.t_retrieved)
            .collect();
        let seed = (snapshot.total_units - snapshot.units_done_before) as f64;
        self.renderer.chart(
            &ChartSpec::new("units-remaining", "Units remaining")
                .styles(vec![ChartStyle::time_lines()])
                .series(vec![Series::new(
                    centers.clone(),
                    derive::remaining(seed, &grid.histogram(&completed_times)),
                )]),
        )?;

        // Output rate and cumulative output.
        let retrieved: Vec<f64> = successes.iter().map(|j| j.t_retrieved).collect();
        let gib = 1024.0_f64.powi(3);
        let rate_scale = 3600.0 / (grid.bucket_width() * gib);
        let rate_weights: Vec<f64> = successes
            .iter()
            .map(|j| j.bytes_output * rate_scale)
            .collect();
        self.renderer.chart(
            &ChartSpec::new("output", "Output (GB/h)")
                .styles(vec![ChartStyle::time_histogram()])
                .series(vec![Series::new(
                    centers.clone(),
                    grid.weighted_histogram(&retrieved, &rate_weights),
                )]),
        )?;

        let size_weights: Vec<f64> = successes.iter().map(|j| j.bytes_output / gib).collect();
        self.renderer.chart(
            &ChartSpec::new("output-total", "Output (GB)")
                .styles(vec![ChartStyle::time_lines()])
                .series(vec![Series::new(
                    centers.clone(),
                    derive::cumulative(&grid.weighted_histogram(&retrieved, &size_weights)),
                )]),
        )?;

        // CPU/wall efficiency. Job CPU accounting has no sub-interval
        // resolution, so the CPU curve is the overlap-weighted
        // reconstruction over each job's processing span.
        let ts = samples.timestamps();
        let tasks_running = samples.column("tasks_running").unwrap_or_default();
        let wall = grid.integrate_gauge(&ts, &tasks_running);

        let mut cpu = vec![0.0; grid.len()];
        for job in successes.iter() {
            grid.attribute_span(
                &mut cpu,
                job.t_first_event,
                job.t_processing_end,
                job.cpu_seconds,
            );
        }

        self.renderer.chart(
            &ChartSpec::new("cpu-wall", "CPU / Wall")
                .styles(vec![ChartStyle::time_histogram()])
                .series(vec![Series::new(centers.clone(), derive::ratio(&cpu, &wall))]),
        )?;

        self.renderer.chart(
            &ChartSpec::new("cpu-wall-int", "Integrated CPU / Wall")
                .styles(vec![ChartStyle::time_histogram()])
                .series(vec![Series::new(
                    centers.clone(),
                    derive::cumulative_ratio(&cpu, &wall),
                )]),
        )?;

        self.detail_pie(successes, failures)?;
        self.phase_charts(successes)?;

        Ok(())
    }

    /// The detailed thirteen-phase breakdown of total campaign time.
    fn detail_pie(&self, successes: &[SuccessJob], failures: &[FailedJob]) -> Result<()> {
        self.renderer.pie(&PieSpec::from_breakdown(
            "time-detail-pie",
            derive::proportions(vec![
                ("Eviction", lost_time(successes, failures)),
                ("Failed", failures.iter().map(|j| j.allput).sum()),
                (
                    "Stage-in",
                    phase_sum(successes, |j| j.t_stagein_end - j.t_stagein_start),
                ),
                (
                    "Startup",
                    phase_sum(successes, |j| j.t_wrapper_start - j.t_stagein_end),
                ),
                (
                    "Wrapper setup",
                    phase_sum(successes, |j| j.t_wrapper_ready - j.t_wrapper_start),
                ),
                (
                    "Runtime setup",
                    phase_sum(successes, |j| j.t_file_request - j.t_wrapper_ready),
                ),
                (
                    "File request",
                    phase_sum(successes, |j| j.t_file_open - j.t_file_request),
                ),
                (
                    "Task setup",
                    phase_sum(successes, |j| j.t_first_event - j.t_file_open),
                ),
                (
                    "Processing CPU",
                    successes.iter().map(|j| j.cpu_seconds).sum(),
                ),
                (
                    "Processing other",
                    phase_sum(successes, |j| {
                        j.t_processing_end - j.t_first_event - j.cpu_seconds
                    }),
                ),
                (
                    "Stage-out report",
                    phase_sum(successes, |j| j.t_report_end - j.t_processing_end),
                ),
                (
                    "Stage-out wait",
                    phase_sum(successes, |j| j.t_stageout_start - j.t_report_end),
                ),
                (
                    "Stage-out",
                    phase_sum(successes, |j| j.t_stageout_end - j.t_stageout_start),
                ),
            ]),
            Some(pie_colors(&[
                "crimson",
                "red",
                "dodgerblue",
                "cornflowerblue",
                "royalblue",
                "mediumslateblue",
                "darkorchid",
                "mediumpurple",
                "forestgreen",
                "green",
                "powderblue",
                "skyblue",
                "darkturquoise",
            ])),
        ))
    }

    /// One duration chart per pipeline phase, minutes per job.
    fn phase_charts(&self, successes: &[SuccessJob]) -> Result<()> {
        let starts: Vec<f64> = successes.iter().map(|j| j.t_wrapper_start).collect();
        let ends: Vec<f64> = successes.iter().map(|j| j.t_processing_end).collect();

        for phase in PHASE_CHARTS {
            let x = match phase.axis {
                PhaseAxis::Start => starts.clone(),
                PhaseAxis::End => ends.clone(),
            };
            let y: Vec<f64> = successes.iter().map(|j| (phase.seconds)(j) / 60.0).collect();

            let mut series = Series::new(x, y);
            if let Some(color) = phase.color {
                series = series.with_color(color);
            }

            self.renderer
                .chart(&ChartSpec::new(phase.stem, phase.label).series(vec![series]))?;
        }

        Ok(())
    }

    fn failed_section(&self, grid: &BucketGrid, failures: &[FailedJob]) -> Result<()> {
        let groups = derive::split_by_key(
            failures,
            |j| j.exit_code,
            Some(FAILURE_FOLD_THRESHOLD),
        );

        self.renderer.pie(&PieSpec::from_breakdown(
            "failed-pie",
            derive::proportions(
                groups
                    .iter()
                    .map(|(category, jobs)| (category.to_string(), jobs.len() as f64))
                    .collect(),
            ),
            None,
        ))?;

        let centers = grid.centers();
        let series = groups
            .into_iter()
            .map(|(category, jobs)| {
                let times: Vec<f64> = jobs.iter().map(|j| j.t_retrieved).collect();
                Series::labeled(category.to_string(), centers.clone(), grid.histogram(&times))
            })
            .collect();

        self.renderer.chart(
            &ChartSpec::new("failed-jobs", "Failed jobs")
                .styles(vec![ChartStyle::time_histogram()])
                .series(series),
        )
    }

    /// Write per-dataset processed-unit JSON artifacts and copy published
    /// manifests when the dataset has one.
    fn write_processed_units(
        &self,
        snapshot: &CampaignSnapshot,
    ) -> Result<Vec<(String, Vec<DatasetArtifact>)>> {
        let mut out = Vec::new();

        for (label, units) in &snapshot.processed_units {
            let jsondir = self.outdir.join("jsons").join(label);
            std::fs::create_dir_all(&jsondir)
                .with_context(|| format!("creating {}", jsondir.display()))?;

            let ranges = unit_ranges(units);
            let path = jsondir.join("processed.json");
            let data = serde_json::to_vec_pretty(&ranges).context("serializing unit ranges")?;
            std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;

            let mut artifacts = vec![DatasetArtifact {
                path: format!("jsons/{label}/processed.json"),
                kind: "processed".to_string(),
            }];

            let published = self.cfg.workdir.join(label).join("published.json");
            if published.is_file() {
                std::fs::copy(&published, jsondir.join("published.json"))
                    .with_context(|| format!("copying {}", published.display()))?;
                artifacts.push(DatasetArtifact {
                    path: format!("jsons/{label}/published.json"),
                    kind: "published".to_string(),
                });
            }

            out.push((label.clone(), artifacts));
        }

        Ok(out)
    }
}

/// Worker time lost to eviction: total minus productive time, over both
/// success-class and failed records.
fn lost_time(successes: &[SuccessJob], failures: &[FailedJob]) -> f64 {
    let lost_good: f64 = successes.iter().map(|j| j.allput - j.goodput).sum();
    let lost_bad: f64 = failures.iter().map(|j| j.allput - j.goodput).sum();
    lost_good + lost_bad
}

fn phase_sum(successes: &[SuccessJob], phase: fn(&SuccessJob) -> f64) -> f64 {
    successes.iter().map(phase).sum()
}

fn pie_colors(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

const fn status_color(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Successful => "green",
        JobStatus::Incomplete => "cyan",
        JobStatus::Published => "blue",
        _ => "gray",
    }
}

/// Which timestamp a phase chart uses for its x axis.
enum PhaseAxis {
    Start,
    End,
}

struct PhaseChart {
    stem: &'static str,
    label: &'static str,
    color: Option<&'static str>,
    axis: PhaseAxis,
    seconds: fn(&SuccessJob) -> f64,
}

const PHASE_CHARTS: &[PhaseChart] = &[
    PhaseChart {
        stem: "eviction",
        label: "Lost runtime (m)",
        color: Some("crimson"),
        axis: PhaseAxis::End,
        seconds: |j| j.allput - j.goodput,
    },
    PhaseChart {
        stem: "runtime",
        label: "Runtime (m)",
        color: None,
        axis: PhaseAxis::End,
        seconds: |j| j.t_processing_end - j.t_wrapper_start,
    },
    PhaseChart {
        stem: "stage-in",
        label: "Stage-in (m)",
        color: Some("dodgerblue"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_stagein_end - j.t_stagein_start,
    },
    PhaseChart {
        stem: "startup",
        label: "Startup (m)",
        color: Some("cornflowerblue"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_wrapper_start - j.t_stagein_end,
    },
    PhaseChart {
        stem: "setup-wrapper",
        label: "Wrapper setup (m)",
        color: Some("royalblue"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_wrapper_ready - j.t_wrapper_start,
    },
    PhaseChart {
        stem: "setup-runtime",
        label: "Runtime setup (m)",
        color: Some("mediumslateblue"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_file_request - j.t_wrapper_ready,
    },
    PhaseChart {
        stem: "file-open",
        label: "File request (m)",
        color: Some("darkorchid"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_file_open - j.t_file_request,
    },
    PhaseChart {
        stem: "setup-task",
        label: "Task setup (m)",
        color: Some("mediumblue"),
        axis: PhaseAxis::Start,
        seconds: |j| j.t_first_event - j.t_file_open,
    },
    PhaseChart {
        stem: "overhead",
        label: "Overhead (m)",
        color: None,
        axis: PhaseAxis::End,
        seconds: |j| j.t_first_event - j.t_wrapper_start,
    },
    PhaseChart {
        stem: "processing-cpu",
        label: "Processing CPU (m)",
        color: Some("forestgreen"),
        axis: PhaseAxis::End,
        seconds: |j| j.cpu_seconds,
    },
    PhaseChart {
        stem: "processing-non-cpu",
        label: "Non-CPU processing (m)",
        color: Some("green"),
        axis: PhaseAxis::End,
        seconds: |j| j.t_processing_end - j.t_first_event - j.cpu_seconds,
    },
    PhaseChart {
        stem: "processing",
        label: "Processing total (m)",
        color: Some("mediumseagreen"),
        axis: PhaseAxis::End,
        seconds: |j| j.t_processing_end - j.t_first_event,
    },
    PhaseChart {
        stem: "stage-out-report",
        label: "Stage-out report (m)",
        color: Some("powderblue"),
        axis: PhaseAxis::End,
        seconds: |j| j.t_report_end - j.t_processing_end,
    },
    PhaseChart {
        stem: "stage-out-wait",
        label: "Stage-out wait (m)",
        color: Some("skyblue"),
        axis: PhaseAxis::End,
        seconds: |j| j.t_stageout_start - j.t_report_end,
    },
    PhaseChart {
        stem: "stage-out",
        label: "Stage-out (m)",
        color: Some("darkturquoise"),
        axis: PhaseAxis::End,
        seconds: |j| j.t_stageout_end - j.t_stageout_start,
    },
];

/// Compact sorted (run, unit) coordinates into per-run inclusive ranges.
fn unit_ranges(units: &[(i64, i64)]) -> BTreeMap<String, Vec<(i64, i64)>> {
    let mut by_run: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for &(run, unit) in units {
        by_run.entry(run).or_default().push(unit);
    }

    let mut ranges = BTreeMap::new();
    for (run, mut units) in by_run {
        units.sort_unstable();
        units.dedup();

        let mut run_ranges: Vec<(i64, i64)> = Vec::new();
        for unit in units {
            match run_ranges.last_mut() {
                Some((_, end)) if *end + 1 == unit => *end = unit,
                _ => run_ranges.push((unit, unit)),
            }
        }

        ranges.insert(run.to_string(), run_ranges);
    }

    ranges
}
