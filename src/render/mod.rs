use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use serde::Serialize;

use crate::artifacts::ErrorClassLogs;
use crate::derive::Breakdown;
use crate::store::DatasetSummary;

/// How a chart series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Stacked histogram of the bucketed values.
    Histogram,
    /// Connected line per series.
    Lines,
    /// Per-bucket mean with spread, the profile view of a scatter.
    Profile,
}

/// One rendering of a chart: a kind plus the x-axis interpretation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChartStyle {
    pub kind: ChartKind,
    /// X values are epoch seconds and should be drawn as dates.
    pub time_axis: bool,
}

impl ChartStyle {
    pub const fn time_lines() -> Self {
        Self {
            kind: ChartKind::Lines,
            time_axis: true,
        }
    }

    pub const fn time_histogram() -> Self {
        Self {
            kind: ChartKind::Histogram,
            time_axis: true,
        }
    }

    pub const fn histogram() -> Self {
        Self {
            kind: ChartKind::Histogram,
            time_axis: false,
        }
    }

    pub const fn time_profile() -> Self {
        Self {
            kind: ChartKind::Profile,
            time_axis: true,
        }
    }
}

/// A named (x, y) series.
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub label: Option<String>,
    pub color: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Series {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            label: None,
            color: None,
            x,
            y,
        }
    }

    pub fn labeled(label: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            label: Some(label.into()),
            color: None,
            x,
            y,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// A complete chart request for the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSpec {
    /// Output name stem, e.g. "cpu-wall".
    pub stem: String,
    /// Label of the value axis.
    pub axis_label: String,
    /// Label of the count axis for non-time histograms.
    pub y_label: String,
    pub styles: Vec<ChartStyle>,
    pub series: Vec<Series>,
    pub ymax: Option<f64>,
}

impl ChartSpec {
    pub fn new(stem: impl Into<String>, axis_label: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            axis_label: axis_label.into(),
            y_label: "Jobs".to_string(),
            styles: vec![ChartStyle::histogram(), ChartStyle::time_profile()],
            series: Vec::new(),
            ymax: None,
        }
    }

    pub fn styles(mut self, styles: Vec<ChartStyle>) -> Self {
        self.styles = styles;
        self
    }

    pub fn series(mut self, series: Vec<Series>) -> Self {
        self.series = series;
        self
    }

    pub fn ymax(mut self, ymax: f64) -> Self {
        self.ymax = Some(ymax);
        self
    }
}

/// A proportion chart request for the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct PieSpec {
    pub stem: String,
    pub labels: Vec<String>,
    /// Already clamped to non-negative by the caller.
    pub values: Vec<f64>,
    pub colors: Option<Vec<String>>,
    /// Slice labels belong in a secondary legend, not inline.
    pub detached_legend: bool,
}

impl PieSpec {
    pub fn from_breakdown(
        stem: impl Into<String>,
        breakdown: Breakdown,
        colors: Option<Vec<String>>,
    ) -> Self {
        Self {
            stem: stem.into(),
            labels: breakdown.labels,
            values: breakdown.values,
            colors,
            detached_legend: breakdown.detached_legend,
        }
    }
}

/// A per-dataset artifact link shown on the dashboard.
#[derive(Debug, Clone)]
pub struct DatasetArtifact {
    /// Path relative to the dashboard directory.
    pub path: String,
    /// "processed" or "published".
    pub kind: String,
}

/// Template context for the HTML index.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub id: String,
    pub generated_at: i64,
    pub window: (f64, f64),
    pub campaign: (f64, f64),
    pub summary: Vec<DatasetSummary>,
    pub dataset_artifacts: Vec<(String, Vec<DatasetArtifact>)>,
    pub failure_logs: Vec<ErrorClassLogs>,
    pub foremen: Vec<String>,
    pub good_jobs: bool,
    pub bad_jobs: bool,
}

/// Rendering backend consumed by the report cycle.
pub trait Renderer: Send + Sync {
    /// Render one chart.
    fn chart(&self, spec: &ChartSpec) -> Result<()>;

    /// Render one proportion chart.
    fn pie(&self, spec: &PieSpec) -> Result<()>;

    /// Render the HTML index.
    fn page(&self, ctx: &PageContext) -> Result<()>;
}

// --- Shipped data renderer ---

/// Renderer writing chart data as JSON artifacts next to the HTML index,
/// leaving image generation to an external charting front end.
#[derive(Debug, Clone)]
pub struct DataRenderer {
    outdir: PathBuf,
}

impl DataRenderer {
    pub fn new(outdir: &Path) -> Result<Self> {
        std::fs::create_dir_all(outdir)
            .with_context(|| format!("creating dashboard directory {}", outdir.display()))?;

        Ok(Self {
            outdir: outdir.to_path_buf(),
        })
    }

    fn write_json<T: Serialize>(&self, stem: &str, value: &T) -> Result<()> {
        let path = self.outdir.join(format!("{stem}.json"));
        let data = serde_json::to_vec_pretty(value).context("serializing chart data")?;
        std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
    }
}

impl Renderer for DataRenderer {
    fn chart(&self, spec: &ChartSpec) -> Result<()> {
        self.write_json(&spec.stem, spec)
    }

    fn pie(&self, spec: &PieSpec) -> Result<()> {
        self.write_json(&spec.stem, spec)
    }

    fn page(&self, ctx: &PageContext) -> Result<()> {
        let html = IndexTemplate::from_context(ctx)
            .render()
            .context("rendering index template")?;

        let path = self.outdir.join("index.html");
        std::fs::write(&path, html).with_context(|| format!("writing {}", path.display()))
    }
}

// --- HTML index template ---

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    id: &'a str,
    generated_at: String,
    window_start: String,
    window_end: String,
    campaign_start: String,
    campaign_end: String,
    summary: &'a [DatasetSummary],
    datasets: Vec<DatasetView>,
    failures: Vec<FailureClassView>,
    foremen: &'a [String],
    good_jobs: bool,
    bad_jobs: bool,
}

struct DatasetView {
    label: String,
    artifacts: Vec<DatasetArtifact>,
}

struct FailureClassView {
    exit_code: i64,
    failures: usize,
    samples: Vec<SampleView>,
}

struct SampleView {
    job: Option<i64>,
    links: Vec<(String, String)>,
}

impl<'a> IndexTemplate<'a> {
    fn from_context(ctx: &'a PageContext) -> Self {
        let datasets = ctx
            .dataset_artifacts
            .iter()
            .map(|(label, artifacts)| DatasetView {
                label: label.clone(),
                artifacts: artifacts.clone(),
            })
            .collect();

        let failures = ctx
            .failure_logs
            .iter()
            .map(|class| FailureClassView {
                exit_code: class.exit_code,
                failures: class.failures,
                samples: class
                    .samples
                    .iter()
                    .map(|sample| SampleView {
                        job: sample.job,
                        links: sample
                            .artifacts
                            .iter()
                            .map(|name| {
                                let id = sample.job.unwrap_or_default();
                                (name.clone(), format!("logs/{id}/{name}"))
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            id: &ctx.id,
            generated_at: format_time(ctx.generated_at as f64),
            window_start: format_time(ctx.window.0),
            window_end: format_time(ctx.window.1),
            campaign_start: format_time(ctx.campaign.0),
            campaign_end: format_time(ctx.campaign.1),
            summary: &ctx.summary,
            datasets,
            failures,
            foremen: &ctx.foremen,
            good_jobs: ctx.good_jobs,
            bad_jobs: ctx.bad_jobs,
        }
    }
}

/// Human-readable timestamp for the dashboard.
fn format_time(epoch: f64) -> String {
    chrono::DateTime::from_timestamp(epoch as i64, 0)
        .map(|t| t.format("%a, %d %b %Y, %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FailureSample;

    fn sample_context() -> PageContext {
        PageContext {
            id: "run-2024".to_string(),
            generated_at: 1_700_000_000,
            window: (1_690_000_000.0, 1_700_000_000.0),
            campaign: (1_680_000_000.0, 1_700_000_000.0),
            summary: vec![DatasetSummary {
                label: "alpha".to_string(),
                events: 1000,
                events_read: 800,
                events_written: 750,
                units_total: 105,
                units: 100,
                units_done: 60,
                completion: "60.0 %".to_string(),
            }],
            dataset_artifacts: vec![(
                "alpha".to_string(),
                vec![DatasetArtifact {
                    path: "jsons/alpha/processed.json".to_string(),
                    kind: "processed".to_string(),
                }],
            )],
            failure_logs: vec![ErrorClassLogs {
                exit_code: 139,
                failures: 3,
                samples: vec![
                    FailureSample {
                        job: Some(42),
                        artifacts: vec!["task.log".to_string()],
                    },
                    FailureSample {
                        job: None,
                        artifacts: Vec::new(),
                    },
                ],
            }],
            foremen: vec!["foreman-east".to_string()],
            good_jobs: true,
            bad_jobs: true,
        }
    }

    #[test]
    fn test_index_template_renders() {
        let ctx = sample_context();
        let html = IndexTemplate::from_context(&ctx).render().expect("renders");

        assert!(html.contains("run-2024"));
        assert!(html.contains("alpha"));
        assert!(html.contains("60.0 %"));
        assert!(html.contains("logs/42/task.log"));
        assert!(html.contains("Exit code 139"));
        assert!(html.contains("foreman-east"));
    }

    #[test]
    fn test_data_renderer_writes_artifacts() {
        let outdir = tempfile::tempdir().expect("tempdir");
        let renderer = DataRenderer::new(outdir.path()).expect("renderer");

        let spec = ChartSpec::new("workers", "Workers")
            .styles(vec![ChartStyle::time_lines()])
            .series(vec![Series::labeled(
                "busy",
                vec![1.0, 2.0],
                vec![10.0, 12.0],
            )]);
        renderer.chart(&spec).expect("chart");

        let pie = PieSpec::from_breakdown(
            "failed-pie",
            crate::derive::proportions(vec![("0", 5.0)]),
            None,
        );
        renderer.pie(&pie).expect("pie");

        renderer.page(&sample_context()).expect("page");

        let chart: serde_json::Value = serde_json::from_slice(
            &std::fs::read(outdir.path().join("workers.json")).expect("chart json"),
        )
        .expect("valid json");
        assert_eq!(chart["series"][0]["label"], "busy");

        assert!(outdir.path().join("failed-pie.json").exists());
        assert!(outdir.path().join("index.html").exists());
    }

    #[test]
    fn test_format_time() {
        // 2021-01-01 00:00:00 UTC.
        assert_eq!(format_time(1_609_459_200.0), "Fri, 01 Jan 2021, 00:00");
    }
}
