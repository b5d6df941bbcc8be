use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::RetrievalConfig;
use crate::derive::{split_by_key, Category};
use crate::store::FailedJob;

/// One retrieved failure sample. `job` is None for the synthetic
/// placeholder entries that pad a class to the fixed slot count.
#[derive(Debug, Clone)]
pub struct FailureSample {
    pub job: Option<i64>,
    /// Artifact names (decompressed) that were actually retrieved.
    pub artifacts: Vec<String>,
}

impl FailureSample {
    fn placeholder() -> Self {
        Self {
            job: None,
            artifacts: Vec::new(),
        }
    }
}

/// Retrieved failure logs for one error class.
#[derive(Debug, Clone)]
pub struct ErrorClassLogs {
    pub exit_code: i64,
    /// Total failing jobs in the class, not just the sampled ones.
    pub failures: usize,
    /// Exactly `sample_count` entries, padded with placeholders.
    pub samples: Vec<FailureSample>,
}

/// Deterministic failure directory for a job id, probed across the
/// campaign's dataset labels.
pub fn job_failure_dir(workdir: &Path, labels: &[String], id: i64) -> Option<PathBuf> {
    labels
        .iter()
        .map(|label| {
            workdir
                .join(label)
                .join("failed")
                .join(format!("{:04}", id / 1000))
                .join(format!("{:04}", id % 1000))
        })
        .find(|dir| dir.is_dir())
}

/// Copy and decompress sampled failure artifacts for every error class.
///
/// Work items run on a bounded worker pool; results are collected after
/// the pool drains. Missing source artifacts are skipped silently, and a
/// decompression failure only removes that artifact from its job's list.
pub async fn retrieve_failure_logs(
    workdir: &Path,
    outdir: &Path,
    labels: &[String],
    failed: &[FailedJob],
    cfg: &RetrievalConfig,
) -> Result<Vec<ErrorClassLogs>> {
    let logdir = outdir.join("logs");
    std::fs::create_dir_all(&logdir)
        .with_context(|| format!("creating log directory {}", logdir.display()))?;

    let mut classes = Vec::new();
    let mut work = Vec::new();

    for (code, mut jobs) in split_by_key(failed, |job| job.exit_code, None) {
        let exit_code = match code {
            Category::Value(code) => code,
            Category::Other => continue,
        };

        info!(exit_code, jobs = jobs.len(), "sampling failure logs");

        // Most recently retrieved failures first.
        jobs.sort_by(|a, b| a.t_retrieved.total_cmp(&b.t_retrieved));

        let class_idx = classes.len();
        let mut samples = Vec::with_capacity(cfg.sample_count);

        for job in jobs.iter().rev().take(cfg.sample_count) {
            let sample_idx = samples.len();
            let mut artifacts = Vec::new();

            if let Some(source_dir) = job_failure_dir(workdir, labels, job.id) {
                let target_dir = logdir.join(job.id.to_string());
                if target_dir.exists() {
                    std::fs::remove_dir_all(&target_dir).with_context(|| {
                        format!("removing stale log copy {}", target_dir.display())
                    })?;
                }
                std::fs::create_dir_all(&target_dir)
                    .with_context(|| format!("creating {}", target_dir.display()))?;

                for name in &cfg.artifacts {
                    let source = source_dir.join(name);
                    if !source.is_file() {
                        // Not every job produces every artifact.
                        continue;
                    }

                    let unpacked = name.strip_suffix(".gz").unwrap_or(name).to_string();
                    let target = target_dir.join(&unpacked);
                    artifacts.push(unpacked.clone());
                    work.push((class_idx, sample_idx, unpacked, source, target));
                }
            }

            samples.push(FailureSample {
                job: Some(job.id),
                artifacts,
            });
        }

        classes.push(ErrorClassLogs {
            exit_code,
            failures: jobs.len(),
            samples,
        });
    }

    // Dispatch decompression to the bounded pool and join it completely
    // before touching the results.
    let semaphore = Arc::new(Semaphore::new(cfg.workers));
    let mut pool: JoinSet<(usize, usize, String, bool)> = JoinSet::new();

    for (class_idx, sample_idx, name, source, target) in work {
        let semaphore = Arc::clone(&semaphore);
        pool.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (class_idx, sample_idx, name, false),
            };

            let unpacked = tokio::task::spawn_blocking(move || unpack(&source, &target))
                .await
                .unwrap_or(false);

            (class_idx, sample_idx, name, unpacked)
        });
    }

    while let Some(joined) = pool.join_next().await {
        let Ok((class_idx, sample_idx, name, ok)) = joined else {
            continue;
        };

        if !ok {
            let sample = &mut classes[class_idx].samples[sample_idx];
            sample.artifacts.retain(|a| a != &name);
        }
    }

    // Downstream rendering assumes a fixed slot count per class.
    for class in &mut classes {
        while class.samples.len() < cfg.sample_count {
            class.samples.push(FailureSample::placeholder());
        }
    }

    Ok(classes)
}

/// Gunzip `source` into `target`. Returns false on any I/O or decode
/// error so the caller can drop the artifact.
fn unpack(source: &Path, target: &Path) -> bool {
    let result = (|| -> io::Result<u64> {
        let input = File::open(source)?;
        let mut decoder = GzDecoder::new(input);
        let mut output = File::create(target)?;
        io::copy(&mut decoder, &mut output)
    })();

    match result {
        Ok(bytes) => {
            info!(source = %source.display(), bytes, "unpacked failure artifact");
            true
        }
        Err(e) => {
            warn!(source = %source.display(), error = %e, "cannot unpack failure artifact");
            false
        }
    }
}
