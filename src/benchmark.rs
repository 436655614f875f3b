//! Throughput benchmark
//!
//! Pushes `jobs` hashing work items through a real worker pool. Every
//! completion reports its digest back into the engine through
//! `make_callback` and then deletes its own work item, which exercises the
//! full create / queue / complete / close cycle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::Config;
use crate::context::CallbackOutcome;
use crate::engine::{BasicEngine, Val, TYPE_ERROR};
use crate::env::Env;
use crate::scheduler::RequestState;
use crate::work::{AsyncWork, CompleteCallback, ExecuteCallback};

pub struct BenchmarkParams {
    pub jobs: usize,
    pub compute_iterations: usize,
    pub payload_size: usize,
    /// Cancel every Nth job right after queueing it
    pub cancel_every: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub worker_threads: usize,
    pub jobs: usize,
    /// Completion callbacks run, cancelled jobs included
    pub completed: usize,
    /// Jobs whose digest reached the recorder
    pub hashed: usize,
    pub cancelled: usize,
    pub rejected: usize,
    pub throughput: f64,
    /// SHA-256 over all reported digests, in job order
    pub checksum: String,
}

struct HashJob {
    seed: u64,
    iterations: usize,
    payload_size: usize,
    digest: Option<[u8; 32]>,
}

pub fn run_benchmark(config: &Config, params: &BenchmarkParams) -> Result<BenchmarkReport> {
    validate_params(params)?;

    let mut env = Env::new(BasicEngine::new(), &config.pool)?;

    // Digests reported by completions, indexed by seed
    let digests: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(vec![None; params.jobs]));
    let record = register_recorder(&mut env, digests.clone());
    let completions = Rc::new(Cell::new(0));

    let start_time = Utc::now();
    let started = Instant::now();
    let mut cancelled = 0;
    let mut rejected = 0;

    for seed in 0..params.jobs {
        let work = create_job(&mut env, &record, &completions, seed as u64, params)?;

        if env.queue_async_work(work).is_err() {
            // Pool is full: let the loop catch up, then retry once
            debug!(seed, "Worker pool saturated, draining");
            env.run();
            if let Err(err) = env.queue_async_work(work) {
                debug!(seed, %err, "Job rejected");
                env.delete_async_work(work)?;
                rejected += 1;
                continue;
            }
        }

        if let Some(every) = params.cancel_every {
            if seed % every == every - 1 {
                env.cancel_async_work(work)?;
                cancelled += 1;
            }
        }
    }

    env.run();

    let end_time = Utc::now();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    if env.live_work_items() != 0 {
        return Err(anyhow!(
            "{} work items still allocated after the loop went idle",
            env.live_work_items()
        ));
    }

    let digests = digests.borrow();
    let completed = completions.get();
    let hashed = digests.iter().flatten().count();
    let mut hasher = Sha256::new();
    for digest in digests.iter().flatten() {
        hasher.update(digest.as_bytes());
    }
    let checksum = to_hex(&hasher.finalize());

    let throughput = if duration_ms > 0.0 {
        completed as f64 / (duration_ms / 1000.0)
    } else {
        0.0
    };

    info!(completed, hashed, cancelled, rejected, duration_ms, "Benchmark finished");

    Ok(BenchmarkReport {
        start_time,
        end_time,
        duration_ms,
        worker_threads: config.pool.worker_threads,
        jobs: params.jobs,
        completed,
        hashed,
        cancelled,
        rejected,
        throughput,
        checksum,
    })
}

fn validate_params(params: &BenchmarkParams) -> Result<()> {
    if params.jobs == 0 {
        return Err(anyhow!("Must specify at least 1 job"));
    }

    if params.cancel_every == Some(0) {
        return Err(anyhow!("--cancel-every must be at least 1"));
    }

    Ok(())
}

/// Native function completions call to hand their digest to the engine
fn register_recorder(env: &mut Env<BasicEngine>, digests: Rc<RefCell<Vec<Option<String>>>>) -> Val {
    env.engine_mut().register_function(move |_, _, args| match args {
        [Val::Num(seed), Val::Str(digest)] => {
            let mut digests = digests.borrow_mut();
            match digests.get_mut(*seed as usize) {
                Some(slot) => {
                    *slot = Some(digest.clone());
                    Ok(Val::Null)
                }
                None => Err(Val::error(TYPE_ERROR, "seed out of range")),
            }
        }
        _ => Err(Val::error(TYPE_ERROR, "expected (seed, digest)")),
    })
}

fn create_job(
    env: &mut Env<BasicEngine>,
    record: &Val,
    completions: &Rc<Cell<usize>>,
    seed: u64,
    params: &BenchmarkParams,
) -> Result<AsyncWork> {
    let handle: Rc<Cell<Option<AsyncWork>>> = Rc::new(Cell::new(None));

    let execute: ExecuteCallback<HashJob> = Box::new(|job| {
        job.digest = Some(compute(job.seed, job.iterations, job.payload_size));
    });

    let record = record.clone();
    let own = handle.clone();
    let completions = completions.clone();
    let complete: CompleteCallback<BasicEngine, HashJob> = Box::new(move |env, _status, job| {
        completions.set(completions.get() + 1);

        // Cancelled before a worker picked it up: nothing to report
        if let Some(digest) = job.digest {
            let context = env.async_init(None, Some(Val::Str("relay.bench".to_string())));
            let args = [Val::Num(job.seed as f64), Val::Str(to_hex(&digest))];
            match env.make_callback(context, &Val::Null, &record, &args) {
                CallbackOutcome::Returned { context, .. } => env.async_destroy(context),
                CallbackOutcome::Threw => {
                    let exception = env.take_exception();
                    debug!(seed = job.seed, ?exception, "Recorder threw");
                }
            }
        }

        let Some(work) = own.get() else {
            return;
        };
        // Cancelled jobs are already closing and get freed after this callback
        if env.work_state(work) != Some(RequestState::Closing) {
            if let Err(err) = env.delete_async_work(work) {
                debug!(seed = job.seed, %err, "Delete from completion failed");
            }
        }
    });

    let job = HashJob {
        seed,
        iterations: params.compute_iterations,
        payload_size: params.payload_size,
        digest: None,
    };

    let work = env.create_async_work(
        None,
        Some(Val::Str("relay.bench".to_string())),
        Some(execute),
        Some(complete),
        job,
    )?;
    handle.set(Some(work));
    Ok(work)
}

/// Iterated SHA-256 over the seed, padded with `payload_size` zero bytes per round
fn compute(seed: u64, iterations: usize, payload_size: usize) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::digest(seed.to_le_bytes()).into();
    let padding = vec![0u8; payload_size];

    for _ in 0..iterations {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(&padding);
        digest = hasher.finalize().into();
    }

    digest
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn display_report(report: &BenchmarkReport) {
    println!("\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 Benchmark Results");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("⏱️  Duration: {:.2}ms", report.duration_ms);
    println!("   Started: {}", report.start_time);
    println!("   Finished: {}", report.end_time);
    println!();
    println!("📋 Work:");
    println!("   Worker threads: {}", report.worker_threads);
    println!("   Jobs: {}", report.jobs);
    println!("   Completed: {}", report.completed);
    println!("   Hashed: {}", report.hashed);
    println!("   Cancelled: {}", report.cancelled);
    println!("   Rejected: {}", report.rejected);
    println!();
    println!("🚀 Throughput: {:.1} jobs/sec", report.throughput);
    println!("🔑 Checksum: {}", report.checksum);
    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(jobs: usize) -> BenchmarkParams {
        BenchmarkParams {
            jobs,
            compute_iterations: 10,
            payload_size: 16,
            cancel_every: None,
        }
    }

    fn small_config() -> Config {
        let mut config = Config::builder().build().unwrap();
        config.pool.worker_threads = 2;
        config
    }

    #[test]
    fn test_compute_is_deterministic() {
        assert_eq!(compute(7, 5, 0), compute(7, 5, 0));
        assert_ne!(compute(7, 5, 0), compute(8, 5, 0));
        assert_ne!(compute(7, 5, 0), compute(7, 5, 1));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn test_validate_rejects_zero_jobs() {
        assert!(validate_params(&params(0)).is_err());

        let mut cancel_zero = params(4);
        cancel_zero.cancel_every = Some(0);
        assert!(validate_params(&cancel_zero).is_err());
    }

    #[test]
    fn test_benchmark_completes_every_job() {
        let config = small_config();

        let first = run_benchmark(&config, &params(16)).unwrap();
        let second = run_benchmark(&config, &params(16)).unwrap();

        assert_eq!(first.completed, 16);
        assert_eq!(first.hashed, 16);
        assert_eq!(first.cancelled, 0);
        assert_eq!(first.rejected, 0);
        // Digests are keyed by seed, so completion order does not matter
        assert_eq!(first.checksum, second.checksum);
    }

    #[test]
    fn test_benchmark_with_cancellation() {
        let config = small_config();
        let mut params = params(12);
        params.cancel_every = Some(3);

        let report = run_benchmark(&config, &params).unwrap();

        // Cancelled jobs still run their completion; only those a worker
        // reached before the cancel have a digest to report
        assert_eq!(report.cancelled, 4);
        assert_eq!(report.completed, 12);
        assert!((8..=12).contains(&report.hashed));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = run_benchmark(&small_config(), &params(2)).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["jobs"], 2);
        assert_eq!(json["completed"], 2);
        assert_eq!(json["checksum"].as_str().map(str::len), Some(64));
    }
}
