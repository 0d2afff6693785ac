use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use slotgate::{DispatcherConfig, Facility, WorkDispatcher};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Workload {
    tasks: usize,
    concurrency: Option<usize>,
    work_ms: u64,
    fail_every: usize,
    facility: Facility,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            tasks: 16,
            concurrency: None,
            work_ms: 10,
            fail_every: 0,
            facility: Facility::SharedPool,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    tasks: usize,
    concurrency: usize,
    facility: Facility,
    peak_in_use: usize,
    failures: usize,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_failure: Option<String>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let workload = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: slotgate-bench [--tasks <n>] [--concurrency <n>] [--work-ms <ms>] [--fail-every <k>] [--facility pool|thread]"
            );
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --tasks <n>          Number of tasks to submit [default: 16]");
            eprintln!("  --concurrency <n>    Slots, 1-64 [default: 2x logical cores]");
            eprintln!("  --work-ms <ms>       Time each task spends working [default: 10]");
            eprintln!("  --fail-every <k>     Every k-th task fails, 0 = never [default: 0]");
            eprintln!("  --facility <kind>    pool or thread [default: pool]");
            process::exit(2);
        }
    };

    init_tracing();

    match run(&workload) {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: JSON serialization failed: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

/// RUST_LOG wins; otherwise SLOTGATE_LOG picks the level for our crates.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SLOTGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("slotgate={level},slotgate_cli={level}"))
    };

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Workload, String> {
    let mut workload = Workload::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--tasks" | "--concurrency" | "--work-ms" | "--fail-every" | "--facility" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| format!("{flag} requires a value"))?;
                match flag {
                    "--tasks" => workload.tasks = parse_number(flag, value)?,
                    "--concurrency" => workload.concurrency = Some(parse_number(flag, value)?),
                    "--work-ms" => workload.work_ms = parse_number(flag, value)?,
                    "--fail-every" => workload.fail_every = parse_number(flag, value)?,
                    _ => workload.facility = value.parse()?,
                }
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(workload)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got '{value}'"))
}

fn run(workload: &Workload) -> anyhow::Result<Report> {
    let mut config = DispatcherConfig::from_env()
        .context("reading SLOTGATE_* environment")?
        .with_facility(workload.facility);
    if let Some(n) = workload.concurrency {
        config = config.with_max_concurrency(n);
    }

    let dispatcher = WorkDispatcher::from_config(config)?;
    info!(
        tasks = workload.tasks,
        capacity = dispatcher.capacity(),
        facility = %dispatcher.facility(),
        "Starting workload"
    );

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let work = Duration::from_millis(workload.work_ms);
    let start = Instant::now();

    for n in 1..=workload.tasks {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let fails = workload.fail_every != 0 && n % workload.fail_every == 0;

        dispatcher.submit_named(
            format!("task-{n}"),
            move |n: usize| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(work);
                running.fetch_sub(1, Ordering::SeqCst);
                if fails {
                    anyhow::bail!("synthetic failure in task {n}");
                }
                Ok(())
            },
            n,
        )?;
        debug!(n, "Submitted");
    }

    // Failures are counted before the drain clears them.
    loop {
        let snapshot = dispatcher.snapshot()?;
        if snapshot.is_idle() {
            break;
        }
        debug!(
            in_use = snapshot.in_use,
            pending_failures = snapshot.pending_failures,
            "Waiting for workload to drain"
        );
        std::thread::sleep(DRAIN_POLL);
    }
    let failures = dispatcher.exceptions().len();

    let first_failure = match dispatcher.drain() {
        Ok(()) => None,
        Err(slotgate::Error::WorkerFailure(failure)) => {
            warn!(failures, first = %failure, "Workload finished with failures");
            Some(failure.to_string())
        }
        Err(e) => return Err(e.into()),
    };
    let elapsed = start.elapsed();
    info!(elapsed = ?elapsed, failures, "Workload drained");

    Ok(Report {
        tasks: workload.tasks,
        concurrency: dispatcher.capacity(),
        facility: dispatcher.facility(),
        peak_in_use: peak.load(Ordering::SeqCst),
        failures,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        first_failure,
    })
}
