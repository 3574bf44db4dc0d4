use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use distributed_ranges::containers::DistributedVector;
use distributed_ranges::{Result, Runtime, ThreadGroup, copy, dot_product};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Dot product of two random vectors distributed over ranks and devices.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Number of elements.
    #[arg(short, default_value_t = 1_000_000)]
    n: usize,

    /// Number of timed iterations.
    #[arg(short, default_value_t = 10)]
    iterations: usize,

    /// Number of ranks, each running on its own thread.
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Devices per rank.
    #[arg(long, default_value_t = 2)]
    devices: usize,

    /// Worker threads per device.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Seed of the input vectors.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write a debug log per rank to `dr.<rank>.log` in the working directory.
    #[arg(long)]
    log: bool,
}

/// What rank 0 reports after the run.
struct Report {
    result: f64,
    reference: f64,
    durations: Vec<Duration>,
}

fn run(rt: &Runtime, args: &Args) -> Result<Option<Report>> {
    for rank in 0..rt.size() {
        if rank == rt.rank() {
            println!(
                "rank {} of {} on {}: {} devices x {} threads",
                rt.rank(),
                rt.size(),
                rt.node_name(),
                rt.devices().len(),
                rt.config().threads_per_device
            );
        }
        rt.barrier()?;
    }

    let root = 0;
    let (a, b) = if rt.rank() == root {
        let mut rng = StdRng::seed_from_u64(args.seed);
        let a: Vec<f64> = (0..args.n).map(|_| rng.random()).collect();
        let b: Vec<f64> = (0..args.n).map(|_| rng.random()).collect();
        (a, b)
    } else {
        (Vec::new(), Vec::new())
    };

    let mut x = DistributedVector::<f64>::new(rt, args.n)?;
    let mut y = DistributedVector::<f64>::new(rt, args.n)?;
    copy(rt, root, &a, &mut x)?;
    copy(rt, root, &b, &mut y)?;
    log::info!("rank {}: inputs distributed", rt.rank());

    let mut result = 0.0;
    let mut durations = Vec::with_capacity(args.iterations);
    for i in 0..args.iterations {
        rt.barrier()?;
        let start = Instant::now();
        result = dot_product(rt, &x, &y)?;
        let elapsed = start.elapsed();
        log::debug!("rank {}: iteration {i} took {elapsed:?}", rt.rank());
        durations.push(elapsed);
    }

    if rt.rank() != root {
        return Ok(None);
    }
    let reference = a.iter().zip(&b).map(|(a, b)| a * b).sum();
    Ok(Some(Report {
        result,
        reference,
        durations,
    }))
}

/// Sends every record to `dr.<rank>.log`, taking the rank from the name of
/// the emitting thread (`r<rank>`, `r<rank>d<device>-...`). Records of other
/// threads go to the file of rank 0.
struct RankFiles {
    writers: Vec<NonBlocking>,
}

impl<'a> MakeWriter<'a> for RankFiles {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        let rank = thread_rank().filter(|&rank| rank < self.writers.len());
        self.writers[rank.unwrap_or(0)].clone()
    }
}

fn thread_rank() -> Option<usize> {
    let current = std::thread::current();
    let digits = current.name()?.strip_prefix('r')?;
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

fn init_logging(args: &Args) -> Vec<WorkerGuard> {
    if args.log {
        let (writers, guards): (Vec<NonBlocking>, Vec<WorkerGuard>) = (0..args.ranks.max(1))
            .map(|rank| {
                let appender = tracing_appender::rolling::never(".", format!("dr.{rank}.log"));
                tracing_appender::non_blocking(appender)
            })
            .unzip();
        tracing_subscriber::fmt()
            .with_max_level(LevelFilter::DEBUG)
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(RankFiles { writers })
            .init();
        guards
    } else {
        tracing_subscriber::fmt()
            .with_max_level(LevelFilter::WARN)
            .init();
        Vec::new()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guards = init_logging(&args);

    let builder = Runtime::builder()
        .devices(args.devices)
        .threads_per_device(args.threads);

    let reports = match ThreadGroup::new(args.ranks).run(&builder, |rt| run(&rt, &args)) {
        Ok(reports) => reports,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut root_report = None;
    for report in reports {
        match report {
            Ok(Some(report)) => root_report = Some(report),
            Ok(None) => {}
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    let Some(mut report) = root_report else {
        eprintln!("error: rank 0 produced no report");
        return ExitCode::FAILURE;
    };

    let tolerance = 1e-4 * report.reference.abs().max(1.0);
    let error = (report.result - report.reference).abs();
    if error > tolerance {
        eprintln!(
            "mismatch: distributed {} vs sequential {} (error {error:e})",
            report.result, report.reference
        );
        return ExitCode::FAILURE;
    }

    if report.durations.is_empty() {
        println!("result {} (no timed iterations)", report.result);
        return ExitCode::SUCCESS;
    }
    report.durations.sort();
    let median = report.durations[report.durations.len() / 2];
    let bytes = 2 * args.n * size_of::<f64>();
    let bandwidth = bytes as f64 / median.as_secs_f64() / 1e9;
    println!(
        "n {} ranks {} devices {}: result {:.6} median {:?} bandwidth {:.2} GB/s",
        args.n, args.ranks, args.devices, report.result, median, bandwidth
    );
    ExitCode::SUCCESS
}
