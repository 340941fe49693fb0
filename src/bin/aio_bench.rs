//! Queue-depth driver for the overlapped IO engine
//!
//! Usage: aio-bench [--depth N] [--count N] [--block-size B] [--read] <path>
//!
//! Exit codes:
//!   0 - All operations completed without error
//!   1 - One or more operations reported an error
//!   2 - Engine or target setup failed

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use overlapped_aio::io::{
    AccessPattern, AlignedBuffer, Direction, Engine, EngineConfig, EngineResult, IoRequest,
    Submitted, TargetOptions,
};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive the overlapped IO engine at a fixed queue depth")]
struct Cli {
    /// Target file
    path: PathBuf,

    /// Requests kept in flight
    #[arg(long, default_value_t = 4)]
    depth: usize,

    /// Total operations to issue
    #[arg(long, default_value_t = 256)]
    count: usize,

    /// Bytes per operation
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Read instead of write (target must already hold the data)
    #[arg(long)]
    read: bool,

    /// Bypass the OS page cache
    #[arg(long)]
    direct: bool,

    /// Issue operations sequentially rather than striding randomly
    #[arg(long)]
    sequential: bool,
}

struct Stats {
    completed: usize,
    errors: usize,
    bytes: u64,
}

impl Stats {
    fn record(&mut self, req: &IoRequest) {
        self.completed += 1;
        self.bytes += req.transferred() as u64;
        if req.error() != 0 {
            self.errors += 1;
            tracing::warn!(
                request = req.index(),
                offset = req.offset(),
                error = req.error(),
                resid = req.resid(),
                "operation failed"
            );
        }
    }
}

fn offset_for(op: usize, cli: &Cli) -> u64 {
    let slot = if cli.sequential {
        op
    } else {
        // Prime stride scatters offsets across the file
        (op * 7919) % cli.count
    };
    (slot * cli.block_size) as u64
}

fn run(cli: &Cli) -> EngineResult<Stats> {
    let mut engine = Engine::init(EngineConfig::new().with_queue_depth(cli.depth))?;

    let pattern = if cli.sequential {
        AccessPattern::Sequential
    } else {
        AccessPattern::Random
    };
    let opts = if cli.read {
        TargetOptions::read_only()
    } else {
        TargetOptions::new()
    }
    .with_direct(cli.direct)
    .with_pattern(pattern);

    let target = engine.open_target(&cli.path, &opts)?;
    let direction = if cli.read {
        Direction::Read
    } else {
        Direction::Write
    };

    let mut free = Vec::with_capacity(cli.depth);
    for index in 0..cli.depth {
        let mut req = IoRequest::new(index, AlignedBuffer::filled(cli.block_size, index as u8)?);
        engine.control_block_init(&mut req)?;
        free.push(req);
    }

    let mut busy: Vec<IoRequest> = Vec::with_capacity(cli.depth);
    let mut stats = Stats {
        completed: 0,
        errors: 0,
        bytes: 0,
    };
    let mut issued = 0;
    let start = Instant::now();

    while stats.completed < cli.count {
        while issued < cli.count {
            let Some(mut req) = free.pop() else { break };
            req.prepare(direction, offset_for(issued, cli), cli.block_size)?;
            issued += 1;
            match engine.submit(&target, &mut req)? {
                Submitted::Queued => busy.push(req),
                Submitted::Completed | Submitted::Failed => {
                    stats.record(&req);
                    free.push(req);
                }
            }
        }

        if busy.is_empty() {
            continue;
        }

        let max = busy.len();
        engine.harvest(&mut busy, 1, max, None)?;
        let done: HashSet<usize> = engine.events().iter().copied().collect();
        let (finished, pending): (Vec<_>, Vec<_>) =
            busy.drain(..).partition(|req| done.contains(&req.index()));
        busy = pending;
        for req in finished {
            stats.record(&req);
            free.push(req);
        }
    }

    let elapsed = start.elapsed();
    let mib = stats.bytes as f64 / (1024.0 * 1024.0);
    tracing::info!(
        operations = stats.completed,
        errors = stats.errors,
        mib,
        seconds = elapsed.as_secs_f64(),
        mib_per_sec = mib / elapsed.as_secs_f64().max(f64::EPSILON),
        "run finished"
    );

    engine.stop_target(&target);
    engine.close_target(target)?;
    for req in free.iter_mut() {
        engine.control_block_free(req)?;
    }
    engine.cleanup();
    Ok(stats)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.depth == 0 || cli.count == 0 || cli.block_size == 0 {
        eprintln!("ERROR: --depth, --count and --block-size must be non-zero");
        std::process::exit(2);
    }

    match run(&cli) {
        Ok(stats) => {
            eprintln!(
                "{} operations, {} errors, {} bytes",
                stats.completed, stats.errors, stats.bytes
            );
            std::process::exit(if stats.errors == 0 { 0 } else { 1 });
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(2);
        }
    }
}
