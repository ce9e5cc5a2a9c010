use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use logtrap_core::{
    CaptureContext, Config, LogAggregator, MemoryAggregator, PersistentAggregator, Severity,
};

#[derive(Parser)]
#[command(name = "logtrap", about = "logtrap — in-process log capture and triage")]
struct Cli {
    /// Write debug diagnostics to /tmp/logtrap-debug.log (tail -f to inspect).
    #[arg(long)]
    debug: bool,
    /// How long to run the demo producers, in seconds.
    #[arg(long, default_value_t = 3)]
    run_for: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("/tmp/logtrap-debug.log")?;
        tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
        tracing::info!("logtrap debug log started — tail -f /tmp/logtrap-debug.log");
    }

    let config = Config::load()?;
    let ctx = CaptureContext::init(config);
    ctx.interceptor().start_intercepting();
    ctx.interceptor().hook_panics();

    let raw = MemoryAggregator::raw(&ctx);
    let collapsing = MemoryAggregator::collapsing(&ctx);
    let smart = MemoryAggregator::smart(&ctx);
    let persistent = PersistentAggregator::new(&ctx);
    let aggregators: [&dyn LogAggregator; 4] = [&raw, &collapsing, &smart, &persistent];
    for aggregator in aggregators {
        aggregator.start_capture();
    }

    // A few producer threads standing in for a noisy host application.
    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for worker_id in 0..3u32 {
        let stop = stop.clone();
        workers.push(std::thread::spawn(move || {
            let mut tick = 0u64;
            while !stop.load(Ordering::Relaxed) {
                match tick % 5 {
                    0 => log::warn!("worker {worker_id}: queue depth climbing"),
                    1 => log::error!("worker {worker_id}: upstream refused connection"),
                    _ => log::info!("worker {worker_id}: heartbeat"),
                }
                tick += 1;
                std::thread::sleep(Duration::from_millis(25));
            }
        }));
    }

    // Stand-in for the external timer collaborators: drain background
    // events and flush disk buffers on an interval.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.run_for);
    let mut interval = tokio::time::interval(Duration::from_millis(200));
    while tokio::time::Instant::now() < deadline {
        interval.tick().await;
        ctx.interceptor().drain_background();
        persistent.flush_buffered();
    }

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
    ctx.interceptor().drain_background();

    for (name, aggregator) in [
        ("raw", &raw),
        ("collapsing", &collapsing),
        ("smart", &smart),
    ] {
        aggregator.stop_capture();
        println!(
            "{name:>10}: {} records (info {}, warning {}, error {}, exception {})",
            aggregator.records().len(),
            aggregator.severity_count(Severity::Info),
            aggregator.severity_count(Severity::Warning),
            aggregator.severity_count(Severity::Error),
            aggregator.severity_count(Severity::Exception),
        );
    }
    persistent.stop_capture();
    ctx.interceptor().stop_intercepting();

    Ok(())
}
