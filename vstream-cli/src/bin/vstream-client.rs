//! vstream client - frame receiver with playout buffer
//!
//! Receives frames from a streamer, plays them out at a fixed rate and
//! reports underruns, gaps and flow-control activity.

use clap::{Parser, ValueEnum};
use crossbeam::channel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use vstream::io::{Runtime, RuntimeError, StreamSocket};
use vstream::protocol::Client;
use vstream_cli::config::PolicyName;
use vstream_cli::{display_client_summary, format_client_line, init_logging, Config};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Drop,
    Defer,
}

#[derive(Parser, Debug)]
#[command(name = "vstream-client")]
#[command(about = "Frame receiver with playout buffer", long_about = None)]
struct Args {
    /// Local address to receive on
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    /// Streamer address for control packets
    #[arg(short, long, required_unless_present = "print_example")]
    remote: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Playout buffer capacity in frames
    #[arg(long)]
    buffer_size: Option<u32>,

    /// Ready frames at which PAUSE is sent
    #[arg(long)]
    pause: Option<u32>,

    /// Ready frames at or below which RESUME is sent
    #[arg(long)]
    resume: Option<u32>,

    /// Packets per frame
    #[arg(long)]
    packets_per_frame: Option<u32>,

    /// Ready frames required before playout starts
    #[arg(long)]
    prebuffer: Option<u32>,

    /// Delay before the first playout check, in milliseconds
    #[arg(long)]
    start_delay_ms: Option<u64>,

    /// What to do with a complete frame when the buffer is full
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Drop this fraction of received data packets
    #[arg(long)]
    loss: Option<f64>,

    /// Seed for simulated loss
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_example {
        print!("{}", Config::example().to_toml()?);
        return Ok(());
    }

    init_logging(args.verbose);

    let remote = args
        .remote
        .ok_or_else(|| anyhow::anyhow!("--remote is required"))?;

    let file = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut section = file.client_or_default();
    if let Some(size) = args.buffer_size {
        section.buffer_size = size;
    }
    if let Some(pause) = args.pause {
        section.pause_threshold = pause;
    }
    if let Some(resume) = args.resume {
        section.resume_threshold = resume;
    }
    if let Some(ppf) = args.packets_per_frame {
        section.packets_per_frame = ppf;
    }
    if let Some(prebuffer) = args.prebuffer {
        section.prebuffer_threshold = prebuffer;
    }
    if let Some(ms) = args.start_delay_ms {
        section.consume_start_delay_ms = ms;
    }
    if let Some(policy) = args.policy {
        section.admission_policy = match policy {
            Policy::Drop => PolicyName::Drop,
            Policy::Defer => PolicyName::Defer,
        };
    }
    if let Some(rate) = args.loss {
        section.loss.enabled = true;
        section.loss.rate = rate;
    }
    if args.seed.is_some() {
        section.loss.seed = args.seed;
    }
    if let Some(secs) = args.stats {
        section.stats_interval_secs = secs;
    }

    let config = section.to_config()?;
    let socket = StreamSocket::bind(args.listen)?;
    tracing::info!(
        local = %socket.local_addr()?,
        %remote,
        buffer = config.buffer_size,
        pause = config.pause_threshold,
        resume = config.resume_threshold,
        "vstream client starting"
    );

    let client = Client::new(config, remote)?;
    let (stop_tx, stop_rx) = channel::bounded::<()>(1);
    let mut runtime = Runtime::new(client, socket, stop_rx);
    let handle = runtime.endpoint();
    let started = Instant::now();

    // Statistics thread
    let stats_interval = section.stats_interval();
    if !stats_interval.is_zero() {
        let handle = handle.clone();
        thread::spawn(move || loop {
            thread::sleep(stats_interval);
            let client = handle.lock();
            tracing::info!(
                "{}",
                format_client_line(client.stats(), client.ready_count(), started.elapsed())
            );
        });
    }

    // Without --duration the sender lives until main returns
    let _stop_tx = match args.duration {
        Some(secs) => {
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                let _ = stop_tx.send(());
            });
            None
        }
        None => Some(stop_tx),
    };

    let result = runtime.run();

    let client = handle.lock();
    display_client_summary(client.stats(), &runtime.stats(), started.elapsed());
    match result {
        Err(RuntimeError::Protocol(e)) => {
            tracing::error!(error = %e, phase = ?client.phase(), "client halted");
            Err(e.into())
        }
        other => Ok(other?),
    }
}
