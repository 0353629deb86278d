//! vstream streamer - paced frame sender
//!
//! Emits frames at a fixed rate to one client, honouring its PAUSE/RESUME
//! and retransmit requests.

use clap::Parser;
use crossbeam::channel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use vstream::io::{Runtime, StreamSocket};
use vstream::protocol::Streamer;
use vstream_cli::{display_streamer_summary, format_streamer_line, init_logging, Config};

#[derive(Parser, Debug)]
#[command(name = "vstream-streamer")]
#[command(about = "Paced frame streamer", long_about = None)]
struct Args {
    /// Client address
    #[arg(short, long, required_unless_present = "print_example")]
    remote: Option<SocketAddr>,

    /// Local bind address
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Packets per frame
    #[arg(long)]
    packets_per_frame: Option<u32>,

    /// Payload bytes per packet
    #[arg(long)]
    payload_size: Option<usize>,

    /// Drop this fraction of received control packets
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
    let mut section = file.streamer_or_default();
    if let Some(fps) = args.fps {
        section.fps = fps;
    }
    if let Some(ppf) = args.packets_per_frame {
        section.packets_per_frame = ppf;
    }
    if let Some(size) = args.payload_size {
        section.payload_size = size;
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
    let socket = StreamSocket::bind(args.bind)?;
    tracing::info!(
        local = %socket.local_addr()?,
        %remote,
        fps = config.fps,
        packets_per_frame = config.packets_per_frame,
        "vstream streamer starting"
    );

    let streamer = Streamer::new(config, remote)?;
    let (stop_tx, stop_rx) = channel::bounded::<()>(1);
    let mut runtime = Runtime::new(streamer, socket, stop_rx);
    let handle = runtime.endpoint();
    let started = Instant::now();

    // Statistics thread
    let stats_interval = section.stats_interval();
    if !stats_interval.is_zero() {
        let handle = handle.clone();
        thread::spawn(move || loop {
            thread::sleep(stats_interval);
            let streamer = handle.lock();
            tracing::info!(
                "{}",
                format_streamer_line(streamer.stats(), streamer.is_paused(), started.elapsed())
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

    let streamer = handle.lock();
    display_streamer_summary(streamer.stats(), &runtime.stats(), started.elapsed());
    result?;
    Ok(())
}
