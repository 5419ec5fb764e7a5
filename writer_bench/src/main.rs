use std::error::Error;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use clap::{self, Parser};
use log::{info, warn};
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use ipcbuffer::{pool, PoolConfig, SegmentConfig, View};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "ipcbuffer-bench.toml")]
    config: String,
    /// Keep the segment alive until a line arrives on stdin or the process
    /// is interrupted.
    #[clap(long)]
    hold: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
struct BenchConfig {
    pool: PoolConfig,
    segment: SegmentConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;
    pool::configure(cfg.pool)?;

    let key = cfg.segment.key()?;
    let view = View::open(cfg.segment.length, &key)?;
    if !view.segment().is_owner() {
        warn!("{} already existed; overwriting it", key);
    }
    run(&view)?;

    let mut stdout = io::stdout();
    writeln!(stdout, "ready")?;
    stdout.flush()?;

    if opts.hold {
        hold()?;
    }
    drop(view);
    info!("released {}", key);
    Ok(())
}

fn expected(i: usize, len: usize) -> u8 {
    ((len - i) & 0xff) as u8
}

fn run(view: &View) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let len = view.len();
    for i in 0..len {
        view.set(i, expected(i, len))?;
    }
    let duration = start.elapsed();
    let rate = (len as f64) / duration.as_secs_f64().max(f64::EPSILON);
    eprintln!(
        "{:#?} MB written/s. Total time: {:#?}",
        (rate / 1_000_000f64) as u64,
        duration
    );
    Ok(())
}

// Either a line on stdin or SIGINT/SIGTERM ends the hold, so the view is
// dropped (and its region unlinked) on both paths.
fn hold() -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let on_signal = tx.clone();
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            let _ = on_signal.send(format!("signal {}", signal));
        }
    });
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        let _ = tx.send("stdin".to_string());
    });

    let reason = rx.recv()?;
    info!("hold ended by {}", reason);
    Ok(())
}
