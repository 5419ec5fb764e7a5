use std::error::Error;
use std::time::Instant;

use clap::Parser;
use log::debug;
use serde_derive::{Deserialize, Serialize};

use ipcbuffer::{pool, Encoding, PoolConfig, SegmentConfig, View};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "ipcbuffer-bench.toml")]
    config: String,
    /// Bytes compared per slice.
    #[clap(long, default_value = "4096")]
    chunk: usize,
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
    if view.segment().is_owner() {
        return Err(format!("nothing was holding {}; start the writer first", key).into());
    }
    run(&view, opts.chunk.max(1))?;
    Ok(())
}

fn expected(i: usize, len: usize) -> u8 {
    ((len - i) & 0xff) as u8
}

fn run(view: &View, chunk: usize) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let len = view.len();
    let mut offset = 0;
    while offset < len {
        let end = (offset + chunk).min(len);
        let bytes = view.slice(offset..end)?.to_vec();
        for (i, byte) in bytes.iter().enumerate() {
            let at = offset + i;
            if *byte != expected(at, len) {
                return Err(format!(
                    "mismatch at byte {}: got {}, expected {}",
                    at,
                    byte,
                    expected(at, len)
                )
                .into());
            }
        }
        offset = end;
    }
    let duration = start.elapsed();
    let rate = (len as f64) / duration.as_secs_f64().max(f64::EPSILON);
    debug!("head {:?}", view.slice(..len.min(8))?);
    println!(
        "verified {} bytes ({})",
        len,
        view.decode(Encoding::Base64, ..len.min(6))?
    );
    eprintln!(
        "{:#?} MB read/s. Total time: {:#?}",
        (rate / 1_000_000f64) as u64,
        duration
    );
    Ok(())
}
