use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use ipcbuffer::{SegmentKey, View};
use tempfile::Builder;

const SEGMENT_LEN: usize = 1 << 20;

fn workspace_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/.."))
}

fn cargo_run(package: &str, config: &Path) -> Command {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut command = Command::new(cargo);
    command
        .current_dir(workspace_dir())
        .args(["run", "--release", "--quiet", "--package", package, "--", "--config"])
        .arg(config);
    command
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("Starting cross-process view check...");

    let temp_dir = Builder::new().prefix("ipcbuffer_integration").tempdir()?;
    let config_path = temp_dir.path().join("bench.toml");
    let name = format!("*ipcbuffer-integration-{}", std::process::id());
    let config_content = format!(
        "[pool]\n\
        pool_size = 8192\n\
        [segment]\n\
        key = \"{}\"\n\
        length = {}\n",
        name, SEGMENT_LEN
    );
    File::create(&config_path)?.write_all(config_content.as_bytes())?;
    println!("Config written to {}", config_path.display());

    let mut writer = cargo_run("writer_bench", &config_path)
        .arg("--hold")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    let stdout = writer.stdout.take().ok_or("writer stdout not captured")?;
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = lines
            .next()
            .ok_or("writer_bench exited before filling the segment")??;
        if line.trim() == "ready" {
            break;
        }
    }
    println!("[Writer] segment filled and held");

    // This process is a third party to the same region.
    let key: SegmentKey = name.parse()?;
    let view = View::open(SEGMENT_LEN, &key)?;
    for i in [0, 1, 255, 256, SEGMENT_LEN - 1] {
        let expected = ((SEGMENT_LEN - i) & 0xff) as u8;
        if view.get(i)? != expected {
            return Err(format!("byte {} is {}, expected {}", i, view.get(i)?, expected).into());
        }
    }
    drop(view);
    println!("[Main] spot checks match");

    let reader = cargo_run("reader_bench", &config_path).output()?;
    println!("reader_bench stdout:\n{}", String::from_utf8_lossy(&reader.stdout));
    println!("reader_bench stderr:\n{}", String::from_utf8_lossy(&reader.stderr));
    if !reader.status.success() {
        return Err(format!("reader_bench failed with status: {}", reader.status).into());
    }

    writer
        .stdin
        .take()
        .ok_or("writer stdin not captured")?
        .write_all(b"\n")?;
    let status = writer.wait()?;
    if !status.success() {
        return Err(format!("writer_bench failed with status: {}", status).into());
    }
    println!("[Writer] released");

    // Once the creator is gone the name is free again: a reader now finds
    // nothing to verify.
    let after = cargo_run("reader_bench", &config_path).output()?;
    if after.status.success() {
        return Err("reader_bench still found the segment after the writer exited".into());
    }

    println!("\nCross-process check successful.");
    Ok(())
}
