//! `foxyblox-client-sim`: synthetic load generator that repeatedly stores
//! and retrieves random files, reporting per-operation latency. Useful for
//! exercising the striping engine's concurrency under load without a real
//! client population.

use std::io::{Seek, SeekFrom, Write};
use std::time::Instant;

use clap::Parser;
use rand::RngCore;
use tracing_subscriber::EnvFilter;

use foxyblox::config::Config;
use foxyblox::System;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "config.txt")]
    config: String,
    /// Number of save+get cycles to run.
    #[arg(long, default_value_t = 20)]
    cycles: u32,
    /// Size in bytes of each synthetic file.
    #[arg(long, default_value_t = 4096)]
    file_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::load_or_create(&args.config)?;
    config.init_local_dirs()?;
    let system = System::open(&config)?;

    let mut rng = rand::thread_rng();
    let mut save_total = std::time::Duration::ZERO;
    let mut get_total = std::time::Duration::ZERO;

    for i in 0..args.cycles {
        let filename = format!("sim-{i}.bin");
        let mut payload = vec![0u8; args.file_size];
        rng.fill_bytes(&mut payload);

        let mut src = tempfile::tempfile()?;
        src.write_all(&payload)?;
        src.seek(SeekFrom::Start(0))?;

        let t0 = Instant::now();
        system.add("sim-user", &filename, src)?;
        save_total += t0.elapsed();

        let dest = std::env::temp_dir().join(format!("foxyblox-sim-{i}.out"));
        let t1 = Instant::now();
        system.get("sim-user", &filename, &dest)?;
        get_total += t1.elapsed();

        std::fs::remove_file(&dest).ok();
        tracing::info!(cycle = i, "cycle complete");
    }

    let n = args.cycles.max(1) as u32;
    println!("avg save latency: {:?}", save_total / n);
    println!("avg get latency:  {:?}", get_total / n);
    Ok(())
}
