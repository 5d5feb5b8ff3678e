use anyhow::{Context, Result};
use clap::Parser;
use fezrando::output::write_config;
use fezrando::randomize::randomize;
use fezrando_game::GameData;
use log::info;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser)]
struct Args {
    /// Random seed. A fresh seed is derived from the clock and printed
    /// when omitted.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "data/level_info.json")]
    level_data: PathBuf,

    #[arg(long, default_value = "config.txt")]
    output: PathBuf,
}

fn derive_seed() -> Result<u64> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_nanos();
    let digest = crypto_hash::digest(crypto_hash::Algorithm::SHA256, &nanos.to_be_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Ok(u64::from_le_bytes(bytes))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let seed = match args.seed {
        Some(seed) => seed,
        None => {
            let seed = derive_seed()?;
            println!("Using seed: {seed}");
            seed
        }
    };

    let game_data = GameData::load(&args.level_data)?;
    let randomization = randomize(&game_data, seed)?;
    write_config(&args.output, &randomization.transitions, &game_data)?;
    info!(
        "wrote {} transitions to {}",
        randomization.transitions.len(),
        args.output.display()
    );
    println!("Done.");
    Ok(())
}
