use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use npy_records::{convert_all, RecordLayout, DEFAULT_DATASET, HEADER_SIZE, RECORD_COUNT};

/// Copy the first images of npy datasets into headerless `.bin` files.
#[derive(Parser)]
#[command(author, version, long_about = None)]
struct Cli {
    /// npy files to convert, one after another; `cat.npy` becomes `cat1000.bin` next to it
    #[arg(value_name = "DATASET", default_value = DEFAULT_DATASET)]
    datasets: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();
    let layout = RecordLayout::DEFAULT;

    log::debug!(
        "extracting {} records of {}x{} after a {} byte header",
        RECORD_COUNT,
        layout.width,
        layout.height,
        HEADER_SIZE
    );

    convert_all(&args.datasets, &layout).context("stopped converting datasets")?;

    Ok(())
}
