use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use regcolor::{x86_64, AllocatorConfig};

/// Allocates registers for a textual machine-IR module.
#[derive(Parser)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    src: PathBuf,
    /// Write the allocated module here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Prefer callee-saved registers.
    #[arg(long)]
    callee_saved_first: bool,
    /// Keep every spill slot separate.
    #[arg(long)]
    no_frame_merge: bool,
    /// Never move a definition instead of spilling it.
    #[arg(long)]
    no_sink: bool,
    #[arg(long, value_name = "N", default_value_t = 2)]
    sink_min_spill_count: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = AllocatorConfig::new()
        .use_caller_saved_first(!args.callee_saved_first)
        .merge_spilled_frames(!args.no_frame_merge)
        .sink_enabled(!args.no_sink)
        .sink_min_spill_count(args.sink_min_spill_count);

    let filepath = args.src;
    let file = File::open(filepath.as_path())
        .with_context(|| format!("failed to open file {}", filepath.display()))?;

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    regcolor::allocate(file, output, x86_64::registers(), config)
        .with_context(|| format!("failed to allocate {}", filepath.display()))?;
    Ok(())
}
