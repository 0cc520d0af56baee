mod config;
mod error;
mod machine;
mod savestate;

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use crate::error::HostError;
use crate::machine::Machine;

#[derive(Parser)]
#[command(name = "lockstep", about = "Run the demo machine without a window")]
struct Args {
    /// Path to the host config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Write a save state after the last frame
    #[arg(long)]
    save: Option<PathBuf>,

    /// Load a save state before running
    #[arg(long)]
    load: Option<PathBuf>,

    /// Power on without the real-time clock
    #[arg(long)]
    no_rtc: bool,

    /// Print every thread's clock after each frame
    #[arg(long)]
    dump_clocks: bool,

    /// Write the effective config back to the config file
    #[arg(long)]
    write_config: bool,
}

fn run(args: &Args) -> Result<(), HostError> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    if args.no_rtc {
        cfg.machine.rtc = false;
    }
    if args.write_config {
        config::save_to_file(&config_path, &cfg).map_err(|source| HostError::Io {
            path: config_path.clone(),
            source,
        })?;
        info!("Wrote config to {}", config_path.display());
    }

    let machine = Machine::new(&cfg)?;

    if let Some(path) = &args.load {
        let file = savestate::read(path)?;
        machine.load_snapshot(&file)?;
        info!("Loaded save state from {}", path.display());
    }

    for frame in 0..args.frames {
        machine.run_frame()?;
        if args.dump_clocks {
            let clocks: Vec<String> = machine
                .clocks()
                .into_iter()
                .map(|(name, clock)| format!("{name}={clock}"))
                .collect();
            println!("[{frame}] {}", clocks.join(" "));
        }
    }

    if let Some(path) = &args.save {
        let file = machine.snapshot()?;
        savestate::write(path, &file)?;
        info!("Saved state to {}", path.display());
    }

    let regs = machine.registers();
    println!(
        "frames={} instructions={} interrupts={} samples={} rtc={}s+{}",
        regs.frames,
        regs.instructions,
        regs.interrupts,
        regs.samples,
        regs.rtc_seconds,
        regs.rtc_ticks
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("{e}");
        eprintln!("lockstep: {e}");
        std::process::exit(1);
    }
}
