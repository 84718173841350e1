use std::fs;
use std::path::PathBuf;

use clap::Parser;
use synchrotron::sim::top::{SynchrotronConfig, SynchrotronTop};

#[derive(Parser)]
#[command(version, about)]
struct SynchrotronArgs {
    /// TOML configuration file; built-in defaults apply when omitted.
    config_path: Option<PathBuf>,

    #[arg(long)]
    num_cores: Option<usize>,
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

pub fn main() {
    env_logger::init();
    let argv = SynchrotronArgs::parse();

    let mut config = match &argv.config_path {
        Some(path) => SynchrotronConfig::from_file(path),
        None => SynchrotronConfig::default(),
    };
    if let Some(num_cores) = argv.num_cores {
        config.mem.num_cores = num_cores;
    }
    if let Some(timeout) = argv.timeout {
        config.sim.timeout = timeout;
    }

    let mut top = SynchrotronTop::new(&config);
    let summary = top.run();
    let json = summary.to_json();

    let out = argv
        .summary_json
        .or_else(|| config.sim.summary_json.as_ref().map(PathBuf::from));
    match out {
        Some(path) => fs::write(&path, json).expect("cannot write summary file"),
        None => println!("{json}"),
    }
}
