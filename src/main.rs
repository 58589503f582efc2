use clap::Parser;
use inference_gateway::cli::{run, Cli};

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("inference_gateway: {e:#}");
        std::process::exit(1);
    }
}
