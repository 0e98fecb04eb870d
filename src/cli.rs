use crate::{proto, supervisor};
use anyhow::Result;
use clap::Parser;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "judgebox", version, about = "Single-shot judging sandbox")]
struct Cli {
    /// Before judging, remove leftover scratch directories and cgroup
    /// children from crashed runs older than this many seconds
    #[arg(long, value_name = "SECS")]
    sweep_stale: Option<u64>,
}

pub fn run() -> Result<()> {
    // A broken response pipe must surface as a write error, not kill the
    // process mid-frame.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    env_logger::init();
    let cli = Cli::parse();
    let sweep_cutoff = cli.sweep_stale.map(Duration::from_secs);

    let outcome = {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut input = stdin.lock();
        let mut output = stdout.lock();
        supervisor::serve(&mut input, &mut output, sweep_cutoff)
    };

    if let Err(err) = outcome {
        log::error!("judging failed: {}", err);
        // Even a catastrophic failure produces one well-formed response.
        let result = supervisor::internal_error(&err.to_string());
        let stdout = io::stdout();
        let mut output = stdout.lock();
        let _ = proto::encode_result(&mut output, &result);
        let _ = output.flush();
        std::process::exit(1);
    }
    Ok(())
}
