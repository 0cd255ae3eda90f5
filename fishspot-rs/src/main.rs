use clap::{Parser, Subcommand};
use fishspot_rs::{batch, count, detect, logging};
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "fishspot", about = "fishspot CLI: detect, count, batch")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Detect(detect::DetectArgs),
    Count(count::CountArgs),
    Batch(batch::BatchArgs),
}

fn progress(prog: f64, msg: &str) {
    let _ = writeln!(
        io::stderr(),
        "{}",
        serde_json::json!({"progress": prog, "message": msg})
    );
    let _ = io::stderr().flush();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => detect::run(args, progress)?,
        Commands::Count(args) => count::run(args, progress)?,
        Commands::Batch(args) => batch::run(args, progress)?,
    }
    Ok(())
}
