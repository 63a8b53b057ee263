//! Prepflow CLI: replay and inspect data-preparation recipes.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "prepflow",
    version,
    about = "Data-preparation recipes: content-addressed steps, linear undo/redo, grid replay"
)]
struct Cli {
    /// Log progress (info level) unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: prepflow::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = prepflow::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
