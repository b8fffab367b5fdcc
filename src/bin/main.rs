use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stampede::{run_batch, BatchOptions, Fixture};

#[derive(Parser)]
#[command(about = "Run a state-test fixture and emit one trace document per instance")]
struct Args {
    /// Path to the JSON fixture
    fixture: PathBuf,

    /// Directory for per-instance trace documents (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Per-instance instruction budget
    #[arg(long)]
    steps: Option<u64>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let fixture = Fixture::load(&args.fixture)?;
    let world = Arc::new(fixture.world()?);
    let messages = fixture.messages()?;

    let outcomes = run_batch(
        world,
        messages,
        BatchOptions {
            step_budget: args.steps,
        },
    );

    let mut failed = false;
    for (index, outcome) in outcomes.iter().enumerate() {
        let document = outcome.trace.render();
        let json = if args.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        match &args.out {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                std::fs::write(dir.join(format!("trace-{index}.json")), json)?;
            }
            None => println!("{json}"),
        }
        if outcome.error.is_fatal() {
            eprintln!(
                "instance {index}: error_code {} after {} steps",
                outcome.error.as_u8(),
                outcome.trace.len()
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
