use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use transit_common::ProductType;

mod commands;
mod formatters;

use commands::Options;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "transit")]
#[command(about = "Transit card tool - select, read and personalize ticketing cards")]
#[command(version)]
struct Args {
    /// Use a simulated card instead of a PC/SC reader
    #[arg(long, value_enum, global = true)]
    simulate: Option<ProductArg>,

    /// Reader to connect to (default: first available)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Configuration file (default: $TRANSIT_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected PC/SC readers
    Readers,
    /// Identify the card in the reader's field
    Select,
    /// Read environment, contracts, counters and event
    Read {
        /// Output format mode
        #[arg(short, long, value_enum, default_value_t = FormatMode::Human)]
        format: FormatMode,
    },
    /// Personalize a blank card
    Init,
    /// Remote selection flow
    #[command(subcommand)]
    Scenario(ScenarioCommand),
}

#[derive(Subcommand)]
enum ScenarioCommand {
    /// Write the selection scenario as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play an exported scenario against the card and record its answers
    Capture {
        scenario: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Identify a card from a captured selection
    Resolve { captured: PathBuf },
}

/// Product of the simulated card
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProductArg {
    CalypsoBasic,
    CalypsoLight,
    CalypsoPrime,
    Classic1k,
    Ultralight,
    Srt512,
}

impl From<ProductArg> for ProductType {
    fn from(product: ProductArg) -> Self {
        match product {
            ProductArg::CalypsoBasic => ProductType::CalypsoBasic,
            ProductArg::CalypsoLight => ProductType::CalypsoLight,
            ProductArg::CalypsoPrime => ProductType::CalypsoPrime,
            ProductArg::Classic1k => ProductType::MifareClassic1k,
            ProductArg::Ultralight => ProductType::MifareUltralight,
            ProductArg::Srt512 => ProductType::St25Srt512,
        }
    }
}

fn main() {
    // Set RUST_LOG=debug to log every APDU exchange
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let options = Options {
        simulate: args.simulate.map(ProductType::from),
        reader: args.reader,
        config: args.config,
    };

    match args.command {
        Command::Readers => commands::readers::cmd_readers(),
        Command::Select => commands::select::cmd_select(&options),
        Command::Read { format } => commands::read::cmd_read(&options, format),
        Command::Init => commands::init::cmd_init(&options),
        Command::Scenario(ScenarioCommand::Export { output }) => {
            commands::scenario::cmd_export(&options, output.as_deref())
        }
        Command::Scenario(ScenarioCommand::Capture { scenario, output }) => {
            commands::scenario::cmd_capture(&options, &scenario, output.as_deref())
        }
        Command::Scenario(ScenarioCommand::Resolve { captured }) => {
            commands::scenario::cmd_resolve(&options, &captured)
        }
    }
}
