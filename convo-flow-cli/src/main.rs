use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use convo_flow_core::{
    FlowError, parse, read_document, read_groups, render_context_tree_markdown,
    render_flat_list_markdown,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CONVO_FLOW_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum View {
    /// Active path only
    Flat,
    /// Every branch, as an outline
    Tree,
    /// Normalized message map (requires --raw)
    Map,
}

#[derive(Debug, Parser)]
#[command(
    name = "convo-flow",
    version,
    about = "Rebuild the active path and branch tree of a chat message dump"
)]
struct Cli {
    /// JSON dump: an array of messages, or an object with `messages` and `messageGroups`
    input: PathBuf,

    /// JSON array of message group metadata, merged after groups found in the dump
    #[arg(long)]
    groups: Option<PathBuf>,

    /// Which part of the parse result to print
    #[arg(long, value_enum, default_value_t = View::Flat)]
    view: View,

    /// Output raw JSON instead of markdown
    #[arg(long)]
    raw: bool,

    /// Log engine decisions at debug level unless a log filter is set
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> convo_flow_core::Result<()> {
    if cli.view == View::Map && !cli.raw {
        return Err(FlowError::InvalidMode(
            "--view map can only be printed with --raw".to_string(),
        ));
    }

    let mut input = read_document(&cli.input)?;
    if let Some(path) = &cli.groups {
        input.message_groups.extend(read_groups(path)?);
    }

    let result = parse(&input.messages, &input.message_groups);

    let output = match (cli.view, cli.raw) {
        (View::Flat, true) => result.flat_list_json()?,
        (View::Flat, false) => render_flat_list_markdown(&result),
        (View::Tree, true) => result.context_tree_json()?,
        (View::Tree, false) => render_context_tree_markdown(&result),
        (View::Map, _) => result.message_map_json()?,
    };
    print!("{output}");

    Ok(())
}
