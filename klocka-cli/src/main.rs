//! ## klocka-cli
//! **Scenario runner and fuzzer front end**
//!
//! `klocka simulate` replays a YAML scenario on a fresh virtual clock and
//! prints its state hash; `klocka fuzz` runs seeded generated scenarios and
//! fails on the first nondeterministic or invariant-breaking run.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli)
}
