//! Command implementations.

mod asm;
mod inspect;

use std::fs;
use std::path::Path;

use crate::cli::{Cli, Commands};

/// Dispatch the CLI command to its handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Asm(args) => asm::cmd_asm(args),
        Commands::Verify { inputs } => inspect::cmd_verify(inputs),
        Commands::Info { template, layout } => inspect::cmd_info(template, layout),
        Commands::Extract { input, output } => inspect::cmd_extract(input, output),
    }
}

/// Symbol names from a file, one per line; blank lines and `#` comments
/// are skipped.
fn read_symbol_names(path: Option<&Path>) -> std::io::Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    Ok(parse_symbol_names(&fs::read_to_string(path)?))
}

fn parse_symbol_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
