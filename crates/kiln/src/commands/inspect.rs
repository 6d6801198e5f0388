//! Verify, info and extract commands.

use std::fs;
use std::path::{Path, PathBuf};

use kiln::{EmitConfig, Pipeline, RecordKind, extract_source, parse_records};
use rayon::prelude::*;
use tracing::{error, info};

use super::read_symbol_names;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, LayoutArgs};

/// Handle the `verify` command. Files are checked in parallel.
pub fn cmd_verify(inputs: &[PathBuf]) -> i32 {
    let results: Vec<(&PathBuf, Result<usize, String>)> = inputs
        .par_iter()
        .map(|path| (path, verify_file(path)))
        .collect();

    let mut failed = 0;
    for (path, result) in results {
        match result {
            Ok(records) => println!("{}: ok, {records} records", path.display()),
            Err(e) => {
                failed += 1;
                println!("{}: {e}", path.display());
            }
        }
    }
    if failed == 0 {
        EXIT_SUCCESS
    } else {
        error!(failed, total = inputs.len(), "verification failed");
        EXIT_FAILURE
    }
}

fn verify_file(path: &Path) -> Result<usize, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let records = parse_records(&text).map_err(|e| e.to_string())?;
    match records.last() {
        Some(r) if r.kind == RecordKind::Eof => Ok(records.len()),
        _ => Err("missing end-of-file record".to_string()),
    }
}

/// Handle the `info` command.
pub fn cmd_info(template: &Path, layout: &LayoutArgs) -> i32 {
    let run = || -> kiln::Result<()> {
        let text = fs::read_to_string(template)?;
        let names = read_symbol_names(layout.symbols.as_deref())?;
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let pipeline = Pipeline::new(EmitConfig::default()).with_image_config(layout.image_config());
        let builder = pipeline.open_template(&text, &names)?;

        println!("Records: {}", builder.record_count());
        println!("Jump table: {:#06x}", builder.jump_table_addr());
        println!(
            "Code start: {:#06x} (page {:#06x})",
            builder.code_start(),
            builder.code_start_padded()
        );
        if !names.is_empty() {
            println!("Symbols:");
            for (name, addr) in builder.symbols() {
                println!("  {name:<24} {addr:#06x}");
            }
        }
        Ok(())
    };
    match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!(error = %e, template = %template.display(), "cannot read template");
            EXIT_FAILURE
        }
    }
}

/// Handle the `extract` command.
pub fn cmd_extract(input: &Path, output: &Path) -> i32 {
    let run = || -> kiln::Result<Option<String>> {
        let text = fs::read_to_string(input)?;
        let bytes: Vec<u8> = parse_records(&text)?
            .into_iter()
            .filter(|r| r.kind == RecordKind::Data)
            .flat_map(|r| r.data)
            .collect();
        let Some((meta, source)) = extract_source(&bytes)? else {
            return Ok(None);
        };
        fs::write(output, source)?;
        Ok(Some(meta))
    };
    match run() {
        Ok(Some(meta)) => {
            info!(meta = %meta, output = %output.display(), "source extracted");
            EXIT_SUCCESS
        }
        Ok(None) => {
            error!(input = %input.display(), "no embedded source");
            EXIT_FAILURE
        }
        Err(e) => {
            error!(error = %e, "extract failed");
            EXIT_FAILURE
        }
    }
}
