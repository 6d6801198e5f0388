//! Assemble command.

use std::fmt::Write as _;
use std::fs;

use kiln::{EmitConfig, LinkOptions, Pipeline, QuickFlash, Target, template_hash};
use tracing::{error, info};

use super::read_symbol_names;
use crate::cli::{AsmArgs, EXIT_FAILURE, EXIT_SUCCESS};

/// Handle the `asm` command.
pub fn cmd_asm(args: &AsmArgs) -> i32 {
    info!(
        input = %args.input.display(),
        template = %args.template.display(),
        "assembling"
    );
    match assemble(args) {
        Ok(()) => {
            info!(output = %args.output.display(), "done");
            EXIT_SUCCESS
        }
        Err(e) => {
            error!(error = %e, "assembly failed");
            EXIT_FAILURE
        }
    }
}

fn assemble(args: &AsmArgs) -> kiln::Result<()> {
    let source = fs::read_to_string(&args.input)?;
    let template = fs::read_to_string(&args.template)?;
    let names = read_symbol_names(args.layout.symbols.as_deref())?;
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let mut opts = LinkOptions::default()
        .with_short_form(args.short)
        .with_globals(args.globals);
    opts.hash = args.hash;
    if let Some(path) = &args.embed {
        let meta = path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        opts = opts.with_source(&meta, fs::read(path)?);
    }

    let pipeline = Pipeline::new(EmitConfig::new(Target::Avr))
        .with_image_config(args.layout.image_config());
    let mut builder = pipeline.open_template(&template, &names)?;
    let linked = pipeline.link(&mut builder, &source, template_hash(&template), &opts)?;

    if let Some(embed) = &linked.embed {
        info!(%embed, "source");
    }
    fs::write(&args.output, linked.image.to_text())?;
    if let Some(path) = &args.quick_flash {
        fs::write(path, quick_flash_text(&linked.image.quick_flash))?;
    }
    Ok(())
}

/// Start address line followed by one packed word per line.
fn quick_flash_text(qf: &QuickFlash) -> String {
    let mut out = format!("@{:08X}\n", qf.start_addr);
    for w in &qf.words {
        let _ = writeln!(out, "{w:08X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_flash_text() {
        let qf = QuickFlash {
            start_addr: 0x400,
            words: vec![0x0001_9508, 0],
        };
        assert_eq!(quick_flash_text(&qf), "@00000400\n00019508\n00000000\n");
    }
}
