//! Build pipeline - IR → program text → assembled words → patched image.

use std::hash::Hasher;
use std::time::Instant;

use kiln_emit::avr::asm::{Assembler, Program};
use kiln_emit::{EmitConfig, Target, emit_binary};
use kiln_hex::{Embed, ImageBuilder, ImageConfig, PatchedImage};
use kiln_ir::Binary;
use rustc_hash::FxHasher;
use tracing::{debug, info};

use crate::{Error, Result, metrics};

/// Source text stored in the image next to the program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddedSource {
    /// Free-form metadata, stored uncompressed.
    pub meta: String,
    pub blob: Vec<u8>,
}

/// Options for linking one program into a template.
#[derive(Clone, Debug, Default)]
pub struct LinkOptions {
    /// Leave out the template records after the program.
    pub short_form: bool,
    /// Number of global slots the firmware allocates.
    pub globals: u16,
    /// Header hash; defaults to [`template_hash`] of the template.
    pub hash: Option<[u8; 8]>,
    pub source: Option<EmbeddedSource>,
}

impl LinkOptions {
    #[must_use]
    pub const fn with_short_form(mut self, short: bool) -> Self {
        self.short_form = short;
        self
    }

    #[must_use]
    pub const fn with_globals(mut self, globals: u16) -> Self {
        self.globals = globals;
        self
    }

    #[must_use]
    pub fn with_source(mut self, meta: &str, blob: Vec<u8>) -> Self {
        self.source = Some(EmbeddedSource {
            meta: meta.to_string(),
            blob,
        });
        self
    }
}

/// Result of a link.
#[derive(Debug)]
pub struct LinkedImage {
    pub image: PatchedImage,
    pub program: Program,
    /// What happened to the embedded source, if one was requested.
    pub embed: Option<Embed>,
}

/// Stable 8-byte fingerprint of a template, ignoring line endings.
pub fn template_hash(template: &str) -> [u8; 8] {
    let mut hasher = FxHasher::default();
    for line in template.lines().map(str::trim).filter(|l| !l.is_empty()) {
        hasher.write(line.as_bytes());
        hasher.write_u8(b'\n');
    }
    hasher.finish().to_le_bytes()
}

/// Resolve every procedure of `bin` that is not yet resolved.
///
/// # Errors
///
/// Returns the first label error.
pub fn resolve(bin: &mut Binary) -> Result<()> {
    for proc in bin.procs.iter_mut().filter(|p| !p.is_resolved()) {
        proc.resolve()?;
    }
    Ok(())
}

/// Emit, assemble and link with one pair of configurations.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    emit: EmitConfig,
    image: ImageConfig,
}

impl Pipeline {
    pub fn new(emit: EmitConfig) -> Self {
        Self {
            emit,
            image: ImageConfig::default(),
        }
    }

    #[must_use]
    pub fn with_image_config(mut self, image: ImageConfig) -> Self {
        self.image = image;
        self
    }

    pub const fn emit_config(&self) -> &EmitConfig {
        &self.emit
    }

    pub const fn image_config(&self) -> &ImageConfig {
        &self.image
    }

    /// Program text for the configured target.
    ///
    /// # Errors
    ///
    /// Returns the first procedure's emit error.
    pub fn emit(&self, bin: &Binary) -> Result<String> {
        let start = Instant::now();
        let text = emit_binary(bin, &self.emit)?;
        metrics::record_emit(self.emit.target, bin.procs.len(), start.elapsed().as_secs_f64());
        Ok(text)
    }

    /// Scan a template and read the jump table entries for `symbols`.
    ///
    /// # Errors
    ///
    /// Returns image errors for malformed templates or missing symbols.
    pub fn open_template(&self, template: &str, symbols: &[&str]) -> Result<ImageBuilder> {
        let builder = ImageBuilder::setup(template, symbols, self.image.clone())?;
        debug!(
            code_start = builder.code_start_padded(),
            symbols = symbols.len(),
            "pipeline: template opened"
        );
        Ok(builder)
    }

    /// Assemble `asm` at the template's code start and patch it in.
    ///
    /// # Errors
    ///
    /// Returns assembly errors and image errors such as an oversized program.
    pub fn link(
        &self,
        builder: &mut ImageBuilder,
        asm: &str,
        hash: [u8; 8],
        opts: &LinkOptions,
    ) -> Result<LinkedImage> {
        let program = Assembler::new(builder.code_start_padded(), &*builder).assemble(asm)?;
        let mut words = program.words.clone();

        let embed = match &opts.source {
            Some(src) => {
                let embed = builder.embed_source(&src.meta, &src.blob)?;
                if let Embed::Packed(extra) = &embed {
                    words.extend_from_slice(extra);
                }
                Some(embed)
            }
            None => None,
        };

        builder.stamp_header(opts.hash.unwrap_or(hash), opts.globals);
        let image = builder.patch(&words, opts.short_form)?;
        metrics::record_image(image.lines.len(), words.len() * 2);
        info!(
            code_bytes = program.byte_len(),
            total_bytes = words.len() * 2,
            records = image.lines.len(),
            "linked image"
        );
        Ok(LinkedImage {
            image,
            program,
            embed,
        })
    }

    /// Assemble text against `template` in one step.
    ///
    /// # Errors
    ///
    /// As for [`open_template`](Self::open_template) and [`link`](Self::link).
    pub fn link_text(
        &self,
        asm: &str,
        template: &str,
        symbols: &[&str],
        opts: &LinkOptions,
    ) -> Result<LinkedImage> {
        let mut builder = self.open_template(template, symbols)?;
        self.link(&mut builder, asm, template_hash(template), opts)
    }

    /// Emit native code for `bin` and link it into `template`. The global
    /// count defaults to the binary's globals when `opts` leaves it at zero.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotLinkable`] for managed targets, and with any
    /// emit, assembly or image error.
    pub fn build(
        &self,
        bin: &Binary,
        template: &str,
        symbols: &[&str],
        opts: &LinkOptions,
    ) -> Result<LinkedImage> {
        if self.emit.target != Target::Avr {
            return Err(Error::NotLinkable(self.emit.target));
        }
        let asm = self.emit(bin)?;
        let mut opts = opts.clone();
        if opts.globals == 0 {
            opts.globals = u16::try_from(bin.globals.len()).unwrap_or(u16::MAX);
        }
        self.link_text(&asm, template, symbols, &opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_hash_ignores_line_endings() {
        let unix = ":00000001FF\n:0400000A01020304E9\n";
        let dos = ":00000001FF\r\n:0400000A01020304E9\r\n";
        assert_eq!(template_hash(unix), template_hash(dos));
        assert_ne!(template_hash(unix), template_hash(":00000001FF\n"));
    }

    #[test]
    fn test_managed_targets_not_linkable() {
        let pipeline = Pipeline::new(EmitConfig::new(Target::Script));
        let err = pipeline
            .build(&Binary::new(), "", &[], &LinkOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotLinkable(Target::Script)));
    }

    #[test]
    fn test_resolve_skips_resolved_procs() {
        let mut bin = Binary::new();
        bin.add_proc(
            kiln_ir::ProcBuilder::new("a", 0)
                .label("l")
                .jmp("l")
                .build_resolved()
                .unwrap(),
        );
        bin.add_proc(kiln_ir::ProcBuilder::new("b", 1).label("m").jmp("m").build());
        resolve(&mut bin).unwrap();
        assert!(bin.procs.iter().all(kiln_ir::Procedure::is_resolved));
    }
}
