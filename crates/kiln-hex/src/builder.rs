//! Template scanning, symbol resolution and patching.

use kiln_emit::avr::asm::SymbolResolver;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{HEADER_MAGIC, HexRecord, ImageConfig, ImageError, RecordKind, Result, parse_records};

/// Fix-up that rounds the last template data record to a 16-byte boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
enum TailPad {
    /// Last record already ends on a boundary.
    None,
    /// Extend the record at this index to 16 bytes.
    Extend(usize),
    /// Insert a zero record of `len` bytes at `addr` after this index.
    Insert { after: usize, addr: u16, len: u8 },
}

/// A template scanned for its free-code region and jump table.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    config: ImageConfig,
    records: Vec<HexRecord>,
    /// Index of the first record after the template's data.
    code_idx: usize,
    /// Bank selected at `code_idx` by the template's extended records.
    code_upper: u16,
    tail_pad: TailPad,
    /// First free byte, 16-byte aligned.
    code_start: u32,
    /// First free byte rounded past its page; generated code starts here.
    code_start_padded: u32,
    jump_table_idx: usize,
    jump_table_addr: u32,
    symbols: FxHashMap<String, u32>,
}

/// Patched image text plus the words for a quick in-place flash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchedImage {
    pub lines: Vec<String>,
    pub quick_flash: QuickFlash,
}

impl PatchedImage {
    /// Image as one file, CRLF-terminated records.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.lines.len() * 45);
        for line in &self.lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

/// Program words packed two per 32-bit word, for flashing just the code
/// region of a device already running the template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuickFlash {
    pub start_addr: u32,
    pub words: Vec<u32>,
}

impl ImageBuilder {
    /// Scan `template` and read the addresses of `symbol_names`, in order,
    /// from the records following the jump table head.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::BadPageSize`] for an invalid page size,
    /// [`ImageError::NoHexStart`] without a jump table head,
    /// [`ImageError::NoHexEnd`] when the data never ends,
    /// [`ImageError::MissingSymbol`] for a zero or absent table entry, and
    /// record errors for malformed lines.
    pub fn setup(template: &str, symbol_names: &[&str], config: ImageConfig) -> Result<Self> {
        config.validate()?;
        let mut records = parse_records(template)?;
        for rec in &mut records {
            if rec.kind == RecordKind::ExtSegment
                && let Some(upper) = rec.upper_addr()
            {
                *rec = HexRecord::ext_linear(upper);
            }
        }

        let mut upper = 0u16;
        let mut last: Option<(usize, u32, u16)> = None;
        let mut end = false;
        let mut jump_table: Option<(usize, u32)> = None;

        for (i, rec) in records.iter().enumerate() {
            if let Some(u) = rec.upper_addr() {
                upper = u;
            }
            match rec.kind {
                RecordKind::Data => {
                    let addr = (u32::from(upper) << 16) | u32::from(rec.addr);
                    end |= addr >= config.flash_usable_end;
                    if !end {
                        last = Some((i, addr, upper));
                    }
                    if jump_table.is_none() && rec.data == config.jump_table_marker {
                        jump_table = Some((i, addr));
                    }
                }
                RecordKind::Eof => end = true,
                _ => {}
            }
        }

        let (jump_table_idx, jump_table_addr) = jump_table.ok_or(ImageError::NoHexStart)?;
        let Some((last_idx, last_addr, code_upper)) = last.filter(|_| end) else {
            return Err(ImageError::NoHexEnd);
        };

        let last_len = records[last_idx].data.len() as u32;
        let missing = (0x10 - ((last_addr + last_len) & 0xf)) & 0xf;
        let (tail_pad, code_start) = if missing == 0 {
            (TailPad::None, last_addr + last_len)
        } else if last_addr & 0xf != 0 {
            let next = last_addr + last_len;
            let pad = TailPad::Insert {
                after: last_idx,
                addr: (next & 0xffff) as u16,
                len: missing as u8,
            };
            (pad, next + missing)
        } else {
            (TailPad::Extend(last_idx), last_addr + 16)
        };

        let mut builder = Self {
            code_start_padded: config.page_after(code_start),
            config,
            records,
            code_idx: last_idx + 1,
            code_upper,
            tail_pad,
            code_start,
            jump_table_idx,
            jump_table_addr,
            symbols: FxHashMap::default(),
        };
        builder.read_jump_table(symbol_names)?;
        debug!(
            code_start = format_args!("{:#x}", builder.code_start),
            code_start_padded = format_args!("{:#x}", builder.code_start_padded),
            jump_table = format_args!("{:#x}", builder.jump_table_addr),
            symbols = builder.symbols.len(),
            "hex: template scanned"
        );
        Ok(builder)
    }

    fn read_jump_table(&mut self, names: &[&str]) -> Result<()> {
        let step = self.config.pointer_bytes;
        let mut names = names.iter();
        let mut pending = names.next();

        for rec in &self.records[self.jump_table_idx + 1..] {
            if rec.kind != RecordKind::Data || rec.data.len() != 16 {
                continue;
            }
            for chunk in rec.data.chunks_exact(step) {
                let Some(name) = pending else {
                    return Ok(());
                };
                let raw = chunk
                    .iter()
                    .rev()
                    .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                let addr = if self.config.word_pointers {
                    raw * 2
                } else {
                    raw & !1
                };
                if addr == 0 {
                    return Err(ImageError::MissingSymbol((*name).to_string()));
                }
                trace!(symbol = *name, addr = format_args!("{addr:#x}"), "hex: jump table entry");
                self.symbols.insert((*name).to_string(), addr);
                pending = names.next();
            }
        }
        match pending {
            Some(name) => Err(ImageError::MissingSymbol((*name).to_string())),
            None => Ok(()),
        }
    }

    /// Byte address of an external symbol.
    pub fn resolve_external_symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    /// Add or override a symbol with an explicitly known byte address.
    pub fn register_symbol(&mut self, name: impl Into<String>, addr: u32) {
        self.symbols.insert(name.into(), addr);
    }

    /// Known symbols sorted by address.
    pub fn symbols(&self) -> Vec<(&str, u32)> {
        let mut out: Vec<_> = self.symbols.iter().map(|(n, &a)| (n.as_str(), a)).collect();
        out.sort_unstable_by_key(|&(n, a)| (a, n));
        out
    }

    pub const fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// First free byte after the template's data.
    pub const fn code_start(&self) -> u32 {
        self.code_start
    }

    /// Byte address generated code is assembled at.
    pub const fn code_start_padded(&self) -> u32 {
        self.code_start_padded
    }

    pub const fn jump_table_addr(&self) -> u32 {
        self.jump_table_addr
    }

    /// Number of template records, extended records included.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Data bytes of the jump table head record.
    pub fn jump_table_head(&self) -> &[u8] {
        &self.records[self.jump_table_idx].data
    }

    /// Rewrite the jump table head with the image header: version magic,
    /// globals count, the padded code start as two words and the template
    /// hash. Address and length of the record are unchanged.
    pub fn stamp_header(&mut self, hash: [u8; 8], globals: u16) {
        let [lo, hi] = [
            (self.code_start_padded & 0xffff) as u16,
            (self.code_start_padded >> 16) as u16,
        ];
        let mut data = Vec::with_capacity(16);
        for w in [HEADER_MAGIC, globals, lo, hi] {
            data.extend_from_slice(&w.to_le_bytes());
        }
        data.extend_from_slice(&hash);

        let rec = &mut self.records[self.jump_table_idx];
        data.resize(rec.data.len(), 0);
        rec.data = data;
        debug!(globals, "hex: header stamped");
    }

    /// Lay `words` out from the free-code region and merge them into the
    /// template.
    ///
    /// With `short_form` only the code records are returned. An empty
    /// program leaves the template records untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::ProgramTooLarge`] above the configured limit.
    pub fn patch(&self, words: &[u16], short_form: bool) -> Result<PatchedImage> {
        let size = words.len() * 2;
        if size > self.config.max_program_bytes {
            return Err(ImageError::ProgramTooLarge {
                size,
                max: self.config.max_program_bytes,
            });
        }

        let mut lines = Vec::with_capacity(self.records.len() + words.len() / 8 + 4);
        if !short_form {
            lines.extend(self.head_records(!words.is_empty()).iter().map(HexRecord::encode));
        }
        if !words.is_empty() {
            let code = self.code_records(words);
            trace!(records = code.len(), "hex: code laid out");
            lines.extend(code.iter().map(HexRecord::encode));
        }
        if !short_form {
            lines.extend(self.records[self.code_idx..].iter().map(HexRecord::encode));
        }

        debug!(bytes = size, lines = lines.len(), short_form, "hex: image patched");
        Ok(PatchedImage {
            lines,
            quick_flash: self.quick_flash(words),
        })
    }

    /// Template records before the code, with the tail padding applied when
    /// code follows.
    fn head_records(&self, pad_tail: bool) -> Vec<HexRecord> {
        let mut head = self.records[..self.code_idx].to_vec();
        if !pad_tail {
            return head;
        }
        match self.tail_pad {
            TailPad::None => {}
            TailPad::Extend(i) => head[i].data.resize(16, 0),
            TailPad::Insert { after, addr, len } => {
                head.insert(after + 1, HexRecord::data(addr, vec![0; usize::from(len)]));
            }
        }
        head
    }

    /// Zero padding up to the page boundary, then the program, in 16-byte
    /// records with a bank switch whenever the address crosses 64 KiB.
    fn code_records(&self, words: &[u16]) -> Vec<HexRecord> {
        let pad_words = ((self.code_start_padded - self.code_start) / 2) as usize;
        let bytes: Vec<u8> = std::iter::repeat_n(0u16, pad_words)
            .chain(words.iter().copied())
            .flat_map(u16::to_le_bytes)
            .collect();

        let mut out = Vec::with_capacity(bytes.len() / 16 + 2);
        let mut upper = self.code_upper;
        let mut addr = self.code_start;
        for chunk in bytes.chunks(16) {
            let bank = (addr >> 16) as u16;
            if bank != upper {
                upper = bank;
                out.push(HexRecord::ext_linear(upper));
            }
            let mut data = chunk.to_vec();
            data.resize(16, 0);
            out.push(HexRecord::data((addr & 0xffff) as u16, data));
            addr += 16;
        }
        if upper != self.code_upper {
            out.push(HexRecord::ext_linear(self.code_upper));
        }
        out
    }

    fn quick_flash(&self, words: &[u16]) -> QuickFlash {
        let mut packed: Vec<u32> = words
            .chunks(2)
            .map(|p| u32::from(p[0]) | (u32::from(p.get(1).copied().unwrap_or(0)) << 16))
            .collect();
        let per_block = (self.config.quick_flash_align / 4).max(1);
        packed.resize(packed.len().div_ceil(per_block) * per_block, 0);
        QuickFlash {
            start_addr: self.code_start_padded,
            words: packed,
        }
    }
}

impl SymbolResolver for ImageBuilder {
    fn resolve(&self, name: &str) -> Option<u32> {
        self.resolve_external_symbol(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_records;

    const MARKER: &str = "0108010842424242010801083ED8E98D";

    fn data_line(addr: u16, data: &[u8]) -> String {
        HexRecord::data(addr, data.to_vec()).encode()
    }

    fn marker_line(addr: u16) -> String {
        let bytes: Vec<u8> = (0..16)
            .map(|i| u8::from_str_radix(&MARKER[2 * i..2 * i + 2], 16).unwrap())
            .collect();
        data_line(addr, &bytes)
    }

    /// Template with code at 0x0000..0x0100, the jump table head at 0x0100
    /// and two table records holding word addresses 0x0200..0x0207.
    fn template(tail: &[u8]) -> String {
        let mut lines = vec![HexRecord::ext_linear(0).encode()];
        for i in 0..16u16 {
            lines.push(data_line(i * 16, &[0xAA; 16]));
        }
        lines.push(marker_line(0x100));
        let table: Vec<u8> = (0x200u16..0x208).flat_map(u16::to_le_bytes).collect();
        lines.push(data_line(0x110, &table[..16]));
        lines.push(data_line(0x120, tail));
        lines.push(":00000001FF".to_string());
        lines.join("\r\n") + "\r\n"
    }

    fn names() -> Vec<&'static str> {
        vec!["rt::print", "rt::mkloc", "rt::decr"]
    }

    #[test]
    fn test_setup_scans_template() {
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), ImageConfig::default()).unwrap();
        assert_eq!(b.jump_table_addr(), 0x100);
        assert_eq!(b.code_start(), 0x130);
        assert_eq!(b.code_start_padded(), 0x400);
        assert_eq!(b.resolve_external_symbol("rt::print"), Some(0x400));
        assert_eq!(b.resolve_external_symbol("rt::mkloc"), Some(0x402));
        assert_eq!(b.resolve_external_symbol("rt::decr"), Some(0x404));
        assert_eq!(b.resolve_external_symbol("rt::nope"), None);
        assert_eq!(b.jump_table_head().len(), 16);
    }

    #[test]
    fn test_register_symbol_overrides() {
        let mut b =
            ImageBuilder::setup(&template(&[0x55; 16]), &names(), ImageConfig::default()).unwrap();
        b.register_symbol("rt::extra", 0x1234);
        b.register_symbol("rt::print", 0x600);
        assert_eq!(b.resolve("rt::extra"), Some(0x1234));
        assert_eq!(b.symbols()[0], ("rt::mkloc", 0x402));
        assert_eq!(b.symbols().last(), Some(&("rt::extra", 0x1234)));
    }

    #[test]
    fn test_missing_markers() {
        let no_head = format!("{}\r\n:00000001FF\r\n", data_line(0, &[1; 16]));
        assert!(matches!(
            ImageBuilder::setup(&no_head, &[], ImageConfig::default()),
            Err(ImageError::NoHexStart)
        ));

        let no_end = template(&[0x55; 16]).replace(":00000001FF", "");
        assert!(matches!(
            ImageBuilder::setup(&no_end, &[], ImageConfig::default()),
            Err(ImageError::NoHexEnd)
        ));
    }

    #[test]
    fn test_flash_end_ends_data() {
        let mut text = template(&[0x55; 16]).replace(":00000001FF\r\n", "");
        text.push_str(&HexRecord::ext_linear(3).encode());
        text.push_str("\r\n");
        text.push_str(&data_line(0xC000, &[0x11; 16]));
        text.push_str("\r\n:00000001FF\r\n");
        let b = ImageBuilder::setup(&text, &[], ImageConfig::default()).unwrap();
        assert_eq!(b.code_start(), 0x130);
    }

    #[test]
    fn test_missing_symbol() {
        // The table record holds eight entries; the short tail record is
        // not part of the table.
        let many: Vec<String> = (0..9).map(|i| format!("rt::f{i}")).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        let err = ImageBuilder::setup(&template(&[0x55; 4]), &many, ImageConfig::default()).unwrap_err();
        assert!(matches!(err, ImageError::MissingSymbol(ref n) if n == "rt::f8"));

        let zeros = template(&[0x55; 16]).replace(
            &data_line(0x110, &(0x200u16..0x208).flat_map(u16::to_le_bytes).collect::<Vec<_>>()),
            &data_line(0x110, &[0; 16]),
        );
        let err = ImageBuilder::setup(&zeros, &["rt::print"], ImageConfig::default()).unwrap_err();
        assert!(matches!(err, ImageError::MissingSymbol(ref n) if n == "rt::print"));
    }

    #[test]
    fn test_long_pointers() {
        let config = ImageConfig::default().with_long_pointers();
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &["a", "b"], config).unwrap();
        // Entries 0x0200, 0x0201 read as one little-endian u32, low bit cleared.
        assert_eq!(b.resolve_external_symbol("a"), Some(0x0201_0200));
        assert_eq!(b.resolve_external_symbol("b"), Some(0x0203_0202));
    }

    #[test]
    fn test_empty_program_round_trip() {
        let text = template(&[0x55; 4]);
        let mut b = ImageBuilder::setup(&text, &names(), ImageConfig::default()).unwrap();
        let hash = [1, 2, 3, 4, 5, 6, 7, 8];
        b.stamp_header(hash, 5);
        let image = b.patch(&[], false).unwrap();

        let original = parse_records(&text).unwrap();
        let patched = parse_records(&image.to_text()).unwrap();
        assert_eq!(original.len(), patched.len());
        for (i, (a, p)) in original.iter().zip(&patched).enumerate() {
            if i == 17 {
                assert_eq!(p.addr, a.addr);
                assert_eq!(
                    p.data,
                    [0x10, 0x42, 5, 0, 0x00, 0x04, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]
                );
            } else {
                assert_eq!(a, p);
            }
        }
        assert!(image.quick_flash.words.is_empty());
        assert_eq!(image.quick_flash.start_addr, 0x400);
    }

    #[test]
    fn test_patch_lays_out_code() {
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), ImageConfig::default()).unwrap();
        let words: Vec<u16> = (1..=10).collect();
        let image = b.patch(&words, false).unwrap();
        let recs = parse_records(&image.to_text()).unwrap();

        // Template head, padding 0x130..0x400 in 45 records, two code records, EOF.
        assert_eq!(recs.len(), 20 + 45 + 2 + 1);
        assert_eq!(recs[20].addr, 0x130);
        assert!(recs[20..65].iter().all(|r| r.data == [0; 16]));
        assert_eq!(recs[65].addr, 0x400);
        assert_eq!(recs[65].data[..4], [1, 0, 2, 0]);
        assert_eq!(recs[66].addr, 0x410);
        assert_eq!(recs[66].data[..4], [9, 0, 10, 0]);
        assert_eq!(recs[66].data[4..], [0; 12]);
        assert_eq!(recs.last().map(|r| r.kind), Some(RecordKind::Eof));
    }

    #[test]
    fn test_short_form_only_code() {
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), ImageConfig::default()).unwrap();
        let image = b.patch(&[0xBEEF], true).unwrap();
        assert_eq!(image.lines.len(), 46);
        assert_eq!(image.lines[45], data_line(0x400, &[0xEF, 0xBE, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_tail_padding() {
        // Short record on an aligned address is extended in place.
        let b = ImageBuilder::setup(&template(&[0x55; 4]), &names(), ImageConfig::default()).unwrap();
        assert_eq!(b.code_start(), 0x130);
        let recs = parse_records(&b.patch(&[1], false).unwrap().to_text()).unwrap();
        assert_eq!(recs[19].data, [0x55, 0x55, 0x55, 0x55, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        // Record ending mid-line at an unaligned address gets a filler record.
        let text = template(&[0x55; 16]).replace(":00000001FF", &format!("{}\r\n:00000001FF", data_line(0x134, &[7; 4])));
        let b = ImageBuilder::setup(&text, &names(), ImageConfig::default()).unwrap();
        assert_eq!(b.code_start(), 0x140);
        let recs = parse_records(&b.patch(&[1], false).unwrap().to_text()).unwrap();
        assert_eq!(recs[20].addr, 0x134);
        assert_eq!(recs[21].addr, 0x138);
        assert_eq!(recs[21].data, [0; 8]);
    }

    #[test]
    fn test_bank_switch() {
        let config = ImageConfig::default().with_page_size(0x1_0000);
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), config).unwrap();
        assert_eq!(b.code_start_padded(), 0x1_0000);
        let image = b.patch(&[0x1234], true).unwrap();
        let recs: Vec<HexRecord> = image
            .lines
            .iter()
            .map(|l| HexRecord::parse(l, 0).unwrap())
            .collect();
        let n = recs.len();
        assert_eq!(recs[n - 3], HexRecord::ext_linear(1));
        assert_eq!(recs[n - 2].addr, 0);
        assert_eq!(recs[n - 2].data[..2], [0x34, 0x12]);
        assert_eq!(recs[n - 1], HexRecord::ext_linear(0));
    }

    #[test]
    fn test_bad_page_size_rejected() {
        for page in [0, 0x300] {
            let config = ImageConfig::default().with_page_size(page);
            assert!(matches!(
                ImageBuilder::setup(&template(&[0x55; 16]), &names(), config),
                Err(ImageError::BadPageSize(p)) if p == page
            ));
        }
    }

    #[test]
    fn test_program_too_large() {
        let config = ImageConfig::default().with_max_program_bytes(8);
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), config).unwrap();
        assert!(b.patch(&[0; 4], false).is_ok());
        assert!(matches!(
            b.patch(&[0; 5], false),
            Err(ImageError::ProgramTooLarge { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_quick_flash_packing() {
        let b = ImageBuilder::setup(&template(&[0x55; 16]), &names(), ImageConfig::default()).unwrap();
        let qf = b.patch(&[1, 2, 3], true).unwrap().quick_flash;
        assert_eq!(qf.start_addr, 0x400);
        assert_eq!(qf.words.len(), 256);
        assert_eq!(qf.words[..2], [0x0002_0001, 0x0000_0003]);
        assert!(qf.words[2..].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_segment_records_normalized() {
        let text = template(&[0x55; 16]).replacen(&HexRecord::ext_linear(0).encode(), ":020000020000FC", 1);
        let b = ImageBuilder::setup(&text, &names(), ImageConfig::default()).unwrap();
        let image = b.patch(&[], false).unwrap();
        assert_eq!(image.lines[0], ":020000040000FA");
    }
}
