//! Two-pass assembler for the AVR subset produced by [`AvrEmitter`](super::AvrEmitter).
//!
//! The first pass sizes every line and assigns label addresses; the second
//! encodes. Symbols not defined in the source are looked up through a
//! [`SymbolResolver`], typically the template image's external symbol table.
//! All addresses handed in and out are byte addresses.

mod encode;

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, trace};

use encode::Ptr;

/// What went wrong on a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    UnknownSymbol(String),
    BranchOutOfRange { target: String, offset: i64 },
    BadOperand(String),
    UnknownMnemonic(String),
    OperandCount { mnemonic: String, expected: usize },
    DuplicateLabel(String),
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSymbol(s) => write!(f, "unknown symbol {s}"),
            Self::BranchOutOfRange { target, offset } => {
                write!(f, "branch to {target} out of range ({offset} words)")
            }
            Self::BadOperand(s) => write!(f, "bad operand: {s}"),
            Self::UnknownMnemonic(m) => write!(f, "unknown instruction {m}"),
            Self::OperandCount { mnemonic, expected } => {
                write!(f, "{mnemonic} takes {expected} operands")
            }
            Self::DuplicateLabel(l) => write!(f, "label {l} defined twice"),
        }
    }
}

/// Assembly failure with its procedure and line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{proc}: line {line}: {kind}")]
pub struct AsmError {
    pub proc: String,
    pub line: usize,
    pub kind: AsmErrorKind,
}

/// Lookup for symbols defined outside the assembled source.
pub trait SymbolResolver {
    /// Byte address of `name`, if known.
    fn resolve(&self, name: &str) -> Option<u32>;
}

impl SymbolResolver for FxHashMap<String, u32> {
    fn resolve(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}

/// Resolver that knows no symbols.
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _name: &str) -> Option<u32> {
        None
    }
}

/// Assembled output.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Byte address of the first word.
    pub origin: u32,
    pub words: Vec<u16>,
    /// Byte address of every label.
    pub labels: FxHashMap<String, u32>,
}

impl Program {
    /// Breakpoint id to byte address, from `__brkp_<id>` labels.
    pub fn breakpoint_addrs(&self) -> Vec<(u32, u32)> {
        let mut out: Vec<(u32, u32)> = self
            .labels
            .iter()
            .filter_map(|(name, &addr)| {
                name.strip_prefix("__brkp_")
                    .and_then(|id| id.parse().ok())
                    .map(|id| (id, addr))
            })
            .collect();
        out.sort_unstable();
        out
    }

    /// Code size in bytes.
    pub fn byte_len(&self) -> usize {
        self.words.len() * 2
    }
}

#[derive(Debug)]
enum Item {
    Insn { mnemonic: String, ops: Vec<String> },
    Words(Vec<String>),
    Bytes(Vec<u8>),
}

#[derive(Debug)]
struct Line {
    number: usize,
    proc: String,
    addr: u32,
    item: Item,
}

/// AVR assembler.
pub struct Assembler<'a> {
    origin: u32,
    resolver: &'a dyn SymbolResolver,
}

impl<'a> Assembler<'a> {
    pub fn new(origin: u32, resolver: &'a dyn SymbolResolver) -> Self {
        Self { origin, resolver }
    }

    /// Assemble `src` into words placed at the assembler's origin.
    ///
    /// # Errors
    ///
    /// Returns the first undefined symbol, malformed operand or out-of-range
    /// branch, tagged with the enclosing `.proc`.
    pub fn assemble(&self, src: &str) -> Result<Program, AsmError> {
        let mut labels: FxHashMap<String, u32> = FxHashMap::default();
        let mut lines = Vec::new();
        let mut addr = self.origin;
        let mut proc = String::from("<toplevel>");

        // Pass 1: sizes and labels.
        for (idx, raw) in src.lines().enumerate() {
            let number = idx + 1;
            let err = |proc: &str, kind| AsmError {
                proc: proc.to_string(),
                line: number,
                kind,
            };
            let mut text = strip_comment(raw).trim();
            if text.is_empty() {
                continue;
            }
            if let Some(name) = text.strip_prefix(".proc") {
                proc = name.trim().to_string();
                continue;
            }
            if let Some((label, rest)) = split_label(text) {
                if labels.insert(label.to_string(), addr).is_some() {
                    return Err(err(&proc, AsmErrorKind::DuplicateLabel(label.to_string())));
                }
                text = rest.trim();
                if text.is_empty() {
                    continue;
                }
            }
            let item = parse_item(text).map_err(|k| err(&proc, k))?;
            let size = item_size(&item);
            lines.push(Line {
                number,
                proc: proc.clone(),
                addr,
                item,
            });
            addr += size;
        }

        // Pass 2: encode.
        let mut words = Vec::with_capacity(((addr - self.origin) / 2) as usize);
        for line in &lines {
            let ctx = Ctx {
                labels: &labels,
                resolver: self.resolver,
                addr: line.addr,
            };
            let encoded = ctx.encode(&line.item).map_err(|kind| AsmError {
                proc: line.proc.clone(),
                line: line.number,
                kind,
            })?;
            trace!(addr = line.addr, words = encoded.len(), "encoded");
            words.extend(encoded);
        }

        debug!(
            words = words.len(),
            labels = labels.len(),
            origin = self.origin,
            "assembled"
        );
        Ok(Program {
            origin: self.origin,
            words,
            labels,
        })
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if in_str => escaped = !escaped,
            '"' if !escaped => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => escaped = false,
        }
    }
    line
}

fn split_label(text: &str) -> Option<(&str, &str)> {
    let (label, rest) = text.split_once(':')?;
    // `rt::ldfld` style operands contain "::"; a label colon is followed by
    // something other than another colon.
    if rest.starts_with(':') || label.contains(char::is_whitespace) || label.is_empty() {
        return None;
    }
    Some((label, rest))
}

fn split_operands(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0;
    let mut cur = String::new();
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                cur.push(c);
            }
            ')' => {
                depth -= 1;
                cur.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut cur).trim().to_string()),
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

fn parse_item(text: &str) -> Result<Item, AsmErrorKind> {
    let (head, rest) = text
        .split_once(char::is_whitespace)
        .map_or((text, ""), |(h, r)| (h, r.trim()));
    match head {
        ".word" => Ok(Item::Words(split_operands(rest))),
        ".string" => {
            let mut bytes = unescape(rest)?;
            bytes.push(0);
            Ok(Item::Bytes(bytes))
        }
        ".hex" => decode_hex(rest).map(Item::Bytes),
        _ if head.starts_with('.') => Err(AsmErrorKind::UnknownMnemonic(head.to_string())),
        _ => Ok(Item::Insn {
            mnemonic: head.to_ascii_lowercase(),
            ops: split_operands(rest),
        }),
    }
}

fn item_size(item: &Item) -> u32 {
    match item {
        Item::Insn { mnemonic, .. } => match mnemonic.as_str() {
            "jmp" | "call" => 4,
            _ => 2,
        },
        Item::Words(w) => 2 * w.len() as u32,
        Item::Bytes(b) => b.len().next_multiple_of(2) as u32,
    }
}

fn unescape(lit: &str) -> Result<Vec<u8>, AsmErrorKind> {
    let inner = lit
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| AsmErrorKind::BadOperand(lit.to_string()))?;
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'"') => out.push(b'"'),
            Some(b'x') => {
                let hi = chars.next();
                let lo = chars.next();
                let pair = [hi.unwrap_or(b'?'), lo.unwrap_or(b'?')];
                let s = std::str::from_utf8(&pair).unwrap_or("??");
                let v = u8::from_str_radix(s, 16)
                    .map_err(|_| AsmErrorKind::BadOperand(format!("\\x{s}")))?;
                out.push(v);
            }
            other => {
                return Err(AsmErrorKind::BadOperand(format!(
                    "escape \\{}",
                    other.map_or('?', char::from)
                )));
            }
        }
    }
    Ok(out)
}

fn decode_hex(s: &str) -> Result<Vec<u8>, AsmErrorKind> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(AsmErrorKind::BadOperand(format!("odd hex length: {s}")));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|b| u8::from_str_radix(b, 16).ok())
                .ok_or_else(|| AsmErrorKind::BadOperand(s.to_string()))
        })
        .collect()
}

static REG_PATTERN: OnceLock<Regex> = OnceLock::new();
static PTR_PATTERN: OnceLock<Regex> = OnceLock::new();
static BYTE_PATTERN: OnceLock<Regex> = OnceLock::new();

struct Ctx<'a> {
    labels: &'a FxHashMap<String, u32>,
    resolver: &'a dyn SymbolResolver,
    addr: u32,
}

impl Ctx<'_> {
    fn symbol(&self, name: &str) -> Result<u32, AsmErrorKind> {
        self.labels
            .get(name)
            .copied()
            .or_else(|| self.resolver.resolve(name))
            .ok_or_else(|| AsmErrorKind::UnknownSymbol(name.to_string()))
    }

    fn reg(op: &str) -> Result<u8, AsmErrorKind> {
        let re = REG_PATTERN.get_or_init(|| Regex::new(r"^[rR](\d{1,2})$").unwrap());
        re.captures(op)
            .and_then(|c| c[1].parse::<u8>().ok())
            .filter(|r| *r < 32)
            .ok_or_else(|| AsmErrorKind::BadOperand(op.to_string()))
    }

    fn ptr(op: &str) -> Result<(Ptr, i64), AsmErrorKind> {
        let re = PTR_PATTERN.get_or_init(|| Regex::new(r"^([YZ])(?:\s*\+\s*(\d+))?$").unwrap());
        let caps = re
            .captures(op)
            .ok_or_else(|| AsmErrorKind::BadOperand(op.to_string()))?;
        let ptr = if &caps[1] == "Y" { Ptr::Y } else { Ptr::Z };
        let q = caps.get(2).map_or(Ok(0), |m| {
            m.as_str()
                .parse::<i64>()
                .map_err(|_| AsmErrorKind::BadOperand(op.to_string()))
        })?;
        Ok((ptr, q))
    }

    /// Immediate: number, `lo8(sym)`, `hi8(sym)`, `pm_lo8(sym)`, `pm_hi8(sym)`.
    fn imm(&self, op: &str) -> Result<i64, AsmErrorKind> {
        let op = op.trim().trim_start_matches('#');
        let re = BYTE_PATTERN.get_or_init(|| Regex::new(r"^(pm_)?(lo8|hi8)\((.+)\)$").unwrap());
        if let Some(caps) = re.captures(op) {
            let mut addr = self.symbol(caps[3].trim())?;
            if caps.get(1).is_some() {
                addr >>= 1;
            }
            let byte = if &caps[2] == "lo8" { addr } else { addr >> 8 };
            return Ok(i64::from(byte & 0xff));
        }
        parse_number(op).ok_or_else(|| AsmErrorKind::BadOperand(op.to_string()))
    }

    fn branch_offset(&self, target: &str) -> Result<i64, AsmErrorKind> {
        let dest = self.symbol(target)?;
        Ok((i64::from(dest) - i64::from(self.addr)) / 2 - 1)
    }

    fn encode(&self, item: &Item) -> Result<Vec<u16>, AsmErrorKind> {
        match item {
            Item::Words(ws) => ws
                .iter()
                .map(|w| match parse_number(w) {
                    Some(v) => Ok((v & 0xffff) as u16),
                    None => Ok(((self.symbol(w)? >> 1) & 0xffff) as u16),
                })
                .collect(),
            Item::Bytes(bytes) => Ok(bytes
                .chunks(2)
                .map(|c| u16::from(c[0]) | (u16::from(*c.get(1).unwrap_or(&0)) << 8))
                .collect()),
            Item::Insn { mnemonic, ops } => self.encode_insn(mnemonic, ops),
        }
    }

    fn encode_insn(&self, m: &str, ops: &[String]) -> Result<Vec<u16>, AsmErrorKind> {
        let want = |n: usize| {
            if ops.len() == n {
                Ok(())
            } else {
                Err(AsmErrorKind::OperandCount {
                    mnemonic: m.to_string(),
                    expected: n,
                })
            }
        };
        let one = |w: u16| Ok(vec![w]);
        match m {
            "nop" => want(0).and_then(|()| one(0x0000)),
            "ret" => want(0).and_then(|()| one(0x9508)),
            "icall" => want(0).and_then(|()| one(0x9509)),
            "push" | "pop" => {
                want(1)?;
                let base = if m == "push" { 0x920f } else { 0x900f };
                one(encode::stack(base, Self::reg(&ops[0])?)?)
            }
            "ldi" | "subi" | "sbci" | "cpi" => {
                want(2)?;
                let base = match m {
                    "ldi" => 0xe000,
                    "subi" => 0x5000,
                    "sbci" => 0x4000,
                    _ => 0x3000,
                };
                one(encode::reg_imm(
                    base,
                    Self::reg(&ops[0])?,
                    self.imm(&ops[1])?,
                )?)
            }
            "add" | "adc" | "sub" | "sbc" | "and" | "or" | "eor" | "cp" | "cpc" | "mov" => {
                want(2)?;
                let base = match m {
                    "add" => 0x0c00,
                    "adc" => 0x1c00,
                    "sub" => 0x1800,
                    "sbc" => 0x0800,
                    "and" => 0x2000,
                    "or" => 0x2800,
                    "eor" => 0x2400,
                    "cp" => 0x1400,
                    "cpc" => 0x0400,
                    _ => 0x2c00,
                };
                one(encode::reg_reg(
                    base,
                    Self::reg(&ops[0])?,
                    Self::reg(&ops[1])?,
                )?)
            }
            "movw" => {
                want(2)?;
                one(encode::movw(Self::reg(&ops[0])?, Self::reg(&ops[1])?)?)
            }
            "adiw" | "sbiw" => {
                want(2)?;
                let base = if m == "adiw" { 0x9600 } else { 0x9700 };
                one(encode::word_imm(
                    base,
                    Self::reg(&ops[0])?,
                    self.imm(&ops[1])?,
                )?)
            }
            "in" => {
                want(2)?;
                one(encode::io(0xb000, Self::reg(&ops[0])?, self.imm(&ops[1])?)?)
            }
            "out" => {
                want(2)?;
                one(encode::io(0xb800, Self::reg(&ops[1])?, self.imm(&ops[0])?)?)
            }
            "ldd" | "ld" => {
                want(2)?;
                let (ptr, q) = Self::ptr(&ops[1])?;
                one(encode::displaced(false, ptr, q, Self::reg(&ops[0])?)?)
            }
            "std" | "st" => {
                want(2)?;
                let (ptr, q) = Self::ptr(&ops[0])?;
                one(encode::displaced(true, ptr, q, Self::reg(&ops[1])?)?)
            }
            "breq" | "brne" => {
                want(1)?;
                let base = if m == "breq" { 0xf001 } else { 0xf401 };
                let offset = self.branch_offset(&ops[0])?;
                encode::branch(base, offset)
                    .map(|w| vec![w])
                    .ok_or_else(|| AsmErrorKind::BranchOutOfRange {
                        target: ops[0].clone(),
                        offset,
                    })
            }
            "rjmp" | "rcall" => {
                want(1)?;
                let base = if m == "rjmp" { 0xc000 } else { 0xd000 };
                let offset = self.branch_offset(&ops[0])?;
                encode::relative(base, offset)
                    .map(|w| vec![w])
                    .ok_or_else(|| AsmErrorKind::BranchOutOfRange {
                        target: ops[0].clone(),
                        offset,
                    })
            }
            "jmp" | "call" => {
                want(1)?;
                let base = if m == "jmp" { 0x940c } else { 0x940e };
                let dest = self.symbol(&ops[0])?;
                Ok(encode::long(base, dest >> 1)?.to_vec())
            }
            _ => Err(AsmErrorKind::UnknownMnemonic(m.to_string())),
        }
    }
}

fn parse_number(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, body) = s.strip_prefix('-').map_or((false, s), |b| (true, b));
    let v = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}
