//! Core emission helpers for AVR assembly.
//!
//! Low-level text emission, the virtual register map, frame offsets and the
//! displacement spill used when an offset does not fit `ldd`/`std`.

use std::fmt;

use super::AvrEmitter;

/// A 16-bit register pair, named by its low register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pair(pub u8);

impl Pair {
    pub const fn lo(self) -> u8 {
        self.0
    }

    pub const fn hi(self) -> u8 {
        self.0 + 1
    }
}

/// Virtual register assignment.
pub mod regs {
    use super::Pair;

    /// Accumulator, virtual r0; also first argument and return value.
    pub const ACC: Pair = Pair(24);
    /// Runtime call argument registers, virtual r0..r3.
    pub const ARGS: [Pair; 4] = [Pair(24), Pair(22), Pair(20), Pair(18)];
    /// Closure pointer of the running action, virtual r5.
    pub const CLOSURE: Pair = Pair(4);
    /// Globals base pointer, virtual r6.
    pub const GLOBALS: Pair = Pair(2);
    /// Frame pointer.
    pub const Y: Pair = Pair(28);
    /// Scratch pointer.
    pub const Z: Pair = Pair(30);
    /// Always zero.
    pub const ZERO: u8 = 1;

    pub const SPL: u8 = 0x3d;
    pub const SPH: u8 = 0x3e;
}

/// Saved Y between the frame and the return address.
const SAVED_Y_BYTES: u32 = 2;
/// Bytes before the first captured field of an action object.
const ACTION_FIELDS_OFFSET: u32 = 6;
/// Largest displacement usable for both bytes of a word.
const MAX_WORD_DISP: u32 = 62;
/// Largest `adiw` immediate.
const MAX_ADIW: u32 = 63;

/// A word slot addressed off the frame pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSlot {
    /// `locals@index`: locals, then shared temporaries.
    Local(u32),
    /// `args@index:height`; `index` counts from the last pushed argument.
    Arg { index: u32, height: u32 },
}

impl FrameSlot {
    /// Byte displacement from Y. Y points one below the frame; arguments sit
    /// past saved Y and a return address of `pc_bytes`.
    pub const fn offset(self, pc_bytes: u32) -> u32 {
        match self {
            Self::Local(i) => 2 * i + 1,
            Self::Arg { index, height } => 2 * (index + height) + 1 + SAVED_Y_BYTES + pc_bytes,
        }
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(i) => write!(f, "locals@{i}"),
            Self::Arg { index, height } => write!(f, "args@{index}:{height}"),
        }
    }
}

/// Base register for an indirect access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Base {
    Y,
    Z,
}

impl AvrEmitter {
    /// Generate a unique local label.
    pub(super) fn next_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{}_{}{}", self.proc_label, prefix, self.label_counter)
    }

    /// Label of a resolved IR label id.
    pub(super) fn ir_label(&self, id: u32) -> String {
        format!("{}_L{}", self.proc_label, id)
    }

    // ========================================================================
    // Low-level emission helpers
    // ========================================================================

    /// Emit an instruction line with indentation.
    pub(super) fn emit(&mut self, line: &str) {
        self.asm.push_str("    ");
        self.asm.push_str(line);
        self.asm.push('\n');
    }

    /// Emit a formatted instruction line.
    pub(super) fn emitf(&mut self, line: impl fmt::Display) {
        self.emit(&line.to_string());
    }

    /// Emit a label.
    pub(super) fn emit_label(&mut self, name: &str) {
        self.asm.push_str(name);
        self.asm.push_str(":\n");
    }

    /// Emit a comment.
    pub(super) fn emit_comment(&mut self, comment: impl fmt::Display) {
        if self.config.emit_comments {
            self.asm.push_str(&format!("    ; {comment}\n"));
        }
    }

    // ========================================================================
    // Register helpers
    // ========================================================================

    pub(super) fn load_imm(&mut self, dst: Pair, value: u16) {
        self.emitf(format!("ldi r{}, {}", dst.lo(), value & 0xff));
        self.emitf(format!("ldi r{}, {}", dst.hi(), value >> 8));
    }

    pub(super) fn load_label(&mut self, dst: Pair, label: &str, program_memory: bool) {
        let pm = if program_memory { "pm_" } else { "" };
        self.emitf(format!("ldi r{}, {pm}lo8({label})", dst.lo()));
        self.emitf(format!("ldi r{}, {pm}hi8({label})", dst.hi()));
    }

    pub(super) fn mov_pair(&mut self, dst: Pair, src: Pair) {
        if dst != src {
            self.emitf(format!("movw r{}, r{}", dst.lo(), src.lo()));
        }
    }

    pub(super) fn push_pair(&mut self, src: Pair) {
        self.emitf(format!("push r{}", src.hi()));
        self.emitf(format!("push r{}", src.lo()));
    }

    pub(super) fn pop_pair(&mut self, dst: Pair) {
        self.emitf(format!("pop r{}", dst.lo()));
        self.emitf(format!("pop r{}", dst.hi()));
    }

    /// Drop `bytes` from the hardware stack without touching r24:r25.
    pub(super) fn pop_bytes(&mut self, bytes: u32) {
        if bytes == 0 {
            return;
        }
        if bytes <= 5 {
            for _ in 0..bytes {
                self.emit("pop r0");
            }
            return;
        }
        self.emitf(format!("in r30, {:#x}", regs::SPL));
        self.emitf(format!("in r31, {:#x}", regs::SPH));
        self.adiw_z(bytes);
        self.emitf(format!("out {:#x}, r31", regs::SPH));
        self.emitf(format!("out {:#x}, r30", regs::SPL));
    }

    fn adiw_z(&mut self, mut amount: u32) {
        while amount > 0 {
            let step = amount.min(MAX_ADIW);
            self.emitf(format!("adiw r30, {step}"));
            amount -= step;
        }
    }

    // ========================================================================
    // Indirect access
    // ========================================================================

    /// Turn `base+offset` into an encodable operand, spilling into Z when the
    /// displacement does not fit.
    fn address(&mut self, base: Base, offset: u32) -> (char, u32) {
        let name = match base {
            Base::Y => 'Y',
            Base::Z => 'Z',
        };
        if offset <= MAX_WORD_DISP {
            return (name, offset);
        }
        self.emit_comment(format!("spill {name}+{offset}"));
        if base == Base::Y {
            self.mov_pair(regs::Z, regs::Y);
        }
        self.adiw_z(offset);
        ('Z', 0)
    }

    pub(super) fn load_word(&mut self, dst: Pair, base: Base, offset: u32) {
        let (ptr, off) = self.address(base, offset);
        self.emitf(format!("ldd r{}, {ptr}+{off}", dst.lo()));
        self.emitf(format!("ldd r{}, {ptr}+{}", dst.hi(), off + 1));
    }

    pub(super) fn store_word(&mut self, base: Base, offset: u32, src: Pair) {
        let (ptr, off) = self.address(base, offset);
        self.emitf(format!("std {ptr}+{off}, r{}", src.lo()));
        self.emitf(format!("std {ptr}+{}, r{}", off + 1, src.hi()));
    }

    pub(super) fn load_frame(&mut self, dst: Pair, slot: FrameSlot) {
        self.emit_comment(slot);
        self.load_word(dst, Base::Y, slot.offset(self.config.pc_bytes));
    }

    pub(super) fn store_frame(&mut self, slot: FrameSlot, src: Pair) {
        self.emit_comment(slot);
        self.store_word(Base::Y, slot.offset(self.config.pc_bytes), src);
    }

    /// Frame slot of argument `index`.
    pub(super) const fn arg_slot(&self, index: u32) -> FrameSlot {
        FrameSlot::Arg {
            index: self.num_args.saturating_sub(index + 1),
            height: self.frame_words,
        }
    }

    /// Frame slot of shared temporary `slot`.
    pub(super) const fn temp_slot(&self, slot: usize) -> FrameSlot {
        FrameSlot::Local(self.num_locals + slot as u32)
    }

    /// Point Z at `base` and access field `index` of an action or globals block.
    pub(super) fn load_indirect(&mut self, dst: Pair, base: Pair, index: u32, header: u32) {
        self.mov_pair(regs::Z, base);
        self.load_word(dst, Base::Z, header + 2 * index);
    }

    pub(super) fn store_indirect(&mut self, base: Pair, index: u32, header: u32, src: Pair) {
        self.mov_pair(regs::Z, base);
        self.store_word(Base::Z, header + 2 * index, src);
    }

    pub(super) const fn action_header() -> u32 {
        ACTION_FIELDS_OFFSET
    }
}
