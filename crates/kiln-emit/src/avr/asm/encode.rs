//! AVR instruction encodings.
//!
//! Each helper validates its operand ranges and returns the opcode word(s).

use super::AsmErrorKind;

type EncResult<T> = std::result::Result<T, AsmErrorKind>;

fn bad(msg: impl Into<String>) -> AsmErrorKind {
    AsmErrorKind::BadOperand(msg.into())
}

fn check_reg(r: u8) -> EncResult<u16> {
    if r < 32 {
        Ok(u16::from(r))
    } else {
        Err(bad(format!("r{r}")))
    }
}

fn check_upper(r: u8) -> EncResult<u16> {
    if (16..32).contains(&r) {
        Ok(u16::from(r - 16))
    } else {
        Err(bad(format!("r{r} is not an upper register")))
    }
}

fn check_byte(k: i64) -> EncResult<u16> {
    if (-128..=255).contains(&k) {
        Ok((k as u16) & 0xff)
    } else {
        Err(bad(format!("immediate {k} does not fit a byte")))
    }
}

/// `ldi`, `subi`, `sbci`, `cpi`: `oooo KKKK dddd KKKK`.
pub(super) fn reg_imm(base: u16, d: u8, k: i64) -> EncResult<u16> {
    let d = check_upper(d)?;
    let k = check_byte(k)?;
    Ok(base | ((k & 0xf0) << 4) | (d << 4) | (k & 0x0f))
}

/// Two-register ALU ops: `oooo oord dddd rrrr`.
pub(super) fn reg_reg(base: u16, d: u8, r: u8) -> EncResult<u16> {
    let d = check_reg(d)?;
    let r = check_reg(r)?;
    Ok(base | ((r & 0x10) << 5) | (d << 4) | (r & 0x0f))
}

/// `push`/`pop`: `1001 00xd dddd 1111`.
pub(super) fn stack(base: u16, d: u8) -> EncResult<u16> {
    Ok(base | (check_reg(d)? << 4))
}

/// `in Rd, A` / `out A, Rr`: `1011 xAAd dddd AAAA`.
pub(super) fn io(base: u16, d: u8, a: i64) -> EncResult<u16> {
    if !(0..64).contains(&a) {
        return Err(bad(format!("I/O address {a} out of range")));
    }
    let a = a as u16;
    Ok(base | ((a & 0x30) << 5) | (check_reg(d)? << 4) | (a & 0x0f))
}

/// `movw Rd, Rr` with even registers.
pub(super) fn movw(d: u8, r: u8) -> EncResult<u16> {
    if d % 2 != 0 || r % 2 != 0 || d > 30 || r > 30 {
        return Err(bad(format!("movw needs even registers, got r{d}, r{r}")));
    }
    Ok(0x0100 | (u16::from(d / 2) << 4) | u16::from(r / 2))
}

/// `adiw`/`sbiw` on r24, r26, r28 or r30.
pub(super) fn word_imm(base: u16, d: u8, k: i64) -> EncResult<u16> {
    if !matches!(d, 24 | 26 | 28 | 30) {
        return Err(bad(format!("r{d} is not a word register")));
    }
    if !(0..64).contains(&k) {
        return Err(bad(format!("word immediate {k} out of range")));
    }
    let k = k as u16;
    Ok(base | ((k & 0x30) << 2) | (u16::from((d - 24) / 2) << 4) | (k & 0x0f))
}

/// Pointer register for displacement addressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Ptr {
    Y,
    Z,
}

/// `ldd`/`std` with displacement: `10q0 qqsd dddd pqqq`.
pub(super) fn displaced(store: bool, ptr: Ptr, q: i64, reg: u8) -> EncResult<u16> {
    if !(0..64).contains(&q) {
        return Err(bad(format!("displacement {q} out of range")));
    }
    let q = q as u16;
    let mut op = 0x8000 | ((q & 0x20) << 8) | ((q & 0x18) << 7) | (q & 0x07);
    if store {
        op |= 0x0200;
    }
    if ptr == Ptr::Y {
        op |= 0x0008;
    }
    Ok(op | (check_reg(reg)? << 4))
}

/// Conditional branch with a 7-bit signed word offset.
pub(super) fn branch(base: u16, offset: i64) -> Option<u16> {
    (-64..=63)
        .contains(&offset)
        .then(|| base | (((offset as u16) & 0x7f) << 3))
}

/// `rjmp`/`rcall` with a 12-bit signed word offset.
pub(super) fn relative(base: u16, offset: i64) -> Option<u16> {
    (-2048..=2047)
        .contains(&offset)
        .then(|| base | ((offset as u16) & 0x0fff))
}

/// 32-bit `jmp`/`call` to an absolute word address.
pub(super) fn long(base: u16, word_addr: u32) -> EncResult<[u16; 2]> {
    if word_addr >= 1 << 22 {
        return Err(bad(format!("address {word_addr:#x} out of range")));
    }
    let hi = word_addr >> 16;
    let first = base | (((hi & 0x3e) as u16) << 3) | ((hi & 1) as u16);
    Ok([first, (word_addr & 0xffff) as u16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_imm() {
        // ldi r24, 0x12
        assert_eq!(reg_imm(0xe000, 24, 0x12), Ok(0xe182));
        // subi r28, 5
        assert_eq!(reg_imm(0x5000, 28, 5), Ok(0x50c5));
        assert!(reg_imm(0xe000, 2, 1).is_err());
    }

    #[test]
    fn test_reg_reg() {
        // add r24, r22
        assert_eq!(reg_reg(0x0c00, 24, 22), Ok(0x0f86));
        // cp r24, r1
        assert_eq!(reg_reg(0x1400, 24, 1), Ok(0x1581));
    }

    #[test]
    fn test_stack_and_io() {
        assert_eq!(stack(0x920f, 29), Ok(0x93df)); // push r29
        assert_eq!(stack(0x900f, 28), Ok(0x91cf)); // pop r28
        assert_eq!(io(0xb000, 28, 0x3d), Ok(0xb7cd)); // in r28, 0x3d
        assert_eq!(io(0xb800, 29, 0x3e), Ok(0xbfde)); // out 0x3e, r29
    }

    #[test]
    fn test_word_ops() {
        assert_eq!(movw(30, 28), Ok(0x01fe));
        assert!(movw(29, 28).is_err());
        assert_eq!(word_imm(0x9600, 30, 63), Ok(0x96ff)); // adiw r30, 63
        assert!(word_imm(0x9600, 22, 1).is_err());
    }

    #[test]
    fn test_displaced() {
        assert_eq!(displaced(false, Ptr::Y, 1, 24), Ok(0x8189)); // ldd r24, Y+1
        assert_eq!(displaced(true, Ptr::Z, 0, 25), Ok(0x8390)); // std Z+0, r25
        assert_eq!(displaced(false, Ptr::Y, 63, 24), Ok(0xad8f)); // ldd r24, Y+63
        assert!(displaced(false, Ptr::Y, 64, 24).is_err());
    }

    #[test]
    fn test_branches() {
        assert_eq!(branch(0xf001, 2), Some(0xf011)); // breq .+4
        assert_eq!(branch(0xf401, -1), Some(0xf7f9)); // brne .-2
        assert_eq!(branch(0xf001, 64), None);
        assert_eq!(relative(0xc000, -1), Some(0xcfff));
        assert_eq!(long(0x940c, 0x1234), Ok([0x940c, 0x1234]));
        assert_eq!(long(0x940e, 0x3_0000), Ok([0x941f, 0x0000]));
    }
}
