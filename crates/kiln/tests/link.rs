//! End-to-end linking through the library and the `kiln` binary.

use std::fs;
use std::path::Path;
use std::process::Command;

use kiln::{
    Binary, CompileOptions, EmitConfig, Error, Expr, HexRecord, ImageConfig, ImageError,
    LinkOptions, Pipeline, ProcBuilder, RecordKind, Stmt, Target, parse_records, template_hash,
};
use tempfile::tempdir;

/// Template with firmware at 0x0000..0x0100, the jump table head at 0x0100,
/// one table record of word addresses 0x0200.. and a data record at 0x0120.
fn template() -> String {
    let mut lines = vec![HexRecord::ext_linear(0).encode()];
    for i in 0..16u16 {
        lines.push(HexRecord::data(i * 16, vec![0xAA; 16]).encode());
    }
    let marker = ImageConfig::default().jump_table_marker;
    lines.push(HexRecord::data(0x100, marker).encode());
    let table: Vec<u8> = (0x200u16..0x208).flat_map(u16::to_le_bytes).collect();
    lines.push(HexRecord::data(0x110, table).encode());
    lines.push(HexRecord::data(0x120, vec![0x55; 16]).encode());
    lines.push(":00000001FF".to_string());
    lines.join("\r\n") + "\r\n"
}

fn counting_loop() -> Binary {
    let mut bin = Binary::new().with_options(CompileOptions {
        breakpoints: true,
        trace: false,
    });
    let msg = bin.add_string("tick");
    let b = ProcBuilder::new("main", 0).root().local("i");
    let i = b.local_cell("i").unwrap();
    bin.add_proc(
        b.label("top")
            .breakpoint(1)
            .expr(Expr::store(
                i.clone(),
                Expr::rt_call("Number_::adds", vec![Expr::cell(i.clone()), Expr::num(1)]),
            ))
            .expr(Expr::rt_call("rt::print", vec![Expr::ptr(&msg)]))
            .stmt(Stmt::jmp_if_not_zero("top", Expr::cell(i)))
            .build_resolved()
            .unwrap(),
    );
    bin
}

fn header(lines: &[String]) -> HexRecord {
    lines
        .iter()
        .map(|l| HexRecord::parse(l, 0).unwrap())
        .find(|r| r.kind == RecordKind::Data && r.addr == 0x100)
        .unwrap()
}

// ============================================================================
// Library
// ============================================================================

#[test]
fn test_build_links_program_into_template() {
    let t = template();
    let pipeline = Pipeline::new(EmitConfig::new(Target::Avr));
    let linked = pipeline
        .build(&counting_loop(), &t, &["rt::print"], &LinkOptions::default())
        .unwrap();

    assert_eq!(linked.program.origin, 0x400);
    assert_eq!(linked.program.labels["_str0"], 0x400);
    assert!(linked.program.labels["main__P0"] > 0x400);
    assert_eq!(linked.program.breakpoint_addrs().len(), 1);

    let records = parse_records(&linked.image.to_text()).unwrap();
    assert_eq!(records.last().map(|r| r.kind), Some(RecordKind::Eof));
    assert!(records.len() > parse_records(&t).unwrap().len());

    let head = header(&linked.image.lines);
    assert_eq!(&head.data[..8], &[0x10, 0x42, 0, 0, 0x00, 0x04, 0, 0]);
    assert_eq!(&head.data[8..], &template_hash(&t));

    assert_eq!(linked.image.quick_flash.start_addr, 0x400);
    assert_eq!(linked.image.quick_flash.words.len(), 256);
}

#[test]
fn test_empty_program_leaves_template_intact() {
    let t = template();
    let linked = Pipeline::default()
        .link_text("", &t, &[], &LinkOptions::default().with_globals(3))
        .unwrap();

    let before = parse_records(&t).unwrap();
    let after = parse_records(&linked.image.to_text()).unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        if a.addr == 0x100 && a.kind == RecordKind::Data {
            assert_eq!(b.data.len(), 16);
            assert_eq!(&b.data[..4], &[0x10, 0x42, 3, 0]);
        } else {
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_oversized_program_rejected() {
    let pipeline = Pipeline::default()
        .with_image_config(ImageConfig::default().with_max_program_bytes(4));
    let err = pipeline
        .link_text("nop\nnop\nnop\n", &template(), &[], &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Image(ImageError::ProgramTooLarge { size: 6, max: 4 })
    ));
}

#[test]
fn test_unknown_runtime_symbol_fails_assembly() {
    let pipeline = Pipeline::new(EmitConfig::new(Target::Avr));
    let err = pipeline
        .build(&counting_loop(), &template(), &[], &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Asm(e) if e.proc == "main__P0"));
}

#[test]
fn test_managed_targets_emit_text() {
    let bin = counting_loop();
    for target in [Target::Script, Target::Clr] {
        let text = Pipeline::new(EmitConfig::new(target)).emit(&bin).unwrap();
        assert!(text.contains("main__P0"), "{target}");
    }
}

// ============================================================================
// CLI
// ============================================================================

fn kiln(args: &[&str], dir: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "kiln=warn")
        .output()
        .unwrap()
}

#[test]
fn test_cli_asm_verify_extract() {
    let dir = tempdir().unwrap();
    let source = "main:\n    call rt::print\n    ret\n";
    fs::write(dir.path().join("t.hex"), template()).unwrap();
    fs::write(dir.path().join("syms.txt"), "# runtime\nrt::print\n").unwrap();
    fs::write(dir.path().join("prog.s"), source).unwrap();

    let out = kiln(
        &[
            "asm",
            "prog.s",
            "-t",
            "t.hex",
            "--symbols",
            "syms.txt",
            "-o",
            "out.hex",
            "--quick-flash",
            "qf.txt",
            "--embed",
            "prog.s",
        ],
        dir.path(),
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let qf = fs::read_to_string(dir.path().join("qf.txt")).unwrap();
    assert!(qf.starts_with("@00000400\n"));

    let out = kiln(&["verify", "out.hex", "t.hex"], dir.path());
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("out.hex: ok"));

    let out = kiln(&["extract", "out.hex", "-o", "back.s"], dir.path());
    assert!(out.status.success());
    assert_eq!(fs::read_to_string(dir.path().join("back.s")).unwrap(), source);
}

#[test]
fn test_cli_verify_reports_bad_checksum() {
    let dir = tempdir().unwrap();
    let broken = template().replace(":00000001FF", ":00000001FE");
    fs::write(dir.path().join("bad.hex"), broken).unwrap();

    let out = kiln(&["verify", "bad.hex"], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("checksum"));
}

#[test]
fn test_cli_info() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("t.hex"), template()).unwrap();
    fs::write(dir.path().join("syms.txt"), "rt::print\nrt::decr\n").unwrap();

    let out = kiln(&["info", "t.hex", "--symbols", "syms.txt"], dir.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Jump table: 0x0100"));
    assert!(stdout.contains("Code start: 0x0130 (page 0x0400)"));
    assert!(stdout.contains("rt::decr"));
}
