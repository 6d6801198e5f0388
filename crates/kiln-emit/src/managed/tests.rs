use kiln_ir::{
    Binary, BitSize, CallingConvention, Cell, ClassInfo, CompileOptions, Expr, FieldInfo,
    MapMethod, ProcBuilder, Procedure, SharedId, Stmt,
};

use super::*;
use crate::{EmitConfig, EmitError, Emitter, emit_binary};

fn script(bin: &Binary, proc: &Procedure) -> Result<String> {
    ScriptEmitter::new(EmitConfig::new(Target::Script)).emit(bin, proc)
}

fn clr(bin: &Binary, proc: &Procedure) -> Result<String> {
    ClrEmitter::new(EmitConfig::new(Target::Clr)).emit(bin, proc)
}

fn with_options(breakpoints: bool, trace: bool) -> Binary {
    Binary::new().with_options(CompileOptions { breakpoints, trace })
}

#[test]
fn test_script_procedure_shape() {
    let b = ProcBuilder::new("main", 0).local("x");
    let x = b.local_cell("x").unwrap();
    let proc = b.expr(Expr::store(x, Expr::num(5))).build_resolved().unwrap();
    let out = script(&Binary::new(), &proc).unwrap();

    let expected = "
function main__P0(s) {
let r0 = s.r0, step = s.pc;
s.pc = -1;
while (true) {
if (rt.maybeYield(s, step, r0)) return null;
switch (step) {
  case 0:
    s.x___0 = undefined;
    s.x___0 = 5;
    return rt.leave(s, r0);
  default: rt.oops();
} } }
";
    assert_eq!(out, expected);
}

#[test]
fn test_jumps_per_dialect() {
    let b = ProcBuilder::new("loop", 0).local("i");
    let i = b.local_cell("i").unwrap();
    let proc = b
        .label("top")
        .stmt(Stmt::jmp_if_zero("done", Expr::cell(i.clone())))
        .stmt(Stmt::jmp_if_not_zero("top", Expr::cell(i)))
        .label("done")
        .build_resolved()
        .unwrap();

    let js = script(&Binary::new(), &proc).unwrap();
    assert!(js.contains("  case 1:\n    r0 = s.i___0;\n    if (!r0) { step = 2; continue; }\n"));
    assert!(js.contains("if (r0) { step = 1; continue; }\n  case 2:\n"));

    let cs = clr(&Binary::new(), &proc).unwrap();
    // Sections cannot fall through, so each label is entered explicitly.
    assert!(cs.contains("    goto case 1;\n  case 1:\n"));
    assert!(cs.contains("if (!rt.truthy(r0)) goto case 2;\n"));
    // The loop edge goes back through the yield check.
    assert!(cs.contains("top:\nif (rt.maybeYield(s, step, r0)) return null;\n"));
    assert!(cs.contains(
        "if (rt.truthy(r0)) { step = 1; goto top; }\n    goto case 2;\n  case 2:\n"
    ));
    assert!(cs.contains("  default: rt.oops(); return null;\n} }\n"));
}

#[test]
fn test_jump_on_equal_value() {
    let proc = ProcBuilder::new("sw", 0)
        .expr(Expr::rt_call("rt::key", vec![]))
        .stmt(Stmt::jmp_if_eq("hit", Expr::num(3)))
        .stmt(Stmt::jmp_if_eq("hit", Expr::rt_call("rt::other", vec![])))
        .label("hit")
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();
    assert!(js.contains("if (r0 === 3) { step = 1; continue; }\n"));
    assert!(js.contains(
        "s.jv = r0;\n    r0 = rt.other();\n    if (r0 === s.jv) { r0 = s.jv; { step = 1; continue; } }\n    r0 = s.jv;\n"
    ));
}

#[test]
fn test_suspend_call_registers_resume() {
    let proc = ProcBuilder::new("main", 0)
        .expr(Expr::rt_call_with(
            "rt::pause",
            vec![Expr::num(100)],
            CallingConvention::Suspend,
        ))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();
    assert!(js.contains(
        "    rt.setupResume(s, 1);\n    rt.pause(100);\n    rt.checkResumeConsumed();\n    return null;\n  case 1:\n    r0 = s.retval;\n"
    ));
}

#[test]
fn test_promise_call_adaptor() {
    let mut bin = Binary::new();
    let url = bin.add_string("x");
    let proc = ProcBuilder::new("main", 0)
        .expr(Expr::rt_call_with(
            "http::get",
            vec![Expr::ptr(&url)],
            CallingConvention::Promise,
        ))
        .build_resolved()
        .unwrap();

    let js = script(&bin, &proc).unwrap();
    assert!(js.contains(
        "(function (cb) { rt.http.get(_str0).then(cb); })(rt.buildResume(s, 1));\n    return null;\n  case 1:\n"
    ));
    let cs = clr(&bin, &proc).unwrap();
    assert!(cs.contains("rt.http.get(_str0).ContinueWith(rt.buildResume(s, 1));"));
}

#[test]
fn test_resume_cases_follow_labels() {
    let proc = ProcBuilder::new("main", 0)
        .label("a")
        .label("b")
        .expr(Expr::call("f__P1", vec![]))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();
    assert!(js.contains("s.pc = 3;\n    return s.callee;\n  case 3:\n"));
}

#[test]
fn test_static_call_stashes_compound_args() {
    let proc = ProcBuilder::new("main", 0)
        .expr(Expr::call(
            "helper__P1",
            vec![Expr::num(1), Expr::rt_call("rt::g", vec![])],
        ))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();
    let expected = "    r0 = rt.g();
    s.ca0_1 = r0;
    s.callee = rt.mkFrame(s, helper__P1);
    s.callee.arg0 = 1;
    s.callee.arg1 = s.ca0_1;
    s.pc = 1;
    return s.callee;
  case 1:
    r0 = s.retval;
";
    assert!(js.contains(expected), "{js}");
}

#[test]
fn test_dynamic_dispatch() {
    let b = ProcBuilder::new("main", 0).local("x");
    let x = b.local_cell("x").unwrap();
    let proc = b
        .expr(Expr::call_virtual(2, vec![Expr::cell(x.clone())]))
        .expr(Expr::call_iface(
            1,
            Some(MapMethod {
                key: 7,
                is_set: false,
            }),
            vec![Expr::cell(x)],
        ))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();

    assert!(js.contains("s.callee = rt.mkFrame(s, s.x___0.vtable.methods[2]);"));
    assert!(js.contains(
        "    if (s.x___0.vtable === rt.MAP_VTABLE) {\n        s.retval = rt.mapGet(s.x___0, 7);\n        { step = 2; continue; }\n    }\n    s.callee = rt.mkFrame(s, s.x___0.vtable.iface[1]);"
    ));

    let bad = ProcBuilder::new("bad", 0)
        .expr(Expr::call_iface(0, None, vec![]))
        .build_resolved()
        .unwrap();
    assert!(matches!(
        clr(&Binary::new(), &bad).unwrap_err(),
        EmitError::MissingReceiver { .. }
    ));
}

#[test]
fn test_map_setter_fast_path() {
    let b = ProcBuilder::new("main", 0).local("m");
    let m = b.local_cell("m").unwrap();
    let proc = b
        .expr(Expr::call_iface(
            0,
            Some(MapMethod {
                key: 3,
                is_set: true,
            }),
            vec![Expr::cell(m), Expr::num(9)],
        ))
        .build_resolved()
        .unwrap();
    let cs = clr(&Binary::new(), &proc).unwrap();
    assert!(cs.contains("if (object.Equals(s.m___0.vtable, rt.MAP_VTABLE)) {"));
    assert!(cs.contains("s.retval = rt.mapSet(s.m___0, 3, 9);\n        goto case 1;"));
}

#[test]
fn test_shared_value_evaluated_once() {
    let b = ProcBuilder::new("p", 0).local("x").local("y").local("z");
    let cells: Vec<Cell> = ["x", "y", "z"]
        .iter()
        .map(|n| b.local_cell(n).unwrap())
        .collect();
    let id = SharedId(0);
    let mut seq = vec![Expr::shared_def(id, 3, Expr::rt_call("rt::g", vec![]))];
    seq.extend(
        cells
            .iter()
            .map(|c| Expr::store(c.clone(), Expr::shared_ref(id))),
    );
    let proc = b.expr(Expr::seq(seq.clone())).stack_empty().build_resolved().unwrap();
    let js = script(&Binary::new(), &proc).unwrap();

    assert_eq!(js.matches("rt.g()").count(), 1);
    assert_eq!(js.matches("s.tmp_0 = r0;").count(), 1);
    assert_eq!(js.matches("= s.tmp_0;").count(), 3);

    let mut b = ProcBuilder::new("p", 0).local("x");
    let x = b.local_cell("x").unwrap();
    seq.push(Expr::store(x, Expr::shared_ref(id)));
    b = b.expr(Expr::seq(seq));
    let err = clr(&Binary::new(), &b.build_resolved().unwrap()).unwrap_err();
    assert!(matches!(err, EmitError::SharedOverused { total: 3, .. }));
}

#[test]
fn test_breakpoint_modes() {
    let proc = ProcBuilder::new("main", 0)
        .breakpoint(3)
        .stmt(Stmt::debugger(5))
        .build_resolved()
        .unwrap();

    let plain = script(&Binary::new(), &proc).unwrap();
    assert!(!plain.contains("s.lastBrkId = 3;"));
    assert!(plain.contains("s.lastBrkId = 5;\n    return rt.breakpoint(s, 1, 5, r0);\n  case 1:\n"));

    let debug = script(&with_options(true, false), &proc).unwrap();
    assert!(debug.contains(
        "s.lastBrkId = 3;\n    if ((rt.breakAlways && rt.isBreakFrame(s)) || breakpoints[3]) return rt.breakpoint(s, 1, 3, r0);\n  case 1:\n"
    ));

    let trace = script(&with_options(false, true), &proc).unwrap();
    assert!(trace.contains("s.lastBrkId = 3;\n    return rt.trace(3, s, 1, r0);\n  case 1:\n"));

    let both = script(&with_options(true, true), &proc).unwrap();
    assert!(both.contains("    else return rt.trace(3, s, 1, r0);\n"));
}

#[test]
fn test_cells_and_fields() {
    let b = ProcBuilder::new("p", 0)
        .arg("a")
        .local_with("b", Cell::with_boxed)
        .local_with("o", Cell::with_ref)
        .local_with("c", |c| c.with_bit_size(BitSize::Int8))
        .capture("k", false);
    let a = b.arg_cell("a").unwrap();
    let boxed = b.local_cell("b").unwrap();
    let obj = b.local_cell("o").unwrap();
    let small = b.local_cell("c").unwrap();
    let proc = b
        .expr(Expr::store(boxed.clone(), Expr::num(1)))
        .expr(Expr::cell(boxed))
        .expr(Expr::store(obj.clone(), Expr::cell(a)))
        .expr(Expr::store(small, Expr::num(300)))
        .expr(Expr::store(
            Cell::global(0, "score"),
            Expr::cell(Cell::capture(0, "k")),
        ))
        .expr(Expr::field(
            Expr::cell(obj.clone()),
            FieldInfo::new(0, "length").with_shim("String_::length"),
        ))
        .expr(Expr::field(Expr::cell(obj.clone()), FieldInfo::new(2, "next").with_ref()))
        .expr(Expr::store_field(Expr::cell(obj), FieldInfo::new(1, "n"), Expr::num(4)))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();

    assert!(js.contains("    s.b___0 = rt.mkloc();\n"));
    assert!(js.contains("if (s.lambdaArgs != null) {\n        s.arg0 = s.lambdaArgs[0];\n        s.lambdaArgs = null;\n    }\n"));
    assert!(js.contains("rt.stloc(s.b___0, 1);"));
    assert!(js.contains("r0 = rt.ldloc(s.b___0);"));
    assert!(js.contains("rt.decr(s.o___1);\n    s.o___1 = s.arg0;\n"));
    assert!(js.contains("s.c___2 = rt.toInt8(300);"));
    assert!(js.contains("globals.score___0 = s.caps[0];"));
    assert!(js.contains("r0 = rt.String_.length(s.o___1);"));
    assert!(js.contains("r0 = rt.ldfldRef(s.o___1, 2);"));
    assert!(js.contains("rt.stfld(s.o___1, 1, 4);"));
}

#[test]
fn test_inline_operators() {
    let b = ProcBuilder::new("p", 0).local("x");
    let x = b.local_cell("x").unwrap();
    let proc = b
        .expr(Expr::store(
            x.clone(),
            Expr::rt_call("Number_::adds", vec![Expr::cell(x), Expr::num(1)]),
        ))
        .build_resolved()
        .unwrap();
    let js = script(&Binary::new(), &proc).unwrap();
    assert!(js.contains("r0 = (s.x___0 + 1);\n    s.x___0 = r0;\n"));
}

#[test]
fn test_program_prelude_and_postlude() {
    let mut bin = with_options(true, false);
    bin.add_string("hi \"there\"");
    bin.add_hex(&[0xde, 0xad]);
    bin.iface_members.push("length".into());
    bin.add_class(
        ClassInfo::new("Point", 3)
            .with_fields(&[false, true])
            .with_method("Point_len__P1")
            .with_iface(1, "Point_len__P1"),
    );
    bin.add_proc(
        ProcBuilder::new("main", 0)
            .root()
            .breakpoint(0)
            .build_resolved()
            .unwrap(),
    );
    bin.add_proc(ProcBuilder::new("Point_len", 1).build_resolved().unwrap());

    let js = emit_binary(&bin, &EmitConfig::new(Target::Script)).unwrap();
    assert!(js.starts_with("(function (rt, globals) {\n\"use strict\";\n"));
    assert!(js.contains("const _str0 = \"hi \\\"there\\\"\";\n"));
    assert!(js.contains("const _hex1 = rt.bufferFromHex(\"dead\");\n"));
    assert!(js.contains("const breakpoints = rt.setupDebugger(1);\n"));
    assert!(js.contains("refMask: [false, true],\n  methods: [Point_len__P1],\n  iface: [null, Point_len__P1],"));
    assert!(js.contains("rt.setIfaceMembers([\"length\"]);"));
    assert!(js.ends_with("return main__P0;\n})\n"));

    let cs = emit_binary(&bin, &EmitConfig::new(Target::Clr)).unwrap();
    assert!(cs.contains("static readonly object _str0 = \"hi \\\"there\\\"\";\n"));
    assert!(cs.contains("new bool[] { false, true }, new LabelFn[] { Point_len__P1 }"));
    assert!(cs.ends_with("public static LabelFn Entry => main__P0;\n}\n"));
}

#[test]
fn test_runtime_name_is_configurable() {
    let proc = ProcBuilder::new("main", 0)
        .expr(Expr::rt_call("rt::g", vec![]))
        .build_resolved()
        .unwrap();
    let cfg = EmitConfig::new(Target::Script).with_runtime_name("sim");
    let js = ScriptEmitter::new(cfg).emit(&Binary::new(), &proc).unwrap();
    assert!(js.contains("r0 = sim.g();"));
    assert!(js.contains("return sim.leave(s, r0);"));
    assert!(!js.contains("rt."));
}
