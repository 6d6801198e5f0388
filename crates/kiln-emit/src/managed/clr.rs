//! Managed object-oriented dialect.
//!
//! Procedures become static methods of one partial class. A `switch` section
//! may not fall through, so every label is entered with an explicit
//! `goto case`. Jumps back to an earlier case re-enter through `top`, so loops
//! pass the yield check.

use kiln_ir::{Binary, LiteralData};

use super::{Dialect, entry_label, hex_string, quote};
use crate::config::Target;

pub struct Clr;

impl Dialect for Clr {
    const TARGET: Target = Target::Clr;
    const UNDEFINED: &'static str = "null";

    fn open(label: &str, rt: &str) -> String {
        format!(
            "\nstatic Frame {label}(Frame s) {{\n\
             var r0 = s.r0; var step = s.pc;\n\
             s.pc = -1;\n\
             top:\n\
             if ({rt}.maybeYield(s, step, r0)) return null;\n\
             switch (step) {{"
        )
    }

    fn close(rt: &str) -> String {
        format!("  default: {rt}.oops(); return null;\n}} }}")
    }

    fn goto(n: u32, backward: bool) -> String {
        if backward {
            format!("{{ step = {n}; goto top; }}")
        } else {
            format!("goto case {n};")
        }
    }

    fn case(n: u32) -> String {
        if n == 0 {
            return "  case 0:".to_string();
        }
        format!("    goto case {n};\n  case {n}:")
    }

    fn truthy(rt: &str, value: &str) -> String {
        format!("{rt}.truthy({value})")
    }

    fn same(a: &str, b: &str) -> String {
        format!("object.Equals({a}, {b})")
    }

    fn promise(call: &str, resume: &str) -> String {
        format!("{call}.ContinueWith({resume});")
    }

    fn prelude(bin: &Binary, rt: &str) -> String {
        let mut out = String::from("// kiln clr output\npublic static partial class Program {\n");
        for lit in &bin.literals {
            let value = match &lit.data {
                LiteralData::Str(s) => quote(s),
                LiteralData::Hex(bytes) => {
                    format!("{rt}.bufferFromHex(\"{}\")", hex_string(bytes))
                }
            };
            out.push_str(&format!("static readonly object {} = {value};\n", lit.label));
        }
        if bin.options.breakpoints {
            out.push_str(&format!(
                "static readonly bool[] breakpoints = {rt}.setupDebugger({});\n",
                bin.breakpoint_count()
            ));
        }
        out
    }

    fn postlude(bin: &Binary, rt: &str) -> String {
        let mut out = String::new();
        for class in &bin.classes {
            let mask: Vec<&str> = class
                .ref_mask
                .iter()
                .map(|r| if *r { "true" } else { "false" })
                .collect();
            let iface: Vec<&str> = class
                .iface
                .iter()
                .map(|m| m.as_deref().unwrap_or("null"))
                .collect();
            out.push_str(&format!(
                "\nstatic readonly VTable {} = {rt}.mkVTable({}, {}, new bool[] {{ {} }}, new LabelFn[] {{ {} }}, new LabelFn[] {{ {} }});\n",
                class.vtable_label(),
                quote(&class.name),
                class.class_no,
                mask.join(", "),
                class.methods.join(", "),
                iface.join(", "),
            ));
        }
        out.push_str(&format!(
            "\npublic static LabelFn Entry => {};\n}}\n",
            entry_label(bin).as_deref().unwrap_or("null")
        ));
        out
    }
}
