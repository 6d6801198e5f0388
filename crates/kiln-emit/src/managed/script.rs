//! Dynamic-scripting dialect.
//!
//! The whole program is one function expression taking the runtime and the
//! globals object and returning the entry procedure. Each procedure loops over
//! a `switch` so that jumps are `step = n; continue;`.

use kiln_ir::{Binary, LiteralData};

use super::{Dialect, entry_label, hex_string, quote};
use crate::config::Target;

pub struct Script;

impl Dialect for Script {
    const TARGET: Target = Target::Script;
    const UNDEFINED: &'static str = "undefined";

    fn open(label: &str, rt: &str) -> String {
        format!(
            "\nfunction {label}(s) {{\n\
             let r0 = s.r0, step = s.pc;\n\
             s.pc = -1;\n\
             while (true) {{\n\
             if ({rt}.maybeYield(s, step, r0)) return null;\n\
             switch (step) {{"
        )
    }

    fn close(rt: &str) -> String {
        format!("  default: {rt}.oops();\n}} }} }}")
    }

    fn goto(n: u32, _backward: bool) -> String {
        format!("{{ step = {n}; continue; }}")
    }

    fn case(n: u32) -> String {
        format!("  case {n}:")
    }

    fn truthy(_rt: &str, value: &str) -> String {
        value.to_string()
    }

    fn same(a: &str, b: &str) -> String {
        format!("{a} === {b}")
    }

    fn promise(call: &str, resume: &str) -> String {
        format!("(function (cb) {{ {call}.then(cb); }})({resume});")
    }

    fn prelude(bin: &Binary, rt: &str) -> String {
        let mut out = format!("(function ({rt}, globals) {{\n\"use strict\";\n");
        for lit in &bin.literals {
            let value = match &lit.data {
                LiteralData::Str(s) => quote(s),
                LiteralData::Hex(bytes) => {
                    format!("{rt}.bufferFromHex(\"{}\")", hex_string(bytes))
                }
            };
            out.push_str(&format!("const {} = {value};\n", lit.label));
        }
        if bin.options.breakpoints {
            out.push_str(&format!(
                "const breakpoints = {rt}.setupDebugger({});\n",
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
                "\nconst {} = {rt}.mkVTable({{\n  name: {},\n  classNo: {},\n  numFields: {},\n  refMask: [{}],\n  methods: [{}],\n  iface: [{}],\n}});\n",
                class.vtable_label(),
                quote(&class.name),
                class.class_no,
                class.num_fields(),
                mask.join(", "),
                class.methods.join(", "),
                iface.join(", "),
            ));
        }
        let members: Vec<String> = bin.iface_members.iter().map(|m| quote(m)).collect();
        out.push_str(&format!("{rt}.setIfaceMembers([{}]);\n", members.join(", ")));
        out.push_str(&format!(
            "\nreturn {};\n}})\n",
            entry_label(bin).as_deref().unwrap_or("null")
        ));
        out
    }
}
