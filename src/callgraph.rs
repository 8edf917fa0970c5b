//! Call-graph export in DOT syntax.
//!
//! One node per subroutine/restart/absolute label, scaled by cyclomatic
//! complexity; edges lead to the distinct callees collected by the
//! analysis.

use crate::disassembler::Disassembler;
use crate::label::LabelType;
use crate::opcode::hex_word;
use std::collections::BTreeSet;
use std::fmt::Write;

const MIN_FONT_SIZE: usize = 13;
const MAX_FONT_SIZE: usize = 40;

fn node_name(disasm: &Disassembler, addr: u16) -> String {
    disasm
        .labels
        .get(addr)
        .and_then(|l| l.name.clone())
        .unwrap_or_else(|| hex_word(addr))
}

/// Font size linear in cyclomatic complexity between the configured
/// bounds.
fn font_size(cc: usize, cc_min: usize, cc_max: usize) -> usize {
    if cc_max <= cc_min {
        return MIN_FONT_SIZE;
    }
    MIN_FONT_SIZE + (cc.saturating_sub(cc_min)) * (MAX_FONT_SIZE - MIN_FONT_SIZE) / (cc_max - cc_min)
}

pub fn render(disasm: &Disassembler) -> String {
    let mut out = String::new();
    writeln!(out, "digraph Callgraph {{").unwrap();

    let tops: Vec<u16> = disasm
        .labels
        .iter()
        .filter(|(_, l)| l.ty.is_top_code())
        .map(|(a, _)| a)
        .collect();

    let cc_min = disasm.stats_min.cyclomatic_complexity;
    let cc_max = disasm.stats_max.cyclomatic_complexity;

    for &addr in &tops {
        let label = disasm.labels.get(addr).unwrap();
        let name = node_name(disasm, addr);

        if label.is_equ {
            writeln!(
                out,
                "    \"{}\" [fontsize={}, color=grey, fontcolor=grey];",
                name, MIN_FONT_SIZE
            )
            .unwrap();
            continue;
        }

        let mut attrs = String::new();
        match disasm.statistics.get(&addr) {
            Some(stats) => {
                let size = font_size(stats.cyclomatic_complexity, cc_min, cc_max);
                write!(
                    attrs,
                    "fontsize={}, label=\"{}\\nSize={}\\nCC={}\"",
                    size, name, stats.size_in_bytes, stats.cyclomatic_complexity
                )
                .unwrap();
            }
            None => {
                write!(attrs, "fontsize={}", MIN_FONT_SIZE).unwrap();
            }
        }
        if disasm.self_call_warned.contains(&addr) {
            attrs.push_str(", style=filled, fillcolor=lightblue");
        } else if label.references.is_empty() {
            attrs.push_str(", style=filled, fillcolor=lightyellow");
        }
        writeln!(out, "    \"{}\" [{}];", name, attrs).unwrap();
    }

    // Unreferenced labels share one rank; referenced absolute labels
    // another.
    let unreferenced: Vec<String> = tops
        .iter()
        .filter(|&&a| {
            let l = disasm.labels.get(a).unwrap();
            !l.is_equ && l.references.is_empty()
        })
        .map(|&a| node_name(disasm, a))
        .collect();
    if !unreferenced.is_empty() {
        let row: Vec<String> = unreferenced.iter().map(|n| format!("\"{}\"", n)).collect();
        writeln!(out, "    {{ rank=same; {}; }}", row.join("; ")).unwrap();
    }
    let referenced_lbls: Vec<String> = tops
        .iter()
        .filter(|&&a| {
            let l = disasm.labels.get(a).unwrap();
            !l.is_equ && l.ty == LabelType::CodeLbl && !l.references.is_empty()
        })
        .map(|&a| node_name(disasm, a))
        .collect();
    if !referenced_lbls.is_empty() {
        let row: Vec<String> = referenced_lbls
            .iter()
            .map(|n| format!("\"{}\"", n))
            .collect();
        writeln!(out, "    {{ rank=same; {}; }}", row.join("; ")).unwrap();
    }

    // Edges to distinct callees.
    for &addr in &tops {
        let label = disasm.labels.get(addr).unwrap();
        let name = node_name(disasm, addr);
        let mut seen: BTreeSet<u16> = BTreeSet::new();
        for &callee in &label.calls {
            if seen.insert(callee) {
                writeln!(out, "    \"{}\" -> \"{}\";", name, node_name(disasm, callee)).unwrap();
            }
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_size_scaling() {
        assert_eq!(font_size(1, 1, 1), 13);
        assert_eq!(font_size(1, 1, 10), 13);
        assert_eq!(font_size(10, 1, 10), 40);
        // Halfway lands halfway between the bounds.
        let mid = font_size(5, 1, 9);
        assert!(mid > 13 && mid < 40);
    }

    #[test]
    fn test_graph_nodes_and_edges() {
        // SUB1 at 0 calls SUB2 at 8 twice; the edge is emitted once.
        let mut dasm = Disassembler::new();
        dasm.memory.set_bytes(
            0x0000,
            &[0xcd, 0x08, 0x00, 0xcd, 0x08, 0x00, 0xc9, 0x00, 0x3e, 0x02, 0xc9],
        );
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();
        let graph = dasm.call_graph();

        assert!(graph.starts_with("digraph Callgraph {"));
        assert!(graph.contains("\"SUB1\" -> \"SUB2\";"));
        assert_eq!(graph.matches("-> \"SUB2\"").count(), 1);
        assert!(graph.contains("Size=7"));
        // The entry has no referrers: tinted and ranked.
        assert!(graph.contains("fillcolor=lightyellow"));
        assert!(graph.contains("rank=same"));
    }

    #[test]
    fn test_equ_nodes_render_grey() {
        let mut dasm = Disassembler::new();
        dasm.memory.set_bytes(0x0000, &[0xcd, 0x00, 0x90, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();
        let graph = dasm.call_graph();
        assert!(graph.contains("color=grey"));
    }

    #[test]
    fn test_self_call_tinted_lightblue() {
        let mut dasm = Disassembler::new();
        dasm.memory.set_bytes(0x0000, &[0x3e, 0x01, 0xcd, 0x00, 0x00, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();
        let graph = dasm.call_graph();
        assert!(graph.contains("fillcolor=lightblue"));
        // The self edge is present.
        assert!(graph.contains("\"SUB1\" -> \"SUB1\";"));
    }
}
