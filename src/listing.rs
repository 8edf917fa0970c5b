//! Listing formatter.
//!
//! Renders the analyzed address space as assembler text: an EQU preamble for
//! labels outside the loaded image, ORG directives at block transitions,
//! instruction lines in address/bytes/mnemonic/comment columns and DEFB
//! lines for data bytes.

use crate::disassembler::Disassembler;
use crate::label::{LabelStore, LabelType};
use crate::memory::{attr, MEMORY_SIZE};
use crate::opcode::{self, hex_byte, hex_word, Instruction};

/// Output configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Render mnemonics in lowercase.
    pub opcodes_lower_case: bool,
    /// Blank lines between code blocks.
    pub number_of_lines_between_blocks: usize,
    pub add_references_to_subroutines: bool,
    pub add_references_to_absolute_labels: bool,
    pub add_references_to_rst_labels: bool,
    pub add_references_to_data_labels: bool,
    /// Include the raw-byte column.
    pub add_opcode_bytes: bool,
    pub label_sub_prefix: String,
    pub label_lbl_prefix: String,
    pub label_rst_prefix: String,
    pub label_data_lbl_prefix: String,
    pub label_self_modifying_prefix: String,
    pub label_local_lable_prefix: String,
    pub label_loop_prefix: String,
    pub label_intrpt_prefix: String,
    /// Column widths.
    pub clmns_address: usize,
    pub clmns_bytes: usize,
    pub clmns_opcode_first_part: usize,
    pub clmsn_opcode_total: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            opcodes_lower_case: true,
            number_of_lines_between_blocks: 2,
            add_references_to_subroutines: true,
            add_references_to_absolute_labels: true,
            add_references_to_rst_labels: true,
            add_references_to_data_labels: true,
            add_opcode_bytes: true,
            label_sub_prefix: "SUB".to_string(),
            label_lbl_prefix: "LBL".to_string(),
            label_rst_prefix: "RST".to_string(),
            label_data_lbl_prefix: "DATA".to_string(),
            label_self_modifying_prefix: "SELF_MOD".to_string(),
            label_local_lable_prefix: "_l".to_string(),
            label_loop_prefix: "_loop".to_string(),
            label_intrpt_prefix: "INTRPT".to_string(),
            clmns_address: 6,
            clmns_bytes: 13,
            clmns_opcode_first_part: 5,
            clmsn_opcode_total: 21,
        }
    }
}

/// Immediate-to-name conversion for the renderer, borrowing the label
/// store for the duration of one disassembly.
pub struct RenderContext<'a> {
    labels: &'a LabelStore,
}

impl<'a> RenderContext<'a> {
    pub fn new(labels: &'a LabelStore) -> Self {
        RenderContext { labels }
    }

    /// The label name standing for `value`, if any. Values covered by an
    /// offset label render as the anchor's name plus a signed suffix.
    pub fn label_name(&self, value: u16) -> Option<String> {
        if let Some(label) = self.labels.get(value) {
            return label.name.clone();
        }
        if let Some(offs) = self.labels.offset(value) {
            let anchor = (value as i32 + offs) as u16;
            if let Some(name) = self.labels.get(anchor).and_then(|l| l.name.clone()) {
                return Some(format!("{}{}", name, offset_suffix(offs)));
            }
        }
        None
    }
}

/// Text appended to an anchor name to reach the original target.
pub(crate) fn offset_suffix(offs: i32) -> String {
    if offs > 0 {
        format!("{}", -offs)
    } else {
        format!("+{}", -offs)
    }
}

/// Kinds whose immediate may stand for an address with a label.
fn substitutable(kind: LabelType) -> bool {
    matches!(
        kind,
        LabelType::CodeLbl
            | LabelType::CodeSub
            | LabelType::CodeRst
            | LabelType::CodeLocalLbl
            | LabelType::CodeLocalLoop
            | LabelType::DataLbl
            | LabelType::NumberWord
            | LabelType::NumberWordBigEndian
    )
}

/// Render the mnemonic of one instruction, substituting the immediate
/// sentinel. Returns the text and an optional comment.
fn instruction_text(
    inst: &Instruction,
    ctx: &RenderContext,
    opts: &Options,
) -> (String, Option<String>) {
    let mut text = inst.mnemonic.clone();
    if opts.opcodes_lower_case {
        text = text.to_lowercase();
    }

    if text.contains("#nn") {
        let name = if substitutable(inst.value_kind) {
            ctx.label_name(inst.value)
        } else {
            None
        };
        let substituted = name.is_some();
        text = text.replace("#nn", &name.unwrap_or_else(|| hex_word(inst.value)));
        let comment = if substituted {
            Some(hex_word(inst.value))
        } else {
            None
        };
        (text, comment)
    } else if text.contains("#n") {
        text = text.replace("#n", &hex_byte(inst.value as u8));
        (text, None)
    } else {
        (text, None)
    }
}

fn pad(text: &str, width: usize) -> String {
    if text.len() >= width {
        format!("{} ", text)
    } else {
        format!("{:<w$}", text, w = width)
    }
}

/// Pad the operation word so operands line up.
fn pad_first_part(text: &str, width: usize) -> String {
    match text.split_once(' ') {
        Some((op, rest)) => format!("{}{}", pad(op, width), rest),
        None => text.to_string(),
    }
}

fn format_line(
    opts: &Options,
    addr: u16,
    raw: &[u8],
    text: &str,
    comment: Option<&str>,
) -> String {
    let mut line = pad(&format!("{:04X}", addr), opts.clmns_address);
    if opts.add_opcode_bytes {
        let mut bytes = String::new();
        for b in raw {
            bytes.push_str(&format!("{:02X} ", b));
        }
        line.push_str(&pad(bytes.trim_end(), opts.clmns_bytes));
    }
    line.push_str(&pad(
        &pad_first_part(text, opts.clmns_opcode_first_part),
        opts.clmsn_opcode_total,
    ));
    if let Some(c) = comment {
        line.push_str("; ");
        line.push_str(c);
    }
    line.trim_end().to_string()
}

/// `NAME[addr]` rendering of one referrer through the parent map.
fn referrer_text(labels: &LabelStore, parents: &[Option<u16>], r: u16) -> String {
    let parent_name = parents[r as usize]
        .and_then(|p| labels.get(p))
        .and_then(|l| l.name.clone());
    match parent_name {
        Some(name) => format!("{}[{}]", name, hex_word(r)),
        None => hex_word(r),
    }
}

fn references_text(labels: &LabelStore, parents: &[Option<u16>], refs: &[u16]) -> String {
    let noun = if refs.len() == 1 {
        "reference"
    } else {
        "references"
    };
    let rendered: Vec<String> = refs
        .iter()
        .map(|&r| referrer_text(labels, parents, r))
        .collect();
    format!("{} {}: {}", refs.len(), noun, rendered.join(", "))
}

fn references_enabled(opts: &Options, ty: LabelType) -> bool {
    match ty {
        LabelType::CodeSub => opts.add_references_to_subroutines,
        LabelType::CodeLbl => opts.add_references_to_absolute_labels,
        LabelType::CodeRst => opts.add_references_to_rst_labels,
        LabelType::DataLbl => opts.add_references_to_data_labels,
        _ => false,
    }
}

fn defb_comment(v: u8) -> String {
    if v.is_ascii_graphic() || v == b' ' {
        format!("{}, '{}'", v, v as char)
    } else {
        format!("{}", v)
    }
}

fn keyword(opts: &Options, word: &str) -> String {
    if opts.opcodes_lower_case {
        word.to_lowercase()
    } else {
        word.to_string()
    }
}

/// Append `count` blank lines, unless the listing is still empty.
fn push_blank(lines: &mut Vec<String>, count: usize) {
    if lines.is_empty() {
        return;
    }
    for _ in 0..count {
        lines.push(String::new());
    }
}

/// Render the whole listing. Data bytes are tagged DATA as they are
/// emitted.
pub fn render(disasm: &mut Disassembler) -> Vec<String> {
    let opts = disasm.opts.clone();
    let mut lines: Vec<String> = Vec::new();

    // EQU preamble: labels whose target was never assigned.
    let mut equs: Vec<u16> = disasm
        .labels
        .iter()
        .filter(|(_, l)| l.is_equ)
        .map(|(a, _)| a)
        .collect();
    equs.sort_unstable();
    for addr in &equs {
        let label = disasm.labels.get(*addr).unwrap();
        let name = label.name.clone().unwrap_or_else(|| hex_word(*addr));
        let refs: Vec<u16> = label.references.iter().copied().collect();
        let mut line = format!(
            "{}: {} {} ; {}.",
            name,
            keyword(&opts, "EQU"),
            addr,
            hex_word(*addr)
        );
        if !refs.is_empty() {
            line.push(' ');
            line.push_str(&references_text(&disasm.labels, &disasm.parents, &refs));
        }
        lines.push(line);
    }

    // Body.
    let mut addr = 0usize;
    let mut in_block = false;
    while addr < MEMORY_SIZE {
        let a16 = addr as u16;
        let a = disasm.memory.attribute(a16);
        if a & attr::ASSIGNED == 0 {
            in_block = false;
            addr += 1;
            continue;
        }
        if !in_block {
            push_blank(&mut lines, opts.number_of_lines_between_blocks);
            lines.push(format!(
                "{} {} ; {}",
                keyword(&opts, "ORG"),
                addr,
                hex_word(a16)
            ));
            in_block = true;
        }

        // Label line, preceded by its comment block.
        let label_info = disasm.labels.get(a16).and_then(|l| {
            if l.is_equ {
                None
            } else {
                l.name.clone().map(|n| (n, l.ty, l.references.len()))
            }
        });
        if let Some((name, ty, _)) = label_info {
            let block_start = ty.is_top_code() || ty == LabelType::DataLbl;
            if block_start {
                push_blank(&mut lines, opts.number_of_lines_between_blocks);
            }
            if let Some(stats) = disasm.statistics.get(&a16) {
                lines.push(format!(
                    "; Size={} bytes, {} instructions, CC={}",
                    stats.size_in_bytes,
                    stats.count_of_instructions,
                    stats.cyclomatic_complexity
                ));
            }
            let refs: Vec<u16> = disasm
                .labels
                .get(a16)
                .map(|l| l.references.iter().copied().collect())
                .unwrap_or_default();
            if references_enabled(&opts, ty) && !refs.is_empty() {
                lines.push(format!(
                    "; {}",
                    references_text(&disasm.labels, &disasm.parents, &refs)
                ));
            }
            lines.push(format!("{}:", name));
        }

        if a & attr::CODE_FIRST != 0 {
            let inst = opcode::decode_at(&disasm.memory, a16);
            let ctx = RenderContext::new(&disasm.labels);
            let (text, comment) = instruction_text(&inst, &ctx, &opts);
            let raw: Vec<u8> = (0..inst.len as u16)
                .map(|i| disasm.memory.read_byte(a16.wrapping_add(i)))
                .collect();
            lines.push(format_line(&opts, a16, &raw, &text, comment.as_deref()));
            addr += inst.len as usize;
        } else if a & attr::CODE != 0 {
            // Mid-instruction byte; covered by the line above.
            addr += 1;
        } else {
            disasm.memory.or_attribute(a16, 1, attr::DATA);
            let v = disasm.memory.read_byte(a16);
            let text = format!("{} {}", keyword(&opts, "DEFB"), hex_byte(v));
            lines.push(format_line(&opts, a16, &[v], &text, Some(&defb_comment(v))));
            addr += 1;
        }
    }

    lines
}
