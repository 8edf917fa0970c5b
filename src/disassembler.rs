//! The analysis pipeline.
//!
//! A queue of entry addresses drives recursive control-flow discovery over
//! the tagged address space; a sequence of refinement passes then classifies
//! labels, scopes locals, resolves self-modifying data pointers, builds the
//! caller/callee graph and computes per-subroutine statistics before names
//! are assigned and the listing is rendered.

use crate::label::{LabelStore, LabelType};
use crate::listing::{self, Options};
use crate::memory::{attr, Memory, MEMORY_SIZE};
use crate::opcode::{self, hex_word, Instruction};
use crate::snapshot;
use crate::trace;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;

/// Per-subroutine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubroutineStatistics {
    pub size_in_bytes: usize,
    pub count_of_instructions: usize,
    pub cyclomatic_complexity: usize,
}

/// The static disassembler. Owns the address space and the label store;
/// not re-entrant, instantiate afresh for a second run.
pub struct Disassembler {
    pub memory: Memory,
    pub labels: LabelStore,
    pub opts: Options,
    /// Worklist of entry addresses awaiting disassembly.
    address_queue: VecDeque<u16>,
    /// Owning label of every address, filled by the parent pass.
    pub(crate) parents: Vec<Option<u16>>,
    /// Entry address read from an .sna snapshot, if one was loaded.
    sna_start: Option<u16>,
    /// Recovered warnings, also forwarded to the log.
    warnings: Vec<String>,
    pub(crate) statistics: HashMap<u16, SubroutineStatistics>,
    pub(crate) stats_min: SubroutineStatistics,
    pub(crate) stats_max: SubroutineStatistics,
    /// Subroutines whose only remaining callers are themselves.
    pub(crate) self_call_warned: Vec<u16>,
}

impl Disassembler {
    pub fn new() -> Self {
        Disassembler {
            memory: Memory::new(),
            labels: LabelStore::new(),
            opts: Options::default(),
            address_queue: VecDeque::new(),
            parents: vec![None; MEMORY_SIZE],
            sna_start: None,
            warnings: Vec::new(),
            statistics: HashMap::new(),
            stats_min: SubroutineStatistics {
                size_in_bytes: usize::MAX,
                count_of_instructions: usize::MAX,
                cyclomatic_complexity: usize::MAX,
            },
            stats_max: SubroutineStatistics {
                size_in_bytes: 0,
                count_of_instructions: 0,
                cyclomatic_complexity: 0,
            },
            self_call_warned: Vec::new(),
        }
    }

    // --- input ----------------------------------------------------------

    /// Load a raw binary image at `origin`, wrapping at the top of the
    /// address space.
    pub fn read_bin<P: AsRef<Path>>(&mut self, origin: u16, path: P) -> io::Result<()> {
        let data = std::fs::read(path)?;
        debug!("input: {} bytes at {}", data.len(), hex_word(origin));
        self.memory.set_bytes(origin, &data);
        Ok(())
    }

    /// Load a ZX Spectrum 48K snapshot; the 48 KiB image lands at 4000h and
    /// the entry address is taken from the emulated stack.
    pub fn read_sna<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let sna = snapshot::read_sna(path)?;
        self.memory.set_bytes(0x4000, &sna.image);
        self.sna_start = Some(sna.start);
        self.address_queue.push_back(sna.start);
        debug!("input: snapshot start {}", hex_word(sna.start));
        Ok(())
    }

    /// Queue every address found in a MAME trace file.
    pub fn read_trace<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let addresses = trace::read_trace(path)?;
        debug!("input: {} trace addresses", addresses.len());
        for addr in addresses {
            self.address_queue.push_back(addr);
        }
        Ok(())
    }

    /// Read `count` little-endian words starting at `addr` and fix a code
    /// label at each.
    pub fn set_jmp_table(&mut self, addr: u16, count: usize) {
        for i in 0..count {
            let entry = addr.wrapping_add((2 * i) as u16);
            let target = self.memory.read_word(entry);
            if self
                .labels
                .set_fixed(target, None, self.memory.attribute(target))
            {
                self.address_queue.push_back(target);
            }
        }
    }

    /// Fix a code label at `addr` (a user entry point) and queue it when the
    /// target byte is assigned. Entry points are roots of the call graph,
    /// so the label starts out as a subroutine.
    pub fn set_code_label(&mut self, addr: u16, name: Option<String>) {
        let attribute = self.memory.attribute(addr);
        if self.labels.set_fixed(addr, name, attribute) {
            self.address_queue.push_back(addr);
        }
        self.labels
            .set_found(addr, &[], LabelType::CodeSub, attribute);
    }

    /// Queue a bare address for disassembly.
    pub fn add_address(&mut self, addr: u16) {
        self.address_queue.push_back(addr);
    }

    // --- results --------------------------------------------------------

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn statistics(&self, addr: u16) -> Option<SubroutineStatistics> {
        self.statistics.get(&addr).copied()
    }

    pub fn sna_start(&self) -> Option<u16> {
        self.sna_start
    }

    /// Render the call graph of the last run in DOT syntax.
    pub fn call_graph(&self) -> String {
        crate::callgraph::render(self)
    }

    fn warning(&mut self, text: String) {
        warn!("{}", text);
        self.warnings.push(text);
    }

    // --- pipeline -------------------------------------------------------

    /// Run the whole analysis and return the rendered listing.
    ///
    /// The only fatal error is an ambiguous disassembly, where one byte
    /// would belong to two different instructions.
    pub fn disassemble(&mut self) -> Result<Vec<String>, String> {
        // The reset vector is an implicit entry point.
        if self.memory.attribute(0) & attr::ASSIGNED != 0 {
            self.address_queue.push_back(0);
        }

        self.collect_labels()?;
        self.find_interrupt_labels();
        self.set_special_labels();
        self.labels.sort();
        self.adjust_self_modifying_labels();
        self.add_flow_through_references();
        self.turn_lbl_into_sub();
        self.find_local_labels_in_subroutines();
        self.add_parent_references();
        self.add_call_list_to_labels();
        self.count_statistics();
        self.assign_label_names();

        Ok(listing::render(self))
    }

    /// Start address of the instruction covering `addr`, found by scanning
    /// backwards over the CODE run.
    fn enclosing_instruction(&self, addr: u16) -> Option<u16> {
        for back in 0..=4u16 {
            let a = addr.wrapping_sub(back);
            if self.memory.attribute(a) & attr::CODE_FIRST != 0 {
                return Some(a);
            }
        }
        None
    }

    fn ambiguous_error(&self, addr: u16) -> String {
        let here = opcode::decode_at(&self.memory, addr);
        match self.enclosing_instruction(addr) {
            Some(first) if first != addr => {
                let other = opcode::decode_at(&self.memory, first);
                format!(
                    "ambiguous disassembly: address {} decodes as '{}' but lies inside '{}' at {}",
                    hex_word(addr),
                    here.mnemonic,
                    other.mnemonic,
                    hex_word(first)
                )
            }
            _ => format!(
                "ambiguous disassembly: address {} decodes as '{}' inside another instruction",
                hex_word(addr),
                here.mnemonic
            ),
        }
    }

    /// Control-flow discovery: pop entry addresses and decode linearly,
    /// tagging CODE/CODE_FIRST and collecting branch-target labels.
    fn collect_labels(&mut self) -> Result<(), String> {
        while let Some(start) = self.address_queue.pop_front() {
            debug!("collect: trace from {}", hex_word(start));
            let mut addr = start;
            loop {
                let a = self.memory.attribute(addr);
                if a & attr::CODE != 0 {
                    if a & attr::CODE_FIRST == 0 {
                        return Err(self.ambiguous_error(addr));
                    }
                    break;
                }
                if a & attr::ASSIGNED == 0 {
                    self.warning(format!(
                        "address {} is not assigned, stopping disassembly there",
                        hex_word(addr)
                    ));
                    break;
                }

                let inst = opcode::decode_at(&self.memory, addr);

                // One byte must never belong to two instructions.
                for i in 1..inst.len as u16 {
                    let b = addr.wrapping_add(i);
                    if self.memory.attribute(b) & attr::CODE != 0 {
                        let other = self
                            .enclosing_instruction(b)
                            .map(|f| {
                                let o = opcode::decode_at(&self.memory, f);
                                format!("'{}' at {}", o.mnemonic, hex_word(f))
                            })
                            .unwrap_or_else(|| "another instruction".to_string());
                        return Err(format!(
                            "ambiguous disassembly: '{}' at {} overlaps {}",
                            inst.mnemonic,
                            hex_word(addr),
                            other
                        ));
                    }
                }

                self.memory
                    .or_attribute(addr, inst.len as usize, attr::CODE);
                self.memory.or_attribute(addr, 1, attr::CODE_FIRST);

                if inst.is_branch() {
                    self.collect_branch_target(addr, &inst)?;
                } else if inst.value_kind == LabelType::DataLbl {
                    let target = inst.value;
                    self.labels.set_found(
                        target,
                        &[addr],
                        LabelType::DataLbl,
                        self.memory.attribute(target),
                    );
                }

                if inst.is_stop() {
                    break;
                }
                addr = addr.wrapping_add(inst.len as u16);
            }
        }
        Ok(())
    }

    /// Classify and queue the target of a branch instruction.
    fn collect_branch_target(&mut self, addr: u16, inst: &Instruction) -> Result<(), String> {
        let target = inst.value;
        let target_attr = self.memory.attribute(target);
        let mut kind = inst.value_kind;

        // A relative branch backwards is a loop.
        if kind == LabelType::CodeLocalLbl && target <= addr {
            kind = LabelType::CodeLocalLoop;
        }
        // An absolute jump out of the loaded image is a call into foreign
        // code.
        if kind == LabelType::CodeLbl && target_attr & attr::ASSIGNED == 0 {
            kind = LabelType::CodeSub;
        }

        self.labels.set_found(target, &[addr], kind, target_attr);

        if target_attr & attr::CODE == 0 {
            self.address_queue.push_back(target);
        } else if target_attr & attr::CODE_FIRST == 0 {
            return Err(self.ambiguous_error(target));
        }
        Ok(())
    }

    /// Find unlabeled code entry points: an instruction start with no label
    /// whose predecessor is unassigned, not code, or ends a block is only
    /// reachable as an interrupt (or trace) entry.
    fn find_interrupt_labels(&mut self) {
        let mut found: Vec<u16> = Vec::new();

        for addr in 0..MEMORY_SIZE {
            let addr = addr as u16;
            let a = self.memory.attribute(addr);
            let wanted = attr::CODE_FIRST | attr::ASSIGNED;
            if a & wanted != wanted || self.labels.contains(addr) {
                continue;
            }
            if self.sna_start == Some(addr) {
                continue;
            }

            let entry = if addr == 0 {
                true
            } else {
                let prev = self.memory.attribute(addr.wrapping_sub(1));
                if prev & attr::ASSIGNED == 0 || prev & attr::CODE == 0 {
                    true
                } else {
                    // Reachable by fall-through only if the preceding
                    // instruction continues.
                    match self.enclosing_instruction(addr.wrapping_sub(1)) {
                        Some(first) => opcode::decode_at(&self.memory, first).is_stop(),
                        None => true,
                    }
                }
            };

            if entry {
                debug!("interrupt: entry found at {}", hex_word(addr));
                found.push(addr);
            }
        }

        let single = found.len() == 1;
        for (i, addr) in found.iter().enumerate() {
            let name = if single {
                self.opts.label_intrpt_prefix.clone()
            } else {
                format!("{}{}", self.opts.label_intrpt_prefix, i + 1)
            };
            self.labels
                .set_fixed(*addr, Some(name), self.memory.attribute(*addr));
            if let Some(label) = self.labels.get_mut(*addr) {
                label.belongs_to_interrupt = true;
            }
        }
    }

    /// Label the snapshot entry point and the start of every loaded block.
    fn set_special_labels(&mut self) {
        if let Some(start) = self.sna_start {
            if !self.labels.contains(start) {
                let name = format!("SNA_LBL_MAIN_START_{:04X}", start);
                self.labels
                    .set_fixed(start, Some(name), self.memory.attribute(start));
            }
        }

        let mut prev_assigned = false;
        for addr in 0..MEMORY_SIZE {
            let addr = addr as u16;
            let assigned = self.memory.attribute(addr) & attr::ASSIGNED != 0;
            if assigned && !prev_assigned && !self.labels.contains(addr) {
                let name = format!("BIN_START_{:04X}", addr);
                self.labels
                    .set_found(addr, &[], LabelType::DataLbl, self.memory.attribute(addr));
                if let Some(label) = self.labels.get_mut(addr) {
                    label.name = Some(name);
                }
            }
            prev_assigned = assigned;
        }
    }

    /// Move data labels that point into the middle of an instruction onto
    /// the instruction's first byte, leaving a signed offset behind.
    fn adjust_self_modifying_labels(&mut self) {
        let targets: Vec<u16> = self
            .labels
            .iter()
            .filter(|(addr, label)| {
                let a = self.memory.attribute(*addr);
                label.ty == LabelType::DataLbl
                    && a & attr::CODE != 0
                    && a & attr::CODE_FIRST == 0
            })
            .map(|(addr, _)| addr)
            .collect();

        for orig in targets {
            let first = match self.enclosing_instruction(orig) {
                Some(f) if f != orig => f,
                _ => continue,
            };
            let old = match self.labels.remove(orig) {
                Some(l) => l,
                None => continue,
            };
            debug!(
                "selfmod: data label {} moved to {}",
                hex_word(orig),
                hex_word(first)
            );
            let refs: Vec<u16> = old.references.iter().copied().collect();
            self.labels
                .set_found(first, &refs, old.ty, self.memory.attribute(first));
            self.labels.set_offset(orig, first as i32 - orig as i32);
        }
    }

    /// When control flows off the end of one block straight into a labeled
    /// one, record the last instruction before the label as a referrer.
    fn add_flow_through_references(&mut self) {
        let starts: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty.is_top_code() && !l.is_equ)
            .map(|(a, _)| a)
            .collect();

        for start in starts {
            let mut addr = start;
            let mut prev = start;
            for _ in 0..MEMORY_SIZE {
                let a = self.memory.attribute(addr);
                if a & attr::ASSIGNED == 0 || a & attr::CODE_FIRST == 0 {
                    break;
                }
                if addr != start {
                    if let Some(label) = self.labels.get(addr) {
                        if label.ty == LabelType::CodeLbl || label.ty == LabelType::CodeSub {
                            debug!(
                                "flow: {} runs into {} at {}",
                                hex_word(start),
                                hex_word(addr),
                                hex_word(prev)
                            );
                            if let Some(label) = self.labels.get_mut(addr) {
                                label.references.insert(prev);
                            }
                            break;
                        }
                    }
                }
                let inst = opcode::decode_at(&self.memory, addr);
                if inst.is_stop() {
                    break;
                }
                prev = addr;
                addr = addr.wrapping_add(inst.len as u16);
            }
        }
    }

    /// Walk the reachable flow from `start` (linear flow plus non-call
    /// branches) and report whether any instruction returns. Reaching an
    /// existing subroutine label short-circuits with success.
    fn reaches_return(&self, start: u16) -> bool {
        let mut visited = vec![false; MEMORY_SIZE];
        let mut stack = vec![start];

        while let Some(top) = stack.pop() {
            let mut addr = top;
            loop {
                if visited[addr as usize] {
                    break;
                }
                visited[addr as usize] = true;

                let a = self.memory.attribute(addr);
                if a & attr::ASSIGNED == 0 || a & attr::CODE_FIRST == 0 {
                    break;
                }
                if addr != start {
                    if let Some(label) = self.labels.get(addr) {
                        if label.ty == LabelType::CodeSub || label.ty == LabelType::CodeRst {
                            return true;
                        }
                    }
                }

                let inst = opcode::decode_at(&self.memory, addr);
                if inst.mnemonic.starts_with("RET") {
                    return true;
                }
                if inst.is_branch() && !inst.is_call() {
                    stack.push(inst.value);
                }
                if inst.is_stop() {
                    break;
                }
                addr = addr.wrapping_add(inst.len as u16);
            }
        }
        false
    }

    /// Promote absolute labels whose flow reaches a return: they are
    /// subroutines entered by jump.
    fn turn_lbl_into_sub(&mut self) {
        let candidates: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty == LabelType::CodeLbl && !l.is_equ)
            .map(|(a, _)| a)
            .collect();

        for addr in candidates {
            if self.reaches_return(addr) {
                debug!("promote: {} returns, now a subroutine", hex_word(addr));
                if let Some(label) = self.labels.get_mut(addr) {
                    label.ty = LabelType::CodeSub;
                }
            }
        }
    }

    /// Instruction-start addresses reachable from `start` by linear flow and
    /// non-call branches. The walk crosses foreign labels; it stops at STOP
    /// instructions, unassigned bytes and already-visited addresses.
    fn reachable_set(&self, start: u16) -> Vec<bool> {
        let mut visited = vec![false; MEMORY_SIZE];
        let mut stack = vec![start];

        while let Some(top) = stack.pop() {
            let mut addr = top;
            loop {
                if visited[addr as usize] {
                    break;
                }
                let a = self.memory.attribute(addr);
                if a & attr::ASSIGNED == 0 || a & attr::CODE_FIRST == 0 {
                    break;
                }
                visited[addr as usize] = true;

                let inst = opcode::decode_at(&self.memory, addr);
                if inst.is_branch() && !inst.is_call() {
                    stack.push(inst.value);
                }
                if inst.is_stop() {
                    break;
                }
                addr = addr.wrapping_add(inst.len as u16);
            }
        }
        visited
    }

    /// Demote labels that are only referenced from inside one top-level
    /// label's reachable flow to local labels (or local loops when some
    /// referrer sits within the 128-byte relative-jump window below them).
    fn find_local_labels_in_subroutines(&mut self) {
        let tops: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty.is_top_code() && !l.is_equ)
            .map(|(a, _)| a)
            .collect();

        for start in tops {
            let set = self.reachable_set(start);

            let candidates: Vec<u16> = self
                .labels
                .iter()
                .filter(|(addr, l)| {
                    *addr != start
                        && set[*addr as usize]
                        && !l.is_fixed
                        && (l.ty == LabelType::CodeLbl || l.ty == LabelType::CodeSub)
                        && !l.references.is_empty()
                        && l.references.iter().all(|&r| set[r as usize])
                })
                .map(|(addr, _)| addr)
                .collect();

            for addr in candidates {
                let label = match self.labels.get_mut(addr) {
                    Some(l) => l,
                    None => continue,
                };
                let looping = label
                    .references
                    .iter()
                    .any(|&r| r >= addr && r - addr <= 128);
                label.ty = if looping {
                    LabelType::CodeLocalLoop
                } else {
                    LabelType::CodeLocalLbl
                };
                debug!(
                    "scope: {} demoted to {:?} inside {}",
                    hex_word(addr),
                    label.ty,
                    hex_word(start)
                );
            }
        }
    }

    /// Assign an owning label to every address of every top-level body, then
    /// drop referrers that come from the label's own body (self-recursive
    /// calls stay). Warn about subroutines that only call themselves.
    fn add_parent_references(&mut self) {
        let tops: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty.is_top_code() && !l.is_equ)
            .map(|(a, _)| a)
            .collect();

        for &start in &tops {
            let mut visited = vec![false; MEMORY_SIZE];
            let mut stack = vec![start];

            while let Some(top) = stack.pop() {
                let mut addr = top;
                loop {
                    if visited[addr as usize] {
                        break;
                    }
                    let a = self.memory.attribute(addr);
                    if a & attr::ASSIGNED == 0 || a & attr::CODE_FIRST == 0 {
                        break;
                    }
                    // A foreign top-level label ends this body; locals do
                    // not.
                    if addr != start {
                        if let Some(label) = self.labels.get(addr) {
                            if label.ty.is_top_code() {
                                break;
                            }
                        }
                    }
                    visited[addr as usize] = true;

                    let inst = opcode::decode_at(&self.memory, addr);
                    for i in 0..inst.len as u16 {
                        self.parents[addr.wrapping_add(i) as usize] = Some(start);
                    }
                    if inst.is_branch() && !inst.is_call() {
                        stack.push(inst.value);
                    }
                    if inst.is_stop() {
                        break;
                    }
                    addr = addr.wrapping_add(inst.len as u16);
                }
            }
        }

        // Self-reference cleanup: references from a label's own body say
        // nothing about who uses it. Self-recursive calls are kept for the
        // call graph.
        let addrs = self.labels.addresses();
        for la in addrs {
            let refs: Vec<u16> = self
                .labels
                .get(la)
                .map(|l| l.references.iter().copied().collect())
                .unwrap_or_default();
            for r in refs {
                if self.parents[r as usize] == Some(la) {
                    let inst = opcode::decode_at(&self.memory, r);
                    if !inst.is_call() {
                        if let Some(label) = self.labels.get_mut(la) {
                            label.references.remove(&r);
                        }
                    }
                }
            }
        }

        // A subroutine whose only callers sit inside itself is unreachable
        // from the rest of the program.
        let mut warned = Vec::new();
        for (la, label) in self.labels.iter() {
            if !matches!(label.ty, LabelType::CodeSub | LabelType::CodeRst) {
                continue;
            }
            if !label.references.is_empty()
                && label
                    .references
                    .iter()
                    .all(|&r| self.parents[r as usize] == Some(la))
            {
                warned.push(la);
            }
        }
        for la in warned {
            self.self_call_warned.push(la);
            self.warning(format!(
                "subroutine at {} is only called by itself",
                hex_word(la)
            ));
        }
    }

    /// Derive callee lists from reference sets through the parent map.
    fn add_call_list_to_labels(&mut self) {
        let tops: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty.is_top_code())
            .map(|(a, _)| a)
            .collect();

        for callee in tops {
            let refs: Vec<u16> = self
                .labels
                .get(callee)
                .map(|l| l.references.iter().copied().collect())
                .unwrap_or_default();
            for r in refs {
                if let Some(parent) = self.parents[r as usize] {
                    if let Some(label) = self.labels.get_mut(parent) {
                        label.calls.push(callee);
                    }
                }
            }
        }
    }

    /// Size, instruction count and cyclomatic complexity of one body. The
    /// walk stops on entering another subroutine, on STOP, on unassigned
    /// bytes and on already-visited addresses.
    fn body_statistics(&self, start: u16) -> SubroutineStatistics {
        let mut stats = SubroutineStatistics {
            size_in_bytes: 0,
            count_of_instructions: 0,
            cyclomatic_complexity: 1,
        };
        let mut visited = vec![false; MEMORY_SIZE];
        let mut stack = vec![start];

        while let Some(top) = stack.pop() {
            let mut addr = top;
            loop {
                if visited[addr as usize] {
                    break;
                }
                let a = self.memory.attribute(addr);
                if a & attr::ASSIGNED == 0 || a & attr::CODE_FIRST == 0 {
                    break;
                }
                if addr != start {
                    if let Some(label) = self.labels.get(addr) {
                        if matches!(label.ty, LabelType::CodeSub | LabelType::CodeRst) {
                            break;
                        }
                    }
                }
                visited[addr as usize] = true;

                let inst = opcode::decode_at(&self.memory, addr);
                stats.size_in_bytes += inst.len as usize;
                stats.count_of_instructions += 1;

                if inst.is_branch() {
                    // DJNZ decrements and branches; its mnemonic alone does
                    // not carry the condition.
                    if inst.mnemonic.contains(',') || inst.mnemonic.starts_with("DJNZ") {
                        stats.cyclomatic_complexity += 1;
                    }
                    if !inst.is_call() {
                        stack.push(inst.value);
                    }
                } else if inst.mnemonic.starts_with("RET ") {
                    stats.cyclomatic_complexity += 1;
                }

                if inst.is_stop() {
                    break;
                }
                addr = addr.wrapping_add(inst.len as u16);
            }
        }
        stats
    }

    fn count_statistics(&mut self) {
        let tops: Vec<u16> = self
            .labels
            .iter()
            .filter(|(_, l)| l.ty.is_top_code() && !l.is_equ)
            .map(|(a, _)| a)
            .collect();

        for addr in tops {
            let stats = self.body_statistics(addr);
            debug!(
                "stats: {} size={} instructions={} cc={}",
                hex_word(addr),
                stats.size_in_bytes,
                stats.count_of_instructions,
                stats.cyclomatic_complexity
            );
            self.stats_min.size_in_bytes = self.stats_min.size_in_bytes.min(stats.size_in_bytes);
            self.stats_min.count_of_instructions = self
                .stats_min
                .count_of_instructions
                .min(stats.count_of_instructions);
            self.stats_min.cyclomatic_complexity = self
                .stats_min
                .cyclomatic_complexity
                .min(stats.cyclomatic_complexity);
            self.stats_max.size_in_bytes = self.stats_max.size_in_bytes.max(stats.size_in_bytes);
            self.stats_max.count_of_instructions = self
                .stats_max
                .count_of_instructions
                .max(stats.count_of_instructions);
            self.stats_max.cyclomatic_complexity = self
                .stats_max
                .cyclomatic_complexity
                .max(stats.cyclomatic_complexity);
            self.statistics.insert(addr, stats);
        }
    }

    /// Two-pass naming: count the labels of each kind, then hand out
    /// digit-padded names. User-provided names stay untouched.
    fn assign_label_names(&mut self) {
        // First pass: counts per kind.
        let mut subs = 0usize;
        let mut lbls = 0usize;
        let mut datas = 0usize;
        let mut self_mods = 0usize;
        for (addr, label) in self.labels.iter() {
            if label.name.is_some() {
                continue;
            }
            match label.ty {
                LabelType::CodeSub if !label.belongs_to_interrupt => subs += 1,
                LabelType::CodeLbl if !label.belongs_to_interrupt => lbls += 1,
                LabelType::DataLbl => {
                    if self.memory.attribute(addr) & attr::CODE != 0 {
                        self_mods += 1;
                    } else {
                        datas += 1;
                    }
                }
                // A local-kind label with no owning body (a relative branch
                // out of the image) is named like an absolute label.
                LabelType::CodeLocalLbl | LabelType::CodeLocalLoop
                    if self.parents[addr as usize].is_none() =>
                {
                    lbls += 1
                }
                _ => {}
            }
        }
        let sub_width = decimal_digits(subs);
        let lbl_width = decimal_digits(lbls);
        let data_width = decimal_digits(datas);
        let self_mod_width = decimal_digits(self_mods);

        // Second pass: absolute labels.
        let opts = self.opts.clone();
        let mut sub_index = 0usize;
        let mut lbl_index = 0usize;
        let mut data_index = 0usize;
        let mut self_mod_index = 0usize;
        for addr in self.labels.addresses() {
            let is_code = self.memory.attribute(addr) & attr::CODE != 0;
            let orphan_local = self.parents[addr as usize].is_none();
            let label = match self.labels.get_mut(addr) {
                Some(l) => l,
                None => continue,
            };
            if label.name.is_some() {
                continue;
            }
            label.name = match label.ty {
                LabelType::CodeSub => Some(if label.belongs_to_interrupt {
                    opts.label_intrpt_prefix.clone()
                } else {
                    sub_index += 1;
                    format!("{}{:0w$}", opts.label_sub_prefix, sub_index, w = sub_width)
                }),
                LabelType::CodeLbl => Some(if label.belongs_to_interrupt {
                    opts.label_intrpt_prefix.clone()
                } else {
                    lbl_index += 1;
                    format!("{}{:0w$}", opts.label_lbl_prefix, lbl_index, w = lbl_width)
                }),
                LabelType::CodeRst => Some(format!("{}{:02}", opts.label_rst_prefix, addr)),
                LabelType::DataLbl => Some(if is_code {
                    self_mod_index += 1;
                    format!(
                        "{}{:0w$}",
                        opts.label_self_modifying_prefix,
                        self_mod_index,
                        w = self_mod_width
                    )
                } else {
                    data_index += 1;
                    format!(
                        "{}{:0w$}",
                        opts.label_data_lbl_prefix,
                        data_index,
                        w = data_width
                    )
                }),
                LabelType::CodeLocalLbl | LabelType::CodeLocalLoop if orphan_local => {
                    lbl_index += 1;
                    Some(format!(
                        "{}{:0w$}",
                        opts.label_lbl_prefix,
                        lbl_index,
                        w = lbl_width
                    ))
                }
                // Locals are named below, once their parents carry names.
                _ => None,
            };
        }

        // Third pass: local labels, scoped under their parent's name.
        let mut child_counts: HashMap<(u16, LabelType), usize> = HashMap::new();
        for (addr, label) in self.labels.iter() {
            if label.name.is_some() {
                continue;
            }
            if matches!(label.ty, LabelType::CodeLocalLbl | LabelType::CodeLocalLoop) {
                if let Some(parent) = self.parents[addr as usize] {
                    *child_counts.entry((parent, label.ty)).or_insert(0) += 1;
                }
            }
        }

        let mut child_indices: HashMap<(u16, LabelType), usize> = HashMap::new();
        for addr in self.labels.addresses() {
            let parent = match self.parents[addr as usize] {
                Some(p) => p,
                None => continue,
            };
            let parent_name = match self.labels.get(parent).and_then(|l| l.name.clone()) {
                Some(n) => n.to_lowercase(),
                None => continue,
            };
            let label = match self.labels.get_mut(addr) {
                Some(l) => l,
                None => continue,
            };
            if label.name.is_some()
                || !matches!(label.ty, LabelType::CodeLocalLbl | LabelType::CodeLocalLoop)
            {
                continue;
            }
            let prefix = if label.ty == LabelType::CodeLocalLoop {
                &opts.label_loop_prefix
            } else {
                &opts.label_local_lable_prefix
            };
            let total = child_counts.get(&(parent, label.ty)).copied().unwrap_or(1);
            let index = child_indices.entry((parent, label.ty)).or_insert(0);
            *index += 1;
            label.name = Some(if total > 1 {
                format!(".{}{}{}", parent_name, prefix, index)
            } else {
                format!(".{}{}", parent_name, prefix)
            });
        }
    }
}

impl Default for Disassembler {
    fn default() -> Self {
        Disassembler::new()
    }
}

fn decimal_digits(n: usize) -> usize {
    n.max(1).to_string().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disasm_with(origin: u16, bytes: &[u8]) -> Disassembler {
        let mut dasm = Disassembler::new();
        dasm.memory.set_bytes(origin, bytes);
        dasm
    }

    fn name_at(dasm: &Disassembler, addr: u16) -> String {
        dasm.labels
            .get(addr)
            .and_then(|l| l.name.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_single_ret_subroutine() {
        // LD A,5 / RET
        let mut dasm = disasm_with(0x0000, &[0x3e, 0x05, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let label = dasm.labels.get(0x0000).unwrap();
        assert_eq!(label.ty, LabelType::CodeSub);
        assert_eq!(label.name.as_deref(), Some("SUB1"));

        let stats = dasm.statistics(0x0000).unwrap();
        assert_eq!(stats.size_in_bytes, 3);
        assert_eq!(stats.count_of_instructions, 2);
        assert_eq!(stats.cyclomatic_complexity, 1);
    }

    #[test]
    fn test_djnz_loop_statistics() {
        // LD B,3 / DJNZ -2 (loops onto the DJNZ itself)
        let mut dasm = disasm_with(0x0000, &[0x06, 0x03, 0x10, 0xfe]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let stats = dasm.statistics(0x0000).unwrap();
        assert_eq!(stats.cyclomatic_complexity, 2);

        let looped = dasm.labels.get(0x0002).unwrap();
        assert_eq!(looped.ty, LabelType::CodeLocalLoop);
        assert_eq!(looped.name.as_deref(), Some(".sub1_loop"));
    }

    #[test]
    fn test_jp_target_promoted_to_sub() {
        // JP 0005h / (2 unreachable bytes) / RET
        let mut dasm = disasm_with(0x0000, &[0xc3, 0x05, 0x00, 0x00, 0x00, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        assert_eq!(dasm.labels.get(0x0000).unwrap().ty, LabelType::CodeSub);
        assert_eq!(dasm.labels.get(0x0005).unwrap().ty, LabelType::CodeSub);
    }

    #[test]
    fn test_self_modifying_label_moves_to_anchor() {
        // 1000h: LD A,12h           (3e 12)
        // 1002h: LD A,(1001h)       (3a 01 10)
        // 1005h: RET
        let mut dasm = disasm_with(0x1000, &[0x3e, 0x12, 0x3a, 0x01, 0x10, 0xc9]);
        dasm.set_code_label(0x1000, None);
        dasm.disassemble().unwrap();

        assert!(dasm.labels.get(0x1001).is_none());
        let anchor = dasm.labels.get(0x1000).unwrap();
        assert!(anchor.references.contains(&0x1002));
        assert_eq!(dasm.labels.offset(0x1001), Some(-1));
    }

    #[test]
    fn test_ambiguous_overlap_aborts() {
        // Decoding from 0 covers bytes 0-1; entry at 1 overlaps.
        let mut dasm = disasm_with(0x0000, &[0x3e, 0x3e, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.add_address(0x0001);
        let err = dasm.disassemble().unwrap_err();
        assert!(err.contains("ambiguous"), "unexpected error: {}", err);
        assert!(err.contains("LD A,#n"), "unexpected error: {}", err);
    }

    #[test]
    fn test_interrupt_labels_from_trace_entries() {
        let mut dasm = Disassembler::new();
        // Two code islands with no references between them.
        dasm.memory.set_bytes(0x0038, &[0x3e, 0x01, 0xc9]);
        dasm.memory.set_bytes(0x0100, &[0xaf, 0xc9]);
        dasm.add_address(0x0038);
        dasm.add_address(0x0100);
        dasm.disassemble().unwrap();

        assert_eq!(name_at(&dasm, 0x0038), "INTRPT1");
        assert_eq!(name_at(&dasm, 0x0100), "INTRPT2");
        assert!(dasm.labels.get(0x0038).unwrap().belongs_to_interrupt);
    }

    #[test]
    fn test_unassigned_trace_address_warns() {
        let mut dasm = disasm_with(0x0000, &[0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.add_address(0x4000);
        dasm.disassemble().unwrap();
        assert!(dasm
            .warnings()
            .iter()
            .any(|w| w.contains("4000h") && w.contains("not assigned")));
    }

    #[test]
    fn test_equ_label_for_unassigned_branch_target() {
        // CALL 8000h with nothing loaded there.
        let mut dasm = disasm_with(0x0000, &[0xcd, 0x00, 0x80, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let label = dasm.labels.get(0x8000).unwrap();
        assert!(label.is_equ);
        assert_eq!(label.ty, LabelType::CodeSub);
    }

    #[test]
    fn test_unassigned_jp_target_becomes_sub() {
        // JP into a ROM that is not loaded: treated as a call into foreign
        // code.
        let mut dasm = disasm_with(0x0000, &[0xc3, 0x00, 0x90]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();
        assert_eq!(dasm.labels.get(0x9000).unwrap().ty, LabelType::CodeSub);
    }

    #[test]
    fn test_flow_through_reference() {
        // SUB1: LD A,1 / RET; SUB2 follows and is also called, but SUB1
        // never falls through (RET stops) - so use a block that does:
        // 0000: LD A,1        (3e 01)
        // 0002: LD B,2        (06 02)   <- flows into 0004
        // 0004: RET           <- CALLed separately, so it has a label
        let mut dasm = disasm_with(0x0000, &[0x3e, 0x01, 0x06, 0x02, 0xc9, 0xcd, 0x04, 0x00]);
        dasm.set_code_label(0x0000, None);
        // A second entry that calls 0004h, giving it a label.
        dasm.memory.set_bytes(0x0010, &[0xcd, 0x04, 0x00, 0xc9]);
        dasm.set_code_label(0x0010, None);
        dasm.disassemble().unwrap();

        let callee = dasm.labels.get(0x0004).unwrap();
        // Referrers: the CALL at 0010h and the flow-through from 0002h.
        assert!(callee.references.contains(&0x0010));
        assert!(callee.references.contains(&0x0002));
    }

    #[test]
    fn test_self_recursive_call_warns_and_keeps_reference() {
        // SUB at 0: LD A,1 / CALL 0000h / RET - called by nothing else.
        let mut dasm = disasm_with(0x0000, &[0x3e, 0x01, 0xcd, 0x00, 0x00, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let label = dasm.labels.get(0x0000).unwrap();
        assert!(label.references.contains(&0x0002));
        assert!(dasm
            .warnings()
            .iter()
            .any(|w| w.contains("only called by itself")));
        // The self edge survives into the call list.
        assert!(label.calls.contains(&0x0000));
    }

    #[test]
    fn test_callee_lists() {
        // SUB1 at 0 calls SUB2 at 8.
        // 0000: CALL 0008h / RET
        // 0008: LD A,2 / RET
        let mut dasm = disasm_with(
            0x0000,
            &[0xcd, 0x08, 0x00, 0xc9, 0x00, 0x00, 0x00, 0x00, 0x3e, 0x02, 0xc9],
        );
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let caller = dasm.labels.get(0x0000).unwrap();
        assert_eq!(caller.calls, vec![0x0008]);
    }

    #[test]
    fn test_local_label_scoping_forward_branch() {
        // 0000: JR NZ,+1 -> 0003
        // 0002: NOP
        // 0003: LD A,1
        // 0005: RET
        let mut dasm = disasm_with(0x0000, &[0x20, 0x01, 0x00, 0x3e, 0x01, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let local = dasm.labels.get(0x0003).unwrap();
        assert_eq!(local.ty, LabelType::CodeLocalLbl);
        assert_eq!(local.name.as_deref(), Some(".sub1_l"));
    }

    #[test]
    fn test_fixed_label_not_demoted() {
        // Same flow as above but the inner label is user-fixed.
        let mut dasm = disasm_with(0x0000, &[0x20, 0x01, 0x00, 0x3e, 0x01, 0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.set_code_label(0x0003, Some("ENTRY".to_string()));
        dasm.disassemble().unwrap();

        let fixed = dasm.labels.get(0x0003).unwrap();
        assert!(fixed.ty.is_top_code());
        assert_eq!(fixed.name.as_deref(), Some("ENTRY"));
    }

    #[test]
    fn test_rst_label_naming() {
        // 0000: RST 08h / RET; 0008: RET
        let mut dasm = disasm_with(0x0000, &[0xcf, 0xc9]);
        dasm.memory.set_bytes(0x0008, &[0xc9]);
        dasm.set_code_label(0x0000, None);
        dasm.disassemble().unwrap();

        let rst = dasm.labels.get(0x0008).unwrap();
        assert_eq!(rst.ty, LabelType::CodeRst);
        assert_eq!(rst.name.as_deref(), Some("RST08"));
    }

    #[test]
    fn test_jmp_table_entries_are_fixed_and_queued() {
        let mut dasm = Disassembler::new();
        // Table at 0x0000: 0x0010, 0x0020. Handlers: RET at each.
        dasm.memory
            .set_bytes(0x0000, &[0x10, 0x00, 0x20, 0x00]);
        dasm.memory.set_bytes(0x0010, &[0xc9]);
        dasm.memory.set_bytes(0x0020, &[0xc9]);
        dasm.set_jmp_table(0x0000, 2);
        dasm.disassemble().unwrap();

        assert!(dasm.labels.get(0x0010).unwrap().is_fixed);
        assert!(dasm.labels.get(0x0020).unwrap().is_fixed);
        assert!(dasm.memory.attribute(0x0010) & attr::CODE_FIRST != 0);
    }

    #[test]
    fn test_name_padding_follows_counts() {
        // Twelve separate subroutines: SUB01..SUB12.
        let mut dasm = Disassembler::new();
        let mut code = Vec::new();
        for i in 0..12u16 {
            code.clear();
            code.extend_from_slice(&[0x3e, i as u8, 0xc9]);
            dasm.memory.set_bytes(i * 0x10, &code);
        }
        // A caller that reaches all of them.
        let mut caller = Vec::new();
        for i in 0..12u16 {
            let target = i * 0x10;
            caller.extend_from_slice(&[0xcd, (target & 0xff) as u8, (target >> 8) as u8]);
        }
        caller.push(0xc9);
        dasm.memory.set_bytes(0x4000, &caller);
        dasm.set_code_label(0x4000, Some("MAIN".to_string()));
        dasm.disassemble().unwrap();

        assert_eq!(name_at(&dasm, 0x0000), "SUB01");
        assert_eq!(name_at(&dasm, 0x00b0), "SUB12");
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let program: &[u8] = &[
            0x3e, 0x01, 0xcd, 0x10, 0x00, 0x20, 0xf9, 0xc3, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x06, 0x02, 0x10, 0xfe, 0xc9,
        ];
        let run = || -> (Vec<String>, String) {
            let mut dasm = Disassembler::new();
            dasm.memory.set_bytes(0x0000, program);
            dasm.set_code_label(0x0000, None);
            let listing = dasm.disassemble().unwrap();
            let graph = dasm.call_graph();
            (listing, graph)
        };
        let first = run();
        let second = run();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }
}
