use crate::memory::attr;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// Label classification, ordered by ascending priority.
///
/// When two analyses disagree about one address the higher-ranked type wins;
/// `LabelStore::set_found` resolves conflicts with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelType {
    None,
    CodeLocalLbl,
    CodeLocalLoop,
    CodeLbl,
    CodeSub,
    CodeRst,
    RelativeIndex,
    NumberByte,
    NumberWord,
    NumberWordBigEndian,
    DataLbl,
    PortLbl,
}

impl LabelType {
    /// True for the absolute code-label kinds that own a body of
    /// instructions (subroutines, restart handlers, jump targets).
    pub fn is_top_code(self) -> bool {
        matches!(
            self,
            LabelType::CodeLbl | LabelType::CodeSub | LabelType::CodeRst
        )
    }
}

/// A synthesized (or user-fixed) label at one address.
#[derive(Debug, Clone)]
pub struct Label {
    /// Classification; only ever promoted, except for the local demotion
    /// applied by the scoping pass.
    pub ty: LabelType,
    /// Assigned name. `None` until the naming pass runs, unless the label
    /// came in user-fixed or was created by the interrupt/start passes.
    pub name: Option<String>,
    /// Start addresses of the instructions that target this label.
    pub references: BTreeSet<u16>,
    /// Callee label addresses, in discovery order. Duplicates allowed;
    /// presentation dedupes.
    pub calls: Vec<u16>,
    /// The target byte was never assigned; rendered as an EQU directive.
    pub is_equ: bool,
    /// User-provided label; immune to renaming and to local demotion.
    pub is_fixed: bool,
    /// Created by the interrupt-entry scan.
    pub belongs_to_interrupt: bool,
}

impl Label {
    pub fn new(ty: LabelType) -> Self {
        Label {
            ty,
            name: None,
            references: BTreeSet::new(),
            calls: Vec::new(),
            is_equ: false,
            is_fixed: false,
            belongs_to_interrupt: false,
        }
    }
}

/// The address→label mapping plus the address→offset mapping used for data
/// pointers into the middle of an instruction.
pub struct LabelStore {
    /// Labels keyed by address. Insertion-ordered; `sort` re-materialises
    /// the map in ascending address order for the passes that rely on
    /// deterministic iteration.
    labels: IndexMap<u16, Label>,
    /// Mid-instruction data pointers: original target → signed offset from
    /// the anchor label at the instruction's first byte (non-positive).
    offsets: BTreeMap<u16, i32>,
}

impl LabelStore {
    pub fn new() -> Self {
        LabelStore {
            labels: IndexMap::new(),
            offsets: BTreeMap::new(),
        }
    }

    /// Record a label found at `addr`. Creates the label with `ty` if none
    /// exists, otherwise promotes the existing type to `max(existing, ty)`.
    /// `referrers` are unioned in, excluding self-references. If `attribute`
    /// lacks ASSIGNED the label is marked EQU.
    pub fn set_found(&mut self, addr: u16, referrers: &[u16], ty: LabelType, attribute: u8) {
        let label = self
            .labels
            .entry(addr)
            .or_insert_with(|| Label::new(ty));
        if ty > label.ty {
            label.ty = ty;
        }
        for &r in referrers {
            if r != addr {
                label.references.insert(r);
            }
        }
        if attribute & attr::ASSIGNED == 0 {
            label.is_equ = true;
        }
    }

    /// Record a user-fixed code label. Returns true when the caller should
    /// queue the address for disassembly (the target byte is assigned);
    /// otherwise the label is marked EQU.
    pub fn set_fixed(&mut self, addr: u16, name: Option<String>, attribute: u8) -> bool {
        let label = self
            .labels
            .entry(addr)
            .or_insert_with(|| Label::new(LabelType::CodeLbl));
        if LabelType::CodeLbl > label.ty {
            label.ty = LabelType::CodeLbl;
        }
        label.is_fixed = true;
        if name.is_some() {
            label.name = name;
        }
        if attribute & attr::ASSIGNED == 0 {
            label.is_equ = true;
            false
        } else {
            true
        }
    }

    pub fn get(&self, addr: u16) -> Option<&Label> {
        self.labels.get(&addr)
    }

    pub fn get_mut(&mut self, addr: u16) -> Option<&mut Label> {
        self.labels.get_mut(&addr)
    }

    pub fn contains(&self, addr: u16) -> bool {
        self.labels.contains_key(&addr)
    }

    pub fn insert(&mut self, addr: u16, label: Label) {
        self.labels.insert(addr, label);
    }

    pub fn remove(&mut self, addr: u16) -> Option<Label> {
        self.labels.shift_remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Re-materialise the store in ascending address order.
    pub fn sort(&mut self) {
        self.labels.sort_keys();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Label)> {
        self.labels.iter().map(|(&a, l)| (a, l))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u16, &mut Label)> {
        self.labels.iter_mut().map(|(&a, l)| (a, l))
    }

    /// Addresses currently in the store, in store order.
    pub fn addresses(&self) -> Vec<u16> {
        self.labels.keys().copied().collect()
    }

    /// Record a mid-instruction offset: `offset = anchor − original`.
    pub fn set_offset(&mut self, addr: u16, offset: i32) {
        self.offsets.insert(addr, offset);
    }

    pub fn offset(&self, addr: u16) -> Option<i32> {
        self.offsets.get(&addr).copied()
    }

    pub fn offsets(&self) -> impl Iterator<Item = (u16, i32)> + '_ {
        self.offsets.iter().map(|(&a, &o)| (a, o))
    }
}

impl Default for LabelStore {
    fn default() -> Self {
        LabelStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_priority_order() {
        assert!(LabelType::None < LabelType::CodeLocalLbl);
        assert!(LabelType::CodeLocalLbl < LabelType::CodeLocalLoop);
        assert!(LabelType::CodeLocalLoop < LabelType::CodeLbl);
        assert!(LabelType::CodeLbl < LabelType::CodeSub);
        assert!(LabelType::CodeSub < LabelType::CodeRst);
        assert!(LabelType::CodeRst < LabelType::RelativeIndex);
        assert!(LabelType::NumberWordBigEndian < LabelType::DataLbl);
        assert!(LabelType::DataLbl < LabelType::PortLbl);
    }

    #[test]
    fn test_set_found_promotes_type() {
        let mut store = LabelStore::new();
        store.set_found(0x8000, &[], LabelType::CodeLocalLbl, attr::ASSIGNED);
        store.set_found(0x8000, &[], LabelType::CodeSub, attr::ASSIGNED);
        assert_eq!(store.get(0x8000).unwrap().ty, LabelType::CodeSub);

        // Lower priority never downgrades.
        store.set_found(0x8000, &[], LabelType::CodeLbl, attr::ASSIGNED);
        assert_eq!(store.get(0x8000).unwrap().ty, LabelType::CodeSub);
    }

    #[test]
    fn test_set_found_excludes_self_reference() {
        let mut store = LabelStore::new();
        store.set_found(
            0x8000,
            &[0x8000, 0x9000],
            LabelType::CodeLbl,
            attr::ASSIGNED,
        );
        let label = store.get(0x8000).unwrap();
        assert!(!label.references.contains(&0x8000));
        assert!(label.references.contains(&0x9000));
    }

    #[test]
    fn test_set_found_unassigned_marks_equ() {
        let mut store = LabelStore::new();
        store.set_found(0xc000, &[0x100], LabelType::CodeLbl, 0);
        assert!(store.get(0xc000).unwrap().is_equ);
    }

    #[test]
    fn test_set_fixed_queue_decision() {
        let mut store = LabelStore::new();
        assert!(store.set_fixed(0x8000, Some("START".to_string()), attr::ASSIGNED));
        assert!(!store.set_fixed(0x9000, None, 0));

        let fixed = store.get(0x8000).unwrap();
        assert!(fixed.is_fixed);
        assert_eq!(fixed.name.as_deref(), Some("START"));
        assert!(store.get(0x9000).unwrap().is_equ);
    }

    #[test]
    fn test_sort_orders_by_address() {
        let mut store = LabelStore::new();
        store.set_found(0x9000, &[], LabelType::CodeLbl, attr::ASSIGNED);
        store.set_found(0x0100, &[], LabelType::CodeLbl, attr::ASSIGNED);
        store.set_found(0x8000, &[], LabelType::CodeLbl, attr::ASSIGNED);
        store.sort();
        let addrs = store.addresses();
        assert_eq!(addrs, vec![0x0100, 0x8000, 0x9000]);
    }
}
