//! Z80 opcode tables and instruction decoder.
//!
//! The whole opcode space, including the `CB`, `DD`, `ED`, `FD`, `DDCB` and
//! `FDCB` prefixes, is mapped to static [`Opcode`] records: a mnemonic
//! template (immediates appear as the sentinels `#n`, `#nn`, `#d`), the total
//! instruction length, the kind of the immediate value and a set of
//! control-flow flags. [`decode_at`] resolves the record against memory into
//! an [`Instruction`] with the immediate value filled in.

use crate::label::LabelType;
use crate::memory::Memory;

/// Control-flow flags of an opcode.
pub mod flags {
    /// The immediate is a code target (JP, JR, DJNZ, CALL, RST and the
    /// conditional variants).
    pub const BRANCH_ADDRESS: u8 = 0x01;
    /// One of the call forms (CALL nn, CALL cc,nn, RST p).
    pub const CALL: u8 = 0x02;
    /// The instruction unconditionally ends a basic block.
    pub const STOP: u8 = 0x04;
}

/// One entry of the opcode tables.
#[derive(Debug, Clone)]
pub struct Opcode {
    /// Mnemonic template. `#n` stands for a byte immediate, `#nn` for a word
    /// (or resolved branch target), `#d` for an IX/IY displacement.
    pub name: String,
    /// Total length in bytes, prefix bytes included.
    pub len: u8,
    /// Classification of the immediate value.
    pub value_kind: LabelType,
    pub flags: u8,
}

impl Opcode {
    fn new(name: &str, len: u8, value_kind: LabelType, flags: u8) -> Self {
        Opcode {
            name: name.to_string(),
            len,
            value_kind,
            flags,
        }
    }

    fn plain(name: &str, len: u8) -> Self {
        Opcode::new(name, len, LabelType::None, 0)
    }
}

/// A decoded instruction with its immediate resolved.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Address of the first byte.
    pub addr: u16,
    /// Mnemonic with any IX/IY displacement substituted; at most one
    /// `#n`/`#nn` sentinel remains for the primary immediate.
    pub mnemonic: String,
    /// Total length in bytes.
    pub len: u8,
    /// Resolved immediate: absolute 16-bit target for branches, raw
    /// byte/word otherwise, 0 when the instruction has none.
    pub value: u16,
    pub value_kind: LabelType,
    pub flags: u8,
}

impl Instruction {
    pub fn is_branch(&self) -> bool {
        self.flags & flags::BRANCH_ADDRESS != 0
    }

    pub fn is_call(&self) -> bool {
        self.flags & flags::CALL != 0
    }

    pub fn is_stop(&self) -> bool {
        self.flags & flags::STOP != 0
    }
}

/// Hex text in assembler style: `12h`, `0FAh`.
pub fn hex_byte(v: u8) -> String {
    let s = format!("{:02X}h", v);
    if s.as_bytes()[0].is_ascii_alphabetic() {
        format!("0{}", s)
    } else {
        s
    }
}

/// Hex text in assembler style: `1234h`, `0FA00h`.
pub fn hex_word(v: u16) -> String {
    let s = format!("{:04X}h", v);
    if s.as_bytes()[0].is_ascii_alphabetic() {
        format!("0{}", s)
    } else {
        s
    }
}

const REG8: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
const REG16: [&str; 4] = ["BC", "DE", "HL", "SP"];
const REG16_AF: [&str; 4] = ["BC", "DE", "HL", "AF"];
const CONDITION: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
const ALU: [&str; 8] = [
    "ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP ",
];
const SHIFT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];

/// Build one record of the unprefixed table.
fn main_opcode(code: u8) -> Opcode {
    use LabelType::*;
    let x = code >> 6;
    let y = (code >> 3) & 7;
    let z = code & 7;
    let p = (y >> 1) as usize;
    let q = y & 1;

    match x {
        0 => match z {
            0 => match y {
                0 => Opcode::plain("NOP", 1),
                1 => Opcode::plain("EX AF,AF'", 1),
                2 => Opcode::new("DJNZ #nn", 2, CodeLocalLbl, flags::BRANCH_ADDRESS),
                3 => Opcode::new(
                    "JR #nn",
                    2,
                    CodeLocalLbl,
                    flags::BRANCH_ADDRESS | flags::STOP,
                ),
                _ => Opcode::new(
                    &format!("JR {},#nn", CONDITION[(y - 4) as usize]),
                    2,
                    CodeLocalLbl,
                    flags::BRANCH_ADDRESS,
                ),
            },
            1 => {
                if q == 0 {
                    Opcode::new(&format!("LD {},#nn", REG16[p]), 3, NumberWord, 0)
                } else {
                    Opcode::plain(&format!("ADD HL,{}", REG16[p]), 1)
                }
            }
            2 => match (q, p) {
                (0, 0) => Opcode::plain("LD (BC),A", 1),
                (0, 1) => Opcode::plain("LD (DE),A", 1),
                (0, 2) => Opcode::new("LD (#nn),HL", 3, DataLbl, 0),
                (0, 3) => Opcode::new("LD (#nn),A", 3, DataLbl, 0),
                (1, 0) => Opcode::plain("LD A,(BC)", 1),
                (1, 1) => Opcode::plain("LD A,(DE)", 1),
                (1, 2) => Opcode::new("LD HL,(#nn)", 3, DataLbl, 0),
                _ => Opcode::new("LD A,(#nn)", 3, DataLbl, 0),
            },
            3 => {
                if q == 0 {
                    Opcode::plain(&format!("INC {}", REG16[p]), 1)
                } else {
                    Opcode::plain(&format!("DEC {}", REG16[p]), 1)
                }
            }
            4 => Opcode::plain(&format!("INC {}", REG8[y as usize]), 1),
            5 => Opcode::plain(&format!("DEC {}", REG8[y as usize]), 1),
            6 => Opcode::new(&format!("LD {},#n", REG8[y as usize]), 2, NumberByte, 0),
            _ => {
                let name = ["RLCA", "RRCA", "RLA", "RRA", "DAA", "CPL", "SCF", "CCF"];
                Opcode::plain(name[y as usize], 1)
            }
        },
        1 => {
            if code == 0x76 {
                Opcode::plain("HALT", 1)
            } else {
                Opcode::plain(
                    &format!("LD {},{}", REG8[y as usize], REG8[z as usize]),
                    1,
                )
            }
        }
        2 => Opcode::plain(&format!("{}{}", ALU[y as usize], REG8[z as usize]), 1),
        _ => match z {
            0 => Opcode::plain(&format!("RET {}", CONDITION[y as usize]), 1),
            1 => {
                if q == 0 {
                    Opcode::plain(&format!("POP {}", REG16_AF[p]), 1)
                } else {
                    match p {
                        0 => Opcode::new("RET", 1, None, flags::STOP),
                        1 => Opcode::plain("EXX", 1),
                        2 => Opcode::new("JP (HL)", 1, None, flags::STOP),
                        _ => Opcode::plain("LD SP,HL", 1),
                    }
                }
            }
            2 => Opcode::new(
                &format!("JP {},#nn", CONDITION[y as usize]),
                3,
                CodeLbl,
                flags::BRANCH_ADDRESS,
            ),
            3 => match y {
                0 => Opcode::new("JP #nn", 3, CodeLbl, flags::BRANCH_ADDRESS | flags::STOP),
                1 => Opcode::plain("[CB]", 1),
                2 => Opcode::new("OUT (#n),A", 2, PortLbl, 0),
                3 => Opcode::new("IN A,(#n)", 2, PortLbl, 0),
                4 => Opcode::plain("EX (SP),HL", 1),
                5 => Opcode::plain("EX DE,HL", 1),
                6 => Opcode::plain("DI", 1),
                _ => Opcode::plain("EI", 1),
            },
            4 => Opcode::new(
                &format!("CALL {},#nn", CONDITION[y as usize]),
                3,
                CodeSub,
                flags::BRANCH_ADDRESS | flags::CALL,
            ),
            5 => {
                if q == 0 {
                    Opcode::plain(&format!("PUSH {}", REG16_AF[p]), 1)
                } else {
                    match p {
                        0 => Opcode::new(
                            "CALL #nn",
                            3,
                            CodeSub,
                            flags::BRANCH_ADDRESS | flags::CALL,
                        ),
                        1 => Opcode::plain("[DD]", 1),
                        2 => Opcode::plain("[ED]", 1),
                        _ => Opcode::plain("[FD]", 1),
                    }
                }
            }
            6 => Opcode::new(&format!("{}#n", ALU[y as usize]), 2, NumberByte, 0),
            _ => Opcode::new(
                &format!("RST {}", hex_byte(code & 0x38)),
                1,
                CodeRst,
                flags::BRANCH_ADDRESS | flags::CALL,
            ),
        },
    }
}

/// Build one record of the CB-prefixed table (rotates, shifts, bit ops).
fn cb_opcode(code: u8) -> Opcode {
    let y = (code >> 3) & 7;
    let z = code & 7;
    let reg = REG8[z as usize];

    let name = match code >> 6 {
        0 => format!("{} {}", SHIFT[y as usize], reg),
        1 => format!("BIT {},{}", y, reg),
        2 => format!("RES {},{}", y, reg),
        _ => format!("SET {},{}", y, reg),
    };
    Opcode::plain(&name, 2)
}

/// Build one record of the ED-prefixed table.
fn ed_opcode(code: u8) -> Opcode {
    use LabelType::*;
    let x = code >> 6;
    let y = (code >> 3) & 7;
    let z = code & 7;
    let p = (y >> 1) as usize;
    let q = y & 1;

    // ZX-Next big-endian push immediate.
    if code == 0x8a {
        return Opcode::new("PUSH #nn", 4, NumberWordBigEndian, 0);
    }

    if x == 1 {
        return match z {
            0 => {
                if y == 6 {
                    Opcode::plain("IN F,(C)", 2)
                } else {
                    Opcode::plain(&format!("IN {},(C)", REG8[y as usize]), 2)
                }
            }
            1 => {
                if y == 6 {
                    Opcode::plain("OUT (C),0", 2)
                } else {
                    Opcode::plain(&format!("OUT (C),{}", REG8[y as usize]), 2)
                }
            }
            2 => {
                if q == 0 {
                    Opcode::plain(&format!("SBC HL,{}", REG16[p]), 2)
                } else {
                    Opcode::plain(&format!("ADC HL,{}", REG16[p]), 2)
                }
            }
            3 => {
                if q == 0 {
                    Opcode::new(&format!("LD (#nn),{}", REG16[p]), 4, DataLbl, 0)
                } else {
                    Opcode::new(&format!("LD {},(#nn)", REG16[p]), 4, DataLbl, 0)
                }
            }
            4 => Opcode::plain("NEG", 2),
            5 => {
                if y == 1 {
                    Opcode::new("RETI", 2, None, flags::STOP)
                } else {
                    Opcode::new("RETN", 2, None, flags::STOP)
                }
            }
            6 => {
                let mode = ["0", "0", "1", "2", "0", "0", "1", "2"];
                Opcode::plain(&format!("IM {}", mode[y as usize]), 2)
            }
            _ => match y {
                0 => Opcode::plain("LD I,A", 2),
                1 => Opcode::plain("LD R,A", 2),
                2 => Opcode::plain("LD A,I", 2),
                3 => Opcode::plain("LD A,R", 2),
                4 => Opcode::plain("RRD", 2),
                5 => Opcode::plain("RLD", 2),
                _ => Opcode::plain(&format!("DEFB 0EDh,{}", hex_byte(code)), 2),
            },
        };
    }

    if x == 2 && z <= 3 && y >= 4 {
        let block = [
            ["LDI", "CPI", "INI", "OUTI"],
            ["LDD", "CPD", "IND", "OUTD"],
            ["LDIR", "CPIR", "INIR", "OTIR"],
            ["LDDR", "CPDR", "INDR", "OTDR"],
        ];
        return Opcode::plain(block[(y - 4) as usize][z as usize], 2);
    }

    Opcode::plain(&format!("DEFB 0EDh,{}", hex_byte(code)), 2)
}

/// Build one record of the DD/FD-prefixed table for index register `ix`
/// ("IX" or "IY").
fn index_opcode(code: u8, ix: &str) -> Opcode {
    use LabelType::*;
    let y = (code >> 3) & 7;
    let z = code & 7;
    let idx = format!("({}+#d)", ix);
    let ixh = format!("{}H", ix);
    let ixl = format!("{}L", ix);

    // Register names in the index context: H and L become IXH/IXL, (HL)
    // becomes the displaced form.
    let reg = |r: u8| -> String {
        match r {
            4 => ixh.clone(),
            5 => ixl.clone(),
            6 => idx.clone(),
            _ => REG8[r as usize].to_string(),
        }
    };

    match code {
        0x09 | 0x19 | 0x29 | 0x39 => {
            let rp = ["BC", "DE", ix, "SP"];
            Opcode::plain(&format!("ADD {},{}", ix, rp[((code >> 4) & 3) as usize]), 2)
        }
        0x21 => Opcode::new(&format!("LD {},#nn", ix), 4, NumberWord, 0),
        0x22 => Opcode::new(&format!("LD (#nn),{}", ix), 4, DataLbl, 0),
        0x23 => Opcode::plain(&format!("INC {}", ix), 2),
        0x24 => Opcode::plain(&format!("INC {}", ixh), 2),
        0x25 => Opcode::plain(&format!("DEC {}", ixh), 2),
        0x26 => Opcode::new(&format!("LD {},#n", ixh), 3, NumberByte, 0),
        0x2a => Opcode::new(&format!("LD {},(#nn)", ix), 4, DataLbl, 0),
        0x2b => Opcode::plain(&format!("DEC {}", ix), 2),
        0x2c => Opcode::plain(&format!("INC {}", ixl), 2),
        0x2d => Opcode::plain(&format!("DEC {}", ixl), 2),
        0x2e => Opcode::new(&format!("LD {},#n", ixl), 3, NumberByte, 0),
        0x34 => Opcode::new(&format!("INC {}", idx), 3, RelativeIndex, 0),
        0x35 => Opcode::new(&format!("DEC {}", idx), 3, RelativeIndex, 0),
        0x36 => Opcode::new(&format!("LD {},#n", idx), 4, NumberByte, 0),
        0xe1 => Opcode::plain(&format!("POP {}", ix), 2),
        0xe3 => Opcode::plain(&format!("EX (SP),{}", ix), 2),
        0xe5 => Opcode::plain(&format!("PUSH {}", ix), 2),
        0xe9 => Opcode::new(&format!("JP ({})", ix), 2, None, flags::STOP),
        0xf9 => Opcode::plain(&format!("LD SP,{}", ix), 2),
        0x40..=0x7f if code != 0x76 => {
            let dst = y;
            let src = z;
            if dst == 6 || src == 6 {
                // With a displaced operand the other register keeps its
                // plain name.
                let dst_s = if dst == 6 {
                    idx.clone()
                } else {
                    REG8[dst as usize].to_string()
                };
                let src_s = if src == 6 {
                    idx.clone()
                } else {
                    REG8[src as usize].to_string()
                };
                Opcode::new(&format!("LD {},{}", dst_s, src_s), 3, RelativeIndex, 0)
            } else {
                Opcode::plain(&format!("LD {},{}", reg(dst), reg(src)), 2)
            }
        }
        0x80..=0xbf => {
            if z == 6 {
                Opcode::new(&format!("{}{}", ALU[y as usize], idx), 3, RelativeIndex, 0)
            } else {
                Opcode::plain(&format!("{}{}", ALU[y as usize], reg(z)), 2)
            }
        }
        _ => {
            let prefix = if ix == "IX" { "0DDh" } else { "0FDh" };
            Opcode::plain(&format!("DEFB {},{}", prefix, hex_byte(code)), 2)
        }
    }
}

/// Build one record of the DDCB/FDCB table (displaced bit operations); the
/// table is indexed by the fourth byte.
fn index_cb_opcode(code: u8, ix: &str) -> Opcode {
    let y = (code >> 3) & 7;
    let z = code & 7;
    let idx = format!("({}+#d)", ix);

    let name = match code >> 6 {
        0 => {
            if z == 6 {
                format!("{} {}", SHIFT[y as usize], idx)
            } else {
                // Undocumented: result is copied into a register.
                format!("{} {},{}", SHIFT[y as usize], idx, REG8[z as usize])
            }
        }
        1 => format!("BIT {},{}", y, idx),
        2 => {
            if z == 6 {
                format!("RES {},{}", y, idx)
            } else {
                format!("RES {},{},{}", y, idx, REG8[z as usize])
            }
        }
        _ => {
            if z == 6 {
                format!("SET {},{}", y, idx)
            } else {
                format!("SET {},{},{}", y, idx, REG8[z as usize])
            }
        }
    };
    Opcode::new(&name, 4, LabelType::RelativeIndex, 0)
}

fn build_table(build: impl Fn(u8) -> Opcode) -> Vec<Opcode> {
    (0..=255u8).map(build).collect()
}

lazy_static! {
    static ref MAIN_OPCODES: Vec<Opcode> = build_table(main_opcode);
    static ref CB_OPCODES: Vec<Opcode> = build_table(cb_opcode);
    static ref ED_OPCODES: Vec<Opcode> = build_table(ed_opcode);
    static ref DD_OPCODES: Vec<Opcode> = build_table(|c| index_opcode(c, "IX"));
    static ref FD_OPCODES: Vec<Opcode> = build_table(|c| index_opcode(c, "IY"));
    static ref DDCB_OPCODES: Vec<Opcode> = build_table(|c| index_cb_opcode(c, "IX"));
    static ref FDCB_OPCODES: Vec<Opcode> = build_table(|c| index_cb_opcode(c, "IY"));
}

/// Decode the instruction at `addr`, resolving prefixes and the immediate
/// value. Branch targets come out as absolute addresses; `JR`/`DJNZ`
/// displacements resolve as `addr + 2 + signed(e)`, `RST p` as the fixed
/// page-zero address.
pub fn decode_at(mem: &Memory, addr: u16) -> Instruction {
    let code = mem.read_byte(addr);
    let opcode = match code {
        0xcb => &CB_OPCODES[mem.read_byte(addr.wrapping_add(1)) as usize],
        0xed => &ED_OPCODES[mem.read_byte(addr.wrapping_add(1)) as usize],
        0xdd | 0xfd => {
            let second = mem.read_byte(addr.wrapping_add(1));
            if second == 0xcb {
                let op = mem.read_byte(addr.wrapping_add(3)) as usize;
                if code == 0xdd {
                    &DDCB_OPCODES[op]
                } else {
                    &FDCB_OPCODES[op]
                }
            } else if code == 0xdd {
                &DD_OPCODES[second as usize]
            } else {
                &FD_OPCODES[second as usize]
            }
        }
        _ => &MAIN_OPCODES[code as usize],
    };

    let len = opcode.len;
    let mut mnemonic = opcode.name.clone();

    // Substitute an IX/IY displacement right away; the primary immediate
    // sentinel stays in for the renderer.
    if mnemonic.contains("#d") {
        let d = mem.read_byte(addr.wrapping_add(2)) as i8;
        mnemonic = mnemonic.replace("+#d", &format!("{:+}", d));
    }

    let value = resolve_value(mem, addr, opcode, code);

    Instruction {
        addr,
        mnemonic,
        len,
        value,
        value_kind: opcode.value_kind,
        flags: opcode.flags,
    }
}

fn resolve_value(mem: &Memory, addr: u16, opcode: &Opcode, first_byte: u8) -> u16 {
    use LabelType::*;
    match opcode.value_kind {
        CodeRst => (first_byte & 0x38) as u16,
        CodeLocalLbl => {
            // PC-relative: target = addr + 2 + signed displacement.
            let e = mem.read_byte(addr.wrapping_add(1)) as i8;
            addr.wrapping_add(2).wrapping_add(e as u16)
        }
        NumberWordBigEndian => mem.read_word_be(addr.wrapping_add(opcode.len as u16 - 2)),
        RelativeIndex => mem.read_byte(addr.wrapping_add(2)) as u16,
        _ => {
            if opcode.name.contains("#nn") {
                mem.read_word(addr.wrapping_add(opcode.len as u16 - 2))
            } else if opcode.name.contains("#n") {
                mem.read_byte(addr.wrapping_add(opcode.len as u16 - 1)) as u16
            } else {
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_with(origin: u16, bytes: &[u8]) -> Memory {
        let mut mem = Memory::new();
        mem.set_bytes(origin, bytes);
        mem
    }

    #[test]
    fn test_basic_instructions() {
        let mem = mem_with(0, &[0x00, 0x76, 0xc9]);
        assert_eq!(decode_at(&mem, 0).mnemonic, "NOP");
        assert_eq!(decode_at(&mem, 1).mnemonic, "HALT");
        let ret = decode_at(&mem, 2);
        assert_eq!(ret.mnemonic, "RET");
        assert!(ret.is_stop());
    }

    #[test]
    fn test_ld_immediate_byte() {
        let mem = mem_with(0, &[0x3e, 0x42]);
        let inst = decode_at(&mem, 0);
        assert_eq!(inst.mnemonic, "LD A,#n");
        assert_eq!(inst.len, 2);
        assert_eq!(inst.value, 0x42);
        assert_eq!(inst.value_kind, LabelType::NumberByte);
    }

    #[test]
    fn test_ld_immediate_word() {
        let mem = mem_with(0, &[0x01, 0x34, 0x12]);
        let inst = decode_at(&mem, 0);
        assert_eq!(inst.mnemonic, "LD BC,#nn");
        assert_eq!(inst.len, 3);
        assert_eq!(inst.value, 0x1234);
        assert_eq!(inst.value_kind, LabelType::NumberWord);
    }

    #[test]
    fn test_memory_access_is_data_kind() {
        let mem = mem_with(0, &[0x3a, 0x00, 0x80]);
        let inst = decode_at(&mem, 0);
        assert_eq!(inst.mnemonic, "LD A,(#nn)");
        assert_eq!(inst.value, 0x8000);
        assert_eq!(inst.value_kind, LabelType::DataLbl);
    }

    #[test]
    fn test_jp_and_call() {
        let mem = mem_with(0, &[0xc3, 0x00, 0x80, 0xcd, 0x10, 0x80, 0xc2, 0x20, 0x80]);
        let jp = decode_at(&mem, 0);
        assert_eq!(jp.mnemonic, "JP #nn");
        assert_eq!(jp.value, 0x8000);
        assert!(jp.is_branch() && jp.is_stop() && !jp.is_call());

        let call = decode_at(&mem, 3);
        assert_eq!(call.mnemonic, "CALL #nn");
        assert_eq!(call.value, 0x8010);
        assert_eq!(call.value_kind, LabelType::CodeSub);
        assert!(call.is_branch() && call.is_call() && !call.is_stop());

        let jp_nz = decode_at(&mem, 6);
        assert_eq!(jp_nz.mnemonic, "JP NZ,#nn");
        assert!(jp_nz.is_branch() && !jp_nz.is_stop());
    }

    #[test]
    fn test_relative_branch_targets() {
        // JR +2 at 0x100: target = 0x100 + 2 + 2.
        let mem = mem_with(0x100, &[0x18, 0x02, 0x10, 0xfe]);
        let jr = decode_at(&mem, 0x100);
        assert_eq!(jr.value, 0x104);
        assert_eq!(jr.value_kind, LabelType::CodeLocalLbl);
        assert!(jr.is_stop());

        // DJNZ -2 at 0x102: target = 0x102 + 2 - 2.
        let djnz = decode_at(&mem, 0x102);
        assert_eq!(djnz.mnemonic, "DJNZ #nn");
        assert_eq!(djnz.value, 0x102);
        assert!(!djnz.is_stop());
    }

    #[test]
    fn test_relative_branch_wraps_address_space() {
        let mem = mem_with(0xfffe, &[0x18, 0x04]);
        let jr = decode_at(&mem, 0xfffe);
        assert_eq!(jr.value, 0x0004);
    }

    #[test]
    fn test_rst_target() {
        let mem = mem_with(0, &[0xef]);
        let rst = decode_at(&mem, 0);
        assert_eq!(rst.mnemonic, "RST 28h");
        assert_eq!(rst.value, 0x28);
        assert_eq!(rst.value_kind, LabelType::CodeRst);
        assert!(rst.is_call());
    }

    #[test]
    fn test_io_ports() {
        let mem = mem_with(0, &[0xdb, 0xfe, 0xd3, 0xfe]);
        let inp = decode_at(&mem, 0);
        assert_eq!(inp.mnemonic, "IN A,(#n)");
        assert_eq!(inp.value, 0xfe);
        assert_eq!(inp.value_kind, LabelType::PortLbl);
        let out = decode_at(&mem, 2);
        assert_eq!(out.mnemonic, "OUT (#n),A");
        assert_eq!(out.value_kind, LabelType::PortLbl);
    }

    #[test]
    fn test_cb_prefix() {
        let mem = mem_with(0, &[0xcb, 0x00, 0xcb, 0x5f, 0xcb, 0xfe]);
        assert_eq!(decode_at(&mem, 0).mnemonic, "RLC B");
        assert_eq!(decode_at(&mem, 2).mnemonic, "BIT 3,A");
        let set = decode_at(&mem, 4);
        assert_eq!(set.mnemonic, "SET 7,(HL)");
        assert_eq!(set.len, 2);
    }

    #[test]
    fn test_ed_prefix() {
        let mem = mem_with(0, &[0xed, 0xb0, 0xed, 0x4d, 0xed, 0x45]);
        assert_eq!(decode_at(&mem, 0).mnemonic, "LDIR");
        let reti = decode_at(&mem, 2);
        assert_eq!(reti.mnemonic, "RETI");
        assert!(reti.is_stop());
        let retn = decode_at(&mem, 4);
        assert_eq!(retn.mnemonic, "RETN");
        assert!(retn.is_stop());
    }

    #[test]
    fn test_ed_load_word_address() {
        let mem = mem_with(0, &[0xed, 0x4b, 0x00, 0x90]);
        let inst = decode_at(&mem, 0);
        assert_eq!(inst.mnemonic, "LD BC,(#nn)");
        assert_eq!(inst.len, 4);
        assert_eq!(inst.value, 0x9000);
        assert_eq!(inst.value_kind, LabelType::DataLbl);
    }

    #[test]
    fn test_zx_next_big_endian_push() {
        let mem = mem_with(0, &[0xed, 0x8a, 0x12, 0x34]);
        let inst = decode_at(&mem, 0);
        assert_eq!(inst.mnemonic, "PUSH #nn");
        assert_eq!(inst.len, 4);
        assert_eq!(inst.value, 0x1234);
        assert_eq!(inst.value_kind, LabelType::NumberWordBigEndian);
    }

    #[test]
    fn test_index_displacement() {
        let mem = mem_with(0, &[0xdd, 0x7e, 0x05, 0xfd, 0x36, 0xfd, 0x42]);
        let ld = decode_at(&mem, 0);
        assert_eq!(ld.mnemonic, "LD A,(IX+5)");
        assert_eq!(ld.len, 3);
        assert_eq!(ld.value_kind, LabelType::RelativeIndex);

        let ld_iy = decode_at(&mem, 3);
        assert_eq!(ld_iy.mnemonic, "LD (IY-3),#n");
        assert_eq!(ld_iy.len, 4);
        assert_eq!(ld_iy.value, 0x42);
        assert_eq!(ld_iy.value_kind, LabelType::NumberByte);
    }

    #[test]
    fn test_index_jp_is_stop() {
        let mem = mem_with(0, &[0xdd, 0xe9]);
        let jp = decode_at(&mem, 0);
        assert_eq!(jp.mnemonic, "JP (IX)");
        assert!(jp.is_stop());
    }

    #[test]
    fn test_index_cb_reaches_four_bytes() {
        let mem = mem_with(0, &[0xdd, 0xcb, 0x03, 0x46, 0xfd, 0xcb, 0xff, 0xc6]);
        let bit = decode_at(&mem, 0);
        assert_eq!(bit.mnemonic, "BIT 0,(IX+3)");
        assert_eq!(bit.len, 4);

        let set = decode_at(&mem, 4);
        assert_eq!(set.mnemonic, "SET 0,(IY-1)");
        assert_eq!(set.len, 4);
    }

    #[test]
    fn test_hex_text_helpers() {
        assert_eq!(hex_byte(0x12), "12h");
        assert_eq!(hex_byte(0xfa), "0FAh");
        assert_eq!(hex_word(0x1234), "1234h");
        assert_eq!(hex_word(0xfa00), "0FA00h");
    }
}
