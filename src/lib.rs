#![crate_name = "zedasm"]

#[macro_use]
extern crate lazy_static;

pub mod callgraph;
pub mod disassembler;
pub mod label;
pub mod listing;
pub mod memory;
pub mod opcode;
pub mod snapshot;
pub mod trace;
