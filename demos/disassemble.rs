use std::env;
use std::io;
use std::process::exit;

use zedasm::disassembler::Disassembler;

/// Disassemble a raw binary and print the listing.
///
/// Usage: disassemble <path> [--org <addr>] [--entry <addr>]
fn main() -> io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let mut bin_file: Option<String> = None;
    let mut org: u16 = 0x8000;
    let mut entry: Option<u16> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--org" => {
                if i + 1 < args.len() {
                    if let Ok(a) = parse_hex_or_dec(&args[i + 1]) {
                        org = a;
                    }
                    i += 1;
                }
            }
            "--entry" => {
                if i + 1 < args.len() {
                    if let Ok(a) = parse_hex_or_dec(&args[i + 1]) {
                        entry = Some(a);
                    }
                    i += 1;
                }
            }
            "--help" => {
                println!("Usage: {} <path> [--org <addr>] [--entry <addr>]", args[0]);
                return Ok(());
            }
            other => {
                if !other.starts_with("--") {
                    bin_file = Some(other.to_string());
                }
            }
        }
        i += 1;
    }

    let bin_file = match bin_file {
        Some(f) => f,
        None => {
            eprintln!("Gotta supply a binary by path");
            exit(-1);
        }
    };

    println!("; Z80 disassembly of {}", bin_file);
    println!();

    let mut dasm = Disassembler::new();
    dasm.read_bin(org, &bin_file)?;
    dasm.set_code_label(entry.unwrap_or(org), None);

    match dasm.disassemble() {
        Ok(listing) => {
            for line in listing {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("Disassembly failed: {}", e);
            exit(1);
        }
    }

    for warning in dasm.warnings() {
        eprintln!("Warning: {}", warning);
    }

    Ok(())
}

fn parse_hex_or_dec(s: &str) -> Result<u16, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse::<u16>()
    };
    parsed.map_err(|_| format!("bad address '{}'", s))
}
