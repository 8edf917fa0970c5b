use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::exit;

use zedasm::disassembler::Disassembler;

fn print_help(program: &str) {
    println!("Usage: {} [options]", program);
    println!();
    println!("Input (processed in order, load files before referencing them):");
    println!("  --bin <origin> <path>      load a raw binary at <origin>");
    println!("  --sna <path>               load a ZX Spectrum 48K snapshot");
    println!("  --tr <path>                queue addresses from a MAME trace");
    println!("  --codelabel <addr> [name]  fix a code label / entry point");
    println!("  --jmptable <addr> <count>  read a jump table of <count> words");
    println!();
    println!("Output:");
    println!("  --out <path>               write the listing (default stdout)");
    println!("  --dot <path>               write the call graph in DOT syntax");
    println!();
    println!("Options:");
    println!("  --uppercase                render mnemonics in uppercase");
    println!("  --nobytes                  omit the raw-byte column");
    println!("  --help                     this text");
    println!();
    println!("Addresses accept decimal or 0x-prefixed hex.");
}

fn parse_hex_or_dec(s: &str) -> Result<u16, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse::<u16>()
    };
    parsed.map_err(|_| format!("bad address '{}'", s))
}

fn arg_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i) {
        Some(v) => v,
        None => {
            eprintln!("Missing value for {}", flag);
            exit(-1);
        }
    }
}

fn address_arg(args: &[String], i: usize, flag: &str) -> u16 {
    match parse_hex_or_dec(arg_value(args, i, flag)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{} for {}", e, flag);
            exit(-1);
        }
    }
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help(&args[0]);
        exit(-1);
    }

    let mut dasm = Disassembler::new();
    let mut out_path: Option<String> = None;
    let mut dot_path: Option<String> = None;
    let mut have_input = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bin" => {
                let origin = address_arg(&args, i + 1, "--bin");
                let path = arg_value(&args, i + 2, "--bin").to_string();
                dasm.read_bin(origin, &path)?;
                have_input = true;
                i += 2;
            }
            "--sna" => {
                let path = arg_value(&args, i + 1, "--sna").to_string();
                dasm.read_sna(&path)?;
                have_input = true;
                i += 1;
            }
            "--tr" => {
                let path = arg_value(&args, i + 1, "--tr").to_string();
                dasm.read_trace(&path)?;
                i += 1;
            }
            "--codelabel" => {
                let addr = address_arg(&args, i + 1, "--codelabel");
                let name = match args.get(i + 2) {
                    Some(n) if !n.starts_with("--") => {
                        i += 1;
                        Some(n.clone())
                    }
                    _ => None,
                };
                dasm.set_code_label(addr, name);
                i += 1;
            }
            "--jmptable" => {
                let addr = address_arg(&args, i + 1, "--jmptable");
                let count = match arg_value(&args, i + 2, "--jmptable").parse::<usize>() {
                    Ok(c) => c,
                    Err(_) => {
                        eprintln!("bad count for --jmptable");
                        exit(-1);
                    }
                };
                dasm.set_jmp_table(addr, count);
                i += 2;
            }
            "--out" => {
                out_path = Some(arg_value(&args, i + 1, "--out").to_string());
                i += 1;
            }
            "--dot" => {
                dot_path = Some(arg_value(&args, i + 1, "--dot").to_string());
                i += 1;
            }
            "--uppercase" => {
                dasm.opts.opcodes_lower_case = false;
            }
            "--nobytes" => {
                dasm.opts.add_opcode_bytes = false;
            }
            "--help" => {
                print_help(&args[0]);
                return Ok(());
            }
            other => {
                eprintln!("Unknown option '{}'", other);
                print_help(&args[0]);
                exit(-1);
            }
        }
        i += 1;
    }

    if !have_input {
        eprintln!("No input file given");
        exit(-1);
    }

    let listing = match dasm.disassemble() {
        Ok(lines) => lines,
        Err(e) => {
            eprintln!("Disassembly failed: {}", e);
            exit(1);
        }
    };

    for warning in dasm.warnings() {
        eprintln!("Warning: {}", warning);
    }

    match out_path {
        Some(path) => fs::write(path, listing.join("\n") + "\n")?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for line in &listing {
                writeln!(handle, "{}", line)?;
            }
        }
    }

    if let Some(path) = dot_path {
        fs::write(path, dasm.call_graph())?;
    }

    Ok(())
}
