use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use serde::Serialize;

use sw8asm_core::assembler::{self, AssembledProgram, IncludeResolver};
use sw8asm_core::isa::Sw8Isa;

/// Two-pass assembler for the SW8 processor
#[derive(Parser, Debug)]
#[command(version, about)]
struct Arguments {
    /// Source file to assemble
    input: PathBuf,

    /// Write the result to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit the assembled program as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize, Debug)]
struct SectionOut {
    origin: u16,
    #[serde(with = "hex::serde")]
    bytes: Vec<u8>,
}

#[derive(Serialize, Debug)]
struct ProgramOut {
    sections: Vec<SectionOut>,
    symbols: BTreeMap<String, u16>,
}

/// Resolves include paths relative to the input file's directory.
struct FsResolver {
    root: PathBuf,
}

impl IncludeResolver for FsResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.root.join(path)).ok()
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Arguments::parse();

    let source = fs::read_to_string(&args.input)?;
    let resolver = FsResolver {
        root: args.input.parent().unwrap_or(Path::new(".")).to_path_buf(),
    };

    let program = assembler::assemble_with(&source, &Sw8Isa, &resolver)
        .map_err(|error| eyre!("{}: {}", args.input.display(), error))?;

    let rendered = if args.json {
        render_json(&program)?
    } else {
        render_dump(&program)
    };

    match args.output {
        Some(path) => fs::write(path, rendered)?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn render_json(program: &AssembledProgram) -> Result<String> {
    let out = ProgramOut {
        sections: program
            .sections
            .iter()
            .map(|s| SectionOut {
                origin: s.origin,
                bytes: s.bytes.clone(),
            })
            .collect(),
        symbols: program
            .symbols
            .iter()
            .map(|(name, address)| (name.clone(), *address))
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&out)? + "\n")
}

/// Address-annotated hex dump, sixteen bytes per row, followed by the
/// symbol table.
fn render_dump(program: &AssembledProgram) -> String {
    let mut out = String::new();

    for section in &program.sections {
        for (row, chunk) in section.bytes.chunks(16).enumerate() {
            write!(out, "{:04X} ", section.origin as usize + row * 16).unwrap();
            for byte in chunk {
                write!(out, " {:02X}", byte).unwrap();
            }
            out.push('\n');
        }
    }

    if !program.symbols.is_empty() {
        let sorted: BTreeMap<_, _> = program.symbols.iter().collect();
        out.push('\n');
        for (name, address) in sorted {
            writeln!(out, "{:04X}  {}", address, name).unwrap();
        }
    }

    out
}
