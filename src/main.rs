use std::env;
use std::fs;
use std::process;

use rpascal::{CompileError, CompileResult};

fn usage(program: &str) -> ! {
  eprintln!("usage: {program} [-l|-e|-s] <file>");
  process::exit(1);
}

fn read_source(fname: &str) -> CompileResult<String> {
  fs::read_to_string(fname).map_err(|_| CompileError::MissingFile {
    fname: fname.to_string(),
  })
}

fn run(mode: Option<&str>, fname: &str) -> CompileResult<String> {
  let source = read_source(fname)?;
  match mode {
    Some("-l") => rpascal::tokens_dump(&source),
    Some("-e") => rpascal::expr_tree_dump(&source),
    Some("-s") => rpascal::symbols_dump(&source),
    _ => rpascal::compile(&source),
  }
}

fn main() {
  let args: Vec<String> = env::args().collect();
  let program = args.first().map(String::as_str).unwrap_or("rpascal");

  let (mode, fname) = match args.len() {
    2 => (None, args[1].as_str()),
    3 if matches!(args[1].as_str(), "-l" | "-e" | "-s") => (Some(args[1].as_str()), args[2].as_str()),
    _ => usage(program),
  };

  match run(mode, fname) {
    Ok(output) => print!("{output}"),
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
