//! Lyre launcher.
//!
//! Runs source files (or stdin), loads source/bytecode libraries, prints
//! compiled forms, and hosts the interactive REPL. Exit code 0 on success,
//! 1 on any read, compile, runtime or I/O error.

mod config;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use config::Config;
use lyre_runtime::{Interp, ReadError, ReadSource, Reader, SliceSource};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lyre")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lyre interpreter", long_about = None)]
struct Cli {
    /// Report heap and symbol statistics on exit
    #[arg(short = 'd')]
    debug: bool,

    /// Treat input as serialized bytecode rather than source
    #[arg(short = 'b')]
    binary: bool,

    /// Print each compiled form
    #[arg(short = 'c')]
    print_compiled: bool,

    /// Print each compiled form without running it
    #[arg(short = 'C')]
    compile_only: bool,

    /// Load a source library before the main input
    #[arg(short = 'l', value_name = "FILE")]
    libraries: Vec<PathBuf>,

    /// Load a bytecode library before the main input
    #[arg(short = 'L', value_name = "FILE")]
    binary_libraries: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source files; standard input when empty
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LibKind {
    Source,
    Bytecode,
}

/// One `-l`/`-L` occurrence, in command-line position order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Library {
    kind: LibKind,
    path: PathBuf,
}

/// Interleave `-l` and `-L` back into the order their flags appeared.
/// The original launcher walked argv once and loaded each library at the
/// flag's position, so `-L a -l b` and `-l b -L a` differ.
fn library_load_order(matches: &ArgMatches, cli: &Cli) -> Vec<Library> {
    let mut libs: Vec<(usize, Library)> = Vec::new();
    if let Some(indices) = matches.indices_of("libraries") {
        for (at, path) in indices.zip(cli.libraries.iter()) {
            libs.push((at, Library { kind: LibKind::Source, path: path.clone() }));
        }
    }
    if let Some(indices) = matches.indices_of("binary_libraries") {
        for (at, path) in indices.zip(cli.binary_libraries.iter()) {
            libs.push((at, Library { kind: LibKind::Bytecode, path: path.clone() }));
        }
    }
    libs.sort_by_key(|(at, _)| *at);
    libs.into_iter().map(|(_, lib)| lib).collect()
}

fn parse_cli_from<I, T>(args: I) -> Result<(Cli, Vec<Library>), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Cli::command().try_get_matches_from(args)?;
    let cli = Cli::from_arg_matches(&matches)?;
    let libs = library_load_order(&matches, &cli);
    Ok((cli, libs))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let (cli, libs) = match parse_cli_from(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => e.exit(),
    };
    match run(&cli, &libs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::from(1),
    }
}

fn run(cli: &Cli, libs: &[Library]) -> Result<(), ()> {
    let config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| eprintln!("{}", e))?,
        None => Config::default(),
    };
    let mut interp = config.make_interp();

    let print_compiled = cli.print_compiled || cli.compile_only;
    let no_run = cli.compile_only;

    // Config preloads first (images, then sources); command-line
    // libraries follow in the order their flags appeared.
    for path in &config.preload.images {
        interp.load_bytecode_file(path).map_err(|e| eprintln!("{}", e))?;
    }
    for path in &config.preload.sources {
        interp.run_file(path).map_err(|e| eprintln!("{}", e))?;
    }
    for lib in libs {
        let loaded = match lib.kind {
            LibKind::Source => interp.run_file(&lib.path),
            LibKind::Bytecode => interp.load_bytecode_file(&lib.path),
        };
        loaded.map_err(|e| eprintln!("{}", e))?;
    }

    if cli.files.is_empty() {
        if cli.binary {
            let mut bytes = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin().lock(), &mut bytes)
                .map_err(|e| eprintln!("stdin: {}", e))?;
            interp.load_boot_image(&bytes).map_err(|e| eprintln!("{}", e))?;
        } else {
            repl(&mut interp, stdin_is_tty(), print_compiled, no_run)?;
        }
    } else {
        for path in &cli.files {
            if print_compiled {
                compile_file(&mut interp, path, no_run)?;
            } else if cli.binary {
                interp.load_bytecode_file(path).map_err(|e| eprintln!("{}", e))?;
            } else {
                interp.run_file(path).map_err(|e| eprintln!("{}", e))?;
            }
        }
    }

    if !print_compiled {
        run_main(&mut interp)?;
    }
    if cli.debug {
        report_debug(&interp);
    }
    Ok(())
}

#[cfg(unix)]
fn stdin_is_tty() -> bool {
    // Matches the original launcher's isatty(0) check.
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
}

#[cfg(not(unix))]
fn stdin_is_tty() -> bool {
    false
}

/// Evaluate stdin form by form. With a terminal: prompt, echo results,
/// recover from errors; otherwise any error aborts with failure.
fn repl(interp: &mut Interp, tty: bool, print_compiled: bool, no_run: bool) -> Result<(), ()> {
    if tty {
        println!("type ':q' to quit");
    }
    let quit = interp.intern(":q");
    let stdin = std::io::stdin();
    let mut reader = Reader::new(ReadSource::new(stdin.lock()));
    loop {
        if tty {
            print!("> ");
            let _ = std::io::stdout().flush();
        }
        let expr = match reader.read(interp) {
            Err(ReadError::EndOfFile) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                if tty {
                    continue;
                }
                return Err(());
            }
            Ok(expr) => expr,
        };
        if expr == quit {
            break;
        }

        interp.push_root(expr);
        let code = interp.compile(expr);
        interp.pop_root();
        let code = match code {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", e);
                if tty {
                    interp.reset_error();
                    continue;
                }
                return Err(());
            }
        };
        if print_compiled {
            println!("{}", interp.write_shared_string(code));
        }
        if no_run {
            continue;
        }
        match interp.run_bytecode(code) {
            Ok(v) => {
                if tty && !print_compiled {
                    println!("=> {}", interp.write_shared_string(v));
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                if !tty {
                    return Err(());
                }
                interp.reset_error();
            }
        }
    }
    if tty {
        println!("bye");
    }
    Ok(())
}

/// `-c` / `-C`: print each form's compiled code, optionally running it.
fn compile_file(interp: &mut Interp, path: &Path, no_run: bool) -> Result<(), ()> {
    let bytes = std::fs::read(path).map_err(|_| eprintln!("File not found: {}", path.display()))?;
    let mut reader = Reader::new(SliceSource::new(&bytes));
    loop {
        let expr = match reader.read(interp) {
            Err(ReadError::EndOfFile) => return Ok(()),
            Err(e) => {
                eprintln!("Read error: {}", e);
                return Err(());
            }
            Ok(expr) => expr,
        };
        interp.push_root(expr);
        let code = interp.compile(expr);
        interp.pop_root();
        let code = match code {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", e);
                return Err(());
            }
        };
        println!("{}", interp.write_shared_string(code));
        if !no_run {
            interp.run_bytecode(code).map_err(|e| eprintln!("{}", e))?;
        }
    }
}

/// Call the `main` global, if the loaded program defined one.
fn run_main(interp: &mut Interp) -> Result<(), ()> {
    let main_sym = interp.intern_id("main");
    if let Some(main) = interp.refer_global(main_sym) {
        interp.funcall(main, &[]).map_err(|e| eprintln!("{}", e))?;
    }
    Ok(())
}

fn report_debug(interp: &Interp) {
    let stats = interp.gc_stats();
    println!("Heap:");
    println!(
        "  #alloc: {}, #collected: {}, #gc-cycles: {}",
        stats.allocations, stats.freed_total, stats.collections
    );
    println!(
        "  live: {}, capacity: {}, next-gc at: {}",
        stats.live, stats.capacity, stats.threshold
    );
    println!("Symbols: {}", interp.symbol_count());
}
