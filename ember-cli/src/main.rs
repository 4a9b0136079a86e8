use anyhow::{Context, Result};
use clap::Parser;
use ember_diagnostics::Diagnostic;
use ember_runtime::error::Error;
use ember_runtime::gcref::GcRef;
use ember_runtime::kinds::bytes::as_byte_slice;
use ember_runtime::kinds::exception::ExceptionData;
use ember_runtime::kinds::primitives::int_value;
use ember_runtime::kinds::typesys::TypeData;
use ember_runtime::{DEFAULT_GC_THRESHOLD, DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL};
use std::path::PathBuf;

/// Runs a compiled program against the object-model runtime.
#[derive(Parser)]
#[command(name = "ember")]
#[command(version)]
#[command(about = "Runs a bytecode program on the object-model runtime", long_about = None)]
struct Cli {
    /// Path to the bytecode file
    bytecode: PathBuf,

    /// Arguments passed to the program as a tuple of bytes objects
    #[arg(last = true)]
    args: Vec<String>,

    /// Print more detail about what's running
    #[arg(short, long)]
    verbose: bool,

    /// Heap quota for the root thread group, in bytes
    #[arg(long, env = "HEAP_MEM", default_value_t = DEFAULT_HEAP_MEM)]
    heap_mem: u64,

    /// Instructions between scheduler yield checks for the root group
    #[arg(long, env = "EMBER_YIELD_INTERVAL", default_value_t = DEFAULT_YIELD_INTERVAL)]
    yield_interval: u64,

    /// Instructions between GC probes
    #[arg(long, env = "EMBER_GC_THRESHOLD", default_value_t = DEFAULT_GC_THRESHOLD)]
    gc_threshold: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let bytecode = std::fs::read(&cli.bytecode)
        .with_context(|| format!("reading bytecode file {:?}", cli.bytecode))?;

    if cli.verbose {
        log::info!(
            "running {:?} ({} bytes), heap_mem={}, yield_interval={}, gc_threshold={}",
            cli.bytecode,
            bytecode.len(),
            cli.heap_mem,
            cli.yield_interval,
            cli.gc_threshold
        );
    }

    let program_args: Vec<Vec<u8>> = cli.args.iter().map(|s| s.as_bytes().to_vec()).collect();

    match ember_runtime::run_program(
        &bytecode,
        &program_args,
        cli.heap_mem,
        cli.yield_interval,
        cli.gc_threshold,
    ) {
        Ok(result) => {
            if result.kind_name() == "int" {
                std::process::exit(int_value(result) as i32);
            }
            Ok(())
        }
        Err(Error::Raised(exc)) => {
            ember_diagnostics::print(&exception_diagnostic(exc));
            std::process::exit(1);
        }
        Err(err) => {
            ember_diagnostics::print(&Diagnostic::error(err.to_string()));
            std::process::exit(1);
        }
    }
}

fn exception_diagnostic(exc: GcRef) -> Diagnostic {
    let kind = exc
        .ty()
        .and_then(|t| t.downcast::<TypeData>())
        .map(|t| t.name.as_str())
        .unwrap_or("exception");

    let args = exc
        .downcast::<ExceptionData>()
        .map(|e| stringify_args(e.args))
        .unwrap_or_default();

    Diagnostic::uncaught_exception(kind, &args)
}

fn stringify_args(args: GcRef) -> Vec<String> {
    use ember_runtime::kinds::collections::TupleData;
    args.downcast::<TupleData>()
        .map(|t| {
            t.items
                .iter()
                .map(|&item| {
                    as_byte_slice(item)
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_else(|| format!("<{}>", item.kind_name()))
                })
                .collect()
        })
        .unwrap_or_default()
}
