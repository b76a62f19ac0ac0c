//! sfc — the script compiler CLI.
//!
//! Parses one `Config`, loads the shared selector/class vocabulary under
//! an advisory lock, compiles each source file on the command line in
//! order, and writes the heap/hunk resource images plus the auxiliary
//! files alongside them.

use std::fs;
use std::path::{Path, PathBuf};

use miette::Result;
use stackforge::codegen::CodegenContext;
use stackforge::config::Config;
use stackforge::diagnostics::{CoreDiagnostic, Diagnostics};
use stackforge::errors::CoreError;
use stackforge::listing::{FileSink, ListingSink, NullSink};
use stackforge::vocab::{default_vocab_dir, FileLock, VocabStore};
use stackforge::{compile_unit, CompiledUnit};

// 64 MB stack — a deeply-nested expression tree walks the codegen
// recursion as deep as the source nests it.
const STACK_SIZE: usize = 64 * 1024 * 1024;

fn main() -> Result<()> {
    let config = Config::from_args();
    init_tracing(config.verbose);

    let result = std::thread::Builder::new()
        .name("sfc-worker".into())
        .stack_size(STACK_SIZE)
        .spawn(move || std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(config))))
        .expect("failed to spawn sfc worker thread")
        .join();

    let exit_code = match result {
        Ok(Ok(code)) => code,
        Ok(Err(report)) => {
            eprintln!("{report:?}");
            3
        }
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unexpected panic in the compiler core".to_string()
            };
            eprintln!("sfc crashed: internal error (panic): {msg}");
            3
        }
    };

    std::process::exit(exit_code)
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves a configured vocabulary file name against the working
/// directory first, falling back to the per-user vocabulary home when
/// the name is bare (no directory component) and doesn't already exist
/// in the working directory.
fn resolve_vocab_path(configured: &Path) -> PathBuf {
    if configured.exists() || configured.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
        configured.to_path_buf()
    } else {
        default_vocab_dir().join(configured)
    }
}

/// Deletes `path` if present, then writes `bytes` fresh — 4.10's output
/// file lifecycle.
fn write_fresh(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| CoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    fs::write(path, bytes).map_err(|e| CoreError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn output_path(config: &Config, script: u16, ext: &str) -> PathBuf {
    let name = format!("{script}.{ext}");
    match &config.output_directory {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn write_compiled_unit(
    config: &Config,
    script: u16,
    source_path: &Path,
    compiled: &CompiledUnit,
) -> Result<(), CoreError> {
    if let Some(dir) = &config.output_directory {
        fs::create_dir_all(dir).map_err(|e| CoreError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
    }
    write_fresh(&output_path(config, script, "hep"), &compiled.heap)?;
    write_fresh(&output_path(config, script, "scr"), &compiled.hunk)?;
    write_fresh(
        &output_path(config, script, "inf"),
        format!("{}\n", source_path.display()).as_bytes(),
    )?;
    Ok(())
}

/// Renders every record a unit's `Diagnostics` accumulated, in the
/// order reported. Fatal conditions never reach here — they return
/// `Err` from `compile_unit` before a `Diagnostics` record is made.
fn print_diagnostics(path: &Path, diagnostics: &Diagnostics) {
    for record in diagnostics.records() {
        eprintln!("{}: {:?}: {}", path.display(), record.severity, record.message);
    }
}

fn run(config: Config) -> Result<i32> {
    if config.files.is_empty() {
        eprintln!("sfc: no input files");
        return Ok(1);
    }

    let selector_path = resolve_vocab_path(&config.selector_file);
    let classdef_path = resolve_vocab_path(&config.classdef_file);

    let lock_path = match &config.output_directory {
        Some(dir) => dir.join(".sfc-lock"),
        None => PathBuf::from(".sfc-lock"),
    };
    let mut lock = if config.no_lock {
        None
    } else {
        let mut lock = FileLock::open(&lock_path).map_err(fatal)?;
        if config.abort_if_locked {
            if !lock.try_lock().map_err(fatal)? {
                return Err(miette::miette!("vocabulary database '{}' is locked", lock_path.display()));
            }
        } else {
            while !lock.try_lock().map_err(fatal)? {
                tracing::warn!(path = %lock_path.display(), "vocabulary locked by another process, waiting");
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
        Some(lock)
    };

    let mut vocab = VocabStore::load(selector_path, classdef_path).map_err(fatal)?;

    let mut total_errors: u32 = 0;
    let mut total_warnings: u32 = 0;

    for source_path in &config.files {
        let source = fs::read_to_string(source_path)
            .map_err(|e| miette::miette!("cannot read '{}': {}", source_path.display(), e))?;
        let unit: stackforge::ast::CompilationUnit = serde_json::from_str(&source)
            .map_err(|e| miette::miette!("'{}' is not a valid compilation unit: {}", source_path.display(), e))?;

        let mut diagnostics = Diagnostics::new();
        let mut null_sink = NullSink;
        let mut file_sink;
        let listing: &mut dyn ListingSink = if config.generate_listing {
            file_sink = FileSink::create(&output_path(&config, unit.script_number, "sl"))
                .map_err(|e| CoreError::Io {
                    path: format!("{}.sl", unit.script_number),
                    source: e,
                })
                .map_err(fatal)?;
            &mut file_sink
        } else {
            &mut null_sink
        };

        let mut ctx = CodegenContext::new(&config, &mut vocab, &mut diagnostics, listing);

        let compiled = match compile_unit(&unit, &mut ctx) {
            Ok(compiled) => compiled,
            Err(e) => {
                drop(ctx);
                if let Some(lock) = lock.as_mut() {
                    lock.unlock();
                }
                return Err(miette::Report::new(CoreDiagnostic::new(e)));
            }
        };
        drop(ctx);

        print_diagnostics(source_path, &diagnostics);
        total_errors += diagnostics.error_count();
        total_warnings += diagnostics.warning_count();

        write_compiled_unit(&config, unit.script_number, source_path, &compiled).map_err(fatal)?;

        if config.verbose > 0 {
            tracing::info!(
                file = %source_path.display(),
                errors = diagnostics.error_count(),
                warnings = diagnostics.warning_count(),
                "compiled",
            );
        }
    }

    // 7: a non-zero error count across the run suppresses the shared
    // vocabulary write-back even though every unit's own resource
    // images were already written.
    if total_errors == 0 {
        vocab.write_back().map_err(fatal)?;
    }

    if let Some(lock) = lock.as_mut() {
        lock.unlock();
    }
    drop(lock);

    tracing::info!(files = config.files.len(), errors = total_errors, warnings = total_warnings, "run complete");
    Ok(total_errors.min(255) as i32)
}

fn fatal(e: CoreError) -> miette::Report {
    miette::Report::new(CoreDiagnostic::new(e))
}
