//! rell entrypoint: script runner, one-liner evaluation, and a line
//! REPL.
//!
//! Exit status follows the host convention: an integer result is the
//! status (clipped to 32 bits), no result is 0, an uncaught error is
//! its code, anything else is 1. QUIT carries its own code out.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use core_api::{Engine, EngineError, EngineOutcome, MachineConfig};
use core_config::Config;
use tracing::{info, warn};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "rell", version, about = "rell language interpreter")]
struct Args {
    /// Script to run. Starts the REPL when omitted (and --eval absent).
    pub script: Option<PathBuf>,
    /// Evaluate one expression and exit.
    #[arg(long = "eval", short = 'e')]
    pub eval: Option<String>,
    /// Configuration file path (overrides discovery of `rell.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Arguments passed to the script as system/options/args.
    #[arg(trailing_var_arg = true)]
    pub script_args: Vec<String>,
}

fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
    if result.is_err() {
        // A second init (tests) is harmless.
    }
}

fn engine_for(config: &Config) -> Result<Engine, EngineError> {
    let machine_config = MachineConfig {
        watermark: config.watermark,
        max_request: config.max_request,
        depth_ceiling: config.stack_ceiling,
    };
    Engine::startup_with(machine_config)
}

/// Run source and translate to an exit status, printing any uncaught
/// error to stderr.
fn run_to_status(engine: &mut Engine, source: &str) -> i32 {
    let outcome = engine.run_outcome(source);
    if let Err(EngineError::Script { message, .. }) = &outcome {
        eprintln!("{message}");
    }
    engine.exit_status(&outcome)
}

fn run_script(engine: &mut Engine, path: &PathBuf, script_args: &[String]) -> Result<i32> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    engine
        .set_script_args(script_args)
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    info!(path = %path.display(), "running script");
    Ok(run_to_status(engine, &source))
}

/// Interactive console: evaluate each line, mold the result, keep the
/// prompt alive across errors.
fn repl(engine: &mut Engine) -> Result<i32> {
    let stdin = std::io::stdin();
    let mut out = std::io::stdout();
    loop {
        write!(out, ">> ")?;
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(0); // EOF
        }
        if line.trim().is_empty() {
            continue;
        }
        match engine.run_outcome(&line) {
            Ok(EngineOutcome::Quit(code)) => return Ok(code),
            Ok(EngineOutcome::Value(Some(value))) => {
                let molded = engine
                    .mold(&value)
                    .unwrap_or_else(|_| "??".into());
                writeln!(out, "== {molded}")?;
                engine.release(value);
            }
            Ok(EngineOutcome::Value(None)) => {}
            Err(EngineError::Script { message, .. }) => {
                // Captured, displayed, and the prompt resumes.
                writeln!(out, "{message}")?;
            }
            Err(err) => {
                warn!(%err, "engine failure");
                return Ok(1);
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    let mut engine = engine_for(&config).map_err(|err| anyhow::anyhow!("{err}"))?;

    let status = if let Some(source) = &args.eval {
        run_to_status(&mut engine, source)
    } else if let Some(script) = &args.script {
        run_script(&mut engine, script, &args.script_args)?
    } else {
        repl(&mut engine)?
    };

    engine.shutdown(true);
    std::process::exit(status);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        engine_for(&Config::default()).expect("boot")
    }

    #[test]
    fn integer_result_is_the_exit_status() {
        let mut e = engine();
        assert_eq!(run_to_status(&mut e, "add 40 2"), 42);
    }

    #[test]
    fn no_result_is_zero() {
        let mut e = engine();
        assert_eq!(run_to_status(&mut e, ""), 0);
    }

    #[test]
    fn uncaught_error_maps_to_its_code() {
        let mut e = engine();
        let status = run_to_status(&mut e, "no-such-word");
        assert_eq!(status, 200); // script/no-value
    }

    #[test]
    fn non_integer_result_is_one() {
        let mut e = engine();
        assert_eq!(run_to_status(&mut e, "\"hello\""), 1);
    }

    #[test]
    fn quit_carries_its_code() {
        let mut e = engine();
        assert_eq!(run_to_status(&mut e, "quit 7"), 7);
    }

    #[test]
    fn script_file_runs_with_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "length-of system/options/args").unwrap();
        let mut e = engine();
        let status = run_script(
            &mut e,
            &file.path().to_path_buf(),
            &["a".into(), "b".into()],
        )
        .unwrap();
        assert_eq!(status, 2);
    }
}
