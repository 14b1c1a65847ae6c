//! A [`CompilerInvoker`] backed by an external compiler process.
//!
//! The process receives the bitcode payload on stdin and must write the object
//! image to stdout. The optimization level is passed as `-O<level>` and a
//! non-default precision as `-fprecision=<name>`, after any fixed arguments.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use rsc_config::FloatPrecision;
use tracing::{debug, warn};

use crate::compiler::{CompilerConfig, CompilerInvoker, RuntimeModule, Script};
use crate::error::CompileError;
use crate::wrapper::MAX_OPT_LEVEL;

/// Runs an external program for every compilation.
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: PathBuf,
    args: Vec<String>,
    runtime: Vec<RuntimeModule>,
    config: Option<CompilerConfig>,
}

impl ExternalCompiler {
    /// Creates an invoker for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            runtime: Vec::new(),
            config: None,
        }
    }

    /// Appends a fixed argument passed before the generated ones.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Registers a runtime module the program links into every script.
    pub fn runtime_module(mut self, module: RuntimeModule) -> Self {
        self.runtime.push(module);
        self
    }

    /// The program being run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command_line(&self, config: &CompilerConfig) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("-O{}", config.optimization_level));
        if config.precision != FloatPrecision::Full {
            args.push(format!("-fprecision={}", config.precision));
        }
        args
    }
}

impl CompilerInvoker for ExternalCompiler {
    fn configure(&mut self, config: &CompilerConfig) -> Result<(), CompileError> {
        if config.optimization_level > MAX_OPT_LEVEL {
            return Err(CompileError::Config(format!(
                "optimization level {} exceeds -O{MAX_OPT_LEVEL}",
                config.optimization_level
            )));
        }
        debug!(
            program = %self.program.display(),
            opt_level = config.optimization_level,
            precision = %config.precision,
            "configuring external compiler"
        );
        self.config = Some(*config);
        Ok(())
    }

    fn compile(&mut self, script: &Script<'_>) -> Result<Vec<u8>, CompileError> {
        let config = self.config.ok_or(CompileError::NotConfigured)?;
        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(self.command_line(&config))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompileError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| CompileError::Failed {
            code: None,
            message: "compiler stdin unavailable".to_string(),
        })?;

        let bitcode = script.bitcode;
        let output = std::thread::scope(|scope| {
            scope.spawn(move || {
                // A compiler that exits early closes the pipe; its exit status
                // reports the real problem.
                if let Err(e) = stdin.write_all(bitcode) {
                    debug!(error = %e, "compiler stopped reading bitcode");
                }
            });
            child.wait_with_output()
        })
        .map_err(|e| CompileError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                resource = script.resource_name,
                code = ?output.status.code(),
                "external compiler failed"
            );
            return Err(CompileError::Failed {
                code: output.status.code(),
                message,
            });
        }
        if output.stdout.is_empty() {
            return Err(CompileError::EmptyOutput);
        }

        debug!(
            resource = script.resource_name,
            bytes = output.stdout.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "external compile finished"
        );
        Ok(output.stdout)
    }

    fn runtime_modules(&self) -> &[RuntimeModule] {
        &self.runtime
    }
}
