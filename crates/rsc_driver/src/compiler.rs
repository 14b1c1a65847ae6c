//! The compiler seam.
//!
//! The driver never generates code itself. It hands the script to a
//! [`CompilerInvoker`], which is configured lazily: [`CompilerInvoker::configure`]
//! runs only when the effective [`CompilerConfig`] differs from the one
//! applied last.

use rsc_common::ContentHash;
use rsc_config::{CompilerSettings, FloatPrecision};

use crate::error::CompileError;
use crate::wrapper::BitcodeWrapper;

/// Version byte leading every configuration signature.
const SIGNATURE_VERSION: u8 = 1;

/// Effective settings for one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompilerConfig {
    /// Optimization level (0-3).
    pub optimization_level: u8,
    /// Floating-point precision.
    pub precision: FloatPrecision,
    /// Version of the front end that produced the bitcode.
    pub compiler_version: u32,
}

impl CompilerConfig {
    /// Derives the effective configuration from the bitcode header, with
    /// configured overrides taking precedence.
    pub fn resolve(wrapper: &BitcodeWrapper, overrides: &CompilerSettings) -> Self {
        Self {
            optimization_level: overrides
                .optimization_level
                .unwrap_or(wrapper.optimization_level),
            precision: overrides.precision.unwrap_or_default(),
            compiler_version: wrapper.compiler_version,
        }
    }

    /// Stable byte encoding of every setting that affects generated code.
    ///
    /// Two configurations produce the same signature exactly when they are
    /// equal.
    pub fn signature(&self) -> Vec<u8> {
        let precision = match self.precision {
            FloatPrecision::Full => 0u8,
            FloatPrecision::Relaxed => 1,
            FloatPrecision::Imprecise => 2,
        };
        let mut sig = Vec::with_capacity(7);
        sig.push(SIGNATURE_VERSION);
        sig.push(self.optimization_level);
        sig.push(precision);
        sig.extend_from_slice(&self.compiler_version.to_le_bytes());
        sig
    }
}

/// A bitcode module linked into every compiled script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeModule {
    /// Name recorded in the dependency table.
    pub name: String,
    /// The module's bitcode.
    pub bitcode: Vec<u8>,
}

impl RuntimeModule {
    /// Creates a runtime module.
    pub fn new(name: impl Into<String>, bitcode: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bitcode,
        }
    }

    /// Content digest of the module's bitcode.
    pub fn digest(&self) -> ContentHash {
        ContentHash::from_bytes(&self.bitcode)
    }
}

/// One script handed to the compiler.
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
    /// Resource name of the script.
    pub resource_name: &'a str,
    /// The bitcode payload, with any wrapper header removed.
    pub bitcode: &'a [u8],
    /// Settings read from the wrapper header.
    pub wrapper: BitcodeWrapper,
}

/// Turns script bitcode into a loadable object image.
pub trait CompilerInvoker {
    /// Applies `config` to subsequent compilations.
    fn configure(&mut self, config: &CompilerConfig) -> Result<(), CompileError>;

    /// Compiles `script` and returns the object image bytes.
    fn compile(&mut self, script: &Script<'_>) -> Result<Vec<u8>, CompileError>;

    /// Runtime bitcode linked into every script, in link order.
    ///
    /// Each module becomes a dependency of every compiled artifact.
    fn runtime_modules(&self) -> &[RuntimeModule] {
        &[]
    }
}

impl<T: CompilerInvoker + ?Sized> CompilerInvoker for Box<T> {
    fn configure(&mut self, config: &CompilerConfig) -> Result<(), CompileError> {
        (**self).configure(config)
    }

    fn compile(&mut self, script: &Script<'_>) -> Result<Vec<u8>, CompileError> {
        (**self).compile(script)
    }

    fn runtime_modules(&self) -> &[RuntimeModule] {
        (**self).runtime_modules()
    }
}
