//! Error types for compiling, loading, and building scripts.

use std::path::PathBuf;

/// Errors reported by a [`CompilerInvoker`](crate::CompilerInvoker).
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler rejected its configuration.
    #[error("failed to configure compiler: {0}")]
    Config(String),

    /// `compile` was called before any configuration was applied.
    #[error("compiler used before being configured")]
    NotConfigured,

    /// The compiler process could not be started.
    #[error("failed to start compiler {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The compiler ran and reported failure.
    #[error("compiler failed (exit code {code:?}): {message}")]
    Failed {
        /// Exit code, if the compiler exited normally.
        code: Option<i32>,
        /// Diagnostic output of the compiler.
        message: String,
    },

    /// The compiler reported success but produced no object code.
    #[error("compiler produced no output")]
    EmptyOutput,
}

/// Errors reported by a [`Loader`](crate::Loader).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The artifact file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The artifact path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The artifact is not a well-formed executable image.
    #[error("malformed executable: {0}")]
    Malformed(String),

    /// An external symbol reference could not be resolved by any resolver.
    #[error("unresolved symbol '{name}'")]
    UnresolvedSymbol {
        /// The symbol that could not be resolved.
        name: String,
    },
}

/// Definitive failure of a [`CompileDriver::build`](crate::CompileDriver::build).
///
/// Cache problems never appear here: contention, missing or corrupt cache
/// files, and failed persistence are all absorbed by the build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The request was rejected before any I/O.
    #[error("invalid build input: {0}")]
    InvalidInput(String),

    /// Compilation failed; there is no fallback compiler.
    #[error("failed to compile '{resource}': {source}")]
    Compile {
        /// The resource being built.
        resource: String,
        /// The compiler's error.
        #[source]
        source: CompileError,
    },

    /// The compiled artifact could not be loaded.
    #[error("failed to load {path}: {source}")]
    Load {
        /// The artifact path.
        path: PathBuf,
        /// The loader's error.
        #[source]
        source: LoadError,
    },
}
