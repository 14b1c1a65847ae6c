//! Compile-and-cache driver for script bitcode.
//!
//! [`CompileDriver::build`] turns a bitcode blob into a loaded, runnable
//! executable. It hashes the inputs, reuses a cached artifact when the stored
//! dependency table and compiler configuration still match, and otherwise
//! compiles through a pluggable [`CompilerInvoker`], persists the result on a
//! best-effort basis, and loads it through a [`Loader`] that resolves symbols
//! against an explicit [`ResolverChain`].

#![warn(missing_docs)]

pub mod compiler;
pub mod driver;
pub mod error;
pub mod external;
pub mod loader;
pub mod object;
pub mod resolver;
pub mod wrapper;

pub use compiler::{CompilerConfig, CompilerInvoker, RuntimeModule, Script};
pub use driver::{BuildOrigin, BuildResult, CompileDriver};
pub use error::{BuildError, CompileError, LoadError};
pub use external::ExternalCompiler;
pub use loader::{ImageLoader, LoadedExecutable, Loader};
pub use object::{ExportedSymbol, ObjectImage};
pub use resolver::{
    LookupFunctionResolver, ResolverChain, SymbolAddress, SymbolResolver, SymbolTable,
};
pub use wrapper::BitcodeWrapper;
