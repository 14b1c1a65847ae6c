//! The compile-and-cache driver.
//!
//! A build runs these steps in order:
//!
//! 1. Validate the request (no I/O).
//! 2. Read the bitcode wrapper and derive the effective [`CompilerConfig`].
//! 3. Hash the script and every runtime module into a [`DependencyTable`].
//! 4. Look the slot up; a validated hit is loaded and returned.
//! 5. On a miss, reconfigure the compiler if the configuration changed and
//!    compile. Compilation failure is final.
//! 6. Persist the artifact. Failure here is logged and the build continues.
//! 7. Load the artifact from memory and return it.

use std::path::Path;
use std::time::{Duration, Instant};

use rsc_cache::{CacheKey, CacheMetadata, CacheStore, LookupOutcome, RetryPolicy};
use rsc_common::{ContentHash, DependencyTable};
use rsc_config::{ConfigError, DriverConfig};
use tracing::{debug, error, warn};

use crate::compiler::{CompilerConfig, CompilerInvoker, Script};
use crate::error::{BuildError, CompileError};
use crate::loader::{ImageLoader, LoadedExecutable, Loader};
use crate::resolver::{ResolverChain, SymbolResolver};
use crate::wrapper::BitcodeWrapper;

/// Where a build's executable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOrigin {
    /// Loaded from a validated cache entry.
    CacheHit,
    /// Freshly compiled.
    Compiled,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    /// The loaded executable.
    pub executable: LoadedExecutable,
    /// Whether the executable came from the cache.
    pub origin: BuildOrigin,
    /// `true` if the artifact is now in the cache. Always `true` for hits.
    pub persisted: bool,
}

/// Builds scripts, reusing cached artifacts when their inputs are unchanged.
///
/// A driver is not shared between threads; concurrent builds use one driver
/// each and coordinate through the cache's file locks.
#[derive(Debug)]
pub struct CompileDriver<C, L = ImageLoader> {
    config: DriverConfig,
    store: CacheStore,
    compiler: C,
    loader: L,
    runtime_resolvers: ResolverChain,
    fallback_resolvers: ResolverChain,
    applied: Option<CompilerConfig>,
}

impl<C: CompilerInvoker, L: Loader> CompileDriver<C, L> {
    /// Creates a driver, rejecting a configuration that fails
    /// [`DriverConfig::validate`].
    pub fn new(config: DriverConfig, compiler: C, loader: L) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = RetryPolicy {
            max_attempts: config.lock.max_attempts,
            initial_backoff: config.lock.initial_backoff(),
            max_backoff: config.lock.max_backoff(),
        };
        let store = CacheStore::new(policy).with_force_recompile(config.cache.force_recompile);
        Ok(Self {
            config,
            store,
            compiler,
            loader,
            runtime_resolvers: ResolverChain::new(),
            fallback_resolvers: ResolverChain::new(),
            applied: None,
        })
    }

    /// Adds a runtime resolver. Runtime resolvers are consulted in the order
    /// added, before any fallback.
    pub fn with_runtime_resolver(mut self, resolver: impl SymbolResolver + 'static) -> Self {
        self.runtime_resolvers.chain(resolver);
        self
    }

    /// Adds a caller-supplied resolver consulted after the runtime ones.
    pub fn with_fallback_resolver(mut self, resolver: impl SymbolResolver + 'static) -> Self {
        self.fallback_resolvers.chain(resolver);
        self
    }

    /// The driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The compiler.
    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// The compiler, mutably.
    pub fn compiler_mut(&mut self) -> &mut C {
        &mut self.compiler
    }

    /// Builds `bitcode` under `resource_name`, caching in `cache_dir`.
    pub fn build(
        &mut self,
        cache_dir: &Path,
        resource_name: &str,
        bitcode: &[u8],
    ) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        if cache_dir.as_os_str().is_empty() {
            return Err(BuildError::InvalidInput("empty cache directory".to_string()));
        }
        if bitcode.is_empty() {
            return Err(BuildError::InvalidInput(format!(
                "no bitcode supplied for '{resource_name}'"
            )));
        }
        let key = CacheKey::new(cache_dir, resource_name)
            .map_err(|e| BuildError::InvalidInput(e.to_string()))?;
        let wrapper = BitcodeWrapper::parse(bitcode).map_err(BuildError::InvalidInput)?;

        let compiler_config = CompilerConfig::resolve(&wrapper, &self.config.compiler);
        let signature = compiler_config.signature();
        let dependencies = self.dependencies(resource_name, bitcode);
        let resolvers = self.runtime_resolvers.followed_by(&self.fallback_resolvers);

        if let LookupOutcome::Hit(hit) = self.store.lookup(&key, &dependencies, &signature) {
            match self.loader.load_image(&hit.bytes, &hit.path, &resolvers) {
                Ok(executable) => {
                    debug!(
                        resource = resource_name,
                        elapsed_ms = elapsed_ms(start.elapsed()),
                        "loaded cached script"
                    );
                    return Ok(BuildResult {
                        executable,
                        origin: BuildOrigin::CacheHit,
                        persisted: true,
                    });
                }
                Err(e) => {
                    warn!(
                        resource = resource_name,
                        path = %hit.path.display(),
                        error = %e,
                        "cached script failed to load, recompiling"
                    );
                }
            }
        }

        let object = self.compile(resource_name, bitcode, &wrapper, &compiler_config)?;

        let metadata = CacheMetadata::new(dependencies, signature, &object);
        let persisted = match self.store.insert(&key, &object, &metadata) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    resource = resource_name,
                    path = %key.artifact_path().display(),
                    error = %e,
                    "unable to cache compiled script"
                );
                false
            }
        };

        let executable = self
            .loader
            .load_image(&object, key.artifact_path(), &resolvers)
            .map_err(|e| {
                error!(resource = resource_name, error = %e, "compiled script failed to load");
                BuildError::Load {
                    path: key.artifact_path().to_path_buf(),
                    source: e,
                }
            })?;

        debug!(
            resource = resource_name,
            persisted,
            elapsed_ms = elapsed_ms(start.elapsed()),
            "compiled script"
        );
        Ok(BuildResult {
            executable,
            origin: BuildOrigin::Compiled,
            persisted,
        })
    }

    fn dependencies(&self, resource_name: &str, bitcode: &[u8]) -> DependencyTable {
        let mut deps = DependencyTable::new();
        deps.push(resource_name, ContentHash::from_bytes(bitcode));
        for module in self.compiler.runtime_modules() {
            deps.push(module.name.clone(), module.digest());
        }
        deps
    }

    fn compile(
        &mut self,
        resource_name: &str,
        bitcode: &[u8],
        wrapper: &BitcodeWrapper,
        compiler_config: &CompilerConfig,
    ) -> Result<Vec<u8>, BuildError> {
        let fail = |source: CompileError| {
            error!(resource = resource_name, error = %source, "compilation failed");
            BuildError::Compile {
                resource: resource_name.to_string(),
                source,
            }
        };

        if self.applied.as_ref() != Some(compiler_config) {
            debug!(?compiler_config, "reconfiguring compiler");
            self.applied = None;
            self.compiler.configure(compiler_config).map_err(fail)?;
            self.applied = Some(*compiler_config);
        }

        let script = Script {
            resource_name,
            bitcode: wrapper.payload(bitcode),
            wrapper: *wrapper,
        };
        let start = Instant::now();
        let object = self.compiler.compile(&script).map_err(fail)?;
        debug!(
            resource = resource_name,
            bytes = object.len(),
            elapsed_ms = elapsed_ms(start.elapsed()),
            "compile finished"
        );
        Ok(object)
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::compiler::RuntimeModule;
    use crate::object::ObjectImage;
    use crate::resolver::SymbolTable;
    use rsc_config::FloatPrecision;

    #[derive(Debug, Default)]
    struct Recorder {
        configured: Vec<CompilerConfig>,
        compiled: Vec<Vec<u8>>,
        runtime: Vec<RuntimeModule>,
    }

    impl CompilerInvoker for Recorder {
        fn configure(&mut self, config: &CompilerConfig) -> Result<(), CompileError> {
            self.configured.push(*config);
            Ok(())
        }

        fn compile(&mut self, script: &Script<'_>) -> Result<Vec<u8>, CompileError> {
            self.compiled.push(script.bitcode.to_vec());
            Ok(ObjectImage::new(script.bitcode.to_vec())
                .export("root", 0)
                .encode()
                .unwrap())
        }

        fn runtime_modules(&self) -> &[RuntimeModule] {
            &self.runtime
        }
    }

    fn driver(config: DriverConfig) -> CompileDriver<Recorder> {
        CompileDriver::new(config, Recorder::default(), ImageLoader).unwrap()
    }

    #[test]
    fn wrapper_is_stripped_before_compiling() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = driver(DriverConfig::default());
        let bitcode = BitcodeWrapper::wrap(b"payload", 21, 400, 1);

        d.build(dir.path(), "blur", &bitcode).unwrap();
        assert_eq!(d.compiler().compiled, vec![b"payload".to_vec()]);
        assert_eq!(d.compiler().configured[0].optimization_level, 1);
        assert_eq!(d.compiler().configured[0].compiler_version, 400);
    }

    #[test]
    fn configure_only_when_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DriverConfig::default();
        config.cache.force_recompile = true;
        let mut d = driver(config);

        d.build(dir.path(), "a", &BitcodeWrapper::wrap(b"a", 21, 400, 3))
            .unwrap();
        d.build(dir.path(), "b", &BitcodeWrapper::wrap(b"b", 21, 400, 3))
            .unwrap();
        assert_eq!(d.compiler().configured.len(), 1);

        d.build(dir.path(), "c", &BitcodeWrapper::wrap(b"c", 21, 400, 0))
            .unwrap();
        assert_eq!(d.compiler().configured.len(), 2);
        assert_eq!(d.compiler().compiled.len(), 3);
    }

    #[test]
    fn out_of_range_level_override_rejected() {
        for level in [4, 9] {
            let mut config = DriverConfig::default();
            config.compiler.optimization_level = Some(level);
            let err = CompileDriver::new(config, Recorder::default(), ImageLoader).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "level {level}");
        }

        let mut config = DriverConfig::default();
        config.compiler.optimization_level = Some(3);
        assert!(CompileDriver::new(config, Recorder::default(), ImageLoader).is_ok());
    }

    #[test]
    fn unvalidated_lock_settings_rejected() {
        let mut config = DriverConfig::default();
        config.lock.max_attempts = 0;
        let err = CompileDriver::new(config, Recorder::default(), ImageLoader).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn precision_override_reaches_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DriverConfig::default();
        config.compiler.precision = Some(FloatPrecision::Imprecise);
        let mut d = driver(config);

        d.build(dir.path(), "blur", b"BC raw").unwrap();
        assert_eq!(
            d.compiler().configured[0].precision,
            FloatPrecision::Imprecise
        );
    }

    #[test]
    fn dependencies_list_script_then_runtime() {
        let mut d = driver(DriverConfig::default());
        d.compiler_mut().runtime = vec![
            RuntimeModule::new("libclcore.bc", b"core".to_vec()),
            RuntimeModule::new("libcompiler_rt.so", b"rt".to_vec()),
        ];
        let deps = d.dependencies("blur", b"BC raw");
        let names: Vec<_> = deps.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["blur", "libclcore.bc", "libcompiler_rt.so"]);
        assert_eq!(deps.digest_of("blur"), Some(ContentHash::from_bytes(b"BC raw")));
    }

    #[test]
    fn invalid_inputs_rejected_without_io() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let mut d = driver(DriverConfig::default());

        for (name, bitcode) in [
            ("", &b"BC"[..]),
            ("blur", &b""[..]),
            ("../escape", &b"BC"[..]),
            ("a/b", &b"BC"[..]),
        ] {
            let err = d.build(&cache, name, bitcode).unwrap_err();
            assert!(matches!(err, BuildError::InvalidInput(_)), "{name:?}: {err}");
        }
        let truncated = &BitcodeWrapper::wrap(b"payload", 21, 400, 3)[..30];
        let err = d.build(&cache, "blur", truncated).unwrap_err();
        assert!(matches!(err, BuildError::InvalidInput(_)));

        let err = d.build(Path::new(""), "blur", b"BC").unwrap_err();
        assert!(matches!(err, BuildError::InvalidInput(_)));

        assert!(!cache.exists());
        assert!(d.compiler().compiled.is_empty());
    }

    #[test]
    fn fallback_resolver_follows_runtime() {
        struct Importing;
        impl CompilerInvoker for Importing {
            fn configure(&mut self, _: &CompilerConfig) -> Result<(), CompileError> {
                Ok(())
            }
            fn compile(&mut self, _: &Script<'_>) -> Result<Vec<u8>, CompileError> {
                Ok(ObjectImage::new(vec![0; 4])
                    .import("memcpy")
                    .import("userHook")
                    .encode()
                    .unwrap())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut d = CompileDriver::new(DriverConfig::default(), Importing, ImageLoader)
            .unwrap()
            .with_runtime_resolver(SymbolTable::new("runtime").with("memcpy", 0x10))
            .with_fallback_resolver(
                SymbolTable::new("user")
                    .with("memcpy", 0x20)
                    .with("userHook", 0x30),
            );

        let result = d.build(dir.path(), "blur", b"BC").unwrap();
        let exe = result.executable;
        assert_eq!(exe.resolved_import("memcpy"), Some(crate::SymbolAddress(0x10)));
        assert_eq!(exe.resolved_import("userHook"), Some(crate::SymbolAddress(0x30)));
    }
}
