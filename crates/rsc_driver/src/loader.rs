//! Loading compiled artifacts into runnable executables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LoadError;
use crate::object::ObjectImage;
use crate::resolver::{ResolverChain, SymbolAddress};

/// Turns artifact bytes into a [`LoadedExecutable`].
pub trait Loader {
    /// Loads an artifact already in memory. `origin` names the file it
    /// belongs to.
    fn load_image(
        &self,
        image: &[u8],
        origin: &Path,
        resolvers: &ResolverChain,
    ) -> Result<LoadedExecutable, LoadError>;

    /// Reads and loads the artifact at `path`.
    fn load(&self, path: &Path, resolvers: &ResolverChain) -> Result<LoadedExecutable, LoadError> {
        let bytes = std::fs::read(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_image(&bytes, path, resolvers)
    }
}

/// Loads [`ObjectImage`] artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLoader;

impl Loader for ImageLoader {
    fn load_image(
        &self,
        image: &[u8],
        origin: &Path,
        resolvers: &ResolverChain,
    ) -> Result<LoadedExecutable, LoadError> {
        let object = ObjectImage::decode(image)?;

        let mut exports = BTreeMap::new();
        for symbol in &object.exports {
            if symbol.offset >= object.text.len() as u64 {
                return Err(LoadError::Malformed(format!(
                    "export '{}' at {:#x} lies outside {} bytes of text",
                    symbol.name,
                    symbol.offset,
                    object.text.len()
                )));
            }
            if exports.insert(symbol.name.clone(), symbol.offset).is_some() {
                return Err(LoadError::Malformed(format!(
                    "export '{}' defined twice",
                    symbol.name
                )));
            }
        }

        let mut imports = BTreeMap::new();
        for name in &object.imports {
            let Some((address, source)) = resolvers.resolve_with_source(name) else {
                warn!(symbol = %name, origin = %origin.display(), "unresolved symbol");
                return Err(LoadError::UnresolvedSymbol { name: name.clone() });
            };
            debug!(symbol = %name, %address, resolver = source, "resolved import");
            imports.insert(name.clone(), address);
        }

        Ok(LoadedExecutable {
            origin: origin.to_path_buf(),
            text: object.text,
            exports,
            imports,
        })
    }
}

/// A script ready to run: code, exported entry points, and resolved imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedExecutable {
    origin: PathBuf,
    text: Vec<u8>,
    exports: BTreeMap<String, u64>,
    imports: BTreeMap<String, SymbolAddress>,
}

impl LoadedExecutable {
    /// The artifact path this executable was loaded for.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// The executable's code.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Offset of an exported symbol within [`text`](Self::text).
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.exports.get(name).copied()
    }

    /// Exported symbols in name order.
    pub fn exports(&self) -> impl Iterator<Item = (&str, u64)> {
        self.exports.iter().map(|(name, offset)| (name.as_str(), *offset))
    }

    /// Address bound to an imported symbol.
    pub fn resolved_import(&self, name: &str) -> Option<SymbolAddress> {
        self.imports.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SymbolTable;

    fn runtime() -> ResolverChain {
        let mut chain = ResolverChain::new();
        chain.chain(
            SymbolTable::new("rs-runtime")
                .with("rsGetAllocation", 0x4000)
                .with("rsDebug", 0x4100),
        );
        chain
    }

    fn image() -> ObjectImage {
        ObjectImage::new(vec![0xc3; 24])
            .import("rsGetAllocation")
            .export("root", 0)
            .export("init", 8)
    }

    #[test]
    fn loads_and_binds_symbols() {
        let bytes = image().encode().unwrap();
        let exe = ImageLoader
            .load_image(&bytes, Path::new("/cache/blur.o"), &runtime())
            .unwrap();

        assert_eq!(exe.origin(), Path::new("/cache/blur.o"));
        assert_eq!(exe.text().len(), 24);
        assert_eq!(exe.symbol("init"), Some(8));
        assert_eq!(exe.symbol("missing"), None);
        assert_eq!(
            exe.resolved_import("rsGetAllocation"),
            Some(SymbolAddress(0x4000))
        );
        let names: Vec<_> = exe.exports().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["init", "root"]);
    }

    #[test]
    fn unresolved_import_fails() {
        let bytes = image().import("rsUnknown").encode().unwrap();
        let err = ImageLoader
            .load_image(&bytes, Path::new("blur.o"), &runtime())
            .unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedSymbol { name } if name == "rsUnknown"));
    }

    #[test]
    fn export_outside_text_fails() {
        let bytes = image().export("tail", 24).encode().unwrap();
        let err = ImageLoader
            .load_image(&bytes, Path::new("blur.o"), &runtime())
            .unwrap_err();
        assert!(matches!(err, LoadError::Malformed(m) if m.contains("tail")));
    }

    #[test]
    fn duplicate_export_fails() {
        let bytes = image().export("root", 4).encode().unwrap();
        let err = ImageLoader
            .load_image(&bytes, Path::new("blur.o"), &runtime())
            .unwrap_err();
        assert!(matches!(err, LoadError::Malformed(m) if m.contains("twice")));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blur.o");
        std::fs::write(&path, image().encode().unwrap()).unwrap();

        let exe = ImageLoader.load(&path, &runtime()).unwrap();
        assert_eq!(exe.origin(), path);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageLoader
            .load(&dir.path().join("absent.o"), &runtime())
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
