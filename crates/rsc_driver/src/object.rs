//! Object image format produced by compilers and consumed by [`ImageLoader`](crate::ImageLoader).
//!
//! ```text
//! b"RSCO" | bincode(ObjectImage)
//! ```
//!
//! An image carries its code, the symbols it exports as offsets into that
//! code, and the external symbols it imports by name.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Magic bytes opening every object image.
pub const OBJECT_MAGIC: [u8; 4] = *b"RSCO";

/// Decoding limit guarding against corrupt length prefixes.
const MAX_IMAGE_BYTES: usize = 256 * 1024 * 1024;

/// A symbol defined by an object image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedSymbol {
    /// Symbol name.
    pub name: String,
    /// Offset of the symbol within the image text.
    pub offset: u64,
}

/// A compiled script before symbol resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectImage {
    /// External symbols the code refers to.
    pub imports: Vec<String>,
    /// Symbols defined by the code.
    pub exports: Vec<ExportedSymbol>,
    /// The code itself.
    pub text: Vec<u8>,
}

impl ObjectImage {
    /// Creates an image holding `text` with no symbols.
    pub fn new(text: Vec<u8>) -> Self {
        Self {
            text,
            ..Self::default()
        }
    }

    /// Adds an import.
    pub fn import(mut self, name: impl Into<String>) -> Self {
        self.imports.push(name.into());
        self
    }

    /// Adds an export at `offset`.
    pub fn export(mut self, name: impl Into<String>, offset: u64) -> Self {
        self.exports.push(ExportedSymbol {
            name: name.into(),
            offset,
        });
        self
    }

    /// Serializes the image.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        let mut out = OBJECT_MAGIC.to_vec();
        out.extend(bincode::serde::encode_to_vec(self, bincode::config::standard())?);
        Ok(out)
    }

    /// Parses an image, rejecting bad magic, undecodable bodies, and
    /// trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, LoadError> {
        let body = bytes
            .strip_prefix(&OBJECT_MAGIC)
            .ok_or_else(|| LoadError::Malformed("missing object magic".to_string()))?;

        let config = bincode::config::standard().with_limit::<MAX_IMAGE_BYTES>();
        let (image, consumed): (ObjectImage, usize) =
            bincode::serde::decode_from_slice(body, config)
                .map_err(|e| LoadError::Malformed(format!("undecodable image: {e}")))?;
        if consumed != body.len() {
            return Err(LoadError::Malformed(format!(
                "{} trailing bytes after image",
                body.len() - consumed
            )));
        }
        Ok(image)
    }
}
