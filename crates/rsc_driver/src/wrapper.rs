//! Bitcode wrapper header.
//!
//! Script bitcode may be prefixed by a fixed 44-byte little-endian header
//! recording the target API, the front-end compiler version, and the
//! optimization level the script was written for:
//!
//! ```text
//! 0  magic              u32  0x0B17C0DE
//! 4  version            u32
//! 8  bitcode offset     u32
//! 12 bitcode size       u32
//! 16 header version     u32
//! 20 target API         u32
//! 24 PNaCl version      u32
//! 28 tag 0x4001, len 4  u16, u16
//! 32 compiler version   u32
//! 36 tag 0x4002, len 4  u16, u16
//! 40 optimization level u32
//! ```
//!
//! Bitcode without the magic is used as-is with default settings.

/// Magic number opening a wrapped bitcode buffer.
pub const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;

/// Size of the wrapper header in bytes.
pub const WRAPPER_SIZE: usize = 44;

const TAG_COMPILER_VERSION: u16 = 0x4001;
const TAG_OPTIMIZATION_LEVEL: u16 = 0x4002;
const FIELD_LEN: u16 = 4;

/// Optimization level used for unwrapped bitcode.
pub const DEFAULT_OPT_LEVEL: u8 = 3;

/// Highest optimization level.
pub const MAX_OPT_LEVEL: u8 = 3;

/// Settings carried by a bitcode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitcodeWrapper {
    /// `true` if the buffer carried a wrapper header.
    pub wrapped: bool,
    /// Offset of the bitcode payload within the buffer.
    pub bitcode_offset: usize,
    /// Length of the bitcode payload.
    pub bitcode_size: usize,
    /// API level the script targets (0 when unknown).
    pub target_api: u32,
    /// Version of the front-end compiler that produced the bitcode.
    pub compiler_version: u32,
    /// Requested optimization level (0-3).
    pub optimization_level: u8,
}

impl BitcodeWrapper {
    /// Reads the wrapper header from `buffer`.
    ///
    /// Returns defaults covering the whole buffer when there is no header.
    /// A buffer that starts with the magic but is truncated, or whose payload
    /// range falls outside the buffer, is rejected with a description.
    pub fn parse(buffer: &[u8]) -> Result<Self, String> {
        if buffer.len() < 4 || read_u32(buffer, 0) != WRAPPER_MAGIC {
            return Ok(Self {
                wrapped: false,
                bitcode_offset: 0,
                bitcode_size: buffer.len(),
                target_api: 0,
                compiler_version: 0,
                optimization_level: DEFAULT_OPT_LEVEL,
            });
        }

        if buffer.len() < WRAPPER_SIZE {
            return Err(format!(
                "bitcode wrapper truncated ({} of {WRAPPER_SIZE} header bytes)",
                buffer.len()
            ));
        }

        let bitcode_offset = read_u32(buffer, 8) as usize;
        let bitcode_size = read_u32(buffer, 12) as usize;
        let in_bounds = bitcode_offset >= WRAPPER_SIZE
            && bitcode_offset
                .checked_add(bitcode_size)
                .is_some_and(|end| end <= buffer.len());
        if !in_bounds {
            return Err(format!(
                "bitcode range {bitcode_offset}+{bitcode_size} outside buffer of {} bytes",
                buffer.len()
            ));
        }
        if bitcode_size == 0 {
            return Err("bitcode wrapper holds an empty module".to_string());
        }

        expect_field(buffer, 28, TAG_COMPILER_VERSION, "compiler version")?;
        expect_field(buffer, 36, TAG_OPTIMIZATION_LEVEL, "optimization level")?;

        let raw_level = read_u32(buffer, 40);
        let optimization_level = u8::try_from(raw_level)
            .ok()
            .filter(|level| *level <= MAX_OPT_LEVEL)
            .ok_or_else(|| format!("optimization level {raw_level} out of range"))?;

        Ok(Self {
            wrapped: true,
            bitcode_offset,
            bitcode_size,
            target_api: read_u32(buffer, 20),
            compiler_version: read_u32(buffer, 32),
            optimization_level,
        })
    }

    /// Returns the bitcode payload of `buffer` described by this header.
    pub fn payload<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.bitcode_offset..self.bitcode_offset + self.bitcode_size]
    }

    /// Prefixes `bitcode` with a wrapper header.
    pub fn wrap(bitcode: &[u8], target_api: u32, compiler_version: u32, opt_level: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(WRAPPER_SIZE + bitcode.len());
        out.extend_from_slice(&WRAPPER_MAGIC.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(WRAPPER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&(bitcode.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&target_api.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&TAG_COMPILER_VERSION.to_le_bytes());
        out.extend_from_slice(&FIELD_LEN.to_le_bytes());
        out.extend_from_slice(&compiler_version.to_le_bytes());
        out.extend_from_slice(&TAG_OPTIMIZATION_LEVEL.to_le_bytes());
        out.extend_from_slice(&FIELD_LEN.to_le_bytes());
        out.extend_from_slice(&u32::from(opt_level).to_le_bytes());
        out.extend_from_slice(bitcode);
        out
    }
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buffer[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u16(buffer: &[u8], at: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buffer[at..at + 2]);
    u16::from_le_bytes(bytes)
}

fn expect_field(buffer: &[u8], at: usize, tag: u16, what: &str) -> Result<(), String> {
    let found_tag = read_u16(buffer, at);
    let found_len = read_u16(buffer, at + 2);
    if found_tag != tag || found_len != FIELD_LEN {
        return Err(format!(
            "bad {what} field (tag {found_tag:#06x}, length {found_len})"
        ));
    }
    Ok(())
}
