//! Baked runtime libraries: compile once, ship the binary.
//!
//! Layout (little-endian):
//!
//! ```text
//!   0..4    magic  b"MORL"
//!   4..6    format version (u16)
//!   6..10   CRC-32 of the payload (u32)
//!   10..    bincode payload
//! ```
//!
//! Lookups are not part of the payload; they are rebuilt on load, and the
//! loaded library is re-validated before it is handed out.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{MoresError, Result};
use crate::library::RuntimeLibrary;

/// File magic.
pub const MAGIC: [u8; 4] = *b"MORL";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 10;

/// CRC-32 (ISO 3309 polynomial, reflected).
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

fn rejected(reason: impl Into<String>) -> MoresError {
    MoresError::Bake {
        reason: reason.into(),
    }
}

/// Serialize `library` into the baked format.
///
/// # Errors
/// Returns `MoresError::Serialization` if bincode encoding fails.
pub fn to_bytes(library: &RuntimeLibrary) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(library).map_err(|e| MoresError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&crc32(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse a baked library and rebuild its lookups.
///
/// # Errors
/// Returns `MoresError::Bake` on a bad magic, version, checksum or a library
/// that fails validation, and `MoresError::Serialization` if decoding fails.
pub fn from_bytes(bytes: &[u8]) -> Result<RuntimeLibrary> {
    if bytes.len() < HEADER_LEN {
        return Err(rejected(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[0..4] != MAGIC {
        return Err(rejected("bad magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(rejected(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    let stored = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
    let actual = crc32(payload);
    if stored != actual {
        return Err(rejected(format!(
            "checksum mismatch: stored {stored:08x}, computed {actual:08x}"
        )));
    }

    let mut library: RuntimeLibrary =
        bincode::deserialize(payload).map_err(|e| MoresError::Serialization(e.to_string()))?;
    library.rebuild_lookups();

    let violations = library.validate();
    if let Some(first) = violations.first() {
        warn!(count = violations.len(), first = %first, "Baked library failed validation");
        return Err(rejected(format!(
            "{} invariant violations, first: {first}",
            violations.len()
        )));
    }
    Ok(library)
}

/// Write `library` to `path`.
///
/// # Errors
/// Returns an error if encoding or the write fails.
pub fn save(library: &RuntimeLibrary, path: &Path) -> Result<()> {
    let bytes = to_bytes(library)?;
    std::fs::write(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "Saved baked library");
    Ok(())
}

/// Read a baked library from `path`.
///
/// # Errors
/// Returns an error if the read fails or the blob is rejected.
pub fn load(path: &Path) -> Result<RuntimeLibrary> {
    let _span = tracing::info_span!(crate::metrics::spans::BAKE_LOAD).entered();
    let bytes = std::fs::read(path)?;
    let library = from_bytes(&bytes)?;
    info!(
        path = %path.display(),
        rules = library.rules.len(),
        metrics = library.metrics.len(),
        "Loaded baked library"
    );
    Ok(library)
}
