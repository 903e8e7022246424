//! BIP-32 derivation paths as understood by the Ledger Ethereum app.
//!
//! Paths are written `m/44'/60'/0'/0/0`. The `m/` prefix is optional and a
//! hardened segment is marked with `'` or `h`. On the wire a path is one
//! count byte followed by each segment as a big-endian `u32`, with bit 31 set
//! for hardened segments.
//!
//! # Example
//!
//! ```
//! use ledger_evm_bridge_core::ledger::DerivationPath;
//!
//! let path: DerivationPath = "44'/60'/0'/0/3".parse().unwrap();
//! assert_eq!(path.to_string(), "m/44'/60'/0'/0/3");
//! assert_eq!(path.to_apdu_bytes()[0], 5);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// Bit 31 marks a hardened segment.
pub const HARDENED: u32 = 0x8000_0000;

/// A BIP-32 derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    /// Raw segment values, hardened bit included.
    segments: Vec<u32>,
}

impl DerivationPath {
    /// The Ledger app accepts at most this many segments.
    pub const MAX_DEPTH: usize = 10;

    /// The first account of the standard Ethereum derivation.
    pub const DEFAULT: &'static str = "m/44'/60'/0'/0/0";

    /// Parent of the standard Ethereum account paths, used for scanning.
    pub const SCAN_BASE: &'static str = "m/44'/60'/0'/0";

    /// Creates a path from raw segment values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDerivationPath`] if the path is empty or deeper
    /// than [`DerivationPath::MAX_DEPTH`].
    pub fn new(segments: Vec<u32>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::InvalidDerivationPath("path is empty".to_string()));
        }
        if segments.len() > Self::MAX_DEPTH {
            return Err(Error::InvalidDerivationPath(format!(
                "path has {} segments, at most {} allowed",
                segments.len(),
                Self::MAX_DEPTH
            )));
        }
        Ok(Self { segments })
    }

    /// Returns the standard `m/44'/60'/0'/0/0` path.
    #[must_use]
    pub fn ethereum_default() -> Self {
        Self {
            segments: vec![44 | HARDENED, 60 | HARDENED, HARDENED, 0, 0],
        }
    }

    /// Returns the `m/44'/60'/0'/0` scan base.
    #[must_use]
    pub fn ethereum_scan_base() -> Self {
        Self {
            segments: vec![44 | HARDENED, 60 | HARDENED, HARDENED, 0],
        }
    }

    /// Returns the raw segment values.
    #[must_use]
    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Appends a non-hardened child index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDerivationPath`] if `index` falls in the
    /// hardened range or the path would become too deep.
    pub fn child(&self, index: u32) -> Result<Self> {
        if index & HARDENED != 0 {
            return Err(Error::InvalidDerivationPath(format!(
                "child index {index} is in the hardened range"
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(index);
        Self::new(segments)
    }

    /// Encodes the path the way the Ethereum app expects it in APDU data.
    #[must_use]
    pub fn to_apdu_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 4 * self.segments.len());
        #[expect(clippy::cast_possible_truncation, reason = "depth is at most 10")]
        bytes.push(self.segments.len() as u8);
        for segment in &self.segments {
            bytes.extend_from_slice(&segment.to_be_bytes());
        }
        bytes
    }
}

impl Default for DerivationPath {
    fn default() -> Self {
        Self::ethereum_default()
    }
}

fn parse_segment(segment: &str) -> Result<u32> {
    let (digits, hardened) = match segment
        .strip_suffix('\'')
        .or_else(|| segment.strip_suffix('h'))
        .or_else(|| segment.strip_suffix('H'))
    {
        Some(digits) => (digits, true),
        None => (segment, false),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidDerivationPath(format!(
            "invalid segment `{segment}`"
        )));
    }

    let index: u32 = digits
        .parse()
        .map_err(|_| Error::InvalidDerivationPath(format!("segment `{segment}` overflows")))?;
    if index & HARDENED != 0 {
        return Err(Error::InvalidDerivationPath(format!(
            "segment `{segment}` is out of range"
        )));
    }

    Ok(if hardened { index | HARDENED } else { index })
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let body = s
            .strip_prefix("m/")
            .or_else(|| s.strip_prefix("M/"))
            .unwrap_or(s);

        let segments = body
            .split('/')
            .map(parse_segment)
            .collect::<Result<Vec<_>>>()?;
        Self::new(segments)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for segment in &self.segments {
            let index = segment & !HARDENED;
            if segment & HARDENED == 0 {
                write!(f, "/{index}")?;
            } else {
                write!(f, "/{index}'")?;
            }
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
