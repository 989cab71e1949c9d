use std::fmt;
use std::str::FromStr;

use crate::error::{IntegrityError, Result};

pub const DEFAULT_MODE: IntegrityMode = IntegrityMode::Journal;
pub const DEFAULT_TAG_SIZE: u32 = 4;
pub const DEFAULT_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_INTERNAL_HASH: &str = "crc32c";

const VALID_BLOCK_SIZES: [u32; 4] = [512, 1024, 2048, 4096];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityMode {
    Journal,
    Bitmap,
}

impl IntegrityMode {
    /// `as_char` returns the single-character mode passed to the kernel target.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Journal => 'J',
            Self::Bitmap => 'B',
        }
    }
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Journal => f.write_str("journal"),
            Self::Bitmap => f.write_str("bitmap"),
        }
    }
}

impl FromStr for IntegrityMode {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "journal" | "J" => Ok(Self::Journal),
            "bitmap" | "B" => Ok(Self::Bitmap),
            other => Err(IntegrityError::InvalidSettings(format!(
                "unknown integrity mode {other}"
            ))),
        }
    }
}

/// IntegritySettings holds caller-supplied integrity options; unset fields take defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegritySettings {
    pub mode: Option<IntegrityMode>,
    /// Bytes of tag stored per block.
    pub tag_size: Option<u32>,
    /// Integrity block size in bytes.
    pub block_size: Option<u32>,
    pub internal_hash: Option<String>,
    pub journal_sectors: Option<u32>,
    pub journal_watermark: Option<u32>,
    pub commit_time: Option<u32>,
    pub bitmap_flush_interval: Option<u32>,
}

impl IntegritySettings {
    #[must_use]
    pub fn mode(&self) -> IntegrityMode {
        self.mode.unwrap_or(DEFAULT_MODE)
    }

    #[must_use]
    pub fn tag_size(&self) -> u32 {
        self.tag_size.unwrap_or(DEFAULT_TAG_SIZE)
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    #[must_use]
    pub fn internal_hash(&self) -> &str {
        self.internal_hash.as_deref().unwrap_or(DEFAULT_INTERNAL_HASH)
    }

    /// `with_defaults` returns a copy with the mode, tag size, block size and hash filled in.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        Self {
            mode: Some(self.mode()),
            tag_size: Some(self.tag_size()),
            block_size: Some(self.block_size()),
            internal_hash: Some(self.internal_hash().to_string()),
            ..self.clone()
        }
    }

    /// `validate` checks the options before any volume is touched.
    ///
    /// # Errors
    /// Returns [`IntegrityError::InvalidSettings`] for an unsupported block size,
    /// a zero tag size or an empty hash name.
    pub fn validate(&self) -> Result<()> {
        let block_size = self.block_size();
        if !VALID_BLOCK_SIZES.contains(&block_size) {
            return Err(IntegrityError::InvalidSettings(format!(
                "block size {block_size} is not one of {VALID_BLOCK_SIZES:?}"
            )));
        }
        if self.tag_size() == 0 {
            return Err(IntegrityError::InvalidSettings(String::from(
                "tag size must be non-zero",
            )));
        }
        if self.internal_hash().trim().is_empty() {
            return Err(IntegrityError::InvalidSettings(String::from(
                "internal hash must be named",
            )));
        }
        Ok(())
    }

    /// `block_sectors` is the integrity block size in 512-byte sectors.
    #[must_use]
    pub fn block_sectors(&self) -> u64 {
        u64::from(self.block_size() / 512)
    }
}
