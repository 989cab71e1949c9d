//! Sizing policy for integrity metadata volumes.


const MIB: u64 = 1024 * 1024;

/// Origin data covered by each metadata step.
pub const DATA_STEP_BYTES: u64 = 500 * MIB;
/// Metadata added for each started step.
pub const METADATA_STEP_BYTES: u64 = 4 * MIB;

/// `required_metadata_bytes` returns the metadata size needed to protect `origin_bytes`.
///
/// One 4MiB step for every whole 500MiB of origin data, plus one.
#[must_use]
pub const fn required_metadata_bytes(origin_bytes: u64) -> u64 {
    (origin_bytes / DATA_STEP_BYTES + 1).saturating_mul(METADATA_STEP_BYTES)
}
