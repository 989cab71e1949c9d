use thiserror::Error;

use crate::metadata::LvId;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("logical volume {0} not found")]
    UnknownLv(LvId),

    #[error("logical volume name {0} is already in use")]
    NameInUse(String),

    #[error("logical volume name {name}{suffix} is too long")]
    NameTooLong { name: String, suffix: &'static str },

    #[error("{lv}: integrity requires a single segment, found {count}")]
    SegmentCount { lv: String, count: usize },

    #[error("{lv}: integrity is not supported on segment type {segtype}")]
    UnsupportedSegment { lv: String, segtype: String },

    #[error("{lv}: integrity can only be added to a top level volume")]
    AlreadyReferenced { lv: String },

    #[error("{lv}: integrity image must have a striped first segment, found {segtype}")]
    NotStriped { lv: String, segtype: String },

    #[error("{lv}: no integrity layer present")]
    NoIntegrity { lv: String },

    #[error("invalid integrity settings: {0}")]
    InvalidSettings(String),

    #[error("INTERNAL ERROR: {lv}: integrity segment without {missing} volume")]
    Inconsistent { lv: String, missing: &'static str },

    #[error("{lv}: failed to allocate integrity metadata")]
    Allocation {
        lv: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{lv}: failed to activate or zero volume")]
    Activation {
        lv: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{lv}: failed to insert or remove integrity layer")]
    Layer {
        lv: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{lv}: failed to reload volume")]
    Reload {
        lv: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{vg}: failed to commit metadata")]
    Commit {
        vg: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{lv}: failed to extend integrity metadata")]
    Extend {
        lv: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{lv}: failed to read integrity status")]
    Status {
        lv: String,
        #[source]
        source: anyhow::Error,
    },
}

impl IntegrityError {
    /// `is_precondition` reports whether the error was raised before any mutation.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::SegmentCount { .. }
                | Self::UnsupportedSegment { .. }
                | Self::AlreadyReferenced { .. }
                | Self::NotStriped { .. }
                | Self::NoIntegrity { .. }
                | Self::InvalidSettings(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IntegrityError>;
