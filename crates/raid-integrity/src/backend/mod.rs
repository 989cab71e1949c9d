//! Collaborators the integrity layer manager drives: metadata commit, device activation,
//! extent allocation and layer splicing.

use crate::error::{IntegrityError, Result};
use crate::metadata::{LvId, VolumeGroup};

/// Backend provides the volume-management primitives the integrity manager builds on.
///
/// Every method is synchronous. Callers hold exclusive access to the volume group for the
/// duration of one top-level operation.
pub trait Backend {
    /// commit durably persists the in-memory volume group description, all or nothing.
    fn commit(&mut self, vg: &mut VolumeGroup) -> anyhow::Result<()>;

    /// reload suspends an active volume, commits metadata and resumes it as one unit.
    fn reload(&mut self, vg: &mut VolumeGroup, lv: LvId) -> anyhow::Result<()>;

    fn is_active(&self, vg: &VolumeGroup, lv: LvId) -> bool;

    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> anyhow::Result<()>;

    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> anyhow::Result<()>;

    /// allocate_lv creates a striped volume of `extents` restricted to the `pvs` candidates.
    fn allocate_lv(
        &mut self,
        vg: &mut VolumeGroup,
        name: &str,
        extents: u32,
        pvs: &[String],
    ) -> anyhow::Result<LvId>;

    /// extend_lv grows `lv` by `extents` allocated from the `pvs` candidates.
    fn extend_lv(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        extents: u32,
        pvs: &[String],
    ) -> anyhow::Result<()>;

    /// splice_layer moves the segments of `lv` onto a new hidden volume named with `suffix`
    /// and maps `lv` onto it. Returns the new volume.
    fn splice_layer(&mut self, vg: &mut VolumeGroup, lv: LvId, suffix: &str)
    -> anyhow::Result<LvId>;

    /// collapse_layer moves the segments of `origin` back onto `lv`, leaving `origin` empty.
    fn collapse_layer(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        origin: LvId,
    ) -> anyhow::Result<()>;

    /// zero writes zeros to the first `sectors` sectors of an active volume.
    fn zero(&mut self, vg: &VolumeGroup, lv: LvId, sectors: u64) -> anyhow::Result<()>;

    fn remove_lv(&mut self, vg: &mut VolumeGroup, lv: LvId) -> anyhow::Result<()>;

    /// integrity_mismatches reports the checksum mismatch counter of an active integrity
    /// volume.
    fn integrity_mismatches(&self, _vg: &VolumeGroup, _lv: LvId) -> anyhow::Result<u64> {
        Ok(0)
    }
}

pub(crate) fn commit(vg: &mut VolumeGroup, backend: &mut dyn Backend) -> Result<()> {
    backend.commit(vg).map_err(|source| IntegrityError::Commit {
        vg: vg.name.clone(),
        source,
    })
}
