use tracing::debug;

use crate::backend::Backend;
use crate::error::{IntegrityError, Result};
use crate::metadata::{AllocPolicy, LvId, LvStatus, VolumeGroup};

pub(crate) const IMETA_SUFFIX: &str = "_imeta";

/// `metadata_name` derives the metadata volume name for an image.
///
/// # Errors
/// Returns [`IntegrityError::NameTooLong`] if the composed name does not fit.
pub(crate) fn metadata_name(image_name: &str) -> Result<String> {
    VolumeGroup::compose_name(image_name, IMETA_SUFFIX)
}

/// `create_metadata_lv` allocates a hidden, unzeroed striped volume of `extents` for
/// the integrity tags of `image_name`, restricted to the `pvs` candidates.
///
/// The volume exists only in memory until the caller commits the volume group.
pub(crate) fn create_metadata_lv(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    image_name: &str,
    extents: u32,
    pvs: &[String],
) -> Result<LvId> {
    let name = metadata_name(image_name)?;
    debug!(lv = %name, extents, pvs = ?pvs, "factory: allocating integrity metadata");

    let id = backend
        .allocate_lv(vg, &name, extents, pvs)
        .map_err(|source| IntegrityError::Allocation {
            lv: name.clone(),
            source,
        })?;

    let lv = vg.lv_mut(id)?;
    lv.alloc = AllocPolicy::Inherit;
    lv.read_ahead = 0;
    lv.status = LvStatus::READ | LvStatus::WRITE;
    lv.visible = false;
    Ok(id)
}
