use tracing::{debug, info};

use super::remover::layer_of;
use crate::backend::Backend;
use crate::error::{IntegrityError, Result};
use crate::metadata::{LvId, SECTOR_SIZE, VolumeGroup};
use crate::sizing::required_metadata_bytes;

/// `extend_metadata` grows the metadata volume of `image` to cover its current size.
/// Returns the number of extents added; metadata is never shrunk.
///
/// # Errors
/// Returns [`IntegrityError::Extend`] naming the image if the extension fails.
pub(crate) fn extend_metadata(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    image: LvId,
) -> Result<u32> {
    let meta = layer_of(vg, image)?.metadata;
    let image_lv = vg.lv(image)?;
    let image_name = image_lv.name.clone();
    let required = vg.extents_for_bytes(required_metadata_bytes(image_lv.size * SECTOR_SIZE));
    let current = vg.lv_extents(meta)?;

    if current >= required {
        debug!(lv = %image_name, current, required, "resizer: metadata large enough");
        return Ok(0);
    }

    // Metadata volumes live on a single PV; keep the extension there.
    let pvs = vg.pvs_of(meta)?;
    let extra = required - current;
    backend
        .extend_lv(vg, meta, extra, &pvs)
        .map_err(|source| IntegrityError::Extend {
            lv: image_name.clone(),
            source,
        })?;

    info!(lv = %image_name, extra, "resizer: extended integrity metadata");
    Ok(extra)
}
