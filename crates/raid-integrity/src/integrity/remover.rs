use tracing::{error, info};

use crate::backend::Backend;
use crate::error::{IntegrityError, Result};
use crate::metadata::{LvId, LvStatus, VolumeGroup};

/// Detached holds the volumes left behind by [`detach`]; they are deleted by the caller
/// once the new table is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Detached {
    pub origin: LvId,
    pub metadata: LvId,
}

/// `layer_of` returns the origin and metadata volumes of an image's integrity segment.
///
/// # Errors
/// Returns [`IntegrityError::NoIntegrity`] if the image has no integrity segment and
/// [`IntegrityError::Inconsistent`] if the segment lacks one of its volumes.
pub(crate) fn layer_of(vg: &VolumeGroup, image: LvId) -> Result<Detached> {
    let lv = vg.lv(image)?;
    let seg = lv
        .integrity_segment()
        .ok_or_else(|| IntegrityError::NoIntegrity {
            lv: lv.name.clone(),
        })?;
    let inconsistent = |missing| {
        error!(lv = %lv.name, "remover: integrity segment without {missing} volume");
        IntegrityError::Inconsistent {
            lv: lv.name.clone(),
            missing,
        }
    };
    let metadata = seg.metadata.ok_or_else(|| inconsistent("metadata"))?;
    let origin = seg.origin.ok_or_else(|| inconsistent("origin"))?;
    Ok(Detached { origin, metadata })
}

/// `detach` drops the integrity segment of `image` and moves the origin's segments back
/// onto it. The origin and metadata volumes stay in the group, unreferenced.
pub(crate) fn detach(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    image: LvId,
) -> Result<Detached> {
    let detached = layer_of(vg, image)?;

    vg.unlink(detached.metadata, image)?;
    let lv = vg.lv_mut(image)?;
    lv.status.remove(LvStatus::INTEGRITY);
    if let Some(seg) = lv.integrity_segment_mut() {
        seg.metadata = None;
        seg.recalculate = false;
    }
    let name = lv.name.clone();

    backend
        .collapse_layer(vg, image, detached.origin)
        .map_err(|source| IntegrityError::Layer {
            lv: name.clone(),
            source,
        })?;

    info!(lv = %name, "remover: integrity layer detached");
    Ok(detached)
}
