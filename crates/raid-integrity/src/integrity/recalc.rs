//! Tracks the transient "recalculate" flag of integrity segments.
//!
//! A new integrity segment carries the flag until its first activation starts tag
//! initialization. The flag is then cleared and committed. If that commit never lands,
//! the durable metadata still has the flag set and the next activation clears it again.

use tracing::{debug, info};

use crate::backend::{self, Backend};
use crate::error::{IntegrityError, Result};
use crate::metadata::{LvId, VolumeGroup};

/// `integrity_layers` lists the volumes reachable from `lv` that carry an integrity
/// segment: `lv` itself, or the images of a RAID volume.
pub(crate) fn integrity_layers(vg: &VolumeGroup, lv: LvId) -> Vec<LvId> {
    let Ok(volume) = vg.lv(lv) else {
        return Vec::new();
    };
    if volume.integrity_segment().is_some() {
        return vec![lv];
    }
    volume
        .raid_segment()
        .map(|raid| {
            raid.images
                .iter()
                .copied()
                .filter(|&image| {
                    vg.lv(image)
                        .is_ok_and(|img| img.integrity_segment().is_some())
                })
                .collect()
        })
        .unwrap_or_default()
}

#[must_use]
pub fn has_pending_recalculation(vg: &VolumeGroup, lv: LvId) -> bool {
    integrity_layers(vg, lv).into_iter().any(|id| {
        vg.lv(id)
            .ok()
            .and_then(|v| v.integrity_segment())
            .is_some_and(|seg| seg.recalculate)
    })
}

/// `clear_recalculation` clears every reachable recalculate flag and commits once.
/// Nothing is committed when no flag is set.
///
/// # Errors
/// Returns [`IntegrityError::Commit`] if the commit fails; the in-memory flags stay
/// cleared.
pub fn clear_recalculation(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    lv: LvId,
) -> Result<()> {
    let mut cleared = 0usize;
    for id in integrity_layers(vg, lv) {
        if let Some(seg) = vg.lv_mut(id)?.integrity_segment_mut() {
            if seg.recalculate {
                seg.recalculate = false;
                cleared += 1;
            }
        }
    }

    if cleared == 0 {
        debug!(lv = %vg.name_of(lv), "recalc: no recalculate flags set");
        return Ok(());
    }
    info!(lv = %vg.name_of(lv), cleared, "recalc: clearing recalculate flags");
    backend::commit(vg, backend)
}

/// `activate_integrity` activates `lv`, then clears recalculate flags left over from an
/// interrupted operation now that initialization has started.
///
/// # Errors
/// Returns an error if activation or the clearing commit fails.
pub fn activate_integrity(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    lv: LvId,
) -> Result<()> {
    backend
        .activate(vg, lv)
        .map_err(|source| IntegrityError::Activation {
            lv: vg.name_of(lv),
            source,
        })?;

    if has_pending_recalculation(vg, lv) {
        info!(lv = %vg.name_of(lv), "recalc: stale recalculate flags found after activation");
        clear_recalculation(vg, backend, lv)?;
    }
    Ok(())
}
