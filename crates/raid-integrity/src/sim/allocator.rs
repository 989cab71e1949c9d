use anyhow::bail;

use crate::metadata::{Area, Segment, SegmentKind, StripedSegment, VolumeGroup};

/// `free_ranges` returns the free `(pe_start, extents)` ranges of `pv`, in ascending order.
///
/// Free space is whatever no striped area of any volume in the group maps.
pub fn free_ranges(vg: &VolumeGroup, pv: &str) -> Vec<(u32, u32)> {
    let Some(pe_count) = vg.pv(pv).map(|p| p.pe_count) else {
        return Vec::new();
    };

    let mut used: Vec<(u32, u32)> = vg
        .lvs()
        .flat_map(|lv| lv.segments.iter())
        .filter_map(|seg| match &seg.kind {
            SegmentKind::Striped(striped) => Some(striped.areas.iter()),
            _ => None,
        })
        .flatten()
        .filter_map(|area| match area {
            Area::Pv {
                pv: name,
                pe_start,
                extents,
            } if name == pv => Some((*pe_start, *extents)),
            _ => None,
        })
        .collect();
    used.sort_unstable();

    let mut free = Vec::new();
    let mut cursor = 0u32;
    for (start, len) in used {
        if start > cursor {
            free.push((cursor, start - cursor));
        }
        cursor = cursor.max(start.saturating_add(len));
    }
    if cursor < pe_count {
        free.push((cursor, pe_count - cursor));
    }
    free
}

#[must_use]
pub fn free_extents(vg: &VolumeGroup, pv: &str) -> u32 {
    free_ranges(vg, pv).iter().map(|(_, len)| len).sum()
}

/// `allocate` carves `extents` out of the candidate PVs, first fit, one linear segment
/// per contiguous range.
///
/// # Errors
/// Returns an error if the candidates do not hold enough free extents.
pub fn allocate(vg: &VolumeGroup, extents: u32, pvs: &[String]) -> anyhow::Result<Vec<Segment>> {
    let mut candidates: Vec<&String> = Vec::new();
    for pv in pvs {
        if !candidates.contains(&pv) {
            candidates.push(pv);
        }
    }
    if candidates.is_empty() {
        bail!("no physical volumes to allocate {extents} extents from");
    }
    let available: u32 = candidates.iter().map(|pv| free_extents(vg, pv)).sum();
    if available < extents {
        bail!(
            "insufficient free space: {extents} extents required, {available} available on {}",
            pvs.join(",")
        );
    }

    let mut segments = Vec::new();
    let mut remaining = extents;
    'outer: for pv in candidates {
        for (pe_start, len) in free_ranges(vg, pv) {
            if remaining == 0 {
                break 'outer;
            }
            let take = len.min(remaining);
            segments.push(Segment {
                len: u64::from(take) * vg.extent_size,
                kind: SegmentKind::Striped(StripedSegment {
                    areas: vec![Area::Pv {
                        pv: pv.to_string(),
                        pe_start,
                        extents: take,
                    }],
                }),
            });
            remaining -= take;
        }
    }
    Ok(segments)
}
