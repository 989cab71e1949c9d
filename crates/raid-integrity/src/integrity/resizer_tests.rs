use super::test_utils::{images, raid5_10g};
use super::{add_integrity, extend_integrity};
use crate::backend::Backend;
use crate::error::IntegrityError;
use crate::metadata::{IntegritySettings, LvId, VolumeGroup};
use crate::sim::{SimBackend, allocator};

fn protected_raid5() -> (VolumeGroup, SimBackend, LvId, Vec<LvId>) {
    let (mut vg, mut backend, lv) = raid5_10g();
    let report =
        add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None).unwrap();
    (vg, backend, lv, report.metadata)
}

#[test]
fn unchanged_images_need_no_extension() {
    let (mut vg, mut backend, lv, _) = protected_raid5();
    assert_eq!(extend_integrity(&mut vg, &mut backend, lv).unwrap(), 0);
    assert_eq!(backend.calls.extends, 0);
}

#[test]
fn grown_images_extend_metadata_in_place() {
    let (mut vg, mut backend, lv, metas) = protected_raid5();
    let commits = backend.calls.commits;
    // 5GiB to 5.5GiB per image crosses a 500MiB step: 44MiB to 48MiB of metadata.
    backend.grow_raid(&mut vg, lv, 128).unwrap();

    assert_eq!(extend_integrity(&mut vg, &mut backend, lv).unwrap(), 3);
    for (i, meta) in metas.iter().enumerate() {
        assert_eq!(vg.lv_extents(*meta).unwrap(), 12);
        assert_eq!(vg.pvs_of(*meta).unwrap(), vec![format!("pv{i}")]);
    }
    assert_eq!(backend.calls.commits, commits);
}

#[test]
fn oversized_metadata_is_never_shrunk() {
    let (mut vg, mut backend, lv, metas) = protected_raid5();
    backend
        .extend_lv(&mut vg, metas[0], 9, &[String::from("pv0")])
        .unwrap();
    backend.grow_raid(&mut vg, lv, 128).unwrap();

    assert_eq!(extend_integrity(&mut vg, &mut backend, lv).unwrap(), 2);
    assert_eq!(vg.lv_extents(metas[0]).unwrap(), 20);
    assert_eq!(vg.lv_extents(metas[1]).unwrap(), 12);
}

#[test]
fn failed_extension_names_the_image() {
    let (mut vg, mut backend, lv, _) = protected_raid5();
    backend.grow_raid(&mut vg, lv, 128).unwrap();
    backend.faults.fail_extend = true;

    let err = extend_integrity(&mut vg, &mut backend, lv).unwrap_err();
    match err {
        IntegrityError::Extend { lv: name, .. } => assert_eq!(name, "lv0_rimage_0"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn full_pv_fails_extension() {
    let (mut vg, mut backend, lv, metas) = protected_raid5();
    backend.grow_raid(&mut vg, lv, 128).unwrap();
    let free = allocator::free_extents(&vg, "pv1");
    backend
        .create_linear(&mut vg, "filler", free, &[String::from("pv1")])
        .unwrap();

    let err = extend_integrity(&mut vg, &mut backend, lv).unwrap_err();
    assert!(
        matches!(&err, IntegrityError::Extend { lv: name, .. } if name == "lv0_rimage_1"),
        "{err}"
    );
    // Image 0 was handled before the failure.
    assert_eq!(vg.lv_extents(metas[0]).unwrap(), 12);
    assert_eq!(vg.lv_extents(metas[1]).unwrap(), 11);
    assert_eq!(images(&vg, lv).len(), 3);
}
