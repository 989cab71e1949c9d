use super::disk::PvImage;
use tempfile::NamedTempFile;

const IMAGE_LEN: u64 = 1 << 20;

#[test]
fn open_prealloc_sizes_backing_file() {
    let tf = NamedTempFile::new().expect("tmp file");
    let image = PvImage::open_prealloc(tf.path(), IMAGE_LEN).expect("open_prealloc");

    assert_eq!(image.len(), IMAGE_LEN);
    assert!(!image.is_empty());
    let meta = std::fs::metadata(image.path()).expect("metadata");
    assert_eq!(meta.len(), IMAGE_LEN, "backing file must be pre-sized");
}

#[test]
fn zero_range_clears_only_requested_bytes() {
    let tf = NamedTempFile::new().expect("tmp file");
    let mut image = PvImage::open_prealloc(tf.path(), IMAGE_LEN).expect("open_prealloc");

    let pattern = vec![0xAAu8; 8192];
    assert_eq!(image.write_at(4096, &pattern), pattern.len());

    let cleared = image.zero_range(4096, 4096).expect("zero_range");
    assert_eq!(cleared, 4096);

    let mut buf = vec![0u8; 8192];
    assert_eq!(image.read_at(4096, &mut buf), 8192);
    assert!(buf[..4096].iter().all(|&b| b == 0));
    assert!(buf[4096..].iter().all(|&b| b == 0xAA));
}

#[test]
fn accesses_past_the_end_are_clamped() {
    let tf = NamedTempFile::new().expect("tmp file");
    let mut image = PvImage::open_prealloc(tf.path(), IMAGE_LEN).expect("open_prealloc");

    assert_eq!(image.write_at(IMAGE_LEN - 2, &[1, 2, 3, 4]), 2);
    let mut buf = [0u8; 4];
    assert_eq!(image.read_at(IMAGE_LEN - 2, &mut buf), 2);
    assert_eq!(&buf[..2], &[1, 2]);
    assert_eq!(image.read_at(IMAGE_LEN, &mut buf), 0);
    assert_eq!(image.zero_range(IMAGE_LEN + 10, 4).expect("zero_range"), 0);
}
