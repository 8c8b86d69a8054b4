use super::*;

fn layout(sample_type: SampleType) -> RasterLayout {
    RasterLayout {
        width: 4,
        height: 2,
        bands: 2,
        sample_type,
    }
}

#[test]
fn new_rejects_mismatched_buffers() {
    let l = layout(SampleType::U8);
    assert!(Raster::new(l, TileOrigin::default(), SampleBuffer::U8(vec![0; 15])).is_err());
    assert!(Raster::new(l, TileOrigin::default(), SampleBuffer::U16(vec![0; 16])).is_err());
    assert!(Raster::new(l, TileOrigin::default(), SampleBuffer::U8(vec![0; 16])).is_ok());
}

#[test]
fn samples_are_addressed_in_image_coordinates() {
    let mut r = Raster::zeroed(layout(SampleType::U8), TileOrigin::new(8, 4)).unwrap();
    r.set_sample(9, 5, 1, 200.0).unwrap();
    assert_eq!(r.sample(9, 5, 1), Some(200.0));
    assert_eq!(r.sample(9, 5, 0), Some(0.0));
    assert_eq!(r.sample(7, 5, 0), None);
    assert_eq!(r.sample(12, 5, 0), None);
    assert!(r.set_sample(8, 4, 2, 1.0).is_err());
}

#[test]
fn integer_samples_round_and_clamp() {
    let mut r = Raster::zeroed(layout(SampleType::U8), TileOrigin::default()).unwrap();
    r.set_sample(0, 0, 0, 300.0).unwrap();
    r.set_sample(1, 0, 0, -4.0).unwrap();
    r.set_sample(2, 0, 0, 1.6).unwrap();
    assert_eq!(r.sample(0, 0, 0), Some(255.0));
    assert_eq!(r.sample(1, 0, 0), Some(0.0));
    assert_eq!(r.sample(2, 0, 0), Some(2.0));
}

#[test]
fn byte_len_and_zeroing_follow_sample_type() {
    let mut r = Raster::zeroed(layout(SampleType::F32), TileOrigin::default()).unwrap();
    assert_eq!(r.byte_len(), 64);
    assert!(r.data().is_zeroed());
    r.set_sample(3, 1, 1, 0.5).unwrap();
    assert!(!r.data().is_zeroed());
    r.data_mut().fill_zero();
    assert!(r.data().is_zeroed());
}
