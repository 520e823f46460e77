//! End-to-end thumbnails through the production backend.
//!
//! Sources are synthesised with the `image` encoders into a temp dir, run
//! through [`generate_thumbnail`] and the results decoded again to check
//! what actually landed on disk.

use cuticle::imaging::{ColourProfile, Kernel};
use cuticle::{
    CropStyle, ErrorKind, SharpenMask, ThumbnailGenerator, ThumbnailRequest, generate_thumbnail,
    transform,
};
use image::{GenericImageView, ImageEncoder, RgbImage};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
        .write_image(
            gradient(width, height).as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    out
}

fn create_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, jpeg_bytes(width, height)).unwrap();
    path
}

fn create_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    gradient(width, height).save(&path).unwrap();
    path
}

/// JPEG carrying an EXIF block with just an Orientation tag.
fn create_oriented_jpeg(dir: &Path, name: &str, width: u32, height: u32, orientation: u8) -> PathBuf {
    use img_parts::{Bytes, ImageEXIF};

    #[rustfmt::skip]
    let exif: Vec<u8> = vec![
        b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08, // TIFF header, IFD0 at 8
        0x00, 0x01,                                     // one entry
        0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, // Orientation, SHORT, 1
        0x00, orientation, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,                         // no IFD1
    ];
    let mut jpeg = img_parts::jpeg::Jpeg::from_bytes(jpeg_bytes(width, height).into()).unwrap();
    jpeg.set_exif(Some(Bytes::from(exif)));

    let path = dir.join(name);
    let mut out = Vec::new();
    jpeg.encoder().write_to(&mut out).unwrap();
    std::fs::write(&path, out).unwrap();
    path
}

fn sized(size: &str) -> ThumbnailRequest {
    ThumbnailRequest::default().with_size(size.parse().unwrap())
}

fn output_dimensions(path: &Path) -> (u32, u32) {
    image::open(path).unwrap().dimensions()
}

#[test]
fn jpeg_fit_uses_shrink_on_load() {
    let tmp = TempDir::new().unwrap();
    let source = create_jpeg(tmp.path(), "IMG_0042.JPG", 1600, 1200);

    let outcome = generate_thumbnail(&source, &sized("400")).unwrap();

    assert_eq!(outcome.destination, tmp.path().join("tn_IMG_0042.jpg"));
    assert_eq!(outcome.loader, "jpegload");
    assert_eq!(outcome.source_dimensions, (1600, 1200));
    assert_eq!(outcome.decode_shrink, 4);
    assert_eq!(outcome.output_dimensions, (400, 300));
    assert_eq!(output_dimensions(&outcome.destination), (400, 300));
}

#[test]
fn png_fill_and_crop_hits_exact_size() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "wide.png", 400, 300);
    let request = ThumbnailRequest {
        crop: true,
        output: "%s_square.png".into(),
        ..sized("100x100^")
    };

    let outcome = generate_thumbnail(&source, &request).unwrap();

    assert_eq!(outcome.decode_shrink, 1);
    assert_eq!(outcome.integer_shrink, 3);
    assert_eq!(outcome.destination, tmp.path().join("wide_square.png"));
    assert_eq!(output_dimensions(&outcome.destination), (100, 100));
}

#[test]
fn source_that_fits_takes_the_identity_path() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "small.png", 64, 48);

    let outcome = generate_thumbnail(&source, &sized("64x48")).unwrap();

    assert_eq!(outcome.integer_shrink, 1);
    assert_eq!(outcome.residual_scale, 1.0);
    assert_eq!(output_dimensions(&outcome.destination), (64, 48));
}

#[test]
fn small_source_is_not_enlarged_without_fill() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "tiny.png", 40, 30);

    let outcome = generate_thumbnail(&source, &sized("128")).unwrap();
    assert_eq!(output_dimensions(&outcome.destination), (40, 30));
}

#[test]
fn fill_enlarges_small_source() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "tiny.png", 40, 30);

    let outcome = generate_thumbnail(&source, &sized("80^")).unwrap();
    assert_eq!(output_dimensions(&outcome.destination), (80, 60));
}

#[test]
fn orientation_six_rotates_portrait_source() {
    let tmp = TempDir::new().unwrap();
    let source = create_oriented_jpeg(tmp.path(), "portrait.jpg", 120, 160, 6);
    let request = ThumbnailRequest {
        auto_rotate: true,
        ..sized("60")
    };

    let outcome = generate_thumbnail(&source, &request).unwrap();

    assert_eq!(outcome.rotation, 90);
    assert_eq!(outcome.decode_shrink, 2);
    assert_eq!(outcome.output_dimensions, (60, 45));
    assert_eq!(output_dimensions(&outcome.destination), (60, 45));
}

#[test]
fn orientation_is_ignored_without_rotate() {
    let tmp = TempDir::new().unwrap();
    let source = create_oriented_jpeg(tmp.path(), "portrait.jpg", 120, 160, 6);

    let outcome = generate_thumbnail(&source, &sized("60")).unwrap();

    assert_eq!(outcome.rotation, 0);
    assert_eq!(output_dimensions(&outcome.destination), (45, 60));
}

#[test]
fn linear_processing_disables_shrink_on_load() {
    let tmp = TempDir::new().unwrap();
    let source = create_jpeg(tmp.path(), "photo.jpg", 800, 600);
    let request = ThumbnailRequest {
        linear: true,
        kernel: Kernel::Bicubic,
        ..sized("200")
    };

    let outcome = generate_thumbnail(&source, &request).unwrap();

    assert_eq!(outcome.decode_shrink, 1);
    assert_eq!(outcome.integer_shrink, 4);
    assert_eq!(output_dimensions(&outcome.destination), (200, 150));
}

#[test]
fn custom_sharpen_matrix_from_file() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "photo.png", 300, 300);
    let mask = tmp.path().join("sharpen.mat");
    std::fs::write(&mask, "3 3 8\n-1 -1 -1\n-1 16 -1\n-1 -1 -1\n").unwrap();
    let request = ThumbnailRequest {
        sharpen: SharpenMask::File(mask),
        ..sized("100")
    };

    let outcome = generate_thumbnail(&source, &request).unwrap();
    assert_eq!(output_dimensions(&outcome.destination), (100, 100));
}

#[test]
fn transform_writes_exact_path() {
    let tmp = TempDir::new().unwrap();
    let source = create_jpeg(tmp.path(), "photo.jpg", 640, 480);
    let output = tmp.path().join("out").join("cover.webp");
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();

    let outcome = transform(&source, 200, 200, CropStyle::AspectFill, &output).unwrap();

    assert_eq!(outcome.destination, output);
    assert_eq!(output_dimensions(&output), (200, 200));
}

#[test]
fn transform_aspect_fit_keeps_ratio() {
    let tmp = TempDir::new().unwrap();
    let source = create_jpeg(tmp.path(), "photo.jpg", 640, 480);
    let output = tmp.path().join("fit.png");

    transform(&source, 200, 200, CropStyle::AspectFit, &output).unwrap();
    assert_eq!(output_dimensions(&output), (200, 150));
}

#[test]
fn transform_aspect_fit_enlarges_without_overflowing() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "tall.png", 40, 60);
    let output = tmp.path().join("tall_fit.png");

    transform(&source, 100, 100, CropStyle::AspectFit, &output).unwrap();
    assert_eq!(output_dimensions(&output), (67, 100));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn unsupported_input_is_reported_and_nothing_written() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("notes.txt");
    std::fs::write(&source, "not an image").unwrap();

    let err = generate_thumbnail(&source, &sized("100")).unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
    assert!(!tmp.path().join("tn_notes.jpg").exists());
}

#[test]
fn truncated_png_is_a_decode_failure() {
    let tmp = TempDir::new().unwrap();
    let full = create_png(tmp.path(), "full.png", 200, 200);
    let bytes = std::fs::read(&full).unwrap();
    let source = tmp.path().join("cut.png");
    std::fs::write(&source, &bytes[..bytes.len() / 2]).unwrap();

    let err = generate_thumbnail(&source, &sized("50")).unwrap_err();

    assert_eq!(err.kind, ErrorKind::DecodeFailure);
    assert!(!tmp.path().join("tn_cut.jpg").exists());
}

#[test]
fn unwritable_destination_is_a_write_failure() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "photo.png", 100, 100);
    let request = ThumbnailRequest {
        output: tmp.path().join("missing-dir").join("%s.jpg").display().to_string(),
        ..sized("50")
    };

    let err = generate_thumbnail(&source, &request).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WriteFailure);
}

#[test]
fn missing_sharpen_file_fails_before_decoding() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "photo.png", 100, 100);
    let request = ThumbnailRequest {
        sharpen: SharpenMask::File(tmp.path().join("absent.mat")),
        ..sized("50")
    };

    let err = generate_thumbnail(&source, &request).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SharpenMaskLoadFailure);
}

#[test]
fn missing_import_profile_is_a_colour_failure() {
    let tmp = TempDir::new().unwrap();
    let source = create_png(tmp.path(), "photo.png", 100, 100);
    let request = ThumbnailRequest {
        linear: true,
        import_profile: Some(ColourProfile::File(tmp.path().join("absent.icc"))),
        ..sized("50")
    };

    let err = generate_thumbnail(&source, &request).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ColourTransformFailure);
}

#[test]
fn batch_keeps_going_past_failures() {
    let tmp = TempDir::new().unwrap();
    let good = create_png(tmp.path(), "good.png", 200, 100);
    let bad = tmp.path().join("bad.png");
    std::fs::write(&bad, "garbage").unwrap();
    let also_good = create_jpeg(tmp.path(), "also.jpg", 300, 300);

    let results = ThumbnailGenerator::default().generate_batch(
        &[good, bad.clone(), also_good],
        &sized("50"),
    );

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(results[1].as_ref().unwrap_err().path, bad);
    assert!(results[2].is_ok());
    assert!(tmp.path().join("tn_good.jpg").exists());
    assert!(tmp.path().join("tn_also.jpg").exists());
}
