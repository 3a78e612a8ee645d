#![forbid(unsafe_code)]

//! Normalization and comparison of renderer artifacts.
//!
//! Comparison walks a ladder, stopping at the first rung that accepts:
//! identical bytes, identical per-band raster checksums, then an optional
//! perceptual diff.

mod checksum;
mod normalize;
mod pdiff;

use std::path::Path;

use ms_core::{CompareOutcome, EXPECTED_DIR, HarnessError, HarnessResult, RESULT_DIR};
use tracing::debug;

pub use checksum::{RasterSignature, band_checksums, checksum, raster_signature};
pub use normalize::{
    Pass, crlf, demime, deversion, fix_exponent, passes_for, rewrite_in_place,
    truncate_one_decimal,
};
pub use pdiff::{DEFAULT_PDIFF, PerceptualDiff};

/// Compare `<dir>/result/<output>` against `<dir>/expected/<output>`.
pub fn compare_result(
    dir: &Path,
    output: &str,
    pdiff: Option<&PerceptualDiff>,
) -> HarnessResult<CompareOutcome> {
    let result = dir.join(RESULT_DIR).join(output);
    let expected = dir.join(EXPECTED_DIR).join(output);
    compare_files(&expected, &result, pdiff)
}

/// Compare an arbitrary result file against an expected file.
pub fn compare_files(
    expected: &Path,
    result: &Path,
    pdiff: Option<&PerceptualDiff>,
) -> HarnessResult<CompareOutcome> {
    if !result.is_file() {
        return Ok(CompareOutcome::NoResult);
    }
    if !expected.is_file() {
        return Ok(CompareOutcome::NoExpected);
    }

    let result_bytes = std::fs::read(result).map_err(|source| HarnessError::io(result, source))?;
    let expected_bytes =
        std::fs::read(expected).map_err(|source| HarnessError::io(expected, source))?;
    if result_bytes == expected_bytes {
        return Ok(CompareOutcome::Match);
    }

    if rasters_match(expected, result) {
        return Ok(CompareOutcome::FilesDifferImageMatch);
    }

    if let Some(pdiff) = pdiff
        && pdiff.nearly_match(expected, result)
    {
        return Ok(CompareOutcome::FilesDifferImageNearlyMatch);
    }

    Ok(CompareOutcome::NoMatch)
}

fn rasters_match(expected: &Path, result: &Path) -> bool {
    let (expected_sig, result_sig) = match (raster_signature(expected), raster_signature(result)) {
        (Ok(e), Ok(r)) => (e, r),
        (Err(err), _) | (_, Err(err)) => {
            debug!("no raster comparison: {err}");
            return false;
        }
    };

    if (expected_sig.width, expected_sig.height) != (result_sig.width, result_sig.height) {
        debug!(
            "raster size differs: expected {}x{}, got {}x{}",
            expected_sig.width, expected_sig.height, result_sig.width, result_sig.height
        );
        return false;
    }
    if expected_sig.band_count() != result_sig.band_count() {
        debug!(
            "band count differs: expected {}, got {}",
            expected_sig.band_count(),
            result_sig.band_count()
        );
        return false;
    }

    let matched = expected_sig.checksums == result_sig.checksums;
    if !matched {
        debug!(
            "band checksums differ: expected {:?}, got {:?}",
            expected_sig.checksums, result_sig.checksums
        );
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::{compare_files, compare_result};
    use image::{Rgb, RgbImage};
    use ms_core::CompareOutcome;

    fn layout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("result")).expect("result dir");
        std::fs::create_dir(dir.path().join("expected")).expect("expected dir");
        dir
    }

    fn checker(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    #[test]
    fn missing_result_wins_over_missing_expected() {
        let dir = layout();
        assert_eq!(
            compare_result(dir.path(), "a.png", None).expect("compare"),
            CompareOutcome::NoResult
        );
    }

    #[test]
    fn missing_expected() {
        let dir = layout();
        std::fs::write(dir.path().join("result/a.txt"), "x").expect("write");
        assert_eq!(
            compare_result(dir.path(), "a.txt", None).expect("compare"),
            CompareOutcome::NoExpected
        );
    }

    #[test]
    fn identical_bytes_match() {
        let dir = layout();
        std::fs::write(dir.path().join("result/a.txt"), "same").expect("write");
        std::fs::write(dir.path().join("expected/a.txt"), "same").expect("write");
        assert_eq!(
            compare_result(dir.path(), "a.txt", None).expect("compare"),
            CompareOutcome::Match
        );
    }

    #[test]
    fn differing_text_does_not_match() {
        let dir = layout();
        std::fs::write(dir.path().join("result/a.txt"), "one").expect("write");
        std::fs::write(dir.path().join("expected/a.txt"), "two").expect("write");
        assert_eq!(
            compare_result(dir.path(), "a.txt", None).expect("compare"),
            CompareOutcome::NoMatch
        );
    }

    #[test]
    fn same_pixels_different_container_is_image_match() {
        let dir = layout();
        let img = checker(8);
        // Same pixels, written once as PNG and once as TIFF under the same name.
        let expected = dir.path().join("expected/map.png");
        let result = dir.path().join("result/map.png");
        img.save_with_format(&expected, image::ImageFormat::Png)
            .expect("save png");
        img.save_with_format(&result, image::ImageFormat::Tiff)
            .expect("save tiff");
        assert_eq!(
            compare_files(&expected, &result, None).expect("compare"),
            CompareOutcome::FilesDifferImageMatch
        );
    }

    #[test]
    fn different_pixels_do_not_match() {
        let dir = layout();
        let expected = dir.path().join("expected/map.png");
        let result = dir.path().join("result/map.png");
        checker(8).save(&expected).expect("save");
        let mut other = checker(8);
        other.put_pixel(3, 3, Rgb([0, 255, 0]));
        other.save(&result).expect("save");
        assert_eq!(
            compare_files(&expected, &result, None).expect("compare"),
            CompareOutcome::NoMatch
        );
    }

    #[test]
    fn different_sizes_do_not_match() {
        let dir = layout();
        let expected = dir.path().join("expected/map.png");
        let result = dir.path().join("result/map.png");
        checker(8).save(&expected).expect("save");
        checker(10).save(&result).expect("save");
        assert_eq!(
            compare_files(&expected, &result, None).expect("compare"),
            CompareOutcome::NoMatch
        );
    }

    #[cfg(unix)]
    #[test]
    fn perceptual_diff_is_last_resort() {
        use super::PerceptualDiff;
        use std::os::unix::fs::PermissionsExt;

        let dir = layout();
        let program = dir.path().join("pdiff.sh");
        std::fs::write(&program, "#!/bin/sh\necho PASS\n").expect("write pdiff");
        let mut perms = std::fs::metadata(&program).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&program, perms).expect("chmod");
        let pdiff = PerceptualDiff::detect(&program.to_string_lossy()).expect("detect");

        let expected = dir.path().join("expected/map.png");
        let result = dir.path().join("result/map.png");
        checker(8).save(&expected).expect("save");
        checker(10).save(&result).expect("save");
        assert_eq!(
            compare_files(&expected, &result, Some(&pdiff)).expect("compare"),
            CompareOutcome::FilesDifferImageNearlyMatch
        );
    }
}
