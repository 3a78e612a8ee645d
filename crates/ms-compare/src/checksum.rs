//! Per-band raster checksums.
//!
//! Two encodings of the same raster (different compression level, chunk
//! order, metadata) produce the same checksums, which is what lets the
//! harness accept artifacts that differ byte-wise but not pixel-wise.

use std::path::Path;

use image::{DynamicImage, ImageReader};
use ms_core::{HarnessError, HarnessResult};

const PRIMES: [u32; 11] = [7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43];

/// Raster summary used for the pixel-level comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSignature {
    pub width: u32,
    pub height: u32,
    pub checksums: Vec<u16>,
}

impl RasterSignature {
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.checksums.len()
    }
}

/// Decode `path` and compute its signature. Files that are not a supported
/// raster format yield an `Image` error.
pub fn raster_signature(path: &Path) -> HarnessResult<RasterSignature> {
    let image = decode(path)?;
    Ok(RasterSignature {
        width: image.width(),
        height: image.height(),
        checksums: band_checksums(&image),
    })
}

fn decode(path: &Path) -> HarnessResult<DynamicImage> {
    let image_error = |message: String| HarnessError::Image {
        path: path.to_path_buf(),
        message,
    };
    ImageReader::open(path)
        .map_err(|source| HarnessError::io(path, source))?
        .with_guessed_format()
        .map_err(|source| HarnessError::io(path, source))?
        .decode()
        .map_err(|err| image_error(err.to_string()))
}

/// Checksum of every band (channel) of `image`, in channel order.
#[must_use]
pub fn band_checksums(image: &DynamicImage) -> Vec<u16> {
    let color = image.color();
    let bands = usize::from(color.channel_count());
    let sample_bytes = usize::from(color.bytes_per_pixel()) / bands;
    let raw = image.as_bytes();

    let samples: Vec<u32> = match sample_bytes {
        1 => raw.iter().map(|&b| u32::from(b)).collect(),
        2 => raw
            .chunks_exact(2)
            .map(|c| u32::from(u16::from_ne_bytes([c[0], c[1]])))
            .collect(),
        _ => raw
            .chunks_exact(4)
            .map(|c| round_sample(f32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    };

    (0..bands)
        .map(|band| checksum(samples.iter().skip(band).step_by(bands).copied()))
        .collect()
}

fn round_sample(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        (value + 0.5).floor() as u32
    } else {
        0
    }
}

/// Sum of `value % prime` with the prime cycling over the whole band,
/// kept to 16 bits.
#[must_use]
pub fn checksum(values: impl IntoIterator<Item = u32>) -> u16 {
    let mut sum: u32 = 0;
    for (value, prime) in values.into_iter().zip(PRIMES.iter().cycle()) {
        sum = (sum + value % prime) & 0xffff;
    }
    sum as u16
}
