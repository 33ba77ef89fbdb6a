//! # Photo Decoding
//!
//! Turns opaque photo references into downsampled rasters.
//!
//! ## Responsibilities
//! - **Two-pass decode**: Reads the header for dimensions, then decodes at a
//!   power-of-two subsampling level bounded by the caller's box. JPEGs are
//!   scaled inside the decoder, so the full-size raster never exists.
//! - **Memory Budget**: A decode whose output would exceed the library's byte
//!   budget is refused before any pixels are allocated.
//! - **Aspect Ratios**: Header-only dimension lookups.
//! - **Failure Absorption**: Any I/O or decode failure yields `None` so callers
//!   can skip the photo and carry on.

use crate::errors::ExportError;
use crate::types::PhotoRef;
use crate::MediaResolver;
use image::imageops::FilterType;
use image::{ImageReader, Limits, RgbaImage};
use skia_safe::codec::{self, bmp_decoder, gif_decoder, jpeg_decoder, png_decoder};
use skia_safe::{AlphaType, Codec, ColorType, Data, Image, ImageInfo};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on the pixel memory of one decode: 16 MP of RGBA.
pub const DEFAULT_DECODE_BUDGET: u64 = 64 * 1024 * 1024;

/// A decoded RGBA raster, owned by the caller.
///
/// Dropping it releases the pixel memory; pipelines keep a bitmap only for
/// the placement or the run of frames it was decoded for.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Unpremultiplied RGBA, tightly packed.
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Bitmap {
    /// Wraps the pixels in a Skia image for drawing.
    pub fn to_image(&self) -> Option<Image> {
        let info = ImageInfo::new(
            (self.width as i32, self.height as i32),
            ColorType::RGBA8888,
            AlphaType::Unpremul,
            None,
        );
        skia_safe::images::raster_from_data(
            &info,
            Data::new_copy(&self.pixels),
            (self.width * 4) as usize,
        )
    }

    /// Resamples to exactly `width` x `height`; a bitmap already that size is returned as is.
    fn resized(self, width: u32, height: u32) -> Bitmap {
        if self.width == width && self.height == height {
            return self;
        }
        let Some(source) = RgbaImage::from_raw(self.width, self.height, self.pixels) else {
            return Bitmap {
                width: 0,
                height: 0,
                pixels: Vec::new(),
            };
        };
        let resized = image::imageops::resize(&source, width, height, FilterType::Triangle);
        Bitmap {
            width,
            height,
            pixels: resized.into_raw(),
        }
    }
}

/// Skia codec for the formats it decodes natively, or `None`.
fn skia_codec(bytes: &[u8]) -> Option<Codec<'static>> {
    let decoders = [
        jpeg_decoder::decoder(),
        png_decoder::decoder(),
        gif_decoder::decoder(),
        bmp_decoder::decoder(),
    ];
    Codec::from_data_with_decoders(Data::new_copy(bytes), &decoders)
}

/// Largest power-of-two subsampling factor that keeps both halved
/// dimensions at or above the requested box.
pub fn calculate_in_sample_size(width: u32, height: u32, req_width: u32, req_height: u32) -> u32 {
    let req_width = req_width.max(1);
    let req_height = req_height.max(1);
    let mut in_sample_size = 1;

    if height > req_height || width > req_width {
        let half_height = height / 2;
        let half_width = width / 2;

        while half_height / in_sample_size >= req_height && half_width / in_sample_size >= req_width
        {
            in_sample_size *= 2;
        }
    }
    in_sample_size
}

/// Reads only the image header and returns `(width, height)`.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), ExportError> {
    if let Some(codec) = skia_codec(bytes) {
        let size = codec.dimensions();
        return Ok((size.width.max(0) as u32, size.height.max(0) as u32));
    }
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Access to photos through a `MediaResolver`, with a per-decode memory budget.
///
/// Cheap to clone; clones share the resolver. Holds no per-photo state, so a
/// photo edited between exports is read afresh.
#[derive(Clone)]
pub struct PhotoLibrary {
    pub resolver: Arc<dyn MediaResolver>,
    decode_budget: u64,
}

impl PhotoLibrary {
    pub fn new(resolver: Arc<dyn MediaResolver>) -> Self {
        Self {
            resolver,
            decode_budget: DEFAULT_DECODE_BUDGET,
        }
    }

    /// Caps the bytes of decoded pixels any single decode may allocate.
    pub fn with_decode_budget(mut self, bytes: u64) -> Self {
        self.decode_budget = bytes;
        self
    }

    pub fn decode_budget(&self) -> u64 {
        self.decode_budget
    }

    /// Decodes `photo` downsampled to fit `max_width` x `max_height`.
    ///
    /// Returns `None` on any failure; the caller should skip the photo.
    pub fn decode(&self, photo: &PhotoRef, max_width: u32, max_height: u32) -> Option<Bitmap> {
        match self.decode_reference(photo.as_str(), max_width, max_height) {
            Ok(bitmap) => Some(bitmap),
            Err(e) => {
                warn!(photo = %photo, "Skipping photo that failed to decode: {}", e);
                None
            }
        }
    }

    /// Decodes any image reference (photo or template asset), reporting the failure.
    pub fn decode_reference(
        &self,
        reference: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<Bitmap, ExportError> {
        let bytes = self.resolver.load_bytes(reference)?;
        let bitmap = match skia_codec(&bytes) {
            Some(codec) => self.decode_scaled(codec, max_width, max_height)?,
            None => self.decode_bounded(&bytes, max_width, max_height)?,
        };
        if bitmap.width == 0 || bitmap.height == 0 {
            return Err(ExportError::Decode(format!("{} decoded to an empty raster", reference)));
        }
        debug!(reference, decoded = ?(bitmap.width, bitmap.height), "Decoded image");
        Ok(bitmap)
    }

    fn check_budget(&self, width: u32, height: u32) -> Result<(), ExportError> {
        let needed = width as u64 * height as u64 * 4;
        if needed > self.decode_budget {
            return Err(ExportError::DecodeBudget {
                width,
                height,
                needed,
                budget: self.decode_budget,
            });
        }
        Ok(())
    }

    /// Decodes through Skia at the subsampled size.
    ///
    /// JPEG scales by up to 1/8 while decoding; other formats decode at their
    /// full size, which the budget has to admit, and are resampled afterwards.
    fn decode_scaled(
        &self,
        mut codec: Codec<'_>,
        max_width: u32,
        max_height: u32,
    ) -> Result<Bitmap, ExportError> {
        let full = codec.dimensions();
        let (width, height) = (full.width.max(1) as u32, full.height.max(1) as u32);
        let sample = calculate_in_sample_size(width, height, max_width, max_height);

        let scaled = codec.get_scaled_dimensions(1.0 / sample as f32);
        let (scaled_w, scaled_h) = (scaled.width.max(1) as u32, scaled.height.max(1) as u32);
        self.check_budget(scaled_w, scaled_h)?;

        let info = ImageInfo::new(
            (scaled_w as i32, scaled_h as i32),
            ColorType::RGBA8888,
            AlphaType::Unpremul,
            None,
        );
        let row_bytes = info.min_row_bytes();
        let mut pixels = vec![0u8; info.compute_byte_size(row_bytes)];
        match codec.get_pixels_with_options(&info, &mut pixels, row_bytes, None) {
            codec::Result::Success => {}
            codec::Result::IncompleteInput | codec::Result::ErrorInInput => {
                warn!("Image data is truncated; keeping the rows that decoded");
            }
            other => return Err(ExportError::Decode(codec::result_to_string(other).to_string())),
        }
        debug!(
            original = ?(width, height),
            sample,
            scaled = ?(scaled_w, scaled_h),
            "Decoded through Skia"
        );

        let bitmap = Bitmap {
            width: scaled_w,
            height: scaled_h,
            pixels,
        };
        Ok(bitmap.resized((width / sample).max(1), (height / sample).max(1)))
    }

    /// Decodes formats Skia does not handle (WebP, TIFF, ...) with `image`.
    ///
    /// These decode at full size, so the full size must fit the budget.
    fn decode_bounded(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
    ) -> Result<Bitmap, ExportError> {
        let (width, height) = read_dimensions(bytes)?;
        self.check_budget(width, height)?;
        let sample = calculate_in_sample_size(width, height, max_width, max_height);

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.decode_budget);
        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        reader.limits(limits);
        let decoded = reader.decode()?;
        let decoded = if sample > 1 {
            decoded.resize_exact(
                (width / sample).max(1),
                (height / sample).max(1),
                FilterType::Triangle,
            )
        } else {
            decoded
        };

        let rgba = decoded.into_rgba8();
        debug!(original = ?(width, height), sample, "Decoded through image");
        Ok(Bitmap {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }

    /// Header-only dimensions of `photo`, or `None` when unreadable.
    pub fn dimensions(&self, photo: &PhotoRef) -> Option<(u32, u32)> {
        let bytes = self.resolver.load_bytes(photo.as_str()).ok()?;
        read_dimensions(&bytes)
            .ok()
            .filter(|(w, h)| *w > 0 && *h > 0)
    }

    /// Width / height of `photo`, defaulting to 1.0 when unknown.
    pub fn aspect_ratio(&self, photo: &PhotoRef) -> f32 {
        self.dimensions(photo)
            .map(|(w, h)| w as f32 / h as f32)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(1.0)
    }
}
