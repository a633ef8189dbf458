//! # Image Optimizer Module
//!
//! Trasformazione pura: byte grezzi di un'immagine → JPEG entro un tetto di
//! dimensione. Nessun I/O, nessuno stato condiviso.
//!
//! ## Pipeline:
//! 1. **Decode**: errore se i byte sono vuoti o corrotti (solo il primo frame
//!    per i formati animati)
//! 2. **Flatten**: il canale alpha viene composto su bianco, JPEG non ha alpha
//! 3. **QualityReduction**: encode a 95, 90, …, 20 finché la dimensione rientra
//! 4. **Resize**: alla qualità minima si scala di `sqrt(limit / size)` e si
//!    ri-codifica, finché rientra o le dimensioni degenerano
//! 5. **Hash**: SHA-256 dei byte finali, identità per la deduplicazione
//!
//! Un JPEG già sotto il tetto viene comunque ri-codificato: l'output è sempre
//! un JPEG normalizzato, quindi due sorgenti identiche producono lo stesso hash.
//!
//! ## Esempio:
//! ```rust,ignore
//! let optimizer = ImageOptimizer::new(20 * 1024 * 1024);
//! let optimized = optimizer.optimize(&raw_bytes)?;
//! assert!(optimized.byte_size() <= optimizer.max_size());
//! ```

use crate::error::OptimizeError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const START_QUALITY: u8 = 95;
pub const MIN_QUALITY: u8 = 20;
pub const QUALITY_STEP: u8 = 5;
/// Hard stop for the resize phase
pub const MAX_RESIZE_ITERATIONS: u32 = 16;

/// Size-bounded JPEG produced by [`ImageOptimizer::optimize`]
#[derive(Debug, Clone)]
pub struct OptimizedImage {
    pub bytes: Vec<u8>,
    /// JPEG quality of the final encode
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// Hex SHA-256 of `bytes`
    pub hash: String,
}

impl OptimizedImage {
    pub(crate) fn new(bytes: Vec<u8>, quality: u8, width: u32, height: u32) -> Self {
        let hash = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes,
            quality,
            width,
            height,
            hash,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    /// `{hash}.jpg`
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.hash)
    }
}

/// Progressive compression as an explicit state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionState {
    QualityReduction { quality: u8 },
    Resize { quality: u8, iteration: u32 },
    Done,
    Failed,
}

impl CompressionState {
    pub fn initial() -> Self {
        Self::QualityReduction {
            quality: START_QUALITY,
        }
    }

    /// Quality to encode at, `None` once terminal
    pub fn quality(&self) -> Option<u8> {
        match *self {
            Self::QualityReduction { quality } | Self::Resize { quality, .. } => Some(quality),
            Self::Done | Self::Failed => None,
        }
    }

    /// Transition after an encode of `size` bytes
    pub fn advance(self, size: usize, limit: usize) -> Self {
        if size <= limit {
            return match self {
                Self::Failed => Self::Failed,
                _ => Self::Done,
            };
        }

        match self {
            Self::QualityReduction { quality } if quality > MIN_QUALITY => Self::QualityReduction {
                quality: quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY),
            },
            Self::QualityReduction { quality } => Self::Resize {
                quality,
                iteration: 1,
            },
            Self::Resize { quality, iteration } if iteration < MAX_RESIZE_ITERATIONS => Self::Resize {
                quality,
                iteration: iteration + 1,
            },
            Self::Resize { .. } | Self::Failed => Self::Failed,
            Self::Done => Self::Done,
        }
    }
}

/// Turns arbitrary images into JPEGs no larger than `max_size` bytes
#[derive(Debug, Clone)]
pub struct ImageOptimizer {
    max_size: usize,
}

impl ImageOptimizer {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Decode, flatten and compress `raw` until it fits under `max_size`
    pub fn optimize(&self, raw: &[u8]) -> Result<OptimizedImage, OptimizeError> {
        if raw.is_empty() {
            return Err(OptimizeError::EmptyInput);
        }

        let decoded = image::load_from_memory(raw).map_err(OptimizeError::Decode)?;
        let source = flatten_to_rgb(decoded);

        let mut current = source.clone();
        let mut state = CompressionState::initial();

        while let Some(quality) = state.quality() {
            let bytes = encode_jpeg(&current, quality)?;
            let size = bytes.len();
            let next = state.advance(size, self.max_size);

            match next {
                CompressionState::Done => {
                    debug!(
                        "Optimized image to {} bytes at quality {} ({}x{})",
                        size,
                        quality,
                        current.width(),
                        current.height()
                    );
                    return Ok(OptimizedImage::new(bytes, quality, current.width(), current.height()));
                }
                CompressionState::Resize { iteration, .. } => {
                    let (width, height) = match scaled_dimensions(current.width(), current.height(), size, self.max_size) {
                        Some(dims) => dims,
                        None => return Err(self.unreachable(size, &current)),
                    };
                    debug!(
                        "Resize iteration {}: {}x{} -> {}x{} ({} bytes over limit)",
                        iteration,
                        current.width(),
                        current.height(),
                        width,
                        height,
                        size - self.max_size
                    );
                    current = image::imageops::resize(&source, width, height, FilterType::Lanczos3);
                }
                CompressionState::Failed => return Err(self.unreachable(size, &current)),
                CompressionState::QualityReduction { .. } => {}
            }

            state = next;
        }

        Err(self.unreachable(0, &current))
    }

    fn unreachable(&self, size: usize, current: &RgbImage) -> OptimizeError {
        OptimizeError::SizeLimitUnreachable {
            size,
            limit: self.max_size,
            width: current.width(),
            height: current.height(),
        }
    }
}

/// Scale by `sqrt(limit / size)`; `None` when a side would reach zero
fn scaled_dimensions(width: u32, height: u32, size: usize, limit: usize) -> Option<(u32, u32)> {
    let factor = (limit as f64 / size as f64).sqrt();
    // size > limit, so factor < 1 and floor() strictly shrinks both sides
    let new_width = (width as f64 * factor).floor() as u32;
    let new_height = (height as f64 * factor).floor() as u32;

    if new_width == 0 || new_height == 0 {
        None
    } else {
        Some((new_width, new_height))
    }
}

/// Composite any alpha channel onto white
pub(crate) fn flatten_to_rgb(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        rgb.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, OptimizeError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        encoder.encode_image(image).map_err(OptimizeError::Encode)?;
    }
    Ok(buffer)
}
