//! DSP and rendering core for progressive seismic-audio streaming:
//! chunk decoding and normalization, waveform envelopes, a pooled STFT
//! pipeline, the spectrogram tile pyramid with its texture cache, and the
//! raster-surface abstraction renderers draw through.

pub mod colormap;
pub mod decode;
pub mod pool;
pub mod pyramid;
pub mod resample;
pub mod stft;
pub mod surface;
pub mod texture;
pub mod tile;
pub mod types;
pub mod waveform;

pub use colormap::Colormap;
pub use decode::{decode_segment, silent_segment, DecodeError};
pub use pool::{BatchResult, BatchStatus, CancelToken, FftBatch, FftPool};
pub use pyramid::TilePyramid;
pub use resample::{RateMap, Resampler};
pub use stft::{Stft, Window};
pub use surface::{RasterSurface, Rect, SoftwareRaster, TextureId};
pub use texture::TextureCache;
pub use tile::{SpectroTile, TileKey, TileRenderSpec, TILE_COLS};
pub use types::{AudioStream, DecodedSegment};
