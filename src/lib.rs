//! lowbit-kernels: a bit-exact codec for low-bit quantized weight matrices.
//!
//! The encoder bit-slices sub-byte weight codes into planes, groups them
//! into fixed 128-byte lanes and interleaves the planes across lane
//! quarters, producing a tiled layout a vectorized consumer can stream.
//! The decoder reverses the layout with lookup-table gathers and a
//! butterfly lane transpose, baking the scale multiply into the tables so
//! reconstruction is a single gather per code.
//!
//! # Quick Start
//!
//! ```ignore
//! use lowbit_kernels::{
//!     dequantize, pack_weights, BitSpreadLut, DequantLut, QuantizedMatrix,
//!     Scales, TilingParams,
//! };
//!
//! let params = TilingParams::default();
//! let packed = pack_weights(&weights, &params)?;
//! let spread = BitSpreadLut::new(params.bits);
//! let lut = DequantLut::build(&scales, &params, m, k)?;
//! dequantize(&packed, &spread, &lut, &mut out)?;
//! ```

pub mod dequant;
pub mod error;
pub mod lane;
pub mod lut;
pub mod pack;
pub mod types;

pub use dequant::dequantize;
pub use error::{CodecError, CodecResult};
pub use lane::{deal, gather16, shuffle, Lane, LanePair, VLEN};
pub use lut::{BitSpreadLut, DequantLut, DEQUANT_CHUNK};
pub use pack::{pack_scales, pack_weights};
pub use types::{PackedScales, PackedWeights, QuantizedMatrix, Scales, TilingParams};
