//! Data model: tiling parameters, quantized inputs, packed outputs.

use half::f16;

use crate::error::{CodecError, CodecResult};
use crate::lane::VLEN;

/// Tiling and bit-layout parameters shared by packer, LUT builder and
/// decoder. Producer and consumer must agree on every field (plus `M`, `K`
/// and `VLEN`) for the wire format to round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingParams {
    /// Code width in bits.
    pub bits: usize,
    /// Number of K positions bit-packed into one lane element.
    pub g: usize,
    /// K positions sharing one scale factor.
    pub group_size: usize,
    /// Tile height in P = M*bits rows.
    pub tile_p: usize,
    /// Tile width in Q = K/g columns.
    pub tile_q: usize,
    /// Vector height in P rows (one lane of bytes).
    pub vec_p: usize,
    /// Vector width in Q columns.
    pub vec_q: usize,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self {
            bits: 4,
            g: 4,
            group_size: 128,
            tile_p: 512,
            tile_q: 64,
            vec_p: 128,
            vec_q: 4,
        }
    }
}

impl TilingParams {
    /// Bit-plane-expanded row count.
    #[inline(always)]
    pub fn p(&self, m: usize) -> usize {
        m * self.bits
    }

    /// Lane-grouped column count.
    #[inline(always)]
    pub fn q(&self, k: usize) -> usize {
        k / self.g
    }

    /// Output rows per M-tile.
    #[inline(always)]
    pub fn tile_m(&self) -> usize {
        self.tile_p / self.bits
    }

    /// Scale groups expressed in Q columns.
    #[inline(always)]
    pub fn q_group_size(&self) -> usize {
        self.group_size / self.g
    }

    /// Packed weight bytes for an M×K matrix: two g-bit values per byte.
    #[inline(always)]
    pub fn packed_len(&self, m: usize, k: usize) -> usize {
        self.p(m) * self.q(k) * self.g / 8
    }

    /// Validate the encoder-side divisibility invariants.
    pub fn validate_pack(&self, m: usize, k: usize) -> CodecResult<()> {
        if self.bits == 0 || self.bits > 8 {
            return Err(CodecError::Domain(format!(
                "bits {} outside supported range 1..=8",
                self.bits
            )));
        }
        // The wire format stores exactly two g-bit values per byte, so the
        // placement loop and packed_len agree only when 2*g fills a byte.
        if self.g * 2 != 8 {
            return Err(CodecError::Shape(format!(
                "g {} must pack exactly two values per byte",
                self.g
            )));
        }
        if m < self.vec_p {
            return Err(CodecError::Shape(format!(
                "out features {} must be at least vec_p {}",
                m, self.vec_p
            )));
        }
        if m % self.vec_p != 0 {
            return Err(CodecError::Shape(format!(
                "out features {} not a multiple of vec_p {}",
                m, self.vec_p
            )));
        }
        if self.p(m) % self.tile_p != 0 {
            return Err(CodecError::Shape(format!(
                "P {} not a multiple of tile_p {}",
                self.p(m),
                self.tile_p
            )));
        }
        if k % self.g != 0 {
            return Err(CodecError::Shape(format!(
                "in features {} not a multiple of g {}",
                k, self.g
            )));
        }
        if self.q(k) % self.tile_q != 0 {
            return Err(CodecError::Shape(format!(
                "Q {} not a multiple of tile_q {}",
                self.q(k),
                self.tile_q
            )));
        }
        if self.tile_p % self.vec_p != 0 {
            return Err(CodecError::Shape(format!(
                "tile_p {} not a multiple of vec_p {}",
                self.tile_p, self.vec_p
            )));
        }
        if self.tile_q % self.vec_q != 0 {
            return Err(CodecError::Shape(format!(
                "tile_q {} not a multiple of vec_q {}",
                self.tile_q, self.vec_q
            )));
        }
        if self.vec_q % 2 != 0 {
            return Err(CodecError::Shape(format!(
                "vec_q {} must be even to pack element pairs",
                self.vec_q
            )));
        }
        // 32x32 matrix-unit tile alignment downstream.
        if self.vec_p % 4 != 0 {
            return Err(CodecError::Shape(format!(
                "vec_p {} not a multiple of 4",
                self.vec_p
            )));
        }
        Ok(())
    }

    /// Validate the invariants the vectorized decode path additionally
    /// relies on. The nibble-spread reconstruction and the fixed butterfly
    /// geometry are specific to 4-bit codes on VLEN-byte lanes.
    pub fn validate_decode(&self, m: usize, k: usize) -> CodecResult<()> {
        self.validate_pack(m, k)?;
        if self.bits != 4 {
            return Err(CodecError::Domain(format!(
                "decode supports bits == 4, got {}",
                self.bits
            )));
        }
        if self.g != 4 || self.vec_q != 4 {
            return Err(CodecError::Shape(format!(
                "decode requires g == 4 and vec_q == 4, got g {} vec_q {}",
                self.g, self.vec_q
            )));
        }
        if self.vec_p != VLEN {
            return Err(CodecError::Shape(format!(
                "decode requires vec_p == VLEN ({}), got {}",
                VLEN, self.vec_p
            )));
        }
        if self.tile_p != self.bits * self.vec_p {
            return Err(CodecError::Shape(format!(
                "decode requires tile_p == bits*vec_p ({}), got {}",
                self.bits * self.vec_p,
                self.tile_p
            )));
        }
        if (self.tile_q * self.g) % VLEN != 0 {
            return Err(CodecError::Shape(format!(
                "tile K span {} not a multiple of VLEN {}",
                self.tile_q * self.g,
                VLEN
            )));
        }
        // One f16 lane pair (VLEN values) must sit inside one scale group
        // for the LUT selector arithmetic to hold.
        if self.group_size != VLEN {
            return Err(CodecError::Shape(format!(
                "decode requires group_size == {}, got {}",
                VLEN, self.group_size
            )));
        }
        if k % self.group_size != 0 {
            return Err(CodecError::Shape(format!(
                "in features {} not a multiple of group_size {}",
                k, self.group_size
            )));
        }
        Ok(())
    }

    /// Validate the grouped-scale retiling invariants.
    pub fn validate_grouped_scales(&self, k: usize) -> CodecResult<()> {
        if self.group_size % self.g != 0 {
            return Err(CodecError::Shape(format!(
                "group_size {} not a multiple of g {}",
                self.group_size, self.g
            )));
        }
        if self.tile_q % self.q_group_size() != 0 {
            return Err(CodecError::Shape(format!(
                "tile_q {} not a multiple of q_group_size {}",
                self.tile_q,
                self.q_group_size()
            )));
        }
        if self.tile_m() % self.vec_p != 0 {
            return Err(CodecError::Shape(format!(
                "tile_m {} not a multiple of vec_p {}",
                self.tile_m(),
                self.vec_p
            )));
        }
        if k % self.group_size != 0 {
            return Err(CodecError::Shape(format!(
                "in features {} not a multiple of group_size {}",
                k, self.group_size
            )));
        }
        Ok(())
    }
}

/// Row-major M×K matrix of b-bit unsigned codes, one code per byte.
#[derive(Debug, Clone)]
pub struct QuantizedMatrix {
    pub data: Vec<u8>,
    pub rows: usize,
    pub cols: usize,
}

impl QuantizedMatrix {
    #[inline(always)]
    pub fn new(data: Vec<u8>, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols, "data length must match rows * cols");
        Self { data, rows, cols }
    }

    #[inline(always)]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0; rows * cols],
            rows,
            cols,
        }
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline(always)]
    pub fn code_at(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.cols + col]
    }

    #[inline(always)]
    pub fn set_code(&mut self, row: usize, col: usize, code: u8) {
        self.data[row * self.cols + col] = code;
    }
}

/// Scale tensor, tagged by quantization regime.
///
/// The regime is selected purely by comparing the element count to M:
/// per-(row, K-group) scales ("GPTQ-style") when the tensor has at least M
/// elements, a single broadcastable set ("BitNet-style") otherwise.
#[derive(Debug, Clone)]
pub enum Scales {
    Grouped {
        /// Row-major `(M, K/group_size)` scales.
        data: Vec<f16>,
        rows: usize,
        k_groups: usize,
        /// Optional per-(row, K-group) zero points, same shape as `data`.
        zeros: Option<Vec<f16>>,
    },
    Global {
        /// Flat broadcastable scale set (usually a single scalar).
        data: Vec<f16>,
    },
}

impl Scales {
    /// Classify a raw scale tensor against matrix dimensions.
    pub fn from_raw(
        data: Vec<f16>,
        zeros: Option<Vec<f16>>,
        m: usize,
        k: usize,
    ) -> CodecResult<Self> {
        if data.is_empty() {
            return Err(CodecError::Domain("empty scale tensor".into()));
        }
        if data.len() >= m {
            if data.len() % m != 0 {
                return Err(CodecError::Domain(format!(
                    "grouped scale tensor of {} elements not divisible by M {}",
                    data.len(),
                    m
                )));
            }
            let k_groups = data.len() / m;
            if k % k_groups != 0 {
                return Err(CodecError::Domain(format!(
                    "K {} not divisible by {} scale groups",
                    k, k_groups
                )));
            }
            if let Some(z) = &zeros {
                if z.len() != data.len() {
                    return Err(CodecError::Domain(format!(
                        "zero tensor of {} elements does not match {} scales",
                        z.len(),
                        data.len()
                    )));
                }
            }
            Ok(Self::Grouped {
                data,
                rows: m,
                k_groups,
                zeros,
            })
        } else {
            if zeros.is_some() {
                return Err(CodecError::Domain(
                    "zero points are not supported in the global regime".into(),
                ));
            }
            Ok(Self::Global { data })
        }
    }

    /// Same as [`Scales::from_raw`] but converting f32 inputs to f16 first.
    pub fn from_raw_f32(
        data: &[f32],
        zeros: Option<&[f32]>,
        m: usize,
        k: usize,
    ) -> CodecResult<Self> {
        let data = data.iter().map(|&s| f16::from_f32(s)).collect();
        let zeros = zeros.map(|z| z.iter().map(|&v| f16::from_f32(v)).collect());
        Self::from_raw(data, zeros, m, k)
    }

    /// Scale for `(row, k_group)` under the regime's broadcast rule.
    #[inline]
    pub fn scale_at(&self, row: usize, k_group: usize) -> f16 {
        match self {
            Self::Grouped { data, k_groups, .. } => data[row * k_groups + k_group],
            Self::Global { data } => data[k_group % data.len()],
        }
    }
}

/// Packed weight buffer plus the metadata any consumer must agree on.
///
/// Bytes are row-major over
/// `(P/tile_p, Q/tile_q, tile_p/vec_p, tile_q/vec_q, vec_q/2, vec_p)`, one
/// byte holding two g-bit values as `low | (high << g)`.
#[derive(Debug, Clone)]
pub struct PackedWeights {
    pub data: Vec<u8>,
    pub m: usize,
    pub k: usize,
    pub params: TilingParams,
}

impl PackedWeights {
    /// Number of M-tiles.
    #[inline(always)]
    pub fn tiles(&self) -> usize {
        self.params.p(self.m) / self.params.tile_p
    }

    /// Packed bytes per M-tile.
    #[inline(always)]
    pub fn tile_bytes(&self) -> usize {
        self.params.tile_p * self.params.q(self.k) * self.params.g / 8
    }

    /// Packed bytes of one M-tile.
    #[inline(always)]
    pub fn tile(&self, index: usize) -> &[u8] {
        let len = self.tile_bytes();
        &self.data[index * len..(index + 1) * len]
    }
}

/// Packed scale buffer, wire format for downstream kernels.
#[derive(Debug, Clone, PartialEq)]
pub enum PackedScales {
    /// Grouped regime: row-major over
    /// `(P/tile_p, Q/tile_q, tile_m/vec_p, tile_q/q_group_size[, 2], vec_p)`,
    /// the extra pair plane present when zero points are folded in as
    /// `zero*2 + 1`.
    Grouped { data: Vec<f16>, has_zeros: bool },
    /// Global regime: flat f16 set, zero-padded to one full lane (VLEN
    /// bytes).
    Global { data: Vec<f16> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate_for_reference_shape() {
        let params = TilingParams::default();
        assert!(params.validate_pack(1536, 1024).is_ok());
        assert!(params.validate_decode(1536, 1024).is_ok());
        assert!(params.validate_grouped_scales(1024).is_ok());
    }

    #[test]
    fn pack_rejects_small_and_misaligned_m() {
        let params = TilingParams::default();
        assert!(matches!(
            params.validate_pack(64, 1024),
            Err(CodecError::Shape(_))
        ));
        assert!(matches!(
            params.validate_pack(192, 1024),
            Err(CodecError::Shape(_))
        ));
    }

    #[test]
    fn pack_rejects_group_widths_that_do_not_fill_a_byte() {
        for g in [0usize, 1, 2, 3, 5, 8] {
            let params = TilingParams {
                g,
                ..TilingParams::default()
            };
            assert!(
                matches!(params.validate_pack(1536, 1024), Err(CodecError::Shape(_))),
                "g {g} accepted"
            );
        }
    }

    #[test]
    fn decode_rejects_non_4bit() {
        let params = TilingParams {
            bits: 2,
            tile_p: 256,
            ..TilingParams::default()
        };
        assert!(params.validate_pack(128, 1024).is_ok());
        assert!(matches!(
            params.validate_decode(128, 1024),
            Err(CodecError::Domain(_))
        ));
    }

    #[test]
    fn scales_regime_selected_by_element_count() {
        let m = 128;
        let k = 256;
        let grouped = Scales::from_raw(vec![f16::ONE; m * 2], None, m, k).unwrap();
        assert!(matches!(grouped, Scales::Grouped { k_groups: 2, .. }));

        let global = Scales::from_raw(vec![f16::from_f32(0.5)], None, m, k).unwrap();
        assert!(matches!(global, Scales::Global { .. }));
        assert_eq!(global.scale_at(7, 1), f16::from_f32(0.5));
    }

    #[test]
    fn global_regime_rejects_zero_points() {
        let err = Scales::from_raw(vec![f16::ONE], Some(vec![f16::ONE]), 128, 256);
        assert!(matches!(err, Err(CodecError::Domain(_))));
    }
}
