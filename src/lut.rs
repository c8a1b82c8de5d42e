//! Lookup-table construction for the decode path.
//!
//! Two tables are built once per configuration and passed into the decoder
//! explicitly:
//!
//! - [`BitSpreadLut`]: per bit-plane, maps a 4-bit value to a 16-bit word
//!   with each of the four bits relocated to its own nibble slot and
//!   pre-shifted into the plane's position, so plane contributions can be
//!   OR-combined without cross-lane interference.
//! - [`DequantLut`]: per output M-tile, 16-entry f16 sub-tables mapping a
//!   reconstructed 4-bit code directly to `code * scale`, addressed by
//!   (k-group, row-quad) with affine arithmetic.

use half::f16;

use crate::error::{CodecError, CodecResult};
use crate::types::{Scales, TilingParams};

/// Nibble sub-table entries per (k-group, row-quad) chunk: 4 rows x 16
/// codes.
pub const DEQUANT_CHUNK: usize = 64;

/// Bit-plane spread tables, one 16-entry table per plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSpreadLut {
    tables: Vec<[u16; 16]>,
}

impl BitSpreadLut {
    /// Build spread tables for `bits` planes.
    ///
    /// Entry `v` of plane `b` is `spread(v) << b` where `spread` relocates
    /// bit i of `v` to bit position `4*i`:
    ///
    /// ```text
    /// plane 2:  0b1011 -> 0001 0000 0100 0100
    /// ```
    pub fn new(bits: usize) -> Self {
        let mut tables = Vec::with_capacity(bits);
        for b in 0..bits {
            let mut table = [0u16; 16];
            for (v, entry) in table.iter_mut().enumerate() {
                let v = v as u16;
                let spread =
                    (v & 0b0001) | (v & 0b0010) << 3 | (v & 0b0100) << 6 | (v & 0b1000) << 9;
                *entry = spread << b;
            }
            tables.push(table);
        }
        Self { tables }
    }

    /// Number of bit planes.
    #[inline(always)]
    pub fn bits(&self) -> usize {
        self.tables.len()
    }

    /// Spread table for one bit plane.
    #[inline(always)]
    pub fn plane(&self, b: usize) -> &[u16; 16] {
        &self.tables[b]
    }
}

/// Per-M-tile dequantization tables baking the scale multiply.
///
/// Each tile holds `(K/group_size) * (tile_m/4)` chunks of
/// [`DEQUANT_CHUNK`] f16 entries, k-group-major: chunk `(kg, rq)` carries
/// four 16-entry sub-tables, one per row of row-quad `rq`, with entry `c`
/// equal to `c * scale[row, kg]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DequantLut {
    data: Vec<f16>,
    pub m: usize,
    pub k: usize,
    pub params: TilingParams,
}

impl DequantLut {
    /// Build the dequantization table for an M×K matrix under `params`,
    /// broadcasting scales per the regime carried by `scales`.
    pub fn build(
        scales: &Scales,
        params: &TilingParams,
        m: usize,
        k: usize,
    ) -> CodecResult<Self> {
        params.validate_decode(m, k)?;
        if let Scales::Grouped {
            rows, k_groups, ..
        } = scales
        {
            if *rows != m {
                return Err(CodecError::Shape(format!(
                    "scale tensor rows {} do not match M {}",
                    rows, m
                )));
            }
            if *k_groups != k / params.group_size {
                return Err(CodecError::Shape(format!(
                    "scale tensor has {} K-groups, expected {}",
                    k_groups,
                    k / params.group_size
                )));
            }
        }

        let tile_m = params.tile_m();
        let tiles = params.p(m) / params.tile_p;
        let k_groups = k / params.group_size;
        let mut data = Vec::with_capacity(tiles * k_groups * (tile_m / 4) * DEQUANT_CHUNK);

        for tile in 0..tiles {
            let row_base = tile * tile_m;
            for kg in 0..k_groups {
                for rq in 0..tile_m / 4 {
                    for j in 0..4 {
                        let scale = scales.scale_at(row_base + rq * 4 + j, kg).to_f32();
                        for code in 0..16 {
                            data.push(f16::from_f32(code as f32 * scale));
                        }
                    }
                }
            }
        }

        Ok(Self {
            data,
            m,
            k,
            params: *params,
        })
    }

    /// f16 entries per M-tile.
    #[inline(always)]
    pub fn tile_len(&self) -> usize {
        (self.k / self.params.group_size) * (self.params.tile_m() / 4) * DEQUANT_CHUNK
    }

    /// Table slice for one M-tile.
    #[inline(always)]
    pub fn tile(&self, index: usize) -> &[f16] {
        let len = self.tile_len();
        &self.data[index * len..(index + 1) * len]
    }
}
