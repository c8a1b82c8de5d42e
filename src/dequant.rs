//! LUT-driven dequantization kernel (the decoder side of the codec).
//!
//! Runs per output M-tile in three stages: bit-plane restoration through the
//! spread tables, a butterfly lane transpose, and the final table gather
//! that maps reconstructed 4-bit codes straight to scaled f16 values. Tiles
//! own disjoint output regions and read disjoint input regions, so they run
//! on the rayon pool with no synchronization.

use half::f16;
use rayon::prelude::*;

use crate::error::{CodecError, CodecResult};
use crate::lane::{deal, gather16, shuffle, Lane, LanePair, VLEN};
use crate::lut::{BitSpreadLut, DequantLut, DEQUANT_CHUNK};
use crate::types::{PackedWeights, TilingParams};

/// Dequantize a packed weight buffer into `out` (row-major M×K f16).
///
/// Both lookup tables must have been built with the same tiling parameters
/// and matrix dimensions as the packer run that produced `packed`; any
/// disagreement is rejected eagerly, before a single output element is
/// written.
pub fn dequantize(
    packed: &PackedWeights,
    spread: &BitSpreadLut,
    lut: &DequantLut,
    out: &mut [f16],
) -> CodecResult<()> {
    let params = &packed.params;
    params.validate_decode(packed.m, packed.k)?;

    if lut.params != *params || lut.m != packed.m || lut.k != packed.k {
        return Err(CodecError::Precondition(format!(
            "dequant LUT built for {}x{} {:?}, packed buffer is {}x{} {:?}",
            lut.m, lut.k, lut.params, packed.m, packed.k, params
        )));
    }
    if spread.bits() != params.bits {
        return Err(CodecError::Precondition(format!(
            "spread LUT covers {} bit planes, expected {}",
            spread.bits(),
            params.bits
        )));
    }
    if packed.data.len() != params.packed_len(packed.m, packed.k) {
        return Err(CodecError::Shape(format!(
            "packed buffer of {} bytes does not match declared {}x{} ({} expected)",
            packed.data.len(),
            packed.m,
            packed.k,
            params.packed_len(packed.m, packed.k)
        )));
    }
    if out.len() != packed.m * packed.k {
        return Err(CodecError::Shape(format!(
            "output buffer of {} elements does not match {}x{}",
            out.len(),
            packed.m,
            packed.k
        )));
    }

    let tiles = packed.tiles();
    let tile_elems = params.tile_m() * packed.k;
    log::debug!(
        "dequantizing {}x{} across {} M-tiles",
        packed.m,
        packed.k,
        tiles
    );
    if tiles == 1 {
        // Single tile: skip the pool.
        dequantize_tile(packed.tile(0), spread, lut.tile(0), out, packed.k, params);
    } else {
        out.par_chunks_mut(tile_elems)
            .enumerate()
            .for_each(|(tile, chunk)| {
                dequantize_tile(
                    packed.tile(tile),
                    spread,
                    lut.tile(tile),
                    chunk,
                    packed.k,
                    params,
                );
            });
    }
    Ok(())
}

/// Decode one M-tile (`tile_m` rows × K columns) from its packed bytes.
///
/// Shape compatibility is the caller's responsibility; every index below is
/// in bounds once `TilingParams::validate_decode` has passed.
fn dequantize_tile(
    w_bits: &[u8],
    spread: &BitSpreadLut,
    lut: &[f16],
    out: &mut [f16],
    k: usize,
    params: &TilingParams,
) {
    let g = params.g;
    let bits = params.bits;
    let q = params.q(k);
    let tile_m = params.tile_m();
    let elem16 = 16 / bits;
    // Rows of output produced by one transpose pass.
    let rows_per_iter = (VLEN / 2) / (params.vec_q * g / elem16);

    let mask = Lane::splat(0x0F);
    // Restored multi-bit codes for one (tile_p, tile_q) tile, u16 lanes.
    let mut wr_buff = vec![0u8; params.tile_p * params.tile_q / elem16 * 2];

    for tile_q_idx in (0..q).step_by(params.tile_q) {
        let w_tile_base = tile_q_idx * params.tile_p * g / 8;

        // Stage A: bit-plane restoration. Each vec_p chunk of the tile holds
        // one bit plane; gather through its spread table and OR the planes
        // together, two bit planes landing per masked-shift step.
        for vq_idx in (0..params.tile_q).step_by(params.vec_q) {
            // Accumulators for the four nibble positions:
            // lo-bottom, lo-top, hi-bottom, hi-top.
            let mut acc = [LanePair::zero(); 4];
            for plane in 0..bits {
                let w_base = w_tile_base
                    + plane * params.vec_p * params.tile_q * g / 8
                    + vq_idx * params.vec_p * g / 8;
                let lo = Lane::load(w_bits, w_base);
                let hi = Lane::load(w_bits, w_base + VLEN);

                let table = spread.plane(plane);
                acc[0] = acc[0].or(&gather16(&lo.and(&mask), table, 0));
                acc[1] = acc[1].or(&gather16(&lo.shr4(), table, 0));
                acc[2] = acc[2].or(&gather16(&hi.and(&mask), table, 0));
                acc[3] = acc[3].or(&gather16(&hi.shr4(), table, 0));
            }

            // Untangle the even/odd vec_p quarter interleave.
            for a in acc.iter_mut() {
                *a = deal(&a.hi, &a.lo, -2);
            }
            let mut w01 = [
                acc[0].lo, acc[1].lo, acc[2].lo, acc[3].lo,
                acc[0].hi, acc[1].hi, acc[2].hi, acc[3].hi,
            ];

            // Butterfly transpose: (2x64, 4) -> (4, 2x64).
            let col = w01.len() / 2;
            let half0 = col / 2;
            for step in 0..col.ilog2() {
                let half = half0 >> step;
                for row in 0..w01.len() / col {
                    for blk in 0..half0 / half {
                        let base = row * col + blk * 2 * half;
                        for i in 0..half {
                            let pair = shuffle(&w01[base + half + i], &w01[base + i], -2);
                            w01[base + i] = pair.lo;
                            w01[base + half + i] = pair.hi;
                        }
                    }
                }
            }

            let wr_tile_base = (vq_idx / params.vec_q) * tile_m * params.vec_q * g / elem16;
            for (i, lane) in w01.iter().enumerate() {
                lane.store(&mut wr_buff, (wr_tile_base + i * VLEN / 2) * 2);
            }
        }

        // Stages B and C: complete the transpose across vec_q groups,
        // unpack nibbles, gather through the dequant tables and store.
        let lanes_per_pass = VLEN / (params.vec_q * g);
        for iter_q in 0..params.tile_q * g / VLEN {
            for iter_p in 0..tile_m / rows_per_iter {
                let iter_base = iter_p * VLEN / 2
                    + iter_q * (tile_m / elem16) * params.vec_q * g * lanes_per_pass;

                let mut wr = [Lane::zero(); 8];
                for (ql, lane) in wr.iter_mut().enumerate() {
                    let base = iter_base + ql * (tile_m / elem16) * params.vec_q * g;
                    *lane = Lane::load(&wr_buff, base * 2);
                }

                // Doubling-stride shuffle network; concatenates adjacent K
                // sub-tiles while transposing to row-contiguous order.
                let w01p = shuffle(&wr[1], &wr[0], -8);
                let w23p = shuffle(&wr[3], &wr[2], -8);
                let w45p = shuffle(&wr[5], &wr[4], -8);
                let w67p = shuffle(&wr[7], &wr[6], -8);

                let q0 = shuffle(&w23p.lo, &w01p.lo, -16);
                let q1 = shuffle(&w23p.hi, &w01p.hi, -16);
                let q2 = shuffle(&w67p.lo, &w45p.lo, -16);
                let q3 = shuffle(&w67p.hi, &w45p.hi, -16);

                let concat = [
                    shuffle(&q2.lo, &q0.lo, -32),
                    shuffle(&q2.hi, &q0.hi, -32),
                    shuffle(&q3.lo, &q1.lo, -32),
                    shuffle(&q3.hi, &q1.hi, -32),
                ];

                let out_tile_base = iter_p * rows_per_iter * k + iter_q * VLEN + tile_q_idx * g;
                let lut_base = iter_p * (lanes_per_pass / 2)
                    + iter_q * (lanes_per_pass / 2) * (tile_m / rows_per_iter)
                    + tile_q_idx * g / params.group_size * (tile_m / 4);

                for (i, pair) in concat.iter().enumerate() {
                    // Unpack packed nibbles back to one code per byte.
                    let p_lo = shuffle(&pair.lo.shr4(), &pair.lo.and(&mask), -1);
                    let p_hi = shuffle(&pair.hi.shr4(), &pair.hi.and(&mask), -1);

                    let mut table = [0u16; DEQUANT_CHUNK];
                    let chunk = &lut[(lut_base + i) * DEQUANT_CHUNK..][..DEQUANT_CHUNK];
                    for (t, v) in table.iter_mut().zip(chunk) {
                        *t = v.to_bits();
                    }

                    let quad = [
                        gather16(&p_lo.lo, &table, 0),
                        gather16(&p_lo.hi, &table, 1),
                        gather16(&p_hi.lo, &table, 2),
                        gather16(&p_hi.hi, &table, 3),
                    ];

                    let mut row_base = out_tile_base + i * k * 4;
                    for d in &quad {
                        store_f16_pair(d, out, row_base);
                        row_base += k;
                    }
                }
            }
        }
    }
}

/// Write a lane pair of f16 bits as VLEN contiguous output elements.
#[inline(always)]
fn store_f16_pair(pair: &LanePair, out: &mut [f16], base: usize) {
    for e in 0..VLEN / 2 {
        out[base + e] = f16::from_bits(pair.lo.u16_at(e));
        out[base + VLEN / 2 + e] = f16::from_bits(pair.hi.u16_at(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::pack_weights;
    use crate::types::{QuantizedMatrix, Scales};

    fn params_128() -> TilingParams {
        TilingParams {
            tile_q: 32,
            ..TilingParams::default()
        }
    }

    #[test]
    fn lone_max_code_decodes_in_place() {
        // Code 15 at (0, 0) with unit scale: 15.0 there, 0.0 everywhere
        // else.
        let params = params_128();
        let (m, k) = (128usize, 128usize);
        let mut w = QuantizedMatrix::zeros(m, k);
        w.set_code(0, 0, 15);

        let scales = Scales::from_raw(vec![f16::ONE; m], None, m, k).unwrap();
        let packed = pack_weights(&w, &params).unwrap();
        let spread = BitSpreadLut::new(params.bits);
        let lut = DequantLut::build(&scales, &params, m, k).unwrap();

        let mut out = vec![f16::ZERO; m * k];
        dequantize(&packed, &spread, &lut, &mut out).unwrap();

        assert_eq!(out[0], f16::from_f32(15.0));
        assert!(out[1..].iter().all(|&v| v == f16::ZERO));
    }

    #[test]
    fn mismatched_lut_params_are_rejected_before_writing() {
        let params = params_128();
        let (m, k) = (128usize, 128usize);
        let w = QuantizedMatrix::zeros(m, k);
        let scales = Scales::from_raw(vec![f16::ONE; m], None, m, k).unwrap();
        let packed = pack_weights(&w, &params).unwrap();
        let spread = BitSpreadLut::new(params.bits);

        // A LUT built for K=256 is itself valid; the mismatch must surface
        // at decode time.
        let other = TilingParams {
            tile_q: 64,
            ..TilingParams::default()
        };
        let wide_scales = Scales::from_raw(vec![f16::ONE; m * 2], None, m, 256).unwrap();
        let lut = DequantLut::build(&wide_scales, &other, m, 256).unwrap();
        let mut out = vec![f16::from_f32(7.0); m * k];
        let err = dequantize(&packed, &spread, &lut, &mut out);
        assert!(matches!(err, Err(CodecError::Precondition(_))));
        assert!(out.iter().all(|&v| v == f16::from_f32(7.0)));
    }

    #[test]
    fn truncated_packed_buffer_is_rejected() {
        let params = params_128();
        let (m, k) = (128usize, 128usize);
        let w = QuantizedMatrix::zeros(m, k);
        let scales = Scales::from_raw(vec![f16::ONE; m], None, m, k).unwrap();
        let mut packed = pack_weights(&w, &params).unwrap();
        packed.data.truncate(packed.data.len() - 1);

        let spread = BitSpreadLut::new(params.bits);
        let lut = DequantLut::build(&scales, &params, m, k).unwrap();
        let mut out = vec![f16::ZERO; m * k];
        assert!(matches!(
            dequantize(&packed, &spread, &lut, &mut out),
            Err(CodecError::Shape(_))
        ));
    }
}
