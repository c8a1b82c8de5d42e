//! Weight and scale packing (the encoder side of the codec).
//!
//! [`pack_weights`] bit-slices, tiles and lane-interleaves a matrix of
//! low-bit codes into the layout the vectorized decoder consumes;
//! [`pack_scales`] retiles the scale tensor to match. Both are pure
//! functions: identical inputs produce identical buffers, and every
//! validation failure aborts before any output byte is written.

use half::f16;

use crate::error::{CodecError, CodecResult};
use crate::lane::VLEN;
use crate::types::{PackedScales, PackedWeights, QuantizedMatrix, Scales, TilingParams};

/// Pack an M×K matrix of `bits`-wide codes into the tiled, bit-sliced,
/// lane-interleaved wire layout.
///
/// Conceptually four passes: bit-slice into planes, regroup every `g`
/// K positions into one lane element, interleave bit planes across lane
/// quarters, then tile and pack element pairs into bytes. The middle two
/// are pure index permutations, so they are fused into the final placement
/// loop.
pub fn pack_weights(
    weights: &QuantizedMatrix,
    params: &TilingParams,
) -> CodecResult<PackedWeights> {
    let (m, k) = (weights.rows, weights.cols);
    params.validate_pack(m, k)?;
    if weights.data.len() != m * k {
        return Err(CodecError::Shape(format!(
            "weight buffer of {} bytes does not match {}x{}",
            weights.data.len(),
            m,
            k
        )));
    }
    let limit = 1u16 << params.bits;
    if let Some(pos) = weights.data.iter().position(|&c| (c as u16) >= limit) {
        return Err(CodecError::Domain(format!(
            "code {} at ({}, {}) exceeds {}-bit range",
            weights.data[pos],
            pos / k,
            pos % k,
            params.bits
        )));
    }

    let bits = params.bits;
    let g = params.g;
    let q = params.q(k);

    // Pass 1: bit-slice and regroup. planes[(row*bits + b)*q + qi] holds the
    // g single bits of plane b for K positions qi*g .. qi*g+g, one bit per
    // sub-lane position.
    let mut planes = vec![0u8; m * bits * q];
    for row in 0..m {
        for qi in 0..q {
            for ig in 0..g {
                let code = weights.code_at(row, qi * g + ig);
                for b in 0..bits {
                    planes[(row * bits + b) * q + qi] |= ((code >> b) & 1) << ig;
                }
            }
        }
    }

    // Pass 2: bit-plane interleave + tiling + pair packing, expressed as one
    // placement loop over the output coordinates
    // (tp, tq, vp, vq, j, lane).
    let vec_c = params.vec_p / 4;
    let p_tiles = params.p(m) / params.tile_p;
    let q_tiles = q / params.tile_q;
    let vp_per_tile = params.tile_p / params.vec_p;
    let vq_per_tile = params.tile_q / params.vec_q;
    let pairs = params.vec_q / 2;

    let mut data = vec![0u8; params.packed_len(m, k)];
    let mut out = 0;
    for tp in 0..p_tiles {
        for tq in 0..q_tiles {
            for vp in 0..vp_per_tile {
                // Each vec_p chunk of P carries one (row block, bit plane).
                let chunk = tp * vp_per_tile + vp;
                let row_block = chunk / bits;
                let b = chunk % bits;
                for vq in 0..vq_per_tile {
                    for j in 0..pairs {
                        let q0 = tq * params.tile_q + vq * params.vec_q + 2 * j;
                        for lane in 0..params.vec_p {
                            // Quarter interleave: even lane positions draw
                            // from quarters 0/1, odd from quarters 2/3; the
                            // byte-half a lane lands in selects between the
                            // pair.
                            let half = lane / (2 * vec_c);
                            let c = (lane % (2 * vec_c)) / 2;
                            let parity = lane % 2;
                            let src_lane = parity * 2 * vec_c + half * vec_c + c;

                            let row = row_block * params.vec_p + src_lane;
                            let base = (row * bits + b) * q + q0;
                            data[out] = planes[base] | (planes[base + 1] << g);
                            out += 1;
                        }
                    }
                }
            }
        }
    }
    debug_assert_eq!(out, data.len());

    Ok(PackedWeights {
        data,
        m,
        k,
        params: *params,
    })
}

/// Pack a scale tensor into the wire layout matching [`pack_weights`].
///
/// Grouped regime: scales (and optional zero points) are retiled to the
/// weight tile/vector layout; a zero point z is folded algebraically as
/// `z*2 + 1` so that downstream reconstruction of the form
/// `(code*gs + z'*lowbit)*s` reproduces `code*s + z*s*2*lowbit`. Global
/// regime: the flat set is zero-padded to one full lane.
pub fn pack_scales(
    scales: &Scales,
    params: &TilingParams,
    m: usize,
    k: usize,
) -> CodecResult<PackedScales> {
    match scales {
        Scales::Grouped {
            data,
            rows,
            k_groups,
            zeros,
        } => {
            log::debug!("packing grouped scales: {} rows, {} K-groups", rows, k_groups);
            params.validate_grouped_scales(k)?;
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

            let tile_m = params.tile_m();
            let p_tiles = params.p(m) / params.tile_p;
            let q_tiles = params.q(k) / params.tile_q;
            let mv_per_tile = tile_m / params.vec_p;
            let qg_per_tile = params.tile_q / params.q_group_size();
            let planes = if zeros.is_some() { 2 } else { 1 };

            let mut out = Vec::with_capacity(
                p_tiles * q_tiles * mv_per_tile * qg_per_tile * planes * params.vec_p,
            );
            for tp in 0..p_tiles {
                for tq in 0..q_tiles {
                    for mv in 0..mv_per_tile {
                        for qg in 0..qg_per_tile {
                            let col = tq * qg_per_tile + qg;
                            for ml in 0..params.vec_p {
                                let row = tp * tile_m + mv * params.vec_p + ml;
                                out.push(data[row * k_groups + col]);
                            }
                            if let Some(zeros) = zeros {
                                for ml in 0..params.vec_p {
                                    let row = tp * tile_m + mv * params.vec_p + ml;
                                    let z = zeros[row * k_groups + col].to_f32();
                                    out.push(f16::from_f32(z * 2.0 + 1.0));
                                }
                            }
                        }
                    }
                }
            }

            Ok(PackedScales::Grouped {
                data: out,
                has_zeros: zeros.is_some(),
            })
        }
        Scales::Global { data } => {
            log::debug!("packing global scales: {} elements", data.len());
            let mut out = data.clone();
            // Pad to one full lane; shorter DMA transfers fault downstream.
            if out.len() * 2 < VLEN {
                out.resize(VLEN / 2, f16::ZERO);
            }
            Ok(PackedScales::Global { data: out })
        }
    }
}
