//! Property-based tests for the codec invariants:
//! - deal/shuffle are mutual inverses at every block stride
//! - gather16 agrees with its scalar model
//! - pack -> dequantize reproduces `f16(code * scale)` bit-exactly

use half::f16;
use proptest::prelude::*;

use lowbit_kernels::{
    deal, dequantize, gather16, pack_weights, shuffle, BitSpreadLut, DequantLut, Lane,
    QuantizedMatrix, Scales, TilingParams, VLEN,
};

fn arb_lane() -> impl Strategy<Value = Lane> {
    prop::collection::vec(any::<u8>(), VLEN).prop_map(|bytes| Lane::load(&bytes, 0))
}

fn arb_stride() -> impl Strategy<Value = i32> {
    prop::sample::select(vec![1i32, 2, 4, 8, 16, 32, 64])
}

proptest! {
    /// shuffle(deal(hi, lo)) is the identity for every block stride.
    #[test]
    fn prop_deal_then_shuffle_is_identity(lo in arb_lane(), hi in arb_lane(), r in arb_stride()) {
        let dealt = deal(&hi, &lo, -r);
        let back = shuffle(&dealt.hi, &dealt.lo, -r);
        prop_assert_eq!(back.lo.as_bytes(), lo.as_bytes());
        prop_assert_eq!(back.hi.as_bytes(), hi.as_bytes());
    }

    /// deal(shuffle(hi, lo)) is also the identity.
    #[test]
    fn prop_shuffle_then_deal_is_identity(lo in arb_lane(), hi in arb_lane(), r in arb_stride()) {
        let shuffled = shuffle(&hi, &lo, -r);
        let back = deal(&shuffled.hi, &shuffled.lo, -r);
        prop_assert_eq!(back.lo.as_bytes(), lo.as_bytes());
        prop_assert_eq!(back.hi.as_bytes(), hi.as_bytes());
    }

    /// gather16 matches the scalar model: each index byte is masked to its
    /// low nibble and selects from the 16-entry sub-table chosen by
    /// `select`.
    #[test]
    fn prop_gather16_matches_scalar_model(
        indices in arb_lane(),
        table in prop::collection::vec(any::<u16>(), 64),
        select in 0usize..4,
    ) {
        let pair = gather16(&indices, &table, select);
        for i in 0..VLEN {
            let expected = table[select * 16 + (indices.as_bytes()[i] & 0xF) as usize];
            let got = if i < VLEN / 2 {
                pair.lo.u16_at(i)
            } else {
                pair.hi.u16_at(i - VLEN / 2)
            };
            prop_assert_eq!(got, expected, "element {}", i);
        }
    }
}

proptest! {
    // Full pack+decode per case; keep the case count down.
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Random codes and per-row scales survive the codec bit-exactly.
    #[test]
    fn prop_codec_roundtrip_is_bit_exact(
        codes in prop::collection::vec(0u8..16, 128 * 128),
        raw in prop::collection::vec(0.01f32..4.0, 128),
    ) {
        let params = TilingParams {
            tile_q: 32,
            ..TilingParams::default()
        };
        let (m, k) = (128usize, 128usize);
        let w = QuantizedMatrix::new(codes, m, k);
        let scales = Scales::from_raw_f32(&raw, None, m, k).unwrap();

        let packed = pack_weights(&w, &params).unwrap();
        let spread = BitSpreadLut::new(params.bits);
        let lut = DequantLut::build(&scales, &params, m, k).unwrap();
        let mut out = vec![f16::ZERO; m * k];
        dequantize(&packed, &spread, &lut, &mut out).unwrap();

        for row in 0..m {
            for col in 0..k {
                let scale = scales.scale_at(row, col / params.group_size).to_f32();
                let expected = f16::from_f32(w.code_at(row, col) as f32 * scale);
                prop_assert_eq!(out[row * k + col], expected, "({}, {})", row, col);
            }
        }
    }
}
