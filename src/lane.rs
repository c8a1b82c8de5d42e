//! Fixed-width vector lane primitives.
//!
//! Everything above this layer touches raw bytes only through these
//! operations: load/store, splat, mask/shift/or, the two block permutations
//! (`deal` / `shuffle`), and the 16-entry table gather. A [`Lane`] models one
//! `VLEN`-byte vector register; a [`LanePair`] models the double-width
//! results the permutation and gather ops produce.

/// Vector register width in bytes.
pub const VLEN: usize = 128;

/// One fixed-width vector of `VLEN` bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    bytes: [u8; VLEN],
}

/// Two lanes produced by a widening or permuting operation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LanePair {
    pub lo: Lane,
    pub hi: Lane,
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lane({:02x?}..)", &self.bytes[..8])
    }
}

impl Lane {
    /// All-zero lane.
    #[inline(always)]
    pub const fn zero() -> Self {
        Self { bytes: [0; VLEN] }
    }

    /// Broadcast one byte to every element.
    #[inline(always)]
    pub const fn splat(value: u8) -> Self {
        Self {
            bytes: [value; VLEN],
        }
    }

    /// Read `VLEN` contiguous bytes starting at `offset`.
    ///
    /// The caller guarantees `offset + VLEN <= buf.len()`; this is a
    /// correctness precondition of the surrounding kernel, validated at the
    /// call boundary, not here.
    #[inline(always)]
    pub fn load(buf: &[u8], offset: usize) -> Self {
        let mut bytes = [0u8; VLEN];
        bytes.copy_from_slice(&buf[offset..offset + VLEN]);
        Self { bytes }
    }

    /// Write the lane to `VLEN` contiguous bytes starting at `offset`.
    #[inline(always)]
    pub fn store(&self, buf: &mut [u8], offset: usize) {
        buf[offset..offset + VLEN].copy_from_slice(&self.bytes);
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; VLEN] {
        &self.bytes
    }

    /// Little-endian u16 element `i` (0..VLEN/2).
    #[inline(always)]
    pub fn u16_at(&self, i: usize) -> u16 {
        u16::from_le_bytes([self.bytes[2 * i], self.bytes[2 * i + 1]])
    }

    /// Set little-endian u16 element `i`.
    #[inline(always)]
    pub fn set_u16(&mut self, i: usize, value: u16) {
        let le = value.to_le_bytes();
        self.bytes[2 * i] = le[0];
        self.bytes[2 * i + 1] = le[1];
    }

    /// Elementwise AND.
    #[inline(always)]
    pub fn and(&self, other: &Lane) -> Lane {
        let mut out = [0u8; VLEN];
        for i in 0..VLEN {
            out[i] = self.bytes[i] & other.bytes[i];
        }
        Lane { bytes: out }
    }

    /// Elementwise OR.
    #[inline(always)]
    pub fn or(&self, other: &Lane) -> Lane {
        let mut out = [0u8; VLEN];
        for i in 0..VLEN {
            out[i] = self.bytes[i] | other.bytes[i];
        }
        Lane { bytes: out }
    }

    /// Per-byte logical shift right by 4 (top-nibble extraction).
    #[inline(always)]
    pub fn shr4(&self) -> Lane {
        let mut out = [0u8; VLEN];
        for i in 0..VLEN {
            out[i] = self.bytes[i] >> 4;
        }
        Lane { bytes: out }
    }
}

impl LanePair {
    #[inline(always)]
    pub const fn zero() -> Self {
        Self {
            lo: Lane::zero(),
            hi: Lane::zero(),
        }
    }

    /// Elementwise OR of both halves.
    #[inline(always)]
    pub fn or(&self, other: &LanePair) -> LanePair {
        LanePair {
            lo: self.lo.or(&other.lo),
            hi: self.hi.or(&other.hi),
        }
    }
}

/// Block de-interleave across a lane pair.
///
/// `lo` followed by `hi` form one contiguous 2*VLEN byte sequence. It is
/// partitioned into |r|-byte blocks; even-position blocks are collected
/// first, odd-position blocks after, preserving intra-block byte order. The
/// sign of `r` is a hardware calling convention, only the magnitude matters.
pub fn deal(hi: &Lane, lo: &Lane, r: i32) -> LanePair {
    let block = r.unsigned_abs() as usize;
    debug_assert!(block > 0 && block <= VLEN && VLEN % block == 0);

    let mut seq = [0u8; 2 * VLEN];
    seq[..VLEN].copy_from_slice(lo.as_bytes());
    seq[VLEN..].copy_from_slice(hi.as_bytes());

    let nblocks = 2 * VLEN / block;
    let mut out = [0u8; 2 * VLEN];
    for i in 0..nblocks {
        let dst = if i % 2 == 0 { i / 2 } else { nblocks / 2 + i / 2 };
        out[dst * block..(dst + 1) * block].copy_from_slice(&seq[i * block..(i + 1) * block]);
    }

    split(&out)
}

/// Block interleave across a lane pair; the exact inverse pattern of
/// [`deal`] at the same |r|.
///
/// Each input lane is partitioned into |r|-byte blocks; for block index i,
/// `lo`'s block i is emitted immediately followed by `hi`'s block i. The
/// interleaved stream is split back into two lanes by position.
pub fn shuffle(hi: &Lane, lo: &Lane, r: i32) -> LanePair {
    let block = r.unsigned_abs() as usize;
    debug_assert!(block > 0 && block <= VLEN && VLEN % block == 0);

    let per_lane = VLEN / block;
    let mut out = [0u8; 2 * VLEN];
    for i in 0..per_lane {
        out[2 * i * block..(2 * i + 1) * block]
            .copy_from_slice(&lo.as_bytes()[i * block..(i + 1) * block]);
        out[(2 * i + 1) * block..(2 * i + 2) * block]
            .copy_from_slice(&hi.as_bytes()[i * block..(i + 1) * block]);
    }

    split(&out)
}

/// Data-parallel 16-entry table gather.
///
/// For each byte element of `indices`, looks up
/// `table[select * 16 + (byte & 0xF)]` and emits the 16-bit result; the
/// first 64 results fill `lo`, the rest `hi`. `table` must hold at least
/// `(select + 1) * 16` entries.
pub fn gather16(indices: &Lane, table: &[u16], select: usize) -> LanePair {
    debug_assert!(table.len() >= (select + 1) * 16);
    let sub = &table[select * 16..select * 16 + 16];
    let mut pair = LanePair::zero();
    for i in 0..VLEN {
        let value = sub[(indices.as_bytes()[i] & 0x0F) as usize];
        if i < VLEN / 2 {
            pair.lo.set_u16(i, value);
        } else {
            pair.hi.set_u16(i - VLEN / 2, value);
        }
    }
    pair
}

#[inline(always)]
fn split(seq: &[u8; 2 * VLEN]) -> LanePair {
    let mut pair = LanePair::zero();
    pair.lo.bytes.copy_from_slice(&seq[..VLEN]);
    pair.hi.bytes.copy_from_slice(&seq[VLEN..]);
    pair
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_lane(start: u8) -> Lane {
        let mut bytes = [0u8; VLEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = start.wrapping_add(i as u8);
        }
        Lane { bytes }
    }

    #[test]
    fn shuffle_interleaves_bytes() {
        let lo = Lane::splat(0xAA);
        let hi = Lane::splat(0xBB);
        let pair = shuffle(&hi, &lo, -1);
        for i in 0..VLEN {
            let expected = if i % 2 == 0 { 0xAA } else { 0xBB };
            assert_eq!(pair.lo.as_bytes()[i], expected);
            assert_eq!(pair.hi.as_bytes()[i], expected);
        }
    }

    #[test]
    fn deal_separates_even_odd_halfwords() {
        // lo = h0 h1 h2 ... h63, hi = h64 ... h127 (u16 elements)
        let mut lo = Lane::zero();
        let mut hi = Lane::zero();
        for i in 0..VLEN / 2 {
            lo.set_u16(i, i as u16);
            hi.set_u16(i, (VLEN / 2 + i) as u16);
        }
        let pair = deal(&hi, &lo, -2);
        for i in 0..VLEN / 2 {
            assert_eq!(pair.lo.u16_at(i), 2 * i as u16);
            assert_eq!(pair.hi.u16_at(i), 2 * i as u16 + 1);
        }
    }

    #[test]
    fn deal_inverts_shuffle_at_every_stride() {
        let a = counting_lane(0);
        let b = counting_lane(97);
        for r in [-1i32, -2, -4, -8, -16, -32, -64] {
            let shuffled = shuffle(&a, &b, r);
            let restored = deal(&shuffled.hi, &shuffled.lo, r);
            assert_eq!(restored.lo, b, "stride {r}");
            assert_eq!(restored.hi, a, "stride {r}");
        }
    }

    #[test]
    fn shuffle_inverts_deal_at_every_stride() {
        let a = counting_lane(13);
        let b = counting_lane(211);
        for r in [-1i32, -2, -4, -8, -16, -32, -64] {
            let dealt = deal(&a, &b, r);
            let restored = shuffle(&dealt.hi, &dealt.lo, r);
            assert_eq!(restored.lo, b, "stride {r}");
            assert_eq!(restored.hi, a, "stride {r}");
        }
    }

    #[test]
    fn gather16_masks_indices_and_selects_subtable() {
        let mut table = [0u16; 64];
        for (i, t) in table.iter_mut().enumerate() {
            *t = (i * 3) as u16;
        }
        let indices = counting_lane(0); // bytes 0..128, masked to 0..16
        let pair = gather16(&indices, &table, 2);
        for i in 0..VLEN {
            let expected = table[32 + (i & 0xF)];
            let got = if i < VLEN / 2 {
                pair.lo.u16_at(i)
            } else {
                pair.hi.u16_at(i - VLEN / 2)
            };
            assert_eq!(got, expected, "element {i}");
        }
    }

    #[test]
    fn shr4_extracts_top_nibbles() {
        let lane = Lane::splat(0xD7);
        let shifted = lane.shr4();
        assert!(shifted.as_bytes().iter().all(|&b| b == 0x0D));
    }
}
