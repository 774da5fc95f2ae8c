//! The binary image layout (`§6.3`): a small preamble of 8-byte "longs"
//! followed by the H-region items then the R-region items, encoded with
//! a caller-supplied [`SerDe`].
//!
//! ```text
//! long 0: pre_longs(u8) | ser_ver(u8) | family_id(u8) | flags(u8) | k(i32)
//! long 1 (pre_longs >= 2): h_count(i32) | r_count(i32)
//! long 2 (pre_longs == 3): total_wt_r(f64)
//! h_count individual weights (f64 each); the M region is never
//! serialized, and R-region items share one implicit weight
//! (total_wt_r / r_count) recovered from the preamble, so only H needs
//! per-item weights on disk.
//! payload: h_count items, then r_count items
//! ```

use rand::RngCore;
use rand::rngs::StdRng;

use crate::error::SketchError;
use crate::serde::{ByteCursor, SerDe};
use crate::sketch::Sketch;

const SER_VER: u8 = 1;
const FAMILY_ID: u8 = 0x56; // 'V', for VarOpt

const FLAG_HAS_R: u8 = 0b0000_0001;
const RESIZE_FACTOR_SHIFT: u8 = 1;
const RESIZE_FACTOR_MASK: u8 = 0b0000_0110;

/// Serializes `sketch` to its binary image. `T` must be `Clone` because
/// the paired item/weight buffer doesn't expose a contiguous `&[T]`
/// (only `Option<T>` slots), so the live items are first cloned out into
/// a plain `Vec<T>` for the `SerDe` call.
pub fn to_bytes<T, R, S>(sketch: &Sketch<T, R>, serde: &S) -> Vec<u8>
where
    T: Clone,
    R: RngCore,
    S: SerDe<T>,
{
    let h = sketch.h();
    let r = sketch.r();
    debug_assert_eq!(sketch.m(), 0, "serialization only happens at rest");

    let pre_longs: u8 = if r > 0 {
        3
    } else if h > 0 {
        2
    } else {
        1
    };

    let mut flags = (sketch.resize_factor_log2() << RESIZE_FACTOR_SHIFT) & RESIZE_FACTOR_MASK;
    if r > 0 {
        flags |= FLAG_HAS_R;
    }

    let mut cursor = ByteCursor::with_capacity(64);
    cursor.write_u8(pre_longs);
    cursor.write_u8(SER_VER);
    cursor.write_u8(FAMILY_ID);
    cursor.write_u8(flags);
    cursor.write_i32(sketch.k() as i32);

    if pre_longs >= 2 {
        cursor.write_i32(h as i32);
        cursor.write_i32(r as i32);
    }
    if pre_longs == 3 {
        cursor.write_f64(sketch.total_wt_r());
    }

    let buf = sketch.buf();
    let mut h_items = Vec::with_capacity(h);
    for i in 0..h {
        cursor.write_f64(buf.get_weight(i));
        h_items.push(
            buf.get_item(i)
                .expect("H-region slots are always populated at rest")
                .clone(),
        );
    }
    let mut r_items = Vec::with_capacity(r);
    for i in h..(h + r) {
        r_items.push(
            buf.get_item(i)
                .expect("R-region slots are always populated at rest")
                .clone(),
        );
    }

    cursor.write_bytes(&serde.serialize(&h_items));
    cursor.write_bytes(&serde.serialize(&r_items));
    cursor.into_vec()
}

/// Parses a binary image produced by [`to_bytes`] back into a sketch.
/// The rebuilt sketch is driven by a freshly OS-seeded RNG (see
/// [`Sketch::from_raw_parts`](crate::sketch::Sketch)'s doc comment).
pub fn from_bytes<T, S>(bytes: &[u8], serde: &S) -> Result<Sketch<T, StdRng>, SketchError>
where
    S: SerDe<T>,
{
    let mut cursor = ByteCursor::from_slice(bytes);

    let pre_longs = cursor.read_u8()?;
    let ser_ver = cursor.read_u8()?;
    if ser_ver != SER_VER {
        return Err(SketchError::UnsupportedVersion { found: ser_ver, expected: SER_VER });
    }
    let family_id = cursor.read_u8()?;
    if family_id != FAMILY_ID {
        return Err(SketchError::Corruption(format!(
            "unrecognized family id {family_id:#x}, expected {FAMILY_ID:#x}"
        )));
    }
    let flags = cursor.read_u8()?;
    let resize_factor_log2 = (flags & RESIZE_FACTOR_MASK) >> RESIZE_FACTOR_SHIFT;
    let has_r = flags & FLAG_HAS_R != 0;

    let k = cursor.read_i32()?;
    if k < 2 {
        return Err(SketchError::Corruption(format!("k={k} out of range")));
    }
    let k = k as usize;

    let (h_count, r_count) = match pre_longs {
        1 => (0usize, 0usize),
        2 | 3 => {
            let h = cursor.read_i32()?;
            let r = cursor.read_i32()?;
            if h < 0 || r < 0 {
                return Err(SketchError::Corruption(format!(
                    "negative region count: h={h} r={r}"
                )));
            }
            (h as usize, r as usize)
        }
        other => {
            return Err(SketchError::Corruption(format!(
                "pre_longs must be 1, 2, or 3, got {other}"
            )));
        }
    };

    if pre_longs == 3 && r_count == 0 {
        return Err(SketchError::Corruption(
            "pre_longs=3 requires a nonempty R region".to_string(),
        ));
    }
    if has_r != (pre_longs == 3) {
        return Err(SketchError::Corruption(
            "has-R flag disagrees with pre_longs".to_string(),
        ));
    }

    let total_wt_r = if pre_longs == 3 { cursor.read_f64()? } else { 0.0 };

    let mut h_weights = Vec::with_capacity(h_count);
    for _ in 0..h_count {
        h_weights.push(cursor.read_f64()?);
    }

    let remaining = cursor.remaining();
    let h_items = serde.deserialize(remaining, h_count)?;
    let h_bytes_consumed = estimate_consumed(serde, &h_items);
    let r_bytes = remaining
        .get(h_bytes_consumed..)
        .ok_or_else(|| SketchError::Corruption("truncated R-region payload".to_string()))?;
    let r_items = serde.deserialize(r_bytes, r_count)?;

    Ok(Sketch::from_raw_parts(k, resize_factor_log2, h_items, h_weights, r_items, total_wt_r))
}

/// `SerDe` doesn't report how many bytes a decode consumed, only what it
/// produced. Since every `SerDe` in this crate is fixed-width per item,
/// re-serializing the decoded prefix recovers the boundary without
/// requiring every implementor to additionally track a cursor position.
fn estimate_consumed<T, S: SerDe<T>>(serde: &S, items: &[T]) -> usize {
    serde.serialize(items).len()
}
