//! Element-wise conversion between [`DType`]s (§4.C `convert`/`convertComplex`).
//!
//! Rather than enumerate every `(src, dst)` pair by hand, scalars are read
//! into one intermediate representation (`Scalar`) and written back out;
//! this still implements the documented per-pair rules (integer saturation,
//! round-to-nearest-even for float-to-integer, real/imag handling for
//! complex) for every width the catalog in [`crate::dtype`] knows about.

use crate::dtype::DType;

#[derive(Clone, Copy)]
enum Scalar {
    Int(i128),
    Float(f64),
}

fn read_scalar(bytes: &[u8], is_float: bool, signed: bool) -> Scalar {
    if is_float {
        let v = match bytes.len() {
            4 => f32::from_le_bytes(bytes.try_into().unwrap()) as f64,
            8 => f64::from_le_bytes(bytes.try_into().unwrap()),
            _ => unreachable!("unsupported float width"),
        };
        Scalar::Float(v)
    } else {
        let mut buf = [0u8; 16];
        buf[..bytes.len()].copy_from_slice(bytes);
        let unsigned = u128::from_le_bytes(buf);
        let v = if signed {
            // sign-extend from the scalar's own width.
            let bits = bytes.len() * 8;
            let shift = 128 - bits;
            ((unsigned << shift) as i128) >> shift
        } else {
            unsigned as i128
        };
        Scalar::Int(v)
    }
}

fn write_scalar(value: Scalar, out: &mut [u8], is_float: bool, signed: bool) {
    if is_float {
        let v = match value {
            Scalar::Float(f) => f,
            Scalar::Int(i) => i as f64,
        };
        match out.len() {
            4 => out.copy_from_slice(&(v as f32).to_le_bytes()),
            8 => out.copy_from_slice(&v.to_le_bytes()),
            _ => unreachable!("unsupported float width"),
        }
    } else {
        let bits = out.len() * 8;
        let i = match value {
            Scalar::Int(i) => i,
            // float-to-integer rounds to nearest, ties to even.
            Scalar::Float(f) => round_ties_even(f) as i128,
        };
        let clamped = saturate(i, bits, signed);
        let bytes = clamped.to_le_bytes();
        out.copy_from_slice(&bytes[..out.len()]);
    }
}

fn round_ties_even(f: f64) -> f64 {
    // `f64::round_ties_even` stabilized in 1.77; reimplemented for clarity
    // and to avoid depending on a specific toolchain patch version.
    let floor = f.floor();
    let diff = f - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn saturate(value: i128, bits: usize, signed: bool) -> i128 {
    if signed {
        let max = (1i128 << (bits - 1)) - 1;
        let min = -(1i128 << (bits - 1));
        value.clamp(min, max)
    } else {
        let max = (1i128 << bits) - 1;
        value.clamp(0, max)
    }
}

/// Converts `n_elements` elements of `src` (each `src_dtype.size()` bytes,
/// with `src_dtype.dimension()` scalar lanes, possibly complex) into `dst`,
/// which must already be sized for `n_elements * dst_dtype.size()` bytes.
///
/// Complex-to-real takes the real (first) lane; real-to-complex sets the
/// imaginary lane to zero.
pub fn convert_elements(src: &[u8], src_dtype: &DType, dst: &mut [u8], dst_dtype: &DType, n_elements: usize) {
    let src_lanes = src_dtype.dimension() * if src_dtype.is_complex() { 2 } else { 1 };
    let dst_lanes = dst_dtype.dimension() * if dst_dtype.is_complex() { 2 } else { 1 };
    let lanes = src_lanes.min(dst_lanes);

    let src_scalar = src_dtype.scalar_size();
    let dst_scalar = dst_dtype.scalar_size();
    let src_stride = src_dtype.size();
    let dst_stride = dst_dtype.size();

    for elem in 0..n_elements {
        let src_base = elem * src_stride;
        let dst_base = elem * dst_stride;
        for lane in 0..lanes {
            let s = &src[src_base + lane * src_scalar..src_base + (lane + 1) * src_scalar];
            let value = read_scalar(s, src_dtype.is_float(), src_dtype.is_signed());
            let d = &mut dst[dst_base + lane * dst_scalar..dst_base + (lane + 1) * dst_scalar];
            write_scalar(value, d, dst_dtype.is_float(), dst_dtype.is_signed());
        }
        // real-to-complex: zero the imaginary lane the source didn't have.
        if dst_dtype.is_complex() && !src_dtype.is_complex() {
            let d = &mut dst[dst_base + dst_scalar..dst_base + 2 * dst_scalar];
            d.fill(0);
        }
    }
}

/// Splits interleaved complex elements of `src` into separate real and
/// imaginary buffers (§4.C `convertComplex`).
pub fn split_complex(src: &[u8], dtype: &DType, n_elements: usize, real: &mut [u8], imag: &mut [u8]) {
    assert!(dtype.is_complex(), "split_complex requires a complex dtype");
    let scalar = dtype.scalar_size();
    let dims = dtype.dimension();
    let stride = dtype.size();
    for elem in 0..n_elements {
        let base = elem * stride;
        for d in 0..dims {
            let re_src = base + (2 * d) * scalar;
            let im_src = base + (2 * d + 1) * scalar;
            let out_base = (elem * dims + d) * scalar;
            real[out_base..out_base + scalar].copy_from_slice(&src[re_src..re_src + scalar]);
            imag[out_base..out_base + scalar].copy_from_slice(&src[im_src..im_src + scalar]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_to_float32_and_back() {
        let i = DType::from_alias("int32", 1).unwrap();
        let f = DType::from_alias("float32", 1).unwrap();
        let src = 42i32.to_le_bytes();
        let mut mid = vec![0u8; 4];
        convert_elements(&src, &i, &mut mid, &f, 1);
        assert_eq!(f32::from_le_bytes(mid.clone().try_into().unwrap()), 42.0f32);

        let mut back = vec![0u8; 4];
        convert_elements(&mid, &f, &mut back, &i, 1);
        assert_eq!(i32::from_le_bytes(back.try_into().unwrap()), 42);
    }

    #[test]
    fn saturates_on_narrowing() {
        let i32t = DType::from_alias("int32", 1).unwrap();
        let i8t = DType::from_alias("int8", 1).unwrap();
        let src = 1000i32.to_le_bytes();
        let mut dst = vec![0u8; 1];
        convert_elements(&src, &i32t, &mut dst, &i8t, 1);
        assert_eq!(dst[0] as i8, 127);
    }

    #[test]
    fn real_to_complex_zeroes_imag() {
        let f = DType::from_alias("float32", 1).unwrap();
        let c = DType::from_alias("complex_float32", 1).unwrap();
        let src = 1.5f32.to_le_bytes();
        let mut dst = vec![0u8; 8];
        convert_elements(&src, &f, &mut dst, &c, 1);
        assert_eq!(f32::from_le_bytes(dst[0..4].try_into().unwrap()), 1.5);
        assert_eq!(f32::from_le_bytes(dst[4..8].try_into().unwrap()), 0.0);
    }

    #[test]
    fn complex_to_real_takes_real_part() {
        let c = DType::from_alias("complex_float32", 1).unwrap();
        let f = DType::from_alias("float32", 1).unwrap();
        let mut src = Vec::new();
        src.extend_from_slice(&2.5f32.to_le_bytes());
        src.extend_from_slice(&9.0f32.to_le_bytes());
        let mut dst = vec![0u8; 4];
        convert_elements(&src, &c, &mut dst, &f, 1);
        assert_eq!(f32::from_le_bytes(dst.try_into().unwrap()), 2.5);
    }

    #[test]
    fn split_complex_separates_lanes() {
        let c = DType::from_alias("complex_int16", 1).unwrap();
        let mut src = Vec::new();
        src.extend_from_slice(&1i16.to_le_bytes());
        src.extend_from_slice(&2i16.to_le_bytes());
        src.extend_from_slice(&3i16.to_le_bytes());
        src.extend_from_slice(&4i16.to_le_bytes());
        let mut real = vec![0u8; 4];
        let mut imag = vec![0u8; 4];
        split_complex(&src, &c, 2, &mut real, &mut imag);
        assert_eq!(i16::from_le_bytes(real[0..2].try_into().unwrap()), 1);
        assert_eq!(i16::from_le_bytes(imag[0..2].try_into().unwrap()), 2);
        assert_eq!(i16::from_le_bytes(real[2..4].try_into().unwrap()), 3);
        assert_eq!(i16::from_le_bytes(imag[2..4].try_into().unwrap()), 4);
    }
}
