//! Fixed-width values read from and written to remote memory.
//!
//! Everything is little-endian with no padding, matching the target's
//! in-memory layout.

use std::mem::size_of;

/// A value with a fixed little-endian encoding.
pub trait RemoteValue: Sized + Default {
    const SIZE: usize;

    /// Decode from `bytes[..Self::SIZE]`.
    fn from_le(bytes: &[u8]) -> Self;

    fn to_le(&self) -> Vec<u8>;
}

macro_rules! impl_remote_primitive {
    ($($t:ty),* $(,)?) => {$(
        impl RemoteValue for $t {
            const SIZE: usize = size_of::<$t>();

            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(raw)
            }

            fn to_le(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
        }
    )*};
}

impl_remote_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

fn floats<const N: usize>(bytes: &[u8]) -> [f32; N] {
    let mut out = [0f32; N];
    for (i, v) in out.iter_mut().enumerate() {
        *v = <f32 as RemoteValue>::from_le(&bytes[i * 4..]);
    }
    out
}

fn float_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl RemoteValue for Vec2 {
    const SIZE: usize = 8;

    fn from_le(bytes: &[u8]) -> Self {
        let [x, y] = floats(bytes);
        Self { x, y }
    }

    fn to_le(&self) -> Vec<u8> {
        float_bytes(&[self.x, self.y])
    }
}

impl RemoteValue for Vec3 {
    const SIZE: usize = 12;

    fn from_le(bytes: &[u8]) -> Self {
        let [x, y, z] = floats(bytes);
        Self { x, y, z }
    }

    fn to_le(&self) -> Vec<u8> {
        float_bytes(&[self.x, self.y, self.z])
    }
}

impl RemoteValue for Vec4 {
    const SIZE: usize = 16;

    fn from_le(bytes: &[u8]) -> Self {
        let [x, y, z, w] = floats(bytes);
        Self { x, y, z, w }
    }

    fn to_le(&self) -> Vec<u8> {
        float_bytes(&[self.x, self.y, self.z, self.w])
    }
}

/// Row-major 4×4 float matrix (`m[row][col]`, rows stored one after another).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Matrix4 {
    pub m: [[f32; 4]; 4],
}

impl Matrix4 {
    pub fn transpose(&self) -> Self {
        let mut m = [[0f32; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.m[c][r];
            }
        }
        Self { m }
    }
}

impl RemoteValue for Matrix4 {
    const SIZE: usize = 64;

    fn from_le(bytes: &[u8]) -> Self {
        let flat: [f32; 16] = floats(bytes);
        let mut m = [[0f32; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            row.copy_from_slice(&flat[r * 4..r * 4 + 4]);
        }
        Self { m }
    }

    fn to_le(&self) -> Vec<u8> {
        float_bytes(self.m.as_flattened())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        assert_eq!(RemoteValue::to_le(&0x1234_5678u32), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(<i16 as RemoteValue>::from_le(&[0xFE, 0xFF]), -2);
        assert_eq!(<u64 as RemoteValue>::SIZE, 8);
        assert_eq!(<f64 as RemoteValue>::from_le(&1.5f64.to_le_bytes()), 1.5);
    }

    #[test]
    fn from_le_ignores_trailing_bytes() {
        assert_eq!(<u16 as RemoteValue>::from_le(&[1, 0, 0xAA, 0xBB]), 1);
    }

    #[test]
    fn vectors_are_packed_floats() {
        let v = Vec3 { x: 1.0, y: -2.0, z: 0.5 };
        let bytes = v.to_le();
        assert_eq!(bytes.len(), Vec3::SIZE);
        assert_eq!(&bytes[4..8], &(-2.0f32).to_le_bytes());
        assert_eq!(Vec3::from_le(&bytes), v);
    }

    #[test]
    fn matrix_layout_is_row_major_and_transposes() {
        let mut flat = Vec::new();
        for i in 0..16 {
            flat.extend_from_slice(&(i as f32).to_le_bytes());
        }
        let m = Matrix4::from_le(&flat);
        assert_eq!(m.m[0][1], 1.0);
        assert_eq!(m.m[1][0], 4.0);

        let t = m.transpose();
        assert_eq!(t.m[0][1], 4.0);
        assert_eq!(t.m[3][2], 11.0);
        assert_eq!(t.transpose(), m);
        assert_eq!(m.to_le(), flat);
    }
}
