//! Dense truncated-signed-distance volume.
//!
//! Voxels store `(distance, weight)` as a pair of 16-bit integers:
//! distance fixed-point scaled by 32766 over `[-1, 1]`, weight as a plain
//! integer observation count. Storage is column-contiguous — all voxels
//! sharing `(x, y)` are adjacent along z — so the integration kernel can
//! hand one column per rayon task without overlap.

pub mod integrate;

use nalgebra::Vector3;

pub use integrate::integrate;

/// Fixed-point scale for the signed distance component.
pub const DISTANCE_SCALE: f32 = 32766.0;
const INV_DISTANCE_SCALE: f32 = 1.0 / DISTANCE_SCALE;

/// Encode a clamped signed distance and a weight into voxel storage.
#[inline]
pub fn encode(distance: f32, weight: f32) -> [i16; 2] {
    [(distance * DISTANCE_SCALE) as i16, weight as i16]
}

/// Decode voxel storage back to `(distance, weight)`.
#[inline]
pub fn decode(value: [i16; 2]) -> (f32, f32) {
    (value[0] as f32 * INV_DISTANCE_SCALE, value[1] as f32)
}

/// The volumetric scene model: `size` voxels per axis spanning `dims`
/// meters, anchored at the world origin.
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    size: [usize; 3],
    dims: Vector3<f32>,
    data: Vec<[i16; 2]>,
}

impl TsdfVolume {
    /// Allocate a volume with every voxel at distance 1 (free space) and
    /// weight 0 (unobserved).
    pub fn new(size: [usize; 3], dims: Vector3<f32>) -> Self {
        let mut volume = Self {
            size,
            dims,
            data: vec![[0; 2]; size[0] * size[1] * size[2]],
        };
        volume.reset();
        volume
    }

    /// Reinitialize all voxels to the unobserved state.
    pub fn reset(&mut self) {
        self.data.fill(encode(1.0, 0.0));
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn dims(&self) -> Vector3<f32> {
        self.dims
    }

    /// Physical size of one voxel along each axis.
    pub fn voxel_pitch(&self) -> Vector3<f32> {
        Vector3::new(
            self.dims.x / self.size[0] as f32,
            self.dims.y / self.size[1] as f32,
            self.dims.z / self.size[2] as f32,
        )
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (y * self.size[0] + x) * self.size[2] + z
    }

    /// World-space center of voxel `(x, y, z)`.
    pub fn voxel_position(&self, x: usize, y: usize, z: usize) -> Vector3<f32> {
        Vector3::new(
            (x as f32 + 0.5) * self.dims.x / self.size[0] as f32,
            (y as f32 + 0.5) * self.dims.y / self.size[1] as f32,
            (z as f32 + 0.5) * self.dims.z / self.size[2] as f32,
        )
    }

    /// Decoded `(distance, weight)` of one voxel.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> (f32, f32) {
        decode(self.data[self.index(x, y, z)])
    }

    pub fn set_voxel(&mut self, x: usize, y: usize, z: usize, distance: f32, weight: f32) {
        let idx = self.index(x, y, z);
        self.data[idx] = encode(distance, weight);
    }

    /// Decoded distance with integer coordinates clamped to the grid.
    #[inline]
    fn distance_clamped(&self, x: i32, y: i32, z: i32) -> f32 {
        let x = x.clamp(0, self.size[0] as i32 - 1) as usize;
        let y = y.clamp(0, self.size[1] as i32 - 1) as usize;
        let z = z.clamp(0, self.size[2] as i32 - 1) as usize;
        self.data[self.index(x, y, z)][0] as f32 * INV_DISTANCE_SCALE
    }

    /// Trilinearly interpolated signed distance at an arbitrary world
    /// point. Sample positions are voxel centers, so the grid is offset
    /// by half a voxel.
    pub fn interp(&self, pos: &Vector3<f32>) -> f32 {
        let scaled = Vector3::new(
            pos.x * self.size[0] as f32 / self.dims.x - 0.5,
            pos.y * self.size[1] as f32 / self.dims.y - 0.5,
            pos.z * self.size[2] as f32 / self.dims.z - 0.5,
        );
        let base = scaled.map(f32::floor);
        let f = scaled - base;
        let (bx, by, bz) = (base.x as i32, base.y as i32, base.z as i32);

        let v = |dx: i32, dy: i32, dz: i32| self.distance_clamped(bx + dx, by + dy, bz + dz);

        ((v(0, 0, 0) * (1.0 - f.x) + v(1, 0, 0) * f.x) * (1.0 - f.y)
            + (v(0, 1, 0) * (1.0 - f.x) + v(1, 1, 0) * f.x) * f.y)
            * (1.0 - f.z)
            + ((v(0, 0, 1) * (1.0 - f.x) + v(1, 0, 1) * f.x) * (1.0 - f.y)
                + (v(0, 1, 1) * (1.0 - f.x) + v(1, 1, 1) * f.x) * f.y)
                * f.z
    }

    /// Spatial gradient of the interpolated distance field, in distance
    /// units per meter. Degenerates to zero deep inside uniform regions,
    /// which callers treat as "no normal".
    pub fn grad(&self, pos: &Vector3<f32>) -> Vector3<f32> {
        let scaled = Vector3::new(
            pos.x * self.size[0] as f32 / self.dims.x - 0.5,
            pos.y * self.size[1] as f32 / self.dims.y - 0.5,
            pos.z * self.size[2] as f32 / self.dims.z - 0.5,
        );
        let base = scaled.map(f32::floor);
        let f = scaled - base;
        let (bx, by, bz) = (base.x as i32, base.y as i32, base.z as i32);

        let v = |x: i32, y: i32, z: i32| self.distance_clamped(x, y, z);

        // Central difference of the trilinear reconstruction along each
        // axis, using the two bracketing lattice planes.
        let gx = (((v(bx + 1, by, bz) - v(bx - 1, by, bz)) * (1.0 - f.x)
            + (v(bx + 2, by, bz) - v(bx, by, bz)) * f.x)
            * (1.0 - f.y)
            + ((v(bx + 1, by + 1, bz) - v(bx - 1, by + 1, bz)) * (1.0 - f.x)
                + (v(bx + 2, by + 1, bz) - v(bx, by + 1, bz)) * f.x)
                * f.y)
            * (1.0 - f.z)
            + (((v(bx + 1, by, bz + 1) - v(bx - 1, by, bz + 1)) * (1.0 - f.x)
                + (v(bx + 2, by, bz + 1) - v(bx, by, bz + 1)) * f.x)
                * (1.0 - f.y)
                + ((v(bx + 1, by + 1, bz + 1) - v(bx - 1, by + 1, bz + 1)) * (1.0 - f.x)
                    + (v(bx + 2, by + 1, bz + 1) - v(bx, by + 1, bz + 1)) * f.x)
                    * f.y)
                * f.z;

        let gy = (((v(bx, by + 1, bz) - v(bx, by - 1, bz)) * (1.0 - f.y)
            + (v(bx, by + 2, bz) - v(bx, by, bz)) * f.y)
            * (1.0 - f.x)
            + ((v(bx + 1, by + 1, bz) - v(bx + 1, by - 1, bz)) * (1.0 - f.y)
                + (v(bx + 1, by + 2, bz) - v(bx + 1, by, bz)) * f.y)
                * f.x)
            * (1.0 - f.z)
            + (((v(bx, by + 1, bz + 1) - v(bx, by - 1, bz + 1)) * (1.0 - f.y)
                + (v(bx, by + 2, bz + 1) - v(bx, by, bz + 1)) * f.y)
                * (1.0 - f.x)
                + ((v(bx + 1, by + 1, bz + 1) - v(bx + 1, by - 1, bz + 1)) * (1.0 - f.y)
                    + (v(bx + 1, by + 2, bz + 1) - v(bx + 1, by, bz + 1)) * f.y)
                    * f.x)
                * f.z;

        let gz = (((v(bx, by, bz + 1) - v(bx, by, bz - 1)) * (1.0 - f.z)
            + (v(bx, by, bz + 2) - v(bx, by, bz)) * f.z)
            * (1.0 - f.x)
            + ((v(bx + 1, by, bz + 1) - v(bx + 1, by, bz - 1)) * (1.0 - f.z)
                + (v(bx + 1, by, bz + 2) - v(bx + 1, by, bz)) * f.z)
                * f.x)
            * (1.0 - f.y)
            + (((v(bx, by + 1, bz + 1) - v(bx, by + 1, bz - 1)) * (1.0 - f.z)
                + (v(bx, by + 1, bz + 2) - v(bx, by + 1, bz)) * f.z)
                * (1.0 - f.x)
                + ((v(bx + 1, by + 1, bz + 1) - v(bx + 1, by + 1, bz - 1)) * (1.0 - f.z)
                    + (v(bx + 1, by + 1, bz + 2) - v(bx + 1, by + 1, bz)) * f.z)
                    * f.x)
                * f.y;

        let pitch = self.voxel_pitch();
        Vector3::new(gx * pitch.x, gy * pitch.y, gz * pitch.z) * 0.5
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [[i16; 2]] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn encode_decode_round_trip() {
        for &(d, w) in &[(1.0f32, 0.0f32), (-1.0, 100.0), (0.25, 3.0), (-0.5, 17.0)] {
            let (dd, dw) = decode(encode(d, w));
            assert_relative_eq!(dd, d, epsilon = 1e-4);
            assert_relative_eq!(dw, w);
        }
    }

    #[test]
    fn new_volume_is_free_space() {
        let volume = TsdfVolume::new([8, 8, 8], Vector3::new(1.0, 1.0, 1.0));
        let (d, w) = volume.voxel(3, 4, 5);
        assert_relative_eq!(d, 1.0, epsilon = 1e-4);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn interp_recovers_voxel_centers() {
        let mut volume = TsdfVolume::new([8, 8, 8], Vector3::new(2.0, 2.0, 2.0));
        volume.set_voxel(3, 4, 5, -0.5, 1.0);
        let center = volume.voxel_position(3, 4, 5);
        assert_relative_eq!(volume.interp(&center), -0.5, epsilon = 1e-3);
    }

    #[test]
    fn interp_blends_between_centers() {
        let mut volume = TsdfVolume::new([4, 4, 4], Vector3::new(1.0, 1.0, 1.0));
        // Two adjacent voxels along z at -1 and +1; halfway should be ~0.
        for x in 0..4 {
            for y in 0..4 {
                volume.set_voxel(x, y, 1, -1.0, 1.0);
                volume.set_voxel(x, y, 2, 1.0, 1.0);
            }
        }
        let a = volume.voxel_position(1, 1, 1);
        let b = volume.voxel_position(1, 1, 2);
        let midpoint = (a + b) * 0.5;
        assert_relative_eq!(volume.interp(&midpoint), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn gradient_points_along_increasing_distance() {
        let mut volume = TsdfVolume::new([16, 16, 16], Vector3::new(2.0, 2.0, 2.0));
        // Distance field increasing with z: a surface seen down the z axis.
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let d = (z as f32 - 8.0) / 8.0;
                    volume.set_voxel(x, y, z, d.clamp(-1.0, 1.0), 1.0);
                }
            }
        }
        let g = volume.grad(&Vector3::new(1.0, 1.0, 1.0));
        assert!(g.z > 0.0);
        assert_relative_eq!(g.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(g.y, 0.0, epsilon = 1e-4);
    }
}
