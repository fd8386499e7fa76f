//! Fixed, little-endian wire types for the cross-rank exchange paths.
//!
//! All multi-byte integers in these structs are little-endian on the wire;
//! they are stored pre-LE with `.to_le()` and decoded with `from_le`.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Count header preceding a batch of records. Carries the wire version so a
/// mixed-build run fails at the first exchange instead of corrupting data.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub version_le: u16,
    pub _pad: u16,
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            _pad: 0,
            n_le: (n as u32).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Minimal patch descriptor: enough for a remote rank to place the patch
/// geometrically without holding the full `PatchInfo`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePatch {
    pub id_le: u64,
    pub rank_le: u32,
    pub level_le: u32,
    /// Integer cell coordinates at `level`; unused axes stay zero.
    pub coords_le: [u32; 3],
    pub _pad: u32,
}

impl WirePatch {
    pub fn new(id: u64, rank: usize, level: u8, coords: &[u32]) -> Self {
        let mut coords_le = [0u32; 3];
        for (dst, src) in coords_le.iter_mut().zip(coords) {
            *dst = src.to_le();
        }
        Self {
            id_le: id.to_le(),
            rank_le: (rank as u32).to_le(),
            level_le: (level as u32).to_le(),
            coords_le,
            _pad: 0,
        }
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
    pub fn level(&self) -> u8 {
        u32::from_le(self.level_le) as u8
    }
    pub fn coords<const D: usize>(&self) -> [u32; D] {
        let mut out = [0u32; D];
        for (dst, src) in out.iter_mut().zip(self.coords_le.iter()) {
            *dst = u32::from_le(*src);
        }
        out
    }
}

/// Interface global-index assignment record: (canonical patch id, side) keys
/// a ghost holder's copy of the interface.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireInterfaceGid {
    pub patch_le: u64,
    pub gid_le: u64,
    pub side_le: u32,
    pub _pad: u32,
}

impl WireInterfaceGid {
    pub fn new(patch: u64, side: usize, gid: usize) -> Self {
        Self {
            patch_le: patch.to_le(),
            gid_le: (gid as u64).to_le(),
            side_le: (side as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn patch(&self) -> u64 {
        u64::from_le(self.patch_le)
    }
    pub fn side(&self) -> usize {
        u32::from_le(self.side_le) as usize
    }
    pub fn gid(&self) -> usize {
        u64::from_le(self.gid_le) as usize
    }
}

/// Interface value record for update/scatter rounds.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireInterfaceVal {
    pub patch_le: u64,
    pub value_bits_le: u64,
    pub side_le: u32,
    pub _pad: u32,
}

impl WireInterfaceVal {
    pub fn new(patch: u64, side: usize, value: f64) -> Self {
        Self {
            patch_le: patch.to_le(),
            value_bits_le: value.to_bits().to_le(),
            side_le: (side as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn patch(&self) -> u64 {
        u64::from_le(self.patch_le)
    }
    pub fn side(&self) -> usize {
        u32::from_le(self.side_le) as usize
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.value_bits_le))
    }
}

/// A raw f64 carried on the wire (collectives, transfer blocks).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireF64 {
    pub bits_le: u64,
}

impl WireF64 {
    pub fn new(v: f64) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A raw u64 carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireU64 {
    pub n_le: u64,
}

impl WireU64 {
    pub fn new(n: u64) -> Self {
        Self { n_le: n.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.n_le)
    }
}
