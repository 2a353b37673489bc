//! Structured voxel grids, axis-aligned regions and per-DOF indicators.

use serde::{Deserialize, Serialize};

use crate::error::{CardiacError, Result};

/// A point in tissue coordinates (mm).
pub type Point = [f64; 3];

/// Coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Uniform voxel grid; one voxel is `spacing` mm wide along every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Voxel edge length (mm)
    pub spacing: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            nx: 40,
            ny: 20,
            nz: 1,
            spacing: 0.1,
        }
    }
}

impl GridSpec {
    pub fn new(nx: usize, ny: usize, nz: usize, spacing: f64) -> Self {
        Self { nx, ny, nz, spacing }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(CardiacError::geometry(format!(
                "grid dimensions must be positive, got {}x{}x{}",
                self.nx, self.ny, self.nz
            )));
        }
        if !(self.spacing > 0.0) {
            return Err(CardiacError::geometry("grid spacing must be positive"));
        }
        Ok(())
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn num_voxels(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Lexicographic voxel index, x fastest.
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    /// Integer coordinates of a voxel index.
    pub fn ijk(&self, index: usize) -> [usize; 3] {
        let i = index % self.nx;
        let j = (index / self.nx) % self.ny;
        let k = index / (self.nx * self.ny);
        [i, j, k]
    }

    /// Neighbour in the positive direction of `axis`, if inside the grid.
    pub fn upper_neighbor(&self, index: usize, axis: Axis) -> Option<usize> {
        let [i, j, k] = self.ijk(index);
        match axis {
            Axis::X if i + 1 < self.nx => Some(index + 1),
            Axis::Y if j + 1 < self.ny => Some(index + self.nx),
            Axis::Z if k + 1 < self.nz => Some(index + self.nx * self.ny),
            _ => None,
        }
    }

    /// Voxel center.
    pub fn center(&self, index: usize) -> Point {
        let [i, j, k] = self.ijk(index);
        let h = self.spacing;
        [
            (i as f64 + 0.5) * h,
            (j as f64 + 0.5) * h,
            (k as f64 + 0.5) * h,
        ]
    }

    /// Center of the face between a voxel and its upper neighbour.
    pub fn face_center(&self, index: usize, axis: Axis) -> Point {
        let mut p = self.center(index);
        p[axis.index()] += 0.5 * self.spacing;
        p
    }
}

/// Axis-aligned box, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min: Point,
    pub max: Point,
}

impl Region {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// A region containing every point.
    pub fn everywhere() -> Self {
        Self {
            min: [f64::MIN; 3],
            max: [f64::MAX; 3],
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] <= self.max[a])
    }
}

/// Per-DOF flags computed once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIndicators {
    excitable: Vec<bool>,
    in_electrode: Vec<bool>,
}

impl NodeIndicators {
    /// Project the region predicates onto DOF positions.
    pub fn project(sites: &[Point], excitable: Option<&Region>, electrode: &Region) -> Self {
        Self {
            excitable: sites
                .iter()
                .map(|p| excitable.map_or(true, |r| r.contains(p)))
                .collect(),
            in_electrode: sites.iter().map(|p| electrode.contains(p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.excitable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excitable.is_empty()
    }

    /// Whether the node runs ODE integration.
    pub fn is_excitable(&self, dof: usize) -> bool {
        self.excitable[dof]
    }

    /// Whether S1/S2 may apply at the node.
    pub fn in_electrode(&self, dof: usize) -> bool {
        self.in_electrode[dof]
    }

    pub fn num_excitable(&self) -> usize {
        self.excitable.iter().filter(|&&e| e).count()
    }

    pub fn num_in_electrode(&self) -> usize {
        self.in_electrode.iter().filter(|&&e| e).count()
    }
}

/// Index of the site nearest to `p`.
pub fn nearest_site(sites: &[Point], p: &Point) -> Option<usize> {
    let dist2 = |s: &Point| (0..3).map(|a| (s[a] - p[a]).powi(2)).sum::<f64>();
    sites
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| dist2(a).total_cmp(&dist2(b)))
        .map(|(i, _)| i)
}
