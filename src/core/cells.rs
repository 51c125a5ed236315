//! The neighbourhood oracle: a rectilinear cell grid over the primary
//! image holding intrusive doubly-linked lists of resident particles.
//!
//! Links are particle-ID indices into a parallel array (`-1` sentinel), so
//! cell transitions are O(1) relinks with no per-particle allocation.

use crate::core::boundary::Boundary;
use crate::core::particle::Particle;
use crate::core::vec3::{Vec3, DIM};
use crate::error::{Error, Result};

const NONE: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct PartCellData {
    prev: i32,
    next: i32,
    cell: i32,
}

#[derive(Debug)]
struct Cell {
    /// Head of the resident list.
    list: i32,
    /// Cached IDs of this cell and its 3^DIM - 1 surrounding cells.
    neighbours: Vec<u32>,
}

/// Cell list over the primary image.
#[derive(Debug)]
pub struct CellList {
    count: [usize; DIM],
    width: [f64; DIM],
    origin: Vec3,
    periodic: bool,
    /// Cells are sized `lambda` times the longest interaction range when
    /// overlap is enabled, giving growing diameters headroom under
    /// compression.
    lambda: f64,
    overlap: bool,
    cells: Vec<Cell>,
    part: Vec<PartCellData>,
}

impl CellList {
    /// Build the grid for `n` particles with cell edges at least
    /// `min_width` (the longest interaction distance).
    pub fn build(
        n: usize,
        box_size: Vec3,
        min_width: f64,
        periodic: bool,
        overlap: bool,
        lambda: f64,
    ) -> Result<Self> {
        if !(min_width > 0.0) || !min_width.is_finite() {
            return Err(Error::InvalidParam(
                "cell width must be finite and > 0".into(),
            ));
        }
        let eff_width = if overlap { min_width * lambda } else { min_width };
        let mut count = [1usize; DIM];
        let mut width = [0.0; DIM];
        for k in 0..DIM {
            count[k] = ((box_size[k] / eff_width).floor() as usize).max(1);
            width[k] = box_size[k] / count[k] as f64;
        }
        let n_cells = count[0] * count[1] * count[2];
        let origin = [
            -0.5 * box_size[0],
            -0.5 * box_size[1],
            -0.5 * box_size[2],
        ];
        let mut list = Self {
            count,
            width,
            origin,
            periodic,
            lambda,
            overlap,
            cells: Vec::with_capacity(n_cells),
            part: vec![
                PartCellData {
                    prev: NONE,
                    next: NONE,
                    cell: NONE,
                };
                n
            ],
        };
        for id in 0..n_cells {
            let neighbours = list.compute_neighbours(id);
            list.cells.push(Cell {
                list: NONE,
                neighbours,
            });
        }
        log::debug!(
            "cell grid {}x{}x{} ({} cells), widths {:?}",
            count[0],
            count[1],
            count[2],
            n_cells,
            width
        );
        Ok(list)
    }

    pub fn set_cell_overlap(&mut self, overlap: bool) {
        self.overlap = overlap;
    }

    #[inline]
    pub fn overlap(&self) -> bool {
        self.overlap
    }

    #[inline]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn min_width(&self) -> f64 {
        self.width.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    #[inline]
    fn coords_of_id(&self, cell: usize) -> [usize; DIM] {
        [
            cell % self.count[0],
            (cell / self.count[0]) % self.count[1],
            cell / (self.count[0] * self.count[1]),
        ]
    }

    #[inline]
    fn id_of_coords(&self, c: [usize; DIM]) -> usize {
        c[0] + self.count[0] * (c[1] + self.count[1] * c[2])
    }

    fn compute_neighbours(&self, cell: usize) -> Vec<u32> {
        let c = self.coords_of_id(cell);
        let mut out = Vec::with_capacity(27);
        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if let Some(n) = self.offset_cell(c, [dx, dy, dz]) {
                        let n = n as u32;
                        if !out.contains(&n) {
                            out.push(n);
                        }
                    }
                }
            }
        }
        out
    }

    /// Neighbouring cell at the given coordinate offset, wrapping under
    /// periodic boundaries and clamping otherwise. `None` when a
    /// non-periodic offset falls outside the grid.
    fn offset_cell(&self, c: [usize; DIM], d: [i64; DIM]) -> Option<usize> {
        let mut out = [0usize; DIM];
        for k in 0..DIM {
            let raw = c[k] as i64 + d[k];
            out[k] = if self.periodic {
                raw.rem_euclid(self.count[k] as i64) as usize
            } else if raw < 0 || raw >= self.count[k] as i64 {
                return None;
            } else {
                raw as usize
            };
        }
        Some(self.id_of_coords(out))
    }

    /// Cell containing a position (clamped to the grid for positions
    /// marginally outside the primary image).
    pub fn cell_of_position(&self, r: &Vec3) -> usize {
        let mut c = [0usize; DIM];
        for k in 0..DIM {
            let raw = ((r[k] - self.origin[k]) / self.width[k]).floor() as i64;
            c[k] = raw.clamp(0, self.count[k] as i64 - 1) as usize;
        }
        self.id_of_coords(c)
    }

    #[inline]
    pub fn cell_of_particle(&self, id: usize) -> Option<usize> {
        let c = self.part[id].cell;
        (c != NONE).then_some(c as usize)
    }

    /// Lattice bounds of a cell.
    pub fn cell_bounds(&self, cell: usize) -> (Vec3, Vec3) {
        let c = self.coords_of_id(cell);
        let mut lo = [0.0; DIM];
        let mut hi = [0.0; DIM];
        for k in 0..DIM {
            lo[k] = self.origin[k] + c[k] as f64 * self.width[k];
            hi[k] = lo[k] + self.width[k];
        }
        (lo, hi)
    }

    fn add_to_cell(&mut self, id: usize, cell: usize) {
        let head = self.cells[cell].list;
        if head != NONE {
            self.part[head as usize].prev = id as i32;
        }
        self.part[id].next = head;
        self.part[id].prev = NONE;
        self.part[id].cell = cell as i32;
        self.cells[cell].list = id as i32;
    }

    fn remove_from_cell(&mut self, id: usize) {
        let entry = self.part[id];
        if entry.prev != NONE {
            self.part[entry.prev as usize].next = entry.next;
        } else if entry.cell != NONE {
            self.cells[entry.cell as usize].list = entry.next;
        }
        if entry.next != NONE {
            self.part[entry.next as usize].prev = entry.prev;
        }
        self.part[id].cell = NONE;
    }

    /// Insert a particle at its current position.
    pub fn insert(&mut self, id: usize, r: &Vec3) {
        let cell = self.cell_of_position(r);
        self.add_to_cell(id, cell);
    }

    /// Particles resident in one cell.
    pub fn particles_in(&self, cell: usize) -> impl Iterator<Item = u32> + '_ {
        let mut cursor = self.cells[cell].list;
        std::iter::from_fn(move || {
            (cursor != NONE).then(|| {
                let id = cursor as u32;
                cursor = self.part[cursor as usize].next;
                id
            })
        })
    }

    /// Every particle in `p`'s cell and the surrounding cells, excluding
    /// `p` itself. This is the candidate set the scheduler re-enumerates
    /// pair events from.
    pub fn particle_neighbourhood(&self, p: usize) -> Vec<u32> {
        let Some(cell) = self.cell_of_particle(p) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for &nc in &self.cells[cell].neighbours {
            for q in self.particles_in(nc as usize) {
                if q as usize != p {
                    out.push(q);
                }
            }
        }
        out
    }

    /// Execute a cell crossing: relink the particle into the adjacent cell
    /// (wrapping its position when it leaves the primary image) and return
    /// the particles in the newly visible plane of cells.
    pub fn run_crossing(
        &mut self,
        id: usize,
        axis: usize,
        positive: bool,
        particle: &mut Particle,
        bc: &Boundary,
    ) -> Vec<u32> {
        let old_cell = match self.cell_of_particle(id) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let c = self.coords_of_id(old_cell);
        let step = if positive { 1i64 } else { -1i64 };

        let mut new_c = c;
        let raw = c[axis] as i64 + step;
        if raw < 0 || raw >= self.count[axis] as i64 {
            if self.periodic {
                new_c[axis] = raw.rem_euclid(self.count[axis] as i64) as usize;
                bc.wrap_axis(&mut particle.r, &mut particle.v, axis, positive);
                if matches!(bc, Boundary::LeesEdwards { .. }) && axis == 1 {
                    // The shear offset displaces x on a y-wrap; re-derive
                    // the destination cell from the wrapped position.
                    new_c = self.coords_of_id(self.cell_of_position(&particle.r));
                }
            } else {
                // Leaving the grid without periodicity: clamp in place.
                new_c[axis] = c[axis];
            }
        } else {
            new_c[axis] = raw as usize;
        }

        self.remove_from_cell(id);
        let new_cell = self.id_of_coords(new_c);
        self.add_to_cell(id, new_cell);

        // Newly visible candidates: the plane one step further along the
        // direction of travel.
        let mut out = Vec::new();
        for du in -1i64..=1 {
            for dv in -1i64..=1 {
                let mut d = [0i64; DIM];
                d[axis] = step;
                let (u_axis, v_axis) = match axis {
                    0 => (1, 2),
                    1 => (0, 2),
                    _ => (0, 1),
                };
                d[u_axis] = du;
                d[v_axis] = dv;
                if let Some(nc) = self.offset_cell(new_c, d) {
                    for q in self.particles_in(nc) {
                        if q as usize != id && !out.contains(&q) {
                            out.push(q);
                        }
                    }
                }
            }
        }
        out
    }

    /// Drop and re-insert every particle; used after bulk position changes
    /// (config load, compression fixes).
    pub fn repopulate(&mut self, particles: &[Particle]) {
        for cell in &mut self.cells {
            cell.list = NONE;
        }
        for e in &mut self.part {
            *e = PartCellData {
                prev: NONE,
                next: NONE,
                cell: NONE,
            };
        }
        for p in particles {
            self.insert(p.id as usize, &p.r);
        }
    }

    /// Advisory integrity check: every particle in exactly one list, links
    /// well-formed, recorded cell matching the position. Returns the number
    /// of violations.
    pub fn validate(&self, particles: &[Particle]) -> usize {
        let mut errors = 0;
        let mut seen = vec![false; self.part.len()];
        for (cid, cell) in self.cells.iter().enumerate() {
            let mut cursor = cell.list;
            let mut hops = 0usize;
            while cursor != NONE {
                let id = cursor as usize;
                if seen[id] {
                    errors += 1; // listed twice or a cycle
                    break;
                }
                seen[id] = true;
                if self.part[id].cell != cid as i32 {
                    errors += 1;
                }
                cursor = self.part[id].next;
                hops += 1;
                if hops > self.part.len() {
                    errors += 1;
                    break;
                }
            }
        }
        for p in particles {
            let id = p.id as usize;
            if !seen[id] {
                errors += 1;
                continue;
            }
            // A particle sits inside its recorded cell, allowing rounding
            // slack for positions streamed exactly onto a face.
            let cell = self.part[id].cell;
            if cell == NONE {
                errors += 1;
                continue;
            }
            let (lo, hi) = self.cell_bounds(cell as usize);
            for k in 0..DIM {
                let eps = 1e-9 * self.width[k];
                let inside_grid = p.r[k] >= self.origin[k] - eps
                    && p.r[k] <= self.origin[k] + self.count[k] as f64 * self.width[k] + eps;
                if !inside_grid {
                    // Off-grid positions clamp to edge cells under open
                    // boundaries; only a mismatch inside the grid counts.
                    continue;
                }
                if p.r[k] < lo[k] - eps || p.r[k] > hi[k] + eps {
                    errors += 1;
                    break;
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> CellList {
        CellList::build(n, [9.0, 9.0, 9.0], 1.0, true, false, 1.0).unwrap()
    }

    fn particle(id: u32, r: Vec3) -> Particle {
        Particle::new(id, r, [0.0; 3]).unwrap()
    }

    #[test]
    fn build_counts_cells() {
        let g = grid(0);
        assert_eq!(g.n_cells(), 9 * 9 * 9);
        assert_eq!(g.count, [9, 9, 9]);
    }

    #[test]
    fn insert_and_membership() {
        let mut g = grid(2);
        let p0 = particle(0, [0.1, 0.1, 0.1]);
        let p1 = particle(1, [0.2, 0.2, 0.2]);
        g.insert(0, &p0.r);
        g.insert(1, &p1.r);
        let cell = g.cell_of_position(&p0.r);
        let members: Vec<u32> = g.particles_in(cell).collect();
        assert_eq!(members.len(), 2);
        assert_eq!(g.validate(&[p0, p1]), 0);
    }

    #[test]
    fn neighbourhood_sees_adjacent_cell() {
        let mut g = grid(2);
        // Adjacent cells: widths are 1.0, so these are one cell apart.
        g.insert(0, &[0.1, 0.1, 0.1]);
        g.insert(1, &[1.1, 0.1, 0.1]);
        let nbrs = g.particle_neighbourhood(0);
        assert_eq!(nbrs, vec![1]);
    }

    #[test]
    fn crossing_relinks_and_wraps() {
        let mut g = grid(1);
        // Last cell along x: [3.5, 4.5) with origin -4.5.
        let mut p = particle(0, [4.4, 0.1, 0.1]);
        g.insert(0, &p.r);
        let bc = Boundary::Periodic {
            box_size: [9.0, 9.0, 9.0],
        };
        // Stream it just over the boundary, then run the crossing.
        p.r[0] = 4.5000001;
        g.run_crossing(0, 0, true, &mut p, &bc);
        assert!(p.r[0] < -4.4, "position should wrap, got {}", p.r[0]);
        assert_eq!(g.cell_of_particle(0), Some(g.cell_of_position(&p.r)));
        assert_eq!(g.validate(&[p]), 0);
    }

    #[test]
    fn validate_detects_stale_cell() {
        let mut g = grid(1);
        let mut p = particle(0, [0.1, 0.1, 0.1]);
        g.insert(0, &p.r);
        // Teleport without telling the grid.
        p.r = [4.0, 4.0, 4.0];
        assert!(g.validate(&[p]) > 0);
    }

    #[test]
    fn overlap_widens_cells() {
        let tight = CellList::build(0, [10.0, 10.0, 10.0], 1.0, true, false, 1.1).unwrap();
        let wide = CellList::build(0, [10.0, 10.0, 10.0], 1.0, true, true, 1.1).unwrap();
        assert!(wide.min_width() >= tight.min_width());
        assert!(wide.n_cells() <= tight.n_cells());
    }
}
