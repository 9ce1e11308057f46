#![forbid(unsafe_code)]

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Surface area of a sphere of radius `r`.
pub fn area_sphere(r: f64) -> f64 {
    4.0 * PI * r * r
}

/// Volume of a sphere of radius `r`.
pub fn volume_sphere(r: f64) -> f64 {
    4.0 / 3.0 * PI * r * r * r
}

/// Lateral surface of a truncated cone of axial length `h` and end radii
/// `r1`, `r2`: `π(r1+r2)·ℓ` with slant `ℓ = √(h² + (r2−r1)²)`.
pub fn area_frustum(h: f64, r1: f64, r2: f64) -> f64 {
    let dr = r2 - r1;
    PI * (r1 + r2) * (h * h + dr * dr).sqrt()
}

/// Volume of a truncated cone: `πh(r1² + r1·r2 + r2²)/3`.
pub fn volume_frustum(h: f64, r1: f64, r2: f64) -> f64 {
    PI * h * (r1 * r1 + r1 * r2 + r2 * r2) / 3.0
}

/// Cross-sectional disc area at radius `r`.
pub fn area_disc(r: f64) -> f64 {
    PI * r * r
}

/// Piecewise-linear radius profile along a cable.
///
/// `radii` holds one sample per sub-segment boundary, `lengths` one axial
/// length per sub-segment, so `radii.len() == lengths.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusProfile {
    radii: Vec<f64>,
    lengths: Vec<f64>,
    cum: Vec<f64>,
}

impl RadiusProfile {
    pub fn new(radii: Vec<f64>, lengths: Vec<f64>) -> Self {
        assert_eq!(radii.len(), lengths.len() + 1, "radius/length sample mismatch");
        assert!(!lengths.is_empty(), "profile needs at least one sub-segment");
        let mut cum = Vec::with_capacity(radii.len());
        cum.push(0.0);
        for &l in &lengths {
            cum.push(cum.last().unwrap() + l);
        }
        Self { radii, lengths, cum }
    }

    /// Profile of a single linearly tapered piece.
    pub fn tapered(length: f64, r_prox: f64, r_dist: f64) -> Self {
        Self::new(vec![r_prox, r_dist], vec![length])
    }

    pub fn length(&self) -> f64 {
        *self.cum.last().unwrap()
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    /// Radius at arc position `x ∈ [0, length]`.
    pub fn radius_at(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, self.length());
        let piece = match self.cum.binary_search_by(|c| c.partial_cmp(&x).unwrap()) {
            Ok(at) => at.min(self.lengths.len() - 1),
            Err(at) => at - 1,
        };
        let span = self.lengths[piece];
        if span == 0.0 {
            return self.radii[piece];
        }
        let t = (x - self.cum[piece]) / span;
        self.radii[piece] + t * (self.radii[piece + 1] - self.radii[piece])
    }

    /// Membrane area over `[x0, x1]`, accumulated as frustum integrals over
    /// the overlapped linear pieces.
    pub fn integrate_area(&self, x0: f64, x1: f64) -> f64 {
        self.integrate(x0, x1, area_frustum)
    }

    /// Enclosed volume over `[x0, x1]`.
    pub fn integrate_volume(&self, x0: f64, x1: f64) -> f64 {
        self.integrate(x0, x1, volume_frustum)
    }

    fn integrate(&self, x0: f64, x1: f64, piece_fn: fn(f64, f64, f64) -> f64) -> f64 {
        let x0 = x0.clamp(0.0, self.length());
        let x1 = x1.clamp(0.0, self.length());
        if x1 <= x0 {
            return 0.0;
        }
        let mut total = 0.0;
        for piece in 0..self.lengths.len() {
            let lo = self.cum[piece].max(x0);
            let hi = self.cum[piece + 1].min(x1);
            if hi <= lo {
                continue;
            }
            total += piece_fn(hi - lo, self.radius_at(lo), self.radius_at(hi));
        }
        total
    }

    pub fn total_area(&self) -> f64 {
        self.integrate_area(0.0, self.length())
    }

    pub fn total_volume(&self) -> f64 {
        self.integrate_volume(0.0, self.length())
    }
}

/// One half of a divided compartment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalfSection {
    pub area: f64,
    pub volume: f64,
    pub length: f64,
    pub r_prox: f64,
    pub r_dist: f64,
}

/// A compartment split at its midpoint into proximal and distal halves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivCompartment {
    pub left: HalfSection,
    pub right: HalfSection,
}

/// Divided-compartment view of a cable: `ncomp` equal-length compartments,
/// each subdivided at its midpoint, with frustum-accurate half areas and
/// volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividedCable {
    profile: RadiusProfile,
    ncomp: usize,
}

impl DividedCable {
    pub fn new(profile: RadiusProfile, ncomp: usize) -> Self {
        assert!(ncomp > 0, "cable must have at least one compartment");
        Self { profile, ncomp }
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn profile(&self) -> &RadiusProfile {
        &self.profile
    }

    pub fn compartment_length(&self) -> f64 {
        self.profile.length() / self.ncomp as f64
    }

    /// Arc position of compartment boundary `b ∈ [0, ncomp]`.
    pub fn boundary(&self, b: usize) -> f64 {
        debug_assert!(b <= self.ncomp);
        if b == self.ncomp {
            self.profile.length()
        } else {
            self.profile.length() * b as f64 / self.ncomp as f64
        }
    }

    pub fn compartment(&self, i: usize) -> DivCompartment {
        debug_assert!(i < self.ncomp);
        let lo = self.boundary(i);
        let hi = self.boundary(i + 1);
        let mid = 0.5 * (lo + hi);
        DivCompartment {
            left: self.half(lo, mid),
            right: self.half(mid, hi),
        }
    }

    fn half(&self, x0: f64, x1: f64) -> HalfSection {
        HalfSection {
            area: self.profile.integrate_area(x0, x1),
            volume: self.profile.integrate_volume(x0, x1),
            length: x1 - x0,
            r_prox: self.profile.radius_at(x0),
            r_dist: self.profile.radius_at(x1),
        }
    }
}
