#![forbid(unsafe_code)]

use cable_cell::{CableCell, CableCellError, CableCellParameters, Paintable, Segment};
use cable_core::{CellId, CellPartition, NO_PARENT};
use cable_geometry::{area_disc, area_sphere, DividedCable, RadiusProfile};
use cable_tree::SegmentTree;
use serde::{Deserialize, Serialize};

/// Conversion factor from µm²/(µm·Ω·cm) to µS.
const CONDUCTANCE_SCALE: f64 = 100.0;

/// Per-segment record in the flat discretization: the CV holding the
/// segment's proximal endpoint (outside the range) and the half-open range of
/// CVs the segment contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub parent_cv: i64,
    pub cv_range: (usize, usize),
}

impl SegmentInfo {
    pub fn has_parent(&self) -> bool {
        self.parent_cv != NO_PARENT
    }

    pub fn num_cvs(&self) -> usize {
        self.cv_range.1 - self.cv_range.0
    }
}

/// One half-compartment (or the soma sphere) together with the CV that
/// absorbed it. The atom table is what the region resolver folds over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvAtom {
    /// Global segment index.
    pub segment: usize,
    pub cv: usize,
    pub area: f64,
    /// Arc span on the owning segment [µm].
    pub x0: f64,
    pub x1: f64,
}

/// Flat finite-volume discretization over all cells. CVs are numbered
/// globally, per-cell ranges given by `cell_cv_part`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discretization {
    pub ncell: usize,
    pub ncv: usize,
    /// Parent CV per CV; `NO_PARENT` at each cell's root.
    pub parent_cv: Vec<i64>,
    pub cv_to_cell: Vec<CellId>,
    pub cell_cv_part: CellPartition,
    /// Membrane area [µm²].
    pub cv_area: Vec<f64>,
    /// Membrane capacitance [pF].
    pub cv_capacitance: Vec<f64>,
    /// Conductance of the face towards the parent CV [µS]; 0 at roots.
    pub face_conductance: Vec<f64>,
    /// Representative diameter [µm].
    pub diam_um: Vec<f64>,
    /// Initial membrane potential [mV], area-weighted over contributions.
    pub init_membrane_potential: Vec<f64>,
    /// Temperature [K], area-weighted over contributions.
    pub temperature_k: Vec<f64>,
    pub cell_segment_part: CellPartition,
    pub segments: Vec<SegmentInfo>,
    pub atoms: Vec<CvAtom>,
}

impl Discretization {
    /// CV at the compartment boundary nearest to `pos` on a branch, the
    /// proximal boundary resolving to the branch-point CV.
    pub fn location_cv(&self, cell: usize, branch: usize, pos: f64) -> usize {
        let seg = self.cell_segment_part.range(cell).start + branch;
        let info = &self.segments[seg];
        let k = info.num_cvs();
        let boundary = (pos * k as f64).round() as usize;
        if boundary == 0 {
            if info.has_parent() {
                info.parent_cv as usize
            } else {
                info.cv_range.0
            }
        } else {
            info.cv_range.0 + boundary - 1
        }
    }

    /// Digest over the full artifact, for identity checks downstream.
    pub fn config_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:FVM:CFG");
        update_usize(&mut hasher, self.ncell);
        update_usize(&mut hasher, self.ncv);
        for &p in &self.parent_cv {
            update_i64(&mut hasher, p);
        }
        for &c in &self.cv_to_cell {
            hasher.update(&c.0.to_le_bytes());
        }
        for &b in &self.cell_cv_part.bounds {
            update_usize(&mut hasher, b);
        }
        for values in [
            &self.cv_area,
            &self.cv_capacitance,
            &self.face_conductance,
            &self.diam_um,
            &self.init_membrane_potential,
            &self.temperature_k,
        ] {
            for &v in values {
                update_f64(&mut hasher, v);
            }
        }
        for &b in &self.cell_segment_part.bounds {
            update_usize(&mut hasher, b);
        }
        for seg in &self.segments {
            update_i64(&mut hasher, seg.parent_cv);
            update_usize(&mut hasher, seg.cv_range.0);
            update_usize(&mut hasher, seg.cv_range.1);
        }
        *hasher.finalize().as_bytes()
    }
}

fn update_usize(hasher: &mut blake3::Hasher, value: usize) {
    hasher.update(&(value as u64).to_le_bytes());
}

fn update_i64(hasher: &mut blake3::Hasher, value: i64) {
    hasher.update(&value.to_le_bytes());
}

fn update_f64(hasher: &mut blake3::Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}

/// Mutable per-CV accumulators used while a cell is being laid out.
#[derive(Debug, Clone, Copy, Default)]
struct CvBuild {
    area: f64,
    capacitance: f64,
    weighted_vm: f64,
    weighted_temp: f64,
    diam: f64,
    parent: i64,
    face_conductance: f64,
}

/// Per-segment scalar properties resolved from paintings and overrides.
struct SegmentScalars {
    cm: Vec<f64>,
    ra: Vec<f64>,
    vm: Vec<f64>,
    temp: Vec<f64>,
}

fn resolve_scalar(
    cell: &CableCell,
    base: f64,
    pick: impl Fn(&Paintable) -> Option<f64>,
) -> Vec<f64> {
    let mut values = vec![base; cell.num_segments()];
    for (region, what) in &cell.paintings {
        if let Some(v) = pick(what) {
            for (index, segment) in cell.segments.iter().enumerate() {
                if region.matches_segment(index, segment.tag()) {
                    values[index] = v;
                }
            }
        }
    }
    values
}

fn resolve_segment_scalars(cell: &CableCell, defaults: &CableCellParameters) -> SegmentScalars {
    let local = &cell.local_parameters;
    SegmentScalars {
        cm: resolve_scalar(
            cell,
            local
                .membrane_capacitance
                .unwrap_or(defaults.membrane_capacitance),
            |p| match p {
                Paintable::MembraneCapacitance(v) => Some(*v),
                _ => None,
            },
        ),
        ra: resolve_scalar(
            cell,
            local
                .axial_resistivity
                .unwrap_or(defaults.axial_resistivity),
            |p| match p {
                Paintable::AxialResistivity(v) => Some(*v),
                _ => None,
            },
        ),
        vm: resolve_scalar(
            cell,
            local
                .init_membrane_potential
                .unwrap_or(defaults.init_membrane_potential),
            |p| match p {
                Paintable::InitMembranePotential(v) => Some(*v),
                _ => None,
            },
        ),
        temp: resolve_scalar(
            cell,
            local.temperature_k.unwrap_or(defaults.temperature_k),
            |p| match p {
                Paintable::Temperature(v) => Some(*v),
                _ => None,
            },
        ),
    }
}

fn check_geometry(cell_index: usize, cell: &CableCell) -> Result<(), CableCellError> {
    let geometry_error = |segment: usize, reason: &str| CableCellError::InvalidGeometry {
        cell: cell_index,
        segment,
        reason: reason.to_string(),
    };

    if cell.segments.is_empty() {
        return Err(CableCellError::InvalidTopology {
            cell: cell_index,
            reason: "cell has no segments".to_string(),
        });
    }

    for (index, segment) in cell.segments.iter().enumerate() {
        match segment {
            Segment::Soma { radius, .. } => {
                if index != 0 {
                    return Err(CableCellError::UnsupportedTopology {
                        cell: cell_index,
                        segment: index,
                    });
                }
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(geometry_error(index, "soma radius must be positive"));
                }
            }
            Segment::Cable {
                radii,
                lengths,
                ncomp,
                ..
            } => {
                if index == 0 {
                    return Err(CableCellError::UnsupportedTopology {
                        cell: cell_index,
                        segment: index,
                    });
                }
                if *ncomp == 0 {
                    return Err(geometry_error(index, "cable has zero compartments"));
                }
                if radii.len() != lengths.len() + 1 || lengths.is_empty() {
                    return Err(geometry_error(index, "malformed radius profile"));
                }
                if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
                    return Err(geometry_error(index, "cable radii must be positive"));
                }
                if lengths.iter().any(|l| !l.is_finite() || *l <= 0.0) {
                    return Err(geometry_error(index, "cable lengths must be positive"));
                }
            }
        }
    }
    Ok(())
}

/// Discretizes `cells` into the flat CV system, applying `defaults` wherever
/// no painting or cell-local override takes precedence.
pub fn fvm_discretize(
    cells: &[CableCell],
    defaults: &CableCellParameters,
) -> Result<Discretization, CableCellError> {
    let mut parent_cv: Vec<i64> = Vec::new();
    let mut cv_to_cell: Vec<CellId> = Vec::new();
    let mut cell_cv_part = CellPartition::new();
    let mut cell_segment_part = CellPartition::new();
    let mut segments: Vec<SegmentInfo> = Vec::new();
    let mut atoms: Vec<CvAtom> = Vec::new();

    let mut builds: Vec<CvBuild> = Vec::new();

    for (cell_index, cell) in cells.iter().enumerate() {
        check_geometry(cell_index, cell)?;

        let tree = SegmentTree::from_parent_index(&cell.parent_index()).map_err(|err| {
            CableCellError::InvalidTopology {
                cell: cell_index,
                reason: err.to_string(),
            }
        })?;
        let scalars = resolve_segment_scalars(cell, defaults);

        let cell_cv_start = builds.len();
        let seg_base = segments.len();
        segments.resize(
            seg_base + cell.num_segments(),
            SegmentInfo {
                parent_cv: NO_PARENT,
                cv_range: (0, 0),
            },
        );

        for &seg_index in &tree.preorder() {
            let global_seg = seg_base + seg_index;
            match &cell.segments[seg_index] {
                Segment::Soma { radius, .. } => {
                    let cv = builds.len();
                    let area = area_sphere(*radius);
                    builds.push(CvBuild {
                        area,
                        capacitance: area * scalars.cm[seg_index],
                        weighted_vm: area * scalars.vm[seg_index],
                        weighted_temp: area * scalars.temp[seg_index],
                        diam: 2.0 * radius,
                        parent: NO_PARENT,
                        face_conductance: 0.0,
                    });
                    cv_to_cell.push(CellId(cell_index as u32));
                    segments[global_seg] = SegmentInfo {
                        parent_cv: NO_PARENT,
                        cv_range: (cv, cv + 1),
                    };
                    atoms.push(CvAtom {
                        segment: global_seg,
                        cv,
                        area,
                        x0: 0.0,
                        x1: 2.0 * radius,
                    });
                }
                Segment::Cable {
                    radii,
                    lengths,
                    ncomp,
                    ..
                } => {
                    let k = *ncomp;
                    let profile = RadiusProfile::new(radii.clone(), lengths.clone());
                    let divided = DividedCable::new(profile, k);
                    let comp_len = divided.compartment_length();
                    let cm = scalars.cm[seg_index];
                    let ra = scalars.ra[seg_index];
                    let vm = scalars.vm[seg_index];
                    let temp = scalars.temp[seg_index];

                    let parent_seg = tree.parent(seg_index);
                    let first = divided.compartment(0);

                    // Branch-point CV at the proximal boundary: a fresh CV
                    // hung off the soma, or the parent cable's terminal CV.
                    let attach_cv = if cell.segments[parent_seg].is_soma() {
                        let soma_cv = segments[seg_base + parent_seg].cv_range.0;
                        let cv = builds.len();
                        let r0 = divided.profile().radius_at(0.0);
                        builds.push(CvBuild {
                            area: first.left.area,
                            capacitance: first.left.area * cm,
                            weighted_vm: first.left.area * vm,
                            weighted_temp: first.left.area * temp,
                            diam: 2.0 * r0,
                            parent: soma_cv as i64,
                            face_conductance: CONDUCTANCE_SCALE * area_disc(r0)
                                / (0.5 * comp_len * ra),
                        });
                        cv_to_cell.push(CellId(cell_index as u32));
                        atoms.push(CvAtom {
                            segment: global_seg,
                            cv,
                            area: first.left.area,
                            x0: 0.0,
                            x1: 0.5 * comp_len,
                        });
                        cv
                    } else {
                        let cv = segments[seg_base + parent_seg].cv_range.1 - 1;
                        let build = &mut builds[cv];
                        build.area += first.left.area;
                        build.capacitance += first.left.area * cm;
                        build.weighted_vm += first.left.area * vm;
                        build.weighted_temp += first.left.area * temp;
                        atoms.push(CvAtom {
                            segment: global_seg,
                            cv,
                            area: first.left.area,
                            x0: 0.0,
                            x1: 0.5 * comp_len,
                        });
                        cv
                    };

                    let range_start = builds.len();
                    for j in 0..k {
                        let cv = builds.len();
                        let comp = divided.compartment(j);
                        let mut area = comp.right.area;
                        let mut capacitance = comp.right.area * cm;
                        if j + 1 < k {
                            let next = divided.compartment(j + 1);
                            area += next.left.area;
                            capacitance += next.left.area * cm;
                        }

                        let boundary = divided.boundary(j + 1);
                        let face_x = divided.boundary(j) + 0.5 * comp_len;
                        let face_area = area_disc(divided.profile().radius_at(face_x));

                        builds.push(CvBuild {
                            area,
                            capacitance,
                            weighted_vm: area * vm,
                            weighted_temp: area * temp,
                            diam: 2.0 * divided.profile().radius_at(boundary),
                            parent: if j == 0 { attach_cv as i64 } else { (cv - 1) as i64 },
                            face_conductance: CONDUCTANCE_SCALE * face_area / (comp_len * ra),
                        });
                        cv_to_cell.push(CellId(cell_index as u32));

                        atoms.push(CvAtom {
                            segment: global_seg,
                            cv,
                            area: comp.right.area,
                            x0: face_x,
                            x1: boundary,
                        });
                        if j + 1 < k {
                            atoms.push(CvAtom {
                                segment: global_seg,
                                cv,
                                area: divided.compartment(j + 1).left.area,
                                x0: boundary,
                                x1: boundary + 0.5 * comp_len,
                            });
                        }
                    }

                    segments[global_seg] = SegmentInfo {
                        parent_cv: attach_cv as i64,
                        cv_range: (range_start, range_start + k),
                    };
                }
            }
        }

        cell_cv_part.push(builds.len() - cell_cv_start);
        cell_segment_part.push(cell.num_segments());
    }

    let ncv = builds.len();
    let mut cv_area = Vec::with_capacity(ncv);
    let mut cv_capacitance = Vec::with_capacity(ncv);
    let mut face_conductance = Vec::with_capacity(ncv);
    let mut diam_um = Vec::with_capacity(ncv);
    let mut init_membrane_potential = Vec::with_capacity(ncv);
    let mut temperature_k = Vec::with_capacity(ncv);

    for build in &builds {
        cv_area.push(build.area);
        cv_capacitance.push(build.capacitance);
        face_conductance.push(build.face_conductance);
        diam_um.push(build.diam);
        init_membrane_potential.push(build.weighted_vm / build.area);
        temperature_k.push(build.weighted_temp / build.area);
        parent_cv.push(build.parent);
    }

    Ok(Discretization {
        ncell: cells.len(),
        ncv,
        parent_cv,
        cv_to_cell,
        cell_cv_part,
        cv_area,
        cv_capacitance,
        face_conductance,
        diam_um,
        init_membrane_potential,
        temperature_k,
        cell_segment_part,
        segments,
        atoms,
    })
}
