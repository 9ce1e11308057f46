#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use cable_cell::{
    CableCell, CableCellError, GlobalProperties, IonDefaults, MechanismDesc, MechanismInfo,
    MechanismKind, Paintable, PointItem, Region,
};
use cable_fvm::{CvAtom, Discretization};
use serde::{Deserialize, Serialize};

/// Vectorized node list for one mechanism in the flat system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismConfig {
    pub kind: MechanismKind,
    /// CV indices; strictly sorted for density kind, sorted with possible
    /// repeats for point kind.
    pub cv: Vec<usize>,
    /// Target indices in placement order, point kind only.
    pub target: Vec<usize>,
    /// Instance counts per coalesced entry; empty when not coalesced.
    pub multiplicity: Vec<usize>,
    /// Dense per-parameter values aligned with `cv`.
    pub param_values: BTreeMap<String, Vec<f64>>,
    /// Painted fraction of each CV's membrane area, density kind only.
    pub norm_area: Vec<f64>,
}

impl MechanismConfig {
    fn new(kind: MechanismKind) -> Self {
        Self {
            kind,
            cv: Vec::new(),
            target: Vec::new(),
            multiplicity: Vec::new(),
            param_values: BTreeMap::new(),
            norm_area: Vec::new(),
        }
    }
}

/// Per-ion layout: the CVs where the ion is present and its initial
/// concentrations there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IonConfig {
    pub cv: Vec<usize>,
    pub init_iconc: Vec<f64>,
    pub init_econc: Vec<f64>,
    pub charge: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusEntry {
    pub cv: usize,
    pub delay: f64,
    pub duration: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorEntry {
    pub cv: usize,
    pub threshold: f64,
}

/// Full mechanism layout over the flat system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismData {
    pub mechanisms: BTreeMap<String, MechanismConfig>,
    pub ions: BTreeMap<String, IonConfig>,
    pub stimuli: Vec<StimulusEntry>,
    pub detectors: Vec<DetectorEntry>,
    pub gap_junction_cvs: Vec<usize>,
    /// Total number of point-mechanism targets across all cells.
    pub n_targets: usize,
}

impl MechanismData {
    pub fn config_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:LAYOUT:CFG");
        update_usize(&mut hasher, self.mechanisms.len());
        for (name, config) in &self.mechanisms {
            hasher.update(name.as_bytes());
            hasher.update(&[kind_code(config.kind)]);
            for &cv in &config.cv {
                update_usize(&mut hasher, cv);
            }
            for &t in &config.target {
                update_usize(&mut hasher, t);
            }
            for &m in &config.multiplicity {
                update_usize(&mut hasher, m);
            }
            for (param, values) in &config.param_values {
                hasher.update(param.as_bytes());
                for &v in values {
                    update_f64(&mut hasher, v);
                }
            }
            for &a in &config.norm_area {
                update_f64(&mut hasher, a);
            }
        }
        update_usize(&mut hasher, self.ions.len());
        for (name, ion) in &self.ions {
            hasher.update(name.as_bytes());
            hasher.update(&ion.charge.to_le_bytes());
            for &cv in &ion.cv {
                update_usize(&mut hasher, cv);
            }
            for &v in &ion.init_iconc {
                update_f64(&mut hasher, v);
            }
            for &v in &ion.init_econc {
                update_f64(&mut hasher, v);
            }
        }
        update_usize(&mut hasher, self.n_targets);
        *hasher.finalize().as_bytes()
    }
}

fn kind_code(kind: MechanismKind) -> u8 {
    match kind {
        MechanismKind::Density => 0,
        MechanismKind::Point => 1,
        MechanismKind::ReversalPotential => 2,
        MechanismKind::GapJunction => 3,
    }
}

fn update_usize(hasher: &mut blake3::Hasher, value: usize) {
    hasher.update(&(value as u64).to_le_bytes());
}

fn update_f64(hasher: &mut blake3::Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}

/// Region predicate over a single atom (half-compartment or soma sphere).
/// Tag and branch primitives act at segment granularity; a location selects
/// the atom containing the point.
fn covers_atom(
    region: &Region,
    local_segment: usize,
    tag: i32,
    atom: &CvAtom,
    segment_length: f64,
) -> bool {
    match region {
        Region::Tagged(t) => *t == tag,
        Region::Branch(b) => *b == local_segment,
        Region::Location(b, pos) => {
            if *b != local_segment {
                return false;
            }
            let x = pos.clamp(0.0, 1.0) * segment_length;
            x >= atom.x0 && (x < atom.x1 || (x >= segment_length && atom.x1 >= segment_length))
        }
        Region::Join(a, b) => {
            covers_atom(a, local_segment, tag, atom, segment_length)
                || covers_atom(b, local_segment, tag, atom, segment_length)
        }
        Region::Intersect(a, b) => {
            covers_atom(a, local_segment, tag, atom, segment_length)
                && covers_atom(b, local_segment, tag, atom, segment_length)
        }
        Region::Complement(r) => !covers_atom(r, local_segment, tag, atom, segment_length),
    }
}

/// Per-compile lookup tables derived from the cell descriptions.
struct SegmentTable {
    tag: Vec<i32>,
    length: Vec<f64>,
    /// Global segment → owning cell and cell-local index.
    local: Vec<(usize, usize)>,
}

impl SegmentTable {
    fn build(cells: &[CableCell]) -> Self {
        let mut tag = Vec::new();
        let mut length = Vec::new();
        let mut local = Vec::new();
        for (cell_index, cell) in cells.iter().enumerate() {
            for (seg_index, segment) in cell.segments.iter().enumerate() {
                tag.push(segment.tag());
                length.push(segment.length());
                local.push((cell_index, seg_index));
            }
        }
        Self { tag, length, local }
    }
}

/// Resolves a region painted on `cell` into per-CV covered membrane areas.
fn resolve_region(
    region: &Region,
    cell_index: usize,
    table: &SegmentTable,
    discretization: &Discretization,
) -> BTreeMap<usize, f64> {
    let mut covered: BTreeMap<usize, f64> = BTreeMap::new();
    let seg_range = discretization.cell_segment_part.range(cell_index);
    for atom in &discretization.atoms {
        if !seg_range.contains(&atom.segment) {
            continue;
        }
        let (_, local_segment) = table.local[atom.segment];
        if covers_atom(
            region,
            local_segment,
            table.tag[atom.segment],
            atom,
            table.length[atom.segment],
        ) {
            *covered.entry(atom.cv).or_insert(0.0) += atom.area;
        }
    }
    covered
}

fn check_mechanism_ions(
    name: &str,
    info: &MechanismInfo,
    gprop: &GlobalProperties,
) -> Result<(), CableCellError> {
    for ion in info.ions_read.iter().chain(info.ions_write.iter()) {
        if !gprop.ion_species.contains_key(ion) {
            return Err(CableCellError::MissingIon {
                mechanism: name.to_string(),
                ion: ion.clone(),
            });
        }
    }
    for (ion, &declared) in &info.ion_charge {
        match gprop.ion_species.get(ion) {
            None => {
                return Err(CableCellError::MissingIon {
                    mechanism: name.to_string(),
                    ion: ion.clone(),
                })
            }
            Some(&species) if species != declared => {
                return Err(CableCellError::IonChargeMismatch {
                    mechanism: name.to_string(),
                    ion: ion.clone(),
                    declared,
                    species,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn check_parameters(
    desc: &MechanismDesc,
    info: &MechanismInfo,
) -> Result<(), CableCellError> {
    for (param, &value) in &desc.params {
        match info.parameters.get(param) {
            // Undeclared parameters fail the range check vacuously.
            None => {
                return Err(CableCellError::ParameterOutOfRange {
                    mechanism: desc.name.clone(),
                    parameter: param.clone(),
                    value,
                })
            }
            Some(spec) if !spec.admits(value) => {
                return Err(CableCellError::ParameterOutOfRange {
                    mechanism: desc.name.clone(),
                    parameter: param.clone(),
                    value,
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn lookup_mechanism<'a>(
    gprop: &'a GlobalProperties,
    cell: usize,
    name: &str,
) -> Result<&'a MechanismInfo, CableCellError> {
    gprop
        .catalogue
        .get(name)
        .ok_or_else(|| CableCellError::UnknownMechanism {
            cell,
            mechanism: name.to_string(),
        })
}

/// Accumulated painted state of one density mechanism.
#[derive(Default)]
struct DensityAcc {
    /// CV → painted membrane area.
    painted: BTreeMap<usize, f64>,
    /// Parameter → CV → Σ area·value.
    weighted: BTreeMap<String, BTreeMap<usize, f64>>,
}

/// One placed point-mechanism instance before grouping.
struct PointInstance {
    cv: usize,
    target: usize,
    /// Parameter values in catalogue (name-sorted) order.
    params: Vec<f64>,
}

/// Builds the mechanism and ion layout for `cells` over an existing
/// discretization. Pure function of its inputs; the first validation failure
/// aborts the build.
pub fn build_mechanism_data(
    gprop: &GlobalProperties,
    cells: &[CableCell],
    discretization: &Discretization,
) -> Result<MechanismData, CableCellError> {
    let table = SegmentTable::build(cells);

    let mut density: BTreeMap<String, DensityAcc> = BTreeMap::new();
    let mut points: BTreeMap<String, Vec<PointInstance>> = BTreeMap::new();
    let mut stimuli = Vec::new();
    let mut detectors = Vec::new();
    let mut gap_junction_cvs = Vec::new();

    // Density paintings.
    for (cell_index, cell) in cells.iter().enumerate() {
        for (region, what) in &cell.paintings {
            let desc = match what {
                Paintable::Density(desc) => desc,
                _ => continue,
            };
            let info = lookup_mechanism(gprop, cell_index, &desc.name)?;
            if info.kind != MechanismKind::Density {
                return Err(CableCellError::IncompatibleMechanism {
                    cell: cell_index,
                    mechanism: desc.name.clone(),
                    reason: "painted as a density mechanism but has a different kind".to_string(),
                });
            }
            check_parameters(desc, info)?;
            check_mechanism_ions(&desc.name, info, gprop)?;

            let covered = resolve_region(region, cell_index, &table, discretization);
            let acc = density.entry(desc.name.clone()).or_default();
            for (&cv, &area) in &covered {
                if area <= 0.0 {
                    continue;
                }
                *acc.painted.entry(cv).or_insert(0.0) += area;
                for (param, spec) in &info.parameters {
                    let value = desc.get(param).unwrap_or(spec.default);
                    *acc.weighted
                        .entry(param.clone())
                        .or_default()
                        .entry(cv)
                        .or_insert(0.0) += area * value;
                }
            }
        }
    }

    // Placements: point mechanisms gain target indices in placement order,
    // cells concatenated in input order.
    let mut next_target = 0usize;
    for (cell_index, cell) in cells.iter().enumerate() {
        for (location, item) in &cell.placements {
            if location.branch >= cell.num_segments() {
                return Err(CableCellError::InvalidTopology {
                    cell: cell_index,
                    reason: format!("placement branch {} out of range", location.branch),
                });
            }
            if !(0.0..=1.0).contains(&location.pos) {
                return Err(CableCellError::InvalidGeometry {
                    cell: cell_index,
                    segment: location.branch,
                    reason: format!("placement position {} outside [0, 1]", location.pos),
                });
            }
            let cv = discretization.location_cv(cell_index, location.branch, location.pos);
            match item {
                PointItem::Synapse(desc) => {
                    let info = lookup_mechanism(gprop, cell_index, &desc.name)?;
                    if info.kind != MechanismKind::Point {
                        return Err(CableCellError::IncompatibleMechanism {
                            cell: cell_index,
                            mechanism: desc.name.clone(),
                            reason: "placed as a point mechanism but has a different kind"
                                .to_string(),
                        });
                    }
                    check_parameters(desc, info)?;
                    check_mechanism_ions(&desc.name, info, gprop)?;

                    let params = info
                        .parameters
                        .iter()
                        .map(|(param, spec)| desc.get(param).unwrap_or(spec.default))
                        .collect();
                    points.entry(desc.name.clone()).or_default().push(PointInstance {
                        cv,
                        target: next_target,
                        params,
                    });
                    next_target += 1;
                }
                PointItem::Stimulus {
                    delay,
                    duration,
                    amplitude,
                } => stimuli.push(StimulusEntry {
                    cv,
                    delay: *delay,
                    duration: *duration,
                    amplitude: *amplitude,
                }),
                PointItem::Detector { threshold } => detectors.push(DetectorEntry {
                    cv,
                    threshold: *threshold,
                }),
                PointItem::GapJunctionSite => gap_junction_cvs.push(cv),
            }
        }
    }

    let mut mechanisms: BTreeMap<String, MechanismConfig> = BTreeMap::new();

    // Density configs: area-weighted parameter projection.
    for (name, acc) in &density {
        let mut config = MechanismConfig::new(MechanismKind::Density);
        for (&cv, &painted) in &acc.painted {
            config.cv.push(cv);
            config.norm_area.push(painted / discretization.cv_area[cv]);
            for (param, weighted) in &acc.weighted {
                config
                    .param_values
                    .entry(param.clone())
                    .or_default()
                    .push(weighted[&cv] / painted);
            }
        }
        mechanisms.insert(name.clone(), config);
    }

    // Point configs, coalesced where permitted.
    for (name, instances) in points {
        let info = gprop.catalogue.get(&name).expect("validated above");
        let param_names: Vec<&String> = info.parameters.keys().collect();
        let mut config = MechanismConfig::new(MechanismKind::Point);

        if gprop.coalesce_synapses && info.linear {
            // Group by (cv, bit-exact parameter vector), preserving placement
            // order inside each group.
            let mut groups: BTreeMap<(usize, Vec<u64>), (Vec<usize>, Vec<f64>)> = BTreeMap::new();
            for instance in &instances {
                let bits: Vec<u64> = instance.params.iter().map(|v| v.to_bits()).collect();
                let entry = groups
                    .entry((instance.cv, bits))
                    .or_insert_with(|| (Vec::new(), instance.params.clone()));
                entry.0.push(instance.target);
            }
            let mut ordered: Vec<((usize, Vec<u64>), (Vec<usize>, Vec<f64>))> =
                groups.into_iter().collect();
            ordered.sort_by_key(|((cv, _), (targets, _))| (*cv, targets[0]));

            for ((cv, _), (targets, params)) in ordered {
                config.cv.push(cv);
                config.multiplicity.push(targets.len());
                config.target.extend(targets);
                for (index, param) in param_names.iter().enumerate() {
                    config
                        .param_values
                        .entry((*param).clone())
                        .or_default()
                        .push(params[index]);
                }
            }
        } else {
            let mut ordered: Vec<&PointInstance> = instances.iter().collect();
            ordered.sort_by_key(|instance| (instance.cv, instance.target));
            for instance in ordered {
                config.cv.push(instance.cv);
                config.target.push(instance.target);
                for (index, param) in param_names.iter().enumerate() {
                    config
                        .param_values
                        .entry((*param).clone())
                        .or_default()
                        .push(instance.params[index]);
                }
            }
        }
        mechanisms.insert(name, config);
    }

    // Reversal potential linker.
    link_reversal_potentials(gprop, cells, discretization, &mut mechanisms)?;

    // Ion configs from the union of all mechanism dependencies.
    let ions = build_ion_configs(gprop, cells, discretization, &table, &mechanisms)?;

    Ok(MechanismData {
        mechanisms,
        ions,
        stimuli,
        detectors,
        gap_junction_cvs,
        n_targets: next_target,
    })
}

/// Audits per-cell reversal potential method assignments and extends each
/// method to exactly the CVs where another mechanism reads an ion it writes.
fn link_reversal_potentials(
    gprop: &GlobalProperties,
    cells: &[CableCell],
    discretization: &Discretization,
    mechanisms: &mut BTreeMap<String, MechanismConfig>,
) -> Result<(), CableCellError> {
    // CVs with a non-revpot reader, per ion.
    let mut reader_cvs: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    for (name, config) in mechanisms.iter() {
        let info = gprop.catalogue.get(name).expect("validated above");
        if info.kind == MechanismKind::ReversalPotential {
            continue;
        }
        for ion in &info.ions_read {
            reader_cvs
                .entry(ion.as_str())
                .or_default()
                .extend(config.cv.iter().copied());
        }
    }

    let mut method_cvs: BTreeMap<String, (MechanismDesc, BTreeSet<usize>)> = BTreeMap::new();

    for (cell_index, cell) in cells.iter().enumerate() {
        let mut methods: BTreeMap<&str, &MechanismDesc> = BTreeMap::new();
        for (ion, desc) in &gprop.default_parameters.reversal_potential_method {
            methods.insert(ion.as_str(), desc);
        }
        for (ion, desc) in &cell.local_parameters.reversal_potential_method {
            methods.insert(ion.as_str(), desc);
        }

        for (&ion, &desc) in &methods {
            let info = lookup_mechanism(gprop, cell_index, &desc.name)?;
            if info.kind != MechanismKind::ReversalPotential {
                return Err(CableCellError::IncompatibleMechanism {
                    cell: cell_index,
                    mechanism: desc.name.clone(),
                    reason: "assigned as a reversal potential method but has a different kind"
                        .to_string(),
                });
            }
            if !info.ions_write.iter().any(|w| w == ion) {
                return Err(CableCellError::IncompatibleMechanism {
                    cell: cell_index,
                    mechanism: desc.name.clone(),
                    reason: format!("does not write ion '{}'", ion),
                });
            }
            check_parameters(desc, info)?;
            check_mechanism_ions(&desc.name, info, gprop)?;

            // A multi-ion method must serve every ion it writes on this cell.
            for written in &info.ions_write {
                match methods.get(written.as_str()) {
                    Some(&other) if other == desc => {}
                    Some(_) => {
                        return Err(CableCellError::InconsistentRevpot {
                            cell: cell_index,
                            ion: written.clone(),
                            reason: format!(
                                "ion is served by a different method than '{}'",
                                desc.name
                            ),
                        })
                    }
                    None => {
                        return Err(CableCellError::InconsistentRevpot {
                            cell: cell_index,
                            ion: written.clone(),
                            reason: format!(
                                "method '{}' writes the ion but no method is assigned",
                                desc.name
                            ),
                        })
                    }
                }
            }

            let cell_cvs = discretization.cell_cv_part.range(cell_index);
            let entry = method_cvs
                .entry(desc.name.clone())
                .or_insert_with(|| (desc.clone(), BTreeSet::new()));
            if &entry.0 != desc {
                return Err(CableCellError::InconsistentRevpot {
                    cell: cell_index,
                    ion: ion.to_string(),
                    reason: format!(
                        "method '{}' is used with conflicting parameters across cells",
                        desc.name
                    ),
                });
            }
            for written in &info.ions_write {
                if let Some(readers) = reader_cvs.get(written.as_str()) {
                    entry
                        .1
                        .extend(readers.iter().copied().filter(|cv| cell_cvs.contains(cv)));
                }
            }
        }
    }

    for (name, (desc, cvs)) in method_cvs {
        if cvs.is_empty() {
            continue;
        }
        let info = gprop.catalogue.get(&name).expect("validated above");
        let mut config = MechanismConfig::new(MechanismKind::ReversalPotential);
        config.cv = cvs.into_iter().collect();
        for (param, spec) in &info.parameters {
            let value = desc.get(param).unwrap_or(spec.default);
            config
                .param_values
                .insert(param.clone(), vec![value; config.cv.len()]);
        }
        mechanisms.insert(name, config);
    }

    Ok(())
}

/// Per-segment resolution of an ion's default concentration: painting wins
/// over the cell-local override, which wins over the global default.
fn resolve_ion_scalar(
    cell: &CableCell,
    ion: &str,
    base: f64,
    internal: bool,
) -> Vec<f64> {
    let mut values = vec![base; cell.num_segments()];
    for (region, what) in &cell.paintings {
        let value = match what {
            Paintable::IonInternalConcentration(name, v) if internal && name == ion => Some(*v),
            Paintable::IonExternalConcentration(name, v) if !internal && name == ion => Some(*v),
            _ => None,
        };
        if let Some(v) = value {
            for (index, segment) in cell.segments.iter().enumerate() {
                if region.matches_segment(index, segment.tag()) {
                    values[index] = v;
                }
            }
        }
    }
    values
}

fn build_ion_configs(
    gprop: &GlobalProperties,
    cells: &[CableCell],
    discretization: &Discretization,
    table: &SegmentTable,
    mechanisms: &BTreeMap<String, MechanismConfig>,
) -> Result<BTreeMap<String, IonConfig>, CableCellError> {
    // Ion → CV → painted-area fraction of mechanisms using the ion.
    let mut usage: BTreeMap<String, BTreeMap<usize, f64>> = BTreeMap::new();
    for (name, config) in mechanisms {
        let info = gprop.catalogue.get(name).expect("validated above");
        for ion in info.ions_read.iter().chain(info.ions_write.iter()) {
            let per_cv = usage.entry(ion.clone()).or_default();
            match info.kind {
                MechanismKind::Density => {
                    for (index, &cv) in config.cv.iter().enumerate() {
                        *per_cv.entry(cv).or_insert(0.0) += config.norm_area[index];
                    }
                }
                _ => {
                    for &cv in &config.cv {
                        per_cv.insert(cv, 1.0);
                    }
                }
            }
        }
    }

    let mut ions = BTreeMap::new();
    for (ion, per_cv) in usage {
        let charge = *gprop
            .ion_species
            .get(&ion)
            .expect("species checked per mechanism");

        // Effective per-CV concentration defaults, area-averaged over atoms.
        let mut weighted_iconc = vec![0.0; discretization.ncv];
        let mut weighted_econc = vec![0.0; discretization.ncv];
        for (cell_index, cell) in cells.iter().enumerate() {
            let defaults = cell
                .local_parameters
                .ion_data
                .get(&ion)
                .or_else(|| gprop.default_parameters.ion_data.get(&ion))
                .copied()
                .unwrap_or(IonDefaults {
                    init_iconc: 0.0,
                    init_econc: 0.0,
                    init_revpot: 0.0,
                });
            let iconc = resolve_ion_scalar(cell, &ion, defaults.init_iconc, true);
            let econc = resolve_ion_scalar(cell, &ion, defaults.init_econc, false);
            let seg_range = discretization.cell_segment_part.range(cell_index);
            for atom in &discretization.atoms {
                if !seg_range.contains(&atom.segment) {
                    continue;
                }
                let (_, local_segment) = table.local[atom.segment];
                weighted_iconc[atom.cv] += atom.area * iconc[local_segment];
                weighted_econc[atom.cv] += atom.area * econc[local_segment];
            }
        }

        let mut config = IonConfig {
            cv: Vec::new(),
            init_iconc: Vec::new(),
            init_econc: Vec::new(),
            charge,
        };
        for (&cv, &fraction) in &per_cv {
            let area = discretization.cv_area[cv];
            config.cv.push(cv);
            config
                .init_iconc
                .push(fraction.min(1.0) * weighted_iconc[cv] / area);
            config.init_econc.push(weighted_econc[cv] / area);
        }
        ions.insert(ion, config);
    }

    Ok(ions)
}
