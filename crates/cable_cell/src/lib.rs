#![forbid(unsafe_code)]

pub mod catalogue;
pub mod error;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use catalogue::{
    default_catalogue, MechanismCatalogue, MechanismInfo, MechanismKind, ParameterSpec,
};
pub use error::CableCellError;

/// Morphological primitive: a spherical soma or a tapered cable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Soma {
        radius: f64,
        tag: i32,
    },
    Cable {
        parent: usize,
        /// Radius samples at sub-segment boundaries, one more than `lengths`.
        radii: Vec<f64>,
        /// Axial length of each linear sub-segment [µm].
        lengths: Vec<f64>,
        ncomp: usize,
        tag: i32,
    },
}

impl Segment {
    pub fn is_soma(&self) -> bool {
        matches!(self, Segment::Soma { .. })
    }

    pub fn tag(&self) -> i32 {
        match self {
            Segment::Soma { tag, .. } => *tag,
            Segment::Cable { tag, .. } => *tag,
        }
    }

    pub fn length(&self) -> f64 {
        match self {
            Segment::Soma { radius, .. } => 2.0 * radius,
            Segment::Cable { lengths, .. } => lengths.iter().sum(),
        }
    }

    pub fn ncomp(&self) -> usize {
        match self {
            Segment::Soma { .. } => 1,
            Segment::Cable { ncomp, .. } => *ncomp,
        }
    }
}

/// A point on the morphology: branch index plus relative position in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mlocation {
    pub branch: usize,
    pub pos: f64,
}

impl Mlocation {
    pub fn new(branch: usize, pos: f64) -> Self {
        Self { branch, pos }
    }
}

/// Region expression over the morphology, evaluated by folding over
/// sub-compartments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Region {
    Tagged(i32),
    Branch(usize),
    Location(usize, f64),
    Join(Box<Region>, Box<Region>),
    Intersect(Box<Region>, Box<Region>),
    Complement(Box<Region>),
}

pub fn tagged(tag: i32) -> Region {
    Region::Tagged(tag)
}

pub fn branch(index: usize) -> Region {
    Region::Branch(index)
}

pub fn location(branch: usize, pos: f64) -> Region {
    Region::Location(branch, pos)
}

pub fn join(a: Region, b: Region) -> Region {
    Region::Join(Box::new(a), Box::new(b))
}

pub fn intersect(a: Region, b: Region) -> Region {
    Region::Intersect(Box::new(a), Box::new(b))
}

pub fn complement(r: Region) -> Region {
    Region::Complement(Box::new(r))
}

impl Region {
    /// Whole-segment predicate, used when resolving scalar membrane
    /// properties. A `Location` region has zero measure and covers no
    /// segment.
    pub fn matches_segment(&self, segment: usize, tag: i32) -> bool {
        match self {
            Region::Tagged(t) => *t == tag,
            Region::Branch(b) => *b == segment,
            Region::Location(..) => false,
            Region::Join(a, b) => {
                a.matches_segment(segment, tag) || b.matches_segment(segment, tag)
            }
            Region::Intersect(a, b) => {
                a.matches_segment(segment, tag) && b.matches_segment(segment, tag)
            }
            Region::Complement(r) => !r.matches_segment(segment, tag),
        }
    }
}

/// Density mechanism selector with parameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismDesc {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

impl MechanismDesc {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn set(mut self, param: &str, value: f64) -> Self {
        self.params.insert(param.to_string(), value);
        self
    }

    pub fn get(&self, param: &str) -> Option<f64> {
        self.params.get(param).copied()
    }
}

impl From<&str> for MechanismDesc {
    fn from(name: &str) -> Self {
        MechanismDesc::new(name)
    }
}

/// Property attached to a region by a painting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Paintable {
    Density(MechanismDesc),
    MembraneCapacitance(f64),
    AxialResistivity(f64),
    InitMembranePotential(f64),
    Temperature(f64),
    IonInternalConcentration(String, f64),
    IonExternalConcentration(String, f64),
}

/// Item attached at a single location by a placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointItem {
    Synapse(MechanismDesc),
    Stimulus {
        delay: f64,
        duration: f64,
        amplitude: f64,
    },
    Detector {
        threshold: f64,
    },
    GapJunctionSite,
}

/// Per-ion default data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IonDefaults {
    pub init_iconc: f64,
    pub init_econc: f64,
    pub init_revpot: f64,
}

/// Global default parameters applied where neither a painting nor a cell
/// override says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableCellParameters {
    /// Specific membrane capacitance [pF/µm²].
    pub membrane_capacitance: f64,
    /// Bulk axial resistivity [Ω·cm].
    pub axial_resistivity: f64,
    /// Initial membrane potential [mV].
    pub init_membrane_potential: f64,
    /// Temperature [K].
    pub temperature_k: f64,
    pub ion_data: BTreeMap<String, IonDefaults>,
    /// Reversal potential method per ion; absent means the constant initial
    /// value is used and no mechanism is instantiated.
    pub reversal_potential_method: BTreeMap<String, MechanismDesc>,
}

/// The standard defaults of the simulator.
pub fn neuron_parameter_defaults() -> CableCellParameters {
    let mut ion_data = BTreeMap::new();
    ion_data.insert(
        "na".to_string(),
        IonDefaults {
            init_iconc: 10.0,
            init_econc: 140.0,
            init_revpot: 50.0,
        },
    );
    ion_data.insert(
        "k".to_string(),
        IonDefaults {
            init_iconc: 54.4,
            init_econc: 2.5,
            init_revpot: -77.0,
        },
    );
    ion_data.insert(
        "ca".to_string(),
        IonDefaults {
            init_iconc: 5e-5,
            init_econc: 2.0,
            init_revpot: 132.46,
        },
    );

    CableCellParameters {
        membrane_capacitance: 0.01,
        axial_resistivity: 35.64,
        init_membrane_potential: -65.0,
        temperature_k: 279.45,
        ion_data,
        reversal_potential_method: BTreeMap::new(),
    }
}

/// Per-cell overrides of the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellLocalParameters {
    pub membrane_capacitance: Option<f64>,
    pub axial_resistivity: Option<f64>,
    pub init_membrane_potential: Option<f64>,
    pub temperature_k: Option<f64>,
    pub ion_data: BTreeMap<String, IonDefaults>,
    pub reversal_potential_method: BTreeMap<String, MechanismDesc>,
}

/// Global properties shared by a whole compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalProperties {
    pub catalogue: MechanismCatalogue,
    pub default_parameters: CableCellParameters,
    /// Ion species table: name → charge.
    pub ion_species: BTreeMap<String, i32>,
    pub coalesce_synapses: bool,
}

impl GlobalProperties {
    pub fn new(catalogue: MechanismCatalogue) -> Self {
        let mut props = Self {
            catalogue,
            default_parameters: neuron_parameter_defaults(),
            ion_species: BTreeMap::new(),
            coalesce_synapses: true,
        };
        props.ion_species.insert("na".to_string(), 1);
        props.ion_species.insert("k".to_string(), 1);
        props.ion_species.insert("ca".to_string(), 2);
        props
    }

    /// Registers an ion species together with its default data.
    pub fn add_ion(&mut self, name: &str, charge: i32, iconc: f64, econc: f64, revpot: f64) {
        self.ion_species.insert(name.to_string(), charge);
        self.default_parameters.ion_data.insert(
            name.to_string(),
            IonDefaults {
                init_iconc: iconc,
                init_econc: econc,
                init_revpot: revpot,
            },
        );
    }
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self::new(default_catalogue())
    }
}

/// High-level cable cell description: a segment tree plus the paintings and
/// placements accumulated before discretization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CableCell {
    pub segments: Vec<Segment>,
    pub paintings: Vec<(Region, Paintable)>,
    pub placements: Vec<(Mlocation, PointItem)>,
    pub local_parameters: CellLocalParameters,
}

impl CableCell {
    /// A cell with a spherical soma at the root, tag 1.
    pub fn with_soma(radius: f64) -> Self {
        Self::with_tagged_soma(radius, 1)
    }

    pub fn with_tagged_soma(radius: f64, tag: i32) -> Self {
        CableCell {
            segments: vec![Segment::Soma { radius, tag }],
            ..Default::default()
        }
    }

    /// Appends a linearly tapered cable and returns its segment index.
    pub fn add_cable(
        &mut self,
        parent: usize,
        length: f64,
        r_prox: f64,
        r_dist: f64,
        ncomp: usize,
        tag: i32,
    ) -> usize {
        self.add_cable_profile(parent, vec![r_prox, r_dist], vec![length], ncomp, tag)
    }

    /// Appends a cable with an explicit piecewise-linear radius profile.
    pub fn add_cable_profile(
        &mut self,
        parent: usize,
        radii: Vec<f64>,
        lengths: Vec<f64>,
        ncomp: usize,
        tag: i32,
    ) -> usize {
        self.segments.push(Segment::Cable {
            parent,
            radii,
            lengths,
            ncomp,
            tag,
        });
        self.segments.len() - 1
    }

    pub fn paint(&mut self, region: Region, what: Paintable) {
        self.paintings.push((region, what));
    }

    pub fn place(&mut self, location: Mlocation, item: PointItem) {
        self.placements.push((location, item));
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Parent index per segment; the root points at itself.
    pub fn parent_index(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .map(|(index, segment)| match segment {
                Segment::Soma { .. } => index,
                Segment::Cable { parent, .. } => *parent,
            })
            .collect()
    }

    /// Number of synapse placements, i.e. the cell's share of the global
    /// target index space.
    pub fn num_targets(&self) -> usize {
        self.placements
            .iter()
            .filter(|(_, item)| matches!(item, PointItem::Synapse(_)))
            .count()
    }
}
