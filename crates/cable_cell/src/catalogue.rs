use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MechanismKind {
    Density,
    Point,
    ReversalPotential,
    GapJunction,
}

/// Declared metadata for one mechanism parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub default: f64,
    pub units: Option<String>,
    pub range: Option<(f64, f64)>,
}

impl ParameterSpec {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            units: None,
            range: None,
        }
    }

    pub fn with_range(default: f64, lo: f64, hi: f64) -> Self {
        Self {
            default,
            units: None,
            range: Some((lo, hi)),
        }
    }

    pub fn admits(&self, value: f64) -> bool {
        match self.range {
            Some((lo, hi)) => value >= lo && value <= hi,
            None => value.is_finite(),
        }
    }
}

/// Catalogue entry: kind, parameter table, ion dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismInfo {
    pub kind: MechanismKind,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub ions_read: Vec<String>,
    pub ions_write: Vec<String>,
    /// Charge the mechanism assumes for an ion, where it declares one.
    pub ion_charge: BTreeMap<String, i32>,
    /// Linear point mechanisms may be coalesced.
    pub linear: bool,
}

impl MechanismInfo {
    pub fn new(kind: MechanismKind) -> Self {
        Self {
            kind,
            parameters: BTreeMap::new(),
            ions_read: Vec::new(),
            ions_write: Vec::new(),
            ion_charge: BTreeMap::new(),
            linear: false,
        }
    }

    pub fn parameter(mut self, name: &str, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.to_string(), spec);
        self
    }

    pub fn reads(mut self, ion: &str) -> Self {
        self.ions_read.push(ion.to_string());
        self
    }

    pub fn writes(mut self, ion: &str) -> Self {
        self.ions_write.push(ion.to_string());
        self
    }

    pub fn charge(mut self, ion: &str, charge: i32) -> Self {
        self.ion_charge.insert(ion.to_string(), charge);
        self
    }

    pub fn linear(mut self) -> Self {
        self.linear = true;
        self
    }

    pub fn uses_ion(&self, ion: &str) -> bool {
        self.ions_read.iter().any(|i| i == ion) || self.ions_write.iter().any(|i| i == ion)
    }
}

/// In-memory mechanism catalogue. Read through `&self` only, so a single
/// catalogue may back concurrent compiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MechanismCatalogue {
    mechanisms: BTreeMap<String, MechanismInfo>,
}

impl MechanismCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, info: MechanismInfo) {
        self.mechanisms.insert(name.to_string(), info);
    }

    pub fn has(&self, name: &str) -> bool {
        self.mechanisms.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MechanismInfo> {
        self.mechanisms.get(name)
    }

    pub fn kind(&self, name: &str) -> Option<MechanismKind> {
        self.get(name).map(|info| info.kind)
    }

    pub fn is_linear(&self, name: &str) -> bool {
        self.get(name).map(|info| info.linear).unwrap_or(false)
    }
}

/// Catalogue with the stock density and point mechanisms.
pub fn default_catalogue() -> MechanismCatalogue {
    let mut cat = MechanismCatalogue::new();

    cat.register(
        "pas",
        MechanismInfo::new(MechanismKind::Density)
            .parameter("g", ParameterSpec::with_range(0.001, 0.0, f64::INFINITY))
            .parameter("e", ParameterSpec::new(-70.0)),
    );

    cat.register(
        "hh",
        MechanismInfo::new(MechanismKind::Density)
            .parameter("gnabar", ParameterSpec::with_range(0.12, 0.0, f64::INFINITY))
            .parameter("gkbar", ParameterSpec::with_range(0.036, 0.0, f64::INFINITY))
            .parameter("gl", ParameterSpec::with_range(0.0003, 0.0, f64::INFINITY))
            .parameter("el", ParameterSpec::new(-54.3))
            .reads("na")
            .reads("k")
            .writes("na")
            .writes("k"),
    );

    cat.register(
        "expsyn",
        MechanismInfo::new(MechanismKind::Point)
            .parameter("e", ParameterSpec::new(0.0))
            .parameter("tau", ParameterSpec::with_range(2.0, 0.0, f64::INFINITY))
            .linear(),
    );

    cat.register(
        "exp2syn",
        MechanismInfo::new(MechanismKind::Point)
            .parameter("e", ParameterSpec::new(0.0))
            .parameter("tau1", ParameterSpec::with_range(0.5, 0.0, f64::INFINITY))
            .parameter("tau2", ParameterSpec::with_range(2.0, 0.0, f64::INFINITY))
            .linear(),
    );

    cat.register(
        "nernst",
        MechanismInfo::new(MechanismKind::ReversalPotential)
            .parameter("coeff", ParameterSpec::new(1.0)),
    );

    cat
}
