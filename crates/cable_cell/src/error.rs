use thiserror::Error;

/// Error surface of the layout compiler. Reported synchronously; the first
/// failure aborts the compile with no partial artifact.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CableCellError {
    #[error("cell {cell}: invalid segment topology: {reason}")]
    InvalidTopology { cell: usize, reason: String },

    #[error("cell {cell} segment {segment}: invalid geometry: {reason}")]
    InvalidGeometry {
        cell: usize,
        segment: usize,
        reason: String,
    },

    #[error("cell {cell} segment {segment}: only the soma may sit at the root of a cell")]
    UnsupportedTopology { cell: usize, segment: usize },

    #[error("cell {cell}: unknown mechanism '{mechanism}'")]
    UnknownMechanism { cell: usize, mechanism: String },

    #[error("cell {cell}: mechanism '{mechanism}': {reason}")]
    IncompatibleMechanism {
        cell: usize,
        mechanism: String,
        reason: String,
    },

    #[error("mechanism '{mechanism}': ion '{ion}' has no species entry")]
    MissingIon { mechanism: String, ion: String },

    #[error(
        "mechanism '{mechanism}': ion '{ion}' declared with charge {declared}, \
         species table says {species}"
    )]
    IonChargeMismatch {
        mechanism: String,
        ion: String,
        declared: i32,
        species: i32,
    },

    #[error("cell {cell}: inconsistent reversal potential assignment for ion '{ion}': {reason}")]
    InconsistentRevpot {
        cell: usize,
        ion: String,
        reason: String,
    },

    #[error("mechanism '{mechanism}' parameter '{parameter}': value {value} is out of range")]
    ParameterOutOfRange {
        mechanism: String,
        parameter: String,
        value: f64,
    },
}
