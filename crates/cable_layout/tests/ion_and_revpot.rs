use cable_cell::{
    branch, default_catalogue, tagged, CableCell, CableCellError, GlobalProperties,
    MechanismCatalogue, MechanismDesc, MechanismInfo, MechanismKind, Paintable,
};
use cable_fvm::fvm_discretize;
use cable_layout::build_mechanism_data;

fn near_relative(a: f64, b: f64, relerr: f64) -> bool {
    (a - b).abs() <= relerr * a.abs().max(b.abs())
}

fn test_catalogue() -> MechanismCatalogue {
    let mut cat = default_catalogue();
    cat.register(
        "test_ca",
        MechanismInfo::new(MechanismKind::Density).reads("ca"),
    );
    cat.register(
        "test_cl_valence",
        MechanismInfo::new(MechanismKind::Density)
            .writes("cl")
            .charge("cl", -1),
    );
    cat.register(
        "read_ea",
        MechanismInfo::new(MechanismKind::Density).reads("a"),
    );
    cat.register(
        "read_ec",
        MechanismInfo::new(MechanismKind::Density).reads("c"),
    );
    cat.register(
        "write_ea",
        MechanismInfo::new(MechanismKind::ReversalPotential).writes("a"),
    );
    cat.register(
        "write_ec",
        MechanismInfo::new(MechanismKind::ReversalPotential).writes("c"),
    );
    cat.register(
        "write_eb_ec",
        MechanismInfo::new(MechanismKind::ReversalPotential)
            .writes("b")
            .writes("c"),
    );
    cat
}

/// Soma, a 100 µm stem, and three 100 µm children meeting at its end; every
/// piece 1 µm in diameter with a single compartment, so the branch-point CV
/// is built from four equal half-compartment areas.
fn stem_and_three_children() -> CableCell {
    let mut cell = CableCell::with_soma(5.0);
    let stem = cell.add_cable(0, 100.0, 0.5, 0.5, 1, 3);
    cell.add_cable(stem, 100.0, 0.5, 0.5, 1, 3);
    cell.add_cable(stem, 100.0, 0.5, 0.5, 1, 3);
    cell.add_cable(stem, 100.0, 0.5, 0.5, 1, 3);
    cell
}

#[test]
fn ion_weights_follow_painted_fraction() {
    // One painted child owns one of the four half-areas at the branch point.
    let mut cell = stem_and_three_children();
    cell.paint(branch(2), Paintable::Density(MechanismDesc::new("test_ca")));

    let gprop = GlobalProperties::new(test_catalogue());
    let d = fvm_discretize(&[cell.clone()], &gprop.default_parameters).unwrap();
    let m = build_mechanism_data(&gprop, &[cell], &d).unwrap();

    let cai = gprop.default_parameters.ion_data["ca"].init_iconc;
    let cao = gprop.default_parameters.ion_data["ca"].init_econc;

    let ca = &m.ions["ca"];
    assert_eq!(ca.cv, vec![2, 3]);
    assert_eq!(ca.charge, 2);
    assert!(near_relative(ca.init_iconc[0], cai / 4.0, 1e-12));
    assert!(near_relative(ca.init_iconc[1], cai, 1e-12));
    for &econc in &ca.init_econc {
        assert!(near_relative(econc, cao, 1e-12));
    }
}

#[test]
fn fully_painted_branches_keep_full_concentration() {
    let mut cell = stem_and_three_children();
    for b in 1..=4 {
        cell.paint(branch(b), Paintable::Density(MechanismDesc::new("test_ca")));
    }

    let gprop = GlobalProperties::new(test_catalogue());
    let d = fvm_discretize(&[cell.clone()], &gprop.default_parameters).unwrap();
    let m = build_mechanism_data(&gprop, &[cell], &d).unwrap();

    let cai = gprop.default_parameters.ion_data["ca"].init_iconc;
    let ca = &m.ions["ca"];
    assert_eq!(ca.cv, vec![1, 2, 3, 4, 5]);
    for &iconc in &ca.init_iconc {
        assert!(near_relative(iconc, cai, 1e-12));
    }
}

#[test]
fn painted_ion_concentration_overrides_default() {
    let mut cell = stem_and_three_children();
    cell.paint(branch(2), Paintable::Density(MechanismDesc::new("test_ca")));
    cell.paint(branch(2), Paintable::IonInternalConcentration("ca".into(), 8e-5));

    let gprop = GlobalProperties::new(test_catalogue());
    let d = fvm_discretize(&[cell.clone()], &gprop.default_parameters).unwrap();
    let m = build_mechanism_data(&gprop, &[cell], &d).unwrap();

    let cai = gprop.default_parameters.ion_data["ca"].init_iconc;
    let ca = &m.ions["ca"];
    assert_eq!(ca.cv, vec![2, 3]);

    // The branch-point CV mixes three default halves with one overridden
    // half; the painted fraction then scales the mixture.
    let mixed = (3.0 * cai + 8e-5) / 4.0;
    assert!(near_relative(ca.init_iconc[0], 0.25 * mixed, 1e-12));
    assert!(near_relative(ca.init_iconc[1], 8e-5, 1e-12));
}

#[test]
fn valence_verify() {
    let mut cell = CableCell::with_soma(6.0);
    cell.paint(
        tagged(1),
        Paintable::Density(MechanismDesc::new("test_cl_valence")),
    );

    let mut gprop = GlobalProperties::new(test_catalogue());
    let d = fvm_discretize(&[cell.clone()], &gprop.default_parameters).unwrap();

    // Missing the 'cl' species entirely:
    let err = build_mechanism_data(&gprop, &[cell.clone()], &d).unwrap_err();
    assert_eq!(
        err,
        CableCellError::MissingIon {
            mechanism: "test_cl_valence".to_string(),
            ion: "cl".to_string(),
        }
    );

    // Adding the ion makes the compile pass.
    gprop.add_ion("cl", -1, 1.0, 1.0, 0.0);
    assert!(build_mechanism_data(&gprop, &[cell.clone()], &d).is_ok());

    // Wrong species charge:
    gprop.ion_species.insert("cl".to_string(), -2);
    let err = build_mechanism_data(&gprop, &[cell], &d).unwrap_err();
    assert_eq!(
        err,
        CableCellError::IonChargeMismatch {
            mechanism: "test_cl_valence".to_string(),
            ion: "cl".to_string(),
            declared: -1,
            species: -2,
        }
    );
}

fn revpot_cells() -> Vec<CableCell> {
    let mut cell = CableCell::with_soma(5.0);
    let stem = cell.add_cable(0, 100.0, 0.5, 0.5, 1, 3);
    cell.add_cable(stem, 200.0, 0.5, 0.5, 1, 3);
    cell.add_cable(stem, 100.0, 0.5, 0.5, 1, 3);
    cell.paint(tagged(1), Paintable::Density(MechanismDesc::new("read_ec")));
    cell.paint(tagged(1), Paintable::Density(MechanismDesc::new("read_ea")));
    cell.paint(tagged(3), Paintable::Density(MechanismDesc::new("read_ea")));
    vec![cell.clone(), cell]
}

fn revpot_gprop() -> GlobalProperties {
    let mut gprop = GlobalProperties::new(test_catalogue());
    gprop.add_ion("a", 1, 10.0, 0.0, 0.0);
    gprop.add_ion("b", 2, 30.0, 0.0, 0.0);
    gprop.add_ion("c", 3, 50.0, 0.0, 0.0);
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("a".to_string(), MechanismDesc::new("write_ea"));
    gprop
}

#[test]
fn revpot_companion_ion_must_be_assigned() {
    let cells = revpot_cells();
    let mut gprop = revpot_gprop();
    // write_eb_ec writes both b and c, but only b is assigned.
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("b".to_string(), MechanismDesc::new("write_eb_ec"));

    let d = fvm_discretize(&cells, &gprop.default_parameters).unwrap();
    let err = build_mechanism_data(&gprop, &cells, &d).unwrap_err();
    assert!(matches!(
        err,
        CableCellError::InconsistentRevpot { cell: 0, .. }
    ));
}

#[test]
fn revpot_conflicting_cell_override_is_rejected() {
    let mut cells = revpot_cells();
    let mut gprop = revpot_gprop();
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("b".to_string(), MechanismDesc::new("write_eb_ec"));
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("c".to_string(), MechanismDesc::new("write_eb_ec"));
    // Cell 1 serves ion c with a different method.
    cells[1]
        .local_parameters
        .reversal_potential_method
        .insert("c".to_string(), MechanismDesc::new("write_ec"));

    let d = fvm_discretize(&cells, &gprop.default_parameters).unwrap();
    let err = build_mechanism_data(&gprop, &cells, &d).unwrap_err();
    assert!(matches!(
        err,
        CableCellError::InconsistentRevpot { cell: 1, .. }
    ));
}

#[test]
fn revpot_extends_only_to_reading_cvs() {
    let mut cells = revpot_cells();
    let gprop = revpot_gprop();
    // Cell 1 alone picks the multi-ion method for b and c.
    cells[1]
        .local_parameters
        .reversal_potential_method
        .insert("b".to_string(), MechanismDesc::new("write_eb_ec"));
    cells[1]
        .local_parameters
        .reversal_potential_method
        .insert("c".to_string(), MechanismDesc::new("write_eb_ec"));

    let d = fvm_discretize(&cells, &gprop.default_parameters).unwrap();
    let m = build_mechanism_data(&gprop, &cells, &d).unwrap();

    // Only the second cell's soma reads ion c within that cell, so the
    // multi-ion method is instantiated on exactly that CV.
    let soma1 = d.cell_cv_part.bounds[1];
    assert_eq!(m.mechanisms["write_eb_ec"].cv, vec![soma1]);
    assert_eq!(
        m.mechanisms["write_eb_ec"].kind,
        MechanismKind::ReversalPotential
    );

    // write_ea is assigned on both cells and a is read everywhere.
    assert_eq!(m.mechanisms["write_ea"].cv, (0..d.ncv).collect::<Vec<_>>());

    // Ion CV closure: a revpot's CVs appear in every ion it writes.
    for ion in ["b", "c"] {
        for cv in &m.mechanisms["write_eb_ec"].cv {
            assert!(m.ions[ion].cv.contains(cv));
        }
    }
    assert_eq!(m.ions["b"].cv, vec![soma1]);
    assert_eq!(m.ions["c"].cv, vec![0, soma1]);
}

#[test]
fn revpot_method_must_write_its_ion() {
    let cells = revpot_cells();
    let mut gprop = revpot_gprop();
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("b".to_string(), MechanismDesc::new("write_ec"));

    let d = fvm_discretize(&cells, &gprop.default_parameters).unwrap();
    let err = build_mechanism_data(&gprop, &cells, &d).unwrap_err();
    assert!(matches!(
        err,
        CableCellError::IncompatibleMechanism { cell: 0, .. }
    ));
}

#[test]
fn revpot_method_must_be_revpot_kind() {
    let cells = revpot_cells();
    let mut gprop = revpot_gprop();
    gprop
        .default_parameters
        .reversal_potential_method
        .insert("a".to_string(), MechanismDesc::new("pas"));

    let d = fvm_discretize(&cells, &gprop.default_parameters).unwrap();
    let err = build_mechanism_data(&gprop, &cells, &d).unwrap_err();
    assert!(matches!(
        err,
        CableCellError::IncompatibleMechanism { cell: 0, .. }
    ));
}
