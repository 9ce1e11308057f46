use cable_cell::{
    tagged, CableCell, GlobalProperties, MechanismDesc, Mlocation, Paintable, PointItem,
};
use cable_fvm::fvm_discretize;
use cable_layout::{build_mechanism_data, MechanismData};

fn ball_and_stick() -> CableCell {
    let mut cell = CableCell::with_soma(12.6157 / 2.0);
    cell.add_cable(0, 200.0, 0.5, 0.5, 4, 3);
    cell.paint(tagged(3), Paintable::Density(MechanismDesc::new("pas")));
    cell
}

fn place_synapse(cell: &mut CableCell, pos: f64, desc: MechanismDesc) {
    cell.place(Mlocation::new(1, pos), PointItem::Synapse(desc));
}

fn syn(e: f64, tau: f64) -> MechanismDesc {
    MechanismDesc::new("expsyn").set("e", e).set("tau", tau)
}

fn syn2(e: f64, tau1: f64) -> MechanismDesc {
    MechanismDesc::new("exp2syn").set("e", e).set("tau1", tau1)
}

fn layout(cell: CableCell, coalesce: bool) -> MechanismData {
    let mut gprop = GlobalProperties::default();
    gprop.coalesce_synapses = coalesce;
    let d = fvm_discretize(&[cell.clone()], &gprop.default_parameters).unwrap();
    build_mechanism_data(&gprop, &[cell], &d).unwrap()
}

#[test]
fn distinct_locations_stay_separate() {
    let mut cell = ball_and_stick();
    for pos in [0.3, 0.5, 0.7, 0.9] {
        place_synapse(&mut cell, pos, MechanismDesc::new("expsyn"));
    }
    let m = layout(cell, true);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 3, 4, 5]);
    assert_eq!(expsyn.multiplicity, vec![1, 1, 1, 1]);
}

#[test]
fn varieties_split_per_mechanism() {
    let mut cell = ball_and_stick();
    place_synapse(&mut cell, 0.3, MechanismDesc::new("expsyn"));
    place_synapse(&mut cell, 0.5, MechanismDesc::new("exp2syn"));
    place_synapse(&mut cell, 0.7, MechanismDesc::new("expsyn"));
    place_synapse(&mut cell, 0.9, MechanismDesc::new("exp2syn"));
    let m = layout(cell, true);

    assert_eq!(m.mechanisms["expsyn"].cv, vec![2, 4]);
    assert_eq!(m.mechanisms["expsyn"].multiplicity, vec![1, 1]);
    assert_eq!(m.mechanisms["exp2syn"].cv, vec![3, 5]);
    assert_eq!(m.mechanisms["exp2syn"].multiplicity, vec![1, 1]);
}

#[test]
fn disabled_coalescing_keeps_instances() {
    let mut cell = ball_and_stick();
    for pos in [0.3, 0.5, 0.7, 0.9] {
        place_synapse(&mut cell, pos, MechanismDesc::new("expsyn"));
    }
    let m = layout(cell, false);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 3, 4, 5]);
    assert!(expsyn.multiplicity.is_empty());
    assert_eq!(expsyn.target, vec![0, 1, 2, 3]);
}

#[test]
fn co_located_identical_instances_merge() {
    let mut cell = ball_and_stick();
    for pos in [0.3, 0.3, 0.7, 0.7] {
        place_synapse(&mut cell, pos, MechanismDesc::new("expsyn"));
    }
    let m = layout(cell, true);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 4]);
    assert_eq!(expsyn.multiplicity, vec![2, 2]);
    assert_eq!(expsyn.target, vec![0, 1, 2, 3]);
}

#[test]
fn parameter_values_gate_merging() {
    let mut cell = ball_and_stick();
    place_synapse(&mut cell, 0.3, syn(0.0, 0.2));
    place_synapse(&mut cell, 0.3, syn(0.0, 0.2));
    place_synapse(&mut cell, 0.3, syn(0.1, 0.2));
    place_synapse(&mut cell, 0.7, syn(0.1, 0.2));
    let m = layout(cell, true);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 2, 4]);
    assert_eq!(expsyn.multiplicity, vec![2, 1, 1]);
    assert_eq!(expsyn.target, vec![0, 1, 2, 3]);
    assert_eq!(expsyn.param_values["e"], vec![0.0, 0.1, 0.1]);
    assert_eq!(expsyn.param_values["tau"], vec![0.2, 0.2, 0.2]);

    // The multiplicity vector partitions the target vector.
    let total: usize = expsyn.multiplicity.iter().sum();
    assert_eq!(total, expsyn.target.len());
}

#[test]
fn interleaved_groups_keep_placement_order() {
    let mut cell = ball_and_stick();
    place_synapse(&mut cell, 0.7, syn(0.0, 3.0));
    place_synapse(&mut cell, 0.7, syn(1.0, 3.0));
    place_synapse(&mut cell, 0.7, syn(0.0, 3.0));
    place_synapse(&mut cell, 0.7, syn(1.0, 3.0));
    place_synapse(&mut cell, 0.3, syn(0.0, 2.0));
    place_synapse(&mut cell, 0.3, syn(1.0, 2.0));
    place_synapse(&mut cell, 0.3, syn(0.0, 2.0));
    place_synapse(&mut cell, 0.3, syn(1.0, 2.0));
    let m = layout(cell, true);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 2, 4, 4]);
    assert_eq!(expsyn.multiplicity, vec![2, 2, 2, 2]);
    assert_eq!(expsyn.target, vec![4, 6, 5, 7, 0, 2, 1, 3]);
    assert_eq!(expsyn.param_values["e"], vec![0.0, 1.0, 0.0, 1.0]);
    assert_eq!(expsyn.param_values["tau"], vec![2.0, 2.0, 3.0, 3.0]);
}

#[test]
fn mixed_varieties_coalesce_independently() {
    let mut cell = ball_and_stick();
    place_synapse(&mut cell, 0.3, syn(1.0, 2.0));
    place_synapse(&mut cell, 0.3, syn2(4.0, 1.0));
    place_synapse(&mut cell, 0.3, syn(1.0, 2.0));
    place_synapse(&mut cell, 0.3, syn(5.0, 1.0));
    place_synapse(&mut cell, 0.3, syn2(1.0, 3.0));
    place_synapse(&mut cell, 0.3, syn(1.0, 2.0));
    place_synapse(&mut cell, 0.7, syn2(2.0, 2.0));
    place_synapse(&mut cell, 0.7, syn2(2.0, 1.0));
    place_synapse(&mut cell, 0.7, syn2(2.0, 1.0));
    place_synapse(&mut cell, 0.7, syn2(2.0, 2.0));
    let m = layout(cell, true);

    let expsyn = &m.mechanisms["expsyn"];
    assert_eq!(expsyn.cv, vec![2, 2]);
    assert_eq!(expsyn.multiplicity, vec![3, 1]);
    assert_eq!(expsyn.target, vec![0, 2, 5, 3]);
    assert_eq!(expsyn.param_values["e"], vec![1.0, 5.0]);

    let exp2syn = &m.mechanisms["exp2syn"];
    assert_eq!(exp2syn.cv, vec![2, 2, 4, 4]);
    assert_eq!(exp2syn.multiplicity, vec![1, 1, 2, 2]);
    assert_eq!(exp2syn.target, vec![1, 4, 6, 9, 7, 8]);
    assert_eq!(exp2syn.param_values["e"], vec![4.0, 1.0, 2.0, 2.0]);
    assert_eq!(exp2syn.param_values["tau1"], vec![1.0, 3.0, 2.0, 1.0]);
}

#[test]
fn detectors_and_stimuli_do_not_consume_targets() {
    let mut cell = ball_and_stick();
    place_synapse(&mut cell, 0.3, MechanismDesc::new("expsyn"));
    cell.place(Mlocation::new(0, 0.0), PointItem::Detector { threshold: 10.0 });
    cell.place(
        Mlocation::new(1, 1.0),
        PointItem::Stimulus {
            delay: 5.0,
            duration: 80.0,
            amplitude: 0.45,
        },
    );
    cell.place(Mlocation::new(1, 0.5), PointItem::GapJunctionSite);
    place_synapse(&mut cell, 0.9, MechanismDesc::new("expsyn"));
    let m = layout(cell, true);

    assert_eq!(m.n_targets, 2);
    assert_eq!(m.mechanisms["expsyn"].target, vec![0, 1]);

    assert_eq!(m.detectors.len(), 1);
    assert_eq!(m.detectors[0].cv, 0);
    assert_eq!(m.stimuli.len(), 1);
    assert_eq!(m.stimuli[0].cv, 5);
    assert_eq!(m.stimuli[0].amplitude, 0.45);
    assert_eq!(m.gap_junction_cvs, vec![3]);
}
