//! End-to-end modeling scenarios against the preview kernel

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arp_core::geometry::{coincident_dimensions, flattened};
use arp_core::{
    Action, ActionLog, BuildState, ControlPoint, NodeId, NodeKind, NodeMove, PathSnapshot, Pose,
    RebuildScheduler, Scene, SceneConfig,
};
use arp_kernel::{BooleanOp, CornerStyle, KernelCall, PreviewKernel, PrimitiveKind, ShapeHandle};
use glam::{DQuat, DVec3};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Arc<PreviewKernel>, Scene) {
    init_tracing();
    let kernel = Arc::new(PreviewKernel::new());
    let scene = Scene::new(kernel.clone(), SceneConfig::default());
    (kernel, scene)
}

fn unit_box() -> PrimitiveKind {
    PrimitiveKind::Box {
        width: 1.0,
        height: 1.0,
        length: 1.0,
    }
}

fn primitive(scene: &mut Scene, kind: PrimitiveKind, at: DVec3) -> NodeId {
    scene.create_primitive(kind, Pose::from_position(at)).unwrap()
}

fn path(scene: &mut Scene, points: &[DVec3], closed: bool) -> NodeId {
    scene
        .create_path(
            points
                .iter()
                .map(|p| ControlPoint::new(*p, CornerStyle::Sharp))
                .collect(),
            closed,
        )
        .unwrap()
}

fn triangle(scene: &mut Scene) -> NodeId {
    path(scene, &[DVec3::ZERO, DVec3::new(0.2, 0.0, 0.0), DVec3::new(0.0, 0.2, 0.0)], true)
}

fn rail(scene: &mut Scene) -> NodeId {
    path(scene, &[DVec3::ZERO, DVec3::new(0.0, 0.0, 1.0)], false)
}

// ============== Handle discipline ==============

#[test]
fn every_handle_is_freed_exactly_once() {
    let (kernel, mut scene) = setup();
    let a = primitive(&mut scene, unit_box(), DVec3::ZERO);
    let b = primitive(&mut scene, PrimitiveKind::Sphere { radius: 0.5 }, DVec3::X * 0.5);
    for _ in 0..3 {
        scene.invalidate(a).unwrap();
        scene.rebuild(a).unwrap();
    }
    let combined = scene.combine(a, b, BooleanOp::Join).unwrap();
    scene.invalidate(b).unwrap();
    scene.rebuild(b).unwrap();

    let profile = path(
        &mut scene,
        &[DVec3::new(0.5, 0.0, 0.0), DVec3::new(0.7, 0.5, 0.0), DVec3::new(0.4, 1.0, 0.0)],
        false,
    );
    let axis = path(&mut scene, &[DVec3::ZERO, DVec3::Y], false);
    let revolution = scene.revolve(profile, axis).unwrap();

    for id in [combined, revolution] {
        scene.delete_node(id).unwrap();
    }
    let mut log = ActionLog::new();
    log.reset(&mut scene).unwrap();
    assert!(scene.is_empty());

    let journal = kernel.journal();
    let mut frees: HashMap<ShapeHandle, usize> = HashMap::new();
    for call in &journal {
        if let KernelCall::Free(handle) = call {
            *frees.entry(handle.clone()).or_default() += 1;
        }
    }
    for output in journal.iter().filter_map(KernelCall::output) {
        assert_eq!(frees.get(output), Some(&1), "{} freed wrongly", output);
    }
    assert!(kernel.live_handles().is_empty());
    assert!(kernel.violations().is_empty());
}

// ============== Rebuild propagation ==============

#[test]
fn leaf_transform_rebuilds_each_ancestor_once_bottom_up() {
    let (kernel, mut scene) = setup();
    let leaf = primitive(&mut scene, unit_box(), DVec3::ZERO);
    let sphere = primitive(&mut scene, PrimitiveKind::Sphere { radius: 0.5 }, DVec3::X);
    let inner = scene.combine(leaf, sphere, BooleanOp::Join).unwrap();
    let cylinder = primitive(
        &mut scene,
        PrimitiveKind::Cylinder {
            radius: 0.2,
            height: 2.0,
        },
        DVec3::ZERO,
    );
    let outer = scene.combine(inner, cylinder, BooleanOp::Cut).unwrap();
    kernel.clear_journal();

    scene.set_position(leaf, DVec3::new(0.0, 0.5, 0.0)).unwrap();
    scene.apply_transform(leaf).unwrap();

    let booleans: Vec<_> = kernel
        .journal()
        .into_iter()
        .filter_map(|call| match call {
            KernelCall::Boolean { a, output, .. } => Some((a, output)),
            _ => None,
        })
        .collect();
    assert_eq!(booleans.len(), 2);
    let inner_handle = scene.node(inner).unwrap().handle().cloned();
    assert_eq!(booleans[0].1, inner_handle);
    assert_eq!(Some(booleans[1].0.clone()), inner_handle);
    assert_eq!(booleans[1].1, scene.node(outer).unwrap().handle().cloned());
    assert_eq!(scene.node(outer).unwrap().name, "((sphere+box)-cylinder)");
}

// ============== Undo/redo inverse law ==============

#[derive(Debug, PartialEq)]
struct Observed {
    live: usize,
    holders: BTreeSet<NodeId>,
    roots: Vec<NodeId>,
    positions: HashMap<NodeId, Vec<DVec3>>,
    holes: BTreeSet<NodeId>,
}

fn observe(kernel: &PreviewKernel, scene: &Scene) -> Observed {
    let mut positions = HashMap::new();
    let mut holders = BTreeSet::new();
    let mut holes = BTreeSet::new();
    for node in scene.nodes() {
        let mut observed = vec![scene.world_position(node.id).unwrap()];
        if node.is_path() {
            observed.extend(scene.points_world(node.id).unwrap());
        }
        positions.insert(node.id, observed);
        if node.handle().is_some() {
            holders.insert(node.id);
        }
        if node.is_hole() {
            holes.insert(node.id);
        }
    }
    Observed {
        live: kernel.live_handles().len(),
        holders,
        roots: scene.roots().to_vec(),
        positions,
        holes,
    }
}

fn assert_observably_equal(a: &Observed, b: &Observed) {
    assert_eq!(a.live, b.live);
    assert_eq!(a.holders, b.holders);
    assert_eq!(a.roots, b.roots);
    assert_eq!(a.holes, b.holes);
    assert_eq!(a.positions.len(), b.positions.len());
    for (id, before) in &a.positions {
        let after = &b.positions[id];
        assert_eq!(before.len(), after.len());
        for (p, q) in before.iter().zip(after.iter()) {
            assert!(p.distance(*q) < 1e-6, "{} moved from {} to {}", id, p, q);
        }
    }
}

fn check_inverse(perform: impl FnOnce(&mut Scene) -> Action) {
    let (kernel, mut scene) = setup();
    let mut log = ActionLog::new();
    let action = perform(&mut scene);
    let name = action.name();
    log.action_done(&mut scene, action).unwrap();
    let done = observe(&kernel, &scene);

    assert!(log.undo(&mut scene).unwrap(), "undo {}", name);
    assert!(log.redo(&mut scene).unwrap(), "redo {}", name);
    assert_observably_equal(&done, &observe(&kernel, &scene));
    assert!(kernel.violations().is_empty());
}

#[test]
fn undo_redo_restores_structural_actions() {
    check_inverse(|scene| {
        let node = primitive(scene, unit_box(), DVec3::Y);
        Action::PrimitiveBuilt { node }
    });
    check_inverse(|scene| {
        let a = primitive(scene, unit_box(), DVec3::ZERO);
        let b = primitive(scene, PrimitiveKind::Sphere { radius: 0.5 }, DVec3::X * 0.4);
        let node = scene.combine(a, b, BooleanOp::Cut).unwrap();
        Action::BooleanCombined { node, a, b }
    });
    check_inverse(|scene| {
        let profile = triangle(scene);
        let rail = rail(scene);
        let node = scene.sweep(profile, rail).unwrap();
        Action::SweepBuilt { node }
    });
    check_inverse(|scene| {
        let profile = path(
            scene,
            &[DVec3::new(0.5, 0.0, 0.0), DVec3::new(0.8, 0.5, 0.0), DVec3::new(0.4, 1.0, 0.0)],
            false,
        );
        let axis = path(scene, &[DVec3::ZERO, DVec3::Y], false);
        let node = scene.revolve(profile, axis).unwrap();
        Action::RevolveBuilt { node }
    });
    check_inverse(|scene| {
        let first = triangle(scene);
        let node = scene.loft(vec![first]).unwrap();
        Action::LoftBuilt { node }
    });
    check_inverse(|scene| {
        let first = triangle(scene);
        let loft = scene.loft(vec![first]).unwrap();
        let profile = path(
            scene,
            &[DVec3::new(0.0, 0.0, 1.0), DVec3::new(0.3, 0.0, 1.0), DVec3::new(0.0, 0.3, 1.0)],
            true,
        );
        scene.add_profile(loft, profile).unwrap();
        Action::LoftProfileAdded { loft, profile }
    });
}

#[test]
fn undo_redo_restores_transform_actions() {
    check_inverse(|scene| {
        let node = primitive(scene, unit_box(), DVec3::ZERO);
        let after = DVec3::new(1.0, 2.0, 3.0);
        scene.set_position(node, after).unwrap();
        scene.apply_transform(node).unwrap();
        Action::Translation {
            moves: vec![NodeMove {
                node,
                before: DVec3::ZERO,
                after,
            }],
        }
    });
    check_inverse(|scene| {
        let node = primitive(scene, unit_box(), DVec3::X);
        let handle = scene.node(node).unwrap().handle().cloned().unwrap();
        let rotation_after = DQuat::from_rotation_z(0.7);
        scene.set_rotation(node, rotation_after).unwrap();
        scene.apply_transform(node).unwrap();
        Action::Rotation {
            handle,
            rotation_before: DQuat::IDENTITY,
            rotation_after,
            position_before: DVec3::X,
            position_after: DVec3::X,
        }
    });
    check_inverse(|scene| {
        let node = primitive(scene, PrimitiveKind::Sphere { radius: 0.5 }, DVec3::ZERO);
        let handle = scene.node(node).unwrap().handle().cloned().unwrap();
        let position_after = DVec3::new(0.0, 0.25, 0.0);
        scene.set_scale(node, DVec3::splat(1.5)).unwrap();
        scene.set_position(node, position_after).unwrap();
        scene.apply_transform(node).unwrap();
        Action::Scaling {
            handle,
            scale_delta: DVec3::splat(0.5),
            position_before: DVec3::ZERO,
            position_after,
        }
    });
    check_inverse(|scene| {
        let node = primitive(scene, unit_box(), DVec3::ZERO);
        scene.set_hole(node, true).unwrap();
        Action::SolidOrHole { node, hole: true }
    });
}

#[test]
fn undo_redo_restores_path_edits() {
    check_inverse(|scene| {
        let id = path(scene, &[DVec3::ZERO, DVec3::X], false);
        scene.set_cursor_position(DVec3::Y);
        scene
            .append_point(id, DVec3::Y, CornerStyle::Sharp, false)
            .unwrap();
        scene.rebuild(id).unwrap();
        let before = scene.snapshot_path(id).unwrap();

        let floating = scene.non_fixed_point(id).unwrap().unwrap();
        scene.set_point_fixed(id, floating, true).unwrap();
        scene
            .append_point(id, DVec3::Y, CornerStyle::Round, false)
            .unwrap();
        scene.rebuild(id).unwrap();
        let after = scene.snapshot_path(id).unwrap();
        Action::PathPointAdded {
            path: id,
            before,
            after,
        }
    });
    check_inverse(|scene| {
        let id = path(
            scene,
            &[DVec3::ZERO, DVec3::X, DVec3::new(1.0, 1.0, 0.0), DVec3::Y],
            false,
        );
        let ids: Vec<_> = scene.path_shape(id).unwrap().points.iter().map(|p| p.id).collect();
        let (inserted, index) = scene.insert_between(id, ids[1], ids[2]).unwrap();
        let point = scene.path_shape(id).unwrap().points[index].clone();
        assert_eq!(point.id, inserted);
        Action::PointInserted {
            path: id,
            point,
            index,
        }
    });
    check_inverse(|scene| {
        let id = path(scene, &[DVec3::ZERO, DVec3::X, DVec3::Y], false);
        let point = scene.path_shape(id).unwrap().points[2].id;
        let after = DVec3::new(0.0, 2.0, 0.0);
        scene.move_point(id, point, after).unwrap();
        Action::PointMoved {
            path: id,
            point,
            before: DVec3::Y,
            after,
        }
    });
    check_inverse(|scene| {
        let id = path(scene, &[DVec3::ZERO, DVec3::X, DVec3::Y], false);
        let point = scene.path_shape(id).unwrap().points[1].id;
        scene.toggle_corner_style(id, point).unwrap();
        Action::CornerStyleToggled { path: id, point }
    });
}

// ============== Path closure and flattening ==============

#[test]
fn near_coincident_ends_build_closed_and_flatten_is_stable() {
    let (kernel, mut scene) = setup();
    let id = path(
        &mut scene,
        &[
            DVec3::ZERO,
            DVec3::new(1.0, 0.0, 0.02),
            DVec3::new(1.0, 1.0, -0.03),
            DVec3::new(0.0, 1.0, 0.01),
            DVec3::new(0.0005, 0.0, 0.0),
        ],
        false,
    );
    let handle = scene.node(id).unwrap().handle().cloned().unwrap();
    let (points, closed) = kernel.path_points(&handle).unwrap();
    assert!(closed);
    assert_eq!(points.len(), 4);

    scene.flatten(id).unwrap();
    let once = scene.points_world(id).unwrap();
    scene.flatten(id).unwrap();
    let twice = scene.points_world(id).unwrap();
    for (a, b) in once.iter().zip(twice.iter()) {
        assert!(a.distance(*b) < 1e-9);
    }
}

#[test]
fn final_shape_purges_path_drawing_steps() {
    let (_, mut scene) = setup();
    let mut log = ActionLog::new();
    let profile = triangle(&mut scene);
    let rail = rail(&mut scene);
    for id in [profile, profile, rail] {
        let snapshot = scene.snapshot_path(id).unwrap();
        log.action_done(
            &mut scene,
            Action::PathPointAdded {
                path: id,
                before: PathSnapshot::default(),
                after: snapshot,
            },
        )
        .unwrap();
    }
    assert_eq!(log.undo_len(), 3);

    let sweep = scene.sweep(profile, rail).unwrap();
    log.action_done(&mut scene, Action::SweepBuilt { node: sweep }).unwrap();
    assert_eq!(log.undo_len(), 1);
    assert!(scene.contains(profile));
}

// ============== Modeling scenarios ==============

#[test]
fn cut_box_with_sphere() {
    let (kernel, mut scene) = setup();
    let cube = primitive(&mut scene, unit_box(), DVec3::ZERO);
    let ball = primitive(&mut scene, PrimitiveKind::Sphere { radius: 0.5 }, DVec3::new(0.4, 0.3, 0.0));
    let cube_handle = scene.node(cube).unwrap().handle().cloned().unwrap();
    let ball_handle = scene.node(ball).unwrap().handle().cloned().unwrap();
    kernel.clear_journal();

    let cut = scene.combine(cube, ball, BooleanOp::Cut).unwrap();

    let produced: Vec<_> = kernel
        .journal()
        .iter()
        .filter_map(|call| call.output().cloned())
        .collect();
    assert_eq!(produced.len(), 1);
    assert_eq!(scene.node(cut).unwrap().handle(), produced.first());
    assert!(kernel.is_live(&cube_handle));
    assert!(kernel.is_live(&ball_handle));
    assert!(!scene.is_visible(cube));
    assert!(!scene.is_visible(ball));
    assert!(scene.is_visible(cut));
    assert_eq!(scene.node(cut).unwrap().name, "(box-sphere)");
}

#[test]
fn collinear_points_have_one_dimension() {
    let (_, mut scene) = setup();
    let id = path(
        &mut scene,
        &[
            DVec3::ZERO,
            DVec3::new(1.0, 1.0, 1.0),
            DVec3::new(2.0, 2.0, 2.0),
            DVec3::new(3.5, 3.5, 3.5),
        ],
        false,
    );
    assert_eq!(scene.coincident_dimensions(id).unwrap(), 1);
}

#[test]
fn revolution_closes_profile_on_the_axis() {
    let (_, mut scene) = setup();
    let profile = path(
        &mut scene,
        &[DVec3::new(0.5, 0.0, 0.1), DVec3::new(0.9, 0.5, -0.1), DVec3::new(0.4, 1.0, 0.05)],
        false,
    );
    let axis = path(&mut scene, &[DVec3::ZERO, DVec3::new(0.0, 1.5, 0.0)], false);
    let revolution = scene.revolve(profile, axis).unwrap();

    let node = scene.node(revolution).unwrap();
    assert_eq!(node.state(), BuildState::Built);
    let NodeKind::Revolution {
        derived: Some(derived),
        ..
    } = &node.kind
    else {
        panic!("revolution has no derived profile");
    };
    assert_eq!(derived.points.len(), 5);

    let tolerance = scene.config().coincidence_tolerance;
    assert!(coincident_dimensions(&derived.points, tolerance) <= 2);
    let again = flattened(&derived.points, tolerance);
    for (a, b) in derived.points.iter().zip(again.iter()) {
        assert!(a.distance(*b) < 1e-9);
    }
}

// ============== Background rebuilds ==============

#[test]
fn dragging_an_operand_while_builds_are_in_flight() {
    init_tracing();
    let kernel = Arc::new(PreviewKernel::new().with_latency(Duration::from_millis(5)));
    let config = SceneConfig {
        worker_threads: 3,
        ..SceneConfig::default()
    };
    let mut scene = Scene::new(kernel.clone(), config.clone());
    let profile = triangle(&mut scene);
    let rail = rail(&mut scene);
    let sweep = scene.sweep(profile, rail).unwrap();
    let tip = scene.path_shape(rail).unwrap().points[1].id;

    let mut scheduler = RebuildScheduler::new(&config).unwrap();
    for step in 1..=20 {
        let target = DVec3::new(step as f64 * 0.05, 0.0, 1.0);
        scene.set_point_world(rail, tip, target).unwrap();
        scheduler.request(&mut scene, rail).unwrap();
        scheduler.pump(&mut scene).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }
    scheduler.wait_idle(&mut scene).unwrap();

    assert_eq!(scene.node(rail).unwrap().state(), BuildState::Built);
    assert_eq!(scene.node(sweep).unwrap().state(), BuildState::Built);
    let (points, _) = kernel
        .path_points(scene.node(rail).unwrap().handle().unwrap())
        .unwrap();
    assert!(points[1].abs_diff_eq(DVec3::new(1.0, 0.0, 1.0), 1e-9));
    assert_eq!(kernel.live_handles(), scene.live_handles());
    assert!(kernel.violations().is_empty());
}
