use common::geometry::*;
use common::pbrt::*;
use common::rng::RNG;
use common::sampling::DirectionalMapping;
use float_cmp::*;
use guiding::*;

/// Mock sampler: every pass fires rays from random points in random
/// directions and records radiance from a single bright direction.
struct LobeSampler {
    rng: RNG,
    light: Vector3f,
    rays_per_sample: usize,
    passes: usize,
}

impl LobeSampler {
    fn new(light: Vector3f) -> Self {
        Self {
            rng: RNG::new(7),
            light: light.normalize(),
            rays_per_sample: 1024,
            passes: 0,
        }
    }

    fn radiance(&self, d: &Vector3f) -> Float {
        let c = d.dot(&self.light);
        if c > 0.9 {
            10.0
        } else {
            0.0
        }
    }
}

impl ExternalSampler for LobeSampler {
    fn sample_pass(&mut self, buffers: &mut GuidingBuffers) -> Result<()> {
        let n = buffers.samples_per_pass as usize * self.rays_per_sample;
        for _ in 0..n {
            let p = Point3f::new(
                self.rng.uniform_float(),
                self.rng.uniform_float(),
                self.rng.uniform_float(),
            );
            let state = buffers.locate_state(&p);
            let u = self.rng.uniform_point2f();
            let sample = buffers.sample_direction(state, &u);
            if !(sample.pdf > 0.0) {
                buffers.record_invalid(state);
                continue;
            }
            let radiance = self.radiance(&sample.direction);
            let action = buffers.action_of(state, &sample.direction);
            buffers.record(state, action, radiance);
        }
        self.passes += 1;
        Ok(())
    }

    fn update_directional_trees(&mut self, buffers: &mut GuidingBuffers, threshold: Float, max_depth: u32) -> Result<()> {
        update_buffers(buffers, threshold, max_depth).map(|_| ())
    }
}

/// Direction through the centre of a grid action's cell.
fn cell_center(mapping: DirectionalMapping, action: usize, n_uv: usize) -> Vector3f {
    mapping.grid_direction(action, &Point2f::new(0.5, 0.5), n_uv)
}

fn argmax(row: &[Float]) -> usize {
    (0..row.len())
        .max_by(|&a, &b| row[a].partial_cmp(&row[b]).unwrap())
        .unwrap()
}

fn cycle() -> CycleConfig {
    CycleConfig {
        spp: 8,
        samples_per_pass: Some(2),
        ..Default::default()
    }
}

#[test]
fn grid_guiding_concentrates_on_the_light() {
    let config = GuidingConfig {
        n_cube: 2,
        n_uv: 4,
        directional_mapping_method: DirectionalMapping::Cylindrical,
        epsilon: 0.05,
        ..Default::default()
    };
    let light_action = 5;
    let light = cell_center(config.directional_mapping_method, light_action, 4);
    let table = RadianceTable::new(config.clone(), None).unwrap();
    let mut controller = GuidingCycleController::new(table, cycle()).unwrap();
    let mut sampler = LobeSampler::new(light);
    let report = controller.run(&mut sampler).unwrap();
    assert_eq!(report.completed_samples, 8);
    assert_eq!(report.passes, 4);
    assert_eq!(sampler.passes, 4);

    let table = controller.table();
    for s in 0..table.state_count() {
        let row = table.pdf_row(s);
        let sum: Float = row.iter().sum();
        assert!(approx_eq!(f32, sum, 1.0, epsilon = 1e-5));
        assert_eq!(argmax(row), light_action);
        assert!(row.iter().all(|&p| p >= 0.05 / 16.0));
    }

    let buffers = controller.buffers();
    let p = Point3f::new(0.3, 0.6, 0.2);
    let s = buffers.locate_state(&p);
    assert!(buffers.direction_pdf(s, &light) > INV_FOUR_PI);
}

#[test]
fn cumulative_rows_drive_the_same_cycle() {
    let config = GuidingConfig {
        n_cube: 1,
        n_uv: 4,
        directional_mapping_method: DirectionalMapping::Cylindrical,
        use_cdf: true,
        ..Default::default()
    };
    let light_action = 10;
    let light = cell_center(config.directional_mapping_method, light_action, 4);
    let table = RadianceTable::new(config.clone(), None).unwrap();
    let mut controller = GuidingCycleController::new(table, cycle()).unwrap();
    controller.run(&mut LobeSampler::new(light)).unwrap();

    let cdf = controller.buffers().q_table_pdf.row(0).to_vec();
    assert!(cdf.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(cdf[15], 1.0);
    assert_eq!(argmax(controller.table().pdf_row(0)), light_action);
}

#[test]
fn quadtree_guiding_refines_towards_the_light() {
    for update in [
        QuadTreeUpdateType::Sequential,
        QuadTreeUpdateType::ParallelCpu,
        QuadTreeUpdateType::ExternalParallel,
    ] {
        let config = GuidingConfig {
            n_cube: 2,
            directional_type: DirectionalType::Quadtree,
            max_quadtree_count: 128,
            quad_tree_update_type: update,
            n_threads: 2,
            ..Default::default()
        };
        let light = Vector3f::new(0.0, 1.0, 0.0);
        let table = RadianceTable::new(config.clone(), None).unwrap();
        let mut controller = GuidingCycleController::new(table, cycle()).unwrap();
        controller.run(&mut LobeSampler::new(light)).unwrap();

        let table = controller.table();
        let mapping = config.directional_mapping_method;
        for s in 0..table.state_count() {
            let tree = table.directional_tree(s).unwrap();
            assert!(tree.size() > 1, "{update}: state {s} never refined");
            assert!(tree.size() <= 128);
            let values = table.value_row(s);
            let towards = tree.query(mapping, &light, values);
            let away = tree.query(mapping, &-light, values);
            assert!(towards > away, "{update}: state {s} density {towards} <= {away}");
        }
    }
}

#[test]
fn binary_tree_states_split_where_samples_land() {
    let config = GuidingConfig {
        spatial_type: SpatialType::BinaryTree,
        binary_tree_max_size: 64,
        binary_tree_threshold: 50.0,
        binary_tree_k: 0.0,
        n_uv: 4,
        directional_mapping_method: DirectionalMapping::Cylindrical,
        ..Default::default()
    };
    let table = RadianceTable::new(config, None).unwrap();
    let mut controller = GuidingCycleController::new(table, cycle()).unwrap();
    let report = controller.run(&mut LobeSampler::new(Vector3f::new(0.0, 0.0, -1.0))).unwrap();
    assert!(report.guiding_updates >= 1);

    let tree = controller.table().spatial_tree().unwrap();
    assert!(tree.len() > 1);
    assert!(tree.len() <= 64);
    assert_eq!(controller.buffers().stree_current_size as usize, tree.len());

    let total: Float = tree.leaves().map(|l| tree.nodes()[l].bounds.volume()).sum();
    assert!(approx_eq!(f32, total, 1.0, epsilon = 1e-4));
    for p in [Point3f::new(0.1, 0.1, 0.1), Point3f::new(0.9, 0.4, 0.7)] {
        assert_eq!(controller.table().state_index(&p), controller.buffers().locate_state(&p));
    }
}
