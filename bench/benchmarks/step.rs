use criterion::Criterion;
use epi_propagation::cohorts::TransitSchedule;
use epi_propagation::population::{Community, Grid, GridCell, GridPosition, House, Workplace};
use epi_propagation::{
    Agent, InfectionStatus, InterventionSchedule, Places, Params, StepEngine,
    TransmissionMatrices, World,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;

const SIDE: usize = 20;
const HOUSE_SIZE: usize = 4;

/// One house per grid cell, ten houses per workplace, one community per row.
fn synthetic_world() -> World {
    let num_houses = SIDE * SIDE;
    let mut agents = Vec::with_capacity(num_houses * HOUSE_SIZE);
    let mut houses = Vec::with_capacity(num_houses);
    let mut workplaces: Vec<Workplace> = (0..num_houses / 10)
        .map(|id| Workplace {
            id,
            ..Workplace::default()
        })
        .collect();
    let mut communities: Vec<Community> = (0..SIDE).map(|id| Community::new(id, vec![])).collect();

    for h in 0..num_houses {
        let cell = GridPosition::new(h % SIDE, h / SIDE);
        let mut members = Vec::with_capacity(HOUSE_SIZE);
        for _ in 0..HOUSE_SIZE {
            let id = agents.len();
            let mut agent = Agent::new(id, 35, 7, h, cell.y, cell);
            if id % 97 == 0 {
                agent.infection_status = InfectionStatus::Infective;
            }
            if id % 2 == 0 {
                agent.workplace = Some(h / 10);
                workplaces[h / 10].members.push(id);
            }
            communities[cell.y].members.push(id);
            members.push(id);
            agents.push(agent);
        }
        houses.push(House {
            id: h,
            members,
            grid_cell: cell,
            ..House::default()
        });
    }
    let nbr_cells = Grid::from_fn(SIDE, SIDE, |pos| GridCell {
        houses: vec![pos.y * SIDE + pos.x],
        ..GridCell::default()
    });
    World {
        agents,
        places: Places {
            houses,
            workplaces,
            communities,
            nbr_cells,
            ..Places::default()
        },
    }
}

pub fn step_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    let mut world = synthetic_world();
    let engine = StepEngine::new(
        Params::default(),
        TransmissionMatrices::default(),
        InterventionSchedule::default(),
        None,
        TransitSchedule::default(),
        &world,
    )
    .expect("Valid synthetic world");
    let mut rng = StdRng::seed_from_u64(8);

    group.bench_function("run_step", |b| {
        let mut t = 0;
        b.iter(|| {
            t += 1;
            black_box(engine.run_step(&mut world, black_box(t), &mut rng));
        });
    });

    group.finish();
}
