//! Builds a certified reduced basis for the 1D diffusion-reaction model and evaluates it.
//!
//! Usage: `cargo run --release --example diffusion_reaction [config.json]`
//!
//! Set `RUST_LOG=info` to follow the greedy iterations.
use crb::models::DiffusionReaction1d;
use crb::{Crb, CrbConfig, DatabaseLocation, ErrorType, Parameter};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::env;

fn main() -> eyre::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => CrbConfig::from_json_file(path)?,
        None => CrbConfig {
            error_type: ErrorType::ResidualScm,
            tolerance: 1e-6,
            max_iterations: 12,
            sampling_size: 200,
            database: Some(DatabaseLocation::new("data/crb", "diffusion_reaction")),
            ..CrbConfig::default()
        },
    };

    let model = DiffusionReaction1d::new(256)?;
    let bound = model.coercivity_bound();
    let mut crb = Crb::new(model, config)?.with_coercivity_bound(bound);
    crb.offline()?;
    crb.log_convergence();

    for (mu_0, mu_1) in [(0.1, 0.1), (1.0, 1.0), (5.0, 0.3), (10.0, 10.0)] {
        let mu = Parameter::from_vec(vec![mu_0, mu_1]);
        let result = crb.run(&mu, 1e-6)?;
        println!(
            "mu = ({:5.2}, {:5.2}): output {:.10e}, bound {:?}, N = {}, condition number {:.3e}",
            mu_0, mu_1, result.output, result.error_bound, result.n, result.condition_number
        );
    }

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let report = crb.effectivity_indices(20, &mut rng)?;
    println!("effectivity indices in [{:.3}, {:.3}]", report.min, report.max);
    Ok(())
}
