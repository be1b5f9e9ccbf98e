use crate::cli::init_logger;
use crate::simulate::*;

use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// number of samples (rows shared by all views)
    #[arg(long, short = 'n', default_value_t = 1000)]
    n_samples: usize,

    /// number of features per view (comma-separated)
    #[arg(long, value_delimiter(','), default_values_t = vec![20, 30])]
    view_dims: Vec<usize>,

    /// latent dimension
    #[arg(long, short = 'k', default_value_t = 2)]
    z_dim: usize,

    /// observation noise standard deviation
    #[arg(long, default_value_t = 0.1)]
    noise: f32,

    /// threshold views at zero to make binary data
    #[arg(long, default_value_t = false)]
    binary: bool,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let sim_args = SimArgs {
        n_samples: args.n_samples,
        view_dims: args.view_dims.clone(),
        z_dim: args.z_dim,
        noise: args.noise,
        binary: args.binary,
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let sim = simulate_multiview_files(&sim_args, &mut rng, &args.out)?;

    info!(
        "simulated {} views of {} samples with {} latent dims",
        sim.views.len(),
        args.n_samples,
        args.z_dim
    );
    Ok(())
}
