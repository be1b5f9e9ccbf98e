use crate::common_io::*;

use candle_core::{Device, Tensor};
use log::info;
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub struct SimArgs {
    pub n_samples: usize,
    /// number of features in each view
    pub view_dims: Vec<usize>,
    pub z_dim: usize,
    /// standard deviation of the observation noise
    pub noise: f32,
    /// threshold the views at zero to make binary data
    pub binary: bool,
}

pub struct SimOut {
    /// one n x d_v matrix per view
    pub views: Vec<Tensor>,
    /// shared latent n x k
    pub latent: Tensor,
    /// one k x d_v loading matrix per view
    pub loadings: Vec<Tensor>,
}

fn sample_matrix<R: Rng>(
    rows: usize,
    cols: usize,
    normal: &Normal<f32>,
    rng: &mut R,
) -> anyhow::Result<Tensor> {
    let data: Vec<f32> = (0..(rows * cols)).map(|_| normal.sample(rng)).collect();
    Ok(Tensor::from_vec(data, (rows, cols), &Device::Cpu)?)
}

/// Generate views sharing one latent factor matrix
///
/// ```text
/// Z(n,k) ~ N(0, 1)
/// W_v(k,d) ~ N(0, 1/K)
/// X_v = Z W_v + noise * E,  E(n,d) ~ N(0, 1)
/// ```
///
/// * `args` - simulation parameters
/// * `rng` - any random generator; a seeded `StdRng` makes it reproducible
pub fn simulate_multiview<R: Rng>(args: &SimArgs, rng: &mut R) -> anyhow::Result<SimOut> {
    let nn = args.n_samples;
    let kk = args.z_dim;

    if nn == 0 || kk == 0 || args.view_dims.is_empty() {
        return Err(anyhow::anyhow!(
            "need positive samples ({}), latent dims ({}) and at least one view",
            nn,
            kk
        ));
    }

    if args.view_dims.contains(&0) {
        return Err(anyhow::anyhow!("empty view in {:?}", args.view_dims));
    }

    if !(args.noise.is_finite() && args.noise >= 0.) {
        return Err(anyhow::anyhow!("invalid noise level {}", args.noise));
    }

    let std_normal = Normal::new(0f32, 1f32)?;
    let loading_normal = Normal::new(0f32, 1. / (kk as f32).sqrt())?;

    let latent = sample_matrix(nn, kk, &std_normal, rng)?;

    let mut views = Vec::with_capacity(args.view_dims.len());
    let mut loadings = Vec::with_capacity(args.view_dims.len());

    for &dd in args.view_dims.iter() {
        let w_kd = sample_matrix(kk, dd, &loading_normal, rng)?;
        let eps_nd = sample_matrix(nn, dd, &std_normal, rng)?;
        let mut x_nd = (latent.matmul(&w_kd)? + (eps_nd * args.noise as f64)?)?;

        if args.binary {
            x_nd = x_nd.gt(0f64)?.to_dtype(candle_core::DType::F32)?;
        }

        views.push(x_nd);
        loadings.push(w_kd);
    }

    Ok(SimOut {
        views,
        latent,
        loadings,
    })
}

/// Simulate and write `{out}.view_{v}.tsv.gz` and `{out}.latent.tsv.gz`
pub fn simulate_multiview_files<R: Rng>(
    args: &SimArgs,
    rng: &mut R,
    out: &str,
) -> anyhow::Result<SimOut> {
    let sim = simulate_multiview(args, rng)?;

    mkdir(out)?;

    for (v, x_nd) in sim.views.iter().enumerate() {
        let file = format!("{}.view_{}.tsv.gz", out, v);
        write_tensor_delim(x_nd, &file, "\t")?;
        info!("view {}: {:?} -> {}", v, x_nd.dims(), file);
    }

    let latent_file = format!("{}.latent.tsv.gz", out);
    write_tensor_delim(&sim.latent, &latent_file, "\t")?;
    info!("latent: {:?} -> {}", sim.latent.dims(), latent_file);

    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn args() -> SimArgs {
        SimArgs {
            n_samples: 12,
            view_dims: vec![5, 3],
            z_dim: 2,
            noise: 0.1,
            binary: false,
        }
    }

    #[test]
    fn shapes_and_reproducibility() -> anyhow::Result<()> {
        let a = simulate_multiview(&args(), &mut StdRng::seed_from_u64(42))?;
        let b = simulate_multiview(&args(), &mut StdRng::seed_from_u64(42))?;

        assert_eq!(a.latent.dims(), &[12, 2]);
        assert_eq!(a.views[0].dims(), &[12, 5]);
        assert_eq!(a.views[1].dims(), &[12, 3]);
        assert_eq!(a.loadings[1].dims(), &[2, 3]);
        assert_eq!(a.views[1].to_vec2::<f32>()?, b.views[1].to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn binary_views() -> anyhow::Result<()> {
        let sim_args = SimArgs {
            binary: true,
            ..args()
        };
        let sim = simulate_multiview(&sim_args, &mut StdRng::seed_from_u64(1))?;
        for x in sim.views[0].flatten_all()?.to_vec1::<f32>()? {
            assert!(x == 0. || x == 1.);
        }
        Ok(())
    }

    #[test]
    fn writes_prefixed_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("sim");
        let out = out.to_str().ok_or(anyhow::anyhow!("path"))?;
        simulate_multiview_files(&args(), &mut StdRng::seed_from_u64(7), out)?;

        let x1 = read_tensor_delim(&format!("{}.view_1.tsv.gz", out))?;
        assert_eq!(x1.dims(), &[12, 3]);
        let z = read_tensor_delim(&format!("{}.latent.tsv.gz", out))?;
        assert_eq!(z.dims(), &[12, 2]);
        Ok(())
    }

    #[test]
    fn rejects_empty_views() {
        let sim_args = SimArgs {
            view_dims: vec![4, 0],
            ..args()
        };
        assert!(simulate_multiview(&sim_args, &mut StdRng::seed_from_u64(0)).is_err());
    }
}
