use crate::candle_aux_layers::*;
use crate::candle_loss_functions::{LOG_ALPHA_EPS, MAX_LOG_ALPHA, MIN_LOG_ALPHA};
use crate::candle_model_traits::*;

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// A shared log-alpha (1 x k) for sparse encoders
///
/// Every view's encoder should receive a clone of the same tensor so
/// that one dropout rate per latent dimension is learned.
///
/// * `nn.log_alpha` initialized ~ N(0, 0.01)
pub fn sparse_log_alpha(n_latent: usize, vb: VarBuilder) -> Result<Tensor> {
    let init = candle_nn::Init::Randn {
        mean: 0.,
        stdev: 0.01,
    };
    vb.get_with_hints((1, n_latent), "nn.log_alpha", init)
}

pub struct GaussianViewEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Option<Linear>,
    log_alpha: Option<Tensor>,
}

pub struct GaussianViewEncoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub layers: &'a [usize],
    /// if set, the log-variance is tied to the mean by variational dropout
    pub log_alpha: Option<Tensor>,
}

impl ViewEncoderT for GaussianViewEncoder {
    fn forward_t(&self, x_nd: &Tensor, _train: bool) -> Result<(Tensor, Tensor)> {
        self.latent_gaussian_params(x_nd)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn log_alpha(&self) -> Option<&Tensor> {
        self.log_alpha.as_ref()
    }
}

impl GaussianViewEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x), log_var(x))
    ///
    fn latent_gaussian_params(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)> {
        let max_mean = (self.n_features as f64).sqrt(); // stabilize
        let min_mean = -max_mean; // mean
        let min_lv = -8.; // and log variance
        let max_lv = 8.; //

        let h_nl = self.fc.forward(x_nd)?;
        let z_mean_nk = self.z_mean.forward(&h_nl)?.clamp(min_mean, max_mean)?;

        let z_lnvar_nk = match (&self.z_lnvar, &self.log_alpha) {
            (_, Some(log_alpha)) => {
                // ln var = ln alpha + ln(mu^2)
                let log_mu_sq = (z_mean_nk.sqr()? + LOG_ALPHA_EPS)?.log()?;
                let log_alpha = log_alpha.clamp(MIN_LOG_ALPHA, MAX_LOG_ALPHA)?;
                log_mu_sq.broadcast_add(&log_alpha)?
            }
            (Some(z_lnvar), None) => z_lnvar.forward(&h_nl)?.clamp(min_lv, max_lv)?,
            (None, None) => candle_core::bail!("encoder without a variance model"),
        };

        Ok((z_mean_nk, z_lnvar_nk))
    }

    /// Will create a new Gaussian encoder module
    /// with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.mean.weight`
    /// * `nn.enc.z.lnvar.weight` (dense mode only)
    ///
    /// # Arguments
    /// * `args.n_features` - the number of features of this view
    /// * `args.n_latent` - the latent dimension
    /// * `args.layers` - fully connected layers, each with the dim
    /// * `args.log_alpha` - shared variational dropout parameter
    /// * `vb` - variable builder
    pub fn new(args: GaussianViewEncoderArgs, vb: VarBuilder) -> Result<Self> {
        // (1) data -> fc
        let (fc, out_dim) = stack_relu_linear(args.n_features, args.layers, vb.pp("nn.enc.fc"))?;

        // (2) fc -> K
        let z_mean = candle_nn::linear(out_dim, args.n_latent, vb.pp("nn.enc.z.mean"))?;

        let z_lnvar = match args.log_alpha {
            Some(ref log_alpha) => {
                if log_alpha.dims() != [1, args.n_latent] {
                    candle_core::bail!(
                        "log_alpha should be 1 x {}, found {:?}",
                        args.n_latent,
                        log_alpha.dims()
                    );
                }
                None
            }
            None => Some(candle_nn::linear(
                out_dim,
                args.n_latent,
                vb.pp("nn.enc.z.lnvar"),
            )?),
        };

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            fc,
            z_mean,
            z_lnvar,
            log_alpha: args.log_alpha,
        })
    }
}
