use crate::candle_distributions::*;
use crate::candle_joint_representation::*;
use crate::candle_model_traits::*;

use candle_core::{bail, DType, Result, Tensor};
use candle_nn::ops;
use log::debug;

/// Model configuration, fixed for the lifetime of a `MultiViewVae`
#[derive(Clone, Debug)]
pub struct MultiViewVaeArgs<'a> {
    /// "PoE" or "Mean"
    pub join_type: &'a str,
    /// add a N(0, 1) expert to the product of experts
    pub poe_prior_expert: bool,
    /// use the sparse KL approximation instead of the prior KL
    pub sparse: bool,
    /// weight on the KL term
    pub beta: f64,
    /// latent dimension
    pub z_dim: usize,
    /// reference distribution of the KL term
    pub prior: GaussianPrior,
    /// latent dimensions with dropout rate >= threshold are zeroed
    pub threshold: f64,
}

impl Default for MultiViewVaeArgs<'_> {
    fn default() -> Self {
        Self {
            join_type: "PoE",
            poe_prior_expert: false,
            sparse: false,
            beta: 1.,
            z_dim: 2,
            prior: GaussianPrior::default(),
            threshold: 0.2,
        }
    }
}

/// Output of a forward pass, consumed by `loss_function`
pub struct ForwardOut {
    /// joint posterior q(z | x_1, ..., x_V)
    pub qz_x: Box<dyn DistributionT>,
    /// reconstruction distributions p(x_v | z), one per view
    pub px_zs: Vec<Box<dyn DistributionT>>,
}

/// Scalar loss terms; `loss = kl - ll`
pub struct MvaeLoss {
    pub loss: Tensor,
    pub kl: Tensor,
    pub ll: Tensor,
}

impl MvaeLoss {
    /// `(loss, kl, ll)` as plain numbers
    pub fn to_scalars(&self) -> Result<(f32, f32, f32)> {
        let scalar = |x: &Tensor| -> Result<f32> { x.to_dtype(DType::F32)?.to_scalar::<f32>() };
        Ok((scalar(&self.loss)?, scalar(&self.kl)?, scalar(&self.ll)?))
    }
}

/// Multi-view variational autoencoder with a joint latent representation
///
/// Each view has its own encoder and decoder. Per-view posteriors are
/// combined by a product of experts or by their mean, and a single
/// latent draw from the joint posterior is decoded into every view.
pub struct MultiViewVae<Enc, Dec, F = GaussianFactory>
where
    Enc: ViewEncoderT,
    Dec: ViewDecoderT,
    F: DistributionFactoryT,
{
    encoders: Vec<Enc>,
    decoders: Vec<Dec>,
    posterior: F,
    join_type: JoinType,
    poe_prior_expert: bool,
    sparse: bool,
    beta: f64,
    z_dim: usize,
    prior: GaussianPrior,
    log_alpha: Option<Tensor>,
    threshold: f64,
}

impl<Enc, Dec> MultiViewVae<Enc, Dec, GaussianFactory>
where
    Enc: ViewEncoderT,
    Dec: ViewDecoderT,
{
    /// Build a model with a Gaussian joint posterior
    /// * `args` - model configuration
    /// * `encoders` - one encoder per view
    /// * `decoders` - one decoder per view, in the same order
    pub fn new(
        args: MultiViewVaeArgs,
        encoders: Vec<Enc>,
        decoders: Vec<Dec>,
    ) -> anyhow::Result<Self> {
        Self::with_posterior(args, encoders, decoders, GaussianFactory)
    }
}

impl<Enc, Dec, F> MultiViewVae<Enc, Dec, F>
where
    Enc: ViewEncoderT,
    Dec: ViewDecoderT,
    F: DistributionFactoryT,
{
    /// Build a model with an injected posterior family
    pub fn with_posterior(
        args: MultiViewVaeArgs,
        encoders: Vec<Enc>,
        decoders: Vec<Dec>,
        posterior: F,
    ) -> anyhow::Result<Self> {
        let join_type: JoinType = args.join_type.parse()?;

        if !(args.beta.is_finite() && args.beta >= 0.) {
            anyhow::bail!("[mvae] beta must be non-negative: {}", args.beta);
        }

        if args.z_dim == 0 {
            anyhow::bail!("[mvae] z_dim must be positive");
        }

        if encoders.is_empty() {
            anyhow::bail!("[mvae] need at least one view");
        }

        if encoders.len() != decoders.len() {
            anyhow::bail!(
                "[mvae] {} encoders vs. {} decoders",
                encoders.len(),
                decoders.len()
            );
        }

        for (v, (enc, dec)) in encoders.iter().zip(decoders.iter()).enumerate() {
            if enc.dim_latent() != args.z_dim || dec.dim_latent() != args.z_dim {
                anyhow::bail!(
                    "[mvae] view {}: encoder latent {} and decoder latent {} should be {}",
                    v,
                    enc.dim_latent(),
                    dec.dim_latent(),
                    args.z_dim
                );
            }
            if enc.dim_obs() != dec.dim_obs() {
                anyhow::bail!(
                    "[mvae] view {}: encoder takes {} features, decoder gives {}",
                    v,
                    enc.dim_obs(),
                    dec.dim_obs()
                );
            }
        }

        let log_alpha = shared_log_alpha(&encoders)?;

        if let Some(log_alpha) = log_alpha.as_ref() {
            if !args.sparse {
                anyhow::bail!("[mvae] sparse encoders need sparse = true");
            }
            if log_alpha.dims() != [1, args.z_dim] {
                anyhow::bail!(
                    "[mvae] log_alpha should be 1 x {}, found {:?}",
                    args.z_dim,
                    log_alpha.dims()
                );
            }
        }

        if !(0. ..=1.).contains(&args.threshold) {
            anyhow::bail!("[mvae] threshold must be in [0, 1]: {}", args.threshold);
        }

        debug!(
            "[mvae] {} views, z_dim = {}, join = {}, sparse = {}, beta = {}",
            encoders.len(),
            args.z_dim,
            join_type,
            args.sparse,
            args.beta
        );

        Ok(Self {
            encoders,
            decoders,
            posterior,
            join_type,
            poe_prior_expert: args.poe_prior_expert,
            sparse: args.sparse,
            beta: args.beta,
            z_dim: args.z_dim,
            prior: args.prior,
            log_alpha,
            threshold: args.threshold,
        })
    }

    pub fn n_views(&self) -> usize {
        self.encoders.len()
    }

    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn encoders(&self) -> &[Enc] {
        &self.encoders
    }

    fn check_views(&self, x_vec: &[Tensor]) -> Result<usize> {
        if x_vec.len() != self.n_views() {
            bail!(
                "[mvae] expected {} views, found {}",
                self.n_views(),
                x_vec.len()
            );
        }

        let mut nn = None;
        for (v, (x_nd, enc)) in x_vec.iter().zip(self.encoders.iter()).enumerate() {
            let (n, d) = x_nd.dims2()?;
            if d != enc.dim_obs() {
                bail!(
                    "[mvae] view {}: expected {} features, found {}",
                    v,
                    enc.dim_obs(),
                    d
                );
            }
            match nn {
                Some(n0) if n0 != n => {
                    bail!("[mvae] view {}: {} samples vs. {} in view 0", v, n, n0)
                }
                _ => nn = Some(n),
            }
        }
        nn.ok_or_else(|| candle_core::Error::Msg("[mvae] no views".to_string()))
    }

    /// Encode every view and combine them into the joint posterior
    ///
    /// * `x_vec` - one (n x d_v) matrix per view, aligned by row
    /// * `train` - training mode flag passed to the encoders
    pub fn encode(&self, x_vec: &[Tensor], train: bool) -> Result<Box<dyn DistributionT>> {
        let nn = self.check_views(x_vec)?;

        let mut mu_vec = Vec::with_capacity(self.n_views());
        let mut var_vec = Vec::with_capacity(self.n_views());

        for (v, (x_nd, enc)) in x_vec.iter().zip(self.encoders.iter()).enumerate() {
            let (mu_nk, lnvar_nk) = enc.forward_t(x_nd, train)?;
            if mu_nk.dims() != [nn, self.z_dim] || lnvar_nk.dims() != [nn, self.z_dim] {
                bail!(
                    "[mvae] view {}: encoder returned {:?} and {:?}, expected [{}, {}]",
                    v,
                    mu_nk.dims(),
                    lnvar_nk.dims(),
                    nn,
                    self.z_dim
                );
            }
            mu_vec.push(mu_nk);
            var_vec.push(lnvar_nk.exp()?);
        }

        let (mu_nk, var_nk) =
            join_representations(self.join_type, &mu_vec, &var_vec, self.poe_prior_expert)?;

        self.posterior.build(mu_nk, var_nk.sqrt()?)
    }

    /// Draw one latent sample and decode it into every view
    ///
    /// * `qz_x` - the joint posterior
    /// * `train` - stochastic draw if true, posterior mean otherwise
    pub fn decode(
        &self,
        qz_x: &dyn DistributionT,
        train: bool,
    ) -> Result<Vec<Box<dyn DistributionT>>> {
        let z_nk = qz_x.sample(train)?;
        self.decoders
            .iter()
            .map(|dec| dec.forward_t(&z_nk, train))
            .collect()
    }

    /// encode, then decode
    pub fn forward(&self, x_vec: &[Tensor], train: bool) -> Result<ForwardOut> {
        let qz_x = self.encode(x_vec, train)?;
        let px_zs = self.decode(qz_x.as_ref(), train)?;
        Ok(ForwardOut { qz_x, px_zs })
    }

    /// beta * mean_n sum_k KL(n, k)
    ///
    /// Against the prior, or the sparse approximation in sparse mode.
    pub fn calc_kl(&self, qz_x: &dyn DistributionT) -> Result<Tensor> {
        let kl_nk = if self.sparse {
            qz_x.sparse_kl_divergence()?
        } else {
            let prior = self.prior.expand(qz_x.loc())?;
            qz_x.kl_divergence(&prior)?
        };
        let last = kl_nk.rank() - 1;
        kl_nk.sum(last)?.mean(0)? * self.beta
    }

    /// sum_v mean_n sum_d log p(x_v(n, d) | z)
    pub fn calc_ll(&self, x_vec: &[Tensor], px_zs: &[Box<dyn DistributionT>]) -> Result<Tensor> {
        if px_zs.len() != self.n_views() || x_vec.len() != self.n_views() {
            bail!(
                "[mvae] {} reconstructions and {} views for a {}-view model",
                px_zs.len(),
                x_vec.len(),
                self.n_views()
            );
        }

        let mut ll: Option<Tensor> = None;
        for (v, (x_nd, px_z)) in x_vec.iter().zip(px_zs).enumerate() {
            if px_z.loc().dims() != x_nd.dims() {
                bail!(
                    "[mvae] view {}: reconstruction {:?} vs. observed {:?}",
                    v,
                    px_z.loc().dims(),
                    x_nd.dims()
                );
            }
            let llik_nd = px_z.log_likelihood(x_nd)?;
            let last = llik_nd.rank() - 1;
            let ll_v = llik_nd.sum(last)?.mean(0)?;
            ll = Some(match ll {
                Some(acc) => (acc + ll_v)?,
                None => ll_v,
            });
        }
        ll.ok_or_else(|| candle_core::Error::Msg("[mvae] no views".to_string()))
    }

    /// negative ELBO: `loss = beta * KL - LL`
    pub fn loss_function(&self, x_vec: &[Tensor], fwd: &ForwardOut) -> Result<MvaeLoss> {
        let kl = self.calc_kl(fwd.qz_x.as_ref())?;
        let ll = self.calc_ll(x_vec, &fwd.px_zs)?;
        let loss = (&kl - &ll)?;
        Ok(MvaeLoss { loss, kl, ll })
    }

    /// Variational dropout rate per latent dimension (1 x k),
    /// alpha / (1 + alpha); only available with a shared log alpha
    pub fn dropout(&self) -> Result<Option<Tensor>> {
        self.log_alpha
            .as_ref()
            .map(|log_alpha| ops::sigmoid(&log_alpha.detach()))
            .transpose()
    }

    /// Zero out latent dimensions whose dropout rate reaches `threshold`
    pub fn apply_threshold(&self, z_nk: &Tensor) -> Result<Tensor> {
        match self.dropout()? {
            Some(dropout_1k) => {
                let keep_1k = dropout_1k.lt(self.threshold)?.to_dtype(z_nk.dtype())?;
                z_nk.broadcast_mul(&keep_1k)
            }
            None => Ok(z_nk.clone()),
        }
    }

    /// Joint posterior means in evaluation mode (n x k); inactive
    /// dimensions are zeroed in sparse mode
    pub fn latent_mean(&self, x_vec: &[Tensor]) -> Result<Tensor> {
        let qz_x = self.encode(x_vec, false)?;
        let z_nk = qz_x.sample(false)?;
        if self.sparse {
            self.apply_threshold(&z_nk)
        } else {
            Ok(z_nk)
        }
    }

    /// Per-view reconstructions in evaluation mode, each (n x d_v)
    pub fn reconstruct(&self, x_vec: &[Tensor]) -> Result<Vec<Tensor>> {
        let fwd = self.forward(x_vec, false)?;
        fwd.px_zs.iter().map(|px_z| px_z.sample(false)).collect()
    }
}

/// The log alpha tensor shared by sparse encoders
///
/// Either no encoder carries one, or all of them carry the same tensor.
fn shared_log_alpha<Enc: ViewEncoderT>(encoders: &[Enc]) -> anyhow::Result<Option<Tensor>> {
    let first = encoders.first().and_then(|enc| enc.log_alpha());
    for (v, enc) in encoders.iter().enumerate() {
        let same = match (first, enc.log_alpha()) {
            (Some(a), Some(b)) => a.id() == b.id(),
            (None, None) => true,
            _ => false,
        };
        if !same {
            anyhow::bail!("[mvae] view {}: encoders must share one log_alpha", v);
        }
    }
    Ok(first.cloned())
}
