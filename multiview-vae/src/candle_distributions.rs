use crate::candle_loss_functions::*;

use candle_core::{bail, Result, Tensor};
use candle_nn::ops;

/// A distribution produced by an encoder (posterior) or a decoder
/// (reconstruction). Every quantity is returned element-wise; callers
/// decide how to reduce over features and samples.
pub trait DistributionT {
    /// family name for error messages and logs
    fn name(&self) -> &'static str;

    /// location parameter (n x d)
    fn loc(&self) -> &Tensor;

    /// Draw one sample (n x d)
    /// * `train` - stochastic (reparameterized) draw if true,
    ///   otherwise a deterministic point estimate
    fn sample(&self, train: bool) -> Result<Tensor>;

    /// Element-wise log-likelihood of the observed data (n x d)
    fn log_likelihood(&self, x_nd: &Tensor) -> Result<Tensor>;

    /// Element-wise KL divergence against a Gaussian reference (n x k)
    fn kl_divergence(&self, _prior: &Gaussian) -> Result<Tensor> {
        bail!("[{}] KL divergence is not supported", self.name())
    }

    /// Element-wise sparsity-inducing KL approximation (n x k)
    fn sparse_kl_divergence(&self) -> Result<Tensor> {
        bail!("[{}] sparse KL divergence is not supported", self.name())
    }
}

/// Builds a distribution of the configured family from location and scale
pub trait DistributionFactoryT {
    fn build(&self, loc: Tensor, scale: Tensor) -> Result<Box<dyn DistributionT>>;
}

//////////////////////////
// Gaussian (diagonal)  //
//////////////////////////

#[derive(Clone, Debug)]
pub struct Gaussian {
    loc: Tensor,
    scale: Tensor,
}

impl Gaussian {
    /// `scale` is broadcast to the shape of `loc`
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        let scale = scale.broadcast_as(loc.shape())?.contiguous()?;
        Ok(Self { loc, scale })
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }

    pub fn variance(&self) -> Result<Tensor> {
        self.scale.sqr()
    }

    pub fn log_variance(&self) -> Result<Tensor> {
        self.variance()?.log()
    }
}

impl DistributionT for Gaussian {
    fn name(&self) -> &'static str {
        "Gaussian"
    }

    fn loc(&self) -> &Tensor {
        &self.loc
    }

    ///
    /// z = mu + sigma * eps
    /// where eps ~ N(0, 1)
    ///
    fn sample(&self, train: bool) -> Result<Tensor> {
        if train {
            let eps = Tensor::randn_like(&self.loc, 0., 1.)?;
            &self.loc + self.scale.mul(&eps)?
        } else {
            Ok(self.loc.clone())
        }
    }

    fn log_likelihood(&self, x_nd: &Tensor) -> Result<Tensor> {
        gaussian_log_likelihood(x_nd, &self.loc, &self.scale)
    }

    fn kl_divergence(&self, prior: &Gaussian) -> Result<Tensor> {
        gaussian_kl_divergence(
            &self.loc,
            &self.variance()?,
            &prior.loc,
            &prior.variance()?,
        )
    }

    fn sparse_kl_divergence(&self) -> Result<Tensor> {
        sparse_kl_loss(&self.loc, &self.log_variance()?)
    }
}

/// Gaussian posterior family
#[derive(Clone, Copy, Debug, Default)]
pub struct GaussianFactory;

impl DistributionFactoryT for GaussianFactory {
    fn build(&self, loc: Tensor, scale: Tensor) -> Result<Box<dyn DistributionT>> {
        Ok(Box::new(Gaussian::new(loc, scale)?))
    }
}

/// A fixed Gaussian prior N(loc, scale^2) on every latent dimension
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianPrior {
    pub loc: f64,
    pub scale: f64,
}

impl Default for GaussianPrior {
    fn default() -> Self {
        Self {
            loc: 0.,
            scale: 1.,
        }
    }
}

impl GaussianPrior {
    pub fn new(loc: f64, scale: f64) -> anyhow::Result<Self> {
        if !(scale.is_finite() && scale > 0.) || !loc.is_finite() {
            anyhow::bail!("[prior] invalid Gaussian prior: loc = {}, scale = {}", loc, scale);
        }
        Ok(Self { loc, scale })
    }

    /// expand to a distribution with the same shape as `like`
    pub fn expand(&self, like: &Tensor) -> Result<Gaussian> {
        let loc = (like.zeros_like()? + self.loc)?;
        let scale = (like.ones_like()? * self.scale)?;
        Gaussian::new(loc, scale)
    }
}

///////////////////////////
// Bernoulli with logits //
///////////////////////////

#[derive(Clone, Debug)]
pub struct Bernoulli {
    logits: Tensor,
}

impl Bernoulli {
    pub fn new(logits: Tensor) -> Self {
        Self { logits }
    }

    pub fn probs(&self) -> Result<Tensor> {
        ops::sigmoid(&self.logits)
    }
}

impl DistributionT for Bernoulli {
    fn name(&self) -> &'static str {
        "Bernoulli"
    }

    fn loc(&self) -> &Tensor {
        &self.logits
    }

    fn sample(&self, train: bool) -> Result<Tensor> {
        let probs = self.probs()?;
        if train {
            let u = Tensor::rand_like(&probs, 0., 1.)?;
            u.lt(&probs)?.to_dtype(probs.dtype())
        } else {
            Ok(probs)
        }
    }

    fn log_likelihood(&self, x_nd: &Tensor) -> Result<Tensor> {
        bernoulli_log_likelihood(x_nd, &self.logits)
    }
}

////////////////////////////////////////
// Point estimate (squared error loss) //
////////////////////////////////////////

/// Degenerate family: the reconstruction is the location itself and
/// the log-likelihood is the negative squared error.
#[derive(Clone, Debug)]
pub struct PointEstimate {
    loc: Tensor,
}

impl PointEstimate {
    pub fn new(loc: Tensor) -> Self {
        Self { loc }
    }
}

impl DistributionT for PointEstimate {
    fn name(&self) -> &'static str {
        "PointEstimate"
    }

    fn loc(&self) -> &Tensor {
        &self.loc
    }

    fn sample(&self, _train: bool) -> Result<Tensor> {
        Ok(self.loc.clone())
    }

    fn log_likelihood(&self, x_nd: &Tensor) -> Result<Tensor> {
        squared_error_log_likelihood(x_nd, &self.loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn gaussian_eval_sample_is_the_mean() -> Result<()> {
        let dev = Device::Cpu;
        let loc = Tensor::new(&[[1.0f32, -2.0], [0.5, 3.0]], &dev)?;
        let scale = Tensor::new(&[[1.0f32, 2.0], [0.1, 0.3]], &dev)?;
        let q = Gaussian::new(loc.clone(), scale)?;

        let z = q.sample(false)?;
        assert_eq!(z.to_vec2::<f32>()?, loc.to_vec2::<f32>()?);

        let z = q.sample(true)?;
        assert_eq!(z.dims(), loc.dims());
        Ok(())
    }

    #[test]
    fn gaussian_scale_is_broadcast() -> Result<()> {
        let dev = Device::Cpu;
        let loc = Tensor::zeros((4, 3), DType::F32, &dev)?;
        let scale = Tensor::new(&[[1.0f32, 2.0, 3.0]], &dev)?;
        let q = Gaussian::new(loc, scale)?;
        assert_eq!(q.scale().dims(), &[4, 3]);
        let var = q.variance()?.to_vec2::<f32>()?;
        assert_eq!(var[3], vec![1.0, 4.0, 9.0]);
        Ok(())
    }

    #[test]
    fn kl_to_standard_prior_is_zero_at_prior() -> Result<()> {
        let dev = Device::Cpu;
        let like = Tensor::zeros((2, 5), DType::F32, &dev)?;
        let prior = GaussianPrior::default().expand(&like)?;
        let kl = prior.kl_divergence(&prior)?.sum_all()?.to_scalar::<f32>()?;
        assert!(kl.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn point_estimate_has_no_kl() -> Result<()> {
        let dev = Device::Cpu;
        let loc = Tensor::zeros((2, 2), DType::F32, &dev)?;
        let dist = PointEstimate::new(loc.clone());
        let prior = GaussianPrior::default().expand(&loc)?;
        assert!(dist.kl_divergence(&prior).is_err());
        assert!(dist.sparse_kl_divergence().is_err());
        Ok(())
    }

    #[test]
    fn bernoulli_samples_are_binary() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[-3.0f32, 0.0, 3.0], [1.0, -1.0, 0.5]], &dev)?;
        let dist = Bernoulli::new(logits);
        for row in dist.sample(true)?.to_vec2::<f32>()? {
            for x in row {
                assert!(x == 0.0 || x == 1.0);
            }
        }
        let p = dist.sample(false)?.to_vec2::<f32>()?;
        assert!((p[0][1] - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn invalid_prior_is_rejected() {
        assert!(GaussianPrior::new(0., 0.).is_err());
        assert!(GaussianPrior::new(0., -1.).is_err());
        assert!(GaussianPrior::new(f64::NAN, 1.).is_err());
        assert!(GaussianPrior::new(1., 2.).is_ok());
    }
}
