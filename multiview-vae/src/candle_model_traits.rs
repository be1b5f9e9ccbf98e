use crate::candle_distributions::DistributionT;

use candle_core::{Result, Tensor};

pub trait ViewEncoderT {
    /// An encoder that maps one view to latent Gaussian parameters
    ///
    /// # Arguments
    /// * `x_nd` - input data of this view (n x d)
    /// * `train` - whether to use training-time behaviour or not
    ///
    /// # Returns `(z_mean_nk, z_lnvar_nk)`
    /// * `z_mean_nk` - posterior mean (n x k)
    /// * `z_lnvar_nk` - unconstrained posterior log-variance (n x k)
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    /// shared variational dropout parameter (1 x k), if the
    /// log-variance is tied to it
    fn log_alpha(&self) -> Option<&Tensor> {
        None
    }
}

pub trait ViewDecoderT {
    /// A decoder that maps a latent sample to a reconstruction
    /// distribution over this view's features
    ///
    /// * `z_nk` - latent sample (n x k)
    /// * `train` - whether to use training-time behaviour or not
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Box<dyn DistributionT>>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

impl<T: ViewEncoderT + ?Sized> ViewEncoderT for &T {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        (**self).forward_t(x_nd, train)
    }

    fn dim_obs(&self) -> usize {
        (**self).dim_obs()
    }

    fn dim_latent(&self) -> usize {
        (**self).dim_latent()
    }

    fn log_alpha(&self) -> Option<&Tensor> {
        (**self).log_alpha()
    }
}

impl<T: ViewEncoderT + ?Sized> ViewEncoderT for Box<T> {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        (**self).forward_t(x_nd, train)
    }

    fn dim_obs(&self) -> usize {
        (**self).dim_obs()
    }

    fn dim_latent(&self) -> usize {
        (**self).dim_latent()
    }

    fn log_alpha(&self) -> Option<&Tensor> {
        (**self).log_alpha()
    }
}

impl<T: ViewDecoderT + ?Sized> ViewDecoderT for &T {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Box<dyn DistributionT>> {
        (**self).forward_t(z_nk, train)
    }

    fn dim_obs(&self) -> usize {
        (**self).dim_obs()
    }

    fn dim_latent(&self) -> usize {
        (**self).dim_latent()
    }
}

impl<T: ViewDecoderT + ?Sized> ViewDecoderT for Box<T> {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Box<dyn DistributionT>> {
        (**self).forward_t(z_nk, train)
    }

    fn dim_obs(&self) -> usize {
        (**self).dim_obs()
    }

    fn dim_latent(&self) -> usize {
        (**self).dim_latent()
    }
}
