use crate::candle_aux_layers::*;
use crate::candle_distributions::*;
use crate::candle_model_traits::*;

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Reconstruction family of a view decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconFamily {
    /// N(loc, diag(scale^2)) with a learnable per-feature log scale
    Gaussian,
    /// Bernoulli with logits
    Bernoulli,
    /// squared error against the reconstruction
    PointEstimate,
}

///////////////////////
// View MLP Decoder  //
///////////////////////

pub struct ViewDecoder {
    n_features: usize,
    n_latent: usize,
    family: ReconFamily,
    fc: StackLayers<Linear>,
    loc: Linear,
    log_scale_1d: Option<Tensor>,
}

pub struct ViewDecoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub layers: &'a [usize],
    pub family: ReconFamily,
}

impl ViewDecoder {
    /// Will create a new decoder with the following parameters:
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.loc.weight`
    /// * `nn.dec.log_scale` (Gaussian family only, 1 x D, init 0)
    pub fn new(args: ViewDecoderArgs, vb: VarBuilder) -> Result<Self> {
        let (fc, out_dim) = stack_relu_linear(args.n_latent, args.layers, vb.pp("nn.dec.fc"))?;
        let loc = candle_nn::linear(out_dim, args.n_features, vb.pp("nn.dec.loc"))?;

        let log_scale_1d = match args.family {
            ReconFamily::Gaussian => Some(vb.get_with_hints(
                (1, args.n_features),
                "nn.dec.log_scale",
                candle_nn::Init::Const(0.),
            )?),
            _ => None,
        };

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            family: args.family,
            fc,
            loc,
            log_scale_1d,
        })
    }

    /// per-feature standard deviation (1 x D), Gaussian family only
    pub fn scale(&self) -> Result<Option<Tensor>> {
        let min_ls = -8.;
        let max_ls = 8.;
        self.log_scale_1d
            .as_ref()
            .map(|ls| ls.clamp(min_ls, max_ls)?.exp())
            .transpose()
    }
}

impl ViewDecoderT for ViewDecoder {
    fn forward_t(&self, z_nk: &Tensor, _train: bool) -> Result<Box<dyn DistributionT>> {
        let h_nl = self.fc.forward(z_nk)?;
        let loc_nd = self.loc.forward(&h_nl)?;

        let px_z: Box<dyn DistributionT> = match self.family {
            ReconFamily::Gaussian => match self.scale()? {
                Some(scale_1d) => Box::new(Gaussian::new(loc_nd, scale_1d)?),
                None => candle_core::bail!("Gaussian decoder without a scale"),
            },
            ReconFamily::Bernoulli => Box::new(Bernoulli::new(loc_nd)),
            ReconFamily::PointEstimate => Box::new(PointEstimate::new(loc_nd)),
        };
        Ok(px_z)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
