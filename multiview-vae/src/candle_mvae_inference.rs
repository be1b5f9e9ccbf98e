use crate::candle_data_loader::*;
use crate::candle_distributions::DistributionFactoryT;
use crate::candle_mvae::*;
use crate::candle_model_traits::{ViewDecoderT, ViewEncoderT};

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 100,
            num_epochs: 100,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Average loss terms of one pass over the data
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochScore {
    pub loss: f32,
    pub kl: f32,
    pub ll: f32,
}

impl std::fmt::Display for EpochScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loss: {}, kl: {}, ll: {}", self.loss, self.kl, self.ll)
    }
}

/// Train a multi-view VAE by stochastic gradient descent
///
/// * `model` - the multi-view VAE
/// * `variable_map` - all trainable variables of `model`
/// * `data` - data loader with `minibatch_data`
/// * `train_config` - training configuration
///
/// Returns one `EpochScore` per epoch, averaged over minibatches.
pub fn train_mvae<Enc, Dec, F, DataL>(
    model: &MultiViewVae<Enc, Dec, F>,
    variable_map: &candle_nn::VarMap,
    data: &mut DataL,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<EpochScore>>
where
    Enc: ViewEncoderT,
    Dec: ViewDecoderT,
    F: DistributionFactoryT,
    DataL: MultiViewDataLoader,
{
    let device = &train_config.device;
    let mut adam = AdamW::new_lr(
        variable_map.all_vars(),
        train_config.learning_rate.into(),
    )?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut score_trace = vec![];

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size)?;

        let num_minibatches = data.num_minibatch();
        if num_minibatches == 0 {
            return Err(anyhow::anyhow!("no minibatch to train on"));
        }

        let (mut loss_tot, mut kl_tot, mut ll_tot) = (0f32, 0f32, 0f32);

        for b in 0..num_minibatches {
            let mb = data.minibatch_data(b, device)?;
            let fwd = model.forward(&mb.input, true)?;
            let losses = model.loss_function(&mb.input, &fwd)?;
            adam.backward_step(&losses.loss)?;

            let (loss, kl, ll) = losses.to_scalars()?;
            loss_tot += loss;
            kl_tot += kl;
            ll_tot += ll;
        }

        let denom = num_minibatches as f32;
        let score = EpochScore {
            loss: loss_tot / denom,
            kl: kl_tot / denom,
            ll: ll_tot / denom,
        };

        if !score.loss.is_finite() {
            return Err(anyhow::anyhow!(
                "[{}] loss diverged: {}",
                epoch + 1,
                score
            ));
        }

        score_trace.push(score);
        pb.inc(1);

        if train_config.verbose {
            info!("[{}] {}", epoch + 1, score);
        }
    } // each epoch

    pb.finish_and_clear();
    Ok(score_trace)
}

/// Loss terms in evaluation mode (posterior means, no sampling noise)
pub fn evaluate_loss<Enc, Dec, F>(
    model: &MultiViewVae<Enc, Dec, F>,
    x_vec: &[Tensor],
) -> anyhow::Result<EpochScore>
where
    Enc: ViewEncoderT,
    Dec: ViewDecoderT,
    F: DistributionFactoryT,
{
    let fwd = model.forward(x_vec, false)?;
    let (loss, kl, ll) = model.loss_function(x_vec, &fwd)?.to_scalars()?;
    Ok(EpochScore { loss, kl, ll })
}
