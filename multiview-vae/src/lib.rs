pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_decoder_view;
pub mod candle_distributions;
pub mod candle_encoder_gaussian;
pub mod candle_joint_representation;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_mvae;
pub mod candle_mvae_inference;
pub mod cli;
pub mod common_io;
pub mod simulate;

pub use candle_core;
pub use candle_nn;
