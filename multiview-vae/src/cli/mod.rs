pub mod simulate;
pub mod train;

use clap::{Parser, Subcommand, ValueEnum};

pub use simulate::SimulateArgs;
pub use train::TrainArgs;

#[derive(Parser)]
#[command(name = "multiview-vae")]
#[command(about = "Multi-view variational autoencoders with a joint latent space")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Simulate views that share one latent factor matrix
    Simulate(SimulateArgs),
    /// Train a multi-view VAE and write the joint latent means
    Train(TrainArgs),
}

/// Compute device selection for training
#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<candle_core::Device> {
        Ok(match self {
            ComputeDevice::Metal => candle_core::Device::new_metal(device_no)?,
            ComputeDevice::Cuda => candle_core::Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => candle_core::Device::Cpu,
        })
    }
}

/// `--verbose` turns on `info!` unless `RUST_LOG` says otherwise
pub fn init_logger(verbose: bool) {
    if verbose && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}
