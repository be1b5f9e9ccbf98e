use crate::candle_data_loader::*;
use crate::candle_decoder_view::*;
use crate::candle_distributions::GaussianPrior;
use crate::candle_encoder_gaussian::*;
use crate::candle_joint_representation::JoinType;
use crate::candle_mvae::*;
use crate::candle_mvae_inference::*;
use crate::cli::{init_logger, ComputeDevice};
use crate::common_io::*;

use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::info;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ReconArg {
    Gaussian,
    Bernoulli,
    Point,
}

impl From<ReconArg> for ReconFamily {
    fn from(arg: ReconArg) -> Self {
        match arg {
            ReconArg::Gaussian => ReconFamily::Gaussian,
            ReconArg::Bernoulli => ReconFamily::Bernoulli,
            ReconArg::Point => ReconFamily::PointEstimate,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum JoinArg {
    Poe,
    Mean,
}

impl From<JoinArg> for JoinType {
    fn from(arg: JoinArg) -> Self {
        match arg {
            JoinArg::Poe => JoinType::ProductOfExperts,
            JoinArg::Mean => JoinType::Mean,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Data files, one per view (rows = samples, aligned across views)
    #[arg(required = true)]
    data_files: Vec<Box<str>>,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// how to join the per-view posteriors
    #[arg(long, short = 'j', value_enum, default_value = "poe")]
    join_type: JoinArg,

    /// add a N(0, 1) expert to the product of experts
    #[arg(long, default_value_t = false)]
    poe_prior_expert: bool,

    /// variational dropout on the latent dimensions
    #[arg(long, default_value_t = false)]
    sparse: bool,

    /// dropout rate at which a latent dimension is switched off
    #[arg(long, default_value_t = 0.2)]
    threshold: f64,

    /// weight on the KL term
    #[arg(long, short = 'b', default_value_t = 1.0)]
    beta: f64,

    /// latent dimension
    #[arg(long, short = 'k', default_value_t = 2)]
    z_dim: usize,

    /// encoder layers
    #[arg(long, short = 'e', value_delimiter(','), default_values_t = vec![64, 32])]
    encoder_layers: Vec<usize>,

    /// decoder layers
    #[arg(long, short = 'd', value_delimiter(','), default_values_t = vec![32, 64])]
    decoder_layers: Vec<usize>,

    /// reconstruction likelihood of every view
    #[arg(long, value_enum, default_value = "gaussian")]
    recon: ReconArg,

    /// # training epochs
    #[arg(long, short = 'i', default_value_t = 100)]
    epochs: usize,

    /// Minibatch size
    #[arg(long, default_value_t = 100)]
    minibatch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f32,

    /// candle device
    #[arg(long, value_enum, default_value = "cpu")]
    device: ComputeDevice,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run(args: &TrainArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let join_type: JoinType = args.join_type.into();
    let dev = args.device.to_device(0)?;

    // 1. Read the views
    let views = args
        .data_files
        .iter()
        .map(|f| read_tensor_delim(f))
        .collect::<anyhow::Result<Vec<Tensor>>>()?;

    for (f, x) in args.data_files.iter().zip(views.iter()) {
        info!("{}: {:?}", f, x.dims());
    }

    let mut data = MultiViewInMemoryData::new(&views)?;
    info!(
        "{} views, {} aligned samples",
        data.num_views(),
        data.num_samples()
    );

    // 2. Build per-view encoders and decoders
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let log_alpha = if args.sparse {
        Some(sparse_log_alpha(args.z_dim, vb.clone())?)
    } else {
        None
    };

    let mut encoders = vec![];
    let mut decoders = vec![];

    for (v, &n_features) in data.view_dims().iter().enumerate() {
        encoders.push(GaussianViewEncoder::new(
            GaussianViewEncoderArgs {
                n_features,
                n_latent: args.z_dim,
                layers: &args.encoder_layers,
                log_alpha: log_alpha.clone(),
            },
            vb.pp(format!("view_{}", v)),
        )?);

        decoders.push(ViewDecoder::new(
            ViewDecoderArgs {
                n_features,
                n_latent: args.z_dim,
                layers: &args.decoder_layers,
                family: args.recon.into(),
            },
            vb.pp(format!("view_{}", v)),
        )?);
    }

    let model = MultiViewVae::new(
        MultiViewVaeArgs {
            join_type: &join_type.to_string(),
            poe_prior_expert: args.poe_prior_expert,
            sparse: args.sparse,
            beta: args.beta,
            z_dim: args.z_dim,
            prior: GaussianPrior::default(),
            threshold: args.threshold,
        },
        encoders,
        decoders,
    )?;

    info!(
        "join = {}, sparse = {}, beta = {}, z_dim = {}",
        model.join_type(),
        model.is_sparse(),
        model.beta(),
        model.z_dim()
    );

    // 3. Train
    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.minibatch_size,
        num_epochs: args.epochs,
        device: dev.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let scores = train_mvae(&model, &varmap, &mut data, &train_config)?;

    // 4. Write out
    mkdir(&args.out)?;

    let loss_file = format!("{}.loss.tsv", args.out);
    let mut lines = vec!["loss\tkl\tll".to_string()];
    lines.extend(
        scores
            .iter()
            .map(|s| format!("{}\t{}\t{}", s.loss, s.kl, s.ll)),
    );
    write_lines(&lines, &loss_file)?;
    info!("loss trace: {}", loss_file);

    let x_vec = views
        .iter()
        .map(|x| x.to_device(&dev))
        .collect::<candle_core::Result<Vec<_>>>()?;

    let latent_file = format!("{}.latent.tsv.gz", args.out);
    let z_nk = model.latent_mean(&x_vec)?;
    write_tensor_delim(&z_nk, &latent_file, "\t")?;
    info!("latent: {}", latent_file);

    if let Some(dropout_1k) = model.dropout()? {
        let dropout_file = format!("{}.dropout.tsv", args.out);
        write_tensor_delim(&dropout_1k, &dropout_file, "\t")?;
        info!("dropout: {}", dropout_file);
    }

    let score = evaluate_loss(&model, &x_vec)?;
    info!("final {}", score);

    Ok(())
}
