use candle_core::{Result, Tensor};
use candle_nn::ops;

/// ln(2π)
const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// stabilizer inside `ln(mu^2 + eps)`
pub const LOG_ALPHA_EPS: f64 = 1e-8;

/// log alpha is kept in this window
pub const MIN_LOG_ALPHA: f64 = -8.;
pub const MAX_LOG_ALPHA: f64 = 8.;

/// KL divergence between two diagonal Gaussian distributions
///
/// 0.5 * [ ln(p_var) - ln(q_var) + (q_var + (q_mean - p_mean)^2) / p_var - 1 ]
///
/// * `q_mean` - mean of the approximate posterior (n x k)
/// * `q_var` - variance of the approximate posterior (n x k)
/// * `p_mean` - mean of the reference distribution (n x k)
/// * `p_var` - variance of the reference distribution (n x k)
///
/// Returns element-wise KL (n x k); nothing is reduced here.
pub fn gaussian_kl_divergence(
    q_mean: &Tensor,
    q_var: &Tensor,
    p_mean: &Tensor,
    p_var: &Tensor,
) -> Result<Tensor> {
    let diff_sq = q_mean.broadcast_sub(p_mean)?.sqr()?;
    let ratio = q_var.add(&diff_sq)?.broadcast_div(p_var)?;
    let log_ratio = p_var.log()?.broadcast_sub(&q_var.log()?)?;
    ((log_ratio + ratio)? - 1.)? * 0.5
}

/// log alpha = ln(sigma^2) - ln(mu^2 + eps), the variational dropout
/// signal-to-noise parameter, clamped to [-8, 8]
pub fn log_alpha(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let log_mu_sq = (z_mean.sqr()? + LOG_ALPHA_EPS)?.log()?;
    z_lnvar
        .sub(&log_mu_sq)?
        .clamp(MIN_LOG_ALPHA, MAX_LOG_ALPHA)
}

/// Approximate KL divergence of the log-uniform sparsity prior
/// (Molchanov, Ashukha & Vetrov, 2017)
///
/// -KL ≈ k1 * sigmoid(k2 + k3 * log α) - 0.5 * ln(1 + exp(-log α)) - k1
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns element-wise KL (n x k).
pub fn sparse_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let (k1, k2, k3) = (0.63576, 1.87320, 1.48695);

    let log_alpha = log_alpha(z_mean, z_lnvar)?;
    let term1 = (ops::sigmoid(&((&log_alpha * k3)? + k2)?)? * k1)?;
    let term2 = ((log_alpha.neg()?.exp()? + 1.)?.log()? * 0.5)?;
    let neg_kl = ((term1 - term2)? - k1)?;
    neg_kl.neg()
}

/// Gaussian log-likelihood, element-wise
///
/// llik(i,j) = -0.5 * [ ln(2π) + 2 ln(scale) + ((x - loc) / scale)^2 ]
///
/// * `x_nd` - observed data
/// * `loc_nd` - location (reconstruction)
/// * `scale_nd` - standard deviation
pub fn gaussian_log_likelihood(
    x_nd: &Tensor,
    loc_nd: &Tensor,
    scale_nd: &Tensor,
) -> Result<Tensor> {
    let z_sq = x_nd.broadcast_sub(loc_nd)?.broadcast_div(scale_nd)?.sqr()?;
    let log_scale = (scale_nd.log()? * 2.)?;
    (z_sq.broadcast_add(&log_scale)? + LN_2PI)? * (-0.5)
}

/// Bernoulli log-likelihood with logits, element-wise
///
/// llik(i,j) = x * l - softplus(l)
///
/// where softplus(l) = max(l, 0) + ln(1 + exp(-|l|))
pub fn bernoulli_log_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    let softplus = logits_nd
        .relu()?
        .add(&(logits_nd.abs()?.neg()?.exp()? + 1.)?.log()?)?;
    x_nd.mul(logits_nd)?.sub(&softplus)
}

/// Negative squared error, element-wise
///
/// llik(i,j) = -(x - xhat)^2
pub fn squared_error_log_likelihood(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.sqr()?.neg()
}
