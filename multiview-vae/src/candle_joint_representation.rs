use candle_core::{bail, DType, Result, Tensor};

/// added to every variance before taking its reciprocal
pub const POE_VAR_EPS: f64 = 1e-8;

/// How per-view Gaussian estimates are combined into one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    /// precision-weighted product of Gaussian experts
    ProductOfExperts,
    /// arithmetic mean of means and variances
    Mean,
}

impl std::str::FromStr for JoinType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PoE" => Ok(Self::ProductOfExperts),
            "Mean" => Ok(Self::Mean),
            _ => anyhow::bail!("[mvae] incorrect join method: {}", s),
        }
    }
}

impl std::fmt::Display for JoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductOfExperts => write!(f, "PoE"),
            Self::Mean => write!(f, "Mean"),
        }
    }
}

/// Product of Gaussian experts (Hinton 2002; Wu & Goodman 2018)
///
/// T(v) = 1 / (var(v) + eps)
/// var = 1 / sum_v T(v)
/// mu = [ sum_v mu(v) * T(v) ] * var
///
/// * `mu_vnk` - stacked means (views x n x k)
/// * `var_vnk` - stacked variances (views x n x k)
/// * `prior_expert` - include a N(0, 1) expert in both sums
///
/// Returns `(mu_nk, var_nk)`
pub fn product_of_experts(
    mu_vnk: &Tensor,
    var_vnk: &Tensor,
    prior_expert: bool,
) -> Result<(Tensor, Tensor)> {
    let prec_vnk = (var_vnk + POE_VAR_EPS)?.recip()?;

    let mut prec_nk = prec_vnk.sum(0)?;
    let mut weighted_nk = mu_vnk.mul(&prec_vnk)?.sum(0)?;

    if prior_expert {
        // unit precision, zero mean
        prec_nk = (prec_nk + 1.)?;
    }

    let var_nk = prec_nk.recip()?;
    weighted_nk = weighted_nk.mul(&var_nk)?;
    Ok((weighted_nk, var_nk))
}

/// Arithmetic mean of per-view estimates
///
/// * `mu_vnk` - stacked means (views x n x k)
/// * `var_vnk` - stacked variances (views x n x k)
///
/// Returns `(mu_nk, var_nk)`
pub fn mean_representation(mu_vnk: &Tensor, var_vnk: &Tensor) -> Result<(Tensor, Tensor)> {
    Ok((mu_vnk.mean(0)?, var_vnk.mean(0)?))
}

/// Validate per-view estimates, stack them, and combine
///
/// * `join` - which rule to apply
/// * `mu_vec` - per-view means, each n x k
/// * `var_vec` - per-view variances, each n x k, finite and strictly positive
/// * `prior_expert` - only used by the product of experts
pub fn join_representations(
    join: JoinType,
    mu_vec: &[Tensor],
    var_vec: &[Tensor],
    prior_expert: bool,
) -> Result<(Tensor, Tensor)> {
    if mu_vec.is_empty() {
        bail!("[{}] no views to combine", join);
    }

    if mu_vec.len() != var_vec.len() {
        bail!(
            "[{}] found {} means vs. {} variances",
            join,
            mu_vec.len(),
            var_vec.len()
        );
    }

    let dims = mu_vec[0].dims();
    for (v, (mu, var)) in mu_vec.iter().zip(var_vec).enumerate() {
        if mu.dims() != dims || var.dims() != dims {
            bail!(
                "[{}] view {}: mean {:?} and variance {:?} must both be {:?}",
                join,
                v,
                mu.dims(),
                var.dims(),
                dims
            );
        }
        // NaN and inf survive a sum, but min_all may skip NaN
        let sum_mu = mu.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?;
        let sum_var = var.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?;
        if !(sum_mu.is_finite() && sum_var.is_finite()) {
            bail!("[{}] view {}: non-finite mean or variance", join, v);
        }
        let min_var = var.min_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        if min_var <= 0. {
            bail!(
                "[{}] view {}: variance must be strictly positive (min = {})",
                join,
                v,
                min_var
            );
        }
    }

    let mu_vnk = Tensor::stack(mu_vec, 0)?;
    let var_vnk = Tensor::stack(var_vec, 0)?;

    match join {
        JoinType::ProductOfExperts => product_of_experts(&mu_vnk, &var_vnk, prior_expert),
        JoinType::Mean => mean_representation(&mu_vnk, &var_vnk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn views(values: &[(&[f32], &[f32])]) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        let dev = Device::Cpu;
        let mut mu_vec = vec![];
        let mut var_vec = vec![];
        for (mu, var) in values {
            mu_vec.push(Tensor::from_slice(mu, (1, mu.len()), &dev)?);
            var_vec.push(Tensor::from_slice(var, (1, var.len()), &dev)?);
        }
        Ok((mu_vec, var_vec))
    }

    fn row(x: &Tensor) -> Result<Vec<f32>> {
        x.flatten_all()?.to_vec1::<f32>()
    }

    #[test]
    fn parse_join_type() {
        assert_eq!("PoE".parse::<JoinType>().ok(), Some(JoinType::ProductOfExperts));
        assert_eq!("Mean".parse::<JoinType>().ok(), Some(JoinType::Mean));

        let err = "Sum".parse::<JoinType>().unwrap_err();
        assert!(err.to_string().contains("incorrect join method: Sum"));

        for bad in ["", "poe", "POE", "mean", "MEAN", "product-of-experts", " PoE"] {
            assert!(bad.parse::<JoinType>().is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn display_round_trips() {
        for join in [JoinType::ProductOfExperts, JoinType::Mean] {
            assert_eq!(join.to_string().parse::<JoinType>().ok(), Some(join));
        }
    }

    #[test]
    fn mean_of_two_views() -> Result<()> {
        let (mu, var) = views(&[(&[1.0, 2.0], &[1.0, 4.0]), (&[3.0, -2.0], &[3.0, 2.0])])?;
        let (mu_out, var_out) = join_representations(JoinType::Mean, &mu, &var, false)?;
        assert_eq!(row(&mu_out)?, vec![2.0, 0.0]);
        assert_eq!(row(&var_out)?, vec![2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn mean_of_one_view_is_identity() -> Result<()> {
        let (mu, var) = views(&[(&[1.5, -0.5, 3.0], &[0.5, 2.0, 1.0])])?;
        let (mu_out, var_out) = join_representations(JoinType::Mean, &mu, &var, false)?;
        assert_eq!(row(&mu_out)?, vec![1.5, -0.5, 3.0]);
        assert_eq!(row(&var_out)?, vec![0.5, 2.0, 1.0]);
        Ok(())
    }

    #[test]
    fn mean_of_three_views() -> Result<()> {
        let (mu, var) = views(&[
            (&[3.0, 0.0], &[1.0, 3.0]),
            (&[0.0, -3.0], &[2.0, 6.0]),
            (&[6.0, 6.0], &[3.0, 0.75]),
        ])?;
        let (mu_out, var_out) = join_representations(JoinType::Mean, &mu, &var, false)?;
        for (a, b) in row(&mu_out)?.iter().zip([3.0, 1.0]) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in row(&var_out)?.iter().zip([2.0, 3.25]) {
            assert!((a - b).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn poe_single_view_without_prior_expert() -> Result<()> {
        let (mu, var) = views(&[(&[1.5, -0.5, 3.0], &[0.5, 2.0, 1.0])])?;
        let (mu_out, var_out) =
            join_representations(JoinType::ProductOfExperts, &mu, &var, false)?;
        for (a, b) in row(&mu_out)?.iter().zip([1.5, -0.5, 3.0]) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in row(&var_out)?.iter().zip([0.5, 2.0, 1.0]) {
            assert!((a - b).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn poe_single_view_with_prior_expert() -> Result<()> {
        // var = 1/(1/v + 1), mu = m/v * var
        let (mu, var) = views(&[(&[2.0, -4.0], &[1.0, 3.0])])?;
        let (mu_out, var_out) =
            join_representations(JoinType::ProductOfExperts, &mu, &var, true)?;
        let expected_var = [0.5, 0.75];
        let expected_mu = [1.0, -1.0];
        for (a, b) in row(&var_out)?.iter().zip(expected_var) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in row(&mu_out)?.iter().zip(expected_mu) {
            assert!((a - b).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn poe_two_views_known_values() -> Result<()> {
        // precisions 1 and 3 -> var 0.25; mu = (0*1 + 4*3) * 0.25 = 3
        let (mu, var) = views(&[(&[0.0], &[1.0]), (&[4.0], &[1.0 / 3.0])])?;
        let (mu_out, var_out) =
            join_representations(JoinType::ProductOfExperts, &mu, &var, false)?;
        assert!((row(&var_out)?[0] - 0.25).abs() < 1e-6);
        assert!((row(&mu_out)?[0] - 3.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn poe_never_increases_variance() -> Result<()> {
        let inputs: [(&[f32], &[f32]); 3] = [
            (&[0.1, 1.0, -2.0, 0.0], &[0.2, 5.0, 1.0, 1e-3]),
            (&[1.1, -1.0, 2.0, 0.5], &[2.0, 0.5, 1.0, 10.0]),
            (&[-0.3, 0.0, 0.7, 9.0], &[1.0, 1.0, 0.01, 3.0]),
        ];
        for n_views in 1..=3 {
            let (mu, var) = views(&inputs[..n_views])?;
            let (_, var_out) =
                join_representations(JoinType::ProductOfExperts, &mu, &var, false)?;
            let var_out = row(&var_out)?;
            for var_v in var.iter() {
                for (joint, single) in var_out.iter().zip(row(var_v)?) {
                    assert!(*joint <= single + 1e-6);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn poe_is_permutation_invariant() -> Result<()> {
        let a: (&[f32], &[f32]) = (&[0.5, -1.0, 2.0], &[0.5, 2.0, 0.25]);
        let b: (&[f32], &[f32]) = (&[1.0, 0.0, -4.0], &[1.0, 0.5, 4.0]);
        let c: (&[f32], &[f32]) = (&[-2.0, 3.0, 1.0], &[2.0, 1.0, 1.0]);

        let (mu, var) = views(&[a, b, c])?;
        let (mu_abc, var_abc) =
            join_representations(JoinType::ProductOfExperts, &mu, &var, false)?;

        let (mu, var) = views(&[c, a, b])?;
        let (mu_cab, var_cab) =
            join_representations(JoinType::ProductOfExperts, &mu, &var, false)?;

        for (x, y) in row(&mu_abc)?.iter().zip(row(&mu_cab)?) {
            assert!((x - y).abs() < 1e-6);
        }
        for (x, y) in row(&var_abc)?.iter().zip(row(&var_cab)?) {
            assert!((x - y).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn rejects_invalid_inputs() -> Result<()> {
        let (mu, var) = views(&[(&[0.0, 1.0], &[1.0, 0.0])])?;
        assert!(join_representations(JoinType::ProductOfExperts, &mu, &var, false).is_err());

        let (mu, var) = views(&[(&[0.0, 1.0], &[1.0, 1.0]), (&[0.0], &[1.0])])?;
        assert!(join_representations(JoinType::Mean, &mu, &var, false).is_err());

        assert!(join_representations(JoinType::Mean, &[], &[], false).is_err());

        let (mu, var) = views(&[(&[0.0], &[1.0])])?;
        assert!(join_representations(JoinType::Mean, &mu, &var[..0], false).is_err());
        Ok(())
    }

    #[test]
    fn rejects_non_finite_inputs() -> Result<()> {
        for join in [JoinType::ProductOfExperts, JoinType::Mean] {
            let (mu, var) = views(&[(&[0.5, 1.0], &[1.0, f32::NAN])])?;
            assert!(join_representations(join, &mu, &var, false).is_err());

            let (mu, var) = views(&[(&[0.5, 1.0], &[1.0, f32::INFINITY])])?;
            assert!(join_representations(join, &mu, &var, false).is_err());

            let (mu, var) = views(&[(&[0.5, 1.0], &[1.0, 1.0]), (&[f32::NAN, 0.0], &[1.0, 1.0])])?;
            assert!(join_representations(join, &mu, &var, false).is_err());
        }
        Ok(())
    }
}
