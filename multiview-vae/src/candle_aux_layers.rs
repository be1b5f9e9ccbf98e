use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Fully connected ReLU layers `in_dim -> layers[0] -> ... -> layers[L-1]`
///
/// Variables are named `{prefix}.{j}.weight` and `{prefix}.{j}.bias`
/// under the given variable builder. Returns the stack and its output
/// dimension (`in_dim` if `layers` is empty).
pub fn stack_relu_linear(
    in_dim: usize,
    layers: &[usize],
    vb: VarBuilder,
) -> Result<(StackLayers<Linear>, usize)> {
    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in layers.iter().enumerate() {
        fc.push_with_act(
            candle_nn::linear(prev_dim, next_dim, vb.pp(j.to_string()))?,
            Activation::Relu,
        );
        prev_dim = next_dim;
    }
    Ok((fc, prev_dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn relu_stack_output_dim() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let (fc, out_dim) = stack_relu_linear(7, &[16, 5], vb.pp("fc"))?;
        assert_eq!(out_dim, 5);
        assert_eq!(fc.len(), 2);

        let x = Tensor::randn(0f32, 1f32, (3, 7), &dev)?;
        let h = fc.forward(&x)?;
        assert_eq!(h.dims(), &[3, 5]);
        // relu output
        assert!(h.min_all()?.to_scalar::<f32>()? >= 0.);

        let (empty, out_dim) = stack_relu_linear(7, &[], vb.pp("none"))?;
        assert!(empty.is_empty());
        assert_eq!(out_dim, 7);
        assert_eq!(empty.forward(&x)?.dims(), &[3, 7]);
        Ok(())
    }
}
