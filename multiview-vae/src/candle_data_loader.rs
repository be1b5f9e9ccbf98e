use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rayon::prelude::*;

/// One minibatch: row-aligned slices of every view
pub struct MultiViewMinibatchData {
    pub input: Vec<Tensor>,
}

/// `DataLoader` for minibatch learning over multiple views
pub trait MultiViewDataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MultiViewMinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory 2d matrices, one per view. Rows
/// are entities and must be aligned across views; columns are the
/// view's features.
///
pub struct MultiViewInMemoryData {
    views: Vec<Tensor>,
    shuffled_views: Option<Vec<Vec<Tensor>>>,
    minibatches: Minibatches,
}

impl MultiViewInMemoryData {
    ///
    /// Create a data loader with `views`, each `n x d_v`
    ///
    pub fn new(views: &[Tensor]) -> anyhow::Result<Self> {
        if views.is_empty() {
            return Err(anyhow::anyhow!("need at least one view"));
        }

        let nrows = views[0].dims2()?.0;

        for (v, x) in views.iter().enumerate() {
            let (n, d) = x.dims2()?;
            if n != nrows {
                return Err(anyhow::anyhow!(
                    "view {} has {} rows vs. {} in view 0",
                    v,
                    n,
                    nrows
                ));
            }
            if d == 0 {
                return Err(anyhow::anyhow!("view {} has no features", v));
            }
        }

        if nrows == 0 {
            return Err(anyhow::anyhow!("empty data"));
        }

        Ok(MultiViewInMemoryData {
            views: views.to_vec(),
            shuffled_views: None,
            minibatches: Minibatches {
                samples: (0..nrows).collect(),
                chunks: vec![],
            },
        })
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    /// number of features per view
    pub fn view_dims(&self) -> Vec<usize> {
        self.views.iter().map(|x| x.dims()[1]).collect()
    }
}

impl MultiViewDataLoader for MultiViewInMemoryData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MultiViewMinibatchData> {
        if let Some(shuffled) = self.shuffled_views.as_ref() {
            let input = shuffled
                .iter()
                .map(|data_vec| take_shuffled(batch_idx, target_device, data_vec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(MultiViewMinibatchData { input })
        } else {
            Err(anyhow::anyhow!("need to shuffle data"))
        }
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("minibatch size must be positive"));
        }

        /////////////////////
        // shuffle indexes //
        /////////////////////

        self.minibatches.shuffle_minibatch(batch_size);

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let device = self.views[0].device().clone();
        let mut shuffled = vec![Vec::with_capacity(self.num_minibatch()); self.num_views()];

        for samples in self.minibatches.chunks.iter() {
            let rows: Vec<u32> = samples.iter().map(|&i| i as u32).collect();
            let rows = Tensor::from_vec(rows, samples.len(), &device)?;
            for (x, shuffled_data) in self.views.iter().zip(shuffled.iter_mut()) {
                shuffled_data.push(x.index_select(&rows, 0)?);
            }
        }

        self.shuffled_views = Some(shuffled);
        Ok(())
    }
}

fn take_shuffled(
    batch_idx: usize,
    target_device: &Device,
    data_vec: &[Tensor],
) -> anyhow::Result<Tensor> {
    if data_vec.len() <= batch_idx {
        Err(anyhow::anyhow!(
            "invalid index = {} vs. total # = {}",
            batch_idx,
            data_vec.len()
        ))
    } else {
        Ok(data_vec[batch_idx].to_device(target_device)?)
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition a random
/// permutation of the sample indexes. The last chunk may be smaller.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);

        let batch_size = batch_size.max(1);

        self.chunks = self
            .samples
            .par_chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect::<Vec<Vec<usize>>>();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn minibatches_partition_samples() {
        let mut mb = Minibatches::new(10);
        mb.shuffle_minibatch(3);
        assert_eq!(mb.chunks.len(), 4);
        assert_eq!(mb.chunks[3].len(), 1);

        let mut all: Vec<usize> = mb.chunks.iter().flatten().cloned().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn views_stay_aligned() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        // row i of view 0 holds i, row i of view 1 holds 10 * i
        let ids = Tensor::arange(0u32, 7u32, &dev)?
            .to_dtype(DType::F32)?
            .reshape((7, 1))?;
        let x0 = ids.broadcast_as((7, 2))?.contiguous()?;
        let x1 = (ids.broadcast_as((7, 3))?.contiguous()? * 10.)?;

        let mut data = MultiViewInMemoryData::new(&[x0, x1])?;
        assert!(data.minibatch_data(0, &dev).is_err());

        data.shuffle_minibatch(2)?;
        assert_eq!(data.num_minibatch(), 4);

        let mut seen = 0;
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &dev)?;
            assert_eq!(mb.input.len(), 2);
            let a = mb.input[0].to_vec2::<f32>()?;
            let c = mb.input[1].to_vec2::<f32>()?;
            assert_eq!(a.len(), c.len());
            for (ra, rc) in a.iter().zip(c.iter()) {
                assert_eq!(ra[0] * 10., rc[0]);
            }
            seen += a.len();
        }
        assert_eq!(seen, 7);
        assert!(data.minibatch_data(4, &dev).is_err());
        Ok(())
    }

    #[test]
    fn rejects_misaligned_views() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x0 = Tensor::zeros((5, 2), DType::F32, &dev)?;
        let x1 = Tensor::zeros((4, 2), DType::F32, &dev)?;
        assert!(MultiViewInMemoryData::new(&[x0, x1]).is_err());
        assert!(MultiViewInMemoryData::new(&[]).is_err());
        Ok(())
    }
}
