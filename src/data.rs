//! Representative dataset boundary
//!
//! The pipeline consumes batches through this seam; the host application
//! plugs in its own generator. Batches are `[batch, features]` arrays.

use crate::error::{Error, Result};
use ndarray::Array2;

/// Producer of representative input batches
///
/// Finite generators return `None` when exhausted; `reset` restarts them so
/// stages can cycle the same sample deterministically.
pub trait RepresentativeDataset {
    /// Next batch, or `None` when the generator is exhausted
    fn next_batch(&mut self) -> Option<Array2<f32>>;

    /// Restart from the first batch
    fn reset(&mut self);
}

/// In-memory batch list with cyclic restart
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    batches: Vec<Array2<f32>>,
    cursor: usize,
}

impl InMemoryDataset {
    pub fn new(batches: Vec<Array2<f32>>) -> Self {
        Self { batches, cursor: 0 }
    }

    /// Number of batches per pass
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl RepresentativeDataset for InMemoryDataset {
    fn next_batch(&mut self) -> Option<Array2<f32>> {
        let batch = self.batches.get(self.cursor).cloned();
        if batch.is_some() {
            self.cursor += 1;
        }
        batch
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Drain a dataset into a materialized batch list
///
/// A generator yielding zero batches is a configuration error, detected here
/// before any expensive computation runs.
pub fn materialize(dataset: &mut dyn RepresentativeDataset) -> Result<Vec<Array2<f32>>> {
    dataset.reset();
    let mut batches = Vec::new();
    while let Some(batch) = dataset.next_batch() {
        batches.push(batch);
    }
    dataset.reset();
    if batches.is_empty() {
        return Err(Error::EmptyDataset);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_in_memory_iteration_and_reset() {
        let mut ds = InMemoryDataset::new(vec![arr2(&[[1.0]]), arr2(&[[2.0]])]);

        assert_eq!(ds.next_batch().unwrap()[[0, 0]], 1.0);
        assert_eq!(ds.next_batch().unwrap()[[0, 0]], 2.0);
        assert!(ds.next_batch().is_none());

        ds.reset();
        assert_eq!(ds.next_batch().unwrap()[[0, 0]], 1.0);
    }

    #[test]
    fn test_materialize_empty_is_config_error() {
        let mut ds = InMemoryDataset::new(vec![]);
        assert!(matches!(materialize(&mut ds), Err(Error::EmptyDataset)));
    }

    #[test]
    fn test_materialize_resets_after_drain() {
        let mut ds = InMemoryDataset::new(vec![arr2(&[[1.0]])]);
        let batches = materialize(&mut ds).unwrap();
        assert_eq!(batches.len(), 1);
        // Dataset usable again afterwards
        assert!(ds.next_batch().is_some());
    }
}
