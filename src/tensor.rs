//! # Tensor Utilities
//!
//! Named weight tensors for federated models. A model's weights are an
//! ordered mapping from layer name to tensor; shapes are fixed at model
//! creation and never change across versions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FedError, Result};

/// Ordered mapping from layer name to tensor.
///
/// `BTreeMap` gives deterministic iteration and a canonical serialization
/// order, which the envelope tag depends on.
pub type ModelWeights = BTreeMap<String, Tensor>;

/// Dense numeric tensor with explicit shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Creates a tensor from shape and data; data length must match the shape
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(FedError::ShapeMismatch {
                layer: String::new(),
                expected: shape,
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled tensor
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Euclidean (L2) norm over all elements
    pub fn l2_norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Multiplies every element in place
    pub fn scale(&mut self, factor: f64) {
        for x in &mut self.data {
            *x *= factor;
        }
    }

    /// Accumulates `factor * other` into self; shapes must match
    pub fn add_scaled(&mut self, other: &Tensor, factor: f64) -> Result<()> {
        if self.shape != other.shape {
            return Err(FedError::ShapeMismatch {
                layer: String::new(),
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += factor * b;
        }
        Ok(())
    }
}

/// Checks that `weights` carries exactly the layers of `template`, each with
/// a matching shape. Returns the first offending layer.
pub fn check_shapes(weights: &ModelWeights, template: &ModelWeights) -> Result<()> {
    for (name, expected) in template {
        match weights.get(name) {
            Some(tensor) if tensor.shape() == expected.shape() => {}
            Some(tensor) => {
                return Err(FedError::ShapeMismatch {
                    layer: name.clone(),
                    expected: expected.shape().to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
            None => {
                return Err(FedError::ShapeMismatch {
                    layer: name.clone(),
                    expected: expected.shape().to_vec(),
                    actual: vec![],
                });
            }
        }
    }
    if weights.len() != template.len() {
        // Extra layer not present in the template
        let extra = weights
            .keys()
            .find(|k| !template.contains_key(*k))
            .cloned()
            .unwrap_or_default();
        return Err(FedError::ShapeMismatch {
            layer: extra,
            expected: vec![],
            actual: vec![],
        });
    }
    Ok(())
}

/// Global L2 norm across every layer of a weight map
pub fn global_l2_norm(weights: &ModelWeights) -> f64 {
    weights
        .values()
        .map(|t| t.data().iter().map(|x| x * x).sum::<f64>())
        .sum::<f64>()
        .sqrt()
}
