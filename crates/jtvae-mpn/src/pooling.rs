//! Pooling strategies for turning atom hidden states into candidate vectors.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Pooling strategy applied to each candidate's slice of atom hidden states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PoolingStrategy {
    /// Mean over the candidate's atoms
    #[default]
    Mean,

    /// Sum over the candidate's atoms
    Sum,

    /// Element-wise max over the candidate's atoms
    Max,
}

impl PoolingStrategy {
    /// Pool one slice of atom hidden states.
    ///
    /// # Arguments
    /// * `atoms` - Tensor of shape (n_atoms, hidden_dim), n_atoms >= 1
    ///
    /// # Returns
    /// Tensor of shape (hidden_dim)
    pub fn apply(&self, atoms: &Tensor) -> Result<Tensor> {
        match self {
            PoolingStrategy::Mean => atoms.mean(0),
            PoolingStrategy::Sum => atoms.sum(0),
            PoolingStrategy::Max => atoms.max(0),
        }
    }
}

/// Pool every `(offset, len)` scope of `atom_hiddens` and stack the results.
///
/// # Arguments
/// * `atom_hiddens` - Tensor of shape (total_atoms, hidden_dim)
/// * `scope` - Non-empty candidate slices, in output order
///
/// # Returns
/// Tensor of shape (scope.len(), hidden_dim)
pub fn pool_scopes(
    atom_hiddens: &Tensor,
    scope: &[(usize, usize)],
    strategy: PoolingStrategy,
) -> Result<Tensor> {
    let pooled = scope
        .iter()
        .map(|&(st, le)| strategy.apply(&atom_hiddens.narrow(0, st, le)?))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&pooled, 0)
}
