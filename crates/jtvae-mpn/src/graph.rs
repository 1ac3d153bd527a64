//! Batch graph construction.
//!
//! All candidates of a batch are flattened into one atom table and one
//! directed-bond table. Messages share a single slot space:
//!
//! ```text
//! slot 0                      zero pad message
//! slots 1 .. total_mess       tree messages, in tree-edge order
//! slots total_mess ..         directed bonds, two per undirected bond
//! ```
//!
//! `agraph[a]` lists the slots feeding atom `a`; `bgraph[b]` lists the slots
//! feeding directed bond `b = (x -> y)`, which are the slots feeding `x`
//! minus the reverse bond `y -> x`. Unused entries stay 0 and gather the pad.

use std::collections::{BTreeMap, HashMap};

use candle_core::{DType, Device, Tensor};
use tracing::trace;

use crate::features::{atom_features, bond_features, ATOM_FDIM, BOND_FDIM};
use crate::mol::{Candidate, MolGraph};
use crate::{MpnError, Result};

/// Directed junction-tree edge `(from node idx, to node idx)`.
pub type TreeEdge = (usize, usize);

/// Tree messages keyed by directed tree edge; each value has shape `[hidden_size]`.
pub type TreeMessages = BTreeMap<TreeEdge, Tensor>;

/// Accumulates candidates into a [`MessageGraph`].
pub struct GraphBuilder {
    max_neighbors: usize,
    tree_edges: Vec<TreeEdge>,
    mess_dict: HashMap<TreeEdge, usize>,
    fatoms: Vec<Vec<f32>>,
    fbonds: Vec<f32>,
    in_bonds: Vec<Vec<usize>>,
    all_bonds: Vec<(usize, usize)>,
    scope: Vec<(usize, usize)>,
}

impl GraphBuilder {
    /// Reserve slot 0 for the pad and one slot per distinct tree edge, in iteration order.
    pub fn new(tree_edges: impl IntoIterator<Item = TreeEdge>, max_neighbors: usize) -> Self {
        let mut ordered = Vec::new();
        let mut mess_dict = HashMap::new();
        for edge in tree_edges {
            if !mess_dict.contains_key(&edge) {
                mess_dict.insert(edge, ordered.len() + 1);
                ordered.push(edge);
            }
        }

        Self {
            max_neighbors,
            tree_edges: ordered,
            mess_dict,
            fatoms: Vec::new(),
            fbonds: Vec::new(),
            in_bonds: Vec::new(),
            all_bonds: Vec::new(),
            scope: Vec::new(),
        }
    }

    fn total_mess(&self) -> usize {
        self.tree_edges.len() + 1
    }

    /// Append one candidate's atoms and both directions of each of its bonds.
    pub fn add_candidate<M: MolGraph>(&mut self, cand: &Candidate<M>) -> Result<()> {
        let index = self.scope.len();
        let mol = &cand.mol;
        let n_atoms = mol.num_atoms();
        if n_atoms == 0 {
            return Err(MpnError::EmptyMolecule { candidate: index });
        }

        let offset = self.fatoms.len();
        for i in 0..n_atoms {
            self.fatoms.push(atom_features(&mol.atom(i)));
            self.in_bonds.push(Vec::new());
        }

        let total_mess = self.total_mess();
        for k in 0..mol.num_bonds() {
            let bond = mol.bond(k);
            if bond.begin >= n_atoms || bond.end >= n_atoms {
                return Err(MpnError::InvalidInput(format!(
                    "candidate {index}: bond {k} joins atoms {}-{} but the molecule has {n_atoms}",
                    bond.begin, bond.end
                )));
            }
            let x = bond.begin + offset;
            let y = bond.end + offset;
            let x_bid = cand.tree_id(index, bond.begin)?;
            let y_bid = cand.tree_id(index, bond.end)?;
            let bfeature = bond_features(&bond);

            for (src, dst) in [(x, y), (y, x)] {
                let slot = total_mess + self.all_bonds.len();
                self.all_bonds.push((src, dst));
                self.fbonds.extend_from_slice(&self.fatoms[src]);
                self.fbonds.extend_from_slice(&bfeature);
                self.in_bonds[dst].push(slot);
            }

            if let (Some(xb), Some(yb)) = (x_bid, y_bid) {
                if xb != yb {
                    if let Some(&slot) = self.mess_dict.get(&(xb, yb)) {
                        self.in_bonds[y].push(slot);
                    }
                    if let Some(&slot) = self.mess_dict.get(&(yb, xb)) {
                        self.in_bonds[x].push(slot);
                    }
                }
            }
        }

        trace!(
            candidate = index,
            offset,
            atoms = n_atoms,
            bonds = mol.num_bonds(),
            center = cand.center.idx,
            "added candidate"
        );
        self.scope.push((offset, n_atoms));
        Ok(())
    }

    /// Freeze the accumulated state into padded neighbour tables.
    pub fn finish(self) -> Result<MessageGraph> {
        if self.scope.is_empty() {
            return Err(MpnError::EmptyBatch);
        }

        let max_nb = self.max_neighbors;
        for (a, incoming) in self.in_bonds.iter().enumerate() {
            if incoming.len() > max_nb {
                return Err(MpnError::FanInExceeded {
                    kind: "atom",
                    index: a,
                    count: incoming.len(),
                    max: max_nb,
                });
            }
        }

        let total_atoms = self.fatoms.len();
        let total_bonds = self.all_bonds.len();
        let total_mess = self.total_mess();

        let mut agraph = vec![0u32; total_atoms * max_nb];
        for (a, incoming) in self.in_bonds.iter().enumerate() {
            for (i, &b) in incoming.iter().enumerate() {
                agraph[a * max_nb + i] = slot_index(b)?;
            }
        }

        // Rows of bgraph reuse the position of each slot in in_bonds[x], so an
        // excluded reverse bond leaves a pad hole rather than shifting the row.
        let mut bgraph = vec![0u32; total_bonds * max_nb];
        for (b1, &(x, y)) in self.all_bonds.iter().enumerate() {
            for (i, &b2) in self.in_bonds[x].iter().enumerate() {
                if b2 < total_mess || self.all_bonds[b2 - total_mess].0 != y {
                    bgraph[b1 * max_nb + i] = slot_index(b2)?;
                }
            }
        }

        let fatoms = self.fatoms.into_iter().flatten().collect();

        Ok(MessageGraph {
            max_neighbors: max_nb,
            tree_edges: self.tree_edges,
            mess_dict: self.mess_dict,
            fatoms,
            fbonds: self.fbonds,
            all_bonds: self.all_bonds,
            agraph,
            bgraph,
            scope: self.scope,
        })
    }
}

fn slot_index(slot: usize) -> Result<u32> {
    u32::try_from(slot)
        .map_err(|_| MpnError::InvalidInput(format!("message slot {slot} does not fit in u32")))
}

/// Host-side tables for one batch.
#[derive(Debug, Clone)]
pub struct MessageGraph {
    max_neighbors: usize,
    tree_edges: Vec<TreeEdge>,
    mess_dict: HashMap<TreeEdge, usize>,
    fatoms: Vec<f32>,
    fbonds: Vec<f32>,
    all_bonds: Vec<(usize, usize)>,
    agraph: Vec<u32>,
    bgraph: Vec<u32>,
    scope: Vec<(usize, usize)>,
}

impl MessageGraph {
    /// Build the graph for a whole batch in one call.
    pub fn build<M: MolGraph>(
        cand_batch: &[Candidate<M>],
        tree_edges: impl IntoIterator<Item = TreeEdge>,
        max_neighbors: usize,
    ) -> Result<Self> {
        let mut builder = GraphBuilder::new(tree_edges, max_neighbors);
        for cand in cand_batch {
            builder.add_candidate(cand)?;
        }
        builder.finish()
    }

    pub fn total_atoms(&self) -> usize {
        self.fatoms.len() / ATOM_FDIM
    }

    /// Number of directed bonds.
    pub fn total_bonds(&self) -> usize {
        self.all_bonds.len()
    }

    /// Pad slot plus tree messages.
    pub fn total_mess(&self) -> usize {
        self.tree_edges.len() + 1
    }

    /// Width of every `agraph` / `bgraph` row.
    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// `(offset, atom count)` of each candidate, in batch order.
    pub fn scope(&self) -> &[(usize, usize)] {
        &self.scope
    }

    /// Directed bonds as `(source atom, target atom)` global indices.
    pub fn all_bonds(&self) -> &[(usize, usize)] {
        &self.all_bonds
    }

    /// Tree edges in slot order; edge `i` lives in slot `i + 1`.
    pub fn tree_edges(&self) -> &[TreeEdge] {
        &self.tree_edges
    }

    /// Slot assigned to a tree edge, if it was registered.
    pub fn tree_slot(&self, edge: TreeEdge) -> Option<usize> {
        self.mess_dict.get(&edge).copied()
    }

    /// Slot of directed bond `b` in the shared message space.
    pub fn bond_slot(&self, b: usize) -> usize {
        self.total_mess() + b
    }

    /// Padded incoming slots of atom `a`.
    pub fn atom_neighbors(&self, a: usize) -> &[u32] {
        &self.agraph[a * self.max_neighbors..(a + 1) * self.max_neighbors]
    }

    /// Padded incoming slots of directed bond `b`.
    pub fn bond_neighbors(&self, b: usize) -> &[u32] {
        &self.bgraph[b * self.max_neighbors..(b + 1) * self.max_neighbors]
    }

    /// Upload the tables to `device`, with features cast to `dtype`.
    pub fn to_tensors(&self, device: &Device, dtype: DType) -> Result<GraphTensors> {
        let total_atoms = self.total_atoms();
        let total_bonds = self.total_bonds();
        let max_nb = self.max_neighbors;

        let fatoms =
            Tensor::from_slice(&self.fatoms, (total_atoms, ATOM_FDIM), device)?.to_dtype(dtype)?;
        let agraph = Tensor::from_slice(&self.agraph, (total_atoms, max_nb), device)?;

        let (fbonds, bgraph) = if total_bonds > 0 {
            let fbonds =
                Tensor::from_slice(&self.fbonds, (total_bonds, ATOM_FDIM + BOND_FDIM), device)?
                    .to_dtype(dtype)?;
            let bgraph = Tensor::from_slice(&self.bgraph, (total_bonds, max_nb), device)?;
            (Some(fbonds), Some(bgraph))
        } else {
            (None, None)
        };

        Ok(GraphTensors {
            fatoms,
            fbonds,
            agraph,
            bgraph,
        })
    }
}

/// Device-resident inputs of one forward pass.
#[derive(Debug, Clone)]
pub struct GraphTensors {
    /// `[total_atoms, ATOM_FDIM]`, in the model dtype.
    pub fatoms: Tensor,
    /// `[total_bonds, ATOM_FDIM + BOND_FDIM]`, absent when the batch has no bonds.
    pub fbonds: Option<Tensor>,
    /// `[total_atoms, max_neighbors]`, u32 slots.
    pub agraph: Tensor,
    /// `[total_bonds, max_neighbors]`, u32 slots.
    pub bgraph: Option<Tensor>,
}
