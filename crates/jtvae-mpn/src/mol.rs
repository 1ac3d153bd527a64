//! Molecular graph inputs.
//!
//! [`MolGraph`] is the seam to whatever cheminformatics toolkit parsed the
//! molecule; the encoder only needs per-atom and per-bond properties.
//! [`Molecule`] is a small in-memory implementation of it.

use serde::{Deserialize, Serialize};

use crate::{MpnError, Result};

/// Bond order as reported by the toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BondType {
    Single,
    Double,
    Triple,
    Aromatic,
    /// Any other bond kind (dative, zero-order, ...). Encodes as no order bit set.
    Other,
}

/// Borrowed view of one atom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomInfo<'a> {
    pub symbol: &'a str,
    /// Number of explicitly bonded neighbours.
    pub degree: usize,
    pub formal_charge: i32,
    pub is_aromatic: bool,
    /// 1-based index into the candidate's tree nodes; 0 means not backed by a tree node.
    pub map_num: u32,
}

/// View of one undirected bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondInfo {
    pub begin: usize,
    pub end: usize,
    pub bond_type: BondType,
    pub in_ring: bool,
}

/// Read access to a parsed molecule.
pub trait MolGraph {
    fn num_atoms(&self) -> usize;

    /// Atom at local index `idx`, `0 <= idx < num_atoms()`.
    fn atom(&self, idx: usize) -> AtomInfo<'_>;

    fn num_bonds(&self) -> usize;

    fn bond(&self, idx: usize) -> BondInfo;
}

impl<T: MolGraph + ?Sized> MolGraph for &T {
    fn num_atoms(&self) -> usize {
        (**self).num_atoms()
    }

    fn atom(&self, idx: usize) -> AtomInfo<'_> {
        (**self).atom(idx)
    }

    fn num_bonds(&self) -> usize {
        (**self).num_bonds()
    }

    fn bond(&self, idx: usize) -> BondInfo {
        (**self).bond(idx)
    }
}

/// Atom record of a [`Molecule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub symbol: String,
    #[serde(default)]
    pub formal_charge: i32,
    #[serde(default)]
    pub is_aromatic: bool,
    #[serde(default)]
    pub map_num: u32,
}

impl Atom {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            formal_charge: 0,
            is_aromatic: false,
            map_num: 0,
        }
    }

    pub fn with_charge(mut self, formal_charge: i32) -> Self {
        self.formal_charge = formal_charge;
        self
    }

    pub fn aromatic(mut self) -> Self {
        self.is_aromatic = true;
        self
    }

    /// Link this atom to tree node `map_num - 1`.
    pub fn with_map_num(mut self, map_num: u32) -> Self {
        self.map_num = map_num;
        self
    }
}

/// Bond record of a [`Molecule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub bond_type: BondType,
    #[serde(default)]
    pub in_ring: bool,
}

/// Plain molecular graph. Degrees are derived from the bond list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
}

impl Molecule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an atom and return its local index.
    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.atoms.len() - 1
    }

    /// Add an undirected bond between two existing, distinct atoms. Returns the bond index.
    pub fn add_bond(&mut self, begin: usize, end: usize, bond_type: BondType) -> Result<usize> {
        let n = self.atoms.len();
        if begin >= n || end >= n {
            return Err(MpnError::InvalidInput(format!(
                "bond {begin}-{end} references an atom outside 0..{n}"
            )));
        }
        if begin == end {
            return Err(MpnError::InvalidInput(format!(
                "atom {begin} cannot bond to itself"
            )));
        }
        self.bonds.push(Bond {
            begin,
            end,
            bond_type,
            in_ring: false,
        });
        Ok(self.bonds.len() - 1)
    }

    /// Flag a bond as ring member.
    pub fn set_ring(&mut self, bond: usize, in_ring: bool) -> Result<()> {
        let count = self.bonds.len();
        let b = self
            .bonds
            .get_mut(bond)
            .ok_or_else(|| MpnError::InvalidInput(format!("no bond {bond} (have {count})")))?;
        b.in_ring = in_ring;
        Ok(())
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    fn degree(&self, idx: usize) -> usize {
        self.bonds
            .iter()
            .filter(|b| b.begin == idx || b.end == idx)
            .count()
    }
}

impl MolGraph for Molecule {
    fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    fn atom(&self, idx: usize) -> AtomInfo<'_> {
        let atom = &self.atoms[idx];
        AtomInfo {
            symbol: &atom.symbol,
            degree: self.degree(idx),
            formal_charge: atom.formal_charge,
            is_aromatic: atom.is_aromatic,
            map_num: atom.map_num,
        }
    }

    fn num_bonds(&self) -> usize {
        self.bonds.len()
    }

    fn bond(&self, idx: usize) -> BondInfo {
        let bond = &self.bonds[idx];
        BondInfo {
            begin: bond.begin,
            end: bond.end,
            bond_type: bond.bond_type,
            in_ring: bond.in_ring,
        }
    }
}

/// Junction-tree node reference; `idx` is the node's id in the tree-message key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeNode {
    pub idx: usize,
}

/// One candidate subgraph to encode.
#[derive(Debug, Clone)]
pub struct Candidate<M> {
    pub mol: M,
    /// Tree nodes indexed by atom map number minus one.
    pub all_nodes: Vec<TreeNode>,
    pub center: TreeNode,
}

impl<M: MolGraph> Candidate<M> {
    pub fn new(mol: M, all_nodes: Vec<TreeNode>, center: TreeNode) -> Self {
        Self {
            mol,
            all_nodes,
            center,
        }
    }

    /// Tree node id backing `atom`, or `None` when the atom carries no map number.
    pub(crate) fn tree_id(&self, candidate: usize, atom: usize) -> Result<Option<usize>> {
        let map_num = self.mol.atom(atom).map_num;
        if map_num == 0 {
            return Ok(None);
        }
        self.all_nodes
            .get(map_num as usize - 1)
            .map(|node| Some(node.idx))
            .ok_or(MpnError::AtomMapOutOfRange {
                candidate,
                atom,
                map_num,
                nodes: self.all_nodes.len(),
            })
    }
}
