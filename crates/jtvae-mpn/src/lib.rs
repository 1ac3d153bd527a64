//! JT-VAE candidate graph encoder
//!
//! Junction-tree message passing (JTMPN) over candidate molecular subgraphs,
//! built on Candle. Each candidate is encoded into one fixed-size vector by
//! relaxing directed-bond messages seeded with junction-tree messages and
//! pooling the resulting atom states.
//!
//! # Features
//! - Batched graph construction with a shared tree/bond message slot space
//! - Reverse-bond exclusion during relaxation
//! - Configurable hidden size, depth, fan-in bound and pooling
//! - GPU support (CUDA, Metal) behind cargo features, CPU by default
//!
//! # Example
//! ```rust,no_run
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use jtvae_mpn::{Atom, BondType, Candidate, Jtmpn, Molecule, MpnConfig, TreeMessages, TreeNode};
//!
//! fn main() -> jtvae_mpn::Result<()> {
//!     let varmap = VarMap::new();
//!     let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//!     let model = Jtmpn::new(MpnConfig::cpu().with_hidden_size(56), vb)?;
//!
//!     let mut mol = Molecule::new();
//!     let c = mol.add_atom(Atom::new("C").with_map_num(1));
//!     let o = mol.add_atom(Atom::new("O").with_map_num(1));
//!     mol.add_bond(c, o, BondType::Double)?;
//!
//!     let node = TreeNode { idx: 0 };
//!     let batch = vec![Candidate::new(mol, vec![node], node)];
//!     let vecs = model.forward(&batch, &TreeMessages::new())?;
//!     println!("{:?}", vecs.dims()); // [1, 56]
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod graph;
pub mod mol;
pub mod mpn;
pub mod pooling;

pub use config::MpnConfig;
pub use error::{MpnError, Result};
pub use features::{atom_features, bond_features, onek_encoding_unk, ATOM_FDIM, BOND_FDIM, ELEM_LIST};
pub use graph::{GraphBuilder, GraphTensors, MessageGraph, TreeEdge, TreeMessages};
pub use mol::{Atom, AtomInfo, Bond, BondInfo, BondType, Candidate, MolGraph, Molecule, TreeNode};
pub use mpn::Jtmpn;
pub use pooling::{pool_scopes, PoolingStrategy};
