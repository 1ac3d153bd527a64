//! Fixtures and assertions shared by the JT-VAE integration tests.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use jtvae_mpn::{
    Atom, BondType, Candidate, Jtmpn, Molecule, MpnConfig, TreeEdge, TreeMessages, TreeNode,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// CPU model with freshly initialised weights. Keep the `VarMap` alive to reuse the weights.
pub fn cpu_model(hidden_size: usize, depth: usize) -> (Jtmpn, VarMap) {
    let varmap = VarMap::new();
    let model = model_from(&varmap, hidden_size, depth);
    (model, varmap)
}

/// Model sharing the weights already stored in `varmap`.
pub fn model_from(varmap: &VarMap, hidden_size: usize, depth: usize) -> Jtmpn {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    let config = MpnConfig::cpu()
        .with_hidden_size(hidden_size)
        .with_depth(depth);
    Jtmpn::new(config, vb).expect("model construction")
}

/// Build a molecule from `(symbol, map_num)` atoms and `(begin, end, type)` bonds.
pub fn molecule(atoms: &[(&str, u32)], bonds: &[(usize, usize, BondType)]) -> Molecule {
    let mut mol = Molecule::new();
    for &(symbol, map_num) in atoms {
        mol.add_atom(Atom::new(symbol).with_map_num(map_num));
    }
    for &(begin, end, bond_type) in bonds {
        mol.add_bond(begin, end, bond_type).expect("fixture bond");
    }
    mol
}

/// Two atoms joined by a single bond.
pub fn diatomic(a: (&str, u32), b: (&str, u32)) -> Molecule {
    molecule(&[a, b], &[(0, 1, BondType::Single)])
}

/// CH3-CH2-OH heavy atoms, no map numbers.
pub fn ethanol() -> Molecule {
    molecule(
        &[("C", 0), ("C", 0), ("O", 0)],
        &[(0, 1, BondType::Single), (1, 2, BondType::Single)],
    )
}

/// Acetic acid heavy atoms; the carbonyl carbon is tree-mapped to node 1.
pub fn acetic_acid() -> Molecule {
    molecule(
        &[("C", 0), ("C", 1), ("O", 0), ("O", 2)],
        &[
            (0, 1, BondType::Single),
            (1, 2, BondType::Double),
            (1, 3, BondType::Single),
        ],
    )
}

/// Aromatic six-ring with ring-flagged bonds.
pub fn benzene() -> Molecule {
    let mut mol = Molecule::new();
    for _ in 0..6 {
        mol.add_atom(Atom::new("C").aromatic());
    }
    for i in 0..6 {
        let b = mol
            .add_bond(i, (i + 1) % 6, BondType::Aromatic)
            .expect("ring bond");
        mol.set_ring(b, true).expect("ring flag");
    }
    mol
}

/// Reorder atoms so that old atom `i` becomes atom `perm[i]`; bonds follow their atoms.
pub fn permute(mol: &Molecule, perm: &[usize]) -> Molecule {
    assert_eq!(perm.len(), mol.atoms().len(), "permutation length");
    let mut slots: Vec<Option<Atom>> = vec![None; perm.len()];
    for (old, atom) in mol.atoms().iter().enumerate() {
        slots[perm[old]] = Some(atom.clone());
    }

    let mut out = Molecule::new();
    for atom in slots {
        out.add_atom(atom.expect("permutation must be a bijection"));
    }
    // Reverse bond order as well, so nothing depends on insertion order.
    for bond in mol.bonds().iter().rev() {
        let b = out
            .add_bond(perm[bond.end], perm[bond.begin], bond.bond_type)
            .expect("permuted bond");
        out.set_ring(b, bond.in_ring).expect("permuted ring flag");
    }
    out
}

/// Candidate whose atom map number `k` resolves to tree node `node_ids[k - 1]`.
pub fn candidate(mol: Molecule, node_ids: &[usize]) -> Candidate<Molecule> {
    let all_nodes: Vec<TreeNode> = node_ids.iter().map(|&idx| TreeNode { idx }).collect();
    let center = all_nodes.first().copied().unwrap_or(TreeNode { idx: 0 });
    Candidate::new(mol, all_nodes, center)
}

/// Deterministic tree messages with entries uniform in `[-1, 1)`.
pub fn random_tree_messages(edges: &[TreeEdge], hidden_size: usize, seed: u64) -> TreeMessages {
    let mut rng = StdRng::seed_from_u64(seed);
    edges
        .iter()
        .map(|&edge| {
            let values: Vec<f32> = (0..hidden_size).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let vec = Tensor::from_vec(values, hidden_size, &Device::Cpu).expect("tree message");
            (edge, vec)
        })
        .collect()
}

/// Largest absolute element-wise difference between two equally shaped tensors.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    pretty_assertions::assert_eq!(a.dims(), b.dims(), "shape mismatch");
    (a - b)
        .and_then(|d| d.abs())
        .and_then(|d| d.flatten_all())
        .and_then(|d| d.max(0))
        .and_then(|d| d.to_scalar::<f32>())
        .expect("tensor difference")
}

/// Assert two tensors agree element-wise within `tol`.
pub fn assert_close(a: &Tensor, b: &Tensor, tol: f32) {
    let diff = max_abs_diff(a, b);
    assert!(diff <= tol, "tensors differ by {diff} (tolerance {tol})");
}

/// Row `i` of a 2-D tensor as a `[1, hidden]` tensor.
pub fn row(t: &Tensor, i: usize) -> Tensor {
    t.narrow(0, i, 1).expect("row in range")
}
