//! Encode a few candidate attachments with randomly initialised weights.

use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use jtvae_mpn::{Atom, BondType, Candidate, Jtmpn, Molecule, MpnConfig, TreeMessages, TreeNode};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jtvae_mpn=debug".into()),
        )
        .init();

    let config = MpnConfig::load()?;
    let device = config.select_device()?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Jtmpn::new(config, vb)?;

    // Two ways of attaching a carboxyl clique (node 1) to a methyl clique (node 0).
    let nodes = vec![TreeNode { idx: 0 }, TreeNode { idx: 1 }];
    let batch = vec![
        Candidate::new(acetic_acid(1)?, nodes.clone(), nodes[0]),
        Candidate::new(acetic_acid(0)?, nodes.clone(), nodes[0]),
    ];

    let hidden = model.hidden_size();
    let mut tree_mess = TreeMessages::new();
    tree_mess.insert((0, 1), Tensor::randn(0f32, 1.0, hidden, model.device())?);
    tree_mess.insert((1, 0), Tensor::randn(0f32, 1.0, hidden, model.device())?);

    let start = std::time::Instant::now();
    let vecs = model.encode(&batch, &tree_mess)?;
    println!(
        "Encoded {} candidates into {}-dim vectors in {:.2}ms",
        vecs.len(),
        hidden,
        start.elapsed().as_secs_f64() * 1000.0
    );

    for (i, v) in vecs.iter().enumerate() {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        println!("  candidate {}: |v| = {:.4}, head = {:?}", i, norm, &v[..4.min(v.len())]);
    }

    Ok(())
}

/// Acetic acid; `methyl_map` is the map number given to the methyl carbon (0 leaves it unmapped).
fn acetic_acid(methyl_map: u32) -> jtvae_mpn::Result<Molecule> {
    let mut mol = Molecule::new();
    let c1 = mol.add_atom(Atom::new("C").with_map_num(methyl_map));
    let c2 = mol.add_atom(Atom::new("C").with_map_num(2));
    let o1 = mol.add_atom(Atom::new("O").with_map_num(2));
    let o2 = mol.add_atom(Atom::new("O").with_map_num(2));
    mol.add_bond(c1, c2, BondType::Single)?;
    mol.add_bond(c2, o1, BondType::Double)?;
    mol.add_bond(c2, o2, BondType::Single)?;
    Ok(mol)
}
