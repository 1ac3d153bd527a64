//! Atom and bond featurisation.
//!
//! Atom vectors are the concatenation of one-hot element, one-hot degree,
//! one-hot formal charge and an aromaticity flag. Values outside each
//! vocabulary land in the last slot of that one-hot block.

use crate::mol::{AtomInfo, BondInfo, BondType};

/// Element vocabulary. The final entry is the catch-all bucket.
pub const ELEM_LIST: [&str; 23] = [
    "C", "N", "O", "S", "F", "Si", "P", "Cl", "Br", "Mg", "Na", "Ca", "Fe", "Al", "I", "B", "K",
    "Se", "Zn", "H", "Cu", "Mn", "unknown",
];

/// Degree vocabulary; degrees above 5 fall into the `5` slot.
pub const DEGREE_LIST: [usize; 6] = [0, 1, 2, 3, 4, 5];

/// Formal charge vocabulary; the neutral slot doubles as the overflow bucket.
pub const CHARGE_LIST: [i32; 5] = [-1, -2, 1, 2, 0];

pub const ATOM_FDIM: usize = ELEM_LIST.len() + DEGREE_LIST.len() + CHARGE_LIST.len() + 1;
pub const BOND_FDIM: usize = 5;

/// One-hot encode `x` over `allowable_set`, mapping misses to the last position.
pub fn onek_encoding_unk<T: PartialEq>(x: &T, allowable_set: &[T]) -> Vec<bool> {
    let hit = allowable_set
        .iter()
        .position(|s| s == x)
        .unwrap_or(allowable_set.len().saturating_sub(1));
    (0..allowable_set.len()).map(|i| i == hit).collect()
}

/// `ATOM_FDIM`-length feature vector for one atom.
pub fn atom_features(atom: &AtomInfo<'_>) -> Vec<f32> {
    let mut features = Vec::with_capacity(ATOM_FDIM);
    let blocks = [
        onek_encoding_unk(&atom.symbol, &ELEM_LIST),
        onek_encoding_unk(&atom.degree, &DEGREE_LIST),
        onek_encoding_unk(&atom.formal_charge, &CHARGE_LIST),
        vec![atom.is_aromatic],
    ];
    for flag in blocks.iter().flatten() {
        features.push(if *flag { 1.0 } else { 0.0 });
    }
    features
}

/// `BOND_FDIM`-length feature vector: single, double, triple, aromatic, in-ring.
pub fn bond_features(bond: &BondInfo) -> Vec<f32> {
    let flags = [
        bond.bond_type == BondType::Single,
        bond.bond_type == BondType::Double,
        bond.bond_type == BondType::Triple,
        bond.bond_type == BondType::Aromatic,
        bond.in_ring,
    ];
    flags.iter().map(|&f| if f { 1.0 } else { 0.0 }).collect()
}
