//! Junction-tree message-passing network over candidate graphs.

use std::time::Instant;

use candle_core::{DType, Device, DeviceLocation, Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use tracing::{debug, info};

use crate::features::{ATOM_FDIM, BOND_FDIM};
use crate::graph::{GraphTensors, MessageGraph, TreeMessages};
use crate::mol::{Candidate, MolGraph};
use crate::pooling::pool_scopes;
use crate::{MpnConfig, MpnError, Result};

/// Encodes candidate molecular subgraphs into `hidden_size` vectors.
///
/// Directed-bond messages are relaxed for `depth - 1` rounds on top of the
/// tree messages supplied by the junction-tree encoder, then every atom
/// reads out its incoming messages and the atoms of each candidate are
/// pooled.
pub struct Jtmpn {
    w_i: Linear,
    w_h: Linear,
    w_o: Linear,
    device: Device,
    dtype: DType,
    config: MpnConfig,
}

impl Jtmpn {
    /// Build the network with weights taken from `vb` (`w_i`, `w_h`, `w_o`).
    pub fn new(config: MpnConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_size;

        let w_i = linear_no_bias(ATOM_FDIM + BOND_FDIM, hidden, vb.pp("w_i"))?;
        let w_h = linear_no_bias(hidden, hidden, vb.pp("w_h"))?;
        let w_o = linear(ATOM_FDIM + hidden, hidden, vb.pp("w_o"))?;
        let device = vb.device().clone();
        let dtype = vb.dtype();

        info!(
            "JTMPN ready: hidden_size={}, depth={}, max_neighbors={}, device={:?}, dtype={:?}",
            hidden,
            config.depth,
            config.max_neighbors,
            device.location(),
            dtype
        );

        Ok(Self {
            w_i,
            w_h,
            w_o,
            device,
            dtype,
            config,
        })
    }

    /// Device holding the learned parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Float type of the learned parameters; inputs are cast to it.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn config(&self) -> &MpnConfig {
        &self.config
    }

    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    pub fn depth(&self) -> usize {
        self.config.depth
    }

    /// Encode a batch of candidates.
    ///
    /// Returns a tensor of shape `[cand_batch.len(), hidden_size]`, rows in input order.
    pub fn forward<M: MolGraph>(
        &self,
        cand_batch: &[Candidate<M>],
        tree_mess: &TreeMessages,
    ) -> Result<Tensor> {
        if cand_batch.is_empty() {
            return Err(MpnError::EmptyBatch);
        }
        let start = Instant::now();

        let graph = MessageGraph::build(
            cand_batch,
            tree_mess.keys().copied(),
            self.config.max_neighbors,
        )?;
        let tree_message = self.stack_tree_messages(&graph, tree_mess)?;
        let tensors = graph.to_tensors(&self.device, self.dtype)?;

        let graph_message = self.relax(&tensors, &tree_message)?;
        let atom_hiddens = self.readout(&tensors, &tree_message, graph_message.as_ref())?;
        let mol_vecs = pool_scopes(&atom_hiddens, graph.scope(), self.config.pooling)?;

        debug!(
            "Encoded {} candidates ({} atoms, {} directed bonds, {} tree messages) in {:.2}ms",
            cand_batch.len(),
            graph.total_atoms(),
            graph.total_bonds(),
            graph.total_mess() - 1,
            start.elapsed().as_secs_f32() * 1000.0
        );

        Ok(mol_vecs)
    }

    /// Encode candidates in chunks of `batch_size` and return host vectors in input order.
    pub fn encode<M: MolGraph>(
        &self,
        cand_batch: &[Candidate<M>],
        tree_mess: &TreeMessages,
    ) -> Result<Vec<Vec<f32>>> {
        if cand_batch.is_empty() {
            return Err(MpnError::EmptyBatch);
        }

        let mut result = Vec::with_capacity(cand_batch.len());
        for chunk in cand_batch.chunks(self.config.batch_size) {
            let vecs = self.forward(chunk, tree_mess)?;
            result.extend(vecs.to_dtype(DType::F32)?.to_vec2::<f32>()?);
        }
        Ok(result)
    }

    /// Stack the pad vector and the tree messages in slot order: `[total_mess, hidden]`.
    fn stack_tree_messages(&self, graph: &MessageGraph, tree_mess: &TreeMessages) -> Result<Tensor> {
        let hidden = self.config.hidden_size;
        let pad = Tensor::zeros(hidden, self.dtype, &self.device)?;

        let mut rows = Vec::with_capacity(graph.total_mess());
        rows.push(pad);
        for edge in graph.tree_edges() {
            let vec = tree_mess.get(edge).ok_or_else(|| {
                MpnError::InvalidInput(format!("tree edge {edge:?} has a slot but no message"))
            })?;
            ensure_same_device(&self.device, vec.device())?;
            let got = vec.dims1()?;
            if got != hidden {
                return Err(MpnError::DimensionMismatch {
                    expected: hidden,
                    got,
                });
            }
            rows.push(vec.to_dtype(self.dtype)?);
        }

        Ok(Tensor::stack(&rows, 0)?)
    }

    /// Run the relaxation rounds and return the final directed-bond messages,
    /// or `None` when the batch has no bonds.
    fn relax(&self, tensors: &GraphTensors, tree_message: &Tensor) -> Result<Option<Tensor>> {
        let (fbonds, bgraph) = match (&tensors.fbonds, &tensors.bgraph) {
            (Some(fbonds), Some(bgraph)) => (fbonds, bgraph),
            _ => return Ok(None),
        };

        let binput = self.w_i.forward(fbonds)?;
        let mut graph_message = binput.relu()?;

        for _ in 1..self.config.depth {
            let message = Tensor::cat(&[tree_message, &graph_message], 0)?;
            let nei_message = gather_sum(&message, bgraph)?;
            let nei_message = self.w_h.forward(&nei_message)?;
            graph_message = (&binput + nei_message)?.relu()?;
        }

        Ok(Some(graph_message))
    }

    /// Per-atom hidden states `[total_atoms, hidden]`.
    fn readout(
        &self,
        tensors: &GraphTensors,
        tree_message: &Tensor,
        graph_message: Option<&Tensor>,
    ) -> Result<Tensor> {
        let message = match graph_message {
            Some(graph_message) => Tensor::cat(&[tree_message, graph_message], 0)?,
            None => tree_message.clone(),
        };
        let nei_message = gather_sum(&message, &tensors.agraph)?;
        let ainput = Tensor::cat(&[&tensors.fatoms, &nei_message], 1)?;
        Ok(self.w_o.forward(&ainput)?.relu()?)
    }
}

/// Sum the rows of `message` selected by each row of the `[n, k]` index table: `[n, hidden]`.
fn gather_sum(message: &Tensor, index: &Tensor) -> Result<Tensor> {
    let (n, k) = index.dims2()?;
    let hidden = message.dim(1)?;
    let picked = message.index_select(&index.flatten_all()?, 0)?;
    Ok(picked.reshape((n, k, hidden))?.sum(1)?)
}

/// Fail unless `found` is the same device as `expected`.
pub(crate) fn ensure_same_device(expected: &Device, found: &Device) -> Result<()> {
    if expected.same_device(found) {
        Ok(())
    } else {
        Err(device_mismatch(expected.location(), found.location()))
    }
}

fn device_mismatch(expected: DeviceLocation, found: DeviceLocation) -> MpnError {
    MpnError::DeviceMismatch { expected, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mol::{Atom, BondType, Molecule, TreeNode};
    use candle_nn::VarMap;

    fn model(hidden: usize, depth: usize) -> (Jtmpn, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MpnConfig::cpu().with_hidden_size(hidden).with_depth(depth);
        (Jtmpn::new(config, vb).unwrap(), varmap)
    }

    fn diatomic(a: &str, b: &str, map_nums: (u32, u32)) -> Molecule {
        let mut mol = Molecule::new();
        let x = mol.add_atom(Atom::new(a).with_map_num(map_nums.0));
        let y = mol.add_atom(Atom::new(b).with_map_num(map_nums.1));
        mol.add_bond(x, y, BondType::Single).unwrap();
        mol
    }

    fn cand(mol: Molecule) -> Candidate<Molecule> {
        Candidate::new(mol, vec![TreeNode { idx: 0 }, TreeNode { idx: 1 }], TreeNode { idx: 0 })
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    fn prepare(
        m: &Jtmpn,
        batch: &[Candidate<Molecule>],
        tree_mess: &TreeMessages,
    ) -> (GraphTensors, Tensor) {
        let graph = MessageGraph::build(batch, tree_mess.keys().copied(), 10).unwrap();
        let tree_message = m.stack_tree_messages(&graph, tree_mess).unwrap();
        (graph.to_tensors(&Device::Cpu, m.dtype()).unwrap(), tree_message)
    }

    #[test]
    fn test_depth_one_is_relu_of_bond_input() {
        let (m, _vars) = model(8, 1);
        let batch = vec![cand(diatomic("C", "N", (0, 0)))];
        let (tensors, tree_message) = prepare(&m, &batch, &TreeMessages::new());

        let graph_message = m.relax(&tensors, &tree_message).unwrap().unwrap();
        let fbonds = tensors.fbonds.as_ref().unwrap();
        let expected = fbonds.matmul(&m.w_i.weight().t().unwrap()).unwrap().relu().unwrap();

        assert_eq!(graph_message.dims2().unwrap(), (2, 8));
        assert!(max_abs_diff(&graph_message, &expected) < 1e-6);
    }

    #[test]
    fn test_reverse_bond_excluded_from_aggregate() {
        // With only the reverse bond as neighbour, an extra round adds W_h(0) = 0.
        let (shallow, vars) = model(8, 1);
        let deep = Jtmpn::new(
            MpnConfig::cpu().with_hidden_size(8).with_depth(2),
            VarBuilder::from_varmap(&vars, DType::F32, &Device::Cpu),
        )
        .unwrap();
        let batch = vec![cand(diatomic("C", "O", (0, 0)))];
        let (tensors, tree_message) = prepare(&shallow, &batch, &TreeMessages::new());

        let one = shallow.relax(&tensors, &tree_message).unwrap().unwrap();
        let two = deep.relax(&tensors, &tree_message).unwrap().unwrap();
        assert!(max_abs_diff(&one, &two) < 1e-6);

        let bgraph = tensors.bgraph.unwrap();
        let nei = gather_sum(&Tensor::cat(&[&tree_message, &one], 0).unwrap(), &bgraph).unwrap();
        assert_eq!(nei.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_gather_sum_uses_pad_slot() {
        let message = Tensor::from_vec(
            vec![0.0f32, 0.0, 1.0, 2.0, 10.0, 20.0],
            (3, 2),
            &Device::Cpu,
        )
        .unwrap();
        let index = Tensor::from_vec(vec![1u32, 2, 0, 0, 0, 0], (2, 3), &Device::Cpu).unwrap();

        let summed = gather_sum(&message, &index).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(summed, vec![vec![11.0, 22.0], vec![0.0, 0.0]]);
    }

    #[test]
    fn test_forward_shape_and_nonnegative() {
        let (m, _vars) = model(16, 3);
        let mut ring = Molecule::new();
        for _ in 0..6 {
            ring.add_atom(Atom::new("C").aromatic());
        }
        for i in 0..6 {
            let b = ring.add_bond(i, (i + 1) % 6, BondType::Aromatic).unwrap();
            ring.set_ring(b, true).unwrap();
        }
        let batch = vec![cand(diatomic("C", "N", (1, 2))), cand(ring)];

        let out = m.forward(&batch, &TreeMessages::new()).unwrap();
        assert_eq!(out.dims2().unwrap(), (2, 16));
        let min = out.flatten_all().unwrap().min(0).unwrap().to_scalar::<f32>().unwrap();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_bondless_candidate_reads_out_pad() {
        let (m, _vars) = model(4, 3);
        let mut single = Molecule::new();
        single.add_atom(Atom::new("Cl").with_charge(-1));
        let batch = vec![cand(single)];

        let out = m.forward(&batch, &TreeMessages::new()).unwrap();
        assert_eq!(out.dims2().unwrap(), (1, 4));
    }

    #[test]
    fn test_tree_message_shape_checked() {
        let (m, _vars) = model(4, 2);
        let batch = vec![cand(diatomic("C", "C", (1, 2)))];
        let mut tree_mess = TreeMessages::new();
        tree_mess.insert((0, 1), Tensor::ones(5, DType::F32, &Device::Cpu).unwrap());

        let err = m.forward(&batch, &tree_mess).unwrap_err();
        assert!(matches!(err, MpnError::DimensionMismatch { expected: 4, got: 5 }));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let (m, _vars) = model(4, 2);
        let batch: Vec<Candidate<Molecule>> = Vec::new();
        assert!(matches!(
            m.forward(&batch, &TreeMessages::new()),
            Err(MpnError::EmptyBatch)
        ));
        assert!(matches!(
            m.encode(&batch, &TreeMessages::new()),
            Err(MpnError::EmptyBatch)
        ));
    }

    #[test]
    fn test_same_device_accepted() {
        assert!(ensure_same_device(&Device::Cpu, &Device::Cpu).is_ok());
    }

    #[test]
    fn test_device_mismatch_names_both_devices() {
        let err = device_mismatch(DeviceLocation::Cuda { gpu_id: 0 }, DeviceLocation::Cpu);
        assert!(matches!(
            err,
            MpnError::DeviceMismatch {
                expected: DeviceLocation::Cuda { gpu_id: 0 },
                found: DeviceLocation::Cpu,
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains("Cuda"), "{msg}");
        assert!(msg.contains("Cpu"), "{msg}");
    }

    #[cfg(feature = "cuda")]
    #[test]
    fn test_cpu_tree_message_rejected_on_cuda_model() {
        let Ok(gpu) = Device::new_cuda(0) else {
            return;
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &gpu);
        let m = Jtmpn::new(MpnConfig::gpu().with_hidden_size(4), vb).unwrap();
        let batch = vec![cand(diatomic("C", "C", (1, 2)))];
        let mut tree_mess = TreeMessages::new();
        tree_mess.insert((0, 1), Tensor::ones(4, DType::F32, &Device::Cpu).unwrap());

        let err = m.forward(&batch, &tree_mess).unwrap_err();
        assert!(matches!(err, MpnError::DeviceMismatch { found: DeviceLocation::Cpu, .. }));
    }

    #[test]
    fn test_relaxation_round_matches_direct_computation() {
        let hidden = 6;
        let (m, _vars) = model(hidden, 2);
        // C-C=O: each terminal bond has a real neighbour through the middle carbon.
        let mut mol = Molecule::new();
        let c1 = mol.add_atom(Atom::new("C"));
        let c2 = mol.add_atom(Atom::new("C"));
        let o = mol.add_atom(Atom::new("O"));
        mol.add_bond(c1, c2, BondType::Single).unwrap();
        mol.add_bond(c2, o, BondType::Double).unwrap();
        let batch = vec![cand(mol)];

        let graph = MessageGraph::build(&batch, std::iter::empty(), 10).unwrap();
        let tree_message = m.stack_tree_messages(&graph, &TreeMessages::new()).unwrap();
        let tensors = graph.to_tensors(&Device::Cpu, DType::F32).unwrap();
        let got = m.relax(&tensors, &tree_message).unwrap().unwrap().to_vec2::<f32>().unwrap();

        let w_i = m.w_i.weight().to_vec2::<f32>().unwrap();
        let w_h = m.w_h.weight().to_vec2::<f32>().unwrap();
        let fbonds = tensors.fbonds.as_ref().unwrap().to_vec2::<f32>().unwrap();
        let matvec = |w: &[Vec<f32>], x: &[f32]| -> Vec<f32> {
            w.iter().map(|row| row.iter().zip(x).map(|(a, b)| a * b).sum()).collect()
        };
        let relu = |v: Vec<f32>| -> Vec<f32> { v.into_iter().map(|x| x.max(0.0)).collect() };

        let binput: Vec<Vec<f32>> = fbonds.iter().map(|x| matvec(&w_i, x)).collect();
        let mut slots = tree_message.to_vec2::<f32>().unwrap();
        slots.extend(binput.iter().cloned().map(relu));

        let mut saw_neighbour = false;
        for (b, row) in got.iter().enumerate() {
            let mut nei = vec![0.0f32; hidden];
            for &slot in graph.bond_neighbors(b) {
                saw_neighbour |= slot as usize >= graph.total_mess();
                for (acc, x) in nei.iter_mut().zip(&slots[slot as usize]) {
                    *acc += x;
                }
            }
            let update: Vec<f32> = binput[b].iter().zip(matvec(&w_h, &nei)).map(|(a, c)| a + c).collect();
            let expected = relu(update);
            for (g, e) in row.iter().zip(&expected) {
                assert!((g - e).abs() < 1e-5, "bond {b}: {g} vs {e}");
            }
        }
        assert!(saw_neighbour);
    }

    #[test]
    fn test_f64_weights_encode() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let m = Jtmpn::new(MpnConfig::cpu().with_hidden_size(8).with_depth(3), vb).unwrap();
        assert_eq!(m.dtype(), DType::F64);
        let batch = vec![cand(diatomic("C", "N", (1, 2)))];

        let out = m.forward(&batch, &TreeMessages::new()).unwrap();
        assert_eq!(out.dtype(), DType::F64);
        assert_eq!(out.dims2().unwrap(), (1, 8));

        let message = Tensor::randn(0f64, 1.0, 8, &Device::Cpu).unwrap();
        let mut as_f64 = TreeMessages::new();
        as_f64.insert((1, 0), message.clone());
        let mut as_f32 = TreeMessages::new();
        as_f32.insert((1, 0), message.to_dtype(DType::F32).unwrap());

        let a = m.forward(&batch, &as_f64).unwrap();
        let b = m.forward(&batch, &as_f32).unwrap();
        assert_eq!(a.dtype(), DType::F64);
        let diff = (a - b).unwrap().abs().unwrap().flatten_all().unwrap().max(0).unwrap();
        assert!(diff.to_scalar::<f64>().unwrap() < 1e-5);

        let vecs = m.encode(&batch, &as_f64).unwrap();
        assert_eq!(vecs.len(), 1);
        assert_eq!(vecs[0].len(), 8);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let result = Jtmpn::new(MpnConfig::cpu().with_depth(0), vb);
        assert!(matches!(result, Err(MpnError::Config(_))));
    }
}
