//! CFG Collection Builder
//!
//! Forward-reachability discovery of the whole-task CFG collection from the
//! entry addresses.
//!
//! # Algorithm
//! Per procedure, a scan queue walks instruction runs from the entry. Block
//! boundaries arise at branch targets, after branches and after calls.
//! Calls become synthetic blocks linked to recursively discovered callee
//! CFGs. Unresolved indirect branches consult the flow facts; without
//! declared targets a warning is issued and the branch leads to the
//! procedure's unknown block.
//!
//! Determinism: blocks are numbered in discovery order; CFGs in discovery
//! order from the task entry.

use crate::cfg::{BlockId, BlockKind, Cfg, CfgCollection, CfgId, EdgeKind};
use crate::cfg::transform::rebuild_callers;
use crate::error::Result;
use crate::prog::flowfact::FlowFacts;
use crate::prog::{Address, Inst, InstructionProvider};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Build the CFG collection reachable from the given entry points.
///
/// The first entry is the task entry; the others are additional declared
/// callable roots.
pub fn build_collection(
    provider: &dyn InstructionProvider,
    flow_facts: &FlowFacts,
    entries: &[(String, Address)],
) -> Result<CfgCollection> {
    let mut builder = Builder {
        provider,
        flow_facts,
        cfg_of: HashMap::new(),
        queue: VecDeque::new(),
        labels: HashMap::new(),
    };
    for (label, address) in entries.iter() {
        builder.labels.insert(*address, label.clone());
        builder.declare(*address);
    }

    let mut cfgs: Vec<Cfg> = Vec::new();
    while let Some(address) = builder.queue.pop_front() {
        let id = builder.cfg_of[&address];
        debug_assert_eq!(id as usize, cfgs.len());
        let label = builder
            .labels
            .get(&address)
            .cloned()
            .unwrap_or_else(|| format!("f_{:#010x}", address.offset));
        let cfg = builder.build_cfg(id, label, address)?;
        cfgs.push(cfg);
    }
    rebuild_callers(&mut cfgs);
    Ok(CfgCollection::new(cfgs, 0))
}

struct Builder<'a> {
    provider: &'a dyn InstructionProvider,
    flow_facts: &'a FlowFacts,
    cfg_of: HashMap<Address, CfgId>,
    queue: VecDeque<Address>,
    labels: HashMap<Address, String>,
}

/// How a scanned instruction run ended.
enum RunEnd {
    Call {
        callees: Vec<Option<CfgId>>,
    },
    Return,
    Branch {
        targets: Vec<u32>,
        conditional: bool,
        unresolved: bool,
    },
}

impl<'a> Builder<'a> {
    /// Register a procedure entry, queueing it for construction.
    fn declare(&mut self, address: Address) -> CfgId {
        if let Some(id) = self.cfg_of.get(&address) {
            return *id;
        }
        let id = self.cfg_of.len() as CfgId;
        self.cfg_of.insert(address, id);
        self.queue.push_back(address);
        id
    }

    fn build_cfg(&mut self, id: CfgId, label: String, entry: Address) -> Result<Cfg> {
        let page = entry.page;
        // Scanned instructions by offset and block starts in discovery order.
        let mut insts: BTreeMap<u32, Inst> = BTreeMap::new();
        let mut starts: BTreeSet<u32> = BTreeSet::new();
        let mut starts_order: Vec<u32> = Vec::new();
        let mut ends: HashMap<u32, RunEnd> = HashMap::new();
        let mut scan: VecDeque<u32> = VecDeque::new();

        let add_start = |offset: u32,
                         starts: &mut BTreeSet<u32>,
                         starts_order: &mut Vec<u32>| {
            if starts.insert(offset) {
                starts_order.push(offset);
            }
        };
        add_start(entry.offset, &mut starts, &mut starts_order);
        scan.push_back(entry.offset);

        while let Some(mut offset) = scan.pop_front() {
            loop {
                if insts.contains_key(&offset) {
                    break;
                }
                let inst = self.provider.instruction_at(Address::new(page, offset))?;
                let next = offset + inst.size;
                let is_control = inst.is_control();
                let kind = inst.kind;
                let target = inst.target;
                let address = inst.address;
                insts.insert(offset, inst);
                if !is_control {
                    offset = next;
                    continue;
                }

                if kind.is_call() {
                    // Direct callee, or declared targets of an indirect call.
                    let mut callees: Vec<Option<CfgId>> = Vec::new();
                    if let Some(t) = target {
                        callees.push(Some(self.declare(t)));
                    } else {
                        let declared = self.flow_facts.branch_targets(address);
                        if declared.is_empty() {
                            log::warn!(
                                "unresolved indirect call at {}, callee unknown",
                                address
                            );
                            callees.push(None);
                        } else {
                            for t in declared.to_vec() {
                                callees.push(Some(self.declare(t)));
                            }
                        }
                    }
                    ends.insert(offset, RunEnd::Call { callees });
                    add_start(next, &mut starts, &mut starts_order);
                    scan.push_back(next);
                } else if kind.is_return() {
                    ends.insert(offset, RunEnd::Return);
                } else {
                    // Branch (or trap, handled as an unconditional transfer
                    // to the unknown block).
                    let mut targets: Vec<u32> = Vec::new();
                    let mut unresolved = false;
                    if let Some(t) = target {
                        targets.push(t.offset);
                    } else {
                        let declared = self.flow_facts.branch_targets(address);
                        if declared.is_empty() {
                            unresolved = true;
                            log::warn!(
                                "unresolved indirect branch at {}, successor unknown",
                                address
                            );
                        } else {
                            targets.extend(declared.iter().map(|t| t.offset));
                        }
                    }
                    for t in targets.iter() {
                        add_start(*t, &mut starts, &mut starts_order);
                        scan.push_back(*t);
                    }
                    let conditional = kind.is_cond();
                    if conditional {
                        add_start(next, &mut starts, &mut starts_order);
                        scan.push_back(next);
                    }
                    ends.insert(
                        offset,
                        RunEnd::Branch {
                            targets,
                            conditional,
                            unresolved,
                        },
                    );
                }
                break;
            }
        }

        // Build basic blocks in discovery order of their starts.
        let mut cfg = Cfg::new(id, label, entry);
        let mut block_at: HashMap<u32, BlockId> = HashMap::new();
        let mut block_last: Vec<(BlockId, u32)> = Vec::new();
        for &start in starts_order.iter() {
            if !insts.contains_key(&start) {
                continue;
            }
            let mut run: Vec<Inst> = Vec::new();
            let mut offset = start;
            let last = loop {
                let inst = insts[&offset].clone();
                let next = offset + inst.size;
                let ends_here = ends.contains_key(&offset);
                run.push(inst);
                if ends_here || !insts.contains_key(&next) || starts.contains(&next) {
                    break offset;
                }
                offset = next;
            };
            let block = cfg.add_block(BlockKind::Basic { insts: run });
            block_at.insert(start, block);
            block_last.push((block, last));
        }

        // Edges. The unknown block is created on first use.
        let mut unknown: Option<BlockId> = None;
        let entry_block = cfg.entry;
        cfg.add_edge(entry_block, block_at[&entry.offset], EdgeKind::NotTaken);
        for (block, last) in block_last {
            let next = last + insts[&last].size;
            match ends.get(&last) {
                Some(RunEnd::Call { callees }) => {
                    let continuation = block_at.get(&next).copied().unwrap_or(cfg.exit);
                    for callee in callees.iter() {
                        let synth = cfg.add_block(BlockKind::Synthetic { callee: *callee });
                        cfg.add_edge(block, synth, EdgeKind::Call);
                        cfg.add_edge(synth, continuation, EdgeKind::NotTaken);
                    }
                }
                Some(RunEnd::Return) => {
                    cfg.add_edge(block, cfg.exit, EdgeKind::Taken);
                }
                Some(RunEnd::Branch {
                    targets,
                    conditional,
                    unresolved,
                }) => {
                    for t in targets.iter() {
                        cfg.add_edge(block, block_at[t], EdgeKind::Taken);
                    }
                    if *unresolved {
                        let u = *unknown.get_or_insert_with(|| {
                            let u = cfg.add_block(BlockKind::Unknown);
                            u
                        });
                        cfg.add_edge(block, u, EdgeKind::Taken);
                    }
                    if *conditional {
                        let continuation = block_at.get(&next).copied().unwrap_or(cfg.exit);
                        cfg.add_edge(block, continuation, EdgeKind::NotTaken);
                    }
                }
                None => {
                    // Plain fall-through into the next discovered block.
                    let continuation = block_at.get(&next).copied().unwrap_or(cfg.exit);
                    cfg.add_edge(block, continuation, EdgeKind::NotTaken);
                }
            }
        }
        if let Some(u) = unknown {
            cfg.add_edge(u, cfg.exit, EdgeKind::NotTaken);
        }
        Ok(cfg)
    }
}
