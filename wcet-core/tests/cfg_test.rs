//! CFG construction and transformation through real programs.

#[path = "utils.rs"]
mod utils;

use utils::*;
use wcet_core::cfg::{builder, loop_info, transform};
use wcet_core::prog::flowfact::FlowFacts;
use wcet_core::prog::Address;

fn entries() -> Vec<(String, Address)> {
    vec![("main".to_string(), Address::abs(0x100))]
}

#[test]
fn test_nested_call_chain_discovery() {
    // main -> f -> g, with g also called from main.
    let mut p = TableProvider::new();
    p.push(call(0x100, 0x200)); // main calls f
    p.push(call(0x104, 0x300)); // main calls g
    p.push(ret(0x108));
    p.push(call(0x200, 0x300)); // f calls g
    p.push(ret(0x204));
    p.push(ret(0x300)); // g
    let coll = builder::build_collection(&p, &FlowFacts::new(), &entries()).unwrap();
    assert_eq!(coll.count(), 3);
    // Discovery order: main, f, g.
    assert_eq!(coll.get(0).label, "main");
    assert_eq!(coll.get(1).address, Address::abs(0x200));
    assert_eq!(coll.get(2).address, Address::abs(0x300));
    // g has two call sites.
    assert_eq!(coll.get(2).callers.len(), 2);
}

#[test]
fn test_collection_flat_indices_are_unique() {
    let mut p = TableProvider::new();
    p.push(call(0x100, 0x200));
    p.push(ret(0x104));
    p.push(ret(0x200));
    let coll = builder::build_collection(&p, &FlowFacts::new(), &entries()).unwrap();
    let mut seen = std::collections::HashSet::new();
    for cfg in coll.iter() {
        for block in cfg.blocks.iter() {
            assert!(seen.insert(coll.flat_index(cfg.id, block.id)));
        }
    }
    assert_eq!(seen.len(), coll.total_blocks as usize);
}

#[test]
fn test_normalized_program_satisfies_invariants() {
    // A diamond with a loop, fully connected: normalization is identity up
    // to renumbering, and every block stays doubly reachable.
    let mut p = TableProvider::new();
    p.push(cond_branch(0x100, 0x110));
    p.push(branch(0x104, 0x100)); // loop back on not-taken path
    p.push(ret(0x110));
    let coll = builder::build_collection(&p, &FlowFacts::new(), &entries()).unwrap();
    let cfg = coll.entry_cfg();
    let norm = transform::normalize(cfg, false).unwrap();
    assert_eq!(norm.count(), cfg.count());
    let info = loop_info::analyze(&norm);
    assert!(!info.is_irreducible());
}

#[test]
fn test_virtualize_then_unroll() {
    // A called function inside a loop, virtualized and then unrolled.
    let mut p = TableProvider::new();
    p.push(cond_branch(0x100, 0x120)); // H
    p.push(call(0x104, 0x200)); // B calls f
    p.push(branch(0x108, 0x100)); // back edge
    p.push(ret(0x120)); // X
    p.push(plain(0x200));
    p.push(ret(0x204));
    let coll = builder::build_collection(&p, &FlowFacts::new(), &entries()).unwrap();
    let virt = transform::virtualize(&coll).unwrap();
    assert_eq!(virt.count(), 1);
    let cfg = virt.entry_cfg();
    let info = loop_info::analyze(cfg);
    let headers: Vec<u32> = (0..cfg.count() as u32)
        .filter(|&b| info.is_header(b))
        .collect();
    assert_eq!(headers.len(), 1);

    let unrolled = transform::unroll_first_iteration(cfg).unwrap();
    // The whole loop body (header, call block, inlined callee, back block)
    // is duplicated once.
    assert!(unrolled.count() > cfg.count());
    let info2 = loop_info::analyze(&unrolled);
    let headers2: Vec<u32> = (0..unrolled.count() as u32)
        .filter(|&b| info2.is_header(b))
        .collect();
    assert_eq!(headers2.len(), 1);
    // The steady-state header keeps the original header's origin.
    assert_eq!(
        unrolled.blocks[headers2[0] as usize].origin,
        cfg.blocks[headers[0] as usize].origin.or(Some((0, headers[0])))
    );
}

#[test]
fn test_unreachable_code_is_dropped() {
    // 0x10c is never reached (the block before it returns).
    let mut p = TableProvider::new();
    p.push(plain(0x100));
    p.push(ret(0x104));
    p.push(plain(0x10c));
    let coll = builder::build_collection(&p, &FlowFacts::new(), &entries()).unwrap();
    // The builder never scans 0x10c at all.
    let cfg = coll.entry_cfg();
    assert!(cfg
        .blocks
        .iter()
        .all(|b| b.address() != Some(Address::abs(0x10c))));
}
