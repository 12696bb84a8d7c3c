// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Precomputes, for every pc, the list of instructions that scheduling the
//! pc must enqueue: the leaves reachable through zero-width forks and
//! no-ops.
//!
//! Plain forks are inlined so the matching engine skips their bookkeeping
//! entirely. A fork is postponed to runtime instead when it sits on a
//! zero-progress cycle or has more than one way in; this bounds the size of
//! every list and keeps the expansion free of duplicates. Postponed forks
//! show up as items in the list and the engine expands them through their
//! own lists behind a visited guard.

use crate::inst::{Inst, InstPtr, Op};
use crate::prog::Prog;

/// Computes `prog.add_list`.
pub fn compute_add_lists(prog: &mut Prog) {
    let n = prog.insts.len();
    let (from_non_alts, from_alts) = in_degrees(prog);
    let in_loop = empty_loops(prog);

    let mut visited = vec![usize::MAX; n];
    let mut lists = Vec::with_capacity(n);
    for pc in 0..n {
        lists.push(compute_one(prog, pc, &from_non_alts, &from_alts, &in_loop, &mut visited));
    }
    prog.add_list = lists;
}

/// The epsilon successors of an instruction: the edges the closure follows
/// without consuming input.
fn eps_succs(inst: &Inst) -> [Option<InstPtr>; 2] {
    match inst.op {
        Op::Alt | Op::AltMatch => [Some(inst.out), Some(inst.arg)],
        Op::Nop | Op::Capture | Op::EmptyWidth => [Some(inst.out), None],
        _ => [None, None],
    }
}

/// Counts, for every instruction, how many predecessors reach it from a
/// fork and how many from anything else. The fused `AltRune` instructions
/// count through `out` only: their `arg` chain is walked in place by the
/// engine's dispatch and never schedules its target directly.
fn in_degrees(prog: &Prog) -> (Vec<usize>, Vec<usize>) {
    let n = prog.insts.len();
    let mut from_non_alts = vec![0usize; n];
    let mut from_alts = vec![0usize; n];
    from_non_alts[prog.start] += 1;
    for pc in 0..n {
        let inst = &prog[pc];
        match inst.op {
            Op::Alt | Op::AltMatch => {
                from_alts[inst.out] += 1;
                from_alts[inst.arg] += 1;
            }
            Op::Fail | Op::Match => {}
            _ => from_non_alts[inst.out] += 1,
        }
    }
    (from_non_alts, from_alts)
}

/// Marks every instruction that lies on a cycle of zero-progress edges.
///
/// Tarjan's strongly connected components over the epsilon graph, with an
/// explicit frame stack so deep programs cannot overflow the host stack.
/// An instruction is on a zero-progress cycle when its component has more
/// than one member, or when it is its own epsilon successor.
fn empty_loops(prog: &Prog) -> Vec<bool> {
    let n = prog.insts.len();
    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut scc_stack: Vec<InstPtr> = Vec::new();
    let mut in_loop = vec![false; n];
    let mut next_index = 0usize;

    let mut frames: Vec<(InstPtr, usize)> = Vec::new();
    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        on_stack[root] = true;
        scc_stack.push(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (pc, child) = *frame;
            let succs = eps_succs(&prog[pc]);
            if child < 2 {
                frame.1 += 1;
                if let Some(s) = succs[child] {
                    if index[s] == UNVISITED {
                        index[s] = next_index;
                        lowlink[s] = next_index;
                        next_index += 1;
                        on_stack[s] = true;
                        scc_stack.push(s);
                        frames.push((s, 0));
                    } else if on_stack[s] {
                        lowlink[pc] = lowlink[pc].min(index[s]);
                    }
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[pc]);
                }
                if lowlink[pc] == index[pc] {
                    let mut members = Vec::new();
                    loop {
                        let w = scc_stack.pop().unwrap();
                        on_stack[w] = false;
                        members.push(w);
                        if w == pc {
                            break;
                        }
                    }
                    if members.len() > 1 {
                        for w in members {
                            in_loop[w] = true;
                        }
                    } else {
                        let w = members[0];
                        let s = eps_succs(&prog[w]);
                        if s[0] == Some(w) || s[1] == Some(w) {
                            in_loop[w] = true;
                        }
                    }
                }
            }
        }
    }
    in_loop
}

/// Computes the add-list for a single root.
///
/// The root itself is always inlined: postponing a root into its own list
/// would leave the runtime expansion nothing to make progress with. The
/// per-root `visited` stamp keeps every list duplicate free.
fn compute_one(
    prog: &Prog,
    root: InstPtr,
    from_non_alts: &[usize],
    from_alts: &[usize],
    in_loop: &[bool],
    visited: &mut [usize],
) -> Vec<InstPtr> {
    let mut acc = Vec::new();
    let mut stack = vec![root];
    while let Some(pc) = stack.pop() {
        if visited[pc] == root {
            continue;
        }
        visited[pc] = root;
        let inst = &prog[pc];
        match inst.op {
            Op::Fail => {}
            Op::Alt | Op::AltMatch => {
                let in_degree = from_non_alts[pc] + from_alts[pc];
                if pc == root || (!in_loop[pc] && in_degree < 2) {
                    stack.push(inst.arg); // expanded last
                    stack.push(inst.out); // expanded first
                } else {
                    // Postponed to runtime.
                    acc.push(pc);
                }
            }
            Op::Nop => stack.push(inst.out),
            // Everything else is a leaf the engine acts on directly:
            // captures and zero-width tests need the input position, the
            // rest are scheduled as threads.
            _ => acc.push(pc),
        }
    }
    acc
}
