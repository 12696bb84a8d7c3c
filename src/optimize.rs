// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The peephole optimizer.
//!
//! Every rewrite must be a semantic no-op: when a precondition is unmet the
//! rewrite simply does not fire. Rewrites are applied to every pc in every
//! round until a whole round makes no change, and the program is then
//! compacted.

use std::collections::HashSet;

use log::debug;

use crate::ast::Rune;
use crate::inst::{InstPtr, Op, FOLD_CASE};
use crate::prog::Prog;

/// Runs the rewrite rounds to a fixed point, then compacts the program.
pub fn optimize(prog: &mut Prog) {
    let mut round = 0;
    loop {
        round += 1;
        let mut changes = 0usize;
        let len = prog.insts.len();
        for pc in 0..len {
            changes += opt_nop(prog, pc) as usize;
            changes += opt_delay_capture(prog, pc) as usize;
            changes += opt_delay_empty(prog, pc) as usize;
            changes += opt_canonical_order(prog, pc) as usize;
            changes += opt_alt_rune1(prog, pc) as usize;
            changes += opt_alt_rune(prog, pc) as usize;
            changes += opt_alt_split(prog, pc) as usize;
            changes += opt_loop_fuse(prog, pc) as usize;
            changes += opt_assoc(prog, pc) as usize;
            changes += opt_restructure(prog, pc) as usize;
        }
        if strip_start_nop(prog) {
            changes += 1;
        }
        debug!("optimizer round {}: {} changes", round, changes);
        if changes == 0 {
            break;
        }
    }
    prog.compact();
}

/// Follows a chain of no-ops and returns the first instruction that is not
/// one. `None` when the chain loops back on itself.
fn follow_nops(prog: &Prog, mut pc: InstPtr) -> Option<InstPtr> {
    let mut steps = 0;
    while prog[pc].op == Op::Nop {
        pc = prog[pc].out;
        steps += 1;
        if steps > prog.insts.len() {
            return None;
        }
    }
    Some(pc)
}

/// Rule 1: redirect successors through no-op instructions. No-op cycles are
/// left alone so the fixed point terminates.
fn opt_nop(prog: &mut Prog, pc: InstPtr) -> bool {
    let op = prog[pc].op;
    let mut changed = false;
    match op {
        Op::Fail | Op::Match | Op::Nop => return false,
        _ => {}
    }
    if matches!(op, Op::Alt | Op::AltMatch | Op::AltRune1 | Op::AltRune) {
        let t = prog[pc].arg;
        if prog[t].op == Op::Nop {
            if let Some(resolved) = follow_nops(prog, t) {
                prog[pc].arg = resolved;
                changed = true;
            }
        }
    }
    let t = prog[pc].out;
    if prog[t].op == Op::Nop {
        if let Some(resolved) = follow_nops(prog, t) {
            prog[pc].out = resolved;
            changed = true;
        }
    }
    changed
}

/// Rule 2: skip a no-op sitting at the program entry.
fn strip_start_nop(prog: &mut Prog) -> bool {
    if prog[prog.start].op == Op::Nop {
        if let Some(resolved) = follow_nops(prog, prog.start) {
            prog.start = resolved;
            return true;
        }
    }
    false
}

/// Rule 3: move a capture write behind the test that follows it, so failed
/// tests never pay for the bookkeeping. A capture delayed past a rune
/// records the position one rune back.
fn opt_delay_capture(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Capture {
        return false;
    }
    let out = prog[pc].out;
    let succ = prog[out].op;
    if succ.is_rune_op() {
        // The matching engine keeps one rune of look-back, so only a
        // zero-delta capture may cross a rune.
        if prog[pc].arg2 != 0 {
            return false;
        }
        let slot = prog[pc].arg;
        let rune_out = prog[out].out;
        let delayed = prog.add_inst(Op::Capture);
        prog[delayed].arg = slot;
        prog[delayed].arg2 = 1;
        prog[delayed].out = rune_out;

        let runes = prog[out].runes.clone();
        let the_rune = prog[out].the_rune;
        let arg = prog[out].arg;
        let inst = &mut prog[pc];
        inst.op = succ;
        inst.runes = runes;
        inst.the_rune = the_rune;
        inst.arg = arg;
        inst.arg2 = 0;
        inst.out = delayed;
        true
    } else if succ == Op::EmptyWidth {
        // Swapping with a zero-width test crosses no rune, so both deltas
        // are unchanged.
        let slot = prog[pc].arg;
        let cap_delta = prog[pc].arg2;
        let empty_out = prog[out].out;
        let delayed = prog.add_inst(Op::Capture);
        prog[delayed].arg = slot;
        prog[delayed].arg2 = cap_delta;
        prog[delayed].out = empty_out;

        let earg = prog[out].arg;
        let edelta = prog[out].arg2;
        let inst = &mut prog[pc];
        inst.op = Op::EmptyWidth;
        inst.arg = earg;
        inst.arg2 = edelta;
        inst.out = delayed;
        true
    } else {
        false
    }
}

/// Rule 10: move a zero-width test behind the rune test that follows it,
/// raising its delta so it still evaluates at the original position.
fn opt_delay_empty(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::EmptyWidth || prog[pc].arg2 != 0 {
        return false;
    }
    let out = prog[pc].out;
    let succ = prog[out].op;
    if !succ.is_rune_op() {
        return false;
    }
    let eflags = prog[pc].arg;
    let rune_out = prog[out].out;
    let delayed = prog.add_inst(Op::EmptyWidth);
    prog[delayed].arg = eflags;
    prog[delayed].arg2 = 1;
    prog[delayed].out = rune_out;

    let runes = prog[out].runes.clone();
    let the_rune = prog[out].the_rune;
    let arg = prog[out].arg;
    let inst = &mut prog[pc];
    inst.op = succ;
    inst.runes = runes;
    inst.the_rune = the_rune;
    inst.arg = arg;
    inst.arg2 = 0;
    inst.out = delayed;
    true
}

/// Rule 8: swap two single-rune arms into rune order. The arms are
/// mutually exclusive on their first character, so at any input position at
/// most one of them survives and their priority cannot be observed.
fn opt_canonical_order(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let o = prog[pc].out;
    let a = prog[pc].arg;
    if prog[o].op != Op::Rune1 || prog[a].op != Op::Rune1 {
        return false;
    }
    if prog[o].the_rune <= prog[a].the_rune {
        return false;
    }
    prog[pc].out = a;
    prog[pc].arg = o;
    true
}

/// Rule 4: fuse `Alt(Rune1(r), B)` into `AltRune1(r, B)` when `B` provably
/// cannot start by matching `r`.
fn opt_alt_rune1(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let aout = prog[pc].out;
    if prog[aout].op != Op::Rune1 {
        return false;
    }
    if !second_branch_avoids_rune(prog, prog[pc].arg, prog[aout].the_rune) {
        return false;
    }
    let runes = prog[aout].runes.clone();
    let the_rune = prog[aout].the_rune;
    let new_out = prog[aout].out;
    let inst = &mut prog[pc];
    inst.op = Op::AltRune1;
    inst.the_rune = the_rune;
    inst.runes = runes;
    inst.out = new_out;
    true
}

/// Rule 4, range form: fuse `Alt(Rune(ranges), B)` into
/// `AltRune(ranges, B)` when the ranges and `B`'s first runes are disjoint.
fn opt_alt_rune(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let aout = prog[pc].out;
    // A folded rune cannot be fused: AltRune stores its second successor
    // where the fold bit lives.
    if prog[aout].op != Op::Rune || prog[aout].arg & FOLD_CASE != 0 {
        return false;
    }
    if !second_branch_avoids_inst(prog, prog[pc].arg, aout) {
        return false;
    }
    let runes = prog[aout].runes.clone();
    let new_out = prog[aout].out;
    let inst = &mut prog[pc];
    inst.op = Op::AltRune;
    inst.runes = runes;
    inst.out = new_out;
    true
}

/// Rule 5: overlapping single-rune arms.
fn opt_alt_split(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let aout = prog[pc].out;
    let barg = prog[pc].arg;
    if prog[aout].op != Op::Rune1 {
        return false;
    }
    let r = prog[aout].the_rune;
    // Both arms test the same rune: hoist the test above the fork.
    if prog[barg].op == Op::Rune1 && prog[barg].the_rune == r {
        let a_cont = prog[aout].out;
        let b_cont = prog[barg].out;
        let fork = prog.add_inst(Op::Alt);
        prog[fork].out = a_cont;
        prog[fork].arg = b_cont;
        let inst = &mut prog[pc];
        inst.op = Op::Rune1;
        inst.the_rune = r;
        inst.runes = vec![r, r];
        inst.arg = 0;
        inst.out = fork;
        return true;
    }
    // The first arm cannot fail after its rune, so under leftmost-first
    // semantics taking it unconditionally loses nothing. Not valid in
    // longest mode, where the dropped arm could win with a longer match.
    if prog.longest {
        return false;
    }
    if !accepting_tail(prog, prog[aout].out) || !chain_walkable(prog, barg) {
        return false;
    }
    let runes = prog[aout].runes.clone();
    let new_out = prog[aout].out;
    let inst = &mut prog[pc];
    inst.op = Op::AltRune1;
    inst.the_rune = r;
    inst.runes = runes;
    inst.out = new_out;
    true
}

/// Rule 7: collapse a trailing single-rune loop,
/// `loop: Alt(RUNEx -> loop, tail -> Match)`, into a self-looping fused
/// dispatch. The tail stays reachable from every loop exit, so dropping its
/// per-position threads while the rune keeps matching loses no match.
fn opt_loop_fuse(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let aout = prog[pc].out;
    let fused_op = match prog[aout].op {
        Op::Rune1 => Op::AltRune1,
        Op::Rune if prog[aout].arg & FOLD_CASE == 0 => Op::AltRune,
        Op::RuneAny | Op::RuneAnyNotNl => Op::AltRune,
        _ => return false,
    };
    if prog[aout].out != pc {
        return false;
    }
    if !accepting_tail(prog, prog[pc].arg) {
        return false;
    }
    let runes = prog[aout].runes.clone();
    let the_rune = prog[aout].the_rune;
    let inst = &mut prog[pc];
    inst.op = fused_op;
    inst.runes = runes;
    inst.the_rune = the_rune;
    inst.out = pc;
    true
}

/// Rule 9: right-rotate nested alternations, `Alt(Alt(X, Y), Z)` into
/// `Alt(X, Alt(Y, Z))`, applied inside out so the rotation terminates.
///
/// Restricted to acyclic alternation regions: when `Y` reaches the rotated
/// fork again through zero-width edges (a repetition loop), rotating would
/// manufacture a fresh fork every round and never reach the fixed point.
fn opt_assoc(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let p = prog[pc].out;
    if prog[p].op != Op::Alt {
        return false;
    }
    let x = prog[p].out;
    if prog[x].op == Op::Alt {
        return false;
    }
    let y = prog[p].arg;
    let z = prog[pc].arg;
    if reaches(prog, y, pc) {
        return false;
    }
    let n = prog.add_inst(Op::Alt);
    prog[n].out = y;
    prog[n].arg = z;
    prog[pc].out = x;
    prog[pc].arg = n;
    true
}

/// Whether `target` is reachable from `from` over zero-width edges.
fn reaches(prog: &Prog, from: InstPtr, target: InstPtr) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(pc) = stack.pop() {
        if pc == target {
            return true;
        }
        if !seen.insert(pc) {
            continue;
        }
        let inst = &prog[pc];
        match inst.op {
            Op::Alt | Op::AltMatch => {
                stack.push(inst.out);
                stack.push(inst.arg);
            }
            Op::Nop | Op::Capture | Op::EmptyWidth => stack.push(inst.out),
            _ => {}
        }
    }
    false
}

/// Rule 6: bubble a fused rune alternation outward,
/// `Alt(AltRune1(r, X), Y)` into `AltRune1(r, Alt(X, Y))`, which lets later
/// rounds fuse the inner alternation into the chain. Sound only when `Y`
/// provably cannot start by matching `r`: once the fused rune matches, `Y`
/// is no longer explored.
fn opt_restructure(prog: &mut Prog, pc: InstPtr) -> bool {
    if prog[pc].op != Op::Alt {
        return false;
    }
    let h = prog[pc].out;
    let hop = prog[h].op;
    let ok = match hop {
        Op::AltRune1 => second_branch_avoids_rune(prog, prog[pc].arg, prog[h].the_rune),
        Op::AltRune => second_branch_avoids_inst(prog, prog[pc].arg, h),
        _ => return false,
    };
    if !ok {
        return false;
    }
    let y = prog[pc].arg;
    let x = prog[h].arg;
    let n = prog.add_inst(Op::Alt);
    prog[n].out = x;
    prog[n].arg = y;

    let runes = prog[h].runes.clone();
    let the_rune = prog[h].the_rune;
    let hout = prog[h].out;
    let inst = &mut prog[pc];
    inst.op = hop;
    inst.runes = runes;
    inst.the_rune = the_rune;
    inst.out = hout;
    inst.arg = n;
    true
}

// --- The must-not-overlap oracle ---
//
// Walks from a candidate second branch through the instructions the
// matching engine's chain dispatch understands, and decides whether the
// branch could consume the first arm's rune as its first character. Any
// unrecognized instruction forces a conservative "no".

fn second_branch_avoids_rune(prog: &Prog, mut pc: InstPtr, rune: Rune) -> bool {
    for _ in 0..prog.insts.len() {
        let inst = &prog[pc];
        match inst.op {
            Op::AltRune1 => {
                if rune == inst.the_rune {
                    return false;
                }
                pc = inst.arg;
            }
            Op::AltRune => {
                if inst.matches_rune(rune) {
                    return false;
                }
                pc = inst.arg;
            }
            Op::Rune => return !inst.matches_rune(rune),
            Op::Rune1 => return rune != inst.the_rune,
            Op::RuneAny => return false,
            Op::RuneAnyNotNl => return rune == '\n' as Rune,
            Op::Capture if inst.arg2 == 0 => pc = inst.out,
            _ => return false,
        }
    }
    false
}

fn second_branch_avoids_inst(prog: &Prog, mut pc: InstPtr, a: InstPtr) -> bool {
    for _ in 0..prog.insts.len() {
        let inst = &prog[pc];
        match inst.op {
            Op::AltRune1 => {
                if prog[a].matches_rune(inst.the_rune) {
                    return false;
                }
                pc = inst.arg;
            }
            Op::AltRune => {
                if runes_overlap(prog, pc, a) {
                    return false;
                }
                pc = inst.arg;
            }
            Op::Rune => return !runes_overlap(prog, pc, a),
            Op::Rune1 => return !prog[a].matches_rune(inst.the_rune),
            Op::RuneAny | Op::RuneAnyNotNl => return false,
            Op::Capture if inst.arg2 == 0 => pc = inst.out,
            _ => return false,
        }
    }
    false
}

/// Whether two rune instructions can match a common rune. A non-empty
/// intersection of sorted inclusive ranges always contains an endpoint of
/// one side, so testing the endpoints both ways is exact.
fn runes_overlap(prog: &Prog, b: InstPtr, a: InstPtr) -> bool {
    for &r in &prog[a].runes {
        if prog[b].matches_rune(r) {
            return true;
        }
    }
    for &r in &prog[b].runes {
        if prog[a].matches_rune(r) {
            return true;
        }
    }
    false
}

/// Whether every path from `pc` reaches `Match` through bookkeeping only.
/// The instructions on the way must also be safe for the chain dispatch,
/// which rules out delayed captures.
fn accepting_tail(prog: &Prog, mut pc: InstPtr) -> bool {
    for _ in 0..prog.insts.len() {
        let inst = &prog[pc];
        match inst.op {
            Op::Match => return true,
            Op::Nop => pc = inst.out,
            Op::Capture if inst.arg2 == 0 => pc = inst.out,
            _ => return false,
        }
    }
    false
}

/// Whether the matching engine's chain dispatch can walk every epsilon path
/// from `pc`. Conservatively rejects shared or cyclic structure.
fn chain_walkable(prog: &Prog, entry: InstPtr) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![entry];
    while let Some(pc) = stack.pop() {
        if !seen.insert(pc) {
            return false;
        }
        let inst = &prog[pc];
        match inst.op {
            Op::Fail | Op::Match => {}
            Op::Rune | Op::Rune1 | Op::RuneAny | Op::RuneAnyNotNl => {}
            Op::Capture | Op::EmptyWidth => {
                if inst.arg2 != 0 {
                    return false;
                }
                stack.push(inst.out);
            }
            Op::Nop => stack.push(inst.out),
            Op::Alt | Op::AltMatch => {
                stack.push(inst.out);
                stack.push(inst.arg);
            }
            Op::AltRune1 | Op::AltRune => stack.push(inst.arg),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::compile::compile;
    use crate::inst::Op;

    fn rune1(prog: &mut Prog, r: char) -> InstPtr {
        let pc = prog.add_inst(Op::Rune1);
        prog[pc].the_rune = r as Rune;
        prog[pc].runes = vec![r as Rune, r as Rune];
        pc
    }

    #[test]
    fn nop_chains_are_skipped() {
        let mut prog = Prog::new();
        let a = rune1(&mut prog, 'a');
        let n1 = prog.add_inst(Op::Nop);
        let n2 = prog.add_inst(Op::Nop);
        let m = prog.add_inst(Op::Match);
        prog[a].out = n1;
        prog[n1].out = n2;
        prog[n2].out = m;
        prog.start = a;

        optimize(&mut prog);
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::Rune1);
        assert_eq!(prog[first.out].op, Op::Match);
        // The nops are unreachable after the rewrite and compacted away.
        assert_eq!(prog.insts.len(), 3);
    }

    #[test]
    fn disjoint_alternation_fuses() {
        let expr = Expr::alternate(vec![Expr::literal("ab"), Expr::literal("cd")]);
        let prog = compile(&expr).unwrap();
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::AltRune1);
        assert_eq!(first.the_rune, 'a' as Rune);
        assert_eq!(prog[first.arg].op, Op::Rune1);
        assert_eq!(prog[first.arg].the_rune, 'c' as Rune);
    }

    #[test]
    fn branches_swap_into_rune_order() {
        let expr = Expr::alternate(vec![Expr::literal("ba"), Expr::literal("ab")]);
        let prog = compile(&expr).unwrap();
        let first = &prog[prog.start];
        // After canonicalization the 'a' arm is tested first.
        assert_eq!(first.op, Op::AltRune1);
        assert_eq!(first.the_rune, 'a' as Rune);
    }

    #[test]
    fn greedy_trailing_loop_fuses() {
        let expr = Expr::star(Expr::literal("a"), false);
        let prog = compile(&expr).unwrap();
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::AltRune1);
        assert_eq!(first.the_rune, 'a' as Rune);
        // The loop dispatches back to itself and exits to Match.
        assert_eq!(first.out, prog.start);
        assert_eq!(prog[first.arg].op, Op::Match);
    }

    #[test]
    fn nongreedy_loop_does_not_fuse() {
        let expr = Expr::star(Expr::literal("a"), true);
        let prog = compile(&expr).unwrap();
        // The preferred branch is the exit, so the loop shape stays a
        // plain Alt.
        assert_eq!(prog[prog.start].op, Op::Alt);
    }

    #[test]
    fn capture_is_delayed_past_its_rune() {
        let expr = Expr::capture(1, Expr::literal("a"));
        let prog = compile(&expr).unwrap();
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::Rune1);
        let second = &prog[first.out];
        assert_eq!(second.op, Op::Capture);
        assert_eq!(second.arg, 2);
        assert_eq!(second.arg2, 1);
    }

    #[test]
    fn anchor_is_delayed_past_its_rune() {
        let expr = Expr::concat(vec![Expr::BeginText, Expr::literal("a")]);
        let prog = compile(&expr).unwrap();
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::Rune1);
        let second = &prog[first.out];
        assert_eq!(second.op, Op::EmptyWidth);
        assert_eq!(second.arg2, 1);
    }

    #[test]
    fn restructure_reports_its_change() {
        // Alt(AltRune1('a', X), Rune1('c')) must restructure and say so.
        let mut prog = Prog::new();
        let x = rune1(&mut prog, 'b');
        let h = prog.add_inst(Op::AltRune1);
        prog[h].the_rune = 'a' as Rune;
        prog[h].runes = vec!['a' as Rune, 'a' as Rune];
        let y = rune1(&mut prog, 'c');
        let m = prog.add_inst(Op::Match);
        let a_out = rune1(&mut prog, 'z');
        prog[a_out].out = m;
        prog[h].out = a_out;
        prog[h].arg = x;
        prog[x].out = m;
        prog[y].out = m;
        let outer = prog.add_inst(Op::Alt);
        prog[outer].out = h;
        prog[outer].arg = y;
        prog.start = outer;

        assert!(opt_restructure(&mut prog, outer));
        assert_eq!(prog[outer].op, Op::AltRune1);
        assert_eq!(prog[outer].the_rune, 'a' as Rune);
        let inner = prog[outer].arg;
        assert_eq!(prog[inner].op, Op::Alt);
        assert_eq!(prog[inner].out, x);
        assert_eq!(prog[inner].arg, y);
    }

    #[test]
    fn optimize_is_idempotent() {
        let exprs = vec![
            Expr::alternate(vec![Expr::literal("ab"), Expr::literal("cd")]),
            Expr::concat(vec![
                Expr::capture(1, Expr::literal("x")),
                Expr::star(Expr::AnyCharNotNl, false),
            ]),
            Expr::alternate(vec![
                Expr::literal("a"),
                Expr::literal("b"),
                Expr::literal("c"),
            ]),
        ];
        for expr in &exprs {
            let prog = compile(expr).unwrap();
            let mut again = prog.clone();
            optimize(&mut again);
            assert_eq!(prog.insts, again.insts, "not idempotent for {:?}", expr);
            assert_eq!(prog.start, again.start);
        }
    }
}
