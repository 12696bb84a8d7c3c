// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Thread-id assignment.
//!
//! The matching engine's sparse queues are indexed by thread id rather than
//! by pc, so instructions may share an id as long as no input position can
//! have both live at once. Two instructions whose only predecessors are
//! single-rune tests on distinct runes are exactly that: whichever rune the
//! input holds, at most one of them gets scheduled. Sharing ids shrinks the
//! queues in proportion to how the program's runes partition it.

use std::collections::HashSet;

use crate::ast::Rune;
use crate::inst::{InstPtr, Op};
use crate::prog::Prog;

/// Assigns `tid` to every instruction and sets `prog.max_thread_num`.
pub fn assign(prog: &mut Prog) {
    let n = prog.insts.len();

    // Step 1: count predecessors, remembering one predecessor per
    // instruction. Entering the program counts as a predecessor that is
    // not a rune test, so the start instruction never shares.
    let mut pred_count = vec![0usize; n];
    let mut a_pred: Vec<Option<InstPtr>> = vec![None; n];
    pred_count[prog.start] += 1;

    for pc in 0..n {
        let inst = &prog[pc];
        match inst.op {
            Op::Alt | Op::AltMatch => {
                pred_count[inst.out] += 1;
                pred_count[inst.arg] += 1;
                a_pred[inst.out] = Some(pc);
                a_pred[inst.arg] = Some(pc);
            }
            Op::Fail | Op::Match => {}
            _ => {
                pred_count[inst.out] += 1;
                a_pred[inst.out] = Some(pc);
            }
        }
    }

    // Step 2: assign ids in pc order. A "reusable" id is held open along
    // with the set of runes already guarding it; an instruction whose sole
    // predecessor is a Rune1 on a rune outside that set may join it.
    let mut next_tid = 0usize;
    let mut reusable: Option<usize> = None;
    let mut runes_for_last: HashSet<Rune> = HashSet::new();

    for pc in 0..n {
        let tid = match prog[pc].op {
            // Never scheduled.
            Op::Alt | Op::AltMatch | Op::Fail | Op::Nop => None,
            _ => {
                if pred_count[pc] > 1 {
                    // Can't share.
                    let tid = next_tid;
                    next_tid += 1;
                    Some(tid)
                } else {
                    match a_pred[pc] {
                        Some(pred) if prog[pred].op == Op::Rune1 => {
                            let rune = prog[pred].the_rune;
                            match reusable {
                                Some(tid) if !runes_for_last.contains(&rune) => {
                                    runes_for_last.insert(rune);
                                    Some(tid)
                                }
                                _ => {
                                    // Can't share with the current holder;
                                    // perhaps with future instructions.
                                    let tid = next_tid;
                                    next_tid += 1;
                                    reusable = Some(tid);
                                    runes_for_last.clear();
                                    runes_for_last.insert(rune);
                                    Some(tid)
                                }
                            }
                        }
                        _ => {
                            // Entered from the start of the program or from
                            // something that is not a single-rune test
                            // (forks, zero-width tests, classes).
                            let tid = next_tid;
                            next_tid += 1;
                            Some(tid)
                        }
                    }
                }
            }
        };
        prog[pc].tid = tid;
    }
    prog.max_thread_num = next_tid;
}
