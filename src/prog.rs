// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The compiled program: a flat instruction array with the patch-list
//! helpers used during construction and the compaction pass that runs
//! after optimization.

use std::fmt;
use std::ops::{Deref, Index, IndexMut};

use crate::ast::Rune;
use crate::inst::{EmptyFlags, Inst, InstPtr, Op, EMPTY_ALL, FOLD_CASE};

/// A compiled regular expression program.
///
/// A program is built by the compiler, rewritten by the optimizer and then
/// frozen: the matching engine only ever reads it, so one program can be
/// shared by any number of concurrent matches.
#[derive(Clone)]
pub struct Prog {
    /// The instructions. `insts[0]` is always `Fail`.
    pub insts: Vec<Inst>,
    /// The pc of the first instruction to execute.
    pub start: InstPtr,
    /// The number of capture slots used by the program. Two slots per
    /// group, and at least two for the implicit whole-match group.
    pub num_cap: usize,
    /// One more than the largest thread id handed out; the width of the
    /// sparse queues in the matching engine.
    pub max_thread_num: usize,
    /// For every pc, the precomputed list of pcs that scheduling `pc`
    /// ultimately enqueues. See the `closure` module.
    pub add_list: Vec<Vec<InstPtr>>,
    /// When true, the matching engine reports the leftmost-longest match
    /// instead of the leftmost-first one.
    pub longest: bool,
}

impl Prog {
    /// Creates an empty program holding only the `Fail` instruction.
    pub fn new() -> Prog {
        let mut prog = Prog {
            insts: Vec::new(),
            start: 0,
            num_cap: 2,
            max_thread_num: 0,
            add_list: Vec::new(),
            longest: false,
        };
        prog.add_inst(Op::Fail);
        prog
    }

    /// Appends a new instruction with opcode `op` and returns its pc.
    pub fn add_inst(&mut self, op: Op) -> InstPtr {
        self.insts.push(Inst::new(op));
        self.insts.len() - 1
    }

    /// Follows no-op and capturing instructions starting at `pc` and
    /// returns the first pc that is neither.
    pub fn skip_nop(&self, mut pc: InstPtr) -> InstPtr {
        loop {
            match self.insts[pc].op {
                Op::Nop | Op::Capture => pc = self.insts[pc].out,
                _ => return pc,
            }
        }
    }

    /// Returns true if an execution engine at `pc` will always lead to a
    /// match.
    pub fn leads_to_match(&self, pc: InstPtr) -> bool {
        self.insts[self.skip_nop(pc)].op == Op::Match
    }

    /// Returns the literal string every match must start with, and whether
    /// that prefix is the entire match.
    pub fn prefix(&self) -> (String, bool) {
        let mut prefix = String::new();
        let mut pc = self.skip_nop(self.start);
        while self.insts[pc].op == Op::Rune1 {
            let inst = &self.insts[pc];
            match std::char::from_u32(inst.the_rune as u32) {
                Some(c) => prefix.push(c),
                None => return (prefix, false),
            }
            pc = self.skip_nop(inst.out);
        }
        (prefix, self.insts[pc].op == Op::Match)
    }

    /// Returns the zero-width conditions that must hold at the start of
    /// any match. `EMPTY_ALL` means no match is possible at all.
    pub fn start_cond(&self) -> EmptyFlags {
        let mut flag = EmptyFlags::empty();
        let mut pc = self.start;
        loop {
            let inst = &self.insts[pc];
            match inst.op {
                Op::EmptyWidth => {
                    if inst.arg2 == 0 {
                        flag |= inst.empty_flags();
                    }
                }
                Op::Fail => return EMPTY_ALL,
                Op::Capture | Op::Nop => {}
                _ => return flag,
            }
            pc = inst.out;
        }
    }

    // --- Patch list ---
    //
    // A patch list is a list of instruction pointers that still need to be
    // filled in. Because those pointers are not filled in yet, their storage
    // doubles as the list links. A value `l` denotes `insts[l >> 1].out`
    // when `l & 1 == 0` and `insts[l >> 1].arg` otherwise; `l == 0` is the
    // empty list, which is unambiguous because every program starts with a
    // `Fail` instruction whose links are never patched.
    // See http://swtch.com/~rsc/regexp/regexp1.html.

    /// Reads the link stored in patch list slot `l`.
    pub fn next(&self, l: usize) -> usize {
        let inst = &self.insts[l >> 1];
        if l & 1 == 0 {
            inst.out
        } else {
            inst.arg
        }
    }

    /// Writes `val` into every slot on the patch list `l`.
    pub fn patch(&mut self, mut l: usize, val: InstPtr) {
        while l != 0 {
            let inst = &mut self.insts[l >> 1];
            if l & 1 == 0 {
                l = inst.out;
                inst.out = val;
            } else {
                l = inst.arg;
                inst.arg = val;
            }
        }
    }

    /// Concatenates two patch lists.
    pub fn append(&mut self, l1: usize, l2: usize) -> usize {
        if l1 == 0 {
            return l2;
        }
        if l2 == 0 {
            return l1;
        }
        let mut last = l1;
        loop {
            let next = self.next(last);
            if next == 0 {
                break;
            }
            last = next;
        }
        let inst = &mut self.insts[last >> 1];
        if last & 1 == 0 {
            inst.out = l2;
        } else {
            inst.arg = l2;
        }
        l1
    }

    // --- Compaction ---

    /// Removes every instruction that is not reachable from `start` and
    /// renumbers the rest in depth-first visit order.
    pub fn compact(&mut self) {
        let (mapping, new_len) = self.compute_compaction();

        let old = std::mem::take(&mut self.insts);
        let mut new_insts = vec![Inst::new(Op::Fail); new_len];
        for (pc, inst) in old.into_iter().enumerate() {
            if let Some(new_pc) = mapping[pc] {
                new_insts[new_pc] = inst;
            }
        }
        self.insts = new_insts;
        self.start = mapping[self.start].unwrap();

        for inst in &mut self.insts {
            match inst.op {
                Op::Fail | Op::Match => {}
                Op::Alt | Op::AltMatch | Op::AltRune1 | Op::AltRune => {
                    inst.arg = mapping[inst.arg].unwrap();
                    inst.out = mapping[inst.out].unwrap();
                }
                _ => {
                    inst.out = mapping[inst.out].unwrap();
                }
            }
        }
    }

    fn compute_compaction(&self) -> (Vec<Option<InstPtr>>, usize) {
        let mut mapping: Vec<Option<InstPtr>> = vec![None; self.insts.len()];
        let mut next_label = 0;
        let mut stack = Vec::with_capacity(self.insts.len());
        stack.push(self.start);
        // Popped first, so `Fail` keeps its position as instruction 0.
        stack.push(0);

        while let Some(pc) = stack.pop() {
            if mapping[pc].is_some() {
                continue;
            }
            mapping[pc] = Some(next_label);
            next_label += 1;

            let inst = &self.insts[pc];
            match inst.op {
                Op::Alt | Op::AltMatch | Op::AltRune1 | Op::AltRune => {
                    stack.push(inst.arg); // visited last
                    stack.push(inst.out); // visited first
                }
                Op::Fail | Op::Match => {}
                // At the optimizer's fixed point no reachable instruction
                // points at a Nop, so not following its successor cannot
                // lose instructions and keeps nop-nop loops from hindering
                // termination.
                Op::Nop => {}
                _ => stack.push(inst.out),
            }
        }
        (mapping, next_label)
    }

    // --- Validation ---

    /// Checks the structural invariants of a finished program. A violation
    /// is a bug in the compiler or optimizer, not bad user input, so this
    /// panics.
    pub fn verify(&self) {
        let len = self.insts.len();
        assert!(len > 0 && self.insts[0].op == Op::Fail, "pc 0 must be Fail");
        assert!(self.start < len, "start out of range");
        for (pc, inst) in self.insts.iter().enumerate() {
            match inst.op {
                Op::Fail | Op::Match => {}
                Op::Alt | Op::AltMatch | Op::AltRune1 | Op::AltRune => {
                    assert!(inst.out < len, "pc {}: out out of range", pc);
                    assert!(inst.arg < len, "pc {}: arg out of range", pc);
                }
                _ => assert!(inst.out < len, "pc {}: out out of range", pc),
            }
            match inst.op {
                Op::Rune | Op::AltRune | Op::Rune1 | Op::AltRune1 => {
                    assert!(inst.runes.len() % 2 == 0, "pc {}: odd rune ranges", pc);
                    let mut prev: Option<Rune> = None;
                    for pair in inst.runes.chunks(2) {
                        assert!(pair[0] <= pair[1], "pc {}: inverted range", pc);
                        if inst.arg & FOLD_CASE == 0 {
                            if let Some(p) = prev {
                                assert!(p < pair[0], "pc {}: unsorted ranges", pc);
                            }
                        }
                        prev = Some(pair[1]);
                    }
                    if inst.op == Op::Rune1 || inst.op == Op::AltRune1 {
                        assert!(
                            inst.runes.len() == 2
                                && inst.runes[0] == inst.the_rune
                                && inst.runes[1] == inst.the_rune,
                            "pc {}: malformed single-rune instruction",
                            pc
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

impl Deref for Prog {
    type Target = [Inst];

    fn deref(&self) -> &Self::Target {
        &*self.insts
    }
}

impl Index<InstPtr> for Prog {
    type Output = Inst;

    fn index(&self, pc: InstPtr) -> &Inst {
        &self.insts[pc]
    }
}

impl IndexMut<InstPtr> for Prog {
    fn index_mut(&mut self, pc: InstPtr) -> &mut Inst {
        &mut self.insts[pc]
    }
}

impl fmt::Debug for Prog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--------------------------------")?;
        for (pc, inst) in self.insts.iter().enumerate() {
            let star = if pc == self.start { "*" } else { " " };
            writeln!(f, "{:04}{} {}", pc, star, inst)?;
        }
        writeln!(f, "--------------------------------")?;
        Ok(())
    }
}
