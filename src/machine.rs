// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The NFA simulation engine.
//!
//! Two sparse queues of threads, indexed by thread id, are stepped over the
//! input one rune at a time. Threads are visited in insertion order, which
//! is priority order; leftmost-first semantics fall out of that order plus
//! freeing lower-priority threads once a match fires. Enqueueing walks the
//! precomputed add-lists instead of the raw epsilon edges.

use std::mem;

use crate::ast::Rune;
use crate::inst::{EmptyFlags, InstPtr, Op, EMPTY_ALL};
use crate::input::{empty_op_context, MachineInput};
use crate::prog::Prog;

/// How a match is anchored to the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// The match may start anywhere.
    Unanchored,
    /// The match must start at the beginning of the input.
    AnchorStart,
    /// The match must span the whole input.
    AnchorBoth,
}

/// A capture slot: the input position recorded for one end of a group, or
/// `None` when the group did not participate in the match.
pub type Slot = Option<usize>;

/// A live NFA thread: an instruction and its capture vector.
#[derive(Debug)]
struct Thread {
    pc: InstPtr,
    cap: Vec<Slot>,
}

/// One sparse-queue entry. Entries for captures and zero-width tests carry
/// no thread; they exist only to suppress duplicate work within a position.
#[derive(Debug, Default)]
struct Entry {
    pc: InstPtr,
    t: Option<Box<Thread>>,
}

/// A sparse array of pending threads, keyed by thread id. See
/// research.swtch.com/sparse for the trick; clearing is O(1).
#[derive(Debug, Default)]
struct Queue {
    sparse: Vec<usize>,
    dense: Vec<Entry>,
    size: usize,
}

impl Queue {
    fn new(n: usize) -> Queue {
        let mut dense = Vec::with_capacity(n);
        dense.resize_with(n, Entry::default);
        Queue { sparse: vec![0; n], dense, size: 0 }
    }

    fn contains(&self, pc: InstPtr, tid: usize) -> bool {
        let j = self.sparse[tid];
        j < self.size && self.dense[j].pc == pc
    }

    fn add(&mut self, pc: InstPtr, tid: usize) -> usize {
        let j = self.size;
        // Instructions sharing a thread id must be mutually exclusive at
        // any input position; both firing at once is an allocator bug.
        debug_assert!(
            {
                let old = self.sparse[tid];
                !(old < self.size && self.dense[old].pc != pc)
            },
            "thread id {} already live for a different pc",
            tid
        );
        debug_assert!(j < self.dense.len(), "sparse queue overflow");
        self.sparse[tid] = j;
        self.dense[j].pc = pc;
        self.dense[j].t = None;
        self.size += 1;
        j
    }

    fn clear(&mut self) {
        self.size = 0;
    }
}

/// A sparse set of pcs, used to guard the runtime expansion of postponed
/// forks against zero-progress cycles.
#[derive(Debug, Default)]
struct PcSet {
    sparse: Vec<usize>,
    dense: Vec<usize>,
    size: usize,
}

impl PcSet {
    fn new(n: usize) -> PcSet {
        PcSet { sparse: vec![0; n], dense: vec![0; n], size: 0 }
    }

    /// Inserts `pc`, returning false when it was already present.
    fn insert(&mut self, pc: usize) -> bool {
        let j = self.sparse[pc];
        if j < self.size && self.dense[j] == pc {
            return false;
        }
        self.sparse[pc] = self.size;
        self.dense[self.size] = pc;
        self.size += 1;
        true
    }

    fn clear(&mut self) {
        self.size = 0;
    }
}

/// A frame of the explicit enqueue stack. Restores undo speculative capture
/// writes once a subtree of the closure has been expanded.
#[derive(Debug)]
enum AddFrame {
    Item(InstPtr),
    Restore { slot: usize, old: Slot },
}

/// A frame of the fused-dispatch walk.
#[derive(Debug)]
enum WalkFrame {
    Node(InstPtr),
    Restore { slot: usize, old: Slot },
}

/// A reusable NFA simulator for one program.
///
/// A machine owns its queues, capture vectors and thread pool, so each
/// concurrent match needs its own machine; the program itself is shared
/// freely.
#[derive(Debug)]
pub struct Machine<'p> {
    prog: &'p Prog,
    q0: Queue,
    q1: Queue,
    /// Free threads, kept as a stack.
    pool: Vec<Box<Thread>>,
    stack: Vec<AddFrame>,
    chain_stack: Vec<WalkFrame>,
    alt_seen: PcSet,
    /// Working captures during enqueue expansion.
    addcap: Vec<Slot>,
    /// Working captures during a fused-dispatch walk.
    chaincap: Vec<Slot>,
    /// Captures of the best match so far.
    matchcap: Vec<Slot>,
    ncap: usize,
    matched: bool,
    /// A two-entry cache of zero-width context flags, keyed by position.
    flag_a: Option<(usize, EmptyFlags)>,
    flag_b: Option<(usize, EmptyFlags)>,
}

impl<'p> Machine<'p> {
    /// Creates a machine for `prog`.
    pub fn new(prog: &'p Prog) -> Machine<'p> {
        let all_caps = prog.num_cap.max(2);
        Machine {
            prog,
            q0: Queue::new(prog.max_thread_num),
            q1: Queue::new(prog.max_thread_num),
            pool: Vec::new(),
            stack: Vec::new(),
            chain_stack: Vec::new(),
            alt_seen: PcSet::new(prog.insts.len()),
            addcap: vec![None; all_caps],
            chaincap: vec![None; all_caps],
            matchcap: vec![None; all_caps],
            ncap: 0,
            matched: false,
            flag_a: None,
            flag_b: None,
        }
    }

    /// Runs the machine over `input` starting at `pos`.
    ///
    /// `ncap` is the number of capture slots to track: `0` to only learn
    /// whether a match exists, or `prog.num_cap` for full submatches, which
    /// [`Machine::submatches`] then returns.
    pub fn exec<I: MachineInput>(
        &mut self,
        input: &I,
        start_pos: usize,
        anchor: Anchor,
        ncap: usize,
    ) -> bool {
        let prog = self.prog;
        debug_assert!(ncap <= self.matchcap.len());
        self.ncap = ncap;
        self.matched = false;
        self.flag_a = None;
        self.flag_b = None;
        for slot in self.matchcap.iter_mut() {
            *slot = None;
        }

        let start_cond = prog.start_cond();
        if start_cond == EMPTY_ALL {
            // No match is possible at all.
            return false;
        }
        if anchor != Anchor::Unanchored && start_pos != 0 {
            return false;
        }
        let (prefix, _) = prog.prefix();
        let prefix_rune = prefix.chars().next().map_or(-1, |c| c as Rune);

        let mut runq = mem::take(&mut self.q0);
        let mut nextq = mem::take(&mut self.q1);
        self.free_queue(&mut runq, 0);
        self.free_queue(&mut nextq, 0);

        let mut pos = start_pos;
        let r = input.step(pos);
        let mut rune = r >> 3;
        let mut width = (r & 7) as usize;
        let mut rune1 = -1;
        let mut width1 = 0usize;
        if rune != -1 {
            let r1 = input.step(pos + width);
            rune1 = r1 >> 3;
            width1 = (r1 & 7) as usize;
        }

        loop {
            if runq.size == 0 {
                if start_cond.contains(EmptyFlags::BEGIN_TEXT) && pos != 0 {
                    // Anchored match, past the beginning of the text.
                    break;
                }
                if self.matched {
                    // Have a match; finished exploring alternatives.
                    break;
                }
                if !prefix.is_empty() && rune1 != prefix_rune && input.can_check_prefix() {
                    // The match requires a literal prefix; scan for it.
                    match input.index(&prefix, pos) {
                        None => break,
                        Some(advance) => {
                            pos += advance;
                            let r = input.step(pos);
                            rune = r >> 3;
                            width = (r & 7) as usize;
                            let r1 = input.step(pos + width);
                            rune1 = r1 >> 3;
                            width1 = (r1 & 7) as usize;
                        }
                    }
                }
            }
            if !self.matched && (pos == 0 || anchor == Anchor::Unanchored) {
                if self.ncap > 0 {
                    self.matchcap[0] = Some(pos);
                    let n = self.ncap;
                    self.addcap[..n].copy_from_slice(&self.matchcap[..n]);
                }
                if let Some(t) = self.add(&mut runq, input, prog.start, pos, pos, None) {
                    self.free(t);
                }
            }
            let next_pos = pos + width;
            let at_end = pos == input.end_pos();
            self.step(&mut runq, &mut nextq, input, pos, next_pos, rune, anchor, at_end);
            if width == 0 {
                // End of input.
                break;
            }
            if self.ncap == 0 && self.matched {
                // Found a match and not tracking where it is.
                break;
            }
            pos += width;
            rune = rune1;
            width = width1;
            if rune != -1 {
                let r1 = input.step(pos + width);
                rune1 = r1 >> 3;
                width1 = (r1 & 7) as usize;
            }
            mem::swap(&mut runq, &mut nextq);
        }
        self.free_queue(&mut nextq, 0);
        self.free_queue(&mut runq, 0);
        self.q0 = runq;
        self.q1 = nextq;
        self.matched
    }

    /// The captures of the match found by the last [`Machine::exec`] call.
    pub fn submatches(&self) -> &[Slot] {
        &self.matchcap[..self.ncap]
    }

    /// Executes one position: runs every thread on `runq` against the rune
    /// `c` spanning `pos..next_pos`, appending survivors to `nextq`.
    fn step<I: MachineInput>(
        &mut self,
        runq: &mut Queue,
        nextq: &mut Queue,
        input: &I,
        pos: usize,
        next_pos: usize,
        c: Rune,
        anchor: Anchor,
        at_end: bool,
    ) {
        let prog = self.prog;
        let longest = prog.longest;
        let mut j = 0;
        while j < runq.size {
            let t = match runq.dense[j].t.take() {
                None => {
                    j += 1;
                    continue;
                }
                Some(t) => t,
            };
            if longest && self.matched && self.ncap > 0 && self.matchcap[0] < t.cap[0] {
                // An earlier-starting match already exists; this thread
                // cannot beat it.
                self.free(t);
                j += 1;
                continue;
            }
            let inst = &prog[t.pc];
            match inst.op {
                Op::Match => {
                    if anchor == Anchor::AnchorBoth && !at_end {
                        self.free(t);
                    } else {
                        if self.ncap > 0
                            && (!longest || !self.matched || self.matchcap[1] < Some(pos))
                        {
                            let mut t = t;
                            t.cap[1] = Some(pos);
                            let n = self.ncap;
                            self.matchcap[..n].copy_from_slice(&t.cap[..n]);
                            self.free(t);
                        } else {
                            self.free(t);
                        }
                        self.matched = true;
                        if !longest {
                            // Lower-priority threads cannot beat this match.
                            self.free_queue(runq, j + 1);
                            break;
                        }
                    }
                }
                Op::Rune | Op::Rune1 | Op::RuneAny | Op::RuneAnyNotNl => {
                    if inst.matches_rune(c) {
                        let out = inst.out;
                        if self.ncap > 0 {
                            let n = self.ncap;
                            self.addcap[..n].copy_from_slice(&t.cap[..n]);
                        }
                        if let Some(t) = self.add(nextq, input, out, next_pos, pos, Some(t)) {
                            self.free(t);
                        }
                    } else {
                        self.free(t);
                    }
                }
                Op::AltRune1 | Op::AltRune => {
                    let matched_now =
                        self.step_chain(nextq, input, t, pos, next_pos, c, anchor, at_end);
                    if matched_now && !longest {
                        self.free_queue(runq, j + 1);
                        break;
                    }
                }
                _ => unreachable!("scheduled thread at non-thread instruction"),
            }
            j += 1;
        }
        self.free_queue(runq, 0);
    }

    /// Walks a fused alternation in place: on a rune match the successor is
    /// scheduled and the remaining alternatives are dropped (they are
    /// either provably disjoint or subsumed by an accepting tail); on a
    /// mismatch the walk follows `arg`. Plain forks encountered along the
    /// way fork the walk, captures apply speculatively with restore frames,
    /// and a Match alternative fires exactly like a Match thread.
    ///
    /// Returns true when a match was recorded during the walk.
    fn step_chain<I: MachineInput>(
        &mut self,
        nextq: &mut Queue,
        input: &I,
        t: Box<Thread>,
        pos: usize,
        next_pos: usize,
        c: Rune,
        anchor: Anchor,
        at_end: bool,
    ) -> bool {
        let prog = self.prog;
        let longest = prog.longest;
        let start_pc = t.pc;
        if self.ncap > 0 {
            let n = self.ncap;
            self.chaincap[..n].copy_from_slice(&t.cap[..n]);
        }
        let mut recycled = Some(t);
        let mut matched_now = false;

        debug_assert!(self.chain_stack.is_empty());
        self.chain_stack.push(WalkFrame::Node(start_pc));
        'walk: while let Some(frame) = self.chain_stack.pop() {
            let mut pc = match frame {
                WalkFrame::Restore { slot, old } => {
                    self.chaincap[slot] = old;
                    continue;
                }
                WalkFrame::Node(pc) => pc,
            };
            loop {
                let inst = &prog[pc];
                match inst.op {
                    Op::AltRune1 | Op::AltRune => {
                        if inst.matches_rune(c) {
                            recycled = self.chain_add(nextq, input, inst.out, next_pos, pos, recycled);
                            break;
                        }
                        pc = inst.arg;
                    }
                    Op::Rune | Op::Rune1 | Op::RuneAny | Op::RuneAnyNotNl => {
                        if inst.matches_rune(c) {
                            recycled = self.chain_add(nextq, input, inst.out, next_pos, pos, recycled);
                        }
                        break;
                    }
                    Op::Capture => {
                        // Delayed captures never end up inside a chain; the
                        // fusing rewrites refuse to walk them.
                        debug_assert_eq!(inst.arg2, 0);
                        let slot = inst.arg;
                        if slot < self.ncap {
                            let old = self.chaincap[slot];
                            self.chain_stack.push(WalkFrame::Restore { slot, old });
                            self.chaincap[slot] = Some(pos);
                        }
                        pc = inst.out;
                    }
                    Op::EmptyWidth => {
                        debug_assert_eq!(inst.arg2, 0);
                        let flags = self.context_at(input, pos);
                        if flags.contains(inst.empty_flags()) {
                            pc = inst.out;
                        } else {
                            break;
                        }
                    }
                    Op::Alt | Op::AltMatch => {
                        self.chain_stack.push(WalkFrame::Node(inst.arg));
                        pc = inst.out;
                    }
                    Op::Nop => pc = inst.out,
                    Op::Match => {
                        if anchor == Anchor::AnchorBoth && !at_end {
                            break;
                        }
                        if self.ncap > 0
                            && (!longest || !self.matched || self.matchcap[1] < Some(pos))
                        {
                            let old = self.chaincap[1];
                            self.chaincap[1] = Some(pos);
                            let n = self.ncap;
                            self.matchcap[..n].copy_from_slice(&self.chaincap[..n]);
                            self.chaincap[1] = old;
                        }
                        self.matched = true;
                        matched_now = true;
                        if !longest {
                            // The remaining alternatives of this walk are
                            // lower priority than the match.
                            self.chain_stack.clear();
                            break 'walk;
                        }
                        break;
                    }
                    Op::Fail => break,
                }
            }
        }
        if let Some(t) = recycled {
            self.free(t);
        }
        matched_now
    }

    /// Schedules `pc` from a chain walk, copying the walk's working
    /// captures.
    fn chain_add<I: MachineInput>(
        &mut self,
        q: &mut Queue,
        input: &I,
        pc: InstPtr,
        pos: usize,
        prev_pos: usize,
        recycled: Option<Box<Thread>>,
    ) -> Option<Box<Thread>> {
        if self.ncap > 0 {
            let n = self.ncap;
            self.addcap[..n].copy_from_slice(&self.chaincap[..n]);
        }
        self.add(q, input, pc, pos, prev_pos, recycled)
    }

    /// Enqueues everything `pc` stands for: the precomputed add-list
    /// leaves, with zero-width tests checked against the position context,
    /// captures applied speculatively, and postponed forks expanded behind
    /// a visited guard. `recycled` is reused for the first thread actually
    /// installed; whatever is left over comes back to the caller.
    ///
    /// The working captures must already be in `addcap` (`prev_pos` is the
    /// start of the previously consumed rune, for instructions delayed
    /// past it).
    fn add<I: MachineInput>(
        &mut self,
        q: &mut Queue,
        input: &I,
        root: InstPtr,
        pos: usize,
        prev_pos: usize,
        mut recycled: Option<Box<Thread>>,
    ) -> Option<Box<Thread>> {
        let prog = self.prog;
        debug_assert!(self.stack.is_empty());
        self.alt_seen.clear();
        if prog[root].op.is_alt() {
            self.alt_seen.insert(root);
        }
        self.push_list(root);

        while let Some(frame) = self.stack.pop() {
            let pc = match frame {
                AddFrame::Restore { slot, old } => {
                    self.addcap[slot] = old;
                    continue;
                }
                AddFrame::Item(pc) => pc,
            };
            let inst = &prog[pc];
            match inst.op {
                Op::Fail => {}
                Op::Alt | Op::AltMatch => {
                    // A fork postponed by the closure precompute: expand it
                    // through its own list, once per enqueue.
                    if self.alt_seen.insert(pc) {
                        self.push_list(pc);
                    }
                }
                Op::EmptyWidth => {
                    let tid = tid_of(inst.tid, pc);
                    if q.contains(pc, tid) {
                        continue;
                    }
                    q.add(pc, tid);
                    let at = if inst.arg2 == 0 { pos } else { prev_pos };
                    let flags = self.context_at(input, at);
                    if flags.contains(inst.empty_flags()) {
                        self.push_list(inst.out);
                    }
                }
                Op::Capture => {
                    let tid = tid_of(inst.tid, pc);
                    if q.contains(pc, tid) {
                        continue;
                    }
                    q.add(pc, tid);
                    let slot = inst.arg;
                    if slot < self.ncap {
                        let at = if inst.arg2 == 0 { pos } else { prev_pos };
                        let old = self.addcap[slot];
                        self.stack.push(AddFrame::Restore { slot, old });
                        self.addcap[slot] = Some(at);
                    }
                    self.push_list(inst.out);
                }
                // Schedulable leaves: Match, the rune tests and the fused
                // alternations.
                _ => {
                    let tid = tid_of(inst.tid, pc);
                    if q.contains(pc, tid) {
                        continue;
                    }
                    let j = q.add(pc, tid);
                    let mut t = match recycled.take() {
                        Some(t) => t,
                        None => self.alloc(),
                    };
                    t.pc = pc;
                    if self.ncap > 0 {
                        let n = self.ncap;
                        t.cap[..n].copy_from_slice(&self.addcap[..n]);
                    }
                    q.dense[j].t = Some(t);
                }
            }
        }
        recycled
    }

    /// Pushes the add-list of `pc` so its items pop in priority order.
    fn push_list(&mut self, pc: InstPtr) {
        let prog = self.prog;
        for &item in prog.add_list[pc].iter().rev() {
            self.stack.push(AddFrame::Item(item));
        }
    }

    /// The zero-width context at `at`, cached per position.
    fn context_at<I: MachineInput>(&mut self, input: &I, at: usize) -> EmptyFlags {
        if let Some((p, f)) = self.flag_a {
            if p == at {
                return f;
            }
        }
        if let Some((p, f)) = self.flag_b {
            if p == at {
                return f;
            }
        }
        let f = if at == 0 {
            empty_op_context(-1, input.step(0) >> 3)
        } else {
            input.context(at)
        };
        self.flag_b = self.flag_a;
        self.flag_a = Some((at, f));
        f
    }

    fn alloc(&mut self) -> Box<Thread> {
        match self.pool.pop() {
            Some(t) => t,
            None => Box::new(Thread { pc: 0, cap: vec![None; self.matchcap.len()] }),
        }
    }

    fn free(&mut self, t: Box<Thread>) {
        self.pool.push(t);
    }

    /// Returns the threads at `from..` to the pool and clears the queue.
    fn free_queue(&mut self, q: &mut Queue, from: usize) {
        for j in from..q.size {
            if let Some(t) = q.dense[j].t.take() {
                self.pool.push(t);
            }
        }
        q.clear();
    }
}

fn tid_of(tid: Option<usize>, pc: InstPtr) -> usize {
    match tid {
        Some(tid) => tid,
        None => unreachable!("instruction {} scheduled without a thread id", pc),
    }
}

/// Compiles nothing: runs `prog` over `input` from `pos` and reports
/// whether it matches, without tracking capture positions.
pub fn is_match<I: MachineInput>(prog: &Prog, input: &I, pos: usize, anchor: Anchor) -> bool {
    Machine::new(prog).exec(input, pos, anchor, 0)
}

/// Runs `prog` over `input` from `pos` and returns the capture slots of
/// the match, if any. Slots `0` and `1` delimit the whole match.
pub fn find<I: MachineInput>(
    prog: &Prog,
    input: &I,
    pos: usize,
    anchor: Anchor,
) -> Option<Vec<Slot>> {
    let mut machine = Machine::new(prog);
    if machine.exec(input, pos, anchor, prog.num_cap.max(2)) {
        Some(machine.submatches().to_vec())
    } else {
        None
    }
}
