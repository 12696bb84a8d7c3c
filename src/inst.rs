// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The instruction model: opcodes, operands and rune predicates.

use std::fmt;

use crate::ast::Rune;

/// InstPtr represents the index of an instruction in a regex program.
pub type InstPtr = usize;

/// The bit set in a rune instruction's `arg` when it matches case
/// insensitively. Only single-rune instructions whose rune has a distinct
/// ASCII case counterpart carry it; everything else is pre-folded by the
/// frontend.
pub const FOLD_CASE: usize = 1;

bitflags::bitflags! {
    /// A bitmask of zero-width conditions that can hold at a position in the
    /// input. `EmptyWidth` instructions succeed when every condition in their
    /// mask holds.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EmptyFlags: u32 {
        /// The position is at the beginning of a line.
        const BEGIN_LINE = 1 << 0;
        /// The position is at the end of a line.
        const END_LINE = 1 << 1;
        /// The position is at the beginning of the text.
        const BEGIN_TEXT = 1 << 2;
        /// The position is at the end of the text.
        const END_TEXT = 1 << 3;
        /// Exactly one of the surrounding runes is a word rune.
        const WORD_BOUNDARY = 1 << 4;
        /// The surrounding runes are both word runes or both not.
        const NO_WORD_BOUNDARY = 1 << 5;
    }
}

/// All conditions at once. A program whose start requires `EMPTY_ALL` can
/// never match, since `WORD_BOUNDARY` and `NO_WORD_BOUNDARY` are mutually
/// exclusive. Used as the "no match possible" sentinel.
pub const EMPTY_ALL: EmptyFlags = EmptyFlags::all();

/// The opcode of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Fails unconditionally. Always at pc 0, which doubles as the patch
    /// list terminator.
    Fail,
    /// The program has found a match.
    Match,
    /// Continues to `out`. Produced by the compiler for empty expressions
    /// and eliminated by the optimizer.
    Nop,
    /// Records the current position in capture slot `arg`, then continues
    /// to `out`. `arg2` is the number of runes the recorded position lies
    /// before the current one.
    Capture,
    /// Succeeds and continues to `out` when every condition in the
    /// `EmptyFlags` mask stored in `arg` holds `arg2` runes back.
    EmptyWidth,
    /// Matches any rune in `runes` and continues to `out`.
    Rune,
    /// Matches exactly `the_rune` and continues to `out`.
    Rune1,
    /// Matches any rune and continues to `out`.
    RuneAny,
    /// Matches any rune except `\n` and continues to `out`.
    RuneAnyNotNl,
    /// Forks to `out` (preferred) and `arg`.
    Alt,
    /// Forks like `Alt`, where one branch is known to lead directly to a
    /// match.
    AltMatch,
    /// A fused alternation: if the current rune is `the_rune`, consume it
    /// and continue to `out`; otherwise chain to `arg` without consuming.
    AltRune1,
    /// Like `AltRune1`, but tests the ranges in `runes`.
    AltRune,
}

impl Op {
    /// Returns true for the instructions that consume a rune when they
    /// succeed.
    pub fn is_rune_op(self) -> bool {
        matches!(self, Op::Rune | Op::Rune1 | Op::RuneAny | Op::RuneAnyNotNl)
    }

    /// Returns true for the pure epsilon forks, which are expanded by the
    /// closure precompute and never scheduled as threads.
    pub fn is_alt(self) -> bool {
        matches!(self, Op::Alt | Op::AltMatch)
    }
}

/// A single instruction in a regex program.
///
/// Instructions are a flat mutable record rather than an enum: the peephole
/// optimizer rewrites opcodes in place while reusing the operand fields, and
/// the patch list threads unresolved successor pointers through `out` and
/// `arg` during compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inst {
    /// The opcode.
    pub op: Op,
    /// The primary successor. `0` (the `Fail` instruction) means "none".
    pub out: InstPtr,
    /// Overloaded operand: the second successor for `Alt`/`AltMatch`/
    /// `AltRune1`/`AltRune`, the `EmptyFlags` bits for `EmptyWidth`, the
    /// capture slot for `Capture`, and the `FOLD_CASE` bit for rune
    /// instructions.
    pub arg: usize,
    /// For `Capture` and `EmptyWidth`: how many runes before the current
    /// position the instruction evaluates. Zero except after the delay
    /// rewrites, which keep it at most one.
    pub arg2: usize,
    /// For `Rune1` and `AltRune1`: the single rune to test.
    pub the_rune: Rune,
    /// Sorted inclusive range endpoints, `[lo1, hi1, lo2, hi2, ...]`.
    /// `Rune1` keeps the degenerate pair `[r, r]` here as well.
    pub runes: Vec<Rune>,
    /// The sparse-set slot this instruction is scheduled under, or `None`
    /// for instructions that are never scheduled (`Fail`, `Nop`, `Alt`,
    /// `AltMatch`). Assigned after optimization.
    pub tid: Option<usize>,
}

impl Inst {
    /// Creates an instruction with the given opcode and no operands.
    pub fn new(op: Op) -> Inst {
        Inst { op, out: 0, arg: 0, arg2: 0, the_rune: 0, runes: Vec::new(), tid: None }
    }

    /// The `EmptyFlags` mask of an `EmptyWidth` instruction.
    pub fn empty_flags(&self) -> EmptyFlags {
        EmptyFlags::from_bits_truncate(self.arg as u32)
    }

    /// Tests whether this instruction's rune predicate matches `r`.
    ///
    /// Valid for `Rune`, `Rune1`, `RuneAny`, `RuneAnyNotNl`, `AltRune1` and
    /// `AltRune`.
    #[inline(always)]
    pub fn matches_rune(&self, r: Rune) -> bool {
        match self.op {
            Op::Rune1 | Op::AltRune1 => r == self.the_rune,
            Op::RuneAny => true,
            Op::RuneAnyNotNl => r != '\n' as Rune,
            _ => self.matches_ranges(r),
        }
    }

    fn matches_ranges(&self, r: Rune) -> bool {
        // Only plain Rune instructions carry the fold bit; the fused
        // AltRune keeps its second successor in `arg`.
        if self.op == Op::Rune && self.arg & FOLD_CASE != 0 {
            // Folded instructions are a single ASCII letter pair.
            let lo = self.runes[0];
            return r == lo || ascii_fold(r) == Some(lo);
        }
        // Check the first few ranges without binary search. Classes over
        // predominantly ASCII text tend to hit in the leading ranges.
        let pairs = self.runes.len() / 2;
        for i in 0..pairs.min(4) {
            if r < self.runes[2 * i] {
                return false;
            }
            if r <= self.runes[2 * i + 1] {
                return true;
            }
        }
        let mut lo = 0;
        let mut hi = pairs;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.runes[2 * mid + 1] < r {
                lo = mid + 1;
            } else if self.runes[2 * mid] > r {
                hi = mid;
            } else {
                return true;
            }
        }
        false
    }
}

/// The ASCII case counterpart of `r`, if it has one.
///
/// Unicode case folding is the frontend's concern; the engine itself only
/// understands the ASCII orbit.
pub fn ascii_fold(r: Rune) -> Option<Rune> {
    match r {
        0x41..=0x5A => Some(r + 0x20),
        0x61..=0x7A => Some(r - 0x20),
        _ => None,
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn rune_str(r: Rune) -> String {
            match std::char::from_u32(r as u32) {
                Some(c) => format!("{:?}", c),
                None => format!("#{:x}", r),
            }
        }
        fn ranges_str(runes: &[Rune]) -> String {
            runes
                .chunks(2)
                .map(|p| format!("{}-{}", rune_str(p[0]), rune_str(p[1])))
                .collect::<Vec<String>>()
                .join(", ")
        }
        match self.op {
            Op::Fail => write!(f, "Fail"),
            Op::Match => write!(f, "Match"),
            Op::Nop => write!(f, "Nop (goto: {})", self.out),
            Op::Capture => {
                write!(f, "Capture({}, -{}) (goto: {})", self.arg, self.arg2, self.out)
            }
            Op::EmptyWidth => write!(
                f,
                "EmptyWidth({:?}, -{}) (goto: {})",
                self.empty_flags(),
                self.arg2,
                self.out
            ),
            Op::Rune => write!(f, "Rune({}) (goto: {})", ranges_str(&self.runes), self.out),
            Op::Rune1 => write!(f, "Rune1({}) (goto: {})", rune_str(self.the_rune), self.out),
            Op::RuneAny => write!(f, "RuneAny (goto: {})", self.out),
            Op::RuneAnyNotNl => write!(f, "RuneAnyNotNl (goto: {})", self.out),
            Op::Alt => write!(f, "Alt({}, {})", self.out, self.arg),
            Op::AltMatch => write!(f, "AltMatch({}, {})", self.out, self.arg),
            Op::AltRune1 => {
                write!(f, "AltRune1({}, {}, {})", rune_str(self.the_rune), self.out, self.arg)
            }
            Op::AltRune => {
                write!(f, "AltRune({}, {}, {})", ranges_str(&self.runes), self.out, self.arg)
            }
        }
    }
}
