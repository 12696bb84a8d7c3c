// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The compiler from abstract syntax to bytecode, via Thompson's
//! construction: every sub-expression becomes a fragment with one entry pc
//! and a patch list of dangling exits, and the combinators below wire
//! fragments together.

use log::debug;

use crate::ast::{Expr, Rune, MAX_RUNE};
use crate::closure;
use crate::inst::{ascii_fold, EmptyFlags, InstPtr, Op, FOLD_CASE};
use crate::optimize;
use crate::prog::Prog;
use crate::tid;
use crate::Error;

/// A fragment of a partially built program: the entry pc and the patch
/// list of dangling exits. See http://swtch.com/~rsc/regexp/regexp1.html.
///
/// An entry of `0` marks the failing fragment, since pc 0 is `Fail`.
#[derive(Clone, Copy, Debug)]
struct Frag {
    i: InstPtr,
    out: usize,
}

impl Frag {
    fn new(i: InstPtr) -> Frag {
        Frag { i, out: 0 }
    }
}

/// A compiler from the abstract syntax in [`ast`](crate::ast) to a
/// [`Prog`], including the optimization and thread-id assignment passes.
#[derive(Debug)]
pub struct Compiler {
    prog: Prog,
    size_limit: usize,
    longest: bool,
}

impl Compiler {
    /// Creates a compiler with the default configuration.
    pub fn new() -> Compiler {
        Compiler {
            prog: Prog::new(),
            size_limit: 10 * (1 << 20),
            longest: false,
        }
    }

    /// Sets the approximate size limit of the compiled program, in bytes.
    pub fn size_limit(mut self, limit: usize) -> Compiler {
        self.size_limit = limit;
        self
    }

    /// Compiles a program that reports leftmost-longest matches instead of
    /// leftmost-first ones.
    pub fn longest(mut self, yes: bool) -> Compiler {
        self.longest = yes;
        self
    }

    /// Compiles `expr` into a finished program.
    pub fn compile(mut self, expr: &Expr) -> Result<Prog, Error> {
        let f = self.c(expr)?;
        let m = self.prog.add_inst(Op::Match);
        self.prog.patch(f.out, m);
        self.prog.start = f.i;
        debug!(
            "compiled {} instructions, {} capture slots",
            self.prog.insts.len(),
            self.prog.num_cap
        );

        // Some rewrites are only valid for leftmost-first programs, so the
        // optimizer needs to know the match mode.
        self.prog.longest = self.longest;
        optimize::optimize(&mut self.prog);
        closure::compute_add_lists(&mut self.prog);
        tid::assign(&mut self.prog);
        self.prog.verify();
        Ok(self.prog)
    }

    fn c(&mut self, expr: &Expr) -> Result<Frag, Error> {
        self.check_size()?;
        match *expr {
            Expr::NoMatch => Ok(self.fail()),
            Expr::EmptyMatch => Ok(self.nop()),
            Expr::Literal { ref runes, fold_case } => {
                if runes.is_empty() {
                    return Ok(self.nop());
                }
                let mut f: Option<Frag> = None;
                for &r in runes {
                    let f1 = self.rune(&[r, r], fold_case);
                    f = Some(match f {
                        None => f1,
                        Some(f) => self.cat(f, f1),
                    });
                }
                Ok(f.unwrap())
            }
            Expr::CharClass { ref ranges, fold_case } => Ok(self.rune(ranges, fold_case)),
            Expr::AnyChar => Ok(self.rune(&[0, MAX_RUNE], false)),
            Expr::AnyCharNotNl => {
                let nl = '\n' as Rune;
                Ok(self.rune(&[0, nl - 1, nl + 1, MAX_RUNE], false))
            }
            Expr::BeginLine => Ok(self.empty(EmptyFlags::BEGIN_LINE)),
            Expr::EndLine => Ok(self.empty(EmptyFlags::END_LINE)),
            Expr::BeginText => Ok(self.empty(EmptyFlags::BEGIN_TEXT)),
            Expr::EndText => Ok(self.empty(EmptyFlags::END_TEXT)),
            Expr::WordBoundary => Ok(self.empty(EmptyFlags::WORD_BOUNDARY)),
            Expr::NotWordBoundary => Ok(self.empty(EmptyFlags::NO_WORD_BOUNDARY)),
            Expr::Capture { ref sub, index } => {
                let bra = self.cap(index * 2);
                let sub = self.c(sub)?;
                let ket = self.cap(index * 2 + 1);
                let f = self.cat(bra, sub);
                Ok(self.cat(f, ket))
            }
            Expr::Star { ref sub, nongreedy } => {
                let f = self.c(sub)?;
                Ok(self.star(f, nongreedy))
            }
            Expr::Plus { ref sub, nongreedy } => {
                let f = self.c(sub)?;
                Ok(self.plus(f, nongreedy))
            }
            Expr::Quest { ref sub, nongreedy } => {
                let f = self.c(sub)?;
                Ok(self.quest(f, nongreedy))
            }
            Expr::Concat(ref subs) => {
                if subs.is_empty() {
                    return Ok(self.nop());
                }
                let mut f: Option<Frag> = None;
                for sub in subs {
                    let f1 = self.c(sub)?;
                    f = Some(match f {
                        None => f1,
                        Some(f) => self.cat(f, f1),
                    });
                }
                Ok(f.unwrap())
            }
            Expr::Alternate(ref subs) => {
                if subs.is_empty() {
                    return Ok(self.nop());
                }
                let mut f: Option<Frag> = None;
                for sub in subs {
                    let f1 = self.c(sub)?;
                    f = Some(match f {
                        None => f1,
                        Some(f) => self.alt(f, f1),
                    });
                }
                Ok(f.unwrap())
            }
        }
    }

    fn new_inst(&mut self, op: Op) -> Frag {
        Frag::new(self.prog.add_inst(op))
    }

    /// A no-op fragment. Sometimes unavoidable.
    fn nop(&mut self) -> Frag {
        let mut f = self.new_inst(Op::Nop);
        f.out = f.i << 1;
        f
    }

    fn fail(&mut self) -> Frag {
        Frag::new(0)
    }

    /// A single capture slot write.
    fn cap(&mut self, slot: usize) -> Frag {
        let mut f = self.new_inst(Op::Capture);
        f.out = f.i << 1;
        self.prog[f.i].arg = slot;
        if self.prog.num_cap < slot + 1 {
            self.prog.num_cap = slot + 1;
        }
        f
    }

    /// Given fragments `f1` and `f2`, returns a fragment for `f1 f2`.
    fn cat(&mut self, f1: Frag, f2: Frag) -> Frag {
        // Concatenating with failure is failure.
        if f1.i == 0 || f2.i == 0 {
            return self.fail();
        }
        self.prog.patch(f1.out, f2.i);
        Frag { i: f1.i, out: f2.out }
    }

    /// Given fragments `f1` and `f2`, returns a fragment for `f1 | f2`.
    fn alt(&mut self, f1: Frag, f2: Frag) -> Frag {
        // Alternating with failure is the other branch.
        if f1.i == 0 {
            return f2;
        }
        if f2.i == 0 {
            return f1;
        }
        let mut f = self.new_inst(Op::Alt);
        self.prog[f.i].out = f1.i;
        self.prog[f.i].arg = f2.i;
        f.out = self.prog.append(f1.out, f2.out);
        f
    }

    /// Given a fragment for `a`, returns a fragment for `a?` or `a??`.
    fn quest(&mut self, f1: Frag, nongreedy: bool) -> Frag {
        let mut f = self.new_inst(Op::Alt);
        if nongreedy {
            self.prog[f.i].arg = f1.i;
            f.out = f.i << 1;
        } else {
            self.prog[f.i].out = f1.i;
            f.out = f.i << 1 | 1;
        }
        f.out = self.prog.append(f.out, f1.out);
        f
    }

    /// Given a fragment for `a`, returns a fragment for `a*` or `a*?`.
    fn star(&mut self, f1: Frag, nongreedy: bool) -> Frag {
        let mut f = self.new_inst(Op::Alt);
        if nongreedy {
            self.prog[f.i].arg = f1.i;
            f.out = f.i << 1;
        } else {
            self.prog[f.i].out = f1.i;
            f.out = f.i << 1 | 1;
        }
        self.prog.patch(f1.out, f.i);
        f
    }

    /// Given a fragment for `a`, returns a fragment for `a+` or `a+?`.
    fn plus(&mut self, f1: Frag, nongreedy: bool) -> Frag {
        let out = self.star(f1, nongreedy).out;
        Frag { i: f1.i, out }
    }

    /// A zero-width condition test.
    fn empty(&mut self, flags: EmptyFlags) -> Frag {
        let mut f = self.new_inst(Op::EmptyWidth);
        self.prog[f.i].arg = flags.bits() as usize;
        f.out = f.i << 1;
        f
    }

    /// A rune match over sorted inclusive range pairs, specialized for the
    /// shapes the matching engine fast-paths.
    fn rune(&mut self, ranges: &[Rune], fold_case: bool) -> Frag {
        let mut f = self.new_inst(Op::Rune);
        let single = ranges.len() == 2 && ranges[0] == ranges[1];
        // The fold bit only survives on a single rune with a distinct ASCII
        // counterpart; everything else must arrive pre-folded.
        let fold = fold_case && single && ascii_fold(ranges[0]).is_some();

        let inst = &mut self.prog[f.i];
        inst.runes = ranges.to_vec();
        inst.arg = if fold { FOLD_CASE } else { 0 };
        if single && !fold {
            inst.op = Op::Rune1;
            inst.the_rune = ranges[0];
        } else if *ranges == [0, MAX_RUNE] {
            inst.op = Op::RuneAny;
        } else if *ranges == [0, '\n' as Rune - 1, '\n' as Rune + 1, MAX_RUNE] {
            inst.op = Op::RuneAnyNotNl;
        }
        f.out = f.i << 1;
        f
    }

    fn check_size(&self) -> Result<(), Error> {
        if self.prog.insts.len() * std::mem::size_of::<crate::inst::Inst>() > self.size_limit {
            Err(Error::CompiledTooBig(self.size_limit))
        } else {
            Ok(())
        }
    }
}

impl Default for Compiler {
    fn default() -> Compiler {
        Compiler::new()
    }
}

/// Compiles `expr` with the default configuration.
pub fn compile(expr: &Expr) -> Result<Prog, Error> {
    Compiler::new().compile(expr)
}

/// Compiles `expr` without running the optimizer, as a baseline for
/// checking that the rewrites preserve match semantics.
#[cfg(test)]
pub(crate) fn compile_unoptimized(expr: &Expr) -> Result<Prog, Error> {
    let mut c = Compiler::new();
    let f = c.c(expr)?;
    let m = c.prog.add_inst(Op::Match);
    c.prog.patch(f.out, m);
    c.prog.start = f.i;
    closure::compute_add_lists(&mut c.prog);
    tid::assign(&mut c.prog);
    c.prog.verify();
    Ok(c.prog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::inst::Op;

    #[test]
    fn literal_chain() {
        let prog = compile(&Expr::literal("ab")).unwrap();
        // Fail, two Rune1s and a Match survive optimization.
        assert_eq!(prog.insts.len(), 4);
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::Rune1);
        assert_eq!(first.the_rune, 'a' as i32);
        let second = &prog[first.out];
        assert_eq!(second.op, Op::Rune1);
        assert_eq!(second.the_rune, 'b' as i32);
        assert_eq!(prog[second.out].op, Op::Match);
        assert_eq!(prog.prefix(), ("ab".to_string(), true));
    }

    #[test]
    fn empty_match_compiles_to_match() {
        let prog = compile(&Expr::EmptyMatch).unwrap();
        // The leading Nop is stripped by the optimizer.
        assert_eq!(prog[prog.start].op, Op::Match);
    }

    #[test]
    fn no_match_starts_at_fail() {
        let prog = compile(&Expr::NoMatch).unwrap();
        assert_eq!(prog.start, 0);
        assert_eq!(prog[0].op, Op::Fail);
    }

    #[test]
    fn captures_raise_num_cap() {
        let expr = Expr::concat(vec![
            Expr::capture(1, Expr::literal("a")),
            Expr::capture(2, Expr::literal("b")),
        ]);
        let prog = compile(&expr).unwrap();
        assert_eq!(prog.num_cap, 6);
    }

    #[test]
    fn any_char_specializes() {
        let prog = compile(&Expr::AnyChar).unwrap();
        assert_eq!(prog[prog.start].op, Op::RuneAny);
        let prog = compile(&Expr::AnyCharNotNl).unwrap();
        assert_eq!(prog[prog.start].op, Op::RuneAnyNotNl);
    }

    #[test]
    fn folded_literal_keeps_rune_op() {
        let prog = compile(&Expr::Literal { runes: vec!['a' as i32], fold_case: true }).unwrap();
        let first = &prog[prog.start];
        assert_eq!(first.op, Op::Rune);
        assert_eq!(first.arg & crate::inst::FOLD_CASE, crate::inst::FOLD_CASE);
        // Folding something without an ASCII counterpart drops the flag.
        let prog = compile(&Expr::Literal { runes: vec!['7' as i32], fold_case: true }).unwrap();
        assert_eq!(prog[prog.start].op, Op::Rune1);
    }

    #[test]
    fn size_limit_surfaces() {
        let expr = Expr::concat(vec![Expr::literal("abcdefghij"); 4]);
        let err = Compiler::new().size_limit(0).compile(&expr).unwrap_err();
        match err {
            Error::CompiledTooBig(limit) => assert_eq!(limit, 0),
        }
    }
}
