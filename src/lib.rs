// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The bytecode core of a linear-time regular expression engine, heavily
//! based on RE2's NFA design. A parsed regular expression is compiled to a
//! small instruction program via Thompson's construction, rewritten by a
//! peephole optimizer, and executed by a sparse-queue NFA simulation whose
//! running time is bounded by the input length times the program size; no
//! backtracking blow-up is possible.
//!
//! This crate deliberately stops at the bytecode pipeline. Parsing,
//! Unicode case folding and class tables, and the user-facing API around
//! iterators and replacement are other crates' business; the inputs here
//! are the [`ast::Expr`] syntax tree and the [`input::MachineInput`]
//! stream abstraction.
//!
//! # Example
//!
//! ```rust
//! use regex_nfa::ast::Expr;
//! use regex_nfa::input::CharInput;
//! use regex_nfa::machine::{find, Anchor};
//!
//! // (a)(b), as a parser would hand it over.
//! let expr = Expr::concat(vec![
//!     Expr::capture(1, Expr::literal("a")),
//!     Expr::capture(2, Expr::literal("b")),
//! ]);
//! let prog = regex_nfa::compile(&expr).unwrap();
//!
//! let caps = find(&prog, &CharInput::new("ab"), 0, Anchor::Unanchored).unwrap();
//! assert_eq!(
//!     caps,
//!     vec![Some(0), Some(2), Some(0), Some(1), Some(1), Some(2)],
//! );
//! ```
//!
//! A compiled [`prog::Prog`] is immutable and freely shareable; every
//! concurrent match needs its own [`machine::Machine`].

#![deny(missing_docs)]

use std::fmt;

pub mod ast;
pub mod closure;
pub mod compile;
pub mod input;
pub mod inst;
pub mod machine;
pub mod optimize;
pub mod prog;
pub mod tid;

pub use crate::compile::{compile, Compiler};

/// An error that occurred while compiling a regular expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The compiled program exceeded the configured size limit. The
    /// argument is the limit, in bytes.
    CompiledTooBig(usize),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::CompiledTooBig(limit) => {
                write!(f, "compiled program exceeds size limit of {} bytes", limit)
            }
        }
    }
}
