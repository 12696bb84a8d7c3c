// Copyright 2014-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use regex_nfa::ast::Expr;
use regex_nfa::compile::Compiler;
use regex_nfa::input::CharInput;
use regex_nfa::machine::{find, is_match, Anchor, Slot};

fn prog(expr: &Expr) -> regex_nfa::prog::Prog {
    regex_nfa::compile(expr).unwrap()
}

fn prog_longest(expr: &Expr) -> regex_nfa::prog::Prog {
    Compiler::new().longest(true).compile(expr).unwrap()
}

fn span(expr: &Expr, text: &str) -> Option<(usize, usize)> {
    find(&prog(expr), &CharInput::new(text), 0, Anchor::Unanchored)
        .map(|caps| (caps[0].unwrap(), caps[1].unwrap()))
}

fn caps(expr: &Expr, text: &str) -> Option<Vec<Slot>> {
    find(&prog(expr), &CharInput::new(text), 0, Anchor::Unanchored)
}

#[test]
fn literal_match() {
    let e = Expr::literal("abc");
    assert_eq!(span(&e, "abc"), Some((0, 3)));
    assert_eq!(span(&e, "xxabcxx"), Some((2, 5)));
    assert_eq!(span(&e, "ab"), None);
    assert_eq!(span(&e, ""), None);
}

#[test]
fn leftmost_first_prefers_the_earlier_alternative() {
    // (a|ab) on "ab" matches "a", not "ab".
    let e = Expr::alternate(vec![Expr::literal("a"), Expr::literal("ab")]);
    assert_eq!(span(&e, "ab"), Some((0, 1)));
}

#[test]
fn longest_mode_prefers_the_longer_alternative() {
    let e = Expr::alternate(vec![Expr::literal("a"), Expr::literal("ab")]);
    let p = prog_longest(&e);
    let caps = find(&p, &CharInput::new("ab"), 0, Anchor::Unanchored).unwrap();
    assert_eq!((caps[0], caps[1]), (Some(0), Some(2)));
}

#[test]
fn greedy_star_takes_the_longest_tail() {
    // a.*b on "a__b__b" spans the whole string.
    let e = Expr::concat(vec![
        Expr::literal("a"),
        Expr::star(Expr::AnyCharNotNl, false),
        Expr::literal("b"),
    ]);
    assert_eq!(span(&e, "a__b__b"), Some((0, 7)));
}

#[test]
fn lazy_star_takes_the_shortest_tail() {
    // a.*?b on "a__b__b" stops at the first b.
    let e = Expr::concat(vec![
        Expr::literal("a"),
        Expr::star(Expr::AnyCharNotNl, true),
        Expr::literal("b"),
    ]);
    assert_eq!(span(&e, "a__b__b"), Some((0, 4)));
}

#[test]
fn begin_text_anchor() {
    let e = Expr::concat(vec![Expr::BeginText, Expr::literal("foo")]);
    assert_eq!(span(&e, "xfoo"), None);
    assert_eq!(span(&e, "foo"), Some((0, 3)));
    assert_eq!(span(&e, "foofoo"), Some((0, 3)));
}

#[test]
fn end_text_anchor() {
    let e = Expr::concat(vec![Expr::literal("foo"), Expr::EndText]);
    assert_eq!(span(&e, "foox"), None);
    assert_eq!(span(&e, "xfoo"), Some((1, 4)));
}

#[test]
fn line_anchors() {
    let e = Expr::concat(vec![Expr::BeginLine, Expr::literal("b"), Expr::EndLine]);
    assert_eq!(span(&e, "a\nb\nc"), Some((2, 3)));
    assert_eq!(span(&e, "ab\n"), None);
}

#[test]
fn word_boundaries() {
    let e = Expr::concat(vec![
        Expr::WordBoundary,
        Expr::literal("cat"),
        Expr::WordBoundary,
    ]);
    assert_eq!(span(&e, "scatter"), None);
    assert_eq!(span(&e, "a cat."), Some((2, 5)));
    assert_eq!(span(&e, "cat"), Some((0, 3)));

    let e = Expr::concat(vec![Expr::NotWordBoundary, Expr::literal("at")]);
    assert_eq!(span(&e, "at bat"), Some((4, 6)));
}

#[test]
fn captures_report_group_spans() {
    // (a)(b) on "ab" -> [0,2, 0,1, 1,2].
    let e = Expr::concat(vec![
        Expr::capture(1, Expr::literal("a")),
        Expr::capture(2, Expr::literal("b")),
    ]);
    assert_eq!(
        caps(&e, "ab").unwrap(),
        vec![Some(0), Some(2), Some(0), Some(1), Some(1), Some(2)],
    );
}

#[test]
fn unused_groups_stay_unset() {
    // (a)|(b) on "b": group 1 did not participate.
    let e = Expr::alternate(vec![
        Expr::capture(1, Expr::literal("a")),
        Expr::capture(2, Expr::literal("b")),
    ]);
    assert_eq!(
        caps(&e, "b").unwrap(),
        vec![Some(0), Some(1), None, None, Some(0), Some(1)],
    );
}

#[test]
fn capture_inside_repetition_keeps_last_iteration() {
    // (a|b)* on "ab": group 1 holds the final iteration.
    let e = Expr::star(
        Expr::capture(1, Expr::alternate(vec![Expr::literal("a"), Expr::literal("b")])),
        false,
    );
    assert_eq!(
        caps(&e, "ab").unwrap(),
        vec![Some(0), Some(2), Some(1), Some(2)],
    );
}

#[test]
fn empty_regex_matches_empty_input() {
    let e = Expr::star(Expr::literal("a"), false);
    assert_eq!(span(&e, ""), Some((0, 0)));
    assert_eq!(span(&e, "baa"), Some((0, 0)));
    assert_eq!(span(&e, "aab"), Some((0, 2)));
}

#[test]
fn anchored_start_mode() {
    let p = prog(&Expr::literal("foo"));
    assert!(is_match(&p, &CharInput::new("foobar"), 0, Anchor::AnchorStart));
    assert!(!is_match(&p, &CharInput::new("xfoo"), 0, Anchor::AnchorStart));
}

#[test]
fn anchored_both_mode() {
    let p = prog(&Expr::literal("foo"));
    assert!(is_match(&p, &CharInput::new("foo"), 0, Anchor::AnchorBoth));
    assert!(!is_match(&p, &CharInput::new("foobar"), 0, Anchor::AnchorBoth));
    assert!(!is_match(&p, &CharInput::new("xfoo"), 0, Anchor::AnchorBoth));
}

#[test]
fn case_insensitive_ascii_literal() {
    let e = Expr::Literal { runes: "kite".chars().map(|c| c as i32).collect(), fold_case: true };
    assert_eq!(span(&e, "KITE"), Some((0, 4)));
    assert_eq!(span(&e, "KiTe"), Some((0, 4)));
    assert_eq!(span(&e, "kilt"), None);
}

#[test]
fn char_class_ranges() {
    let e = Expr::plus(Expr::class(&[('0', '9'), ('a', 'f')]), false);
    assert_eq!(span(&e, "xx1a9fzz"), Some((2, 6)));
    assert_eq!(span(&e, "ghij"), None);
}

#[test]
fn multibyte_runes_advance_by_width() {
    let e = Expr::concat(vec![Expr::literal("中"), Expr::AnyChar, Expr::literal("b")]);
    assert_eq!(span(&e, "a中éb"), Some((1, 7)));

    // Positions are byte offsets, so captures land on rune boundaries.
    let e = Expr::capture(1, Expr::literal("é"));
    assert_eq!(caps(&e, "né").unwrap(), vec![Some(1), Some(3), Some(1), Some(3)]);
}

#[test]
fn alternation_of_many_literals() {
    let e = Expr::alternate(vec![
        Expr::literal("mercury"),
        Expr::literal("venus"),
        Expr::literal("earth"),
        Expr::literal("mars"),
    ]);
    assert_eq!(span(&e, "say hello to mars"), Some((13, 17)));
    assert_eq!(span(&e, "say hello to pluto"), None);
}

#[test]
fn prefix_fast_path_skips_ahead() {
    // A long haystack where the literal prefix occurs late.
    let e = Expr::concat(vec![Expr::literal("needle"), Expr::class(&[('0', '9')])]);
    let mut text = "hay".repeat(1000);
    text.push_str("needle7");
    assert_eq!(span(&e, &text), Some((3000, 3007)));
}

#[test]
fn nested_empty_repetitions_terminate() {
    // (?:(?:)*)* must not hang or blow the queues.
    let e = Expr::star(Expr::star(Expr::EmptyMatch, false), false);
    assert_eq!(span(&e, "anything"), Some((0, 0)));

    // (a*)* on plain a's.
    let e = Expr::star(Expr::star(Expr::literal("a"), false), false);
    assert_eq!(span(&e, "aaaa"), Some((0, 4)));
}

#[test]
fn pathological_input_stays_linear() {
    // a?^n a^n against a^n: catastrophic for backtrackers, boring here.
    let n = 30;
    let mut subs = Vec::new();
    for _ in 0..n {
        subs.push(Expr::quest(Expr::literal("a"), false));
    }
    for _ in 0..n {
        subs.push(Expr::literal("a"));
    }
    let e = Expr::concat(subs);
    let text = "a".repeat(n);
    assert_eq!(span(&e, &text), Some((0, n)));
}

#[test]
fn no_match_expression_never_matches() {
    let e = Expr::NoMatch;
    assert_eq!(span(&e, ""), None);
    assert_eq!(span(&e, "anything"), None);
    // Alternating with NoMatch is the other branch.
    let e = Expr::alternate(vec![Expr::NoMatch, Expr::literal("x")]);
    assert_eq!(span(&e, "axe"), Some((1, 2)));
}

#[test]
fn later_start_positions() {
    let p = prog(&Expr::literal("aa"));
    let caps = find(&p, &CharInput::new("aaaa"), 1, Anchor::Unanchored).unwrap();
    assert_eq!((caps[0], caps[1]), (Some(1), Some(3)));
}

#[test]
fn quest_is_optional() {
    let e = Expr::concat(vec![
        Expr::literal("colo"),
        Expr::quest(Expr::literal("u"), false),
        Expr::literal("r"),
    ]);
    assert_eq!(span(&e, "color"), Some((0, 5)));
    assert_eq!(span(&e, "colour"), Some((0, 6)));
}

#[test]
fn plus_requires_one() {
    let e = Expr::plus(Expr::literal("ab"), false);
    assert_eq!(span(&e, "abab"), Some((0, 4)));
    assert_eq!(span(&e, "a"), None);
}

#[test]
fn longest_mode_ignores_alternative_order() {
    // In longest mode (ab|a) and (a|ab) agree.
    for subs in [
        vec![Expr::literal("ab"), Expr::literal("a")],
        vec![Expr::literal("a"), Expr::literal("ab")],
    ] {
        let p = prog_longest(&Expr::alternate(subs));
        let caps = find(&p, &CharInput::new("ab"), 0, Anchor::Unanchored).unwrap();
        assert_eq!((caps[0], caps[1]), (Some(0), Some(2)));
    }
}
