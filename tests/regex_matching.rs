//! Regex semantics through the full engine: preprocessing, host
//! execution, capture materialisation, state save/restore.

mod common;
use common::{run_err, run_int, run_list, run_str};

#[test]
fn nonparticipating_capture_in_list_context() {
    // subject "", pattern (a)?: one group, undef — not (1), not empty
    let result = run_list(r#""" =~ /(a)?/;"#);
    assert_eq!(result, vec![None]);
}

#[test]
fn zero_capture_pattern_returns_one() {
    let result = run_list(r#""abc" =~ /abc/;"#);
    assert_eq!(result, vec![Some("1".to_string())]);
}

#[test]
fn empty_match_capture_is_empty_string_not_undef() {
    let result = run_list(r#""" =~ /(a*)/;"#);
    assert_eq!(result, vec![Some(String::new())]);
}

#[test]
fn branch_reset_matches_and_captures() {
    // Phase-1: flattened alternation; the capture is observable in one of
    // the reported groups, exact Perl numbering is not required
    let result = run_list(r#""a" =~ /(?|(a)|(b))/;"#);
    assert!(
        result.iter().any(|g| g.as_deref() == Some("a")),
        "expected some group to hold 'a', got {result:?}"
    );
}

#[test]
fn simple_conditional_both_branches() {
    let with_group = run_list(r#""ab" =~ /^(a)?(?(1)b|c)$/;"#);
    assert_eq!(with_group, vec![Some("a".to_string())]);

    let without_group = run_list(r#""c" =~ /^(a)?(?(1)b|c)$/;"#);
    assert_eq!(without_group, vec![None]);
}

#[test]
fn regex_state_restores_across_eval() {
    // §8 scenario 5: the outer $1 survives a match inside eval
    let source = r#"
        "ABC" =~ /(.)/;
        eval { "XYZ" =~ /(.)/; };
        $1;
    "#;
    assert_eq!(run_str(source), "A");
}

#[test]
fn regex_state_restores_across_dying_eval() {
    let source = r#"
        "ABC" =~ /(.)/;
        eval { "XYZ" =~ /(.)/; die "boom"; };
        $1;
    "#;
    assert_eq!(run_str(source), "A");
}

#[test]
fn match_variables() {
    assert_eq!(
        run_str(r#""hello world" =~ /(w\w+)/; $1;"#),
        "world"
    );
    assert_eq!(run_str(r#""hello world" =~ /o w/; $&;"#), "o w");
    assert_eq!(run_str(r#""hello world" =~ /world/; $`;"#), "hello ");
    assert_eq!(run_str(r#""hello world" =~ /hello/; $';"#), " world");
}

#[test]
fn capture_variables_are_read_only() {
    let source = r#"
        "x" =~ /(x)/;
        eval { $1 .= "y"; };
        $@;
    "#;
    let message = run_str(source);
    assert!(
        message.contains("Modification of a read-only value attempted"),
        "got: {message}"
    );
}

#[test]
fn global_match_advances_pos() {
    let source = r#"
        my $s = "aaa";
        $s =~ /a/g;
        my $p1 = pos($s);
        $s =~ /a/g;
        my $p2 = pos($s);
        "$p1,$p2";
    "#;
    assert_eq!(run_str(source), "1,2");
}

#[test]
fn global_match_in_list_context_collects_all() {
    let result = run_list(r#""a1b2c3" =~ /(\d)/g;"#);
    assert_eq!(
        result,
        vec![
            Some("1".to_string()),
            Some("2".to_string()),
            Some("3".to_string())
        ]
    );
}

#[test]
fn negated_bind() {
    assert_eq!(run_int(r#""abc" !~ /z/;"#), 1);
    assert_eq!(run_int(r#"my $ok = ("abc" !~ /a/) ? 1 : 0; $ok;"#), 0);
}

#[test]
fn case_insensitive_and_multiline_flags() {
    assert_eq!(run_int(r#""ABC" =~ /abc/i;"#), 1);
    assert_eq!(run_int(r#""a\nb" =~ /^b$/m;"#), 1);
    assert_eq!(run_int(r#""a\nb" =~ /a.b/s;"#), 1);
    assert_eq!(run_int(r#""a b" =~ /a   b/x ? 0 : 1;"#), 1);
}

#[test]
fn substitution() {
    assert_eq!(
        run_str("my $s = 'hello world'; $s =~ s/world/perl/; $s;"),
        "hello perl"
    );
    assert_eq!(
        run_int("my $s = 'aaa'; my $n = ($s =~ s/a/b/g); $n;"),
        3
    );
    assert_eq!(
        run_str("my $s = 'ab'; $s =~ s/(a)/[$1]/; $s;"),
        "[a]b"
    );
    assert_eq!(
        run_str("my $s = 'keep'; my $r = ($s =~ s/zzz/x/) ? 'did' : 'not'; \"$r:$s\";"),
        "not:keep"
    );
}

#[test]
fn unimplemented_features_are_catchable() {
    let message = run_err(r#""abc" =~ /a(?{ code })b/;"#);
    assert!(message.contains("Unimplemented"), "got: {message}");

    let caught = run_str(
        r#"
        my $r = eval { "abc" =~ /(?R)/; 1 };
        defined($r) ? 'ran' : 'caught';
    "#,
    );
    assert_eq!(caught, "caught");
}

#[test]
fn nonexistent_group_is_its_own_error() {
    let message = run_err(r#""abc" =~ /(a)\5/;"#);
    assert!(
        message.contains("Reference to nonexistent group"),
        "got: {message}"
    );
}

#[test]
fn split_with_limit_and_awk_default() {
    assert_eq!(
        run_str("join('|', split(/,/, 'a,b,c', 2));"),
        "a|b,c"
    );
    assert_eq!(
        run_str("join('|', split(' ', '  x  y z'));"),
        "x|y|z"
    );
}

#[test]
fn pattern_cache_serves_repeat_matches() {
    // same pattern text, many uses; also exercises zero-width /g stepping
    assert_eq!(
        run_int("my $n = 0; foreach my $w ('aa', 'ab', 'ba') { $n++ if $w =~ /a/; } $n;"),
        3
    );
}
