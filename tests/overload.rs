//! Operator overloading: compound form probed first, base form fallback
//! with write-back, conversion operators.

mod common;
use common::{run_int, run_str};

#[test]
fn compound_overload_is_called_once() {
    // §8 scenario 9, first half: P defines `+=`, so `+` must not run
    let source = "package P;\n\
         use overload '+=' => sub { my ($self, $other) = @_; $P::compound++; $self; },\n\
                      '+' => sub { $P::base++; 0; };\n\
         package main;\n\
         my $inner = 'seed';\n\
         my $p = bless \\$inner, 'P';\n\
         $p += 1;\n\
         \"$P::compound-\" . (defined($P::base) ? $P::base : 0);";
    assert_eq!(run_str(source), "1-0");
}

#[test]
fn base_overload_falls_back_with_writeback() {
    // §8 scenario 9, second half: Q defines only `+`; the engine calls it
    // and assigns the result back to the l-value
    let source = "package Q;\n\
         use overload '+' => sub { $Q::base++; 42; };\n\
         package main;\n\
         my $inner = 'seed';\n\
         my $q = bless \\$inner, 'Q';\n\
         $q += 1;\n\
         \"$Q::base-$q\";";
    assert_eq!(run_str(source), "1-42");
}

#[test]
fn binary_overload_dispatches_on_blessed_operands() {
    let source = "package Vec1;\n\
         use overload '+' => sub { my ($a, $b) = @_; $$a + $$b; };\n\
         package main;\n\
         my ($x, $y) = (3, 4);\n\
         my $a = bless \\$x, 'Vec1';\n\
         my $b = bless \\$y, 'Vec1';\n\
         $a + $b;";
    assert_eq!(run_int(source), 7);
}

#[test]
fn stringify_overload() {
    let source = "package Tag;\n\
         use overload '\"\"' => sub { 'TAGGED'; };\n\
         package main;\n\
         my $x = 0;\n\
         my $t = bless \\$x, 'Tag';\n\
         \"<$t>\";";
    assert_eq!(run_str(source), "<TAGGED>");
}

#[test]
fn bool_overload_controls_truth() {
    let source = "package Falsy;\n\
         use overload 'bool' => sub { 0; };\n\
         package main;\n\
         my $x = 1;\n\
         my $f = bless \\$x, 'Falsy';\n\
         $f ? 'true' : 'false';";
    assert_eq!(run_str(source), "false");
}

#[test]
fn overload_is_inherited_through_isa() {
    let source = "package Base1;\n\
         use overload '+' => sub { 99; };\n\
         package Child1;\n\
         @Child1::ISA = ('Base1');\n\
         package main;\n\
         my $x = 0;\n\
         my $c = bless \\$x, 'Child1';\n\
         $c + 1;";
    assert_eq!(run_int(source), 99);
}

#[test]
fn unblessed_operands_use_builtin_semantics() {
    assert_eq!(run_int("my $x = 5; my $r = \\$x; my $n = $r + 0; $n != 0 ? 1 : 0;"), 1);
}
