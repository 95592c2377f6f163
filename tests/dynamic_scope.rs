//! `local` save/restore across every exit path, and eval/error plumbing.

mod common;
use common::{run_int, run_str};

#[test]
fn local_restores_on_normal_exit() {
    let source = "$g = 1;\n\
         sub show { $g; }\n\
         sub test { local $g = 2; show(); }\n\
         my $inside = test();\n\
         \"$inside-$g\";";
    assert_eq!(run_str(source), "2-1");
}

#[test]
fn local_restores_on_die() {
    let source = "$g = 1;\n\
         eval { local $g = 2; die \"boom\\n\"; };\n\
         $g;";
    assert_eq!(run_int(source), 1);
}

#[test]
fn local_restores_on_last() {
    let source = "$g = 'outer';\n\
         foreach my $i (1..3) {\n\
             local $g = \"inner$i\";\n\
             last if $i == 2;\n\
         }\n\
         $g;";
    assert_eq!(run_str(source), "outer");
}

#[test]
fn nested_locals_unwind_in_lifo_order() {
    let source = "$g = 'a';\n\
         my $seen = '';\n\
         sub peek { $seen .= $g; }\n\
         sub inner { local $g = 'c'; peek(); }\n\
         sub outer { local $g = 'b'; peek(); inner(); peek(); }\n\
         outer();\n\
         $seen . '|' . $g;";
    assert_eq!(run_str(source), "bcb|a");
}

#[test]
fn local_array_and_hash_slots() {
    let source = "@list = (1, 2);\n\
         sub count { scalar(@list); }\n\
         sub test { local @list = (1, 2, 3, 4); count(); }\n\
         my $inside = test();\n\
         \"$inside-\" . scalar(@list);";
    assert_eq!(run_str(source), "4-2");
}

#[test]
fn local_hash_element() {
    let source = "%h = (k => 'old');\n\
         sub show { $h{k}; }\n\
         sub test { local $h{k} = 'new'; show(); }\n\
         my $inside = test();\n\
         \"$inside-$h{k}\";";
    assert_eq!(run_str(source), "new-old");
}

#[test]
fn eval_sets_and_clears_the_error_variable() {
    assert_eq!(
        run_str("eval { die \"oops\\n\"; }; $@;"),
        "oops\n"
    );
    assert_eq!(
        run_str("eval { die \"oops\\n\"; }; eval { 1; }; $@ eq '' ? 'clear' : 'set';"),
        "clear"
    );
}

#[test]
fn die_with_reference_propagates_intact() {
    let source = "eval { die { code => 42 }; };\n\
         ref($@) . ':' . $@->{code};";
    assert_eq!(run_str(source), "HASH:42");
}

#[test]
fn die_with_blessed_reference_keeps_the_class() {
    let source = "eval { die bless({}, 'My::Error'); };\n\
         ref($@);";
    assert_eq!(run_str(source), "My::Error");
}

#[test]
fn nested_eval_inner_failure_is_invisible_outside() {
    let source = "my $r = eval {\n\
             eval { die \"inner\\n\"; };\n\
             'survived';\n\
         };\n\
         \"$r:\" . ($@ eq '' ? 'clean' : 'dirty');";
    assert_eq!(run_str(source), "survived:clean");
}

#[test]
fn eval_string_sees_lexicals() {
    assert_eq!(run_int("my $x = 40; my $r = eval '$x + 2'; $r;"), 42);
}

#[test]
fn eval_string_compile_error_lands_in_errsv() {
    let source = "my $r = eval '((';\n\
         (defined($r) ? 'defined' : 'undef') . '-' . ($@ ne '' ? 'set' : 'unset');";
    assert_eq!(run_str(source), "undef-set");
}

#[test]
fn eval_string_writes_through_captured_lexicals() {
    assert_eq!(run_int("my $x = 1; eval '$x = 9'; $x;"), 9);
}
