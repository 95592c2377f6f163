//! Non-local control flow: labelled loop control, markers crossing call
//! frames, tail calls, and return propagation.

mod common;
use common::{run_int, run_str};

#[test]
fn last_and_next_in_plain_loops() {
    assert_eq!(
        run_int("my $n = 0; while (1) { $n++; last if $n >= 3; } $n;"),
        3
    );
    assert_eq!(
        run_str(
            "my $s = ''; foreach my $i (1..5) { next if $i % 2 == 0; $s .= $i; } $s;"
        ),
        "135"
    );
}

#[test]
fn redo_reruns_the_body() {
    assert_eq!(
        run_int(
            "my $n = 0; my $tries = 0;\n\
             foreach my $i (1..2) {\n\
                 $tries++;\n\
                 if ($tries == 1) { redo; }\n\
                 $n = $i;\n\
             }\n\
             $tries;"
        ),
        3
    );
}

#[test]
fn labelled_last_skips_inner_loops() {
    let source = "my $s = '';\n\
         OUTER: foreach my $i (1..3) {\n\
             foreach my $j (1..3) {\n\
                 last OUTER if $j == 2 && $i == 2;\n\
                 $s .= \"$i$j,\";\n\
             }\n\
         }\n\
         $s;";
    assert_eq!(run_str(source), "11,12,13,21,");
}

#[test]
fn labelled_next_continues_the_outer_loop() {
    let source = "my $s = '';\n\
         OUTER: foreach my $i (1..3) {\n\
             foreach my $j (1..3) {\n\
                 next OUTER if $j == 2;\n\
                 $s .= \"$i$j,\";\n\
             }\n\
         }\n\
         $s;";
    assert_eq!(run_str(source), "11,21,31,");
}

#[test]
fn last_label_through_a_called_function() {
    // §8 scenario 7: the marker crosses the callee frame and unwinds the
    // labelled bare block in the caller
    let source = "$out = '';\n\
         sub f { last L; }\n\
         L: { $out .= 'A'; f(); $out .= 'B'; }\n\
         $out .= 'C';\n\
         $out;";
    assert_eq!(run_str(source), "AC");
}

#[test]
fn next_in_a_bare_block_exits_it() {
    assert_eq!(
        run_str("my $s = ''; { $s .= 'a'; next; $s .= 'b'; } $s .= 'c'; $s;"),
        "ac"
    );
}

#[test]
fn last_from_a_sub_inside_a_real_loop() {
    let source = "my $s = '';\n\
         sub stop { last LOOP; }\n\
         LOOP: foreach my $i (1..5) {\n\
             $s .= $i;\n\
             stop() if $i == 3;\n\
         }\n\
         $s;";
    assert_eq!(run_str(source), "123");
}

#[test]
fn return_exits_only_its_own_sub() {
    let source = "sub inner { return 'in'; }\n\
         sub outer { my $x = inner(); \"$x-out\"; }\n\
         outer();";
    assert_eq!(run_str(source), "in-out");
}

#[test]
fn return_from_inside_a_loop_in_a_sub() {
    let source = "sub find {\n\
             foreach my $i (1..10) {\n\
                 return $i if $i == 4;\n\
             }\n\
             -1;\n\
         }\n\
         find();";
    assert_eq!(run_int(source), 4);
}

#[test]
fn goto_sub_tail_calls_with_current_args() {
    let source = "sub target { my ($x) = @_; $x * 10; }\n\
         sub springboard { goto &target; }\n\
         springboard(7);";
    assert_eq!(run_int(source), 70);
}

#[test]
fn goto_sub_does_not_grow_the_stack() {
    // a bounce chain far deeper than the call-depth limit still completes
    let source = "my $n = 0;\n\
         sub bounce {\n\
             $n++;\n\
             return $n if $n >= 5000;\n\
             goto &bounce;\n\
         }\n\
         bounce();";
    assert_eq!(run_int(source), 5000);
}

#[test]
fn return_propagates_through_eval_block() {
    // return inside eval BLOCK leaves the eval, not the enclosing sub
    let source = "sub f {\n\
             my $r = eval { return 'from-eval'; };\n\
             \"got:$r\";\n\
         }\n\
         f();";
    assert_eq!(run_str(source), "got:from-eval");
}

#[test]
fn last_escapes_through_an_eval_frame() {
    let source = "my $s = '';\n\
         foreach my $i (1..5) {\n\
             $s .= $i;\n\
             eval { last if $i == 2; };\n\
         }\n\
         $s;";
    assert_eq!(run_str(source), "12");
}

#[test]
fn deep_recursion_is_reported_not_crashed() {
    let source = "sub down { my ($n) = @_; down($n + 1); }\n\
         my $r = eval { down(0); 'finished' };\n\
         defined($r) ? 'bad' : 'caught';";
    assert_eq!(run_str(source), "caught");
}
