#![allow(dead_code)]

use perl_core::values::scalar::Sv;
use perl_core::{run_source, run_source_list, RuntimeConfig, RuntimeContext};

/// Runs a program and returns its scalar-context result.
pub fn run(source: &str) -> Sv {
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    match run_source(&mut ctx, source, "t.pl") {
        Ok(value) => value,
        Err(err) => panic!("program failed: {}", err.to_message()),
    }
}

pub fn run_str(source: &str) -> String {
    run(source).get_str().to_text().into_owned()
}

pub fn run_int(source: &str) -> i64 {
    run(source).get_int()
}

/// Runs a program whose last expression is evaluated in list context;
/// undef entries come back as `None`.
pub fn run_list(source: &str) -> Vec<Option<String>> {
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    let result = match run_source_list(&mut ctx, source, "t.pl") {
        Ok(value) => value,
        Err(err) => panic!("program failed: {}", err.to_message()),
    };
    let array = perl_core::runtime::ops::list_of(&result).expect("list result");
    let cells = array.borrow().cells().to_vec();
    cells
        .iter()
        .map(|cell| {
            if cell.is_defined() {
                Some(cell.get_str().to_text().into_owned())
            } else {
                None
            }
        })
        .collect()
}

/// Runs a program expected to die; returns the `to_message` text.
pub fn run_err(source: &str) -> String {
    let mut ctx = RuntimeContext::new(RuntimeConfig::default());
    match run_source(&mut ctx, source, "t.pl") {
        Ok(value) => panic!(
            "program unexpectedly succeeded with {}",
            value.get_str()
        ),
        Err(err) => err.to_message(),
    }
}
