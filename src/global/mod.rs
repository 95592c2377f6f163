pub mod error;
pub mod opcodes;
