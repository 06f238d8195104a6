//! Middle and back end of a compiler for a small Pascal-like language. A
//! parsed [`frontend::ast::Program`] is analyzed and lowered into LIR, which
//! is then translated to x86-64 NASM assembly.

pub mod backend;
pub mod driver;
pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;

pub use driver::{CompileError, CompileOptions, CompileOutput, Phase, compile};
