//! Names and types are resolved here while the AST is lowered into LIR, one
//! routine at a time.

pub mod analysis;
pub mod layout;
pub mod lir;
pub mod symbol_table;
pub mod ty;
