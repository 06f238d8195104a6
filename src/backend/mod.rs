//! Code generation. Each LIR routine is translated on its own: a demand
//! register allocator hands out registers while the instructions are
//! emitted, and the display bracket around the body keeps nested routines
//! pointed at the active frame of every captured local.

pub mod assemblers;
pub mod display;
pub mod frame;
pub mod register_allocation;
pub mod targets;

/// A binary operation pins both operands and its result
pub const MIN_REGISTERS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Precede every instruction's assembly with its LIR text
    pub emit_debug_info: bool,
    /// Caps the number of allocatable registers
    pub register_limit: Option<usize>,
}
