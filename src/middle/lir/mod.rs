//! LIR (Low-level Intermediate Representation). Structured statements are
//! reduced to basic blocks ending in branches and jumps, and expression trees
//! are flattened into three-address instructions whose results are referred
//! to by [`ValueId`].
//!
//! Every instruction result is only used in the block that defines it, with
//! the exception of [`Instruction::Alloc`], whose frame address is valid
//! everywhere in its function.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    frontend::ast::BinaryOperatorKind,
    index::{IndexVec, simple_index},
    middle::{
        symbol_table::{DisplaySlot, FunctionId},
        ty::Layout,
    },
};

pub mod pretty_print;

#[derive(Debug)]
pub struct Module {
    /// Every routine in the order it was finished, nested routines before
    /// the routines enclosing them
    pub function_definitions: BTreeMap<FunctionId, FunctionDefinition>,
    /// The routine holding the program's main body
    pub entry: FunctionId,
    pub globals: Vec<Global>,
    /// String literals, referenced by index through [`Symbol::String`]
    pub strings: Vec<String>,
    pub display_len: usize,
    pub foreign_symbols: BTreeSet<&'static str>,
}

impl Module {
    pub fn entry_function(&self) -> &FunctionDefinition {
        &self.function_definitions[&self.entry]
    }
}

/// A program level variable, placed in static storage
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub symbol: String,
    pub layout: Layout,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub id: FunctionId,
    pub symbol_name: String,
    /// Frame slots the incoming arguments are stored into, in declaration order
    pub parameters: Vec<ValueId>,
    /// Frame slot holding the result of a function
    pub return_slot: Option<ValueId>,
    /// Locals of this routine which nested routines reach through the
    /// display, with the frame slot backing each one
    pub captures: Vec<(DisplaySlot, ValueId)>,
    pub values: IndexVec<ValueId, Instruction>,
    pub blocks: IndexVec<BlockId, Block>,
}

impl FunctionDefinition {
    pub fn instructions(&self, block: BlockId) -> impl Iterator<Item = (ValueId, &Instruction)> {
        self.blocks[block]
            .instructions
            .iter()
            .map(|id| (*id, &self.values[*id]))
    }

    /// All `Alloc` sites of the function in program order
    pub fn allocations(&self) -> impl Iterator<Item = (ValueId, u64, u64)> + '_ {
        self.blocks.iter().flat_map(|block| {
            block.instructions.iter().filter_map(|id| match self.values[*id] {
                Instruction::Alloc { size, align } => Some((*id, size, align)),
                _ => None,
            })
        })
    }
}

#[derive(Debug, Default)]
pub struct Block {
    pub instructions: Vec<ValueId>,
    pub predecessors: BTreeSet<BlockId>,
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

simple_index! {
    /// The result of an LIR instruction
    pub struct ValueId;
}

/// Whether arithmetic happens on general purpose or floating point values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberClass {
    Integer,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOperator {
    #[strum(serialize = "neg")]
    Negate,
    #[strum(serialize = "not")]
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Global(String),
    String(usize),
    Display(DisplaySlot),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    Integer(i64),
    Real(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Immediate(i64),
    Value(ValueId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// The incoming argument at `index`, a scalar or the address of an
    /// aggregate
    Parameter {
        index: usize,
    },
    Literal(Immediate),
    /// The address of a static object
    SymbolRef(Symbol),
    /// Reserves a slot in the stack frame and yields its address
    Alloc {
        size: u64,
        align: u64,
    },
    /// Reads `size` bytes (1 or 8), zero extending
    Load {
        address: ValueId,
        size: u64,
    },
    Store {
        address: ValueId,
        value: ValueId,
        size: u64,
    },
    /// Copies `size` bytes of memory between two addresses
    Copy {
        destination: ValueId,
        source: ValueId,
        size: u64,
    },
    Binary {
        operator: BinaryOperatorKind,
        class: NumberClass,
        lhs: ValueId,
        rhs: Operand,
    },
    Unary {
        operator: UnaryOperator,
        class: NumberClass,
        operand: ValueId,
    },
    Call {
        function: FunctionId,
        symbol: String,
        arguments: Vec<ValueId>,
        returns_value: bool,
    },
    /// A call into the runtime library. Arguments and results are passed in
    /// general purpose registers.
    ForeignCall {
        symbol: &'static str,
        arguments: Vec<ValueId>,
        returns_value: bool,
    },
    Branch {
        condition: ValueId,
        positive: BlockId,
        negative: BlockId,
    },
    Jump {
        destination: BlockId,
    },
    Return {
        value: Option<ValueId>,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. } | Instruction::Jump { .. } | Instruction::Return { .. }
        )
    }

    /// Whether the instruction produces a value which can be used as an
    /// operand
    pub fn has_result(&self) -> bool {
        match self {
            Instruction::Parameter { .. }
            | Instruction::Literal(_)
            | Instruction::SymbolRef(_)
            | Instruction::Alloc { .. }
            | Instruction::Load { .. }
            | Instruction::Binary { .. }
            | Instruction::Unary { .. } => true,
            Instruction::Call { returns_value, .. }
            | Instruction::ForeignCall { returns_value, .. } => *returns_value,
            Instruction::Store { .. }
            | Instruction::Copy { .. }
            | Instruction::Branch { .. }
            | Instruction::Jump { .. }
            | Instruction::Return { .. } => false,
        }
    }

    /// Values read by the instruction, in evaluation order
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instruction::Parameter { .. }
            | Instruction::Literal(_)
            | Instruction::SymbolRef(_)
            | Instruction::Alloc { .. }
            | Instruction::Jump { .. } => vec![],
            Instruction::Load { address, .. } => vec![*address],
            Instruction::Store { address, value, .. } => vec![*address, *value],
            Instruction::Copy {
                destination,
                source,
                ..
            } => vec![*destination, *source],
            Instruction::Binary { lhs, rhs, .. } => match rhs {
                Operand::Value(rhs) => vec![*lhs, *rhs],
                Operand::Immediate(_) => vec![*lhs],
            },
            Instruction::Unary { operand, .. } => vec![*operand],
            Instruction::Call { arguments, .. } | Instruction::ForeignCall { arguments, .. } => {
                arguments.clone()
            }
            Instruction::Branch { condition, .. } => vec![*condition],
            Instruction::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Blocks control may continue in after this instruction
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],
            Instruction::Jump { destination } => vec![*destination],
            _ => vec![],
        }
    }
}
