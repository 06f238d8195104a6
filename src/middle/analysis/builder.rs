use hashbrown::HashMap;
use tracing::trace;

use crate::{
    index::IndexVec,
    middle::{
        lir,
        symbol_table::{DisplaySlot, FunctionId, VariableId},
    },
};

/// Accumulates the blocks and instructions of one routine while its body is
/// being analyzed
#[derive(Debug)]
pub(super) struct FunctionBuilder {
    pub id: FunctionId,
    pub symbol_name: String,
    pub is_function: bool,
    /// Frame slots of the routine's own variables
    pub slots: HashMap<VariableId, lir::ValueId>,
    pub parameters: Vec<lir::ValueId>,
    pub return_variable: Option<VariableId>,
    pub return_assigned: bool,

    values: IndexVec<lir::ValueId, lir::Instruction>,
    blocks: IndexVec<lir::BlockId, lir::Block>,
}

impl FunctionBuilder {
    pub fn new(id: FunctionId, symbol_name: String, is_function: bool) -> Self {
        let mut builder = Self {
            id,
            symbol_name,
            is_function,
            slots: HashMap::new(),
            parameters: Vec::new(),
            return_variable: None,
            return_assigned: false,
            values: IndexVec::new(),
            blocks: IndexVec::new(),
        };

        builder.create_block();
        builder
    }

    pub fn create_block(&mut self) -> lir::BlockId {
        self.blocks.push(lir::Block::default())
    }

    /// Appends an instruction to `block` and returns the id of its result.
    /// Branch targets learn about their new predecessor.
    pub fn push(&mut self, block: lir::BlockId, instruction: lir::Instruction) -> lir::ValueId {
        debug_assert!(
            !self.is_terminated(block),
            "appending to {block:?} which already ends in a branch"
        );

        for successor in instruction.successors() {
            self.blocks[successor].predecessors.insert(block);
        }

        let id = self.values.next_index();
        trace!(function = %self.symbol_name, ?block, ?id, ?instruction, "emit");

        self.values.push(instruction);
        self.blocks[block].instructions.push(id);
        id
    }

    pub fn jump(&mut self, from: lir::BlockId, destination: lir::BlockId) {
        self.push(from, lir::Instruction::Jump { destination });
    }

    pub fn is_terminated(&self, block: lir::BlockId) -> bool {
        self.blocks[block]
            .instructions
            .last()
            .is_some_and(|last| self.values[*last].is_terminator())
    }

    /// Reserves a frame slot in the entry block
    pub fn alloc(&mut self, size: u64, align: u64) -> lir::ValueId {
        self.push(lir::BlockId::ENTRY, lir::Instruction::Alloc { size, align })
    }

    pub fn finish(self, captures: Vec<(DisplaySlot, lir::ValueId)>) -> lir::FunctionDefinition {
        let return_slot = self
            .return_variable
            .and_then(|variable| self.slots.get(&variable).copied());

        lir::FunctionDefinition {
            id: self.id,
            symbol_name: self.symbol_name,
            parameters: self.parameters,
            return_slot,
            captures,
            values: self.values,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::Index, middle::lir::Instruction};

    #[test]
    fn jumps_record_predecessors() {
        let mut builder = FunctionBuilder::new(FunctionId::new(0), "f".to_string(), false);
        let next = builder.create_block();

        builder.jump(lir::BlockId::ENTRY, next);
        builder.push(next, Instruction::Return { value: None });

        let definition = builder.finish(vec![]);
        assert!(definition.blocks[next].predecessors.contains(&lir::BlockId::ENTRY));
        assert_eq!(definition.values.len(), 2);
    }
}
