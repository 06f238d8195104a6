//! Stack frame of one routine. Every slot is addressed relative to `rbp` and
//! lives below it, so slots can be handed out while the body is still being
//! emitted and the final size is only needed for the prologue.

use hashbrown::HashMap;

use crate::{
    backend::assemblers::x86_64::Address,
    middle::{layout::align_to, lir},
};

#[derive(Debug, Default)]
pub struct Frame {
    size: u64,
    allocations: HashMap<lir::ValueId, u64>,
    free_spill_slots: Vec<u64>,
}

impl Frame {
    /// Assigns every `Alloc` of the function its fixed offset up front
    pub fn for_function(function: &lir::FunctionDefinition) -> Self {
        let mut frame = Self::default();
        for (value, size, align) in function.allocations() {
            let offset = frame.reserve(size, align);
            frame.allocations.insert(value, offset);
        }
        frame
    }

    /// Reserves `size` bytes and returns the offset below `rbp`
    pub fn reserve(&mut self, size: u64, align: u64) -> u64 {
        // a zero sized slot still needs an address distinct from `rbp`
        self.size = align_to(self.size + size.max(1), align.max(1));
        self.size
    }

    pub fn allocation(&self, value: lir::ValueId) -> Option<Address> {
        self.allocations.get(&value).map(|offset| Address::Frame(*offset))
    }

    pub fn spill_slot(&mut self) -> u64 {
        match self.free_spill_slots.pop() {
            Some(offset) => offset,
            None => self.reserve(8, 8),
        }
    }

    pub fn release_spill_slot(&mut self, offset: u64) {
        self.free_spill_slots.push(offset);
    }

    /// Size to subtract from `rsp`, keeping it 16 byte aligned
    pub fn size(&self) -> u64 {
        align_to(self.size, 16)
    }
}
