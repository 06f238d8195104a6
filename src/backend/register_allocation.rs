//! A demand driven register allocator. Values get a register the moment they
//! are defined or read; when none is free, a victim chosen round robin is
//! spilled into the frame and reloaded when it is next needed. A value gives
//! its register back once its last use has been emitted.
//!
//! `Alloc` results never live in registers, their addresses are recomputed
//! from the frame wherever they are used.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    backend::{
        MIN_REGISTERS,
        assemblers::x86_64::{Address, Assembler, X86FullRegister},
        frame::Frame,
    },
    middle::lir,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(X86FullRegister),
    /// Offset of the spill slot below `rbp`
    Spilled(u64),
}

#[derive(Debug)]
pub struct RegisterAllocator {
    pool: Vec<X86FullRegister>,
    occupants: BTreeMap<X86FullRegister, lir::ValueId>,
    locations: HashMap<lir::ValueId, Location>,
    remaining_uses: HashMap<lir::ValueId, usize>,
    /// Registers the instruction being emitted reads or writes
    pinned: Vec<X86FullRegister>,
    spill_index: usize,
}

impl RegisterAllocator {
    /// `limit` caps the pool, which never shrinks below [`MIN_REGISTERS`]
    pub fn new(function: &lir::FunctionDefinition, limit: Option<usize>) -> Self {
        let size = limit
            .unwrap_or(X86FullRegister::ALLOCATABLE.len())
            .clamp(MIN_REGISTERS, X86FullRegister::ALLOCATABLE.len());

        let mut remaining_uses = HashMap::new();
        for block in function.blocks.iter() {
            for value in &block.instructions {
                for operand in function.values[*value].operands() {
                    *remaining_uses.entry(operand).or_insert(0) += 1;
                }
            }
        }

        Self {
            pool: X86FullRegister::ALLOCATABLE[..size].to_vec(),
            occupants: BTreeMap::new(),
            locations: HashMap::new(),
            remaining_uses,
            pinned: Vec::new(),
            spill_index: 0,
        }
    }

    pub fn uses(&self, value: lir::ValueId) -> usize {
        self.remaining_uses.get(&value).copied().unwrap_or(0)
    }

    pub fn location(&self, value: lir::ValueId) -> Option<Location> {
        self.locations.get(&value).copied()
    }

    /// Gives `value` a register of its own and pins it
    pub fn define(
        &mut self,
        value: lir::ValueId,
        assembler: &mut Assembler,
        frame: &mut Frame,
    ) -> X86FullRegister {
        debug_assert!(!self.locations.contains_key(&value), "{value:?} defined twice");

        let register = self.acquire(assembler, frame);
        self.occupy(register, value);
        register
    }

    /// Makes sure `value` is held in a register, reloading it if it was
    /// spilled, and pins that register
    #[track_caller]
    pub fn fetch(
        &mut self,
        value: lir::ValueId,
        assembler: &mut Assembler,
        frame: &mut Frame,
    ) -> X86FullRegister {
        match self.locations.get(&value).copied() {
            Some(Location::Register(register)) => {
                self.pinned.push(register);
                register
            }
            Some(Location::Spilled(offset)) => {
                let register = self.acquire(assembler, frame);
                assembler.emit(format!("mov {register}, {}", Address::Frame(offset)));
                frame.release_spill_slot(offset);
                self.occupy(register, value);
                register
            }
            None => panic!("{value:?} is used before it is defined"),
        }
    }

    /// Releases the pins of the instruction that was just emitted
    pub fn unpin_all(&mut self) {
        self.pinned.clear();
    }

    /// Records one use of `value`, freeing its storage after the last one
    pub fn consume(&mut self, value: lir::ValueId, frame: &mut Frame) {
        let Some(uses) = self.remaining_uses.get_mut(&value) else {
            return;
        };
        *uses = uses.saturating_sub(1);
        if *uses > 0 {
            return;
        }

        match self.locations.remove(&value) {
            Some(Location::Register(register)) => {
                self.occupants.remove(&register);
            }
            Some(Location::Spilled(offset)) => frame.release_spill_slot(offset),
            None => {}
        }
    }

    /// Registers holding values that are still needed once `instruction`
    /// has consumed its operands, ie. the ones a call must preserve
    pub fn live_across(&self, instruction: &lir::Instruction) -> Vec<X86FullRegister> {
        let operands = instruction.operands();

        self.occupants
            .iter()
            .filter(|(_, value)| {
                let used_here = operands.iter().filter(|operand| *operand == *value).count();
                self.uses(**value) > used_here
            })
            .map(|(register, _)| *register)
            .collect()
    }

    /// Whether no value occupies a register or spill slot
    pub fn is_idle(&self) -> bool {
        self.locations.is_empty()
    }

    fn occupy(&mut self, register: X86FullRegister, value: lir::ValueId) {
        self.occupants.insert(register, value);
        self.locations.insert(value, Location::Register(register));
        self.pinned.push(register);
    }

    fn acquire(&mut self, assembler: &mut Assembler, frame: &mut Frame) -> X86FullRegister {
        let free = self
            .pool
            .iter()
            .find(|register| !self.occupants.contains_key(*register));

        match free {
            Some(register) => *register,
            None => self.spill(assembler, frame),
        }
    }

    fn spill(&mut self, assembler: &mut Assembler, frame: &mut Frame) -> X86FullRegister {
        let pool_size = self.pool.len();
        let victim = (0..pool_size)
            .map(|step| (self.spill_index + step) % pool_size)
            .find(|index| !self.pinned.contains(&self.pool[*index]));

        let Some(index) = victim else {
            panic!("every register is pinned by the current instruction");
        };
        self.spill_index = (index + 1) % pool_size;

        let register = self.pool[index];
        let Some(value) = self.occupants.remove(&register) else {
            unreachable!("spilling {register}, which is free");
        };

        let offset = frame.spill_slot();
        assembler.emit(format!("mov {}, {register}", Address::Frame(offset)));
        self.locations.insert(value, Location::Spilled(offset));
        debug!(?value, %register, offset, "spilled");

        register
    }
}
