//! The display is a static table with one 8 byte entry per captured local.
//! Each entry holds the address of the local in its most recent activation,
//! which is what a nested routine reads through [`lir::Symbol::Display`].
//!
//! A routine owning captured locals brackets its body: the prologue saves
//! the previous occupant of each of its entries in its own frame and installs
//! the address of its slot, the epilogue puts the saved occupant back.

use crate::{
    backend::{
        assemblers::x86_64::{Address, Assembler},
        frame::Frame,
    },
    index::Index,
    middle::{lir, symbol_table::DisplaySlot},
};

pub const LABEL: &str = "display";

#[derive(Debug, Clone, Copy)]
pub struct Display {
    len: usize,
}

impl Display {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    #[track_caller]
    pub fn entry(&self, slot: DisplaySlot) -> Address {
        assert!(slot.index() < self.len, "display slot {} out of range", slot.index());
        match slot.index() {
            0 => Address::Symbol(LABEL.to_string()),
            index => Address::Symbol(format!("{LABEL} + {}", 8 * index)),
        }
    }

    /// The `.bss` reservation of the table, if any routine captures
    pub fn declaration(&self) -> Option<String> {
        (self.len > 0).then(|| format!("{LABEL}: resq {}", self.len))
    }

    /// Reserves a save slot for every captured local of `function`
    pub fn bracket(&self, function: &lir::FunctionDefinition, frame: &mut Frame) -> Bracket {
        let entries = function
            .captures
            .iter()
            .map(|(slot, allocation)| {
                let local = match frame.allocation(*allocation) {
                    Some(Address::Frame(offset)) => offset,
                    _ => unreachable!("captured local {allocation:?} has no frame slot"),
                };

                BracketEntry {
                    entry: self.entry(*slot),
                    local,
                    save: frame.reserve(8, 8),
                }
            })
            .collect();

        Bracket { entries }
    }
}

#[derive(Debug)]
struct BracketEntry {
    entry: Address,
    local: u64,
    save: u64,
}

/// The display entries one activation replaces, together with where their
/// previous occupants are kept
#[derive(Debug)]
pub struct Bracket {
    entries: Vec<BracketEntry>,
}

impl Bracket {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn install(&self, assembler: &mut Assembler) {
        for BracketEntry { entry, local, save } in &self.entries {
            assembler.emit(format!("mov rax, {entry}"));
            assembler.emit(format!("mov {}, rax", Address::Frame(*save)));
            assembler.emit(format!("lea rax, {}", Address::Frame(*local)));
            assembler.emit(format!("mov {entry}, rax"));
        }
    }

    /// Uses `rcx` only, `rax` holds the result at this point
    pub fn restore(&self, assembler: &mut Assembler) {
        for BracketEntry { entry, save, .. } in self.entries.iter().rev() {
            assembler.emit(format!("mov rcx, {}", Address::Frame(*save)));
            assembler.emit(format!("mov {entry}, rcx"));
        }
    }
}
