use colored::Colorize;
use itertools::Itertools;

use crate::{index::Index, middle::lir};

impl core::fmt::Display for lir::Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for global in &self.globals {
            writeln!(
                f,
                "{} {} {}",
                "global".magenta(),
                global.symbol.blue(),
                format!("[{} x {}]", global.layout.size, global.layout.align).white()
            )?;
        }

        for (index, string) in self.strings.iter().enumerate() {
            writeln!(
                f,
                "{} {} {}",
                "string".magenta(),
                index.to_string().purple(),
                format!("{string:?}").green()
            )?;
        }

        if self.display_len > 0 {
            writeln!(f, "{} {}", "display".magenta(), self.display_len.to_string().purple())?;
        }

        for function in self.function_definitions.values() {
            writeln!(f)?;
            write!(f, "{function}")?;
        }

        Ok(())
    }
}

impl core::fmt::Display for lir::FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}{}",
            "fn".magenta(),
            self.symbol_name.blue(),
            "(".white(),
            self.parameters.iter().map(|p| p.to_string()).join(", "),
            ")".white()
        )?;

        if let Some(slot) = self.return_slot {
            write!(f, " {} {slot}", "->".white())?;
        }

        if !self.captures.is_empty() {
            write!(
                f,
                " {} [{}]",
                "captures".bright_green(),
                self.captures
                    .iter()
                    .map(|(slot, value)| format!("{}: {value}", slot.index()))
                    .join(", ")
            )?;
        }

        writeln!(f, "{}", " {".white())?;

        for (id, block) in self.blocks.enumerate() {
            writeln!(f, "{}", format!("{id}:").bright_red())?;

            for instruction in &block.instructions {
                write!(f, "    ")?;

                if self.values[*instruction].has_result() {
                    write!(f, "{instruction} {} ", "=".white())?;
                }

                writeln!(f, "{}", self.values[*instruction])?;
            }
        }

        writeln!(f, "{}", "}".white())
    }
}

impl core::fmt::Display for lir::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Instruction::Parameter { index } => {
                write!(f, "{} {}", "param".cyan(), index.to_string().purple())
            }
            lir::Instruction::Literal(immediate) => {
                write!(f, "{}", immediate.to_string().purple())
            }
            lir::Instruction::SymbolRef(symbol) => write!(f, "{} {symbol}", "symbol".cyan()),
            lir::Instruction::Alloc { size, align } => write!(
                f,
                "{} {}, {}",
                "alloc".cyan(),
                size.to_string().purple(),
                align.to_string().purple()
            ),
            lir::Instruction::Load { address, size } => write!(
                f,
                "{} {}, {address}",
                "load".cyan(),
                size.to_string().purple()
            ),
            lir::Instruction::Store {
                address,
                value,
                size,
            } => write!(
                f,
                "{} {} {address} {} {value}",
                "store".cyan(),
                size.to_string().purple(),
                "<-".white()
            ),
            lir::Instruction::Copy {
                destination,
                source,
                size,
            } => write!(
                f,
                "{} {} {destination} {} {source}",
                "copy".cyan(),
                size.to_string().purple(),
                "<-".white()
            ),
            lir::Instruction::Binary {
                operator,
                class,
                lhs,
                rhs,
            } => write!(
                f,
                "{}{} {lhs}, {rhs}",
                operator.to_string().white(),
                class_suffix(*class)
            ),
            lir::Instruction::Unary {
                operator,
                class,
                operand,
            } => write!(
                f,
                "{}{} {operand}",
                operator.to_string().cyan(),
                class_suffix(*class)
            ),
            lir::Instruction::Call {
                symbol, arguments, ..
            } => write!(
                f,
                "{} {}({})",
                "call".cyan(),
                symbol.blue(),
                arguments.iter().map(|a| a.to_string()).join(", ")
            ),
            lir::Instruction::ForeignCall {
                symbol, arguments, ..
            } => write!(
                f,
                "{} {}({})",
                "call_foreign".cyan(),
                symbol.blue(),
                arguments.iter().map(|a| a.to_string()).join(", ")
            ),
            lir::Instruction::Branch {
                condition,
                positive,
                negative,
            } => write!(
                f,
                "{} {condition} {} {}",
                "br".cyan(),
                positive.to_string().blue(),
                negative.to_string().blue()
            ),
            lir::Instruction::Jump { destination } => {
                write!(f, "{} {}", "jmp".cyan(), destination.to_string().blue())
            }
            lir::Instruction::Return { value: Some(value) } => {
                write!(f, "{} {value}", "ret".cyan())
            }
            lir::Instruction::Return { value: None } => write!(f, "{}", "ret".cyan()),
        }
    }
}

fn class_suffix(class: lir::NumberClass) -> &'static str {
    match class {
        lir::NumberClass::Integer => "",
        lir::NumberClass::Real => ".f",
    }
}

impl core::fmt::Display for lir::ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("%{}", self.index()).yellow())
    }
}

impl core::fmt::Display for lir::BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".block_{}", self.index())
    }
}

impl core::fmt::Display for lir::Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Immediate::Integer(value) => write!(f, "{value}"),
            lir::Immediate::Real(value) => write!(f, "{value:?}"),
        }
    }
}

impl core::fmt::Display for lir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Operand::Immediate(value) => write!(f, "{}", value.to_string().purple()),
            lir::Operand::Value(value) => write!(f, "{value}"),
        }
    }
}

impl core::fmt::Display for lir::Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Symbol::Global(name) => write!(f, "{}", name.blue()),
            lir::Symbol::String(index) => write!(f, "{}", format!("string_{index}").blue()),
            lir::Symbol::Display(slot) => {
                write!(f, "{}", format!("display[{}]", slot.index()).blue())
            }
        }
    }
}
