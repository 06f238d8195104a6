//! Argument rules of the `input` and `output` library routines. Each argument
//! becomes one call into the runtime, chosen by the argument's type.

use super::{AnalysisResult, Analyzer};
use crate::{
    error::SemanticErrorKind,
    frontend::ast,
    middle::{lir, symbol_table::Magic, ty::TypeKind},
};

pub const READ_INTEGER: &str = "__read_integer";
pub const READ_REAL: &str = "__read_real";
pub const READ_CHAR: &str = "__read_char";
pub const READ_LINE: &str = "__read_line";
pub const WRITE_INTEGER: &str = "__write_integer";
pub const WRITE_REAL: &str = "__write_real";
pub const WRITE_BOOLEAN: &str = "__write_boolean";
pub const WRITE_CHAR: &str = "__write_char";
pub const WRITE_STRING: &str = "__write_string";
pub const WRITE_NEWLINE: &str = "__write_newline";

impl Analyzer {
    pub(super) fn magic_call(
        &mut self,
        magic: Magic,
        arguments: &[ast::Expression],
        block: lir::BlockId,
    ) -> AnalysisResult<()> {
        for (position, argument) in arguments.iter().enumerate() {
            if magic.reads() {
                self.read_argument(magic, position, argument, block)?;
            } else {
                self.write_argument(magic, position, argument, block)?;
            }
        }

        let end_of_line = match magic {
            Magic::ReadLine => Some(READ_LINE),
            Magic::WriteLine => Some(WRITE_NEWLINE),
            Magic::Read | Magic::Write => None,
        };

        if let Some(symbol) = end_of_line {
            self.foreign_call(symbol, Vec::new(), false, block);
        }

        Ok(())
    }

    /// Reads a value from the runtime and stores it into the argument, which
    /// must therefore be a location
    fn read_argument(
        &mut self,
        magic: Magic,
        position: usize,
        argument: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<()> {
        if !argument.kind.is_lvalue() {
            return self.error(argument.span, SemanticErrorKind::NotAnLvalue);
        }

        let place = self.place(argument, block)?;
        let symbol = match self.symbols.types.kind(place.ty) {
            TypeKind::Integer => READ_INTEGER,
            TypeKind::Real => READ_REAL,
            TypeKind::Char => READ_CHAR,
            _ => {
                return self.error(
                    argument.span,
                    SemanticErrorKind::ArgTypeMismatch {
                        name: magic.to_string(),
                        position: position + 1,
                        expected: "integer, real or char".to_string(),
                        actual: self.type_name(place.ty),
                    },
                );
            }
        };

        let value = self.foreign_call(symbol, Vec::new(), true, block);
        let size = self.symbols.types.size(place.ty);
        self.emit(block, lir::Instruction::Store {
            address: place.address,
            value,
            size,
        });

        Ok(())
    }

    fn write_argument(
        &mut self,
        magic: Magic,
        position: usize,
        argument: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<()> {
        let value = self.rvalue(argument, block)?;
        let symbol = match self.symbols.types.kind(value.ty) {
            TypeKind::Integer => WRITE_INTEGER,
            TypeKind::Real => WRITE_REAL,
            TypeKind::Boolean => WRITE_BOOLEAN,
            TypeKind::Char => WRITE_CHAR,
            TypeKind::String => WRITE_STRING,
            _ => {
                return self.error(
                    argument.span,
                    SemanticErrorKind::ArgTypeMismatch {
                        name: magic.to_string(),
                        position: position + 1,
                        expected: "a scalar".to_string(),
                        actual: self.type_name(value.ty),
                    },
                );
            }
        };

        self.foreign_call(symbol, vec![value.value], false, block);
        Ok(())
    }

    fn foreign_call(
        &mut self,
        symbol: &'static str,
        arguments: Vec<lir::ValueId>,
        returns_value: bool,
        block: lir::BlockId,
    ) -> lir::ValueId {
        self.foreign_symbols.insert(symbol);
        self.emit(block, lir::Instruction::ForeignCall {
            symbol,
            arguments,
            returns_value,
        })
    }
}
