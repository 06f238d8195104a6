use itertools::Itertools;

use super::{AnalysisResult, Analyzer, global_symbol};
use crate::{
    error::{Diagnostic, SemanticErrorKind},
    frontend::{
        Span,
        ast::{self, BinaryOperatorKind, ExpressionKind, UnaryOperatorKind},
    },
    middle::{
        lir,
        symbol_table::{Binding, VariableId, VariableKind},
        ty::{TypeId, TypeKind},
    },
};

/// A typed value. Values of aggregate types are represented by their address.
#[derive(Debug, Clone, Copy)]
pub(super) struct Value {
    pub ty: TypeId,
    pub value: lir::ValueId,
}

/// A typed memory location
#[derive(Debug, Clone, Copy)]
pub(super) struct Place {
    pub ty: TypeId,
    pub address: lir::ValueId,
    /// The variable the location was reached from, if any
    pub root: Option<VariableId>,
}

impl Analyzer {
    pub(super) fn rvalue(
        &mut self,
        expression: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<Value> {
        match &expression.kind {
            ExpressionKind::Literal(literal) => Ok(self.literal(literal, block)),
            ExpressionKind::Binary { lhs, operator, rhs } => {
                self.binary(expression.span, lhs, *operator, rhs, block)
            }
            ExpressionKind::Unary { operator, operand } => {
                self.unary(expression.span, *operator, operand, block)
            }
            ExpressionKind::Call { target, arguments } => {
                let value = self.call(target, arguments, expression.span, block)?;
                Ok(value.unwrap_or_else(|| self.void_value(block)))
            }
            // A bare function name is a call without arguments
            ExpressionKind::Path(path)
                if path.segments.len() == 1
                    && matches!(
                        self.symbols.lookup(&path.segments[0].name),
                        Some(Binding::Function(_))
                    ) =>
            {
                let value = self.call(path, &[], expression.span, block)?;
                Ok(value.unwrap_or_else(|| self.void_value(block)))
            }
            ExpressionKind::AddressOf(operand) => {
                if !operand.kind.is_lvalue() {
                    return self.error(operand.span, SemanticErrorKind::NotAnLvalue);
                }

                let place = self.place(operand, block)?;
                let ty = self.symbols.types.intern_pointer(place.ty);
                Ok(Value {
                    ty,
                    value: place.address,
                })
            }
            ExpressionKind::Path(_) | ExpressionKind::Index { .. } | ExpressionKind::Deref(_) => {
                let place = self.place(expression, block)?;
                Ok(self.load(place, block))
            }
        }
    }

    /// Computes the address of an lvalue expression
    pub(super) fn place(
        &mut self,
        expression: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<Place> {
        match &expression.kind {
            ExpressionKind::Path(path) => self.path_place(path, block),
            ExpressionKind::Index { target, index } => self.index_place(target, index, block),
            ExpressionKind::Deref(pointer) => {
                let pointer = self.rvalue(pointer, block)?;
                match *self.symbols.types.kind(pointer.ty) {
                    // `^void` points at nothing that could be read or written
                    TypeKind::Pointer(pointee) if pointee != TypeId::VOID => Ok(Place {
                        ty: pointee,
                        address: pointer.value,
                        root: None,
                    }),
                    _ => self.error(
                        expression.span,
                        SemanticErrorKind::NotAPointer {
                            actual: self.type_name(pointer.ty),
                        },
                    ),
                }
            }
            _ => self.error(expression.span, SemanticErrorKind::NotAnLvalue),
        }
    }

    /// Reads the value stored at a place
    pub(super) fn load(&mut self, place: Place, block: lir::BlockId) -> Value {
        if self.symbols.types.kind(place.ty).is_aggregate() {
            return Value {
                ty: place.ty,
                value: place.address,
            };
        }

        let size = self.symbols.types.size(place.ty);
        let value = self.emit(block, lir::Instruction::Load {
            address: place.address,
            size,
        });

        Value {
            ty: place.ty,
            value,
        }
    }

    /// Resolves `a.b.c`: a variable followed by record field accesses.
    /// Pointers to records met along the way are dereferenced.
    fn path_place(&mut self, path: &ast::Path, block: lir::BlockId) -> AnalysisResult<Place> {
        let Some((first, fields)) = path.segments.split_first() else {
            unreachable!("the parser never produces empty paths")
        };

        match self.symbols.lookup(&first.name) {
            Some(Binding::Variable(_)) => {}
            Some(_) => return self.error(first.span, SemanticErrorKind::NotAnLvalue),
            None => {
                return self.error(
                    first.span,
                    SemanticErrorKind::UnboundName {
                        name: first.name.clone(),
                    },
                );
            }
        }

        let variable = self
            .symbols
            .resolve_variable(&first.name)
            .map_err(|kind| Diagnostic::new(first.span, kind))?;

        let mut ty = self.symbols.variables[variable].ty;
        let mut address = self.variable_address(variable, block);
        let mut base = first;

        for field in fields {
            if let TypeKind::Pointer(pointee) = *self.symbols.types.kind(ty)
                && matches!(self.symbols.types.kind(pointee), TypeKind::Record(_))
            {
                address = self.emit(block, lir::Instruction::Load { address, size: 8 });
                ty = pointee;
            }

            let TypeKind::Record(record_fields) = self.symbols.types.kind(ty) else {
                return self.error(
                    field.span,
                    SemanticErrorKind::NotARecord {
                        base: base.name.clone(),
                        field: field.name.clone(),
                        ty: self.type_name(ty),
                    },
                );
            };

            let Some(found) = record_fields.iter().find(|f| f.name == field.name).cloned() else {
                return self.error(
                    field.span,
                    SemanticErrorKind::UnknownField {
                        field: field.name.clone(),
                        ty: self.type_name(ty),
                    },
                );
            };

            if found.offset != 0 {
                address = self.emit(block, lir::Instruction::Binary {
                    operator: BinaryOperatorKind::Add,
                    class: lir::NumberClass::Integer,
                    lhs: address,
                    rhs: lir::Operand::Immediate(found.offset as i64),
                });
            }

            ty = found.ty;
            base = field;
        }

        Ok(Place {
            ty,
            address,
            root: Some(variable),
        })
    }

    /// `a[i]` lowers to `a + (i - lower) * size_of(element)`
    fn index_place(
        &mut self,
        target: &ast::Path,
        index: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<Place> {
        let mut array = self.path_place(target, block)?;

        if let TypeKind::Pointer(pointee) = *self.symbols.types.kind(array.ty)
            && matches!(self.symbols.types.kind(pointee), TypeKind::Array { .. })
        {
            array.address = self.emit(block, lir::Instruction::Load {
                address: array.address,
                size: 8,
            });
            array.ty = pointee;
        }

        let TypeKind::Array { lower, element, .. } = *self.symbols.types.kind(array.ty) else {
            return self.error(
                target.span,
                SemanticErrorKind::NotAnArray {
                    name: target.segments.iter().map(|s| &s.name).join("."),
                    ty: self.type_name(array.ty),
                },
            );
        };

        let index_value = self.rvalue(index, block)?;
        if index_value.ty != TypeId::INTEGER {
            return self.error(
                index.span,
                SemanticErrorKind::NonIntegerIndex {
                    actual: self.type_name(index_value.ty),
                },
            );
        }

        let mut offset = index_value.value;
        if lower != 0 {
            offset = self.emit(block, lir::Instruction::Binary {
                operator: BinaryOperatorKind::Subtract,
                class: lir::NumberClass::Integer,
                lhs: offset,
                rhs: lir::Operand::Immediate(lower),
            });
        }

        let element_size = self.symbols.types.size(element);
        if element_size != 1 {
            offset = self.emit(block, lir::Instruction::Binary {
                operator: BinaryOperatorKind::Multiply,
                class: lir::NumberClass::Integer,
                lhs: offset,
                rhs: lir::Operand::Immediate(element_size as i64),
            });
        }

        let address = self.emit(block, lir::Instruction::Binary {
            operator: BinaryOperatorKind::Add,
            class: lir::NumberClass::Integer,
            lhs: array.address,
            rhs: lir::Operand::Value(offset),
        });

        Ok(Place {
            ty: element,
            address,
            root: array.root,
        })
    }

    /// Materializes the address of a variable in `block`. Variables of the
    /// routine being built live in its frame, globals in static storage, and
    /// variables of enclosing routines are reached through the display.
    pub(super) fn variable_address(
        &mut self,
        variable: VariableId,
        block: lir::BlockId,
    ) -> lir::ValueId {
        let entry = &self.symbols.variables[variable];

        if entry.kind == VariableKind::Global {
            let symbol = lir::Symbol::Global(global_symbol(variable, &entry.name));
            return self.emit(block, lir::Instruction::SymbolRef(symbol));
        }

        if let Some(slot) = self.builder().slots.get(&variable) {
            return *slot;
        }

        let Some(display_slot) = entry.display_slot else {
            unreachable!(
                "`{}` belongs to an enclosing routine but was never captured",
                entry.name
            );
        };

        let entry = self.emit(block, lir::Instruction::SymbolRef(lir::Symbol::Display(display_slot)));
        self.emit(block, lir::Instruction::Load {
            address: entry,
            size: 8,
        })
    }

    fn literal(&mut self, literal: &ast::Literal, block: lir::BlockId) -> Value {
        let (ty, instruction) = match literal {
            ast::Literal::Integer(value) => (
                TypeId::INTEGER,
                lir::Instruction::Literal(lir::Immediate::Integer(*value)),
            ),
            ast::Literal::Real(value) => (
                TypeId::REAL,
                lir::Instruction::Literal(lir::Immediate::Real(*value)),
            ),
            ast::Literal::Boolean(value) => (
                TypeId::BOOLEAN,
                lir::Instruction::Literal(lir::Immediate::Integer(*value as i64)),
            ),
            // Chars are single bytes
            ast::Literal::Char(value) => (
                TypeId::CHAR,
                lir::Instruction::Literal(lir::Immediate::Integer((*value as u32 & 0xff) as i64)),
            ),
            ast::Literal::String(value) => {
                let index = match self.strings.iter().position(|s| s == value) {
                    Some(index) => index,
                    None => {
                        self.strings.push(value.clone());
                        self.strings.len() - 1
                    }
                };

                (
                    TypeId::STRING,
                    lir::Instruction::SymbolRef(lir::Symbol::String(index)),
                )
            }
        };

        Value {
            ty,
            value: self.emit(block, instruction),
        }
    }

    fn binary(
        &mut self,
        span: Span,
        lhs: &ast::Expression,
        operator: BinaryOperatorKind,
        rhs: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<Value> {
        let lhs = self.rvalue(lhs, block)?;
        let rhs = self.rvalue(rhs, block)?;

        if !self.symbols.types_equal(lhs.ty, rhs.ty) {
            return self.error(
                span,
                SemanticErrorKind::TypeMismatch {
                    operator: operator.to_string(),
                    lhs: self.type_name(lhs.ty),
                    rhs: self.type_name(rhs.ty),
                },
            );
        }

        let kind = self.symbols.types.kind(lhs.ty);
        let valid = match operator {
            BinaryOperatorKind::Add
            | BinaryOperatorKind::Subtract
            | BinaryOperatorKind::Multiply
            | BinaryOperatorKind::Divide => kind.is_numeric(),
            BinaryOperatorKind::IntegerDivide | BinaryOperatorKind::Modulus => {
                *kind == TypeKind::Integer
            }
            BinaryOperatorKind::And | BinaryOperatorKind::Or => *kind == TypeKind::Boolean,
            BinaryOperatorKind::Equals | BinaryOperatorKind::NotEquals => matches!(
                kind,
                TypeKind::Integer
                    | TypeKind::Real
                    | TypeKind::Boolean
                    | TypeKind::Char
                    | TypeKind::Pointer(_)
            ),
            BinaryOperatorKind::LessThan
            | BinaryOperatorKind::LessThanOrEqualTo
            | BinaryOperatorKind::GreaterThan
            | BinaryOperatorKind::GreaterThanOrEqualTo => matches!(
                kind,
                TypeKind::Integer | TypeKind::Real | TypeKind::Boolean | TypeKind::Char
            ),
        };

        if !valid {
            return self.error(
                span,
                SemanticErrorKind::BadBinaryOperand {
                    operator: operator.to_string(),
                    operand: self.type_name(lhs.ty),
                },
            );
        }

        let class = number_class(kind);
        let value = self.emit(block, lir::Instruction::Binary {
            operator,
            class,
            lhs: lhs.value,
            rhs: lir::Operand::Value(rhs.value),
        });

        let ty = if operator.is_relational() {
            TypeId::BOOLEAN
        } else {
            lhs.ty
        };

        Ok(Value { ty, value })
    }

    fn unary(
        &mut self,
        span: Span,
        operator: UnaryOperatorKind,
        operand: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<Value> {
        let operand = self.rvalue(operand, block)?;
        let kind = self.symbols.types.kind(operand.ty);

        let lowered = match operator {
            UnaryOperatorKind::Plus if kind.is_numeric() => return Ok(operand),
            UnaryOperatorKind::Negate if kind.is_numeric() => lir::UnaryOperator::Negate,
            UnaryOperatorKind::Not if *kind == TypeKind::Boolean => lir::UnaryOperator::Not,
            _ => {
                return self.error(
                    span,
                    SemanticErrorKind::BadUnaryOperand {
                        operator: operator.to_string(),
                        operand: self.type_name(operand.ty),
                    },
                );
            }
        };

        let class = number_class(kind);
        let value = self.emit(block, lir::Instruction::Unary {
            operator: lowered,
            class,
            operand: operand.value,
        });

        Ok(Value {
            ty: operand.ty,
            value,
        })
    }

    /// Analyzes a call of a declared routine or a library routine. Library
    /// routines produce no value.
    pub(super) fn call(
        &mut self,
        target: &ast::Path,
        arguments: &[ast::Expression],
        span: Span,
        block: lir::BlockId,
    ) -> AnalysisResult<Option<Value>> {
        let name = target.segments.iter().map(|s| &s.name).join(".");

        let [_] = target.segments.as_slice() else {
            return self.error(target.span, SemanticErrorKind::NotCallable { name });
        };

        let function = match self.symbols.lookup(&name) {
            Some(Binding::Function(_)) => self
                .symbols
                .resolve_function(&name)
                .map_err(|kind| Diagnostic::new(target.span, kind))?,
            // Inside a function (or anything nested in it) its name is the
            // result slot, but calling the name still calls the function
            Some(Binding::Variable(variable))
                if self.symbols.variables[variable].kind == VariableKind::ReturnSlot =>
            {
                match self.symbols.variables[variable].owner {
                    Some(owner) => owner,
                    None => unreachable!("result slots live in their function's frame"),
                }
            }
            Some(Binding::Variable(_) | Binding::Type(_)) => {
                return self.error(target.span, SemanticErrorKind::NotCallable { name });
            }
            None => return self.error(target.span, SemanticErrorKind::UnboundName { name }),
        };

        if let Some(magic) = self.symbols.functions[function].magic {
            self.magic_call(magic, arguments, block)?;
            return Ok(None);
        }

        let Some(signature) = self
            .symbols
            .types
            .signature(self.symbols.functions[function].ty)
            .cloned()
        else {
            return self.error(target.span, SemanticErrorKind::NotCallable { name });
        };

        if arguments.len() != signature.parameters.len() {
            return self.error(
                span,
                SemanticErrorKind::ArityMismatch {
                    name,
                    expected: signature.parameters.len(),
                    actual: arguments.len(),
                },
            );
        }

        let mut values = Vec::with_capacity(arguments.len());
        for (position, (argument, parameter)) in
            arguments.iter().zip(&signature.parameters).enumerate()
        {
            let value = self.rvalue(argument, block)?;

            if !self.symbols.types_equal(value.ty, *parameter) {
                return self.error(
                    argument.span,
                    SemanticErrorKind::ArgTypeMismatch {
                        name,
                        position: position + 1,
                        expected: self.type_name(*parameter),
                        actual: self.type_name(value.ty),
                    },
                );
            }

            values.push(value.value);
        }

        let symbol = self.symbols.functions[function].symbol_name(function);
        let value = self.emit(block, lir::Instruction::Call {
            function,
            symbol,
            arguments: values,
            returns_value: signature.return_type != TypeId::VOID,
        });

        Ok(Some(Value {
            ty: signature.return_type,
            value,
        }))
    }

    /// Stands in for the missing result of a library routine used as an
    /// expression. Its type is void, so any use of it is rejected.
    fn void_value(&mut self, block: lir::BlockId) -> Value {
        let value = self.emit(block, lir::Instruction::Literal(lir::Immediate::Integer(0)));
        Value {
            ty: TypeId::VOID,
            value,
        }
    }
}

fn number_class(kind: &TypeKind) -> lir::NumberClass {
    match kind {
        TypeKind::Real => lir::NumberClass::Real,
        _ => lir::NumberClass::Integer,
    }
}
