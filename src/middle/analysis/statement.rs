use super::{AnalysisResult, Analyzer};
use crate::{
    error::{Diagnostic, SemanticErrorKind},
    frontend::{
        Span,
        ast::{self, BinaryOperatorKind, StatementKind},
    },
    middle::{lir, symbol_table::VariableId, ty::TypeId},
};

impl Analyzer {
    /// Analyzes and lowers a statement starting in `block`, returning the
    /// block in which control continues afterwards. Errors are reported and
    /// the statement is skipped.
    pub(super) fn statement(&mut self, statement: &ast::Statement, block: lir::BlockId) -> lir::BlockId {
        match self.try_statement(statement, block) {
            Ok(next) => next,
            Err(diagnostic) => {
                self.report(diagnostic);

                if self.builder().is_terminated(block) {
                    self.builder_mut().create_block()
                } else {
                    block
                }
            }
        }
    }

    fn try_statement(
        &mut self,
        statement: &ast::Statement,
        block: lir::BlockId,
    ) -> AnalysisResult<lir::BlockId> {
        match &statement.kind {
            StatementKind::Block(statements) => Ok(statements
                .iter()
                .fold(block, |block, statement| self.statement(statement, block))),
            StatementKind::Assign { lhs, rhs } => {
                self.assignment(statement.span, lhs, rhs, block)?;
                Ok(block)
            }
            StatementKind::ProcedureCall { target, arguments } => {
                self.call(target, arguments, statement.span, block)?;
                Ok(block)
            }
            StatementKind::If {
                condition,
                positive,
                negative,
            } => self.if_statement(condition, positive, negative.as_deref(), block),
            StatementKind::While { condition, body } => self.while_statement(condition, body, block),
            StatementKind::For {
                variable,
                start,
                end,
                body,
            } => self.for_statement(variable, start, end, body, block),
        }
    }

    fn assignment(
        &mut self,
        span: Span,
        lhs: &ast::Expression,
        rhs: &ast::Expression,
        block: lir::BlockId,
    ) -> AnalysisResult<()> {
        if !lhs.kind.is_lvalue() {
            return self.error(lhs.span, SemanticErrorKind::NotAnLvalue);
        }

        let place = self.place(lhs, block)?;
        if let Some(root) = place.root {
            self.check_local_write(root, lhs.span)?;
        }

        let value = self.rvalue(rhs, block)?;
        if !self.symbols.types_equal(place.ty, value.ty) {
            return self.error(
                span,
                SemanticErrorKind::IncompatibleAssignment {
                    target: self.type_name(place.ty),
                    value: self.type_name(value.ty),
                },
            );
        }

        let size = self.symbols.types.size(place.ty);
        let instruction = if self.symbols.types.kind(place.ty).is_aggregate() {
            lir::Instruction::Copy {
                destination: place.address,
                source: value.value,
                size,
            }
        } else {
            lir::Instruction::Store {
                address: place.address,
                value: value.value,
                size,
            }
        };
        self.emit(block, instruction);

        if place.root.is_some() && place.root == self.builder().return_variable {
            self.builder_mut().return_assigned = true;
        }

        Ok(())
    }

    /// Functions may only write to their own variables
    fn check_local_write(&self, variable: VariableId, span: Span) -> AnalysisResult<()> {
        let builder = self.builder();
        if !builder.is_function || self.symbols.variables[variable].owner == Some(builder.id) {
            return Ok(());
        }

        self.error(
            span,
            SemanticErrorKind::AssignedToNonLocalInFunction {
                function: self.symbols.functions[builder.id].name.clone(),
                name: self.symbols.variables[variable].name.clone(),
            },
        )
    }

    fn condition(&mut self, condition: &ast::Expression, block: lir::BlockId) -> AnalysisResult<lir::ValueId> {
        let value = self.rvalue(condition, block)?;

        if value.ty != TypeId::BOOLEAN {
            return self.error(
                condition.span,
                SemanticErrorKind::NonBooleanCondition {
                    actual: self.type_name(value.ty),
                },
            );
        }

        Ok(value.value)
    }

    /// ```text
    /// block: br cond then else
    /// then:  ...; jmp join
    /// else:  ...; jmp join
    /// join:
    /// ```
    fn if_statement(
        &mut self,
        condition: &ast::Expression,
        positive: &ast::Statement,
        negative: Option<&ast::Statement>,
        block: lir::BlockId,
    ) -> AnalysisResult<lir::BlockId> {
        let condition = self.condition(condition, block)?;

        let positive_block = self.builder_mut().create_block();
        let negative_block = self.builder_mut().create_block();
        let join_block = self.builder_mut().create_block();

        self.emit(block, lir::Instruction::Branch {
            condition,
            positive: positive_block,
            negative: negative_block,
        });

        let positive_end = self.statement(positive, positive_block);
        self.builder_mut().jump(positive_end, join_block);

        let negative_end = match negative {
            Some(negative) => self.statement(negative, negative_block),
            None => negative_block,
        };
        self.builder_mut().jump(negative_end, join_block);

        Ok(join_block)
    }

    /// ```text
    /// block:  jmp header
    /// header: br cond body exit
    /// body:   ...; jmp header
    /// exit:
    /// ```
    fn while_statement(
        &mut self,
        condition: &ast::Expression,
        body: &ast::Statement,
        block: lir::BlockId,
    ) -> AnalysisResult<lir::BlockId> {
        let header = self.builder_mut().create_block();
        self.builder_mut().jump(block, header);

        let condition = self.condition(condition, header)?;

        let body_block = self.builder_mut().create_block();
        let exit = self.builder_mut().create_block();
        self.emit(header, lir::Instruction::Branch {
            condition,
            positive: body_block,
            negative: exit,
        });

        let body_end = self.statement(body, body_block);
        self.builder_mut().jump(body_end, header);

        Ok(exit)
    }

    /// The counter lives in a slot of its own so that the loop variable can
    /// be read (and captured) like any other variable inside the body.
    ///
    /// ```text
    /// block:  counter = start; limit = end; jmp header
    /// header: br counter <= limit, body, exit
    /// body:   i = counter; ...; counter = counter + 1; jmp header
    /// exit:
    /// ```
    fn for_statement(
        &mut self,
        variable: &ast::Identifier,
        start: &ast::Expression,
        end: &ast::Expression,
        body: &ast::Statement,
        block: lir::BlockId,
    ) -> AnalysisResult<lir::BlockId> {
        let loop_variable = self
            .symbols
            .resolve_variable(&variable.name)
            .map_err(|kind| Diagnostic::new(variable.span, kind))?;

        self.require_integer(self.symbols.variables[loop_variable].ty, variable.span)?;
        self.check_local_write(loop_variable, variable.span)?;

        let start_value = self.rvalue(start, block)?;
        self.require_integer(start_value.ty, start.span)?;
        let end_value = self.rvalue(end, block)?;
        self.require_integer(end_value.ty, end.span)?;

        let counter = self.emit(block, lir::Instruction::Alloc { size: 8, align: 8 });
        let limit = self.emit(block, lir::Instruction::Alloc { size: 8, align: 8 });
        self.store_integer(block, counter, start_value.value);
        self.store_integer(block, limit, end_value.value);

        let header = self.builder_mut().create_block();
        let body_block = self.builder_mut().create_block();
        let exit = self.builder_mut().create_block();
        self.builder_mut().jump(block, header);

        let current = self.load_integer(header, counter);
        let last = self.load_integer(header, limit);
        let in_range = self.emit(header, lir::Instruction::Binary {
            operator: BinaryOperatorKind::LessThanOrEqualTo,
            class: lir::NumberClass::Integer,
            lhs: current,
            rhs: lir::Operand::Value(last),
        });
        self.emit(header, lir::Instruction::Branch {
            condition: in_range,
            positive: body_block,
            negative: exit,
        });

        let current = self.load_integer(body_block, counter);
        let address = self.variable_address(loop_variable, body_block);
        self.store_integer(body_block, address, current);

        let body_end = self.statement(body, body_block);

        let current = self.load_integer(body_end, counter);
        let next = self.emit(body_end, lir::Instruction::Binary {
            operator: BinaryOperatorKind::Add,
            class: lir::NumberClass::Integer,
            lhs: current,
            rhs: lir::Operand::Immediate(1),
        });
        self.store_integer(body_end, counter, next);
        self.builder_mut().jump(body_end, header);

        Ok(exit)
    }

    fn require_integer(&self, ty: TypeId, span: Span) -> AnalysisResult<()> {
        if ty == TypeId::INTEGER {
            return Ok(());
        }

        self.error(
            span,
            SemanticErrorKind::NonIntegerLoopBound {
                actual: self.type_name(ty),
            },
        )
    }

    fn load_integer(&mut self, block: lir::BlockId, address: lir::ValueId) -> lir::ValueId {
        self.emit(block, lir::Instruction::Load { address, size: 8 })
    }

    fn store_integer(&mut self, block: lir::BlockId, address: lir::ValueId, value: lir::ValueId) {
        self.emit(block, lir::Instruction::Store {
            address,
            value,
            size: 8,
        });
    }
}
