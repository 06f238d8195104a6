//! Semantic analysis fused with LIR construction. The syntax tree is walked
//! once, depth first; every expression is given a type and lowered into the
//! block under construction in the same visit.
//!
//! Errors are collected rather than aborting the walk: a failing statement
//! or declaration is reported and skipped, and analysis continues with the
//! next one.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use tracing::debug;

use crate::{
    error::{Diagnostic, Diagnostics, SemanticErrorKind},
    frontend::{
        Span,
        ast::{self, SubprogramKind},
    },
    index::Index,
    middle::{
        lir,
        symbol_table::{FunctionId, SymbolTable, VariableId, VariableKind},
        ty::{Layout, Signature, TypeId, TypeKind},
    },
};

use self::builder::FunctionBuilder;

mod builder;
mod builtins;
mod expression;
mod statement;

type AnalysisResult<T> = Result<T, Diagnostic>;

/// The result of analyzing a well formed program
#[derive(Debug)]
pub struct Analysis {
    pub module: lir::Module,
    pub symbols: SymbolTable,
}

/// Analyzes a program with the default record layout
pub fn analyze(program: &ast::Program) -> Result<Analysis, Diagnostics> {
    analyze_with(program, SymbolTable::new())
}

/// Analyzes a program against a prepared (empty) symbol table, eg. one with a
/// custom record layout
pub fn analyze_with(program: &ast::Program, symbols: SymbolTable) -> Result<Analysis, Diagnostics> {
    let mut analyzer = Analyzer {
        symbols,
        diagnostics: Diagnostics::default(),
        builders: Vec::new(),
        function_definitions: BTreeMap::new(),
        globals: Vec::new(),
        strings: Vec::new(),
        foreign_symbols: BTreeSet::new(),
    };

    let entry = analyzer.program(program);

    if !analyzer.diagnostics.is_empty() {
        return Err(analyzer.diagnostics);
    }

    Ok(Analysis {
        module: lir::Module {
            function_definitions: analyzer.function_definitions,
            entry,
            globals: analyzer.globals,
            strings: analyzer.strings,
            display_len: analyzer.symbols.display_len(),
            foreign_symbols: analyzer.foreign_symbols,
        },
        symbols: analyzer.symbols,
    })
}

struct Analyzer {
    symbols: SymbolTable,
    diagnostics: Diagnostics,
    /// Routines under construction, the innermost last
    builders: Vec<FunctionBuilder>,
    function_definitions: BTreeMap<FunctionId, lir::FunctionDefinition>,
    globals: Vec<lir::Global>,
    strings: Vec<String>,
    foreign_symbols: BTreeSet<&'static str>,
}

impl Analyzer {
    fn program(&mut self, program: &ast::Program) -> FunctionId {
        self.symbols.enter(None);

        for import in &program.imports {
            if let Err(kind) = self.symbols.register_library(&import.name) {
                self.report(Diagnostic::new(import.span, kind));
            }
        }

        self.type_declarations(&program.type_declarations);

        for declaration in &program.declarations {
            self.variable_declaration(declaration, VariableKind::Global);
        }

        for subprogram in &program.subprograms {
            self.subprogram(subprogram);
        }

        let signature = self.symbols.types.insert(TypeKind::Function(Signature {
            kind: SubprogramKind::Procedure,
            parameters: Vec::new(),
            return_type: TypeId::VOID,
        }));
        let id = self
            .symbols
            .add_function(&program.name.name, signature, None);

        debug!(program = %program.name.name, "lowering program body");
        self.builders.push(FunctionBuilder::new(
            id,
            format!("program_{}", program.name.name),
            false,
        ));

        let end = self.statement(&program.body, lir::BlockId::ENTRY);
        self.emit(end, lir::Instruction::Return { value: None });

        let builder = self.pop_builder();
        self.function_definitions.insert(id, builder.finish(Vec::new()));
        self.symbols.leave();

        id
    }

    fn subprogram(&mut self, subprogram: &ast::Subprogram) {
        let name = &subprogram.name.name;
        let is_function = subprogram.kind == SubprogramKind::Function;

        // The signature belongs to the enclosing scope
        let (parameters, signature) = match self.signature(subprogram) {
            Ok(signature) => signature,
            Err(diagnostic) => {
                self.report(diagnostic);
                return;
            }
        };
        let return_type = signature.return_type;
        let ty = self.symbols.types.insert(TypeKind::Function(signature));

        let id = match self.symbols.declare_function(name, ty, None) {
            Ok(id) => id,
            Err(kind) => {
                self.report(Diagnostic::new(subprogram.name.span, kind));
                // Keep analyzing the body so its own errors are found too
                self.symbols.add_function(name, ty, None)
            }
        };

        let symbol_name = self.symbols.functions[id].symbol_name(id);
        debug!(function = %symbol_name, "lowering subprogram");

        self.builders
            .push(FunctionBuilder::new(id, symbol_name, is_function));
        self.symbols.enter(Some(id));

        self.type_declarations(&subprogram.type_declarations);

        for (index, (identifier, ty)) in parameters.iter().enumerate() {
            self.parameter(index, identifier, *ty);
        }

        if is_function {
            match self
                .symbols
                .declare_variable(name, return_type, VariableKind::ReturnSlot)
            {
                Ok(variable) => {
                    self.allocate_local(variable);
                    self.builder_mut().return_variable = Some(variable);
                }
                Err(kind) => self.report(Diagnostic::new(subprogram.name.span, kind)),
            }
        }

        for declaration in &subprogram.declarations {
            self.variable_declaration(declaration, VariableKind::Local);
        }

        for nested in &subprogram.subprograms {
            self.subprogram(nested);
        }

        let end = self.statement(&subprogram.body, lir::BlockId::ENTRY);

        let return_value = self.builder().return_variable.map(|variable| {
            let slot = self.builder().slots[&variable];
            let size = self.symbols.types.size(return_type);
            self.emit(end, lir::Instruction::Load {
                address: slot,
                size,
            })
        });
        self.emit(end, lir::Instruction::Return {
            value: return_value,
        });

        if is_function && !self.builder().return_assigned {
            self.report(Diagnostic::new(
                subprogram.span,
                SemanticErrorKind::ReturnNotAssigned {
                    function: name.clone(),
                },
            ));
        }

        let captures = self
            .symbols
            .captured_locals(id)
            .filter_map(|(variable, slot)| {
                self.builder()
                    .slots
                    .get(&variable)
                    .map(|value| (slot, *value))
            })
            .collect::<Vec<_>>();

        self.symbols.leave();
        let builder = self.pop_builder();
        debug!(
            function = %builder.symbol_name,
            captures = captures.len(),
            "finished subprogram"
        );
        self.function_definitions.insert(id, builder.finish(captures));
    }

    /// Resolves parameter and result types, flattening `a, b: integer` into
    /// one parameter per name
    fn signature(
        &mut self,
        subprogram: &ast::Subprogram,
    ) -> AnalysisResult<(Vec<(ast::Identifier, TypeId)>, Signature)> {
        let mut parameters = Vec::new();
        for declaration in &subprogram.parameters {
            let ty = self.resolve_type(&declaration.ty)?;
            for name in &declaration.names {
                self.check_sized(name, ty)?;
                parameters.push((name.clone(), ty));
            }
        }

        let return_type = match (subprogram.kind, &subprogram.return_type) {
            (SubprogramKind::Procedure, _) => TypeId::VOID,
            (SubprogramKind::Function, None) => {
                return Err(Diagnostic::new(
                    subprogram.name.span,
                    SemanticErrorKind::InvalidReturnType {
                        function: subprogram.name.name.clone(),
                        ty: self.type_name(TypeId::VOID),
                    },
                ));
            }
            (SubprogramKind::Function, Some(ty)) => {
                let resolved = self.resolve_type(ty)?;
                let valid = match self.symbols.types.kind(resolved) {
                    TypeKind::Pointer(_) => true,
                    kind => kind.is_scalar(),
                };

                if !valid {
                    return Err(Diagnostic::new(
                        ty.span,
                        SemanticErrorKind::InvalidReturnType {
                            function: subprogram.name.name.clone(),
                            ty: self.type_name(resolved),
                        },
                    ));
                }

                resolved
            }
        };

        let signature = Signature {
            kind: subprogram.kind,
            parameters: parameters.iter().map(|(_, ty)| *ty).collect(),
            return_type,
        };

        Ok((parameters, signature))
    }

    /// Declares a formal parameter and copies the incoming argument into a
    /// frame slot of its own
    fn parameter(&mut self, index: usize, identifier: &ast::Identifier, ty: TypeId) {
        let variable =
            match self
                .symbols
                .declare_variable(&identifier.name, ty, VariableKind::Parameter { index })
            {
                Ok(variable) => variable,
                Err(kind) => {
                    self.report(Diagnostic::new(identifier.span, kind));
                    return;
                }
            };

        let slot = self.allocate_local(variable);
        let argument = self.emit(lir::BlockId::ENTRY, lir::Instruction::Parameter { index });
        let size = self.symbols.types.size(ty);

        // Aggregates arrive by address and are copied so the callee owns them
        let instruction = if self.symbols.types.kind(ty).is_aggregate() {
            lir::Instruction::Copy {
                destination: slot,
                source: argument,
                size,
            }
        } else {
            lir::Instruction::Store {
                address: slot,
                value: argument,
                size,
            }
        };
        self.emit(lir::BlockId::ENTRY, instruction);
        self.builder_mut().parameters.push(slot);
    }

    fn variable_declaration(&mut self, declaration: &ast::Declaration, kind: VariableKind) {
        let ty = match self.resolve_type(&declaration.ty) {
            Ok(ty) => ty,
            Err(diagnostic) => {
                self.report(diagnostic);
                return;
            }
        };

        for name in &declaration.names {
            if let Err(diagnostic) = self.check_sized(name, ty) {
                self.report(diagnostic);
                continue;
            }

            let variable = match self.symbols.declare_variable(&name.name, ty, kind) {
                Ok(variable) => variable,
                Err(kind) => {
                    self.report(Diagnostic::new(name.span, kind));
                    continue;
                }
            };

            if kind == VariableKind::Global {
                self.globals.push(lir::Global {
                    symbol: global_symbol(variable, &name.name),
                    layout: self.symbols.types.layout(ty),
                });
            } else {
                self.allocate_local(variable);
            }
        }
    }

    fn allocate_local(&mut self, variable: VariableId) -> lir::ValueId {
        let layout = self.symbols.types.layout(self.symbols.variables[variable].ty);
        let builder = self.builder_mut();
        let slot = builder.alloc(layout.size, layout.align);
        builder.slots.insert(variable, slot);
        slot
    }

    fn type_declarations(&mut self, declarations: &[ast::TypeDeclaration]) {
        for declaration in declarations {
            if let Err(diagnostic) = self.type_declaration(declaration) {
                self.report(diagnostic);
            }
        }
    }

    fn type_declaration(&mut self, declaration: &ast::TypeDeclaration) -> AnalysisResult<()> {
        let name = &declaration.name;

        match &declaration.ty.kind {
            // Bound before its fields are resolved so that fields can point
            // back at the record
            ast::TypeKind::Record(fields) => {
                let id = self.symbols.types.reserve_record();
                self.symbols
                    .declare_type(&name.name, id)
                    .map_err(|kind| Diagnostic::new(name.span, kind))?;

                let fields = self.record_fields(fields)?;
                self.symbols.types.define_record(id, fields);
                self.check_size_limit(declaration.ty.span, id)?;
            }
            _ => {
                let ty = self.resolve_type(&declaration.ty)?;
                self.symbols
                    .declare_type(&name.name, ty)
                    .map_err(|kind| Diagnostic::new(name.span, kind))?;
            }
        }

        Ok(())
    }

    fn resolve_type(&mut self, ty: &ast::Type) -> AnalysisResult<TypeId> {
        let id = match &ty.kind {
            ast::TypeKind::Integer => TypeId::INTEGER,
            ast::TypeKind::Real => TypeId::REAL,
            ast::TypeKind::Boolean => TypeId::BOOLEAN,
            ast::TypeKind::Char => TypeId::CHAR,
            ast::TypeKind::String => TypeId::STRING,
            ast::TypeKind::Void => TypeId::VOID,
            ast::TypeKind::Array {
                lower,
                upper,
                element,
            } => {
                let element = self.resolve_type(element)?;
                self.symbols.types.insert(TypeKind::Array {
                    lower: *lower,
                    upper: *upper,
                    element,
                })
            }
            ast::TypeKind::Pointer(pointee) => {
                let pointee = self.resolve_type(pointee)?;
                self.symbols.types.intern_pointer(pointee)
            }
            ast::TypeKind::Record(fields) => {
                let fields = self.record_fields(fields)?;
                self.symbols.types.insert_record(fields)
            }
            ast::TypeKind::FunctionSignature {
                kind,
                parameters,
                return_type,
            } => {
                let parameters = parameters
                    .iter()
                    .map(|p| self.resolve_type(p))
                    .collect::<AnalysisResult<Vec<_>>>()?;
                let return_type = match return_type {
                    Some(ty) => self.resolve_type(ty)?,
                    None => TypeId::VOID,
                };

                self.symbols.types.insert(TypeKind::Function(Signature {
                    kind: *kind,
                    parameters,
                    return_type,
                }))
            }
            ast::TypeKind::Named(name) => self
                .symbols
                .resolve_type(&name.name)
                .map_err(|kind| Diagnostic::new(name.span, kind))?,
        };

        self.check_size_limit(ty.span, id)?;
        Ok(id)
    }

    /// Variables, parameters and fields must occupy memory, otherwise reading
    /// or writing them would move no bytes at all
    fn check_sized(&self, name: &ast::Identifier, ty: TypeId) -> AnalysisResult<()> {
        if self.symbols.types.layout(ty).is_zero_sized() {
            return self.error(
                name.span,
                SemanticErrorKind::ZeroSizedType {
                    name: name.name.clone(),
                    ty: self.type_name(ty),
                },
            );
        }

        Ok(())
    }

    fn check_size_limit(&self, span: Span, ty: TypeId) -> AnalysisResult<()> {
        if self.symbols.types.layout(ty).is_too_large() {
            return self.error(
                span,
                SemanticErrorKind::TypeTooLarge {
                    ty: self.type_name(ty),
                    max: Layout::MAX_SIZE,
                },
            );
        }

        Ok(())
    }

    fn record_fields(&mut self, fields: &[ast::RecordField]) -> AnalysisResult<Vec<(String, TypeId)>> {
        if let Some(duplicate) = fields.iter().duplicates_by(|f| &f.name.name).next() {
            return Err(Diagnostic::new(
                duplicate.name.span,
                SemanticErrorKind::DuplicateDeclaration {
                    name: duplicate.name.name.clone(),
                },
            ));
        }

        fields
            .iter()
            .map(|field| {
                let ty = self.resolve_type(&field.ty)?;
                self.check_sized(&field.name, ty)?;
                Ok((field.name.name.clone(), ty))
            })
            .collect()
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        debug!(error = %diagnostic.kind, span = ?diagnostic.span, "semantic error");
        self.diagnostics.push(diagnostic);
    }

    fn error<T>(&self, span: Span, kind: SemanticErrorKind) -> AnalysisResult<T> {
        Err(Diagnostic::new(span, kind))
    }

    fn type_name(&self, ty: TypeId) -> String {
        self.symbols.types.display(ty)
    }

    fn builder(&self) -> &FunctionBuilder {
        self.builders
            .last()
            .unwrap_or_else(|| panic!("no routine is being built"))
    }

    fn builder_mut(&mut self) -> &mut FunctionBuilder {
        self.builders
            .last_mut()
            .unwrap_or_else(|| panic!("no routine is being built"))
    }

    fn pop_builder(&mut self) -> FunctionBuilder {
        self.builders
            .pop()
            .unwrap_or_else(|| panic!("no routine is being built"))
    }

    fn emit(&mut self, block: lir::BlockId, instruction: lir::Instruction) -> lir::ValueId {
        self.builder_mut().push(block, instruction)
    }
}

fn global_symbol(variable: VariableId, name: &str) -> String {
    format!("global_{}_{name}", variable.index())
}
