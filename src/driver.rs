//! Runs the phases of the compiler in order, stopping early on request

use thiserror::Error;
use tracing::info;

use crate::{
    backend::{
        CodegenOptions,
        targets::{CodeGenerator, Target},
    },
    error::Diagnostics,
    frontend::ast,
    middle::{
        analysis::{Analysis, analyze},
        lir,
        symbol_table::SymbolTable,
    },
};

/// The last phase to run. Analysis and IR construction happen in the same
/// walk, stopping after analysis only drops the IR.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, clap::ValueEnum, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Analysis,
    Ir,
    #[default]
    Codegen,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub stop_after: Phase,
    pub target: Target,
    pub codegen: CodegenOptions,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub symbols: SymbolTable,
    pub ir: Option<lir::Module>,
    pub assembly: Option<String>,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("semantic analysis failed with {} error(s)", .0.len())]
    Semantic(Diagnostics),
}

pub fn compile(program: &ast::Program, options: &CompileOptions) -> Result<CompileOutput, CompileError> {
    info!(program = %program.name.name, "analyzing");
    let Analysis { module, symbols } = analyze(program).map_err(CompileError::Semantic)?;
    info!(
        routines = module.function_definitions.len(),
        display = module.display_len,
        "analysis finished"
    );

    if options.stop_after == Phase::Analysis {
        return Ok(CompileOutput {
            symbols,
            ir: None,
            assembly: None,
        });
    }

    if options.stop_after == Phase::Ir {
        return Ok(CompileOutput {
            symbols,
            ir: Some(module),
            assembly: None,
        });
    }

    info!(target = ?options.target, "generating code");
    let assembly = options
        .target
        .get_code_generator()
        .translate_to_asm(&module, &options.codegen);
    info!(bytes = assembly.len(), "code generation finished");

    Ok(CompileOutput {
        symbols,
        ir: Some(module),
        assembly: Some(assembly),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SemanticErrorKind,
        frontend::ast::{Expression, Program, Statement},
    };

    fn hello() -> Program {
        Program::new("hello", &["output"])
            .with_body(vec![Statement::call("writeln", vec![Expression::string("hello")])])
    }

    #[test]
    fn stops_after_the_requested_phase() {
        let options = |stop_after| CompileOptions {
            stop_after,
            ..Default::default()
        };

        let analysis = compile(&hello(), &options(Phase::Analysis)).unwrap();
        assert!(analysis.ir.is_none() && analysis.assembly.is_none());

        let ir = compile(&hello(), &options(Phase::Ir)).unwrap();
        assert!(ir.ir.is_some() && ir.assembly.is_none());

        let full = compile(&hello(), &options(Phase::Codegen)).unwrap();
        assert!(full.assembly.unwrap().contains("call program_hello"));
    }

    #[test]
    fn semantic_errors_stop_compilation() {
        let program = Program::new("broken", &["network"]).with_body(vec![]);

        let Err(CompileError::Semantic(diagnostics)) = compile(&program, &CompileOptions::default()) else {
            panic!("expected a semantic error");
        };
        assert_eq!(
            diagnostics.kinds().cloned().collect::<Vec<_>>(),
            vec![SemanticErrorKind::UnknownLibrary {
                name: "network".to_string()
            }]
        );
    }

    #[test]
    fn phases_parse_from_their_names() {
        use clap::ValueEnum;

        assert_eq!(Phase::from_str("ir", false), Ok(Phase::Ir));
        assert_eq!(Phase::Analysis.to_string(), "analysis");
        assert!(Phase::Analysis < Phase::Codegen);
    }
}
