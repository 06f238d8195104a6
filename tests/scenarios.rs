//! Whole programs pushed through the public pipeline

use dragonc::{
    CompileError, CompileOptions, CompileOutput, Phase, compile,
    error::SemanticErrorKind,
    frontend::ast::{BinaryOperatorKind, Declaration, Expression, Program, Statement, Subprogram, Type},
    index::Index,
    middle::{
        lir::{self, Instruction, Operand},
        ty::TypeId,
    },
};
use itertools::Itertools;
use pretty_assertions::assert_eq;

fn run(program: &Program, stop_after: Phase) -> CompileOutput {
    let options = CompileOptions {
        stop_after,
        ..Default::default()
    };

    match compile(program, &options) {
        Ok(output) => output,
        Err(CompileError::Semantic(diagnostics)) => {
            panic!("unexpected errors: {:?}", diagnostics.kinds().collect_vec())
        }
    }
}

fn errors(program: &Program) -> Vec<SemanticErrorKind> {
    match compile(program, &CompileOptions::default()) {
        Ok(_) => vec![],
        Err(CompileError::Semantic(diagnostics)) => diagnostics.kinds().cloned().collect(),
    }
}

fn block_instructions(function: &lir::FunctionDefinition, block: usize) -> Vec<&Instruction> {
    function
        .instructions(lir::BlockId::new(block))
        .map(|(_, instruction)| instruction)
        .collect()
}

/// The trimmed lines of the routine labelled `symbol`, up to its `ret`
fn routine<'a>(assembly: &'a str, symbol: &str) -> Vec<&'a str> {
    assembly
        .lines()
        .skip_while(|line| *line != format!("{symbol}:"))
        .take_while(|line| line.trim() != "ret")
        .map(str::trim)
        .collect()
}

#[test]
fn multiply_is_lowered_before_the_add_it_feeds() {
    let program = Program::new("arith", &[])
        .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
        .with_body(vec![Statement::assign(
            Expression::variable("x"),
            Expression::binary(
                Expression::integer(1),
                BinaryOperatorKind::Add,
                Expression::binary(
                    Expression::integer(2),
                    BinaryOperatorKind::Multiply,
                    Expression::integer(3),
                ),
            ),
        )]);

    let output = run(&program, Phase::Ir);

    let x = output
        .symbols
        .variables
        .iter()
        .find(|variable| variable.name == "x")
        .unwrap();
    assert_eq!(x.ty, TypeId::INTEGER);

    let ir = output.ir.unwrap();
    let main = ir.entry_function();
    let arithmetic = main
        .instructions(lir::BlockId::ENTRY)
        .filter(|(_, instruction)| matches!(instruction, Instruction::Binary { .. }))
        .collect_vec();

    let [(product, multiply), (_, add)] = arithmetic.as_slice() else {
        panic!("expected two binary instructions, found {arithmetic:?}");
    };
    assert!(matches!(
        multiply,
        Instruction::Binary { operator: BinaryOperatorKind::Multiply, .. }
    ));
    assert!(matches!(
        add,
        Instruction::Binary { operator: BinaryOperatorKind::Add, rhs: Operand::Value(rhs), .. }
            if rhs == product
    ));
}

#[test]
fn counting_loop_has_one_header_and_one_back_edge() {
    let program = Program::new("count", &["output"])
        .with_declarations(vec![Declaration::new(&["i"], Type::integer())])
        .with_body(vec![Statement::for_loop(
            "i",
            Expression::integer(1),
            Expression::integer(10),
            Statement::call("writeln", vec![Expression::variable("i")]),
        )]);

    let ir = run(&program, Phase::Ir).ir.unwrap();
    let main = ir.entry_function();
    let header = lir::BlockId::new(1);
    let body = lir::BlockId::new(2);

    let header_instructions = block_instructions(main, 1);
    assert_eq!(
        header_instructions
            .iter()
            .filter(|instruction| matches!(
                instruction,
                Instruction::Binary { operator: BinaryOperatorKind::LessThanOrEqualTo, .. }
            ))
            .count(),
        1
    );
    assert!(matches!(
        header_instructions.last(),
        Some(Instruction::Branch { positive, .. }) if *positive == body
    ));

    let calls = block_instructions(main, 2)
        .into_iter()
        .filter_map(|instruction| match instruction {
            Instruction::ForeignCall {
                symbol, arguments, ..
            } => Some((*symbol, arguments.len())),
            _ => None,
        })
        .collect_vec();
    assert_eq!(calls, vec![("__write_integer", 1), ("__write_newline", 0)]);

    let back_edges = main
        .blocks
        .indices()
        .filter(|block| *block > header)
        .filter(|block| {
            main.instructions(*block).any(|(_, instruction)| {
                matches!(instruction, Instruction::Jump { destination } if *destination == header)
            })
        })
        .count();
    assert_eq!(back_edges, 1);
    assert_eq!(
        main.blocks[header].predecessors.iter().copied().collect_vec(),
        vec![lir::BlockId::ENTRY, body]
    );
}

#[test]
fn captured_local_is_installed_and_restored_around_the_body() {
    let peek = Subprogram::function("peek", vec![], Type::integer())
        .with_body(vec![Statement::assign(Expression::variable("peek"), Expression::variable("n"))]);
    let outer = Subprogram::procedure("outer", vec![])
        .with_declarations(vec![Declaration::new(&["n"], Type::integer())])
        .with_subprograms(vec![peek])
        .with_body(vec![
            Statement::assign(Expression::variable("n"), Expression::integer(42)),
            Statement::call("write", vec![Expression::call("peek", vec![])]),
        ]);
    let program = Program::new("nested", &["output"])
        .with_subprograms(vec![outer])
        .with_body(vec![Statement::call("outer", vec![])]);

    let output = run(&program, Phase::Codegen);

    let n = output
        .symbols
        .variables
        .iter()
        .find(|variable| variable.name == "n")
        .unwrap();
    assert!(n.is_captured());

    let assembly = output.assembly.unwrap();
    let outer = routine(&assembly, "fn_2_outer");
    let exit = outer.iter().position(|line| *line == ".exit:").unwrap();

    // prologue: the previous occupant is saved, then the local's address installed
    let install = outer.iter().position(|line| *line == "mov [display], rax").unwrap();
    assert!(install < exit);
    assert_eq!(outer[install - 3], "mov rax, [display]");
    let save = outer[install - 2]
        .strip_prefix("mov ")
        .and_then(|line| line.strip_suffix(", rax"))
        .unwrap();
    assert!(outer[install - 1].starts_with("lea rax, [rbp - "));

    // epilogue: the saved occupant goes back
    let restore = outer.iter().position(|line| *line == "mov [display], rcx").unwrap();
    assert!(exit < restore);
    assert_eq!(outer[restore - 1], format!("mov rcx, {save}"));

    let peek = routine(&assembly, "fn_3_peek");
    assert!(!peek.iter().any(|line| line.ends_with("[display], rax")));
}

#[test]
fn calls_check_arity_and_argument_types() {
    let pair = Subprogram::procedure("pair", vec![Declaration::new(&["a", "b"], Type::integer())]);
    let program = Program::new("calls", &[])
        .with_subprograms(vec![pair])
        .with_body(vec![
            Statement::call("pair", vec![Expression::integer(1)]),
            Statement::call("pair", vec![
                Expression::integer(1),
                Expression::integer(2),
                Expression::integer(3),
            ]),
            Statement::call("pair", vec![Expression::integer(1), Expression::boolean(true)]),
            Statement::call("pair", vec![Expression::integer(1), Expression::integer(2)]),
        ]);

    assert_eq!(errors(&program), vec![
        SemanticErrorKind::ArityMismatch {
            name: "pair".to_string(),
            expected: 2,
            actual: 1,
        },
        SemanticErrorKind::ArityMismatch {
            name: "pair".to_string(),
            expected: 2,
            actual: 3,
        },
        SemanticErrorKind::ArgTypeMismatch {
            name: "pair".to_string(),
            position: 2,
            expected: "integer".to_string(),
            actual: "boolean".to_string(),
        },
    ]);
}

#[test]
fn only_functions_must_assign_their_name() {
    let body = || vec![Statement::assign(Expression::variable("x"), Expression::integer(1))];
    let program = |subprogram: Subprogram| {
        Program::new("results", &[])
            .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
            .with_subprograms(vec![subprogram])
    };

    let procedure = program(Subprogram::procedure("work", vec![]).with_body(body()));
    assert_eq!(errors(&procedure), vec![]);

    let function = program(
        Subprogram::function("work", vec![], Type::integer())
            .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
            .with_body(body()),
    );
    assert_eq!(errors(&function), vec![SemanticErrorKind::ReturnNotAssigned {
        function: "work".to_string()
    }]);
}

#[test]
fn parser_output_compiles_to_assembly() {
    let json = r#"{
        "name": { "name": "hello" },
        "imports": [{ "name": "output" }],
        "body": { "kind": { "block": [
            { "kind": { "procedure_call": {
                "target": { "segments": [{ "name": "writeln" }] },
                "arguments": [{ "kind": { "literal": { "string": "hello" } } }]
            } } }
        ] } }
    }"#;
    let program: Program = serde_json::from_str(json).unwrap();

    let assembly = run(&program, Phase::Codegen).assembly.unwrap();

    assert!(assembly.contains("extern __write_string"));
    assert!(assembly.contains("string_0: db \"hello\", 0"));
    let main = routine(&assembly, "program_hello");
    assert!(main.contains(&"call __write_string"));
    assert!(main.contains(&"call __write_newline"));
}

#[test]
fn stopping_early_skips_later_phases() {
    let program = Program::new("early", &[]);

    let analysis = run(&program, Phase::Analysis);
    assert!(analysis.ir.is_none() && analysis.assembly.is_none());

    let ir = run(&program, Phase::Ir);
    assert!(ir.ir.is_some() && ir.assembly.is_none());
}

#[test]
fn recursive_function_compiles_to_a_self_call() {
    let n_minus_one = Expression::binary(
        Expression::variable("n"),
        BinaryOperatorKind::Subtract,
        Expression::integer(1),
    );
    let fact = Subprogram::function("fact", vec![Declaration::new(&["n"], Type::integer())], Type::integer())
        .with_body(vec![Statement::if_then(
            Expression::binary(
                Expression::variable("n"),
                BinaryOperatorKind::LessThanOrEqualTo,
                Expression::integer(1),
            ),
            Statement::assign(Expression::variable("fact"), Expression::integer(1)),
            Some(Statement::assign(
                Expression::variable("fact"),
                Expression::binary(
                    Expression::variable("n"),
                    BinaryOperatorKind::Multiply,
                    Expression::call("fact", vec![n_minus_one]),
                ),
            )),
        )]);
    let program = Program::new("factorial", &["output"])
        .with_subprograms(vec![fact])
        .with_body(vec![Statement::call("writeln", vec![Expression::call("fact", vec![
            Expression::integer(5),
        ])])]);

    let assembly = run(&program, Phase::Codegen).assembly.unwrap();

    let fact = routine(&assembly, "fn_2_fact");
    assert_eq!(fact.iter().filter(|line| **line == "call fn_2_fact").count(), 1);
    assert!(routine(&assembly, "program_factorial").contains(&"call fn_2_fact"));
}

#[test]
fn recursion_happens_inside_the_display_bracket() {
    let show = Subprogram::procedure("show", vec![])
        .with_body(vec![Statement::call("write", vec![Expression::variable("k")])]);
    let walk = Subprogram::procedure("walk", vec![Declaration::new(&["depth"], Type::integer())])
        .with_declarations(vec![Declaration::new(&["k"], Type::integer())])
        .with_subprograms(vec![show])
        .with_body(vec![
            Statement::assign(Expression::variable("k"), Expression::variable("depth")),
            Statement::if_then(
                Expression::binary(
                    Expression::variable("depth"),
                    BinaryOperatorKind::GreaterThan,
                    Expression::integer(0),
                ),
                Statement::call("walk", vec![Expression::binary(
                    Expression::variable("depth"),
                    BinaryOperatorKind::Subtract,
                    Expression::integer(1),
                )]),
                None,
            ),
            Statement::call("show", vec![]),
        ]);
    let program = Program::new("walker", &["output"])
        .with_subprograms(vec![walk])
        .with_body(vec![Statement::call("walk", vec![Expression::integer(3)])]);

    let output = run(&program, Phase::Codegen);
    let k = output
        .symbols
        .variables
        .iter()
        .find(|variable| variable.name == "k")
        .unwrap();
    assert!(k.is_captured());

    let assembly = output.assembly.unwrap();
    let walk = routine(&assembly, "fn_2_walk");
    let install = walk.iter().position(|line| *line == "mov [display], rax").unwrap();
    let recurse = walk.iter().position(|line| *line == "call fn_2_walk").unwrap();
    let show = walk.iter().position(|line| *line == "call fn_3_show").unwrap();
    let exit = walk.iter().position(|line| *line == ".exit:").unwrap();
    let restore = walk.iter().position(|line| *line == "mov [display], rcx").unwrap();

    // every activation saves the slot of its caller and puts it back on the way out,
    // so `show` sees this activation's `k` again once the inner call returns
    assert!(install < recurse && recurse < show && show < exit && exit < restore);
    assert_eq!(walk.iter().filter(|line| line.ends_with("[display], rax")).count(), 1);
}
