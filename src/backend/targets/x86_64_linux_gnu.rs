use itertools::Itertools;
use tracing::debug;

use crate::{
    backend::{
        CodegenOptions,
        assemblers::x86_64::{Address, Assembler, X86FullRegister, size_keyword},
        display::Display,
        frame::Frame,
        register_allocation::{Location, RegisterAllocator},
        targets::CodeGenerator,
    },
    frontend::ast::BinaryOperatorKind,
    middle::lir::{self, Immediate, Instruction, NumberClass, Operand, Symbol, UnaryOperator},
};

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    fn translate_to_asm(&self, module: &lir::Module, options: &CodegenOptions) -> String {
        let display = Display::new(module.display_len);

        let externs = module
            .foreign_symbols
            .iter()
            .map(|symbol| format!("extern {symbol}"))
            .join("\n");

        let function_bodies = module
            .function_definitions
            .values()
            .map(|function| FunctionCodegen::new(function, display, options).run())
            .join("\n");

        let uninitialized = display
            .declaration()
            .into_iter()
            .chain(module.globals.iter().map(|global| {
                format!(
                    "alignb {}\n{}: resb {}",
                    global.layout.align,
                    global.symbol,
                    global.layout.size.max(1)
                )
            }))
            .join("\n");

        let static_strings = module
            .strings
            .iter()
            .enumerate()
            .map(|(index, string)| format!("{}: db {}", string_label(index), format_nasm_string(string)))
            .join("\n");

        format!(
            indoc::indoc! {r#"
            default rel
            bits 64

            {0}

            section .text
            global _start

            ; program entrypoint
            _start:
                call {1}

                ; exit(0)
                xor rdi, rdi
                mov rax, 60
                syscall

            ; user code
            {2}
            section .bss
            {3}

            section .data
            {4}
            "#
            },
            externs,
            module.entry_function().symbol_name,
            function_bodies,
            uninitialized,
            static_strings
        )
    }
}

fn string_label(index: usize) -> String {
    format!("string_{index}")
}

/// Quotes printable runs and spells out every other byte, followed by the
/// terminating NUL
fn format_nasm_string(string: &str) -> String {
    let mut parts = Vec::new();

    let mut last = 0;
    for (index, matched) in string.match_indices(|c: char| c.is_ascii_control() || c == '"') {
        if last != index {
            parts.push(format!("\"{}\"", &string[last..index]));
        }

        for b in matched.bytes() {
            parts.push(format!("0x{b:X}"));
        }

        last = index + matched.len();
    }
    if last < string.len() {
        parts.push(format!("\"{}\"", &string[last..]));
    }
    parts.push("0".to_string());

    parts.join(", ")
}

/// Where an operand can be read from once it has been prepared
#[derive(Debug, Clone, Copy)]
enum Source {
    Register(X86FullRegister),
    /// The address of a frame slot, which has to be computed with `lea`
    FrameAddress(u64),
}

/// Right hand side of an integer or real operation
#[derive(Debug, Clone, Copy)]
enum Rhs {
    Register(X86FullRegister),
    Immediate(i64),
}

impl std::fmt::Display for Rhs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rhs::Register(register) => write!(f, "{register}"),
            Rhs::Immediate(immediate) => write!(f, "{immediate}"),
        }
    }
}

struct FunctionCodegen<'a> {
    function: &'a lir::FunctionDefinition,
    options: &'a CodegenOptions,
    display: Display,
    frame: Frame,
    registers: RegisterAllocator,
    assembler: Assembler,
}

impl<'a> FunctionCodegen<'a> {
    fn new(function: &'a lir::FunctionDefinition, display: Display, options: &'a CodegenOptions) -> Self {
        Self {
            function,
            options,
            display,
            frame: Frame::for_function(function),
            registers: RegisterAllocator::new(function, options.register_limit),
            assembler: Assembler::new(),
        }
    }

    /// The body is generated first, the prologue can only be written once
    /// every spill slot is known
    fn run(mut self) -> String {
        let function = self.function;
        let bracket = self.display.bracket(function, &mut self.frame);

        for block in function.blocks.indices() {
            self.assembler.label(block.to_string());

            for (value, instruction) in function.instructions(block) {
                if self.options.emit_debug_info {
                    let text = if instruction.has_result() {
                        format!("{value} = {instruction}")
                    } else {
                        instruction.to_string()
                    };
                    self.assembler.comment(strip_ansi_escapes::strip_str(text));
                }

                self.instruction(value, instruction);
                self.registers.unpin_all();
            }

            debug_assert!(self.registers.is_idle(), "values outlive {block:?}");
        }

        debug!(
            function = %self.function.symbol_name,
            frame = self.frame.size(),
            captures = self.function.captures.len(),
            "generated"
        );

        let mut output = Assembler::new();
        output.global_label(&self.function.symbol_name);
        output.function_prologue(self.frame.size());
        if !bracket.is_empty() {
            output.comment("install captured locals in the display");
            bracket.install(&mut output);
        }
        output.append(self.assembler);
        output.label(".exit");
        bracket.restore(&mut output);
        output.function_epilogue();
        output.into_output()
    }

    fn instruction(&mut self, value: lir::ValueId, instruction: &Instruction) {
        let is_call = matches!(
            instruction,
            Instruction::Call { .. } | Instruction::ForeignCall { .. }
        );
        if instruction.has_result() && !is_call && self.registers.uses(value) == 0 {
            self.consume_operands(instruction);
            return;
        }

        match instruction {
            // frame slots are assigned before emission starts
            Instruction::Alloc { .. } => {}
            Instruction::Parameter { index } => {
                let count = self.function.parameters.len() as u64;
                let offset = 16 + 8 * (count - 1 - *index as u64);
                let result = self.define(value);
                self.emit(format!("mov {result}, {}", Address::Argument(offset)));
            }
            Instruction::Literal(immediate) => {
                let result = self.define(value);
                match immediate {
                    Immediate::Integer(integer) => self.emit(format!("mov {result}, {integer}")),
                    Immediate::Real(real) => {
                        self.emit(format!("mov {result}, 0x{:016X} ; {real:?}", real.to_bits()))
                    }
                }
            }
            Instruction::SymbolRef(symbol) => {
                let address = match symbol {
                    Symbol::Global(name) => Address::Symbol(name.clone()),
                    Symbol::String(index) => Address::Symbol(string_label(*index)),
                    Symbol::Display(slot) => self.display.entry(*slot),
                };
                let result = self.define(value);
                self.emit(format!("lea {result}, {address}"));
            }
            Instruction::Load { address, size } => {
                let address = self.address(*address);
                self.consume_operands(instruction);
                let result = self.define(value);
                match size {
                    8 => self.emit(format!("mov {result}, qword {address}")),
                    1 => self.emit(format!("movzx {result}, byte {address}")),
                    size => unreachable!("load of {size} bytes"),
                }
            }
            Instruction::Store {
                address,
                value: stored,
                size,
            } => {
                let address = self.address(*address);
                let stored = self.register(*stored, X86FullRegister::Rax);
                self.consume_operands(instruction);
                self.emit(format!(
                    "mov {} {address}, {}",
                    size_keyword(*size),
                    stored.with_size_bytes(*size)
                ));
            }
            Instruction::Copy {
                destination,
                source,
                size,
            } => {
                self.load_into(X86FullRegister::Rdi, *destination);
                self.load_into(X86FullRegister::Rsi, *source);
                self.consume_operands(instruction);
                self.emit(format!("mov rcx, {size}"));
                self.emit("rep movsb");
            }
            Instruction::Binary {
                operator,
                class,
                lhs,
                rhs,
            } => self.binary(value, instruction, *operator, *class, *lhs, *rhs),
            Instruction::Unary {
                operator,
                class,
                operand,
            } => {
                let operand = self.source(*operand);
                self.consume_operands(instruction);
                let result = self.define(value);
                self.copy_to(result, operand);

                match (operator, class) {
                    (UnaryOperator::Negate, NumberClass::Integer) => self.emit(format!("neg {result}")),
                    (UnaryOperator::Negate, NumberClass::Real) => self.emit(format!("btc {result}, 63")),
                    (UnaryOperator::Not, _) => self.emit(format!("xor {result}, 1")),
                }
            }
            Instruction::Call {
                symbol,
                arguments,
                returns_value,
                ..
            } => {
                let saved = self.save_registers(instruction);

                let padding = (saved.len() + arguments.len()) % 2 == 1;
                if padding {
                    self.emit("sub rsp, 8");
                }
                for argument in arguments {
                    self.load_into(X86FullRegister::Rax, *argument);
                    self.emit("push rax");
                }

                self.emit(format!("call {symbol}"));
                let pushed = 8 * (arguments.len() as u64 + padding as u64);
                if pushed > 0 {
                    self.emit(format!("add rsp, {pushed}"));
                }

                self.restore_registers(&saved);
                self.call_result(value, instruction, *returns_value);
            }
            Instruction::ForeignCall {
                symbol,
                arguments,
                returns_value,
            } => {
                assert!(
                    arguments.len() <= X86FullRegister::ARGUMENTS.len(),
                    "too many arguments to {symbol}"
                );

                let saved = self.save_registers(instruction);

                let padding = saved.len() % 2 == 1;
                if padding {
                    self.emit("sub rsp, 8");
                }
                for (argument, register) in arguments.iter().zip(X86FullRegister::ARGUMENTS) {
                    self.load_into(register, *argument);
                }

                self.emit(format!("call {symbol}"));
                if padding {
                    self.emit("add rsp, 8");
                }

                self.restore_registers(&saved);
                self.call_result(value, instruction, *returns_value);
            }
            Instruction::Branch {
                condition,
                positive,
                negative,
            } => {
                let condition = self.register(*condition, X86FullRegister::Rax);
                self.consume_operands(instruction);
                self.emit(format!("test {condition}, {condition}"));
                self.emit(format!("jnz {positive}"));
                self.emit(format!("jmp {negative}"));
            }
            Instruction::Jump { destination } => {
                self.emit(format!("jmp {destination}"));
            }
            Instruction::Return { value: returned } => {
                if let Some(returned) = returned {
                    self.load_into(X86FullRegister::Rax, *returned);
                }
                self.consume_operands(instruction);
                self.emit("jmp .exit");
            }
        }
    }

    /// Every form reads its operands before it writes the result, so the
    /// result may reuse a register an operand just gave up
    fn binary(
        &mut self,
        value: lir::ValueId,
        instruction: &Instruction,
        operator: BinaryOperatorKind,
        class: NumberClass,
        lhs: lir::ValueId,
        rhs: Operand,
    ) {
        let lhs = self.source(lhs);
        let rhs = match rhs {
            Operand::Value(rhs) => Ok(self.source(rhs)),
            Operand::Immediate(immediate) => Err(immediate),
        };
        self.consume_operands(instruction);
        let result = self.define(value);

        self.copy_to(X86FullRegister::Rax, lhs);
        let rhs = match rhs {
            Ok(Source::Register(register)) => Rhs::Register(register),
            Ok(source @ Source::FrameAddress(_)) => {
                self.copy_to(X86FullRegister::Rcx, source);
                Rhs::Register(X86FullRegister::Rcx)
            }
            Err(immediate) if class == NumberClass::Integer && i32::try_from(immediate).is_ok() => {
                Rhs::Immediate(immediate)
            }
            Err(immediate) => {
                self.emit(format!("mov rcx, {immediate}"));
                Rhs::Register(X86FullRegister::Rcx)
            }
        };

        if class == NumberClass::Real {
            self.emit("movq xmm0, rax");
            self.emit(format!("movq xmm1, {rhs}"));

            if let Some(condition) = real_condition(operator) {
                self.emit("ucomisd xmm0, xmm1");
                self.emit(format!("{condition} al"));
                self.emit(format!("movzx {result}, al"));
                return;
            }

            let mnemonic = match operator {
                BinaryOperatorKind::Add => "addsd",
                BinaryOperatorKind::Subtract => "subsd",
                BinaryOperatorKind::Multiply => "mulsd",
                BinaryOperatorKind::Divide => "divsd",
                operator => unreachable!("`{operator}` on reals"),
            };
            self.emit(format!("{mnemonic} xmm0, xmm1"));
            self.emit(format!("movq {result}, xmm0"));
            return;
        }

        if let Some(condition) = integer_condition(operator) {
            self.emit(format!("cmp rax, {rhs}"));
            self.emit(format!("{condition} al"));
            self.emit(format!("movzx {result}, al"));
            return;
        }

        match operator {
            BinaryOperatorKind::Divide | BinaryOperatorKind::IntegerDivide | BinaryOperatorKind::Modulus => {
                let divisor = match rhs {
                    Rhs::Register(register) => register,
                    Rhs::Immediate(immediate) => {
                        self.emit(format!("mov rcx, {immediate}"));
                        X86FullRegister::Rcx
                    }
                };

                self.emit("cqo");
                self.emit(format!("idiv {divisor}"));

                let quotient_or_remainder = match operator {
                    BinaryOperatorKind::Modulus => X86FullRegister::Rdx,
                    _ => X86FullRegister::Rax,
                };
                self.emit(format!("mov {result}, {quotient_or_remainder}"));
            }
            operator => {
                let mnemonic = match operator {
                    BinaryOperatorKind::Add => "add",
                    BinaryOperatorKind::Subtract => "sub",
                    BinaryOperatorKind::Multiply => "imul",
                    BinaryOperatorKind::And => "and",
                    BinaryOperatorKind::Or => "or",
                    operator => unreachable!("`{operator}` has no integer instruction"),
                };

                self.emit(format!("{mnemonic} rax, {rhs}"));
                self.emit(format!("mov {result}, rax"));
            }
        }
    }

    fn emit(&mut self, line: impl AsRef<str>) {
        self.assembler.emit(line);
    }

    fn define(&mut self, value: lir::ValueId) -> X86FullRegister {
        self.registers.define(value, &mut self.assembler, &mut self.frame)
    }

    fn consume_operands(&mut self, instruction: &Instruction) {
        for operand in instruction.operands() {
            self.registers.consume(operand, &mut self.frame);
        }
    }

    /// Prepares an operand, pinning its register if it has one
    fn source(&mut self, value: lir::ValueId) -> Source {
        match self.frame.allocation(value) {
            Some(Address::Frame(offset)) => Source::FrameAddress(offset),
            _ => Source::Register(self.registers.fetch(value, &mut self.assembler, &mut self.frame)),
        }
    }

    /// A register holding the operand, using `scratch` for frame addresses
    fn register(&mut self, value: lir::ValueId, scratch: X86FullRegister) -> X86FullRegister {
        match self.source(value) {
            Source::Register(register) => register,
            source @ Source::FrameAddress(_) => {
                self.copy_to(scratch, source);
                scratch
            }
        }
    }

    /// The memory an address operand points to
    fn address(&mut self, value: lir::ValueId) -> Address {
        match self.source(value) {
            Source::Register(register) => Address::Register(register),
            Source::FrameAddress(offset) => Address::Frame(offset),
        }
    }

    fn copy_to(&mut self, target: X86FullRegister, source: Source) {
        match source {
            Source::Register(register) if register == target => {}
            Source::Register(register) => self.emit(format!("mov {target}, {register}")),
            Source::FrameAddress(offset) => self.emit(format!("lea {target}, {}", Address::Frame(offset))),
        }
    }

    /// Moves a value into a register outside the allocator's pool without
    /// touching the allocator's state
    fn load_into(&mut self, target: X86FullRegister, value: lir::ValueId) {
        if let Some(address) = self.frame.allocation(value) {
            self.emit(format!("lea {target}, {address}"));
            return;
        }

        match self.registers.location(value) {
            Some(Location::Register(register)) => self.emit(format!("mov {target}, {register}")),
            Some(Location::Spilled(offset)) => self.emit(format!("mov {target}, {}", Address::Frame(offset))),
            None => panic!("{value:?} is used before it is defined"),
        }
    }

    /// Pushes every register whose value outlives the call
    fn save_registers(&mut self, call: &Instruction) -> Vec<X86FullRegister> {
        let saved = self.registers.live_across(call);
        for register in &saved {
            self.emit(format!("push {register}"));
        }
        saved
    }

    fn restore_registers(&mut self, saved: &[X86FullRegister]) {
        for register in saved.iter().rev() {
            self.emit(format!("pop {register}"));
        }
    }

    fn call_result(&mut self, value: lir::ValueId, call: &Instruction, returns_value: bool) {
        self.consume_operands(call);

        if returns_value && self.registers.uses(value) > 0 {
            let result = self.define(value);
            self.emit(format!("mov {result}, rax"));
        }
    }
}

fn integer_condition(operator: BinaryOperatorKind) -> Option<&'static str> {
    Some(match operator {
        BinaryOperatorKind::Equals => "sete",
        BinaryOperatorKind::NotEquals => "setne",
        BinaryOperatorKind::LessThan => "setl",
        BinaryOperatorKind::LessThanOrEqualTo => "setle",
        BinaryOperatorKind::GreaterThan => "setg",
        BinaryOperatorKind::GreaterThanOrEqualTo => "setge",
        _ => return None,
    })
}

/// `ucomisd` reports its result in the unsigned flags
fn real_condition(operator: BinaryOperatorKind) -> Option<&'static str> {
    Some(match operator {
        BinaryOperatorKind::Equals => "sete",
        BinaryOperatorKind::NotEquals => "setne",
        BinaryOperatorKind::LessThan => "setb",
        BinaryOperatorKind::LessThanOrEqualTo => "setbe",
        BinaryOperatorKind::GreaterThan => "seta",
        BinaryOperatorKind::GreaterThanOrEqualTo => "setae",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        backend::targets::Target,
        frontend::ast::{BinaryOperatorKind as Op, Declaration, Expression, Program, Statement, Subprogram, Type},
        middle::analysis::analyze,
    };

    fn compile(program: &Program, options: &CodegenOptions) -> String {
        let analysis = analyze(program).unwrap();
        Target::x86_64LinuxGnu
            .get_code_generator()
            .translate_to_asm(&analysis.module, options)
    }

    /// The lines of the routine labelled `symbol`, up to its `ret`
    fn routine<'a>(asm: &'a str, symbol: &str) -> Vec<&'a str> {
        asm.lines()
            .skip_while(|line| *line != format!("{symbol}:"))
            .take_while(|line| line.trim() != "ret")
            .map(str::trim)
            .collect()
    }

    #[test]
    fn strings_are_nul_terminated() {
        assert_eq!(format_nasm_string("hi"), r#""hi", 0"#);
        assert_eq!(format_nasm_string("a\"b\n"), r#""a", 0x22, "b", 0xA, 0"#);
        assert_eq!(format_nasm_string(""), "0");
    }

    #[test]
    fn program_layout() {
        let program = Program::new("main", &["output"])
            .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
            .with_body(vec![
                Statement::assign(
                    Expression::variable("x"),
                    Expression::binary(
                        Expression::integer(1),
                        Op::Add,
                        Expression::binary(Expression::integer(2), Op::Multiply, Expression::integer(3)),
                    ),
                ),
                Statement::call("writeln", vec![Expression::string("done")]),
            ]);

        let asm = compile(&program, &CodegenOptions::default());

        assert!(asm.contains("extern __write_newline"));
        assert!(asm.contains("extern __write_string"));
        assert!(asm.contains("_start:\n    call program_main"));
        assert!(asm.contains("string_0: db \"done\", 0"));
        assert!(asm.lines().any(|line| line.starts_with("global_") && line.ends_with(": resb 8")));

        let body = routine(&asm, "program_main");
        let multiply = body.iter().position(|line| line.starts_with("imul")).unwrap();
        let add = body.iter().position(|line| line.starts_with("add ")).unwrap();
        assert!(multiply < add);
        assert!(body.contains(&".exit:"));
    }

    #[test]
    fn debug_info_comments_instructions() {
        let program = Program::new("main", &[]).with_body(vec![]);

        let plain = compile(&program, &CodegenOptions::default());
        let annotated = compile(
            &program,
            &CodegenOptions {
                emit_debug_info: true,
                register_limit: None,
            },
        );

        assert!(!plain.contains("; ret"));
        assert!(annotated.contains("; ret"));
    }

    #[test]
    fn arguments_are_pushed_in_order_and_read_back_from_the_frame() {
        let subtract = Subprogram::function(
            "subtract",
            vec![Declaration::new(&["a", "b"], Type::integer())],
            Type::integer(),
        )
        .with_body(vec![Statement::assign(
            Expression::variable("subtract"),
            Expression::binary(Expression::variable("a"), Op::Subtract, Expression::variable("b")),
        )]);
        let program = Program::new("main", &["output"])
            .with_subprograms(vec![subtract])
            .with_body(vec![Statement::call(
                "write",
                vec![Expression::call(
                    "subtract",
                    vec![Expression::integer(5), Expression::integer(3)],
                )],
            )]);

        let asm = compile(&program, &CodegenOptions::default());

        let callee = routine(&asm, "fn_2_subtract");
        let first = callee.iter().position(|line| line.ends_with("[rbp + 24]")).unwrap();
        let second = callee.iter().position(|line| line.ends_with("[rbp + 16]")).unwrap();
        assert!(first < second);

        let caller = routine(&asm, "program_main");
        let call = caller.iter().position(|line| *line == "call fn_2_subtract").unwrap();
        assert_eq!(caller[call + 1], "add rsp, 16");
        assert_eq!(caller.iter().filter(|line| **line == "push rax").count(), 2);
        assert!(caller[call..].iter().any(|line| line.starts_with("mov rdi, ")));
    }

    #[test]
    fn captured_locals_are_bracketed() {
        let inner = Subprogram::procedure("inner", vec![])
            .with_body(vec![Statement::call("write", vec![Expression::variable("n")])]);
        let outer = Subprogram::procedure("outer", vec![])
            .with_declarations(vec![Declaration::new(&["n"], Type::integer())])
            .with_subprograms(vec![inner])
            .with_body(vec![
                Statement::assign(Expression::variable("n"), Expression::integer(7)),
                Statement::call("inner", vec![]),
            ]);
        let program = Program::new("main", &["output"])
            .with_subprograms(vec![outer])
            .with_body(vec![Statement::call("outer", vec![])]);

        let asm = compile(&program, &CodegenOptions::default());
        assert!(asm.contains("display: resq 1"));

        let outer = routine(&asm, "fn_2_outer");
        let install = outer.iter().position(|line| *line == "mov [display], rax").unwrap();
        let exit = outer.iter().position(|line| *line == ".exit:").unwrap();
        let restore = outer.iter().position(|line| *line == "mov [display], rcx").unwrap();
        assert!(install < exit && exit < restore);

        let inner = routine(&asm, "fn_3_inner");
        assert!(inner.contains(&"lea rbx, [display]"));
        assert!(!inner.contains(&"mov [display], rcx"));
    }

    #[test]
    fn spills_when_registers_run_out() {
        let sum = |a, b| Expression::binary(Expression::integer(a), Op::Add, Expression::integer(b));
        let value = Expression::binary(
            sum(1, 2),
            Op::Multiply,
            Expression::binary(sum(3, 4), Op::Multiply, sum(5, 6)),
        );
        let program = Program::new("main", &[])
            .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
            .with_body(vec![Statement::assign(Expression::variable("x"), value)]);

        let roomy = compile(&program, &CodegenOptions::default());
        assert!(!roomy.contains("mov [rbp - 8], "));

        let tight = compile(
            &program,
            &CodegenOptions {
                emit_debug_info: false,
                register_limit: Some(3),
            },
        );
        let body = routine(&tight, "program_main");
        assert!(body.contains(&"sub rsp, 16"));
        let spill = body.iter().position(|line| line.starts_with("mov [rbp - 8], ")).unwrap();
        let reload = body.iter().position(|line| line.ends_with(", [rbp - 8]")).unwrap();
        assert!(spill < reload);
    }
}
