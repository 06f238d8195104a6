use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    process::ExitCode,
};

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use dragonc::{
    CompileError, CompileOptions, CompileOutput, Phase,
    backend::{CodegenOptions, MIN_REGISTERS},
    compile,
    frontend::{SourceFile, SourceFileOrigin, ast},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Syntax tree of the program as JSON, the way the parser writes it
    ast: PathBuf,

    /// Source text the syntax tree was parsed from, to point errors at
    #[arg(long)]
    source: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Phase::Codegen)]
    stop_after: Phase,

    /// Print the LIR of every routine to stderr
    #[arg(long)]
    emit_ir: bool,

    /// Annotate the assembly with the LIR it was generated from
    #[arg(long)]
    emit_debug_info: bool,

    /// Number of registers the allocator may hand out
    #[arg(long, value_name = "N")]
    registers: Option<usize>,

    /// Where to write the assembly, stdout if absent
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn read_file(path: &PathBuf, what: &str) -> String {
    if !path.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("{what} '{}' does not exist or is not a file!", path.display()),
            )
            .exit()
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => Args::command()
            .error(
                ErrorKind::Io,
                format!("Could not read {what} '{}': {error}", path.display()),
            )
            .exit(),
    }
}

/// Writes the assembly and, if asked for, the IR dump. The dump never shares
/// a stream with the assembly so that the assembly stays assemblable.
fn write_products(
    output: &CompileOutput,
    emit_ir: bool,
    mut ir_out: impl Write,
    mut assembly_out: impl Write,
) -> std::io::Result<()> {
    if emit_ir
        && let Some(ir) = &output.ir
    {
        writeln!(ir_out, "{ir}")?;
    }

    if let Some(assembly) = &output.assembly {
        assembly_out.write_all(assembly.as_bytes())?;
        assembly_out.flush()?;
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(registers) = args.registers
        && registers < MIN_REGISTERS
    {
        Args::command()
            .error(
                ErrorKind::ValueValidation,
                format!("At least {MIN_REGISTERS} registers are needed, got {registers}"),
            )
            .exit()
    }

    let program = match serde_json::from_str::<ast::Program>(&read_file(&args.ast, "Syntax tree")) {
        Ok(program) => program,
        Err(error) => Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("'{}' is not a valid syntax tree: {error}", args.ast.display()),
            )
            .exit(),
    };

    let source_file = args.source.as_ref().map(|path| SourceFile {
        contents: read_file(path, "Source file"),
        origin: SourceFileOrigin::File(path.clone()),
    });

    let options = CompileOptions {
        stop_after: args.stop_after,
        codegen: CodegenOptions {
            emit_debug_info: args.emit_debug_info,
            register_limit: args.registers,
        },
        ..Default::default()
    };

    let output = match compile(&program, &options) {
        Ok(output) => output,
        Err(CompileError::Semantic(diagnostics)) => {
            eprintln!("{}", diagnostics.render(source_file.as_ref()));
            return ExitCode::FAILURE;
        }
    };

    let assembly_out: Box<dyn Write> = match (&args.output, &output.assembly) {
        (Some(path), Some(_)) => match File::create(path) {
            Ok(file) => Box::new(file),
            Err(error) => Args::command()
                .error(
                    ErrorKind::Io,
                    format!("Could not create '{}': {error}", path.display()),
                )
                .exit(),
        },
        (None, Some(_)) => Box::new(std::io::stdout()),
        (_, None) => Box::new(std::io::sink()),
    };

    if let Err(error) = write_products(&output, args.emit_ir, std::io::stderr(), assembly_out) {
        Args::command()
            .error(ErrorKind::Io, format!("Could not write the output: {error}"))
            .exit()
    }

    ExitCode::SUCCESS
}
