use std::fmt;

/// Collects the lines of one NASM routine
#[derive(Debug, Default)]
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    /// Appends already assembled lines verbatim
    pub fn append(&mut self, other: Assembler) {
        self.output.push_str(&other.output);
    }

    pub fn global_label(&mut self, name: &str) {
        self.push_line(format!("global {name}"));
        self.push_line(format!("{name}:"));
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("; {}", comment.as_ref()));
    }

    pub fn function_prologue(&mut self, stack_frame_size: u64) {
        self.emit("push rbp");
        self.emit("mov rbp, rsp");
        if stack_frame_size > 0 {
            self.emit(format!("sub rsp, {stack_frame_size}"));
        }
    }

    pub fn function_epilogue(&mut self) {
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
    }
}

/// A memory operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `[rbp - offset]`
    Frame(u64),
    /// `[rbp + offset]`, where the caller's pushed arguments live
    Argument(u64),
    Register(X86FullRegister),
    Symbol(String),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Frame(offset) => write!(f, "[rbp - {offset}]"),
            Address::Argument(offset) => write!(f, "[rbp + {offset}]"),
            Address::Register(register) => write!(f, "[{register}]"),
            Address::Symbol(symbol) => write!(f, "[{symbol}]"),
        }
    }
}

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum X86FullRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl X86FullRegister {
    /// Registers handed out by the allocator. The others are scratch space
    /// for instruction sequences or hold the frame.
    pub const ALLOCATABLE: [X86FullRegister; 9] = [
        Self::Rbx,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// The System V integer argument registers outside the allocatable
    /// pool, used for runtime calls
    pub const ARGUMENTS: [X86FullRegister; 4] = [Self::Rdi, Self::Rsi, Self::Rdx, Self::Rcx];

    pub fn as_8_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Al,
            Self::Rbx => X86Register::Bl,
            Self::Rcx => X86Register::Cl,
            Self::Rdx => X86Register::Dl,
            Self::Rsi => X86Register::Sil,
            Self::Rdi => X86Register::Dil,
            Self::Rbp => X86Register::Bpl,
            Self::Rsp => X86Register::Spl,
            Self::R8 => X86Register::R8b,
            Self::R9 => X86Register::R9b,
            Self::R10 => X86Register::R10b,
            Self::R11 => X86Register::R11b,
            Self::R12 => X86Register::R12b,
            Self::R13 => X86Register::R13b,
            Self::R14 => X86Register::R14b,
            Self::R15 => X86Register::R15b,
        }
    }

    /// The register as wide as a value of `size` bytes
    #[track_caller]
    pub fn with_size_bytes(self, size: u64) -> String {
        match size {
            8 => self.to_string(),
            1 => self.as_8_bit().to_string(),
            size => panic!("invalid size in bytes {size}"),
        }
    }
}

/// Low byte of a general purpose register
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum X86Register {
    Al, Bl, Cl, Dl,
    Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
}

/// NASM size keyword for a memory access of `size` bytes
#[track_caller]
pub fn size_keyword(size: u64) -> &'static str {
    match size {
        8 => "qword",
        1 => "byte",
        size => panic!("invalid size in bytes {size}"),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn register_names() {
        assert_eq!(X86FullRegister::R10.to_string(), "r10");
        assert_eq!(X86FullRegister::Rbx.as_8_bit().to_string(), "bl");
        assert_eq!(X86FullRegister::R8.with_size_bytes(1), "r8b");
        assert_eq!(X86FullRegister::Rdi.with_size_bytes(8), "rdi");
    }

    #[test]
    fn addresses() {
        assert_eq!(Address::Frame(16).to_string(), "[rbp - 16]");
        assert_eq!(Address::Argument(24).to_string(), "[rbp + 24]");
        assert_eq!(Address::Register(X86FullRegister::R9).to_string(), "[r9]");
        assert_eq!(Address::Symbol("display + 8".to_string()).to_string(), "[display + 8]");
    }

    #[test]
    fn routine_layout() {
        let mut assembler = Assembler::new();
        assembler.global_label("fn_1_f");
        assembler.function_prologue(16);
        assembler.label(".block_0");
        assembler.comment("nothing");
        assembler.function_epilogue();

        assert_eq!(
            assembler.into_output(),
            indoc! {"
                global fn_1_f
                fn_1_f:
                    push rbp
                    mov rbp, rsp
                    sub rsp, 16
                .block_0:
                    ; nothing
                    mov rsp, rbp
                    pop rbp
                    ret
            "}
        );
    }
}
