//! The syntax tree handed to the compiler core by the parser. It only
//! guarantees syntactic validity; names are unresolved and nothing has been
//! type checked.
//!
//! Trees are usually produced by deserializing the parser's JSON output, but
//! they can also be assembled in code with the constructor helpers at the
//! bottom of this file.

use serde::{Deserialize, Serialize};

use super::Span;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub span: Span,
    pub name: Identifier,
    /// Library names listed in the program header, eg. `program p(input, output)`
    #[serde(default)]
    pub imports: Vec<Identifier>,
    #[serde(default)]
    pub type_declarations: Vec<TypeDeclaration>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub subprograms: Vec<Subprogram>,
    pub body: Statement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default)]
    pub span: Span,
    pub name: String,
}

/// Declares all of `names` to have type `ty`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    #[serde(default)]
    pub span: Span,
    pub names: Vec<Identifier>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    #[serde(default)]
    pub span: Span,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase")]
pub enum SubprogramKind {
    Function,
    Procedure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subprogram {
    #[serde(default)]
    pub span: Span,
    pub kind: SubprogramKind,
    pub name: Identifier,
    /// Formal parameters in declaration order
    #[serde(default)]
    pub parameters: Vec<Declaration>,
    /// Only present for functions
    #[serde(default)]
    pub return_type: Option<Type>,
    #[serde(default)]
    pub type_declarations: Vec<TypeDeclaration>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub subprograms: Vec<Subprogram>,
    pub body: Statement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    #[serde(default)]
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Integer,
    Real,
    Boolean,
    Char,
    String,
    Void,
    /// array [lower..upper] of element
    Array {
        lower: i64,
        upper: i64,
        element: Box<Type>,
    },
    /// ^T
    Pointer(Box<Type>),
    Record(Vec<RecordField>),
    FunctionSignature {
        kind: SubprogramKind,
        parameters: Vec<Type>,
        return_type: Option<Box<Type>>,
    },
    /// A reference to a type declared by name
    Named(Identifier),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    #[serde(default)]
    pub span: Span,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Assign {
        lhs: Expression,
        rhs: Expression,
    },
    /// for variable := start to end do body
    For {
        variable: Identifier,
        start: Expression,
        end: Expression,
        body: Box<Statement>,
    },
    If {
        condition: Expression,
        positive: Box<Statement>,
        negative: Option<Box<Statement>>,
    },
    ProcedureCall {
        target: Path,
        arguments: Vec<Expression>,
    },
    /// begin ... end
    Block(Vec<Statement>),
    While {
        condition: Expression,
        body: Box<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(default)]
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// f(a, b)
    Call {
        target: Path,
        arguments: Vec<Expression>,
    },
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperatorKind,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    /// p^
    Deref(Box<Expression>),
    /// a[i]
    Index {
        target: Path,
        index: Box<Expression>,
    },
    Literal(Literal),
    /// a.b.c
    Path(Path),
    /// @x
    AddressOf(Box<Expression>),
}

impl ExpressionKind {
    /// Whether the expression denotes a memory location
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            ExpressionKind::Path(_) | ExpressionKind::Index { .. } | ExpressionKind::Deref(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    #[serde(default)]
    pub span: Span,
    pub segments: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Char(char),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperatorKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    /// Truncates when both operands are integers
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "div")]
    IntegerDivide,
    #[strum(serialize = "mod")]
    Modulus,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "=")]
    Equals,
    #[strum(serialize = "<>")]
    NotEquals,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqualTo,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqualTo,
}

impl BinaryOperatorKind {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperatorKind {
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "not")]
    Not,
}

/* Constructor helpers */

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            span: Span::DUMMY,
            name: name.into(),
        }
    }
}

impl Path {
    pub fn new(segments: &[&str]) -> Self {
        Self {
            span: Span::DUMMY,
            segments: segments.iter().map(|s| Identifier::new(*s)).collect(),
        }
    }

    pub fn simple(name: &str) -> Self {
        Self::new(&[name])
    }
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            span: Span::DUMMY,
            kind,
        }
    }

    pub fn integer() -> Self {
        Self::new(TypeKind::Integer)
    }

    pub fn real() -> Self {
        Self::new(TypeKind::Real)
    }

    pub fn boolean() -> Self {
        Self::new(TypeKind::Boolean)
    }

    pub fn char() -> Self {
        Self::new(TypeKind::Char)
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    pub fn array(lower: i64, upper: i64, element: Type) -> Self {
        Self::new(TypeKind::Array {
            lower,
            upper,
            element: Box::new(element),
        })
    }

    pub fn pointer(to: Type) -> Self {
        Self::new(TypeKind::Pointer(Box::new(to)))
    }

    pub fn record(fields: Vec<(&str, Type)>) -> Self {
        Self::new(TypeKind::Record(
            fields
                .into_iter()
                .map(|(name, ty)| RecordField {
                    span: Span::DUMMY,
                    name: Identifier::new(name),
                    ty,
                })
                .collect(),
        ))
    }

    pub fn named(name: &str) -> Self {
        Self::new(TypeKind::Named(Identifier::new(name)))
    }
}

impl Declaration {
    pub fn new(names: &[&str], ty: Type) -> Self {
        Self {
            span: Span::DUMMY,
            names: names.iter().map(|n| Identifier::new(*n)).collect(),
            ty,
        }
    }
}

impl TypeDeclaration {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            span: Span::DUMMY,
            name: Identifier::new(name),
            ty,
        }
    }
}

impl Expression {
    pub fn new(kind: ExpressionKind) -> Self {
        Self {
            span: Span::DUMMY,
            kind,
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::new(ExpressionKind::Literal(Literal::Integer(value)))
    }

    pub fn real(value: f64) -> Self {
        Self::new(ExpressionKind::Literal(Literal::Real(value)))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExpressionKind::Literal(Literal::Boolean(value)))
    }

    pub fn char(value: char) -> Self {
        Self::new(ExpressionKind::Literal(Literal::Char(value)))
    }

    pub fn string(value: &str) -> Self {
        Self::new(ExpressionKind::Literal(Literal::String(value.to_string())))
    }

    pub fn variable(name: &str) -> Self {
        Self::new(ExpressionKind::Path(Path::simple(name)))
    }

    pub fn path(segments: &[&str]) -> Self {
        Self::new(ExpressionKind::Path(Path::new(segments)))
    }

    pub fn binary(lhs: Expression, operator: BinaryOperatorKind, rhs: Expression) -> Self {
        Self::new(ExpressionKind::Binary {
            lhs: Box::new(lhs),
            operator,
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(operator: UnaryOperatorKind, operand: Expression) -> Self {
        Self::new(ExpressionKind::Unary {
            operator,
            operand: Box::new(operand),
        })
    }

    pub fn call(name: &str, arguments: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::Call {
            target: Path::simple(name),
            arguments,
        })
    }

    pub fn index(target: &[&str], index: Expression) -> Self {
        Self::new(ExpressionKind::Index {
            target: Path::new(target),
            index: Box::new(index),
        })
    }

    pub fn deref(pointer: Expression) -> Self {
        Self::new(ExpressionKind::Deref(Box::new(pointer)))
    }

    pub fn address_of(operand: Expression) -> Self {
        Self::new(ExpressionKind::AddressOf(Box::new(operand)))
    }
}

impl Statement {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            span: Span::DUMMY,
            kind,
        }
    }

    pub fn assign(lhs: Expression, rhs: Expression) -> Self {
        Self::new(StatementKind::Assign { lhs, rhs })
    }

    pub fn for_loop(variable: &str, start: Expression, end: Expression, body: Statement) -> Self {
        Self::new(StatementKind::For {
            variable: Identifier::new(variable),
            start,
            end,
            body: Box::new(body),
        })
    }

    pub fn if_then(condition: Expression, positive: Statement, negative: Option<Statement>) -> Self {
        Self::new(StatementKind::If {
            condition,
            positive: Box::new(positive),
            negative: negative.map(Box::new),
        })
    }

    pub fn while_loop(condition: Expression, body: Statement) -> Self {
        Self::new(StatementKind::While {
            condition,
            body: Box::new(body),
        })
    }

    pub fn call(name: &str, arguments: Vec<Expression>) -> Self {
        Self::new(StatementKind::ProcedureCall {
            target: Path::simple(name),
            arguments,
        })
    }

    pub fn block(statements: Vec<Statement>) -> Self {
        Self::new(StatementKind::Block(statements))
    }
}

impl Subprogram {
    fn new(kind: SubprogramKind, name: &str, parameters: Vec<Declaration>, return_type: Option<Type>) -> Self {
        Self {
            span: Span::DUMMY,
            kind,
            name: Identifier::new(name),
            parameters,
            return_type,
            type_declarations: Vec::new(),
            declarations: Vec::new(),
            subprograms: Vec::new(),
            body: Statement::block(Vec::new()),
        }
    }

    pub fn function(name: &str, parameters: Vec<Declaration>, return_type: Type) -> Self {
        Self::new(SubprogramKind::Function, name, parameters, Some(return_type))
    }

    pub fn procedure(name: &str, parameters: Vec<Declaration>) -> Self {
        Self::new(SubprogramKind::Procedure, name, parameters, None)
    }

    pub fn with_types(mut self, type_declarations: Vec<TypeDeclaration>) -> Self {
        self.type_declarations = type_declarations;
        self
    }

    pub fn with_declarations(mut self, declarations: Vec<Declaration>) -> Self {
        self.declarations = declarations;
        self
    }

    pub fn with_subprograms(mut self, subprograms: Vec<Subprogram>) -> Self {
        self.subprograms = subprograms;
        self
    }

    pub fn with_body(mut self, statements: Vec<Statement>) -> Self {
        self.body = Statement::block(statements);
        self
    }
}

impl Program {
    pub fn new(name: &str, imports: &[&str]) -> Self {
        Self {
            span: Span::DUMMY,
            name: Identifier::new(name),
            imports: imports.iter().map(|i| Identifier::new(*i)).collect(),
            type_declarations: Vec::new(),
            declarations: Vec::new(),
            subprograms: Vec::new(),
            body: Statement::block(Vec::new()),
        }
    }

    pub fn with_types(mut self, type_declarations: Vec<TypeDeclaration>) -> Self {
        self.type_declarations = type_declarations;
        self
    }

    pub fn with_declarations(mut self, declarations: Vec<Declaration>) -> Self {
        self.declarations = declarations;
        self
    }

    pub fn with_subprograms(mut self, subprograms: Vec<Subprogram>) -> Self {
        self.subprograms = subprograms;
        self
    }

    pub fn with_body(mut self, statements: Vec<Statement>) -> Self {
        self.body = Statement::block(statements);
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserializes_parser_output() {
        let json = r#"{
            "name": { "name": "demo" },
            "imports": [{ "name": "output" }],
            "declarations": [
                { "names": [{ "name": "x" }], "ty": { "kind": "integer" } }
            ],
            "body": {
                "span": { "start": 30, "end": 41 },
                "kind": { "block": [
                    { "kind": { "assign": {
                        "lhs": { "kind": { "path": { "segments": [{ "name": "x" }] } } },
                        "rhs": { "kind": { "literal": { "integer": 7 } } }
                    } } }
                ] }
            }
        }"#;

        let program: Program = serde_json::from_str(json).unwrap();

        let expected = Program::new("demo", &["output"])
            .with_declarations(vec![Declaration::new(&["x"], Type::integer())])
            .with_body(vec![Statement::assign(
                Expression::variable("x"),
                Expression::integer(7),
            )]);

        assert_eq!(program.declarations, expected.declarations);
        assert_eq!(program.body.span, Span::new(30, 41));
        assert_eq!(program.body.kind, expected.body.kind);
    }

    #[test]
    fn lvalue_expressions() {
        assert!(Expression::variable("x").kind.is_lvalue());
        assert!(Expression::index(&["a"], Expression::integer(1)).kind.is_lvalue());
        assert!(Expression::deref(Expression::variable("p")).kind.is_lvalue());
        assert!(!Expression::integer(1).kind.is_lvalue());
        assert!(!Expression::call("f", vec![]).kind.is_lvalue());
    }
}
