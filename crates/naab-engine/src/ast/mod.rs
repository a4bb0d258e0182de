//! AST consumed by the interpreter.
//!
//! The lexer and parser live outside the core; the engine walks a fully
//! parsed [`Program`]. Every node carries a [`Span`] so runtime errors can
//! point back at the offending source.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Source location attached to every AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// 1-based line number (0 = unknown).
    pub line: u32,
    /// 1-based column number (0 = unknown).
    pub column: u32,
}

impl Span {
    /// A location for synthesised nodes.
    pub const UNKNOWN: Span = Span { line: 0, column: 0 };

    /// Construct a span at `line:column`.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Declared parameter / return types.
///
/// NAAb is dynamically typed; declared types are checked at call and
/// callback boundaries, with `Any` matching every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Matches any value.
    Any,
    /// 64-bit integer.
    Int,
    /// Double-precision float.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// List of values.
    List,
    /// String-keyed dictionary.
    Dict,
    /// A named struct type.
    Named(String),
}

impl TypeExpr {
    /// Display name used in error messages.
    pub fn name(&self) -> &str {
        match self {
            TypeExpr::Any => "any",
            TypeExpr::Int => "int",
            TypeExpr::Float => "float",
            TypeExpr::Bool => "bool",
            TypeExpr::String => "string",
            TypeExpr::List => "list",
            TypeExpr::Dict => "dict",
            TypeExpr::Named(n) => n,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&` (short-circuit)
    And,
    /// `||` (short-circuit)
    Or,
}

impl BinaryOp {
    /// Operator token as written in source, for error messages.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
}

/// One arm of a `match` expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchArm {
    /// Pattern to compare against; `None` is the wildcard `_` arm.
    pub pattern: Option<Expr>,
    /// Arm body.
    pub body: Expr,
}

/// Function parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Declared type (`Any` when omitted in source).
    pub ty: TypeExpr,
    /// Default expression for trailing optional parameters.
    pub default: Option<Expr>,
}

/// Expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal.
    IntLit(i64, Span),
    /// Float literal.
    FloatLit(f64, Span),
    /// String literal.
    StringLit(String, Span),
    /// Boolean literal.
    BoolLit(bool, Span),
    /// `null`.
    NullLit(Span),
    /// Identifier reference.
    Ident(String, Span),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
        /// Location of the operator.
        span: Span,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
        /// Location of the operator.
        span: Span,
    },
    /// Call expression `callee(args...)`.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Location of the call.
        span: Span,
    },
    /// Member access `object.field`.
    Member {
        /// Object expression.
        object: Box<Expr>,
        /// Field name.
        field: String,
        /// Location of the access.
        span: Span,
    },
    /// Index access `object[index]`.
    Index {
        /// Object expression.
        object: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
        /// Location of the access.
        span: Span,
    },
    /// Range `start..end` (end exclusive).
    Range {
        /// Start expression.
        start: Box<Expr>,
        /// End expression.
        end: Box<Expr>,
        /// Location.
        span: Span,
    },
    /// List literal `[a, b, c]`.
    ListLit(Vec<Expr>, Span),
    /// Dict literal `{"k": v}`.
    DictLit(Vec<(String, Expr)>, Span),
    /// Struct literal `Point { x: 1, y: 2 }`.
    StructLit {
        /// Struct type name.
        type_name: String,
        /// Field initialisers.
        fields: Vec<(String, Expr)>,
        /// Location.
        span: Span,
    },
    /// Inline foreign-code expression `<<lang ... >>`.
    InlineCode(Arc<InlineCode>),
    /// If-expression `if c { a } else { b }`.
    IfExpr {
        /// Condition.
        condition: Box<Expr>,
        /// Value when true.
        then_branch: Box<Expr>,
        /// Value when false.
        else_branch: Box<Expr>,
        /// Location.
        span: Span,
    },
    /// Lambda `fn (params) { body }`.
    Lambda {
        /// Parameters.
        params: Vec<Param>,
        /// Body.
        body: Box<Stmt>,
        /// Location.
        span: Span,
    },
    /// Match expression.
    Match {
        /// Scrutinee.
        subject: Box<Expr>,
        /// Arms in source order.
        arms: Vec<MatchArm>,
        /// Location.
        span: Span,
    },
    /// Pipeline `value |> callee(args)`, sugar for `callee(value, args)`.
    Pipeline {
        /// Left-hand value.
        value: Box<Expr>,
        /// Right-hand call.
        call: Box<Expr>,
        /// Location of the operator.
        span: Span,
    },
}

/// An inline foreign-code block as produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineCode {
    /// Language tag (`python`, `javascript`, `rust`, ...).
    pub language: String,
    /// Raw foreign source.
    pub source: String,
    /// NAAb variable names interpolated into the source.
    pub bound_variables: Vec<String>,
    /// Location of the `<<`.
    pub span: Span,
}

impl Expr {
    /// Location of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit(_, s)
            | Expr::FloatLit(_, s)
            | Expr::StringLit(_, s)
            | Expr::BoolLit(_, s)
            | Expr::NullLit(s)
            | Expr::Ident(_, s)
            | Expr::ListLit(_, s)
            | Expr::DictLit(_, s) => *s,
            Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Member { span, .. }
            | Expr::Index { span, .. }
            | Expr::Range { span, .. }
            | Expr::StructLit { span, .. }
            | Expr::IfExpr { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Match { span, .. }
            | Expr::Pipeline { span, .. } => *span,
            Expr::InlineCode(code) => code.span,
        }
    }

    /// The inline-code payload, if this expression is one.
    pub fn as_inline_code(&self) -> Option<&Arc<InlineCode>> {
        match self {
            Expr::InlineCode(code) => Some(code),
            _ => None,
        }
    }
}

/// Statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = init`
    VarDecl {
        /// Variable name.
        name: String,
        /// Initialiser.
        init: Expr,
        /// Location.
        span: Span,
    },
    /// `target = value` / `target[i] = value` / `target.f = value`
    Assign {
        /// Assignment target.
        target: Expr,
        /// New value.
        value: Expr,
        /// Location.
        span: Span,
    },
    /// Bare expression evaluated for effect.
    ExprStmt(Expr),
    /// `if cond { .. } else { .. }`
    If {
        /// Condition.
        condition: Expr,
        /// Then branch.
        then_branch: Box<Stmt>,
        /// Optional else branch.
        else_branch: Option<Box<Stmt>>,
        /// Location.
        span: Span,
    },
    /// `for name in iterable { .. }`
    For {
        /// Loop variable.
        var: String,
        /// Iterable expression.
        iterable: Expr,
        /// Body.
        body: Box<Stmt>,
        /// Location.
        span: Span,
    },
    /// `while cond { .. }`
    While {
        /// Condition.
        condition: Expr,
        /// Body.
        body: Box<Stmt>,
        /// Location.
        span: Span,
    },
    /// `break`
    Break(Span),
    /// `continue`
    Continue(Span),
    /// `return expr?`
    Return(Option<Expr>, Span),
    /// `throw expr`
    Throw(Expr, Span),
    /// `try { .. } catch (name) { .. } finally { .. }`
    Try {
        /// Protected body.
        body: Box<Stmt>,
        /// Catch binding and handler.
        catch: Option<(String, Box<Stmt>)>,
        /// Finally block, run on every exit path.
        finally: Option<Box<Stmt>>,
        /// Location.
        span: Span,
    },
    /// `{ .. }` compound block.
    Block(Vec<Stmt>, Span),
    /// Function declaration.
    FnDecl(Arc<FnDecl>),
    /// Struct declaration.
    StructDecl(Arc<StructDecl>),
    /// `use path as alias` — binds a library block.
    Use {
        /// Block identifier (e.g. `BLOCK-CPP-MATH`).
        block_id: String,
        /// Alias bound in the current scope.
        alias: String,
        /// Location.
        span: Span,
    },
}

impl Stmt {
    /// Location of this statement.
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Block(_, span)
            | Stmt::Use { span, .. } => *span,
            Stmt::Break(s) | Stmt::Continue(s) | Stmt::Return(_, s) | Stmt::Throw(_, s) => *s,
            Stmt::ExprStmt(e) => e.span(),
            Stmt::FnDecl(f) => f.span,
            Stmt::StructDecl(s) => s.span,
        }
    }

    /// The inline-code expression driving this statement, if any.
    ///
    /// Used by the dependency analyzer: `let x = <<lang ..>>` and a bare
    /// `<<lang ..>>` expression-statement are the polyglot statement forms.
    pub fn polyglot_payload(&self) -> Option<(&Arc<InlineCode>, Option<&str>)> {
        match self {
            Stmt::VarDecl { name, init, .. } => {
                init.as_inline_code().map(|c| (c, Some(name.as_str())))
            }
            Stmt::ExprStmt(e) => e.as_inline_code().map(|c| (c, None)),
            _ => None,
        }
    }
}

/// Function declaration node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnDecl {
    /// Function name.
    pub name: String,
    /// Parameters.
    pub params: Vec<Param>,
    /// Declared return type.
    pub return_type: TypeExpr,
    /// Body (a compound block).
    pub body: Stmt,
    /// Source file the declaration came from.
    pub source_file: String,
    /// Location.
    pub span: Span,
}

/// Struct declaration node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    /// Struct type name.
    pub name: String,
    /// Ordered fields with declared types.
    pub fields: Vec<(String, TypeExpr)>,
    /// Location.
    pub span: Span,
}

/// A parsed program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// `use` statements in source order.
    pub uses: Vec<Stmt>,
    /// Top-level function declarations.
    pub functions: Vec<Arc<FnDecl>>,
    /// Top-level struct declarations.
    pub structs: Vec<Arc<StructDecl>>,
    /// The main block.
    pub main: Vec<Stmt>,
    /// Source file name for error reporting.
    pub source_file: String,
}
