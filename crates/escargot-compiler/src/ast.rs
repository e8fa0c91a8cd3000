//! The syntax tree the generator compiles.
//!
//! The parser is an external collaborator; these nodes are what it hands
//! over. The tree is a pair of tagged enums ([`Stmt`], [`Expr`]) rather than
//! a class hierarchy, and emission dispatches by exhaustive match.
//!
//! Every node answers [`Stmt::rough_code_size_in_words`] (or the expression
//! equivalent): a cheap pre-pass whose result, multiplied by the emitter's
//! word size, upper-bounds the bytes the node will emit. The generator uses
//! the total to reserve the code buffer once, so recorded code positions
//! stay valid for the whole emission.

use escargot_core::string_table::StringId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Division,
    Mod,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    SignedRightShift,
    UnsignedRightShift,
    Equal,
    NotEqual,
    StrictEqual,
    NotStrictEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    BitwiseNot,
    LogicalNot,
    TypeOf,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(StringId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKey {
    /// `obj.name`
    Named(StringId),
    /// `obj[expr]`
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Identifier(StringId),
    This,
    Array(Vec<Expr>),
    Object(Vec<(StringId, Expr)>),
    Function {
        name: Option<StringId>,
        params: Vec<StringId>,
        body: Vec<Stmt>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        /// Some for compound assignment (`+=` etc).
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        key: MemberKey,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    VarDecl(Vec<(StringId, Option<Expr>)>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),
    VarDecl(Vec<(StringId, Option<Expr>)>),
    FunctionDecl {
        name: StringId,
        params: Vec<StringId>,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        left: Box<Expr>,
        right: Expr,
        body: Box<Stmt>,
    },
    /// Cases are split around the default clause so emission can preserve
    /// source order for fallthrough.
    Switch {
        discriminant: Expr,
        cases_before_default: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
        cases_after_default: Vec<SwitchCase>,
    },
    Break,
    Continue,
    BreakLabel(StringId),
    ContinueLabel(StringId),
    Labeled {
        label: StringId,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Empty,
}

impl Expr {
    pub fn rough_code_size_in_words(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Identifier(_) | Expr::This => 1,
            Expr::Array(elems) => {
                2 + elems
                    .iter()
                    .map(|e| 2 + e.rough_code_size_in_words())
                    .sum::<usize>()
            }
            Expr::Object(props) => {
                2 + props
                    .iter()
                    .map(|(_, e)| 2 + e.rough_code_size_in_words())
                    .sum::<usize>()
            }
            Expr::Function { .. } => 1,
            Expr::Binary { left, right, .. } => {
                1 + left.rough_code_size_in_words() + right.rough_code_size_in_words()
            }
            Expr::Logical { left, right, .. } => {
                2 + left.rough_code_size_in_words() + right.rough_code_size_in_words()
            }
            Expr::Unary { expr, .. } => 2 + expr.rough_code_size_in_words(),
            Expr::Update { target, .. } => 4 + 2 * target.rough_code_size_in_words(),
            Expr::Assign { target, value, .. } => {
                3 + 2 * target.rough_code_size_in_words()
                    + value.rough_code_size_in_words()
            }
            Expr::Member { object, key } => {
                let key_words = match key {
                    MemberKey::Named(_) => 0,
                    MemberKey::Computed(e) => e.rough_code_size_in_words(),
                };
                2 + object.rough_code_size_in_words() + key_words
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                2 + callee.rough_code_size_in_words()
                    + args
                        .iter()
                        .map(|a| a.rough_code_size_in_words())
                        .sum::<usize>()
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                2 + test.rough_code_size_in_words()
                    + consequent.rough_code_size_in_words()
                    + alternate.rough_code_size_in_words()
            }
        }
    }
}

impl Stmt {
    pub fn rough_code_size_in_words(&self) -> usize {
        match self {
            Stmt::Expression(e) => 1 + e.rough_code_size_in_words(),
            Stmt::VarDecl(decls) => decls
                .iter()
                .map(|(_, init)| {
                    2 + init
                        .as_ref()
                        .map(|e| e.rough_code_size_in_words())
                        .unwrap_or(0)
                })
                .sum(),
            Stmt::FunctionDecl { .. } => 3,
            Stmt::Block(stmts) => stmts.iter().map(|s| s.rough_code_size_in_words()).sum(),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                2 + test.rough_code_size_in_words()
                    + consequent.rough_code_size_in_words()
                    + alternate
                        .as_ref()
                        .map(|a| a.rough_code_size_in_words())
                        .unwrap_or(0)
            }
            Stmt::While { test, body } => {
                3 + test.rough_code_size_in_words() + body.rough_code_size_in_words()
            }
            Stmt::DoWhile { body, test } => {
                3 + test.rough_code_size_in_words() + body.rough_code_size_in_words()
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let init_words = match init {
                    Some(ForInit::VarDecl(decls)) => decls
                        .iter()
                        .map(|(_, e)| {
                            2 + e
                                .as_ref()
                                .map(|e| e.rough_code_size_in_words())
                                .unwrap_or(0)
                        })
                        .sum(),
                    Some(ForInit::Expr(e)) => 1 + e.rough_code_size_in_words(),
                    None => 0,
                };
                10 + init_words
                    + test
                        .as_ref()
                        .map(|e| e.rough_code_size_in_words())
                        .unwrap_or(1)
                    + update
                        .as_ref()
                        .map(|e| e.rough_code_size_in_words())
                        .unwrap_or(0)
                    + body.rough_code_size_in_words()
            }
            Stmt::ForIn { left, right, body } => {
                30 + left.rough_code_size_in_words()
                    + right.rough_code_size_in_words()
                    + body.rough_code_size_in_words()
            }
            Stmt::Switch {
                discriminant,
                cases_before_default,
                default,
                cases_after_default,
            } => {
                let case_words = |cases: &[SwitchCase]| -> usize {
                    cases
                        .iter()
                        .map(|c| {
                            2 + c.test.rough_code_size_in_words()
                                + c.body
                                    .iter()
                                    .map(|s| s.rough_code_size_in_words())
                                    .sum::<usize>()
                        })
                        .sum()
                };
                10 + discriminant.rough_code_size_in_words()
                    + case_words(cases_before_default)
                    + case_words(cases_after_default)
                    + default
                        .as_ref()
                        .map(|stmts| {
                            stmts
                                .iter()
                                .map(|s| s.rough_code_size_in_words())
                                .sum::<usize>()
                        })
                        .unwrap_or(0)
            }
            Stmt::Break
            | Stmt::Continue
            | Stmt::BreakLabel(_)
            | Stmt::ContinueLabel(_) => 2,
            Stmt::Labeled { body, .. } => 6 + body.rough_code_size_in_words(),
            Stmt::Return(e) => {
                1 + e
                    .as_ref()
                    .map(|e| e.rough_code_size_in_words())
                    .unwrap_or(0)
            }
            Stmt::Throw(e) => 1 + e.rough_code_size_in_words(),
            Stmt::Empty => 0,
        }
    }
}
