//! The parsed-program data model the expression compiler consumes.
//!
//! These are plain data types a front end builds; nothing here runs
//! any analysis. Variable references already carry a resolved storage
//! class and slot number (name resolution against the scoped symbol
//! table happens before a tree reaches the compiler), mirroring the
//! stated boundary: this crate's core starts from an already-parsed
//! program plus its auxiliary tables.

use serde::{Deserialize, Serialize};

use crate::ir::opcode::VarClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shr,
    Shl,
    Xor,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    UGt,
    UGe,
    ULt,
    ULe,
}

/// A plain `=` stores `value` directly; the rest read-modify-write
/// through the corresponding `BinOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Compound(BinOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncDecOp {
    Inc,
    Dec,
}

/// A message send's selector: either known at parse time or computed
/// from an expression evaluated at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SelectorRef {
    Named(String),
    Computed(Box<Expr>),
}

/// One `selector(args...)` message within a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub selector: SelectorRef,
    pub args: Vec<Expr>,
}

/// Who a send or super-send is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Receiver {
    Expr(Box<Expr>),
    SelfObject,
    /// A super-send: messages dispatch starting at `superclass`'s
    /// method table rather than the receiver's own class.
    Super { superclass: String },
}

/// One statement in a body: a source line (for debug-annotation
/// emission) plus the expression it evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub line: u32,
    pub expr: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Number(i32),
    Text(String),
    /// A selector used as a value (e.g. passed to `respondsTo:`), not
    /// as part of a send.
    Selector(String),

    /// A read or, as an assignment target, a write of a global, local,
    /// temp, or parameter slot. `index` is `Some` for indexed access.
    Var {
        class: VarClass,
        slot: u16,
        index: Option<Box<Expr>>,
    },
    /// The property named on the current object.
    Prop { name: String },
    /// `@var` / `@prop`: the slot's address rather than its value.
    AddrOf(Box<Expr>),

    ClassRef(String),
    ObjectRef(String),
    SelfRef,

    Call { target: String, args: Vec<Expr> },
    ExternCall { script: u16, entry: u16, args: Vec<Expr> },

    Send { receiver: Receiver, messages: Vec<Message> },

    Return(Option<Box<Expr>>),

    Unary { op: UnOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Nary { op: BinOp, operands: Vec<Expr> },
    /// A chained comparison (`a < b < c`): adjacent pairs are compared
    /// left to right, all must hold for the chain to be true.
    Compare { op: CmpOp, operands: Vec<Expr> },
    And(Vec<Expr>),
    Or(Vec<Expr>),

    Assign { target: Box<Expr>, op: AssignOp, value: Box<Expr> },
    IncDec { target: Box<Expr>, op: IncDecOp },

    If {
        test: Box<Expr>,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// A lowered `if/elif/.../else` chain: the last arm may have no
    /// test (the `else` fallthrough).
    Cond(Vec<(Option<Expr>, Vec<Stmt>)>),
    Switch {
        scrutinee: Box<Expr>,
        cases: Vec<(Expr, Vec<Stmt>)>,
        default: Option<Vec<Stmt>>,
    },
    /// Cases numbered `0, 1, 2, ...` implicitly.
    SwitchTo {
        scrutinee: Box<Expr>,
        cases: Vec<Vec<Stmt>>,
    },
    While {
        test: Box<Expr>,
        body: Vec<Stmt>,
    },
    Repeat {
        body: Vec<Stmt>,
    },
    For {
        init: Vec<Stmt>,
        test: Box<Expr>,
        update: Vec<Stmt>,
        body: Vec<Stmt>,
    },

    /// `break [n]` / `continue [n]`: `n` is how many enclosing loops to
    /// unwind, defaulting to 1.
    Break(u32),
    BreakIf(Box<Expr>, u32),
    Continue(u32),
    ContinueIf(Box<Expr>, u32),

    /// `&rest` forwarding: pushes every actual parameter from `first`
    /// onward as a send/call argument list.
    Rest { first: u16 },
}

/// A top-level procedure: a script-global callable with no receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<String>,
    pub has_rest: bool,
    pub body: Vec<Stmt>,
    pub line: u32,
}

/// A method body, to be attached to a class or instance's selector
/// table by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    pub selector: String,
    pub params: Vec<String>,
    pub has_rest: bool,
    pub body: Vec<Stmt>,
    pub line: u32,
}

/// A property's parse-time initial value: either an integer or a
/// reference to a text literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LiteralValue {
    Number(i32),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub value: LiteralValue,
}

/// A class or instance declaration: the selector table the front end
/// parsed, before superclass inheritance has been applied (that
/// happens at compile time, walking declaration order against
/// `superclass`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub species: u16,
    pub superclass: Option<String>,
    pub is_class: bool,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<Method>,
    pub line: u32,
}

/// One slot in the global (script 0) or a script-local variable block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDecl {
    pub slot: u16,
    pub value: Option<LiteralValue>,
}

/// Everything parsed from one source file: the unit the core compiles
/// in a single pass, producing one heap image and one hunk image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub script_number: u16,
    pub file_name: String,
    pub procedures: Vec<Procedure>,
    pub classes: Vec<ClassDecl>,
    pub objects: Vec<ClassDecl>,
    pub variables: Vec<VarDecl>,
    /// Names exported in this unit's dispatch table, for other scripts
    /// to reach via an external call.
    pub public_exports: Vec<String>,
}

