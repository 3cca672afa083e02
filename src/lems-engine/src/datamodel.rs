// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The typed neuron description handed to us by the front end.  Parsing,
//! name resolution and type checking have already happened; every
//! variable carries its resolved type and every node its source lines.

use std::fmt;

use serde::Serialize;

/// An inclusive range of source lines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Loc {
    pub start: u32,
    pub end: u32,
}

impl Loc {
    pub fn new(start: u32, end: u32) -> Self {
        Loc { start, end }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PrimitiveType {
    Real,
    Integer,
    Boolean,
    Void,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PrimitiveType::Real => "real",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Void => "void",
            PrimitiveType::String => "string",
        };
        write!(f, "{name}")
    }
}

/// The structure of a unit as written in the source, e.g. `pA*1/mV**2`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum UnitExpr {
    Name(String),
    Literal(f64),
    Mul(Box<UnitExpr>, Box<UnitExpr>),
    Div(Box<UnitExpr>, Box<UnitExpr>),
    Pow(Box<UnitExpr>, i32),
    Paren(Box<UnitExpr>),
}

/// A physical unit resolved by the type checker: its written form, its
/// exponents over the seven SI base quantities and the decimal magnitude
/// of its prefix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitType {
    pub structure: UnitExpr,
    /// length, mass, time, current, temperature, substance, luminous intensity
    pub exponents: [i32; 7],
    pub magnitude: i32,
}

impl UnitType {
    /// A unit written as a single symbol, with its magnitude derived from
    /// the symbol's metric prefix.
    pub fn named(symbol: &str, exponents: [i32; 7]) -> Self {
        UnitType {
            structure: UnitExpr::Name(symbol.to_owned()),
            exponents,
            magnitude: crate::units::power_of_prefix(symbol),
        }
    }

    /// A unit of time, the only quantity simulation step lengths use.
    pub fn time(symbol: &str) -> Self {
        UnitType::named(symbol, [0, 0, 1, 0, 0, 0, 0])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TypeDescriptor {
    Primitive(PrimitiveType),
    Unit(UnitType),
    /// A type the front end resolved to something we have no mapping for.
    Unsupported(String),
}

impl TypeDescriptor {
    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeDescriptor::Primitive(PrimitiveType::Boolean))
    }

    pub fn as_unit(&self) -> Option<&UnitType> {
        match self {
            TypeDescriptor::Unit(unit) => Some(unit),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Positive,
    Negative,
    BitNot,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Lte,
    Eq,
    Neq,
    Gte,
    Gt,
    And,
    Or,
    BitOr,
    BitXor,
    BitAnd,
    ShiftLeft,
    ShiftRight,
}

/// A source expression.  `Var` carries the type the checker resolved for
/// the name, which for a bare unit symbol like `mV` is that unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SourceExpr {
    Number(f64, Option<UnitType>),
    Bool(bool),
    Var(String, Option<TypeDescriptor>),
    Call(String, Vec<SourceExpr>),
    Paren(Box<SourceExpr>),
    Unary(UnaryOp, Box<SourceExpr>),
    Binary(BinaryOp, Box<SourceExpr>, Box<SourceExpr>),
    Conditional(Box<SourceExpr>, Box<SourceExpr>, Box<SourceExpr>),
}

impl SourceExpr {
    pub fn var(name: &str) -> Self {
        SourceExpr::Var(name.to_owned(), None)
    }

    pub fn num(value: f64) -> Self {
        SourceExpr::Number(value, None)
    }

    pub fn binary(op: BinaryOp, lhs: SourceExpr, rhs: SourceExpr) -> Self {
        SourceExpr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Names of every function called anywhere in the expression,
    /// in pre-order.
    pub fn called_functions(&self) -> Vec<&str> {
        let mut names = vec![];
        self.collect_calls(&mut names);
        names
    }

    /// The outermost conditional anywhere in the expression, itself
    /// included.
    pub fn first_conditional(&self) -> Option<&SourceExpr> {
        match self {
            SourceExpr::Number(_, _) | SourceExpr::Bool(_) | SourceExpr::Var(_, _) => None,
            SourceExpr::Conditional(_, _, _) => Some(self),
            SourceExpr::Call(_, args) => args.iter().find_map(|arg| arg.first_conditional()),
            SourceExpr::Paren(e) | SourceExpr::Unary(_, e) => e.first_conditional(),
            SourceExpr::Binary(_, l, r) => l.first_conditional().or_else(|| r.first_conditional()),
        }
    }

    fn collect_calls<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            SourceExpr::Number(_, _) | SourceExpr::Bool(_) | SourceExpr::Var(_, _) => {}
            SourceExpr::Call(name, args) => {
                names.push(name.as_str());
                for arg in args.iter() {
                    arg.collect_calls(names);
                }
            }
            SourceExpr::Paren(e) | SourceExpr::Unary(_, e) => e.collect_calls(names),
            SourceExpr::Binary(_, l, r) => {
                l.collect_calls(names);
                r.collect_calls(names);
            }
            SourceExpr::Conditional(c, t, f) => {
                c.collect_calls(names);
                t.collect_calls(names);
                f.collect_calls(names);
            }
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(ty) => write!(f, "{ty}"),
            TypeDescriptor::Unit(unit) => write!(f, "{}", unit.structure),
            TypeDescriptor::Unsupported(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for UnitExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnitExpr::Name(name) => write!(f, "{name}"),
            UnitExpr::Literal(n) => write!(f, "{}", crate::common::format_number(*n)),
            UnitExpr::Mul(l, r) => write!(f, "{l}*{r}"),
            UnitExpr::Div(l, r) => write!(f, "{l}/{r}"),
            UnitExpr::Pow(base, exp) => write!(f, "{base}**{exp}"),
            UnitExpr::Paren(e) => write!(f, "({e})"),
        }
    }
}

impl fmt::Display for SourceExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceExpr::Number(n, None) => write!(f, "{}", crate::common::format_number(*n)),
            SourceExpr::Number(n, Some(unit)) => {
                write!(f, "{}{}", crate::common::format_number(*n), unit.structure)
            }
            SourceExpr::Bool(b) => write!(f, "{b}"),
            SourceExpr::Var(name, _) => write!(f, "{name}"),
            SourceExpr::Call(name, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            SourceExpr::Paren(e) => write!(f, "({e})"),
            SourceExpr::Unary(op, e) => {
                let op = match op {
                    UnaryOp::Positive => "+",
                    UnaryOp::Negative => "-",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Not => "not ",
                };
                write!(f, "{op}{e}")
            }
            SourceExpr::Binary(op, l, r) => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Mod => "%",
                    BinaryOp::Pow => "**",
                    BinaryOp::Lt => "<",
                    BinaryOp::Lte => "<=",
                    BinaryOp::Eq => "==",
                    BinaryOp::Neq => "!=",
                    BinaryOp::Gte => ">=",
                    BinaryOp::Gt => ">",
                    BinaryOp::And => "and",
                    BinaryOp::Or => "or",
                    BinaryOp::BitOr => "|",
                    BinaryOp::BitXor => "^",
                    BinaryOp::BitAnd => "&",
                    BinaryOp::ShiftLeft => "<<",
                    BinaryOp::ShiftRight => ">>",
                };
                write!(f, "{l} {op} {r}")
            }
            SourceExpr::Conditional(c, t, e) => write!(f, "{c} ? {t} : {e}"),
        }
    }
}

/// A variable declared in a state, parameter or internals block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableDecl {
    pub name: String,
    pub ty: TypeDescriptor,
    pub value: Option<SourceExpr>,
    pub is_alias: bool,
    /// Set for vector declarations such as `w[n] real`.
    pub is_array: bool,
    pub loc: Loc,
}

impl VariableDecl {
    pub fn new(name: &str, ty: TypeDescriptor, value: Option<SourceExpr>, loc: Loc) -> Self {
        VariableDecl {
            name: name.to_owned(),
            ty,
            value,
            is_alias: false,
            is_array: false,
            loc,
        }
    }

    pub fn alias(mut self) -> Self {
        self.is_alias = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }
}

/// `shape I_syn = ...`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Shape {
    pub name: String,
    pub value: SourceExpr,
    pub loc: Loc,
}

/// `V' = ...`.  `lhs` keeps its ticks.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Equation {
    pub lhs: String,
    pub rhs: SourceExpr,
    pub loc: Loc,
}

impl Equation {
    pub fn simple_name(&self) -> &str {
        crate::common::strip_ticks(&self.lhs)
    }
}

/// `function I_syn pA = ...` inside the equations block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OdeFunction {
    pub name: String,
    pub ty: TypeDescriptor,
    pub value: SourceExpr,
    pub loc: Loc,
}

/// A user defined function; only its name and location matter here.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserFunction {
    pub name: String,
    pub loc: Loc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BufferKind {
    Spike,
    Current,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InputLine {
    pub name: String,
    pub kind: BufferKind,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputLine {
    pub kind: BufferKind,
    pub loc: Loc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Clause {
    pub cond: SourceExpr,
    pub block: Block,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IfStmt {
    pub if_clause: Clause,
    pub elif_clauses: Vec<Clause>,
    pub else_block: Option<Block>,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Stmt {
    Assignment {
        target: String,
        op: AssignOp,
        value: SourceExpr,
        loc: Loc,
    },
    Call {
        name: String,
        args: Vec<SourceExpr>,
        loc: Loc,
    },
    Declaration {
        names: Vec<String>,
        ty: TypeDescriptor,
        value: Option<SourceExpr>,
        loc: Loc,
    },
    If(IfStmt),
    While {
        cond: SourceExpr,
        body: Block,
        loc: Loc,
    },
    For {
        var: String,
        body: Block,
        loc: Loc,
    },
}

impl Stmt {
    pub fn loc(&self) -> Loc {
        match self {
            Stmt::Assignment { loc, .. }
            | Stmt::Call { loc, .. }
            | Stmt::Declaration { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::For { loc, .. } => *loc,
            Stmt::If(stmt) => stmt.loc,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stmt::Assignment {
                target, op, value, ..
            } => {
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::Add => "+=",
                    AssignOp::Sub => "-=",
                    AssignOp::Mul => "*=",
                    AssignOp::Div => "/=",
                };
                write!(f, "{target} {op} {value}")
            }
            Stmt::Call { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            Stmt::Declaration { names, value, .. } => match value {
                Some(value) => write!(f, "{} = {}", names.join(", "), value),
                None => write!(f, "{}", names.join(", ")),
            },
            Stmt::If(stmt) => write!(f, "if {}:", stmt.if_clause.cond),
            Stmt::While { cond, .. } => write!(f, "while {cond}:"),
            Stmt::For { var, .. } => write!(f, "for {var} in ...:"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub loc: Loc,
}

/// One neuron as produced by the front end, with declarations sorted
/// into their blocks.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Neuron {
    pub name: String,
    /// The model this neuron extends, if any.
    pub base: Option<String>,
    pub state: Vec<VariableDecl>,
    pub parameters: Vec<VariableDecl>,
    pub internals: Vec<VariableDecl>,
    pub shapes: Vec<Shape>,
    pub equations: Vec<Equation>,
    pub ode_functions: Vec<OdeFunction>,
    pub functions: Vec<UserFunction>,
    pub inputs: Vec<InputLine>,
    pub outputs: Vec<OutputLine>,
    pub dynamics: Option<Block>,
}

impl Neuron {
    pub fn new(name: &str) -> Self {
        Neuron {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn has_equations(&self) -> bool {
        !self.shapes.is_empty() || !self.equations.is_empty() || !self.ode_functions.is_empty()
    }

    /// Every declaration of every block whose type is boolean.
    pub fn boolean_names(&self) -> Vec<&str> {
        self.state
            .iter()
            .chain(self.parameters.iter())
            .chain(self.internals.iter())
            .filter(|decl| decl.ty.is_boolean())
            .map(|decl| decl.name.as_str())
            .collect()
    }
}

#[test]
fn test_source_expr_display() {
    let expr = SourceExpr::binary(
        BinaryOp::Div,
        SourceExpr::Paren(Box::new(SourceExpr::Unary(
            UnaryOp::Negative,
            Box::new(SourceExpr::var("V")),
        ))),
        SourceExpr::var("Tau"),
    );
    assert_eq!("(-V) / Tau", expr.to_string());

    let mv = UnitType::named("mV", [2, 1, -3, -1, 0, 0, 0]);
    assert_eq!("-70mV", SourceExpr::Number(-70.0, Some(mv)).to_string());
}

#[test]
fn test_called_functions() {
    let expr = SourceExpr::binary(
        BinaryOp::Add,
        SourceExpr::Call("exp".to_owned(), vec![SourceExpr::var("x")]),
        SourceExpr::Call(
            "pow".to_owned(),
            vec![SourceExpr::Call("delta".to_owned(), vec![]), SourceExpr::num(2.0)],
        ),
    );
    assert_eq!(vec!["exp", "pow", "delta"], expr.called_functions());
}
