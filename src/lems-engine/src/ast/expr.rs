// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use serde::{Serialize, Serializer};

use crate::common::{NOT_SUPPORTED, PREFIX_ACT, PREFIX_CONSTANT, strip_ticks};
use crate::datamodel::{BinaryOp, SourceExpr, TypeDescriptor, UnaryOp, UnitType};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
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
    Not,
    BitOr,
    BitXor,
    BitAnd,
    ShiftLeft,
    ShiftRight,
    /// A pure parenthesis node, its payload sits on the right.
    Parens,
    UnaryPlus,
    UnaryMinus,
    UnaryTilde,
    /// No operation; what a `not` turns into once it has been pushed
    /// into its operand.
    None,
}

impl Operator {
    /// Flips a logical or relational operator to its complement.  Every
    /// other kind is left alone.
    pub fn negate(&mut self) {
        use Operator::*;
        *self = match *self {
            And => Or,
            Or => And,
            Not => None,
            None => Not,
            Lt => Gte,
            Gte => Lt,
            Lte => Gt,
            Gt => Lte,
            Eq => Neq,
            Neq => Eq,
            other => other,
        };
    }

    pub fn is_relational(&self) -> bool {
        use Operator::*;
        matches!(self, Lt | Lte | Eq | Neq | Gte | Gt)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Not)
    }
}

impl From<BinaryOp> for Operator {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Operator::Add,
            BinaryOp::Sub => Operator::Sub,
            BinaryOp::Mul => Operator::Mul,
            BinaryOp::Div => Operator::Div,
            BinaryOp::Mod => Operator::Mod,
            BinaryOp::Pow => Operator::Pow,
            BinaryOp::Lt => Operator::Lt,
            BinaryOp::Lte => Operator::Lte,
            BinaryOp::Eq => Operator::Eq,
            BinaryOp::Neq => Operator::Neq,
            BinaryOp::Gte => Operator::Gte,
            BinaryOp::Gt => Operator::Gt,
            BinaryOp::And => Operator::And,
            BinaryOp::Or => Operator::Or,
            BinaryOp::BitOr => Operator::BitOr,
            BinaryOp::BitXor => Operator::BitXor,
            BinaryOp::BitAnd => Operator::BitAnd,
            BinaryOp::ShiftLeft => Operator::ShiftLeft,
            BinaryOp::ShiftRight => Operator::ShiftRight,
        }
    }
}

impl From<UnaryOp> for Operator {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Positive => Operator::UnaryPlus,
            UnaryOp::Negative => Operator::UnaryMinus,
            UnaryOp::BitNot => Operator::UnaryTilde,
            UnaryOp::Not => Operator::Not,
        }
    }
}

/// Expr is the intermediate representation of every value, guard and
/// derivation in the generated model.  Unary operators and parenthesis
/// nodes only carry a right-hand side.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(f64, Option<UnitType>),
    Var(String, Option<TypeDescriptor>),
    Call(String, Vec<Expr>),
    Op(Option<Box<Expr>>, Operator, Option<Box<Expr>>),
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.print())
    }
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_owned(), None)
    }

    pub fn lit(value: f64) -> Self {
        Expr::Literal(value, None)
    }

    /// An opaque piece of target-language text, such as a value taken
    /// verbatim from an override artifact.
    pub fn verbatim(text: &str) -> Self {
        Expr::Var(text.to_owned(), None)
    }

    /// Placeholder for something that could not be converted.
    pub fn not_supported(what: &str) -> Self {
        Expr::Var(format!("{NOT_SUPPORTED}:{what}"), None)
    }

    pub fn binary(lhs: Expr, op: Operator, rhs: Expr) -> Self {
        Expr::Op(Some(Box::new(lhs)), op, Some(Box::new(rhs)))
    }

    pub fn unary(op: Operator, rhs: Expr) -> Self {
        Expr::Op(None, op, Some(Box::new(rhs)))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call(name.to_owned(), args)
    }

    /// Wraps `expr` in a parenthesis node.
    pub fn paren(expr: Expr) -> Self {
        Expr::unary(Operator::Parens, expr)
    }

    /// Like `paren`, but leaves an existing parenthesis node alone.
    pub fn ensure_paren(expr: Expr) -> Self {
        if expr.is_paren() { expr } else { Expr::paren(expr) }
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(lhs, Operator::And, rhs)
    }

    /// The tautology `1 .eq. 1`; the target format has no boolean literals.
    pub fn true_guard() -> Self {
        Expr::binary(Expr::lit(1.0), Operator::Eq, Expr::lit(1.0))
    }

    /// `1 .neq. 1`, the negation of `true_guard`.
    pub fn false_guard() -> Self {
        let mut expr = Expr::true_guard();
        expr.negate_logic();
        expr
    }

    /// `ACT_<var> * (expr)`
    pub fn with_activator(var: &str, expr: Expr) -> Self {
        let activator = format!("{}{}", PREFIX_ACT, strip_ticks(var));
        Expr::binary(Expr::var(&activator), Operator::Mul, Expr::paren(expr))
    }

    /// `(expr) / CON_1ms`, turning a per-millisecond rate into the
    /// per-second rate the target format integrates.
    pub fn per_millisecond(expr: Expr) -> Self {
        let one_ms = format!("{PREFIX_CONSTANT}1ms");
        Expr::binary(Expr::paren(expr), Operator::Div, Expr::var(&one_ms))
    }

    /// `0/0`, a value that fails loudly if a guarded derivation is ever
    /// evaluated outside its cases.
    pub fn exception_condition() -> Self {
        Expr::binary(Expr::lit(0.0), Operator::Div, Expr::lit(0.0))
    }

    pub fn is_paren(&self) -> bool {
        matches!(self, Expr::Op(_, Operator::Parens, _))
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Expr::Op(_, _, _))
    }

    pub fn op(&self) -> Option<Operator> {
        match self {
            Expr::Op(_, op, _) => Some(*op),
            _ => None,
        }
    }

    pub fn lhs(&self) -> Option<&Expr> {
        match self {
            Expr::Op(lhs, _, _) => lhs.as_deref(),
            _ => None,
        }
    }

    pub fn rhs(&self) -> Option<&Expr> {
        match self {
            Expr::Op(_, _, rhs) => rhs.as_deref(),
            _ => None,
        }
    }

    /// Converts a source expression.  Boolean literals become
    /// `1 .eq. 1` / `1 .neq. 1` and both sides of a logical operator are
    /// parenthesized so the printed form is never ambiguous.
    pub fn from_source(source: &SourceExpr) -> Self {
        match source {
            SourceExpr::Number(value, unit) => Expr::Literal(*value, unit.clone()),
            SourceExpr::Bool(true) => Expr::true_guard(),
            SourceExpr::Bool(false) => Expr::false_guard(),
            SourceExpr::Var(name, ty) => Expr::Var(name.clone(), ty.clone()),
            SourceExpr::Call(name, args) => {
                Expr::Call(name.clone(), args.iter().map(Expr::from_source).collect())
            }
            SourceExpr::Paren(inner) => Expr::paren(Expr::from_source(inner)),
            SourceExpr::Unary(UnaryOp::Not, inner) => {
                Expr::unary(Operator::Not, Expr::ensure_paren(Expr::from_source(inner)))
            }
            SourceExpr::Unary(op, inner) => Expr::unary((*op).into(), Expr::from_source(inner)),
            SourceExpr::Binary(op @ (BinaryOp::And | BinaryOp::Or), l, r) => Expr::binary(
                Expr::ensure_paren(Expr::from_source(l)),
                (*op).into(),
                Expr::ensure_paren(Expr::from_source(r)),
            ),
            SourceExpr::Binary(op, l, r) => {
                Expr::binary(Expr::from_source(l), (*op).into(), Expr::from_source(r))
            }
            // conditionals are only meaningful at the top of a declaration
            // or assignment, where callers split them into cases
            SourceExpr::Conditional(_, _, _) => Expr::not_supported(&source.to_string()),
        }
    }

    pub fn print(&self) -> String {
        super::print_eqn(self)
    }

    /// Every operator node, in pre-order.
    pub fn operators(&self) -> Vec<&Expr> {
        self.collect(&|e| matches!(e, Expr::Op(_, _, _)))
    }

    /// Every function call node, in pre-order.
    pub fn functions(&self) -> Vec<&Expr> {
        self.collect(&|e| matches!(e, Expr::Call(_, _)))
    }

    /// Every variable reference, in pre-order.
    pub fn variables(&self) -> Vec<&Expr> {
        self.collect(&|e| matches!(e, Expr::Var(_, _)))
    }

    /// Every numeric literal, in pre-order.
    pub fn numericals(&self) -> Vec<&Expr> {
        self.collect(&|e| matches!(e, Expr::Literal(_, _)))
    }

    fn collect(&self, pred: &dyn Fn(&Expr) -> bool) -> Vec<&Expr> {
        let mut found = vec![];
        self.collect_into(pred, &mut found);
        found
    }

    fn collect_into<'a>(&'a self, pred: &dyn Fn(&Expr) -> bool, found: &mut Vec<&'a Expr>) {
        if pred(self) {
            found.push(self);
        }
        match self {
            Expr::Literal(_, _) | Expr::Var(_, _) => {}
            Expr::Call(_, args) => {
                for arg in args.iter() {
                    arg.collect_into(pred, found);
                }
            }
            Expr::Op(lhs, _, rhs) => {
                if let Some(lhs) = lhs {
                    lhs.collect_into(pred, found);
                }
                if let Some(rhs) = rhs {
                    rhs.collect_into(pred, found);
                }
            }
        }
    }

    /// Whether any sub-expression is a call to `name`.
    pub fn contains_call(&self, name: &str) -> bool {
        self.functions()
            .iter()
            .any(|call| matches!(call, Expr::Call(n, _) if n == name))
    }

    /// Replaces every sub-tree that is structurally equal to `old` with a
    /// copy of `new`.  Replaced sub-trees are not searched again.
    pub fn replace_element(&mut self, old: &Expr, new: &Expr) {
        if self == old {
            *self = new.clone();
            return;
        }
        match self {
            Expr::Literal(_, _) | Expr::Var(_, _) => {}
            Expr::Call(_, args) => {
                for arg in args.iter_mut() {
                    arg.replace_element(old, new);
                }
            }
            Expr::Op(lhs, _, rhs) => {
                if let Some(lhs) = lhs {
                    lhs.replace_element(old, new);
                }
                if let Some(rhs) = rhs {
                    rhs.replace_element(old, new);
                }
            }
        }
    }

    /// Rewrites the expression into its logical complement without using
    /// a `not`: conjunctions become disjunctions of negated operands,
    /// relational operators flip, and `not X` collapses to `X`.  Atoms
    /// and arithmetic carry no truth value and are left alone.
    pub fn negate_logic(&mut self) {
        if let Expr::Op(lhs, op, rhs) = self {
            match op {
                Operator::And | Operator::Or => {
                    op.negate();
                    if let Some(lhs) = lhs {
                        lhs.negate_logic();
                    }
                    if let Some(rhs) = rhs {
                        rhs.negate_logic();
                    }
                }
                // the operand of a `not` already is the complement
                Operator::Not | Operator::None => op.negate(),
                Operator::Parens => {
                    if let Some(rhs) = rhs {
                        rhs.negate_logic();
                    }
                }
                op if op.is_relational() => op.negate(),
                _ => {}
            }
        }
    }

    /// An independent copy of the tree.
    pub fn deep_clone(&self) -> Expr {
        self.clone()
    }

    /// Parenthesizes compound operands of relational operators, so that
    /// `a + b .gt. c` prints as `(a + b) .gt. c`.
    pub fn encapsulate_in_conditions(&mut self) {
        if let Expr::Op(lhs, op, rhs) = self {
            let relational = op.is_relational();
            for side in [lhs, rhs] {
                if let Some(side) = side {
                    if relational && side.is_compound() && !side.is_paren() {
                        let inner = std::mem::replace(side.as_mut(), Expr::lit(0.0));
                        **side = Expr::paren(inner);
                    }
                    side.encapsulate_in_conditions();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{BinaryOp, SourceExpr, UnaryOp};
    use proptest::prelude::*;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    #[test]
    fn test_operator_negate() {
        use Operator::*;
        let cases = [
            (And, Or),
            (Lt, Gte),
            (Lte, Gt),
            (Eq, Neq),
            (Not, None),
            (Add, Add),
            (Parens, Parens),
        ];
        for (from, to) in cases {
            let mut op = from;
            op.negate();
            assert_eq!(to, op, "negate({from:?})");
            op.negate();
            assert_eq!(from, op, "negate(negate({from:?}))");
        }
    }

    #[test]
    fn test_true_and_false_guards() {
        assert_eq!("1 .eq. 1", Expr::true_guard().print());
        assert_eq!("1 .neq. 1", Expr::false_guard().print());
    }

    #[test]
    fn test_from_source_parenthesizes_logic() {
        let source = SourceExpr::binary(
            BinaryOp::And,
            SourceExpr::binary(BinaryOp::Gt, SourceExpr::var("V"), SourceExpr::var("V_th")),
            SourceExpr::Bool(true),
        );
        let expr = Expr::from_source(&source);
        assert_eq!("(V .gt. V_th) .and. (1 .eq. 1)", expr.print());

        let source = SourceExpr::Unary(
            UnaryOp::Not,
            Box::new(SourceExpr::Paren(Box::new(SourceExpr::var("refractory")))),
        );
        // an existing parenthesis is not doubled
        assert_eq!(".not.(refractory)", Expr::from_source(&source).print());
    }

    #[test]
    fn test_traversals_are_preorder() {
        let expr = Expr::binary(
            Expr::call("exp", vec![Expr::binary(v("a"), Operator::Mul, Expr::lit(2.0))]),
            Operator::Add,
            Expr::binary(v("b"), Operator::Sub, Expr::lit(3.0)),
        );
        let vars: Vec<String> = expr.variables().iter().map(|e| e.print()).collect();
        assert_eq!(vec!["a", "b"], vars);
        let nums: Vec<String> = expr.numericals().iter().map(|e| e.print()).collect();
        assert_eq!(vec!["2", "3"], nums);
        assert_eq!(1, expr.functions().len());
        let ops: Vec<Option<Operator>> = expr.operators().iter().map(|e| e.op()).collect();
        assert_eq!(
            vec![Some(Operator::Add), Some(Operator::Mul), Some(Operator::Sub)],
            ops
        );
    }

    #[test]
    fn test_replace_element_is_structural() {
        let mut expr = Expr::binary(
            Expr::binary(v("e"), Operator::Mul, v("x")),
            Operator::Add,
            Expr::call("f", vec![v("e")]),
        );
        let exp1 = Expr::call("exp", vec![Expr::lit(1.0)]);
        expr.replace_element(&v("e"), &exp1);
        assert_eq!("exp(1)*x+f(exp(1))", expr.print());

        // the operator kind is part of equality
        let mut expr = Expr::binary(v("a"), Operator::Add, v("b"));
        expr.replace_element(&Expr::binary(v("a"), Operator::Sub, v("b")), &v("c"));
        assert_eq!("a+b", expr.print());
        expr.replace_element(&Expr::binary(v("a"), Operator::Add, v("b")), &v("c"));
        assert_eq!("c", expr.print());
    }

    #[test]
    fn test_negate_logic_de_morgan() {
        let mut expr = Expr::and(
            Expr::paren(Expr::binary(v("V"), Operator::Gt, v("V_th"))),
            Expr::paren(Expr::binary(v("r"), Operator::Lte, Expr::lit(0.0))),
        );
        expr.negate_logic();
        assert_eq!("(V .leq. V_th) .or. (r .gt. 0)", expr.print());

        // not(not X) is X
        let inner = Expr::binary(v("a"), Operator::Lt, v("b"));
        let mut expr = Expr::unary(Operator::Not, Expr::paren(inner.clone()));
        expr.negate_logic();
        assert_eq!("(a .lt. b)", expr.print());
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let original = Expr::true_guard();
        let mut copy = original.deep_clone();
        copy.negate_logic();
        assert_eq!("1 .eq. 1", original.print());
        assert_eq!("1 .neq. 1", copy.print());
    }

    #[test]
    fn test_helpers() {
        let rhs = Expr::binary(
            Expr::paren(Expr::unary(Operator::UnaryMinus, v("V"))),
            Operator::Div,
            v("Tau"),
        );
        let expr = Expr::per_millisecond(Expr::with_activator("V'", rhs));
        assert_eq!("(ACT_V*((-V)/Tau))/CON_1ms", expr.print());
        assert_eq!("0/0", Expr::exception_condition().print());
    }

    #[test]
    fn test_encapsulate_in_conditions() {
        let mut expr = Expr::binary(
            Expr::binary(v("a"), Operator::Add, v("b")),
            Operator::Gte,
            v("c"),
        );
        expr.encapsulate_in_conditions();
        assert_eq!("(a+b) .geq. c", expr.print());
        // idempotent
        expr.encapsulate_in_conditions();
        assert_eq!("(a+b) .geq. c", expr.print());
    }

    fn atom() -> impl Strategy<Value = Expr> {
        prop_oneof![
            "[a-z][a-z0-9_]{0,6}".prop_map(|s| Expr::var(&s)),
            (-100i32..100).prop_map(|n| Expr::lit(n as f64)),
        ]
    }

    fn relational() -> impl Strategy<Value = Operator> {
        prop_oneof![
            Just(Operator::Lt),
            Just(Operator::Lte),
            Just(Operator::Eq),
            Just(Operator::Neq),
            Just(Operator::Gte),
            Just(Operator::Gt),
        ]
    }

    fn logic_expr() -> impl Strategy<Value = Expr> {
        let leaf = (atom(), relational(), atom()).prop_map(|(l, op, r)| Expr::binary(l, op, r));
        leaf.prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(l, r)| Expr::and(Expr::paren(l), Expr::paren(r))),
                (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::binary(
                    Expr::paren(l),
                    Operator::Or,
                    Expr::paren(r)
                )),
                inner.prop_map(|e| Expr::unary(Operator::Not, Expr::paren(e))),
            ]
        })
    }

    fn operator_kinds(expr: &Expr) -> Vec<Option<Operator>> {
        expr.operators().iter().map(|e| e.op()).collect()
    }

    proptest! {
        #[test]
        fn negate_logic_is_an_involution(expr in logic_expr()) {
            let mut twice = expr.clone();
            twice.negate_logic();
            twice.negate_logic();
            prop_assert_eq!(operator_kinds(&expr), operator_kinds(&twice));
            prop_assert_eq!(expr, twice);
        }
    }
}
