// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

mod expr;

pub use self::expr::{Expr, Operator};

use crate::common::format_number;
use crate::units::unit_symbol;

/// Visitors walk Expr ASTs.
pub trait Visitor<T> {
    fn walk(&mut self, e: &Expr) -> T;
}

fn operator_str(op: Operator) -> &'static str {
    use Operator::*;
    match op {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Mod => "%",
        Pow => "^",
        Lt => " .lt. ",
        Lte => " .leq. ",
        Eq => " .eq. ",
        Neq => " .neq. ",
        Gte => " .geq. ",
        Gt => " .gt. ",
        And => " .and. ",
        Or => " .or. ",
        Not => ".not.",
        BitOr => "[BitOr_not_supported]",
        BitXor => "[BitXor_not_supported]",
        BitAnd => "[BitAnd_not_supported]",
        ShiftLeft => "[BitShiftL_not_supported]",
        ShiftRight => "[BitShiftR_not_supported]",
        UnaryPlus => "+",
        UnaryMinus => "-",
        UnaryTilde => "[UnaryTilde_not_supported]",
        Parens | None => "",
    }
}

/// Renders expressions in the LEMS expression syntax.
struct PrintVisitor {}

impl Visitor<String> for PrintVisitor {
    fn walk(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(n, None) => format_number(*n),
            Expr::Literal(n, Some(unit)) => format!("{} {}", format_number(*n), unit_symbol(unit)),
            Expr::Var(id, _) => id.clone(),
            Expr::Call(func, args) => {
                let args: Vec<String> = args.iter().map(|e| self.walk(e)).collect();
                format!("{}({})", func, args.join(","))
            }
            Expr::Op(l, op, r) => {
                let l = l.as_ref().map(|l| self.walk(l)).unwrap_or_default();
                let r = r.as_ref().map(|r| self.walk(r)).unwrap_or_default();
                match op {
                    Operator::Parens => format!("({r})"),
                    op => format!("{}{}{}", l, operator_str(*op), r),
                }
            }
        }
    }
}

pub fn print_eqn(expr: &Expr) -> String {
    let mut visitor = PrintVisitor {};
    visitor.walk(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::UnitType;

    #[test]
    fn test_print_eqn() {
        let mv = UnitType::named("mV", [2, 1, -3, -1, 0, 0, 0]);
        assert_eq!("-70 mV", print_eqn(&Expr::Literal(-70.0, Some(mv))));
        assert_eq!("0.5", print_eqn(&Expr::lit(0.5)));

        let expr = Expr::binary(
            Expr::paren(Expr::binary(Expr::var("V"), Operator::Gt, Expr::var("V_th"))),
            Operator::Or,
            Expr::unary(Operator::Not, Expr::paren(Expr::var("r"))),
        );
        assert_eq!("(V .gt. V_th) .or. .not.(r)", print_eqn(&expr));

        let expr = Expr::call(
            "pow",
            vec![Expr::var("x"), Expr::binary(Expr::lit(2.0), Operator::Pow, Expr::lit(3.0))],
        );
        assert_eq!("pow(x,2^3)", print_eqn(&expr));

        let expr = Expr::unary(Operator::UnaryMinus, Expr::var("I_e"));
        assert_eq!("-I_e", print_eqn(&expr));
    }

    #[test]
    fn test_print_unsupported_operators() {
        let expr = Expr::binary(Expr::var("a"), Operator::BitXor, Expr::var("b"));
        assert_eq!("a[BitXor_not_supported]b", print_eqn(&expr));
        let expr = Expr::unary(Operator::UnaryTilde, Expr::var("a"));
        assert_eq!("[UnaryTilde_not_supported]a", print_eqn(&expr));
        let expr = Expr::binary(Expr::var("a"), Operator::ShiftLeft, Expr::lit(2.0));
        assert_eq!("a[BitShiftL_not_supported]2", print_eqn(&expr));
    }

    #[test]
    fn test_negated_not_prints_operand() {
        let mut expr = Expr::unary(Operator::Not, Expr::paren(Expr::var("r")));
        expr.negate_logic();
        assert_eq!("(r)", print_eqn(&expr));
    }
}
