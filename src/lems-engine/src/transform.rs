// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Rewrite passes applied to every expression before it becomes part of
//! the model.  Passes that introduce constants register them, and the
//! units they use, with the model; registration is add-if-absent so
//! running a pass twice changes nothing.

use std::fmt;

use crate::ast::{Expr, Operator};
use crate::common::{ErrorCode, NOT_SUPPORTED, PREFIX_CONSTANT, format_number};
use crate::config::StepLength;
use crate::datamodel::{SourceExpr, TypeDescriptor};
use crate::model::{Constant, Model};
use crate::units::{dimension_of, unit_symbol};

/// Calls `f` on every node, top-down.  When `f` returns true the node
/// was rewritten and its children are not visited.
fn rewrite(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr) -> bool) {
    if f(expr) {
        return;
    }
    match expr {
        Expr::Literal(_, _) | Expr::Var(_, _) => {}
        Expr::Call(_, args) => {
            for arg in args.iter_mut() {
                rewrite(arg, f);
            }
        }
        Expr::Op(lhs, _, rhs) => {
            if let Some(lhs) = lhs {
                rewrite(lhs, f);
            }
            if let Some(rhs) = rhs {
                rewrite(rhs, f);
            }
        }
    }
}

/// The identifier-safe name of the constant holding `value` in `unit`,
/// e.g. `CON_0_5mV`.
pub fn constant_name(value: f64, symbol: &str) -> String {
    let value = format_number(value).replace('.', "_").replace('-', "m_");
    format!("{PREFIX_CONSTANT}{value}{symbol}")
}

/// Mathematical functions the target format provides.
pub const SUPPORTED_FUNCTIONS: [&str; 3] = ["exp", "log", "pow"];

/// The first function `expr` calls that can not be expressed in the
/// model.  `resolution()` and references to derived elements are
/// rewritten by the pipeline and are fine.
pub fn unsupported_call<'e>(model: &Model, expr: &'e SourceExpr) -> Option<&'e str> {
    expr.called_functions().into_iter().find(|name| {
        !SUPPORTED_FUNCTIONS.contains(name)
            && *name != "resolution"
            && model.derived_element(name).is_none()
    })
}

/// A part of a source expression with no counterpart in the model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Unsupported<'e> {
    Call(&'e str),
    /// A conditional below the top of an expression.  Only a whole
    /// right-hand side can be split into guarded cases.
    Conditional(&'e SourceExpr),
}

impl Unsupported<'_> {
    pub fn code(&self) -> ErrorCode {
        match self {
            Unsupported::Call(_) => ErrorCode::UnsupportedFunctionCall,
            Unsupported::Conditional(_) => ErrorCode::UnsupportedConditional,
        }
    }
}

impl fmt::Display for Unsupported<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unsupported::Call(name) => write!(f, "function call {name}"),
            Unsupported::Conditional(expr) => write!(f, "conditional expression {expr}"),
        }
    }
}

/// The first construct in `expr` that can not be expressed.  Callers
/// split a top-level conditional before asking, so any conditional
/// found here is nested.
pub fn unsupported_construct<'e>(model: &Model, expr: &'e SourceExpr) -> Option<Unsupported<'e>> {
    unsupported_call(model, expr)
        .map(Unsupported::Call)
        .or_else(|| expr.first_conditional().map(Unsupported::Conditional))
}

/// Backend-safe spelling of a variable name, `V'` -> `V__D`.
pub fn mangle_name(name: &str) -> String {
    name.replace('\'', "__D").replace('.', "_")
}

/// The ordered rewrite passes, bound to the model being built.
pub struct Pipeline<'a> {
    model: &'a mut Model,
    step: &'a StepLength,
}

impl<'a> Pipeline<'a> {
    pub fn new(model: &'a mut Model, step: &'a StepLength) -> Self {
        Pipeline { model, step }
    }

    pub fn run(&mut self, mut expr: Expr) -> Expr {
        self.hoist_constants(&mut expr);
        self.substitute_function_references(&mut expr);
        normalize_differential_variables(&mut expr);
        expand_euler(&mut expr);
        self.substitute_resolution(&mut expr);
        self.materialize_implicit_units(&mut expr);
        expr
    }

    /// Replaces every literal carrying a physical unit with a reference
    /// to a constant holding it.
    pub fn hoist_constants(&mut self, expr: &mut Expr) {
        let literals: Vec<Expr> = expr
            .numericals()
            .into_iter()
            .filter(|lit| matches!(lit, Expr::Literal(_, Some(_))))
            .cloned()
            .collect();
        for literal in literals {
            if let Expr::Literal(value, Some(unit)) = &literal {
                let name = constant_name(*value, &unit_symbol(unit));
                let ty = TypeDescriptor::Unit(unit.clone());
                self.model.units.register(unit);
                self.model.add_constant(Constant::new(
                    &name,
                    &dimension_of(&ty),
                    Some(literal.clone()),
                    false,
                ));
                expr.replace_element(&literal, &Expr::var(&name));
            }
        }
    }

    /// Calls that name a derived element are references to it.
    pub fn substitute_function_references(&mut self, expr: &mut Expr) {
        let calls: Vec<Expr> = expr
            .functions()
            .into_iter()
            .filter(|call| match call {
                Expr::Call(name, _) => self.model.derived_element(name).is_some(),
                _ => false,
            })
            .cloned()
            .collect();
        for call in calls {
            if let Expr::Call(name, _) = &call {
                expr.replace_element(&call, &Expr::var(name));
            }
        }
    }

    /// `resolution()` is the configured step length.
    pub fn substitute_resolution(&mut self, expr: &mut Expr) {
        if !expr.contains_call("resolution") {
            return;
        }
        let step = self.step;
        let name = step.constant_name();
        self.model.units.register(&step.unit_type());
        self.model.add_constant(Constant::new(
            &name,
            &step.dimension_name(),
            Some(step.literal()),
            false,
        ));
        rewrite(expr, &mut |e| match e {
            Expr::Call(func, _) if func == "resolution" => {
                *e = Expr::var(&name);
                true
            }
            _ => false,
        });
    }

    /// A unit symbol used as a value, as in `V / mV`, refers to a
    /// constant of magnitude one in that unit.
    pub fn materialize_implicit_units(&mut self, expr: &mut Expr) {
        let units: Vec<_> = expr
            .variables()
            .into_iter()
            .filter_map(|var| match var {
                Expr::Var(name, Some(TypeDescriptor::Unit(unit))) if unit_symbol(unit) == *name => {
                    Some(unit.clone())
                }
                _ => None,
            })
            .collect();
        for unit in units {
            let symbol = unit_symbol(&unit);
            let ty = TypeDescriptor::Unit(unit.clone());
            self.model.units.register(&unit);
            self.model.add_constant(Constant::new(
                &symbol,
                &dimension_of(&ty),
                Some(Expr::Literal(1.0, Some(unit))),
                false,
            ));
        }
    }
}

pub fn normalize_differential_variables(expr: &mut Expr) {
    rewrite(expr, &mut |e| {
        if let Expr::Var(name, _) = e {
            if !name.starts_with(NOT_SUPPORTED) {
                *name = mangle_name(name);
            }
        }
        false
    });
}

/// Euler's number is spelled `exp(1)` in the target format.
pub fn expand_euler(expr: &mut Expr) {
    rewrite(expr, &mut |e| match e {
        Expr::Var(name, _) if name == "e" => {
            *e = Expr::call("exp", vec![Expr::lit(1.0)]);
            true
        }
        _ => false,
    });
}

/// Boolean variables are numbers in the target format; as a condition
/// they have to be compared explicitly, `1 .eq. flag`.
pub fn expand_boolean_atoms(booleans: &[String], expr: &mut Expr) {
    rewrite(expr, &mut |e| match e {
        Expr::Var(name, _) if booleans.contains(name) => {
            let var = std::mem::replace(e, Expr::lit(0.0));
            *e = Expr::binary(Expr::lit(1.0), Operator::Eq, var);
            true
        }
        _ => false,
    });
}

/// Removes every `not` by negating its operand.
pub fn eliminate_not(expr: &mut Expr) {
    rewrite(expr, &mut |e| {
        if let Expr::Op(_, op, Some(inner)) = e {
            if *op == Operator::Not {
                inner.negate_logic();
                *op = Operator::None;
            }
        }
        false
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::UnitType;
    use crate::model::DerivedElement;

    const VOLT: [i32; 7] = [2, 1, -3, -1, 0, 0, 0];

    fn mv() -> UnitType {
        UnitType::named("mV", VOLT)
    }

    #[test]
    fn test_constant_name() {
        assert_eq!("CON_0mV", constant_name(0.0, "mV"));
        assert_eq!("CON_0_5ms", constant_name(0.5, "ms"));
        assert_eq!("CON_m_70mV", constant_name(-70.0, "mV"));
        assert_eq!("CON_100000000000000000000mV", constant_name(1e20, "mV"));
    }

    #[test]
    fn test_hoist_constants() {
        let mut model = Model::new("n");
        let step = StepLength::default();
        let mut pipeline = Pipeline::new(&mut model, &step);
        let expr = Expr::binary(
            Expr::var("V"),
            Operator::Sub,
            Expr::binary(
                Expr::Literal(70.0, Some(mv())),
                Operator::Add,
                Expr::Literal(70.0, Some(mv())),
            ),
        );
        let expr = pipeline.run(expr);
        assert_eq!("V-CON_70mV+CON_70mV", expr.print());
        // running again adds nothing
        let expr = pipeline.run(expr);
        assert_eq!("V-CON_70mV+CON_70mV", expr.print());

        assert_eq!(1, model.constants.len());
        let con = model.constant("CON_70mV").unwrap();
        assert_eq!("DIM_mV", con.dimension);
        assert_eq!("70 mV", con.value.as_ref().unwrap().print());
        assert_eq!(1, model.units.units.len());
        assert_eq!(1, model.units.dimensions.len());
    }

    #[test]
    fn test_function_references() {
        let mut model = Model::new("n");
        model.add_derived(DerivedElement::new("I_syn", "DIM_pA", Expr::var("g"), true));
        let step = StepLength::default();
        let expr = Expr::binary(
            Expr::call("I_syn", vec![]),
            Operator::Add,
            Expr::call("exp", vec![Expr::var("x")]),
        );
        let expr = Pipeline::new(&mut model, &step).run(expr);
        assert_eq!("I_syn+exp(x)", expr.print());
    }

    #[test]
    fn test_normalize_and_euler() {
        let mut model = Model::new("n");
        let step = StepLength::default();
        let expr = Expr::binary(
            Expr::binary(Expr::var("g_ex'"), Operator::Mul, Expr::var("e")),
            Operator::Add,
            Expr::var("syn.tau"),
        );
        let expr = Pipeline::new(&mut model, &step).run(expr);
        assert_eq!("g_ex__D*exp(1)+syn_tau", expr.print());
        assert!(expr.variables().iter().all(|v| v.print() != "e"));
    }

    #[test]
    fn test_resolution() {
        let mut model = Model::new("n");
        let step = StepLength::parse("10ms").unwrap();
        let expr = Expr::binary(
            Expr::var("t"),
            Operator::Div,
            Expr::call("resolution", vec![]),
        );
        let expr = Pipeline::new(&mut model, &step).run(expr);
        assert_eq!("t/CON_10ms", expr.print());
        let con = model.constant("CON_10ms").unwrap();
        assert_eq!("DIM_ms", con.dimension);
        assert_eq!("10 ms", con.value.as_ref().unwrap().print());
        assert!(model.units.unit("ms").is_some());
    }

    #[test]
    fn test_implicit_units() {
        let mut model = Model::new("n");
        let step = StepLength::default();
        let unit_var = Expr::Var("mV".to_owned(), Some(TypeDescriptor::Unit(mv())));
        let expr = Expr::binary(Expr::var("V"), Operator::Div, unit_var);
        let expr = Pipeline::new(&mut model, &step).run(expr.clone());
        let expr = Pipeline::new(&mut model, &step).run(expr);
        assert_eq!("V/mV", expr.print());
        assert_eq!(1, model.constants.len());
        let con = model.constant("mV").unwrap();
        assert_eq!("1 mV", con.value.as_ref().unwrap().print());
        assert_eq!("DIM_mV", con.dimension);
    }

    #[test]
    fn test_eliminate_not() {
        // not (V > V_th and not refr)
        let mut expr = Expr::unary(
            Operator::Not,
            Expr::paren(Expr::and(
                Expr::paren(Expr::binary(Expr::var("V"), Operator::Gt, Expr::var("V_th"))),
                Expr::paren(Expr::unary(
                    Operator::Not,
                    Expr::paren(Expr::binary(Expr::lit(1.0), Operator::Eq, Expr::var("refr"))),
                )),
            )),
        );
        eliminate_not(&mut expr);
        assert_eq!("((V .leq. V_th) .or. ((1 .eq. refr)))", expr.print());
        assert!(
            expr.operators()
                .iter()
                .all(|op| op.op() != Some(Operator::Not))
        );
    }

    #[test]
    fn test_expand_boolean_atoms() {
        let booleans = vec!["refr".to_owned()];
        let mut expr = Expr::and(
            Expr::paren(Expr::var("refr")),
            Expr::paren(Expr::binary(Expr::var("r"), Operator::Gt, Expr::lit(0.0))),
        );
        expand_boolean_atoms(&booleans, &mut expr);
        assert_eq!("(1 .eq. refr) .and. (r .gt. 0)", expr.print());
    }
}
