// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Flattening of the imperative dynamics block.  LEMS has no control
//! flow: every step it evaluates a flat list of guarded blocks
//! independently.  Nested `if` statements therefore become one block per
//! branch whose guard is the conjunction of every enclosing condition,
//! with sibling branches made mutually exclusive.

use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::ast::{Expr, Operator};
use crate::common::{Diagnostic, ErrorCode, activation_name};
use crate::config::StepLength;
use crate::datamodel::{AssignOp, Block, IfStmt, Loc, SourceExpr, Stmt};
use crate::model::{Model, StateVariable};
use crate::transform::{
    Pipeline, eliminate_not, expand_boolean_atoms, mangle_name, unsupported_construct,
};
use crate::units::{dimension_of, is_unsupported};

const PORT_ACTIVATOR_NOTE: &str = concat!(
    "This is an artificial EventOut which is never used,\n",
    " but required by LEMS to regard out-ports."
);

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Assignment { target: String, value: Expr },
    Call { name: String, args: Vec<Expr> },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Assignment { target, value } => {
                write!(f, "{} := {}", target, value.print())
            }
            Instruction::Call { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.print()).collect();
                write!(f, "{}({})", name, args.join(","))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConditionalBlock {
    pub guard: Expr,
    pub instructions: Vec<Instruction>,
    pub annotation: String,
}

impl ConditionalBlock {
    pub fn assigns(&self, target: &str) -> bool {
        self.instructions
            .iter()
            .any(|i| matches!(i, Instruction::Assignment { target: t, .. } if t == target))
    }

    pub fn calls(&self, name: &str) -> bool {
        self.instructions
            .iter()
            .any(|i| matches!(i, Instruction::Call { name: n, .. } if n == name))
    }
}

fn annotate(start: u32, end: u32, raw: &str) -> String {
    let text = format!("Generated from source lines {start} to {end}.\n{raw}");
    text.trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn annotation(header: Option<&str>, stmts: &[&Stmt]) -> String {
    let start = stmts.first().map(|s| s.loc().start).unwrap_or_default();
    let end = stmts.last().map(|s| s.loc().end).unwrap_or_default();
    let mut raw = String::new();
    if let Some(header) = header {
        raw.push_str(header);
        raw.push('\n');
    }
    for stmt in stmts {
        raw.push_str(&stmt.to_string());
        raw.push('\n');
    }
    annotate(start, end, &raw)
}

/// `outer .and. expr`, or just `expr` at the top level.
fn conjoin(outer: Option<&Expr>, expr: Expr) -> Expr {
    match outer {
        None => expr,
        Some(outer) => Expr::and(Expr::ensure_paren(outer.clone()), Expr::ensure_paren(expr)),
    }
}

/// The conjunction of the complements of every condition.
fn none_of(conditions: &[Expr]) -> Option<Expr> {
    conditions
        .iter()
        .map(|cond| {
            let mut negated = cond.clone();
            negated.negate_logic();
            Expr::ensure_paren(negated)
        })
        .reduce(Expr::and)
}

fn arithmetic(op: AssignOp) -> Operator {
    match op {
        AssignOp::Set => Operator::None,
        AssignOp::Add => Operator::Add,
        AssignOp::Sub => Operator::Sub,
        AssignOp::Mul => Operator::Mul,
        AssignOp::Div => Operator::Div,
    }
}

pub struct Flattener<'a> {
    model: &'a mut Model,
    step: &'a StepLength,
    blocks: Vec<ConditionalBlock>,
}

impl<'a> Flattener<'a> {
    pub fn new(model: &'a mut Model, step: &'a StepLength) -> Self {
        Flattener {
            model,
            step,
            blocks: vec![],
        }
    }

    /// Flattens `dynamics` and appends the resulting blocks to the model.
    pub fn flatten(mut self, dynamics: &Block) {
        self.handle_block(dynamics, None, None);
        self.deactivate_integration();
        let blocks = std::mem::take(&mut self.blocks);
        self.model
            .blocks
            .extend(blocks.into_iter().filter(|b| !b.instructions.is_empty()));
    }

    fn handle_block(&mut self, block: &Block, guard: Option<&Expr>, header: Option<&str>) {
        let mut pending: Vec<&Stmt> = vec![];
        for stmt in block.stmts.iter() {
            match stmt {
                Stmt::If(if_stmt) => {
                    self.flush(&mut pending, guard, header);
                    self.handle_if(if_stmt, guard);
                }
                Stmt::While { loc, .. } => {
                    self.model.record(Diagnostic::new(
                        ErrorCode::LoopsNotSupported,
                        "Not supported while loop",
                        *loc,
                    ));
                }
                Stmt::For { loc, .. } => {
                    self.model.record(Diagnostic::new(
                        ErrorCode::LoopsNotSupported,
                        "Not supported for loop",
                        *loc,
                    ));
                }
                Stmt::Assignment {
                    op: AssignOp::Set,
                    value: SourceExpr::Conditional(_, _, _),
                    ..
                } => {
                    self.flush(&mut pending, guard, header);
                    self.handle_ternary(stmt, guard);
                }
                _ => pending.push(stmt),
            }
        }
        self.flush(&mut pending, guard, header);
    }

    fn flush(&mut self, pending: &mut Vec<&Stmt>, guard: Option<&Expr>, header: Option<&str>) {
        if pending.is_empty() {
            return;
        }
        let mut instructions = vec![];
        for stmt in pending.iter() {
            instructions.extend(self.small_statement(stmt));
        }
        self.blocks.push(ConditionalBlock {
            guard: guard.cloned().unwrap_or_else(Expr::true_guard),
            instructions,
            annotation: annotation(header, pending),
        });
        pending.clear();
    }

    fn handle_if(&mut self, stmt: &IfStmt, outer: Option<&Expr>) {
        let clause = &stmt.if_clause;
        let first = self.condition(&clause.cond, clause.loc);
        let guard = self.finalize_guard(conjoin(outer, first.clone()));
        let header = format!("if {}:", clause.cond);
        self.handle_block(&clause.block, Some(&guard), Some(&header));

        let mut prior = vec![first];
        for clause in stmt.elif_clauses.iter() {
            let cond = self.condition(&clause.cond, clause.loc);
            let exclusive = match none_of(&prior) {
                Some(none) => Expr::and(Expr::ensure_paren(none), cond.clone()),
                None => cond.clone(),
            };
            let guard = self.finalize_guard(conjoin(outer, exclusive));
            let header = format!("elif {}:", clause.cond);
            self.handle_block(&clause.block, Some(&guard), Some(&header));
            prior.push(cond);
        }

        if let (Some(block), Some(none)) = (&stmt.else_block, none_of(&prior)) {
            let guard = self.finalize_guard(conjoin(outer, none));
            self.handle_block(block, Some(&guard), Some("else:"));
        }
    }

    fn handle_ternary(&mut self, stmt: &Stmt, outer: Option<&Expr>) {
        let (target, cond, if_true, if_false, loc) = match stmt {
            Stmt::Assignment {
                target,
                value: SourceExpr::Conditional(cond, if_true, if_false),
                loc,
                ..
            } => (target, cond, if_true, if_false, *loc),
            _ => return,
        };
        let target = mangle_name(target);
        let cond = self.condition(cond, loc);
        let mut negated = cond.clone();
        negated.negate_logic();
        let annotation = annotation(None, &[stmt]);

        for (guard, value) in [(cond, if_true), (negated, if_false)] {
            let guard = self.finalize_guard(conjoin(outer, guard));
            let value = self.convert(value, loc, AssignOp::Set, &target);
            self.blocks.push(ConditionalBlock {
                guard,
                instructions: vec![Instruction::Assignment {
                    target: target.clone(),
                    value,
                }],
                annotation: annotation.clone(),
            });
        }
    }

    /// A branch condition, parenthesized and with boolean atoms spelled
    /// out.  It still may contain `not`; `finalize_guard` removes those.
    /// An unsupported construct is reported but kept in place so the
    /// sibling guards can still be negated.
    fn condition(&mut self, cond: &SourceExpr, loc: Loc) -> Expr {
        if let Some(construct) = unsupported_construct(self.model, cond) {
            let message = format!("Not supported {construct} in condition {cond}");
            self.model.record(Diagnostic::new(construct.code(), message, loc));
        }
        let mut expr = Expr::ensure_paren(Expr::from_source(cond));
        expand_boolean_atoms(&self.model.boolean_elements, &mut expr);
        expr
    }

    fn finalize_guard(&mut self, guard: Expr) -> Expr {
        let mut guard = Pipeline::new(self.model, self.step).run(guard);
        eliminate_not(&mut guard);
        guard.encapsulate_in_conditions();
        Expr::ensure_paren(guard)
    }

    /// Converts the value of an assignment to `target`, folding in a
    /// compound operator.  A value LEMS can not express becomes a
    /// placeholder operand.
    fn convert(&mut self, value: &SourceExpr, loc: Loc, op: AssignOp, target: &str) -> Expr {
        let mut expr = match unsupported_construct(self.model, value) {
            Some(construct) => {
                let message = format!("Not supported {construct} in assignment to {target}");
                self.model.record(Diagnostic::new(construct.code(), message, loc));
                Expr::not_supported(&value.to_string())
            }
            None => Expr::from_source(value),
        };
        if op != AssignOp::Set {
            expr = Expr::binary(Expr::var(target), arithmetic(op), Expr::paren(expr));
        }
        Pipeline::new(self.model, self.step).run(expr)
    }

    fn small_statement(&mut self, stmt: &Stmt) -> Vec<Instruction> {
        match stmt {
            Stmt::Assignment {
                target,
                op,
                value,
                loc,
            } => {
                let target = mangle_name(target);
                let value = self.convert(value, *loc, *op, &target);
                vec![Instruction::Assignment { target, value }]
            }
            Stmt::Call { name, args, loc } => match name.as_str() {
                "integrate" => self.integrate(args, *loc),
                "integrate_odes" => self.integrate_odes(),
                "emit_spike" => {
                    let args = args
                        .iter()
                        .map(|arg| Pipeline::new(self.model, self.step).run(Expr::from_source(arg)))
                        .collect();
                    vec![Instruction::Call {
                        name: name.clone(),
                        args,
                    }]
                }
                other => {
                    self.model.record(Diagnostic::new(
                        ErrorCode::UnsupportedFunctionCall,
                        format!("Not supported function call {other}"),
                        *loc,
                    ));
                    vec![]
                }
            },
            Stmt::Declaration {
                names,
                ty,
                value,
                loc,
            } => {
                if is_unsupported(ty) {
                    self.model.record(Diagnostic::new(
                        ErrorCode::UnsupportedDataType,
                        format!("Not supported data-type in declaration of {}", names.join(", ")),
                        *loc,
                    ));
                }
                let unit = self.model.units.register_type(ty);
                let dimension = dimension_of(ty);
                let mut instructions = vec![];
                for name in names.iter() {
                    let name = mangle_name(name);
                    let value = match value {
                        Some(value) => self.convert(value, *loc, AssignOp::Set, &name),
                        None => {
                            let zero = Expr::Literal(0.0, ty.as_unit().cloned());
                            Pipeline::new(self.model, self.step).run(zero)
                        }
                    };
                    self.model.add_state_variable(StateVariable::new(
                        &name,
                        &dimension,
                        Some(value.clone()),
                        unit.as_ref().map(|u| u.symbol.clone()),
                    ));
                    instructions.push(Instruction::Assignment {
                        target: name,
                        value,
                    });
                }
                instructions
            }
            Stmt::If(_) | Stmt::While { .. } | Stmt::For { .. } => vec![],
        }
    }

    /// `integrate(V)` switches the integration of `V` on for this step;
    /// everywhere else it is off.
    fn integrate(&mut self, args: &[SourceExpr], loc: Loc) -> Vec<Instruction> {
        if args.len() != 1 {
            error!(
                code = %ErrorCode::BadIntegrateArgs,
                args = args.len(),
                start = loc.start,
                end = loc.end,
                "integrate takes exactly one argument"
            );
            return vec![];
        }
        let var = match &args[0] {
            SourceExpr::Var(name, _) => name.clone(),
            other => other.to_string(),
        };
        let activator = activation_name(&var);
        if let Some(state) = self.model.state_variable_mut(&activator) {
            state.default = Some(Expr::lit(0.0));
        }
        vec![Instruction::Assignment {
            target: activator,
            value: Expr::lit(1.0),
        }]
    }

    fn integrate_odes(&mut self) -> Vec<Instruction> {
        let vars: Vec<String> = self.model.equations.keys().cloned().collect();
        vars.into_iter()
            .map(|var| {
                self.model.add_local_derivative(&var);
                let activator = activation_name(&var);
                if let Some(state) = self.model.state_variable_mut(&activator) {
                    state.default = Some(Expr::lit(0.0));
                }
                Instruction::Assignment {
                    target: activator,
                    value: Expr::lit(1.0),
                }
            })
            .collect()
    }

    /// Every block that does not switch a locally integrated ODE on
    /// switches it off.
    fn deactivate_integration(&mut self) {
        let activators: Vec<String> = self
            .model
            .local_derivatives
            .iter()
            .map(|var| activation_name(var))
            .collect();
        for block in self.blocks.iter_mut() {
            if block.instructions.is_empty() {
                continue;
            }
            for activator in activators.iter() {
                if !block.assigns(activator) {
                    block.instructions.push(Instruction::Assignment {
                        target: activator.clone(),
                        value: Expr::lit(0.0),
                    });
                }
            }
        }
    }
}

/// LEMS ignores an output port that no `EventOut` references, so a
/// neuron with an output port but no `emit_spike` gets a block that
/// references it and never fires.
pub fn add_port_activator(model: &mut Model) {
    if model.output_port().is_none() || model.blocks.iter().any(|b| b.calls("emit_spike")) {
        return;
    }
    model.blocks.push(ConditionalBlock {
        guard: Expr::false_guard(),
        instructions: vec![Instruction::Call {
            name: "emit_spike".to_owned(),
            args: vec![],
        }],
        annotation: PORT_ACTIVATOR_NOTE.to_owned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{BinaryOp, Clause, TypeDescriptor, UnaryOp, UnitType};
    use crate::model::{Direction, EventPort};

    fn assign(target: &str, op: AssignOp, value: SourceExpr, line: u32) -> Stmt {
        Stmt::Assignment {
            target: target.to_owned(),
            op,
            value,
            loc: Loc::new(line, line),
        }
    }

    fn call(name: &str, args: Vec<SourceExpr>, line: u32) -> Stmt {
        Stmt::Call {
            name: name.to_owned(),
            args,
            loc: Loc::new(line, line),
        }
    }

    fn block(stmts: Vec<Stmt>) -> Block {
        Block {
            stmts,
            loc: Loc::default(),
        }
    }

    fn gt(l: &str, r: SourceExpr) -> SourceExpr {
        SourceExpr::binary(BinaryOp::Gt, SourceExpr::var(l), r)
    }

    fn model_with_local_v() -> Model {
        let mut model = Model::new("n");
        model.add_equation("V", Expr::var("rhs"));
        model.add_local_derivative("V");
        model.add_state_variable(StateVariable::new("ACT_V", "none", Some(Expr::lit(1.0)), None));
        model
    }

    fn flatten(model: &mut Model, dynamics: &Block) {
        let step = StepLength::default();
        Flattener::new(model, &step).flatten(dynamics);
    }

    fn printed(block: &ConditionalBlock) -> Vec<String> {
        block.instructions.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_if_elif_else_guards() {
        let dynamics = block(vec![
            assign(
                "V",
                AssignOp::Set,
                SourceExpr::binary(BinaryOp::Add, SourceExpr::var("V"), SourceExpr::num(1.0)),
                1,
            ),
            Stmt::If(IfStmt {
                if_clause: Clause {
                    cond: gt("V", SourceExpr::var("V_th")),
                    block: block(vec![
                        assign("V", AssignOp::Set, SourceExpr::var("E_L"), 3),
                        call("integrate", vec![SourceExpr::var("V")], 4),
                    ]),
                    loc: Loc::new(2, 4),
                },
                elif_clauses: vec![Clause {
                    cond: gt("r", SourceExpr::num(0.0)),
                    block: block(vec![assign("r", AssignOp::Sub, SourceExpr::num(1.0), 6)]),
                    loc: Loc::new(5, 6),
                }],
                else_block: Some(block(vec![call(
                    "integrate",
                    vec![SourceExpr::var("V")],
                    8,
                )])),
                loc: Loc::new(2, 8),
            }),
        ]);

        let mut model = model_with_local_v();
        flatten(&mut model, &dynamics);
        let blocks = &model.blocks;
        assert_eq!(4, blocks.len());

        assert_eq!("1 .eq. 1", blocks[0].guard.print());
        assert_eq!(vec!["V := V+1", "ACT_V := 0"], printed(&blocks[0]));

        assert_eq!("(V .gt. V_th)", blocks[1].guard.print());
        assert_eq!(vec!["V := E_L", "ACT_V := 1"], printed(&blocks[1]));
        assert_eq!(
            "Generated from source lines 3 to 4.\nif V > V_th:\nV = E_L\nintegrate(V)",
            blocks[1].annotation
        );

        assert_eq!("((V .leq. V_th) .and. (r .gt. 0))", blocks[2].guard.print());
        assert_eq!(vec!["r := r-(1)", "ACT_V := 0"], printed(&blocks[2]));

        assert_eq!("((V .leq. V_th) .and. (r .leq. 0))", blocks[3].guard.print());
        assert_eq!(vec!["ACT_V := 1"], printed(&blocks[3]));

        // integrate resets the activator's default
        let act = model.state_variable("ACT_V").unwrap();
        assert_eq!("0", act.default.as_ref().unwrap().print());
    }

    #[test]
    fn test_nested_guards_accumulate() {
        let inner = Stmt::If(IfStmt {
            if_clause: Clause {
                cond: gt("b", SourceExpr::num(2.0)),
                block: block(vec![assign("x", AssignOp::Set, SourceExpr::num(1.0), 3)]),
                loc: Loc::new(2, 3),
            },
            elif_clauses: vec![],
            else_block: None,
            loc: Loc::new(2, 3),
        });
        let dynamics = block(vec![Stmt::If(IfStmt {
            if_clause: Clause {
                cond: gt("a", SourceExpr::num(1.0)),
                block: block(vec![inner]),
                loc: Loc::new(1, 3),
            },
            elif_clauses: vec![],
            else_block: None,
            loc: Loc::new(1, 3),
        })]);

        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        assert_eq!(1, model.blocks.len());
        assert_eq!("((a .gt. 1) .and. (b .gt. 2))", model.blocks[0].guard.print());
    }

    fn if_stmt(
        cond: SourceExpr,
        then: Vec<Stmt>,
        elifs: Vec<(SourceExpr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
        line: u32,
    ) -> Stmt {
        let loc = Loc::new(line, line + 1);
        Stmt::If(IfStmt {
            if_clause: Clause {
                cond,
                block: block(then),
                loc,
            },
            elif_clauses: elifs
                .into_iter()
                .map(|(cond, stmts)| Clause {
                    cond,
                    block: block(stmts),
                    loc,
                })
                .collect(),
            else_block: otherwise.map(block),
            loc,
        })
    }

    #[test]
    fn test_nested_elif_else_are_exclusive() {
        let inner = if_stmt(
            gt("b", SourceExpr::num(2.0)),
            vec![assign("x", AssignOp::Set, SourceExpr::num(1.0), 3)],
            vec![(
                gt("c", SourceExpr::num(3.0)),
                vec![assign("x", AssignOp::Set, SourceExpr::num(2.0), 5)],
            )],
            Some(vec![assign("x", AssignOp::Set, SourceExpr::num(3.0), 7)]),
            2,
        );
        let dynamics = block(vec![if_stmt(
            gt("a", SourceExpr::num(1.0)),
            vec![inner],
            vec![],
            None,
            1,
        )]);

        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        let guards: Vec<String> = model.blocks.iter().map(|b| b.guard.print()).collect();
        assert_eq!(
            vec![
                "((a .gt. 1) .and. (b .gt. 2))",
                "((a .gt. 1) .and. ((b .leq. 2) .and. (c .gt. 3)))",
                "((a .gt. 1) .and. ((b .leq. 2) .and. (c .leq. 3)))",
            ],
            guards
        );
        assert_eq!(vec!["x := 1"], printed(&model.blocks[0]));
        assert_eq!(vec!["x := 2"], printed(&model.blocks[1]));
        assert_eq!(vec!["x := 3"], printed(&model.blocks[2]));
    }

    #[test]
    fn test_nested_integration_is_deactivated() {
        let inner = if_stmt(
            gt("b", SourceExpr::num(2.0)),
            vec![call("integrate", vec![SourceExpr::var("V")], 3)],
            vec![],
            Some(vec![assign("x", AssignOp::Set, SourceExpr::num(1.0), 5)]),
            2,
        );
        let dynamics = block(vec![
            assign("y", AssignOp::Set, SourceExpr::num(0.0), 1),
            // wrong arity, logged and dropped
            call(
                "integrate",
                vec![SourceExpr::var("V"), SourceExpr::var("W")],
                1,
            ),
            if_stmt(gt("a", SourceExpr::num(1.0)), vec![inner], vec![], None, 2),
        ]);

        let mut model = model_with_local_v();
        flatten(&mut model, &dynamics);
        assert_eq!(3, model.blocks.len());

        assert_eq!("1 .eq. 1", model.blocks[0].guard.print());
        assert_eq!(vec!["y := 0", "ACT_V := 0"], printed(&model.blocks[0]));

        assert_eq!("((a .gt. 1) .and. (b .gt. 2))", model.blocks[1].guard.print());
        assert_eq!(vec!["ACT_V := 1"], printed(&model.blocks[1]));

        assert_eq!("((a .gt. 1) .and. (b .leq. 2))", model.blocks[2].guard.print());
        assert_eq!(vec!["x := 1", "ACT_V := 0"], printed(&model.blocks[2]));

        assert!(model.blocks.iter().all(|b| b.assigns("ACT_V")));
        let act = model.state_variable("ACT_V").unwrap();
        assert_eq!("0", act.default.as_ref().unwrap().print());
        assert!(model.not_converted.is_empty());
    }

    #[test]
    fn test_not_and_boolean_atoms() {
        let cond = SourceExpr::Unary(UnaryOp::Not, Box::new(SourceExpr::var("refr")));
        let dynamics = block(vec![Stmt::If(IfStmt {
            if_clause: Clause {
                cond,
                block: block(vec![assign("x", AssignOp::Set, SourceExpr::num(1.0), 2)]),
                loc: Loc::new(1, 2),
            },
            elif_clauses: vec![],
            else_block: Some(block(vec![assign("x", AssignOp::Set, SourceExpr::num(2.0), 4)])),
            loc: Loc::new(1, 4),
        })]);

        let mut model = Model::new("n");
        model.boolean_elements.push("refr".to_owned());
        flatten(&mut model, &dynamics);
        assert_eq!(2, model.blocks.len());
        for block in model.blocks.iter() {
            assert!(
                block
                    .guard
                    .operators()
                    .iter()
                    .all(|op| op.op() != Some(Operator::Not))
            );
        }
        assert_eq!("((1 .neq. refr))", model.blocks[0].guard.print());
        assert_eq!("((1 .eq. refr))", model.blocks[1].guard.print());
    }

    #[test]
    fn test_ternary_assignment_splits() {
        let value = SourceExpr::Conditional(
            Box::new(gt("V", SourceExpr::num(0.0))),
            Box::new(SourceExpr::num(1.0)),
            Box::new(SourceExpr::num(2.0)),
        );
        let dynamics = block(vec![assign("x", AssignOp::Set, value, 1)]);
        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        assert_eq!(2, model.blocks.len());
        assert_eq!("(V .gt. 0)", model.blocks[0].guard.print());
        assert_eq!(vec!["x := 1"], printed(&model.blocks[0]));
        assert_eq!("(V .leq. 0)", model.blocks[1].guard.print());
        assert_eq!(vec!["x := 2"], printed(&model.blocks[1]));
    }

    #[test]
    fn test_loops_are_reported_and_skipped() {
        let dynamics = block(vec![
            assign("a", AssignOp::Set, SourceExpr::num(1.0), 1),
            Stmt::While {
                cond: SourceExpr::Bool(true),
                body: block(vec![assign("a", AssignOp::Add, SourceExpr::num(1.0), 3)]),
                loc: Loc::new(2, 3),
            },
            Stmt::For {
                var: "i".to_owned(),
                body: block(vec![]),
                loc: Loc::new(4, 5),
            },
            assign("b", AssignOp::Set, SourceExpr::num(2.0), 6),
        ]);
        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        assert_eq!(1, model.blocks.len());
        assert_eq!(vec!["a := 1", "b := 2"], printed(&model.blocks[0]));
        assert_eq!(
            vec![
                "Not supported while loop in lines 2 to 3.".to_owned(),
                "Not supported for loop in lines 4 to 5.".to_owned(),
            ],
            model.not_converted
        );
    }

    #[test]
    fn test_calls() {
        let dynamics = block(vec![
            call("integrate", vec![], 1),
            call("print", vec![SourceExpr::var("V")], 2),
            assign(
                "x",
                AssignOp::Set,
                SourceExpr::Call("random".to_owned(), vec![]),
                3,
            ),
            call("emit_spike", vec![], 4),
        ]);
        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        assert_eq!(1, model.blocks.len());
        assert_eq!(
            vec!["x := NOT_SUPPORTED:random()", "emit_spike()"],
            printed(&model.blocks[0])
        );
        assert_eq!(2, model.not_converted.len());
        assert!(model.not_converted[0].starts_with("Not supported function call print"));
    }

    #[test]
    fn test_unsupported_constructs_are_reported() {
        let nested = SourceExpr::Conditional(
            Box::new(gt("V", SourceExpr::num(0.0))),
            Box::new(SourceExpr::var("a")),
            Box::new(SourceExpr::var("b")),
        );
        let random = SourceExpr::binary(
            BinaryOp::Gt,
            SourceExpr::Call("random".to_owned(), vec![]),
            SourceExpr::num(0.5),
        );
        let dynamics = block(vec![
            assign("x", AssignOp::Add, nested, 1),
            Stmt::If(IfStmt {
                if_clause: Clause {
                    cond: random,
                    block: block(vec![assign("y", AssignOp::Set, SourceExpr::num(1.0), 3)]),
                    loc: Loc::new(2, 3),
                },
                elif_clauses: vec![],
                else_block: None,
                loc: Loc::new(2, 3),
            }),
        ]);
        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);

        assert_eq!(2, model.blocks.len());
        assert_eq!(vec!["x := x+(NOT_SUPPORTED:V > 0 ? a : b)"], printed(&model.blocks[0]));
        assert_eq!("(random() .gt. 0.5)", model.blocks[1].guard.print());
        assert_eq!(
            vec![
                "Not supported conditional expression V > 0 ? a : b in assignment to x in lines 1 to 1."
                    .to_owned(),
                "Not supported function call random in condition random() > 0.5 in lines 2 to 3."
                    .to_owned(),
            ],
            model.not_converted
        );
    }

    #[test]
    fn test_integrate_odes() {
        let mut model = Model::new("n");
        model.add_equation("V", Expr::var("a"));
        model.add_equation("g", Expr::var("b"));
        let dynamics = block(vec![call("integrate_odes", vec![], 1)]);
        flatten(&mut model, &dynamics);
        assert_eq!(vec!["V", "g"], model.local_derivatives);
        assert_eq!(vec!["ACT_V := 1", "ACT_g := 1"], printed(&model.blocks[0]));
    }

    #[test]
    fn test_declaration_in_dynamics() {
        let mv = UnitType::named("mV", [2, 1, -3, -1, 0, 0, 0]);
        let dynamics = block(vec![
            Stmt::Declaration {
                names: vec!["tmp".to_owned()],
                ty: TypeDescriptor::Unit(mv.clone()),
                value: None,
                loc: Loc::new(1, 1),
            },
            Stmt::Declaration {
                names: vec!["k".to_owned()],
                ty: TypeDescriptor::Primitive(crate::datamodel::PrimitiveType::Real),
                value: Some(SourceExpr::num(2.0)),
                loc: Loc::new(2, 2),
            },
        ]);
        let mut model = Model::new("n");
        flatten(&mut model, &dynamics);
        assert_eq!(vec!["tmp := CON_0mV", "k := 2"], printed(&model.blocks[0]));
        let tmp = model.state_variable("tmp").unwrap();
        assert_eq!("DIM_mV", tmp.dimension);
        assert_eq!(Some("mV".to_owned()), tmp.unit);
        assert_eq!("none", model.state_variable("k").unwrap().dimension);
        assert!(model.constant("CON_0mV").is_some());
    }

    #[test]
    fn test_port_activator() {
        let mut model = Model::new("n");
        add_port_activator(&mut model);
        assert!(model.blocks.is_empty());

        model.add_port(EventPort::new("spike", Direction::Out));
        add_port_activator(&mut model);
        assert_eq!(1, model.blocks.len());
        assert_eq!("1 .neq. 1", model.blocks[0].guard.print());
        assert!(model.blocks[0].calls("emit_spike"));

        // already referenced
        add_port_activator(&mut model);
        assert_eq!(1, model.blocks.len());
    }
}
