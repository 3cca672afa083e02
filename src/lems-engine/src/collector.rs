// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Lowers one neuron into a `Model`.  Blocks are processed in a fixed
//! order because later blocks refer to what earlier ones registered:
//! equations reference the activation state variables, parameters
//! rewrite state defaults, and the dynamics see every derived element.

use tracing::{debug, error, warn};

use crate::ast::{Expr, Operator};
use crate::common::{
    DIMENSION_NONE, Diagnostic, ErrorCode, NOT_SUPPORTED, PREFIX_ACT, PREFIX_DIMENSION,
    PREFIX_INIT, strip_ticks,
};
use crate::config::{Override, SimulationConfig, StepLength, Target};
use crate::datamodel::{
    Block, BufferKind, Equation, Loc, Neuron, OutputLine, SourceExpr, Stmt, UnitType, VariableDecl,
};
use crate::dynamics::{Flattener, add_port_activator};
use crate::model::{
    Attachment, Case, Constant, DerivedElement, Direction, EventPort, Model, StateVariable,
};
use crate::transform::{
    Pipeline, constant_name, eliminate_not, expand_boolean_atoms, unsupported_construct,
};
use crate::units::{dimension_of, is_unsupported, unit_of};

/// Whether the dynamics switch integration of `var` on somewhere.
/// Loop bodies are never flattened and do not count.
fn integrates(block: &Block, var: &str) -> bool {
    block.stmts.iter().any(|stmt| match stmt {
        Stmt::Call { name, .. } if name == "integrate_odes" => true,
        Stmt::Call { name, args, .. } if name == "integrate" => {
            matches!(args.as_slice(), [SourceExpr::Var(arg, _)] if strip_ticks(arg) == var)
        }
        Stmt::If(stmt) => {
            integrates(&stmt.if_clause.block, var)
                || stmt.elif_clauses.iter().any(|c| integrates(&c.block, var))
                || stmt.else_block.as_ref().is_some_and(|b| integrates(b, var))
        }
        _ => false,
    })
}

fn output_port_name(output: &OutputLine) -> &'static str {
    match output.kind {
        BufferKind::Spike => "spike",
        BufferKind::Current => "current",
    }
}

pub struct ModelCollector<'a> {
    neuron: &'a Neuron,
    config: &'a SimulationConfig,
    step: StepLength,
    model: Model,
}

impl<'a> ModelCollector<'a> {
    pub fn new(neuron: &'a Neuron, config: &'a SimulationConfig) -> Self {
        let mut model = Model::new(&neuron.name);
        model.extended_model = neuron.base.clone();

        let stripped = model.neuron_name();
        let step = config
            .step_for(stripped)
            .or_else(|| config.step_for(&neuron.name))
            .cloned()
            .unwrap_or_else(|| config.default_step.clone());
        model.units_external =
            config.units_external_for(stripped) || config.units_external_for(&neuron.name);

        let mut collector = ModelCollector {
            neuron,
            config,
            step,
            model,
        };
        collector.collect();
        collector
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    fn collect(&mut self) {
        let neuron = self.neuron;
        debug!(
            neuron = %neuron.name,
            step = self.step.length,
            unit = %self.step.unit,
            "collecting"
        );

        self.model.boolean_elements = neuron
            .boolean_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        for decl in neuron.state.iter().filter(|d| !d.is_alias) {
            self.state_variable(decl);
        }
        for decl in neuron.state.iter().filter(|d| d.is_alias) {
            self.alias(decl, true);
        }
        for func in neuron.functions.iter() {
            self.model.record(Diagnostic::new(
                ErrorCode::UserFunctionsNotSupported,
                format!("Not supported function-declaration found: {}", func.name),
                func.loc,
            ));
        }
        if neuron.has_equations() {
            self.equations_block(neuron);
        }
        for decl in neuron.parameters.iter().filter(|d| !d.is_alias) {
            self.parameter(decl);
        }
        for decl in neuron.parameters.iter().filter(|d| d.is_alias) {
            self.alias(decl, false);
        }
        for decl in neuron.internals.iter().filter(|d| !d.is_alias) {
            self.internal(decl);
        }
        for decl in neuron.internals.iter().filter(|d| d.is_alias) {
            self.alias(decl, false);
        }
        for input in neuron.inputs.iter() {
            self.model.add_port(EventPort::new(&input.name, Direction::In));
        }
        for output in neuron.outputs.iter() {
            self.model
                .add_port(EventPort::new(output_port_name(output), Direction::Out));
        }

        self.apply_overrides();

        if let Some(dynamics) = &neuron.dynamics {
            Flattener::new(&mut self.model, &self.step).flatten(dynamics);
        }

        match self.model.require_output_port().err() {
            None => add_port_activator(&mut self.model),
            Some(err) => error!(neuron = %neuron.name, error = %err, "no spikes can be emitted"),
        }
    }

    fn pipeline(&mut self) -> Pipeline<'_> {
        Pipeline::new(&mut self.model, &self.step)
    }

    /// Converts the value declared for `owner`.  A value LEMS can not
    /// express becomes a placeholder.
    fn expression(&mut self, value: &SourceExpr, loc: Loc, owner: &str) -> Expr {
        if let Some(construct) = unsupported_construct(&self.model, value) {
            self.model.record(Diagnostic::new(
                construct.code(),
                format!("Not supported {construct} in declaration of {owner}"),
                loc,
            ));
            return Expr::not_supported(&value.to_string());
        }
        self.pipeline().run(Expr::from_source(value))
    }

    /// Registers the unit of the declared type and reports types that
    /// have no LEMS counterpart.
    fn check_type(&mut self, decl: &VariableDecl) {
        if is_unsupported(&decl.ty) {
            self.model.record(Diagnostic::new(
                ErrorCode::UnsupportedDataType,
                format!("Not supported data-type {} of {}", decl.ty, decl.name),
                decl.loc,
            ));
        }
        self.model.units.register_type(&decl.ty);
    }

    fn rejects_array(&mut self, decl: &VariableDecl) -> bool {
        if decl.is_array {
            self.model.record(Diagnostic::new(
                ErrorCode::ArraysNotSupported,
                format!("Not supported array-declaration found: {}", decl.name),
                decl.loc,
            ));
        }
        decl.is_array
    }

    /// `cond ? a : b` as a derived element with one case per branch.
    #[allow(clippy::too_many_arguments)]
    fn conditional(
        &mut self,
        name: &str,
        dimension: &str,
        cond: &SourceExpr,
        if_true: &SourceExpr,
        if_false: &SourceExpr,
        loc: Loc,
        dynamic: bool,
    ) -> DerivedElement {
        if let Some(construct) = unsupported_construct(&self.model, cond) {
            self.model.record(Diagnostic::new(
                construct.code(),
                format!("Not supported {construct} in condition of {name}"),
                loc,
            ));
        }
        let mut cond = Expr::ensure_paren(Expr::from_source(cond));
        expand_boolean_atoms(&self.model.boolean_elements, &mut cond);
        let cond = self.pipeline().run(cond);
        let mut negated = cond.clone();
        negated.negate_logic();

        let mut cases = vec![];
        for (mut guard, value) in [(cond, if_true), (negated, if_false)] {
            eliminate_not(&mut guard);
            guard.encapsulate_in_conditions();
            let value = self.expression(value, loc, name);
            cases.push(Case { guard, value });
        }
        DerivedElement::conditional(name, dimension, cases, dynamic)
    }

    fn derived(
        &mut self,
        name: &str,
        dimension: &str,
        value: &SourceExpr,
        loc: Loc,
        dynamic: bool,
    ) -> DerivedElement {
        match value {
            SourceExpr::Conditional(cond, if_true, if_false) => {
                self.conditional(name, dimension, cond, if_true, if_false, loc, dynamic)
            }
            value => {
                let value = self.expression(value, loc, name);
                DerivedElement::new(name, dimension, value, dynamic)
            }
        }
    }

    /// The value of a constant: literals stay literal, anything else
    /// goes through the pipeline.
    fn constant_value(&mut self, value: &SourceExpr, loc: Loc, owner: &str) -> Expr {
        match value {
            SourceExpr::Number(n, unit) => {
                if let Some(unit) = unit {
                    self.model.units.register(unit);
                }
                Expr::Literal(*n, unit.clone())
            }
            SourceExpr::Bool(b) => Expr::lit(if *b { 1.0 } else { 0.0 }),
            value => self.expression(value, loc, owner),
        }
    }

    fn state_variable(&mut self, decl: &VariableDecl) {
        if self.rejects_array(decl) {
            return;
        }
        self.check_type(decl);
        let dimension = dimension_of(&decl.ty);
        let plain = dimension == DIMENSION_NONE || dimension == NOT_SUPPORTED;
        let unit = if plain {
            None
        } else {
            unit_of(&decl.ty).map(|u| u.symbol)
        };
        let init = format!("{PREFIX_INIT}{}", decl.name);

        let default = match &decl.value {
            None if plain => Expr::lit(0.0),
            None => {
                let zero = Expr::Literal(0.0, decl.ty.as_unit().cloned());
                self.model
                    .add_constant(Constant::new(&init, &dimension, Some(zero), false));
                Expr::var(&init)
            }
            Some(SourceExpr::Bool(b)) => Expr::lit(if *b { 1.0 } else { 0.0 }),
            Some(value @ (SourceExpr::Number(_, _) | SourceExpr::Var(_, _))) => {
                self.expression(value, decl.loc, &decl.name)
            }
            Some(value) => {
                let element = self.derived(&init, &dimension, value, decl.loc, true);
                self.model.add_derived(element);
                Expr::var(&init)
            }
        };
        self.model
            .add_state_variable(StateVariable::new(&decl.name, &dimension, Some(default), unit));
    }

    fn alias(&mut self, decl: &VariableDecl, dynamic: bool) {
        self.check_type(decl);
        let value = match &decl.value {
            Some(value) => value,
            None => {
                warn!(alias = %decl.name, "alias without a defining expression");
                return;
            }
        };
        let element = self.derived(&decl.name, &dimension_of(&decl.ty), value, decl.loc, dynamic);
        self.model.add_derived(element);
    }

    /// A parameter or internal initialized with a ternary becomes a
    /// conditional `INIT_` element plus a state variable defaulting to it.
    fn ternary_initialized(
        &mut self,
        decl: &VariableDecl,
        cond: &SourceExpr,
        if_true: &SourceExpr,
        if_false: &SourceExpr,
    ) {
        let dimension = dimension_of(&decl.ty);
        let init = format!("{PREFIX_INIT}{}", decl.name);
        let element = self.conditional(&init, &dimension, cond, if_true, if_false, decl.loc, false);
        self.model.add_derived(element);
        let unit = unit_of(&decl.ty).map(|u| u.symbol);
        self.model.add_state_variable(StateVariable::new(
            &decl.name,
            &dimension,
            Some(Expr::var(&init)),
            unit,
        ));
    }

    fn parameter(&mut self, decl: &VariableDecl) {
        if self.rejects_array(decl) {
            return;
        }
        self.check_type(decl);
        let dimension = dimension_of(&decl.ty);
        match &decl.value {
            Some(SourceExpr::Conditional(cond, if_true, if_false)) => {
                self.ternary_initialized(decl, cond, if_true, if_false);
            }
            Some(value) => {
                let value = self.constant_value(value, decl.loc, &decl.name);
                self.model
                    .add_constant(Constant::new(&decl.name, &dimension, Some(value), false));
                self.reuse_parameter(&decl.name);
            }
            None => {
                self.model
                    .add_constant(Constant::new(&decl.name, &dimension, None, true));
                self.reuse_parameter(&decl.name);
            }
        }
    }

    /// State variables initialized with exactly this parameter default
    /// to it directly; their `INIT_` constant is dropped.
    fn reuse_parameter(&mut self, param: &str) {
        let neuron = self.neuron;
        for state in neuron.state.iter().filter(|s| !s.is_alias) {
            let initialized_with = state.value.as_ref().map(|v| v.to_string());
            if initialized_with.as_deref() != Some(param) {
                continue;
            }
            if let Some(var) = self.model.state_variable_mut(&state.name) {
                var.default = Some(Expr::var(param));
            }
            self.model
                .remove_constant(&format!("{PREFIX_INIT}{}", state.name));
        }
    }

    fn internal(&mut self, decl: &VariableDecl) {
        if self.rejects_array(decl) {
            return;
        }
        let value = match &decl.value {
            None | Some(SourceExpr::Var(_, _)) => return self.state_variable(decl),
            Some(value) => value,
        };
        self.check_type(decl);
        let dimension = dimension_of(&decl.ty);
        match value {
            SourceExpr::Call(func, _) if func == "resolution" => {
                self.model.units.register(&self.step.unit_type());
                self.model.add_constant(Constant::new(
                    &decl.name,
                    &self.step.dimension_name(),
                    Some(self.step.literal()),
                    false,
                ));
            }
            SourceExpr::Call(func, args) if func == "steps" => {
                let arg = match args.first() {
                    Some(arg) => arg,
                    None => {
                        self.model.record(Diagnostic::new(
                            ErrorCode::UnsupportedFunctionCall,
                            format!("steps() without an argument in declaration of {}", decl.name),
                            decl.loc,
                        ));
                        return;
                    }
                };
                let ticks = Expr::binary(
                    Expr::ensure_paren(Expr::from_source(arg)),
                    Operator::Div,
                    self.step.literal(),
                );
                let value = self.pipeline().run(ticks);
                self.model
                    .add_derived(DerivedElement::new(&decl.name, &dimension, value, false));
            }
            SourceExpr::Conditional(cond, if_true, if_false) => {
                self.ternary_initialized(decl, cond, if_true, if_false);
            }
            SourceExpr::Number(_, _) | SourceExpr::Bool(_) => {
                let value = self.constant_value(value, decl.loc, &decl.name);
                self.model
                    .add_constant(Constant::new(&decl.name, &dimension, Some(value), false));
            }
            value => {
                let element = self.derived(&decl.name, &dimension, value, decl.loc, false);
                self.model.add_derived(element);
            }
        }
    }

    fn equations_block(&mut self, neuron: &Neuron) {
        let ms = UnitType::time("ms");
        self.model.units.register(&ms);
        self.model.add_constant(Constant::new(
            &constant_name(1.0, "ms"),
            &format!("{PREFIX_DIMENSION}ms"),
            Some(Expr::Literal(1.0, Some(ms))),
            false,
        ));

        for shape in neuron.shapes.iter() {
            if let Some(construct) = unsupported_construct(&self.model, &shape.value) {
                self.model.record(Diagnostic::new(
                    construct.code(),
                    format!("Not supported {construct} in shape of {}", shape.name),
                    shape.loc,
                ));
                self.model
                    .add_equation(&shape.name, Expr::from_source(&shape.value));
                continue;
            }
            let value = self.pipeline().run(Expr::from_source(&shape.value));
            self.model
                .add_derived(DerivedElement::new(&shape.name, DIMENSION_NONE, value, true));
        }

        for eq in neuron.equations.iter() {
            self.equation(neuron, eq);
        }

        for func in neuron.ode_functions.iter() {
            self.model.units.register_type(&func.ty);
            let dimension = dimension_of(&func.ty);
            let element = self.derived(&func.name, &dimension, &func.value, func.loc, true);
            self.model.add_derived(element);
        }
    }

    fn equation(&mut self, neuron: &Neuron, eq: &Equation) {
        let var = eq.simple_name();
        if let Some(construct) = unsupported_construct(&self.model, &eq.rhs) {
            self.model.record(Diagnostic::new(
                construct.code(),
                format!("Not supported {construct} in differential equation of {var}"),
                eq.loc,
            ));
            self.model.add_equation(var, Expr::from_source(&eq.rhs));
            return;
        }

        let local = neuron
            .dynamics
            .as_ref()
            .is_some_and(|dynamics| integrates(dynamics, var));
        let mut rhs = Expr::from_source(&eq.rhs);
        if local {
            rhs = Expr::with_activator(var, rhs);
            self.model.add_state_variable(StateVariable::new(
                &format!("{PREFIX_ACT}{var}"),
                DIMENSION_NONE,
                Some(Expr::lit(1.0)),
                None,
            ));
            self.model.add_local_derivative(var);
        }
        let rhs = self.pipeline().run(Expr::per_millisecond(rhs));
        self.model.add_equation(var, rhs);
    }

    fn matching_targets(&self) -> Vec<&'a Target> {
        let config: &'a SimulationConfig = self.config;
        let stripped = self.model.neuron_name();
        let raw = self.neuron.name.as_str();
        config
            .targets
            .iter()
            .filter(|t| t.matches(stripped) || t.matches(raw))
            .collect()
    }

    /// Merges hand-written elements; they replace generated elements of
    /// the same name.
    fn apply_overrides(&mut self) {
        for target in self.matching_targets() {
            for item in target.overrides.iter() {
                self.apply_override(item);
            }
        }
    }

    fn apply_override(&mut self, item: &Override) {
        match item {
            Override::Attachment { name, kind } => self.model.add_attachment(Attachment {
                name: name.clone(),
                kind: kind.clone(),
            }),
            Override::Constant {
                name,
                dimension,
                value,
                parameter,
            } => {
                self.model.remove_constant(name);
                self.model.add_constant(Constant::new(
                    name,
                    dimension,
                    value.as_deref().map(Expr::verbatim),
                    *parameter,
                ));
            }
            Override::Derived {
                name,
                dimension,
                value,
                reduce,
                dynamic,
            } => {
                let value = Expr::verbatim(value.as_deref().unwrap_or_default());
                let mut element = DerivedElement::new(name, dimension, value, *dynamic);
                element.is_external = reduce.is_some();
                element.reduce = reduce.clone();
                self.model.remove_derived(name);
                self.model.add_derived(element);
            }
            Override::EventPort { name, direction } => {
                self.model.add_port(EventPort::new(name, *direction));
            }
            Override::StateVariable { name, dimension } => {
                self.model.state_variables.retain(|v| v.name != *name);
                self.model
                    .add_state_variable(StateVariable::new(name, dimension, None, None));
            }
            Override::TimeDerivative { variable, value } => {
                self.model.add_equation(variable, Expr::verbatim(value));
            }
        }
    }
}
