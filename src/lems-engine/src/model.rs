// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::ast::Expr;
use crate::common::{Diagnostic, Result};
use crate::dynamics::ConditionalBlock;
use crate::model_err;
use crate::units::UnitRegistry;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Constant {
    pub name: String,
    pub dimension: String,
    /// Absent for parameters without a default.
    pub value: Option<Expr>,
    pub is_parameter: bool,
}

impl Constant {
    pub fn new(name: &str, dimension: &str, value: Option<Expr>, is_parameter: bool) -> Self {
        Constant {
            name: name.to_owned(),
            dimension: dimension.to_owned(),
            value,
            is_parameter,
        }
    }
}

/// One branch of a conditional derived element.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Case {
    pub guard: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug, Serialize)]
pub struct DerivedElement {
    pub name: String,
    pub dimension: String,
    pub value: Expr,
    /// Non-empty for a conditional derived variable; `value` is then
    /// the exception condition.
    pub cases: Vec<Case>,
    pub is_dynamic: bool,
    pub is_external: bool,
    pub reduce: Option<String>,
}

impl PartialEq for DerivedElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.is_dynamic == other.is_dynamic
    }
}

impl DerivedElement {
    pub fn new(name: &str, dimension: &str, value: Expr, is_dynamic: bool) -> Self {
        DerivedElement {
            name: name.to_owned(),
            dimension: dimension.to_owned(),
            value,
            cases: vec![],
            is_dynamic,
            is_external: false,
            reduce: None,
        }
    }

    pub fn conditional(name: &str, dimension: &str, cases: Vec<Case>, is_dynamic: bool) -> Self {
        DerivedElement {
            cases,
            ..DerivedElement::new(name, dimension, Expr::exception_condition(), is_dynamic)
        }
    }

    pub fn is_conditional(&self) -> bool {
        !self.cases.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StateVariable {
    pub name: String,
    pub dimension: String,
    pub default: Option<Expr>,
    pub unit: Option<String>,
}

impl PartialEq for StateVariable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl StateVariable {
    pub fn new(name: &str, dimension: &str, default: Option<Expr>, unit: Option<String>) -> Self {
        StateVariable {
            name: name.to_owned(),
            dimension: dimension.to_owned(),
            default,
            unit,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventPort {
    pub name: String,
    pub direction: Direction,
}

impl EventPort {
    pub fn new(name: &str, direction: Direction) -> Self {
        EventPort {
            name: name.to_owned(),
            direction,
        }
    }
}

/// A child component slot the override artifact asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub kind: String,
}

/// The lowered form of one neuron, ready for the template.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Model {
    pub name: String,
    pub extended_model: Option<String>,
    pub units: UnitRegistry,
    pub constants: Vec<Constant>,
    pub derived: Vec<DerivedElement>,
    pub state_variables: Vec<StateVariable>,
    pub ports: Vec<EventPort>,
    pub attachments: Vec<Attachment>,
    /// Time derivatives keyed by the tick-free variable name.
    pub equations: BTreeMap<String, Expr>,
    /// Variables whose ODE only integrates where the dynamics say so.
    pub local_derivatives: Vec<String>,
    pub boolean_elements: Vec<String>,
    pub blocks: Vec<ConditionalBlock>,
    pub not_converted: Vec<String>,
    pub units_external: bool,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Model {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// The neuron name without the `_nestml` suffix the front end appends.
    pub fn neuron_name(&self) -> &str {
        self.name.strip_suffix("_nestml").unwrap_or(&self.name)
    }

    pub fn add_constant(&mut self, constant: Constant) {
        if !self.constants.contains(&constant) {
            self.constants.push(constant);
        }
    }

    pub fn remove_constant(&mut self, name: &str) {
        self.constants.retain(|c| c.name != name);
    }

    pub fn add_derived(&mut self, element: DerivedElement) {
        if !self.derived.contains(&element) {
            self.derived.push(element);
        }
    }

    pub fn remove_derived(&mut self, name: &str) {
        self.derived.retain(|d| d.name != name);
    }

    pub fn add_state_variable(&mut self, var: StateVariable) {
        if !self.state_variables.contains(&var) {
            self.state_variables.push(var);
        }
    }

    pub fn add_port(&mut self, port: EventPort) {
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        if !self.attachments.contains(&attachment) {
            self.attachments.push(attachment);
        }
    }

    /// Sets the time derivative of `var`, replacing any earlier one.
    pub fn add_equation(&mut self, var: &str, rhs: Expr) {
        self.equations.insert(var.to_owned(), rhs);
    }

    pub fn add_local_derivative(&mut self, var: &str) {
        if !self.local_derivatives.iter().any(|v| v == var) {
            self.local_derivatives.push(var.to_owned());
        }
    }

    pub fn is_local_derivative(&self, var: &str) -> bool {
        self.local_derivatives.iter().any(|v| v == var)
    }

    pub fn is_boolean(&self, name: &str) -> bool {
        self.boolean_elements.iter().any(|b| b == name)
    }

    /// Notes a construct that could not be converted.
    pub fn record(&mut self, diag: Diagnostic) {
        warn!(code = %diag.code, "{}", diag);
        let message = diag.to_string();
        if !self.not_converted.contains(&message) {
            self.not_converted.push(message);
        }
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn derived_element(&self, name: &str) -> Option<&DerivedElement> {
        self.derived.iter().find(|d| d.name == name)
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn state_variable_mut(&mut self, name: &str) -> Option<&mut StateVariable> {
        self.state_variables.iter_mut().find(|v| v.name == name)
    }

    pub fn derived_variables(&self) -> impl Iterator<Item = &DerivedElement> {
        self.derived.iter().filter(|d| d.is_dynamic)
    }

    pub fn derived_parameters(&self) -> impl Iterator<Item = &DerivedElement> {
        self.derived.iter().filter(|d| !d.is_dynamic)
    }

    pub fn output_port(&self) -> Option<&EventPort> {
        self.ports.iter().find(|p| p.direction == Direction::Out)
    }

    /// The output port, which LEMS needs to emit events at all.
    pub fn require_output_port(&self) -> Result<&EventPort> {
        match self.output_port() {
            Some(port) => Ok(port),
            None => model_err!(NoOutputPort, self.name.clone()),
        }
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &EventPort> {
        self.ports.iter().filter(|p| p.direction == Direction::In)
    }

    pub fn to_json(&self) -> Result<String> {
        pretty_json(self)
    }
}

fn pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => Ok(json),
        Err(err) => model_err!(JsonSerialization, err.to_string()),
    }
}
