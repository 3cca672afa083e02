// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The optional override artifact.  It carries per-neuron simulation
//! step lengths and hand-written LEMS elements that are merged into the
//! generated model.  Two encodings are understood: an XML document of
//! `<Target>` elements, and an older line-oriented inline format.

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ast::Expr;
use crate::common::{PREFIX_CONSTANT, PREFIX_DIMENSION, Result, format_number};
use crate::datamodel::UnitType;
use crate::import_err;
use crate::model::Direction;

lazy_static! {
    static ref STEPS_RE: Regex = Regex::new(r"^([0-9]+)([a-zA-Z]+)$").unwrap();
    static ref INLINE_TAG_RE: Regex =
        Regex::new(r#"^<\s*([A-Za-z]+)((?:\s+[A-Za-z_]+\s*=\s*"[^"]*")*)\s*/>$"#).unwrap();
    static ref INLINE_ATTR_RE: Regex = Regex::new(r#"([A-Za-z_]+)\s*=\s*"([^"]*)""#).unwrap();
}

/// The length of one simulation step, e.g. `10ms`.
#[derive(Clone, Debug, PartialEq)]
pub struct StepLength {
    pub length: f64,
    pub unit: String,
}

impl Default for StepLength {
    fn default() -> Self {
        StepLength {
            length: 1.0,
            unit: "ms".to_owned(),
        }
    }
}

impl StepLength {
    /// Parses `<integer><unit>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let caps = match STEPS_RE.captures(raw.trim()) {
            Some(caps) => caps,
            None => return import_err!(BadSimulationSteps, raw.to_owned()),
        };
        let length = match caps[1].parse::<f64>() {
            Ok(length) => length,
            Err(err) => return import_err!(BadSimulationSteps, err.to_string()),
        };
        Ok(StepLength {
            length,
            unit: caps[2].to_owned(),
        })
    }

    pub fn unit_type(&self) -> UnitType {
        UnitType::time(&self.unit)
    }

    pub fn dimension_name(&self) -> String {
        format!("{}{}", PREFIX_DIMENSION, self.unit)
    }

    /// Name of the constant holding one step, `CON_1ms`.
    pub fn constant_name(&self) -> String {
        let value = format_number(self.length).replace('.', "_");
        format!("{}{}{}", PREFIX_CONSTANT, value, self.unit)
    }

    /// One step as a literal with its unit.
    pub fn literal(&self) -> Expr {
        Expr::Literal(self.length, Some(self.unit_type()))
    }
}

/// A hand-written element merged into the model of every targeted neuron.
#[derive(Clone, Debug, PartialEq)]
pub enum Override {
    Attachment {
        name: String,
        kind: String,
    },
    Constant {
        name: String,
        dimension: String,
        value: Option<String>,
        parameter: bool,
    },
    Derived {
        name: String,
        dimension: String,
        value: Option<String>,
        reduce: Option<String>,
        dynamic: bool,
    },
    EventPort {
        name: String,
        direction: Direction,
    },
    StateVariable {
        name: String,
        dimension: String,
    },
    TimeDerivative {
        variable: String,
        value: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Target {
    pub names: Vec<String>,
    pub units_external: Option<bool>,
    pub simulation_steps: Option<StepLength>,
    pub overrides: Vec<Override>,
}

impl Target {
    pub fn matches(&self, neuron: &str) -> bool {
        self.names.iter().any(|name| name == neuron)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationConfig {
    pub default_step: StepLength,
    pub targets: Vec<Target>,
}

impl SimulationConfig {
    /// Reads the artifact at `path`.  A missing, unreadable or malformed
    /// artifact is skipped with a warning and the defaults are used.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path,
            None => {
                debug!("no override artifact, simulating with 1ms steps");
                return SimulationConfig::default();
            }
        };
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "artifact skipped (not found)");
                return SimulationConfig::default();
            }
        };
        if !contents.trim_start().starts_with('<') {
            return SimulationConfig::from_inline_str(&contents);
        }
        match SimulationConfig::from_xml_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "artifact skipped (invalid)");
                SimulationConfig::default()
            }
        }
    }

    pub fn from_xml_str(input: &str) -> Result<Self> {
        use quick_xml::de;
        let artifact: ArtifactXml = match de::from_str(input) {
            Ok(artifact) => artifact,
            Err(err) => {
                return import_err!(XmlDeserialization, err.to_string());
            }
        };

        let targets = artifact.targets.into_iter().map(Target::from).collect();
        Ok(SimulationConfig {
            default_step: StepLength::default(),
            targets,
        })
    }

    /// Parses the inline format.  Lines that cannot be understood are
    /// skipped with a warning.
    pub fn from_inline_str(input: &str) -> Self {
        let mut targets: Vec<Target> = vec![];
        for (i, line) in input.lines().enumerate() {
            // everything after `#` is a comment
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_suffix(':') {
                targets.push(Target {
                    names: vec![name.trim().to_owned()],
                    ..Default::default()
                });
                continue;
            }
            let target = match targets.last_mut() {
                Some(target) => target,
                None => {
                    warn!(line = i + 1, "inline artifact entry outside of a neuron block");
                    continue;
                }
            };
            match parse_inline_line(line) {
                Ok(entry) => target.overrides.push(entry),
                Err(err) => warn!(line = i + 1, error = %err, "inline artifact entry skipped"),
            }
        }

        SimulationConfig {
            default_step: StepLength::default(),
            targets,
        }
    }

    pub fn targets_for(&self, neuron: &str) -> Vec<&Target> {
        self.targets.iter().filter(|t| t.matches(neuron)).collect()
    }

    /// The step length a target sets for `neuron`, if any.
    pub fn step_for(&self, neuron: &str) -> Option<&StepLength> {
        self.targets_for(neuron)
            .into_iter()
            .filter_map(|t| t.simulation_steps.as_ref())
            .last()
    }

    pub fn units_external_for(&self, neuron: &str) -> bool {
        self.targets_for(neuron)
            .into_iter()
            .filter_map(|t| t.units_external)
            .last()
            .unwrap_or(false)
    }
}

fn parse_inline_line(line: &str) -> Result<Override> {
    let caps = match INLINE_TAG_RE.captures(line) {
        Some(caps) => caps,
        None => return import_err!(BadOverride, line.to_owned()),
    };
    let attrs: Vec<(String, String)> = INLINE_ATTR_RE
        .captures_iter(&caps[2])
        .map(|attr| (attr[1].to_owned(), attr[2].to_owned()))
        .collect();
    let attr = |key: &str| -> Option<String> {
        attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };

    match &caps[1] {
        "Attachments" => AttachmentXml {
            name: attr("name"),
            kind: attr("type"),
        }
        .into_override(),
        "DerivedVariable" => DerivedXml {
            name: attr("name"),
            dimension: attr("dimension"),
            value: attr("value"),
            select: attr("select"),
            reduce: attr("reduce"),
        }
        .into_override(true),
        tag => import_err!(UnknownOverrideTag, tag.to_owned()),
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => import_err!(BadOverride, format!("missing attribute '{what}'")),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
struct ArtifactXml {
    #[serde(rename = "Target", default)]
    targets: Vec<TargetXml>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct TargetXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@units_external")]
    units_external: Option<String>,
    #[serde(rename = "@simulation_steps")]
    simulation_steps: Option<String>,
    #[serde(rename = "$value", default)]
    children: Vec<OverrideXml>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
enum OverrideXml {
    Attachments(AttachmentXml),
    Parameter(ConstantXml),
    Constant(ConstantXml),
    DerivedParameter(DerivedXml),
    DerivedVariable(DerivedXml),
    EventPort(EventPortXml),
    StateVariable(StateVariableXml),
    TimeDerivative(TimeDerivativeXml),
    #[serde(other)]
    Unhandled,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct AttachmentXml {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}

impl AttachmentXml {
    fn into_override(self) -> Result<Override> {
        Ok(Override::Attachment {
            name: required(self.name, "name")?,
            kind: required(self.kind, "type")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct ConstantXml {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@dimension")]
    dimension: Option<String>,
    #[serde(rename = "@value")]
    value: Option<String>,
}

impl ConstantXml {
    fn into_override(self, parameter: bool) -> Result<Override> {
        let value = if parameter {
            None
        } else {
            Some(required(self.value, "value")?)
        };
        Ok(Override::Constant {
            name: required(self.name, "name")?,
            dimension: required(self.dimension, "dimension")?,
            value,
            parameter,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct DerivedXml {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@dimension")]
    dimension: Option<String>,
    #[serde(rename = "@value")]
    value: Option<String>,
    #[serde(rename = "@select")]
    select: Option<String>,
    #[serde(rename = "@reduce")]
    reduce: Option<String>,
}

impl DerivedXml {
    fn into_override(self, dynamic: bool) -> Result<Override> {
        Ok(Override::Derived {
            name: required(self.name, "name")?,
            dimension: self.dimension.unwrap_or_else(|| "none".to_owned()),
            value: self.value.or(self.select),
            reduce: self.reduce,
            dynamic,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct EventPortXml {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@direction")]
    direction: Option<String>,
}

impl EventPortXml {
    fn into_override(self) -> Result<Override> {
        let direction = match required(self.direction, "direction")?.as_str() {
            "in" => Direction::In,
            "out" => Direction::Out,
            other => return import_err!(BadOverride, format!("unknown direction '{other}'")),
        };
        Ok(Override::EventPort {
            name: required(self.name, "name")?,
            direction,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct StateVariableXml {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@dimension")]
    dimension: Option<String>,
}

impl StateVariableXml {
    fn into_override(self) -> Result<Override> {
        Ok(Override::StateVariable {
            name: required(self.name, "name")?,
            dimension: required(self.dimension, "dimension")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct TimeDerivativeXml {
    #[serde(rename = "@variable")]
    variable: Option<String>,
    #[serde(rename = "@value")]
    value: Option<String>,
}

impl TimeDerivativeXml {
    fn into_override(self) -> Result<Override> {
        Ok(Override::TimeDerivative {
            variable: required(self.variable, "variable")?,
            value: required(self.value, "value")?,
        })
    }
}

impl OverrideXml {
    fn into_override(self) -> Option<Result<Override>> {
        let result = match self {
            OverrideXml::Attachments(a) => a.into_override(),
            OverrideXml::Parameter(c) => c.into_override(true),
            OverrideXml::Constant(c) => c.into_override(false),
            OverrideXml::DerivedParameter(d) => d.into_override(false),
            OverrideXml::DerivedVariable(d) => d.into_override(true),
            OverrideXml::EventPort(p) => p.into_override(),
            OverrideXml::StateVariable(s) => s.into_override(),
            OverrideXml::TimeDerivative(t) => t.into_override(),
            OverrideXml::Unhandled => return None,
        };
        Some(result)
    }
}

impl From<TargetXml> for Target {
    fn from(target: TargetXml) -> Self {
        let names: Vec<String> = target
            .name
            .split(';')
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();

        let simulation_steps = target
            .simulation_steps
            .and_then(|raw| match StepLength::parse(&raw) {
                Ok(step) => Some(step),
                Err(err) => {
                    warn!(target = %target.name, error = %err, "ignoring simulation_steps");
                    None
                }
            });

        let mut overrides = vec![];
        for child in target.children {
            match child.into_override() {
                Some(Ok(entry)) => overrides.push(entry),
                Some(Err(err)) => warn!(
                    target = %target.name,
                    error = %err,
                    "override skipped (wrongly formatted)"
                ),
                None => {}
            }
        }

        Target {
            names,
            units_external: target.units_external.map(|v| v == "true"),
            simulation_steps,
            overrides,
        }
    }
}
