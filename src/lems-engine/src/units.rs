// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Physical dimensions and units.  A dimension is a named vector of
//! exponents over the seven SI base quantities; a unit is a symbol with
//! a decimal prefix power and the dimension it measures.  Both are
//! derived from the front end's type descriptors and deduplicated in a
//! per-model registry.

use std::hash::{Hash, Hasher};

use serde::Serialize;
use tracing::warn;

use crate::ast::{Expr, Operator, print_eqn};
use crate::common::{DIMENSION_NONE, NOT_SUPPORTED, PREFIX_DIMENSION};
use crate::datamodel::{PrimitiveType, TypeDescriptor, UnitExpr, UnitType};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Dimension {
    pub name: String,
    pub length: i32,
    pub mass: i32,
    pub time: i32,
    pub current: i32,
    pub temperature: i32,
    pub substance: i32,
    pub luminous_intensity: i32,
}

impl Dimension {
    pub fn new(name: &str, exponents: [i32; 7]) -> Self {
        let [
            length,
            mass,
            time,
            current,
            temperature,
            substance,
            luminous_intensity,
        ] = exponents;
        Dimension {
            name: name.to_owned(),
            length,
            mass,
            time,
            current,
            temperature,
            substance,
            luminous_intensity,
        }
    }

    pub fn exponents(&self) -> [i32; 7] {
        [
            self.length,
            self.mass,
            self.time,
            self.current,
            self.temperature,
            self.substance,
            self.luminous_intensity,
        ]
    }

    fn short_name(&self) -> &str {
        self.name
            .strip_prefix(PREFIX_DIMENSION)
            .unwrap_or(&self.name)
    }

    fn with_exponents(name: String, exponents: [i32; 7]) -> Self {
        Dimension::new(&name, exponents)
    }

    pub fn reciprocal(self) -> Self {
        let name = format!("{}1_per_{}", PREFIX_DIMENSION, self.short_name());
        Dimension::with_exponents(name, self.exponents().map(|e| -e))
    }

    pub fn exp(self, exp: i32) -> Self {
        let name = format!("{}{}_to_{}", PREFIX_DIMENSION, self.short_name(), exp);
        Dimension::with_exponents(name, self.exponents().map(|e| e * exp))
    }

    /// Renders the exponents in the XML form the template emits,
    /// e.g. `l="2" m="1" t="-3" i="-1"`.  Zero exponents are omitted.
    pub fn attributes(&self) -> String {
        const KEYS: [&str; 7] = ["l", "m", "t", "i", "k", "n", "j"];
        KEYS.iter()
            .zip(self.exponents())
            .filter(|(_, exp)| *exp != 0)
            .map(|(key, exp)| format!("{key}=\"{exp}\""))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::ops::Mul for Dimension {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        let name = format!(
            "{}{}_times_{}",
            PREFIX_DIMENSION,
            self.short_name(),
            rhs.short_name()
        );
        let mut exponents = self.exponents();
        for (exp, other) in exponents.iter_mut().zip(rhs.exponents()) {
            *exp += other;
        }
        Dimension::with_exponents(name, exponents)
    }
}

impl std::ops::Div for Dimension {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self::Output {
        let name = format!(
            "{}{}_per_{}",
            PREFIX_DIMENSION,
            self.short_name(),
            rhs.short_name()
        );
        let mut product = self * rhs.reciprocal();
        product.name = name;
        product
    }
}

/// A unit as LEMS knows it.  Two units are the same unit if they share
/// symbol and power, whatever name their dimension carries.
#[derive(Clone, Debug, Serialize)]
pub struct Unit {
    pub symbol: String,
    pub power: i32,
    pub dimension: Dimension,
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.power == other.power
    }
}

impl Eq for Unit {}

impl Hash for Unit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.power.hash(state);
    }
}

impl Unit {
    pub fn new(symbol: &str, power: i32, dimension: Dimension) -> Self {
        Unit {
            symbol: symbol.to_owned(),
            power,
            dimension,
        }
    }

    pub fn from_type(unit: &UnitType) -> Self {
        let symbol = unit_symbol(unit);
        let dimension = Dimension::new(&format!("{PREFIX_DIMENSION}{symbol}"), unit.exponents);
        Unit::new(&symbol, unit.magnitude, dimension)
    }

    pub fn reciprocal(self) -> Self {
        Unit {
            symbol: format!("1_per_{}", self.symbol),
            power: -self.power,
            dimension: self.dimension.reciprocal(),
        }
    }

    pub fn exp(self, exp: i32) -> Self {
        Unit {
            symbol: format!("{}_to_{}", self.symbol, exp),
            power: self.power * exp,
            dimension: self.dimension.exp(exp),
        }
    }
}

impl std::ops::Mul for Unit {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Unit {
            symbol: format!("{}_times_{}", self.symbol, rhs.symbol),
            power: self.power + rhs.power,
            dimension: self.dimension * rhs.dimension,
        }
    }
}

impl std::ops::Div for Unit {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Unit {
            symbol: format!("{}_per_{}", self.symbol, rhs.symbol),
            power: self.power - rhs.power,
            dimension: self.dimension / rhs.dimension,
        }
    }
}

/// The decimal power of a unit's metric prefix, `mV` -> -3.
pub fn power_of_prefix(symbol: &str) -> i32 {
    if symbol.chars().count() < 2 {
        return 0;
    }
    if symbol.starts_with("da") {
        return 1;
    }
    if symbol.starts_with("mu") || symbol.starts_with('µ') {
        return -6;
    }
    match symbol.chars().next() {
        Some('d') => -1,
        Some('c') => -2,
        Some('m') => -3,
        Some('n') => -9,
        Some('p') => -12,
        Some('f') => -15,
        Some('a') => -18,
        Some('h') => 2,
        Some('k') => 3,
        Some('M') => 6,
        Some('G') => 9,
        Some('T') => 12,
        Some('P') => 15,
        Some('E') => 18,
        _ => {
            warn!(unit = %symbol, "unknown unit prefix, assuming power 1");
            1
        }
    }
}

/// Turns a written unit such as `pA / mV^-2` into an identifier.
pub fn format_complex_unit(raw: &str) -> String {
    if raw == DIMENSION_NONE || raw == NOT_SUPPORTED {
        return raw.to_owned();
    }
    raw.replace(' ', "")
        .replace('/', "_per_")
        .replace('*', "_times_")
        .replace('^', "_to_")
        .replace('-', "m_")
        .replace(['(', ')'], "__")
}

pub fn format_dimension(raw: &str) -> String {
    raw.replace('*', "_times_")
        .replace('/', "_per_")
        .replace(' ', "")
}

/// Mirrors the structure of a written unit as an expression.
pub fn expr_from_unit_type(unit: &UnitExpr) -> Expr {
    match unit {
        UnitExpr::Name(name) => Expr::var(name),
        UnitExpr::Literal(n) => Expr::lit(*n),
        UnitExpr::Mul(l, r) => {
            Expr::binary(expr_from_unit_type(l), Operator::Mul, expr_from_unit_type(r))
        }
        UnitExpr::Div(l, r) => {
            Expr::binary(expr_from_unit_type(l), Operator::Div, expr_from_unit_type(r))
        }
        UnitExpr::Pow(base, exp) => Expr::binary(
            expr_from_unit_type(base),
            Operator::Pow,
            Expr::lit(*exp as f64),
        ),
        UnitExpr::Paren(inner) => Expr::paren(expr_from_unit_type(inner)),
    }
}

/// The identifier-safe symbol of a unit.
pub fn unit_symbol(unit: &UnitType) -> String {
    format_complex_unit(&print_eqn(&expr_from_unit_type(&unit.structure)))
}

/// The LEMS dimension name for a variable of type `ty`.
pub fn dimension_of(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Primitive(PrimitiveType::Real | PrimitiveType::Integer) => {
            DIMENSION_NONE.to_owned()
        }
        TypeDescriptor::Primitive(_) | TypeDescriptor::Unsupported(_) => NOT_SUPPORTED.to_owned(),
        TypeDescriptor::Unit(unit) => {
            format_dimension(&format!("{}{}", PREFIX_DIMENSION, unit_symbol(unit)))
        }
    }
}

pub fn unit_of(ty: &TypeDescriptor) -> Option<Unit> {
    ty.as_unit().map(Unit::from_type)
}

/// Whether values of this type cannot be expressed in LEMS at all.
pub fn is_unsupported(ty: &TypeDescriptor) -> bool {
    dimension_of(ty) == NOT_SUPPORTED
}

/// Deduplicated catalogue of the units and dimensions one model uses,
/// in insertion order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UnitRegistry {
    pub units: Vec<Unit>,
    pub dimensions: Vec<Dimension>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_unit(&mut self, unit: Unit) {
        if !self.units.contains(&unit) {
            self.units.push(unit);
        }
    }

    pub fn add_dimension(&mut self, dimension: Dimension) {
        if !self.dimensions.contains(&dimension) {
            self.dimensions.push(dimension);
        }
    }

    /// Registers a unit together with its dimension.
    pub fn register(&mut self, unit: &UnitType) -> Unit {
        let unit = Unit::from_type(unit);
        self.add_dimension(unit.dimension.clone());
        self.add_unit(unit.clone());
        unit
    }

    /// Registers the unit of `ty`, if it has one.
    pub fn register_type(&mut self, ty: &TypeDescriptor) -> Option<Unit> {
        ty.as_unit().map(|unit| self.register(unit))
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn unit(&self, symbol: &str) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.symbol == symbol)
    }
}
