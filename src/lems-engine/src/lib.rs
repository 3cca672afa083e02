// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod ast;
mod collector;
pub mod common;
pub mod config;
pub mod datamodel;
pub mod dynamics;
pub mod model;
pub mod transform;
pub mod units;

pub use self::collector::ModelCollector;
pub use self::common::{Diagnostic, Error, ErrorCode, Result};
pub use self::config::{SimulationConfig, StepLength};
pub use self::model::Model;

/// Lowers every neuron with the same override artifact.
pub fn collect_models(neurons: &[datamodel::Neuron], config: &SimulationConfig) -> Vec<Model> {
    neurons
        .iter()
        .map(|neuron| ModelCollector::new(neuron, config).into_model())
        .collect()
}

#[test]
fn test_collect_models() {
    let neurons = vec![
        datamodel::Neuron::new("a_nestml"),
        datamodel::Neuron::new("b"),
    ];
    let models = collect_models(&neurons, &SimulationConfig::default());
    let names: Vec<&str> = models.iter().map(|m| m.neuron_name()).collect();
    assert_eq!(vec!["a", "b"], names);
}
