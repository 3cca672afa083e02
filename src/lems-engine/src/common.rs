// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

use serde::Serialize;

use crate::datamodel::Loc;

/// Marker used in dimensions, values and names for constructs that
/// have no LEMS counterpart.
pub const NOT_SUPPORTED: &str = "NOT_SUPPORTED";
pub const DIMENSION_NONE: &str = "none";

pub const PREFIX_INIT: &str = "INIT_";
pub const PREFIX_DIMENSION: &str = "DIM_";
pub const PREFIX_CONSTANT: &str = "CON_";
pub const PREFIX_ACT: &str = "ACT_";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    XmlDeserialization,
    JsonSerialization,
    BadSimulationSteps,
    BadOverride,
    UnknownOverrideTag,
    UnsupportedDataType,
    ArraysNotSupported,
    UserFunctionsNotSupported,
    UnsupportedFunctionCall,
    UnsupportedConditional,
    LoopsNotSupported,
    BadIntegrateArgs,
    NoOutputPort,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            XmlDeserialization => "xml_deserialization",
            JsonSerialization => "json_serialization",
            BadSimulationSteps => "bad_simulation_steps",
            BadOverride => "bad_override",
            UnknownOverrideTag => "unknown_override_tag",
            UnsupportedDataType => "unsupported_data_type",
            ArraysNotSupported => "arrays_not_supported",
            UserFunctionsNotSupported => "user_functions_not_supported",
            UnsupportedFunctionCall => "unsupported_function_call",
            UnsupportedConditional => "unsupported_conditional",
            LoopsNotSupported => "loops_not_supported",
            BadIntegrateArgs => "bad_integrate_args",
            NoOutputPort => "no_output_port",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Import,
    Model,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Import => "ImportError",
            ErrorKind::Model => "ModelError",
            ErrorKind::Transform => "TransformError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// A construct that could not be lowered.  Recording one never aborts
/// collection; the rendered message ends up in the model's list of
/// elements that were not converted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    pub loc: Loc,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>, loc: Loc) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} in lines {} to {}.",
            self.message, self.loc.start, self.loc.end
        )
    }
}

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Model,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! import_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Import,
            ErrorCode::$code,
            Some($str),
        ))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Import, ErrorCode::$code, None))
    }};
}

/// Strips the derivative ticks from an ODE variable, `V''` -> `V`.
pub fn strip_ticks(name: &str) -> &str {
    name.trim_end_matches('\'')
}

/// The activation variable gating integration of `name`.
pub fn activation_name(name: &str) -> String {
    format!("{}{}", PREFIX_ACT, strip_ticks(name))
}

/// Renders a number the way LEMS expects it: whole numbers have no
/// fractional part.
pub fn format_number(value: f64) -> String {
    use float_cmp::approx_eq;

    if value.is_finite() && approx_eq!(f64, value, value.trunc(), ulps = 2) {
        // `+ 0.0` folds negative zero into zero
        format!("{:.0}", value.trunc() + 0.0)
    } else {
        format!("{value}")
    }
}

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Import,
        ErrorCode::XmlDeserialization,
        Some("unexpected eof".to_owned()),
    );
    assert_eq!("ImportError{xml_deserialization: unexpected eof}", err.to_string());

    let err = Error::new(ErrorKind::Model, ErrorCode::NoOutputPort, None);
    assert_eq!("ModelError{no_output_port}", err.to_string());
}

#[test]
fn test_diagnostic_display() {
    let diag = Diagnostic::new(
        ErrorCode::ArraysNotSupported,
        "Array declaration of \"weights\"",
        Loc::new(4, 6),
    );
    assert_eq!(
        "Array declaration of \"weights\" in lines 4 to 6.",
        diag.to_string()
    );
}

#[test]
fn test_activation_name() {
    assert_eq!("ACT_V", activation_name("V'"));
    assert_eq!("ACT_g_ex", activation_name("g_ex''"));
    assert_eq!("ACT_V", activation_name("V"));
}

#[test]
fn test_format_number() {
    assert_eq!("10", format_number(10.0));
    assert_eq!("-3", format_number(-3.0));
    assert_eq!("0.1", format_number(0.1));
    assert_eq!("2.5", format_number(2.5));
    assert_eq!("0", format_number(-0.0));
    // past i64::MAX
    assert_eq!("100000000000000000000", format_number(1e20));
    assert_eq!("-100000000000000000000", format_number(-1e20));
}
