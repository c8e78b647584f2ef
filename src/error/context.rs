use std::fmt;

use serde::{Deserialize, Serialize};

/// A context to an error, indicating which part of the configuration or which
/// scan of the input map the error applies to.
#[derive(Serialize, Deserialize, PartialEq, Clone, Eq, Debug, Default)]
pub enum Context {
    /// When no context can be given
    #[default]
    None,
    /// A configuration parameter, shown with its offending value
    Parameter {
        /// The name of the parameter
        name: String,
        /// The value it was given
        value: String,
    },
    /// A scan in the input map, identified by its index and retention time
    Scan {
        /// The index of the scan in the map
        index: usize,
        /// The retention time of the scan in seconds
        rt: String,
    },
}

impl Context {
    /// Creates a new context when no context can be given
    pub const fn none() -> Self {
        Self::None
    }

    /// Creates a new context for a configuration parameter
    pub fn parameter(name: impl std::string::ToString, value: impl std::string::ToString) -> Self {
        Self::Parameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Creates a new context for a scan of the input map
    pub fn scan(index: usize, rt: f64) -> Self {
        Self::Scan {
            index,
            rt: format!("{rt}"),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Parameter { name, value } => write!(f, "\n  ╷\n  │ {name} = {value}\n  ╵"),
            Self::Scan { index, rt } => write!(f, "\n  ╷\n  │ scan {index} (rt {rt} s)\n  ╵"),
        }
    }
}
