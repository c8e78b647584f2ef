use std::error;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Context;

/// An error
#[derive(Serialize, Deserialize, PartialEq, Clone, Eq)]
pub struct CustomError {
    /// A short description of the error, generally used as title line
    short_description: String,
    /// A longer description of the error, presented below the context to give more information and helpful feedback
    long_description: String,
    /// Possible suggestion(s) for the indicated text
    suggestions: Vec<String>,
    /// The context, in the most general sense this produces output which leads the user to the right place in the configuration or input
    context: Context,
}

#[allow(clippy::needless_pass_by_value)] // the impl ToString should be passed like this, otherwise &str gives errors
impl CustomError {
    /// Create a new `CustomError`
    ///
    /// ## Arguments
    /// * `short_desc` - A short description of the error, generally used as title line
    /// * `long_desc` -  A longer description of the error, presented below the context to give more information and helpful feedback
    /// * `context` - The context, in the most general sense this produces output which leads the user to the right place in the configuration or input
    pub fn error(
        short_desc: impl std::string::ToString,
        long_desc: impl std::string::ToString,
        context: Context,
    ) -> Self {
        Self {
            short_description: short_desc.to_string(),
            long_description: long_desc.to_string(),
            suggestions: Vec::new(),
            context,
        }
    }

    /// Gives the short description or title for this error
    pub fn short_description(&self) -> &str {
        &self.short_description
    }

    /// Create a copy of the error with the given suggestions
    #[must_use]
    pub fn with_suggestions(
        &self,
        suggestions: impl IntoIterator<Item = impl std::string::ToString>,
    ) -> Self {
        Self {
            suggestions: suggestions.into_iter().map(|s| s.to_string()).collect(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "error: {}{}\n{}",
            self.short_description, self.context, self.long_description
        )?;
        match self.suggestions.len() {
            0 => Ok(()),
            1 => writeln!(f, "Did you mean: {}?", self.suggestions[0]),
            _ => writeln!(f, "Did you mean any of: {}?", self.suggestions.join(", ")),
        }
    }
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl error::Error for CustomError {}
