//! Positional argument access for single-shot tools.
//!
//! An `Invocation` is created once from the process arguments (program name
//! stripped) and is read-only afterwards.

use crate::error::OpsError;

/// The ordered arguments a tool was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from `std::env::args()`, dropping the program name.
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Check that every field in `fields` has a positional value.
    ///
    /// Extra trailing arguments are ignored. On shortfall the error names each
    /// missing field in order.
    pub fn require(&self, usage: &str, fields: &[&str]) -> crate::Result<()> {
        if self.args.len() >= fields.len() {
            return Ok(());
        }
        Err(OpsError::MissingArguments {
            usage: usage.to_string(),
            missing: fields[self.args.len()..]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        })
    }
}

/// Parse a `true`/`false` flag field, case-insensitively.
pub fn parse_flag(field: &str, value: &str) -> crate::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(OpsError::InvalidArgument(
            field.to_string(),
            format!("expected 'true' or 'false', got '{}'", value),
        )),
    }
}
