//! Compile options.
//!
//! Options can be built in code or loaded from a TOML table:
//!
//! ```toml
//! strict = true
//! lazy_functions = true
//! switch_table_max_len = 1024
//! ```

use serde::{Deserialize, Serialize};

/// Knobs for a single compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Compile the unit as strict code from the start
    pub strict: bool,

    /// Keep the value of the last expression statement (`SetRval` instead of
    /// `Pop`), as an `eval` or REPL driver needs
    pub keep_last_value: bool,

    /// Syntax-parse nested functions and emit them as lazy stubs
    pub lazy_functions: bool,

    /// Ceiling on statement/expression nesting before a limit error
    pub max_nesting_depth: u32,

    /// Native stack the recursive parser or emitter may use before a limit
    /// error. Keep it well under the stack size of the compiling thread.
    pub max_stack_bytes: usize,

    /// Largest case range a dense switch table may cover
    pub switch_table_max_len: u32,

    /// A dense table is used only when `range <= density * case_count`
    pub switch_table_density: u32,

    /// Name used in diagnostics
    pub filename: Option<String>,

    /// Line number of the first source line
    pub first_line: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            keep_last_value: false,
            lazy_functions: false,
            max_nesting_depth: 256,
            max_stack_bytes: 1024 * 1024,
            switch_table_max_len: 4096,
            switch_table_density: 2,
            filename: None,
            first_line: 1,
        }
    }
}

impl CompileOptions {
    /// Parses options from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Sets strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets whether the last expression value is kept.
    pub fn with_keep_last_value(mut self, keep: bool) -> Self {
        self.keep_last_value = keep;
        self
    }

    /// Sets lazy function compilation.
    pub fn with_lazy_functions(mut self, lazy: bool) -> Self {
        self.lazy_functions = lazy;
        self
    }

    /// Sets the diagnostic file name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert!(!options.strict);
        assert_eq!(options.switch_table_density, 2);
        assert_eq!(options.first_line, 1);
    }

    #[test]
    fn test_from_toml_partial() {
        let options = CompileOptions::from_toml_str("strict = true\nswitch_table_max_len = 16\n")
            .expect("valid toml");
        assert!(options.strict);
        assert_eq!(options.switch_table_max_len, 16);
        assert_eq!(options.max_nesting_depth, CompileOptions::default().max_nesting_depth);
    }

    #[test]
    fn test_from_toml_rejects_wrong_type() {
        assert!(CompileOptions::from_toml_str("strict = 3").is_err());
    }

    #[test]
    fn test_builders() {
        let options = CompileOptions::default()
            .with_strict(true)
            .with_lazy_functions(true)
            .with_filename("a.js");
        assert!(options.strict && options.lazy_functions);
        assert_eq!(options.filename.as_deref(), Some("a.js"));
    }
}
