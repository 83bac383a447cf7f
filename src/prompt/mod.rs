//! Prompt rendering with the Handlebars template engine
//!
//! Templates see the row fields as `{{problem}}`, `{{code}}` and
//! `{{answer}}`. Strict mode is on, so a template referencing anything else
//! fails when it is loaded rather than at the first row. HTML escaping is
//! off: the prompt is plain text and code must reach the service verbatim.

use handlebars::Handlebars;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::RowFields;

/// Default prompt template
pub const DEFAULT_TEMPLATE: &str = include_str!("../../templates/prompt.hbs");

const TEMPLATE_NAME: &str = "prompt";

/// Compiled prompt template
pub struct PromptTemplate {
    handlebars: Handlebars<'static>,
}

impl PromptTemplate {
    /// Compile the default template
    pub fn default_template() -> Result<Self> {
        Self::from_source(DEFAULT_TEMPLATE)
    }

    /// Compile a template from source text
    ///
    /// # Errors
    ///
    /// Returns `Error::Template` if the template does not parse or refers to
    /// a field other than `problem`, `code` and `answer`.
    pub fn from_source(source: &str) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string(TEMPLATE_NAME, source)?;

        let template = Self { handlebars };

        // Surface unknown placeholders at startup
        template.render(&RowFields::default())?;

        Ok(template)
    }

    /// Load and compile a template file
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read prompt template {}: {e}",
                path.display()
            ))
        })?;
        Self::from_source(&source)
    }

    /// Load the template at `path`, or the default one when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::default_template(),
        }
    }

    /// Render the request text for one row
    ///
    /// Deterministic: the same fields always produce the same text.
    pub fn render(&self, fields: &RowFields) -> Result<String> {
        Ok(self.handlebars.render(TEMPLATE_NAME, fields)?)
    }
}
