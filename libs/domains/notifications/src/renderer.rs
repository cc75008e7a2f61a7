//! Handlebars rendering of stored templates.

use crate::models::RenderContext;
use handlebars::Handlebars;
use thiserror::Error;

const TEMPLATE_KEY: &str = "message";

/// Why a template could not produce a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    /// The template source does not parse.
    #[error("template syntax error: {0}")]
    TemplateSyntaxError(String),

    /// The template references a value missing from the context.
    #[error("render error: {0}")]
    RenderError(String),
}

/// Strict-mode renderer.
///
/// Every call compiles into a fresh registry, so output depends only on
/// `content` and `context`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, content: &str, context: &RenderContext) -> Result<String, RenderFailure> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        handlebars
            .register_template_string(TEMPLATE_KEY, content)
            .map_err(|e| RenderFailure::TemplateSyntaxError(e.to_string()))?;

        handlebars
            .render(TEMPLATE_KEY, context)
            .map_err(|e| RenderFailure::RenderError(e.to_string()))
    }
}
