//! An ordered collection of [`Template`]s rendered together as one unit.

use handlebars::Handlebars;

use crate::template::{self, Template};

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    templates: Vec<Template>,
}

impl Renderer {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Renders every template in order, stopping at the first error. Returns
    /// whether any template's destination changed.
    pub fn render(&self, context: &serde_json::Value, hb: &Handlebars) -> Result<bool, template::Error> {
        let mut changed = false;
        for template in &self.templates {
            changed |= template.render(context, hb)?;
        }
        Ok(changed)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_functions::register;

    fn hb() -> Handlebars<'static> {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        register(&mut hb);
        hb
    }

    #[test]
    fn renders_all_templates_and_reports_any_change() {
        let dir = tempfile::tempdir().unwrap();
        let src_a = dir.path().join("a.tmpl");
        let src_b = dir.path().join("b.tmpl");
        std::fs::write(&src_a, "a").unwrap();
        std::fs::write(&src_b, "b").unwrap();

        let renderer = Renderer::new(vec![
            Template::new(&src_a, dir.path().join("a.out")),
            Template::new(&src_b, dir.path().join("b.out")),
        ]);

        assert!(renderer.render(&serde_json::json!({}), &hb()).unwrap());
        assert!(!renderer.render(&serde_json::json!({}), &hb()).unwrap());
    }

    #[test]
    fn stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tmpl");
        let renderer = Renderer::new(vec![Template::new(&missing, dir.path().join("out"))]);
        assert!(renderer.render(&serde_json::json!({}), &hb()).is_err());
    }
}
