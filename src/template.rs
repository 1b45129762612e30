//! Renders one template source to one destination file, only touching the
//! destination when the rendered content actually changed.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use handlebars::Handlebars;
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read template source {0:?}: {1}")]
    ReadSource(PathBuf, std::io::Error),

    #[error("cannot create destination directory for {0:?}: {1}")]
    CreateDestDir(PathBuf, std::io::Error),

    #[error("cannot create temporary file in {0:?}: {1}")]
    CreateTemp(PathBuf, std::io::Error),

    #[error("error rendering template {0:?}: {1}")]
    Render(PathBuf, Box<handlebars::RenderError>),

    #[error("cannot rename {0:?} to {1:?}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

/// One `src` template, rendered into one `dest` file.
#[derive(Debug, Clone)]
pub struct Template {
    pub src: PathBuf,
    pub dest: PathBuf,
}

impl Template {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }

    /// Renders `context` through this template's source and, if the result
    /// differs from what's currently at `dest`, atomically replaces `dest`
    /// with it. Returns whether `dest` changed.
    pub fn render(&self, context: &serde_json::Value, hb: &Handlebars) -> Result<bool, Error> {
        let source = std::fs::read_to_string(&self.src)
            .map_err(|e| Error::ReadSource(self.src.clone(), e))?;

        let dest_dir = self.dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dest_dir).map_err(|e| Error::CreateDestDir(dest_dir.to_path_buf(), e))?;

        let prefix = format!(
            ".{}-",
            self.dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(dest_dir)
            .map_err(|e| Error::CreateTemp(dest_dir.to_path_buf(), e))?;

        let rendered = hb
            .render_template(&source, context)
            .map_err(|e| Error::Render(self.src.clone(), Box::new(e)))?;

        use std::io::Write;
        // Any failure writing/renaming leaves dest untouched; the temp file
        // is cleaned up when `tmp` drops.
        tmp.write_all(rendered.as_bytes())
            .map_err(|e| Error::CreateTemp(dest_dir.to_path_buf(), e))?;
        tmp.flush().map_err(|e| Error::CreateTemp(dest_dir.to_path_buf(), e))?;

        if differs(&self.dest, rendered.as_bytes()) {
            tmp.persist(&self.dest)
                .map_err(|e| Error::Rename(e.file.path().to_path_buf(), self.dest.clone(), e.error))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// True if `dest`'s current contents hash differently from `rendered`
/// (including the case where `dest` doesn't exist or can't be read, which
/// counts as "differs").
fn differs(dest: &Path, rendered: &[u8]) -> bool {
    match std::fs::read(dest) {
        Ok(existing) => hash(&existing) != hash(rendered),
        Err(_) => true,
    }
}

fn hash(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    URL_SAFE.encode(digest)
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
    fn renders_and_reports_change_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmpl");
        std::fs::write(&src, "hello {{ name }}").unwrap();
        let dest = dir.path().join("out").join("dest.txt");

        let template = Template::new(&src, &dest);
        let changed = template
            .render(&serde_json::json!({"name": "world"}), &hb())
            .unwrap();

        assert!(changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello world");
    }

    #[test]
    fn rerendering_identical_content_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmpl");
        std::fs::write(&src, "hello {{ name }}").unwrap();
        let dest = dir.path().join("dest.txt");

        let template = Template::new(&src, &dest);
        let context = serde_json::json!({"name": "world"});
        assert!(template.render(&context, &hb()).unwrap());
        assert!(!template.render(&context, &hb()).unwrap());
    }

    #[test]
    fn rerendering_different_content_replaces_dest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmpl");
        let dest = dir.path().join("dest.txt");
        let template = Template::new(&src, &dest);

        std::fs::write(&src, "first").unwrap();
        assert!(template.render(&serde_json::json!({}), &hb()).unwrap());

        std::fs::write(&src, "second").unwrap();
        assert!(template.render(&serde_json::json!({}), &hb()).unwrap());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "second");
    }

    #[test]
    fn functions_are_available_inside_templates() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmpl");
        std::fs::write(&src, "{{ AddrHost addr }}").unwrap();
        let dest = dir.path().join("dest.txt");
        let template = Template::new(&src, &dest);

        template
            .render(&serde_json::json!({"addr": "10.0.0.1:4001"}), &hb())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "10.0.0.1");
    }

    #[test]
    fn no_temp_file_left_behind_after_render() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmpl");
        std::fs::write(&src, "content").unwrap();
        let dest = dir.path().join("dest.txt");
        let template = Template::new(&src, &dest);

        template.render(&serde_json::json!({}), &hb()).unwrap();
        template.render(&serde_json::json!({}), &hb()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 2); // src.tmpl and dest.txt only
    }
}
