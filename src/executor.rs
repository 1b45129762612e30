//! Fetches context, renders it, and conditionally runs a command: the
//! per-reactor reaction pipeline the dispatcher drives.

use async_trait::async_trait;
use handlebars::Handlebars;
use sentinel_client::Client;
use sentinel_exec::Command;
use thiserror::Error;

use crate::{path, renderer::Renderer, template};

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching context: {0}")]
    Context(#[from] sentinel_client::Error),

    #[error("rendering templates: {0}")]
    Render(#[from] template::Error),

    #[error("running command: {0}")]
    Command(#[from] sentinel_exec::Error),
}

/// The behavior the dispatcher depends on: a name for logging/lookup, and a
/// single `execute` entry point that fetches, renders, and reacts.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, client: &dyn Client) -> Result<(), Error>;
}

/// The one [`Reactor`] implementation this crate ships: fetch the context
/// keys, descend to this watcher's prefix, render its templates, and run its
/// command only if rendering actually changed something (or there were no
/// templates to render at all).
pub struct TemplateExecutor {
    name: String,
    prefix: Vec<String>,
    context_keys: Vec<String>,
    renderer: Renderer,
    command: Option<Command>,
    hb: Handlebars<'static>,
}

impl TemplateExecutor {
    pub fn new(
        name: impl Into<String>,
        prefix: &str,
        context_keys: Vec<String>,
        renderer: Renderer,
        command: Option<Command>,
        hb: Handlebars<'static>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: path::segments(&path::canonicalize(prefix)),
            context_keys,
            renderer,
            command,
            hb,
        }
    }
}

#[async_trait]
impl Reactor for TemplateExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, client: &dyn Client) -> Result<(), Error> {
        let context = if self.context_keys.is_empty() {
            sentinel_client::Tree::empty_dir()
        } else {
            client.get(&self.context_keys).await?
        };
        let scoped = context.descend(&self.prefix).into_json();

        let changed = if self.renderer.is_empty() {
            true
        } else {
            self.renderer.render(&scoped, &self.hb)?
        };

        if changed {
            if let Some(command) = &self.command {
                sentinel_exec::run(command).await?;
            }
        }

        Ok(())
    }
}
