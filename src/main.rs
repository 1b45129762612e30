use std::sync::Arc;

use anyhow::Context;
use handlebars::Handlebars;
use sentinel_client::{stop_channel, Client, EtcdClient, EtcdClientOptions};
use structopt::StructOpt;
use tokio::signal::unix::{signal, SignalKind};

mod config;
mod dispatcher;
mod executor;
mod path;
mod renderer;
mod template;

use config::{Config, Opt};
use dispatcher::Dispatcher;
use executor::TemplateExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let mut config = Config::load(&opt.config)
        .with_context(|| format!("loading configuration from {:?}", opt.config))?;
    config.apply_overrides(&opt);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("configuration error: {}", error);
        }
        anyhow::bail!("configuration is invalid ({} error(s))", errors.len());
    }

    init_logging(&config.logging);

    let client: Arc<dyn Client> = Arc::new(build_etcd_client(&config)?);
    let dispatcher = build_dispatcher(&config)?;

    let (stop_tx, mut stop_rx) = stop_channel();

    if !client.wait(&mut stop_rx).await {
        log::info!("stopped while waiting for the backing store to become reachable");
        return Ok(());
    }

    if !opt.exec.is_empty() {
        return run_once(&dispatcher, client.as_ref(), &opt.exec).await;
    }

    // Long-running mode: every watcher runs, reacting to changes until a
    // signal asks us to stop.
    let names: Vec<String> = config.watchers.keys().cloned().collect();
    if let Err(errors) = dispatcher.execute(client.as_ref(), &names).await {
        for error in &errors {
            log::error!("{}", error);
        }
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let run = tokio::spawn({
        let client = client.clone();
        async move { dispatcher.run(client, stop_rx).await }
    });

    tokio::select! {
        _ = sigint.recv() => log::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
        _ = sigquit.recv() => log::info!("received SIGQUIT, shutting down"),
    }

    let _ = stop_tx.send(true);
    let _ = run.await;

    Ok(())
}

async fn run_once(dispatcher: &Dispatcher, client: &dyn Client, names: &[String]) -> anyhow::Result<()> {
    if let Err(errors) = dispatcher.execute(client, names).await {
        for error in &errors {
            log::error!("{}", error);
        }
        anyhow::bail!("{} watcher(s) failed", errors.len());
    }
    Ok(())
}

fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();

    for watcher in config.watchers.values() {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        sentinel_functions::register(&mut hb);

        let templates = watcher
            .templates
            .iter()
            .map(|t| template::Template::new(&t.src, &t.dest))
            .collect();

        let prefix = if watcher.prefix.is_empty() {
            "/"
        } else {
            &watcher.prefix
        };

        let reactor = Arc::new(TemplateExecutor::new(
            &watcher.name,
            prefix,
            watcher.context.clone(),
            renderer::Renderer::new(templates),
            watcher.command.clone().map(Into::into),
            hb,
        ));

        dispatcher.add(&watcher.watched_prefixes(), reactor);
    }

    Ok(dispatcher)
}

fn build_etcd_client(config: &Config) -> anyhow::Result<EtcdClient> {
    let mut opts = EtcdClientOptions {
        endpoints: config.etcd.uris.clone(),
        prefix: config.etcd.prefix.clone(),
        ..Default::default()
    };

    if config.etcd.is_tls() {
        let mut identity_pem = std::fs::read(&config.etcd.tls_cert)
            .with_context(|| format!("reading {:?}", config.etcd.tls_cert))?;
        let mut key_pem = std::fs::read(&config.etcd.tls_key)
            .with_context(|| format!("reading {:?}", config.etcd.tls_key))?;
        identity_pem.append(&mut key_pem);
        opts.tls_identity_pem = Some(identity_pem);

        opts.tls_ca_pem = Some(
            std::fs::read(&config.etcd.tls_ca_cert)
                .with_context(|| format!("reading {:?}", config.etcd.tls_ca_cert))?,
        );
    }

    Ok(EtcdClient::new(opts)?)
}

fn init_logging(logging: &config::LoggingConfig) {
    use config::LogTarget;

    let spec = match logging.level.as_level_filter() {
        log::LevelFilter::Debug => "debug",
        log::LevelFilter::Warn => "warn",
        log::LevelFilter::Error => "error",
        _ => "info",
    };

    let mut builder = match flexi_logger::Logger::try_with_str(spec) {
        Ok(builder) => builder.format(flexi_logger::colored_default_format),
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            return;
        }
    };

    builder = match &logging.target {
        LogTarget::Stderr => builder.log_to_stderr(),
        LogTarget::File(path) => {
            let spec = flexi_logger::FileSpec::default().directory(
                path.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new(".")),
            );
            builder.log_to_file(spec)
        }
    };

    if let Err(e) = builder.start() {
        eprintln!("failed to initialize logging: {}", e);
    }
}
