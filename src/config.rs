//! Configuration file shape, CLI flags, and the validation rules that turn a
//! freshly loaded [`Config`] into something the engine can trust.

use std::{collections::HashMap, fs, path::PathBuf};

use serde::{Deserialize, Deserializer};
use structopt::StructOpt;

use sentinel_exec::Command;

/// Command-line options, matching the flag surface of the original
/// implementation's `options.go`.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "sentinel", about = "a configuration-reactive supervisor")]
pub struct Opt {
    #[structopt(
        long,
        default_value = "/etc/sentinel.yml",
        help = "path to the YAML configuration file"
    )]
    pub config: PathBuf,

    #[structopt(
        long,
        help = "run only the named watcher(s) once and exit, instead of running all watchers forever"
    )]
    pub exec: Vec<String>,

    #[structopt(long, help = "an etcd endpoint URI; may be repeated")]
    pub etcd: Vec<String>,

    #[structopt(long, help = "key prefix under which all watched keys live")]
    pub prefix: Option<String>,

    #[structopt(long, help = "log target: \"stderr\" or a file path")]
    pub log_target: Option<String>,

    #[structopt(long, help = "log level: debug, info, notice, warn, error, or fatal")]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Notice
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "notice" => Ok(LogLevel::Notice),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

impl LogLevel {
    /// The `log` crate has no `Fatal` level; a fatal condition is logged at
    /// `Error` and the process then exits at the call site.
    pub fn as_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info | LogLevel::Notice => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl<'de> Deserialize<'de> for LogTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(LogTarget::from(raw))
    }
}

impl From<String> for LogTarget {
    fn from(raw: String) -> Self {
        if raw.eq_ignore_ascii_case("stderr") {
            LogTarget::Stderr
        } else {
            LogTarget::File(PathBuf::from(raw))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub target: LogTarget,
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            target: LogTarget::Stderr,
            level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub uris: Vec<String>,
    pub prefix: String,
    pub tls_key: String,
    pub tls_cert: String,
    pub tls_ca_cert: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            uris: vec!["http://172.17.42.1:4001/".to_string()],
            prefix: String::new(),
            tls_key: String::new(),
            tls_cert: String::new(),
            tls_ca_cert: String::new(),
        }
    }
}

impl EtcdConfig {
    pub fn is_tls(&self) -> bool {
        !self.tls_key.is_empty() && !self.tls_cert.is_empty() && !self.tls_ca_cert.is_empty()
    }

    fn validate(&self, errors: &mut Vec<String>) {
        let partially_set = [&self.tls_key, &self.tls_cert, &self.tls_ca_cert]
            .iter()
            .any(|f| !f.is_empty());
        if partially_set && !self.is_tls() {
            errors.push(
                "etcd.tls_key, etcd.tls_cert, and etcd.tls_ca_cert must all be set together"
                    .to_string(),
            );
        }
        if self.is_tls() {
            for (field, path) in [
                ("tls_key", &self.tls_key),
                ("tls_cert", &self.tls_cert),
                ("tls_ca_cert", &self.tls_ca_cert),
            ] {
                if !file_is_readable(path) {
                    errors.push(format!("etcd.{} is not a readable file: {}", field, path));
                }
            }
        }
        if self.uris.is_empty() {
            errors.push("etcd.uris must not be empty".to_string());
        }
    }
}

fn file_is_readable(path: impl AsRef<std::path::Path>) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub src: PathBuf,
    pub dest: PathBuf,
}

impl TemplateConfig {
    fn validate(&self, watcher: &str, errors: &mut Vec<String>) {
        if self.src.as_os_str().is_empty() {
            errors.push(format!("watcher {:?}: template.src must not be empty", watcher));
        } else if !file_is_readable(&self.src) {
            errors.push(format!(
                "watcher {:?}: template.src is not a readable file: {:?}",
                watcher, self.src
            ));
        }
        if self.dest.as_os_str().is_empty() {
            errors.push(format!("watcher {:?}: template.dest must not be empty", watcher));
        }
    }
}

/// Either a shell string (run via `bash -c`) or an explicit argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandConfig {
    Shell(String),
    Argv(Vec<String>),
}

impl<'de> Deserialize<'de> for CommandConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Shell(String),
            Argv(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Shell(s) => CommandConfig::Shell(s),
            Raw::Argv(argv) => CommandConfig::Argv(argv),
        })
    }
}

impl From<CommandConfig> for Command {
    fn from(c: CommandConfig) -> Self {
        match c {
            CommandConfig::Shell(s) => Command::Shell(s),
            CommandConfig::Argv(argv) => Command::Argv(argv),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    #[serde(skip)]
    pub name: String,
    pub prefix: String,
    pub watch: Vec<String>,
    pub context: Vec<String>,
    pub templates: Vec<TemplateConfig>,
    pub command: Option<CommandConfig>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            prefix: String::new(),
            watch: Vec::new(),
            context: Vec::new(),
            templates: Vec::new(),
            command: None,
        }
    }
}

impl WatcherConfig {
    fn validate(&self, errors: &mut Vec<String>) {
        if self.watch.is_empty() {
            errors.push(format!("watcher {:?}: watch must not be empty", self.name));
        }
        if !self.templates.is_empty() && self.context.is_empty() {
            errors.push(format!(
                "watcher {:?}: context must not be empty when templates are configured",
                self.name
            ));
        }
        for template in &self.templates {
            template.validate(&self.name, errors);
        }
    }

    /// The prefix set the dispatcher should watch on this reactor's behalf:
    /// `watch` when non-empty, falling back to `context` otherwise.
    pub fn watched_prefixes(&self) -> Vec<String> {
        if !self.watch.is_empty() {
            self.watch.clone()
        } else {
            self.context.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub etcd: EtcdConfig,
    pub logging: LoggingConfig,
    pub watchers: HashMap<String, WatcherConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            etcd: EtcdConfig::default(),
            logging: LoggingConfig::default(),
            watchers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        for (name, watcher) in config.watchers.iter_mut() {
            watcher.name = name.clone();
        }
        Ok(config)
    }

    /// Applies CLI overrides, matching the override precedence of the
    /// original: flags win over whatever the file said.
    pub fn apply_overrides(&mut self, opt: &Opt) {
        if !opt.etcd.is_empty() {
            self.etcd.uris = opt.etcd.clone();
        }
        if let Some(prefix) = &opt.prefix {
            self.etcd.prefix = prefix.clone();
        }
        if let Some(target) = &opt.log_target {
            self.logging.target = LogTarget::from(target.clone());
        }
        if let Some(level) = opt.log_level {
            self.logging.level = level;
        }
    }

    /// Validates the whole configuration tree, returning every violation
    /// found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        self.etcd.validate(&mut errors);
        for watcher in self.watchers.values() {
            watcher.validate(&mut errors);
        }
        self.validate_unique_dests(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Two templates, whether in the same watcher or across different ones,
    /// must never share a `dest`: the engine does not serialise renders
    /// across watchers, so a collision would race two temp-file renames onto
    /// the same path.
    fn validate_unique_dests(&self, errors: &mut Vec<String>) {
        let mut seen: HashMap<PathBuf, String> = HashMap::new();
        for watcher in self.watchers.values() {
            for template in &watcher.templates {
                match seen.get(&template.dest) {
                    Some(owner) => errors.push(format!(
                        "watcher {:?}: template.dest {:?} is also used by watcher {:?}",
                        watcher.name, template.dest, owner
                    )),
                    None => {
                        seen.insert(template.dest.clone(), watcher.name.clone());
                    }
                }
            }
        }
    }
}
