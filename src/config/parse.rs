use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use crate::processor::ProcessorRegistry;
use crate::source::LinePattern;
use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Read, expand, parse and validate a config file against the built-in
/// processor kinds.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Same as `load_config` for an in-memory YAML document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);

    validate_config(&config, &ProcessorRegistry::with_builtins())?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return Ok(());
    };

    // Full-line comments may mention the syntax without using it
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| re.captures_iter(line))
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=/path/to/logs\n\
             2. Replace $env{{{0}}} in the config file with an actual path",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export LOG_DIR=/var/log)\n\
             2. Replace the variables in the config file with actual paths",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    for source in &mut config.sources {
        source.path = expand_tilde(&source.path);
    }

    if let StorageConfig::File { path, .. } = &mut config.storage {
        *path = expand_tilde(path);
    }
}

/// Collect every problem in the config rather than stopping at the first.
pub fn validate_config(config: &Config, registry: &ProcessorRegistry) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_watch(&config.watch, &mut errors);
    validate_sources(&config.sources, &mut errors);
    validate_parser(&config.parser, &mut errors);
    validate_processors(&config.processors, registry, &mut errors);
    validate_storage(&config.storage, &mut errors);

    if config.pipeline.max_consecutive_store_failures == 0 {
        errors.push("pipeline.max_consecutive_store_failures must be at least 1".to_string());
    }

    if let Some(web) = &config.web {
        if web.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "web.listen: '{}' is not a valid socket address (expected e.g. 127.0.0.1:7181)",
                web.listen
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_watch(watch: &WatchConfig, errors: &mut Vec<String>) {
    if watch.poll_interval.is_zero() {
        errors.push("watch.poll_interval must be greater than zero".to_string());
    }
    if watch.max_read_bytes == 0 {
        errors.push("watch.max_read_bytes must be at least 1".to_string());
    }
    if watch.max_line_bytes == 0 {
        errors.push("watch.max_line_bytes must be at least 1".to_string());
    }
}

fn validate_sources(sources: &[SourceConfig], errors: &mut Vec<String>) {
    if sources.is_empty() {
        errors.push("config must list at least one entry under 'sources'".to_string());
    }

    let mut seen = HashSet::new();
    for (i, source) in sources.iter().enumerate() {
        let context = format!("sources[{}]", i);

        if source.path.as_os_str().is_empty() {
            errors.push(format!("{}: path cannot be empty", context));
            continue;
        }
        if !seen.insert(&source.path) {
            errors.push(format!(
                "{}: path '{}' is listed more than once",
                context,
                source.path.display()
            ));
        }
        if let Some(interval) = source.poll_interval {
            if interval.is_zero() {
                errors.push(format!("{}: poll_interval must be greater than zero", context));
            }
        }
        if let Some(pattern) = &source.pattern {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(format!("{}: invalid glob '{}': {}", context, pattern, e));
            }
        }
    }
}

fn validate_parser(parser: &ParserConfig, errors: &mut Vec<String>) {
    if parser.patterns.is_empty() && !parser.include_defaults {
        errors.push(
            "parser: no patterns configured and include_defaults is false; every line would be UNKNOWN"
                .to_string(),
        );
    }

    let mut names = HashSet::new();
    for (i, pattern) in parser.patterns.iter().enumerate() {
        if !names.insert(pattern.name.as_str()) {
            errors.push(format!(
                "parser.patterns[{}]: duplicate pattern name '{}'",
                i, pattern.name
            ));
        }
        if let Err(e) = LinePattern::from_config(pattern) {
            errors.push(format!("parser.patterns[{}]: {}", i, e));
        }
    }
}

fn validate_processors(
    processors: &[ProcessorConfig],
    registry: &ProcessorRegistry,
    errors: &mut Vec<String>,
) {
    let mut names = HashSet::new();
    for (i, processor) in processors.iter().enumerate() {
        let context = format!("processors[{}]", i);

        if processor.name.is_empty() {
            errors.push(format!("{}: name cannot be empty", context));
            continue;
        }
        if !names.insert(processor.name.as_str()) {
            errors.push(format!(
                "{}: duplicate processor name '{}'",
                context, processor.name
            ));
        }
        if !registry.contains(processor.kind()) {
            errors.push(format!(
                "{}: unknown processor kind '{}' (available: {})",
                context,
                processor.kind(),
                registry.kinds().join(", ")
            ));
            continue;
        }
        if let Err(e) = registry.build(processor) {
            errors.push(format!("{} '{}': {}", context, processor.name, e));
        }
    }
}

fn validate_storage(storage: &StorageConfig, errors: &mut Vec<String>) {
    match storage {
        StorageConfig::Memory { capacity } => {
            if *capacity == 0 {
                errors.push("storage.capacity must be at least 1".to_string());
            }
        }
        StorageConfig::File { path, .. } => {
            if path.as_os_str().is_empty() {
                errors.push("storage.path cannot be empty".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
sources:
  - path: /var/log/app.log
"#;

    fn validation_errors(yaml: &str) -> Vec<String> {
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.watch.poll_interval, Duration::from_secs(1));
        assert_eq!(config.storage, StorageConfig::Memory { capacity: 10_000 });
        let names: Vec<&str> = config.processors.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["severity", "patterns"]);
        assert!(config.parser.include_defaults);
        assert!(config.web.is_none());
    }

    #[test]
    fn test_humantime_durations() {
        let config = parse_config(
            r#"
watch:
  poll_interval: 250ms
  missing_grace: 2m
sources:
  - path: /var/log/app.log
    poll_interval: 5s
    start: end
"#,
        )
        .unwrap();

        assert_eq!(config.watch.poll_interval, Duration::from_millis(250));
        assert_eq!(config.watch.missing_grace, Duration::from_secs(120));
        assert_eq!(config.sources[0].poll_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.sources[0].start, ReadStart::End);
    }

    #[test]
    fn test_file_backend_tilde_expanded() {
        let config = parse_config(
            r#"
sources:
  - path: ~/logs/app.log
storage:
  backend: file
  path: ~/.local/share/logwell/records.jsonl
"#,
        )
        .unwrap();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.sources[0].path, home.join("logs/app.log"));
            assert_eq!(
                config.storage,
                StorageConfig::File {
                    path: home.join(".local/share/logwell/records.jsonl"),
                    fsync: false
                }
            );
        }
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = validation_errors(
            r#"
watch:
  poll_interval: 0s
sources: []
storage:
  backend: memory
  capacity: 0
processors:
  - name: severity
  - name: severity
  - name: geo
pipeline:
  max_consecutive_store_failures: 0
web:
  listen: not-an-address
"#,
        );

        let joined = errors.join("\n");
        assert!(joined.contains("poll_interval must be greater than zero"));
        assert!(joined.contains("at least one entry under 'sources'"));
        assert!(joined.contains("storage.capacity"));
        assert!(joined.contains("duplicate processor name 'severity'"));
        assert!(joined.contains("unknown processor kind 'geo'"));
        assert!(joined.contains("max_consecutive_store_failures"));
        assert!(joined.contains("web.listen"));
    }

    #[test]
    fn test_bad_parser_pattern_reported() {
        let errors = validation_errors(
            r#"
sources:
  - path: /var/log/app.log
parser:
  patterns:
    - name: broken
      regex: '(?P<ts>['
    - name: stray
      regex: '^(?P<host>\S+)'
"#,
        );

        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("broken"));
        assert!(errors[1].contains("unsupported named group 'host'"));
    }

    #[test]
    fn test_bad_processor_options_reported() {
        let errors = validation_errors(
            r#"
sources:
  - path: /var/log/app.log
processors:
  - name: net
    kind: patterns
    options:
      extra:
        bad: '('
"#,
        );

        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("processors[0] 'net'"));
    }

    #[test]
    fn test_unset_env_var_rejected() {
        let result = parse_config(
            r#"
sources:
  - path: $env{LOGWELL_DEFINITELY_UNSET_VAR}/app.log
"#,
        );
        match result {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("LOGWELL_DEFINITELY_UNSET_VAR"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_env_syntax_in_comment_ignored() {
        let config = parse_config(
            r#"
# Paths may use $env{LOGWELL_DEFINITELY_UNSET_VAR}
sources:
  # - path: $env{LOGWELL_DEFINITELY_UNSET_VAR}/old.log
  - path: /var/log/app.log
"#,
        )
        .unwrap();
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_unknown_backend_is_yaml_error() {
        let result = parse_config(
            r#"
sources:
  - path: /var/log/app.log
storage:
  backend: duckdb
"#,
        );
        assert!(matches!(result, Err(ConfigError::YamlParse(_))));
    }
}
