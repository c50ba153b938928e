use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;

use crate::discovery::triton;

static INTERPOLATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$|
        \$([[:word:].]+)|
        \$\{([[:word:].]+)(?:(:?-|:?\?)([^}]*))?\}",
    )
    .expect("interpolation regex is valid")
});

/// The config file.
///
/// ```yaml
/// triton_sd_configs:
///   - account: testAccount
///     dns_suffix: triton.example.com
///     endpoint: ${TRITON_ENDPOINT}
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub triton_sd_configs: Vec<triton::Config>,
}

impl Config {
    /// Validate every discoverer, problems are prefixed with the index of
    /// the discoverer they belong to.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.triton_sd_configs.is_empty() {
            return Err(vec!["no triton_sd_configs found".to_string()]);
        }

        let errs = self
            .triton_sd_configs
            .iter()
            .enumerate()
            .filter_map(|(index, config)| {
                config
                    .validate()
                    .err()
                    .map(|err| format!("triton_sd_configs[{index}]: {err}"))
            })
            .collect::<Vec<_>>();

        if errs.is_empty() { Ok(()) } else { Err(errs) }
    }
}

/// Read, interpolate, deserialize and then validate the config file.
pub fn load_from_path(path: &Path) -> Result<Config, Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| vec![format!("could not read config file {path:?}, {err}")])?;

    load_from_str(&content, &std::env::vars().collect())
        .map_err(|errs| {
            errs.into_iter()
                .map(|err| format!("{}: {err}", path.display()))
                .collect()
        })
}

pub fn load_from_str(content: &str, vars: &HashMap<String, String>) -> Result<Config, Vec<String>> {
    let interpolated = interpolate(content, vars)?;
    let config = serde_yaml::from_str::<Config>(&interpolated).map_err(|err| vec![err.to_string()])?;

    config.validate()?;

    Ok(config)
}

/// Substitute environment variables in `input`, the forms are
///
/// * `$NAME` and `${NAME}`, NAME must be set
/// * `${NAME:-default}`, `default` is used if NAME is unset or empty
/// * `${NAME-default}`, `default` is used if NAME is unset
/// * `${NAME:?message}`, fails with `message` if NAME is unset or empty
/// * `${NAME?message}`, fails with `message` if NAME is unset
/// * `$$` for a literal `$`
pub fn interpolate<'a>(
    input: &'a str,
    vars: &HashMap<String, String>,
) -> Result<Cow<'a, str>, Vec<String>> {
    let mut errs = Vec::new();

    let interpolated = INTERPOLATION_REGEX.replace_all(input, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            // `$$`
            return "$".to_string();
        };

        let value = vars.get(name).map(String::as_str);
        let operator = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let word = caps.get(4).map(|m| m.as_str()).unwrap_or_default();

        let resolved = match (operator, value) {
            (":-", Some(value)) if !value.is_empty() => Some(value),
            (":-", _) => Some(word),
            ("-", value) => Some(value.unwrap_or(word)),
            (":?", Some(value)) if !value.is_empty() => Some(value),
            ("?", Some(value)) => Some(value),
            (":?" | "?", _) => {
                errs.push(format!(
                    "environment variable {name:?} is required in config, {word}"
                ));
                None
            }
            (_, Some(value)) => Some(value),
            (_, None) => {
                errs.push(format!("missing environment variable {name:?} in config"));
                None
            }
        };

        resolved.unwrap_or_default().to_string()
    });

    if errs.is_empty() {
        Ok(interpolated)
    } else {
        Err(errs)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("ENDPOINT".to_string(), "cmon.triton.example.com".to_string()),
            ("EMPTY".to_string(), String::new()),
            ("ACCOUNT.NAME".to_string(), "testAccount".to_string()),
        ])
    }

    #[test]
    fn interpolation() {
        let vars = vars();

        for (input, want) in [
            ("$ENDPOINT", "cmon.triton.example.com"),
            ("${ENDPOINT}", "cmon.triton.example.com"),
            ("${ENDPOINT}:9163", "cmon.triton.example.com:9163"),
            ("${ACCOUNT.NAME}", "testAccount"),
            ("${EMPTY:-default}", "default"),
            ("${EMPTY-default}", ""),
            ("${UNSET:-default}", "default"),
            ("${UNSET-default}", "default"),
            ("${ENDPOINT:?must be set}", "cmon.triton.example.com"),
            ("${EMPTY?must be set}", ""),
            ("$$ENDPOINT", "$ENDPOINT"),
            ("no vars", "no vars"),
        ] {
            assert_eq!(interpolate(input, &vars).unwrap(), want, "{input}");
        }
    }

    #[test]
    fn interpolation_errors() {
        let vars = vars();

        for input in ["$UNSET", "${UNSET}", "${EMPTY:?must be set}", "${UNSET?must be set}"] {
            interpolate(input, &vars).unwrap_err();
        }

        let errs = interpolate("$FOO and ${BAR}", &vars).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn load() {
        let config = load_from_str(
            r#"
triton_sd_configs:
  - account: ${ACCOUNT.NAME}
    dns_suffix: triton.example.com
    endpoint: $ENDPOINT
  - account: testAccount
    server_type: gz
    dns_suffix: triton.example.com
    endpoint: ${ENDPOINT}
    refresh_interval: 5m
"#,
            &vars(),
        )
        .unwrap();

        assert_eq!(config.triton_sd_configs.len(), 2);
        assert_eq!(config.triton_sd_configs[0].account, "testAccount");
        assert_eq!(
            config.triton_sd_configs[1].endpoint,
            "cmon.triton.example.com"
        );
        assert_eq!(
            config.triton_sd_configs[1].refresh_interval,
            Duration::from_secs(5 * 60)
        );
    }

    #[test]
    fn load_collects_every_error() {
        let errs = load_from_str(
            r#"
triton_sd_configs:
  - account: testAccount
    dns_suffix: triton.example.com
    endpoint: cmon.triton.example.com
  - dns_suffix: triton.example.com
    endpoint: cmon.triton.example.com
  - account: testAccount
    server_type: container
"#,
            &vars(),
        )
        .unwrap_err();

        assert_eq!(
            errs,
            vec![
                "triton_sd_configs[1]: triton SD configuration requires an account".to_string(),
                "triton_sd_configs[2]: triton SD configuration requires server_type to be 'vm' or 'gz'".to_string(),
            ]
        );
    }

    #[test]
    fn load_invalid() {
        // unknown field
        let errs = load_from_str("triton_sd_config: []", &vars()).unwrap_err();
        assert_eq!(errs.len(), 1);

        // empty
        let errs = load_from_str("triton_sd_configs: []", &vars()).unwrap_err();
        assert_eq!(errs, vec!["no triton_sd_configs found".to_string()]);

        // missing env vars are reported before parsing
        let errs = load_from_str(
            "triton_sd_configs:\n  - account: $ACCOUNT\n    endpoint: $ENDPOINT2\n",
            &vars(),
        )
        .unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn load_file_not_found() {
        let path = testify::temp::temp_file();
        let errs = load_from_path(&path).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].starts_with("could not read config file"), "{errs:?}");
    }
}
