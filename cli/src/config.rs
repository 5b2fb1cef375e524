use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use delivery_core::ConfigSnapshot;
use delivery_core::json::JsonObject;
use tracing::debug;

/// Overrides `$HOME/.delivery` as the directory holding config and state.
pub const HOME_ENV: &str = "DELIVERY_HOME";

const HOME_DIR: &str = ".delivery";
const CONFIG_FILE: &str = "config.toml";

pub fn delivery_home() -> Result<PathBuf> {
    if let Some(home) = env::var_os(HOME_ENV).filter(|home| !home.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Home directory is unavailable"))?;
    Ok(home.join(HOME_DIR))
}

/// An explicit path must exist; a missing default file means defaults.
pub(crate) fn load_config(path: Option<&Path>) -> Result<ConfigSnapshot> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let path = delivery_home()?.join(CONFIG_FILE);
            if !path.exists() {
                debug!("No config at {}, using defaults", path.display());
                return Ok(ConfigSnapshot::default());
            }
            path
        }
    };
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let map = parse_config(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(ConfigSnapshot::from_map(&map))
}

/// Flattens a TOML document into the dotted keys of the configuration
/// shared state: `[target] clientCode = "x"` and `"target.clientCode" = "x"`
/// both become `target.clientCode`.
pub fn parse_config(text: &str) -> Result<JsonObject> {
    let table: toml::Table = toml::from_str(text)?;
    let mut map = JsonObject::new();
    flatten("", table, &mut map)?;
    Ok(map)
}

fn flatten(prefix: &str, table: toml::Table, out: &mut JsonObject) -> Result<()> {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(inner) => flatten(&key, inner, out)?,
            value => {
                let value = serde_json::to_value(value)
                    .with_context(|| format!("Unsupported value for {key}"))?;
                out.insert(key, value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_core::PrivacyStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nested_and_quoted_keys_flatten_alike() {
        let map = parse_config(
            r#"
"global.privacy" = "optedin"

[target]
clientCode = "acme"
timeout = 5
previewEnabled = false
"#,
        )
        .expect("parse");

        assert_eq!(map.get("global.privacy"), Some(&json!("optedin")));
        assert_eq!(map.get("target.clientCode"), Some(&json!("acme")));
        assert_eq!(map.get("target.timeout"), Some(&json!(5)));
        assert_eq!(map.get("target.previewEnabled"), Some(&json!(false)));
    }

    #[test]
    fn flattened_map_feeds_the_snapshot() {
        let map = parse_config(
            r#"
[global]
privacy = "OptedOut"

[target]
clientCode = "acme"
environmentId = 7
sessionTimeout = 60
server = "edge.example.com"
"#,
        )
        .expect("parse");
        let config = ConfigSnapshot::from_map(&map);

        assert_eq!(config.client_code, "acme");
        assert_eq!(config.privacy_status, PrivacyStatus::OptOut);
        assert_eq!(config.environment_id, 7);
        assert_eq!(config.session_timeout_secs, 60);
        assert_eq!(config.target_server, "edge.example.com");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "target = [").expect("write");
        let err = load_config(Some(&path)).expect_err("malformed");
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}
