//! Script file types
//!
//! ```yaml
//! config:
//!   target: ws://localhost:8080
//!   variables:
//!     room: lobby
//!   functions:
//!     double: "args[0] * 2"
//! scenario:
//!   - connect: { url: "/rooms/{{room}}" }
//!   - send: { json: { n: "{{ $double(21) }}" } }
//!   - think: 0.5
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::common::{Error, Result};
use crate::engine::{EngineConfig, StepSpec};
use crate::template::{Functions, Sandbox};

/// A complete script loaded from disk
#[derive(Deserialize, Debug)]
pub struct Script {
    /// Connection settings and bindings
    #[serde(default)]
    pub config: ScriptConfig,
    /// Steps every session runs, in order
    pub scenario: Vec<StepSpec>,
}

/// The `config` section of a script
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    /// Base URL of the system under test
    pub target: Option<String>,
    /// Leave the initial connection to the caller
    #[serde(default)]
    pub defer_connection: bool,
    /// Variables bound in every session
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Script functions, name to code; `args` holds the call arguments
    #[serde(default)]
    pub functions: BTreeMap<String, String>,
}

impl Script {
    /// Load a script, picking the format from the file extension
    ///
    /// `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };

        parsed.map_err(|message| Error::ScenarioParse {
            path: path.display().to_string(),
            message,
        })
    }

    fn from_json(content: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// Engine settings, using `fallback_target` when the script names none
    pub fn engine_config(&self, fallback_target: Option<&str>) -> EngineConfig {
        let target = self
            .config
            .target
            .as_deref()
            .or(fallback_target)
            .unwrap_or_default()
            .to_string();

        EngineConfig {
            target,
            defer_connection: self.config.defer_connection,
        }
    }

    /// Built-in functions plus the script's own
    ///
    /// Script functions see the script variables and their call arguments.
    pub fn functions(&self) -> Result<Functions> {
        let mut funcs = Functions::with_builtins();
        let sandbox = Sandbox::new(self.config.variables.clone());
        for (name, code) in &self.config.functions {
            funcs.register_script(name, sandbox.clone(), code)?;
        }
        Ok(funcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_script(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_script(
            ".yaml",
            r#"
config:
  target: ws://localhost:9000
  variables:
    room: lobby
scenario:
  - connect: { url: "/rooms/{{room}}" }
  - send: { json: { msg: hi } }
  - think: 0.25
  - send: "plain"
"#,
        );

        let script = Script::load(file.path()).unwrap();
        assert_eq!(script.config.target.as_deref(), Some("ws://localhost:9000"));
        assert_eq!(script.config.variables["room"], json!("lobby"));
        assert_eq!(script.scenario.len(), 4);
        assert_eq!(script.scenario[2], StepSpec::Think(0.25));
    }

    #[test]
    fn test_load_json_with_camel_case_config() {
        let file = write_script(
            ".json",
            r#"{
                "config": { "deferConnection": true },
                "scenario": [{ "send": "x" }]
            }"#,
        );

        let script = Script::load(file.path()).unwrap();
        assert!(script.config.defer_connection);
        assert!(script.config.target.is_none());
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let file = write_script(".yml", "scenario:\n  - dance: 3\n");
        match Script::load(file.path()) {
            Err(Error::ScenarioParse { path, .. }) => {
                assert_eq!(path, file.path().display().to_string())
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = Script::load(Path::new("/nonexistent/wsbench/script.yaml"));
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }

    #[test]
    fn test_engine_config_falls_back_to_default_target() {
        let script: Script = serde_yaml::from_str("scenario: []").unwrap();
        assert_eq!(script.engine_config(Some("ws://fallback")).target, "ws://fallback");
        assert_eq!(script.engine_config(None).target, "");

        let script: Script =
            serde_yaml::from_str("config: { target: 'ws://own' }\nscenario: []").unwrap();
        assert_eq!(script.engine_config(Some("ws://fallback")).target, "ws://own");
    }

    #[test]
    fn test_script_functions_see_variables_and_args() {
        let script: Script = serde_yaml::from_str(
            r#"
config:
  variables: { base: 100 }
  functions:
    offset: "base + args[0]"
scenario: []
"#,
        )
        .unwrap();

        let funcs = script.functions().unwrap();
        assert!(funcs.contains("randomNumber"));
        let value = funcs.call("offset", &[json!(5)]).unwrap().unwrap();
        assert_eq!(value, json!(105));
    }

    #[test]
    fn test_script_function_syntax_error_is_reported() {
        let script: Script = serde_yaml::from_str(
            "config: { functions: { broken: 'args[' } }\nscenario: []",
        )
        .unwrap();
        assert!(matches!(
            script.functions(),
            Err(Error::TemplateSyntax { .. })
        ));
    }
}
