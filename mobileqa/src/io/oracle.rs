//! Vision-language oracle abstraction.
//!
//! The [`Oracle`] trait decouples the agents from the backend that answers
//! structured questions about a screen (currently `codex exec`). Tests use
//! scripted oracles that replay canned JSON without spawning processes.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::artifacts::write_text;
use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;

/// The five structured questions the runner asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleCall {
    Plan,
    VerifyAssertion,
    VerifyFinalState,
    DetectSubgoals,
    DecomposeGoal,
}

impl OracleCall {
    pub const ALL: [OracleCall; 5] = [
        OracleCall::Plan,
        OracleCall::VerifyAssertion,
        OracleCall::VerifyFinalState,
        OracleCall::DetectSubgoals,
        OracleCall::DecomposeGoal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OracleCall::Plan => "plan",
            OracleCall::VerifyAssertion => "verify_assertion",
            OracleCall::VerifyFinalState => "verify_final_state",
            OracleCall::DetectSubgoals => "detect_subgoals",
            OracleCall::DecomposeGoal => "decompose_goal",
        }
    }

    /// JSON Schema the answer must satisfy.
    pub fn output_schema(self) -> &'static str {
        match self {
            OracleCall::Plan => include_str!("../../schemas/planner_action.schema.json"),
            OracleCall::VerifyAssertion => {
                include_str!("../../schemas/assertion_verdict.schema.json")
            }
            OracleCall::VerifyFinalState => {
                include_str!("../../schemas/final_state_verdict.schema.json")
            }
            OracleCall::DetectSubgoals => {
                include_str!("../../schemas/subgoal_detection.schema.json")
            }
            OracleCall::DecomposeGoal => {
                include_str!("../../schemas/subgoal_decomposition.schema.json")
            }
        }
    }
}

/// One structured question.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub call: OracleCall,
    pub prompt: String,
    /// Screenshot attached to the prompt, if one exists on disk.
    pub image: Option<PathBuf>,
}

impl OracleRequest {
    pub fn new(call: OracleCall, prompt: String, image: Option<&Path>) -> Self {
        Self {
            call,
            prompt,
            image: image.filter(|path| path.is_file()).map(Path::to_path_buf),
        }
    }
}

/// Abstraction over structured-answer backends.
pub trait Oracle {
    /// Answer with a JSON object that satisfies `request.call.output_schema()`.
    fn generate_structured(&self, request: &OracleRequest) -> Result<Value>;
}

/// Oracle that spawns `codex exec` once per question.
///
/// Every call gets its own directory under `work_dir` holding the schema,
/// the last message and the process log.
pub struct CodexOracle {
    config: OracleConfig,
    work_dir: PathBuf,
    calls: Cell<u32>,
}

impl CodexOracle {
    pub fn new(config: OracleConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            calls: Cell::new(0),
        }
    }

    fn next_call_dir(&self, call: OracleCall) -> PathBuf {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        self.work_dir.join(format!("{n:04}_{}", call.name()))
    }

    /// Build the `codex exec` invocation for one call directory.
    pub fn build_command(&self, request: &OracleRequest, call_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("exec")
            .arg("--skip-git-repo-check")
            .arg("--sandbox")
            .arg("read-only");
        if let Some(model) = &self.config.model {
            cmd.arg("-m").arg(model);
        }
        if let Some(image) = &request.image {
            cmd.arg("-i").arg(image);
        }
        cmd.arg("--output-schema")
            .arg(call_dir.join("schema.json"))
            .arg("--output-last-message")
            .arg(call_dir.join("output.json"))
            .arg("-")
            .current_dir(call_dir);
        cmd
    }
}

impl Oracle for CodexOracle {
    #[instrument(skip_all, fields(call = request.call.name(), image = request.image.is_some()))]
    fn generate_structured(&self, request: &OracleRequest) -> Result<Value> {
        let call_dir = self.next_call_dir(request.call);
        fs::create_dir_all(&call_dir)
            .with_context(|| format!("create oracle dir {}", call_dir.display()))?;
        write_text(&call_dir.join("schema.json"), request.call.output_schema())?;
        write_text(&call_dir.join("prompt.md"), &request.prompt)?;

        info!(dir = %call_dir.display(), "starting codex exec");
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_command_with_timeout(
            self.build_command(request, &call_dir),
            Some(request.prompt.as_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run codex exec")?;
        write_text(&call_dir.join("oracle.log"), &output.render_log("oracle"))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "codex exec timed out");
            bail!("codex exec timed out after {timeout:?}");
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            bail!("codex exec failed with status {:?}", output.status.code());
        }

        let output_path = call_dir.join("output.json");
        let raw = fs::read_to_string(&output_path)
            .with_context(|| format!("read oracle output {}", output_path.display()))?;
        let value = extract_json_object(&raw)?;
        validate_output(request.call, &value)?;
        debug!("oracle answer accepted");
        Ok(value)
    }
}

/// Pull one JSON object out of a model reply.
///
/// Accepts bare JSON, a fenced code block, or an object embedded in prose.
pub fn extract_json_object(raw: &str) -> Result<Value> {
    static OBJECT_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"(?s)\{.*\}").expect("valid object regex"));

    let text = strip_code_fence(raw.trim());
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(err) => {
            let embedded = OBJECT_RE
                .find(text)
                .ok_or_else(|| anyhow!("no JSON object in oracle reply: {err}"))?;
            serde_json::from_str(embedded.as_str()).context("parse JSON object in oracle reply")?
        }
    };
    if !value.is_object() {
        bail!("oracle reply is not a JSON object");
    }
    Ok(value)
}

fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = text.split_once('\n').map_or("", |(_, rest)| rest);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Validate an answer against the call's JSON Schema (Draft 2020-12).
pub fn validate_output(call: OracleCall, instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(call.output_schema())
        .with_context(|| format!("parse {} schema", call.name()))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_bare_fenced_and_embedded_objects() {
        let bare = extract_json_object(r#"{"goal_achieved": true}"#).expect("bare");
        assert_eq!(bare["goal_achieved"], true);

        let fenced =
            extract_json_object("```json\n{\"assertion_holds\": false}\n```").expect("fenced");
        assert_eq!(fenced["assertion_holds"], false);

        let embedded = extract_json_object("Here you go: {\"achieved\": []} hope it helps")
            .expect("embedded");
        assert_eq!(embedded["achieved"], json!([]));
    }

    #[test]
    fn rejects_replies_without_an_object() {
        assert!(extract_json_object("I cannot answer that").is_err());
        assert!(extract_json_object("[1, 2]").is_err());
    }

    /// Verifies every bundled schema compiles under Draft 2020-12.
    #[test]
    fn all_schemas_compile() {
        for call in OracleCall::ALL {
            let schema: Value = serde_json::from_str(call.output_schema()).expect("schema json");
            jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema)
                .unwrap_or_else(|err| panic!("{} schema: {err}", call.name()));
        }
    }

    #[test]
    fn planner_schema_requires_nullable_params() {
        let ok = json!({
            "action_type": "tap_by_text",
            "description": "Open settings",
            "params": {
                "text": "Settings", "x": null, "y": null, "field_type": null,
                "direction": null, "key": null, "seconds": null,
                "condition": null, "reason": null
            }
        });
        validate_output(OracleCall::Plan, &ok).expect("valid");

        let missing = json!({"action_type": "done", "description": "d", "params": {}});
        let err = validate_output(OracleCall::Plan, &missing).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn detection_confidence_is_bounded() {
        let bad = json!({"achieved": [{"id": "subgoal_1", "confidence": 1.5, "evidence": ""}]});
        assert!(validate_output(OracleCall::DetectSubgoals, &bad).is_err());
    }

    #[test]
    fn command_attaches_model_image_and_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let image = temp.path().join("screen.png");
        fs::write(&image, b"png").expect("write");
        let config = OracleConfig {
            model: Some("gpt-5".to_string()),
            ..OracleConfig::default()
        };
        let oracle = CodexOracle::new(config, temp.path());
        let request = OracleRequest::new(OracleCall::Plan, "prompt".to_string(), Some(&image));
        let call_dir = temp.path().join("0001_plan");
        let cmd = oracle.build_command(&request, &call_dir);

        assert_eq!(cmd.get_program(), "codex");
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let pos = |flag: &str| args.iter().position(|a| a == flag).expect(flag);
        assert_eq!(args[0], "exec");
        assert_eq!(args[pos("-m") + 1], "gpt-5");
        assert_eq!(args[pos("-i") + 1], image.display().to_string());
        assert_eq!(
            args[pos("--output-schema") + 1],
            call_dir.join("schema.json").display().to_string()
        );
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert_eq!(cmd.get_current_dir(), Some(call_dir.as_path()));
    }

    #[test]
    fn missing_screenshot_is_not_attached() {
        let request = OracleRequest::new(
            OracleCall::VerifyFinalState,
            "prompt".to_string(),
            Some(Path::new("/nonexistent/screen.png")),
        );
        assert!(request.image.is_none());
    }
}
