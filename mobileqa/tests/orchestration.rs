//! End-to-end runs of the step loop against a fake device and a scripted oracle.
//!
//! Screens are plain node lists; the fake device navigates to the next queued
//! screen on taps outside text fields, swipes, BACK/HOME and launches.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use mobileqa::core::types::{TestVerdict, Verdict};
use mobileqa::core::ui::{Bounds, UiNode};
use mobileqa::io::config::{DEFAULT_PACKAGE, RunnerConfig, TestCase};
use mobileqa::io::device::keycode;
use mobileqa::io::oracle::OracleCall;
use mobileqa::looping::{TestResult, run_test};
use mobileqa::step::{REPLAN_REASON, STUCK_REASON};
use mobileqa::test_support::{
    DeviceCall, FakeDevice, ScriptedOracle, button, edit_text, label, plan,
};

fn config(max_steps: u32) -> RunnerConfig {
    RunnerConfig {
        max_steps,
        settle_ms: 0,
        recovery_wait_ms: 0,
        ..RunnerConfig::default()
    }
}

fn case(name: &str, goal: &str) -> TestCase {
    TestCase {
        name: name.to_string(),
        goal: goal.to_string(),
        package: DEFAULT_PACKAGE.to_string(),
        apk_path: None,
        setup: None,
    }
}

fn page(n: usize) -> Vec<UiNode> {
    vec![label(&format!("Page {n}"), Bounds::new(0, 100, 1080, 200))]
}

fn run(
    device: &FakeDevice,
    oracle: &ScriptedOracle,
    cfg: &RunnerConfig,
    test: &TestCase,
    root: &Path,
) -> (TestResult, Vec<TestVerdict>) {
    let mut verdicts = Vec::new();
    let result = run_test(device, oracle, cfg, test, root, |verdict| {
        verdicts.push(verdict.clone());
    })
    .expect("run test");
    (result, verdicts)
}

fn read_json(path: &Path) -> Value {
    let raw = fs::read_to_string(path).unwrap_or_else(|err| panic!("{}: {err}", path.display()));
    serde_json::from_str(&raw).expect("json")
}

/// Verifies the recovery ladder: wait, back, home+relaunch, then a stuck verdict.
#[test]
fn unchanged_ui_escalates_recovery_then_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![
        label("Files", Bounds::new(0, 100, 1080, 200)),
        button("Create new note", Bounds::new(0, 300, 1080, 400)),
    ]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(OracleCall::Plan, plan("wait", "Let the list load", json!({"seconds": 1})))
        .push(OracleCall::Plan, plan("wait", "Let the list load", json!({"seconds": 1})));
    let test = case("stuck", "Open the note list");

    let (result, verdicts) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::FailAction);
    assert_eq!(result.reason, STUCK_REASON);
    assert_eq!(result.total_steps, 5);
    assert_eq!(oracle.count(OracleCall::Plan), 2);
    assert_eq!(
        verdicts.iter().map(|v| v.verdict).collect::<Vec<_>>(),
        vec![Verdict::Running, Verdict::Running, Verdict::FailAction]
    );

    let recoveries: Vec<DeviceCall> = device
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(call, DeviceCall::KeyEvent(_) | DeviceCall::Launch(_))
        })
        .collect();
    assert_eq!(
        recoveries,
        vec![
            DeviceCall::KeyEvent(keycode::BACK),
            DeviceCall::KeyEvent(keycode::HOME),
            DeviceCall::Launch(DEFAULT_PACKAGE.to_string()),
        ]
    );
    for (step, rung) in [(3, "wait"), (4, "back"), (5, "home+relaunch")] {
        let recovery = fs::read_to_string(result.artifacts_dir.join(format!("step_0{step}/recovery.txt")))
            .expect("recovery.txt");
        assert!(recovery.contains(&format!("recovery={rung}\n")), "{recovery}");
    }
    assert!(!result.artifacts_dir.join("step_03/action.json").exists());
}

/// Verifies two invalid proposals in one step end the test.
#[test]
fn second_invalid_plan_is_terminal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![button("Settings", Bounds::new(0, 100, 1080, 200))]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(OracleCall::Plan, plan("tap", "Tap something", json!({})))
        .push(
            OracleCall::Plan,
            plan("tap_by_text", "Open about", json!({"text": "About"})),
        );
    let test = case("replan", "Open settings");

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::FailAction);
    assert_eq!(result.reason, REPLAN_REASON);
    assert_eq!(result.total_steps, 1);
    assert!(device.taps().is_empty());

    let step = result.artifacts_dir.join("step_01");
    let first = fs::read_to_string(step.join("validation_error.txt")).expect("first error");
    assert!(first.contains("tap_by_text") && first.contains("tap_xy"), "{first}");
    let last = fs::read_to_string(step.join("validation_error_final.txt")).expect("final error");
    assert!(last.contains("'About'"), "{last}");

    let requests = oracle.requests();
    let plans: Vec<_> = requests
        .iter()
        .filter(|r| r.call == OracleCall::Plan)
        .collect();
    assert!(!plans[0].prompt.contains("INVALID"));
    assert!(plans[1].prompt.contains("Your last action was INVALID"));
    assert_eq!(read_json(&step.join("verdict.json"))["verdict"], "FAIL_ACTION");
}

/// Verifies reward accounting over a 20-step passing run with 3 of 5 subgoals.
#[test]
fn passing_run_reports_reward() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut device = FakeDevice::new(page(0));
    for n in 1..20 {
        device = device.then(page(n));
    }
    let oracle = ScriptedOracle::new();
    let subgoals: Vec<Value> = (1..=5)
        .map(|n| {
            json!({
                "id": format!("subgoal_{n}"),
                "description": format!("Page {n} reached"),
                "detection_criteria": format!("'Page {n}' visible"),
            })
        })
        .collect();
    oracle.push(OracleCall::DecomposeGoal, json!({ "subgoals": subgoals }));
    for n in 1..20 {
        oracle.push(
            OracleCall::Plan,
            plan("swipe", &format!("Scroll to page {n}"), json!({"direction": "up"})),
        );
    }
    oracle.push(OracleCall::Plan, plan("done", "Last page reached", json!({})));
    let achieved = |id: &str| json!({"achieved": [{"id": id, "confidence": 0.9, "evidence": "visible"}]});
    oracle
        .push(OracleCall::DetectSubgoals, achieved("subgoal_1"))
        .push(OracleCall::DetectSubgoals, json!({"achieved": []}))
        .push(OracleCall::DetectSubgoals, achieved("subgoal_2"))
        .push(OracleCall::DetectSubgoals, achieved("subgoal_3"));
    oracle.push(
        OracleCall::VerifyFinalState,
        json!({"goal_achieved": true, "explanation": "Page 19 is shown"}),
    );
    let test = case("scroll", "Scroll to the last page");

    let (result, verdicts) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.total_steps, 20);
    assert_eq!(verdicts.len(), 20);
    assert_eq!(result.reward.subgoals_achieved, 3);
    assert_eq!(result.reward.total_subgoals, 5);
    assert!((result.reward.final_reward - 0.6).abs() < 1e-9, "{}", result.reward.final_reward);
    assert!((result.reward.completion_rate - 0.6).abs() < 1e-9);

    let summary = read_json(&result.artifacts_dir.join("reward_summary.json"));
    assert_eq!(summary["total_steps"], 20);
    assert_eq!(summary["step_rewards"].as_array().map(Vec::len), Some(20));
    let final_subgoals = read_json(&result.artifacts_dir.join("subgoals_final.json"));
    assert_eq!(final_subgoals["subgoals"][0]["status"], "achieved");
    assert_eq!(final_subgoals["subgoals"][0]["achieved_at_step"], 1);
    assert_eq!(final_subgoals["subgoals"][3]["status"], "pending");
    let written = read_json(&result.artifacts_dir.join("test_result.json"));
    assert_eq!(written["verdict"], "PASS");
}

/// Verifies title and body inputs land in different fields.
#[test]
fn title_then_body_target_distinct_fields() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![
        edit_text("Untitled", Bounds::new(0, 200, 1080, 300)),
        edit_text("", Bounds::new(0, 400, 1080, 2000)),
    ]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(
            OracleCall::Plan,
            plan(
                "input_text",
                "Type the title",
                json!({"text": "Meeting Notes", "field_type": "title"}),
            ),
        )
        .push(
            OracleCall::Plan,
            plan(
                "input_text",
                "Type the body",
                json!({"text": "Daily Standup", "field_type": "body"}),
            ),
        )
        .push(OracleCall::Plan, plan("done", "Note written", json!({})))
        .push(
            OracleCall::VerifyFinalState,
            json!({"goal_achieved": true, "explanation": "title and body typed"}),
        );
    let test = case(
        "note",
        "Create a note titled 'Meeting Notes' with body 'Daily Standup'",
    );

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(device.taps(), vec![(540, 250), (540, 1200)]);
    let texts: Vec<String> = device.current().into_iter().map(|n| n.text).collect();
    assert_eq!(texts, vec!["Meeting Notes".to_string(), "Daily Standup".to_string()]);
    assert!(
        device
            .calls()
            .contains(&DeviceCall::KeyEvent(keycode::ENTER))
    );
}

/// Verifies popups are dismissed before the planner sees the screen.
#[test]
fn popup_is_dismissed_before_planning() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![
        label("Obsidian wants to access files", Bounds::new(0, 800, 1080, 900)),
        button("Allow", Bounds::new(600, 1000, 900, 1100)),
    ])
    .then(vec![button("Create new vault", Bounds::new(0, 900, 1080, 1000))])
    .then(vec![label("Vault created", Bounds::new(0, 100, 1080, 200))]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(
            OracleCall::Plan,
            plan("tap_by_text", "Create vault", json!({"text": "Create new vault"})),
        )
        .push(OracleCall::Plan, plan("done", "Vault exists", json!({})))
        .push(
            OracleCall::VerifyFinalState,
            json!({"goal_achieved": true, "explanation": "vault created"}),
        );
    let test = case("vault", "Create a new vault");

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(device.taps(), vec![(750, 1050), (540, 950)]);
    let step = result.artifacts_dir.join("step_01");
    let report = fs::read_to_string(step.join("auto_handled_popup.txt")).expect("popup report");
    assert_eq!(report, "auto_handled_popup=true\nTapped locations: 1\n");
    let ui = fs::read_to_string(step.join("ui_summary.txt")).expect("summary");
    assert!(ui.contains("Create new vault") && !ui.contains("Allow"), "{ui}");
    assert!(!result.artifacts_dir.join("step_02/auto_handled_popup.txt").exists());
}

#[test]
fn deprecated_tap_with_text_runs_as_tap_by_text() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![button("Settings", Bounds::new(0, 0, 200, 100))])
        .then(vec![label("Appearance", Bounds::new(0, 100, 1080, 200))]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(
            OracleCall::Plan,
            json!({"action_type": "tap", "description": "Open settings", "params": {"text": "Settings"}}),
        )
        .push(OracleCall::Plan, plan("done", "Settings open", json!({})))
        .push(
            OracleCall::VerifyFinalState,
            json!({"goal_achieved": true, "explanation": "settings visible"}),
        );
    let test = case("settings", "Open settings");

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(device.taps(), vec![(100, 50)]);
    let action = read_json(&result.artifacts_dir.join("step_01/action.json"));
    assert_eq!(action["action_type"], "tap_by_text");
    assert_eq!(action["params"]["text"], "Settings");
}

#[test]
fn step_budget_ends_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(page(0)).then(page(1)).then(page(2)).then(page(3));
    let oracle = ScriptedOracle::new();
    for _ in 0..3 {
        oracle.push(
            OracleCall::Plan,
            plan("swipe", "Keep scrolling", json!({"direction": "down"})),
        );
    }
    let test = case("endless", "Find the hidden page");

    let (result, verdicts) = run(&device, &oracle, &config(3), &test, temp.path());

    assert_eq!(result.verdict, Verdict::FailAction);
    assert_eq!(result.reason, "Test exceeded maximum steps (3)");
    assert_eq!(result.total_steps, 3);
    assert_eq!(verdicts.last().map(|v| v.step_number), Some(3));
    let summary = read_json(&result.artifacts_dir.join("reward_summary.json"));
    assert_eq!(summary["step_rewards"].as_array().map(Vec::len), Some(2));
    assert_eq!(summary["completion_bonus"], 0.0);
}

#[test]
fn exhausted_retries_fail_the_action() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device =
        FakeDevice::new(vec![button("Settings", Bounds::new(0, 0, 200, 100))]).failing_taps(3);
    let oracle = ScriptedOracle::new();
    oracle.push(
        OracleCall::Plan,
        plan("tap_by_text", "Open settings", json!({"text": "Settings"})),
    );
    let test = case("flaky", "Open settings");

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::FailAction);
    assert_eq!(result.reason, "Failed to execute action: Open settings");
    assert!(
        result
            .details
            .as_deref()
            .is_some_and(|d| d.contains("injected tap failure"))
    );
    assert_eq!(device.taps().len(), 3);
    let execution = read_json(&result.artifacts_dir.join("step_01/execution_result.json"));
    assert_eq!(execution["success"], false);
}

#[test]
fn false_assertion_fails_the_test() {
    let temp = tempfile::tempdir().expect("tempdir");
    let device = FakeDevice::new(vec![label("Appearance", Bounds::new(0, 0, 200, 100))]);
    let oracle = ScriptedOracle::new();
    oracle
        .push(
            OracleCall::Plan,
            plan("assert", "Check icon color", json!({"condition": "The Appearance icon is red"})),
        )
        .push(
            OracleCall::VerifyAssertion,
            json!({"assertion_holds": false, "explanation": "icon is grey"}),
        );
    let test = case("color", "Verify the Appearance icon is red");

    let (result, _) = run(&device, &oracle, &config(30), &test, temp.path());

    assert_eq!(result.verdict, Verdict::FailAssertion);
    assert_eq!(result.reason, "Assertion failed: The Appearance icon is red");
    assert_eq!(result.details.as_deref(), Some("icon is grey"));
}
