//! End-to-end runs through the orchestrator thread against the mock device.

use dmr_tester::config::TimingSettings;
use dmr_tester::numerics::mock::ScriptedNumerics;
use dmr_tester::orchestrator::{Directive, OrchestratorEvent, OrchestratorHandle};
use dmr_tester::scenario::{Scenario, ScenarioDefinition};
use dmr_tester::task::parameter::{INPUT_POWER, OUTPUT_POWER};
use dmr_tester::task::{Task, TaskContext, TaskKind, TaskState};
use dmr_tester::transport::mock::{MockDevice, MockOpener, MockReply};
use dmr_tester::transport::{ConnectionRegistry, DeviceLink, LinkSettings, Pll};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn context(device: &MockDevice) -> TaskContext {
    let settings = LinkSettings {
        poll_interval: Duration::from_millis(1),
        pll_lock_timeout: Duration::from_millis(20),
        ..LinkSettings::default()
    };
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(MockOpener::new(device.clone())),
        settings,
    ));
    TaskContext::new(
        DeviceLink::new(registry, Some("/dev/mock".to_string())),
        Arc::new(ScriptedNumerics::new()),
    )
    .with_timing(TimingSettings {
        calibration_settle_ms: 1,
        pll_lock_timeout_ms: 20,
    })
}

/// Collect snapshots until the completion marker of `id`, sending `stop`
/// after `cycles` snapshots.
async fn collect(handle: &mut OrchestratorHandle, view: &mut Task, cycles: usize) -> Vec<TaskState> {
    let mut states = Vec::new();
    let mut stop_sent = false;
    loop {
        match handle.next_event().await.expect("orchestrator alive") {
            OrchestratorEvent::Snapshot(snapshot) => {
                assert!(view.apply_snapshot(&snapshot), "snapshot of another task");
                states.push(snapshot.state);
                if !stop_sent && states.len() >= cycles {
                    handle.directive(Directive::Stop).await.expect("stop sent");
                    stop_sent = true;
                }
            }
            OrchestratorEvent::Stopped(id) => {
                assert_eq!(Some(id), view.id());
                return states;
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn power_measurement_reports_counts_until_stopped() {
    let device = MockDevice::new();
    device.set_reply("GET PWR", MockReply::Words(vec![500, 700]));
    let mut handle = OrchestratorHandle::spawn(context(&device), 8).expect("spawn");

    let mut task = TaskKind::MeasurePower.create();
    task.assign_id().expect("fresh task");
    let mut view = task.clone();
    handle.submit(task).await.expect("submitted");

    let states = collect(&mut handle, &mut view, 2).await;
    assert!(states.len() >= 2);
    assert_eq!(view.result(OUTPUT_POWER), Some(500.0));
    assert_eq!(view.result(INPUT_POWER), Some(700.0));
    assert!(view.is_completed());

    let attenuation = device.requests_named("SET ATT");
    assert_eq!(attenuation.len(), 1);
    assert_eq!(attenuation[0].u16_words(), vec![63]);
    let averaging = device.requests_named("GET PWR");
    assert_eq!(averaging[0].u16_words(), vec![64]);

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
#[serial]
async fn busy_device_fails_the_task_once() {
    let device = MockDevice::new();
    device.set_reply("GET PWR", MockReply::Busy);
    let mut handle = OrchestratorHandle::spawn(context(&device), 8).expect("spawn");

    let mut task = TaskKind::MeasurePower.create();
    task.assign_id().expect("fresh task");
    let mut view = task.clone();
    handle.submit(task).await.expect("submitted");

    // No stop needed: a failed task ends on its own.
    let states = collect(&mut handle, &mut view, usize::MAX).await;
    assert_eq!(states.last(), Some(&TaskState::MeasureFailed));
    assert!(view.is_failed());
    assert!(view.message().starts_with("Communication error:"), "{}", view.message());
    assert!(view.message().ends_with("Reboot the device."), "{}", view.message());

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
#[serial]
async fn scenario_tasks_run_in_order() {
    let device = MockDevice::new();
    device.set_status(Pll::Modulator.lock_mask());
    device.set_reply("GET PWR", MockReply::Words(vec![10, 20]));
    let definition = ScenarioDefinition::from_json(
        r#"{
            "name": "integration-order",
            "tasks": [
                { "kind": "calibrate" },
                { "kind": "measure_power", "parameters": { "attenuation": 10.0 } },
                { "kind": "dmr_output" }
            ]
        }"#,
    )
    .expect("valid json");
    let scenario = Scenario::from_definition(&definition).expect("valid scenario");
    let mut handle = OrchestratorHandle::spawn(context(&device), 8).expect("spawn");

    for task in &scenario {
        let mut view = task.clone();
        handle.submit(task.clone()).await.expect("submitted");
        let states = collect(&mut handle, &mut view, 1).await;
        assert!(!view.is_failed(), "{}: {}", view.kind(), view.message());
        assert!(!states.is_empty());
    }
    handle.shutdown().await.expect("clean shutdown");

    let requests = device.requests();
    let position = |name: &str, words: &[u16]| {
        requests
            .iter()
            .position(|r| r.name == name && r.u16_words() == words)
            .unwrap_or_else(|| panic!("{name} {words:?} not sent"))
    };
    let calibrate = position("SET DCCOMP", &[1]);
    let power = position("SET RF_PATH", &[0]);
    let dmr = position("SET MEASST", &[5]);
    assert!(calibrate < power && power < dmr, "{:?}", device.request_names());
    assert_eq!(device.requests_named("SET ATT")[0].u16_words(), vec![20]);
}
