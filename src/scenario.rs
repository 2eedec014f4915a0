//! Named, ordered lists of tasks.
//!
//! Scenario names are unique within the process while the scenario exists;
//! dropping a scenario releases its name.

use crate::error::{AppResult, DtError};
use crate::task::{Task, TaskKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

static SCENARIO_NAMES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn names() -> std::sync::MutexGuard<'static, HashSet<String>> {
    SCENARIO_NAMES.lock().unwrap_or_else(|p| p.into_inner())
}

/// Serializable form of one scenario entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Kind identifier or display name.
    pub kind: String,
    /// Device-native parameter overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, f64>,
}

/// Serializable form of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl ScenarioDefinition {
    /// Parse a JSON definition.
    pub fn from_json(json: &str) -> AppResult<Self> {
        serde_json::from_str(json).map_err(|e| DtError::MalformedScenario(e.to_string()))
    }

    /// JSON form of the definition.
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| DtError::MalformedScenario(e.to_string()))
    }
}

/// An ordered, uniquely named list of tasks.
#[derive(Debug)]
pub struct Scenario {
    name: String,
    tasks: Vec<Task>,
}

impl Scenario {
    /// Empty scenario. Fails if the name is taken.
    pub fn new(name: impl Into<String>) -> AppResult<Self> {
        let name = name.into();
        if !names().insert(name.clone()) {
            return Err(DtError::DuplicateScenario(name));
        }
        tracing::debug!(%name, "Scenario registered");
        Ok(Self {
            name,
            tasks: Vec::new(),
        })
    }

    /// Whether a live scenario holds `name`.
    pub fn is_registered(name: &str) -> bool {
        names().contains(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a task of `kind` with optional device-native overrides and give
    /// it an identity.
    pub fn add_task(
        &mut self,
        kind: TaskKind,
        parameters: Option<&BTreeMap<String, f64>>,
    ) -> AppResult<&mut Task> {
        let mut task = kind.create();
        for (key, value) in parameters.into_iter().flatten() {
            task.set_parameter(key, *value)?;
        }
        task.assign_id()?;
        self.tasks.push(task);
        let index = self.tasks.len() - 1;
        Ok(&mut self.tasks[index])
    }

    /// Build a scenario from its definition.
    pub fn from_definition(definition: &ScenarioDefinition) -> AppResult<Self> {
        let kinds = definition
            .tasks
            .iter()
            .map(|t| t.kind.parse::<TaskKind>())
            .collect::<AppResult<Vec<_>>>()?;
        let mut scenario = Scenario::new(definition.name.clone())?;
        for (kind, entry) in kinds.into_iter().zip(&definition.tasks) {
            scenario.add_task(kind, Some(&entry.parameters))?;
        }
        Ok(scenario)
    }

    /// Definition reproducing this scenario's kinds and parameters.
    pub fn to_definition(&self) -> ScenarioDefinition {
        ScenarioDefinition {
            name: self.name.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskDefinition {
                    kind: task.kind().id().to_string(),
                    parameters: task
                        .parameters()
                        .iter()
                        .map(|(k, v)| (k.to_string(), *v))
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Task> {
        self.tasks.get_mut(index)
    }

    /// Replace the task at `index`, e.g. with an updated copy.
    pub fn set(&mut self, index: usize, task: Task) -> Option<Task> {
        self.tasks
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, task))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    /// `(previous, current)` pairs; the first task has no predecessor.
    pub fn transitions(&self) -> impl Iterator<Item = (Option<&Task>, &Task)> {
        let previous = std::iter::once(None).chain(self.tasks.iter().map(Some));
        previous.zip(self.tasks.iter())
    }
}

impl<'a> IntoIterator for &'a Scenario {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        names().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::parameter;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_names_are_unique_while_alive() {
        let first = Scenario::new("bench").expect("new name");
        assert!(Scenario::is_registered("bench"));
        assert!(matches!(Scenario::new("bench"), Err(DtError::DuplicateScenario(_))));
        drop(first);
        assert!(!Scenario::is_registered("bench"));
        let _again = Scenario::new("bench").expect("name released");
    }

    #[test]
    #[serial]
    fn test_add_task_assigns_distinct_ids() {
        let mut scenario = Scenario::new("ids").expect("new name");
        let a = scenario.add_task(TaskKind::Calibrate, None).expect("add").id();
        let b = scenario.add_task(TaskKind::MeasurePower, None).expect("add").id();
        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);
        assert_eq!(scenario.len(), 2);
    }

    #[test]
    #[serial]
    fn test_unknown_parameter_rejected() {
        let mut scenario = Scenario::new("bad-param").expect("new name");
        let mut params = BTreeMap::new();
        params.insert("modFrequency".to_string(), 1000.0);
        assert!(matches!(
            scenario.add_task(TaskKind::MeasurePower, Some(&params)),
            Err(DtError::UnknownParameter { .. })
        ));
        assert!(scenario.is_empty());
    }

    #[test]
    #[serial]
    fn test_transitions_pair_neighbours() {
        let mut scenario = Scenario::new("walk").expect("new name");
        for kind in [TaskKind::Calibrate, TaskKind::MeasurePower, TaskKind::DmrOutput] {
            scenario.add_task(kind, None).expect("add");
        }
        let pairs: Vec<(Option<TaskKind>, TaskKind)> = scenario
            .transitions()
            .map(|(prev, cur)| (prev.map(Task::kind), cur.kind()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (None, TaskKind::Calibrate),
                (Some(TaskKind::Calibrate), TaskKind::MeasurePower),
                (Some(TaskKind::MeasurePower), TaskKind::DmrOutput),
            ]
        );
    }

    #[test]
    #[serial]
    fn test_definition_round_trip() {
        let json = r#"{
            "name": "production",
            "tasks": [
                { "kind": "calibrate" },
                { "kind": "Measuring input&output power", "parameters": { "attenuation": 10.0 } }
            ]
        }"#;
        let definition = ScenarioDefinition::from_json(json).expect("valid json");
        let scenario = Scenario::from_definition(&definition).expect("valid scenario");
        assert_eq!(scenario.name(), "production");
        let power = scenario.get(1).expect("second task");
        assert_eq!(power.kind(), TaskKind::MeasurePower);
        assert_eq!(power.parameter(parameter::ATTENUATION), Some(10.0));

        let back = scenario.to_definition();
        assert_eq!(back.tasks[0].kind, "calibrate");
        assert_eq!(back.tasks[1].parameters.get("averaging"), Some(&64.0));
    }

    #[test]
    #[serial]
    fn test_malformed_definitions() {
        assert!(matches!(
            ScenarioDefinition::from_json("{\"tasks\": []}"),
            Err(DtError::MalformedScenario(_))
        ));
        let definition = ScenarioDefinition {
            name: "unknown-kind".into(),
            tasks: vec![TaskDefinition {
                kind: "teleport".into(),
                parameters: BTreeMap::new(),
            }],
        };
        assert!(matches!(
            Scenario::from_definition(&definition),
            Err(DtError::UnknownTaskType(_))
        ));
        assert!(!Scenario::is_registered("unknown-kind"));
    }
}
