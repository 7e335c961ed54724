//! The task list: an ordered sequence of implementation tasks for an issue.
use crate::errors::{StateStoreError, StateStoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable ID: prefix letter + digits, e.g. "T7".
    pub id: String,
    pub title: String,
    pub summary: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub files_allowed: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub tasks: Vec<Task>,
}

fn default_schema_version() -> u32 {
    1
}

impl TaskList {
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            tasks: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> StateStoreResult<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StateStoreError::UnknownTaskId(id.to_string()))?;
        task.status = status;
        Ok(())
    }

    /// Validate the task list's invariants: unique IDs, and an acyclic
    /// dependency graph.
    pub fn validate(&self) -> StateStoreResult<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(StateStoreError::Database(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }
        self.detect_cycle()
    }

    fn detect_cycle(&self) -> StateStoreResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut marks: HashMap<&str, Mark> =
            self.tasks.iter().map(|t| (t.id.as_str(), Mark::Unvisited)).collect();
        let mut stack = Vec::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Task>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<String>,
        ) -> StateStoreResult<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    stack.push(id.to_string());
                    return Err(StateStoreError::CyclicDependency(stack.clone()));
                }
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            stack.push(id.to_string());
            if let Some(task) = by_id.get(id) {
                for dep in &task.depends_on {
                    visit(dep, by_id, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for task in &self.tasks {
            if marks.get(task.id.as_str()) == Some(&Mark::Unvisited) {
                visit(&task.id, &by_id, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Tasks whose dependencies have all passed and which are still pending —
    /// the eligible set the worker sandbox manager fans out over.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on.iter().all(|dep| {
                    self.get(dep)
                        .map(|d| d.status == TaskStatus::Passed)
                        .unwrap_or(false)
                })
            })
            .collect()
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            summary: String::new(),
            status: TaskStatus::Pending,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            files_allowed: vec![],
            acceptance_criteria: vec![],
        }
    }

    #[test]
    fn unique_task_ids_required() {
        let list = TaskList {
            schema_version: 1,
            tasks: vec![task("T1", &[]), task("T1", &[])],
        };
        assert!(list.validate().is_err());
    }

    #[test]
    fn cycle_detected() {
        let list = TaskList {
            schema_version: 1,
            tasks: vec![task("T1", &["T2"]), task("T2", &["T1"])],
        };
        assert!(list.validate().is_err());
    }

    #[test]
    fn acyclic_graph_passes() {
        let list = TaskList {
            schema_version: 1,
            tasks: vec![task("T1", &[]), task("T2", &["T1"])],
        };
        assert!(list.validate().is_ok());
    }

    #[test]
    fn ready_tasks_respects_dependencies() {
        let mut list = TaskList {
            schema_version: 1,
            tasks: vec![task("T1", &[]), task("T2", &["T1"])],
        };
        let ready: Vec<String> = list.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["T1".to_string()]);

        list.set_status("T1", TaskStatus::Passed).unwrap();
        let ready: Vec<String> = list.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["T2".to_string()]);
    }

    #[test]
    fn unknown_task_id_on_set_status() {
        let mut list = TaskList::new();
        assert!(list.set_status("T99", TaskStatus::Passed).is_err());
    }
}
