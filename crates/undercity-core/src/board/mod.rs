//! Task Board: ordered set of Tasks with status, dependencies, decomposition
//! tree, and priority scoring — spec.md §4.2.
//!
//! Grounded on `bobisme-maw`'s ordering/ranking helpers
//! (`src/merge/plan.rs`) for the "score, sort, prune" shape, and on its
//! typed-id + `#[serde(deny_unknown_fields)]`-adjacent document style
//! (`crates/maw-core/src/model/types.rs`, `src/config.rs`) for `Task` itself.

pub mod priority;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TaskId};
use crate::store::{StateStore, StoreError};

const TASKS_DOC: &str = "tasks.json";

/// Where a [`TicketContent`] originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    User,
    Agent,
    Import,
}

/// Structured description attached to a Task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketContent {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub test_plan: Option<String>,
    pub source: TicketSource,
}

/// A Task's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

/// A unit of work tracked by the Task Board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub objective: String,
    pub status: TaskStatus,
    pub priority: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub conflicts: HashSet<TaskId>,
    #[serde(default)]
    pub estimated_files: HashSet<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub computed_packages: HashSet<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub subtask_ids: Vec<TaskId>,
    #[serde(default)]
    pub is_decomposed: bool,
    #[serde(default)]
    pub ticket: Option<TicketContent>,
}

/// The on-disk document: `{tasks: [Task], lastUpdated: ISO8601}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TasksDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Errors from Task Board operations.
#[derive(Debug)]
pub enum TaskBoardError {
    NotFound { id: TaskId },
    DependencyCycle { id: TaskId },
    Store(StoreError),
    AlreadyDecomposed { id: TaskId },
}

impl fmt::Display for TaskBoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "task '{id}' not found"),
            Self::DependencyCycle { id } => {
                write!(f, "adding/updating dependencies on '{id}' would create a cycle")
            }
            Self::Store(e) => write!(f, "{e}"),
            Self::AlreadyDecomposed { id } => {
                write!(f, "task '{id}' is already decomposed and cannot be executed directly")
            }
        }
    }
}

impl std::error::Error for TaskBoardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TaskBoardError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Analysis fields a Router/Worker may backfill onto a Task after creation.
#[derive(Clone, Debug, Default)]
pub struct TaskAnalysis {
    pub computed_packages: Option<HashSet<String>>,
    pub risk_score: Option<f64>,
    pub estimated_files: Option<HashSet<String>>,
    pub tags: Option<HashSet<String>>,
}

/// The Task Board: all mutating operations persist through the State Store
/// under its advisory lock; reads are lock-free.
pub struct TaskBoard {
    store: StateStore,
}

impl TaskBoard {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    fn read_doc(&self) -> TasksDocument {
        self.store.read(TASKS_DOC)
    }

    fn write_doc(&self, mut doc: TasksDocument) -> Result<(), TaskBoardError> {
        doc.last_updated = Some(Utc::now());
        self.store.write(TASKS_DOC, &doc).map_err(TaskBoardError::from)
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TasksDocument) -> Result<R, TaskBoardError>,
    ) -> Result<R, TaskBoardError> {
        self.store
            .with_lock(TASKS_DOC, || {
                let mut doc = self.read_doc();
                let result = f(&mut doc)?;
                doc.last_updated = Some(Utc::now());
                self.store.write(TASKS_DOC, &doc)?;
                Ok(result)
            })
            .map_err(|e| match e {
                StoreError::StaleLockOrContention => TaskBoardError::Store(e),
                other => TaskBoardError::Store(other),
            })
    }

    /// Reject if adding `new_deps` as `task_id`'s dependencies would create
    /// a cycle in the DAG induced by `depends_on` across the whole board.
    fn check_acyclic(
        doc: &TasksDocument,
        task_id: &TaskId,
        new_deps: &[TaskId],
    ) -> Result<(), TaskBoardError> {
        // DFS from each dependency; if we ever reach `task_id`, it's a cycle.
        let mut stack: Vec<TaskId> = new_deps.to_vec();
        let mut seen: HashSet<TaskId> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == *task_id {
                return Err(TaskBoardError::DependencyCycle {
                    id: task_id.clone(),
                });
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(t) = doc.tasks.iter().find(|t| t.id == current) {
                stack.extend(t.depends_on.iter().cloned());
            }
        }
        Ok(())
    }

    pub fn add_task(
        &self,
        objective: impl Into<String>,
        priority: Option<f64>,
        ticket: Option<TicketContent>,
    ) -> Result<Task, TaskBoardError> {
        self.mutate(|doc| {
            let next_priority = priority.unwrap_or(100.0);
            let task = Task {
                id: TaskId::generate("task"),
                objective: objective.into(),
                status: TaskStatus::Pending,
                priority: next_priority,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                session_id: None,
                error: None,
                depends_on: Vec::new(),
                conflicts: HashSet::new(),
                estimated_files: HashSet::new(),
                tags: HashSet::new(),
                computed_packages: HashSet::new(),
                risk_score: None,
                parent_id: None,
                subtask_ids: Vec::new(),
                is_decomposed: false,
                ticket,
            };
            doc.tasks.push(task.clone());
            Ok(task)
        })
    }

    /// Add a batch of objectives, assigning ascending priority within the
    /// batch (first objective gets the lowest, i.e. highest-ranked,
    /// priority number).
    pub fn add_tasks(&self, objectives: &[String]) -> Result<Vec<Task>, TaskBoardError> {
        self.mutate(|doc| {
            let mut created = Vec::with_capacity(objectives.len());
            for (i, objective) in objectives.iter().enumerate() {
                let task = Task {
                    id: TaskId::generate("task"),
                    objective: objective.clone(),
                    status: TaskStatus::Pending,
                    priority: 100.0 + i as f64,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    session_id: None,
                    error: None,
                    depends_on: Vec::new(),
                    conflicts: HashSet::new(),
                    estimated_files: HashSet::new(),
                    tags: HashSet::new(),
                    computed_packages: HashSet::new(),
                    risk_score: None,
                    parent_id: None,
                    subtask_ids: Vec::new(),
                    is_decomposed: false,
                    ticket: None,
                };
                doc.tasks.push(task.clone());
                created.push(task);
            }
            Ok(created)
        })
    }

    fn is_ready(task: &Task, doc: &TasksDocument) -> bool {
        task.status == TaskStatus::Pending
            && !task.is_decomposed
            && task.depends_on.iter().all(|dep| {
                doc.tasks
                    .iter()
                    .find(|t| &t.id == dep)
                    .map(|t| t.status == TaskStatus::Complete)
                    .unwrap_or(false)
            })
    }

    fn ranked_ready(doc: &TasksDocument) -> Vec<Task> {
        let now = Utc::now();
        let mut ready: Vec<(usize, Task)> = doc
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| Self::is_ready(t, doc))
            .map(|(i, t)| (i, t.clone()))
            .collect();
        ready.sort_by(|(ia, a), (ib, b)| {
            priority::score(a, now)
                .partial_cmp(&priority::score(b, now))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        ready.into_iter().map(|(_, t)| t).collect()
    }

    /// The single highest-ranked pending, non-decomposed task whose
    /// dependencies are all complete.
    pub fn get_next_task(&self) -> Option<Task> {
        let doc = self.read_doc();
        Self::ranked_ready(&doc).into_iter().next()
    }

    /// Up to `n` ranked pending tasks with file/package overlap pruning.
    pub fn get_ready_tasks_for_batch(&self, n: usize) -> Vec<Task> {
        let doc = self.read_doc();
        let ranked = Self::ranked_ready(&doc);

        let mut selected: Vec<Task> = Vec::new();
        let mut used_packages: HashSet<String> = HashSet::new();
        let mut used_files: HashSet<String> = HashSet::new();

        for task in ranked {
            if selected.len() >= n {
                break;
            }
            let overlaps_packages = task.computed_packages.iter().any(|p| used_packages.contains(p));
            let overlaps_files = task.estimated_files.iter().any(|p| used_files.contains(p));
            if overlaps_packages || overlaps_files {
                continue;
            }
            used_packages.extend(task.computed_packages.iter().cloned());
            used_files.extend(task.estimated_files.iter().cloned());
            selected.push(task);
        }
        selected
    }

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.read_doc().tasks.into_iter().find(|t| &t.id == id)
    }

    /// Every tracked Task, in board order (for `status`/`tasks` reporting).
    pub fn list_tasks(&self) -> Vec<Task> {
        self.read_doc().tasks
    }

    pub fn mark_in_progress(&self, id: &TaskId, session_id: SessionId) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            let task = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| TaskBoardError::NotFound { id: id.clone() })?;
            task.status = TaskStatus::InProgress;
            task.session_id = Some(session_id);
            task.started_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn mark_complete(&self, id: &TaskId) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            let task = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| TaskBoardError::NotFound { id: id.clone() })?;
            task.status = TaskStatus::Complete;
            task.completed_at = Some(Utc::now());
            let parent_id = task.parent_id.clone();
            if let Some(parent_id) = parent_id {
                Self::complete_parent_if_done(doc, &parent_id);
            }
            Ok(())
        })
    }

    pub fn mark_failed(&self, id: &TaskId, error: impl Into<String>) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            let task = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| TaskBoardError::NotFound { id: id.clone() })?;
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            task.error = Some(error.into());
            Ok(())
        })
    }

    pub fn update_task_analysis(
        &self,
        id: &TaskId,
        analysis: TaskAnalysis,
    ) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            let task = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| TaskBoardError::NotFound { id: id.clone() })?;
            if let Some(packages) = analysis.computed_packages {
                task.computed_packages = packages;
            }
            if let Some(risk) = analysis.risk_score {
                task.risk_score = Some(risk);
            }
            if let Some(files) = analysis.estimated_files {
                task.estimated_files = files;
            }
            if let Some(tags) = analysis.tags {
                task.tags = tags;
            }
            Ok(())
        })
    }

    /// Split `parent_id` into `subtasks`, marking the parent
    /// `is_decomposed=true` (never directly executable again) and giving
    /// each subtask priority `parent.priority + 0.1 * order` to preserve
    /// ordering inside the parent's band (spec.md §9 Open Question).
    pub fn decompose_into(
        &self,
        parent_id: &TaskId,
        subtask_objectives: &[String],
    ) -> Result<Vec<TaskId>, TaskBoardError> {
        self.mutate(|doc| {
            let (parent_priority, parent_tags, parent_packages) = {
                let parent = doc
                    .tasks
                    .iter()
                    .find(|t| &t.id == parent_id)
                    .ok_or_else(|| TaskBoardError::NotFound { id: parent_id.clone() })?;
                (parent.priority, parent.tags.clone(), parent.computed_packages.clone())
            };

            let mut subtask_ids = Vec::with_capacity(subtask_objectives.len());
            for (order, objective) in subtask_objectives.iter().enumerate() {
                let subtask = Task {
                    id: TaskId::generate("task"),
                    objective: objective.clone(),
                    status: TaskStatus::Pending,
                    priority: parent_priority + 0.1 * order as f64,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    session_id: None,
                    error: None,
                    depends_on: Vec::new(),
                    conflicts: HashSet::new(),
                    estimated_files: HashSet::new(),
                    tags: parent_tags.clone(),
                    computed_packages: parent_packages.clone(),
                    risk_score: None,
                    parent_id: Some(parent_id.clone()),
                    subtask_ids: Vec::new(),
                    is_decomposed: false,
                    ticket: None,
                };
                subtask_ids.push(subtask.id.clone());
                doc.tasks.push(subtask);
            }

            let parent = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == parent_id)
                .expect("checked above");
            parent.is_decomposed = true;
            parent.subtask_ids = subtask_ids.clone();

            Ok(subtask_ids)
        })
    }

    pub fn are_all_subtasks_complete(&self, parent_id: &TaskId) -> bool {
        let doc = self.read_doc();
        match doc.tasks.iter().find(|t| &t.id == parent_id) {
            Some(parent) if !parent.subtask_ids.is_empty() => parent.subtask_ids.iter().all(|sid| {
                doc.tasks
                    .iter()
                    .find(|t| &t.id == sid)
                    .map(|t| t.status == TaskStatus::Complete)
                    .unwrap_or(false)
            }),
            _ => false,
        }
    }

    fn complete_parent_if_done(doc: &mut TasksDocument, parent_id: &TaskId) {
        let all_done = match doc.tasks.iter().find(|t| &t.id == parent_id) {
            Some(parent) if !parent.subtask_ids.is_empty() => parent.subtask_ids.iter().all(|sid| {
                doc.tasks
                    .iter()
                    .find(|t| &t.id == sid)
                    .map(|t| t.status == TaskStatus::Complete)
                    .unwrap_or(false)
            }),
            _ => false,
        };
        if all_done {
            if let Some(parent) = doc.tasks.iter_mut().find(|t| &t.id == parent_id) {
                parent.status = TaskStatus::Complete;
                parent.completed_at = Some(Utc::now());
            }
        }
    }

    /// Public wrapper over the same check performed automatically by
    /// [`Self::mark_complete`], for callers that want to poll without
    /// completing anything (e.g. the Health Monitor).
    pub fn complete_parent_if_all_subtasks_done(&self, parent_id: &TaskId) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            Self::complete_parent_if_done(doc, parent_id);
            Ok(())
        })
    }

    /// Set `depends_on` on `id`, rejecting if it would introduce a cycle.
    pub fn set_dependencies(&self, id: &TaskId, depends_on: Vec<TaskId>) -> Result<(), TaskBoardError> {
        self.mutate(|doc| {
            Self::check_acyclic(doc, id, &depends_on)?;
            let task = doc
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| TaskBoardError::NotFound { id: id.clone() })?;
            task.depends_on = depends_on;
            Ok(())
        })
    }
}
