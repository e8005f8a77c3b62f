//! 计划依赖图
//!
//! 使用邻接表和入度表做 DAG 校验（Kahn 拓扑排序）；Plan 只能通过 Plan::new 构造，
//! 构造时拒绝环、未知依赖、重复 ID 与超过上限的任务数。

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::core::AgentError;
use crate::plan::types::*;

/// 依赖图：邻接表（任务 -> 依赖它的任务）与入度表（任务 -> 依赖数）
#[derive(Debug, Clone)]
pub struct PlanGraph {
    pub adjacency: HashMap<TaskId, Vec<TaskId>>,
    pub in_degree: HashMap<TaskId, usize>,
}

impl PlanGraph {
    pub fn new(tasks: &[Task]) -> Self {
        let mut adjacency: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();

        for task in tasks {
            in_degree.insert(task.id.clone(), 0);
            adjacency.insert(task.id.clone(), Vec::new());
        }
        for task in tasks {
            for dep in &task.depends_on {
                adjacency.entry(dep.clone()).or_default().push(task.id.clone());
                *in_degree.entry(task.id.clone()).or_insert(0) += 1;
            }
        }

        Self { adjacency, in_degree }
    }

    /// Kahn 拓扑排序；存在环时返回 None
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<TaskId> = {
            let mut roots: Vec<_> = degree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(id, _)| id.clone())
                .collect();
            roots.sort();
            roots.into()
        };
        let mut order = Vec::with_capacity(degree.len());

        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(d) = degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
            order.push(id);
        }

        (order.len() == degree.len()).then_some(order)
    }
}

/// 一次 Plan 阶段产出的计划（0..=5 个任务）
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub summary: String,
    /// 第几轮规划（从 1 开始）
    pub iteration: usize,
    tasks: Vec<Task>,
}

impl Plan {
    /// 校验并构造计划；任何不合法形状都返回 Validation，且不会有任务被执行
    pub fn new(summary: impl Into<String>, iteration: usize, tasks: Vec<Task>) -> Result<Self, AgentError> {
        if tasks.len() > MAX_PLAN_TASKS {
            return Err(AgentError::Validation(format!(
                "plan has {} tasks, at most {} allowed",
                tasks.len(),
                MAX_PLAN_TASKS
            )));
        }

        let mut ids = HashSet::new();
        for task in &tasks {
            if task.id.trim().is_empty() {
                return Err(AgentError::Validation("task id must not be empty".into()));
            }
            if !ids.insert(task.id.as_str()) {
                return Err(AgentError::Validation(format!("duplicate task id {}", task.id)));
            }
            if task.status != TaskStatus::Pending {
                return Err(AgentError::Validation(format!(
                    "task {} must start pending",
                    task.id
                )));
            }
        }
        for task in &tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(AgentError::Validation(format!("task {} depends on itself", task.id)));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(AgentError::Validation(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }

        if PlanGraph::new(&tasks).topological_order().is_none() {
            return Err(AgentError::Validation("cyclic task dependencies".into()));
        }

        Ok(Self {
            summary: summary.into(),
            iteration,
            tasks,
        })
    }

    pub fn empty(summary: impl Into<String>, iteration: usize) -> Self {
        Self {
            summary: summary.into(),
            iteration,
            tasks: Vec::new(),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, AgentError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AgentError::Validation(format!("unknown task {}", id)))
    }

    fn deps_completed(&self, task: &Task) -> bool {
        task.depends_on.iter().all(|dep| {
            self.task(dep)
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// 可执行的任务（pending 且依赖全部 completed），按计划顺序
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.deps_completed(t))
            .map(|t| t.id.clone())
            .collect()
    }

    /// 没有 pending / in_progress 的任务
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_settled())
    }

    /// pending -> in_progress；依赖未全部完成时拒绝
    pub fn start_task(&mut self, id: &str) -> Result<&mut Task, AgentError> {
        let ready = {
            let task = self
                .task(id)
                .ok_or_else(|| AgentError::Validation(format!("unknown task {}", id)))?;
            if task.status != TaskStatus::Pending {
                return Err(AgentError::Validation(format!(
                    "task {} is {:?}, expected pending",
                    id, task.status
                )));
            }
            self.deps_completed(task)
        };
        if !ready {
            return Err(AgentError::Validation(format!(
                "task {} has unfinished dependencies",
                id
            )));
        }
        let task = self.task_mut(id)?;
        task.status = TaskStatus::InProgress;
        Ok(task)
    }

    /// in_progress -> completed / failed；终态任务不可再变
    pub fn finish_task(&mut self, id: &str, status: TaskStatus) -> Result<(), AgentError> {
        if !status.is_settled() {
            return Err(AgentError::Validation(format!(
                "cannot finish task {} with {:?}",
                id, status
            )));
        }
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(AgentError::Validation(format!(
                "task {} is {:?}, expected in_progress",
                id, task.status
            )));
        }
        task.status = status;
        Ok(())
    }

    /// 取回任务的可变引用（仅 in_progress 任务，用于写入 outcomes / output）
    pub fn running_task_mut(&mut self, id: &str) -> Result<&mut Task, AgentError> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(AgentError::Validation(format!("task {} is not in progress", id)));
        }
        Ok(task)
    }

    /// 依赖链上出现 failed 的 pending 任务永远无法就绪，直接标记为 failed；返回被标记的任务
    pub fn fail_blocked(&mut self) -> Vec<TaskId> {
        let mut blocked_all = Vec::new();
        loop {
            let failed: HashSet<TaskId> = self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.id.clone())
                .collect();
            let mut changed = false;
            for task in &mut self.tasks {
                if task.status == TaskStatus::Pending
                    && task.depends_on.iter().any(|d| failed.contains(d))
                {
                    task.status = TaskStatus::Failed;
                    task.output = Some("dependency failed".to_string());
                    blocked_all.push(task.id.clone());
                    changed = true;
                }
            }
            if !changed {
                return blocked_all;
            }
        }
    }

    /// 供后续规划参考的一行式总结（✓ / ✗）
    pub fn format_progress(&self) -> String {
        self.tasks
            .iter()
            .map(|t| {
                let mark = if t.status == TaskStatus::Completed { "✓" } else { "✗" };
                format!("{} {} [{}]", mark, t.description, t.id)
            })
            .collect::<Vec<_>>()
            .join("\n    ")
    }
}
