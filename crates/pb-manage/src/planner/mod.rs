use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

pub type TaskId = String;

/// One step of an operation.
///
/// `after` entries name either a task id or a token from some task's
/// `provides`. A trailing `?` marks the dependency optional: it is ignored
/// when nothing in the plan satisfies it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub module: String,
    pub phase: String,
    pub after: Vec<TaskId>,
    pub provides: Vec<String>,
}

impl Task {
    pub fn new(id: &str, label: &str, module: &str, phase: &str) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            module: module.into(),
            phase: phase.into(),
            after: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.after.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn provides(mut self, tokens: &[&str]) -> Self {
        self.provides.extend(tokens.iter().map(|t| t.to_string()));
        self
    }
}

#[derive(Debug, Default)]
pub struct Plan {
    tasks: BTreeMap<TaskId, Task>,
}

impl Plan {
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::msg(format!("duplicate task id '{}'", task.id)));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    fn provides_index(&self) -> Result<BTreeMap<&str, &str>> {
        let mut out: BTreeMap<&str, &str> = BTreeMap::new();
        for (id, task) in &self.tasks {
            for p in &task.provides {
                if let Some(existing) = out.insert(p.as_str(), id.as_str()) {
                    return Err(Error::msg(format!(
                        "token '{p}' is provided by both '{existing}' and '{id}'"
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Resolves every `after` entry of `task` to concrete task ids.
    fn deps_of<'a>(
        &'a self,
        provides: &BTreeMap<&'a str, &'a str>,
        task: &'a Task,
    ) -> Result<Vec<&'a str>> {
        let mut out = Vec::with_capacity(task.after.len());
        for dep in &task.after {
            let (name, optional) = match dep.strip_suffix('?') {
                Some(d) => (d, true),
                None => (dep.as_str(), false),
            };
            if let Some((id, _)) = self.tasks.get_key_value(name) {
                out.push(id.as_str());
            } else if let Some(&provider) = provides.get(name) {
                out.push(provider);
            } else if !optional {
                return Err(Error::msg(format!(
                    "task '{}' depends on unknown '{name}'",
                    task.id
                )));
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Topological order. Whenever several tasks are ready, the smallest
    /// task id runs first.
    pub fn ordered(&self) -> Result<Vec<&Task>> {
        let provides = self.provides_index()?;

        let mut incoming: BTreeMap<&str, usize> = BTreeMap::new();
        let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (id, task) in &self.tasks {
            let deps = self.deps_of(&provides, task)?;
            incoming.insert(id.as_str(), deps.len());
            for dep in deps {
                outgoing.entry(dep).or_default().insert(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = incoming
            .iter()
            .filter_map(|(k, v)| (*v == 0).then_some(*k))
            .collect();
        let mut out: Vec<&Task> = Vec::with_capacity(self.tasks.len());

        while let Some(id) = ready.pop_first() {
            if let Some(task) = self.tasks.get(id) {
                out.push(task);
            }
            for &child in outgoing.get(id).into_iter().flatten() {
                if let Some(slot) = incoming.get_mut(child) {
                    *slot -= 1;
                    if *slot == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if out.len() != self.tasks.len() {
            let remaining: Vec<&str> = incoming
                .iter()
                .filter_map(|(k, v)| (*v > 0).then_some(*k))
                .collect();
            return Err(Error::msg(format!(
                "task graph contains a cycle; remaining: {}",
                remaining.join(", ")
            )));
        }
        Ok(out)
    }

    pub fn to_dot(&self) -> Result<String> {
        let provides = self.provides_index()?;

        let mut out = String::from("digraph plan {\n  rankdir=LR;\n");
        for task in self.tasks.values() {
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}:{}\"];\n",
                task.id, task.label, task.module, task.phase
            ));
        }
        for task in self.tasks.values() {
            for dep in self.deps_of(&provides, task)? {
                out.push_str(&format!("  \"{dep}\" -> \"{}\";\n", task.id));
            }
        }
        out.push_str("}\n");
        Ok(out)
    }
}
