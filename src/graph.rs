//! Task graph construction and dependency resolution
//!
//! Uses petgraph to build a DAG of tasks and perform topological sorting
//! to determine execution order.

use petgraph::algo::{is_cyclic_directed, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{Action, Config, TaskConfig};
use crate::error::{PipeError, Result};

/// A node in the task graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub config: TaskConfig,
}

impl TaskNode {
    pub fn action(&self) -> Option<Action> {
        self.config.action
    }
}

/// The task dependency graph
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build a task graph from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_tasks(&config.tasks)
    }

    /// Build a task graph from a task table
    pub fn from_tasks(tasks: &BTreeMap<String, TaskConfig>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (name, task_config) in tasks {
            let node = TaskNode {
                name: name.clone(),
                config: task_config.clone(),
            };
            let idx = graph.add_node(node);
            name_to_index.insert(name.clone(), idx);
        }

        for (name, task_config) in tasks {
            let task_idx = name_to_index[name];

            for dep in &task_config.depends {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| PipeError::TaskNotFound {
                    name: dep.clone(),
                    available: tasks.keys().cloned().collect(),
                })?;

                // Edge goes from dependency TO dependent (dep must run first)
                graph.update_edge(*dep_idx, task_idx, ());
            }
        }

        if is_cyclic_directed(&graph) {
            let cycle = Self::find_cycle_description(&graph, &name_to_index);
            return Err(PipeError::CyclicDependency { cycle });
        }

        Ok(Self {
            graph,
            name_to_index,
        })
    }

    /// Get execution order for a specific task (including dependencies)
    pub fn execution_order(&self, task_name: &str) -> Result<Vec<&TaskNode>> {
        let target_idx = self.index_of(task_name)?;
        let required_nodes = self.get_ancestors(target_idx);

        let sorted = toposort(&self.graph, None).map_err(|_| PipeError::CyclicDependency {
            cycle: "Unknown cycle detected".to_string(),
        })?;

        Ok(sorted
            .into_iter()
            .filter(|idx| required_nodes.contains(idx))
            .map(|idx| &self.graph[idx])
            .collect())
    }

    /// Get all tasks in dependency order
    pub fn all_tasks_ordered(&self) -> Result<Vec<&TaskNode>> {
        let sorted = toposort(&self.graph, None).map_err(|_| PipeError::CyclicDependency {
            cycle: "Unknown cycle detected".to_string(),
        })?;

        Ok(sorted.into_iter().map(|idx| &self.graph[idx]).collect())
    }

    fn index_of(&self, task_name: &str) -> Result<NodeIndex> {
        self.name_to_index
            .get(task_name)
            .copied()
            .ok_or_else(|| PipeError::TaskNotFound {
                name: task_name.to_string(),
                available: self.sorted_names(),
            })
    }

    /// Get ancestors (all dependencies, transitive) of a node, itself included
    fn get_ancestors(&self, target: NodeIndex) -> HashSet<NodeIndex> {
        use petgraph::visit::{Bfs, Reversed};

        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(&reversed, target);
        let mut ancestors = HashSet::new();

        while let Some(node) = bfs.next(&reversed) {
            ancestors.insert(node);
        }

        ancestors
    }

    /// Walk one strongly connected component along declared dependencies,
    /// starting from its alphabetically first task: `a -> b -> c -> a`
    fn find_cycle_description(
        graph: &DiGraph<TaskNode, ()>,
        name_to_index: &HashMap<String, NodeIndex>,
    ) -> String {
        let Some(component) = tarjan_scc(graph)
            .into_iter()
            .filter(|c| c.len() > 1 || graph.contains_edge(c[0], c[0]))
            .min_by_key(|c| c.iter().map(|&idx| graph[idx].name.as_str()).min())
        else {
            return "Unknown cycle".to_string();
        };

        let Some(&start) = component.iter().min_by_key(|&&idx| graph[idx].name.as_str()) else {
            return "Unknown cycle".to_string();
        };

        let mut path = vec![start];
        loop {
            let current = path[path.len() - 1];
            let next = graph[current]
                .config
                .depends
                .iter()
                .filter_map(|dep| name_to_index.get(dep).copied())
                .find(|idx| component.contains(idx));

            let Some(next) = next else {
                return "Unknown cycle".to_string();
            };

            if let Some(seen) = path.iter().position(|&idx| idx == next) {
                return path[seen..]
                    .iter()
                    .chain(std::iter::once(&next))
                    .map(|&idx| graph[idx].name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
            }
            path.push(next);
        }
    }

    /// Check if a task exists
    pub fn has_task(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a task by name
    pub fn get_task(&self, name: &str) -> Option<&TaskNode> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Get all task names
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.name_to_index.keys().map(|s| s.as_str())
    }

    /// Task names in alphabetical order
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.name_to_index.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get direct dependencies of a task, in declaration order
    pub fn dependencies(&self, name: &str) -> Option<Vec<&str>> {
        self.get_task(name)
            .map(|task| task.config.depends.iter().map(|d| d.as_str()).collect())
    }
}

/// Execution plan for a set of tasks
#[derive(Debug)]
pub struct ExecutionPlan<'a> {
    /// Tasks to execute in order
    pub tasks: Vec<&'a TaskNode>,
    /// Groups of tasks that can run in parallel (respecting dependencies)
    pub parallel_groups: Vec<Vec<&'a TaskNode>>,
}

impl<'a> ExecutionPlan<'a> {
    /// Create an execution plan from a topologically sorted list of tasks
    pub fn from_tasks(tasks: Vec<&'a TaskNode>, graph: &'a TaskGraph) -> Self {
        let mut parallel_groups: Vec<Vec<&'a TaskNode>> = Vec::new();
        let mut depth: HashMap<&str, usize> = HashMap::new();

        for &task in &tasks {
            // One group past the deepest dependency
            let target_group = graph
                .dependencies(&task.name)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);

            while parallel_groups.len() <= target_group {
                parallel_groups.push(Vec::new());
            }

            parallel_groups[target_group].push(task);
            depth.insert(task.name.as_str(), target_group);
        }

        Self {
            tasks,
            parallel_groups,
        }
    }

    /// Whether any planned task leaves a server or watcher running
    pub fn is_long_lived(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| t.action().is_some_and(Action::is_long_lived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(depends: &[&str], action: Option<Action>) -> TaskConfig {
        TaskConfig {
            desc: None,
            depends: depends.iter().map(|d| d.to_string()).collect(),
            action,
        }
    }

    fn position(names: &[&str], name: &str) -> usize {
        names.iter().position(|&n| n == name).unwrap()
    }

    #[test]
    fn test_execution_order() {
        let graph = TaskGraph::from_config(&Config::default()).unwrap();

        let order = graph.execution_order("default").unwrap();
        let names: Vec<_> = order.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names.len(), 5);
        assert!(!names.contains(&"rebuild"));
        assert!(!names.contains(&"build"));
        assert!(position(&names, "sass") < position(&names, "browser-sync"));
        assert!(position(&names, "pug") < position(&names, "browser-sync"));
        assert!(position(&names, "browser-sync") < position(&names, "default"));
        assert!(position(&names, "watch") < position(&names, "default"));
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        let tasks = BTreeMap::from([
            ("a".to_string(), task(&[], Some(Action::Template))),
            ("b".to_string(), task(&["a"], Some(Action::Reload))),
            ("c".to_string(), task(&["a"], Some(Action::Reload))),
            ("d".to_string(), task(&["b", "c"], None)),
        ]);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();

        let order = graph.execution_order("d").unwrap();
        let names: Vec<_> = order.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names.iter().filter(|&&n| n == "a").count(), 1);
        assert!(position(&names, "a") < position(&names, "b"));
        assert!(position(&names, "a") < position(&names, "c"));
        assert!(position(&names, "b") < position(&names, "d"));
        assert!(position(&names, "c") < position(&names, "d"));
    }

    #[test]
    fn test_parallel_groups() {
        let graph = TaskGraph::from_config(&Config::default()).unwrap();
        let plan = ExecutionPlan::from_tasks(graph.execution_order("default").unwrap(), &graph);

        let groups: Vec<Vec<&str>> = plan
            .parallel_groups
            .iter()
            .map(|g| {
                let mut names: Vec<_> = g.iter().map(|t| t.name.as_str()).collect();
                names.sort();
                names
            })
            .collect();

        assert_eq!(
            groups,
            vec![
                vec!["pug", "sass", "watch"],
                vec!["browser-sync"],
                vec!["default"],
            ]
        );
        assert!(plan.is_long_lived());
    }

    #[test]
    fn test_build_is_one_shot() {
        let graph = TaskGraph::from_config(&Config::default()).unwrap();
        let plan = ExecutionPlan::from_tasks(graph.execution_order("build").unwrap(), &graph);

        assert_eq!(plan.parallel_groups.len(), 2);
        assert!(!plan.is_long_lived());
    }

    #[test]
    fn test_unknown_task() {
        let graph = TaskGraph::from_config(&Config::default()).unwrap();
        let result = graph.execution_order("deploy");

        assert!(matches!(result, Err(PipeError::TaskNotFound { name, .. }) if name == "deploy"));
    }

    #[test]
    fn test_unknown_dependency() {
        let tasks = BTreeMap::from([("a".to_string(), task(&["ghost"], None))]);
        let result = TaskGraph::from_tasks(&tasks);

        assert!(matches!(result, Err(PipeError::TaskNotFound { name, .. }) if name == "ghost"));
    }

    #[test]
    fn test_cycle_detection() {
        let tasks = BTreeMap::from([
            ("a".to_string(), task(&["b"], Some(Action::Reload))),
            ("b".to_string(), task(&["c"], Some(Action::Reload))),
            ("c".to_string(), task(&["a"], Some(Action::Reload))),
        ]);
        let result = TaskGraph::from_tasks(&tasks);

        match result {
            Err(PipeError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, "a -> b -> c -> a");
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }
}
