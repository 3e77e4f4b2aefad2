use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dependency graph between the services of a project.
///
/// Nodes keep their insertion order, so every listing this graph produces is
/// deterministic and follows declaration order where dependencies allow.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// `depends_on[a]` holds the nodes `a` needs, in the order they were added.
    depends_on: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) {
        self.id(name);
    }

    fn id(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), id);
        self.depends_on.push(Vec::new());
        id
    }

    /// Record that `from` depends on `to`.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from = self.id(from);
        let to = self.id(to);
        if !self.depends_on[from].contains(&to) {
            self.depends_on[from].push(to);
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// All transitive dependencies of `node`, dependencies first.
    pub fn dependencies(&self, node: &str) -> Vec<String> {
        let Some(&start) = self.index.get(node) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        self.post_order(start, &mut seen, &mut order);
        order
            .into_iter()
            .filter(|&id| id != start)
            .map(|id| self.nodes[id].clone())
            .collect()
    }

    fn post_order(&self, id: usize, seen: &mut [bool], order: &mut Vec<usize>) {
        if std::mem::replace(&mut seen[id], true) {
            return;
        }
        for &dep in &self.depends_on[id] {
            self.post_order(dep, seen, order);
        }
        order.push(id);
    }

    /// Groups of nodes that can be processed together, dependencies first.
    ///
    /// A node lands in the first group after all of its dependencies.
    pub fn parallel_groups(&self) -> Result<Vec<Vec<String>>> {
        let mut level: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut remaining = self.nodes.len();

        while remaining > 0 {
            let before = remaining;
            for id in 0..self.nodes.len() {
                if level[id].is_some() {
                    continue;
                }
                let deps: Option<Vec<usize>> =
                    self.depends_on[id].iter().map(|&d| level[d]).collect();
                if let Some(deps) = deps {
                    level[id] = Some(deps.into_iter().max().map_or(0, |l| l + 1));
                    remaining -= 1;
                }
            }
            if remaining == before {
                return Err(Error::CircularDependency(self.find_cycle()));
            }
        }

        let depth = level.iter().flatten().max().map_or(0, |l| l + 1);
        let mut groups = vec![Vec::new(); depth];
        for (id, l) in level.into_iter().enumerate() {
            if let Some(l) = l {
                groups[l].push(self.nodes[id].clone());
            }
        }
        Ok(groups)
    }

    /// A cycle in the graph as a path, first node repeated at the end.
    fn find_cycle(&self) -> Vec<String> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        (0..self.nodes.len())
            .find_map(|id| self.cycle_from(id, &mut marks, &mut path))
            .unwrap_or_default()
    }

    fn cycle_from(&self, id: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
        match marks[id] {
            Mark::Done => return None,
            Mark::OnPath => {
                let start = path.iter().position(|&p| p == id)?;
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&p| self.nodes[p].clone()).collect();
                cycle.push(self.nodes[id].clone());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }

        marks[id] = Mark::OnPath;
        path.push(id);
        for &dep in &self.depends_on[id] {
            if let Some(cycle) = self.cycle_from(dep, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks[id] = Mark::Done;
        None
    }
}
