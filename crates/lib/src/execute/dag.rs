//! Recipe dependency graph.
//!
//! Nodes are recipes; an edge runs from the recipe producing a package to every
//! recipe whose main or side packages depend on it. Only the name part of a
//! dependency reference is used. Names no recipe in the set produces are
//! external and add no edge, and neither do a recipe's references to its own
//! packages.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use super::types::DagError;
use crate::recipe::{DependencyRef, Recipe};

/// Dependency graph over a recipe slice. Node `i` is `recipes[i]`.
#[derive(Debug)]
pub struct RecipeGraph {
  graph: DiGraph<String, ()>,
}

impl RecipeGraph {
  /// Build the graph, rejecting duplicate producers and cycles.
  pub fn new(recipes: &[Recipe]) -> Result<Self, DagError> {
    let mut graph = DiGraph::with_capacity(recipes.len(), 0);
    let mut producers: HashMap<&str, usize> = HashMap::new();

    for (index, recipe) in recipes.iter().enumerate() {
      graph.add_node(recipe.name.clone());
      for name in recipe.produced_names() {
        match producers.get(name) {
          Some(&first) if first != index => {
            return Err(DagError::DuplicateProducer {
              package: name.to_string(),
              first: recipes[first].name.clone(),
              second: recipe.name.clone(),
            });
          }
          Some(_) => {}
          None => {
            producers.insert(name, index);
          }
        }
      }
    }

    for (index, recipe) in recipes.iter().enumerate() {
      let mut deps = BTreeSet::new();
      for reference in recipe.all_depends() {
        let dep = DependencyRef::parse(reference);
        match producers.get(dep.name) {
          Some(&producer) if producer != index => {
            deps.insert(producer);
          }
          Some(_) => {}
          None => debug!(recipe = %recipe.name, dependency = dep.name, "external dependency"),
        }
      }
      for producer in deps {
        graph.add_edge(NodeIndex::new(producer), NodeIndex::new(index), ());
      }
    }

    let dag = Self { graph };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), DagError> {
    if toposort(&self.graph, None).is_ok() {
      return Ok(());
    }
    let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1)
      .map(|scc| {
        let mut names: Vec<String> = scc.iter().map(|idx| self.graph[*idx].clone()).collect();
        names.sort();
        names
      })
      .collect();
    cycles.sort();
    let mut recipes = cycles.into_iter().next().unwrap_or_default();
    if let Some(first) = recipes.first().cloned() {
      recipes.push(first);
    }
    Err(DagError::Cycle { recipes })
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn name(&self, index: usize) -> &str {
    &self.graph[NodeIndex::new(index)]
  }

  /// Recipes `index` depends on directly, ascending.
  pub fn dependencies(&self, index: usize) -> Vec<usize> {
    self.neighbors(index, Direction::Incoming)
  }

  /// Recipes depending directly on `index`, ascending.
  pub fn dependents(&self, index: usize) -> Vec<usize> {
    self.neighbors(index, Direction::Outgoing)
  }

  fn neighbors(&self, index: usize, direction: Direction) -> Vec<usize> {
    let mut out: Vec<usize> = self
      .graph
      .neighbors_directed(NodeIndex::new(index), direction)
      .map(NodeIndex::index)
      .collect();
    out.sort_unstable();
    out.dedup();
    out
  }

  /// Every recipe reachable from `index` through dependents, excluding `index`. Ascending.
  pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![index];
    while let Some(current) = stack.pop() {
      for next in self.dependents(current) {
        if seen.insert(next) {
          stack.push(next);
        }
      }
    }
    seen.into_iter().collect()
  }

  /// Build order: dependencies first, ties broken by recipe name.
  pub fn order(&self) -> Vec<usize> {
    let mut pending: Vec<usize> = (0..self.len()).map(|i| self.dependencies(i).len()).collect();
    let mut ready: BTreeSet<(&str, usize)> = (0..self.len())
      .filter(|&i| pending[i] == 0)
      .map(|i| (self.name(i), i))
      .collect();
    let mut order = Vec::with_capacity(self.len());

    while let Some((_, index)) = ready.pop_first() {
      order.push(index);
      for next in self.dependents(index) {
        pending[next] -= 1;
        if pending[next] == 0 {
          ready.insert((self.name(next), next));
        }
      }
    }
    order
  }
}
