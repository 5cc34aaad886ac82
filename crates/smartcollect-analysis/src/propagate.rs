use std::collections::{HashSet, VecDeque};

use petgraph::graph::NodeIndex;

use crate::AnalysisError;
use crate::graph::{AnalysisContext, ChangeState, VisitColor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Impact {
    Unaffected,
    /// `chain` runs from the root to the changed node, both included.
    Affected { chain: Vec<NodeIndex> },
}

impl Impact {
    pub fn is_affected(&self) -> bool {
        matches!(self, Self::Affected { .. })
    }
}

struct Frame {
    node: NodeIndex,
    next_child: usize,
}

impl AnalysisContext {
    /// Decides whether anything reachable from `root` changed.
    ///
    /// Every node on the ancestor chain of a change becomes changed itself and
    /// remembers its next hop; every node whose sub-graph was walked clean
    /// becomes unchanged. Later roots reuse both answers.
    pub fn propagate(&mut self, root: NodeIndex) -> Result<Impact, AnalysisError> {
        self.reset_colors();

        match self.graph[root].changed {
            ChangeState::Changed { .. } => {
                return Ok(Impact::Affected {
                    chain: self.change_path(root),
                });
            }
            ChangeState::Unchanged => return Ok(Impact::Unaffected),
            ChangeState::Unknown => {}
        }

        self.expand_reachable(root)?;

        let mut stack = vec![Frame {
            node: root,
            next_child: 0,
        }];
        self.graph[root].color = VisitColor::InProgress;

        while let Some(frame) = stack.last_mut() {
            let node = frame.node;
            let child = self.graph[node]
                .dependencies
                .as_deref()
                .and_then(|dependencies| dependencies.get(frame.next_child))
                .copied();

            let Some(child) = child else {
                stack.pop();
                let weight = &mut self.graph[node];
                weight.color = VisitColor::Done;
                weight.changed = ChangeState::Unchanged;
                continue;
            };
            frame.next_child += 1;

            match self.graph[child].changed {
                ChangeState::Changed { .. } => {
                    self.mark_ancestors_changed(&stack, child);
                    return Ok(Impact::Affected {
                        chain: self.change_path(root),
                    });
                }
                ChangeState::Unchanged => continue,
                ChangeState::Unknown => {}
            }

            match self.graph[child].color {
                VisitColor::Done => {}
                VisitColor::InProgress => return Err(self.cycle_error(&stack, child)),
                VisitColor::Unvisited => {
                    self.graph[child].color = VisitColor::InProgress;
                    stack.push(Frame {
                        node: child,
                        next_child: 0,
                    });
                }
            }
        }

        Ok(Impact::Unaffected)
    }

    /// `module::symbol` for every node of `chain`.
    pub fn render_chain(&self, chain: &[NodeIndex]) -> Vec<String> {
        chain.iter().map(|node| self.render_node(*node)).collect()
    }

    fn expand_reachable(&mut self, root: NodeIndex) -> Result<(), AnalysisError> {
        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);

        while let Some(node) = queue.pop_front() {
            // Settled nodes never need their children.
            if self.graph[node].changed != ChangeState::Unknown {
                continue;
            }
            for child in self.expand(node)? {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }

        Ok(())
    }

    fn mark_ancestors_changed(&mut self, stack: &[Frame], changed: NodeIndex) {
        for (position, frame) in stack.iter().enumerate() {
            let next = stack
                .get(position + 1)
                .map_or(changed, |next| next.node);
            self.graph[frame.node].changed = ChangeState::Changed { via: Some(next) };
        }
    }

    fn change_path(&self, from: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = vec![from];
        let mut current = from;
        while let ChangeState::Changed { via: Some(next) } = self.graph[current].changed {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    fn cycle_error(&self, stack: &[Frame], reentry: NodeIndex) -> AnalysisError {
        let start = stack
            .iter()
            .position(|frame| frame.node == reentry)
            .unwrap_or_default();
        let mut chain = stack[start..]
            .iter()
            .map(|frame| self.render_node(frame.node))
            .collect::<Vec<_>>();
        chain.push(self.render_node(reentry));

        tracing::warn!(cycle = %chain.join(" -> "), "dependency cycle detected");
        AnalysisError::DependencyCycle { chain }
    }
}
