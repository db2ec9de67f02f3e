// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::expect_used)]

use std::cell::RefCell;
use std::rc::Rc;

use warp_clone::{CloneError, CloneSession, NodeKind, SourceKey, SourceNode};

/// Shorthand for a clip key.
pub fn clip(raw: u32) -> SourceKey {
    SourceKey::new(NodeKind::Clip, raw)
}

/// Substitution that maps `from` to `to` and leaves every other leaf alone.
pub fn remap(from: SourceKey, to: SourceKey) -> impl Fn(SourceKey) -> SourceKey + 'static {
    move |leaf| if leaf == from { to } else { leaf }
}

/// Append-only event log shared between a test and its deferred actions.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Minimal host node: identity plus outgoing edges (arena indices).
#[derive(Debug, Clone)]
pub struct TestNode {
    pub key: SourceKey,
    pub edges: Vec<usize>,
}

impl SourceNode for TestNode {
    fn source_key(&self) -> SourceKey {
        self.key
    }
}

/// Arena of [`TestNode`]s; the arena index doubles as the handle.
#[derive(Debug, Clone, Default)]
pub struct TestGraph {
    pub nodes: Vec<TestNode>,
}

impl TestGraph {
    pub fn with_nodes(kind: NodeKind, count: usize) -> Self {
        let mut graph = Self::default();
        for _ in 0..count {
            graph.add(kind);
        }
        graph
    }

    pub fn add(&mut self, kind: NodeKind) -> usize {
        let index = self.nodes.len();
        let raw = u32::try_from(index).expect("test graph fits in u32");
        self.nodes.push(TestNode {
            key: SourceKey::new(kind, raw),
            edges: Vec::new(),
        });
        index
    }

    pub fn link(&mut self, from: usize, to: usize) {
        self.nodes[from].edges.push(to);
    }
}

/// Clone of a [`TestNode`].
#[derive(Debug)]
pub struct TestClone {
    pub source: SourceKey,
    pub edges: Vec<Handle>,
}

pub type Handle = Rc<RefCell<TestClone>>;

fn shell(node: &TestNode) -> Handle {
    Rc::new(RefCell::new(TestClone {
        source: node.key,
        edges: Vec::new(),
    }))
}

/// Clones `index` with the two-phase entry point; survives cycles.
pub fn clone_cyclic(
    session: &mut CloneSession,
    graph: &TestGraph,
    index: usize,
) -> Result<Option<Handle>, CloneError> {
    session.resolve_cyclic(
        graph.nodes.get(index),
        |node| Ok(shell(node)),
        |session, node, clone| {
            let edges = node
                .edges
                .iter()
                .map(|&edge| clone_cyclic(session, graph, edge)?.ok_or(CloneError::MissingKey))
                .collect::<Result<Vec<_>, _>>()?;
            clone.borrow_mut().edges = edges;
            Ok(())
        },
    )
}

/// Clones `index` with the single-phase entry point; fails on cycles.
pub fn clone_single(
    session: &mut CloneSession,
    graph: &TestGraph,
    index: usize,
) -> Result<Option<Handle>, CloneError> {
    session.resolve(graph.nodes.get(index), |session, node| {
        let edges = node
            .edges
            .iter()
            .map(|&edge| clone_single(session, graph, edge)?.ok_or(CloneError::MissingKey))
            .collect::<Result<Vec<_>, _>>()?;
        let clone = shell(node);
        clone.borrow_mut().edges = edges;
        Ok(clone)
    })
}
