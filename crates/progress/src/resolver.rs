//! Prerequisite resolution.
//!
//! Edges come from two places: explicit `prerequisites` lists and the
//! assessment-to-owner link. Completion-time requirements (a lesson's own
//! mandatory assessment) are kept apart so the access graph stays acyclic.

use learnpath_core::{ContentId, ContentKind, ContentNode, ContentRef, Prerequisite, Requirement};
use learnpath_storage::ContentCatalog;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ProgressionError, Result};

/// A node that depends on another through one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    /// The dependent node
    pub node: ContentRef,
    /// What it requires of the node it depends on
    pub requirement: Requirement,
}

/// Inverse edges for one course, keyed by the required node.
#[derive(Debug, Default)]
struct DependentsIndex {
    by_required: HashMap<ContentRef, Vec<Dependent>>,
}

/// Prerequisite subgraph reachable from some roots.
#[derive(Debug, Default)]
struct Subgraph {
    edges: HashMap<ContentRef, Vec<ContentRef>>,
    published: HashMap<ContentRef, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    OnStack,
    Done,
}

/// Computes direct and transitive prerequisites over a content catalog.
pub struct PrerequisiteResolver {
    catalog: Arc<dyn ContentCatalog>,
    index: RwLock<HashMap<ContentId, Arc<DependentsIndex>>>,
    cache_dependents: bool,
}

impl PrerequisiteResolver {
    /// Create a resolver over `catalog`.
    pub fn new(catalog: Arc<dyn ContentCatalog>) -> Self {
        Self {
            catalog,
            index: RwLock::new(HashMap::new()),
            cache_dependents: true,
        }
    }

    /// Enable or disable caching of the dependents index.
    pub fn set_cache_dependents(&mut self, enabled: bool) {
        self.cache_dependents = enabled;
    }

    /// Load a node or fail with `ContentNotFound`.
    pub async fn node(&self, reference: &ContentRef) -> Result<ContentNode> {
        self.catalog
            .get_node(reference)
            .await?
            .ok_or_else(|| ProgressionError::ContentNotFound(reference.clone()))
    }

    /// Direct access prerequisites of `node`, in resolution order.
    ///
    /// Assessments first require their owner to be reachable. Explicit
    /// entries follow in authored order; a non-mandatory assessment listed
    /// there is dropped since it never gates anything.
    pub async fn direct_prerequisites(&self, node: &ContentNode) -> Result<Vec<Prerequisite>> {
        let mut out = Vec::new();

        if node.kind == ContentKind::Assessment {
            match &node.parent {
                Some(parent) => {
                    push_unique(&mut out, Prerequisite::new(parent.clone(), Requirement::Reachable))
                }
                None => warn!(assessment = %node.id, "assessment has no owning lesson or course"),
            }
        }

        for required in &node.prerequisites {
            if let Some(edge) = self.explicit_edge(node, required).await? {
                push_unique(&mut out, edge);
            }
        }

        Ok(out)
    }

    /// What must hold before `node` may be marked completed: its attached
    /// mandatory assessment, when there is one.
    pub async fn completion_requirements(&self, node: &ContentNode) -> Result<Vec<Prerequisite>> {
        if node.kind == ContentKind::Assessment {
            return Ok(Vec::new());
        }
        let Some(assessment_id) = &node.assessment_id else {
            return Ok(Vec::new());
        };

        let reference = ContentRef::assessment(assessment_id.clone());
        match self.catalog.get_node(&reference).await? {
            Some(assessment) if !assessment.is_gating_assessment() => Ok(Vec::new()),
            Some(_) => Ok(vec![Prerequisite::new(reference, Requirement::Passed)]),
            None => {
                warn!(node = %node.reference(), assessment = %assessment_id, "attached assessment is missing");
                Ok(vec![Prerequisite::new(reference, Requirement::Passed)])
            }
        }
    }

    /// Every published node `node` transitively depends on, prerequisites
    /// before their dependents. Fails with `CyclicPrerequisiteGraph` if the
    /// expansion revisits a node that is still being expanded.
    pub async fn transitive_closure(&self, node: &ContentNode) -> Result<Vec<ContentRef>> {
        let root = node.reference();
        let graph = self.load_subgraph(vec![node.clone()]).await?;

        let mut states = HashMap::new();
        let mut order = Vec::new();
        let first = walk_cycles(&root, &graph.edges, &mut states, &mut order, true)
            .into_iter()
            .next();
        if let Some(cycle) = first {
            warn!(content = %root, cycle = ?cycle, "prerequisite cycle detected");
            return Err(ProgressionError::CyclicPrerequisiteGraph { cycle });
        }

        Ok(order
            .into_iter()
            .filter(|r| *r != root)
            .filter(|r| graph.published.get(r).copied().unwrap_or(false))
            .collect())
    }

    /// Every prerequisite cycle reachable from the course's content, one per
    /// back edge of a full depth-first walk.
    pub async fn find_cycles(&self, course_id: &ContentId) -> Result<Vec<Vec<ContentRef>>> {
        let nodes = self.catalog.list_course_content(course_id).await?;
        let starts: Vec<ContentRef> = nodes.iter().map(ContentNode::reference).collect();
        let graph = self.load_subgraph(nodes).await?;

        let mut cycles = Vec::new();
        let mut states = HashMap::new();
        let mut order = Vec::new();
        for start in &starts {
            if states.contains_key(start) {
                continue;
            }
            cycles.extend(walk_cycles(start, &graph.edges, &mut states, &mut order, false));
        }

        if !cycles.is_empty() {
            warn!(course = %course_id, count = cycles.len(), "course has prerequisite cycles");
        }
        Ok(cycles)
    }

    /// Nodes with a direct edge to `required`, across every course.
    pub async fn dependents_of(&self, required: &ContentRef) -> Result<Vec<Dependent>> {
        let mut out: Vec<Dependent> = Vec::new();
        for course_id in self.catalog.list_courses().await? {
            let index = self.course_index(&course_id).await?;
            if let Some(found) = index.by_required.get(required) {
                for dependent in found {
                    if !out.contains(dependent) {
                        out.push(dependent.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Drop the cached dependents index for a course after its content
    /// changed.
    pub async fn invalidate_course(&self, course_id: &ContentId) {
        if self.index.write().await.remove(course_id).is_some() {
            debug!(course = %course_id, "dependents index invalidated");
        }
    }

    /// Drop every cached index.
    pub async fn invalidate_all(&self) {
        self.index.write().await.clear();
    }

    async fn explicit_edge(
        &self,
        node: &ContentNode,
        required: &ContentRef,
    ) -> Result<Option<Prerequisite>> {
        match required.kind {
            ContentKind::Lesson | ContentKind::Course => {
                Ok(Some(Prerequisite::new(required.clone(), Requirement::Completed)))
            }
            ContentKind::Assessment => match self.catalog.get_node(required).await? {
                Some(assessment) if !assessment.is_gating_assessment() => {
                    debug!(node = %node.reference(), assessment = %required.id, "ignoring non-mandatory assessment prerequisite");
                    Ok(None)
                }
                Some(_) => Ok(Some(Prerequisite::new(required.clone(), Requirement::Passed))),
                None => {
                    warn!(node = %node.reference(), missing = %required, "dangling prerequisite");
                    Ok(Some(Prerequisite::new(required.clone(), Requirement::Passed)))
                }
            },
        }
    }

    async fn load_subgraph(&self, roots: Vec<ContentNode>) -> Result<Subgraph> {
        let mut graph = Subgraph::default();
        let mut queue: VecDeque<ContentNode> = roots.into();
        let mut seen: HashSet<ContentRef> = queue.iter().map(ContentNode::reference).collect();

        while let Some(node) = queue.pop_front() {
            let reference = node.reference();
            let required: Vec<ContentRef> = self
                .direct_prerequisites(&node)
                .await?
                .into_iter()
                .map(|p| p.node)
                .collect();

            for next in &required {
                if !seen.insert(next.clone()) {
                    continue;
                }
                match self.catalog.get_node(next).await? {
                    Some(loaded) => queue.push_back(loaded),
                    None => {
                        graph.published.insert(next.clone(), false);
                    }
                }
            }

            graph.published.insert(reference.clone(), node.published);
            graph.edges.insert(reference, required);
        }

        Ok(graph)
    }

    async fn course_index(&self, course_id: &ContentId) -> Result<Arc<DependentsIndex>> {
        if self.cache_dependents {
            if let Some(index) = self.index.read().await.get(course_id) {
                return Ok(index.clone());
            }
        }

        let mut index = DependentsIndex::default();
        for node in self.catalog.list_course_content(course_id).await? {
            let dependent = node.reference();
            for edge in self.direct_prerequisites(&node).await? {
                index.by_required.entry(edge.node).or_default().push(Dependent {
                    node: dependent.clone(),
                    requirement: edge.requirement,
                });
            }
        }
        let index = Arc::new(index);

        if self.cache_dependents {
            self.index.write().await.insert(course_id.clone(), index.clone());
            debug!(course = %course_id, "dependents index built");
        }
        Ok(index)
    }
}

fn push_unique(out: &mut Vec<Prerequisite>, edge: Prerequisite) {
    if !out.iter().any(|p| p.node == edge.node) {
        out.push(edge);
    }
}

/// Depth-first walk from `start`. Finished nodes are appended to `order`
/// (post-order). Every back edge met yields a cycle, closed by repeating its
/// first node. With `stop_at_first` the walk ends at the first cycle.
fn walk_cycles(
    start: &ContentRef,
    edges: &HashMap<ContentRef, Vec<ContentRef>>,
    states: &mut HashMap<ContentRef, Visit>,
    order: &mut Vec<ContentRef>,
    stop_at_first: bool,
) -> Vec<Vec<ContentRef>> {
    let mut cycles = Vec::new();
    // (node, index of the next child to visit)
    let mut stack: Vec<(ContentRef, usize)> = vec![(start.clone(), 0)];
    states.insert(start.clone(), Visit::OnStack);

    while let Some((node, next_child)) = stack.last_mut() {
        let child = edges.get(&*node).and_then(|c| c.get(*next_child)).cloned();
        *next_child += 1;

        match child {
            Some(child) => match states.get(&child) {
                Some(Visit::OnStack) => {
                    let from = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut cycle: Vec<ContentRef> =
                        stack[from..].iter().map(|(n, _)| n.clone()).collect();
                    cycle.push(child);
                    cycles.push(cycle);
                    if stop_at_first {
                        for (n, _) in &stack {
                            states.insert(n.clone(), Visit::Done);
                        }
                        return cycles;
                    }
                }
                Some(Visit::Done) => {}
                None => {
                    states.insert(child.clone(), Visit::OnStack);
                    stack.push((child, 0));
                }
            },
            None => {
                if let Some((finished, _)) = stack.pop() {
                    states.insert(finished.clone(), Visit::Done);
                    order.push(finished);
                }
            }
        }
    }

    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::{AssessmentRequirement, ContentNode};
    use learnpath_storage::MemoryStore;

    async fn resolver_with(nodes: Vec<ContentNode>) -> (MemoryStore, PrerequisiteResolver) {
        let store = MemoryStore::new();
        store.put_nodes(nodes).await;
        let resolver = PrerequisiteResolver::new(Arc::new(store.clone()));
        (store, resolver)
    }

    fn quiz(id: &str, parent: &str, mandatory: bool) -> ContentNode {
        let mut requirement = AssessmentRequirement::mandatory(id, 70);
        requirement.is_mandatory = mandatory;
        ContentNode::assessment(id, "c1", ContentRef::lesson(parent), requirement)
    }

    #[tokio::test]
    async fn test_direct_prerequisites_keep_authored_order() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::course("c1", "Course"),
            ContentNode::lesson("l1", "c1", "One"),
            ContentNode::lesson("l2", "c1", "Two"),
            quiz("a1", "l1", true),
            ContentNode::lesson("l3", "c1", "Three")
                .requires(ContentRef::lesson("l2"))
                .requires(ContentRef::assessment("a1")),
        ])
        .await;

        let l3 = resolver.node(&ContentRef::lesson("l3")).await.unwrap();
        let prereqs = resolver.direct_prerequisites(&l3).await.unwrap();
        assert_eq!(
            prereqs,
            vec![
                Prerequisite::new(ContentRef::lesson("l2"), Requirement::Completed),
                Prerequisite::new(ContentRef::assessment("a1"), Requirement::Passed),
            ]
        );

        let a1 = resolver.node(&ContentRef::assessment("a1")).await.unwrap();
        let prereqs = resolver.direct_prerequisites(&a1).await.unwrap();
        assert_eq!(
            prereqs,
            vec![Prerequisite::new(ContentRef::lesson("l1"), Requirement::Reachable)]
        );
    }

    #[tokio::test]
    async fn test_non_mandatory_assessment_is_not_a_prerequisite() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::lesson("l1", "c1", "One"),
            quiz("practice", "l1", false),
            ContentNode::lesson("l2", "c1", "Two").requires(ContentRef::assessment("practice")),
        ])
        .await;

        let l2 = resolver.node(&ContentRef::lesson("l2")).await.unwrap();
        assert!(resolver.direct_prerequisites(&l2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_requirements_only_for_mandatory_assessment() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::lesson("l1", "c1", "One").with_assessment("a1"),
            quiz("a1", "l1", true),
            ContentNode::lesson("l2", "c1", "Two").with_assessment("p1"),
            quiz("p1", "l2", false),
        ])
        .await;

        let l1 = resolver.node(&ContentRef::lesson("l1")).await.unwrap();
        assert_eq!(
            resolver.completion_requirements(&l1).await.unwrap(),
            vec![Prerequisite::new(ContentRef::assessment("a1"), Requirement::Passed)]
        );
        let l2 = resolver.node(&ContentRef::lesson("l2")).await.unwrap();
        assert!(resolver.completion_requirements(&l2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closure_orders_prerequisites_first_and_skips_unpublished() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::lesson("l1", "c1", "One"),
            ContentNode::lesson("draft", "c1", "Draft").with_published(false),
            ContentNode::lesson("l2", "c1", "Two").requires(ContentRef::lesson("l1")),
            ContentNode::lesson("l3", "c1", "Three")
                .requires(ContentRef::lesson("l2"))
                .requires(ContentRef::lesson("draft")),
        ])
        .await;

        let l3 = resolver.node(&ContentRef::lesson("l3")).await.unwrap();
        let closure = resolver.transitive_closure(&l3).await.unwrap();
        assert_eq!(closure, vec![ContentRef::lesson("l1"), ContentRef::lesson("l2")]);
    }

    #[tokio::test]
    async fn test_closure_reports_cycle() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::lesson("a", "c1", "A").requires(ContentRef::lesson("b")),
            ContentNode::lesson("b", "c1", "B").requires(ContentRef::lesson("a")),
        ])
        .await;

        let a = resolver.node(&ContentRef::lesson("a")).await.unwrap();
        match resolver.transitive_closure(&a).await {
            Err(ProgressionError::CyclicPrerequisiteGraph { cycle }) => {
                assert_eq!(
                    cycle,
                    vec![ContentRef::lesson("a"), ContentRef::lesson("b"), ContentRef::lesson("a")]
                );
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_reference_is_a_cycle() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::lesson("a", "c1", "A").requires(ContentRef::lesson("a")),
        ])
        .await;

        let a = resolver.node(&ContentRef::lesson("a")).await.unwrap();
        assert!(matches!(
            resolver.transitive_closure(&a).await,
            Err(ProgressionError::CyclicPrerequisiteGraph { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_cycles_lists_each_cycle_once() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::course("c1", "Course"),
            ContentNode::lesson("a", "c1", "A").at(1).requires(ContentRef::lesson("b")),
            ContentNode::lesson("b", "c1", "B").at(2).requires(ContentRef::lesson("a")),
            ContentNode::lesson("c", "c1", "C").at(3).requires(ContentRef::lesson("a")),
            ContentNode::lesson("ok", "c1", "Ok").at(4),
        ])
        .await;

        let cycles = resolver.find_cycles(&ContentId::new("c1")).await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].first(), cycles[0].last());
    }

    #[tokio::test]
    async fn test_find_cycles_reports_cycles_sharing_a_node() {
        let (_, resolver) = resolver_with(vec![
            ContentNode::course("c1", "Course"),
            ContentNode::lesson("x", "c1", "X").at(1).requires(ContentRef::lesson("a")),
            ContentNode::lesson("a", "c1", "A")
                .at(2)
                .requires(ContentRef::lesson("b"))
                .requires(ContentRef::lesson("c")),
            ContentNode::lesson("b", "c1", "B").at(3).requires(ContentRef::lesson("a")),
            ContentNode::lesson("c", "c1", "C").at(4).requires(ContentRef::lesson("x")),
        ])
        .await;

        let cycles = resolver.find_cycles(&ContentId::new("c1")).await.unwrap();
        let rendered: Vec<Vec<String>> = cycles
            .iter()
            .map(|c| c.iter().map(ContentRef::to_string).collect())
            .collect();
        assert_eq!(
            rendered,
            vec![
                vec!["lesson:a", "lesson:b", "lesson:a"],
                vec!["lesson:x", "lesson:a", "lesson:c", "lesson:x"],
            ]
        );
    }

    #[tokio::test]
    async fn test_dependents_index_and_invalidation() {
        let (store, resolver) = resolver_with(vec![
            ContentNode::course("c1", "Course"),
            ContentNode::lesson("l1", "c1", "One").at(1),
            ContentNode::lesson("l2", "c1", "Two").at(2).requires(ContentRef::lesson("l1")),
        ])
        .await;

        let found = resolver.dependents_of(&ContentRef::lesson("l1")).await.unwrap();
        assert_eq!(
            found,
            vec![Dependent { node: ContentRef::lesson("l2"), requirement: Requirement::Completed }]
        );

        store
            .put_node(ContentNode::lesson("l3", "c1", "Three").at(3).requires(ContentRef::lesson("l1")))
            .await;
        // Cached index still reflects the old content.
        assert_eq!(resolver.dependents_of(&ContentRef::lesson("l1")).await.unwrap().len(), 1);

        resolver.invalidate_course(&ContentId::new("c1")).await;
        assert_eq!(resolver.dependents_of(&ContentRef::lesson("l1")).await.unwrap().len(), 2);
    }
}
