use std::collections::{HashMap, HashSet};

use super::book_db::BookStructure;
use crate::cli::TocDepthSource;
use crate::model::{TocNode, TitleRecord};

const INDENT_MARKERS: [char; 4] = ['-', '*', '•', '>'];
const SPACES_PER_LEVEL: usize = 2;

/// Nesting cue for one heading. `None` means the record carries no cue and
/// is placed at the root.
pub trait DepthClassifier: Send + Sync {
    fn depth(&self, title: &TitleRecord) -> Option<usize>;

    /// Sub-id of the heading this one belongs under, when the source records
    /// it explicitly.
    fn parent(&self, _title: &TitleRecord) -> Option<u64> {
        None
    }
}

/// Depth from the parent chain in the book's own database.
pub struct ParentChainDepth<'a> {
    structure: &'a BookStructure,
}

impl<'a> ParentChainDepth<'a> {
    pub fn new(structure: &'a BookStructure) -> Self {
        Self { structure }
    }
}

impl DepthClassifier for ParentChainDepth<'_> {
    fn depth(&self, title: &TitleRecord) -> Option<usize> {
        let mut current = self.structure.title(title.sub_id)?;
        let mut seen = HashSet::from([title.sub_id]);
        let mut depth = 0usize;

        while let Some(parent) = current.parent {
            if !seen.insert(parent) {
                break;
            }
            depth += 1;
            match self.structure.title(parent) {
                Some(slot) => current = slot,
                None => break,
            }
        }
        Some(depth)
    }

    fn parent(&self, title: &TitleRecord) -> Option<u64> {
        self.structure.title(title.sub_id)?.parent
    }
}

/// Depth read from an explicit level field.
pub struct LevelFieldDepth;

impl DepthClassifier for LevelFieldDepth {
    fn depth(&self, title: &TitleRecord) -> Option<usize> {
        title.level.and_then(|level| usize::try_from(level).ok())
    }
}

/// Depth from leading indentation: a tab, two spaces or one list marker
/// each count as one level.
pub struct IndentDepth;

impl DepthClassifier for IndentDepth {
    fn depth(&self, title: &TitleRecord) -> Option<usize> {
        let mut spaces = 0usize;
        let mut levels = 0usize;
        for ch in title.heading.chars() {
            match ch {
                ' ' => spaces += 1,
                '\t' => levels += 1,
                ch if INDENT_MARKERS.contains(&ch) => levels += 1,
                _ => break,
            }
        }
        Some(levels + spaces / SPACES_PER_LEVEL)
    }
}

pub struct FlatDepth;

impl DepthClassifier for FlatDepth {
    fn depth(&self, _title: &TitleRecord) -> Option<usize> {
        None
    }
}

pub fn classifier_for<'a>(
    source: TocDepthSource,
    structure: &'a BookStructure,
) -> Box<dyn DepthClassifier + 'a> {
    match source {
        TocDepthSource::Parent => Box::new(ParentChainDepth::new(structure)),
        TocDepthSource::Field => Box::new(LevelFieldDepth),
        TocDepthSource::Indent => Box::new(IndentDepth),
        TocDepthSource::Flat => Box::new(FlatDepth),
    }
}

struct ArenaNode {
    heading: String,
    anchor: Option<String>,
    level: usize,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Builds the heading forest in one pass over `titles`, which must already
/// be in sub-id order. A heading whose recorded parent was already seen goes
/// under that parent. Otherwise it nests under the nearest preceding open
/// heading that is shallower, and skipped levels attach to the deepest open
/// node.
pub fn build_toc(titles: &[TitleRecord], classifier: &dyn DepthClassifier) -> Vec<TocNode> {
    let mut arena: Vec<ArenaNode> = Vec::with_capacity(titles.len());
    let mut by_sub_id: HashMap<u64, usize> = HashMap::new();
    let mut roots = Vec::new();
    let mut open: Vec<usize> = Vec::new();

    for title in titles {
        let known_parent = classifier
            .parent(title)
            .and_then(|parent| by_sub_id.get(&parent).copied());

        let level = match known_parent {
            Some(parent) => {
                reopen_path(&arena, &mut open, parent);
                arena[parent].level + 1
            }
            None => {
                let level = classifier.depth(title).unwrap_or(0);
                while open.last().is_some_and(|&idx| arena[idx].level >= level) {
                    open.pop();
                }
                level
            }
        };

        let idx = arena.len();
        let parent = open.last().copied();
        arena.push(ArenaNode {
            heading: title.heading.trim().to_string(),
            anchor: title.anchor.clone(),
            level,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => arena[parent].children.push(idx),
            None => roots.push(idx),
        }
        by_sub_id.entry(title.sub_id).or_insert(idx);
        open.push(idx);
    }

    // Children always sit after their parent in the arena, so a reverse
    // pass finishes every subtree before its parent needs it.
    let mut built: Vec<Option<TocNode>> = (0..arena.len()).map(|_| None).collect();
    for (idx, node) in arena.into_iter().enumerate().rev() {
        let children = node
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[idx] = Some(TocNode {
            heading: node.heading,
            anchor: node.anchor,
            children,
        });
    }

    roots
        .into_iter()
        .filter_map(|idx| built[idx].take())
        .collect()
}

/// Makes `open` the path from the root down to `idx`.
fn reopen_path(arena: &[ArenaNode], open: &mut Vec<usize>, idx: usize) {
    open.clear();
    let mut current = Some(idx);
    while let Some(node) = current {
        open.push(node);
        current = arena[node].parent;
    }
    open.reverse();
}
