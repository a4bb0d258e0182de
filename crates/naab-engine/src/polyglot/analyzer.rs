//! Dependency analysis for parallel polyglot execution.
//!
//! Given a statement sequence, finds the inline-code blocks, computes
//! their read/write variable sets, and groups them into waves: blocks
//! within a wave are pairwise independent under RAW/WAW/WAR analysis and
//! may run concurrently; waves execute in order.

use crate::ast::{InlineCode, Stmt};
use std::sync::Arc;

/// One polyglot block found in a statement sequence.
#[derive(Debug, Clone)]
pub struct PolyglotBlock {
    /// Position of the owning statement in the analysed sequence.
    pub stmt_index: usize,
    /// The inline-code node.
    pub code: Arc<InlineCode>,
    /// Variable assigned by `let name = <<..>>`, if any.
    pub assigned: Option<String>,
    /// NAAb names the foreign source reads (its bound variables).
    pub reads: Vec<String>,
    /// `{assigned}` when present, else empty.
    pub writes: Vec<String>,
}

/// A wave of blocks that can execute together.
#[derive(Debug, Clone, Default)]
pub struct DependencyGroup {
    /// Pairwise-independent blocks.
    pub blocks: Vec<PolyglotBlock>,
    /// Indices of groups that must complete first (all prior groups —
    /// the scheduler honours strict wave order).
    pub depends_on: Vec<usize>,
}

/// True when `a` (earlier in source) and `b` conflict.
///
/// RAW: `a` writes something `b` reads. WAW: both write the same name.
/// WAR: `b` writes something `a` reads. All three only apply in source
/// order (`a.stmt_index < b.stmt_index`).
pub fn has_dependency(a: &PolyglotBlock, b: &PolyglotBlock) -> bool {
    if a.stmt_index >= b.stmt_index {
        return false;
    }
    let raw = a.writes.iter().any(|w| b.reads.contains(w));
    let waw = a.writes.iter().any(|w| b.writes.contains(w));
    let war = a.reads.iter().any(|r| b.writes.contains(r));
    raw || waw || war
}

fn conflicts(a: &PolyglotBlock, b: &PolyglotBlock) -> bool {
    has_dependency(a, b) || has_dependency(b, a)
}

/// Extract the polyglot blocks from `stmts`.
///
/// `let name = <<lang ..>>` records a write of `name`; a bare
/// `<<lang ..>>` expression-statement writes nothing. Other statements
/// never produce blocks, even when inline code appears in a subexpression
/// (those evaluate sequentially inside the owning statement).
pub fn extract_blocks(stmts: &[Stmt]) -> Vec<PolyglotBlock> {
    let mut blocks = Vec::new();
    for (i, stmt) in stmts.iter().enumerate() {
        if let Some((code, assigned)) = stmt.polyglot_payload() {
            blocks.push(PolyglotBlock {
                stmt_index: i,
                code: code.clone(),
                assigned: assigned.map(str::to_string),
                reads: code.bound_variables.clone(),
                writes: assigned.map(str::to_string).into_iter().collect(),
            });
        }
    }
    blocks
}

/// Group `stmts`'s polyglot blocks into sequential waves.
pub fn analyze(stmts: &[Stmt]) -> Vec<DependencyGroup> {
    let blocks = extract_blocks(stmts);
    if blocks.is_empty() {
        return Vec::new();
    }
    if blocks.len() == 1 {
        return vec![DependencyGroup {
            blocks,
            depends_on: Vec::new(),
        }];
    }

    // Split into batches at gaps of two or more non-polyglot statements:
    // the intervening statements may update variables in ways the
    // analyzer cannot see.
    let mut batches: Vec<Vec<PolyglotBlock>> = Vec::new();
    let mut current: Vec<PolyglotBlock> = Vec::new();
    for block in blocks {
        if let Some(last) = current.last() {
            let gap = block.stmt_index - last.stmt_index - 1;
            if gap >= 2 {
                batches.push(std::mem::take(&mut current));
            }
        }
        current.push(block);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    let mut groups: Vec<DependencyGroup> = Vec::new();
    for batch in batches {
        let prior = groups.len();
        let mut batch_groups = build_groups(batch);
        // Cross-batch edges: every group in this batch waits for every
        // group from earlier batches.
        for group in &mut batch_groups {
            for i in 0..prior {
                if !group.depends_on.contains(&i) {
                    group.depends_on.push(i);
                }
            }
        }
        groups.extend(batch_groups);
    }
    groups
}

/// Greedy wavefront over one batch.
fn build_groups(blocks: Vec<PolyglotBlock>) -> Vec<DependencyGroup> {
    let mut groups: Vec<DependencyGroup> = Vec::new();
    let mut placed = vec![false; blocks.len()];
    let mut remaining = blocks.len();

    while remaining > 0 {
        let mut wave: Vec<usize> = Vec::new();
        for i in 0..blocks.len() {
            if placed[i] {
                continue;
            }
            // Must not depend on an earlier block that is still waiting.
            let blocked = (0..i).any(|j| !placed[j] && has_dependency(&blocks[j], &blocks[i]));
            if blocked {
                continue;
            }
            // Must be independent of everything already in this wave.
            if wave.iter().any(|&j| conflicts(&blocks[j], &blocks[i])) {
                continue;
            }
            wave.push(i);
        }

        if wave.is_empty() {
            break; // unreachable with consistent inputs
        }
        for &i in &wave {
            placed[i] = true;
        }
        remaining -= wave.len();

        let depends_on = (0..groups.len()).collect();
        groups.push(DependencyGroup {
            blocks: wave.into_iter().map(|i| blocks[i].clone()).collect(),
            depends_on,
        });
    }

    groups
}
