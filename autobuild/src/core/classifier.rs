//! Deterministic classification of task descriptions.
//!
//! A cheap syntactic heuristic decides whether a task is decomposed into
//! phases before execution. It must stay deterministic and fast.

use std::collections::BTreeSet;

/// Word count at which a task is always considered complex.
pub const COMPLEX_WORD_COUNT: usize = 100;

/// Subsystem keywords; mentioning two or more marks a task complex.
pub const SUBSYSTEM_KEYWORDS: &[&str] = &[
    "agent",
    "api",
    "authentication",
    "backend",
    "cli",
    "database",
    "frontend",
    "storage",
    "tool",
    "ui",
];

const FULL_SYSTEM_PHRASE: &str = "build a complete system";

/// Whether a task should be decomposed rather than executed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Atomic,
    Complex,
}

/// - `Complex` if it has at least [`COMPLEX_WORD_COUNT`] words.
/// - `Complex` if it mentions two or more distinct [`SUBSYSTEM_KEYWORDS`].
/// - `Complex` if it contains "build a complete system" (any case).
/// - `Atomic` otherwise.
pub fn classify_task(task: &str) -> TaskKind {
    if task.split_whitespace().count() >= COMPLEX_WORD_COUNT {
        return TaskKind::Complex;
    }
    if mentioned_subsystems(task).len() >= 2 {
        return TaskKind::Complex;
    }
    if task.to_lowercase().contains(FULL_SYSTEM_PHRASE) {
        return TaskKind::Complex;
    }
    TaskKind::Atomic
}

pub fn is_complex(task: &str) -> bool {
    classify_task(task) == TaskKind::Complex
}

/// Distinct subsystem keywords appearing as whole words (plural `s` tolerated).
pub fn mentioned_subsystems(task: &str) -> BTreeSet<&'static str> {
    let lowered = task.to_lowercase();
    let words: BTreeSet<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    SUBSYSTEM_KEYWORDS
        .iter()
        .copied()
        .filter(|keyword| {
            words.contains(keyword) || words.contains(format!("{keyword}s").as_str())
        })
        .collect()
}
