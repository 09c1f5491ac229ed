//! Transformation of concurrent operations.
//!
//! Given `a` and `b` built on the same text, `transform(a, b, p)` rebases
//! `a` so it can be applied after `b`:
//!
//! ```text
//! apply(apply(text, b), transform(a, b, p))
//!     == apply(apply(text, a), transform(b, a, p.opposite()))
//! ```
//!
//! Both operations are walked in lock-step. Inserts are emitted first
//! (ties resolved by `priority`), retains and deletes are split at the
//! shorter span, and overlapping deletes collapse so nothing is removed twice.

use crate::error::OtError;
use crate::operation::{Component, Operation};

/// Which side wins when both operations insert at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// The operation being transformed keeps its text to the left.
    Left,
    /// The other operation's text goes first.
    Right,
}

impl Priority {
    pub fn opposite(self) -> Self {
        match self {
            Priority::Left => Priority::Right,
            Priority::Right => Priority::Left,
        }
    }
}

/// Rebase `a` over the concurrent `b`.
pub fn transform(a: &Operation, b: &Operation, priority: Priority) -> Result<Operation, OtError> {
    transform_pair(a, b, priority).map(|(a_prime, _)| a_prime)
}

/// Rebase `a` over `b` and `b` over `a` in one pass.
///
/// `priority` applies to `a`; `b'` is computed with the opposite priority,
/// so `b·a'` and `a·b'` always produce the same text.
pub fn transform_pair(
    a: &Operation,
    b: &Operation,
    priority: Priority,
) -> Result<(Operation, Operation), OtError> {
    if a.base_len() != b.base_len() {
        return Err(OtError::BaseLengthMismatch {
            left: a.base_len(),
            right: b.base_len(),
        });
    }

    let mut a_prime = Operation::new();
    let mut b_prime = Operation::new();

    let mut iter_a = a.components().iter().cloned();
    let mut iter_b = b.components().iter().cloned();
    let mut head_a = iter_a.next();
    let mut head_b = iter_b.next();

    loop {
        let a_inserts = matches!(head_a, Some(Component::Insert(_)));
        let b_inserts = matches!(head_b, Some(Component::Insert(_)));

        if a_inserts && (priority == Priority::Left || !b_inserts) {
            if let Some(Component::Insert(text)) = head_a.take() {
                b_prime.push(Component::Retain(text.chars().count()));
                a_prime.push(Component::Insert(text));
            }
            head_a = iter_a.next();
            continue;
        }
        if b_inserts {
            if let Some(Component::Insert(text)) = head_b.take() {
                a_prime.push(Component::Retain(text.chars().count()));
                b_prime.push(Component::Insert(text));
            }
            head_b = iter_b.next();
            continue;
        }

        let (x, y) = match (head_a.take(), head_b.take()) {
            (None, None) => break,
            (Some(x), Some(y)) => (x, y),
            // Equal base lengths rule this out; treat it as the same contract breach.
            _ => {
                return Err(OtError::BaseLengthMismatch {
                    left: a.base_len(),
                    right: b.base_len(),
                })
            }
        };

        let step = x.len().min(y.len());
        match (&x, &y) {
            (Component::Retain(_), Component::Retain(_)) => {
                a_prime.push(Component::Retain(step));
                b_prime.push(Component::Retain(step));
            }
            (Component::Delete(_), Component::Delete(_)) => {}
            (Component::Delete(_), Component::Retain(_)) => {
                a_prime.push(Component::Delete(step));
            }
            (Component::Retain(_), Component::Delete(_)) => {
                b_prime.push(Component::Delete(step));
            }
            _ => unreachable!("inserts are consumed above"),
        }

        head_a = remainder(x, step).or_else(|| iter_a.next());
        head_b = remainder(y, step).or_else(|| iter_b.next());
    }

    log::trace!(
        "transformed {} over {} components -> {} / {}",
        a.components().len(),
        b.components().len(),
        a_prime.components().len(),
        b_prime.components().len()
    );
    Ok((a_prime, b_prime))
}

/// What is left of a retain/delete after consuming `step` chars of it.
fn remainder(component: Component, step: usize) -> Option<Component> {
    match component {
        Component::Retain(n) if n > step => Some(Component::Retain(n - step)),
        Component::Delete(n) if n > step => Some(Component::Delete(n - step)),
        _ => None,
    }
}
