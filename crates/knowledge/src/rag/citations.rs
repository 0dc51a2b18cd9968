//! Citation extraction from generated answers.

use crate::types::{Chunk, RetrievedContext};
use std::collections::BTreeSet;

/// Numbers cited as `[n]` or `[n, m]` in `answer`, restricted to
/// `1..=max`.
pub fn cited_numbers(answer: &str, max: usize) -> BTreeSet<usize> {
    let mut cited = BTreeSet::new();
    let mut rest = answer;

    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };

        let inner = &after[..close];
        let numbers: Option<Vec<usize>> = inner
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect();

        if let Some(numbers) = numbers {
            cited.extend(numbers.into_iter().filter(|n| (1..=max).contains(n)));
        }

        rest = &after[close + 1..];
    }

    cited
}

/// The chunks an answer is grounded on, in context order.
///
/// Cited chunks when the answer cites any valid passage, otherwise the whole
/// context. Always a subsequence of `context`.
pub fn select_sources(answer: &str, context: &RetrievedContext) -> Vec<Chunk> {
    let cited = cited_numbers(answer, context.len());

    context
        .iter()
        .enumerate()
        .filter(|(i, _)| cited.is_empty() || cited.contains(&(i + 1)))
        .map(|(_, scored)| scored.chunk.clone())
        .collect()
}
