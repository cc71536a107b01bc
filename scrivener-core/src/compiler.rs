//! Report compiler: merge completed sections into the final document.

use crate::error::CompileError;
use crate::types::{CompletedReport, Section};
use std::collections::HashSet;

/// Section separator in the compiled report.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Merge research and no-research sections, order by ordinal and join.
///
/// Fails on the lowest-ordinal section with blank content, or on any ordinal
/// that appears twice.
pub fn compile_report(
    research: &[Section],
    no_research: &[Section],
) -> Result<CompletedReport, CompileError> {
    let mut sections: Vec<Section> = research.iter().chain(no_research).cloned().collect();
    if sections.is_empty() {
        return Err(CompileError::NoSections);
    }
    sections.sort_by_key(|s| s.ordinal);

    let mut seen = HashSet::new();
    for section in &sections {
        if !seen.insert(section.ordinal) {
            return Err(CompileError::DuplicateOrdinal {
                ordinal: section.ordinal,
            });
        }
    }
    if let Some(empty) = sections.iter().find(|s| !s.has_content()) {
        return Err(CompileError::MissingContent {
            ordinal: empty.ordinal,
            name: empty.name.clone(),
        });
    }

    let text = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    Ok(CompletedReport { sections, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn written(ordinal: u32, content: &str, research: bool) -> Section {
        let mut s = Section::new(ordinal, format!("S{ordinal}"), "d", research);
        s.content = content.to_string();
        s
    }

    #[test]
    fn test_compile_orders_by_ordinal() {
        let research = vec![written(2, "## Body", true)];
        let others = vec![written(3, "## Conclusion", false), written(1, "# Intro", false)];
        let report = compile_report(&research, &others).unwrap();
        assert_eq!(report.text, "# Intro\n\n## Body\n\n## Conclusion");
        let ordinals: Vec<_> = report.sections.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_content_names_first_section() {
        let research = vec![written(3, "  ", true), written(2, "", true)];
        let others = vec![written(1, "# Intro", false)];
        match compile_report(&research, &others) {
            Err(CompileError::MissingContent { ordinal, name }) => {
                assert_eq!(ordinal, 2);
                assert_eq!(name, "S2");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_ordinal() {
        let research = vec![written(1, "a", true)];
        let others = vec![written(1, "b", false)];
        assert!(matches!(
            compile_report(&research, &others),
            Err(CompileError::DuplicateOrdinal { ordinal: 1 })
        ));
    }

    #[test]
    fn test_no_sections() {
        assert!(matches!(compile_report(&[], &[]), Err(CompileError::NoSections)));
    }

    proptest! {
        #[test]
        fn output_follows_ordinal_order(mut ordinals in proptest::sample::subsequence((1u32..40).collect::<Vec<_>>(), 1..20), seed in any::<u64>()) {
            // Shuffle deterministically and split between the two collections.
            let n = ordinals.len();
            for i in 0..n {
                let j = ((seed.wrapping_mul(i as u64 + 7)) % n as u64) as usize;
                ordinals.swap(i, j);
            }
            let sections: Vec<_> = ordinals.iter().map(|o| written(*o, &format!("c{o}"), o % 2 == 0)).collect();
            let (research, others): (Vec<_>, Vec<_>) = sections.into_iter().partition(|s| s.research);
            let report = compile_report(&research, &others).unwrap();

            let mut expected = ordinals.clone();
            expected.sort();
            let expected_text = expected.iter().map(|o| format!("c{o}")).collect::<Vec<_>>().join("\n\n");
            prop_assert_eq!(report.text, expected_text);
        }
    }
}
