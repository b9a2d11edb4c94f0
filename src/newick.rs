//! Newick Tree-Text Parser Module
//!
//! Structural validation for the parenthetical tree text produced by the
//! tree builder. The engine treats the topology as opaque: it checks that
//! the nesting is balanced, extracts the leaf names, and compares the leaf
//! count against the taxa that went in. Every problem is a warning; the
//! tree text is always returned for inspection.
//!
//! # Newick example
//! ```text
//! ((ecoli:0.012,salmonella:0.015):0.003,klebsiella:0.021);
//! ```

use serde::Serialize;

use crate::seqio::ParseWarning;

/// A phylogenetic tree: raw topology text plus the extracted leaf names.
#[derive(Debug, Clone, Serialize)]
pub struct PhylogeneticTree {
    /// Raw tree text as produced by the tree builder.
    pub newick: String,
    /// Leaf names in encounter order.
    pub taxa: Vec<String>,
}

/// Parses and structurally validates Newick text.
///
/// # Arguments
/// * `text` - Raw tree-builder output
/// * `expected_taxa` - Number of input taxa, when known
///
/// # Returns
/// The tree (always, even when warnings were raised) and the warnings:
/// unbalanced parentheses, a missing trailing `;`, or a leaf count that
/// does not match `expected_taxa`.
pub fn parse_newick(
    text: &str,
    expected_taxa: Option<usize>,
) -> (PhylogeneticTree, Vec<ParseWarning>) {
    let trimmed = text.trim();
    let mut warnings = Vec::new();
    let mut taxa = Vec::new();

    let mut depth: i64 = 0;
    let mut depth_underflow = false;
    let mut buf = String::new();
    // Leaf names only follow '(' or ','; labels after ')' name internal
    // nodes and are skipped.
    let mut expect_leaf = true;

    for c in trimmed.chars() {
        match c {
            '(' => {
                depth += 1;
                expect_leaf = true;
                buf.clear();
            }
            ',' => {
                flush_leaf(&mut buf, &mut expect_leaf, &mut taxa);
                expect_leaf = true;
            }
            ')' => {
                flush_leaf(&mut buf, &mut expect_leaf, &mut taxa);
                depth -= 1;
                if depth < 0 {
                    depth_underflow = true;
                }
            }
            ':' | ';' => {
                flush_leaf(&mut buf, &mut expect_leaf, &mut taxa);
            }
            c if c.is_whitespace() => {}
            _ => buf.push(c),
        }
    }
    flush_leaf(&mut buf, &mut expect_leaf, &mut taxa);

    if depth != 0 || depth_underflow {
        warnings.push(ParseWarning::new(1, "unbalanced parentheses in tree text"));
    }
    if !trimmed.is_empty() && !trimmed.ends_with(';') {
        warnings.push(ParseWarning::new(1, "tree text missing trailing ';'"));
    }
    if let Some(expected) = expected_taxa {
        if taxa.len() != expected {
            warnings.push(ParseWarning::new(
                1,
                format!("tree has {} leaves, expected {} taxa", taxa.len(), expected),
            ));
        }
    }

    (
        PhylogeneticTree {
            newick: trimmed.to_string(),
            taxa,
        },
        warnings,
    )
}

fn flush_leaf(buf: &mut String, expect_leaf: &mut bool, taxa: &mut Vec<String>) {
    if *expect_leaf && !buf.is_empty() {
        taxa.push(std::mem::take(buf));
        *expect_leaf = false;
    } else {
        buf.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_branch_lengths() {
        let text = "((ecoli:0.012,salmonella:0.015):0.003,klebsiella:0.021);";
        let (tree, warnings) = parse_newick(text, Some(3));
        assert!(warnings.is_empty());
        assert_eq!(tree.taxa, vec!["ecoli", "salmonella", "klebsiella"]);
        assert_eq!(tree.newick, text);
    }

    #[test]
    fn test_parse_without_branch_lengths() {
        let (tree, warnings) = parse_newick("(A,B,(C,D));", Some(4));
        assert!(warnings.is_empty());
        assert_eq!(tree.taxa, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_internal_labels_not_leaves() {
        let (tree, warnings) = parse_newick("((A:0.1,B:0.2)node1:0.05,C:0.3)root;", Some(3));
        assert!(warnings.is_empty());
        assert_eq!(tree.taxa, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_unbalanced_is_warning_not_failure() {
        let (tree, warnings) = parse_newick("((A,B,(C,D));", Some(4));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("unbalanced"));
        // Tree still returned for inspection.
        assert_eq!(tree.taxa.len(), 4);
    }

    #[test]
    fn test_leaf_count_mismatch_warns() {
        let (tree, warnings) = parse_newick("(A,B);", Some(3));
        assert_eq!(tree.taxa.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("expected 3"));
    }

    #[test]
    fn test_missing_semicolon_warns() {
        let (_, warnings) = parse_newick("(A,B)", Some(2));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains(";"));
    }
}
