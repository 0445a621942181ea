//! Best-effort source-location recovery for diagnostics.
//!
//! The YAML deserializer does not expose positions for individual fields,
//! so locations are recovered by scanning the raw document text. Only the
//! conventional block layout is recognized (top-level key, sequence items
//! introduced with `- `); anything else simply leaves the location unknown
//! and the error renderer falls back to a message without a snippet.

use crate::errors::SourceLocation;

use super::{NodeConfig, StepConfig, Suite, TestConfig};

/// One sequence item inside a top-level section, with the positions of the
/// keys diagnostics care about.
#[derive(Debug, Default, Clone)]
struct ItemSpan {
    loc: SourceLocation,
    node_loc: SourceLocation,
    type_loc: SourceLocation,
}

pub(super) fn annotate(data: &str, file: &str, suite: &mut Suite) {
    let sections = scan(data, file);

    apply_nodes(&sections.nodes, &mut suite.nodes);
    apply_steps(&sections.setup, &mut suite.setup);
    apply_steps(&sections.teardown, &mut suite.teardown);
    apply_tests(&sections.tests, &mut suite.tests);
}

#[derive(Debug, Default)]
struct Sections {
    nodes: Vec<ItemSpan>,
    setup: Vec<ItemSpan>,
    teardown: Vec<ItemSpan>,
    tests: Vec<ItemSpan>,
}

fn scan(data: &str, file: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current: Option<&'static str> = None;

    for (idx, line) in data.split('\n').enumerate() {
        let line_num = idx + 1;
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        // A non-indented `key:` line starts a new top-level section.
        // Sequence items may themselves sit at column zero.
        if indent == 0 && !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with('-') {
            current = match trimmed.split(':').next() {
                Some("nodes") => Some("nodes"),
                Some("setup") => Some("setup"),
                Some("teardown") => Some("teardown"),
                Some("tests") => Some("tests"),
                _ => None,
            };
            continue;
        }

        let Some(section) = current else { continue };
        let items = match section {
            "nodes" => &mut sections.nodes,
            "setup" => &mut sections.setup,
            "teardown" => &mut sections.teardown,
            _ => &mut sections.tests,
        };

        if let Some(rest) = trimmed.strip_prefix("- ") {
            let column = indent + 3;
            let mut span = ItemSpan {
                loc: SourceLocation::new(file, line_num, column),
                ..Default::default()
            };
            // The first key may share the item line, e.g. `- name: api`.
            record_key(rest, line_num, column, &mut span);
            items.push(span);
        } else if let Some(span) = items.last_mut() {
            record_key(trimmed, line_num, indent + 1, span);
        }
    }

    sections
}

/// If the line is a `node:` or `type:` mapping entry, record the position
/// of its value. The first occurrence wins so that a step's `type:` inside
/// the nested `step:` block is captured once.
fn record_key(content: &str, line: usize, column: usize, span: &mut ItemSpan) {
    let Some((key, value)) = content.split_once(':') else {
        return;
    };
    let key = key.trim();
    let value_offset = content.len() - value.trim_start().len();
    let value_col = column + value_offset;
    match key {
        "node" if !span.node_loc.is_known() => {
            span.node_loc = SourceLocation::new(span.loc.file.clone(), line, value_col);
        }
        "type" if !span.type_loc.is_known() => {
            span.type_loc = SourceLocation::new(span.loc.file.clone(), line, value_col);
        }
        _ => {}
    }
}

fn apply_nodes(spans: &[ItemSpan], nodes: &mut [NodeConfig]) {
    for (node, span) in nodes.iter_mut().zip(spans) {
        node.loc = span.loc.clone();
        node.type_loc = span.type_loc.clone();
    }
}

fn apply_steps(spans: &[ItemSpan], steps: &mut [StepConfig]) {
    for (step, span) in steps.iter_mut().zip(spans) {
        step.loc = span.loc.clone();
        step.node_loc = span.node_loc.clone();
        step.step.type_loc = span.type_loc.clone();
    }
}

fn apply_tests(spans: &[ItemSpan], tests: &mut [TestConfig]) {
    for (test, span) in tests.iter_mut().zip(spans) {
        test.loc = span.loc.clone();
        test.node_loc = span.node_loc.clone();
        test.type_loc = span.type_loc.clone();
    }
}
