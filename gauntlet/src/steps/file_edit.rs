//! File-edit step: insert, replace, or remove content in a file on the
//! node.
//!
//! The file is read whole, transformed in memory, and written back whole
//! with mode 0644. Every failure mode (no match, out-of-range line,
//! invalid regex) is detected before the write, so a failed edit leaves
//! the file untouched.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{ConfigError, HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    Insert,
    Replace,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Plain,
    Regex,
    Line,
}

pub struct FileEditStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    path: String,
    edit: Edit,
}

/// The pure transformation, independent of where the file lives.
#[derive(Debug, Clone)]
pub struct Edit {
    pub operation: EditOperation,
    pub position: InsertPosition,
    pub match_type: MatchType,
    pub pattern: String,
    pub line_number: usize,
    pub content: String,
    pub use_captures: bool,
}

impl Edit {
    /// Apply the edit to a file's content.
    pub fn apply(&self, content: &str) -> Result<String> {
        match self.operation {
            EditOperation::Insert => self.insert(content),
            EditOperation::Replace => self.replace(content),
            EditOperation::Remove => self.remove(content),
        }
    }

    fn insert(&self, content: &str) -> Result<String> {
        match self.match_type {
            MatchType::Line => self.insert_by_line(content),
            MatchType::Plain => {
                let idx = content.find(&self.pattern).ok_or_else(|| {
                    HarnessError::execution(format!("match not found: {}", self.pattern))
                })?;
                let split = match self.position {
                    InsertPosition::Before => idx,
                    InsertPosition::After => idx + self.pattern.len(),
                };
                Ok(format!(
                    "{}{}{}",
                    &content[..split],
                    self.content,
                    &content[split..]
                ))
            }
            MatchType::Regex => {
                let re = self.compile()?;
                let found = re.find(content).ok_or_else(|| {
                    HarnessError::execution(format!("regex match not found: {}", self.pattern))
                })?;
                let split = match self.position {
                    InsertPosition::Before => found.start(),
                    InsertPosition::After => found.end(),
                };
                Ok(format!(
                    "{}{}{}",
                    &content[..split],
                    self.content,
                    &content[split..]
                ))
            }
        }
    }

    fn insert_by_line(&self, content: &str) -> Result<String> {
        let lines: Vec<&str> = content.split('\n').collect();
        if self.line_number < 1 || self.line_number > lines.len() {
            return Err(HarnessError::execution(format!(
                "line number {} is out of range (1-{})",
                self.line_number,
                lines.len()
            )));
        }

        let idx = self.line_number - 1;
        let mut result: Vec<&str> = Vec::with_capacity(lines.len() + 1);
        let insert_lines: Vec<&str> = self.content.split('\n').collect();
        match self.position {
            InsertPosition::Before => {
                result.extend(&lines[..idx]);
                result.extend(&insert_lines);
                result.extend(&lines[idx..]);
            }
            InsertPosition::After => {
                result.extend(&lines[..=idx]);
                result.extend(&insert_lines);
                result.extend(&lines[idx + 1..]);
            }
        }
        Ok(result.join("\n"))
    }

    fn replace(&self, content: &str) -> Result<String> {
        match self.match_type {
            MatchType::Plain => {
                if !content.contains(&self.pattern) {
                    return Err(HarnessError::execution(format!(
                        "match not found: {}",
                        self.pattern
                    )));
                }
                Ok(content.replace(&self.pattern, &self.content))
            }
            MatchType::Regex => {
                let re = self.compile()?;
                if !re.is_match(content) {
                    return Err(HarnessError::execution(format!(
                        "regex match not found: {}",
                        self.pattern
                    )));
                }
                if self.use_captures {
                    Ok(self.replace_with_captures(content, &re))
                } else {
                    Ok(re.replace_all(content, regex::NoExpand(&self.content)).into_owned())
                }
            }
            MatchType::Line => Err(HarnessError::execution(
                "unsupported match type for replace: line",
            )),
        }
    }

    /// Substitute capture references in the replacement: named `${name}`
    /// groups first, then numbered `$n`/`${n}` from highest index to
    /// lowest so `$1` never clips `$10`.
    fn replace_with_captures(&self, content: &str, re: &regex::Regex) -> String {
        re.replace_all(content, |caps: &regex::Captures<'_>| {
            let mut replacement = self.content.clone();

            for name in re.capture_names().flatten() {
                let value = caps.name(name).map(|m| m.as_str()).unwrap_or_default();
                replacement = replacement.replace(&format!("${{{name}}}"), value);
            }

            for idx in (0..caps.len()).rev() {
                let value = caps.get(idx).map(|m| m.as_str()).unwrap_or_default();
                replacement = replacement.replace(&format!("${{{idx}}}"), value);
                replacement = replacement.replace(&format!("${idx}"), value);
            }

            replacement
        })
        .into_owned()
    }

    fn remove(&self, content: &str) -> Result<String> {
        match self.match_type {
            MatchType::Plain => {
                if !content.contains(&self.pattern) {
                    return Err(HarnessError::execution(format!(
                        "match not found: {}",
                        self.pattern
                    )));
                }
                Ok(content.replace(&self.pattern, ""))
            }
            MatchType::Regex => {
                let re = self.compile()?;
                if !re.is_match(content) {
                    return Err(HarnessError::execution(format!(
                        "regex match not found: {}",
                        self.pattern
                    )));
                }
                Ok(re.replace_all(content, "").into_owned())
            }
            MatchType::Line => Err(HarnessError::execution(
                "unsupported match type for remove: line",
            )),
        }
    }

    fn compile(&self) -> Result<regex::Regex> {
        regex::Regex::new(&self.pattern)
            .map_err(|err| HarnessError::execution(format!("invalid regex: {err}")))
    }
}

impl FileEditStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        let path = bag.required_str("path")?;

        let operation = match bag.str("operation").as_deref() {
            Some("insert") => EditOperation::Insert,
            Some("replace") => EditOperation::Replace,
            Some("remove") => EditOperation::Remove,
            other => {
                return Err(ConfigError::new(
                    format!(
                        "invalid edit operation {:?} in step {:?}",
                        other.unwrap_or(""),
                        cfg.name
                    ),
                    cfg.loc.clone(),
                )
                .into())
            }
        };

        let position = match bag.str("position").as_deref() {
            Some("before") => InsertPosition::Before,
            Some("after") | None => InsertPosition::After,
            Some(other) => {
                return Err(ConfigError::new(
                    format!("invalid insert position {other:?} in step {:?}", cfg.name),
                    cfg.loc.clone(),
                )
                .into())
            }
        };

        let match_type = match bag.str("match_type").as_deref() {
            Some("plain") | None => MatchType::Plain,
            Some("regex") => MatchType::Regex,
            Some("line") => MatchType::Line,
            Some(other) => {
                return Err(ConfigError::new(
                    format!("invalid match type {other:?} in step {:?}", cfg.name),
                    cfg.loc.clone(),
                )
                .into())
            }
        };

        let pattern = bag.str("match").unwrap_or_default();
        if match_type != MatchType::Line && pattern.is_empty() {
            return Err(ConfigError::new(
                format!("match pattern is required in step {:?}", cfg.name),
                cfg.loc.clone(),
            )
            .into());
        }

        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            path,
            edit: Edit {
                operation,
                position,
                match_type,
                pattern,
                line_number: bag.int("line_number").unwrap_or(0).max(0) as usize,
                content: bag.str("content").unwrap_or_default(),
                use_captures: bag.bool("use_captures"),
            },
        })
    }
}

#[async_trait]
impl Step for FileEditStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        let mut read = self.node.execute(&format!("cat '{}'", self.path)).await?;
        if read.exit_code != 0 {
            handle.error();
            let stderr = read.stderr.read_all();
            return Err(HarnessError::execution(format!(
                "failed to read file: {}",
                stderr.trim()
            )));
        }
        let original = read.stdout.read_all();

        let edited = match self.edit.apply(&original) {
            Ok(edited) => edited,
            Err(err) => {
                handle.error();
                return Err(err);
            }
        };

        let encoded = base64::engine::general_purpose::STANDARD.encode(edited.as_bytes());
        let command = format!(
            "echo '{encoded}' | base64 -d > '{path}' && chmod 0644 '{path}'",
            path = self.path,
        );
        let mut write = self.node.execute(&command).await?;
        if write.exit_code != 0 {
            handle.error();
            let stderr = write.stderr.read_all();
            return Err(HarnessError::execution(format!(
                "failed to write file: {}",
                stderr.trim()
            )));
        }

        handle.complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(operation: EditOperation, match_type: MatchType) -> Edit {
        Edit {
            operation,
            position: InsertPosition::After,
            match_type,
            pattern: String::new(),
            line_number: 0,
            content: String::new(),
            use_captures: false,
        }
    }

    #[test]
    fn insert_after_plain_match() {
        let mut e = edit(EditOperation::Insert, MatchType::Plain);
        e.pattern = "alpha".into();
        e.content = "-NEW".into();
        assert_eq!(e.apply("alpha beta").unwrap(), "alpha-NEW beta");
    }

    #[test]
    fn insert_before_plain_match() {
        let mut e = edit(EditOperation::Insert, MatchType::Plain);
        e.position = InsertPosition::Before;
        e.pattern = "beta".into();
        e.content = "NEW-".into();
        assert_eq!(e.apply("alpha beta").unwrap(), "alpha NEW-beta");
    }

    #[test]
    fn insert_by_line_number() {
        let mut e = edit(EditOperation::Insert, MatchType::Line);
        e.line_number = 2;
        e.content = "between".into();
        assert_eq!(e.apply("one\ntwo\nthree").unwrap(), "one\ntwo\nbetween\nthree");

        e.position = InsertPosition::Before;
        assert_eq!(e.apply("one\ntwo\nthree").unwrap(), "one\nbetween\ntwo\nthree");
    }

    #[test]
    fn insert_line_out_of_range_fails() {
        let mut e = edit(EditOperation::Insert, MatchType::Line);
        e.line_number = 9;
        e.content = "x".into();
        let err = e.apply("only\nlines").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn insert_after_regex_match() {
        let mut e = edit(EditOperation::Insert, MatchType::Regex);
        e.pattern = r"port=\d+".into();
        e.content = " # configured".into();
        assert_eq!(
            e.apply("port=8080\nhost=x").unwrap(),
            "port=8080 # configured\nhost=x"
        );
    }

    #[test]
    fn replace_plain_replaces_all_occurrences() {
        let mut e = edit(EditOperation::Replace, MatchType::Plain);
        e.pattern = "old".into();
        e.content = "new".into();
        assert_eq!(e.apply("old old").unwrap(), "new new");
    }

    #[test]
    fn replace_missing_match_leaves_an_error() {
        let mut e = edit(EditOperation::Replace, MatchType::Plain);
        e.pattern = "ghost".into();
        e.content = "x".into();
        assert!(e.apply("nothing here").unwrap_err().to_string().contains("match not found"));
    }

    #[test]
    fn replace_regex_without_captures_is_literal() {
        let mut e = edit(EditOperation::Replace, MatchType::Regex);
        e.pattern = r"v\d+".into();
        e.content = "v2 ($1 stays literal)".into();
        assert_eq!(e.apply("v1").unwrap(), "v2 ($1 stays literal)");
    }

    #[test]
    fn replace_with_numbered_captures() {
        let mut e = edit(EditOperation::Replace, MatchType::Regex);
        e.use_captures = true;
        e.pattern = r"(\w+)=(\w+)".into();
        e.content = "$2=$1".into();
        assert_eq!(e.apply("key=value").unwrap(), "value=key");
    }

    #[test]
    fn replace_with_named_captures() {
        let mut e = edit(EditOperation::Replace, MatchType::Regex);
        e.use_captures = true;
        e.pattern = r"(?P<key>\w+)=(?P<val>\w+)".into();
        e.content = "${val}:${key}".into();
        assert_eq!(e.apply("port=8080").unwrap(), "8080:port");
    }

    #[test]
    fn high_indexed_captures_do_not_clip_low_ones() {
        let mut e = edit(EditOperation::Replace, MatchType::Regex);
        e.use_captures = true;
        e.pattern = r"(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)(k)".into();
        e.content = "$11-$1".into();
        assert_eq!(e.apply("abcdefghijk").unwrap(), "k-a");
    }

    #[test]
    fn remove_plain_and_regex() {
        let mut e = edit(EditOperation::Remove, MatchType::Plain);
        e.pattern = " DEBUG".into();
        assert_eq!(e.apply("log DEBUG line DEBUG").unwrap(), "log line");

        let mut e = edit(EditOperation::Remove, MatchType::Regex);
        e.pattern = r"#.*\n".into();
        assert_eq!(e.apply("# comment\ncode\n").unwrap(), "code\n");
    }

    #[test]
    fn invalid_regex_is_reported_before_any_write() {
        let mut e = edit(EditOperation::Replace, MatchType::Regex);
        e.pattern = "(unclosed".into();
        assert!(e.apply("text").unwrap_err().to_string().contains("invalid regex"));
    }

    #[test]
    fn line_match_is_rejected_for_replace_and_remove() {
        let e = edit(EditOperation::Replace, MatchType::Line);
        assert!(e.apply("x").unwrap_err().to_string().contains("unsupported match type"));
        let e = edit(EditOperation::Remove, MatchType::Line);
        assert!(e.apply("x").unwrap_err().to_string().contains("unsupported match type"));
    }
}
