//! Opening, closing and listing issues across student repos.
//!
//! The repos addressed are always the (master, student) cross product.
//! Listing is a lazy stream over repos: the title filter runs at the forge,
//! the author filter here.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::domain::{Issue, IssueRecord, IssueState};
use crate::error::{RepomateError, Result};
use crate::forge::{ForgeClient, ForgeError};
use crate::names::NameCodec;
use crate::obs;
use crate::review::validate_selection;

/// Column at which listing output wraps issue bodies.
pub const MAX_LINE_LENGTH: usize = 100;

/// Filters for [`IssueReporter::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueQuery {
    pub state: IssueState,
    /// Matched against titles; empty matches everything.
    pub title_regex: String,
    pub author: Option<String>,
    /// Keep issue bodies in the results. Bodies are cleared otherwise.
    pub include_body: bool,
}

/// Issues found in one repo. `found` is false when the repo does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIssues {
    pub repo_name: String,
    pub found: bool,
    pub issues: Vec<IssueRecord>,
}

pub struct IssueReporter {
    forge: Arc<dyn ForgeClient>,
    concurrency: usize,
}

impl IssueReporter {
    pub fn new(forge: Arc<dyn ForgeClient>) -> Self {
        Self {
            forge,
            concurrency: 8,
        }
    }

    /// Maximum number of repos queried at once while listing.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Open `issue` in every student repo. Returns the repo names addressed.
    pub async fn open(
        &self,
        issue: &Issue,
        master_repo_names: &[String],
        students: &[String],
    ) -> Result<Vec<String>> {
        let forge = self.forge.clone();
        async move {
            let repos = target_repos(master_repo_names, students)?;
            forge.open_issue(issue, &repos).await?;
            info!(event = "issues.opened", title = %issue.title, repos = repos.len());
            Ok::<_, RepomateError>(repos)
        }
        .instrument(obs::run_span("open-issues"))
        .await
    }

    /// Close every open issue whose title matches `title_regex` in every
    /// student repo. Returns the repo names addressed.
    pub async fn close(
        &self,
        title_regex: &str,
        master_repo_names: &[String],
        students: &[String],
    ) -> Result<Vec<String>> {
        let forge = self.forge.clone();
        async move {
            let regex = compile(title_regex)?;
            let repos = target_repos(master_repo_names, students)?;
            forge.close_issue(&regex, &repos).await?;
            info!(event = "issues.closed", title_regex = %title_regex, repos = repos.len());
            Ok::<_, RepomateError>(repos)
        }
        .instrument(obs::run_span("close-issues"))
        .await
    }

    /// Issues per student repo, in cross-product order. Repos without
    /// matches yield an empty entry.
    pub async fn list(
        &self,
        master_repo_names: &[String],
        students: &[String],
        query: &IssueQuery,
    ) -> Result<Vec<RepoIssues>> {
        let span = obs::run_span("list-issues");
        let repos = target_repos(master_repo_names, students)?;
        let regex = compile(&query.title_regex)?;
        let mut results: Vec<RepoIssues> = self
            .issue_stream(repos, query.state, regex, query.author.clone())
            .try_collect()
            .instrument(span)
            .await?;
        if !query.include_body {
            for issue in results.iter_mut().flat_map(|r| r.issues.iter_mut()) {
                issue.body.clear();
            }
        }
        Ok(results)
    }

    /// Lazily query each repo, at most `concurrency` at a time, keeping
    /// input order.
    pub fn issue_stream(
        &self,
        repo_names: Vec<String>,
        state: IssueState,
        title_regex: Regex,
        author: Option<String>,
    ) -> impl Stream<Item = Result<RepoIssues>> + Send + 'static {
        let forge = self.forge.clone();
        stream::iter(repo_names)
            .map(move |repo_name| {
                let forge = forge.clone();
                let title_regex = title_regex.clone();
                let author = author.clone();
                async move {
                    match forge.get_issues(&repo_name, state, &title_regex).await {
                        Ok(issues) => {
                            let issues: Vec<IssueRecord> = issues
                                .into_iter()
                                .filter(|issue| {
                                    author.as_deref().map_or(true, |a| issue.author == a)
                                })
                                .collect();
                            if issues.is_empty() {
                                warn!(repo = %repo_name, "no matching issues");
                            }
                            Ok(RepoIssues {
                                repo_name,
                                found: true,
                                issues,
                            })
                        }
                        Err(ForgeError::NotFound(_)) => {
                            warn!(repo = %repo_name, "repository not found");
                            Ok(RepoIssues {
                                repo_name,
                                found: false,
                                issues: Vec::new(),
                            })
                        }
                        Err(e) => Err(RepomateError::from(e)),
                    }
                }
            })
            .buffered(self.concurrency)
    }
}

fn target_repos(master_repo_names: &[String], students: &[String]) -> Result<Vec<String>> {
    validate_selection(master_repo_names, students)?;
    NameCodec::student_repo_names(students, master_repo_names)
}

fn compile(title_regex: &str) -> Result<Regex> {
    Regex::new(title_regex).map_err(|e| {
        RepomateError::InvalidArgument(format!("invalid title regex '{title_regex}': {e}"))
    })
}

/// Render a listing: one `repo/#number:` line per issue with aligned titles,
/// optionally followed by the wrapped body.
pub fn format_listing(results: &[RepoIssues], include_body: bool) -> String {
    let width = results
        .iter()
        .map(|r| r.repo_name.len())
        .max()
        .unwrap_or(0)
        + 6;

    let mut out = Vec::new();
    for repo in results {
        if !repo.found {
            out.push(format!("{}: repository not found", repo.repo_name));
            continue;
        }
        if repo.issues.is_empty() {
            out.push(format!("{}: no matching issues", repo.repo_name));
            continue;
        }
        for issue in &repo.issues {
            let id = format!("{}/#{}:", repo.repo_name, issue.number);
            out.push(format!(
                "{id:<width$}{} created {} by {}",
                issue.title,
                issue.created_at.format("%Y-%m-%d %H:%M:%S"),
                issue.author,
            ));
            if include_body && !issue.body.is_empty() {
                out.push(String::new());
                out.push(limit_line_length(&issue.body, MAX_LINE_LENGTH));
                out.push(String::new());
            }
        }
    }
    out.join("\n")
}

/// Wrap every line of `text` to at most `max` characters, breaking at the
/// last whitespace before the limit, or hard at the limit when a line has
/// none.
pub fn limit_line_length(text: &str, max: usize) -> String {
    let max = max.max(1);
    let mut out = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        let mut cur = 0;
        while chars.len() - cur > max {
            let window = &chars[cur..=cur + max];
            match window.iter().rposition(|c| c.is_whitespace()).filter(|i| *i > 0) {
                Some(i) => {
                    out.push(chars[cur..cur + i].iter().collect::<String>());
                    cur += i + 1;
                }
                None => {
                    out.push(chars[cur..cur + max].iter().collect::<String>());
                    cur += max;
                }
            }
        }
        out.push(chars[cur..].iter().collect::<String>());
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(number: u64, title: &str, author: &str) -> IssueRecord {
        IssueRecord {
            number,
            title: title.to_string(),
            body: String::new(),
            author: author.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            state: IssueState::Open,
        }
    }

    #[test]
    fn test_wraps_on_whitespace() {
        assert_eq!(limit_line_length("aaa bbb ccc", 7), "aaa bbb\nccc");
    }

    #[test]
    fn test_hard_wraps_long_words() {
        assert_eq!(limit_line_length("abcdefghij", 4), "abcd\nefgh\nij");
    }

    #[test]
    fn test_short_lines_untouched() {
        let text = "first line\nsecond line";
        assert_eq!(limit_line_length(text, MAX_LINE_LENGTH), text);
    }

    #[test]
    fn test_wrapped_lines_respect_limit() {
        let text = "lorem ipsum dolor sit amet ".repeat(20);
        for line in limit_line_length(&text, 40).lines() {
            assert!(line.chars().count() <= 40, "line too long: {line:?}");
        }
    }

    #[test]
    fn test_format_listing_aligns_titles() {
        let results = vec![
            RepoIssues {
                repo_name: "alice--lab1".to_string(),
                found: true,
                issues: vec![record(3, "Grading", "ta1")],
            },
            RepoIssues {
                repo_name: "bo--lab1".to_string(),
                found: true,
                issues: vec![record(12, "Grading", "ta1")],
            },
            RepoIssues {
                repo_name: "carol--lab1".to_string(),
                found: true,
                issues: vec![],
            },
        ];
        let listing = format_listing(&results, false);
        let lines: Vec<&str> = listing.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].find("Grading"), lines[1].find("Grading"));
        assert!(lines[0].starts_with("alice--lab1/#3:"));
        assert!(lines[0].ends_with("created 2026-03-01 12:00:00 by ta1"));
        assert_eq!(lines[2], "carol--lab1: no matching issues");
    }

    #[test]
    fn test_format_listing_includes_wrapped_body() {
        let mut issue = record(1, "Feedback", "ta1");
        issue.body = "word ".repeat(40);
        let results = vec![RepoIssues {
            repo_name: "alice--lab1".to_string(),
            found: true,
            issues: vec![issue],
        }];

        let listing = format_listing(&results, true);
        assert!(listing.lines().count() > 3);
        assert!(listing.lines().all(|l| l.chars().count() <= MAX_LINE_LENGTH));
    }

    #[test]
    fn test_invalid_regex_is_invalid_argument() {
        assert!(matches!(compile("(unclosed"), Err(RepomateError::InvalidArgument(_))));
        assert!(compile("").unwrap().is_match("anything"));
    }
}
