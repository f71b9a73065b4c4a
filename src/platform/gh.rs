use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{FeedbackItem, Platform, PrInfo, PrRequest};
use crate::errors::PlatformError;
use crate::runner::{CommandSpec, run_command};
use crate::signals::is_all_clear;

const GH_TIMEOUT: Duration = Duration::from_secs(120);

const THREADS_QUERY: &str = r#"query($owner: String!, $repo: String!, $number: Int!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      reviewThreads(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          isResolved
          isOutdated
          path
          line
          comments(first: 1) { nodes { author { login } body } }
        }
      }
    }
  }
}"#;

const REPLY_MUTATION: &str = r#"mutation($thread: ID!, $body: String!) {
  addPullRequestReviewThreadReply(input: {pullRequestReviewThreadId: $thread, body: $body}) {
    comment { id }
  }
}"#;

const RESOLVE_MUTATION: &str = r#"mutation($thread: ID!) {
  resolveReviewThread(input: {threadId: $thread}) { thread { isResolved } }
}"#;

/// GitHub access through the user's authenticated `gh` CLI.
pub struct GhCli {
    program: String,
    cwd: PathBuf,
}

impl GhCli {
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            program: "gh".to_string(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn gh(&self, args: Vec<String>, stdin: Option<&str>) -> Result<String, PlatformError> {
        let mut spec = CommandSpec::new(&self.program, &args)
            .cwd(&self.cwd)
            .timeout(GH_TIMEOUT);
        if let Some(input) = stdin {
            spec = spec.stdin(input);
        }
        let command = format!("{} {}", self.program, args.first().map(String::as_str).unwrap_or(""));
        debug!(command = %command, "Running gh");

        let outcome = run_command(&spec).await.map_err(|e| PlatformError::Spawn {
            command: command.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        if !outcome.success() {
            return Err(PlatformError::CommandFailed {
                command,
                stderr: outcome.failure_detail(),
            });
        }
        Ok(outcome.stdout)
    }

    /// `typed` go through `-F` (numbers, `{owner}` placeholders); `raw` through `-f`.
    async fn graphql(
        &self,
        query: &str,
        typed: &[(&str, String)],
        raw: &[(&str, String)],
    ) -> Result<String, PlatformError> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={}", query),
        ];
        for (flag, fields) in [("-F", typed), ("-f", raw)] {
            for (key, value) in fields {
                args.push(flag.to_string());
                args.push(format!("{}={}", key, value));
            }
        }
        self.gh(args, None).await
    }

    async fn pr_activity(&self, pr: u64) -> Result<PrActivity, PlatformError> {
        let stdout = self
            .gh(
                vec![
                    "pr".to_string(),
                    "view".to_string(),
                    pr.to_string(),
                    "--json".to_string(),
                    "comments,reviews,commits".to_string(),
                ],
                None,
            )
            .await?;
        parse_json(&stdout, "pr view")
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(text: &str, what: &str) -> Result<T, PlatformError> {
    serde_json::from_str(text).map_err(|e| PlatformError::Parse {
        what: what.to_string(),
        message: e.to_string(),
    })
}

/// PR number from a URL such as `https://github.com/o/r/pull/123`.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
}

fn is_no_commits(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no commits between")
}

/// `coderabbitai[bot]` and `CodeRabbitAI` both match `coderabbitai`.
pub fn author_matches(login: &str, authors: &[String]) -> bool {
    let login = login.trim_end_matches("[bot]");
    authors
        .iter()
        .any(|a| a.trim_end_matches("[bot]").eq_ignore_ascii_case(login))
}

#[derive(Debug, Deserialize)]
struct Author {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ListedPr {
    number: u64,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrActivity {
    comments: Vec<ActivityComment>,
    reviews: Vec<ActivityReview>,
    commits: Vec<ActivityCommit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityComment {
    author: Option<Author>,
    #[serde(default)]
    body: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityReview {
    author: Option<Author>,
    #[serde(default)]
    body: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityCommit {
    committed_date: Option<DateTime<Utc>>,
}

impl PrActivity {
    fn head_commit_time(&self) -> Option<DateTime<Utc>> {
        self.commits.last().and_then(|c| c.committed_date)
    }

    /// (author, body, time) for every comment and review.
    fn posts(&self) -> impl Iterator<Item = (&str, &str, Option<DateTime<Utc>>)> {
        let comments = self.comments.iter().map(|c| {
            (
                c.author.as_ref().map(|a| a.login.as_str()).unwrap_or(""),
                c.body.as_str(),
                c.created_at,
            )
        });
        let reviews = self.reviews.iter().map(|r| {
            (
                r.author.as_ref().map(|a| a.login.as_str()).unwrap_or(""),
                r.body.as_str(),
                r.submitted_at,
            )
        });
        comments.chain(reviews)
    }

    fn has_all_clear_since(&self, reviewer: &str, after: DateTime<Utc>) -> bool {
        let reviewer = [reviewer.to_string()];
        self.posts().any(|(author, body, at)| {
            author_matches(author, &reviewer) && at.is_some_and(|t| t > after) && is_all_clear(body)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    data: ThreadsData,
}

#[derive(Debug, Deserialize)]
struct ThreadsData {
    repository: Option<ThreadsRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsRepository {
    pull_request: Option<ThreadsPullRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsPullRequest {
    review_threads: ThreadConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<ThreadNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadNode {
    id: String,
    is_resolved: bool,
    #[serde(default)]
    is_outdated: bool,
    path: Option<String>,
    line: Option<u64>,
    comments: CommentConnection,
}

#[derive(Debug, Deserialize)]
struct CommentConnection {
    #[serde(default)]
    nodes: Vec<ThreadComment>,
}

#[derive(Debug, Deserialize)]
struct ThreadComment {
    author: Option<Author>,
    #[serde(default)]
    body: String,
}

/// One page of review threads: the matching items and the next cursor.
fn parse_threads_page(
    text: &str,
    authors: &[String],
) -> Result<(Vec<FeedbackItem>, Option<String>), PlatformError> {
    let response: ThreadsResponse = parse_json(text, "review threads")?;
    let Some(connection) = response
        .data
        .repository
        .and_then(|r| r.pull_request)
        .map(|p| p.review_threads)
    else {
        return Err(PlatformError::Parse {
            what: "review threads".to_string(),
            message: "pull request not found".to_string(),
        });
    };

    let items = connection
        .nodes
        .into_iter()
        .filter(|t| !t.is_resolved && !t.is_outdated)
        .filter_map(|t| {
            let first = t.comments.nodes.into_iter().next()?;
            let author = first.author.map(|a| a.login).unwrap_or_default();
            if !author_matches(&author, authors) {
                return None;
            }
            Some(FeedbackItem {
                id: t.id,
                author,
                body: first.body,
                path: t.path,
                line: t.line,
            })
        })
        .collect();

    let next = if connection.page_info.has_next_page {
        connection.page_info.end_cursor
    } else {
        None
    };
    Ok((items, next))
}

#[async_trait]
impl Platform for GhCli {
    async fn find_open_pr(&self, branch: &str) -> Result<Option<PrInfo>, PlatformError> {
        let stdout = self
            .gh(
                vec![
                    "pr".to_string(),
                    "list".to_string(),
                    "--head".to_string(),
                    branch.to_string(),
                    "--state".to_string(),
                    "open".to_string(),
                    "--json".to_string(),
                    "number,url".to_string(),
                    "--limit".to_string(),
                    "1".to_string(),
                ],
                None,
            )
            .await?;
        let listed: Vec<ListedPr> = parse_json(&stdout, "pr list")?;
        Ok(listed.into_iter().next().map(|pr| PrInfo {
            number: pr.number,
            url: pr.url,
        }))
    }

    async fn create_pr(&self, request: &PrRequest) -> Result<PrInfo, PlatformError> {
        info!(
            base = %request.base,
            head = %request.head,
            title = %request.title,
            "Creating pull request"
        );
        let mut args = vec![
            "pr".to_string(),
            "create".to_string(),
            "--title".to_string(),
            request.title.clone(),
            "--body".to_string(),
            request.body.clone(),
            "--base".to_string(),
            request.base.clone(),
            "--head".to_string(),
            request.head.clone(),
        ];
        if request.draft {
            args.push("--draft".to_string());
        }

        let stdout = match self.gh(args, None).await {
            Ok(stdout) => stdout,
            Err(PlatformError::CommandFailed { stderr, .. }) if is_no_commits(&stderr) => {
                return Err(PlatformError::NoCommits {
                    base: request.base.clone(),
                    head: request.head.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        let url = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with("http"))
            .unwrap_or_default()
            .to_string();
        let number = pr_number_from_url(&url).ok_or_else(|| PlatformError::Parse {
            what: "pr create".to_string(),
            message: format!("no pull request URL in output: {}", stdout.trim()),
        })?;
        debug!(number, url = %url, "Created pull request");
        Ok(PrInfo {
            number,
            url: Some(url),
        })
    }

    async fn comment(&self, pr: u64, body: &str) -> Result<(), PlatformError> {
        self.gh(
            vec![
                "pr".to_string(),
                "comment".to_string(),
                pr.to_string(),
                "--body-file".to_string(),
                "-".to_string(),
            ],
            Some(body),
        )
        .await
        .map(|_| ())
    }

    async fn has_comment_with_marker(&self, pr: u64, marker: &str) -> Result<bool, PlatformError> {
        let activity = self.pr_activity(pr).await?;
        Ok(activity.comments.iter().any(|c| c.body.contains(marker)))
    }

    async fn unresolved_feedback(
        &self,
        pr: u64,
        authors: &[String],
    ) -> Result<Vec<FeedbackItem>, PlatformError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let typed = [
                ("owner", "{owner}".to_string()),
                ("repo", "{repo}".to_string()),
                ("number", pr.to_string()),
            ];
            let raw: Vec<(&str, String)> = cursor.iter().map(|c| ("cursor", c.clone())).collect();
            let stdout = self.graphql(THREADS_QUERY, &typed, &raw).await?;
            let (page, next) = parse_threads_page(&stdout, authors)?;
            items.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    async fn reply(&self, item: &FeedbackItem, body: &str) -> Result<(), PlatformError> {
        self.graphql(
            REPLY_MUTATION,
            &[],
            &[("thread", item.id.clone()), ("body", body.to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn resolve(&self, item: &FeedbackItem) -> Result<(), PlatformError> {
        self.graphql(RESOLVE_MUTATION, &[], &[("thread", item.id.clone())])
            .await
            .map(|_| ())
    }

    async fn head_commit_time(&self, pr: u64) -> Result<Option<DateTime<Utc>>, PlatformError> {
        Ok(self.pr_activity(pr).await?.head_commit_time())
    }

    async fn has_all_clear_since(
        &self,
        pr: u64,
        reviewer: &str,
        after: DateTime<Utc>,
    ) -> Result<bool, PlatformError> {
        Ok(self.pr_activity(pr).await?.has_all_clear_since(reviewer, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authors() -> Vec<String> {
        vec!["coderabbitai".to_string()]
    }

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(
            pr_number_from_url("https://github.com/o/r/pull/123\n"),
            Some(123)
        );
        assert_eq!(pr_number_from_url("https://github.com/o/r/pull/9/"), Some(9));
        assert_eq!(pr_number_from_url("not a url"), None);
    }

    #[test]
    fn test_author_matches_bot_suffix_and_case() {
        assert!(author_matches("coderabbitai[bot]", &authors()));
        assert!(author_matches("CodeRabbitAI", &authors()));
        assert!(!author_matches("someone", &authors()));
    }

    #[test]
    fn test_no_commits_detection() {
        assert!(is_no_commits(
            "pull request create failed: GraphQL: No commits between main and feat (createPullRequest)"
        ));
        assert!(!is_no_commits("authentication required"));
    }

    #[test]
    fn test_parse_threads_page_filters_resolved_outdated_and_authors() {
        let json = r#"{
          "data": {"repository": {"pullRequest": {"reviewThreads": {
            "pageInfo": {"hasNextPage": true, "endCursor": "CUR1"},
            "nodes": [
              {"id": "T1", "isResolved": false, "isOutdated": false, "path": "src/a.rs", "line": 3,
               "comments": {"nodes": [{"author": {"login": "coderabbitai"}, "body": "Rename x"}]}},
              {"id": "T2", "isResolved": true, "isOutdated": false, "path": "src/a.rs", "line": 9,
               "comments": {"nodes": [{"author": {"login": "coderabbitai"}, "body": "done"}]}},
              {"id": "T3", "isResolved": false, "isOutdated": true, "path": null, "line": null,
               "comments": {"nodes": [{"author": {"login": "coderabbitai"}, "body": "old"}]}},
              {"id": "T4", "isResolved": false, "isOutdated": false, "path": null, "line": null,
               "comments": {"nodes": [{"author": {"login": "human"}, "body": "nit"}]}}
            ]
          }}}}
        }"#;
        let (items, next) = parse_threads_page(json, &authors()).unwrap();
        assert_eq!(next.as_deref(), Some("CUR1"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "T1");
        assert_eq!(items[0].location().as_deref(), Some("src/a.rs:3"));
    }

    #[test]
    fn test_parse_threads_page_missing_pr_is_error() {
        let json = r#"{"data": {"repository": {"pullRequest": null}}}"#;
        assert!(matches!(
            parse_threads_page(json, &authors()),
            Err(PlatformError::Parse { .. })
        ));
    }

    #[test]
    fn test_all_clear_must_postdate_head_commit() {
        let json = r#"{
          "comments": [
            {"author": {"login": "coderabbitai"}, "body": "No actionable comments were generated", "createdAt": "2026-01-01T10:00:00Z"},
            {"author": {"login": "someone"}, "body": "lgtm", "createdAt": "2026-01-01T12:00:00Z"}
          ],
          "reviews": [],
          "commits": [
            {"oid": "a", "committedDate": "2026-01-01T09:00:00Z"},
            {"oid": "b", "committedDate": "2026-01-01T11:00:00Z"}
          ]
        }"#;
        let activity: PrActivity = parse_json(json, "pr view").unwrap();
        let head = activity.head_commit_time().unwrap();
        assert_eq!(head.to_rfc3339(), "2026-01-01T11:00:00+00:00");
        assert!(!activity.has_all_clear_since("coderabbitai", head));

        let earlier = "2026-01-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(activity.has_all_clear_since("coderabbitai", earlier));
    }
}
