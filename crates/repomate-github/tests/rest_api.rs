//! `GitHubForge` against a local stub of the GitHub REST API.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use regex::Regex;
use serde_json::{json, Value};

use repomate_core::{ForgeClient, IssueState, RepoSpec};
use repomate_github::{GitHubConfig, GitHubForge};

// ---------------------------------------------------------------------------
// Stub server
// ---------------------------------------------------------------------------

const ORG: &str = "course";
const TEAMS_ON_FIRST_PAGE: usize = 100;

#[derive(Default)]
struct Stub {
    existing_repos: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl Stub {
    fn with_repos(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            existing_repos: names.iter().map(|n| n.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn repo_json(name: &str) -> Value {
    json!({ "name": name, "html_url": format!("https://github.test/{ORG}/{name}") })
}

async fn create_repo(
    State(stub): State<Arc<Stub>>,
    Path(_org): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    stub.record(format!("POST repos {name}"));
    if stub.existing_repos.contains(&name) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": "Repository creation failed." })),
        );
    }
    (StatusCode::CREATED, Json(repo_json(&name)))
}

async fn get_repo(
    State(stub): State<Arc<Stub>>,
    Path((_org, repo)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    stub.record(format!("GET repo {repo}"));
    if stub.existing_repos.contains(&repo) {
        (StatusCode::OK, Json(repo_json(&repo)))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" })))
    }
}

async fn list_issues(
    State(stub): State<Arc<Stub>>,
    Path((_org, repo)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = query.get("state").cloned().unwrap_or_default();
    stub.record(format!("GET issues {repo} state={state}"));
    Json(json!([
        {
            "number": 1,
            "title": "Peer review",
            "body": "Please review lab 1.",
            "user": { "login": "alice" },
            "created_at": "2026-03-01T12:00:00Z",
            "state": "open"
        },
        {
            "number": 2,
            "title": "Fix typo",
            "body": null,
            "user": { "login": "bob" },
            "created_at": "2026-03-02T08:30:00Z",
            "state": "open",
            "pull_request": { "url": "https://github.test/api/pulls/2" }
        }
    ]))
}

async fn list_teams(
    State(stub): State<Arc<Stub>>,
    Path(_org): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    stub.record(format!("GET teams page={page}"));
    let ids = match page {
        1 => 0..TEAMS_ON_FIRST_PAGE,
        2 => TEAMS_ON_FIRST_PAGE..TEAMS_ON_FIRST_PAGE + 1,
        _ => 0..0,
    };
    let teams: Vec<Value> = ids
        .map(|id| json!({ "id": id, "name": format!("team-{id}"), "slug": format!("team-{id}") }))
        .collect();
    Json(Value::Array(teams))
}

async fn delete_team(
    State(stub): State<Arc<Stub>>,
    Path((_org, slug)): Path<(String, String)>,
) -> StatusCode {
    stub.record(format!("DELETE team {slug}"));
    StatusCode::NO_CONTENT
}

async fn serve(stub: Arc<Stub>) -> GitHubForge {
    let router = Router::new()
        .route("/orgs/:org/repos", post(create_repo))
        .route("/orgs/:org/teams", get(list_teams))
        .route("/orgs/:org/teams/:slug", delete(delete_team))
        .route("/repos/:org/:repo", get(get_repo))
        .route("/repos/:org/:repo/issues", get(list_issues))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });

    GitHubForge::new(GitHubConfig {
        base_url: format!("http://{addr}"),
        org: ORG.to_string(),
        token: "test-token".to_string(),
    })
    .expect("forge")
}

fn spec(name: &str) -> RepoSpec {
    RepoSpec {
        name: name.to_string(),
        description: format!("{name} for tests"),
        private: true,
        team_id: 7,
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_repos_looks_up_existing_repo_on_422() {
    let stub = Stub::with_repos(&["alice--lab1"]);
    let forge = serve(stub.clone()).await;

    let urls = forge
        .create_repos(&[spec("alice--lab1"), spec("bob--lab1")])
        .await
        .expect("create_repos");

    assert_eq!(
        urls,
        vec![
            "https://github.test/course/alice--lab1".to_string(),
            "https://github.test/course/bob--lab1".to_string(),
        ]
    );
    assert_eq!(
        stub.calls(),
        vec![
            "POST repos alice--lab1".to_string(),
            "GET repo alice--lab1".to_string(),
            "POST repos bob--lab1".to_string(),
        ]
    );
}

#[tokio::test]
async fn get_repo_urls_skips_missing_repos() {
    let stub = Stub::with_repos(&["alice--lab1"]);
    let forge = serve(stub.clone()).await;

    let urls = forge
        .get_repo_urls(&["ghost--lab1".to_string(), "alice--lab1".to_string()])
        .await
        .expect("get_repo_urls");

    assert_eq!(urls, vec!["https://github.test/course/alice--lab1".to_string()]);
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_teams_pages_through_teams_and_ignores_missing_ones() {
    let stub = Stub::with_repos(&[]);
    let forge = serve(stub.clone()).await;

    forge
        .delete_teams(&[
            "team-3".to_string(),
            "team-100".to_string(),
            "ghost--lab1--review".to_string(),
        ])
        .await
        .expect("delete_teams");

    let calls = stub.calls();
    assert_eq!(
        calls,
        vec![
            "GET teams page=1".to_string(),
            "GET teams page=2".to_string(),
            "DELETE team team-3".to_string(),
            "DELETE team team-100".to_string(),
        ]
    );
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_issues_filters_out_pull_requests() {
    let stub = Stub::with_repos(&["alice--lab1"]);
    let forge = serve(stub.clone()).await;

    let issues = forge
        .get_issues("alice--lab1", IssueState::All, &Regex::new("").unwrap())
        .await
        .expect("get_issues");

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].number, 1);
    assert_eq!(issues[0].author, "alice");
    assert_eq!(issues[0].body, "Please review lab 1.");
    assert_eq!(stub.calls(), vec!["GET issues alice--lab1 state=all".to_string()]);
}
