//! [`ForgeClient`] over the GitHub REST API.
//!
//! Teams are addressed by name in the engine and by slug on the wire, so most
//! team operations start by listing the organization's teams.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use repomate_core::{
    ForgeClient, ForgeError, ForgeResult, Issue, IssueRecord, IssueState, Permission, RepoSpec,
    Review, Team, TeamMap,
};

use crate::types::{
    CreateIssue, CreateRepo, CreateTeam, ErrorJson, GrantPermission, IssueJson, RepoJson, TeamJson,
    UpdateIssueState, UserJson,
};

const PER_PAGE: usize = 100;
const USER_AGENT: &str = concat!("repomate/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`GitHubForge`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// REST API root, `https://api.github.com` or `https://<host>/api/v3`.
    pub base_url: String,
    pub org: String,
    pub token: String,
}

/// GitHub implementation of [`ForgeClient`].
pub struct GitHubForge {
    base_url: String,
    org: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GitHubForge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubForge")
            .field("base_url", &self.base_url)
            .field("org", &self.org)
            .finish_non_exhaustive()
    }
}

impl GitHubForge {
    pub fn new(config: GitHubConfig) -> ForgeResult<Self> {
        if config.token.trim().is_empty() {
            return Err(ForgeError::Config("empty OAuth token".to_string()));
        }
        if config.org.trim().is_empty() {
            return Err(ForgeError::Config("empty organization name".to_string()));
        }
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ForgeError::Config(format!(
                "base URL must be http(s): {}",
                config.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ForgeError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            org: config.org,
            token: config.token,
            http,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> ForgeResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ForgeError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ForgeResult<T> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        decode(response).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ForgeResult<Response> {
        self.send(self.request(method, path).json(body), path).await
    }

    /// Follow `page` until a short page comes back.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ForgeResult<Vec<T>> {
        let mut items = Vec::new();
        for page in 1.. {
            let page = page.to_string();
            let per_page = PER_PAGE.to_string();
            let request = self
                .request(Method::GET, path)
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page.as_str())]);
            let batch: Vec<T> = decode(self.send(request, path).await?).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }

    async fn teams_by_name(&self) -> ForgeResult<HashMap<String, TeamJson>> {
        let teams: Vec<TeamJson> = self
            .get_paginated(&format!("orgs/{}/teams", self.org), &[])
            .await?;
        Ok(teams.into_iter().map(|t| (t.name.clone(), t)).collect())
    }

    async fn team_members(&self, team: &TeamJson) -> ForgeResult<BTreeSet<String>> {
        let members: Vec<UserJson> = self
            .get_paginated(&format!("orgs/{}/teams/{}/members", self.org, team.slug), &[])
            .await?;
        Ok(members.into_iter().map(|u| u.login).collect())
    }

    async fn team_repos(&self, team: &TeamJson) -> ForgeResult<Vec<RepoJson>> {
        self.get_paginated(&format!("orgs/{}/teams/{}/repos", self.org, team.slug), &[])
            .await
    }

    async fn user_exists(&self, user: &str) -> ForgeResult<bool> {
        match self.get_json::<UserJson>(&format!("users/{user}")).await {
            Ok(_) => Ok(true),
            Err(ForgeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_team(&self, name: &str, permission: Permission) -> ForgeResult<TeamJson> {
        let body = CreateTeam {
            name,
            privacy: "closed",
            permission,
        };
        let response = self
            .send_json(Method::POST, &format!("orgs/{}/teams", self.org), &body)
            .await?;
        info!(team = %name, "created team");
        decode(response).await
    }

    async fn repo(&self, name: &str) -> ForgeResult<RepoJson> {
        self.get_json(&format!("repos/{}/{name}", self.org)).await
    }

    /// Issues in `repo`, pull requests excluded.
    async fn list_issues(&self, repo: &str, state: IssueState) -> ForgeResult<Vec<IssueJson>> {
        let issues: Vec<IssueJson> = self
            .get_paginated(
                &format!("repos/{}/{repo}/issues", self.org),
                &[("state", state.as_str())],
            )
            .await?;
        Ok(issues.into_iter().filter(|i| !i.is_pull_request()).collect())
    }

    async fn create_issue(
        &self,
        repo: &str,
        issue: &Issue,
        assignees: &[String],
    ) -> ForgeResult<()> {
        let body = CreateIssue {
            title: &issue.title,
            body: &issue.body,
            assignees,
        };
        self.send_json(Method::POST, &format!("repos/{}/{repo}/issues", self.org), &body)
            .await?;
        debug!(repo = %repo, title = %issue.title, "opened issue");
        Ok(())
    }
}

#[async_trait]
impl ForgeClient for GitHubForge {
    async fn ensure_teams_and_members(
        &self,
        members: &TeamMap,
        permission: Permission,
    ) -> ForgeResult<Vec<Team>> {
        let existing = self.teams_by_name().await?;
        let mut teams = Vec::with_capacity(members.len());
        for (name, wanted) in members {
            let team = match existing.get(name) {
                Some(team) => team.clone(),
                None => self.create_team(name, permission).await?,
            };
            let mut current = self.team_members(&team).await?;
            for member in wanted {
                if current.contains(member) {
                    continue;
                }
                if !self.user_exists(member).await? {
                    warn!(team = %name, member = %member, "user does not exist, skipping");
                    continue;
                }
                self.send_json(
                    Method::PUT,
                    &format!("orgs/{}/teams/{}/memberships/{member}", self.org, team.slug),
                    &serde_json::json!({ "role": "member" }),
                )
                .await?;
                current.insert(member.clone());
            }
            teams.push(Team::new(team.name, team.id).with_members(current));
        }
        Ok(teams)
    }

    async fn create_repos(&self, repos: &[RepoSpec]) -> ForgeResult<Vec<String>> {
        let mut urls = Vec::with_capacity(repos.len());
        for spec in repos {
            let body = CreateRepo {
                name: &spec.name,
                description: &spec.description,
                private: spec.private,
                team_id: spec.team_id,
            };
            let result = self
                .send_json(Method::POST, &format!("orgs/{}/repos", self.org), &body)
                .await;
            let url = match result {
                Ok(response) => {
                    let repo: RepoJson = decode(response).await?;
                    info!(repo = %repo.name, "created repo");
                    repo.html_url
                }
                Err(ForgeError::Api { status: 422, .. }) => {
                    debug!(repo = %spec.name, "repo already exists");
                    self.repo(&spec.name).await?.html_url
                }
                Err(e) => return Err(e),
            };
            urls.push(url);
        }
        Ok(urls)
    }

    async fn get_repo_urls(&self, names: &[String]) -> ForgeResult<Vec<String>> {
        let mut urls = Vec::with_capacity(names.len());
        for name in names {
            match self.repo(name).await {
                Ok(repo) => urls.push(repo.html_url),
                Err(ForgeError::NotFound(_)) => warn!(repo = %name, "repo not found"),
                Err(e) => return Err(e),
            }
        }
        Ok(urls)
    }

    async fn open_issue(&self, issue: &Issue, repo_names: &[String]) -> ForgeResult<()> {
        for repo in repo_names {
            self.create_issue(repo, issue, &[]).await?;
        }
        Ok(())
    }

    async fn close_issue(&self, title_regex: &Regex, repo_names: &[String]) -> ForgeResult<()> {
        for repo in repo_names {
            let issues = self.list_issues(repo, IssueState::Open).await?;
            for issue in issues.iter().filter(|i| title_regex.is_match(&i.title)) {
                self.send_json(
                    Method::PATCH,
                    &format!("repos/{}/{repo}/issues/{}", self.org, issue.number),
                    &UpdateIssueState { state: "closed" },
                )
                .await?;
                info!(repo = %repo, number = issue.number, "closed issue");
            }
        }
        Ok(())
    }

    async fn get_issues(
        &self,
        repo_name: &str,
        state: IssueState,
        title_regex: &Regex,
    ) -> ForgeResult<Vec<IssueRecord>> {
        let issues = self.list_issues(repo_name, state).await?;
        Ok(issues
            .into_iter()
            .filter(|i| title_regex.is_match(&i.title))
            .map(IssueJson::into_record)
            .collect())
    }

    async fn delete_teams(&self, names: &[String]) -> ForgeResult<()> {
        let existing = self.teams_by_name().await?;
        for name in names {
            let Some(team) = existing.get(name) else {
                continue;
            };
            let path = format!("orgs/{}/teams/{}", self.org, team.slug);
            match self.send(self.request(Method::DELETE, &path), &path).await {
                Ok(_) => info!(team = %name, "deleted team"),
                Err(ForgeError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn add_repos_to_review_teams(
        &self,
        team_repos: &TeamMap,
        issue: Option<&Issue>,
    ) -> ForgeResult<()> {
        let existing = self.teams_by_name().await?;
        for (team_name, repos) in team_repos {
            let team = existing
                .get(team_name)
                .ok_or_else(|| ForgeError::NotFound(format!("team {team_name}")))?;
            let assignees: Vec<String> = match issue {
                Some(_) => self.team_members(team).await?.into_iter().collect(),
                None => Vec::new(),
            };
            for repo in repos {
                self.send_json(
                    Method::PUT,
                    &format!("orgs/{0}/teams/{1}/repos/{0}/{repo}", self.org, team.slug),
                    &GrantPermission {
                        permission: Permission::Pull,
                    },
                )
                .await?;
                if let Some(issue) = issue {
                    self.create_issue(repo, issue, &assignees).await?;
                }
            }
        }
        Ok(())
    }

    async fn get_review_progress(
        &self,
        team_names: &[String],
        students: &[String],
        title_regex: &Regex,
    ) -> ForgeResult<BTreeMap<String, Vec<Review>>> {
        let existing = self.teams_by_name().await?;
        let mut progress: BTreeMap<String, Vec<Review>> = BTreeMap::new();
        for team_name in team_names {
            let Some(team) = existing.get(team_name) else {
                debug!(team = %team_name, "review team does not exist");
                continue;
            };
            let reviewers: Vec<String> = self
                .team_members(team)
                .await?
                .into_iter()
                .filter(|m| students.contains(m))
                .collect();
            for repo in self.team_repos(team).await? {
                let issues = self.list_issues(&repo.name, IssueState::All).await?;
                for reviewer in &reviewers {
                    let done = issues
                        .iter()
                        .any(|i| &i.user.login == reviewer && title_regex.is_match(&i.title));
                    progress
                        .entry(reviewer.clone())
                        .or_default()
                        .push(Review::new(repo.name.clone(), done));
                }
            }
        }
        Ok(progress)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ForgeResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ForgeError::Decode(e.to_string()))
}

/// Map a non-success status to a [`ForgeError`].
fn status_error(status: StatusCode, what: &str, body: &str) -> ForgeError {
    if status == StatusCode::NOT_FOUND {
        return ForgeError::NotFound(what.to_string());
    }
    let message = serde_json::from_str::<ErrorJson>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    ForgeError::Api {
        status: status.as_u16(),
        message,
    }
}
