//! In-memory fakes for the forge and git capabilities (testing only)
//!
//! `MemoryForge` keeps teams, repos and issues in a `Mutex`ed map and counts
//! every mutation. `ScriptedGit` materializes clones as plain directories and
//! fails the clones and pushes it was told to fail.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use crate::domain::{
    Issue, IssueRecord, IssueState, Permission, PushFailure, PushJob, RepoSpec, Review, Team,
};
use crate::forge::{ForgeClient, ForgeError, ForgeResult, TeamMap};
use crate::git::{GitError, GitResult, GitTransport};
use crate::names::NameCodec;

// ---------------------------------------------------------------------------
// MemoryForge
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredTeam {
    id: u64,
    permission: Permission,
    members: BTreeSet<String>,
    repos: BTreeMap<String, Permission>,
}

#[derive(Debug)]
struct StoredIssue {
    record: IssueRecord,
    assignees: BTreeSet<String>,
}

#[derive(Debug)]
struct StoredRepo {
    spec: RepoSpec,
    url: String,
    issues: Vec<StoredIssue>,
}

#[derive(Debug, Default)]
struct ForgeState {
    next_id: u64,
    teams: BTreeMap<String, StoredTeam>,
    repos: BTreeMap<String, StoredRepo>,
    mutations: usize,
}

impl ForgeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_issue(&mut self, repo: &str, issue: &Issue, author: &str, assignees: BTreeSet<String>) {
        if let Some(stored) = self.repos.get_mut(repo) {
            let number = stored.issues.len() as u64 + 1;
            stored.issues.push(StoredIssue {
                record: IssueRecord {
                    number,
                    title: issue.title.clone(),
                    body: issue.body.clone(),
                    author: author.to_string(),
                    created_at: Utc::now(),
                    state: IssueState::Open,
                },
                assignees,
            });
            self.mutations += 1;
        }
    }
}

/// In-memory [`ForgeClient`].
#[derive(Debug)]
pub struct MemoryForge {
    base_url: String,
    actor: String,
    unknown_users: BTreeSet<String>,
    fail_open_issue: bool,
    state: Mutex<ForgeState>,
}

impl Default for MemoryForge {
    fn default() -> Self {
        Self::new("https://forge.test/course")
    }
}

impl MemoryForge {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            actor: "repomate".to_string(),
            unknown_users: BTreeSet::new(),
            fail_open_issue: false,
            state: Mutex::new(ForgeState::default()),
        }
    }

    /// Usernames that do not resolve to an account.
    pub fn with_unknown_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unknown_users.extend(users.into_iter().map(Into::into));
        self
    }

    /// Make `open_issue` fail with a 502 without touching any repo.
    pub fn fail_open_issue(mut self) -> Self {
        self.fail_open_issue = true;
        self
    }

    /// Author recorded on issues opened through the client.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn url_for(&self, repo_name: &str) -> String {
        format!("{}/{}", self.base_url, repo_name)
    }

    /// Seed an existing repository without counting a mutation.
    pub fn seed_repo(&self, name: &str) -> String {
        let url = self.url_for(name);
        let mut state = self.state.lock().unwrap();
        state.repos.insert(
            name.to_string(),
            StoredRepo {
                spec: RepoSpec {
                    name: name.to_string(),
                    description: String::new(),
                    private: true,
                    team_id: 0,
                },
                url: url.clone(),
                issues: Vec::new(),
            },
        );
        url
    }

    /// Seed an issue authored by `author` without counting a mutation.
    pub fn seed_issue(&self, repo: &str, author: &str, title: &str, state: IssueState) {
        let mut guard = self.state.lock().unwrap();
        let before = guard.mutations;
        guard.push_issue(repo, &Issue::new(title, ""), author, BTreeSet::new());
        guard.mutations = before;
        if let Some(stored) = guard.repos.get_mut(repo) {
            if let Some(last) = stored.issues.last_mut() {
                last.record.state = state;
            }
        }
    }

    /// Number of state-changing operations performed through the client.
    pub fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn teams(&self) -> BTreeMap<String, Team> {
        let state = self.state.lock().unwrap();
        state
            .teams
            .iter()
            .map(|(name, t)| {
                (
                    name.clone(),
                    Team::new(name.clone(), t.id).with_members(t.members.iter().cloned()),
                )
            })
            .collect()
    }

    pub fn repo_names(&self) -> Vec<String> {
        self.state.lock().unwrap().repos.keys().cloned().collect()
    }

    pub fn repo_spec(&self, name: &str) -> Option<RepoSpec> {
        self.state.lock().unwrap().repos.get(name).map(|r| r.spec.clone())
    }

    /// Permission the team was created with.
    pub fn team_permission(&self, team: &str) -> Option<Permission> {
        self.state.lock().unwrap().teams.get(team).map(|t| t.permission)
    }

    /// Repositories granted to `team` and the permission held on each.
    pub fn team_repos(&self, team: &str) -> BTreeMap<String, Permission> {
        self.state
            .lock()
            .unwrap()
            .teams
            .get(team)
            .map(|t| t.repos.clone())
            .unwrap_or_default()
    }

    pub fn issues(&self, repo: &str) -> Vec<IssueRecord> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .map(|r| r.issues.iter().map(|i| i.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn issue_assignees(&self, repo: &str, number: u64) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .and_then(|r| r.issues.iter().find(|i| i.record.number == number))
            .map(|i| i.assignees.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ForgeClient for MemoryForge {
    async fn ensure_teams_and_members(
        &self,
        members: &TeamMap,
        permission: Permission,
    ) -> ForgeResult<Vec<Team>> {
        let mut state = self.state.lock().unwrap();
        let mut teams = Vec::with_capacity(members.len());
        for (name, wanted) in members {
            if !state.teams.contains_key(name) {
                let id = state.next_id();
                state.teams.insert(
                    name.clone(),
                    StoredTeam {
                        id,
                        permission,
                        members: BTreeSet::new(),
                        repos: BTreeMap::new(),
                    },
                );
                state.mutations += 1;
            }
            let mut added = 0;
            if let Some(team) = state.teams.get_mut(name) {
                for member in wanted {
                    if self.unknown_users.contains(member) {
                        continue;
                    }
                    if team.members.insert(member.clone()) {
                        added += 1;
                    }
                }
                teams.push(
                    Team::new(name.clone(), team.id).with_members(team.members.iter().cloned()),
                );
            }
            state.mutations += added;
        }
        Ok(teams)
    }

    async fn create_repos(&self, repos: &[RepoSpec]) -> ForgeResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let mut urls = Vec::with_capacity(repos.len());
        for spec in repos {
            if let Some(existing) = state.repos.get(&spec.name) {
                urls.push(existing.url.clone());
                continue;
            }
            let url = self.url_for(&spec.name);
            state.repos.insert(
                spec.name.clone(),
                StoredRepo {
                    spec: spec.clone(),
                    url: url.clone(),
                    issues: Vec::new(),
                },
            );
            if let Some(team) = state.teams.values_mut().find(|t| t.id == spec.team_id) {
                team.repos.insert(spec.name.clone(), Permission::Push);
            }
            state.mutations += 1;
            urls.push(url);
        }
        Ok(urls)
    }

    async fn get_repo_urls(&self, names: &[String]) -> ForgeResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(names
            .iter()
            .filter_map(|name| state.repos.get(name).map(|r| r.url.clone()))
            .collect())
    }

    async fn open_issue(&self, issue: &Issue, repo_names: &[String]) -> ForgeResult<()> {
        if self.fail_open_issue {
            return Err(ForgeError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        for repo in repo_names {
            state.push_issue(repo, issue, &self.actor, BTreeSet::new());
        }
        Ok(())
    }

    async fn close_issue(&self, title_regex: &Regex, repo_names: &[String]) -> ForgeResult<()> {
        let mut state = self.state.lock().unwrap();
        let mut closed = 0;
        for repo in repo_names {
            if let Some(stored) = state.repos.get_mut(repo) {
                for issue in stored.issues.iter_mut() {
                    if issue.record.state == IssueState::Open
                        && title_regex.is_match(&issue.record.title)
                    {
                        issue.record.state = IssueState::Closed;
                        closed += 1;
                    }
                }
            }
        }
        state.mutations += closed;
        Ok(())
    }

    async fn get_issues(
        &self,
        repo_name: &str,
        state: IssueState,
        title_regex: &Regex,
    ) -> ForgeResult<Vec<IssueRecord>> {
        let guard = self.state.lock().unwrap();
        let repo = guard
            .repos
            .get(repo_name)
            .ok_or_else(|| ForgeError::NotFound(format!("repository {repo_name}")))?;
        Ok(repo
            .issues
            .iter()
            .map(|i| &i.record)
            .filter(|r| state.admits(r.state) && title_regex.is_match(&r.title))
            .cloned()
            .collect())
    }

    async fn delete_teams(&self, names: &[String]) -> ForgeResult<()> {
        let mut state = self.state.lock().unwrap();
        for name in names {
            if state.teams.remove(name).is_some() {
                state.mutations += 1;
            }
        }
        Ok(())
    }

    async fn add_repos_to_review_teams(
        &self,
        team_repos: &TeamMap,
        issue: Option<&Issue>,
    ) -> ForgeResult<()> {
        let mut state = self.state.lock().unwrap();
        for (team_name, repos) in team_repos {
            let members = {
                let team = state
                    .teams
                    .get_mut(team_name)
                    .ok_or_else(|| ForgeError::NotFound(format!("team {team_name}")))?;
                for repo in repos {
                    team.repos.insert(repo.clone(), Permission::Pull);
                }
                team.members.clone()
            };
            state.mutations += repos.len();
            if let Some(issue) = issue {
                for repo in repos {
                    state.push_issue(repo, issue, &self.actor, members.clone());
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
        let state = self.state.lock().unwrap();
        let mut progress: BTreeMap<String, Vec<Review>> = BTreeMap::new();
        for team_name in team_names {
            let Some(team) = state.teams.get(team_name) else {
                continue;
            };
            for repo_name in team.repos.keys() {
                let issues = state
                    .repos
                    .get(repo_name)
                    .map(|r| r.issues.as_slice())
                    .unwrap_or_default();
                for member in team.members.iter().filter(|m| students.contains(m)) {
                    let done = issues
                        .iter()
                        .any(|i| {
                            &i.record.author == member && title_regex.is_match(&i.record.title)
                        });
                    progress
                        .entry(member.clone())
                        .or_default()
                        .push(Review::new(repo_name.clone(), done));
                }
            }
        }
        Ok(progress)
    }
}

// ---------------------------------------------------------------------------
// ScriptedGit
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GitLog {
    clone_dests: Vec<PathBuf>,
    cloned: Vec<String>,
    pushed: Vec<PushJob>,
}

/// [`GitTransport`] that clones into plain directories and fails on cue.
#[derive(Debug, Default)]
pub struct ScriptedGit {
    failing_clones: BTreeSet<String>,
    failing_pushes: BTreeSet<String>,
    log: Mutex<GitLog>,
}

impl ScriptedGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_clone(mut self, url: impl Into<String>) -> Self {
        self.failing_clones.insert(url.into());
        self
    }

    pub fn fail_push(mut self, url: impl Into<String>) -> Self {
        self.failing_pushes.insert(url.into());
        self
    }

    /// Destination directories clones were requested into.
    pub fn clone_dests(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().clone_dests.clone()
    }

    /// URLs successfully cloned.
    pub fn cloned(&self) -> Vec<String> {
        self.log.lock().unwrap().cloned.clone()
    }

    /// Every job handed to `push`, including failed ones.
    pub fn pushed(&self) -> Vec<PushJob> {
        self.log.lock().unwrap().pushed.clone()
    }
}

#[async_trait]
impl GitTransport for ScriptedGit {
    async fn clone_each(&self, urls: &[String], dest: &Path) -> Vec<GitResult<PathBuf>> {
        let mut log = self.log.lock().unwrap();
        log.clone_dests.push(dest.to_path_buf());
        urls.iter()
            .map(|url| {
                if self.failing_clones.contains(url) {
                    return Err(GitError::Clone {
                        url: url.clone(),
                        reason: "scripted failure".to_string(),
                    });
                }
                let path = dest.join(NameCodec::repo_name_from_url(url));
                std::fs::create_dir_all(&path)?;
                std::fs::write(path.join("README.md"), url)?;
                log.cloned.push(url.clone());
                Ok(path)
            })
            .collect()
    }

    async fn push(&self, jobs: &[PushJob], _user: &str) -> Vec<PushFailure> {
        let mut log = self.log.lock().unwrap();
        log.pushed.extend(jobs.iter().cloned());
        jobs.iter()
            .filter(|job| self.failing_pushes.contains(&job.repo_url))
            .map(|job| PushFailure {
                destination_url: job.repo_url.clone(),
                reason: "scripted failure".to_string(),
            })
            .collect()
    }
}
