//! Peer review allocation over student repos.
//!
//! For every master repo, each student's repo gets a review team of
//! `reviews_per_student` other students with pull access. Allocations come
//! from the strategies in [`crate::hooks::Registry`] and are validated before
//! anything is created on the forge.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, Instrument};

use crate::domain::{Issue, Permission, Review};
use crate::error::{RepomateError, Result};
use crate::forge::{ForgeClient, TeamMap};
use crate::hooks::Registry;
use crate::names::NameCodec;
use crate::obs;

/// Review team name to reviewer usernames.
pub type Allocation = BTreeMap<String, Vec<String>>;

/// Input handed to an allocation strategy for one master repo.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub master_repo_name: &'a str,
    pub students: &'a [String],
    pub reviews_per_student: usize,
}

impl AllocationRequest<'_> {
    /// Review team name for `student`'s repo of this master repo.
    pub fn team_name_for(&self, student: &str) -> String {
        NameCodec::join_review_team(student, self.master_repo_name)
    }
}

/// Produces review allocations. Returning `None` passes the request on to the
/// next registered strategy.
pub trait ReviewAllocationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn allocate(&self, request: &AllocationRequest<'_>) -> Option<Allocation>;
}

/// Each student's team is reviewed by the next `n` students in a fixed
/// cyclic order.
///
/// Unseeded, the order is the input order. Seeded, students are ordered by
/// `sha256("{seed}:{student}")`, which shuffles reproducibly.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinStrategy {
    seed: Option<String>,
}

impl RoundRobinStrategy {
    pub fn seeded(seed: impl Into<String>) -> Self {
        Self {
            seed: Some(seed.into()),
        }
    }

    fn order<'a>(&self, students: &'a [String]) -> Vec<&'a str> {
        let mut order: Vec<&str> = students.iter().map(String::as_str).collect();
        if let Some(seed) = &self.seed {
            order.sort_by_cached_key(|student| {
                let digest = Sha256::digest(format!("{seed}:{student}").as_bytes());
                (hex::encode(digest), student.to_string())
            });
        }
        order
    }
}

impl ReviewAllocationStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn allocate(&self, request: &AllocationRequest<'_>) -> Option<Allocation> {
        let n = request.reviews_per_student;
        let count = request.students.len();
        if n == 0 || count <= n {
            return None;
        }
        let order = self.order(request.students);
        Some(
            order
                .iter()
                .enumerate()
                .map(|(i, student)| {
                    let reviewers = (1..=n).map(|k| order[(i + k) % count].to_string()).collect();
                    (request.team_name_for(student), reviewers)
                })
                .collect(),
        )
    }
}

/// Check an allocation against the review contract: exactly one team per
/// student, `reviews_per_student` distinct known reviewers per team, nobody
/// reviewing their own repo.
pub fn validate_allocation(request: &AllocationRequest<'_>, allocation: &Allocation) -> Result<()> {
    let fail = |reason: String| RepomateError::AllocationInvariant {
        master_repo: request.master_repo_name.to_string(),
        reason,
    };

    let owners: BTreeMap<String, &str> = request
        .students
        .iter()
        .map(|s| (request.team_name_for(s), s.as_str()))
        .collect();
    let known: HashSet<&str> = request.students.iter().map(String::as_str).collect();

    if let Some(missing) = owners.keys().find(|team| !allocation.contains_key(*team)) {
        return Err(fail(format!("no reviewers allocated for team '{missing}'")));
    }
    if let Some(extra) = allocation.keys().find(|team| !owners.contains_key(*team)) {
        return Err(fail(format!("unexpected team '{extra}'")));
    }

    for (team, reviewers) in allocation {
        if reviewers.len() != request.reviews_per_student {
            return Err(fail(format!(
                "team '{team}' has {} reviewers, expected {}",
                reviewers.len(),
                request.reviews_per_student
            )));
        }
        let mut seen = HashSet::new();
        for reviewer in reviewers {
            if !known.contains(reviewer.as_str()) {
                return Err(fail(format!("team '{team}' has unknown reviewer '{reviewer}'")));
            }
            if !seen.insert(reviewer.as_str()) {
                return Err(fail(format!("team '{team}' lists '{reviewer}' twice")));
            }
            if owners.get(team).copied() == Some(reviewer.as_str()) {
                return Err(fail(format!("'{reviewer}' would review their own repo")));
            }
        }
    }
    Ok(())
}

/// Result of [`ReviewAllocator::assign`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignReport {
    /// Master repo name to its validated allocation.
    pub allocations: BTreeMap<String, Allocation>,
    /// Master repo name to the strategy that produced its allocation.
    pub strategies: BTreeMap<String, String>,
    /// `team:member` pairs the forge could not resolve.
    pub unresolved_members: Vec<String>,
}

/// Review progress of one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub reviewer: String,
    pub reviews: Vec<Review>,
}

impl ProgressRow {
    pub fn done(&self) -> usize {
        self.reviews.iter().filter(|r| r.done).count()
    }

    pub fn pending_repos(&self) -> Vec<&str> {
        self.reviews
            .iter()
            .filter(|r| !r.done)
            .map(|r| r.repo.as_str())
            .collect()
    }
}

/// Result of [`ReviewAllocator::check_progress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewProgress {
    /// Reviews each student owes across all master repos.
    pub expected_per_student: usize,
    /// One row per student, in input order.
    pub rows: Vec<ProgressRow>,
}

impl ReviewProgress {
    pub fn remaining(&self, row: &ProgressRow) -> usize {
        self.expected_per_student.saturating_sub(row.done())
    }
}

impl fmt::Display for ReviewProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers = ["reviewer", "done", "remaining", "repos still to review"];
        let cells: Vec<[String; 4]> = self
            .rows
            .iter()
            .map(|row| {
                [
                    row.reviewer.clone(),
                    row.done().to_string(),
                    self.remaining(row).to_string(),
                    row.pending_repos().join(", "),
                ]
            })
            .collect();

        let mut widths = headers.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        let line = |f: &mut fmt::Formatter<'_>, row: [&str; 4]| {
            writeln!(
                f,
                "{:<w0$} | {:>w1$} | {:>w2$} | {}",
                row[0],
                row[1],
                row[2],
                row[3],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            )
        };

        line(&mut *f, headers)?;
        writeln!(
            f,
            "{}",
            "-".repeat(widths.iter().sum::<usize>() + 3 * (widths.len() - 1))
        )?;
        for row in &cells {
            line(&mut *f, [row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()])?;
        }
        Ok(())
    }
}

/// Assigns, removes and tracks peer reviews.
pub struct ReviewAllocator {
    forge: Arc<dyn ForgeClient>,
    registry: Arc<Registry>,
}

impl ReviewAllocator {
    pub fn new(forge: Arc<dyn ForgeClient>, registry: Arc<Registry>) -> Self {
        Self { forge, registry }
    }

    /// Allocate and create review teams for every master repo.
    ///
    /// All allocations are computed and validated first, so a failing
    /// strategy leaves the forge untouched.
    pub async fn assign(
        &self,
        master_repo_names: &[String],
        students: &[String],
        reviews_per_student: usize,
        issue: Option<&Issue>,
    ) -> Result<AssignReport> {
        self.run_assign(master_repo_names, students, reviews_per_student, issue)
            .instrument(obs::run_span("assign-reviews"))
            .await
    }

    /// Delete every review team derivable from the selection. Returns the
    /// names that were requested for deletion.
    pub async fn purge(
        &self,
        master_repo_names: &[String],
        students: &[String],
    ) -> Result<Vec<String>> {
        self.run_purge(master_repo_names, students)
            .instrument(obs::run_span("purge-review-teams"))
            .await
    }

    /// Count review issues opened by each student. An empty `title_regex`
    /// matches every issue.
    pub async fn check_progress(
        &self,
        master_repo_names: &[String],
        students: &[String],
        title_regex: &str,
        reviews_per_student: usize,
    ) -> Result<ReviewProgress> {
        self.run_check_progress(master_repo_names, students, title_regex, reviews_per_student)
            .instrument(obs::run_span("check-reviews"))
            .await
    }

    async fn run_assign(
        &self,
        master_repo_names: &[String],
        students: &[String],
        reviews_per_student: usize,
        issue: Option<&Issue>,
    ) -> Result<AssignReport> {
        let start = Instant::now();
        validate_selection(master_repo_names, students)?;
        if reviews_per_student == 0 {
            return Err(RepomateError::InvalidArgument(
                "reviews per student must be at least 1".to_string(),
            ));
        }
        if students.len() <= reviews_per_student {
            return Err(RepomateError::InvalidArgument(format!(
                "{} students cannot each receive {reviews_per_student} reviews from others",
                students.len()
            )));
        }
        obs::emit_run_started("assign-reviews", master_repo_names.len(), students.len());

        let mut report = AssignReport::default();
        for master in master_repo_names {
            let request = AllocationRequest {
                master_repo_name: master,
                students,
                reviews_per_student,
            };
            let (strategy, allocation) =
                self.registry
                    .allocate(&request)
                    .ok_or_else(|| RepomateError::AllocationInvariant {
                        master_repo: master.clone(),
                        reason: "no registered strategy produced an allocation".to_string(),
                    })?;
            validate_allocation(&request, &allocation)?;
            info!(
                master = %master,
                strategy = %strategy,
                teams = allocation.len(),
                "allocation validated"
            );
            report.strategies.insert(master.clone(), strategy);
            report.allocations.insert(master.clone(), allocation);
        }

        for (master, allocation) in &report.allocations {
            let teams = self
                .forge
                .ensure_teams_and_members(allocation, Permission::Pull)
                .await?;
            for team in &teams {
                if let Some(requested) = allocation.get(&team.name) {
                    for member in team.missing_members(requested) {
                        obs::emit_unresolved_member(&team.name, member);
                        report.unresolved_members.push(format!("{}:{member}", team.name));
                    }
                }
            }

            let team_repos: TeamMap = students
                .iter()
                .map(|student| {
                    (
                        NameCodec::join_review_team(student, master),
                        vec![NameCodec::join_repo(student, master)],
                    )
                })
                .collect();
            self.forge.add_repos_to_review_teams(&team_repos, issue).await?;
        }

        obs::emit_run_finished(
            "assign-reviews",
            start.elapsed().as_millis() as u64,
            report.unresolved_members.len(),
        );
        Ok(report)
    }

    async fn run_purge(
        &self,
        master_repo_names: &[String],
        students: &[String],
    ) -> Result<Vec<String>> {
        validate_selection(master_repo_names, students)?;
        let teams = NameCodec::review_team_names(students, master_repo_names)?;
        self.forge.delete_teams(&teams).await?;
        info!(teams = teams.len(), "review teams purged");
        Ok(teams)
    }

    async fn run_check_progress(
        &self,
        master_repo_names: &[String],
        students: &[String],
        title_regex: &str,
        reviews_per_student: usize,
    ) -> Result<ReviewProgress> {
        validate_selection(master_repo_names, students)?;
        let regex = Regex::new(title_regex).map_err(|e| {
            RepomateError::InvalidArgument(format!("invalid title regex '{title_regex}': {e}"))
        })?;
        let teams = NameCodec::review_team_names(students, master_repo_names)?;
        let mut progress = self
            .forge
            .get_review_progress(&teams, students, &regex)
            .await?;

        let rows = students
            .iter()
            .map(|student| ProgressRow {
                reviewer: student.clone(),
                reviews: progress.remove(student).unwrap_or_default(),
            })
            .collect();
        Ok(ReviewProgress {
            expected_per_student: reviews_per_student * master_repo_names.len(),
            rows,
        })
    }
}

/// Masters and students must be non-empty and free of duplicates.
pub(crate) fn validate_selection(master_repo_names: &[String], students: &[String]) -> Result<()> {
    if master_repo_names.is_empty() {
        return Err(RepomateError::InvalidArgument(
            "no master repos given".to_string(),
        ));
    }
    if students.is_empty() {
        return Err(RepomateError::InvalidArgument("no students given".to_string()));
    }
    check_distinct("master repo", master_repo_names)?;
    check_distinct("student", students)?;
    for master in master_repo_names {
        NameCodec::validate_master_name(master)?;
    }
    for student in students {
        NameCodec::validate_student(student)?;
    }
    Ok(())
}

/// Rejects values equal up to ASCII case, as forge names are.
pub(crate) fn check_distinct(kind: &str, values: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for value in values {
        if !seen.insert(value.to_ascii_lowercase()) {
            return Err(RepomateError::InvalidArgument(format!(
                "duplicate {kind}: {value}"
            )));
        }
    }
    Ok(())
}
