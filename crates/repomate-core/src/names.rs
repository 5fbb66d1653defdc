//! Deterministic derivation of forge-visible names.
//!
//! Student repos are named `{student}--{master}` and review teams
//! `{student}--{master}--review`. Neither segment may contain `--` or start or
//! end with `-`, so splitting a derived name on `--` recovers its inputs.
//! Repo names always have two segments and review team names three, which
//! keeps the two families disjoint.

use std::collections::HashMap;

use crate::error::{RepomateError, Result};

/// Separator between name segments.
pub const SEPARATOR: &str = "--";

/// Final segment of every review team name.
pub const REVIEW_SUFFIX: &str = "review";

const MAX_STUDENT_LEN: usize = 39;
const MAX_REPO_NAME_LEN: usize = 100;

/// Pure name derivation for student repositories and review teams.
pub struct NameCodec;

impl NameCodec {
    /// Name of `student`'s copy of the master repo `master_base_name`.
    pub fn student_repo_name(student: &str, master_base_name: &str) -> Result<String> {
        Self::validate_student(student)?;
        Self::validate_master_name(master_base_name)?;
        let name = Self::join_repo(student, master_base_name);
        Self::check_length(&name)?;
        Ok(name)
    }

    /// Name of the team reviewing `student`'s copy of `master_base_name`.
    pub fn review_team_name(student: &str, master_base_name: &str) -> Result<String> {
        Self::validate_student(student)?;
        Self::validate_master_name(master_base_name)?;
        let name = Self::join_review_team(student, master_base_name);
        Self::check_length(&name)?;
        Ok(name)
    }

    /// Student repo names for every (master, student) pair, master-major.
    pub fn student_repo_names(students: &[String], master_names: &[String]) -> Result<Vec<String>> {
        Self::cross_product(students, master_names, Self::student_repo_name)
    }

    /// Review team names for every (master, student) pair, master-major.
    pub fn review_team_names(students: &[String], master_names: &[String]) -> Result<Vec<String>> {
        Self::cross_product(students, master_names, Self::review_team_name)
    }

    /// Inverse of [`NameCodec::student_repo_name`]. Returns `None` for names
    /// that were not produced by it.
    pub fn parse_student_repo_name(name: &str) -> Option<(&str, &str)> {
        let (student, master) = name.split_once(SEPARATOR)?;
        if Self::validate_student(student).is_err() || Self::validate_master_name(master).is_err() {
            return None;
        }
        Some((student, master))
    }

    /// Base name of a repository URL: the last path segment without `.git`.
    pub fn repo_name_from_url(url: &str) -> String {
        let trimmed = url.trim_end_matches('/');
        let last = trimmed
            .rsplit(|c| c == '/' || c == ':')
            .next()
            .unwrap_or(trimmed);
        last.strip_suffix(".git").unwrap_or(last).to_string()
    }

    /// Forge username rules: 1-39 ASCII alphanumerics or single hyphens, no
    /// leading or trailing hyphen.
    pub fn validate_student(student: &str) -> Result<()> {
        if student.is_empty() {
            return Err(RepomateError::invalid_name(student, "student name is empty"));
        }
        if student.len() > MAX_STUDENT_LEN {
            return Err(RepomateError::invalid_name(
                student,
                format!("student name is longer than {MAX_STUDENT_LEN} characters"),
            ));
        }
        if let Some(c) = student.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(RepomateError::invalid_name(
                student,
                format!("student name contains forbidden character '{c}'"),
            ));
        }
        Self::check_hyphens(student)
    }

    /// Repository name rules: ASCII alphanumerics, `-`, `_` and `.`, with the
    /// same hyphen restrictions as student names.
    pub fn validate_master_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(RepomateError::invalid_name(name, "repository name is empty"));
        }
        if name == "." || name == ".." {
            return Err(RepomateError::invalid_name(name, "reserved repository name"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(RepomateError::invalid_name(
                name,
                format!("repository name contains forbidden character '{c}'"),
            ));
        }
        Self::check_hyphens(name)
    }

    /// Maps every derived student repo name back to the master URL it came
    /// from and fails if two inputs derive the same name. Forge names are
    /// case-insensitive, so `alice--Lab1` and `Alice--lab1` collide.
    pub fn check_collisions(students: &[String], masters: &[(String, String)]) -> Result<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for (url, base_name) in masters {
            for student in students {
                let name = Self::student_repo_name(student, base_name)?;
                if let Some(first) = seen.insert(name.to_ascii_lowercase(), url.as_str()) {
                    return Err(RepomateError::NameCollision {
                        name,
                        first: first.to_string(),
                        second: url.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn join_repo(student: &str, master_base_name: &str) -> String {
        format!("{student}{SEPARATOR}{master_base_name}")
    }

    pub(crate) fn join_review_team(student: &str, master_base_name: &str) -> String {
        format!("{student}{SEPARATOR}{master_base_name}{SEPARATOR}{REVIEW_SUFFIX}")
    }

    fn cross_product(
        students: &[String],
        master_names: &[String],
        derive: fn(&str, &str) -> Result<String>,
    ) -> Result<Vec<String>> {
        master_names
            .iter()
            .flat_map(|master| students.iter().map(move |student| derive(student, master)))
            .collect()
    }

    fn check_hyphens(name: &str) -> Result<()> {
        if name.starts_with('-') || name.ends_with('-') {
            return Err(RepomateError::invalid_name(name, "must not start or end with '-'"));
        }
        if name.contains(SEPARATOR) {
            return Err(RepomateError::invalid_name(
                name,
                format!("must not contain '{SEPARATOR}'"),
            ));
        }
        Ok(())
    }

    fn check_length(name: &str) -> Result<()> {
        if name.len() > MAX_REPO_NAME_LEN {
            return Err(RepomateError::invalid_name(
                name,
                format!("derived name is longer than {MAX_REPO_NAME_LEN} characters"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_student_repo_name_format() {
        assert_eq!(NameCodec::student_repo_name("alice", "lab1").unwrap(), "alice--lab1");
    }

    #[test]
    fn test_review_team_name_format() {
        assert_eq!(
            NameCodec::review_team_name("alice", "lab1").unwrap(),
            "alice--lab1--review"
        );
    }

    #[test]
    fn test_hyphenated_inputs_do_not_collide() {
        // With a single-hyphen separator both of these would be "a-b-c".
        let first = NameCodec::student_repo_name("a-b", "c").unwrap();
        let second = NameCodec::student_repo_name("a", "b-c").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_names_injective_and_families_disjoint() {
        let students = strings(&["a", "a-b", "b", "review", "x1-y2", "c"]);
        let masters = strings(&["b", "b-c", "c", "review", "lab.1", "lab_1", "a-b"]);
        let repos = NameCodec::student_repo_names(&students, &masters).unwrap();
        let teams = NameCodec::review_team_names(&students, &masters).unwrap();

        let repo_set: HashSet<&String> = repos.iter().collect();
        let team_set: HashSet<&String> = teams.iter().collect();
        assert_eq!(repo_set.len(), students.len() * masters.len());
        assert_eq!(team_set.len(), students.len() * masters.len());
        assert!(repo_set.is_disjoint(&team_set));
    }

    #[test]
    fn test_parse_student_repo_name_round_trips() {
        let name = NameCodec::student_repo_name("x1-y2", "lab.1").unwrap();
        assert_eq!(NameCodec::parse_student_repo_name(&name), Some(("x1-y2", "lab.1")));
    }

    #[test]
    fn test_parse_rejects_review_team_names() {
        let team = NameCodec::review_team_name("alice", "lab1").unwrap();
        assert_eq!(NameCodec::parse_student_repo_name(&team), None);
        assert_eq!(NameCodec::parse_student_repo_name("plain-repo"), None);
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(NameCodec::repo_name_from_url("https://github.com/org/lab1"), "lab1");
        assert_eq!(NameCodec::repo_name_from_url("https://github.com/org/lab1.git"), "lab1");
        assert_eq!(NameCodec::repo_name_from_url("https://github.com/org/lab1/"), "lab1");
        assert_eq!(NameCodec::repo_name_from_url("git@github.com:org/lab1.git"), "lab1");
        assert_eq!(NameCodec::repo_name_from_url("/tmp/repos/lab1"), "lab1");
    }

    #[test]
    fn test_invalid_students_rejected() {
        for bad in ["", "-alice", "alice-", "al--ice", "al_ice", "al.ice", "al ice"] {
            assert!(
                matches!(
                    NameCodec::student_repo_name(bad, "lab1"),
                    Err(RepomateError::InvalidName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        let too_long = "a".repeat(40);
        assert!(NameCodec::validate_student(&too_long).is_err());
    }

    #[test]
    fn test_invalid_master_names_rejected() {
        for bad in ["", ".", "..", "lab--1", "-lab", "lab-", "lab/1", "lab 1"] {
            assert!(NameCodec::validate_master_name(bad).is_err(), "{bad:?}");
        }
        assert!(NameCodec::validate_master_name("Lab_1.v2").is_ok());
    }

    #[test]
    fn test_derived_name_length_limit() {
        let master = "m".repeat(95);
        assert!(NameCodec::student_repo_name("alice", &master).is_err());
    }

    #[test]
    fn test_check_collisions_detects_equal_base_names() {
        let students = strings(&["alice"]);
        let masters = vec![
            ("https://host/org-a/lab1".to_string(), "lab1".to_string()),
            ("https://host/org-b/lab1".to_string(), "lab1".to_string()),
        ];
        let err = NameCodec::check_collisions(&students, &masters).unwrap_err();
        assert!(matches!(err, RepomateError::NameCollision { .. }));
    }

    #[test]
    fn test_check_collisions_ignores_case() {
        let masters = vec![
            ("https://host/org-a/Lab1".to_string(), "Lab1".to_string()),
            ("https://host/org-b/lab1".to_string(), "lab1".to_string()),
        ];
        let err = NameCodec::check_collisions(&strings(&["bob"]), &masters).unwrap_err();
        match err {
            RepomateError::NameCollision { first, second, .. } => {
                assert_eq!(first, "https://host/org-a/Lab1");
                assert_eq!(second, "https://host/org-b/lab1");
            }
            other => panic!("expected NameCollision, got {other:?}"),
        }

        let one_master = vec![("https://host/org/lab1".to_string(), "lab1".to_string())];
        assert!(NameCodec::check_collisions(&strings(&["alice", "Alice"]), &one_master).is_err());
    }

    #[test]
    fn test_check_collisions_accepts_distinct_names() {
        let students = strings(&["alice", "bob"]);
        let masters = vec![
            ("https://host/org/lab1".to_string(), "lab1".to_string()),
            ("https://host/org/lab2".to_string(), "lab2".to_string()),
        ];
        assert!(NameCodec::check_collisions(&students, &masters).is_ok());
    }
}
