//! repomate - provision student repositories and peer review teams
//!
//! ## Commands
//!
//! - `setup` / `update`: fan master repos out to per-student repos
//! - `migrate`: copy template repos into the organization
//! - `clone`: clone student repos and run post-clone actions
//! - `open-issues` / `close-issues` / `list-issues`: bulk issue handling
//! - `assign-reviews` / `purge-review-teams` / `check-reviews`: peer review
//! - `show-config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use repomate_core::{
    format_listing, read_students, CliGitTransport, CommandAction, Config, EngineSettings,
    ForgeClient, Issue, IssueQuery, IssueReporter, IssueState, ProvisionReport,
    ProvisioningEngine, Registry, ReviewAllocator, RoundRobinStrategy,
};
use repomate_github::{GitHubConfig, GitHubForge};

#[derive(Parser)]
#[command(name = "repomate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision student repositories and peer review teams", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and reports
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: $REPOMATE_CONFIG, then <config dir>/repomate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Forge API root, overrides `github_base_url`
    #[arg(long, global = true)]
    github_base_url: Option<String>,

    /// Organization holding the repos, overrides `org_name`
    #[arg(short, long, global = true)]
    org_name: Option<String>,

    /// Account used for pushes, overrides `user`
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct StudentArgs {
    /// Student usernames
    #[arg(short, long, num_args = 1.., conflicts_with = "students_file")]
    students: Vec<String>,

    /// File with one student username per line
    #[arg(long)]
    students_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct MasterNames {
    /// Names of master repos in the organization
    #[arg(long = "master-repo-names", visible_alias = "mn", num_args = 1.., required = true)]
    names: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = false)]
struct MasterSource {
    /// Names of master repos in the organization
    #[arg(long = "master-repo-names", visible_alias = "mn", num_args = 1..)]
    names: Vec<String>,

    /// URLs of master repos
    #[arg(long = "master-repo-urls", visible_alias = "mu", num_args = 1..)]
    urls: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create student teams and repos, and push master contents into them
    Setup {
        #[command(flatten)]
        masters: MasterSource,
        #[command(flatten)]
        students: StudentArgs,
    },

    /// Push master contents to existing student repos
    Update {
        #[command(flatten)]
        masters: MasterSource,
        #[command(flatten)]
        students: StudentArgs,
        /// Issue file opened in repos whose push failed (first line is the title)
        #[arg(short, long)]
        issue: Option<PathBuf>,
    },

    /// Copy repos from arbitrary URLs into the organization
    Migrate {
        /// URLs of the repos to migrate
        #[arg(long = "master-repo-urls", visible_alias = "mu", num_args = 1.., required = true)]
        urls: Vec<String>,
    },

    /// Clone student repos and run post-clone actions on them
    Clone {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Directory to clone into
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },

    /// Open an issue in every student repo
    OpenIssues {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Issue file (first line is the title)
        #[arg(short, long)]
        issue: PathBuf,
    },

    /// Close issues with matching titles in every student repo
    CloseIssues {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Regex matched against issue titles
        #[arg(short = 'r', long)]
        title_regex: String,
    },

    /// List issues in student repos
    ListIssues {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Regex matched against issue titles (default: everything)
        #[arg(short = 'r', long, default_value = "")]
        title_regex: String,
        /// open, closed or all
        #[arg(long, default_value = "open")]
        state: IssueState,
        /// Only show issues opened by this user
        #[arg(long)]
        author: Option<String>,
        /// Include issue bodies
        #[arg(short = 'b', long)]
        show_body: bool,
    },

    /// Create review teams giving students read access to each other's repos
    AssignReviews {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Reviews each student performs (and each repo receives)
        #[arg(short, long, default_value_t = 1)]
        num_reviews: usize,
        /// Issue file opened in every reviewed repo, assigned to the reviewers
        #[arg(short, long)]
        issue: Option<PathBuf>,
        /// Allocation seed, overrides `review_seed`
        #[arg(long)]
        seed: Option<String>,
    },

    /// Delete review teams
    PurgeReviewTeams {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
    },

    /// Show how many reviews each student has opened
    CheckReviews {
        #[command(flatten)]
        masters: MasterNames,
        #[command(flatten)]
        students: StudentArgs,
        /// Regex matched against review issue titles
        #[arg(short = 'r', long)]
        title_regex: String,
        /// Reviews each student should perform per master repo
        #[arg(short, long, default_value_t = 1)]
        num_reviews: usize,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    repomate_core::init_tracing(cli.json, level);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    let ctx = App {
        config,
        json: cli.json,
    };

    match cli.command {
        Commands::Setup { masters, students } => cmd_setup(&ctx, &masters, &students).await,
        Commands::Update {
            masters,
            students,
            issue,
        } => cmd_update(&ctx, &masters, &students, issue.as_deref()).await,
        Commands::Migrate { urls } => cmd_migrate(&ctx, &urls).await,
        Commands::Clone {
            masters,
            students,
            dest,
        } => cmd_clone(&ctx, &masters.names, &students, &dest).await,
        Commands::OpenIssues {
            masters,
            students,
            issue,
        } => cmd_open_issues(&ctx, &masters.names, &students, &issue).await,
        Commands::CloseIssues {
            masters,
            students,
            title_regex,
        } => cmd_close_issues(&ctx, &masters.names, &students, &title_regex).await,
        Commands::ListIssues {
            masters,
            students,
            title_regex,
            state,
            author,
            show_body,
        } => {
            let query = IssueQuery {
                state,
                title_regex,
                author,
                include_body: show_body,
            };
            cmd_list_issues(&ctx, &masters.names, &students, &query).await
        }
        Commands::AssignReviews {
            masters,
            students,
            num_reviews,
            issue,
            seed,
        } => {
            cmd_assign_reviews(
                &ctx,
                &masters.names,
                &students,
                num_reviews,
                issue.as_deref(),
                seed,
            )
            .await
        }
        Commands::PurgeReviewTeams { masters, students } => {
            cmd_purge_review_teams(&ctx, &masters.names, &students).await
        }
        Commands::CheckReviews {
            masters,
            students,
            title_regex,
            num_reviews,
        } => cmd_check_reviews(&ctx, &masters.names, &students, &title_regex, num_reviews).await,
        Commands::ShowConfig => cmd_show_config(&ctx, cli.config.as_deref()),
    }
}

/// Effective configuration shared by all commands.
struct App {
    config: Config,
    json: bool,
}

impl App {
    fn forge(&self) -> Result<Arc<GitHubForge>> {
        let token = Config::token().with_context(|| {
            format!("{} is not set", repomate_core::config::TOKEN_ENV)
        })?;
        let org = self
            .config
            .org_name
            .clone()
            .context("no organization configured (set org_name or pass --org-name)")?;
        let forge = GitHubForge::new(GitHubConfig {
            base_url: self.config.github_base_url.clone(),
            org,
            token,
        })
        .context("Failed to create GitHub client")?;
        Ok(Arc::new(forge))
    }

    fn git(&self) -> CliGitTransport {
        CliGitTransport::new(Config::token())
            .with_concurrency(self.config.concurrency)
            .with_push_retries(self.config.push_retries)
    }

    fn user(&self) -> Result<String> {
        self.config
            .user
            .clone()
            .context("no user configured (set user or pass --user)")
    }

    fn engine(&self, forge: Arc<GitHubForge>) -> ProvisioningEngine {
        ProvisioningEngine::new(
            forge,
            Arc::new(self.git()),
            EngineSettings {
                branch: self.config.default_branch.clone(),
                scratch_root: None,
                private_repos: self.config.private_repos,
            },
        )
    }

    fn students(&self, args: &StudentArgs) -> Result<Vec<String>> {
        resolve_students(args, &self.config)
    }

    /// Print `value` as JSON in `--json` mode, otherwise the text rendering.
    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            let text = text();
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(())
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.github_base_url {
        config.github_base_url = url.clone();
    }
    if let Some(org) = &cli.org_name {
        config.org_name = Some(org.clone());
    }
    if let Some(user) = &cli.user {
        config.user = Some(user.clone());
    }
}

/// Students from the command line, else from the students file given on the
/// command line or in the config.
fn resolve_students(args: &StudentArgs, config: &Config) -> Result<Vec<String>> {
    if !args.students.is_empty() {
        return Ok(args.students.clone());
    }
    let Some(path) = args.students_file.as_ref().or(config.students_file.as_ref()) else {
        bail!("no students given (use --students, --students-file or students_file)");
    };
    let students = read_students(path)?;
    if students.is_empty() {
        bail!("students file {} lists no students", path.display());
    }
    Ok(students)
}

fn read_issue(path: &Path) -> Result<Issue> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read issue file: {}", path.display()))?;
    Issue::from_text(&text).with_context(|| format!("issue file {} has no title", path.display()))
}

/// Master repo URLs, looking names up in the organization when needed.
async fn master_urls(source: &MasterSource, forge: &dyn ForgeClient) -> Result<Vec<String>> {
    if !source.urls.is_empty() {
        return Ok(source.urls.clone());
    }
    let urls = forge.get_repo_urls(&source.names).await?;
    if urls.len() != source.names.len() {
        let found: Vec<String> = urls
            .iter()
            .map(|u| repomate_core::NameCodec::repo_name_from_url(u))
            .collect();
        let missing: Vec<&str> = source
            .names
            .iter()
            .filter(|n| !found.contains(n))
            .map(String::as_str)
            .collect();
        bail!("master repos not found: {}", missing.join(", "));
    }
    Ok(urls)
}

fn provision_text(report: &ProvisionReport) -> String {
    let mut lines = vec![format!(
        "{} repos, {} failed pushes, outcome: {}",
        report.repo_urls.len(),
        report.failed_pushes.len(),
        report
            .outcome()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    )];
    lines.extend(report.failed_pushes.iter().map(|f| format!("  push failed: {f}")));
    lines.extend(
        report
            .unresolved_members
            .iter()
            .map(|m| format!("  unresolved member: {m}")),
    );
    lines.extend(
        report
            .issues_opened_in
            .iter()
            .map(|r| format!("  issue opened in: {r}")),
    );
    if let Some(e) = &report.issue_error {
        lines.push(format!("  failure issue not opened: {e}"));
    }
    lines.join("\n")
}

fn finish_provision(ctx: &App, report: &ProvisionReport) -> Result<()> {
    ctx.print(report, || provision_text(report))?;
    if !report.failed_pushes.is_empty() {
        bail!("{} pushes failed", report.failed_pushes.len());
    }
    Ok(())
}

async fn cmd_setup(ctx: &App, masters: &MasterSource, students: &StudentArgs) -> Result<()> {
    let students = ctx.students(students)?;
    let user = ctx.user()?;
    let forge = ctx.forge()?;
    let urls = master_urls(masters, forge.as_ref()).await?;
    let report = ctx.engine(forge).setup(&urls, &students, &user).await?;
    finish_provision(ctx, &report)
}

async fn cmd_update(
    ctx: &App,
    masters: &MasterSource,
    students: &StudentArgs,
    issue: Option<&Path>,
) -> Result<()> {
    let students = ctx.students(students)?;
    let user = ctx.user()?;
    let issue = issue.map(read_issue).transpose()?;
    let forge = ctx.forge()?;
    let urls = master_urls(masters, forge.as_ref()).await?;
    let report = ctx
        .engine(forge)
        .update(&urls, &students, &user, issue.as_ref())
        .await?;
    finish_provision(ctx, &report)
}

async fn cmd_migrate(ctx: &App, urls: &[String]) -> Result<()> {
    let user = ctx.user()?;
    let forge = ctx.forge()?;
    let report = ctx.engine(forge).migrate(urls, &user).await?;
    finish_provision(ctx, &report)
}

async fn cmd_clone(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    dest: &Path,
) -> Result<()> {
    let students = ctx.students(students)?;
    let mut registry = Registry::new();
    for action in &ctx.config.post_clone {
        registry.register_post_clone(CommandAction::from_config(action)?);
    }
    let forge = ctx.forge()?;
    let report = ctx
        .engine(forge)
        .clone_student_repos(masters, &students, dest, &registry)
        .await?;

    ctx.print(&report, || {
        let mut lines = vec![format!(
            "cloned {} repos into {}",
            report.cloned.len(),
            dest.display()
        )];
        lines.extend(report.missing.iter().map(|m| format!("  missing: {m}")));
        lines.extend(
            report
                .failed
                .iter()
                .map(|(url, reason)| format!("  failed: {url}: {reason}")),
        );
        for (repo, results) in &report.hook_results {
            for result in results {
                lines.push(format!("  {repo}: {} {}: {}", result.hook, result.status, result.msg));
            }
        }
        lines.join("\n")
    })
}

async fn cmd_open_issues(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    issue: &Path,
) -> Result<()> {
    let students = ctx.students(students)?;
    let issue = read_issue(issue)?;
    let reporter = IssueReporter::new(ctx.forge()?).with_concurrency(ctx.config.concurrency);
    let repos = reporter.open(&issue, masters, &students).await?;
    ctx.print(&repos, || format!("opened '{}' in {} repos", issue.title, repos.len()))
}

async fn cmd_close_issues(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    title_regex: &str,
) -> Result<()> {
    let students = ctx.students(students)?;
    let reporter = IssueReporter::new(ctx.forge()?);
    let repos = reporter.close(title_regex, masters, &students).await?;
    ctx.print(&repos, || format!("closed issues matching '{title_regex}' in {} repos", repos.len()))
}

async fn cmd_list_issues(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    query: &IssueQuery,
) -> Result<()> {
    let students = ctx.students(students)?;
    let reporter = IssueReporter::new(ctx.forge()?).with_concurrency(ctx.config.concurrency);
    let results = reporter.list(masters, &students, query).await?;
    ctx.print(&results, || format_listing(&results, query.include_body))
}

async fn cmd_assign_reviews(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    num_reviews: usize,
    issue: Option<&Path>,
    seed: Option<String>,
) -> Result<()> {
    let students = ctx.students(students)?;
    let issue = issue.map(read_issue).transpose()?;
    let seed = review_seed(seed, &ctx.config);

    let mut registry = Registry::new();
    registry.register_strategy(RoundRobinStrategy::seeded(seed));
    let allocator = ReviewAllocator::new(ctx.forge()?, Arc::new(registry));
    let report = allocator
        .assign(masters, &students, num_reviews, issue.as_ref())
        .await?;

    ctx.print(&report, || {
        let mut lines = Vec::new();
        for (master, allocation) in &report.allocations {
            lines.push(format!("{master}:"));
            for (team, reviewers) in allocation {
                lines.push(format!("  {team}: {}", reviewers.join(", ")));
            }
        }
        lines.extend(
            report
                .unresolved_members
                .iter()
                .map(|m| format!("unresolved member: {m}")),
        );
        lines.join("\n")
    })
}

/// Seed from the command line, else the config, else a fresh one that is
/// logged so the allocation can be reproduced.
fn review_seed(explicit: Option<String>, config: &Config) -> String {
    explicit.or_else(|| config.review_seed.clone()).unwrap_or_else(|| {
        let seed = uuid::Uuid::new_v4().to_string();
        info!(seed = %seed, "generated review allocation seed");
        seed
    })
}

async fn cmd_purge_review_teams(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
) -> Result<()> {
    let students = ctx.students(students)?;
    let allocator = ReviewAllocator::new(ctx.forge()?, Arc::new(Registry::new()));
    let teams = allocator.purge(masters, &students).await?;
    ctx.print(&teams, || format!("purged {} review teams", teams.len()))
}

async fn cmd_check_reviews(
    ctx: &App,
    masters: &[String],
    students: &StudentArgs,
    title_regex: &str,
    num_reviews: usize,
) -> Result<()> {
    let students = ctx.students(students)?;
    let allocator = ReviewAllocator::new(ctx.forge()?, Arc::new(Registry::new()));
    let progress = allocator
        .check_progress(masters, &students, title_regex, num_reviews)
        .await?;
    ctx.print(&progress, || progress.to_string())
}

fn cmd_show_config(ctx: &App, explicit: Option<&Path>) -> Result<()> {
    match Config::resolve_path(explicit) {
        Some(path) if path.exists() => info!(path = %path.display(), "found config file"),
        Some(path) => warn!(path = %path.display(), "no config file, showing defaults"),
        None => warn!("no config directory, showing defaults"),
    }
    if Config::token().is_none() {
        warn!("{} is not set", repomate_core::config::TOKEN_ENV);
    }
    ctx.print(&ctx.config, || {
        ctx.config
            .to_toml()
            .unwrap_or_else(|e| format!("failed to render configuration: {e}"))
    })
}
