//! Worker configuration parsing.
//!
//! The configuration is a KDL document:
//!
//! ```kdl
//! sage-root "/home/bot/sage"
//! server "https://patchbot.sagemath.org"
//! idle 300
//! time-of-day "22-07"
//! safe-only #true
//!
//! plugins {
//!     disable "foreign_latex"
//! }
//!
//! bonus {
//!     "Jane Doe" 50
//!     blocker 200
//! }
//!
//! commands {
//!     test "${sage} -t -p ${parallelism} --all"
//! }
//! ```
//!
//! Unknown nodes are ignored. Command-line flags are applied on top through
//! [`ConfigOverrides`].

use kdl::{KdlDocument, KdlNode};
use patchbot_core::staging::{BaselinePolicy, SafetyRules, StagingPolicy};
use patchbot_core::{Cooldown, MachineIdentity, TicketId};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{CommandContext, CommandContextBuilder, ConfigError, ConfigResult, TimeWindow};

pub const DEFAULT_SERVER: &str = "https://patchbot.sagemath.org";
pub const DEFAULT_BASE_REPO: &str = "git://github.com/sagemath/sage.git";
pub const DEFAULT_BASE_BRANCH: &str = "develop";

/// Per-key score adjustments used by the rating engine.
///
/// Keys are author names, statuses, priorities, components, ticket ids
/// and the special keys `unique`, `applies` and `behind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BonusTable(BTreeMap<String, i64>);

impl BonusTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> i64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.0.insert(key.into(), value);
    }
}

impl Default for BonusTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (key, value) in [
            ("needs_review", 1000),
            ("positive_review", 500),
            ("blocker", 100),
            ("critical", 60),
            ("major", 10),
            ("unique", 40),
            ("applies", 20),
            ("behind", 1),
        ] {
            table.set(key, value);
        }
        table
    }
}

/// Plugins requested by name on top of the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginSelection {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

/// Shell command lines run by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commands {
    /// Build steps, run in order.
    pub build: Vec<String>,
    pub test: String,
    /// Re-runs only the doctests that failed last time.
    pub retest: String,
    /// Test command used in dry-run mode.
    pub dry_run_test: String,
    /// Prepares a freshly cloned isolated checkout before building.
    pub isolated_setup: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            build: vec![
                "${make} doc-clean".to_string(),
                "${make} build".to_string(),
                "${root}/local/bin/sage-starts".to_string(),
            ],
            test: "${sage} -t -p ${parallelism} --all --long".to_string(),
            retest: "${sage} -t -p ${parallelism} --all --long --failed".to_string(),
            dry_run_test: "${sage} -t -p ${parallelism} ${root}/src/sage/misc/a*.py".to_string(),
            isolated_setup: "${make} configure && ./configure".to_string(),
        }
    }
}

/// The immutable configuration of one worker iteration.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerConfig {
    pub sage_root: PathBuf,
    pub server: String,
    pub log_dir: PathBuf,
    #[serde(serialize_with = "as_secs")]
    pub idle: Duration,
    pub time_of_day: TimeWindow,
    pub parallelism: usize,
    /// Wall-clock limit for one ticket run.
    #[serde(serialize_with = "as_secs")]
    pub timeout: Duration,
    /// How many times a failing test suite is re-run on its failures.
    pub retries: u32,
    pub machine: MachineIdentity,
    pub machine_match: usize,
    pub user: String,
    pub owner: String,
    pub make: String,
    pub safe_only: bool,
    pub plugin_only: bool,
    pub dry_run: bool,
    pub skip_base: bool,
    pub cleanup: bool,
    pub base_repo: String,
    pub base_branch: String,
    pub max_behind_commits: u64,
    pub max_behind_days: f64,
    pub plugins: PluginSelection,
    pub bonus: BonusTable,
    /// Configured trusted authors. `None` defers to the collector's list.
    pub trusted_authors: Option<BTreeSet<String>>,
    pub extra_trusted_authors: BTreeSet<String>,
    pub statuses: Vec<String>,
    pub excluded_milestones: Vec<String>,
    /// Treat a report on an older baseline as not covering the ticket.
    pub stale_base_uniqueness: bool,
    pub commands: Commands,
    pub free_giga: f64,
    pub safe_paths: SafetyRules,
    #[serde(serialize_with = "as_secs")]
    pub pending_timeout: Duration,
    pub submit_attempts: u32,
    /// Cooldown in seconds for unsafe tickets. `None` skips them for good.
    pub unsafe_retry: Option<u64>,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

impl WorkerConfig {
    /// Defaults for a worker rooted at `sage_root`.
    pub fn with_root(sage_root: impl Into<PathBuf>) -> Self {
        let sage_root = sage_root.into();
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get().min(3))
            .unwrap_or(1);
        Self {
            log_dir: sage_root.join("logs").join("patchbot"),
            sage_root,
            server: DEFAULT_SERVER.to_string(),
            idle: Duration::from_secs(300),
            time_of_day: TimeWindow::always(),
            parallelism,
            timeout: Duration::from_secs(3 * 60 * 60),
            retries: 1,
            machine: MachineIdentity::default(),
            machine_match: 5,
            user: std::env::var("USER").unwrap_or_else(|_| "patchbot".to_string()),
            owner: "unknown owner".to_string(),
            make: default_make(parallelism),
            safe_only: true,
            plugin_only: false,
            dry_run: false,
            skip_base: false,
            cleanup: false,
            base_repo: DEFAULT_BASE_REPO.to_string(),
            base_branch: DEFAULT_BASE_BRANCH.to_string(),
            max_behind_commits: 0,
            max_behind_days: 1.0,
            plugins: PluginSelection::default(),
            bonus: BonusTable::default(),
            trusted_authors: None,
            extra_trusted_authors: BTreeSet::new(),
            statuses: ["needs_review", "positive_review", "needs_info", "needs_work"]
                .map(String::from)
                .to_vec(),
            excluded_milestones: [
                "sage-duplicate/invalid/wontfix",
                "sage-feature",
                "sage-pending",
                "sage-wishlist",
            ]
            .map(String::from)
            .to_vec(),
            stale_base_uniqueness: true,
            commands: Commands::default(),
            free_giga: 4.0,
            safe_paths: SafetyRules::default(),
            pending_timeout: Duration::from_secs(6 * 60 * 60),
            submit_attempts: 3,
            unsafe_retry: None,
        }
    }

    /// Check that the workspace root is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.sage_root.is_absolute() {
            return Err(ConfigError::invalid(
                "sage-root",
                format!("{} is not an absolute path", self.sage_root.display()),
            ));
        }
        if !self.sage_root.join("sage").is_file() {
            return Err(ConfigError::invalid(
                "sage-root",
                format!("no sage launcher found in {}", self.sage_root.display()),
            ));
        }
        Ok(())
    }

    pub fn staging_policy(&self) -> StagingPolicy {
        StagingPolicy {
            safe_only: self.safe_only,
            unsafe_cooldown: Cooldown::from_secs(self.unsafe_retry),
            safety: self.safe_paths.clone(),
            free_space_gib: self.free_giga,
            default_repo: self.base_repo.clone(),
        }
    }

    pub fn baseline_policy(&self) -> BaselinePolicy {
        BaselinePolicy {
            repo: self.base_repo.clone(),
            branch: self.base_branch.clone(),
            max_behind_commits: self.max_behind_commits,
            max_behind: Duration::try_from_secs_f64(self.max_behind_days * 86_400.0)
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Variables for commands run in `root` on behalf of `ticket`.
    pub fn command_context(&self, root: &Path, ticket: TicketId) -> CommandContext {
        CommandContextBuilder::new()
            .with_make(&self.make)
            .with_sage(root.join("sage").display().to_string())
            .with_root(root.display().to_string())
            .with_parallelism(self.parallelism)
            .with_ticket(ticket)
            .with_process_env()
            .build()
    }

    /// Trusted authors: the configured list, else the collector's, plus the extras.
    pub fn trusted_authors_with(
        &self,
        fetched: Option<&BTreeSet<String>>,
    ) -> Option<BTreeSet<String>> {
        let mut trusted = self.trusted_authors.as_ref().or(fetched)?.clone();
        trusted.extend(self.extra_trusted_authors.iter().cloned());
        Some(trusted)
    }

    /// Human-readable log of one ticket run.
    pub fn ticket_log(&self, ticket: TicketId) -> PathBuf {
        self.log_dir.join(format!("{ticket}-log.txt"))
    }

    /// Where a plugin's artifact for `ticket` is kept.
    pub fn plugin_artifact(&self, ticket: TicketId, plugin: &str) -> PathBuf {
        self.log_dir.join(ticket.to_string()).join(plugin)
    }
}

fn default_make(parallelism: usize) -> String {
    std::env::var("MAKE").unwrap_or_else(|_| format!("make -j{parallelism}"))
}

/// Values given on the command line, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sage_root: Option<PathBuf>,
    pub server: Option<String>,
    pub owner: Option<String>,
    pub safe_only: Option<bool>,
    pub dry_run: bool,
    pub plugin_only: bool,
    pub skip_base: bool,
    pub cleanup: bool,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(owner) = &self.owner {
            config.owner = owner.clone();
        }
        if let Some(safe_only) = self.safe_only {
            config.safe_only = safe_only;
        }
        config.dry_run |= self.dry_run;
        config.plugin_only |= self.plugin_only;
        config.skip_base |= self.skip_base;
        config.cleanup |= self.cleanup;
    }
}

/// A configuration file plus overrides, loadable again at every iteration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

impl ConfigSource {
    pub fn new(path: Option<PathBuf>, overrides: ConfigOverrides) -> Self {
        Self { path, overrides }
    }

    pub fn load(&self) -> ConfigResult<WorkerConfig> {
        let text = match &self.path {
            Some(path) => {
                debug!(path = %path.display(), "Reading configuration");
                std::fs::read_to_string(path)?
            }
            None => String::new(),
        };
        parse_worker_config(&text, &self.overrides)
    }
}

/// Parse a worker configuration from KDL text.
pub fn parse_worker_config(kdl: &str, overrides: &ConfigOverrides) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let sage_root = match &overrides.sage_root {
        Some(root) => root.clone(),
        None => doc
            .nodes()
            .iter()
            .find(|n| n.name().value() == "sage-root")
            .and_then(get_first_string_arg)
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingField("sage-root".to_string()))?,
    };

    let mut config = WorkerConfig::with_root(sage_root);
    let mut make_set = false;

    for node in doc.nodes() {
        match node.name().value() {
            "sage-root" => {}
            "server" => config.server = string_arg(node)?,
            "log-dir" => config.log_dir = PathBuf::from(string_arg(node)?),
            "idle" => config.idle = Duration::from_secs(int_arg(node)?),
            "time-of-day" => config.time_of_day = TimeWindow::parse(&string_arg(node)?)?,
            "parallelism" => {
                config.parallelism = int_arg(node)?;
                if config.parallelism == 0 {
                    return Err(invalid_arg(node, "a positive integer"));
                }
            }
            "timeout" => config.timeout = Duration::from_secs(int_arg(node)?),
            "retries" => config.retries = int_arg(node)?,
            "machine" => config.machine = MachineIdentity::new(get_all_string_args(node)),
            "machine-match" => config.machine_match = int_arg(node)?,
            "user" => config.user = string_arg(node)?,
            "owner" => config.owner = string_arg(node)?,
            "make" => {
                config.make = string_arg(node)?;
                make_set = true;
            }
            "safe-only" => config.safe_only = bool_arg(node)?,
            "plugin-only" => config.plugin_only = bool_arg(node)?,
            "dry-run" => config.dry_run = bool_arg(node)?,
            "skip-base" => config.skip_base = bool_arg(node)?,
            "cleanup" => config.cleanup = bool_arg(node)?,
            "base-repo" => config.base_repo = string_arg(node)?,
            "base-branch" => config.base_branch = string_arg(node)?,
            "max-behind-commits" => config.max_behind_commits = int_arg(node)?,
            "max-behind-days" => {
                let days = float_arg(node)?;
                if !days.is_finite() || days < 0.0 {
                    return Err(invalid_arg(node, "a non-negative number of days"));
                }
                config.max_behind_days = days;
            }
            "plugins" => config.plugins = parse_plugins(node),
            "bonus" => parse_bonus(node, &mut config.bonus)?,
            "trusted-authors" => {
                config.trusted_authors = Some(get_all_string_args(node).into_iter().collect())
            }
            "extra-trusted-authors" => {
                config.extra_trusted_authors = get_all_string_args(node).into_iter().collect()
            }
            "statuses" => config.statuses = get_all_string_args(node),
            "excluded-milestones" => config.excluded_milestones = get_all_string_args(node),
            "stale-base-uniqueness" => config.stale_base_uniqueness = bool_arg(node)?,
            "commands" => parse_commands(node, &mut config.commands)?,
            "free-giga" => config.free_giga = float_arg(node)?,
            "safe-paths" => config.safe_paths = parse_safe_paths(node),
            "pending-timeout" => config.pending_timeout = Duration::from_secs(int_arg(node)?),
            "submit-attempts" => config.submit_attempts = int_arg::<u32>(node)?.max(1),
            "unsafe-retry" => config.unsafe_retry = Some(int_arg(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    if !make_set {
        config.make = default_make(config.parallelism);
    }

    overrides.apply(&mut config);

    if config.machine.parts().is_empty() {
        config.machine = MachineIdentity::detect();
    }

    Ok(config)
}

fn parse_plugins(node: &KdlNode) -> PluginSelection {
    let mut selection = PluginSelection::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "enable" => selection.enabled.extend(get_all_string_args(child)),
                "disable" => selection.disabled.extend(get_all_string_args(child)),
                _ => {}
            }
        }
    }
    selection
}

fn parse_bonus(node: &KdlNode, bonus: &mut BonusTable) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            bonus.set(child.name().value(), int_arg(child)?);
        }
    }
    Ok(())
}

fn parse_commands(node: &KdlNode, commands: &mut Commands) -> ConfigResult<()> {
    let mut build = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "build" => build.extend(get_all_string_args(child)),
                "test" => commands.test = string_arg(child)?,
                "retest" => commands.retest = string_arg(child)?,
                "dry-run-test" => commands.dry_run_test = string_arg(child)?,
                "isolated-setup" => commands.isolated_setup = string_arg(child)?,
                _ => {}
            }
        }
    }
    if !build.is_empty() {
        commands.build = build;
    }
    Ok(())
}

/// A `safe-paths` block replaces the whole allow-list.
fn parse_safe_paths(node: &KdlNode) -> SafetyRules {
    let mut rules = SafetyRules {
        prefixes: Vec::new(),
        suffixes: Vec::new(),
        exact: Vec::new(),
    };
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "prefix" => rules.prefixes.extend(get_all_string_args(child)),
                "suffix" => rules.suffixes.extend(get_all_string_args(child)),
                "exact" => rules.exact.extend(get_all_string_args(child)),
                _ => {}
            }
        }
    }
    rules
}

fn invalid_arg(node: &KdlNode, expected: &str) -> ConfigError {
    ConfigError::invalid(node.name().value(), format!("expected {expected}"))
}

fn string_arg(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| invalid_arg(node, "a string"))
}

fn int_arg<T: TryFrom<i128>>(node: &KdlNode) -> ConfigResult<T> {
    first_arg(node)
        .and_then(|v| v.as_integer())
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| invalid_arg(node, "an integer in range"))
}

fn float_arg(node: &KdlNode) -> ConfigResult<f64> {
    first_arg(node)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .ok_or_else(|| invalid_arg(node, "a number"))
}

fn bool_arg(node: &KdlNode) -> ConfigResult<bool> {
    first_arg(node)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| invalid_arg(node, "#true or #false"))
}

fn first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}
