//! Command-line front end for `runr`: parses flags and calls straight into
//! `runr-supervisor`. No business logic lives here --
//! every decision (preflight, phase transitions, resume, orchestration
//! scheduling) is made by the crates this binary wires together.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use runr_supervisor::orchestrator::{CommandRunLauncher, Decision, Orchestrator};
use runr_supervisor::preflight::run_preflight;
use runr_supervisor::resume::{build_resume_plan, resume_run, ResumeOverrides};
use runr_supervisor::state_machine::StateMachine;
use runr_supervisor::supervisor::{Supervisor, TickOutcome};
use runr_supervisor::verifier::{CommandVerifier, VerifierRegistry};
use runr_supervisor::worker::WorkerRegistry;
use runr_supervisor::{receipts, Reporter};
use runr_types::{
    exit_code, Milestone, OrchestratorId, OrchestratorPolicy, OrchestratorState, RiskLevel, RunId, RunState,
    RunStatus, ScopeLock, StopReason, Tier, Track, WaitResult, WAIT_RESULT_SCHEMA_VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "runr", version)]
#[command(about = "Supervisor and control plane for long-running AI coding agents")]
struct Cli {
    /// Repository root to operate in.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new run against a task file.
    Run(RunArgs),
    /// Resume a stopped run from its last checkpoint.
    Resume(ResumeArgs),
    /// Drive a multi-track orchestration to completion.
    Orchestrate(OrchestrateArgs),
    /// Print the current status of a run.
    Status(StatusArgs),
    /// Diagnose the local environment (tool versions, config, workspace state).
    Doctor,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the task description file, handed verbatim to the Plan/Implement workers.
    #[arg(long)]
    task: PathBuf,

    /// Reuse a specific run id instead of generating one.
    #[arg(long)]
    run_id: Option<String>,

    /// Branch to run on (default: runr/<run_id>).
    #[arg(long)]
    branch: Option<String>,

    /// Skip PLAN and go straight to IMPLEMENT with a single milestone.
    #[arg(long)]
    fast: bool,

    /// Risk level for preflight tier selection.
    #[arg(long, value_enum, default_value_t = RiskArg::Medium)]
    risk: RiskArg,

    /// Skip pinging configured worker binaries during preflight.
    #[arg(long)]
    skip_ping: bool,

    /// Register a verifier for a tier: TIER=PROGRAM[,ARG...] (repeatable).
    /// Example: --verifier tier0=cargo,check --verifier tier2=cargo,test
    #[arg(long = "verifier")]
    verifiers: Vec<String>,

    /// Print the WaitResult as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ResumeArgs {
    /// The run id to resume.
    run_id: String,

    /// Compute and print the ResumePlan without applying it or re-entering the supervisor loop.
    #[arg(long)]
    plan: bool,

    /// Proceed even if the environment fingerprint has drifted since the run stopped.
    #[arg(long)]
    force: bool,

    /// Auto-stash a dirty working tree before resuming.
    #[arg(long)]
    auto_stash: bool,

    /// Register a verifier for a tier: TIER=PROGRAM[,ARG...] (repeatable).
    #[arg(long = "verifier")]
    verifiers: Vec<String>,

    /// Print the WaitResult as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct OrchestrateArgs {
    /// Path to a JSON file describing the initial OrchestratorState (tracks, steps, policy).
    #[arg(long)]
    plan: PathBuf,

    /// Path to the runr binary to launch child runs with (default: the current executable).
    #[arg(long)]
    launcher_binary: Option<String>,

    /// Print the OrchestratorWaitResult as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// The run id to report on.
    run_id: String,

    /// Print as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RiskArg {
    Low,
    Medium,
    High,
}

impl From<RiskArg> for RiskLevel {
    fn from(value: RiskArg) -> Self {
        match value {
            RiskArg::Low => RiskLevel::Low,
            RiskArg::Medium => RiskLevel::Medium,
            RiskArg::High => RiskLevel::High,
        }
    }
}

/// `Reporter` that writes to stderr.
struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }
    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }
    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let repo_root = cli.repo.canonicalize().unwrap_or(cli.repo.clone());
    let mut reporter = CliReporter;

    let code = match cli.command {
        Commands::Run(args) => run_command(&repo_root, args, &mut reporter)?,
        Commands::Resume(args) => resume_command(&repo_root, args, &mut reporter)?,
        Commands::Orchestrate(args) => orchestrate_command(&repo_root, args, &mut reporter)?,
        Commands::Status(args) => status_command(&repo_root, args)?,
        Commands::Doctor => doctor_command(&repo_root, &mut reporter)?,
    };

    std::process::exit(code);
}

/// Generates a fresh `RunId`: the current UTC timestamp plus a short
/// random hex suffix, so same-second starts never collide.
fn new_run_id() -> RunId {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: u32 = rng.r#gen();
    RunId::new(chrono::Utc::now(), &format!("{suffix:08x}"))
}

fn parse_verifier_spec(spec: &str) -> Result<(Tier, String, Vec<String>)> {
    let (tier_str, command) = spec
        .split_once('=')
        .with_context(|| format!("invalid --verifier spec `{spec}`, expected TIER=PROGRAM[,ARG...]"))?;
    let tier = match tier_str {
        "tier0" => Tier::Tier0,
        "tier1" => Tier::Tier1,
        "tier2" => Tier::Tier2,
        other => bail!("unknown verifier tier `{other}`, expected tier0, tier1 or tier2"),
    };
    let mut parts = command.split(',').map(str::to_string);
    let program = parts.next().filter(|p| !p.is_empty()).with_context(|| format!("missing program in `{spec}`"))?;
    let args = parts.collect();
    Ok((tier, program, args))
}

fn build_verifier_registry(specs: &[String]) -> Result<VerifierRegistry> {
    let mut registry = VerifierRegistry::new();
    for spec in specs {
        let (tier, program, args) = parse_verifier_spec(spec)?;
        registry.register(Box::new(CommandVerifier::new(tier, program, args)));
    }
    Ok(registry)
}

fn run_command(repo_root: &Path, args: RunArgs, reporter: &mut dyn Reporter) -> Result<i32> {
    let config = runr_config::load_config(repo_root).context("loading runr config")?;

    let run_id = match args.run_id {
        Some(id) => RunId(id),
        None => new_run_id(),
    };
    let run_branch = args.branch.unwrap_or_else(|| format!("runr/{run_id}"));

    let dirty = !runr_git::is_clean(repo_root).context("checking working tree cleanliness")?;
    let repo_context = runr_git::repo_context(repo_root, &run_branch).context("capturing repo context")?;

    let worker_names_to_ping = if args.skip_ping {
        Vec::new()
    } else {
        let mut names = vec![config.phases.plan.clone(), config.phases.implement.clone(), config.phases.review.clone()];
        names.sort();
        names.dedup();
        names
    };
    let preflight = run_preflight(repo_context.clone(), dirty, args.risk.into(), &config, &worker_names_to_ping);
    for reason in &preflight.guard.reasons {
        reporter.warn(reason);
    }
    if !preflight.guard.ok {
        reporter.error("preflight guard failed, refusing to start run");
        return Ok(exit_code::STOP_OR_ERROR);
    }
    for outcome in &preflight.ping.results {
        if !outcome.ok {
            reporter.warn(&format!("worker `{}` did not respond to --version", outcome.worker));
        }
    }

    let task_text = std::fs::read_to_string(&args.task).with_context(|| format!("reading task file {}", args.task.display()))?;

    let milestones = if args.fast {
        vec![Milestone { name: "main".to_string(), risk_level: args.risk.into(), files_expected: None }]
    } else {
        Vec::new()
    };

    let mut state = RunState::new(run_id.clone(), repo_root.to_path_buf(), milestones, run_branch);
    state.scope_lock = ScopeLock {
        allowlist: config.scope.allowlist.clone(),
        denylist: config.scope.denylist.clone(),
        lockfile_patterns: config.scope.lockfile_patterns.clone(),
        allow_deps: config.scope.allow_deps,
    };
    state.current_branch = repo_context.current_branch.clone();

    let store = runr_store::RunStore::open(repo_root, &run_id);
    store.init().context("initializing run directory")?;

    let config_bytes = runr_config::snapshot_bytes(&config).context("serializing config snapshot")?;
    store.write_config_snapshot(&config).context("writing config snapshot")?;
    let fingerprint = runr_environment::capture(repo_root, &config_bytes).context("capturing environment fingerprint")?;
    store.write_fingerprint(&fingerprint).context("writing fingerprint")?;

    store
        .append_event(
            runr_types::EventType::run_started(),
            runr_types::EventSource::Cli,
            serde_json::json!({"run_id": run_id, "branch": state.planned_run_branch}),
        )
        .context("appending run_started event")?;
    store
        .append_event(
            runr_types::EventType::preflight(),
            runr_types::EventSource::Cli,
            serde_json::json!({"guard_ok": preflight.guard.ok, "tiers": preflight.tiers.tiers}),
        )
        .context("appending preflight event")?;

    let workers = WorkerRegistry::with_defaults();
    let verifiers = build_verifier_registry(&args.verifiers)?;
    let sm = StateMachine::new(state);
    let mut supervisor = Supervisor::new(sm, store, config, repo_root.to_path_buf(), &workers, &verifiers);

    let outcome = supervisor.run_to_completion(&task_text, reporter)?;

    let store = runr_store::RunStore::open(repo_root, &run_id);
    receipts::write_run_summary(&store, &supervisor.sm.state).context("writing run summary")?;

    print_wait_result(repo_root, &store, &supervisor.sm.state, args.json)?;
    Ok(exit_code_for_outcome(&outcome))
}

fn resume_command(repo_root: &Path, args: ResumeArgs, reporter: &mut dyn Reporter) -> Result<i32> {
    let run_id = RunId(args.run_id.clone());
    let overrides = ResumeOverrides { allow_deps: false, force: args.force, auto_stash: args.auto_stash };

    if args.plan {
        let store = runr_store::RunStore::open(repo_root, &run_id);
        let state = store
            .read_state()
            .context("reading state.json")?
            .with_context(|| format!("run_not_found: no state.json for run {run_id}"))?;
        let effective_repo_path = if runr_git::worktree_exists(repo_root, &run_id) {
            runr_git::worktree_path(repo_root, &run_id)
        } else {
            repo_root.to_path_buf()
        };
        let (plan, _mismatches) = build_resume_plan(repo_root, &effective_repo_path, &state, &store, &overrides, reporter)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(exit_code::SUCCESS);
    }

    let (state, _plan) = resume_run(repo_root, &run_id, &overrides, reporter)?;

    let config = runr_config::load_config(repo_root).context("loading runr config")?;
    let store = runr_store::RunStore::open(repo_root, &run_id);
    let workers = WorkerRegistry::with_defaults();
    let verifiers = build_verifier_registry(&args.verifiers)?;
    let sm = StateMachine::new(state);
    let mut supervisor = Supervisor::new(sm, store, config, repo_root.to_path_buf(), &workers, &verifiers);

    // The task text isn't persisted on RunState; a resumed IMPLEMENT/FINALIZE
    // pass doesn't need it again unless a phase re-enters PLAN, which resume
    // never targets -- resume only lands in IMPLEMENT or FINALIZE.
    let outcome = supervisor.run_to_completion("", reporter)?;

    let store = runr_store::RunStore::open(repo_root, &run_id);
    receipts::write_run_summary(&store, &supervisor.sm.state).context("writing run summary")?;

    print_wait_result(repo_root, &store, &supervisor.sm.state, args.json)?;
    Ok(exit_code_for_outcome(&outcome))
}

fn orchestrate_command(repo_root: &Path, args: OrchestrateArgs, reporter: &mut dyn Reporter) -> Result<i32> {
    let plan_bytes = std::fs::read(&args.plan).with_context(|| format!("reading orchestration plan {}", args.plan.display()))?;
    let initial_state: OrchestratorPlanFile =
        serde_json::from_slice(&plan_bytes).context("parsing orchestration plan JSON")?;

    let state = OrchestratorState {
        orchestrator_id: initial_state.orchestrator_id,
        tracks: initial_state.tracks,
        active_runs: Default::default(),
        file_claims: Default::default(),
        policy: initial_state.policy,
        status: RunStatus::Running,
    };

    let mut orchestrator = Orchestrator::new(state, repo_root.to_path_buf());
    orchestrator.init().context("initializing orchestration directory")?;
    orchestrator.persist().context("persisting initial orchestration state")?;

    let binary = args.launcher_binary.unwrap_or_else(|| {
        std::env::current_exe().ok().and_then(|p| p.to_str().map(str::to_string)).unwrap_or_else(|| "runr".to_string())
    });
    let launcher = CommandRunLauncher::new(binary);

    loop {
        orchestrator.reconcile(reporter).context("reconciling active tracks")?;
        match orchestrator.decide() {
            Decision::Done => {
                orchestrator.done().context("recording orchestration done")?;
                break;
            }
            Decision::Launch { track_id } => {
                orchestrator.launch(&track_id, &launcher, reporter).context("launching track")?;
            }
            Decision::Wait { reason } => {
                orchestrator.wait(&reason).context("recording wait decision")?;
                std::thread::sleep(Duration::from_secs(2));
            }
            Decision::Blocked { track_id, reason, colliding_runs } => {
                orchestrator.blocked(&track_id, &reason, &colliding_runs, reporter).context("recording blocked track")?;
            }
        }
        orchestrator.persist().context("persisting orchestration state")?;
    }

    let final_status = if orchestrator.state.tracks.iter().all(|t| t.status == RunStatus::Complete) {
        RunStatus::Complete
    } else {
        RunStatus::Stopped
    };
    orchestrator.state.status = final_status;
    orchestrator.persist().context("persisting final orchestration state")?;
    receipts::write_orchestrator_terminal_artifacts(repo_root, &orchestrator.state).context("writing terminal artifacts")?;

    print_orchestrator_result(&orchestrator.state, args.json)?;
    Ok(if final_status == RunStatus::Complete { exit_code::SUCCESS } else { exit_code::STOP_OR_ERROR })
}

/// On-disk shape of an `orchestrate --plan` input file: just enough of
/// `OrchestratorState` for the caller to declare, with the rest
/// (`active_runs`, `file_claims`, `status`) filled in fresh.
#[derive(Debug, Clone, serde::Deserialize)]
struct OrchestratorPlanFile {
    orchestrator_id: OrchestratorId,
    tracks: Vec<Track>,
    policy: OrchestratorPolicy,
}

fn status_command(repo_root: &Path, args: StatusArgs) -> Result<i32> {
    let run_id = RunId(args.run_id);
    let store = runr_store::RunStore::open(repo_root, &run_id);
    let state = store.read_state().context("reading state.json")?.with_context(|| format!("run_not_found: no state.json for run {run_id}"))?;
    print_wait_result(repo_root, &store, &state, args.json)?;
    Ok(exit_code::SUCCESS)
}

fn doctor_command(repo_root: &Path, reporter: &mut dyn Reporter) -> Result<i32> {
    println!("workspace root: {}", repo_root.display());
    println!("is git repo: {}", runr_git::is_git_repo(repo_root));

    let config = runr_config::load_config(repo_root).context("loading runr config")?;
    println!("worker phases: plan={}, implement={}, review={}", config.phases.plan, config.phases.implement, config.phases.review);
    println!("collision policy: {:?}", config.orchestration.collision_policy);
    println!("max ticks: {}, time budget: {:?}", config.budgets.max_ticks, config.budgets.time_budget);

    print_cmd_version("git", reporter);
    print_cmd_version("cargo", reporter);

    let mut workers = vec![config.phases.plan.clone(), config.phases.implement.clone(), config.phases.review.clone()];
    if let Some(fallback) = &config.phases.fallback {
        workers.push(fallback.clone());
    }
    workers.sort();
    workers.dedup();
    for worker in workers {
        print_cmd_version(&worker, reporter);
    }

    Ok(exit_code::SUCCESS)
}

/// Run `cmd --version` and report whether the tool is available.
fn print_cmd_version(cmd: &str, reporter: &mut dyn Reporter) {
    if !runr_process::command_exists(cmd) {
        reporter.warn(&format!("{cmd}: not found on PATH"));
        return;
    }
    match runr_process::run_command_with_timeout(cmd, &["--version"], Path::new("."), Some(Duration::from_secs(5))) {
        Ok(output) if output.exit_code == 0 && !output.timed_out => {
            println!("{cmd}: {}", output.stdout.lines().next().unwrap_or("").trim());
        }
        Ok(_) => reporter.warn(&format!("{cmd}: --version failed or timed out")),
        Err(err) => reporter.warn(&format!("{cmd}: {err}")),
    }
}

fn exit_code_for_outcome(outcome: &TickOutcome) -> i32 {
    match outcome {
        TickOutcome::Stopped(StopReason::Complete) => exit_code::SUCCESS,
        TickOutcome::Stopped(_) => exit_code::STOP_OR_ERROR,
        TickOutcome::AutoResumeScheduled { .. } => exit_code::STOP_OR_ERROR,
        TickOutcome::Continue => exit_code::STOP_OR_ERROR,
    }
}

fn run_elapsed_ms(store: &runr_store::RunStore) -> u64 {
    let timeline = store.read_timeline().unwrap_or_default();
    match (timeline.first(), timeline.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

fn print_wait_result(repo_root: &Path, store: &runr_store::RunStore, state: &RunState, as_json: bool) -> Result<()> {
    let status = match state.stop_reason {
        Some(StopReason::Complete) => RunStatus::Complete,
        Some(_) => RunStatus::Stopped,
        None => RunStatus::Running,
    };
    let result = WaitResult {
        schema_version: WAIT_RESULT_SCHEMA_VERSION,
        run_id: state.run_id.clone(),
        run_dir: store.dir().to_path_buf(),
        repo_root: repo_root.to_path_buf(),
        status,
        stop_reason: state.stop_reason,
        phase: state.phase,
        progress_milestone: state.milestone_index,
        progress_of: state.milestones.len(),
        resume_command: state.stop_reason.map(|r| r.suggested_command(&state.run_id)).filter(|s| !s.is_empty()),
        elapsed_ms: run_elapsed_ms(store),
        ts: chrono::Utc::now(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", receipts::one_liner(state));
        println!("phase: {:?}, milestone: {}/{}", result.phase, result.progress_milestone, result.progress_of);
        if let Some(cmd) = &result.resume_command {
            println!("suggested next step: {cmd}");
        }
    }
    Ok(())
}

fn print_orchestrator_result(state: &OrchestratorState, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else {
        println!("orchestration {} finished: {:?}", state.orchestrator_id, state.status);
        for track in &state.tracks {
            println!("  {} -> {:?}", track.name, track.status);
        }
    }
    Ok(())
}
