//! Runs every route of an application through the isolation pipeline.
//!
//! Each route walks the stages generate, compile, isolate, repair, package
//! and deploy on its own worker. The pool is bounded by
//! [`Conventions::concurrency`]. A failing route is recorded in the
//! [`Report`] and never stops its siblings; the orchestrator returns only
//! after every route has reported.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use indicatif::ProgressStyle;
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::client::ClientManifestResolver;
use crate::closure::{ClosureRequest, build_closure, copy_standalone};
use crate::conventions::Conventions;
use crate::error::{OrchestratorError, RouteFailure};
use crate::hash::{Hash32, fingerprint};
use crate::repair::repair;
use crate::report::Warnings;
use crate::zone::{RouteDescriptor, discover_routes, generate_zone, service_name, zone_name};

/// Pipeline state of a single route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discovered,
    Generating,
    Compiling,
    Isolating,
    Repairing,
    Packaging,
    Deploying,
    Deployed,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Stage::Discovered => "discovered",
            Stage::Generating => "generating",
            Stage::Compiling => "compiling",
            Stage::Isolating => "isolating",
            Stage::Repairing => "repairing",
            Stage::Packaging => "packaging",
            Stage::Deploying => "deploying",
            Stage::Deployed => "deployed",
            Stage::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// External tools that turn sources into deployed units.
pub trait Toolchain: Send + Sync {
    /// Compiles the application in `dir`, producing its standalone output.
    fn compile(&self, dir: &Utf8Path) -> anyhow::Result<()>;

    /// Packages an isolate, e.g. builds a container image from it.
    fn package(&self, _service: &str, _isolate: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn deploy(&self, _service: &str, _isolate: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A [`Toolchain`] running external commands.
///
/// The service name is exported to every command as `KIRINUKI_SERVICE`.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    /// Run in the application or zone directory.
    pub compile: Vec<String>,
    /// Run in the isolate directory.
    pub package: Option<Vec<String>>,
    /// Run in the isolate directory.
    pub deploy: Option<Vec<String>>,
}

impl Default for CommandToolchain {
    fn default() -> Self {
        Self {
            compile: vec!["bun".into(), "run".into(), "build".into()],
            package: None,
            deploy: None,
        }
    }
}

impl CommandToolchain {
    fn run(command: &[String], cwd: &Utf8Path, service: Option<&str>) -> anyhow::Result<()> {
        let Some((program, args)) = command.split_first() else {
            bail!("empty command");
        };

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        if let Some(service) = service {
            cmd.env("KIRINUKI_SERVICE", service);
        }

        let output = cmd
            .output()
            .map_err(|e| anyhow!("couldn't start `{}`: {}", program, e))?;

        if !output.status.success() {
            bail!(
                "`{}` exited with {}:\n{}{}",
                command.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }
}

impl Toolchain for CommandToolchain {
    fn compile(&self, dir: &Utf8Path) -> anyhow::Result<()> {
        Self::run(&self.compile, dir, None)
    }

    fn package(&self, service: &str, isolate: &Utf8Path) -> anyhow::Result<()> {
        match &self.package {
            Some(command) => Self::run(command, isolate, Some(service)),
            None => Ok(()),
        }
    }

    fn deploy(&self, service: &str, isolate: &Utf8Path) -> anyhow::Result<()> {
        match &self.deploy {
            Some(command) => Self::run(command, isolate, Some(service)),
            None => Ok(()),
        }
    }
}

/// Cooperative cancellation, checked before every stage.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How an application is cut into deployable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plan {
    /// One isolate per discovered route.
    #[default]
    Routes,
    /// The whole standalone output as a single isolate.
    Application,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Application source directory.
    pub source_app: Utf8PathBuf,
    /// Used to name zones and services.
    pub app_name: String,
    /// Zones and application isolates are created here.
    pub work_dir: Utf8PathBuf,
    /// Dependency directory with complete copies of fragile packages.
    pub trusted_root: Option<Utf8PathBuf>,
    pub asset_prefix: Option<String>,
    pub plan: Plan,
    pub cancel: CancelToken,
}

impl BuildOptions {
    pub fn new(source_app: impl Into<Utf8PathBuf>, app_name: &str, work_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source_app: source_app.into(),
            app_name: app_name.to_string(),
            work_dir: work_dir.into(),
            trusted_root: None,
            asset_prefix: None,
            plan: Plan::default(),
            cancel: CancelToken::new(),
        }
    }
}

/// A finished, repaired isolate.
#[derive(Debug)]
pub struct IsolateSummary {
    pub dir: Utf8PathBuf,
    /// Content hash taken right after repair.
    pub fingerprint: Hash32,
    pub warnings: Warnings,
}

#[derive(Debug)]
pub struct RouteOutcome {
    pub route: String,
    pub service: String,
    /// Terminal stage, either [`Stage::Deployed`] or [`Stage::Failed`].
    pub stage: Stage,
    pub result: Result<IsolateSummary, RouteFailure>,
    pub duration: Duration,
}

/// Outcome of every route, in the order the routes were given.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<RouteOutcome>,
}

impl Report {
    /// Whether every route was deployed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RouteFailure> {
        self.outcomes.iter().filter_map(|outcome| outcome.result.as_ref().err())
    }

    pub fn successes(&self) -> impl Iterator<Item = (&RouteOutcome, &IsolateSummary)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(|summary| (outcome, summary)))
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for outcome in &self.outcomes {
            let millis = style(format!("{}ms", outcome.duration.as_millis())).blue();
            match &outcome.result {
                Ok(summary) => writeln!(
                    f,
                    "{} {} {} ({} warnings) {}",
                    style("✓").green(),
                    style(&outcome.route).bold(),
                    summary.fingerprint,
                    summary.warnings.len(),
                    millis
                )?,
                Err(failure) => writeln!(
                    f,
                    "{} {} failed while {} {}",
                    style("✗").red(),
                    style(&outcome.route).bold(),
                    failure.stage,
                    millis
                )?,
            }
        }
        Ok(())
    }
}

/// Drives the pipeline of every route.
pub struct Orchestrator<'a> {
    conventions: &'a Conventions,
    toolchain: &'a dyn Toolchain,
    resolver: &'a dyn ClientManifestResolver,
    options: BuildOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        conventions: &'a Conventions,
        toolchain: &'a dyn Toolchain,
        resolver: &'a dyn ClientManifestResolver,
        options: BuildOptions,
    ) -> Self {
        Self {
            conventions,
            toolchain,
            resolver,
            options,
        }
    }

    /// Routes of the source application.
    pub fn discover(&self) -> Result<Vec<RouteDescriptor>, OrchestratorError> {
        Ok(discover_routes(&self.options.source_app, self.conventions)?)
    }

    /// Builds the application according to its [`Plan`].
    pub fn build(&self) -> Result<Report, OrchestratorError> {
        match self.options.plan {
            Plan::Routes => {
                let routes = self.discover()?;
                self.run(&routes)
            }
            Plan::Application => Ok(self.run_application()),
        }
    }

    /// Runs `routes` through the pipeline on a bounded pool and waits for
    /// every one of them.
    pub fn run(&self, routes: &[RouteDescriptor]) -> Result<Report, OrchestratorError> {
        if routes.is_empty() {
            return Ok(Report::default());
        }

        let s = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.conventions.concurrency.max(1))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "isolating_routes");
        root_span.pb_set_length(routes.len() as u64);
        root_span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                .progress_chars("=>-"),
        );
        root_span.pb_set_message("Isolating routes...");
        let _enter = root_span.enter();

        let route_style = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?;
        let clashes = self.clashes(routes);

        // sized to the route count, workers never block on send
        let (sender, receiver) = sync_channel::<(usize, RouteOutcome)>(routes.len());

        pool.scope(|scope| {
            for (index, route) in routes.iter().enumerate() {
                let sender = sender.clone();
                let root_span = root_span.clone();
                let route_style = route_style.clone();
                let clash = clashes[index].as_deref();

                scope.spawn(move |_| {
                    let span = tracing::span!(parent: &root_span, Level::INFO, "route", name = %route.name);
                    span.pb_set_style(&route_style);
                    span.pb_set_message(&format!("{} queued", route.name));
                    let _enter = span.enter();

                    let outcome = self.run_route(&route.name, clash, &span);

                    root_span.pb_inc(1);
                    // the receiver outlives the scope
                    let _ = sender.send((index, outcome));
                });
            }
        });

        drop(sender);

        let mut outcomes: Vec<_> = receiver.iter().collect();
        outcomes.sort_by_key(|(index, _)| *index);

        let report = Report {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        let failed = report.failures().count();
        tracing::info!(
            "isolated {} routes, {} failed {}",
            report.outcomes.len() - failed,
            failed,
            crate::io::as_overhead(s)
        );

        Ok(report)
    }

    /// Packages the whole application as a single isolate.
    pub fn run_application(&self) -> Report {
        let s = Instant::now();
        let service = service_name(&self.options.app_name, "");
        let mut stage = Stage::Discovered;

        let result = catch_unwind(AssertUnwindSafe(|| self.application_pipeline(&service, &mut stage)))
            .unwrap_or_else(|panic| Err(panicked(panic)));

        Report {
            outcomes: vec![self.outcome(&self.options.app_name, service, stage, result, s)],
        }
    }

    /// For every route, another route it would share a zone directory or a
    /// service name with.
    fn clashes(&self, routes: &[RouteDescriptor]) -> Vec<Option<String>> {
        let app = &self.options.app_name;
        let mut zones: HashMap<String, Vec<usize>> = HashMap::new();
        let mut services: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, route) in routes.iter().enumerate() {
            zones.entry(zone_name(app, &route.name)).or_default().push(index);
            services.entry(service_name(app, &route.name)).or_default().push(index);
        }

        let mut clashes = vec![None; routes.len()];
        for group in zones.values().chain(services.values()).filter(|group| group.len() > 1) {
            for &index in group {
                if clashes[index].is_none() {
                    clashes[index] = group
                        .iter()
                        .find(|&&other| other != index)
                        .map(|&other| routes[other].name.clone());
                }
            }
        }

        clashes
    }

    fn run_route(&self, route: &str, clash: Option<&str>, span: &Span) -> RouteOutcome {
        let s = Instant::now();
        let service = service_name(&self.options.app_name, route);
        let mut stage = Stage::Discovered;

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.route_pipeline(route, clash, &service, span, &mut stage)
        }))
        .unwrap_or_else(|panic| Err(panicked(panic)));

        self.outcome(route, service, stage, result, s)
    }

    fn outcome(
        &self,
        route: &str,
        service: String,
        stage: Stage,
        result: anyhow::Result<IsolateSummary>,
        start: Instant,
    ) -> RouteOutcome {
        let (stage, result) = match result {
            Ok(summary) => (Stage::Deployed, Ok(summary)),
            Err(source) => {
                let failure = RouteFailure {
                    route: route.to_string(),
                    stage,
                    source,
                };
                tracing::error!("{failure}");
                (Stage::Failed, Err(failure))
            }
        };

        RouteOutcome {
            route: route.to_string(),
            service,
            stage,
            result,
            duration: start.elapsed(),
        }
    }

    /// Moves to `next`, unless the build was cancelled.
    fn enter(&self, stage: &mut Stage, next: Stage, span: Option<(&Span, &str)>) -> anyhow::Result<()> {
        *stage = next;

        if let Some((span, route)) = span {
            span.pb_set_message(&format!("{} {}", style(route).bold(), next));
        }

        if self.options.cancel.is_cancelled() {
            bail!("cancelled");
        }

        Ok(())
    }

    fn route_pipeline(
        &self,
        route: &str,
        clash: Option<&str>,
        service: &str,
        span: &Span,
        stage: &mut Stage,
    ) -> anyhow::Result<IsolateSummary> {
        let conventions = self.conventions;
        let at = Some((span, route));

        self.enter(stage, Stage::Generating, at)?;
        // both routes would write into the same zone and isolate
        if let Some(other) = clash {
            bail!("zone or service name '{}' is shared with route '{}'", service, other);
        }
        let zone = generate_zone(
            &self.options.source_app,
            &self.options.app_name,
            route,
            &self.options.work_dir,
            conventions,
        )?;

        self.enter(stage, Stage::Compiling, at)?;
        self.toolchain.compile(&zone.dir)?;

        self.enter(stage, Stage::Isolating, at)?;
        let project_root = zone.dir.join(&conventions.standalone_dir);
        let request = ClosureRequest::new(
            project_root.clone(),
            conventions.page_entry(route),
            zone.dir.join(&conventions.isolate_dir),
            conventions,
        )
        .with_client(conventions.client_manifest_of(route), self.resolver)
        .with_asset_prefix(self.options.asset_prefix.clone());
        let isolate = build_closure(request)?;

        self.finish(isolate.dir, isolate.warnings, &project_root, service, stage, at)
    }

    fn application_pipeline(&self, service: &str, stage: &mut Stage) -> anyhow::Result<IsolateSummary> {
        let conventions = self.conventions;
        let app = &self.options.source_app;

        self.enter(stage, Stage::Compiling, None)?;
        self.toolchain.compile(app)?;

        self.enter(stage, Stage::Isolating, None)?;
        let project_root = app.join(&conventions.standalone_dir);
        let isolate = copy_standalone(
            &project_root,
            &self.options.work_dir.join(&self.options.app_name),
            conventions,
            self.options.asset_prefix.as_deref(),
        )?;

        self.finish(isolate.dir, isolate.warnings, &project_root, service, stage, None)
    }

    /// Repair, package and deploy steps shared by both plans.
    fn finish(
        &self,
        dir: Utf8PathBuf,
        mut warnings: Warnings,
        project_root: &Utf8Path,
        service: &str,
        stage: &mut Stage,
        at: Option<(&Span, &str)>,
    ) -> anyhow::Result<IsolateSummary> {
        self.enter(stage, Stage::Repairing, at)?;
        let repaired = repair(
            &dir,
            project_root,
            self.options.trusted_root.as_deref(),
            self.conventions,
        )?;
        warnings.extend(repaired.warnings);

        let fingerprint = fingerprint(&dir)?;

        self.enter(stage, Stage::Packaging, at)?;
        self.toolchain.package(service, &dir)?;

        self.enter(stage, Stage::Deploying, at)?;
        self.toolchain.deploy(service, &dir)?;

        *stage = Stage::Deployed;

        Ok(IsolateSummary {
            dir,
            fingerprint,
            warnings,
        })
    }
}

fn panicked(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    if let Some(s) = panic.downcast_ref::<&str>() {
        anyhow!("Route panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        anyhow!("Route panicked: {s}")
    } else {
        anyhow!("Route panicked with unknown payload")
    }
}
