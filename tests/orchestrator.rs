mod common;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::Duration;

use anyhow::bail;
use camino::Utf8Path;
use kirinuki::{
    BuildOptions, ClientError, ClientManifestResolver, Conventions, Orchestrator, Plan, Stage,
    Toolchain,
};
use serde_json::Value;

use common::{read, standalone, tempdir, write};

/// Fabricates the standalone output a real compiler would produce.
#[derive(Default)]
struct FakeToolchain {
    running: AtomicUsize,
    peak: AtomicUsize,
    packaged: Mutex<Vec<String>>,
}

impl Toolchain for FakeToolchain {
    fn compile(&self, dir: &Utf8Path) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(100));
        self.running.fetch_sub(1, Ordering::SeqCst);

        let name = dir.file_name().unwrap_or_default();
        let route = match name.strip_prefix("site-") {
            Some("blog") => bail!("compiler exploded"),
            Some("home") | None => "",
            Some(route) => route,
        };

        let root = dir.join(".next/standalone");
        standalone(&root, route);
        write(
            root.join(".next/routes-manifest.json"),
            r#"{"version":3,"staticRoutes":[{"page":"/"}],"dynamicRoutes":[]}"#,
        );
        Ok(())
    }

    fn package(&self, service: &str, isolate: &Utf8Path) -> anyhow::Result<()> {
        assert!(isolate.join("server.js").is_file());
        self.packaged.lock().unwrap().push(service.to_string());
        Ok(())
    }
}

struct NoAssets;

impl ClientManifestResolver for NoAssets {
    fn resolve(&self, _: &Utf8Path) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }
}

fn source(root: &Utf8Path) {
    for route in ["", "about/", "blog/", "contact/"] {
        write(root.join(format!("app/{route}page.tsx")), route);
    }
    write(root.join("app/layout.tsx"), "layout");
}

#[test]
fn test_one_failure_does_not_stop_siblings() {
    let (_dir, tmp) = tempdir();
    let app = tmp.join("site");
    source(&app);

    let conventions = Conventions::default();
    let toolchain = FakeToolchain::default();
    let options = BuildOptions::new(&app, "site", tmp.join("work"));
    let orchestrator = Orchestrator::new(&conventions, &toolchain, &NoAssets, options);

    let routes = orchestrator.discover().unwrap();
    assert_eq!(routes.len(), 4);

    let report = orchestrator.run(&routes).unwrap();

    let names: Vec<_> = report.outcomes.iter().map(|o| o.route.as_str()).collect();
    assert_eq!(names, vec!["about", "blog", "contact", "home"]);
    assert!(!report.is_success());

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].route, "blog");
    assert_eq!(failures[0].stage, Stage::Compiling);
    assert_eq!(report.outcomes[1].stage, Stage::Failed);

    assert_eq!(report.successes().count(), 3);
    for (outcome, summary) in report.successes() {
        assert_eq!(outcome.stage, Stage::Deployed);
        assert!(summary.dir.join("server.js").is_file());
        assert!(summary.dir.join(".next/BUILD_ID").is_file());
        assert!(summary.dir.join("node_modules/dep/index.js").is_file());

        let manifest: Value =
            serde_json::from_str(&read(summary.dir.join(".next/routes-manifest.json"))).unwrap();
        assert_eq!(manifest["staticRoutes"].as_array().map(Vec::len), Some(0));
    }

    let mut packaged = toolchain.packaged.lock().unwrap().clone();
    packaged.sort();
    assert_eq!(packaged, vec!["site-about", "site-contact", "site-home"]);

    let peak = toolchain.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "routes never overlapped");
    assert!(peak <= conventions.concurrency);
}

#[test]
fn test_routes_sharing_a_zone_fail() {
    let (_dir, tmp) = tempdir();
    let app = tmp.join("site");
    source(&app);
    write(app.join("app/blog/posts/page.tsx"), "nested");
    write(app.join("app/blog-posts/page.tsx"), "flat");

    let conventions = Conventions::default();
    let toolchain = FakeToolchain::default();
    let options = BuildOptions::new(&app, "site", tmp.join("work"));

    let report = Orchestrator::new(&conventions, &toolchain, &NoAssets, options)
        .build()
        .unwrap();

    let mut clashing: Vec<_> = report
        .failures()
        .filter(|failure| failure.stage == Stage::Generating)
        .map(|failure| failure.route.as_str())
        .collect();
    clashing.sort();
    assert_eq!(clashing, vec!["blog-posts", "blog/posts"]);

    // neither route touched the shared zone
    assert!(!tmp.join("work/site-blog-posts").exists());

    let mut packaged = toolchain.packaged.lock().unwrap().clone();
    packaged.sort();
    assert_eq!(packaged, vec!["site-about", "site-contact", "site-home"]);
}

#[test]
fn test_cancelled_before_start() {
    let (_dir, tmp) = tempdir();
    let app = tmp.join("site");
    source(&app);

    let conventions = Conventions::default();
    let toolchain = FakeToolchain::default();
    let options = BuildOptions::new(&app, "site", tmp.join("work"));
    options.cancel.cancel();

    let report = Orchestrator::new(&conventions, &toolchain, &NoAssets, options)
        .build()
        .unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.failures().all(|failure| failure.stage == Stage::Generating));
    assert_eq!(toolchain.peak.load(Ordering::SeqCst), 0);
}

#[test]
fn test_application_plan() {
    let (_dir, tmp) = tempdir();
    let app = tmp.join("site");
    source(&app);

    let conventions = Conventions::default();
    let toolchain = FakeToolchain::default();
    let mut options = BuildOptions::new(&app, "site", tmp.join("work"));
    options.plan = Plan::Application;

    let report = Orchestrator::new(&conventions, &toolchain, &NoAssets, options)
        .build()
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].service, "site");

    let (_, summary) = report.successes().next().unwrap();
    assert_eq!(summary.dir, tmp.join("work/site"));
    assert!(summary.dir.join(".next/server/app/page.js").is_file());
    assert_eq!(*toolchain.packaged.lock().unwrap(), vec!["site"]);
}
