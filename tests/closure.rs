mod common;

use camino::{Utf8Path, Utf8PathBuf};
use kirinuki::{
    ClientError, ClientManifestResolver, ClosureError, ClosureRequest, Conventions, TraceError,
    WarningKind, build_closure, copy_standalone, fingerprint,
};
use serde_json::Value;

use common::{files, read, standalone, tempdir, write};

const ENTRY: &str = ".next/server/app/dashboard/page.js";

struct FixedResolver(Vec<&'static str>);

impl ClientManifestResolver for FixedResolver {
    fn resolve(&self, _: &Utf8Path) -> Result<Vec<String>, ClientError> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

fn project(tmp: &Utf8Path) -> Utf8PathBuf {
    let root = tmp.join("app/.next/standalone");
    standalone(&root, "dashboard");
    root
}

#[test]
fn test_closure_end_to_end() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);
    let conventions = Conventions::default();

    let isolate = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate-a"), &conventions))
        .unwrap();

    let closure: Vec<_> = isolate.files.iter().map(|p| p.as_str()).collect();
    assert_eq!(closure, vec![ENTRY, "node_modules/dep/index.js"]);

    assert_eq!(
        files(&isolate.dir),
        vec![".next/BUILD_ID", ENTRY, "node_modules/dep/index.js", "server.js"]
    );

    // neither implicit trace exists in this build
    assert_eq!(isolate.warnings.of_kind(WarningKind::ImplicitDependency).count(), 2);
    assert_eq!(isolate.warnings.of_kind(WarningKind::PartialCopy).count(), 0);

    let again = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate-b"), &conventions))
        .unwrap();
    assert_eq!(
        fingerprint(&isolate.dir).unwrap(),
        fingerprint(&again.dir).unwrap()
    );
}

#[test]
fn test_implicit_root_layout() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);

    write(root.join(".next/server/app/layout.js"), "layout");
    write(
        root.join(".next/server/app/layout.js.nft.json"),
        r#"{"version":1,"files":["../chunks/shared.js","../../../../outside/x.js"]}"#,
    );
    write(root.join(".next/server/chunks/shared.js"), "shared");

    let conventions = Conventions::default();
    let isolate = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &conventions))
        .unwrap();

    assert!(isolate.files.contains(".next/server/app/layout.js"));
    assert!(isolate.files.contains(".next/server/chunks/shared.js"));
    assert!(isolate.dir.join(".next/server/chunks/shared.js").is_file());
    assert_eq!(isolate.warnings.of_kind(WarningKind::ImplicitDependency).count(), 1);
    assert_eq!(isolate.warnings.of_kind(WarningKind::TraceEntryDropped).count(), 1);
}

#[test]
fn test_implicit_not_found() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);

    write(root.join(".next/server/app/_not-found/page.js"), "not found");
    write(
        root.join(".next/server/app/_not-found/page.js.nft.json"),
        r#"{"version":1,"files":["../../chunks/fallback.js","../../../../node_modules/dep/index.js"]}"#,
    );
    write(root.join(".next/server/chunks/fallback.js"), "fallback");

    let conventions = Conventions::default();
    let isolate = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &conventions))
        .unwrap();

    let closure: Vec<_> = isolate.files.iter().map(|p| p.as_str()).collect();
    assert_eq!(
        closure,
        vec![
            ".next/server/app/_not-found/page.js",
            ENTRY,
            ".next/server/chunks/fallback.js",
            "node_modules/dep/index.js",
        ]
    );
    assert_eq!(read(isolate.dir.join(".next/server/app/_not-found/page.js")), "not found");
    assert_eq!(read(isolate.dir.join(".next/server/chunks/fallback.js")), "fallback");

    // only the root layout is left unresolved
    assert_eq!(isolate.warnings.of_kind(WarningKind::ImplicitDependency).count(), 1);
}

#[test]
fn test_required_inputs() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);
    let conventions = Conventions::default();

    let missing = build_closure(ClosureRequest::new(
        &root,
        ".next/server/app/nope/page.js",
        tmp.join("isolate"),
        &conventions,
    ));
    assert!(matches!(
        missing,
        Err(ClosureError::EntrypointTrace(TraceError::NotFound(_)))
    ));

    std::fs::remove_file(root.join(".next/BUILD_ID")).unwrap();
    let no_build_id = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &conventions));
    assert!(matches!(no_build_id, Err(ClosureError::MissingBuildId(_))));

    let lenient = Conventions {
        require_build_id: false,
        ..Default::default()
    };
    let isolate = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &lenient)).unwrap();
    assert!(isolate.warnings.iter().any(|w| w.kind == WarningKind::Manifest
        && w.path.as_deref() == Some(Utf8Path::new(".next/BUILD_ID"))));

    std::fs::remove_file(root.join("server.js")).unwrap();
    let no_boot = build_closure(ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &lenient));
    assert!(matches!(no_boot, Err(ClosureError::MissingBootScript(_))));

    let gone = build_closure(ClosureRequest::new(tmp.join("missing"), ENTRY, tmp.join("isolate"), &lenient));
    assert!(matches!(gone, Err(ClosureError::StandaloneNotFound(_))));
}

#[test]
fn test_client_assets() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);
    write(tmp.join("app/.next/static/chunks/a.js"), "chunk");

    let conventions = Conventions::default();
    let resolver = FixedResolver(vec!["/_next/static/chunks/a.js", "/_next/static/css/missing.css"]);

    let isolate = build_closure(
        ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &conventions)
            .with_client(".next/server/app/dashboard/page_client-reference-manifest.js", &resolver),
    )
    .unwrap();

    assert_eq!(isolate.client_assets, 1);
    assert_eq!(read(isolate.dir.join(".next/static/chunks/a.js")), "chunk");
    assert_eq!(isolate.warnings.of_kind(WarningKind::ClientAssets).count(), 1);
}

#[test]
fn test_boot_files_patched() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);
    let source = tmp.join("app");

    write(
        root.join(".next/required-server-files.json"),
        &format!(r#"{{"appDir":"{source}","config":{{"outputFileTracingRoot":"{source}"}}}}"#),
    );
    write(
        root.join("server.js"),
        &format!(r#"const nextConfig = {{"assetPrefix":"","outputFileTracingRoot":"{source}"}}"#),
    );
    write(
        root.join(".next/routes-manifest.json"),
        r#"{"version":3,"staticRoutes":[{"page":"/dashboard"}],"dynamicRoutes":[]}"#,
    );

    let conventions = Conventions::default();
    let isolate = build_closure(
        ClosureRequest::new(&root, ENTRY, tmp.join("isolate"), &conventions)
            .with_asset_prefix(Some("https://cdn.example.com".into())),
    )
    .unwrap();

    assert!(isolate.rewritten);
    assert_eq!(
        read(isolate.dir.join(".next/required-server-files.json")),
        r#"{"appDir":"/app","config":{"outputFileTracingRoot":"/app"}}"#
    );
    assert_eq!(
        read(isolate.dir.join("server.js")),
        r#"const nextConfig = {"assetPrefix":"https://cdn.example.com","outputFileTracingRoot":"/app"}"#
    );

    let routes: Value = serde_json::from_str(&read(isolate.dir.join(".next/routes-manifest.json"))).unwrap();
    assert_eq!(routes["staticRoutes"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_copy_standalone() {
    let (_dir, tmp) = tempdir();
    let root = project(&tmp);
    let conventions = Conventions::default();

    let isolate = copy_standalone(&root, &tmp.join("isolate"), &conventions, None).unwrap();

    assert_eq!(files(&isolate.dir), files(&root));
}
