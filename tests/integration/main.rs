//! Integration tests for the koca launcher


mod fetch_tests {
    use crate::common::{engine, FixtureServer, Route};
    use koca_launcher::LauncherError;
    use tempfile::TempDir;

    fn chain(server: &FixtureServer, prefix: &str, hops: usize, body: &[u8]) -> String {
        for i in 0..hops {
            let next = format!("/{prefix}/{}", i + 1);
            server.route(&format!("/{prefix}/{i}"), Route::Redirect(next));
        }
        server.route(&format!("/{prefix}/{hops}"), Route::Body(body.to_vec()));
        server.url(&format!("/{prefix}/0"))
    }

    #[test]
    fn follows_redirects_within_bound() {
        let server = FixtureServer::start();
        let url = chain(&server, "ok", 3, b"payload");
        let dir = TempDir::new().unwrap();

        let download = engine(1).download(&url, dir.path()).unwrap();
        assert_eq!(download.byte_count, 7);
        assert_eq!(download.final_url, server.url("/ok/3"));
        assert_eq!(std::fs::read(download.temp_path()).unwrap(), b"payload");
    }

    #[test]
    fn relative_redirect_resolves() {
        let server = FixtureServer::start();
        server.route("/rel/start", Route::Redirect("/rel/end".into()));
        server.route("/rel/end", Route::Body(b"x".to_vec()));
        let dir = TempDir::new().unwrap();

        let download = engine(1)
            .download(&server.url("/rel/start"), dir.path())
            .unwrap();
        assert_eq!(download.final_url, server.url("/rel/end"));
    }

    #[test]
    fn too_many_redirects_fails() {
        let server = FixtureServer::start();
        let url = chain(&server, "long", 7, b"never");
        let dir = TempDir::new().unwrap();

        let err = engine(3).download(&url, dir.path()).unwrap_err();
        assert!(matches!(err, LauncherError::TooManyRedirects { max: 5, .. }));
        // Fatal on the first attempt: not retried
        assert_eq!(server.hits("/long/0"), 1);
        assert!(crate::common::leftovers(dir.path()).is_empty());
    }

    #[test]
    fn redirect_loop_fails() {
        let server = FixtureServer::start();
        server.route("/a", Route::Redirect("/b".into()));
        server.route("/b", Route::Redirect("/a".into()));
        let dir = TempDir::new().unwrap();

        let err = engine(1)
            .download(&server.url("/a"), dir.path())
            .unwrap_err();
        assert!(matches!(err, LauncherError::TooManyRedirects { .. }));
    }

    #[test]
    fn not_found_is_remote_error() {
        let server = FixtureServer::start();
        let dir = TempDir::new().unwrap();

        let err = engine(3)
            .download(&server.url("/missing"), dir.path())
            .unwrap_err();
        assert!(matches!(err, LauncherError::RemoteError { status: 404, .. }));
        assert_eq!(server.hits("/missing"), 1);
    }

    #[test]
    fn server_error_retried_then_reported() {
        let server = FixtureServer::start();
        server.route("/flaky", Route::Status(502));
        let dir = TempDir::new().unwrap();

        let err = engine(3)
            .download(&server.url("/flaky"), dir.path())
            .unwrap_err();
        assert!(matches!(err, LauncherError::RemoteError { status: 502, .. }));
        assert_eq!(server.hits("/flaky"), 3);
    }

    #[test]
    fn other_success_codes_rejected() {
        let server = FixtureServer::start();
        server.route("/partial", Route::Status(204));
        let dir = TempDir::new().unwrap();

        let err = engine(1)
            .download(&server.url("/partial"), dir.path())
            .unwrap_err();
        assert!(matches!(err, LauncherError::RemoteError { status: 204, .. }));
    }

    #[test]
    fn fetch_text_maps_404_to_none() {
        let server = FixtureServer::start();
        server.route("/sums", Route::Body(b"hello".to_vec()));

        let fetcher = engine(1);
        assert_eq!(
            fetcher.fetch_text(&server.url("/sums")).unwrap().as_deref(),
            Some("hello")
        );
        assert!(fetcher.fetch_text(&server.url("/nope")).unwrap().is_none());
    }
}

mod resolve_tests {
    use crate::common::{leftovers, store, store_with_token, FixtureServer, Route};
    use koca_launcher::cache::{EntryState, IntegrityPolicy};
    use koca_launcher::fetch::CancelToken;
    use koca_launcher::integrity::sha256_path;
    use koca_launcher::release::{Architecture, Platform, ReleaseCoordinate};
    use koca_launcher::LauncherError;
    use sha2::{Digest, Sha256};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const BINARY: &[u8] = b"#!/bin/sh\necho koca\n";

    fn coord() -> ReleaseCoordinate {
        ReleaseCoordinate::new("koca", "0.3.0", Platform::Linux, Architecture::X64).unwrap()
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Serve the artifact for `coord()` and return its request path
    fn serve(server: &FixtureServer, root: &TempDir, route: Route) -> String {
        let url = store(server, root.path(), IntegrityPolicy::default())
            .locator()
            .build_url(&coord());
        let path = server.path_of(&url).to_string();
        server.route(&path, route);
        path
    }

    fn manifest_path(server: &FixtureServer, root: &TempDir) -> String {
        let url = store(server, root.path(), IntegrityPolicy::default())
            .locator()
            .companion_url(&coord(), "checksums-sha256.txt");
        server.path_of(&url).to_string()
    }

    #[test]
    fn miss_then_hit() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        let artifact = serve(&server, &root, Route::Body(BINARY.to_vec()));
        let store = store(&server, root.path(), IntegrityPolicy::default());

        assert_eq!(store.entry(&coord()).state, EntryState::Absent);
        let first = store.resolve(&coord()).unwrap();
        let second = store.resolve(&coord()).unwrap();

        assert_eq!(first, second);
        assert_eq!(server.hits(&artifact), 1);
        assert!(store.entry(&coord()).is_verified());
        assert_eq!(std::fs::read(&first).unwrap(), BINARY);
        assert!(leftovers(first.parent().unwrap()).is_empty());
    }

    #[test]
    fn manifest_digest_gives_sha256_receipt() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve(&server, &root, Route::Body(BINARY.to_vec()));
        let manifest = format!(
            "{}  koca-darwin-arm64\n{}  koca-linux-x64\n",
            "0".repeat(64),
            sha256_hex(BINARY)
        );
        server.route(&manifest_path(&server, &root), Route::Body(manifest.into_bytes()));

        let store = store(&server, root.path(), IntegrityPolicy::default());
        let path = store.resolve(&coord()).unwrap();

        let receipt = store.receipt(&coord()).unwrap().unwrap();
        assert!(receipt.is_cryptographically_verified());
        assert_eq!(receipt.sha256, sha256_hex(BINARY));
        assert_eq!(receipt.size, BINARY.len() as u64);
        assert_eq!(sha256_path(&path).unwrap().0, receipt.sha256);
    }

    #[test]
    fn missing_manifest_falls_back_to_size_only() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve(&server, &root, Route::Body(BINARY.to_vec()));

        let store = store(&server, root.path(), IntegrityPolicy::default());
        store.resolve(&coord()).unwrap();

        let receipt = store.receipt(&coord()).unwrap().unwrap();
        assert_eq!(receipt.integrity, "size-only");
    }

    #[test]
    fn require_checksum_without_manifest_fails() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        let artifact = serve(&server, &root, Route::Body(BINARY.to_vec()));

        let policy = IntegrityPolicy {
            require_checksum: true,
            ..IntegrityPolicy::default()
        };
        let store = store(&server, root.path(), policy);
        let err = store.resolve(&coord()).unwrap_err();

        assert!(matches!(err, LauncherError::IntegrityCheckFailed { .. }));
        assert_eq!(server.hits(&artifact), 0);
    }

    #[test]
    fn checksum_mismatch_leaves_cache_clean() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve(&server, &root, Route::Body(BINARY.to_vec()));

        let mut policy = IntegrityPolicy::default();
        policy
            .pinned
            .insert("koca-linux-x64".to_string(), sha256_hex(b"something else"));
        let store = store(&server, root.path(), policy);

        let err = store.resolve(&coord()).unwrap_err();
        assert!(matches!(err, LauncherError::IntegrityCheckFailed { .. }));

        let entry = store.entry(&coord());
        assert_eq!(entry.state, EntryState::Absent);
        assert!(!entry.local_path.exists());
        assert!(leftovers(entry.local_path.parent().unwrap()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn mismatch_keeps_prior_entry() {
        use std::os::unix::fs::PermissionsExt;

        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve(&server, &root, Route::Body(BINARY.to_vec()));
        let path = store(&server, root.path(), IntegrityPolicy::default())
            .resolve(&coord())
            .unwrap();

        // Dropping the exec bit forces a reinstall over the existing file
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut policy = IntegrityPolicy::default();
        policy
            .pinned
            .insert("koca-linux-x64".to_string(), "f".repeat(64));
        let err = store(&server, root.path(), policy)
            .resolve(&coord())
            .unwrap_err();

        assert!(matches!(err, LauncherError::IntegrityCheckFailed { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), BINARY);
    }

    #[test]
    fn concurrent_resolves_download_once() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        let artifact = serve(
            &server,
            &root,
            Route::Slow(BINARY.to_vec(), Duration::from_millis(100)),
        );

        let workers: Vec<_> = (0..2)
            .map(|i| {
                let store = store(&server, root.path(), IntegrityPolicy::default());
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(i * 20));
                    store.resolve(&coord())
                })
            })
            .collect();

        let paths: Vec<_> = workers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect();

        assert_eq!(paths[0], paths[1]);
        assert_eq!(server.hits(&artifact), 1);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), BINARY);
        assert!(leftovers(paths[0].parent().unwrap()).is_empty());
    }

    #[test]
    fn cancel_mid_download_cleans_up() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        let artifact = serve(
            &server,
            &root,
            Route::Trickle(vec![b'k'; 4096], Duration::from_millis(10)),
        );

        let token = CancelToken::new();
        let store = store_with_token(&server, root.path(), IntegrityPolicy::default(), token.clone());
        let entry_dir = store.locator().entry_dir(&coord());
        let worker = thread::spawn(move || store.resolve(&coord()));

        // Wait until the download is actually streaming
        let deadline = Instant::now() + Duration::from_secs(10);
        while !leftovers(&entry_dir).iter().any(|f| f.ends_with(".tmp")) {
            assert!(Instant::now() < deadline, "download never started");
            thread::sleep(Duration::from_millis(10));
        }
        token.cancel();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, LauncherError::Cancelled));
        assert!(leftovers(&entry_dir).is_empty());
        assert_eq!(err.exit_code(), 130);

        // A later run is unaffected by the aborted one
        server.route(&artifact, Route::Body(BINARY.to_vec()));
        let fresh = store_with_token(&server, root.path(), IntegrityPolicy::default(), CancelToken::new());
        let path = fresh.resolve(&coord()).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), BINARY);
    }

    #[test]
    fn missing_artifact_is_remote_error() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();

        let store = store(&server, root.path(), IntegrityPolicy::default());
        let err = store.resolve(&coord()).unwrap_err();
        assert!(matches!(err, LauncherError::RemoteError { status: 404, .. }));
        assert!(err.hint().is_some());
        assert!(leftovers(&store.locator().entry_dir(&coord())).is_empty());
    }
}

#[cfg(unix)]
mod cli_tests {
    use crate::common::{leftovers, FixtureServer, Route};
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use koca_launcher::cache::IntegrityPolicy;
    use koca_launcher::release::{ArtifactLocator, ReleaseCoordinate};
    use predicates::prelude::*;
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use std::process::{Child, ExitStatus, Stdio};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const STUB: &[u8] = b"#!/bin/sh\necho \"koca-stub $*\"\nexit 0\n";

    fn koca(server_base: &str, root: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("koca");
        cmd.env("KOCA_RELEASE_HOST", server_base)
            .env("KOCA_CACHE_DIR", root.join("cache"))
            .env("KOCA_LAUNCHER_CONFIG", root.join("absent.toml"))
            .env_remove("KOCA_LAUNCHER_LOG");
        cmd
    }

    fn host_coord() -> ReleaseCoordinate {
        ReleaseCoordinate::for_host("koca", env!("CARGO_PKG_VERSION")).unwrap()
    }

    /// Serve `route` at the host-platform artifact URL for this launcher version
    fn serve_host(server: &FixtureServer, root: &Path, route: Route) -> String {
        let url = crate::common::store(server, &root.join("cache"), IntegrityPolicy::default())
            .locator()
            .build_url(&host_coord());
        let path = server.path_of(&url).to_string();
        server.route(&path, route);
        path
    }

    fn serve_host_binary(server: &FixtureServer, root: &Path, body: &[u8]) -> String {
        serve_host(server, root, Route::Body(body.to_vec()))
    }

    /// The launcher as a plain child process, so tests can signal it
    fn spawn_koca(server_base: &str, root: &Path, args: &[&Path]) -> Child {
        std::process::Command::new(env!("CARGO_BIN_EXE_koca"))
            .args(args)
            .env("KOCA_RELEASE_HOST", server_base)
            .env("KOCA_CACHE_DIR", root.join("cache"))
            .env("KOCA_LAUNCHER_CONFIG", root.join("absent.toml"))
            .env_remove("KOCA_LAUNCHER_LOG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    fn send(child: &Child, sig: libc::c_int) {
        let pid = libc::pid_t::try_from(child.id()).unwrap();
        assert_eq!(unsafe { libc::kill(pid, sig) }, 0);
    }

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn wait_exit(child: &mut Child, limit: Duration) -> ExitStatus {
        let mut status = None;
        wait_until(limit, || {
            status = child.try_wait().unwrap();
            status.is_some()
        });
        match status {
            Some(status) => status,
            None => {
                let _ = child.kill();
                panic!("koca still running after {limit:?}");
            }
        }
    }

    fn stderr_of(child: &mut Child) -> String {
        let mut out = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            stderr.read_to_string(&mut out).unwrap();
        }
        out
    }

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn forwards_args_and_stdout() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        let artifact = serve_host_binary(&server, root.path(), STUB);

        koca(server.base(), root.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("koca-stub --version"));

        koca(server.base(), root.path())
            .args(["build", "--", "-x"])
            .assert()
            .success()
            .stdout(predicate::str::contains("koca-stub build -- -x"));

        assert_eq!(server.hits(&artifact), 1);
    }

    #[test]
    fn child_exit_code_propagates() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve_host_binary(&server, root.path(), b"#!/bin/sh\nexit 42\n");

        koca(server.base(), root.path()).assert().code(42);
    }

    #[test]
    fn unreachable_host_reports_error() {
        let root = TempDir::new().unwrap();
        let config = root.path().join("launcher.toml");
        std::fs::write(&config, "[fetch]\nmax_attempts = 1\nconnect_timeout_secs = 2\n").unwrap();

        koca("http://127.0.0.1:9", root.path())
            .env("KOCA_LAUNCHER_CONFIG", &config)
            .arg("--version")
            .assert()
            .code(1)
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn malformed_config_reports_error() {
        let root = TempDir::new().unwrap();
        let config = root.path().join("launcher.toml");
        std::fs::write(&config, "[fetch\n").unwrap();

        koca("http://127.0.0.1:9", root.path())
            .env("KOCA_LAUNCHER_CONFIG", &config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn sigterm_reaches_child() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve_host_binary(
            &server,
            root.path(),
            b"#!/bin/sh\ntrap 'echo term > \"$1\"; exit 7' TERM\necho up > \"$2\"\nwhile :; do sleep 0.1; done\n",
        );
        let marker = root.path().join("term.txt");
        let ready = root.path().join("ready.txt");

        let mut child = spawn_koca(server.base(), root.path(), &[&marker, &ready]);
        assert!(
            wait_until(Duration::from_secs(20), || ready.exists()),
            "stub never started"
        );
        send(&child, libc::SIGTERM);

        let status = wait_exit(&mut child, Duration::from_secs(10));
        assert_eq!(status.code(), Some(7));
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "term");
    }

    #[test]
    fn sigint_during_stalled_download_exits_promptly() {
        let server = FixtureServer::start();
        let root = TempDir::new().unwrap();
        serve_host(
            &server,
            root.path(),
            Route::Stall {
                len: 1 << 20,
                prefix: vec![0x7f; 64],
                hold: Duration::from_secs(30),
            },
        );
        let entry = ArtifactLocator::new(server.base(), root.path().join("cache"))
            .entry_dir(&host_coord());

        let mut child = spawn_koca(server.base(), root.path(), &[]);
        assert!(
            wait_until(Duration::from_secs(20), || !temp_files(&entry).is_empty()),
            "download never started"
        );
        let sent = Instant::now();
        send(&child, libc::SIGINT);

        // Cancel grace is 2s; the stuck read must not hold the process open
        let status = wait_exit(&mut child, Duration::from_secs(10));
        assert_eq!(status.code(), Some(130));
        assert!(sent.elapsed() < Duration::from_secs(10));
        assert!(leftovers(&entry).is_empty(), "left behind: {:?}", leftovers(&entry));
        assert!(stderr_of(&mut child).contains("Interrupted"));
    }
}
