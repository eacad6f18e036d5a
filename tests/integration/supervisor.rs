#[path = "common/mod.rs"]
mod common;

use std::{
    collections::HashMap,
    fs,
    process::{Command, Stdio},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{MockCatalog, fake_exporter, wait_for_content};
use exporter_sidecar::{
    agent::Agent,
    catalog::{
        CatalogClient, DEREGISTER_ENDPOINT, EndpointPool, REGISTER_ENDPOINT,
        ServiceDescriptor,
    },
    error::SidecarError,
};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tempfile::tempdir;

/// Builds a catalog client plus descriptor pointing at the stub server.
fn catalog_fixture(catalog: &MockCatalog) -> (Arc<CatalogClient>, ServiceDescriptor) {
    let pool = EndpointPool::new(&[catalog.uri()]).expect("endpoint pool");
    let client = CatalogClient::new(pool, "test-node", None).expect("catalog client");
    let descriptor = ServiceDescriptor::new(
        "node_exporter",
        "127.0.0.1",
        9100,
        vec![],
        HashMap::new(),
        None,
    );
    (Arc::new(client), descriptor)
}

/// Wires register/deregister hooks the same way the binary does.
fn wire_hooks(agent: &mut Agent, client: &Arc<CatalogClient>, descriptor: &ServiceDescriptor) {
    let register_client = Arc::clone(client);
    let registration = descriptor.clone();
    agent.add_post_start_hook(move || register_client.register(&registration));

    let deregister_client = Arc::clone(client);
    let identity = descriptor.identity().to_string();
    agent
        .add_pre_stop_hook(move || deregister_client.deregister(&identity))
        .expect("add pre-stop hook");
}

#[test]
fn healthy_run_registers_then_deregisters_on_exit() {
    let catalog = MockCatalog::with_status(200);
    let (client, descriptor) = catalog_fixture(&catalog);

    let mut command = Command::new("sh");
    command.args(["-c", "sleep 1"]);

    let mut agent = Agent::new(command, "node_exporter")
        .with_health_window(Duration::from_millis(200));
    wire_hooks(&mut agent, &client, &descriptor);

    agent.run().expect("clean exit");

    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 1);
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 1);
}

#[test]
fn early_exit_returns_the_error_and_skips_registration() {
    let catalog = MockCatalog::with_status(200);
    let (client, descriptor) = catalog_fixture(&catalog);

    let mut command = Command::new("sh");
    command.args(["-c", "exit 1"]);

    let mut agent =
        Agent::new(command, "node_exporter").with_health_window(Duration::from_secs(2));
    wire_hooks(&mut agent, &client, &descriptor);

    let err = agent.run().unwrap_err();
    assert!(matches!(err, SidecarError::ChildExited { .. }));

    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 0);
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 0);
}

#[test]
fn failed_registration_aborts_but_leaves_the_exporter_running() {
    let catalog = MockCatalog::with_status(500);
    let (client, descriptor) = catalog_fixture(&catalog);

    let temp = tempdir().expect("tempdir");
    let pid_file = temp.path().join("pid");

    let mut command = Command::new("sh");
    command.args([
        "-c",
        &format!("echo $$ > {}; exec sleep 30", pid_file.display()),
    ]);

    let mut agent = Agent::new(command, "node_exporter")
        .with_health_window(Duration::from_millis(200));
    wire_hooks(&mut agent, &client, &descriptor);

    let err = agent.run().unwrap_err();
    assert!(matches!(err, SidecarError::HookFailures(_)));
    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 1);
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 0);

    // The child must still be alive after the aborted run.
    let pid = Pid::from_raw(
        wait_for_content(&pid_file).parse::<i32>().expect("pid recorded"),
    );
    kill(pid, None).expect("exporter still running");

    kill(pid, Signal::SIGKILL).expect("cleanup");
}

/// Spawns the sidecar binary supervising a scripted exporter.
fn spawn_sidecar(
    exporter: &std::path::Path,
    catalog_uri: &str,
    health_window_secs: u64,
) -> std::process::Child {
    Command::new(assert_cmd::cargo::cargo_bin!("exporter-sidecar"))
        .arg(exporter)
        .arg("--advertise-ip")
        .arg("127.0.0.1")
        .arg("--consul-cluster")
        .arg(catalog_uri)
        .arg("--listen-port")
        .arg("9123")
        .arg("--health-window")
        .arg(health_window_secs.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sidecar")
}

/// Waits for the sidecar to exit, panicking after ten seconds.
fn wait_with_deadline(child: &mut std::process::Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().expect("poll sidecar") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("Timed out waiting for the sidecar to exit");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn interrupt_after_registration_deregisters_and_exits_cleanly() {
    let catalog = MockCatalog::with_status(200);
    let temp = tempdir().expect("tempdir");
    let exporter = fake_exporter(temp.path(), "metrics_exporter", "exec sleep 30");

    let mut sidecar = spawn_sidecar(&exporter, &catalog.uri(), 1);

    catalog.wait_for_requests(REGISTER_ENDPOINT, 1);

    kill(Pid::from_raw(sidecar.id() as i32), Signal::SIGINT).expect("signal sidecar");

    let status = wait_with_deadline(&mut sidecar);
    assert!(status.success(), "expected graceful exit, got {status}");

    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 1);
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 1);
}

#[test]
fn repeated_signals_forward_to_the_exporter_once() {
    let catalog = MockCatalog::with_status(200);
    let temp = tempdir().expect("tempdir");
    let sig_file = temp.path().join("signals");
    let stop_file = temp.path().join("stop");

    // Counts every TERM it receives and only exits once told to stop.
    let script = format!(
        "count=0\n\
         trap 'count=$((count+1)); echo $count > {sig}' TERM\n\
         while [ ! -f {stop} ]; do sleep 0.1; done",
        sig = sig_file.display(),
        stop = stop_file.display(),
    );
    let exporter = fake_exporter(temp.path(), "metrics_exporter", &script);

    let mut sidecar = spawn_sidecar(&exporter, &catalog.uri(), 1);

    catalog.wait_for_requests(REGISTER_ENDPOINT, 1);
    let sidecar_pid = Pid::from_raw(sidecar.id() as i32);

    kill(sidecar_pid, Signal::SIGTERM).expect("first signal");
    catalog.wait_for_requests(DEREGISTER_ENDPOINT, 1);
    assert_eq!(wait_for_content(&sig_file), "1");

    kill(sidecar_pid, Signal::SIGTERM).expect("second signal");
    thread::sleep(Duration::from_millis(500));
    assert_eq!(wait_for_content(&sig_file), "1");

    fs::write(&stop_file, "").expect("request exporter stop");
    let status = wait_with_deadline(&mut sidecar);
    assert!(status.success(), "expected graceful exit, got {status}");

    // Two signals, one forward, one deregistration.
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 1);
}

#[test]
fn signal_inside_the_health_window_waits_for_the_child() {
    let catalog = MockCatalog::with_status(200);
    let temp = tempdir().expect("tempdir");
    let pid_file = temp.path().join("pid");

    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
    let exporter = fake_exporter(temp.path(), "metrics_exporter", &script);

    let mut sidecar = spawn_sidecar(&exporter, &catalog.uri(), 5);

    // Signal as soon as the exporter is up, well inside the window.
    wait_for_content(&pid_file);
    kill(Pid::from_raw(sidecar.id() as i32), Signal::SIGTERM).expect("signal sidecar");

    let status = wait_with_deadline(&mut sidecar);
    assert!(status.success(), "expected graceful exit, got {status}");

    // Registration never happened; the relay's best-effort teardown still
    // issued the (idempotent) deregister call.
    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 0);
    assert_eq!(catalog.requests_to(DEREGISTER_ENDPOINT), 1);
}
