use mcp_supervisor::config::ServerConfig;
use mcp_supervisor::error::{Error, Result};
use mcp_supervisor::server::{
    LifecycleController, LivenessProbe, PidProbe, Registry, ServerMonitor, ServerMonitorConfig,
    ServerStatus, StateStore,
};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    registry: Registry,
    lifecycle: LifecycleController,
}

fn harness() -> Harness {
    harness_with_grace(Duration::from_millis(300))
}

fn harness_with_grace(grace: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let lifecycle = LifecycleController::new(
        registry.clone(),
        StateStore::new(dir.path().join("state.json")),
        dir.path(),
        grace,
    );
    Harness {
        dir,
        registry,
        lifecycle,
    }
}

fn sh(script: &str) -> ServerConfig {
    ServerConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
    }
}

fn sleeper() -> ServerConfig {
    ServerConfig {
        command: "sleep".to_string(),
        args: vec!["30".to_string()],
        env: HashMap::new(),
    }
}

async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn status(registry: &Registry, name: &str) -> ServerStatus {
    registry.get(name).unwrap().unwrap().status
}

fn log_contains(dir: &Path, name: &str, needle: &str) -> bool {
    std::fs::read_to_string(dir.join(format!("{}.log", name)))
        .map(|content| content.contains(needle))
        .unwrap_or(false)
}

#[tokio::test]
async fn test_spawn_registers_running_record() -> Result<()> {
    let h = harness();

    let pid = h.lifecycle.spawn("echo", sleeper()).await?;

    let snap = h.registry.get("echo")?.expect("record exists");
    assert_eq!(snap.status, ServerStatus::Running);
    assert_eq!(snap.pid, Some(pid));
    assert_eq!(snap.consecutive_healthy_checks, 0);
    assert!(snap.last_start.is_some());
    assert_eq!(h.registry.names()?, vec!["echo".to_string()]);
    assert!(PidProbe.is_alive(pid));

    // Every mutation is persisted
    let state = StateStore::new(h.dir.path().join("state.json"))
        .load()
        .expect("state written");
    assert_eq!(state.servers["echo"].status, ServerStatus::Running);

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_spawn_twice_leaves_one_process() -> Result<()> {
    let h = harness();

    let first = h.lifecycle.spawn("echo", sleeper()).await?;
    let second = h.lifecycle.spawn("echo", sleeper()).await?;

    assert_ne!(first, second);
    assert_eq!(h.registry.get("echo")?.unwrap().pid, Some(second));
    assert!(eventually(|| !PidProbe.is_alive(first)).await);
    assert!(PidProbe.is_alive(second));

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_stop_is_optimistic() -> Result<()> {
    let h = harness();
    // Ignores SIGTERM, so only the forced kill ends it
    let pid = h
        .lifecycle
        .spawn("stubborn", sh("trap '' TERM; exec sleep 30"))
        .await?;
    // Let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.lifecycle.stop("stubborn")?;
    assert_eq!(status(&h.registry, "stubborn"), ServerStatus::Stopped);
    assert!(PidProbe.is_alive(pid));

    assert!(eventually(|| !PidProbe.is_alive(pid)).await);
    assert_eq!(status(&h.registry, "stubborn"), ServerStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_stop_unknown_server() {
    let h = harness();
    assert!(matches!(
        h.lifecycle.stop("nope"),
        Err(Error::ServerNotFound(_))
    ));
}

#[tokio::test]
async fn test_exit_observer_marks_stopped() -> Result<()> {
    let h = harness();
    let pid = h.lifecycle.spawn("short", sh("exit 3")).await?;

    assert!(eventually(|| status(&h.registry, "short") == ServerStatus::Stopped).await);
    let snap = h.registry.get("short")?.unwrap();
    assert_eq!(snap.pid, Some(pid));
    assert!(eventually(|| log_contains(h.dir.path(), "short", "exited with code 3")).await);
    Ok(())
}

#[tokio::test]
async fn test_launch_failure_is_error_status() {
    let h = harness();
    let spec = ServerConfig {
        command: "/nonexistent/definitely-not-here".to_string(),
        args: vec![],
        env: HashMap::new(),
    };

    let result = h.lifecycle.spawn("broken", spec).await;
    assert!(matches!(result, Err(Error::Spawn(_))));
    assert_eq!(status(&h.registry, "broken"), ServerStatus::Error);
    assert!(log_contains(h.dir.path(), "broken", "[ERROR] Failed to start"));
}

#[tokio::test]
async fn test_output_and_environment_reach_the_log() -> Result<()> {
    let mut spec = sh("echo \"hello $GREETING\"; echo oops >&2; exec sleep 30");
    spec.env.insert("GREETING".to_string(), "world".to_string());

    let h = harness();
    h.lifecycle.spawn("chatty", spec).await?;

    assert!(eventually(|| log_contains(h.dir.path(), "chatty", "[STDOUT] hello world")).await);
    assert!(eventually(|| log_contains(h.dir.path(), "chatty", "[STDERR] oops")).await);
    assert!(log_contains(h.dir.path(), "chatty", "[INFO] Server started with PID"));

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_restart_uses_stored_spec() -> Result<()> {
    let h = harness();
    let first = h.lifecycle.spawn("echo", sleeper()).await?;
    let second = h.lifecycle.restart("echo").await?;

    assert_ne!(first, second);
    assert_eq!(status(&h.registry, "echo"), ServerStatus::Running);
    assert!(matches!(
        h.lifecycle.restart("unknown").await,
        Err(Error::ServerNotFound(_))
    ));

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_killed_process_is_restarted_by_sweep() -> Result<()> {
    let h = harness();
    let pid = h.lifecycle.spawn("echo", sleeper()).await?;

    let monitor = ServerMonitor::new(h.lifecycle.clone(), ServerMonitorConfig::default());
    monitor.sweep().await?;
    assert_eq!(h.registry.get("echo")?.unwrap().consecutive_healthy_checks, 1);

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    assert!(eventually(|| status(&h.registry, "echo") == ServerStatus::Stopped).await);

    let summary = monitor.sweep().await?;
    assert_eq!(summary.unhealthy, vec!["echo".to_string()]);
    assert_eq!(summary.restarted, vec!["echo".to_string()]);

    let snap = h.registry.get("echo")?.unwrap();
    assert_eq!(snap.status, ServerStatus::Running);
    assert_ne!(snap.pid, Some(pid));
    assert_eq!(snap.consecutive_healthy_checks, 0);

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_periodic_sweep_promotes_to_healthy() -> Result<()> {
    let h = harness();
    h.lifecycle.spawn("echo", sleeper()).await?;

    let mut monitor = ServerMonitor::new(
        h.lifecycle.clone(),
        ServerMonitorConfig {
            check_interval: Duration::from_millis(100),
            ..ServerMonitorConfig::default()
        },
    );
    monitor.start()?;
    assert!(monitor.is_running());

    assert!(eventually(|| status(&h.registry, "echo") == ServerStatus::Healthy).await);
    assert!(h.registry.last_sweep()?.is_some());

    monitor.stop().await?;
    assert!(!monitor.is_running());
    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_sweep_respects_stop_grace_period() -> Result<()> {
    let h = harness_with_grace(Duration::from_secs(5));
    h.lifecycle
        .spawn(
            "graceful",
            sh("trap 'sleep 1; echo graceful; exit 0' TERM; while true; do sleep 0.1; done"),
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.lifecycle.stop("graceful")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let monitor = ServerMonitor::new(h.lifecycle.clone(), ServerMonitorConfig::default());
    monitor.sweep().await?;

    assert!(eventually(|| log_contains(h.dir.path(), "graceful", "exited with code 0")).await);
    assert!(log_contains(h.dir.path(), "graceful", "[STDOUT] graceful"));
    assert!(!log_contains(h.dir.path(), "graceful", "signal 9"));
    assert_eq!(status(&h.registry, "graceful"), ServerStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_output_after_invalid_utf8_is_kept() -> Result<()> {
    let h = harness();
    let pid = h
        .lifecycle
        .spawn("binary", sh("printf 'before\\n\\377\\nafter\\n'; exec sleep 30"))
        .await?;

    assert!(eventually(|| log_contains(h.dir.path(), "binary", "[STDOUT] after")).await);
    assert!(log_contains(h.dir.path(), "binary", "[STDOUT] before"));
    assert!(log_contains(h.dir.path(), "binary", "[STDOUT] \u{FFFD}"));
    assert!(PidProbe.is_alive(pid));
    assert_eq!(status(&h.registry, "binary"), ServerStatus::Running);

    h.lifecycle.stop_all()?;
    Ok(())
}

#[tokio::test]
async fn test_unwritable_state_file_does_not_block() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let registry = Registry::new();
    let store = StateStore::new(blocker.join("state.json"));
    let lifecycle = LifecycleController::new(
        registry.clone(),
        store.clone(),
        dir.path(),
        Duration::from_millis(300),
    );

    let pid = lifecycle.spawn("echo", sleeper()).await?;
    assert_eq!(status(&registry, "echo"), ServerStatus::Running);
    assert!(PidProbe.is_alive(pid));
    assert!(store.load().is_none());

    lifecycle.stop("echo")?;
    assert_eq!(status(&registry, "echo"), ServerStatus::Stopped);
    assert!(eventually(|| !PidProbe.is_alive(pid)).await);
    Ok(())
}
