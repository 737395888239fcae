//! Shared helpers: fake `claude` executables and event collection

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use claude_stream_bridge::StreamEvent;
use claude_stream_bridge::session::{Executor, SessionHandle, SessionRegistry};
use claude_stream_bridge::types::BridgeConfig;
use tempfile::TempDir;

/// Upper bound for any single test's wait on a session
pub const TEST_DEADLINE: Duration = Duration::from_secs(20);

/// Script line recording one invocation of the fake CLI next to itself
pub const COUNT_RUN: &str = r#"echo run >> "$(dirname "$0")/runs""#;

/// A shell script standing in for the CLI
pub struct FakeClaude {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl FakeClaude {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            claude_binary: self.path.display().to_string(),
            shell: "/bin/sh".to_string(),
            silence_timeout: Duration::from_secs(5),
            ceiling_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_millis(300),
            ..BridgeConfig::default()
        }
    }

    pub fn executor(&self) -> Executor {
        executor_with(self.config())
    }

    /// Times a script containing [`COUNT_RUN`] has been started
    pub fn runs(&self) -> usize {
        std::fs::read_to_string(self.dir.path().join("runs"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }
}

pub fn executor_with(config: BridgeConfig) -> Executor {
    Executor::new(Arc::new(config), Arc::new(SessionRegistry::new()))
}

/// Drain a session until its channel closes
pub async fn collect(handle: &mut SessionHandle) -> Vec<StreamEvent> {
    tokio::time::timeout(TEST_DEADLINE, async {
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("session did not finish in time")
}

/// Error code of the last event, if it is an error
pub fn terminal_code(events: &[StreamEvent]) -> Option<&str> {
    match events.last() {
        Some(StreamEvent::Error(err)) => Some(err.code.as_str()),
        _ => None,
    }
}

/// Wait until the registry no longer lists `session_id`
pub async fn wait_deregistered(executor: &Executor, session_id: &str) {
    tokio::time::timeout(TEST_DEADLINE, async {
        while executor.registry().get(session_id).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session was never deregistered");
}
