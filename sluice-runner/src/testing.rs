//! In-memory fakes shared by the unit tests

use async_trait::async_trait;
use sluice_core::domain::branch::BranchInfo;
use sluice_core::domain::script::Command;
use sluice_core::error::{DetectionError, FailureReason, ProcessError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::repository::{Detection, Detector};
use crate::service::{ProcessOutput, ProcessRunner};

#[derive(Clone)]
struct Response {
    delay: Duration,
    result: Result<String, i32>,
    panics: bool,
}

impl Response {
    fn ok(stdout: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(stdout.to_string()),
            panics: false,
        }
    }
}

/// Process runner answering from a table keyed by the command's display form
///
/// Unknown commands succeed immediately with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, Response>,
    calls: Mutex<Vec<(String, Option<PathBuf>)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(command.to_string(), Response::ok(stdout));
        self
    }

    pub fn fail(mut self, command: &str, code: i32) -> Self {
        self.responses.insert(
            command.to_string(),
            Response {
                result: Err(code),
                ..Response::ok("")
            },
        );
        self
    }

    /// Makes `command` panic inside the runner
    pub fn panic_on(mut self, command: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            Response {
                panics: true,
                ..Response::ok("")
            },
        );
        self
    }

    /// Delays the (already configured or default) answer to `command`
    pub fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.responses
            .entry(command.to_string())
            .or_insert_with(|| Response::ok(""))
            .delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub fn working_dir_of(&self, command: &str) -> Option<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == command)
            .and_then(|(_, dir)| dir.clone())
    }

    /// Highest number of commands observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &Command,
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput, ProcessError> {
        let key = command.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((key.clone(), working_dir.map(Path::to_path_buf)));

        let response = self
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::ok(""));
        if response.panics {
            panic!("scripted panic in `{}`", key);
        }

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(response.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match response.result {
            Ok(stdout) => Ok(ProcessOutput {
                tail: vec![stdout.clone()],
                stdout,
                stderr: String::new(),
            }),
            Err(code) => Err(ProcessError::new(
                command,
                FailureReason::Exited(code),
                format!("{} output", key),
                format!("{} failed", key),
            )),
        }
    }
}

/// Detector replaying a queue of check results, then reporting no change
pub struct FakeDetector {
    checks: Mutex<VecDeque<Result<Detection, DetectionError>>>,
    branch: Option<BranchInfo>,
    check_calls: AtomicUsize,
    branch_calls: AtomicUsize,
}

impl FakeDetector {
    pub fn new(branch: Option<BranchInfo>) -> Self {
        Self {
            checks: Mutex::new(VecDeque::new()),
            branch,
            check_calls: AtomicUsize::new(0),
            branch_calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, check: Result<Detection, DetectionError>) -> Self {
        self.checks.lock().unwrap().push_back(check);
        self
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn branch_calls(&self) -> usize {
        self.branch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn check(&self) -> Result<Detection, DetectionError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Detection::unchanged()))
    }

    async fn branch_info(&self) -> Result<BranchInfo, DetectionError> {
        self.branch_calls.fetch_add(1, Ordering::SeqCst);
        self.branch
            .clone()
            .ok_or_else(|| DetectionError::Output("no branch metadata".to_string()))
    }
}

/// Detector whose check always fails
pub struct BrokenDetector {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Detector for BrokenDetector {
    async fn check(&self) -> Result<Detection, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DetectionError::Output("remote unreachable".to_string()))
    }

    async fn branch_info(&self) -> Result<BranchInfo, DetectionError> {
        Err(DetectionError::Output("remote unreachable".to_string()))
    }
}
