//! Scripted [`CommandRunner`] for unit tests.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::exec::{CommandRunner, Invocation};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Out(String),
    Fail(i32, String),
}

pub(crate) fn out(text: &str) -> Reply {
    Reply::Out(text.to_string())
}

pub(crate) fn fail(stderr: &str) -> Reply {
    Reply::Fail(1, stderr.to_string())
}

struct Rule {
    pattern: String,
    queued: VecDeque<Reply>,
    last: Reply,
}

/// Answers each command line with the first rule whose pattern it contains.
/// Sequenced rules hand out their replies in order and then repeat the last.
#[derive(Default)]
pub(crate) struct FakeRunner {
    installed: HashSet<String>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn installed(mut self, programs: &[&str]) -> Self {
        self.installed
            .extend(programs.iter().map(|p| p.to_string()));
        self
    }

    pub(crate) fn on(self, pattern: &str, reply: Reply) -> Self {
        self.on_seq(pattern, vec![reply])
    }

    pub(crate) fn on_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        let mut queued: VecDeque<Reply> = replies.into();
        let last = queued.pop_back().unwrap_or_else(|| out(""));
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            queued,
            last,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    fn lookup(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }

    async fn run(&self, invocation: &Invocation) -> Result<Vec<u8>> {
        let line = invocation.command_line();
        self.calls.lock().unwrap().push(line.clone());

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| line.contains(&r.pattern)) {
                Some(rule) => rule.queued.pop_front().unwrap_or_else(|| rule.last.clone()),
                None => Reply::Fail(127, format!("unexpected command: {line}")),
            }
        };

        match reply {
            Reply::Out(text) => Ok(text.into_bytes()),
            Reply::Fail(code, stderr) => Err(Error::CommandFailed {
                program: invocation.program().to_string(),
                exit_code: Some(code),
                output_tail: stderr,
            }),
        }
    }
}
