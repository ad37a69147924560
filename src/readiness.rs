//! Bounded polling used by every "wait until X holds" step.
//!
//! A [`ReadinessCheck`] pairs a subject name with an async probe. The probe
//! answers `Ok(true)` when the subject is usable, `Ok(false)` or
//! `Err(ProbeError::Retry(_))` when it should be asked again, and
//! `Err(ProbeError::Fatal(_))` when waiting longer cannot help.
//!
//! Every wait is raced against an [`Interrupt`] so a user interrupt ends it
//! without running out the remaining attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Cancellation signal shared by every wait of one operation.
#[derive(Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Wakes every wait currently racing this interrupt, and every future one.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`Interrupt::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            // The sender lives as long as any clone of self.
            std::future::pending::<()>().await;
        }
    }
}

/// Why a probe could not confirm readiness.
#[derive(Debug)]
pub enum ProbeError {
    /// Treated like "not ready yet"; the poller asks again.
    Retry(Error),
    /// Ends the wait immediately with this error.
    Fatal(Error),
}

impl From<Error> for ProbeError {
    fn from(err: Error) -> Self {
        ProbeError::Retry(err)
    }
}

/// Outcome of one probe invocation.
pub type Probe = std::result::Result<bool, ProbeError>;

/// A named readiness predicate with its polling budget.
pub struct ReadinessCheck<F> {
    subject: String,
    probe: F,
    /// `None` only for waits bounded by an external signal.
    max_attempts: Option<u32>,
    interval: Duration,
}

impl<F, Fut> ReadinessCheck<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    /// Creates a check polling once per second, at most 60 times.
    pub fn new(subject: impl Into<String>, probe: F) -> Self {
        Self {
            subject: subject.into(),
            probe,
            max_attempts: Some(60),
            interval: Duration::from_secs(1),
        }
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Polls until the probe succeeds or fails fatally, with no attempt cap.
    pub(crate) fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Runs `check` until it reports ready.
///
/// The probe is invoked once per attempt and the poller sleeps exactly the
/// check's interval between unsuccessful attempts, never after the last one.
///
/// # Panics
///
/// When the check allows zero attempts or has a zero interval.
pub async fn wait_until_ready<F, Fut>(check: ReadinessCheck<F>, interrupt: &Interrupt) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let ReadinessCheck {
        subject,
        mut probe,
        max_attempts,
        interval,
    } = check;
    if let Some(max) = max_attempts {
        assert!(max >= 1, "readiness check for {subject} needs at least one attempt");
    }
    assert!(
        !interval.is_zero(),
        "readiness check for {subject} needs a positive poll interval"
    );

    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = interrupt.triggered() => return Err(Error::Interrupted { subject }),
            outcome = probe() => outcome,
        };

        match outcome {
            Ok(true) => {
                log::debug!("readiness: {subject} ready after {attempt} attempt(s)");
                return Ok(());
            }
            Ok(false) => log::trace!("readiness: {subject} not ready (attempt {attempt})"),
            Err(ProbeError::Retry(err)) => {
                log::debug!("readiness: {subject} probe failed (attempt {attempt}): {err}")
            }
            Err(ProbeError::Fatal(err)) => {
                log::debug!("readiness: {subject} failed fatally: {err}");
                return Err(err);
            }
        }

        if max_attempts.is_some_and(|max| attempt >= max) {
            break;
        }

        tokio::select! {
            biased;
            _ = interrupt.triggered() => return Err(Error::Interrupted { subject }),
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Err(Error::ReadinessTimeout {
        subject,
        attempts: attempt,
        elapsed: started.elapsed(),
    })
}
