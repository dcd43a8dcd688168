use conveyor_base::{JobDescriptor, Verdict};

/// Counts the notifications a submitted job still owes the client: one build result per element,
/// plus one test result for every build that succeeded.
#[derive(Debug)]
pub struct Progress {
    outstanding: usize,
}

impl Progress {
    pub fn new(job: &JobDescriptor) -> Self {
        Self {
            outstanding: job.tests.len(),
        }
    }

    /// Account for one notification's text, e.g. `Widget build: Success`.
    pub fn record(&mut self, text: &str) {
        if text.ends_with(&format!(" build: {}", Verdict::Success)) {
            self.outstanding += 1;
        }
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn is_done(&self) -> bool {
        self.outstanding == 0
    }
}
