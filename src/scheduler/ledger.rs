//! Weight accounting for admitted jobs.
//!
//! The ledger is plain data. [`Scheduler`](super::Scheduler) owns it next to
//! the job queue under one lock, so a check-and-admit is atomic with the
//! enqueue it guards.

/// Result of asking whether a job of a given weight may be admitted now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Fits under the ceiling
    Within,
    /// Exceeds the ceiling, but nothing else is outstanding
    Oversized,
    /// Must wait for weight to be released
    Denied,
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Admission::Denied)
    }
}

#[derive(Debug, Clone)]
pub struct WeightLedger {
    ceiling: u64,
    current: u64,
    peak: u64,
    admitted_total: u64,
    released_total: u64,
    oversized_admissions: u64,
}

impl WeightLedger {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            current: 0,
            peak: 0,
            admitted_total: 0,
            released_total: 0,
            oversized_admissions: 0,
        }
    }

    /// Classify a prospective admission without changing state.
    pub fn check(&self, weight: u64) -> Admission {
        if self.current.saturating_add(weight) <= self.ceiling {
            Admission::Within
        } else if self.current == 0 {
            Admission::Oversized
        } else {
            Admission::Denied
        }
    }

    /// Record an admission. Callers must have checked it first.
    pub fn admit(&mut self, weight: u64) -> Admission {
        let admission = self.check(weight);
        debug_assert!(admission.is_allowed(), "admitted a denied weight");
        if admission == Admission::Oversized {
            self.oversized_admissions += 1;
        }
        self.current = self.current.saturating_add(weight);
        self.admitted_total = self.admitted_total.saturating_add(weight);
        self.peak = self.peak.max(self.current);
        admission
    }

    /// Return weight to the budget. Returns false on an over-release, which
    /// leaves the counter clamped at zero.
    pub fn release(&mut self, weight: u64) -> bool {
        self.released_total = self.released_total.saturating_add(weight);
        match self.current.checked_sub(weight) {
            Some(rest) => {
                self.current = rest;
                true
            }
            None => {
                self.current = 0;
                false
            }
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Highest value `current` has reached.
    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted_total
    }

    pub fn released_total(&self) -> u64 {
        self.released_total
    }

    pub fn oversized_admissions(&self) -> u64 {
        self.oversized_admissions
    }

    pub fn is_idle(&self) -> bool {
        self.current == 0
    }
}
