// src/session.rs
use chrono::{DateTime, Local};
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ai::{request_diagnosis, AiConnector, DiagnosisResult};
use crate::capture::CapturedImage;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisState {
    Idle,
    Requesting,
    Succeeded {
        diagnosis: String,
        completed_at: DateTime<Local>,
    },
    Failed,
}

/// One user's capture and analysis. Holds at most one image and one result;
/// anything new replaces what was there.
pub struct Session {
    image: Option<Arc<CapturedImage>>,
    capture_seq: u64,
    state: AnalysisState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            image: None,
            capture_seq: 0,
            state: AnalysisState::Idle,
        }
    }

    pub fn image(&self) -> Option<&Arc<CapturedImage>> {
        self.image.as_ref()
    }

    /// Bumped on every accepted capture so the display can tell a new image apart.
    pub fn capture_seq(&self) -> u64 {
        self.capture_seq
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    pub fn is_requesting(&self) -> bool {
        self.state == AnalysisState::Requesting
    }

    /// Whether the analyze trigger should be enabled.
    pub fn can_analyze(&self) -> bool {
        self.image.is_some() && !self.is_requesting()
    }

    /// Replace the current image and drop any previous result. Refused while
    /// a request is in flight.
    pub fn capture(&mut self, image: CapturedImage) -> bool {
        if self.is_requesting() {
            warn!("Capture ignored: an analysis is still running");
            return false;
        }
        self.image = Some(Arc::new(image));
        self.capture_seq += 1;
        self.state = AnalysisState::Idle;
        info!("Image #{} captured, session reset to idle", self.capture_seq);
        true
    }

    /// Enter `Requesting` and hand out the image to analyze. Returns `None`
    /// (and changes nothing) without an image or while already requesting.
    pub fn begin_analysis(&mut self) -> Option<Arc<CapturedImage>> {
        if !self.can_analyze() {
            info!("Analyze trigger ignored (image present: {}, requesting: {})", self.image.is_some(), self.is_requesting());
            return None;
        }
        self.state = AnalysisState::Requesting;
        self.image.clone()
    }

    pub fn finish_analysis(&mut self, result: DiagnosisResult) {
        if !self.is_requesting() {
            warn!("Dropping diagnosis result: no analysis was running");
            return;
        }
        self.state = match result {
            DiagnosisResult::Success(diagnosis) if !diagnosis.trim().is_empty() => AnalysisState::Succeeded {
                diagnosis,
                completed_at: Local::now(),
            },
            _ => AnalysisState::Failed,
        };
    }

    pub fn clear(&mut self) {
        if self.is_requesting() {
            warn!("Clear ignored: an analysis is still running");
            return;
        }
        self.image = None;
        self.state = AnalysisState::Idle;
    }
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Run one analyze action against a shared session. The lock is released
/// while the model call is in flight. Returns false if the trigger was a no-op.
pub fn run_analysis(session: &Mutex<Session>, connector: &dyn AiConnector, prompt: &str) -> bool {
    let image = match lock_session(session).begin_analysis() {
        Some(image) => image,
        None => return false,
    };
    complete_analysis(session, connector, &image, prompt);
    true
}

/// Second half of an analyze action, for a session already in `Requesting`:
/// call the model without holding the lock, then record the outcome.
pub fn complete_analysis(session: &Mutex<Session>, connector: &dyn AiConnector, image: &CapturedImage, prompt: &str) {
    let result = request_diagnosis(connector, image, prompt);
    lock_session(session).finish_analysis(result);
}
