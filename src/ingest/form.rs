use super::normalize::{FeedSource, Normalizer};
use super::IngestError;
use crate::api::Feed;
use crate::sync::FeedManager;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum FormState {
    Idle,
    Submitting,
    /// The last submission created this feed; the input was cleared.
    Succeeded(Feed),
}

struct FormInner {
    state: FormState,
    input: Option<FeedSource>,
    last_error: Option<String>,
}

/// The add-feed form: pending input plus the submission state machine.
///
/// ```text
/// Idle ──submit──> Submitting ──ok──> Succeeded (input cleared)
///                      │
///                      └──err──> Idle (input kept, error recorded)
/// ```
///
/// A second submit while one is running fails with
/// [`IngestError::SubmissionInProgress`] and sends nothing.
pub struct FeedForm {
    inner: Mutex<FormInner>,
}

impl Default for FeedForm {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedForm {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FormInner {
                state: FormState::Idle,
                input: None,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FormInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> FormState {
        self.lock().state.clone()
    }

    pub fn input(&self) -> Option<FeedSource> {
        self.lock().input.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Replaces the pending input. Editing after a success starts over.
    pub fn set_input(&self, source: FeedSource) {
        let mut inner = self.lock();
        inner.input = Some(source);
        if matches!(inner.state, FormState::Succeeded(_)) {
            inner.state = FormState::Idle;
        }
    }

    /// Normalizes the pending input and creates the feed.
    pub async fn submit(
        &self,
        normalizer: &Normalizer,
        feeds: &FeedManager,
    ) -> Result<Feed, IngestError> {
        let source = {
            let mut inner = self.lock();
            if inner.state == FormState::Submitting {
                return Err(IngestError::SubmissionInProgress);
            }
            let Some(source) = inner.input.clone() else {
                return Err(IngestError::Validation("nothing to submit".into()));
            };
            inner.state = FormState::Submitting;
            inner.last_error = None;
            source
        };
        let _reset = ResetOnDrop(self);

        let result = match normalizer.normalize(&source).await {
            Ok(payload) => feeds.create(&payload).await.map_err(IngestError::from),
            Err(e) => Err(e),
        };

        let mut inner = self.lock();
        match &result {
            Ok(feed) => {
                inner.state = FormState::Succeeded(feed.clone());
                inner.input = None;
            }
            Err(e) => {
                inner.state = FormState::Idle;
                inner.last_error = Some(e.to_string());
            }
        }
        result
    }
}

/// Returns the form to Idle if a submit future is dropped mid-flight.
struct ResetOnDrop<'a>(&'a FeedForm);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        if inner.state == FormState::Submitting {
            inner.state = FormState::Idle;
        }
    }
}
