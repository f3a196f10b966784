use parking_lot::Mutex;
use taskdeck_shared::Task;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::tasks::TaskController;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmState {
    Idle,
    Confirming(Task),
    Deleting(Task),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfirmError {
    #[error("another delete is already awaiting confirmation")]
    Busy,
    #[error("a delete is in flight")]
    InFlight,
    #[error("nothing is awaiting confirmation")]
    NothingPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(Task),
    Failed(String),
}

/// Gate in front of task deletion: request, then confirm or cancel. At most
/// one target is held at a time.
#[derive(Debug)]
pub struct DeleteConfirmation {
    state: Mutex<ConfirmState>,
}

impl Default for DeleteConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

impl DeleteConfirmation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConfirmState::Idle),
        }
    }

    pub fn state(&self) -> ConfirmState {
        self.state.lock().clone()
    }

    /// Whether a new delete may be requested (the trigger control's enabled
    /// state).
    pub fn can_request(&self) -> bool {
        matches!(*self.state.lock(), ConfirmState::Idle)
    }

    /// Whether the dialog's confirm and cancel controls accept input.
    pub fn controls_enabled(&self) -> bool {
        !matches!(*self.state.lock(), ConfirmState::Deleting(_))
    }

    pub fn request(&self, target: Task) -> Result<(), ConfirmError> {
        let mut state = self.state.lock();
        match *state {
            ConfirmState::Idle => {
                debug!(task_id = %target.id, "delete awaiting confirmation");
                *state = ConfirmState::Confirming(target);
                Ok(())
            }
            ConfirmState::Confirming(_) => Err(ConfirmError::Busy),
            ConfirmState::Deleting(_) => Err(ConfirmError::InFlight),
        }
    }

    pub fn prompt(&self) -> Option<ConfirmPrompt> {
        match &*self.state.lock() {
            ConfirmState::Idle => None,
            ConfirmState::Confirming(task) | ConfirmState::Deleting(task) => {
                Some(prompt_for(task))
            }
        }
    }

    pub fn cancel(&self) -> Result<(), ConfirmError> {
        let mut state = self.state.lock();
        match *state {
            ConfirmState::Idle => Ok(()),
            ConfirmState::Confirming(_) => {
                *state = ConfirmState::Idle;
                debug!("delete cancelled");
                Ok(())
            }
            ConfirmState::Deleting(_) => Err(ConfirmError::InFlight),
        }
    }

    /// Issues the delete for the pending target and returns to idle once it
    /// settles. A failure lands in the controller's error slot; the dialog is
    /// not reopened.
    #[instrument(skip(self, tasks))]
    pub async fn confirm(&self, tasks: &TaskController) -> Result<DeleteOutcome, ConfirmError> {
        let target = {
            let mut state = self.state.lock();
            let target = match &*state {
                ConfirmState::Confirming(task) => task.clone(),
                ConfirmState::Deleting(_) => return Err(ConfirmError::InFlight),
                ConfirmState::Idle => return Err(ConfirmError::NothingPending),
            };
            *state = ConfirmState::Deleting(target.clone());
            target
        };

        let _settle = SettleOnDrop(&self.state);
        let outcome = match tasks.delete(&target.id).await {
            Ok(()) => DeleteOutcome::Deleted(target),
            Err(err) => DeleteOutcome::Failed(err.message),
        };

        info!(deleted = matches!(outcome, DeleteOutcome::Deleted(_)), "delete settled");
        Ok(outcome)
    }
}

/// Returns the flow to idle however the confirm future ends.
struct SettleOnDrop<'a>(&'a Mutex<ConfirmState>);

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = ConfirmState::Idle;
    }
}

fn prompt_for(task: &Task) -> ConfirmPrompt {
    let title = task.title.trim();
    let subject = if title.is_empty() { "this task" } else { title };
    ConfirmPrompt {
        title: "Delete Task".to_string(),
        message: format!(
            "Are you sure you want to delete \"{subject}\"? This action cannot be undone."
        ),
    }
}
