//! Lifecycle of the billable recognition model.
//!
//! The model is started once before a batch run and stopped afterwards on
//! every exit path; start/stop are expensive and rate-limited, so per-item
//! toggling is disallowed. No other component mutates the model state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::services::RecognitionService;
use crate::types::ModelStatus;

/// Process-wide model state, owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("model start is only valid from the stopped state (currently {0:?})")]
    AlreadyActive(ModelState),
    #[error("model {model_id} did not reach running within {timeout_secs}s")]
    StartTimeout { model_id: String, timeout_secs: u64 },
    #[error("model {model_id} failed to start: service reported {status}")]
    StartFailed { model_id: String, status: ModelStatus },
    #[error("recognition service: {0}")]
    Service(String),
    #[error("batch task failed: {0}")]
    BatchPanic(String),
}

/// Drives `Stopped → Starting → Running → Stopping → Stopped`.
///
/// `stop` always brings the local state back to `Stopped`, even when the stop
/// request itself fails, so a crashed batch run never leaves the controller
/// wedged in an active state.
pub struct ModelLifecycleController {
    recognition: Arc<dyn RecognitionService>,
    model_id: String,
    start_timeout: Duration,
    poll_interval: Duration,
    state: Mutex<ModelState>,
}

impl ModelLifecycleController {
    pub fn new(
        recognition: Arc<dyn RecognitionService>,
        model_id: &str,
        start_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            recognition,
            model_id: model_id.to_string(),
            start_timeout,
            poll_interval,
            state: Mutex::new(ModelState::Stopped),
        }
    }

    pub async fn state(&self) -> ModelState {
        *self.state.lock().await
    }

    /// Start the model and wait until the service reports it running.
    ///
    /// Valid only from `Stopped`. A model the service already reports as
    /// running or starting is adopted instead of re-started. On timeout or a
    /// service-reported failure the controller still attempts a stop (the
    /// model may have reached starting) and ends `Stopped`; the returned
    /// error is fatal to the batch run.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock().await;
            if *state != ModelState::Stopped {
                return Err(LifecycleError::AlreadyActive(*state));
            }
            *state = ModelState::Starting;
        }
        info!(model_id = %self.model_id, "starting recognition model");

        match self.recognition.describe_model(&self.model_id).await {
            Ok(ModelStatus::Running) => {
                *self.state.lock().await = ModelState::Running;
                info!(model_id = %self.model_id, "model already running");
                return Ok(());
            }
            Ok(ModelStatus::Starting) => {
                info!(model_id = %self.model_id, "model already starting, waiting");
            }
            Ok(_) => {
                if let Err(e) = self.recognition.start_model(&self.model_id).await {
                    *self.state.lock().await = ModelState::Stopped;
                    return Err(LifecycleError::Service(e.to_string()));
                }
            }
            Err(e) => {
                *self.state.lock().await = ModelState::Stopped;
                return Err(LifecycleError::Service(e.to_string()));
            }
        }

        self.wait_until_running().await
    }

    async fn wait_until_running(&self) -> Result<(), LifecycleError> {
        let deadline = Instant::now() + self.start_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.recognition.describe_model(&self.model_id).await {
                Ok(ModelStatus::Running) => {
                    *self.state.lock().await = ModelState::Running;
                    info!(model_id = %self.model_id, "model running");
                    return Ok(());
                }
                Ok(ModelStatus::Starting) => {}
                Ok(status) => {
                    error!(model_id = %self.model_id, %status, "model failed during start");
                    let _ = self.stop().await;
                    return Err(LifecycleError::StartFailed {
                        model_id: self.model_id.clone(),
                        status,
                    });
                }
                // transient describe failures: keep polling until the deadline
                Err(e) => warn!(model_id = %self.model_id, error = %e, "model status poll failed"),
            }
            if Instant::now() >= deadline {
                let _ = self.stop().await;
                return Err(LifecycleError::StartTimeout {
                    model_id: self.model_id.clone(),
                    timeout_secs: self.start_timeout.as_secs(),
                });
            }
        }
    }

    /// Stop the model. Valid from running or starting; a no-op when already
    /// stopped or stopping. The local state always ends `Stopped`, even when
    /// the stop request fails.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ModelState::Stopped | ModelState::Stopping => return Ok(()),
                ModelState::Running | ModelState::Starting => *state = ModelState::Stopping,
            }
        }
        info!(model_id = %self.model_id, "stopping recognition model");
        let result = self.recognition.stop_model(&self.model_id).await;
        *self.state.lock().await = ModelState::Stopped;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(model_id = %self.model_id, error = %e, "model stop request failed");
                Err(LifecycleError::Service(e.to_string()))
            }
        }
    }
}

/// Run a batch future bracketed by model start/stop.
///
/// The stop runs on every exit path: a start failure stops from within
/// [`ModelLifecycleController::start`], and the batch body runs as a spawned
/// task so that even a panic inside it reaches the stop call before the
/// error is surfaced.
pub async fn run_guarded<T, F>(
    controller: &ModelLifecycleController,
    batch: F,
) -> Result<T, LifecycleError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    controller.start().await?;
    let joined = tokio::spawn(batch).await;
    if let Err(e) = controller.stop().await {
        error!(error = %e, "model stop failed after batch run");
    }
    joined.map_err(|e| LifecycleError::BatchPanic(e.to_string()))
}
