use crate::pipeline::{Milestone, PipelineError, PipelineStage, PredictionPipeline, PredictionResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub type RequestId = u64;

/// Messages sent from a prediction worker back to its surface.
///
/// Every request produces zero or more `Progress` messages followed by
/// exactly one `Finished` or `Failed`.
#[derive(Clone, Debug)]
pub enum WorkerMessage {
    Progress { request_id: RequestId, milestone: Milestone },
    Finished { request_id: RequestId, result: Box<PredictionResult> },
    Failed { request_id: RequestId, error: PipelineError },
}

impl WorkerMessage {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Progress { request_id, .. }
            | Self::Finished { request_id, .. }
            | Self::Failed { request_id, .. } => *request_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Runs one request on its own task.
///
/// The pipeline runs in a nested task so that a panic anywhere in it still
/// ends the request with a `Failed` message.
pub fn spawn_prediction(
    pipeline: Arc<PredictionPipeline>,
    request_id: RequestId,
    symbol: String,
    range_key: String,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let run = tokio::spawn(async move {
            pipeline
                .run_with_progress(&symbol, &range_key, move |milestone| {
                    let _ = progress_tx.send(WorkerMessage::Progress { request_id, milestone });
                })
                .await
        });

        let terminal = match run.await {
            Ok(Ok(result)) => WorkerMessage::Finished {
                request_id,
                result: Box::new(result),
            },
            Ok(Err(error)) => WorkerMessage::Failed { request_id, error },
            Err(join_err) => {
                error!("Prediction worker {} stopped unexpectedly: {}", request_id, join_err);
                WorkerMessage::Failed {
                    request_id,
                    error: PipelineError::Prediction(format!(
                        "prediction worker stopped unexpectedly: {}",
                        join_err
                    )),
                }
            }
        };

        if tx.send(terminal).is_err() {
            debug!("Receiver for request {} is gone; dropping its outcome", request_id);
        }
    })
}

/// What a surface sees for its active request.
#[derive(Clone, Debug)]
pub enum PredictionEvent {
    Progress(Milestone),
    Completed(Box<PredictionResult>),
    Failed(PipelineError),
}

/// Per-surface request bookkeeping: newest request wins.
///
/// Each submission gets a fresh id and becomes the active request; messages
/// from any older request are dropped when they arrive. Requires a running
/// tokio runtime.
pub struct PredictionController {
    pipeline: Arc<PredictionPipeline>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    last_id: RequestId,
    active: Option<RequestId>,
    stage: PipelineStage,
}

impl PredictionController {
    pub fn new(pipeline: Arc<PredictionPipeline>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pipeline,
            tx,
            rx,
            last_id: 0,
            active: None,
            stage: PipelineStage::Idle,
        }
    }

    pub fn submit(&mut self, symbol: &str, range_key: &str) -> RequestId {
        self.last_id += 1;
        let request_id = self.last_id;
        if let Some(previous) = self.active.replace(request_id) {
            debug!("Request {} superseded by {}", previous, request_id);
        }
        self.stage = PipelineStage::Idle;
        spawn_prediction(
            self.pipeline.clone(),
            request_id,
            symbol.to_string(),
            range_key.to_string(),
            self.tx.clone(),
        );
        request_id
    }

    pub fn active_request(&self) -> Option<RequestId> {
        self.active
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Coarse stage of the active (or last finished) request, as far as its
    /// messages tell. `Idle` until the first one arrives.
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn accept(&mut self, msg: WorkerMessage) -> Option<PredictionEvent> {
        if self.active != Some(msg.request_id()) {
            debug!("Discarding stale message from request {}", msg.request_id());
            return None;
        }
        if msg.is_terminal() {
            self.active = None;
        }
        Some(match msg {
            WorkerMessage::Progress { milestone, .. } => {
                self.stage = match milestone {
                    Milestone::Loading => PipelineStage::Loading,
                    Milestone::Calculating => PipelineStage::Training,
                    Milestone::Done => PipelineStage::Completed,
                };
                PredictionEvent::Progress(milestone)
            }
            WorkerMessage::Finished { result, .. } => {
                self.stage = PipelineStage::Completed;
                PredictionEvent::Completed(result)
            }
            WorkerMessage::Failed { error, .. } => {
                self.stage = PipelineStage::Failed;
                PredictionEvent::Failed(error)
            }
        })
    }

    /// Drains whatever has arrived without blocking.
    pub fn poll(&mut self) -> Vec<PredictionEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Some(event) = self.accept(msg) {
                events.push(event);
            }
        }
        events
    }

    /// Waits for the next event of the active request. Returns `None` once
    /// no request is active.
    pub async fn next_event(&mut self) -> Option<PredictionEvent> {
        while self.active.is_some() {
            let msg = self.rx.recv().await?;
            if let Some(event) = self.accept(msg) {
                return Some(event);
            }
        }
        None
    }
}
