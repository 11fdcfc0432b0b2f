// THEORY:
// Concurrent front for the synchronous `TriageEngine`. A single dispatcher task hands
// requests round-robin to a fixed set of workers; each worker runs the whole
// pipeline on a blocking thread and replies over a oneshot channel.
//
// The engine is shared read-only through an `Arc`, so workers never coordinate with
// each other. The scorer's own mutex is the only point of serialization. Requests
// complete in whatever order their workers finish; no ordering is promised.

use crate::error::TriageError;
use crate::pipeline::{TriageEngine, TriageReport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub struct TriageTask {
    pub request_id: u64,
    pub bytes: Vec<u8>,
    pub result_sender: oneshot::Sender<Result<TriageReport, TriageError>>,
}

pub struct TriageWorkerPool {
    task_sender: mpsc::UnboundedSender<TriageTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    next_request_id: std::sync::atomic::AtomicU64,
}

impl TriageWorkerPool {
    /// One worker per logical CPU.
    pub fn with_default_workers(engine: Arc<TriageEngine>) -> Self {
        Self::new(engine, num_cpus::get())
    }

    /// Must be called from within a tokio runtime.
    pub fn new(engine: Arc<TriageEngine>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<TriageTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<TriageTask>())
            .unzip();

        // Dispatcher: round-robin over the workers.
        let mut workers = Vec::with_capacity(worker_count + 1);
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    let _ = task
                        .result_sender
                        .send(Err(TriageError::WorkerPool("worker stopped")));
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        }));

        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let worker_engine = Arc::clone(&engine);
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let TriageTask {
                        request_id,
                        bytes,
                        result_sender,
                    } = task;
                    let engine = Arc::clone(&worker_engine);
                    let result = tokio::task::spawn_blocking(move || engine.triage(&bytes))
                        .await
                        .unwrap_or(Err(TriageError::WorkerPool("triage task panicked")));
                    debug!(worker_id, request_id, ok = result.is_ok(), "request finished");
                    let _ = result_sender.send(result);
                }
            }));
        }

        Self {
            task_sender,
            workers,
            next_request_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len() - 1
    }

    pub async fn triage(&self, bytes: Vec<u8>) -> Result<TriageReport, TriageError> {
        let request_id = self
            .next_request_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (result_sender, result_receiver) = oneshot::channel();

        self.task_sender
            .send(TriageTask {
                request_id,
                bytes,
                result_sender,
            })
            .map_err(|_| TriageError::WorkerPool("failed to send task to worker pool"))?;

        result_receiver
            .await
            .map_err(|_| TriageError::WorkerPool("failed to receive result from worker"))?
    }

    /// Submits every upload at once. Results line up with the inputs.
    pub async fn triage_batch(&self, uploads: Vec<Vec<u8>>) -> Vec<Result<TriageReport, TriageError>> {
        futures::future::join_all(uploads.into_iter().map(|bytes| self.triage(bytes))).await
    }
}

impl Drop for TriageWorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriageConfig;
    use crate::core_modules::classification::TriageLabel;
    use crate::error::DecodeError;
    use image::{ImageEncoder, Rgb, RgbImage};

    fn png(value: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(16, 16, Rgb([value, value, value]));
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(image.as_raw(), 16, 16, image::ExtendedColorType::Rgb8)
            .expect("Error encoding PNG.");
        buffer
    }

    fn engine() -> Arc<TriageEngine> {
        Arc::new(TriageEngine::new(&TriageConfig::default(), None).unwrap())
    }

    #[tokio::test]
    async fn concurrent_requests_each_get_their_own_result() {
        let pool = TriageWorkerPool::new(engine(), 3);
        assert_eq!(pool.worker_count(), 3);

        let inputs = [(40u8, TriageLabel::Normal), (110, TriageLabel::PathogenB), (200, TriageLabel::PathogenA)];
        let uploads = inputs.iter().cycle().take(9).map(|(value, _)| png(*value)).collect();
        let results = pool.triage_batch(uploads).await;
        assert_eq!(results.len(), 9);

        for (result, (_, expected)) in results.into_iter().zip(inputs.iter().cycle()) {
            assert_eq!(result.unwrap().classification.label, *expected);
        }
    }

    #[tokio::test]
    async fn decode_errors_come_back_through_the_pool() {
        let pool = TriageWorkerPool::new(engine(), 1);
        let result = pool.triage(b"not an image".to_vec()).await;
        assert!(matches!(
            result,
            Err(TriageError::Decode(DecodeError::UnsupportedFormat))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scorer_is_never_entered_concurrently() {
        use crate::core_modules::classification::ScoreVector;
        use crate::core_modules::inference::FnScorer;
        use ndarray::ArrayViewD;
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::time::Duration;

        let in_flight = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let scorer = {
            let (in_flight, overlapped, calls) = (in_flight.clone(), overlapped.clone(), calls.clone());
            FnScorer::new("exclusive", move |_input: ArrayViewD<'_, f32>| {
                if in_flight.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(5));
                calls.fetch_add(1, Ordering::SeqCst);
                in_flight.store(false, Ordering::SeqCst);
                ScoreVector::new(vec![0.9])
            })
        };
        let engine = Arc::new(TriageEngine::new(&TriageConfig::default(), Some(Box::new(scorer))).unwrap());
        let pool = TriageWorkerPool::new(engine, 4);

        let results = pool.triage_batch((0..16).map(|_| png(120)).collect()).await;
        assert_eq!(results.len(), 16);
        for result in results {
            assert!(result.unwrap().classification.is_model_based());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 16);
        assert!(!overlapped.load(Ordering::SeqCst), "scorer entered by two requests at once");
    }

    #[tokio::test]
    async fn zero_workers_is_clamped_to_one() {
        let pool = TriageWorkerPool::new(engine(), 0);
        assert_eq!(pool.worker_count(), 1);
        assert!(pool.triage(png(40)).await.is_ok());
    }
}
