//! Calibration work queue
//!
//! All blocking calibration calls into the device are owned by one dedicated
//! worker thread. Callers enqueue [`CalibrationRequest`]s and poll a result
//! queue; the worker blocks on the request queue, makes exactly one device
//! call per request, publishes a [`CalibrationOutcome`] and keeps the shared
//! state machine current around each call. `Exit` leaves calibration mode on
//! the device and ends the thread.

use crate::device::TrackerDevice;
use crate::error::{DeviceResult, TrackerError};
use crate::types::{
    CalibrationOutcome, CalibrationRequest, CalibrationState, CalibrationStatus, Eye,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

const QUEUE_DEPTH: usize = 64;

pub struct CalibrationWorker {
    requests: Sender<CalibrationRequest>,
    results: Receiver<CalibrationOutcome>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl CalibrationWorker {
    /// Start the worker thread. The caller still has to enqueue `Enter`
    /// before any other request is accepted by the device.
    pub fn spawn(device: Arc<dyn TrackerDevice>, monocular: bool) -> Self {
        let (request_tx, request_rx) = bounded(QUEUE_DEPTH);
        let (result_tx, result_rx) = bounded(QUEUE_DEPTH);
        let state = Arc::new(AtomicU8::new(CalibrationState::NotEntered as u8));

        let worker_state = state.clone();
        let handle = std::thread::spawn(move || {
            worker_loop(device, request_rx, result_tx, worker_state, monocular)
        });

        Self {
            requests: request_tx,
            results: result_rx,
            state,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> CalibrationState {
        CalibrationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Enqueue one request for the worker.
    pub fn submit(&self, request: CalibrationRequest) -> Result<(), TrackerError> {
        self.requests.send(request).map_err(|_| {
            TrackerError::InvalidOperation("calibration worker has already exited".into())
        })
    }

    /// Non-blocking result retrieval.
    pub fn try_result(&self) -> Option<CalibrationOutcome> {
        self.results.try_recv().ok()
    }

    /// Send `Exit` (if the worker still runs) and join the thread.
    pub fn exit_and_join(&mut self) {
        let _ = self.requests.send(CalibrationRequest::Exit);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("calibration worker panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for CalibrationWorker {
    fn drop(&mut self) {
        self.exit_and_join();
    }
}

fn worker_loop(
    device: Arc<dyn TrackerDevice>,
    requests: Receiver<CalibrationRequest>,
    results: Sender<CalibrationOutcome>,
    state: Arc<AtomicU8>,
    monocular: bool,
) {
    let set_state = |next: CalibrationState| state.store(next as u8, Ordering::SeqCst);

    // callers gate requests on the state, so the post-call transition must
    // be visible before its result can be dequeued
    while let Ok(request) = requests.recv() {
        match request.clone() {
            CalibrationRequest::Enter => {
                let status = status_of(device.calibration_enter());
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, outcome(request, status));
            }
            CalibrationRequest::CollectData { point, eye } => {
                set_state(CalibrationState::CollectingData);
                let status = status_of(device.calibration_collect(point, pick_eye(monocular, eye)));
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, outcome(request, status));
            }
            CalibrationRequest::DiscardData { point, eye } => {
                set_state(CalibrationState::DiscardingData);
                let status = status_of(device.calibration_discard(point, pick_eye(monocular, eye)));
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, outcome(request, status));
            }
            CalibrationRequest::Compute => {
                set_state(CalibrationState::Computing);
                let result = match device.calibration_compute_apply() {
                    Ok(points) => {
                        let mut done = outcome(request, CalibrationStatus::Ok);
                        done.points = Some(points);
                        done
                    }
                    Err(failure) => outcome(request, failed(failure.code, failure.explanation)),
                };
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, result);
            }
            CalibrationRequest::GetData => {
                set_state(CalibrationState::GettingData);
                let result = match device.calibration_data() {
                    Ok(data) => {
                        let mut done = outcome(request, CalibrationStatus::Ok);
                        done.data = Some(data);
                        done
                    }
                    Err(failure) => outcome(request, failed(failure.code, failure.explanation)),
                };
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, result);
            }
            CalibrationRequest::ApplyData(data) => {
                set_state(CalibrationState::ApplyingData);
                let status = status_of(device.calibration_apply_data(&data));
                set_state(CalibrationState::AwaitingPoint);
                publish(&results, outcome(request, status));
            }
            CalibrationRequest::Exit => {
                let status = status_of(device.calibration_leave());
                set_state(CalibrationState::Left);
                publish(&results, outcome(request, status));
                break;
            }
        }
    }
}

fn pick_eye(monocular: bool, eye: Option<Eye>) -> Option<Eye> {
    if monocular {
        Some(eye.unwrap_or(Eye::Left))
    } else {
        None
    }
}

fn status_of(result: DeviceResult<()>) -> CalibrationStatus {
    match result {
        Ok(()) => CalibrationStatus::Ok,
        Err(failure) => failed(failure.code, failure.explanation),
    }
}

fn failed(code: i32, explanation: String) -> CalibrationStatus {
    CalibrationStatus::Failed { code, explanation }
}

fn outcome(request: CalibrationRequest, status: CalibrationStatus) -> CalibrationOutcome {
    CalibrationOutcome {
        request,
        status,
        points: None,
        data: None,
    }
}

fn publish(results: &Sender<CalibrationOutcome>, result: CalibrationOutcome) {
    if results.send(result).is_err() {
        log::warn!("calibration result dropped, caller side is gone");
    }
}
