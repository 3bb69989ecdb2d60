use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    Error,
    inference::{InferenceRequest, InferenceResponse},
};

type ResponseSender = oneshot::Sender<Result<InferenceResponse, Error>>;

#[derive(Default)]
struct ChannelState {
    next_id: u64,
    pending: BTreeMap<u64, ResponseSender>,
    parked: BTreeMap<u64, InferenceResponse>,
    closed: bool,
}

impl ChannelState {
    fn dispatch(&mut self, response: InferenceResponse) {
        let sender = match response.id {
            Some(id) => self.pending.remove(&id).map(|sender| (id, sender)),
            None => self.pending.pop_first(),
        };

        match sender {
            Some((id, sender)) => {
                if sender.send(response.into_result(id)).is_err() {
                    log::debug!("Dropping response of abandoned inference request {id}");
                }
            }
            None => match response.id {
                Some(id) => {
                    if self.parked.len() >= InferenceChannel::PARKED_LIMIT {
                        if let Some((dropped, _)) = self.parked.pop_first() {
                            log::warn!("Dropping unclaimed inference response {dropped}");
                        }
                    }
                    self.parked.insert(id, response);
                }
                None => log::warn!("Dropping inference response without a pending request"),
            },
        }
    }

    fn close(&mut self) {
        self.closed = true;
        for (_, sender) in std::mem::take(&mut self.pending) {
            if sender.send(Err(Error::InferenceDisconnected)).is_err() {
                log::debug!("Inference request abandoned before disconnection");
            }
        }
    }
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("parked", &self.parked.keys().collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish()
    }
}

/// A response that has not arrived yet.
pub struct PendingResponse {
    id: u64,
    receiver: oneshot::Receiver<Result<InferenceResponse, Error>>,
}

impl PendingResponse {
    /// Get the request id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the response arrives or the timeout elapses.
    pub fn wait(self, timeout: Duration) -> Result<InferenceResponse, Error> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(oneshot::RecvTimeoutError::Timeout) => Err(Error::InferenceTimeout {
                id: self.id,
                timeout,
            }),
            Err(oneshot::RecvTimeoutError::Disconnected) => Err(Error::InferenceDisconnected),
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A JSON lines request and response channel with correlation ids.
///
/// Responses are matched to requests by id in any order. A response without an id goes to the
/// oldest pending request.
pub struct InferenceChannel {
    writer: Mutex<Box<dyn Write + Send>>,
    state: Arc<Mutex<ChannelState>>,
    _reader: JoinHandle<()>,
}

impl InferenceChannel {
    /// The maximum number of responses kept for requests not yet registered.
    pub const PARKED_LIMIT: usize = 64;

    /// Create a new channel and start reading responses on a background thread.
    pub fn new(reader: impl BufRead + Send + 'static, writer: impl Write + Send + 'static) -> Self {
        log::debug!("Creating inference channel");

        let state = Arc::new(Mutex::new(ChannelState {
            next_id: 1,
            ..Default::default()
        }));

        let reader = {
            let state = state.clone();
            std::thread::spawn(move || Self::read_loop(reader, state))
        };

        Self {
            writer: Mutex::new(Box::new(writer)),
            state,
            _reader: reader,
        }
    }

    /// Send a request, its id is replaced by the next correlation id.
    pub fn submit(&self, mut request: InferenceRequest) -> Result<PendingResponse, Error> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::InferenceDisconnected);
            }

            let id = state.next_id;
            state.next_id += 1;

            match state.parked.remove(&id) {
                Some(response) => {
                    if tx.send(response.into_result(id)).is_err() {
                        log::debug!("Inference request {id} abandoned");
                    }
                }
                None => {
                    state.pending.insert(id, tx);
                }
            }
            id
        };

        request.id = id;
        let line = serde_json::to_string(&request)?;

        log::debug!("Submitting inference request {id}");

        let written = {
            let mut writer = self.writer.lock();
            writeln!(writer, "{line}").and_then(|_| writer.flush())
        };

        if let Err(e) = written {
            self.state.lock().pending.remove(&id);
            return Err(e.into());
        }

        Ok(PendingResponse { id, receiver: rx })
    }

    /// Get the number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Check if the reader reached the end of the stream.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn read_loop(reader: impl BufRead, state: Arc<Mutex<ChannelState>>) {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Error reading inference response: {e}");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<InferenceResponse>(line) {
                Ok(response) => state.lock().dispatch(response),
                Err(e) => log::debug!("Skipping non-response line {line:?}: {e}"),
            }
        }

        log::debug!("Inference channel closed");
        state.lock().close();
    }
}

impl std::fmt::Debug for InferenceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceChannel")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
