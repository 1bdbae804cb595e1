//! In-memory broker used by the test suites.
//!
//! Counts every connection and link opened and closed, and can be told to
//! misbehave: unreachable, hanging handshake, rejected addresses, failing
//! sends/receives/accepts, unavailable depth, or deliveries that stop
//! arriving after a number of messages.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Connection, InboundMessage, OutboundMessage, ReceiverLink, SenderLink, Transport};
use crate::error::TransportError;

#[derive(Clone)]
pub(crate) struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

struct BrokerState {
    reachable: bool,
    hang_on_connect: bool,
    rejected: HashSet<String>,
    send_failure: Option<String>,
    depth_failure: bool,
    reported_depth: Option<usize>,
    deliverable: Option<usize>,
    receive_failure: Option<usize>,
    accept_failure: bool,
    queues: HashMap<String, VecDeque<InboundMessage>>,
    sent: Vec<(String, OutboundMessage)>,
    connections_opened: usize,
    connections_closed: usize,
    links_opened: usize,
    links_closed: usize,
    receive_calls: usize,
    accepted: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                reachable: true,
                hang_on_connect: false,
                rejected: HashSet::new(),
                send_failure: None,
                depth_failure: false,
                reported_depth: None,
                deliverable: None,
                receive_failure: None,
                accept_failure: false,
                queues: HashMap::new(),
                sent: Vec::new(),
                connections_opened: 0,
                connections_closed: 0,
                links_opened: 0,
                links_closed: 0,
                receive_calls: 0,
                accepted: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn set_hang_on_connect(&self, hang: bool) {
        self.lock().hang_on_connect = hang;
    }

    pub fn reject_address(&self, address: &str) {
        self.lock().rejected.insert(address.to_string());
    }

    pub fn fail_sends(&self, message: &str) {
        self.lock().send_failure = Some(message.to_string());
    }

    pub fn fail_depth(&self) {
        self.lock().depth_failure = true;
    }

    /// Report `depth` from `available()` regardless of the real queue length.
    pub fn report_depth(&self, depth: usize) {
        self.lock().reported_depth = Some(depth);
    }

    /// Only the next `count` receives deliver; later ones time out.
    pub fn limit_deliveries(&self, count: usize) {
        self.lock().deliverable = Some(count);
    }

    /// Receives fail once `successes` messages have been delivered.
    pub fn fail_receives_after(&self, successes: usize) {
        self.lock().receive_failure = Some(successes);
    }

    pub fn fail_accepts(&self) {
        self.lock().accept_failure = true;
    }

    pub fn enqueue(&self, queue: &str, message: InboundMessage) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.lock().sent.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn connections_closed(&self) -> usize {
        self.lock().connections_closed
    }

    pub fn links_opened(&self) -> usize {
        self.lock().links_opened
    }

    pub fn links_closed(&self) -> usize {
        self.lock().links_closed
    }

    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    pub fn accepted(&self) -> usize {
        self.lock().accepted
    }
}

/// Reply message with the given body, correlation id and properties.
pub(crate) fn reply(
    body: &str,
    correlation_id: &str,
    properties: &[(&str, &str)],
) -> InboundMessage {
    InboundMessage {
        body: body.as_bytes().to_vec(),
        correlation_id: Some(correlation_id.to_string()),
        application_properties: properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let hang = self.lock().hang_on_connect;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if !state.reachable {
            return Err(TransportError::Connect {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.connections_opened += 1;

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    closed: bool,
}

impl MemoryConnection {
    fn open_link(&self, address: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(address) {
            return Err(TransportError::Link {
                address: address.to_string(),
                message: "amqp:not-found".to_string(),
            });
        }
        state.links_opened += 1;
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_sender(
        &mut self,
        address: &str,
    ) -> Result<Box<dyn SenderLink>, TransportError> {
        self.open_link(address)?;
        Ok(Box::new(MemorySender {
            state: Arc::clone(&self.state),
            address: address.to_string(),
            closed: false,
        }))
    }

    async fn create_receiver(
        &mut self,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn ReceiverLink>, TransportError> {
        self.open_link(address)?;
        Ok(Box::new(MemoryReceiver {
            state: Arc::clone(&self.state),
            address: address.to_string(),
            credit: credit as usize,
            unsettled: Vec::new(),
            closed: false,
        }))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().connections_closed += 1;
        }
    }
}

struct MemorySender {
    state: Arc<Mutex<BrokerState>>,
    address: String,
    closed: bool,
}

#[async_trait]
impl SenderLink for MemorySender {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.send_failure {
            return Err(TransportError::Send {
                address: self.address.clone(),
                message: reason.clone(),
            });
        }
        state.sent.push((self.address.clone(), message.clone()));
        state
            .queues
            .entry(self.address.clone())
            .or_default()
            .push_back(message.into());
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().links_closed += 1;
        }
    }
}

struct MemoryReceiver {
    state: Arc<Mutex<BrokerState>>,
    address: String,
    credit: usize,
    unsettled: Vec<InboundMessage>,
    closed: bool,
}

#[async_trait]
impl ReceiverLink for MemoryReceiver {
    async fn available(&mut self) -> Result<usize, TransportError> {
        let state = self.state.lock().unwrap();
        if state.depth_failure {
            return Err(TransportError::Depth {
                address: self.address.clone(),
                message: "link does not report buffered deliveries".to_string(),
            });
        }
        let queued = state.queues.get(&self.address).map_or(0, VecDeque::len);
        Ok(state.reported_depth.unwrap_or(queued.min(self.credit)))
    }

    async fn receive(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<InboundMessage>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls += 1;
        if state.receive_failure == Some(0) {
            return Err(TransportError::Receive {
                address: self.address.clone(),
                message: "link detached by peer".to_string(),
            });
        }
        if state.deliverable == Some(0) {
            return Ok(None);
        }

        let message = state
            .queues
            .get_mut(&self.address)
            .and_then(VecDeque::pop_front);
        if message.is_some() {
            if let Some(remaining) = state.deliverable.as_mut() {
                *remaining -= 1;
            }
            if let Some(remaining) = state.receive_failure.as_mut() {
                *remaining -= 1;
            }
        }
        if let Some(message) = &message {
            self.unsettled.push(message.clone());
        }
        Ok(message)
    }

    async fn accept(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.accept_failure {
            return Err(TransportError::Accept {
                address: self.address.clone(),
                message: "disposition rejected".to_string(),
            });
        }
        match self.unsettled.pop() {
            Some(_) => {
                state.accepted += 1;
                Ok(())
            }
            None => Err(TransportError::Accept {
                address: self.address.clone(),
                message: "no delivery to accept".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.entry(self.address.clone()).or_default();
        for message in self.unsettled.drain(..).rev() {
            queue.push_front(message);
        }
        state.links_closed += 1;
    }
}
