//! AMQP 1.0 transport backed by `fe2o3-amqp`.
//!
//! Each `connect` opens one connection with one session; links are attached
//! on that session. Nothing is pooled.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{
    AmqpValue, ApplicationProperties, Body, Header, Message, MessageId, Properties,
};
use fe2o3_amqp::types::primitives::{SimpleValue, Timestamp, Uuid as AmqpUuid, Value};
use fe2o3_amqp::{Connection as AmqpConnection, Receiver, Sender, Session};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Connection, InboundMessage, OutboundMessage, ReceiverLink, SenderLink, Transport};
use crate::error::TransportError;

type ReplyDelivery = Delivery<Body<Value>>;

/// `fe2o3-amqp` backed transport.
#[derive(Debug, Clone)]
pub struct AmqpTransport {
    prefetch_window: Duration,
}

impl AmqpTransport {
    /// `prefetch_window` is how long a receiver waits for the next buffered
    /// delivery while counting what the broker has already pushed.
    pub fn new(prefetch_window: Duration) -> Self {
        Self { prefetch_window }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let container_id = format!("cim-ecp-bridge-{}", Uuid::new_v4());

        let mut connection = AmqpConnection::open(container_id, url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "amqp_connection_close_error");
                }
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    message: format!("session not established: {}", e),
                });
            }
        };

        Ok(Box::new(AmqpSessionConnection {
            connection,
            session,
            prefetch_window: self.prefetch_window,
            closed: false,
        }))
    }
}

struct AmqpSessionConnection {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
    prefetch_window: Duration,
    closed: bool,
}

#[async_trait]
impl Connection for AmqpSessionConnection {
    async fn create_sender(
        &mut self,
        address: &str,
    ) -> Result<Box<dyn SenderLink>, TransportError> {
        let link_name = format!("ecp-sender-{}", Uuid::new_v4());

        let sender = Sender::attach(&mut self.session, link_name, address)
            .await
            .map_err(|e| TransportError::Link {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        debug!(address = %address, "amqp_sender_attached");

        Ok(Box::new(AmqpSenderLink {
            sender: Some(sender),
            address: address.to_string(),
        }))
    }

    async fn create_receiver(
        &mut self,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn ReceiverLink>, TransportError> {
        let link_name = format!("ecp-receiver-{}", Uuid::new_v4());

        let receiver = Receiver::builder()
            .name(link_name)
            .source(address)
            .credit_mode(CreditMode::Auto(credit))
            .attach(&mut self.session)
            .await
            .map_err(|e| TransportError::Link {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        debug!(address = %address, credit = credit, "amqp_receiver_attached");

        Ok(Box::new(AmqpReceiverLink {
            receiver: Some(receiver),
            address: address.to_string(),
            credit: credit as usize,
            prefetch_window: self.prefetch_window,
            buffered: VecDeque::new(),
            current: None,
        }))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.session.end().await {
            warn!(error = %e, "amqp_session_end_error");
        }
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "amqp_connection_close_error");
        }
    }
}

struct AmqpSenderLink {
    sender: Option<Sender>,
    address: String,
}

#[async_trait]
impl SenderLink for AmqpSenderLink {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        let sender = self.sender.as_mut().ok_or_else(|| TransportError::Send {
            address: self.address.clone(),
            message: "link is closed".to_string(),
        })?;

        // The settlement outcome future is dropped unawaited.
        sender
            .send_batchable(encode(message))
            .await
            .map(|_outcome| ())
            .map_err(|e| TransportError::Send {
                address: self.address.clone(),
                message: e.to_string(),
            })
    }

    async fn close(&mut self) {
        if let Some(sender) = self.sender.take() {
            if let Err(e) = sender.close().await {
                warn!(address = %self.address, error = %e, "amqp_sender_close_error");
            }
        }
    }
}

struct AmqpReceiverLink {
    receiver: Option<Receiver>,
    address: String,
    credit: usize,
    prefetch_window: Duration,
    buffered: VecDeque<ReplyDelivery>,
    current: Option<ReplyDelivery>,
}

impl AmqpReceiverLink {
    fn receiver(&mut self) -> Result<&mut Receiver, TransportError> {
        let address = &self.address;
        self.receiver.as_mut().ok_or_else(|| TransportError::Receive {
            address: address.clone(),
            message: "link is closed".to_string(),
        })
    }
}

#[async_trait]
impl ReceiverLink for AmqpReceiverLink {
    async fn available(&mut self) -> Result<usize, TransportError> {
        let window = self.prefetch_window;
        let credit = self.credit;
        let address = self.address.clone();

        while self.buffered.len() < credit {
            let receiver = self.receiver.as_mut().ok_or_else(|| TransportError::Depth {
                address: address.clone(),
                message: "link is closed".to_string(),
            })?;

            match tokio::time::timeout(window, receiver.recv::<Body<Value>>()).await {
                Ok(Ok(delivery)) => self.buffered.push_back(delivery),
                Ok(Err(e)) => {
                    return Err(TransportError::Depth {
                        address,
                        message: e.to_string(),
                    })
                }
                Err(_) => break,
            }
        }

        Ok(self.buffered.len())
    }

    async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, TransportError> {
        let delivery = match self.buffered.pop_front() {
            Some(delivery) => delivery,
            None => {
                let address = self.address.clone();
                let receiver = self.receiver()?;
                match tokio::time::timeout(timeout, receiver.recv::<Body<Value>>()).await {
                    Ok(Ok(delivery)) => delivery,
                    Ok(Err(e)) => {
                        return Err(TransportError::Receive {
                            address,
                            message: e.to_string(),
                        })
                    }
                    Err(_) => return Ok(None),
                }
            }
        };

        let message = decode(delivery.message());
        self.current = Some(delivery);
        Ok(Some(message))
    }

    async fn accept(&mut self) -> Result<(), TransportError> {
        let address = self.address.clone();
        let delivery = self.current.take().ok_or_else(|| TransportError::Accept {
            address: address.clone(),
            message: "no delivery to accept".to_string(),
        })?;

        let receiver = self.receiver.as_mut().ok_or_else(|| TransportError::Accept {
            address: address.clone(),
            message: "link is closed".to_string(),
        })?;

        receiver
            .accept(&delivery)
            .await
            .map_err(|e| TransportError::Accept {
                address,
                message: e.to_string(),
            })
    }

    async fn close(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            if !self.buffered.is_empty() {
                debug!(
                    address = %self.address,
                    released = self.buffered.len(),
                    "amqp_receiver_releasing_buffered"
                );
            }
            self.buffered.clear();
            self.current = None;

            if let Err(e) = receiver.close().await {
                warn!(address = %self.address, error = %e, "amqp_receiver_close_error");
            }
        }
    }
}

fn encode(message: OutboundMessage) -> Message<Body<Value>> {
    let properties = Properties::builder()
        .message_id(message.message_id)
        .correlation_id(message.correlation_id)
        .creation_time(Timestamp::from_milliseconds(
            message.creation_time.timestamp_millis(),
        ))
        .build();

    let application_properties = message
        .application_properties
        .into_iter()
        .fold(ApplicationProperties::builder(), |builder, (key, value)| {
            builder.insert(key, value)
        })
        .build();

    Message {
        header: Some(Header {
            durable: message.durable,
            ..Default::default()
        }),
        delivery_annotations: None,
        message_annotations: None,
        properties: Some(properties),
        application_properties: Some(application_properties),
        body: Body::Value(AmqpValue(Value::String(message.body))),
        footer: None,
    }
}

fn decode(message: &Message<Body<Value>>) -> InboundMessage {
    let correlation_id = message
        .properties
        .as_ref()
        .and_then(|properties| properties.correlation_id.as_ref())
        .map(message_id_text);

    let application_properties = message
        .application_properties
        .as_ref()
        .map(|properties| {
            properties
                .0
                .iter()
                .map(|(key, value)| (key.clone(), simple_value_text(value)))
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        body: body_bytes(&message.body),
        correlation_id,
        application_properties,
    }
}

fn body_bytes(body: &Body<Value>) -> Vec<u8> {
    match body {
        Body::Value(AmqpValue(Value::Binary(bytes))) => bytes.to_vec(),
        Body::Value(AmqpValue(value)) => value_text(value)
            .map(String::into_bytes)
            .unwrap_or_default(),
        Body::Data(sections) => sections
            .iter()
            .flat_map(|section| section.0.iter().copied())
            .collect(),
        _ => Vec::new(),
    }
}

/// Plain text of a scalar body value. Compound values have no text form.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Symbol(symbol) => symbol.0.clone(),
        Value::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Bool(flag) => flag.to_string(),
        Value::Ubyte(number) => number.to_string(),
        Value::Ushort(number) => number.to_string(),
        Value::Uint(number) => number.to_string(),
        Value::Ulong(number) => number.to_string(),
        Value::Byte(number) => number.to_string(),
        Value::Short(number) => number.to_string(),
        Value::Int(number) => number.to_string(),
        Value::Long(number) => number.to_string(),
        Value::Float(number) => number.to_string(),
        Value::Double(number) => number.to_string(),
        Value::Char(c) => c.to_string(),
        Value::Timestamp(timestamp) => timestamp.milliseconds().to_string(),
        Value::Uuid(uuid) => uuid_text(uuid),
        _ => return None,
    };
    Some(text)
}

fn message_id_text(id: &MessageId) -> String {
    match id {
        MessageId::String(text) => text.clone(),
        MessageId::Ulong(number) => number.to_string(),
        MessageId::Uuid(uuid) => uuid_text(uuid),
        MessageId::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn simple_value_text(value: &SimpleValue) -> String {
    match value {
        SimpleValue::Null => "null".to_string(),
        SimpleValue::String(text) => text.clone(),
        SimpleValue::Symbol(symbol) => symbol.0.clone(),
        SimpleValue::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        SimpleValue::Bool(flag) => flag.to_string(),
        SimpleValue::Ubyte(number) => number.to_string(),
        SimpleValue::Ushort(number) => number.to_string(),
        SimpleValue::Uint(number) => number.to_string(),
        SimpleValue::Ulong(number) => number.to_string(),
        SimpleValue::Byte(number) => number.to_string(),
        SimpleValue::Short(number) => number.to_string(),
        SimpleValue::Int(number) => number.to_string(),
        SimpleValue::Long(number) => number.to_string(),
        SimpleValue::Float(number) => number.to_string(),
        SimpleValue::Double(number) => number.to_string(),
        SimpleValue::Char(c) => c.to_string(),
        SimpleValue::Timestamp(timestamp) => timestamp.milliseconds().to_string(),
        SimpleValue::Uuid(uuid) => uuid_text(uuid),
        // Decimals have no portable text form
        other => format!("{:?}", other),
    }
}

/// Hyphenated form of an AMQP uuid.
fn uuid_text(uuid: &AmqpUuid) -> String {
    Uuid::from_bytes(uuid.clone().into_inner()).to_string()
}
