use std::sync::Arc;

use duet_common::{Error, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::call::CallOrchestrator;
use crate::chat::ChatChannel;
use crate::events::{ErrorEvent, ErrorReporter, TransportEvent};
use crate::ports::{MediaDevices, PeerBroker};
use crate::transport::TransportSession;
use crate::types::ClientConfig;

/// Transport adapter, call orchestrator and chat wired to one event stream.
pub struct Client<B, M> {
    transport: TransportSession<B>,
    calls: CallOrchestrator<B, M>,
    chat: ChatChannel<B>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    errors: ErrorReporter,
}

impl<B: PeerBroker, M: MediaDevices> Client<B, M> {
    /// `events` is the receiving end of the broker's event channel.
    pub fn new(
        broker: Arc<B>,
        devices: Arc<M>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: ClientConfig,
    ) -> Self {
        let errors = ErrorReporter::new(config.event_capacity);
        let transport = TransportSession::new(broker, config.connect_timeout);
        let calls = CallOrchestrator::new(
            transport.clone(),
            devices,
            errors.clone(),
            config.event_capacity,
        );
        let chat = ChatChannel::new(transport.clone(), errors.clone(), config.event_capacity);
        Self {
            transport,
            calls,
            chat,
            events,
            errors,
        }
    }

    /// Obtain this client's transport identity.
    pub async fn open(&self) -> Result<String> {
        self.transport.open().await.map_err(|err| {
            self.errors.report(&err);
            err
        })
    }

    pub fn transport(&self) -> &TransportSession<B> {
        &self.transport
    }

    pub fn calls(&self) -> &CallOrchestrator<B, M> {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut CallOrchestrator<B, M> {
        &mut self.calls
    }

    pub fn chat(&self) -> &ChatChannel<B> {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatChannel<B> {
        &mut self.chat
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    /// Route one transport event.
    pub fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingData { session, peer } => {
                self.chat.handle_incoming(session, &peer)
            }
            TransportEvent::DataOpened { session } => {
                if let Err(err) = self.transport.handle_data_opened(session) {
                    warn!("flushing data session {} failed: {}", session, err);
                    self.errors.report(&err);
                }
            }
            TransportEvent::DataReceived { session, payload } => {
                self.chat.handle_payload(session, payload)
            }
            TransportEvent::DataClosed { session } => {
                if self.transport.handle_data_closed(session).is_none() {
                    debug!("close for unknown data session {}", session);
                }
            }
            TransportEvent::BrokerError { message } => {
                let err = Error::connection(message);
                warn!("broker error: {}", err);
                self.errors.report(&err);
            }
            media => self.calls.handle_event(media),
        }
    }

    /// Wait for the next event and dispatch it. `false` once the broker is gone.
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Dispatch everything already queued. Returns how many events were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }
}
