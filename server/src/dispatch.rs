//! Event-name to handler dispatch table.
//!
//! Every inbound envelope is routed by its command name. Commands without a
//! registered handler fall through to the wildcard, which only logs them.

use crate::context::ServerContext;
use crate::error::{HandlerError, HandshakeError};
use crate::handshake::HandshakeSignal;
use log::{debug, warn};
use shared::{events, DirectionUpdate, Envelope, JoinRequest, NameChange};
use std::collections::HashMap;
use std::net::SocketAddr;

pub type Handler = fn(&mut ServerContext, SocketAddr, &Envelope) -> Result<(), HandlerError>;

pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    /// An empty table; every event goes to the wildcard.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The table the server runs with
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(events::JOIN, on_join);
        dispatcher.register(events::NAME_CHANGE, on_name_change);
        dispatcher.register(events::READY_FOR_EVENTS, on_ready_for_events);
        dispatcher.register(events::UPDATE, on_update);
        dispatcher.register(events::LEAVE, on_leave);
        dispatcher
    }

    pub fn register(&mut self, command: &'static str, handler: Handler) {
        self.handlers.insert(command, handler);
    }

    pub fn handles(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    pub fn dispatch(
        &self,
        context: &mut ServerContext,
        peer: SocketAddr,
        envelope: &Envelope,
    ) -> Result<(), HandlerError> {
        match self.handlers.get(envelope.command.as_str()) {
            Some(handler) => handler(context, peer, envelope),
            None => {
                warn!(
                    "Ignoring unknown event `{}` from {} ({} bytes)",
                    envelope.command,
                    peer,
                    envelope.payload.len()
                );
                Ok(())
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

fn on_join(context: &mut ServerContext, peer: SocketAddr, envelope: &Envelope) -> Result<(), HandlerError> {
    let request: JoinRequest = envelope.decode()?;
    debug!("{} wants to join as `{}`", peer, request.name);
    context.join(peer, &request.name)
}

/// During a handshake the confirmation goes to the handshake task. Outside
/// of one it is accepted only when it names an existing session.
fn on_name_change(
    context: &mut ServerContext,
    peer: SocketAddr,
    envelope: &Envelope,
) -> Result<(), HandlerError> {
    let change: NameChange = envelope.decode()?;
    if context.forward_handshake_signal(peer, HandshakeSignal::NameChange(change.clone())) {
        return Ok(());
    }

    if context.game().has_identifier(&change.new_name) {
        debug!("{} re-confirmed `{}`", peer, change.new_name);
        return Ok(());
    }

    let expected = context
        .game()
        .session(peer)
        .map(|session| session.identifier.clone())
        .unwrap_or_default();
    Err(HandshakeError::IdentifierMismatch {
        expected,
        received: change.new_name,
    }
    .into())
}

fn on_ready_for_events(
    context: &mut ServerContext,
    peer: SocketAddr,
    _envelope: &Envelope,
) -> Result<(), HandlerError> {
    if !context.forward_handshake_signal(peer, HandshakeSignal::Ready) {
        debug!("Ignoring ready_for_events from {} outside a handshake", peer);
    }
    Ok(())
}

fn on_update(context: &mut ServerContext, peer: SocketAddr, envelope: &Envelope) -> Result<(), HandlerError> {
    let update: DirectionUpdate = envelope.decode()?;
    context.game_mut().set_direction(peer, update.direction)?;
    Ok(())
}

fn on_leave(context: &mut ServerContext, peer: SocketAddr, _envelope: &Envelope) -> Result<(), HandlerError> {
    context.disconnect(peer, "left the game");
    Ok(())
}
