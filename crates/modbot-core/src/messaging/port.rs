use async_trait::async_trait;

use crate::{
    domain::ChatTarget,
    messaging::types::{ChatMessage, TransportCapabilities},
    Result,
};

/// Boundary between the bot and a chat service.
///
/// Twitch IRC is the first implementation. Reads and sends take `&self` so one
/// transport can be shared between the dispatch loop and the sender loop;
/// implementations guard their connection state internally.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Raw data as read from the wire (lines, frames, ...).
    type Raw: Send + Sync;

    fn capabilities(&self) -> TransportCapabilities;

    /// Block until new data is available or the poll interval elapses.
    ///
    /// Returns `Error::Transport` on connection loss; the caller retries.
    async fn read_raw(&self) -> Result<Self::Raw>;

    /// Turn raw data into messages. Pure: same input, same output.
    fn package(&self, raw: &Self::Raw) -> Vec<ChatMessage>;

    /// Transmit one outbound message.
    async fn send(&self, target: &ChatTarget, text: &str) -> Result<()>;
}
