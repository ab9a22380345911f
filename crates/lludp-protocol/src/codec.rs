//! The LLUDP wire codec.
//!
//! ```text
//! [flags][packet_id u32 BE][extra_len]
//! [extra bytes]
//! [body: FF-prefix, message number, blocks]   zero-coded iff flags & 0x80
//! [ack ids u32 BE, newest first][ack count]   present iff flags & 0x10
//! ```

use std::sync::Arc;

use lludp_transport::Direction;

use crate::deserializer;
use crate::dictionary::TemplateDictionary;
use crate::error::{DeserializeError, SerializeError};
use crate::message::Message;
use crate::packer::TextFields;
use crate::serializer;

/// Converts between [`Message`]s and datagrams using one template
/// dictionary.
///
/// Cheap to clone; the dictionary and text classifier are shared.
#[derive(Debug, Clone)]
pub struct UdpCodec {
    dictionary: Arc<TemplateDictionary>,
    text_fields: Arc<TextFields>,
}

impl UdpCodec {
    pub fn new(dictionary: Arc<TemplateDictionary>) -> Self {
        Self {
            dictionary,
            text_fields: Arc::new(TextFields::default()),
        }
    }

    /// Replaces the text-field classifier.
    pub fn with_text_fields(mut self, text_fields: TextFields) -> Self {
        self.text_fields = Arc::new(text_fields);
        self
    }

    pub fn dictionary(&self) -> &Arc<TemplateDictionary> {
        &self.dictionary
    }

    pub fn text_fields(&self) -> &TextFields {
        &self.text_fields
    }

    /// Serializes a message.
    ///
    /// A message whose body was never parsed is written back from its
    /// raw bytes, so relayed packets leave exactly as they arrived unless
    /// something changed the header.
    ///
    /// # Errors
    /// Fails if the message is unknown to the dictionary, if a block or
    /// field doesn't match its template, or if the acks or extra header
    /// overflow their one-byte counts.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, SerializeError> {
        serializer::encode(&self.dictionary, message)
    }

    /// Decodes a datagram and parses its body.
    pub fn decode(
        &self,
        data: &[u8],
        direction: Direction,
    ) -> Result<Message, DeserializeError> {
        let mut message = self.decode_lazy(data, direction)?;
        self.parse_body(&mut message)?;
        Ok(message)
    }

    /// Decodes the header, acks and message number only.
    ///
    /// The body stays raw until [`parse_body`](Self::parse_body).
    pub fn decode_lazy(
        &self,
        data: &[u8],
        direction: Direction,
    ) -> Result<Message, DeserializeError> {
        deserializer::decode_lazy(&self.dictionary, data, direction)
    }

    /// Parses the raw body of a lazily decoded message into blocks.
    ///
    /// Does nothing for parsed messages and for unknown message numbers.
    /// On error the message keeps its raw body.
    pub fn parse_body(&self, message: &mut Message) -> Result<(), DeserializeError> {
        deserializer::parse_body(&self.dictionary, &self.text_fields, message)
    }
}

impl Default for UdpCodec {
    /// A codec over the builtin dictionary.
    fn default() -> Self {
        Self::new(Arc::clone(TemplateDictionary::builtin()))
    }
}
