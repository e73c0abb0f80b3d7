use std::collections::VecDeque;
use std::mem;

use crate::Error;
use const_sv2::{
    AEAD_MAC_LEN, EXTENSION_TYPE_NO_EXTENSION, HANDSHAKE_STEP1_SIZE, HANDSHAKE_STEP2_SIZE,
    HANDSHAKE_STEP3_SIZE, NOISE_FRAME_MAX_SIZE, SV2_FRAME_CHUNK_SIZE, SV2_FRAME_HEADER_SIZE,
};
use framing_sv2::{Header, NoiseHeader};
use noise_sv2::{Initiator, NoiseCodec, Responder};

/// Largest slice [`Sv2Transport::get_bytes_to_send`] hands out at once.
const SEND_CHUNK_SIZE: usize = 64 * 1024;

/// A logical Sv2 message: type byte plus raw payload. Parsing the payload
/// into a typed message is the application layer's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sv2NetMsg {
    pub extension_type: u16,
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl Sv2NetMsg {
    pub fn new(msg_type: u8, payload: Vec<u8>) -> Self {
        Self {
            extension_type: EXTENSION_TYPE_NO_EXTENSION,
            msg_type,
            payload,
        }
    }
}

enum State {
    /// Initiator: message 1 queued, waiting for the 170-byte reply.
    InitiatorAwaitStep2(Box<Initiator>),
    /// Responder: waiting for the initiator's 32-byte ephemeral key.
    ResponderAwaitStep1(Box<Responder>),
    /// Responder: message 2 queued, waiting for the 48-byte final message.
    ResponderAwaitStep3(Box<Responder>),
    /// Handshake done; frames flow.
    Transport(NoiseCodec),
    /// A fatal error happened; every further call fails.
    Poisoned,
}

/// Stateful encrypted transport for one connection. See the crate docs for
/// the calling contract.
pub struct Sv2Transport {
    state: State,
    /// Raw socket bytes not yet consumed by the handshake or frame parser.
    recv_buffer: Vec<u8>,
    /// Decrypted plaintext waiting to form complete messages.
    sv2_buffer: Vec<u8>,
    /// Complete messages ready for the application.
    recv_messages: VecDeque<Sv2NetMsg>,
    /// Framed (encrypted) bytes waiting for the socket.
    send_buffer: Vec<u8>,
    send_offset: usize,
}

impl std::fmt::Debug for Sv2Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sv2Transport")
            .field("recv_buffered", &self.recv_buffer.len())
            .field("send_pending", &self.pending_send_len())
            .finish()
    }
}

impl Sv2Transport {
    /// Server-side transport. Sends nothing until the peer's first
    /// handshake bytes arrive.
    pub fn new_responder(responder: Box<Responder>) -> Self {
        Self {
            state: State::ResponderAwaitStep1(responder),
            recv_buffer: Vec::new(),
            sv2_buffer: Vec::new(),
            recv_messages: VecDeque::new(),
            send_buffer: Vec::new(),
            send_offset: 0,
        }
    }

    /// Client-side transport. Handshake message 1 is queued immediately;
    /// flush it with [`Sv2Transport::get_bytes_to_send`].
    pub fn new_initiator(mut initiator: Box<Initiator>) -> Result<Self, Error> {
        let first = initiator.step_0()?;
        Ok(Self {
            state: State::InitiatorAwaitStep2(initiator),
            recv_buffer: Vec::new(),
            sv2_buffer: Vec::new(),
            recv_messages: VecDeque::new(),
            send_buffer: first.to_vec(),
            send_offset: 0,
        })
    }

    /// True once the handshake has completed in both directions.
    pub fn ready(&self) -> bool {
        matches!(self.state, State::Transport(_))
    }

    /// Bytes queued for the socket and not yet marked sent.
    pub fn pending_send_len(&self) -> usize {
        self.send_buffer.len() - self.send_offset
    }

    /// Queues one logical message for sending. Returns `false` while the
    /// handshake is incomplete or a previous message is still in flight;
    /// the caller keeps the message queued and retries after draining.
    pub fn set_message_to_send(&mut self, msg: &Sv2NetMsg) -> bool {
        if !self.ready() || self.pending_send_len() != 0 {
            return false;
        }

        let header = match Header::new(msg.extension_type, msg.msg_type, msg.payload.len()) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let mut plaintext = Vec::with_capacity(SV2_FRAME_HEADER_SIZE + msg.payload.len());
        plaintext.extend_from_slice(&header.to_bytes());
        plaintext.extend_from_slice(&msg.payload);

        let codec = match &mut self.state {
            State::Transport(codec) => codec,
            _ => return false,
        };

        self.send_buffer.clear();
        self.send_offset = 0;
        let mut seal_failed = false;
        for chunk in plaintext.chunks(SV2_FRAME_CHUNK_SIZE) {
            let mut sealed = chunk.to_vec();
            if codec.encrypt(&mut sealed).is_err() {
                seal_failed = true;
                break;
            }
            self.send_buffer
                .extend_from_slice(&NoiseHeader::encode_len(sealed.len()));
            self.send_buffer.extend_from_slice(&sealed);
        }
        if seal_failed {
            // Nonce exhaustion; the session is over.
            self.state = State::Poisoned;
            self.send_buffer.clear();
            return false;
        }
        true
    }

    /// Returns the next slice of outbound bytes (at most 64 KiB) and
    /// whether more will follow it: either further queued bytes, or the
    /// caller's own `have_next` promise of another message.
    pub fn get_bytes_to_send(&self, have_next: bool) -> (&[u8], bool) {
        let pending = &self.send_buffer[self.send_offset..];
        let slice = &pending[..pending.len().min(SEND_CHUNK_SIZE)];
        let more = slice.len() < pending.len() || have_next;
        (slice, more)
    }

    /// Acknowledges that the socket consumed `n` bytes of the slice last
    /// returned by [`Sv2Transport::get_bytes_to_send`].
    pub fn mark_bytes_sent(&mut self, n: usize) {
        self.send_offset += n;
        debug_assert!(self.send_offset <= self.send_buffer.len());
        if self.send_offset >= self.send_buffer.len() {
            self.send_buffer.clear();
            self.send_offset = 0;
        }
    }

    /// Feeds bytes read from the socket. Returns `Ok(true)` if at least
    /// one complete message became available; any error is fatal for the
    /// session and the peer must be disconnected.
    pub fn received_bytes(&mut self, data: &[u8]) -> Result<bool, Error> {
        self.recv_buffer.extend_from_slice(data);
        let had = self.recv_messages.len();

        loop {
            match mem::replace(&mut self.state, State::Poisoned) {
                State::ResponderAwaitStep1(mut responder) => {
                    if self.recv_buffer.len() < HANDSHAKE_STEP1_SIZE {
                        self.state = State::ResponderAwaitStep1(responder);
                        break;
                    }
                    let msg: [u8; HANDSHAKE_STEP1_SIZE] = self.take_exact();
                    let reply = responder.step_1(msg)?;
                    self.send_buffer.extend_from_slice(&reply);
                    self.state = State::ResponderAwaitStep3(responder);
                }
                State::ResponderAwaitStep3(mut responder) => {
                    if self.recv_buffer.len() < HANDSHAKE_STEP3_SIZE {
                        self.state = State::ResponderAwaitStep3(responder);
                        break;
                    }
                    let msg: [u8; HANDSHAKE_STEP3_SIZE] = self.take_exact();
                    let (codec, _peer_static) = responder.step_3(msg)?;
                    self.state = State::Transport(codec);
                }
                State::InitiatorAwaitStep2(mut initiator) => {
                    if self.recv_buffer.len() < HANDSHAKE_STEP2_SIZE {
                        self.state = State::InitiatorAwaitStep2(initiator);
                        break;
                    }
                    let msg: [u8; HANDSHAKE_STEP2_SIZE] = self.take_exact();
                    let (reply, codec) = initiator.step_2(msg)?;
                    self.send_buffer.extend_from_slice(&reply);
                    self.state = State::Transport(codec);
                }
                State::Transport(mut codec) => {
                    let progressed = Self::process_frame(
                        &mut codec,
                        &mut self.recv_buffer,
                        &mut self.sv2_buffer,
                        &mut self.recv_messages,
                    )?;
                    self.state = State::Transport(codec);
                    if !progressed {
                        break;
                    }
                }
                State::Poisoned => return Err(Error::Poisoned),
            }
        }

        Ok(self.recv_messages.len() > had)
    }

    /// Next complete message, if any.
    pub fn get_received_message(&mut self) -> Option<Sv2NetMsg> {
        self.recv_messages.pop_front()
    }

    fn take_exact<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.recv_buffer[..N]);
        self.recv_buffer.drain(..N);
        out
    }

    /// Parses and decrypts at most one frame from `recv_buffer`. Returns
    /// whether a frame was consumed.
    fn process_frame(
        codec: &mut NoiseCodec,
        recv_buffer: &mut Vec<u8>,
        sv2_buffer: &mut Vec<u8>,
        recv_messages: &mut VecDeque<Sv2NetMsg>,
    ) -> Result<bool, Error> {
        if recv_buffer.len() < NoiseHeader::SIZE {
            return Ok(false);
        }
        let frame_len = NoiseHeader::decode_len(recv_buffer)?;
        if frame_len < AEAD_MAC_LEN || frame_len > NOISE_FRAME_MAX_SIZE {
            return Err(Error::MalformedFrameLength(frame_len));
        }
        if recv_buffer.len() < NoiseHeader::SIZE + frame_len {
            return Ok(false);
        }

        let mut ciphertext =
            recv_buffer[NoiseHeader::SIZE..NoiseHeader::SIZE + frame_len].to_vec();
        recv_buffer.drain(..NoiseHeader::SIZE + frame_len);
        codec.decrypt(&mut ciphertext)?;
        sv2_buffer.extend_from_slice(&ciphertext);

        // One frame may complete several messages, or none.
        while sv2_buffer.len() >= SV2_FRAME_HEADER_SIZE {
            let header = Header::from_bytes(sv2_buffer)?;
            let full = SV2_FRAME_HEADER_SIZE + header.len();
            if sv2_buffer.len() < full {
                break;
            }
            let payload = sv2_buffer[SV2_FRAME_HEADER_SIZE..full].to_vec();
            sv2_buffer.drain(..full);
            recv_messages.push_back(Sv2NetMsg {
                extension_type: header.extension_type(),
                msg_type: header.msg_type(),
                payload,
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noise_sv2::generate_key;

    fn transport_pair() -> (Sv2Transport, Sv2Transport) {
        let authority = generate_key();
        let responder = Responder::from_authority_kp(&authority, 3600);
        let initiator = Initiator::new(generate_key(), Some(authority.x_only_public_key().0));

        let mut client = Sv2Transport::new_initiator(initiator).unwrap();
        let mut server = Sv2Transport::new_responder(responder);

        // -> e
        let (step1, _) = client.get_bytes_to_send(false);
        assert_eq!(step1.len(), HANDSHAKE_STEP1_SIZE);
        let step1 = step1.to_vec();
        client.mark_bytes_sent(step1.len());
        server.received_bytes(&step1).unwrap();

        // <- e, ee, s, es, cert
        let (step2, _) = server.get_bytes_to_send(false);
        assert_eq!(step2.len(), HANDSHAKE_STEP2_SIZE);
        let step2 = step2.to_vec();
        server.mark_bytes_sent(step2.len());
        client.received_bytes(&step2).unwrap();
        assert!(client.ready());

        // -> s, se
        let (step3, _) = client.get_bytes_to_send(false);
        assert_eq!(step3.len(), HANDSHAKE_STEP3_SIZE);
        let step3 = step3.to_vec();
        client.mark_bytes_sent(step3.len());
        server.received_bytes(&step3).unwrap();
        assert!(server.ready());

        (client, server)
    }

    fn drain(transport: &mut Sv2Transport) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let (slice, more) = transport.get_bytes_to_send(false);
            if slice.is_empty() {
                break;
            }
            out.extend_from_slice(slice);
            let n = slice.len();
            transport.mark_bytes_sent(n);
            if !more {
                break;
            }
        }
        out
    }

    #[test]
    fn handshake_then_small_message() {
        let (mut client, mut server) = transport_pair();

        let msg = Sv2NetMsg::new(0x00, vec![1, 2, 3, 4]);
        assert!(client.set_message_to_send(&msg));
        let wire = drain(&mut client);
        // 3-byte length + 6-byte header + 4-byte payload + MAC
        assert_eq!(wire.len(), 3 + 6 + 4 + 16);

        assert!(server.received_bytes(&wire).unwrap());
        let received = server.get_received_message().unwrap();
        assert_eq!(received, msg);
        assert!(server.get_received_message().is_none());
    }

    #[test]
    fn zero_payload_frame_at_nonce_zero() {
        let (mut client, mut server) = transport_pair();

        let msg = Sv2NetMsg::new(0x73, vec![]);
        assert!(client.set_message_to_send(&msg));
        let wire = drain(&mut client);
        assert_eq!(wire.len(), 3 + 6 + 16);
        assert!(server.received_bytes(&wire).unwrap());
        assert_eq!(server.get_received_message().unwrap(), msg);
    }

    #[test]
    fn fragmentation_is_transparent() {
        // Any in-order partition of the byte stream yields exactly the
        // sent message, no more.
        for chunk_size in [1usize, 2, 3, 7, 10, 64] {
            let (mut client, mut server) = transport_pair();
            let msg = Sv2NetMsg::new(0x71, (0..200u8).collect());
            assert!(client.set_message_to_send(&msg));
            let wire = drain(&mut client);

            let mut seen = 0;
            for fragment in wire.chunks(chunk_size) {
                if server.received_bytes(fragment).unwrap() {
                    seen += 1;
                }
            }
            assert_eq!(seen, 1, "chunk_size {}", chunk_size);
            assert_eq!(server.get_received_message().unwrap(), msg);
            assert!(server.get_received_message().is_none());
        }
    }

    #[test]
    fn large_message_spans_multiple_frames() {
        let (mut client, mut server) = transport_pair();

        // 70 000 bytes of payload plus the 6-byte header exceeds one
        // 65519-byte frame.
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let msg = Sv2NetMsg::new(0x74, payload);
        assert!(client.set_message_to_send(&msg));
        let wire = drain(&mut client);

        let total_plain = 6 + 70_000;
        let full_frames = total_plain / SV2_FRAME_CHUNK_SIZE;
        let tail = total_plain % SV2_FRAME_CHUNK_SIZE;
        let frames = full_frames + usize::from(tail != 0);
        assert_eq!(frames, 2);
        assert_eq!(wire.len(), total_plain + frames * (3 + 16));

        assert!(server.received_bytes(&wire).unwrap());
        assert_eq!(server.get_received_message().unwrap(), msg);
    }

    #[test]
    fn single_message_in_flight() {
        let (mut client, _server) = transport_pair();

        let msg = Sv2NetMsg::new(0x00, vec![0; 8]);
        assert!(client.set_message_to_send(&msg));
        // The previous message has not been drained yet.
        assert!(!client.set_message_to_send(&msg));
        drain(&mut client);
        assert!(client.set_message_to_send(&msg));
    }

    #[test]
    fn replayed_frame_is_fatal() {
        let (mut client, mut server) = transport_pair();

        let msg = Sv2NetMsg::new(0x00, vec![5; 10]);
        assert!(client.set_message_to_send(&msg));
        let wire = drain(&mut client);
        assert!(server.received_bytes(&wire).unwrap());

        // Same ciphertext again: the receive nonce has moved on.
        assert!(server.received_bytes(&wire).is_err());
    }

    #[test]
    fn tampered_frame_is_fatal() {
        let (mut client, mut server) = transport_pair();

        let msg = Sv2NetMsg::new(0x00, vec![5; 10]);
        assert!(client.set_message_to_send(&msg));
        let mut wire = drain(&mut client);
        let last = wire.len() - 1;
        wire[last] ^= 0x80;
        assert!(server.received_bytes(&wire).is_err());
    }

    #[test]
    fn malformed_frame_length_is_fatal() {
        let (_client, mut server) = transport_pair();

        // Length below the MAC size can never be a valid frame.
        let bogus = [0x01, 0x00, 0x00];
        assert!(matches!(
            server.received_bytes(&bogus),
            Err(Error::MalformedFrameLength(1))
        ));
    }

    #[test]
    fn no_messages_before_handshake_completes() {
        let authority = generate_key();
        let responder = Responder::from_authority_kp(&authority, 3600);
        let mut server = Sv2Transport::new_responder(responder);

        assert!(!server.ready());
        let msg = Sv2NetMsg::new(0x00, vec![]);
        assert!(!server.set_message_to_send(&msg));
    }

    #[test]
    fn pipelined_step3_and_first_frame() {
        // A client may send handshake message 3 and its first encrypted
        // frame in one burst; the server must handle both from one read.
        let authority = generate_key();
        let responder = Responder::from_authority_kp(&authority, 3600);
        let initiator = Initiator::new(generate_key(), Some(authority.x_only_public_key().0));

        let mut client = Sv2Transport::new_initiator(initiator).unwrap();
        let mut server = Sv2Transport::new_responder(responder);

        let step1 = drain(&mut client);
        server.received_bytes(&step1).unwrap();
        let step2 = drain(&mut server);
        client.received_bytes(&step2).unwrap();

        let mut burst = drain(&mut client);
        let msg = Sv2NetMsg::new(0x70, vec![9; 6]);
        assert!(client.set_message_to_send(&msg));
        burst.extend_from_slice(&drain(&mut client));

        assert!(server.received_bytes(&burst).unwrap());
        assert!(server.ready());
        assert_eq!(server.get_received_message().unwrap(), msg);
    }
}
