//! Call codec: the type-tagged binary format carried by every transport.
//!
//! A call is `varint action-id | varint arg-count | value*`; a response is
//! `varint len | error utf8 | value`, where an empty error means success.
//! On a byte stream each call or response is framed with one varint length
//! prefix.
//!
//! Values:
//!   tag u8 | fixed 8 bytes BE                      Int, Uint
//!   tag u8 | varint len | bytes                    String, Bytes, PublicKey, records
//!   tag u8 | varint count | element*               arrays
//!   tag u8                                         Nil
//!
//! Record bodies use a fixed field order with no per-field tags. Strings and
//! byte fields inside a body are `varint len | bytes`, flags are one byte.

use bytes::{Buf, BufMut};

use crate::crypto::{Keypair, PublicKey};
use crate::records::{Bundle, Channel, Contact, Peer, Profile};

/// Largest frame accepted from a stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A u64 never needs more than ten LEB128 bytes.
pub const MAX_VARINT_LEN: usize = 10;

/// Nesting limit for heterogeneous arrays.
const MAX_DEPTH: usize = 32;

// ── Type tags ─────────────────────────────────────────────────────────────────

pub mod tag {
    pub const NIL: u8 = 0x00;
    pub const INT: u8 = 0x01;
    pub const UINT: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const BYTES: u8 = 0x04;
    pub const BYTES_ARRAY: u8 = 0x05;
    pub const ARRAY: u8 = 0x06;
    pub const PUBLIC_KEY: u8 = 0x07;
    pub const CONTACT: u8 = 0x08;
    pub const CONTACT_ARRAY: u8 = 0x09;
    pub const CHANNEL: u8 = 0x0A;
    pub const CHANNEL_ARRAY: u8 = 0x0B;
    pub const PROFILE: u8 = 0x0C;
    pub const PROFILE_ARRAY: u8 = 0x0D;
    pub const PEER: u8 = 0x0E;
    pub const PEER_ARRAY: u8 = 0x0F;
    pub const BUNDLE: u8 = 0x10;
}

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Int(i64),
    Uint(u64),
    Str(String),
    Bytes(Vec<u8>),
    BytesArray(Vec<Vec<u8>>),
    Array(Vec<Value>),
    PublicKey(PublicKey),
    Contact(Contact),
    Contacts(Vec<Contact>),
    Channel(Channel),
    Channels(Vec<Channel>),
    Profile(Profile),
    Profiles(Vec<Profile>),
    Peer(Peer),
    Peers(Vec<Peer>),
    Bundle(Bundle),
}

macro_rules! into_variant {
    ($fn:ident, $variant:ident, $ty:ty, $name:literal) => {
        pub fn $fn(self) -> Result<$ty, CodecError> {
            match self {
                Value::$variant(v) => Ok(v),
                other => Err(CodecError::TypeMismatch {
                    expected: $name,
                    found: other.kind(),
                }),
            }
        }
    };
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::BytesArray(_) => "bytes array",
            Value::Array(_) => "array",
            Value::PublicKey(_) => "public key",
            Value::Contact(_) => "contact",
            Value::Contacts(_) => "contact array",
            Value::Channel(_) => "channel",
            Value::Channels(_) => "channel array",
            Value::Profile(_) => "profile",
            Value::Profiles(_) => "profile array",
            Value::Peer(_) => "peer",
            Value::Peers(_) => "peer array",
            Value::Bundle(_) => "bundle",
        }
    }

    into_variant!(into_int, Int, i64, "int");
    into_variant!(into_uint, Uint, u64, "uint");
    into_variant!(into_string, Str, String, "string");
    into_variant!(into_bytes, Bytes, Vec<u8>, "bytes");
    into_variant!(into_bytes_array, BytesArray, Vec<Vec<u8>>, "bytes array");
    into_variant!(into_array, Array, Vec<Value>, "array");
    into_variant!(into_public_key, PublicKey, PublicKey, "public key");
    into_variant!(into_contact, Contact, Contact, "contact");
    into_variant!(into_contacts, Contacts, Vec<Contact>, "contact array");
    into_variant!(into_channel, Channel, Channel, "channel");
    into_variant!(into_channels, Channels, Vec<Channel>, "channel array");
    into_variant!(into_profile, Profile, Profile, "profile");
    into_variant!(into_profiles, Profiles, Vec<Profile>, "profile array");
    into_variant!(into_peer, Peer, Peer, "peer");
    into_variant!(into_peers, Peers, Vec<Peer>, "peer array");
    into_variant!(into_bundle, Bundle, Bundle, "bundle");

    /// Encode this value, tag included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_value(&mut out, self);
        out
    }

    /// Decode exactly one value from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
        let mut r = Reader::new(bytes);
        let v = r.value(0)?;
        r.finish()?;
        Ok(v)
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

/// Every remotely invocable action. Only `Id`, `Pickup` and `Dropoff` are
/// served on the public surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Id,
    Pickup,
    Dropoff,
    ListChannels,
    GetChannel,
    PutChannel,
    DeleteChannel,
    ListContacts,
    GetContact,
    PutContact,
    DeleteContact,
    ListProfiles,
    GetProfile,
    PutProfile,
    DeleteProfile,
    LoadProfile,
    ListPeers,
    GetPeer,
    PutPeer,
    DeletePeer,
    Send,
    SendChannel,
}

impl Action {
    pub const ALL: [Action; 22] = [
        Action::Id,
        Action::Pickup,
        Action::Dropoff,
        Action::ListChannels,
        Action::GetChannel,
        Action::PutChannel,
        Action::DeleteChannel,
        Action::ListContacts,
        Action::GetContact,
        Action::PutContact,
        Action::DeleteContact,
        Action::ListProfiles,
        Action::GetProfile,
        Action::PutProfile,
        Action::DeleteProfile,
        Action::LoadProfile,
        Action::ListPeers,
        Action::GetPeer,
        Action::PutPeer,
        Action::DeletePeer,
        Action::Send,
        Action::SendChannel,
    ];

    pub fn id(self) -> u64 {
        match self {
            Action::Id => 0x01,
            Action::Pickup => 0x02,
            Action::Dropoff => 0x03,
            Action::ListChannels => 0x10,
            Action::GetChannel => 0x11,
            Action::PutChannel => 0x12,
            Action::DeleteChannel => 0x13,
            Action::ListContacts => 0x14,
            Action::GetContact => 0x15,
            Action::PutContact => 0x16,
            Action::DeleteContact => 0x17,
            Action::ListProfiles => 0x18,
            Action::GetProfile => 0x19,
            Action::PutProfile => 0x1A,
            Action::DeleteProfile => 0x1B,
            Action::LoadProfile => 0x1C,
            Action::ListPeers => 0x1D,
            Action::GetPeer => 0x1E,
            Action::PutPeer => 0x1F,
            Action::DeletePeer => 0x20,
            Action::Send => 0x21,
            Action::SendChannel => 0x22,
        }
    }

    pub fn from_id(id: u64) -> Result<Self, CodecError> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.id() == id)
            .ok_or(CodecError::UnknownAction(id))
    }

    pub fn is_public(self) -> bool {
        matches!(self, Action::Id | Action::Pickup | Action::Dropoff)
    }
}

// ── Calls and responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub action: Action,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(action: Action, args: Vec<Value>) -> Self {
        Self { action, args }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_varint(&mut out, self.action.id());
        put_varint(&mut out, self.args.len() as u64);
        for arg in &self.args {
            put_value(&mut out, arg);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let action = Action::from_id(r.varint()?)?;
        let count = r.count()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(r.value(0)?);
        }
        r.finish()?;
        Ok(Self { action, args })
    }

    /// Positional argument reader for handlers.
    pub fn args(self) -> Args {
        Args {
            action: self.action,
            position: 0,
            inner: self.args.into_iter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Empty on success.
    pub error: String,
    pub value: Value,
}

impl Response {
    pub fn ok(value: Value) -> Self {
        Self {
            error: String::new(),
            value,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error.push_str("unspecified error");
        }
        Self {
            error,
            value: Value::Nil,
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        if self.error.is_empty() {
            Ok(self.value)
        } else {
            Err(self.error)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes(&mut out, self.error.as_bytes());
        put_value(&mut out, &self.value);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let error = r.string()?;
        let value = r.value(0)?;
        r.finish()?;
        Ok(Self { error, value })
    }
}

/// Pulls positional arguments off a call, naming the action in errors.
#[derive(Debug)]
pub struct Args {
    action: Action,
    position: usize,
    inner: std::vec::IntoIter<Value>,
}

impl Args {
    pub fn next_value(&mut self) -> Result<Value, CodecError> {
        let position = self.position;
        self.position += 1;
        self.inner.next().ok_or(CodecError::MissingArgument {
            action: self.action,
            position,
        })
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        self.next_value()?.into_string()
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        self.next_value()?.into_bytes()
    }

    pub fn int(&mut self) -> Result<i64, CodecError> {
        self.next_value()?.into_int()
    }

    pub fn uint(&mut self) -> Result<u64, CodecError> {
        self.next_value()?.into_uint()
    }

    /// Remaining arguments, each expected to be a string.
    pub fn rest_strings(&mut self) -> Result<Vec<String>, CodecError> {
        let mut out = Vec::new();
        while self.inner.len() > 0 {
            out.push(self.string()?);
        }
        Ok(out)
    }
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Prefix an encoded call or response with its varint length.
pub fn encode_frame(record: &[u8]) -> Result<Vec<u8>, CodecError> {
    if record.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(record.len()));
    }
    let mut out = Vec::with_capacity(MAX_VARINT_LEN + record.len());
    put_varint(&mut out, record.len() as u64);
    out.extend_from_slice(record);
    Ok(out)
}

/// Split one frame off the front of `bytes`. Returns the record and the number
/// of bytes consumed, or `NeedMore` when the buffer holds a partial frame.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), CodecError> {
    let (len, header) = match decode_varint(bytes) {
        Ok(v) => v,
        Err(CodecError::InputTooShort) => return Err(CodecError::NeedMore),
        Err(e) => return Err(e),
    };
    let len = usize::try_from(len).map_err(|_| CodecError::FrameTooLarge(usize::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    if bytes.len() < header + len {
        return Err(CodecError::NeedMore);
    }
    Ok((&bytes[header..header + len], header + len))
}

// ── Varints ───────────────────────────────────────────────────────────────────

pub fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

pub fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Decode a varint from the front of `bytes`, returning it and its length.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut r = Reader::new(bytes);
    let v = r.varint()?;
    Ok((v, bytes.len() - r.buf.len()))
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

fn put_bool(buf: &mut Vec<u8>, v: bool) {
    buf.put_u8(v as u8);
}

fn put_record<T>(buf: &mut Vec<u8>, record: &T, body: fn(&mut Vec<u8>, &T)) {
    let mut inner = Vec::new();
    body(&mut inner, record);
    put_bytes(buf, &inner);
}

fn put_records<T>(buf: &mut Vec<u8>, records: &[T], body: fn(&mut Vec<u8>, &T)) {
    put_varint(buf, records.len() as u64);
    for record in records {
        put_record(buf, record, body);
    }
}

fn contact_body(buf: &mut Vec<u8>, c: &Contact) {
    put_bytes(buf, c.name.as_bytes());
    put_bytes(buf, &c.public_key.to_bytes());
}

fn channel_body(buf: &mut Vec<u8>, c: &Channel) {
    put_bytes(buf, c.name.as_bytes());
    put_bytes(buf, &c.keypair.to_bytes());
}

fn profile_body(buf: &mut Vec<u8>, p: &Profile) {
    put_bytes(buf, p.name.as_bytes());
    put_bool(buf, p.enabled);
    put_bytes(buf, &p.keypair.to_bytes());
}

fn peer_body(buf: &mut Vec<u8>, p: &Peer) {
    put_bytes(buf, p.name.as_bytes());
    put_bool(buf, p.enabled);
    put_bytes(buf, p.uri.as_bytes());
    put_bytes(buf, p.group.as_bytes());
}

fn bundle_body(buf: &mut Vec<u8>, b: &Bundle) {
    put_bytes(buf, &b.data);
    buf.put_i64(b.time);
}

fn put_value(buf: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Nil => buf.put_u8(tag::NIL),
        Value::Int(i) => {
            buf.put_u8(tag::INT);
            buf.put_i64(*i);
        }
        Value::Uint(u) => {
            buf.put_u8(tag::UINT);
            buf.put_u64(*u);
        }
        Value::Str(s) => {
            buf.put_u8(tag::STRING);
            put_bytes(buf, s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.put_u8(tag::BYTES);
            put_bytes(buf, b);
        }
        Value::BytesArray(items) => {
            buf.put_u8(tag::BYTES_ARRAY);
            put_varint(buf, items.len() as u64);
            for item in items {
                put_bytes(buf, item);
            }
        }
        Value::Array(items) => {
            buf.put_u8(tag::ARRAY);
            put_varint(buf, items.len() as u64);
            for item in items {
                put_value(buf, item);
            }
        }
        Value::PublicKey(pk) => {
            buf.put_u8(tag::PUBLIC_KEY);
            put_bytes(buf, &pk.to_bytes());
        }
        Value::Contact(c) => {
            buf.put_u8(tag::CONTACT);
            put_record(buf, c, contact_body);
        }
        Value::Contacts(cs) => {
            buf.put_u8(tag::CONTACT_ARRAY);
            put_records(buf, cs, contact_body);
        }
        Value::Channel(c) => {
            buf.put_u8(tag::CHANNEL);
            put_record(buf, c, channel_body);
        }
        Value::Channels(cs) => {
            buf.put_u8(tag::CHANNEL_ARRAY);
            put_records(buf, cs, channel_body);
        }
        Value::Profile(p) => {
            buf.put_u8(tag::PROFILE);
            put_record(buf, p, profile_body);
        }
        Value::Profiles(ps) => {
            buf.put_u8(tag::PROFILE_ARRAY);
            put_records(buf, ps, profile_body);
        }
        Value::Peer(p) => {
            buf.put_u8(tag::PEER);
            put_record(buf, p, peer_body);
        }
        Value::Peers(ps) => {
            buf.put_u8(tag::PEER_ARRAY);
            put_records(buf, ps, peer_body);
        }
        Value::Bundle(b) => {
            buf.put_u8(tag::BUNDLE);
            put_record(buf, b, bundle_body);
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            Err(CodecError::InputTooShort)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    fn bool(&mut self) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    fn varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8()?;
            let low = u64::from(byte & 0x7F);
            if i == MAX_VARINT_LEN - 1 && low > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// A length or element count. Never larger than what is left, since every
    /// element occupies at least one byte.
    fn count(&mut self) -> Result<usize, CodecError> {
        let n = self.varint()?;
        match usize::try_from(n) {
            Ok(n) if n <= self.buf.remaining() => Ok(n),
            _ => Err(CodecError::InputTooShort),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let n = self.count()?;
        self.take(n)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.buf.len()))
        }
    }

    fn record<T>(&mut self, body: fn(&mut Reader<'a>) -> Result<T, CodecError>) -> Result<T, CodecError> {
        let mut inner = Reader::new(self.bytes()?);
        let v = body(&mut inner)?;
        inner.finish()?;
        Ok(v)
    }

    fn records<T>(&mut self, body: fn(&mut Reader<'a>) -> Result<T, CodecError>) -> Result<Vec<T>, CodecError> {
        let count = self.count()?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.record(body)?);
        }
        Ok(out)
    }

    fn keypair(&mut self) -> Result<Keypair, CodecError> {
        Ok(Keypair::from_bytes(self.bytes()?)?)
    }

    fn contact(&mut self) -> Result<Contact, CodecError> {
        Ok(Contact {
            name: self.string()?,
            public_key: PublicKey::from_bytes(self.bytes()?)?,
        })
    }

    fn channel(&mut self) -> Result<Channel, CodecError> {
        Ok(Channel {
            name: self.string()?,
            keypair: self.keypair()?,
        })
    }

    fn profile(&mut self) -> Result<Profile, CodecError> {
        Ok(Profile {
            name: self.string()?,
            enabled: self.bool()?,
            keypair: self.keypair()?,
        })
    }

    fn peer(&mut self) -> Result<Peer, CodecError> {
        Ok(Peer {
            name: self.string()?,
            enabled: self.bool()?,
            uri: self.string()?,
            group: self.string()?,
        })
    }

    fn bundle(&mut self) -> Result<Bundle, CodecError> {
        Ok(Bundle {
            data: self.bytes()?.to_vec(),
            time: self.i64()?,
        })
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep);
        }
        let v = match self.u8()? {
            tag::NIL => Value::Nil,
            tag::INT => Value::Int(self.i64()?),
            tag::UINT => Value::Uint(self.u64()?),
            tag::STRING => Value::Str(self.string()?),
            tag::BYTES => Value::Bytes(self.bytes()?.to_vec()),
            tag::BYTES_ARRAY => {
                let count = self.count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.bytes()?.to_vec());
                }
                Value::BytesArray(items)
            }
            tag::ARRAY => {
                let count = self.count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Value::Array(items)
            }
            tag::PUBLIC_KEY => Value::PublicKey(PublicKey::from_bytes(self.bytes()?)?),
            tag::CONTACT => Value::Contact(self.record(Reader::contact)?),
            tag::CONTACT_ARRAY => Value::Contacts(self.records(Reader::contact)?),
            tag::CHANNEL => Value::Channel(self.record(Reader::channel)?),
            tag::CHANNEL_ARRAY => Value::Channels(self.records(Reader::channel)?),
            tag::PROFILE => Value::Profile(self.record(Reader::profile)?),
            tag::PROFILE_ARRAY => Value::Profiles(self.records(Reader::profile)?),
            tag::PEER => Value::Peer(self.record(Reader::peer)?),
            tag::PEER_ARRAY => Value::Peers(self.records(Reader::peer)?),
            tag::BUNDLE => Value::Bundle(self.record(Reader::bundle)?),
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(v)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("input too short")]
    InputTooShort,
    #[error("varint overflows 64 bits")]
    VarintOverflow,
    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),
    #[error("unknown action id {0}")]
    UnknownAction(u64),
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    #[error("arrays nested too deeply")]
    TooDeep,
    #[error("{action:?} is missing argument {position}")]
    MissingArgument { action: Action, position: usize },
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("need more bytes")]
    NeedMore,
    #[error("bad key: {0}")]
    Key(#[from] crate::crypto::CryptoError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
