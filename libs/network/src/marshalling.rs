//! Object marshalling
//!
//! Message bodies carry opaque objects after their fixed framing fields. The
//! [`Marshaller`] trait is the seam for the encoding; [`BincodeMarshaller`] is
//! the strategy offered by default in the version handshake.

use crate::error::{RemotingError, Result};
use crate::model::{
    EjbLocator, InvocationRequest, InvocationResponse, RemoteFailure, SessionId, WireObject, Xid,
};
use bincode::Options;
use bytes::{Buf, BufMut};
use codec::{MessageReader, MessageWriter, BINCODE_MARSHALLING};

/// Encoding strategy for payload objects
pub trait Marshaller: Send + Sync {
    /// Strategy name negotiated during the handshake
    fn name(&self) -> &'static str;

    /// Append one self-delimiting object to `out`
    fn marshal(&self, object: &WireObject, out: &mut MessageWriter) -> Result<()>;

    /// Read the next object from `input`
    fn unmarshal(&self, input: &mut MessageReader) -> Result<WireObject>;
}

/// Typed helpers over [`Marshaller`]
pub trait MarshallerExt: Marshaller {
    fn write_invocation(&self, request: &InvocationRequest, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Invocation(request.clone()), out)
    }

    fn read_invocation(&self, input: &mut MessageReader) -> Result<InvocationRequest> {
        match self.unmarshal(input)? {
            WireObject::Invocation(request) => Ok(request),
            other => Err(unexpected("invocation request", &other)),
        }
    }

    fn write_response(&self, response: InvocationResponse, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Response(response), out)
    }

    fn read_response(&self, input: &mut MessageReader) -> Result<InvocationResponse> {
        match self.unmarshal(input)? {
            WireObject::Response(response) => Ok(response),
            other => Err(unexpected("invocation response", &other)),
        }
    }

    fn write_failure(&self, failure: RemoteFailure, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Failure(failure), out)
    }

    fn read_failure(&self, input: &mut MessageReader) -> Result<RemoteFailure> {
        match self.unmarshal(input)? {
            WireObject::Failure(failure) => Ok(failure),
            other => Err(unexpected("failure", &other)),
        }
    }

    fn write_xid(&self, xid: &Xid, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Xid(xid.clone()), out)
    }

    fn read_xid(&self, input: &mut MessageReader) -> Result<Xid> {
        match self.unmarshal(input)? {
            WireObject::Xid(xid) => Ok(xid),
            other => Err(unexpected("xid", &other)),
        }
    }

    fn write_locator(&self, locator: &EjbLocator, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Locator(locator.clone()), out)
    }

    fn read_locator(&self, input: &mut MessageReader) -> Result<EjbLocator> {
        match self.unmarshal(input)? {
            WireObject::Locator(locator) => Ok(locator),
            other => Err(unexpected("ejb locator", &other)),
        }
    }

    fn write_session_id(&self, session: SessionId, out: &mut MessageWriter) -> Result<()> {
        self.marshal(&WireObject::Session(session), out)
    }

    fn read_session_id(&self, input: &mut MessageReader) -> Result<SessionId> {
        match self.unmarshal(input)? {
            WireObject::Session(session) => Ok(session),
            other => Err(unexpected("session id", &other)),
        }
    }
}

impl<M: Marshaller + ?Sized> MarshallerExt for M {}

fn unexpected(expected: &str, got: &WireObject) -> RemotingError {
    RemotingError::marshalling(format!("expected {}, found {}", expected, got.kind()))
}

/// Bincode-backed marshaller
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeMarshaller;

impl BincodeMarshaller {
    pub fn new() -> Self {
        Self
    }
}

impl Marshaller for BincodeMarshaller {
    fn name(&self) -> &'static str {
        BINCODE_MARSHALLING
    }

    fn marshal(&self, object: &WireObject, out: &mut MessageWriter) -> Result<()> {
        bincode::DefaultOptions::new()
            .serialize_into(out.buffer_mut().writer(), object)
            .map_err(RemotingError::from)
    }

    fn unmarshal(&self, input: &mut MessageReader) -> Result<WireObject> {
        // Never allocate more than the message could possibly describe
        let limit = input.remaining() as u64;
        bincode::DefaultOptions::new()
            .with_limit(limit)
            .deserialize_from(input.as_buf().reader())
            .map_err(RemotingError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodLocator, ModuleIdentifier, Value, MAX_VALUE_DEPTH};
    use std::collections::BTreeMap;

    fn sample_request() -> InvocationRequest {
        InvocationRequest {
            locator: EjbLocator::new(ModuleIdentifier::new("app", "module", ""), "Calculator"),
            method: MethodLocator::new("add", ["long", "long"]),
            arguments: vec![Value::Int(2), Value::Int(3)],
            attachments: BTreeMap::new(),
        }
    }

    #[test]
    fn test_objects_are_self_delimiting() {
        let marshaller = BincodeMarshaller::new();
        let mut out = MessageWriter::new();
        marshaller.write_invocation(&sample_request(), &mut out).unwrap();
        marshaller
            .write_xid(&Xid::new(1, b"gtrid", b"bqual"), &mut out)
            .unwrap();
        out.put_u8(0xEE);

        let mut input = MessageReader::new(out.freeze());
        assert_eq!(marshaller.read_invocation(&mut input).unwrap(), sample_request());
        assert_eq!(
            marshaller.read_xid(&mut input).unwrap(),
            Xid::new(1, b"gtrid", b"bqual")
        );
        assert_eq!(input.read_u8("trailer").unwrap(), 0xEE);
    }

    #[test]
    fn test_wrong_kind_is_marshalling_error() {
        let marshaller = BincodeMarshaller::new();
        let mut out = MessageWriter::new();
        marshaller
            .write_failure(RemoteFailure::new("IllegalStateException", "boom"), &mut out)
            .unwrap();

        let mut input = MessageReader::new(out.freeze());
        let err = marshaller.read_xid(&mut input).unwrap_err();
        assert!(matches!(err, RemotingError::Marshalling { .. }));
    }

    #[test]
    fn test_truncated_payload() {
        let marshaller = BincodeMarshaller::new();
        let mut out = MessageWriter::new();
        marshaller.write_invocation(&sample_request(), &mut out).unwrap();
        let bytes = out.freeze();

        let mut input = MessageReader::new(bytes.slice(..bytes.len() - 3));
        assert!(marshaller.read_invocation(&mut input).is_err());
    }

    fn nested(depth: usize) -> Value {
        (0..depth).fold(Value::Null, |inner, _| Value::List(vec![inner]))
    }

    #[test]
    fn test_value_nesting_is_bounded() {
        let marshaller = BincodeMarshaller::new();
        let encode = |argument: Value| {
            let mut request = sample_request();
            request.arguments = vec![argument];
            let mut out = MessageWriter::new();
            marshaller.write_invocation(&request, &mut out).unwrap();
            out.freeze()
        };

        let deepest = nested(MAX_VALUE_DEPTH);
        let mut input = MessageReader::new(encode(deepest.clone()));
        let request = marshaller.read_invocation(&mut input).unwrap();
        assert_eq!(request.arguments, vec![deepest]);

        let mut input = MessageReader::new(encode(nested(200)));
        let err = marshaller.read_invocation(&mut input).unwrap_err();
        assert!(matches!(err, RemotingError::Marshalling { .. }));
    }
}
