//! Shared fixtures: a deployed test application and a raw protocol client
//! talking to a served in-memory channel.

#![allow(dead_code)]

use bytes::Bytes;
use codec::{
    deflate, inflate, CompressionLevel, HeaderTag, MessageReader, MessageWriter,
    DEFAULT_MAX_INFLATED_SIZE,
};
use network::transport::{pipe, Channel, MessageSink, MessageSource};
use network::{
    client_handshake, serve_channel, BeanDescriptor, BincodeMarshaller, CompressionHint,
    EjbLocator, FnBean, InMemoryDeploymentRepository, InMemoryTransactionLog, InvocationError,
    InvocationRequest, InvocationResponse, MarshallerExt, MethodLocator, ModuleIdentifier,
    ServerContext, SessionId, Value, WorkerPool, WorkerPoolConfig,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Route server logs through the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn module() -> ModuleIdentifier {
    ModuleIdentifier::new("shop", "ejb", "")
}

pub fn calculator() -> EjbLocator {
    EjbLocator::new(module(), "Calculator")
}

pub fn reports() -> EjbLocator {
    EjbLocator::new(module(), "Reports")
}

pub fn cart() -> EjbLocator {
    EjbLocator::new(module(), "Cart")
}

pub fn add() -> MethodLocator {
    MethodLocator::new("add", ["long", "long"])
}

pub fn fail() -> MethodLocator {
    MethodLocator::new("fail", Vec::<String>::new())
}

/// Blocks until the test releases it
pub fn park() -> MethodLocator {
    MethodLocator::new("park", Vec::<String>::new())
}

/// Spins until the invocation is cancelled
pub fn spin() -> MethodLocator {
    MethodLocator::new("spin", Vec::<String>::new())
}

/// Compressed by a method hint on an otherwise uncompressed bean
pub fn history() -> MethodLocator {
    MethodLocator::new("history", Vec::<String>::new())
}

pub fn large_report() -> MethodLocator {
    MethodLocator::new("largeReport", Vec::<String>::new())
}

pub fn summary() -> MethodLocator {
    MethodLocator::new("summary", Vec::<String>::new())
}

pub fn report_text() -> String {
    "quarterly revenue ".repeat(200)
}

/// Switches observed by the deployed test beans
#[derive(Default)]
pub struct Switches {
    pub release: AtomicBool,
    pub saw_cancel: AtomicBool,
    pub parked: AtomicU32,
}

/// Deploy the test application:
/// - `Calculator`: add, fail, park, spin, history; only `history` is hinted (level 1)
/// - `Reports`: type hint BEST, `largeReport` method hint level 6, `summary` method hint off
/// - `Cart`: stateful
pub fn deploy(switches: Arc<Switches>) -> Arc<InMemoryDeploymentRepository> {
    let repo = Arc::new(InMemoryDeploymentRepository::new());

    let calc_switches = switches.clone();
    repo.deploy(
        BeanDescriptor::new(calculator())
            .method(add())
            .method(fail())
            .method(park())
            .method(spin())
            .method(history())
            .method_hint(history(), CompressionHint::compressed(CompressionLevel::FAST)),
        FnBean::new(move |method, args, ctx| match method.name.as_str() {
            "add" => {
                let sum: i64 = args.iter().filter_map(Value::as_int).sum();
                ctx.put_response_attachment("calls", 1i64);
                Ok(Value::Int(sum))
            }
            "fail" => Err(InvocationError::application(
                "java.lang.ArithmeticException",
                "division by zero",
            )),
            "park" => {
                calc_switches.parked.fetch_add(1, Ordering::SeqCst);
                while !calc_switches.release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Ok(Value::Str("released".into()))
            }
            "spin" => {
                while !ctx.is_cancel_requested() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                calc_switches.saw_cancel.store(true, Ordering::SeqCst);
                Err(InvocationError::Cancelled)
            }
            "history" => Ok(Value::Str(report_text())),
            _ => Ok(Value::Null),
        }),
    )
    .unwrap();

    repo.deploy(
        BeanDescriptor::new(reports())
            .method(large_report())
            .method(summary())
            .type_hint(CompressionHint::compressed(CompressionLevel::BEST))
            .method_hint(large_report(), CompressionHint::compressed(CompressionLevel::DEFAULT))
            .method_hint(summary(), CompressionHint::NONE),
        FnBean::new(|method, _, _| match method.name.as_str() {
            "largeReport" => Ok(Value::Str(report_text())),
            _ => Ok(Value::Str("ok".into())),
        }),
    )
    .unwrap();

    let next_session = Arc::new(AtomicU32::new(1));
    repo.deploy(
        BeanDescriptor::new(cart()),
        FnBean::new(|_, _, _| Ok(Value::Null)).with_sessions(move || {
            let id = next_session.fetch_add(1, Ordering::SeqCst);
            Ok(SessionId(id.to_be_bytes().to_vec()))
        }),
    )
    .unwrap();

    repo
}

pub fn context_with(switches: Arc<Switches>, log: Arc<InMemoryTransactionLog>, max_workers: usize) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(
        deploy(switches),
        log,
        WorkerPool::new(&WorkerPoolConfig { max_workers }),
    ))
}

pub fn context() -> Arc<ServerContext> {
    context_with(
        Arc::new(Switches::default()),
        Arc::new(InMemoryTransactionLog::new()),
        8,
    )
}

/// Raw protocol client on the far end of a served channel
pub struct TestClient {
    pub source: Box<dyn MessageSource>,
    pub sink: Box<dyn MessageSink>,
    pub marshaller: BincodeMarshaller,
    pub modules: Vec<ModuleIdentifier>,
    pub server: JoinHandle<()>,
}

impl TestClient {
    /// Serve `server_side`, handshake on `client_side` and consume the
    /// module announcement
    pub async fn attach(
        server_side: Channel,
        client_side: Channel,
        context: Arc<ServerContext>,
        version: u8,
    ) -> Self {
        init_tracing();
        let server = tokio::spawn(serve_channel(server_side, context, Duration::from_secs(5)));
        let Channel {
            mut source,
            mut sink,
            ..
        } = client_side;

        client_handshake(source.as_mut(), sink.as_mut(), version, "bincode")
            .await
            .unwrap();

        let mut client = Self {
            source,
            sink,
            marshaller: BincodeMarshaller::new(),
            modules: Vec::new(),
            server,
        };

        let announcement = client.recv().await.unwrap();
        let mut reader = MessageReader::new(announcement);
        assert_eq!(reader.read_u8("tag").unwrap(), HeaderTag::ModuleAvailable.byte());
        let count = reader.read_packed_len("modules").unwrap();
        for _ in 0..count {
            client.modules.push(ModuleIdentifier::new(
                reader.read_utf("app").unwrap(),
                reader.read_utf("module").unwrap(),
                reader.read_utf("distinct").unwrap(),
            ));
        }
        client
    }

    pub async fn connect(context: Arc<ServerContext>, version: u8) -> Self {
        let (server_side, client_side) = pipe(64);
        Self::attach(server_side, client_side, context, version).await
    }

    pub async fn send(&mut self, message: &[u8]) {
        self.sink.write_message(message).await.unwrap();
    }

    /// Next message, `None` once the server closed the channel
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::time::timeout(RECV_TIMEOUT, self.source.read_message())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
    }

    pub async fn recv_message(&mut self) -> Bytes {
        self.recv().await.expect("server closed the channel")
    }

    pub fn invocation(&self, id: u16, locator: EjbLocator, method: MethodLocator, arguments: Vec<Value>) -> Vec<u8> {
        let request = InvocationRequest {
            locator,
            method,
            arguments,
            attachments: BTreeMap::new(),
        };
        let mut out = MessageWriter::with_header(HeaderTag::InvocationRequest);
        out.put_correlation_id(id);
        self.marshaller.write_invocation(&request, &mut out).unwrap();
        out.as_slice().to_vec()
    }

    pub async fn invoke(&mut self, id: u16, locator: EjbLocator, method: MethodLocator, arguments: Vec<Value>) {
        let message = self.invocation(id, locator, method, arguments);
        self.send(&message).await;
    }

    pub async fn cancel(&mut self, id: u16, may_interrupt: bool) {
        let mut out = MessageWriter::with_header(HeaderTag::InvocationCancelRequest);
        out.put_correlation_id(id).put_u8(may_interrupt as u8);
        self.send(out.as_slice()).await;
    }

    /// Decode an uncompressed invocation response
    pub fn read_response(&self, message: Bytes) -> (u16, InvocationResponse) {
        let mut reader = MessageReader::new(message);
        assert_eq!(reader.read_u8("tag").unwrap(), HeaderTag::InvocationResponse.byte());
        let id = reader.read_correlation_id().unwrap();
        (id, self.marshaller.read_response(&mut reader).unwrap())
    }
}

/// Wrap a complete message in the compressed-message envelope
pub fn compress(message: &[u8]) -> Vec<u8> {
    let mut out = vec![HeaderTag::CompressedMessage.byte()];
    out.extend(deflate(message, CompressionLevel::DEFAULT).unwrap());
    out
}

/// Undo [`compress`]
pub fn decompress(message: &[u8]) -> Bytes {
    assert_eq!(message[0], HeaderTag::CompressedMessage.byte());
    Bytes::from(inflate(&message[1..], DEFAULT_MAX_INFLATED_SIZE).unwrap())
}

/// Tag and correlation id of a response
pub fn tag_and_id(message: &[u8]) -> (u8, u16) {
    (message[0], u16::from_be_bytes([message[1], message[2]]))
}
