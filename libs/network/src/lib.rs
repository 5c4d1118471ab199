//! # EJB Remoting Network Layer
//!
//! ## Purpose
//!
//! Server side of the version one / version two remote invocation protocol:
//! channel associations, the per-channel read loop, versioned handler
//! dispatch, the protocol handlers themselves and the collaborators they
//! call into.
//!
//! ## Architecture Role
//!
//! ```text
//! transport ──► receiver ──► registry ──► handlers ──► worker pool
//!  (frames)     (read loop)   (tag tables)   (parse)     (bean calls)
//!                                                            │
//!      ◄──────────────── association (single writer) ◄───────┘
//! ```
//!
//! A message's first byte is its header tag. The receiver looks the tag up in
//! the handler chain of the negotiated version, the handler parses framing on
//! the read-loop task and hands blocking work to the worker pool, and the
//! worker task writes the response as one message under the association's
//! output lock. Responses complete in any order; correlation ids pair them
//! with their requests.
//!
//! ## Error Policy
//!
//! - Framing errors drop the offending message only
//! - An unknown header tag closes the channel
//! - Application failures are answered with a correlated failure message
//! - A response that cannot be written closes the channel

pub mod association;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod handshake;
pub mod marshalling;
pub mod model;
pub mod receiver;
pub mod registry;
pub mod server;
pub mod transaction;
pub mod transport;

pub use association::{ChannelAssociation, OutboundMessage};
pub use cancellation::{CancelOutcome, CancellationFlag, CancellationRegistry, Registration};
pub use config::RemotingConfig;
pub use context::ServerContext;
pub use deployment::{
    BeanDeployment, BeanDescriptor, CompressionHint, DeployedBean, DeploymentRepository, FnBean,
    InMemoryDeploymentRepository, InvocationContext, InvocationError, ModuleEvent,
};
pub use error::{RemotingError, Result};
pub use executor::{WorkerPool, WorkerPoolConfig};
pub use handlers::MessageHandler;
pub use handshake::{client_handshake, server_handshake, Negotiated, ServerGreeting};
pub use marshalling::{BincodeMarshaller, Marshaller, MarshallerExt};
pub use model::{
    Attachments, EjbLocator, InvocationRequest, InvocationResponse, MethodLocator,
    ModuleIdentifier, RemoteFailure, SessionId, Value, WireObject, Xid,
};
pub use receiver::ChannelReceiver;
pub use registry::{HandlerRegistry, HandlerTable};
pub use server::{serve_channel, RemotingServer};
pub use transaction::{InMemoryTransactionLog, TransactionRecoveryService};
pub use transport::{Channel, MessageSink, MessageSource, TransportType};
