//! Deployed beans
//!
//! The handlers only need to find a bean by locator, call a method on it, and
//! open a session on stateful beans. [`DeploymentRepository`] is that seam;
//! [`InMemoryDeploymentRepository`] is the implementation the server binary
//! and the tests use.
//!
//! The repository also publishes [`ModuleEvent`]s so every open channel can
//! tell its client when modules come and go.
//!
//! Compression hints are declared on a [`BeanDescriptor`] per bean type and
//! per method, and resolved once at registration: a method-level hint always
//! wins over the type-level one.

use crate::cancellation::CancellationFlag;
use crate::model::{
    Attachments, EjbLocator, MethodLocator, ModuleIdentifier, RemoteFailure, SessionId, Value,
};
use crate::{RemotingError, Result};
use codec::CompressionLevel;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

/// Buffered module events per subscriber before it lags
const MODULE_EVENT_CAPACITY: usize = 64;

/// Response compression preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressionHint {
    pub compress_response: bool,
    pub level: CompressionLevel,
}

impl CompressionHint {
    /// Responses are written as-is
    pub const NONE: Self = Self {
        compress_response: false,
        level: CompressionLevel::DEFAULT,
    };

    /// Compress responses at `level`
    pub fn compressed(level: CompressionLevel) -> Self {
        Self {
            compress_response: true,
            level,
        }
    }

    /// Level to compress at, if compression is wanted at all
    pub fn response_level(&self) -> Option<CompressionLevel> {
        self.compress_response.then_some(self.level)
    }
}

/// Why a bean call did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    /// The bean threw; the failure is sent back to the caller
    #[error("application failure: {0}")]
    Application(RemoteFailure),

    /// The bean exists but cannot take calls right now
    #[error("bean unavailable: {0}")]
    Unavailable(String),

    /// The bean noticed a cancel request and stopped
    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    pub fn application(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application(RemoteFailure::new(exception_type, message))
    }
}

/// What a running invocation can see of its caller
pub struct InvocationContext {
    cancellation: Arc<CancellationFlag>,
    attachments: Attachments,
    response_attachments: Attachments,
}

impl InvocationContext {
    pub fn new(cancellation: Arc<CancellationFlag>, attachments: Attachments) -> Self {
        Self {
            cancellation,
            attachments,
            response_attachments: BTreeMap::new(),
        }
    }

    /// Advisory: the caller asked for this invocation to stop
    pub fn is_cancel_requested(&self) -> bool {
        self.cancellation.is_cancel_requested()
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Attach a value to the response
    pub fn put_response_attachment(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.response_attachments.insert(key.into(), value.into());
    }

    pub fn into_response_attachments(self) -> Attachments {
        self.response_attachments
    }
}

/// A callable bean
pub trait BeanDeployment: Send + Sync {
    /// Call `method`; runs on a worker thread and may block
    fn invoke(
        &self,
        method: &MethodLocator,
        arguments: Vec<Value>,
        context: &mut InvocationContext,
    ) -> std::result::Result<Value, InvocationError>;

    /// Whether this bean keeps per-client state
    fn is_stateful(&self) -> bool {
        false
    }

    /// Create a new session on a stateful bean
    fn open_session(&self) -> std::result::Result<SessionId, InvocationError> {
        Err(InvocationError::Unavailable("bean is not stateful".to_string()))
    }
}

type InvokeFn = dyn Fn(&MethodLocator, Vec<Value>, &mut InvocationContext) -> std::result::Result<Value, InvocationError>
    + Send
    + Sync;
type SessionFn = dyn Fn() -> std::result::Result<SessionId, InvocationError> + Send + Sync;

/// Closure-backed bean
pub struct FnBean {
    invoke: Box<InvokeFn>,
    sessions: Option<Box<SessionFn>>,
}

impl FnBean {
    pub fn new<F>(invoke: F) -> Self
    where
        F: Fn(&MethodLocator, Vec<Value>, &mut InvocationContext) -> std::result::Result<Value, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            sessions: None,
        }
    }

    /// Make the bean stateful, creating sessions with `factory`
    pub fn with_sessions<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<SessionId, InvocationError> + Send + Sync + 'static,
    {
        self.sessions = Some(Box::new(factory));
        self
    }
}

impl BeanDeployment for FnBean {
    fn invoke(
        &self,
        method: &MethodLocator,
        arguments: Vec<Value>,
        context: &mut InvocationContext,
    ) -> std::result::Result<Value, InvocationError> {
        (self.invoke)(method, arguments, context)
    }

    fn is_stateful(&self) -> bool {
        self.sessions.is_some()
    }

    fn open_session(&self) -> std::result::Result<SessionId, InvocationError> {
        match &self.sessions {
            Some(factory) => factory(),
            None => Err(InvocationError::Unavailable("bean is not stateful".to_string())),
        }
    }
}

/// Registration-time description of a bean
#[derive(Debug, Clone)]
pub struct BeanDescriptor {
    pub locator: EjbLocator,
    pub methods: Vec<MethodLocator>,
    /// Hint declared on the bean type
    pub type_hint: Option<CompressionHint>,
    /// Hints declared on individual methods
    pub method_hints: HashMap<MethodLocator, CompressionHint>,
}

impl BeanDescriptor {
    pub fn new(locator: EjbLocator) -> Self {
        Self {
            locator,
            methods: Vec::new(),
            type_hint: None,
            method_hints: HashMap::new(),
        }
    }

    pub fn method(mut self, method: MethodLocator) -> Self {
        self.methods.push(method);
        self
    }

    pub fn type_hint(mut self, hint: CompressionHint) -> Self {
        self.type_hint = Some(hint);
        self
    }

    pub fn method_hint(mut self, method: MethodLocator, hint: CompressionHint) -> Self {
        self.method_hints.insert(method, hint);
        self
    }
}

/// A registered bean with its compression hints resolved per method
pub struct DeployedBean {
    locator: EjbLocator,
    bean: Arc<dyn BeanDeployment>,
    methods: HashMap<MethodLocator, CompressionHint>,
}

impl DeployedBean {
    fn resolve(descriptor: BeanDescriptor, bean: Arc<dyn BeanDeployment>) -> Result<Self> {
        if let Some(undeclared) = descriptor
            .method_hints
            .keys()
            .find(|m| !descriptor.methods.contains(m))
        {
            return Err(RemotingError::configuration(
                format!("compression hint for undeclared method {}", undeclared),
                Some(&descriptor.locator.to_string()),
            ));
        }

        let type_hint = descriptor.type_hint.unwrap_or(CompressionHint::NONE);
        let methods = descriptor
            .methods
            .into_iter()
            .map(|method| {
                let hint = descriptor
                    .method_hints
                    .get(&method)
                    .copied()
                    .unwrap_or(type_hint);
                (method, hint)
            })
            .collect();

        Ok(Self {
            locator: descriptor.locator,
            bean,
            methods,
        })
    }

    pub fn locator(&self) -> &EjbLocator {
        &self.locator
    }

    pub fn bean(&self) -> &Arc<dyn BeanDeployment> {
        &self.bean
    }

    /// Effective hint of a method, `None` if the bean has no such method
    pub fn method_hint(&self, method: &MethodLocator) -> Option<CompressionHint> {
        self.methods.get(method).copied()
    }
}

/// Change in the set of modules clients may invoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Available(Vec<ModuleIdentifier>),
    Unavailable(Vec<ModuleIdentifier>),
}

/// Lookup of deployed beans
pub trait DeploymentRepository: Send + Sync {
    fn find_bean(&self, locator: &EjbLocator) -> Option<Arc<DeployedBean>>;

    /// Modules with at least one deployed bean
    fn modules(&self) -> Vec<ModuleIdentifier>;

    /// Module availability changes from now on
    fn subscribe(&self) -> broadcast::Receiver<ModuleEvent>;
}

/// Thread-safe in-memory repository
///
/// While suspended no bean can be found and no module is reported, as if
/// everything had been undeployed; [`resume`](Self::resume) brings them back.
pub struct InMemoryDeploymentRepository {
    beans: RwLock<HashMap<EjbLocator, Arc<DeployedBean>>>,
    suspended: AtomicBool,
    events: broadcast::Sender<ModuleEvent>,
}

impl Default for InMemoryDeploymentRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeploymentRepository {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(MODULE_EVENT_CAPACITY);
        Self {
            beans: RwLock::new(HashMap::new()),
            suspended: AtomicBool::new(false),
            events,
        }
    }

    /// Register a bean, replacing any previous one at the same locator
    pub fn deploy(
        &self,
        descriptor: BeanDescriptor,
        bean: impl BeanDeployment + 'static,
    ) -> Result<()> {
        let deployed = DeployedBean::resolve(descriptor, Arc::new(bean))?;
        info!(
            bean = %deployed.locator,
            methods = deployed.methods.len(),
            "Bean deployed"
        );
        let module = deployed.locator.module.clone();

        let mut beans = self.beans.write();
        let new_module = !beans.keys().any(|locator| locator.module == module);
        beans.insert(deployed.locator.clone(), Arc::new(deployed));
        if new_module {
            self.publish(ModuleEvent::Available(vec![module]));
        }
        Ok(())
    }

    /// Remove a bean; the module goes unavailable with its last bean
    pub fn undeploy(&self, locator: &EjbLocator) -> bool {
        let mut beans = self.beans.write();
        if beans.remove(locator).is_none() {
            return false;
        }
        info!(bean = %locator, "Bean undeployed");
        if !beans.keys().any(|other| other.module == locator.module) {
            self.publish(ModuleEvent::Unavailable(vec![locator.module.clone()]));
        }
        true
    }

    /// Withdraw every module until [`resume`](Self::resume)
    pub fn suspend(&self) {
        let beans = self.beans.write();
        if !self.suspended.swap(true, Ordering::AcqRel) {
            info!("Deployments suspended");
            let _ = self.events.send(ModuleEvent::Unavailable(module_list(&beans)));
        }
    }

    pub fn resume(&self) {
        let beans = self.beans.write();
        if self.suspended.swap(false, Ordering::AcqRel) {
            info!("Deployments resumed");
            let _ = self.events.send(ModuleEvent::Available(module_list(&beans)));
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Send while not suspended; a send without subscribers is fine
    fn publish(&self, event: ModuleEvent) {
        if !self.is_suspended() {
            let _ = self.events.send(event);
        }
    }
}

fn module_list(beans: &HashMap<EjbLocator, Arc<DeployedBean>>) -> Vec<ModuleIdentifier> {
    let mut modules: Vec<_> = beans.keys().map(|locator| locator.module.clone()).collect();
    modules.sort();
    modules.dedup();
    modules
}

impl DeploymentRepository for InMemoryDeploymentRepository {
    fn find_bean(&self, locator: &EjbLocator) -> Option<Arc<DeployedBean>> {
        if self.is_suspended() {
            return None;
        }
        self.beans.read().get(locator).cloned()
    }

    fn modules(&self) -> Vec<ModuleIdentifier> {
        if self.is_suspended() {
            return Vec::new();
        }
        module_list(&self.beans.read())
    }

    fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }
}
