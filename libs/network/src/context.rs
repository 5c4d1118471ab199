//! Shared server collaborators
//!
//! One [`ServerContext`] is built at startup and shared by every channel.
//! Handlers reach it through the receiver they are dispatched from.

use crate::deployment::DeploymentRepository;
use crate::executor::WorkerPool;
use crate::marshalling::{BincodeMarshaller, Marshaller};
use crate::transaction::TransactionRecoveryService;
use codec::DEFAULT_MAX_INFLATED_SIZE;
use std::sync::Arc;

pub struct ServerContext {
    deployments: Arc<dyn DeploymentRepository>,
    recovery: Arc<dyn TransactionRecoveryService>,
    marshallers: Vec<Arc<dyn Marshaller>>,
    workers: WorkerPool,
    max_inflated_size: usize,
}

impl ServerContext {
    /// Context offering the bincode marshalling strategy
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        recovery: Arc<dyn TransactionRecoveryService>,
        workers: WorkerPool,
    ) -> Self {
        Self {
            deployments,
            recovery,
            marshallers: vec![Arc::new(BincodeMarshaller::new())],
            workers,
            max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
        }
    }

    /// Offer an additional strategy; a strategy with the same name is replaced
    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshallers.retain(|m| m.name() != marshaller.name());
        self.marshallers.push(marshaller);
        self
    }

    pub fn with_max_inflated_size(mut self, max_inflated_size: usize) -> Self {
        self.max_inflated_size = max_inflated_size;
        self
    }

    pub fn deployments(&self) -> &Arc<dyn DeploymentRepository> {
        &self.deployments
    }

    pub fn recovery(&self) -> &Arc<dyn TransactionRecoveryService> {
        &self.recovery
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn max_inflated_size(&self) -> usize {
        self.max_inflated_size
    }

    /// Strategy names in the order they are offered to clients
    pub fn marshaller_names(&self) -> Vec<&'static str> {
        self.marshallers.iter().map(|m| m.name()).collect()
    }

    pub fn marshaller(&self, name: &str) -> Option<Arc<dyn Marshaller>> {
        self.marshallers.iter().find(|m| m.name() == name).cloned()
    }
}
