//! Entry point bundling every fleet service over one shared state

use crate::action::ActionService;
use crate::lifecycle::LifecycleService;
use crate::namespace::NamespaceService;
use crate::provision::Provisioner;
use crate::query::QueryService;
use crate::remote::{BastionService, RemoteExecutor};
use crate::scale::Scaler;
use crate::state::OrchestratorState;
use crate::status::StatusService;

/// All fleet operations. Cheap to clone.
#[derive(Clone)]
pub struct Fleet {
    state: OrchestratorState,
    pub namespaces: NamespaceService,
    pub provisioner: Provisioner,
    pub scaler: Scaler,
    pub status: StatusService,
    pub query: QueryService,
    pub actions: ActionService,
    pub lifecycle: LifecycleService,
    pub remote: RemoteExecutor,
    pub bastions: BastionService,
}

impl Fleet {
    pub fn new(state: OrchestratorState) -> Self {
        Self {
            namespaces: NamespaceService::new(state.clone()),
            provisioner: Provisioner::new(state.clone()),
            scaler: Scaler::new(state.clone()),
            status: StatusService::new(state.clone()),
            query: QueryService::new(state.clone()),
            actions: ActionService::new(state.clone()),
            lifecycle: LifecycleService::new(state.clone()),
            remote: RemoteExecutor::new(state.clone()),
            bastions: BastionService::new(state.clone()),
            state,
        }
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }
}
