use std::sync::Arc;

use fleet_orchestrator::InstanceOrchestrator;

use crate::auth::RequestAuthenticator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: InstanceOrchestrator,
    pub authenticator: Arc<RequestAuthenticator>,
}

impl AppState {
    pub fn new(orchestrator: InstanceOrchestrator, authenticator: RequestAuthenticator) -> Self {
        Self {
            orchestrator,
            authenticator: Arc::new(authenticator),
        }
    }
}
