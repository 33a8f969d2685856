use std::sync::Arc;

use {
    chatgate_instances::{InstanceRegistry, InstanceService},
    chatgate_send::SendService,
    secrecy::Secret,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub instances: Arc<InstanceService>,
    pub send: Arc<SendService>,
    /// Admin token. When unset, admin routes are open.
    pub global_token: Option<Arc<Secret<String>>>,
}

impl AppState {
    pub fn new(instances: Arc<InstanceService>, send: Arc<SendService>) -> Self {
        Self {
            instances,
            send,
            global_token: None,
        }
    }

    pub fn with_global_token(mut self, token: Option<Secret<String>>) -> Self {
        self.global_token = token.map(Arc::new);
        self
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.instances.registry()
    }
}
