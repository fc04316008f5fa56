//! Shared state handed to every handler.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::execution::Dispatcher;
use crate::registry::TaskRegistry;
use crate::society::ModuleCatalog;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: Arc<GatewayConfig>) -> Self {
        Self { dispatcher, config }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.dispatcher.registry()
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        self.dispatcher.catalog()
    }
}
