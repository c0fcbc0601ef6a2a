use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::services::Service;
use crate::webserver::{self, WebState};

/// WebSocket binding for the hub
pub struct WebserverService {
    state: WebState,
    bind: String,
    enabled: bool,
}

impl WebserverService {
    pub fn new(state: WebState, bind: &str, enabled: bool) -> Self {
        Self {
            state,
            bind: bind.to_string(),
            enabled,
        }
    }
}

#[async_trait]
impl Service for WebserverService {
    fn name(&self) -> &'static str {
        "webserver"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String> {
        // Bind before spawning so a bad address fails startup
        let listener = webserver::bind(&self.bind).await?;
        let handle = tokio::spawn(webserver::serve(listener, self.state.clone(), shutdown));
        Ok(vec![handle])
    }
}
