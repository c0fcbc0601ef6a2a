mod health;
pub mod implementations;

pub use health::ServiceHealth;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::logger::{self, LogTag};

/// Long-running part of the process with a managed lifecycle
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique service identifier
    fn name(&self) -> &'static str;

    /// Service priority (lower = starts earlier, stops later)
    fn priority(&self) -> i32 {
        100
    }

    /// Services this service depends on
    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn initialize(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Spawn the service's tasks; they must exit once `shutdown` fires
    async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String>;

    /// Called after shutdown was signalled, in reverse startup order
    async fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        ServiceHealth::Healthy
    }
}

pub struct ServiceManager {
    services: HashMap<&'static str, Box<dyn Service>>,
    handles: HashMap<&'static str, Vec<JoinHandle<()>>>,
    started: Vec<&'static str>,
    shutdown: Arc<Notify>,
    stop_timeout: Duration,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            handles: HashMap::new(),
            started: Vec::new(),
            shutdown: Arc::new(Notify::new()),
            stop_timeout: Duration::from_secs(5),
        }
    }

    pub fn register(&mut self, service: Box<dyn Service>) {
        let name = service.name();
        self.services.insert(name, service);
    }

    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Start all enabled services in dependency and priority order
    pub async fn start_all(&mut self) -> Result<(), String> {
        logger::info(LogTag::System, "Starting all services...");

        let enabled: Vec<&'static str> = self
            .services
            .iter()
            .filter(|(_, service)| service.is_enabled())
            .map(|(name, _)| *name)
            .collect();

        let ordered = self.resolve_startup_order(&enabled)?;
        logger::info(
            LogTag::System,
            &format!("Service startup order: {:?}", ordered),
        );

        for service_name in ordered {
            if let Some(service) = self.services.get_mut(service_name) {
                logger::debug(
                    LogTag::System,
                    &format!("Initializing service: {}", service_name),
                );
                service.initialize().await?;

                let handles = service.start(self.shutdown.clone()).await?;
                self.handles.insert(service_name, handles);
                self.started.push(service_name);

                logger::info(
                    LogTag::System,
                    &format!("Service started: {}", service_name),
                );
            }
        }

        logger::info(LogTag::System, "All services started");
        Ok(())
    }

    /// Signal shutdown, then stop services in reverse startup order
    pub async fn stop_all(&mut self) -> Result<(), String> {
        logger::info(LogTag::System, "Stopping all services...");

        self.shutdown.notify_waiters();

        let mut ordered = std::mem::take(&mut self.started);
        ordered.reverse();

        for service_name in ordered {
            if let Some(service) = self.services.get_mut(service_name) {
                if let Some(handles) = self.handles.remove(service_name) {
                    for handle in handles {
                        if tokio::time::timeout(self.stop_timeout, handle).await.is_err() {
                            logger::warning(
                                LogTag::System,
                                &format!("Service {} did not stop in time", service_name),
                            );
                        }
                    }
                }

                if let Err(e) = service.stop().await {
                    logger::warning(
                        LogTag::System,
                        &format!("Service stop error for {}: {}", service_name, e),
                    );
                }

                logger::info(
                    LogTag::System,
                    &format!("Service stopped: {}", service_name),
                );
            }
        }

        logger::info(LogTag::System, "All services stopped");
        Ok(())
    }

    /// Dependencies first; priority breaks ties
    fn resolve_startup_order(&self, services: &[&'static str]) -> Result<Vec<&'static str>, String> {
        fn visit(
            name: &'static str,
            services: &HashMap<&'static str, Box<dyn Service>>,
            enabled: &HashSet<&'static str>,
            ordered: &mut Vec<&'static str>,
            visited: &mut HashSet<&'static str>,
            visiting: &mut HashSet<&'static str>,
        ) -> Result<(), String> {
            if visited.contains(name) {
                return Ok(());
            }
            if visiting.contains(name) {
                return Err(format!("Circular dependency detected for service: {}", name));
            }
            visiting.insert(name);

            if let Some(service) = services.get(name) {
                for dep in service.dependencies() {
                    if !enabled.contains(dep) {
                        return Err(format!(
                            "Service {} depends on {}, which is not enabled",
                            name, dep
                        ));
                    }
                    visit(dep, services, enabled, ordered, visited, visiting)?;
                }
            }

            visiting.remove(name);
            visited.insert(name);
            ordered.push(name);
            Ok(())
        }

        let enabled: HashSet<&'static str> = services.iter().copied().collect();
        let mut by_priority: Vec<&'static str> = services.to_vec();
        by_priority.sort_by_key(|name| {
            (
                self.services.get(name).map(|s| s.priority()).unwrap_or(100),
                *name,
            )
        });

        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        for service_name in by_priority {
            visit(
                service_name,
                &self.services,
                &enabled,
                &mut ordered,
                &mut visited,
                &mut visiting,
            )?;
        }
        Ok(ordered)
    }

    pub async fn get_health(&self) -> HashMap<&'static str, ServiceHealth> {
        let mut health = HashMap::new();
        for (name, service) in &self.services {
            health.insert(*name, service.health().await);
        }
        health
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestService {
        name: &'static str,
        priority: i32,
        deps: Vec<&'static str>,
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Service for TestService {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn dependencies(&self) -> Vec<&'static str> {
            self.deps.clone()
        }

        async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String> {
            self.events.lock().push(format!("start:{}", self.name));
            let notified = shutdown.notified_owned();
            Ok(vec![tokio::spawn(async move { notified.await })])
        }

        async fn stop(&mut self) -> Result<(), String> {
            self.events.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn service(
        name: &'static str,
        priority: i32,
        deps: Vec<&'static str>,
        events: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn Service> {
        Box::new(TestService {
            name,
            priority,
            deps,
            events: events.clone(),
        })
    }

    #[tokio::test]
    async fn test_dependencies_start_first_and_stop_last() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ServiceManager::new();
        manager.register(service("bridge", 10, vec!["telemetry_flush"], &events));
        manager.register(service("telemetry_flush", 50, vec![], &events));
        manager.register(service("job_worker", 20, vec![], &events));

        manager.start_all().await.expect("start");
        manager.stop_all().await.expect("stop");

        assert_eq!(
            *events.lock(),
            vec![
                "start:telemetry_flush",
                "start:bridge",
                "start:job_worker",
                "stop:job_worker",
                "stop:bridge",
                "stop:telemetry_flush",
            ]
        );
    }

    #[tokio::test]
    async fn test_circular_dependency_is_rejected() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ServiceManager::new();
        manager.register(service("a", 10, vec!["b"], &events));
        manager.register(service("b", 10, vec!["a"], &events));

        let err = manager.start_all().await.expect_err("cycle");
        assert!(err.contains("Circular dependency"));
        assert!(events.lock().is_empty());
    }
}
