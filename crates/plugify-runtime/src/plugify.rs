//! Top-level host object and its builder.

use crate::config::Config;
use crate::filesystem::{FileSystem, StdFileSystem};
use crate::logger::{ConsoleLogger, Logger, Severity};
use crate::manager::Manager;
use crate::resolver::{DefaultDependencyResolver, DependencyResolver};
use crate::services::ServiceLocator;
use parking_lot::Mutex;
use plugify_core::{ErrorKind, ManifestParser, ParseMode, PlugifyError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The assembled host: configuration, services, and the manager, plus the
/// optional background update pump.
pub struct Plugify {
    config: Config,
    services: Arc<ServiceLocator>,
    logger: Arc<dyn Logger>,
    manager: Arc<Mutex<Manager>>,
    update_thread: Option<std::thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    initialized: bool,
}

impl Plugify {
    pub fn builder() -> PlugifyBuilder {
        PlugifyBuilder::default()
    }

    /// Validate paths, create the base layout, and run the manager
    /// pipeline. Individual extension failures do not fail this call.
    pub fn initialize(&mut self) -> Result<(), PlugifyError> {
        if self.initialized {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                "Already initialized",
            ));
        }

        self.config.validate()?;
        self.create_directories()?;

        let started = Instant::now();
        self.manager.lock().initialize()?;
        self.logger.log(
            &format!("Initialized in {:.1?}", started.elapsed()),
            Severity::Debug,
        );

        if self.config.update_interval.is_some() {
            self.start_update_thread();
        }

        self.initialized = true;
        Ok(())
    }

    /// Tear everything down. Idempotent; errors are logged, not returned.
    pub fn terminate(&mut self) {
        if !self.initialized {
            return;
        }

        self.stop_update_thread();
        self.manager.lock().terminate();
        self.logger.flush();
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Single pipeline tick; a no-op when the background pump is running.
    pub fn update(&self, dt: std::time::Duration) {
        if self.update_thread.is_none() {
            self.manager.lock().update(dt);
        }
    }

    pub fn manager(&self) -> &Arc<Mutex<Manager>> {
        &self.manager
    }

    pub fn services(&self) -> &Arc<ServiceLocator> {
        &self.services
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn create_directories(&self) -> Result<(), PlugifyError> {
        let filesystem: Arc<dyn FileSystem> = self
            .services
            .get()
            .unwrap_or_else(|| Arc::new(StdFileSystem));

        let base = &self.config.base_dir;
        for dir in [
            base.clone(),
            base.join(&self.config.plugins_dir),
            base.join(&self.config.modules_dir),
            base.join(&self.config.configs_dir),
            base.join(&self.config.data_dir),
            base.join(&self.config.logs_dir),
        ] {
            if !filesystem.exists(&dir) {
                filesystem.create_directories(&dir).map_err(|err| {
                    PlugifyError::new(
                        ErrorKind::LoadFailed,
                        format!("Failed to create directory '{}': {}", dir.display(), err),
                    )
                })?;
            }
        }
        Ok(())
    }

    fn start_update_thread(&mut self) {
        let Some(interval) = self.config.update_interval else {
            return;
        };
        self.stop.store(false, Ordering::Release);

        let manager = Arc::clone(&self.manager);
        let stop = Arc::clone(&self.stop);
        self.update_thread = Some(std::thread::spawn(move || {
            let mut last = Instant::now();
            while !stop.load(Ordering::Acquire) {
                let now = Instant::now();
                manager.lock().update(now - last);
                last = now;
                std::thread::sleep(interval);
            }
        }));
    }

    fn stop_update_thread(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.update_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Plugify {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Assembles a [`Plugify`] instance, registering defaults for any
/// collaborator not supplied.
#[derive(Default)]
pub struct PlugifyBuilder {
    config: Config,
    services: ServiceLocator,
}

impl PlugifyBuilder {
    pub fn with_base_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.base_dir = dir.into();
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.services.register(logger);
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.services.register(filesystem);
        self
    }

    pub fn with_manifest_parser(mut self, parser: Arc<ManifestParser>) -> Self {
        self.services.register(parser);
        self
    }

    pub fn with_dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.services.register(resolver);
        self
    }

    pub fn with_module_loader(mut self, loader: Arc<dyn crate::language::ModuleLoader>) -> Self {
        self.services.register(loader);
        self
    }

    pub fn with_progress_reporter(
        mut self,
        reporter: Arc<dyn crate::progress::ProgressReporter>,
    ) -> Self {
        self.services.register(reporter);
        self
    }

    pub fn with_service<S: Clone + Send + Sync + 'static>(mut self, service: S) -> Self {
        self.services.register(service);
        self
    }

    pub fn build(mut self) -> Plugify {
        if !self.services.has::<Arc<dyn Logger>>() {
            let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger::default());
            self.services.register(logger);
        }
        if !self.services.has::<Arc<dyn FileSystem>>() {
            let filesystem: Arc<dyn FileSystem> = Arc::new(StdFileSystem);
            self.services.register(filesystem);
        }
        if !self.services.has::<Arc<ManifestParser>>() {
            self.services
                .register(Arc::new(ManifestParser::new(ParseMode::Lenient)));
        }
        if !self.services.has::<Arc<dyn DependencyResolver>>() {
            let resolver: Arc<dyn DependencyResolver> = Arc::new(DefaultDependencyResolver);
            self.services.register(resolver);
        }

        let logger: Arc<dyn Logger> = self
            .services
            .get()
            .expect("logger registered above");
        let manager = Manager::new(&self.services, self.config.clone());

        Plugify {
            config: self.config,
            services: Arc::new(self.services),
            logger,
            manager: Arc::new(Mutex::new(manager)),
            update_thread: None,
            stop: Arc::new(AtomicBool::new(false)),
            initialized: false,
        }
    }
}
